/// Negatives drawn for every user's held out positive at evaluation time.
pub const NUM_EVAL_NEGATIVES: usize = 999;

/// Candidates scored per user during evaluation, the positive is always the last one.
pub const EVAL_GROUP_SIZE: usize = NUM_EVAL_NEGATIVES + 1;

/// Steps per epoch, for both training and evaluation, when running on synthetic data.
///
/// Every step takes one batch per device, whatever the device count.
pub const SYNTHETIC_BATCHES_PER_EPOCH: usize = 2000;

/// Users with fewer ratings than this are dropped during preprocessing.
pub const MIN_NUM_RATINGS: usize = 20;

/// Batches the background producer may generate ahead of the consumer.
pub const PREFETCH_BATCHES: usize = 64;
