mod loss_fn;
mod sigmoid_xent;
mod softmax_xent;

pub use loss_fn::LossFn;
pub use sigmoid_xent::SigmoidCrossEntropy;
pub use softmax_xent::{TwoClassSoftmax, two_class_logits};
