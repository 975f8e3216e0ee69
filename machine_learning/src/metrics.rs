/// The cutoff used by the ranking metrics.
pub const TOP_K: usize = 10;

/// The metrics produced by an evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvalMetrics {
    /// The fraction of users whose held out item ranks in the top `TOP_K`.
    pub hit_rate: f32,
    /// The normalized discounted cumulative gain at `TOP_K`.
    pub ndcg: f32,
    /// The mean cross entropy over every evaluated candidate.
    pub loss: f32,
}

/// Returns how many counted candidates score strictly higher than the positive.
///
/// The positive is the last element of `scores`. Candidates flagged in `excluded` are
/// ignored, this is how duplicated candidates are dropped.
pub fn rank_of_positive(scores: &[f32], excluded: &[bool]) -> usize {
    let Some((&positive, negatives)) = scores.split_last() else {
        return 0;
    };

    negatives
        .iter()
        .enumerate()
        .filter(|&(i, &score)| !excluded.get(i).copied().unwrap_or(false) && score > positive)
        .count()
}

/// Accumulates hit rate, NDCG and loss across evaluation batches.
#[derive(Debug, Default, Clone)]
pub struct RankingAccumulator {
    hits: f64,
    ndcg: f64,
    groups: usize,
    loss: f64,
    loss_weight: f64,
}

impl RankingAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scores one group of candidates, positive last.
    pub fn add_group(&mut self, scores: &[f32], excluded: &[bool]) {
        let rank = rank_of_positive(scores, excluded);

        if rank < TOP_K {
            self.hits += 1.0;
            self.ndcg += std::f64::consts::LN_2 / ((rank + 2) as f64).ln();
        }

        self.groups += 1;
    }

    /// Adds a batch loss weighted by the amount of valid entries it had.
    pub fn add_loss(&mut self, loss: f32, weight: f32) {
        self.loss += loss as f64 * weight as f64;
        self.loss_weight += weight as f64;
    }

    pub fn merge(&mut self, other: &Self) {
        self.hits += other.hits;
        self.ndcg += other.ndcg;
        self.groups += other.groups;
        self.loss += other.loss;
        self.loss_weight += other.loss_weight;
    }

    /// The amount of groups scored so far.
    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn finish(&self) -> EvalMetrics {
        let mean = |sum: f64, n: f64| if n > 0.0 { (sum / n) as f32 } else { 0.0 };
        let groups = self.groups as f64;

        EvalMetrics {
            hit_rate: mean(self.hits, groups),
            ndcg: mean(self.ndcg, groups),
            loss: mean(self.loss, self.loss_weight),
        }
    }
}
