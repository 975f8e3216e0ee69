/// A borrowed batch of `(user, item)` pairs.
#[derive(Debug, Clone, Copy)]
pub struct BatchRef<'a> {
    pub users: &'a [u32],
    pub items: &'a [u32],
    pub labels: &'a [f32],
    /// Zero for padding entries, one otherwise.
    pub weights: &'a [f32],
    /// Candidates that repeat an earlier one of their group, only set on evaluation batches.
    pub duplicates: Option<&'a [bool]>,
}

impl BatchRef<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// The amount of non padding entries.
    pub fn valid(&self) -> f32 {
        self.weights.iter().sum()
    }
}
