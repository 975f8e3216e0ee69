use machine_learning::training::BatchRef;
use sha2::{Digest, Sha256};

/// An owned batch of `(user, item)` pairs.
///
/// Padding entries point at user and item zero, carry a zero label and weight zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub users: Vec<u32>,
    pub items: Vec<u32>,
    pub labels: Vec<f32>,
    pub weights: Vec<f32>,
    /// Set on evaluation batches when duplicated candidates must be ignored.
    pub duplicates: Option<Vec<bool>>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            users: Vec::with_capacity(capacity),
            items: Vec::with_capacity(capacity),
            labels: Vec::with_capacity(capacity),
            weights: Vec::with_capacity(capacity),
            duplicates: None,
        }
    }

    /// A batch made entirely of padding.
    pub fn padding(len: usize) -> Self {
        let mut batch = Self::with_capacity(len);
        batch.pad_to(len);
        batch
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn push(&mut self, user: u32, item: u32, label: f32) {
        self.users.push(user);
        self.items.push(item);
        self.labels.push(label);
        self.weights.push(1.0);
        if let Some(duplicates) = &mut self.duplicates {
            duplicates.push(false);
        }
    }

    /// Pushes an evaluation candidate, flagging it as a duplicate when the batch tracks them.
    pub fn push_candidate(&mut self, user: u32, item: u32, label: f32, duplicate: bool) {
        self.push(user, item, label);
        if let Some(last) = self.duplicates.as_mut().and_then(|d| d.last_mut()) {
            *last = duplicate;
        }
    }

    /// Appends padding entries until the batch holds `len` of them.
    pub fn pad_to(&mut self, len: usize) {
        let Some(missing) = len.checked_sub(self.len()) else {
            return;
        };

        self.users.extend(std::iter::repeat_n(0, missing));
        self.items.extend(std::iter::repeat_n(0, missing));
        self.labels.extend(std::iter::repeat_n(0.0, missing));
        self.weights.extend(std::iter::repeat_n(0.0, missing));
        if let Some(duplicates) = &mut self.duplicates {
            duplicates.extend(std::iter::repeat_n(false, missing));
        }
    }

    /// The amount of non padding entries.
    pub fn valid(&self) -> usize {
        self.weights.iter().filter(|&&w| w > 0.0).count()
    }

    pub fn as_batch_ref(&self) -> BatchRef<'_> {
        BatchRef {
            users: &self.users,
            items: &self.items,
            labels: &self.labels,
            weights: &self.weights,
            duplicates: self.duplicates.as_deref(),
        }
    }

    fn digest_into(&self, hasher: &mut Sha256) {
        hasher.update(bytemuck::cast_slice::<u32, u8>(&self.users));
        hasher.update(bytemuck::cast_slice::<u32, u8>(&self.items));
        hasher.update(bytemuck::cast_slice::<f32, u8>(&self.labels));
        hasher.update(bytemuck::cast_slice::<f32, u8>(&self.weights));
    }
}

/// The hex SHA-256 digest of a sequence of batches.
pub fn digest(batches: &[Batch]) -> String {
    let mut hasher = Sha256::new();
    for batch in batches {
        batch.digest_into(&mut hasher);
    }

    format!("{:x}", hasher.finalize())
}

/// Splits `entries` examples into batches of `batch_size`, rounding the count up to a multiple
/// of `batches_per_step` so every step gets a full set of batches.
pub fn padded_batch_count(entries: usize, batch_size: usize, batches_per_step: usize) -> usize {
    entries
        .div_ceil(batch_size.max(1))
        .next_multiple_of(batches_per_step.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_carries_no_weight() {
        let mut batch = Batch::with_capacity(4);
        batch.push(3, 5, 1.0);
        batch.pad_to(4);

        assert_eq!(batch.len(), 4);
        assert_eq!(batch.valid(), 1);
        assert_eq!(batch.weights, [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(batch.as_batch_ref().valid(), 1.0);
    }

    #[test]
    fn duplicate_masks_follow_the_entries() {
        let mut batch = Batch {
            duplicates: Some(Vec::new()),
            ..Batch::default()
        };
        batch.push(0, 1, 0.0);
        batch.pad_to(3);

        assert_eq!(batch.duplicates.as_deref(), Some(&[false; 3][..]));
    }

    #[test]
    fn digests_depend_on_the_content() {
        let mut a = Batch::with_capacity(2);
        a.push(1, 2, 1.0);
        let mut b = a.clone();
        b.push(3, 4, 0.0);

        assert_eq!(digest(&[a.clone()]), digest(&[a.clone()]));
        assert_ne!(digest(&[a]), digest(&[b]));
    }

    #[test]
    fn batch_counts_round_up_to_whole_steps() {
        assert_eq!(padded_batch_count(10, 4, 1), 3);
        assert_eq!(padded_batch_count(10, 4, 2), 4);
        assert_eq!(padded_batch_count(16, 4, 4), 4);
        assert_eq!(padded_batch_count(0, 4, 2), 0);
    }
}
