//! Turns raw ratings into the dense index the generators sample from, and caches it.

use std::{
    borrow::Cow,
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use safetensors::{Dtype, SafeTensors, View};

use crate::{
    Dataset, PipelineErr, Result,
    constants::MIN_NUM_RATINGS,
    movielens::Rating,
};

const OFFSETS: &str = "user_offsets";
const TRAIN_ITEMS: &str = "train_items";
const TEST_ITEMS: &str = "test_items";
const NUM_ITEMS: &str = "num_items";

/// Every user's positives with dense ids.
///
/// Users are numbered in increasing raw id order and so are items. A user's most recent
/// rating is held out as its test positive, the rest are its training positives, sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingIndex {
    num_items: usize,
    offsets: Vec<u32>,
    train_items: Vec<u32>,
    test_items: Vec<u32>,
}

impl RatingIndex {
    /// Builds the index out of raw ratings, dropping users with fewer than `MIN_NUM_RATINGS`.
    pub fn build(mut ratings: Vec<Rating>) -> Result<Self> {
        ratings.sort_by_key(|r| (r.user, r.timestamp));

        let users: Vec<&[Rating]> = ratings
            .chunk_by(|a, b| a.user == b.user)
            .filter(|group| group.len() >= MIN_NUM_RATINGS)
            .collect();

        if users.is_empty() {
            return Err(PipelineErr::EmptyDataset);
        }

        let mut items: Vec<u32> = users.iter().flat_map(|g| g.iter().map(|r| r.item)).collect();
        items.sort_unstable();
        items.dedup();

        let dense = |raw: u32| items.binary_search(&raw).unwrap_or_default() as u32;

        let mut offsets = Vec::with_capacity(users.len() + 1);
        let mut train_items = Vec::new();
        let mut test_items = Vec::with_capacity(users.len());
        offsets.push(0);

        for group in &users {
            let (test, train) = group.split_last().ok_or(PipelineErr::EmptyDataset)?;
            let start = train_items.len();
            train_items.extend(train.iter().map(|r| dense(r.item)));
            train_items[start..].sort_unstable();

            offsets.push(train_items.len() as u32);
            test_items.push(dense(test.item));
        }

        log::info!(
            users = users.len(),
            items = items.len(),
            train_positives = train_items.len();
            "ratings preprocessed"
        );

        Ok(Self {
            num_items: items.len(),
            offsets,
            train_items,
            test_items,
        })
    }

    /// Loads the index from the cache named by `cache_id`, building and caching it when the
    /// cache doesn't exist yet.
    pub fn load_or_build(
        dataset: Dataset,
        data_dir: &Path,
        cache_id: u64,
        download_if_missing: bool,
    ) -> Result<Self> {
        let cache = cache_path(dataset, data_dir, cache_id);
        if cache.is_file() {
            match Self::load(&cache) {
                Ok(index) => {
                    log::info!("using preprocessing cache {}", cache.display());
                    return Ok(index);
                }
                Err(e) => log::warn!("ignoring unreadable cache {}: {e}", cache.display()),
            }
        }

        let path = dataset.verify(data_dir, download_if_missing)?;
        let index = Self::build(dataset.read_ratings(&path)?)?;
        index.save(&cache)?;

        Ok(index)
    }

    pub fn num_users(&self) -> usize {
        self.test_items.len()
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn num_train_positives(&self) -> usize {
        self.train_items.len()
    }

    /// The user's training positives, sorted.
    pub fn train_positives(&self, user: usize) -> &[u32] {
        let start = self.offsets[user] as usize;
        let end = self.offsets[user + 1] as usize;
        &self.train_items[start..end]
    }

    pub fn test_positive(&self, user: usize) -> u32 {
        self.test_items[user]
    }

    /// Whether the user rated the item, in either split.
    pub fn is_positive(&self, user: usize, item: u32) -> bool {
        self.test_items[user] == item || self.train_positives(user).binary_search(&item).is_ok()
    }

    /// Every `(user, item)` training positive.
    pub fn iter_train(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.num_users())
            .flat_map(|u| self.train_positives(u).iter().map(move |&i| (u as u32, i)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let tensors = [
            (OFFSETS, FlatU32::new(&self.offsets)),
            (TRAIN_ITEMS, FlatU32::new(&self.train_items)),
            (TEST_ITEMS, FlatU32::new(&self.test_items)),
        ];

        let metadata = HashMap::from([(NUM_ITEMS.to_string(), self.num_items.to_string())]);

        safetensors::serialize_to_file(tensors, &Some(metadata), path)
            .map_err(|e| PipelineErr::Cache(format!("failed to write {}: {e:?}", path.display())))?;

        log::debug!("preprocessing cache written to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let invalid = |what: String| PipelineErr::Cache(format!("{}: {what}", path.display()));

        let (_, header) =
            SafeTensors::read_metadata(&bytes).map_err(|e| invalid(format!("{e:?}")))?;
        let tensors = SafeTensors::deserialize(&bytes).map_err(|e| invalid(format!("{e:?}")))?;

        let read = |name: &str| -> Result<Vec<u32>> {
            let view = tensors
                .tensor(name)
                .map_err(|_| invalid(format!("missing tensor {name}")))?;

            if view.dtype() != Dtype::U32 {
                return Err(invalid(format!("tensor {name} is not u32")));
            }

            Ok(bytemuck::pod_collect_to_vec(view.data()))
        };

        let num_items = header
            .metadata()
            .as_ref()
            .and_then(|m| m.get(NUM_ITEMS))
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| invalid(format!("missing {NUM_ITEMS}")))?;

        let index = Self {
            num_items,
            offsets: read(OFFSETS)?,
            train_items: read(TRAIN_ITEMS)?,
            test_items: read(TEST_ITEMS)?,
        };

        if index.offsets.len() != index.test_items.len() + 1
            || index.offsets.last().copied() != Some(index.train_items.len() as u32)
        {
            return Err(invalid("inconsistent user offsets".to_string()));
        }

        Ok(index)
    }
}

/// Where the preprocessed index of `dataset` is cached.
pub fn cache_path(dataset: Dataset, data_dir: &Path, cache_id: u64) -> PathBuf {
    dataset
        .dir(data_dir)
        .join(format!("cache_{cache_id}.safetensors"))
}

struct FlatU32<'a> {
    data: &'a [u32],
    shape: [usize; 1],
}

impl<'a> FlatU32<'a> {
    fn new(data: &'a [u32]) -> Self {
        Self {
            data,
            shape: [data.len()],
        }
    }
}

impl View for FlatU32<'_> {
    fn dtype(&self) -> Dtype {
        Dtype::U32
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(bytemuck::cast_slice(self.data))
    }

    fn data_len(&self) -> usize {
        std::mem::size_of_val(self.data)
    }
}
