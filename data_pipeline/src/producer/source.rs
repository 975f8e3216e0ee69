use std::{slice, sync::Arc};

use tokio::sync::mpsc;

use super::BatchSource;
use crate::{Batch, Result};

/// Hands out a fixed set of batches.
pub struct SliceSource<'a> {
    batches: slice::Iter<'a, Arc<Batch>>,
}

impl<'a> SliceSource<'a> {
    pub fn new(batches: &'a [Arc<Batch>]) -> Self {
        Self {
            batches: batches.iter(),
        }
    }
}

impl BatchSource for SliceSource<'_> {
    fn next_batch(&mut self) -> Result<Option<Arc<Batch>>> {
        Ok(self.batches.next().cloned())
    }
}

/// Receives the batches a background worker sends.
pub(super) struct QueueSource<'a> {
    rx: &'a mut mpsc::Receiver<Batch>,
}

impl<'a> QueueSource<'a> {
    pub(super) fn new(rx: &'a mut mpsc::Receiver<Batch>) -> Self {
        Self { rx }
    }
}

impl BatchSource for QueueSource<'_> {
    fn next_batch(&mut self) -> Result<Option<Arc<Batch>>> {
        Ok(self.rx.blocking_recv().map(Arc::new))
    }
}
