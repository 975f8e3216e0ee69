use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{BatchSource, Producer, SliceSource, source::QueueSource};
use crate::{
    Batch, PipelineErr, Result, batch,
    constants::PREFETCH_BATCHES,
    generator::{BatchGenerator, epoch_batches},
};

/// Runs a generator on its own thread, feeding training batches through a bounded queue.
///
/// Evaluation batches are generated once, when the producer starts.
pub struct BackgroundProducer<G: BatchGenerator> {
    generator: Option<G>,
    num_users: usize,
    num_items: usize,
    train_batches: usize,
    eval_batches: usize,
    epochs: usize,
    hash: bool,
    capacity: usize,
    eval: Vec<Arc<Batch>>,
    rx: Option<mpsc::Receiver<Batch>>,
    token: CancellationToken,
    handle: Option<JoinHandle<Result<()>>>,
}

impl<G: BatchGenerator> BackgroundProducer<G> {
    /// Creates a new `BackgroundProducer`.
    ///
    /// # Arguments
    /// * `generator` - The generator moved into the worker thread on `start`.
    /// * `epochs` - The amount of training epochs to generate.
    /// * `hash` - Whether to log each epoch's digest.
    pub fn new(generator: G, epochs: usize, hash: bool) -> Self {
        Self {
            num_users: generator.num_users(),
            num_items: generator.num_items(),
            train_batches: generator.train_batches_per_epoch(),
            eval_batches: generator.eval_batches_per_epoch(),
            generator: Some(generator),
            epochs,
            hash,
            capacity: PREFETCH_BATCHES,
            eval: Vec::new(),
            rx: None,
            token: CancellationToken::new(),
            handle: None,
        }
    }

    /// Overrides how many batches may wait in the queue.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

fn produce<G: BatchGenerator>(
    mut generator: G,
    epochs: usize,
    hash: bool,
    tx: mpsc::Sender<Batch>,
    token: CancellationToken,
) -> Result<()> {
    for epoch in 0..epochs {
        if token.is_cancelled() {
            break;
        }

        for batch in epoch_batches(&mut generator, epoch, hash)? {
            if token.is_cancelled() || tx.blocking_send(batch).is_err() {
                log::debug!(epoch = epoch; "producer stopped before finishing");
                return Ok(());
            }
        }
    }

    log::debug!("producer generated every epoch");
    Ok(())
}

impl<G: BatchGenerator> Producer for BackgroundProducer<G> {
    fn num_users(&self) -> usize {
        self.num_users
    }

    fn num_items(&self) -> usize {
        self.num_items
    }

    fn train_batches_per_epoch(&self) -> usize {
        self.train_batches
    }

    fn eval_batches_per_epoch(&self) -> usize {
        self.eval_batches
    }

    fn start(&mut self) -> Result<()> {
        let mut generator = self.generator.take().ok_or(PipelineErr::AlreadyStarted)?;

        let eval = generator.eval_batches()?;
        if self.hash {
            log::info!("evaluation data hash {}", batch::digest(&eval));
        }
        self.eval = eval.into_iter().map(Arc::new).collect();

        let (tx, rx) = mpsc::channel(self.capacity);
        let token = self.token.clone();
        let (epochs, hash) = (self.epochs, self.hash);

        let handle = thread::Builder::new()
            .name("ncf-producer".to_string())
            .spawn(move || produce(generator, epochs, hash, tx, token))?;

        self.rx = Some(rx);
        self.handle = Some(handle);

        log::info!(
            epochs = self.epochs,
            train_batches = self.train_batches,
            eval_batches = self.eval_batches;
            "producer started"
        );
        Ok(())
    }

    fn train_input(&mut self) -> Result<Box<dyn BatchSource + '_>> {
        let rx = self.rx.as_mut().ok_or(PipelineErr::NotStarted)?;
        Ok(Box::new(QueueSource::new(rx)))
    }

    fn eval_input(&mut self) -> Result<Box<dyn BatchSource + '_>> {
        if self.rx.is_none() {
            return Err(PipelineErr::NotStarted);
        }

        Ok(Box::new(SliceSource::new(&self.eval)))
    }

    fn stop_loop(&mut self) {
        self.token.cancel();

        // Closing unblocks a worker waiting on a full queue.
        if let Some(rx) = self.rx.as_mut() {
            rx.close();
            while rx.try_recv().is_ok() {}
        }

        log::debug!("producer stop requested");
    }

    fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        let result = handle.join().map_err(|_| PipelineErr::WorkerPanicked)?;
        log::info!("producer joined");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::testing::CountingGenerator;

    fn drain(producer: &mut impl Producer) -> Vec<(u32, u32)> {
        let mut input = producer.train_input().unwrap();
        let mut seen = Vec::new();
        while let Some(batch) = input.next_batch().unwrap() {
            seen.push((batch.users[0], batch.items[0]));
        }
        seen
    }

    #[test]
    fn every_epoch_arrives_in_order() {
        let generator = CountingGenerator {
            batches: 3,
            panic_on_epoch: None,
        };
        let mut producer = BackgroundProducer::new(generator, 2, false).with_capacity(2);
        producer.start().unwrap();

        let seen = drain(&mut producer);
        assert_eq!(seen, [(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);

        producer.stop_loop();
        producer.join().unwrap();
    }

    #[test]
    fn stopping_a_blocked_worker_does_not_hang() {
        let generator = CountingGenerator {
            batches: 1000,
            panic_on_epoch: None,
        };
        let mut producer = BackgroundProducer::new(generator, 10, false).with_capacity(1);
        producer.start().unwrap();

        let first = producer.train_input().unwrap().next_batch().unwrap();
        assert!(first.is_some());

        producer.stop_loop();
        producer.join().unwrap();
    }

    #[test]
    fn inputs_require_a_started_producer() {
        let generator = CountingGenerator {
            batches: 1,
            panic_on_epoch: None,
        };
        let mut producer = BackgroundProducer::new(generator, 1, false);

        assert!(matches!(producer.train_input().err(), Some(PipelineErr::NotStarted)));
        assert!(matches!(producer.eval_input().err(), Some(PipelineErr::NotStarted)));

        producer.start().unwrap();
        assert!(matches!(producer.start(), Err(PipelineErr::AlreadyStarted)));

        let mut eval = producer.eval_input().unwrap();
        assert!(eval.next_batch().unwrap().is_some());
        assert!(eval.next_batch().unwrap().is_none());
        drop(eval);

        producer.stop_loop();
        producer.join().unwrap();
    }

    #[test]
    fn worker_panics_surface_on_join() {
        let generator = CountingGenerator {
            batches: 2,
            panic_on_epoch: Some(1),
        };
        let mut producer = BackgroundProducer::new(generator, 3, false);
        producer.start().unwrap();

        assert_eq!(drain(&mut producer).len(), 2);

        producer.stop_loop();
        assert!(matches!(producer.join(), Err(PipelineErr::WorkerPanicked)));
    }
}
