use std::{collections::VecDeque, sync::Arc};

use super::{BatchSource, Producer, SliceSource};
use crate::{
    Batch, PipelineErr, Result, batch,
    generator::{BatchGenerator, epoch_batches},
};

/// Generates each epoch on the consumer's thread, when its first batch is asked for.
pub struct InlineProducer<G: BatchGenerator> {
    generator: G,
    epochs: usize,
    hash: bool,
    started: bool,
    stopped: bool,
    next_epoch: usize,
    pending: VecDeque<Batch>,
    eval: Vec<Arc<Batch>>,
}

impl<G: BatchGenerator> InlineProducer<G> {
    pub fn new(generator: G, epochs: usize, hash: bool) -> Self {
        Self {
            generator,
            epochs,
            hash,
            started: false,
            stopped: false,
            next_epoch: 0,
            pending: VecDeque::new(),
            eval: Vec::new(),
        }
    }
}

struct InlineSource<'a, G: BatchGenerator> {
    producer: &'a mut InlineProducer<G>,
}

impl<G: BatchGenerator> BatchSource for InlineSource<'_, G> {
    fn next_batch(&mut self) -> Result<Option<Arc<Batch>>> {
        let p = &mut *self.producer;
        loop {
            if let Some(batch) = p.pending.pop_front() {
                return Ok(Some(Arc::new(batch)));
            }

            if p.stopped || p.next_epoch >= p.epochs {
                return Ok(None);
            }

            p.pending = epoch_batches(&mut p.generator, p.next_epoch, p.hash)?.into();
            p.next_epoch += 1;
        }
    }
}

impl<G: BatchGenerator> Producer for InlineProducer<G> {
    fn num_users(&self) -> usize {
        self.generator.num_users()
    }

    fn num_items(&self) -> usize {
        self.generator.num_items()
    }

    fn train_batches_per_epoch(&self) -> usize {
        self.generator.train_batches_per_epoch()
    }

    fn eval_batches_per_epoch(&self) -> usize {
        self.generator.eval_batches_per_epoch()
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(PipelineErr::AlreadyStarted);
        }

        let eval = self.generator.eval_batches()?;
        if self.hash {
            log::info!("evaluation data hash {}", batch::digest(&eval));
        }

        self.eval = eval.into_iter().map(Arc::new).collect();
        self.started = true;
        log::info!(epochs = self.epochs; "inline producer started");
        Ok(())
    }

    fn train_input(&mut self) -> Result<Box<dyn BatchSource + '_>> {
        if !self.started {
            return Err(PipelineErr::NotStarted);
        }

        Ok(Box::new(InlineSource { producer: self }))
    }

    fn eval_input(&mut self) -> Result<Box<dyn BatchSource + '_>> {
        if !self.started {
            return Err(PipelineErr::NotStarted);
        }

        Ok(Box::new(SliceSource::new(&self.eval)))
    }

    fn stop_loop(&mut self) {
        self.stopped = true;
        self.pending.clear();
    }

    fn join(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::testing::CountingGenerator;

    #[test]
    fn epochs_are_generated_lazily_and_in_order() {
        let generator = CountingGenerator {
            batches: 2,
            panic_on_epoch: None,
        };
        let mut producer = InlineProducer::new(generator, 2, true);
        assert!(matches!(producer.train_input().err(), Some(PipelineErr::NotStarted)));

        producer.start().unwrap();
        let mut input = producer.train_input().unwrap();

        let mut seen = Vec::new();
        while let Some(batch) = input.next_batch().unwrap() {
            seen.push((batch.users[0], batch.items[0]));
        }
        drop(input);

        assert_eq!(seen, [(0, 0), (0, 1), (1, 0), (1, 1)]);
        producer.stop_loop();
        producer.join().unwrap();
    }

    #[test]
    fn stopped_producers_run_dry() {
        let generator = CountingGenerator {
            batches: 5,
            panic_on_epoch: None,
        };
        let mut producer = InlineProducer::new(generator, 4, false);
        producer.start().unwrap();

        assert!(producer.train_input().unwrap().next_batch().unwrap().is_some());
        producer.stop_loop();
        assert!(producer.train_input().unwrap().next_batch().unwrap().is_none());
    }
}
