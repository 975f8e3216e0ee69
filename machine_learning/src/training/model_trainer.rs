use ndarray::ArrayView1;
use rayon::prelude::*;

use super::BatchRef;
use crate::{
    MlErr, Result,
    arch::{Model, loss::LossFn},
    metrics::RankingAccumulator,
    optimization::Optimizer,
};

/// The outcome of a single optimization step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepStats {
    /// The mean loss across the step's replicas.
    pub loss: f32,
    /// The mean accuracy across replicas, if the loss tracks it.
    pub accuracy: Option<f32>,
    /// The amount of non padding examples consumed.
    pub examples: f32,
}

/// A model `ModelTrainer`. Contains the relevant components needed for training a model,
/// including the model itself and its parameters.
///
/// Each step consumes one batch per replica, the replicas' gradients are computed in
/// parallel and averaged before a single optimizer update.
pub struct ModelTrainer<M, O, L>
where
    M: Model,
    O: Optimizer,
    L: LossFn,
{
    model: M,
    optimizer: O,
    loss_fn: L,
    params: Vec<f32>,
    replica_grads: Vec<Vec<f32>>,
    global_step: u64,
}

impl<M, O, L> ModelTrainer<M, O, L>
where
    M: Model,
    O: Optimizer,
    L: LossFn,
{
    /// Returns a new `ModelTrainer`.
    ///
    /// # Arguments
    /// * `model` - The model that will be trained.
    /// * `optimizer` - The optimizer used on every step.
    /// * `loss_fn` - The loss function minimized by the optimizer.
    /// * `params` - The initial parameters of the model.
    ///
    /// # Returns
    /// The trainer or a `SizeMismatch` error if the parameters don't fit the model.
    pub fn new(model: M, optimizer: O, loss_fn: L, params: Vec<f32>) -> Result<Self> {
        if params.len() != model.size() {
            return Err(MlErr::SizeMismatch {
                what: "initial parameters",
                got: params.len(),
                expected: model.size(),
            });
        }

        Ok(Self {
            model,
            optimizer,
            loss_fn,
            params,
            replica_grads: Vec::new(),
            global_step: 0,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut O {
        &mut self.optimizer
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Replaces the parameters, used when restoring a checkpoint.
    pub fn set_params(&mut self, params: Vec<f32>) -> Result<()> {
        if params.len() != self.model.size() {
            return Err(MlErr::SizeMismatch {
                what: "restored parameters",
                got: params.len(),
                expected: self.model.size(),
            });
        }

        self.params = params;
        Ok(())
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn set_global_step(&mut self, global_step: u64) {
        self.global_step = global_step;
    }

    /// Runs one optimization step, one batch per replica.
    ///
    /// # Returns
    /// The step statistics or an error if any replica failed.
    pub fn step(&mut self, batches: &[BatchRef<'_>]) -> Result<StepStats> {
        if batches.is_empty() {
            return Err(MlErr::EmptyBatch);
        }

        let Self {
            model,
            optimizer,
            loss_fn,
            params,
            replica_grads,
            global_step,
        } = self;

        let size = model.size();
        replica_grads.resize_with(batches.len(), || vec![0.0; size]);

        let shared_model: &M = model;
        let shared_params: &[f32] = params;
        let shared_loss: &L = loss_fn;

        let replicas = replica_grads
            .par_iter_mut()
            .zip(batches)
            .map(|(grad, batch)| {
                grad.fill(0.0);

                let labels = ArrayView1::from(batch.labels);
                let weights = ArrayView1::from(batch.weights);

                let (logits, cache) =
                    shared_model.forward(shared_params, batch.users, batch.items)?;
                let loss = shared_loss.loss(logits.view(), labels, weights);
                let accuracy = shared_loss.accuracy(logits.view(), labels, weights);
                let d_logits = shared_loss.loss_prime(logits.view(), labels, weights);
                shared_model.backward(shared_params, cache, d_logits.view(), grad)?;

                Ok((loss, accuracy, batch.valid()))
            })
            .collect::<Result<Vec<_>>>()?;

        let (grad, rest) = replica_grads[..batches.len()]
            .split_first_mut()
            .ok_or(MlErr::EmptyBatch)?;

        for other in rest.iter() {
            grad.iter_mut().zip(other).for_each(|(g, o)| *g += o);
        }

        let n = batches.len() as f32;
        if batches.len() > 1 {
            grad.iter_mut().for_each(|g| *g /= n);
        }

        model.regularize(params, grad)?;
        optimizer.update_params(grad, params)?;
        *global_step += 1;

        let loss = replicas.iter().map(|(loss, _, _)| loss).sum::<f32>() / n;
        let accuracy = replicas
            .iter()
            .map(|(_, acc, _)| *acc)
            .sum::<Option<f32>>()
            .map(|acc| acc / n);
        let examples = replicas.iter().map(|(_, _, valid)| valid).sum();

        Ok(StepStats {
            loss,
            accuracy,
            examples,
        })
    }

    /// Scores evaluation batches, each made of whole groups of `group_size` candidates with
    /// the positive last, and accumulates the ranking metrics and loss.
    ///
    /// Groups whose positive is padding are skipped.
    pub fn evaluate(
        &self,
        batches: &[BatchRef<'_>],
        group_size: usize,
        acc: &mut RankingAccumulator,
    ) -> Result<()> {
        if group_size == 0 {
            return Err(MlErr::SizeMismatch {
                what: "evaluation group size",
                got: 0,
                expected: 1,
            });
        }

        let Self {
            model,
            params,
            loss_fn,
            ..
        } = self;

        let partials = batches
            .par_iter()
            .map(|batch| {
                if batch.len() % group_size != 0 {
                    return Err(MlErr::SizeMismatch {
                        what: "evaluation batch",
                        got: batch.len(),
                        expected: batch.len().next_multiple_of(group_size),
                    });
                }

                let logits = model.logits(params, batch.users, batch.items)?;
                let labels = ArrayView1::from(batch.labels);
                let weights = ArrayView1::from(batch.weights);

                let mut partial = RankingAccumulator::new();
                let valid = batch.valid();
                partial.add_loss(loss_fn.loss(logits.view(), labels, weights), valid);

                let scores = logits.as_slice().ok_or(MlErr::SizeMismatch {
                    what: "contiguous logits",
                    got: 0,
                    expected: logits.len(),
                })?;

                for (start, group) in (0..batch.len())
                    .step_by(group_size)
                    .zip(scores.chunks(group_size))
                {
                    let end = start + group_size;
                    if batch.weights[end - 1] <= 0.0 {
                        continue;
                    }

                    let excluded = batch.duplicates.map(|d| &d[start..end]).unwrap_or(&[]);
                    partial.add_group(group, excluded);
                }

                Ok(partial)
            })
            .collect::<Result<Vec<_>>>()?;

        for partial in &partials {
            acc.merge(partial);
        }

        Ok(())
    }
}
