//! Drives a whole run, from the producer's start to the final compliance lines.

use std::fs;

use data_pipeline::{Producer, instantiate_producer};
use serde_json::json;

use crate::{
    configs::Settings,
    error::Result,
    hooks::build_hooks,
    logs::{BenchmarkLogger, MlPerfLogger, RunParams, RunStatus, Tag},
    strategy::{RunContext, RunOutcome, RunTraining, StepPlan, select_strategy},
};

/// Owns the producer of a run, stopping and joining it exactly once whichever way the run
/// ends.
pub struct ProducerGuard {
    producer: Box<dyn Producer>,
    started: bool,
    finished: bool,
}

impl ProducerGuard {
    pub fn new(producer: Box<dyn Producer>) -> Self {
        Self {
            producer,
            started: false,
            finished: false,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.producer.start()?;
        self.started = true;
        Ok(())
    }

    pub fn producer(&mut self) -> &mut dyn Producer {
        self.producer.as_mut()
    }

    /// Stops and joins the producer, does nothing if it never started or already finished.
    pub fn finish(&mut self) -> Result<()> {
        if !self.started || self.finished {
            return Ok(());
        }

        self.finished = true;
        self.producer.stop_loop();
        self.producer.join()?;
        Ok(())
    }
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::warn!("failed to join the producer: {e}");
        }
    }
}

/// Cleans the model dir if asked to, builds the producer and runs the selected strategy.
pub fn run_ncf(settings: &Settings) -> Result<RunOutcome> {
    if settings.clean && settings.model_dir.exists() {
        log::info!("removing {}", settings.model_dir.display());
        fs::remove_dir_all(&settings.model_dir)?;
    }
    fs::create_dir_all(&settings.model_dir)?;

    let producer = instantiate_producer(&settings.pipeline_config())?;
    run_with(settings, producer, select_strategy)
}

/// Runs the strategy `build` returns over `producer`.
///
/// `build` gets the settings along with the user and item counts the producer reports.
pub fn run_with<F>(settings: &Settings, producer: Box<dyn Producer>, build: F) -> Result<RunOutcome>
where
    F: FnOnce(&Settings, usize, usize) -> Result<Box<dyn RunTraining>>,
{
    let mlperf = MlPerfLogger::new(settings.compliance_logging);
    let benchmark = BenchmarkLogger::from_settings(&settings.benchmark)?;

    let result = drive(settings, producer, build, &mlperf, &benchmark);

    let status = match result {
        Ok(_) => RunStatus::Success,
        Err(_) => RunStatus::Failure,
    };
    match benchmark.on_finish(status) {
        Err(e) if result.is_ok() => return Err(e),
        Err(e) => log::warn!("failed to finish the benchmark log: {e}"),
        Ok(()) => {}
    }

    result
}

fn drive<F>(
    settings: &Settings,
    producer: Box<dyn Producer>,
    build: F,
    mlperf: &MlPerfLogger,
    benchmark: &BenchmarkLogger,
) -> Result<RunOutcome>
where
    F: FnOnce(&Settings, usize, usize) -> Result<Box<dyn RunTraining>>,
{
    let num_users = producer.num_users();
    let num_items = producer.num_items();
    let plan = StepPlan::new(settings, producer.as_ref())?;

    let mut guard = ProducerGuard::new(producer);
    guard.start()?;

    let mut strategy = build(settings, num_users, num_items)?;

    let params = RunParams {
        batch_size: settings.batch_size,
        eval_batch_size: settings.eval_batch_size,
        number_factors: settings.mf_dim,
        hr_threshold: settings.hr_threshold,
        train_epochs: settings.train_epochs,
    };
    benchmark.log_run_info(
        "recommendation",
        settings.dataset.name(),
        &params,
        settings.benchmark.test_id.as_deref(),
    )?;

    let mut hooks = build_hooks(&settings.hooks, &settings.model_dir);

    log::info!(
        users = num_users,
        items = num_items,
        train_steps = plan.num_train_steps,
        eval_steps = plan.num_eval_steps,
        cycles = plan.total_training_cycle;
        "starting training"
    );
    mlperf.ncf_print(Tag::TrainLoop, None);

    let run = strategy.run(RunContext {
        settings,
        producer: guard.producer(),
        plan: &plan,
        mlperf,
        benchmark,
        hooks: &mut hooks,
    });

    let outcome = match run {
        Ok(outcome) => outcome,
        Err(e) => {
            // A failed producer shows up downstream as a dry input, report its own error.
            guard.finish()?;
            return Err(e);
        }
    };

    // The fit path ends without the closing compliance lines.
    if settings.use_keras {
        guard.finish()?;
        return Ok(outcome);
    }

    mlperf.ncf_print(
        Tag::RunStop,
        Some(json!({"success": outcome.target_reached})),
    );
    guard.finish()?;
    mlperf.ncf_print(Tag::RunFinal, None);

    Ok(outcome)
}
