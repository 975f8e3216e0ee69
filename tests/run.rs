use std::{
    fs,
    path::Path,
    sync::{
        Arc, Once,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, ThreadId},
};

use clap::Parser;
use data_pipeline::{Batch, BatchSource, Dataset, PipelineErr, Producer, producer::SliceSource};
use ncf::{
    NcfArgs, NcfError, Settings,
    estimator::{CHECKPOINT_FILE, Estimator, EstimatorPair, EvalResult, TrainSummary},
    hooks::TrainHook,
    run_ncf, run_with,
    strategy::{CycleController, RunTraining},
};
use parking_lot::Mutex;

/// Compliance lines and producer stops, tagged with the thread that emitted them.
static EVENTS: Mutex<Vec<(ThreadId, String)>> = Mutex::new(Vec::new());

struct ComplianceLog;

impl log::Log for ComplianceLog {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.target() == "mlperf"
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            record_event(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

fn record_event(event: String) {
    EVENTS.lock().push((thread::current().id(), event));
}

/// The events this thread recorded, keeping only their last word before any value.
fn thread_events() -> Vec<String> {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        log::set_logger(&ComplianceLog).unwrap();
        log::set_max_level(log::LevelFilter::Info);
    });

    let id = thread::current().id();
    EVENTS
        .lock()
        .iter()
        .filter(|(thread, _)| *thread == id)
        .map(|(_, event)| {
            let head = event.split(": ").next().unwrap_or_default();
            head.rsplit(' ').next().unwrap_or_default().to_string()
        })
        .collect()
}

fn settings(flags: &[&str]) -> Settings {
    let args = NcfArgs::parse_from(std::iter::once("ncf").chain(flags.iter().copied()));
    Settings::assemble(&args).unwrap()
}

#[derive(Default)]
struct Calls {
    start: AtomicUsize,
    stop: AtomicUsize,
    join: AtomicUsize,
}

/// A producer that only counts its lifecycle calls.
struct CountingProducer {
    calls: Arc<Calls>,
    train_batches: usize,
    batches: Vec<Arc<Batch>>,
    fails: bool,
}

impl CountingProducer {
    fn new(calls: &Arc<Calls>, train_batches: usize) -> Box<dyn Producer> {
        Box::new(Self {
            calls: Arc::clone(calls),
            train_batches,
            batches: Vec::new(),
            fails: false,
        })
    }

    /// A producer whose generation failed, surfacing on `join`.
    fn failing(calls: &Arc<Calls>) -> Box<dyn Producer> {
        Box::new(Self {
            calls: Arc::clone(calls),
            train_batches: 4,
            batches: Vec::new(),
            fails: true,
        })
    }
}

impl Producer for CountingProducer {
    fn num_users(&self) -> usize {
        10
    }

    fn num_items(&self) -> usize {
        20
    }

    fn train_batches_per_epoch(&self) -> usize {
        self.train_batches
    }

    fn eval_batches_per_epoch(&self) -> usize {
        2
    }

    fn start(&mut self) -> data_pipeline::Result<()> {
        self.calls.start.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn train_input(&mut self) -> data_pipeline::Result<Box<dyn BatchSource + '_>> {
        Ok(Box::new(SliceSource::new(&self.batches)))
    }

    fn eval_input(&mut self) -> data_pipeline::Result<Box<dyn BatchSource + '_>> {
        Ok(Box::new(SliceSource::new(&self.batches)))
    }

    fn stop_loop(&mut self) {
        self.calls.stop.fetch_add(1, Ordering::SeqCst);
        record_event("stop_loop".to_string());
    }

    fn join(&mut self) -> data_pipeline::Result<()> {
        self.calls.join.fetch_add(1, Ordering::SeqCst);
        if self.fails {
            return Err(PipelineErr::Cache("corrupt epoch".into()));
        }

        Ok(())
    }
}

/// Reports a hit rate of 1 on `hit_on` and 0 before, failing training on `fail_on`.
struct ScriptedEstimator {
    cycle: usize,
    hit_on: Option<usize>,
    fail_on: Option<usize>,
}

impl Estimator for ScriptedEstimator {
    fn train(
        &mut self,
        steps: usize,
        _input: &mut dyn BatchSource,
        _hooks: &mut [Box<dyn TrainHook>],
    ) -> ncf::Result<TrainSummary> {
        self.cycle += 1;
        if self.fail_on == Some(self.cycle) {
            return Err(NcfError::InputExhausted { step: 0, steps });
        }

        Ok(TrainSummary {
            steps,
            ..Default::default()
        })
    }

    fn evaluate(&mut self, _steps: usize, _input: &mut dyn BatchSource) -> ncf::Result<EvalResult> {
        let hit = self.hit_on == Some(self.cycle);
        Ok(EvalResult {
            hit_rate: if hit { 1.0 } else { 0.0 },
            global_step: self.cycle as u64,
            ..Default::default()
        })
    }
}

fn scripted(
    hit_on: Option<usize>,
    fail_on: Option<usize>,
) -> impl FnOnce(&Settings, usize, usize) -> ncf::Result<Box<dyn RunTraining>> {
    move |_: &Settings, _: usize, _: usize| {
        let estimator = ScriptedEstimator {
            cycle: 0,
            hit_on,
            fail_on,
        };
        let strategy: Box<dyn RunTraining> =
            Box::new(CycleController::new(EstimatorPair::Shared(Box::new(estimator))));
        Ok(strategy)
    }
}

fn assert_stopped_once(calls: &Calls) {
    assert_eq!(calls.start.load(Ordering::SeqCst), 1);
    assert_eq!(calls.stop.load(Ordering::SeqCst), 1);
    assert_eq!(calls.join.load(Ordering::SeqCst), 1);
}

#[test]
fn run_stops_on_the_cycle_reaching_the_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().to_str().unwrap();

    for k in 1..=4 {
        let settings = settings(&[
            "--model_dir",
            model_dir,
            "--train_epochs",
            "6",
            "--hr_threshold",
            "0.9",
        ]);
        let calls = Arc::new(Calls::default());

        let outcome = run_with(&settings, CountingProducer::new(&calls, 4), scripted(Some(k), None))
            .unwrap();

        assert_eq!(outcome.cycles, k);
        assert!(outcome.target_reached);
        assert_eq!(outcome.last_eval.unwrap().global_step, k as u64);
        assert_stopped_once(&calls);
    }
}

#[test]
fn run_goes_through_every_cycle_without_reaching_the_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&[
        "--model_dir",
        dir.path().to_str().unwrap(),
        "--train_epochs",
        "6",
        "--epochs_between_evals",
        "2",
        "--hr_threshold",
        "0.9",
    ]);
    let calls = Arc::new(Calls::default());

    let outcome =
        run_with(&settings, CountingProducer::new(&calls, 4), scripted(None, None)).unwrap();

    assert_eq!(outcome.cycles, 3);
    assert!(!outcome.target_reached);
    assert_stopped_once(&calls);
}

#[test]
fn intervals_longer_than_the_run_train_no_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&[
        "--model_dir",
        dir.path().to_str().unwrap(),
        "--train_epochs",
        "1",
        "--epochs_between_evals",
        "2",
    ]);
    let calls = Arc::new(Calls::default());

    let outcome =
        run_with(&settings, CountingProducer::new(&calls, 4), scripted(None, None)).unwrap();

    assert_eq!(outcome.cycles, 0);
    assert!(outcome.last_eval.is_none());
    assert_stopped_once(&calls);
}

#[test]
fn failed_training_still_stops_the_producer_once() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&["--model_dir", dir.path().to_str().unwrap(), "--train_epochs", "4"]);
    let calls = Arc::new(Calls::default());

    let result = run_with(&settings, CountingProducer::new(&calls, 4), scripted(None, Some(2)));

    assert!(matches!(result, Err(NcfError::InputExhausted { .. })));
    assert_stopped_once(&calls);
}

#[test]
fn producer_failures_take_precedence_over_the_dry_input() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&["--model_dir", dir.path().to_str().unwrap(), "--train_epochs", "4"]);
    let calls = Arc::new(Calls::default());

    let result = run_with(&settings, CountingProducer::failing(&calls), scripted(None, Some(1)));

    assert!(matches!(result, Err(NcfError::Pipeline(PipelineErr::Cache(_)))));
    assert_stopped_once(&calls);
}

#[test]
fn run_stop_is_logged_before_the_producer_stops() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&[
        "--model_dir",
        dir.path().to_str().unwrap(),
        "--train_epochs",
        "1",
        "--output_ml_perf_compliance_logging",
    ]);
    let calls = Arc::new(Calls::default());
    thread_events();

    run_with(&settings, CountingProducer::new(&calls, 4), scripted(None, None)).unwrap();

    let events = thread_events();
    let position = |name: &str| events.iter().position(|e| e == name).unwrap();
    assert_eq!(events.first().map(String::as_str), Some("train_loop"));
    assert!(position("eval_stop") < position("run_stop"));
    assert!(position("run_stop") < position("stop_loop"));
    assert_eq!(events.last().map(String::as_str), Some("run_final"));
}

#[test]
fn failed_estimator_construction_still_stops_the_producer_once() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&["--model_dir", dir.path().to_str().unwrap()]);
    let calls = Arc::new(Calls::default());

    let result = run_with(&settings, CountingProducer::new(&calls, 4), |_, _, _| {
        Err(NcfError::InvalidConfig("no estimator".into()))
    });

    assert!(matches!(result, Err(NcfError::InvalidConfig(_))));
    assert_stopped_once(&calls);
}

#[test]
fn uneven_batches_fail_before_the_producer_starts() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&[
        "--model_dir",
        dir.path().to_str().unwrap(),
        "--num_gpus",
        "2",
    ]);
    let calls = Arc::new(Calls::default());

    let result = run_with(&settings, CountingProducer::new(&calls, 3), scripted(None, None));

    assert!(matches!(
        result,
        Err(NcfError::UnevenBatches {
            batches: 3,
            batches_per_step: 2,
            ..
        })
    ));
    assert_eq!(calls.start.load(Ordering::SeqCst), 0);
    assert_eq!(calls.stop.load(Ordering::SeqCst), 0);
}

/// Writes an ml-1m style ratings file of 4 users with 20 to 23 ratings over 30 items.
fn write_ratings(data_dir: &Path) {
    let dir = Dataset::Ml1m.dir(data_dir);
    fs::create_dir_all(&dir).unwrap();

    let mut lines = String::new();
    for user in 1..=4u32 {
        for k in 0..(19 + user) {
            let item = 1 + (k + 7 * user) % 30;
            lines.push_str(&format!("{user}::{item}::3::{}\n", 500 + k));
        }
    }

    fs::write(dir.join("ratings.dat"), lines).unwrap();
}

fn tiny_run_flags<'a>(data_dir: &'a str, model_dir: &'a str) -> Vec<&'a str> {
    vec![
        "--data_dir",
        data_dir,
        "--model_dir",
        model_dir,
        "--train_epochs",
        "2",
        "--batch_size",
        "16",
        "--eval_batch_size",
        "1000",
        "--num_factors",
        "4",
        "--layers",
        "8,4",
        "--mlp_regularization",
        "0,0",
        "--num_neg",
        "2",
        "--seed",
        "11",
        "--cache_id",
        "5",
        "--hooks",
        "LoggingTensorHook,ExamplesPerSecondHook",
    ]
}

#[test]
fn full_run_over_a_tiny_dataset() {
    for subprocess in ["--use_subprocess=true", "--use_subprocess=false"] {
        let data = tempfile::tempdir().unwrap();
        let model = tempfile::tempdir().unwrap();
        write_ratings(data.path());

        let mut flags = tiny_run_flags(data.path().to_str().unwrap(), model.path().to_str().unwrap());
        flags.push(subprocess);
        let outcome = run_ncf(&settings(&flags)).unwrap();

        assert_eq!(outcome.cycles, 2);
        assert!(!outcome.target_reached);

        let last = outcome.last_eval.unwrap();
        assert!((0.0..=1.0).contains(&last.hit_rate));
        assert!(last.ndcg <= last.hit_rate);
        assert!(last.loss.is_finite());
        assert!(model.path().join(CHECKPOINT_FILE).is_file());
    }
}

#[test]
fn keras_run_fits_every_epoch() {
    let data = tempfile::tempdir().unwrap();
    let model = tempfile::tempdir().unwrap();
    write_ratings(data.path());

    let mut flags = tiny_run_flags(data.path().to_str().unwrap(), model.path().to_str().unwrap());
    flags.push("--use_keras");
    let outcome = run_ncf(&settings(&flags)).unwrap();

    assert_eq!(outcome.cycles, 0);
    assert_eq!(outcome.fit_history.len(), 2);
    for epoch in &outcome.fit_history {
        assert!(epoch.loss.is_finite());
        assert!(epoch.accuracy.is_some_and(|acc| (0.0..=1.0).contains(&acc)));
    }
}

#[test]
fn clean_removes_the_previous_checkpoint() {
    let data = tempfile::tempdir().unwrap();
    let model = tempfile::tempdir().unwrap();
    write_ratings(data.path());

    let stale = model.path().join("stale.txt");
    fs::write(&stale, "old run").unwrap();

    let mut flags = tiny_run_flags(data.path().to_str().unwrap(), model.path().to_str().unwrap());
    flags.push("--clean");
    run_ncf(&settings(&flags)).unwrap();

    assert!(!stale.exists());
    assert!(model.path().join(CHECKPOINT_FILE).is_file());
}
