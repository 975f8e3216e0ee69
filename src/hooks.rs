//! Observers run after every training step.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::error::{NcfError, Result};

/// Steps between two lines of the logging hooks.
pub const LOG_EVERY_N_STEPS: u64 = 100;

/// Steps between two traces written by the profiler.
pub const PROFILER_SAVE_STEPS: u64 = 1000;

/// What a hook gets to see of a finished step.
#[derive(Debug, Clone, Copy)]
pub struct StepContext {
    pub global_step: u64,
    pub loss: f32,
    pub accuracy: Option<f32>,
    /// Non padding examples consumed by the step.
    pub examples: usize,
    pub elapsed: Duration,
}

pub trait TrainHook: Send {
    /// Called when a `train` call begins.
    fn begin(&mut self, _global_step: u64) -> Result<()> {
        Ok(())
    }

    fn after_step(&mut self, ctx: &StepContext) -> Result<()>;

    /// Called when a `train` call ends.
    fn end(&mut self, _global_step: u64) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    LoggingTensor,
    ExamplesPerSecond,
    Profiler,
}

impl FromStr for HookKind {
    type Err = NcfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "loggingtensorhook" => Ok(Self::LoggingTensor),
            "examplespersecondhook" => Ok(Self::ExamplesPerSecond),
            "profilerhook" => Ok(Self::Profiler),
            _ => Err(NcfError::InvalidConfig(format!("unrecognized training hook {s}"))),
        }
    }
}

/// Builds the requested hooks, the profiler writes its traces into `model_dir`.
pub fn build_hooks(kinds: &[HookKind], model_dir: &Path) -> Vec<Box<dyn TrainHook>> {
    kinds
        .iter()
        .map(|kind| -> Box<dyn TrainHook> {
            match kind {
                HookKind::LoggingTensor => Box::new(LoggingTensorHook::new(LOG_EVERY_N_STEPS)),
                HookKind::ExamplesPerSecond => {
                    Box::new(ExamplesPerSecondHook::new(LOG_EVERY_N_STEPS))
                }
                HookKind::Profiler => Box::new(ProfilerHook::new(model_dir, PROFILER_SAVE_STEPS)),
            }
        })
        .collect()
}

/// Logs the training cross entropy every `every_n` steps.
pub struct LoggingTensorHook {
    every_n: u64,
    seen: u64,
    logged: usize,
}

impl LoggingTensorHook {
    pub fn new(every_n: u64) -> Self {
        Self {
            every_n: every_n.max(1),
            seen: 0,
            logged: 0,
        }
    }

    pub fn logged(&self) -> usize {
        self.logged
    }
}

impl TrainHook for LoggingTensorHook {
    fn after_step(&mut self, ctx: &StepContext) -> Result<()> {
        if self.seen % self.every_n == 0 {
            match ctx.accuracy {
                Some(accuracy) => log::info!(
                    global_step = ctx.global_step;
                    "cross_entropy = {:.6}, accuracy = {accuracy:.4}",
                    ctx.loss
                ),
                None => log::info!(global_step = ctx.global_step; "cross_entropy = {:.6}", ctx.loss),
            }
            self.logged += 1;
        }

        self.seen += 1;
        Ok(())
    }
}

/// Logs the training throughput every `every_n` steps.
pub struct ExamplesPerSecondHook {
    every_n: u64,
    window_steps: u64,
    window_examples: usize,
    window_time: Duration,
    total_examples: usize,
    total_time: Duration,
}

impl ExamplesPerSecondHook {
    pub fn new(every_n: u64) -> Self {
        Self {
            every_n: every_n.max(1),
            window_steps: 0,
            window_examples: 0,
            window_time: Duration::ZERO,
            total_examples: 0,
            total_time: Duration::ZERO,
        }
    }

    /// The throughput across every step seen so far.
    pub fn average_examples_per_sec(&self) -> f64 {
        rate(self.total_examples, self.total_time)
    }
}

fn rate(examples: usize, time: Duration) -> f64 {
    let secs = time.as_secs_f64();
    if secs > 0.0 {
        examples as f64 / secs
    } else {
        0.0
    }
}

impl TrainHook for ExamplesPerSecondHook {
    fn after_step(&mut self, ctx: &StepContext) -> Result<()> {
        self.window_steps += 1;
        self.window_examples += ctx.examples;
        self.window_time += ctx.elapsed;
        self.total_examples += ctx.examples;
        self.total_time += ctx.elapsed;

        if self.window_steps == self.every_n {
            log::info!(
                global_step = ctx.global_step;
                "last_examples_per_sec = {:.1}, average_examples_per_sec = {:.1}",
                rate(self.window_examples, self.window_time),
                self.average_examples_per_sec()
            );

            self.window_steps = 0;
            self.window_examples = 0;
            self.window_time = Duration::ZERO;
        }

        Ok(())
    }
}

/// A complete event of the chrome trace format.
#[derive(Debug, Clone, Serialize)]
struct TraceEvent {
    name: &'static str,
    ph: &'static str,
    ts: u128,
    dur: u128,
    pid: u32,
    tid: u32,
    args: TraceArgs,
}

#[derive(Debug, Clone, Serialize)]
struct TraceArgs {
    global_step: u64,
    examples: usize,
}

#[derive(Serialize)]
struct Trace<'a> {
    #[serde(rename = "traceEvents")]
    trace_events: &'a [TraceEvent],
}

/// Records every step's timing and dumps them as a trace every `save_steps` steps and when
/// training ends.
pub struct ProfilerHook {
    dir: PathBuf,
    save_steps: u64,
    origin: Instant,
    events: Vec<TraceEvent>,
}

impl ProfilerHook {
    pub fn new(dir: &Path, save_steps: u64) -> Self {
        Self {
            dir: dir.to_path_buf(),
            save_steps: save_steps.max(1),
            origin: Instant::now(),
            events: Vec::new(),
        }
    }

    fn save(&mut self, global_step: u64) -> Result<()> {
        if self.events.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("timeline-{global_step}.json"));
        let trace = Trace {
            trace_events: &self.events,
        };
        fs::write(&path, serde_json::to_vec(&trace)?)?;

        log::debug!("profile trace written to {}", path.display());
        self.events.clear();
        Ok(())
    }
}

impl TrainHook for ProfilerHook {
    fn after_step(&mut self, ctx: &StepContext) -> Result<()> {
        let end = self.origin.elapsed();
        self.events.push(TraceEvent {
            name: "train_step",
            ph: "X",
            ts: end.saturating_sub(ctx.elapsed).as_micros(),
            dur: ctx.elapsed.as_micros(),
            pid: 0,
            tid: 0,
            args: TraceArgs {
                global_step: ctx.global_step,
                examples: ctx.examples,
            },
        });

        if ctx.global_step % self.save_steps == 0 {
            self.save(ctx.global_step)?;
        }

        Ok(())
    }

    fn end(&mut self, global_step: u64) -> Result<()> {
        self.save(global_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(global_step: u64) -> StepContext {
        StepContext {
            global_step,
            loss: 0.5,
            accuracy: None,
            examples: 10,
            elapsed: Duration::from_millis(2),
        }
    }

    #[test]
    fn logging_hook_logs_every_n_steps() {
        let mut hook = LoggingTensorHook::new(100);
        for step in 1..=250 {
            hook.after_step(&ctx(step)).unwrap();
        }

        assert_eq!(hook.logged(), 3);
    }

    #[test]
    fn throughput_counts_examples_over_time() {
        let mut hook = ExamplesPerSecondHook::new(2);
        for step in 1..=4 {
            hook.after_step(&ctx(step)).unwrap();
        }

        // 40 examples in 8ms.
        assert!((hook.average_examples_per_sec() - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn profiler_writes_traces_periodically_and_at_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut hook = ProfilerHook::new(dir.path(), 2);

        hook.begin(0).unwrap();
        for step in 1..=3 {
            hook.after_step(&ctx(step)).unwrap();
        }
        hook.end(3).unwrap();

        let trace: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join("timeline-2.json")).unwrap())
                .unwrap();
        assert_eq!(trace["traceEvents"].as_array().unwrap().len(), 2);
        assert_eq!(trace["traceEvents"][1]["args"]["global_step"], 2);

        assert!(dir.path().join("timeline-3.json").exists());
    }

    #[test]
    fn hook_names_are_case_insensitive() {
        assert_eq!("PROFILERHOOK".parse::<HookKind>().unwrap(), HookKind::Profiler);
        assert!("TimerHook".parse::<HookKind>().is_err());
        assert_eq!(build_hooks(&[HookKind::Profiler], Path::new(".")).len(), 1);
    }
}
