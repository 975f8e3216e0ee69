//! Records a run's parameters and evaluation results.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    configs::{BenchmarkLoggerType, BenchmarkSettings},
    error::{NcfError, Result},
    estimator::EvalResult,
};

const RUN_LOG_FILE: &str = "benchmark_run.log";
const METRIC_LOG_FILE: &str = "metric.log";

/// The parameters a run is benchmarked with.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunParams {
    pub batch_size: usize,
    pub eval_batch_size: usize,
    pub number_factors: usize,
    pub hr_threshold: Option<f32>,
    pub train_epochs: usize,
}

#[derive(Serialize)]
struct RunInfo<'a> {
    model_name: &'a str,
    dataset: &'a str,
    test_id: Option<&'a str>,
    run_date: u64,
    cpu_core_count: usize,
    run_parameters: &'a RunParams,
}

#[derive(Serialize)]
struct Metric<'a> {
    name: &'a str,
    value: f64,
    global_step: u64,
    timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

pub enum BenchmarkLogger {
    /// Writes through the `log` facade.
    Base,
    /// Writes json lines into a directory.
    File {
        dir: PathBuf,
        metrics: Mutex<BufWriter<File>>,
    },
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl BenchmarkLogger {
    pub fn from_settings(settings: &BenchmarkSettings) -> Result<Self> {
        match settings.logger_type {
            BenchmarkLoggerType::Base => Ok(Self::Base),
            BenchmarkLoggerType::File => {
                let dir = settings.log_dir.as_deref().ok_or_else(|| {
                    NcfError::InvalidConfig(
                        "BenchmarkFileLogger requires --benchmark_log_dir".into(),
                    )
                })?;
                Self::file(dir)
            }
        }
    }

    /// A logger appending to the files under `dir`.
    pub fn file(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let metrics = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(METRIC_LOG_FILE))?;

        Ok(Self::File {
            dir: dir.to_path_buf(),
            metrics: Mutex::new(BufWriter::new(metrics)),
        })
    }

    pub fn log_run_info(
        &self,
        model_name: &str,
        dataset: &str,
        run_parameters: &RunParams,
        test_id: Option<&str>,
    ) -> Result<()> {
        let info = RunInfo {
            model_name,
            dataset,
            test_id,
            run_date: unix_now(),
            cpu_core_count: thread::available_parallelism().map_or(1, |n| n.get()),
            run_parameters,
        };

        match self {
            Self::Base => log::info!("Benchmark run: {}", serde_json::to_string(&info)?),
            Self::File { dir, .. } => {
                fs::write(dir.join(RUN_LOG_FILE), serde_json::to_vec(&info)?)?;
            }
        }

        Ok(())
    }

    pub fn log_metric(&self, name: &str, value: f64, global_step: u64) -> Result<()> {
        let metric = Metric {
            name,
            value,
            global_step,
            timestamp: unix_now(),
        };

        match self {
            Self::Base => log::info!("Benchmark metric: {}", serde_json::to_string(&metric)?),
            Self::File { metrics, .. } => {
                let mut writer = metrics.lock();
                serde_json::to_writer(&mut *writer, &metric)?;
                writer.write_all(b"\n")?;
            }
        }

        Ok(())
    }

    /// Logs every metric of an evaluation at its global step.
    pub fn log_evaluation_result(&self, result: &EvalResult) -> Result<()> {
        let metrics = [
            ("HR", result.hit_rate),
            ("NDCG", result.ndcg),
            ("loss", result.loss),
        ];

        for (name, value) in metrics {
            self.log_metric(name, value as f64, result.global_step)?;
        }

        Ok(())
    }

    pub fn on_finish(&self, status: RunStatus) -> Result<()> {
        match self {
            Self::Base => log::info!("Benchmark run finished: {status:?}"),
            Self::File { metrics, .. } => metrics.lock().flush()?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RunParams {
        RunParams {
            batch_size: 256,
            eval_batch_size: 1000,
            number_factors: 8,
            hr_threshold: Some(0.635),
            train_epochs: 2,
        }
    }

    #[test]
    fn file_logger_writes_run_info_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let logger = BenchmarkLogger::file(dir.path()).unwrap();

        logger
            .log_run_info("recommendation", "ml-1m", &params(), Some("t1"))
            .unwrap();
        logger
            .log_evaluation_result(&EvalResult {
                hit_rate: 0.5,
                ndcg: 0.25,
                loss: 0.125,
                global_step: 7,
            })
            .unwrap();
        logger.on_finish(RunStatus::Success).unwrap();

        let info: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join(RUN_LOG_FILE)).unwrap()).unwrap();
        assert_eq!(info["model_name"], "recommendation");
        assert_eq!(info["run_parameters"]["number_factors"], 8);

        let metrics = fs::read_to_string(dir.path().join(METRIC_LOG_FILE)).unwrap();
        let lines: Vec<serde_json::Value> = metrics
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["name"], "HR");
        assert_eq!(lines[2]["global_step"], 7);
    }

    #[test]
    fn file_logger_needs_a_directory() {
        let settings = BenchmarkSettings {
            logger_type: BenchmarkLoggerType::File,
            log_dir: None,
            test_id: None,
        };

        assert!(matches!(
            BenchmarkLogger::from_settings(&settings),
            Err(NcfError::InvalidConfig(_))
        ));
    }
}
