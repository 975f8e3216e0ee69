use std::{
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use data_pipeline::{Dataset, PipelineConfig, constants::NUM_EVAL_NEGATIVES};
use machine_learning::arch::NeuMfConfig;

use super::{BenchmarkLoggerType, NcfArgs};
use crate::{
    error::{NcfError, Result},
    hooks::HookKind,
};

/// The benchmark logger's options.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkSettings {
    pub logger_type: BenchmarkLoggerType,
    pub log_dir: Option<PathBuf>,
    pub test_id: Option<String>,
}

/// The validated settings of a run, built once out of the command line flags.
///
/// Batch sizes are per device, a step consumes `batches_per_step` of them.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub dataset: Dataset,
    pub data_dir: PathBuf,
    pub model_dir: PathBuf,
    pub clean: bool,
    pub download_if_missing: bool,
    pub use_synthetic_data: bool,
    pub use_subprocess: bool,
    pub cache_id: u64,

    pub train_epochs: usize,
    pub epochs_between_evals: usize,
    pub batch_size: usize,
    pub eval_batch_size: usize,

    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub mf_dim: usize,
    pub model_layers: Vec<usize>,
    pub mf_regularization: f32,
    pub mlp_reg_layers: Vec<f32>,
    pub num_neg: usize,

    pub num_gpus: usize,
    pub batches_per_step: usize,
    pub use_tpu: bool,
    pub tpu: Option<String>,
    pub tpu_zone: Option<String>,
    pub tpu_gcp_project: Option<String>,
    pub use_xla_for_gpu: bool,
    pub use_keras: bool,

    pub match_mlperf: bool,
    pub compliance_logging: bool,
    pub hr_threshold: Option<f32>,
    pub seed: Option<u64>,
    pub hash_pipeline: bool,
    pub hooks: Vec<HookKind>,
    pub benchmark: BenchmarkSettings,
}

/// Splits a global batch size among the replicas.
///
/// # Returns
/// The per device batch size, or an `InvalidConfig` error if it doesn't split evenly.
pub fn per_device_batch_size(batch_size: usize, num_gpus: usize) -> Result<usize> {
    if num_gpus <= 1 {
        return Ok(batch_size);
    }

    if batch_size % num_gpus != 0 {
        return Err(NcfError::InvalidConfig(format!(
            "batch size {batch_size} must be a multiple of the number of gpus {num_gpus}, \
             try {}",
            batch_size - batch_size % num_gpus
        )));
    }

    Ok(batch_size / num_gpus)
}

impl Settings {
    /// Turns the parsed flags into validated settings.
    ///
    /// # Errors
    /// Returns `InvalidConfig` when the flags are inconsistent, nothing is started before.
    pub fn assemble(args: &NcfArgs) -> Result<Self> {
        validate_flags(args)?;

        let num_devices = args.num_gpus.max(1);
        let batch_size = per_device_batch_size(
            args.batch_size.div_ceil(num_devices) * num_devices,
            args.num_gpus,
        )?;

        let eval_divisor = (NUM_EVAL_NEGATIVES + 1) * num_devices;
        let eval_batch_size = args
            .eval_batch_size
            .filter(|&e| e > 0)
            .unwrap_or(args.batch_size)
            .max(1);
        let eval_batch_size = per_device_batch_size(
            eval_batch_size.div_ceil(eval_divisor) * eval_divisor,
            args.num_gpus,
        )?;

        let hooks = args
            .hooks
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(|name| name.parse())
            .collect::<Result<Vec<HookKind>>>()?;

        let cache_id = match args.cache_id {
            Some(id) => id,
            None => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        };

        Ok(Self {
            dataset: args.dataset,
            data_dir: args.data_dir.clone(),
            model_dir: args.model_dir.clone(),
            clean: args.clean,
            download_if_missing: args.download_if_missing,
            use_synthetic_data: args.use_synthetic_data,
            use_subprocess: args.use_subprocess,
            cache_id,
            train_epochs: args.train_epochs,
            epochs_between_evals: args.epochs_between_evals,
            batch_size,
            eval_batch_size,
            learning_rate: args.learning_rate,
            beta1: args.beta1,
            beta2: args.beta2,
            epsilon: args.epsilon,
            mf_dim: args.num_factors,
            model_layers: args.layers.clone(),
            mf_regularization: args.mf_regularization,
            mlp_reg_layers: args.mlp_regularization.clone(),
            num_neg: args.num_neg,
            num_gpus: args.num_gpus,
            batches_per_step: num_devices,
            use_tpu: args.tpu.is_some(),
            tpu: args.tpu.clone(),
            tpu_zone: args.tpu_zone.clone(),
            tpu_gcp_project: args.tpu_gcp_project.clone(),
            use_xla_for_gpu: args.use_xla_for_gpu,
            use_keras: args.use_keras,
            match_mlperf: args.ml_perf,
            compliance_logging: args.output_ml_perf_compliance_logging,
            hr_threshold: args.hr_threshold,
            seed: args.seed,
            hash_pipeline: args.hash_pipeline,
            hooks,
            benchmark: BenchmarkSettings {
                logger_type: args.benchmark_logger_type,
                log_dir: args.benchmark_log_dir.clone(),
                test_id: args.benchmark_test_id.clone(),
            },
        })
    }

    /// Training cycles in the run, each one trains `epochs_between_evals` epochs.
    pub fn total_training_cycle(&self) -> usize {
        self.train_epochs / self.epochs_between_evals
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            dataset: self.dataset,
            data_dir: self.data_dir.clone(),
            cache_id: self.cache_id,
            download_if_missing: self.download_if_missing,
            use_synthetic_data: self.use_synthetic_data,
            use_subprocess: self.use_subprocess,
            num_neg: self.num_neg,
            batch_size: self.batch_size,
            eval_batch_size: self.eval_batch_size,
            batches_per_step: self.batches_per_step,
            train_epochs: self.train_epochs,
            seed: self.seed,
            hash_pipeline: self.hash_pipeline,
            match_mlperf: self.match_mlperf,
        }
    }

    /// The model's configuration once the dataset's size is known.
    pub fn model_config(&self, num_users: usize, num_items: usize) -> NeuMfConfig {
        NeuMfConfig {
            num_users,
            num_items,
            mf_dim: self.mf_dim,
            model_layers: self.model_layers.clone(),
            mf_regularization: self.mf_regularization,
            mlp_reg_layers: self.mlp_reg_layers.clone(),
        }
    }
}

fn validate_flags(args: &NcfArgs) -> Result<()> {
    if args.eval_batch_size.is_some_and(|e| e <= NUM_EVAL_NEGATIVES) {
        return Err(NcfError::InvalidConfig(format!(
            "eval_batch_size must be at least {}",
            NUM_EVAL_NEGATIVES + 1
        )));
    }

    if args.use_xla_for_gpu && args.tpu.is_some() {
        return Err(NcfError::InvalidConfig(
            "--use_xla_for_gpu is incompatible with --tpu".into(),
        ));
    }

    if args.batch_size == 0 {
        return Err(NcfError::InvalidConfig(
            "batch_size must be greater than 0".into(),
        ));
    }

    validate_model(args)?;
    validate_schedule(args)
}

fn validate_model(args: &NcfArgs) -> Result<()> {
    if args.layers.len() != args.mlp_regularization.len() {
        return Err(NcfError::InvalidConfig(format!(
            "--layers has {} sizes but --mlp_regularization has {} factors",
            args.layers.len(),
            args.mlp_regularization.len()
        )));
    }

    match args.layers.first() {
        None => Err(NcfError::InvalidConfig(
            "at least one MLP layer is required".into(),
        )),
        Some(first) if first % 2 != 0 => Err(NcfError::InvalidConfig(format!(
            "the first MLP layer ({first}) must be even, it's split between users and items"
        ))),
        Some(_) if args.num_factors == 0 || args.layers.contains(&0) => Err(
            NcfError::InvalidConfig("layer and factor sizes must be positive".into()),
        ),
        Some(_) => Ok(()),
    }
}

fn validate_schedule(args: &NcfArgs) -> Result<()> {
    if args.epochs_between_evals == 0 {
        return Err(NcfError::InvalidConfig(
            "epochs_between_evals must be greater than 0".into(),
        ));
    }

    if args.output_ml_perf_compliance_logging && args.epochs_between_evals != 1 {
        return Err(NcfError::InvalidConfig(
            "compliance logging requires evaluating after every epoch".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn assemble(flags: &[&str]) -> Result<Settings> {
        let args = NcfArgs::parse_from(std::iter::once("ncf").chain(flags.iter().copied()));
        Settings::assemble(&args)
    }

    #[test]
    fn train_batches_round_up_to_the_device_count() {
        for num_gpus in 0..=8 {
            for batch_size in [1, 7, 255, 256, 1000] {
                let gpus = num_gpus.to_string();
                let batch = batch_size.to_string();
                let settings =
                    assemble(&["--num_gpus", &gpus, "--batch_size", &batch]).unwrap();

                let d = num_gpus.max(1);
                let global = settings.batch_size * d;
                assert_eq!(global % d, 0);
                assert!(global >= batch_size && global - batch_size < d);
                assert_eq!(settings.batches_per_step, d);
            }
        }
    }

    #[test]
    fn eval_batches_hold_whole_groups_per_device() {
        for num_gpus in [0, 1, 3, 8] {
            for eval in [None, Some(1000), Some(1001), Some(65536)] {
                let gpus = num_gpus.to_string();
                let mut flags = vec!["--num_gpus".to_string(), gpus];
                if let Some(e) = eval {
                    flags.extend(["--eval_batch_size".to_string(), e.to_string()]);
                }
                let flags: Vec<&str> = flags.iter().map(String::as_str).collect();
                let settings = assemble(&flags).unwrap();

                let d = num_gpus.max(1);
                let global = settings.eval_batch_size * d;
                assert_eq!(global % ((NUM_EVAL_NEGATIVES + 1) * d), 0);
                assert!(global >= eval.unwrap_or(256));
            }
        }
    }

    #[test]
    fn small_eval_batches_are_rejected() {
        assert!(matches!(
            assemble(&["--eval_batch_size", "999"]),
            Err(NcfError::InvalidConfig(_))
        ));
        assert!(assemble(&["--eval_batch_size", "1000"]).is_ok());
    }

    #[test]
    fn xla_and_tpu_are_exclusive() {
        let err = assemble(&["--use_xla_for_gpu", "--tpu", "grpc://tpu"]).unwrap_err();
        assert!(err.to_string().contains("incompatible"));
        assert!(assemble(&["--tpu", "grpc://tpu"]).unwrap().use_tpu);
    }

    #[test]
    fn malformed_models_are_rejected() {
        assert!(assemble(&["--layers", "64,32"]).is_err());
        assert!(assemble(&["--layers", "63,32,16,8"]).is_err());
        assert!(assemble(&["--layers", "32,16", "--mlp_regularization", "0,0.1"]).is_ok());
    }

    #[test]
    fn schedules_are_validated() {
        assert!(assemble(&["--epochs_between_evals", "0"]).is_err());
        assert!(
            assemble(&[
                "--train_epochs",
                "4",
                "--epochs_between_evals",
                "2",
                "--output_ml_perf_compliance_logging"
            ])
            .is_err()
        );

        let settings = assemble(&["--train_epochs", "5", "--epochs_between_evals", "2"]).unwrap();
        assert_eq!(settings.total_training_cycle(), 2);
    }

    #[test]
    fn cycles_are_the_whole_evaluation_intervals() {
        for train_epochs in 1..=6usize {
            for between in 1..=8usize {
                let settings = assemble(&[
                    "--train_epochs",
                    &train_epochs.to_string(),
                    "--epochs_between_evals",
                    &between.to_string(),
                ])
                .unwrap();
                assert_eq!(settings.total_training_cycle(), train_epochs / between);
            }
        }

        let settings = assemble(&["--train_epochs", "1", "--epochs_between_evals", "2"]).unwrap();
        assert_eq!(settings.total_training_cycle(), 0);
    }

    #[test]
    fn hooks_are_parsed_case_insensitively() {
        let settings = assemble(&["--hooks", "loggingtensorhook,ExamplesPerSecondHook"]).unwrap();
        assert_eq!(
            settings.hooks,
            [HookKind::LoggingTensor, HookKind::ExamplesPerSecond]
        );

        assert!(assemble(&["--hooks", "NoSuchHook"]).is_err());
    }

    #[test]
    fn settings_feed_the_pipeline() {
        let settings = assemble(&["--num_gpus", "2", "--seed", "5", "--cache_id", "9"]).unwrap();
        let config = settings.pipeline_config();

        assert_eq!(config.batches_per_step, 2);
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.eval_batch_size, 1000);
        assert_eq!(config.seed, Some(5));
        assert_eq!(config.cache_id, 9);
    }
}
