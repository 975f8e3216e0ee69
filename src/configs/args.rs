use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use data_pipeline::Dataset;

/// Where benchmark results are written.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchmarkLoggerType {
    /// Log results through the regular logger.
    #[value(name = "BaseBenchmarkLogger")]
    Base,
    /// Write results as json lines under `--benchmark_log_dir`.
    #[value(name = "BenchmarkFileLogger")]
    File,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ncf",
    about = "Train and evaluate the NeuMF recommendation model on MovieLens"
)]
#[command(rename_all = "snake_case")]
pub struct NcfArgs {
    /// Dataset to be trained and evaluated (ml-1m or ml-20m).
    #[arg(long, default_value = "ml-1m", value_parser = parse_dataset)]
    pub dataset: Dataset,
    /// Directory holding the extracted datasets.
    #[arg(long, default_value = "/tmp/movielens-data/")]
    pub data_dir: PathBuf,
    /// Directory for checkpoints and profiler traces.
    #[arg(long, default_value = "/tmp/ncf/")]
    pub model_dir: PathBuf,
    /// Remove the model dir before training.
    #[arg(long)]
    pub clean: bool,
    /// Check the dataset is present and point at its download url if it's not.
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub download_if_missing: bool,

    /// Number of epochs to train for.
    #[arg(long, default_value_t = 2)]
    pub train_epochs: usize,
    /// Number of training epochs between evaluations.
    #[arg(long, default_value_t = 1)]
    pub epochs_between_evals: usize,
    /// Global training batch size.
    #[arg(long, default_value_t = 256)]
    pub batch_size: usize,
    /// Global evaluation batch size, defaults to `--batch_size`.
    #[arg(long)]
    pub eval_batch_size: Option<usize>,

    /// The embedding size of the MF model.
    #[arg(long, default_value_t = 8)]
    pub num_factors: usize,
    /// The sizes of the MLP layers, e.g. `--layers 32,16,8,4`.
    #[arg(long, value_delimiter = ',', default_values_t = [64, 32, 16, 8])]
    pub layers: Vec<usize>,
    /// The regularization factor for the MF embeddings.
    #[arg(long, default_value_t = 0.0)]
    pub mf_regularization: f32,
    /// The regularization factor for each MLP layer.
    #[arg(long, value_delimiter = ',', default_values_t = [0.0, 0.0, 0.0, 0.0])]
    pub mlp_regularization: Vec<f32>,
    /// Negative instances paired with every positive one.
    #[arg(long, default_value_t = 4)]
    pub num_neg: usize,

    #[arg(long, default_value_t = 0.001)]
    pub learning_rate: f32,
    /// Adam's beta1.
    #[arg(long, default_value_t = 0.9)]
    pub beta1: f32,
    /// Adam's beta2.
    #[arg(long, default_value_t = 0.999)]
    pub beta2: f32,
    /// Adam's epsilon.
    #[arg(long, default_value_t = 1e-8)]
    pub epsilon: f32,

    /// Stop training once the evaluation hit rate reaches this value.
    #[arg(long)]
    pub hr_threshold: Option<f32>,
    /// Ignore duplicated user item pairs when computing HR and NDCG.
    #[arg(long)]
    pub ml_perf: bool,
    /// Print the MLPerf compliance log lines.
    #[arg(long)]
    pub output_ml_perf_compliance_logging: bool,
    /// Seeds the model initialization and the data pipeline.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Log a digest of every epoch produced by the data pipeline.
    #[arg(long)]
    pub hash_pipeline: bool,
    /// Generate data on a background worker instead of the training thread.
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub use_subprocess: bool,
    /// Reuse the preprocessing cache with this id, defaults to the current time.
    #[arg(long)]
    pub cache_id: Option<u64>,

    #[arg(long)]
    pub use_xla_for_gpu: bool,
    /// Train through the high level fit path.
    #[arg(long)]
    pub use_keras: bool,
    #[arg(long)]
    pub use_synthetic_data: bool,
    /// Data parallel replicas, each one consumes a batch per step.
    #[arg(long, default_value_t = 0)]
    pub num_gpus: usize,
    #[arg(long)]
    pub tpu: Option<String>,
    #[arg(long)]
    pub tpu_zone: Option<String>,
    #[arg(long)]
    pub tpu_gcp_project: Option<String>,

    /// Training hooks: LoggingTensorHook, ExamplesPerSecondHook, ProfilerHook.
    #[arg(long, value_delimiter = ',', default_value = "ProfilerHook")]
    pub hooks: Vec<String>,
    #[arg(long, value_enum, default_value_t = BenchmarkLoggerType::Base)]
    pub benchmark_logger_type: BenchmarkLoggerType,
    /// Directory for the benchmark file logger.
    #[arg(long)]
    pub benchmark_log_dir: Option<PathBuf>,
    /// Identifies this run in the benchmark logs.
    #[arg(long)]
    pub benchmark_test_id: Option<String>,
}

fn parse_dataset(s: &str) -> Result<Dataset, String> {
    s.to_ascii_lowercase().parse().map_err(|e| format!("{e}"))
}
