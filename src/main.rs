use clap::Parser;
use ncf::{NcfArgs, Settings, run_ncf};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = NcfArgs::parse();
    let settings = Settings::assemble(&args)?;
    let outcome = run_ncf(&settings)?;

    if let Some(result) = outcome.last_eval {
        log::info!(
            "final HR = {:.4}, NDCG = {:.4}, target reached: {}",
            result.hit_rate,
            result.ndcg,
            outcome.target_reached
        );
    }

    Ok(())
}
