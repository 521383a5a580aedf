use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use marketplace_ingest::config::{keys_file_path, load_keys_file, Config};
use marketplace_ingest::pipeline::run_cycle;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = load_keys_file(&keys_file_path()) {
        eprintln!("Config error: {e}");
        std::process::exit(1);
    }

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = cfg.validate_pipeline() {
        error!("{e}");
        std::process::exit(1);
    }

    info!(
        "Cycle starting: {} categories, lookback {}h, table {}",
        cfg.categories.len(),
        cfg.lookback_hours,
        cfg.table_name,
    );

    let report = run_cycle(&cfg).await;
    info!(
        categories = report.committed.len(),
        rows = report.rows_written(),
        "Cycle finished"
    );

    if !report.is_success() {
        std::process::exit(1);
    }
}
