use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use marketplace_ingest::api::routes::{router, WebhookState, DELETION_PATH};
use marketplace_ingest::config::{keys_file_path, load_keys_file, Config};
use marketplace_ingest::error::Result;

#[tokio::main]
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

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    cfg.validate_webhook()?;

    let app = router(WebhookState::from_config(&cfg));
    let bind_addr = format!("0.0.0.0:{}", cfg.webhook_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Deletion webhook listening on {bind_addr}{DELETION_PATH}");

    axum::serve(listener, app).await?;

    Ok(())
}
