use anyhow::Result;
use colored::Colorize;
use generative_api_router::{config, init_tracing, server};
use std::path::Path;
use tracing::info;

/// Execute the start command
///
/// This will:
/// 1. Load configuration
/// 2. Initialize tracing from the configured level and format
/// 3. Start the server (blocks until shutdown)
pub async fn execute(config_path: &Path) -> Result<()> {
    let cfg = config::load_config(config_path)?;

    init_tracing(&cfg.log_level, &cfg.log_format, cfg.is_verbose());
    println!("{}", "Starting gateway in foreground mode...".green());

    let store = cfg.masked().database_uri.unwrap_or_else(|| "disabled".to_string());
    info!(
        config = %config_path.display(),
        environment = %cfg.environment,
        store = %store,
        "Starting Generative API Router"
    );

    server::start_server(cfg).await?;

    Ok(())
}
