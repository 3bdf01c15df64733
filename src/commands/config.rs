use anyhow::Result;
use colored::Colorize;
use generative_api_router::config::{self, GatewayConfig};
use std::path::Path;

/// Execute the config show command
///
/// Displays the effective configuration with the store URI masked
pub fn show(config_path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());

    let cfg = config::load_config(config_path)?;

    println!("{}", "Current Configuration:".green().bold());
    println!();
    println!("{}", render(&cfg)?);

    Ok(())
}

/// Execute the config validate command
pub fn validate(config_path: &Path) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());

    let cfg = config::load_config(config_path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Listen: {}:{}", cfg.host, cfg.port);
    match cfg.database_config() {
        Some(db) => {
            println!("  Environment: {}", db.environment);
            println!("  Database: {}", db.database_name);
            println!("  Store URI: {}", db.mask_sensitive_data().uri);
        }
        None => println!("  Persistence: {}", "disabled (no store URI)".yellow()),
    }
    println!(
        "  User-Agent filter: {}",
        cfg.user_agent_prefix.as_deref().unwrap_or("off")
    );

    Ok(())
}

/// TOML view of `cfg` that never contains store credentials
fn render(cfg: &GatewayConfig) -> Result<String> {
    Ok(toml::to_string_pretty(&cfg.masked())?)
}
