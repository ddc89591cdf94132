use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{MultiProgress, ProgressDrawTarget};
use netops_core::config::NetopsConfig;
use netops_core::telemetry::{init_tracing_with, LogConfig};
use std::sync::Arc;

mod client;
mod commands;
mod ui;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = client::Cli::parse();

    let mut cfg = NetopsConfig::load_config(cli.config.as_deref())
        .with_context(|| "Unable to load netops.toml; check the path passed to --config.")?;
    cli.apply_overrides(&mut cfg);

    let multi = if cfg.run.progress {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    };
    init_tracing_with(&LogConfig::from(&cfg.telemetry), Some(multi.clone()))
        .with_context(|| "Unable to initialize logging")?;

    let ctx = client::AppContext {
        progress: cfg.run.progress,
        config: Arc::new(cfg),
        multi,
    };
    if let Err(e) = client::run(cli.command, &ctx).await {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
