//! Subcommand handlers.
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use screener_common::config::config_path;
use screener_common::Config;
use screener_core::{
    Category, CommonParams, MemoryLoader, RunEvent, Runner, RunnerConfig, Strategy,
    StrategyParams, StrategyRegistry, Universe,
};

use crate::StrategyArgs;

// ============================================================================
// Strategy Catalogue
// ============================================================================

pub fn list() -> Result<()> {
    let registry = StrategyRegistry::with_builtin();
    for name in registry.names() {
        let help = registry.create(name)?.help();
        let summary = help.lines().next().unwrap_or_default();
        println!("{name:12} {summary}");
    }
    Ok(())
}

pub fn describe(name: &str) -> Result<()> {
    let strategy = StrategyRegistry::with_builtin()
        .create(name)
        .context("See `screener list` for available strategies")?;
    let accepts: Vec<&str> = strategy.accept().iter().map(Category::as_str).collect();
    println!("{name}");
    println!("Accepts: {}", accepts.join(", "));
    println!();
    println!("{}", strategy.help());
    Ok(())
}

// ============================================================================
// Screening
// ============================================================================

/// Window parameters from config, overridden by the command line.
fn common_params(config: &Config, args: &StrategyArgs) -> CommonParams {
    let mut common = CommonParams::from_config(config);
    if let Some(end_date) = args.end_date {
        common.test_end_date = Some(end_date);
    }
    if let Some(days) = args.days {
        common.test_trade_days = days;
    }
    common
}

fn prepare_strategy(config: &Config, args: &StrategyArgs) -> Result<Arc<dyn Strategy>> {
    let params: StrategyParams = args.params.iter().cloned().collect();
    let strategy = StrategyRegistry::with_builtin()
        .create_prepared(&args.strategy, common_params(config, args), &params)
        .with_context(|| format!("Failed to prepare strategy '{}'", args.strategy))?;
    Ok(Arc::from(strategy))
}

/// Keep only `categories`; an empty selection keeps everything.
fn select_categories(universe: Universe, categories: &[Category]) -> Universe {
    if categories.is_empty() {
        return universe;
    }
    let mut selected = Universe::new();
    for &category in categories {
        selected.set_category(category, universe.instruments(category).to_vec());
    }
    selected
}

async fn log_progress(mut events: broadcast::Receiver<RunEvent>) {
    loop {
        match events.recv().await {
            Ok(RunEvent::Started { total, .. }) => info!(total, "Screening started"),
            Ok(RunEvent::Progress {
                code,
                done,
                total,
                hit,
                ..
            }) => debug!(code = %code, done, total, hit, "Tested"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Progress events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn shutdown_on_ctrl_c(runner: Arc<Runner>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted, waiting for in-flight tests");
        runner.shutdown().await;
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(
    config: &Config,
    args: &StrategyArgs,
    categories: &[Category],
    concurrency: Option<usize>,
) -> Result<()> {
    let strategy = prepare_strategy(config, args)?;
    let loader = MemoryLoader::from_json_file(&args.dataset)?;
    let universe = select_categories(loader.universe(), categories);

    let mut runner_config = RunnerConfig::from_config(config);
    if let Some(concurrency) = concurrency {
        runner_config.concurrency = concurrency;
    }
    let runner = Arc::new(Runner::new(Arc::new(loader), runner_config));

    let progress = tokio::spawn(log_progress(runner.subscribe()));
    let interrupt = tokio::spawn(shutdown_on_ctrl_c(Arc::clone(&runner)));

    let results = runner.run(strategy, Some(&universe)).await;

    interrupt.abort();
    if !runner.shutdown().await {
        warn!("Runner did not drain before the shutdown timeout");
    }
    progress.abort();

    print_json(&results?)
}

pub async fn fit(
    config: &Config,
    args: &StrategyArgs,
    category: Category,
    code: &str,
) -> Result<()> {
    let strategy = prepare_strategy(config, args)?;
    let loader = MemoryLoader::from_json_file(&args.dataset)?;
    let name = loader
        .universe()
        .instruments(category)
        .iter()
        .find(|instrument| instrument.code == code)
        .map(|instrument| instrument.name.clone())
        .with_context(|| {
            format!(
                "No {category} '{code}' in dataset {}",
                args.dataset.display()
            )
        })?;

    let runner = Runner::new(Arc::new(loader), RunnerConfig::from_config(config));
    let result = runner.fit(strategy.as_ref(), category, code, &name).await;
    runner.shutdown().await;

    print_json(&result?)
}

// ============================================================================
// Configuration
// ============================================================================

pub fn show_config(config: &Config, path: Option<&Path>, save: bool) -> Result<()> {
    if save {
        let path = path.map_or_else(config_path, Path::to_path_buf);
        config.save_to(&path)?;
        info!(path = %path.display(), "Config saved");
    }
    print_json(config)
}
