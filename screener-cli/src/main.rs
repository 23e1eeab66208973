#![warn(clippy::all)]
#![allow(clippy::pedantic)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use screener_common::logging::init_logging;
use screener_common::Config;
use screener_core::Category;

mod commands;

/// Screen daily bars for chart patterns.
#[derive(Parser, Debug)]
#[command(name = "screener")]
#[command(version)]
#[command(about = "Screen daily bars for chart patterns.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.screener/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Strategy selection shared by `run` and `fit`.
#[derive(Args, Debug, Clone)]
pub struct StrategyArgs {
    /// Strategy name (see `list`)
    #[arg(short, long)]
    pub strategy: String,

    /// Strategy parameter, repeatable
    #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// JSON dataset with instrument series
    #[arg(short, long)]
    pub dataset: PathBuf,

    /// Last trade date to consider (YYYY-MM-DD)
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// Bars each instrument must provide
    #[arg(long)]
    pub days: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered strategies
    List,

    /// Show a strategy's description and parameters
    Describe {
        /// Strategy name
        name: String,
    },

    /// Screen every instrument in a dataset
    Run {
        #[command(flatten)]
        strategy: StrategyArgs,

        /// Restrict to these categories, repeatable
        #[arg(short = 'c', long = "category")]
        categories: Vec<Category>,

        /// Maximum concurrent tests
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Test a single instrument
    Fit {
        #[command(flatten)]
        strategy: StrategyArgs,

        /// Instrument code
        #[arg(long)]
        code: String,

        /// Instrument category
        #[arg(short = 'c', long, default_value = "stock")]
        category: Category,
    },

    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },
}

/// Parse a `key=value` pair.
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env_overrides();
            config.validate()?;
            config
        }
        None => Config::load_with_env()?,
    };
    Ok(config)
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.observability.log_level, &config.observability.log_format);

    match cli.command {
        Commands::List => commands::list(),
        Commands::Describe { name } => commands::describe(&name),
        Commands::Run {
            strategy,
            categories,
            concurrency,
        } => commands::run(&config, &strategy, &categories, concurrency).await,
        Commands::Fit {
            strategy,
            code,
            category,
        } => commands::fit(&config, &strategy, category, &code).await,
        Commands::Config { save } => commands::show_config(&config, cli.config.as_deref(), save),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            let code = err
                .downcast_ref::<screener_common::Error>()
                .map_or(1, screener_common::Error::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
