//! Screener Core
//!
//! Screens a universe of instruments (stocks, funds, bonds, indices, sectors)
//! against pattern strategies over their recent daily bars.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                            Runner                             │
//! │   permits (N) ─▶ Strategy::test ─▶ hits grouped by category   │
//! ├────────────────────┬─────────────────────┬────────────────────┤
//! │  StrategyRegistry  │  Strategies         │  Loader            │
//! │  name → ctor       │  ma_turn            │  load_daily        │
//! │                    │  right_side         │  load_instruments  │
//! │                    │  shock_rise         │  (MemoryLoader)    │
//! └────────────────────┴─────────────────────┴────────────────────┘
//! ```
//!
//! # Bar Windows
//!
//! Every strategy works on a newest-first window of `test_trade_days` bars
//! ending at `test_end_date`. Index 0 is the latest bar. Patterns are found
//! as runs: contiguous days from index 0 onward that satisfy a per-day rule,
//! ending at the first day that does not.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod runner;
pub mod strategy;

pub use data::{Bar, Category, DailyQuery, Instrument, Loader, LoaderError, MemoryLoader, Universe};
pub use runner::{RunError, RunEvent, RunResults, Runner, RunnerConfig, RunnerState};
pub use strategy::{
    stat_result, CommonParams, Mark, Stat, Strategy, StrategyBase, StrategyError, StrategyParams,
    StrategyRegistry, StrategyResult,
};
