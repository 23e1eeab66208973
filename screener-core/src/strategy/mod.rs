//! Pattern strategies over daily-bar windows.
//!
//! A strategy is configured once through [`Strategy::prepare`] and then shared
//! read-only by every concurrently running [`Strategy::test`] call.
//!
//! # Built-in strategies
//! - **ma_turn**: moving-average rise, fall, then renewed rise
//! - **right_side**: consecutive low-shadow up days on stable volume
//! - **shock_rise**: break-up run after a tight sideways consolidation

pub mod ma;
mod ma_turn;
mod registry;
mod right_side;
pub mod shadow;
mod shock_rise;
mod stat;

pub use ma_turn::{TurnConfig, TurnPhases, TurnStrategy};
pub use registry::{StrategyConstructor, StrategyRegistry};
pub use right_side::{Breakout, RightSideConfig, RightSideStrategy};
pub use shadow::{shadow, Shadow};
pub use shock_rise::{ShockRise, ShockRiseConfig, ShockRiseStrategy};
pub use stat::stat_result;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

use screener_common::Config;

use crate::data::{Bar, Category, DailyQuery, Loader, LoaderError};

// ============================================================================
// Parameters
// ============================================================================

/// Raw strategy tunables, parsed during `prepare`.
pub type StrategyParams = HashMap<String, String>;

/// Window settings shared by every strategy in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonParams {
    /// Inclusive upper bound on trade dates; `None` means latest available
    pub test_end_date: Option<NaiveDate>,
    /// Number of bars each instrument must provide
    pub test_trade_days: usize,
}

impl Default for CommonParams {
    fn default() -> Self {
        Self {
            test_end_date: None,
            test_trade_days: 60,
        }
    }
}

impl CommonParams {
    /// Build from the screening section of the global config
    pub fn from_config(config: &Config) -> Self {
        Self {
            test_end_date: config.screening.test_end_date,
            test_trade_days: config.screening.test_trade_days,
        }
    }
}

/// Read one typed parameter, keeping `current` when the key is absent.
pub(crate) fn parse_param<T: FromStr>(
    params: &StrategyParams,
    key: &str,
    current: T,
) -> Result<T, StrategyError> {
    match params.get(key) {
        None => Ok(current),
        Some(raw) => raw.trim().parse().map_err(|_| StrategyError::InvalidParam {
            key: key.to_string(),
            value: raw.clone(),
            reason: format!("expected {}", std::any::type_name::<T>()),
        }),
    }
}

/// Log a rejected `prepare` and hand the error back.
pub(crate) fn rejected(strategy: &str, err: StrategyError) -> StrategyError {
    warn!(strategy = %strategy, error = %err, "Strategy parameters rejected");
    err
}

// ============================================================================
// Results
// ============================================================================

/// Summary statistics over a detected hit range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    /// Close change from `hit_max` to `hit` (%)
    pub hit_chg_pct: f64,
    /// Trade date at `hit`
    pub start: NaiveDate,
    /// Trade date at `hit_max`
    pub end: NaiveDate,
    /// Lowest low over the range
    pub low: f64,
    /// Highest high over the range
    pub high: f64,
    pub hit: usize,
    pub hit_max: usize,
}

/// Annotation attached to a trade date of a hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Mark {
    Label(String),
    Bar(Box<Bar>),
}

/// One dated annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkEntry {
    pub date: NaiveDate,
    pub mark: Mark,
}

/// A positive screening result for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    pub code: String,
    pub name: String,
    /// Dated annotations in discovery order; one entry per date
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mark: Vec<MarkEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat: Option<Stat>,
}

impl StrategyResult {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            mark: Vec::new(),
            stat: None,
        }
    }

    /// Attach an annotation. A second mark on the same date replaces the
    /// first one in place.
    pub fn with_mark(mut self, date: NaiveDate, mark: Mark) -> Self {
        match self.mark.iter_mut().find(|entry| entry.date == date) {
            Some(entry) => entry.mark = mark,
            None => self.mark.push(MarkEntry { date, mark }),
        }
        self
    }

    /// Attach a snapshot of `bar` on its own trade date.
    pub fn with_bar_mark(self, bar: &Bar) -> Self {
        self.with_mark(bar.trade_date, Mark::Bar(Box::new(bar.clone())))
    }

    pub fn with_stat(mut self, stat: Stat) -> Self {
        self.stat = Some(stat);
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by strategies.
#[derive(Debug, Clone, Error)]
pub enum StrategyError {
    #[error("invalid parameter {key}={value}: {reason}")]
    InvalidParam {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid range hit={hit} hit_max={hit_max} for {len} bars")]
    InvalidRange { hit: usize, hit_max: usize, len: usize },

    #[error("load failed: {0}")]
    Load(#[from] LoaderError),
}

// ============================================================================
// Strategy Base
// ============================================================================

/// Shared state every strategy composes: accepted categories and the common
/// window parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyBase {
    accept: BTreeSet<Category>,
    common: CommonParams,
}

impl Default for StrategyBase {
    fn default() -> Self {
        Self::new([Category::Stock])
    }
}

impl StrategyBase {
    pub fn new(accept: impl IntoIterator<Item = Category>) -> Self {
        Self {
            accept: accept.into_iter().collect(),
            common: CommonParams::default(),
        }
    }

    pub fn accept(&self) -> &BTreeSet<Category> {
        &self.accept
    }

    pub fn common(&self) -> &CommonParams {
        &self.common
    }

    /// Validate the common parameters without storing them.
    pub fn check_common(&self, common: &CommonParams) -> Result<(), StrategyError> {
        if common.test_trade_days == 0 {
            return Err(StrategyError::InvalidParam {
                key: "test_trade_days".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn set_common(&mut self, common: CommonParams) {
        self.common = common;
    }

    /// Load the instrument's window, newest first.
    ///
    /// Returns `None` when fewer than `test_trade_days` bars exist.
    pub async fn load_window(
        &self,
        loader: &dyn Loader,
        category: Category,
        code: &str,
    ) -> Result<Option<Vec<Bar>>, StrategyError> {
        let days = self.common.test_trade_days;
        let query = DailyQuery::latest(code, self.common.test_end_date, days);
        let mut bars = loader.load_daily(category, &query).await?;

        if bars.len() < days {
            debug!(
                code = %code,
                category = %category,
                bars = bars.len(),
                required = days,
                "Insufficient history"
            );
            return Ok(None);
        }
        bars.truncate(days);
        Ok(Some(bars))
    }
}

// ============================================================================
// Strategy Trait
// ============================================================================

/// A pattern-detection strategy.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Registry name (e.g., "right_side")
    fn name(&self) -> &'static str;

    /// Shared state composed by the strategy
    fn base(&self) -> &StrategyBase;

    /// Categories this strategy screens. Defaults to stocks only.
    fn accept(&self) -> &BTreeSet<Category> {
        self.base().accept()
    }

    fn accepts(&self, category: Category) -> bool {
        self.accept().contains(&category)
    }

    /// Static description of purpose and parameters
    fn help(&self) -> String;

    /// Parse and store parameters.
    ///
    /// Either every parameter is applied or none is; a failed call leaves the
    /// previous configuration untouched and logs the cause.
    fn prepare(&mut self, common: CommonParams, params: &StrategyParams)
        -> Result<(), StrategyError>;

    /// Evaluate one instrument.
    ///
    /// `Ok(None)` means the instrument does not match, including when it has
    /// too little history.
    async fn test(
        &self,
        loader: &dyn Loader,
        category: Category,
        code: &str,
        name: &str,
    ) -> Result<Option<StrategyResult>, StrategyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, day).unwrap()
    }

    #[test]
    fn test_parse_param() {
        let params: StrategyParams = [("days".to_string(), " 7 ".to_string())].into();
        assert_eq!(parse_param(&params, "days", 3usize).unwrap(), 7);
        assert_eq!(parse_param(&params, "missing", 3usize).unwrap(), 3);

        let params: StrategyParams = [("days".to_string(), "seven".to_string())].into();
        let err = parse_param(&params, "days", 3usize).unwrap_err();
        assert!(matches!(err, StrategyError::InvalidParam { ref key, .. } if key == "days"));
    }

    #[test]
    fn test_result_marks_keep_order_and_replace_same_date() {
        let result = StrategyResult::new("000001", "PAB")
            .with_mark(date(5), Mark::Label("hit".into()))
            .with_mark(date(3), Mark::Label("hit_max".into()))
            .with_mark(date(5), Mark::Label("again".into()));

        assert_eq!(result.mark.len(), 2);
        assert_eq!(result.mark[0].date, date(5));
        assert_eq!(result.mark[0].mark, Mark::Label("again".into()));
        assert_eq!(result.mark[1].date, date(3));
    }

    #[test]
    fn test_result_wire_shape() {
        let result = StrategyResult::new("000001", "PAB");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({"code": "000001", "name": "PAB"}));

        let result = result.with_stat(Stat {
            hit_chg_pct: 12.5,
            start: date(9),
            end: date(5),
            low: 9.0,
            high: 12.0,
            hit: 2,
            hit_max: 6,
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["stat"]["start"], "2024-02-09");
        assert_eq!(json["stat"]["hit_max"], 6);
    }

    #[test]
    fn test_base_defaults() {
        let base = StrategyBase::default();
        assert_eq!(base.accept().iter().copied().collect::<Vec<_>>(), vec![Category::Stock]);
        assert_eq!(base.common().test_trade_days, 60);

        let bad = CommonParams {
            test_end_date: None,
            test_trade_days: 0,
        };
        assert!(base.check_common(&bad).is_err());
    }

    #[test]
    fn test_common_params_from_config() {
        let mut config = Config::default();
        config.screening.test_trade_days = 90;
        config.screening.test_end_date = Some(date(1));
        let common = CommonParams::from_config(&config);
        assert_eq!(common.test_trade_days, 90);
        assert_eq!(common.test_end_date, Some(date(1)));
    }
}
