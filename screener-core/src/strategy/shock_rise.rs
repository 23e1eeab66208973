//! Shock-then-breakout detection.
//!
//! The latest bars break upward out of a sideways range:
//! 1. **Break-up**: at least `min_break_days` up days, each closing above the
//!    prior day's high, gaining `min_break_up_pct` in total
//! 2. **Shock**: before the break-up, at least `min_shock_days` quiet days,
//!    each moving less than `max_shock_per_day_pct` and staying below the
//!    latest close, with a net move within `max_shock_pct`

use async_trait::async_trait;

use super::{
    parse_param, rejected, stat_result, CommonParams, Mark, Strategy, StrategyBase,
    StrategyError, StrategyParams, StrategyResult,
};
use crate::data::{Bar, Category, Loader};

/// Shock-then-breakout thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct ShockRiseConfig {
    /// Minimum break-up days
    pub min_break_days: usize,
    /// Minimum cumulative change over the break-up (%)
    pub min_break_up_pct: f64,
    /// Minimum consolidation days
    pub min_shock_days: usize,
    /// Maximum absolute daily change during consolidation (%)
    pub max_shock_per_day_pct: f64,
    /// Maximum absolute net change over the first `min_shock_days` (%)
    pub max_shock_pct: f64,
}

impl Default for ShockRiseConfig {
    fn default() -> Self {
        Self {
            min_break_days: 3,
            min_break_up_pct: 5.0,
            min_shock_days: 15,
            max_shock_per_day_pct: 7.0,
            max_shock_pct: 15.0,
        }
    }
}

/// A detected consolidation and break-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShockRise {
    /// Index where the break-up reached `min_break_days`
    pub hit: usize,
    /// Oldest index of the break-up
    pub hit_max: usize,
    /// Cumulative change over the break-up (%)
    pub break_up_pct: f64,
    /// Index of the last day counted into `shock_pct`
    pub shock_start: usize,
    /// Oldest index of the consolidation
    pub shock_end: usize,
    /// Net change over the first `min_shock_days` of consolidation (%)
    pub shock_pct: f64,
}

impl ShockRiseConfig {
    /// Overlay `params` on this config, validating the result.
    pub fn with_params(&self, params: &StrategyParams) -> Result<Self, StrategyError> {
        let config = Self {
            min_break_days: parse_param(params, "min_break_days", self.min_break_days)?,
            min_break_up_pct: parse_param(params, "min_break_up_pct", self.min_break_up_pct)?,
            min_shock_days: parse_param(params, "min_shock_days", self.min_shock_days)?,
            max_shock_per_day_pct: parse_param(
                params,
                "max_shock_per_day_pct",
                self.max_shock_per_day_pct,
            )?,
            max_shock_pct: parse_param(params, "max_shock_pct", self.max_shock_pct)?,
        };
        for (key, value) in [
            ("min_break_days", config.min_break_days),
            ("min_shock_days", config.min_shock_days),
        ] {
            if value == 0 {
                return Err(StrategyError::InvalidParam {
                    key: key.into(),
                    value: "0".into(),
                    reason: "must be at least 1".into(),
                });
            }
        }
        Ok(config)
    }

    fn breaks_up(bar: &Bar, prior: &Bar) -> bool {
        bar.chg_pct >= 0.0 && bar.close > bar.open && bar.close > prior.high
    }

    /// Find the break-up and the consolidation before it in a newest-first window.
    pub fn detect(&self, bars: &[Bar]) -> Option<ShockRise> {
        let run = bars
            .windows(2)
            .take_while(|pair| Self::breaks_up(&pair[0], &pair[1]))
            .count();
        let hit = self.min_break_days.checked_sub(1)?;
        if run < self.min_break_days {
            return None;
        }
        let hit_max = run - 1;
        let break_up_pct: f64 = bars[..run].iter().map(|b| b.chg_pct).sum();
        if break_up_pct < self.min_break_up_pct {
            return None;
        }

        let latest_close = bars[0].close;
        let consolidation = &bars[hit_max + 1..];
        if consolidation.len() < self.min_shock_days {
            return None;
        }
        let shock_days = consolidation
            .iter()
            .take_while(|bar| bar.chg_pct.abs() < self.max_shock_per_day_pct && bar.high < latest_close)
            .count();
        if shock_days < self.min_shock_days {
            return None;
        }
        let shock_pct: f64 = consolidation[..self.min_shock_days]
            .iter()
            .map(|b| b.chg_pct)
            .sum();
        if shock_pct.abs() > self.max_shock_pct {
            return None;
        }

        Some(ShockRise {
            hit,
            hit_max,
            break_up_pct,
            shock_start: hit_max + self.min_shock_days,
            shock_end: hit_max + shock_days,
            shock_pct,
        })
    }
}

/// Shock-then-breakout strategy.
#[derive(Debug, Clone, Default)]
pub struct ShockRiseStrategy {
    base: StrategyBase,
    config: ShockRiseConfig,
}

impl ShockRiseStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> &ShockRiseConfig {
        &self.config
    }
}

#[async_trait]
impl Strategy for ShockRiseStrategy {
    fn name(&self) -> &'static str {
        "shock_rise"
    }

    fn base(&self) -> &StrategyBase {
        &self.base
    }

    fn help(&self) -> String {
        let d = ShockRiseConfig::default();
        format!(
            "Shock then rise: a break-up run out of a narrow sideways range.\n\
             Parameters:\n\
             \x20 min_break_days         minimum break-up days (default {})\n\
             \x20 min_break_up_pct       minimum total break-up change in % (default {})\n\
             \x20 min_shock_days         minimum consolidation days (default {})\n\
             \x20 max_shock_per_day_pct  maximum daily change during consolidation in % (default {})\n\
             \x20 max_shock_pct          maximum net consolidation change in % (default {})",
            d.min_break_days, d.min_break_up_pct, d.min_shock_days, d.max_shock_per_day_pct, d.max_shock_pct
        )
    }

    fn prepare(
        &mut self,
        common: CommonParams,
        params: &StrategyParams,
    ) -> Result<(), StrategyError> {
        self.base
            .check_common(&common)
            .map_err(|e| rejected(self.name(), e))?;
        let config = self
            .config
            .with_params(params)
            .map_err(|e| rejected(self.name(), e))?;
        if config.min_shock_days > common.test_trade_days {
            return Err(rejected(
                self.name(),
                StrategyError::InvalidParam {
                    key: "min_shock_days".into(),
                    value: config.min_shock_days.to_string(),
                    reason: format!("exceeds test_trade_days={}", common.test_trade_days),
                },
            ));
        }

        self.base.set_common(common);
        self.config = config;
        Ok(())
    }

    async fn test(
        &self,
        loader: &dyn Loader,
        category: Category,
        code: &str,
        name: &str,
    ) -> Result<Option<StrategyResult>, StrategyError> {
        let Some(bars) = self.base.load_window(loader, category, code).await? else {
            return Ok(None);
        };
        let Some(found) = self.config.detect(&bars) else {
            return Ok(None);
        };

        let stat = stat_result(&bars, found.hit, found.hit_max)?;
        let label = |s: &str| Mark::Label(s.to_string());
        let result = StrategyResult::new(code, name)
            .with_mark(bars[found.hit].trade_date, label("hit"))
            .with_mark(bars[found.hit_max].trade_date, label("hit_max"))
            .with_mark(bars[found.shock_start].trade_date, label("shock_start"))
            .with_mark(bars[found.shock_end].trade_date, label("shock_end"))
            .with_stat(stat);
        Ok(Some(result))
    }
}
