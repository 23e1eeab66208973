//! Right-side breakout detection.
//!
//! A run of consecutive up days ending at the latest bar, each with small
//! shadows and no collapse in volume or amount. Once the run reaches
//! `min_rise_days` the breakout is confirmed at that bar (`hit`); the run may
//! continue further back (`hit_max`). Before the run, the price must have
//! spent at least `min_test_days` closing below the confirmed breakout close.

use async_trait::async_trait;

use super::{
    parse_param, rejected, stat_result, CommonParams, Strategy, StrategyBase, StrategyError,
    StrategyParams, StrategyResult,
};
use crate::data::{Bar, Category, Loader};

/// Right-side breakout thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct RightSideConfig {
    /// Minimum consecutive up days
    pub min_rise_days: usize,
    /// Maximum upper and lower shadow (% of range)
    pub max_shadow_pct: f64,
    /// Minimum volume change per day (%)
    pub min_volume_chg_pct: f64,
    /// Minimum amount change per day (%)
    pub min_amount_chg_pct: f64,
    /// Minimum days before the run closing below the breakout close
    pub min_test_days: usize,
}

impl Default for RightSideConfig {
    fn default() -> Self {
        Self {
            min_rise_days: 3,
            max_shadow_pct: 20.0,
            min_volume_chg_pct: -10.0,
            min_amount_chg_pct: -10.0,
            min_test_days: 0,
        }
    }
}

/// A detected breakout run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakout {
    /// Index where the run reached `min_rise_days`
    pub hit: usize,
    /// Oldest index of the run
    pub hit_max: usize,
    /// Days before the run that closed below the close at `hit`
    pub test_days: usize,
}

impl RightSideConfig {
    /// Overlay `params` on this config, validating the result.
    pub fn with_params(&self, params: &StrategyParams) -> Result<Self, StrategyError> {
        let config = Self {
            min_rise_days: parse_param(params, "min_rise_days", self.min_rise_days)?,
            max_shadow_pct: parse_param(params, "max_shadow_pct", self.max_shadow_pct)?,
            min_volume_chg_pct: parse_param(params, "min_volume_chg_pct", self.min_volume_chg_pct)?,
            min_amount_chg_pct: parse_param(params, "min_amount_chg_pct", self.min_amount_chg_pct)?,
            min_test_days: parse_param(params, "min_test_days", self.min_test_days)?,
        };
        if config.min_rise_days == 0 {
            return Err(StrategyError::InvalidParam {
                key: "min_rise_days".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(config)
    }

    /// Whether one bar belongs to the run.
    pub fn qualifies(&self, bar: &Bar) -> bool {
        let shadow = bar.shadow();
        bar.chg_pct > 0.0
            && bar.volume_chg_pct >= self.min_volume_chg_pct
            && bar.amount_chg_pct >= self.min_amount_chg_pct
            && shadow.upper <= self.max_shadow_pct
            && shadow.lower <= self.max_shadow_pct
    }

    /// Find the breakout run in a newest-first window.
    pub fn detect(&self, bars: &[Bar]) -> Option<Breakout> {
        let run = bars.iter().take_while(|bar| self.qualifies(bar)).count();
        let hit = self.min_rise_days.checked_sub(1)?;
        if run < self.min_rise_days {
            return None;
        }
        let hit_max = run - 1;

        let breakout_close = bars[hit].close;
        let test_days = bars[hit_max + 1..]
            .iter()
            .take_while(|bar| bar.close < breakout_close)
            .count();
        if test_days < self.min_test_days {
            return None;
        }

        Some(Breakout {
            hit,
            hit_max,
            test_days,
        })
    }
}

/// Right-side breakout strategy.
#[derive(Debug, Clone, Default)]
pub struct RightSideStrategy {
    base: StrategyBase,
    config: RightSideConfig,
}

impl RightSideStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> &RightSideConfig {
        &self.config
    }
}

#[async_trait]
impl Strategy for RightSideStrategy {
    fn name(&self) -> &'static str {
        "right_side"
    }

    fn base(&self) -> &StrategyBase {
        &self.base
    }

    fn help(&self) -> String {
        let d = RightSideConfig::default();
        format!(
            "Right-side breakout: consecutive up days with small shadows on steady volume.\n\
             Parameters:\n\
             \x20 min_rise_days       minimum consecutive up days (default {})\n\
             \x20 max_shadow_pct      maximum upper/lower shadow in % of range (default {})\n\
             \x20 min_volume_chg_pct  minimum daily volume change in % (default {})\n\
             \x20 min_amount_chg_pct  minimum daily amount change in % (default {})\n\
             \x20 min_test_days       minimum days closing below the breakout before the run (default {})",
            d.min_rise_days, d.max_shadow_pct, d.min_volume_chg_pct, d.min_amount_chg_pct, d.min_test_days
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
        let Some(breakout) = self.config.detect(&bars) else {
            return Ok(None);
        };

        let stat = stat_result(&bars, breakout.hit, breakout.hit_max)?;
        let result = StrategyResult::new(code, name)
            .with_bar_mark(&bars[breakout.hit])
            .with_bar_mark(&bars[breakout.hit_max])
            .with_stat(stat);
        Ok(Some(result))
    }
}
