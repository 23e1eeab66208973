//! Moving-average turn detection.
//!
//! Looks for a moving average that is rising now, fell before that, and rose
//! again before the fall. Reading backwards from the latest bar:
//! 1. **Turn**: MA above the prior day's MA for `min_turn_days..=max_turn_days`
//! 2. **Decline**: MA below the prior day's MA for at least `min_down_days`
//! 3. **Advance**: MA above the prior day's MA for at least `min_up_days`,
//!    gaining at least `min_up_pct` (off by default)

use async_trait::async_trait;

use super::ma::moving_average;
use super::{
    parse_param, rejected, CommonParams, Strategy, StrategyBase, StrategyError, StrategyParams,
    StrategyResult,
};
use crate::data::{Bar, Category, Loader};

/// Turn detection thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnConfig {
    /// Moving-average period
    pub ma: usize,
    /// Minimum length of the earlier advance
    pub min_up_days: usize,
    /// Minimum MA gain across the earlier advance (%)
    pub min_up_pct: f64,
    /// Minimum length of the decline
    pub min_down_days: usize,
    /// Minimum length of the current turn
    pub min_turn_days: usize,
    /// Maximum length of the current turn
    pub max_turn_days: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            ma: 5,
            min_up_days: 10,
            min_up_pct: 0.0,
            min_down_days: 5,
            min_turn_days: 2,
            max_turn_days: 5,
        }
    }
}

/// Phase boundaries of a detected turn, as bar indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnPhases {
    /// End of the current turn, where the decline bottomed
    pub hit: usize,
    /// End of the decline, where the earlier advance peaked
    pub hit2: usize,
    /// Start of the earlier advance
    pub hit3: usize,
}

impl TurnConfig {
    /// Overlay `params` on this config, validating the result.
    pub fn with_params(&self, params: &StrategyParams) -> Result<Self, StrategyError> {
        let config = Self {
            ma: parse_param(params, "ma", self.ma)?,
            min_up_days: parse_param(params, "min_up_days", self.min_up_days)?,
            min_up_pct: parse_param(params, "min_up_pct", self.min_up_pct)?,
            min_down_days: parse_param(params, "min_down_days", self.min_down_days)?,
            min_turn_days: parse_param(params, "min_turn_days", self.min_turn_days)?,
            max_turn_days: parse_param(params, "max_turn_days", self.max_turn_days)?,
        };
        if config.ma == 0 {
            return Err(StrategyError::InvalidParam {
                key: "ma".into(),
                value: "0".into(),
                reason: "period must be at least 1".into(),
            });
        }
        if config.min_turn_days > config.max_turn_days {
            return Err(StrategyError::InvalidParam {
                key: "min_turn_days".into(),
                value: config.min_turn_days.to_string(),
                reason: format!("exceeds max_turn_days={}", config.max_turn_days),
            });
        }
        Ok(config)
    }

    /// Find the three phases in a newest-first window.
    pub fn detect(&self, bars: &[Bar]) -> Option<TurnPhases> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let ma = moving_average(&closes, self.ma);
        if ma.len() < 2 {
            return None;
        }
        let last = ma.len() - 1;
        let rising = |i: usize| ma[i] > ma[i + 1];
        let falling = |i: usize| ma[i] < ma[i + 1];
        let run = |from: usize, day: &dyn Fn(usize) -> bool| {
            (from..last).take_while(|&i| day(i)).count()
        };

        let hit = run(0, &rising);
        if hit < self.min_turn_days || hit > self.max_turn_days {
            return None;
        }

        let hit2 = hit + run(hit, &falling);
        if hit2 - hit < self.min_down_days {
            return None;
        }

        let hit3 = hit2 + run(hit2, &rising);
        if hit3 - hit2 < self.min_up_days {
            return None;
        }

        if ma[hit3] > 0.0 {
            let gain = (ma[hit2] - ma[hit3]) * 100.0 / ma[hit3];
            if gain < self.min_up_pct {
                return None;
            }
        }

        Some(TurnPhases { hit, hit2, hit3 })
    }
}

/// Moving-average turn strategy.
#[derive(Debug, Clone, Default)]
pub struct TurnStrategy {
    base: StrategyBase,
    config: TurnConfig,
}

impl TurnStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }
}

#[async_trait]
impl Strategy for TurnStrategy {
    fn name(&self) -> &'static str {
        "ma_turn"
    }

    fn base(&self) -> &StrategyBase {
        &self.base
    }

    fn help(&self) -> String {
        let d = TurnConfig::default();
        format!(
            "Moving-average turn: the MA has just turned up after a decline that followed an advance.\n\
             Parameters:\n\
             \x20 ma             moving-average period (default {})\n\
             \x20 min_turn_days  minimum days of the current upturn (default {})\n\
             \x20 max_turn_days  maximum days of the current upturn (default {})\n\
             \x20 min_down_days  minimum days of the decline (default {})\n\
             \x20 min_up_days    minimum days of the earlier advance (default {})\n\
             \x20 min_up_pct     minimum MA gain of the earlier advance in % (default {})",
            d.ma, d.min_turn_days, d.max_turn_days, d.min_down_days, d.min_up_days, d.min_up_pct
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
        let Some(phases) = self.config.detect(&bars) else {
            return Ok(None);
        };

        let result = StrategyResult::new(code, name)
            .with_bar_mark(&bars[phases.hit])
            .with_bar_mark(&bars[phases.hit2])
            .with_bar_mark(&bars[phases.hit3]);
        Ok(Some(result))
    }
}
