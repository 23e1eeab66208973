//! Statistics over a detected hit range.

use super::{Stat, StrategyError};
use crate::data::Bar;

/// Summarize `bars[hit..=hit_max]`.
///
/// `hit` is the more recent end of the range. `hit_chg_pct` is the close
/// change from `hit_max` to `hit`.
pub fn stat_result(bars: &[Bar], hit: usize, hit_max: usize) -> Result<Stat, StrategyError> {
    if hit > hit_max || hit_max >= bars.len() {
        return Err(StrategyError::InvalidRange {
            hit,
            hit_max,
            len: bars.len(),
        });
    }
    let range = &bars[hit..=hit_max];
    let low = range.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let high = range.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);

    let base = bars[hit_max].close;
    let hit_chg_pct = if base == 0.0 {
        0.0
    } else {
        (bars[hit].close - base) * 100.0 / base
    };

    Ok(Stat {
        hit_chg_pct,
        start: bars[hit].trade_date,
        end: bars[hit_max].trade_date,
        low,
        high,
        hit,
        hit_max,
    })
}
