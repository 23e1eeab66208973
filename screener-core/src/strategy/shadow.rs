//! Candle shadow ratios.

use serde::Serialize;

use crate::data::Bar;

/// Shape of one bar relative to its own high-low range.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Shadow {
    /// (high - low) as a percentage of the prior close
    pub amplitude: f64,
    /// Wick above the body (% of range)
    pub upper: f64,
    /// Body (% of range)
    pub body: f64,
    /// Wick below the body (% of range)
    pub lower: f64,
}

impl Shadow {
    /// True when the bar had no range (`high == low`).
    pub fn is_degenerate(&self) -> bool {
        *self == Self::default()
    }
}

/// Compute amplitude and shadow percentages of one bar.
///
/// A bar with `high == low` yields all zeros. On a down or flat day the
/// roles of `open` and `close` swap so that the body is always measured
/// from its top edge.
pub fn shadow(last_close: f64, open: f64, close: f64, low: f64, high: f64) -> Shadow {
    if high == low {
        return Shadow::default();
    }
    let base = high - low;
    let amplitude = base * 100.0 / last_close;
    let (top, bottom) = if close > open { (close, open) } else { (open, close) };

    Shadow {
        amplitude,
        upper: (high - top) * 100.0 / base,
        body: (top - bottom) * 100.0 / base,
        lower: (bottom - low) * 100.0 / base,
    }
}

impl Bar {
    /// Shadow ratios of this bar against its implied prior close.
    pub fn shadow(&self) -> Shadow {
        shadow(self.prev_close(), self.open, self.close, self.low, self.high)
    }
}
