//! Market data types for daily-bar screening.
//!
//! Bars are always handled as reverse-chronological windows: index 0 is the
//! most recent trading day and every following index is one day older.

mod loader;
mod memory;

pub use loader::{DailyQuery, Loader, LoaderError, SortOrder};
pub use memory::{Dataset, DatasetEntry, MemoryLoader};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Category
// ============================================================================

/// Instrument category. Each category is loaded from its own daily-bar source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Bond,
    Fund,
    Stock,
    Index,
    Concept,
    Industry,
}

impl Category {
    /// All categories, in declaration order.
    pub const ALL: [Category; 6] = [
        Category::Bond,
        Category::Fund,
        Category::Stock,
        Category::Index,
        Category::Concept,
        Category::Industry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bond => "bond",
            Self::Fund => "fund",
            Self::Stock => "stock",
            Self::Index => "index",
            Self::Concept => "concept",
            Self::Industry => "industry",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

// ============================================================================
// Bar
// ============================================================================

/// One trading day of an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Instrument code (e.g., "000001")
    #[serde(default)]
    pub code: String,
    /// Instrument name
    #[serde(default)]
    pub name: String,
    /// Trading day
    pub trade_date: NaiveDate,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    /// Volume
    #[serde(default)]
    pub volume: f64,
    /// Amount (turnover in currency)
    #[serde(default)]
    pub amount: f64,
    /// Turnover rate (%)
    #[serde(default)]
    pub turnover: f64,
    /// Close change versus the prior day (%)
    #[serde(default)]
    pub chg_pct: f64,
    /// Volume change versus the prior day (%)
    #[serde(default)]
    pub volume_chg_pct: f64,
    /// Amount change versus the prior day (%)
    #[serde(default)]
    pub amount_chg_pct: f64,
}

impl Bar {
    /// Check if this is a bullish bar
    pub fn is_up(&self) -> bool {
        self.close > self.open
    }

    /// Prior day's close implied by `close` and `chg_pct`.
    pub fn prev_close(&self) -> f64 {
        let ratio = 1.0 + self.chg_pct / 100.0;
        if ratio == 0.0 {
            self.close
        } else {
            self.close / ratio
        }
    }
}

// ============================================================================
// Universe
// ============================================================================

/// An instrument identity within one category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub code: String,
    pub name: String,
}

impl Instrument {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

/// Errors in a caller-supplied universe.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UniverseError {
    #[error("empty instrument code in category {category}")]
    EmptyCode { category: Category },

    #[error("duplicate instrument {code} in category {category}")]
    DuplicateCode { category: Category, code: String },
}

/// Instruments eligible for one run, grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    entries: BTreeMap<Category, Vec<Instrument>>,
}

impl Universe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one instrument.
    pub fn insert(&mut self, category: Category, code: impl Into<String>, name: impl Into<String>) {
        self.entries
            .entry(category)
            .or_default()
            .push(Instrument::new(code, name));
    }

    /// Builder-style variant of [`Universe::insert`].
    pub fn with(mut self, category: Category, code: impl Into<String>, name: impl Into<String>) -> Self {
        self.insert(category, code, name);
        self
    }

    /// Replace the instruments of one category.
    pub fn set_category(&mut self, category: Category, instruments: Vec<Instrument>) {
        self.entries.insert(category, instruments);
    }

    /// Instruments of one category; empty when the category is absent.
    pub fn instruments(&self, category: Category) -> &[Instrument] {
        self.entries.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.entries.keys().copied()
    }

    /// Total number of instruments across categories.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that every code is non-empty and unique within its category.
    pub fn validate(&self) -> Result<(), UniverseError> {
        for (&category, instruments) in &self.entries {
            let mut seen = HashSet::new();
            for instrument in instruments {
                if instrument.code.trim().is_empty() {
                    return Err(UniverseError::EmptyCode { category });
                }
                if !seen.insert(instrument.code.as_str()) {
                    return Err(UniverseError::DuplicateCode {
                        category,
                        code: instrument.code.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
