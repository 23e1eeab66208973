//! In-memory loader.
//!
//! Holds every bar in memory, keyed by category and code. Used by the CLI to
//! screen a JSON dataset and by tests as a deterministic data source.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use screener_common::{Error, ResultExt};

use super::loader::{DailyQuery, Loader, LoaderError, SortOrder};
use super::{Bar, Category, Instrument, Universe};

/// On-disk dataset: a flat list of instrument series.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub instruments: Vec<DatasetEntry>,
}

/// One instrument series inside a [`Dataset`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub category: Category,
    pub code: String,
    pub name: String,
    /// Bars in any order; the loader sorts them
    pub bars: Vec<Bar>,
}

/// Loader backed by in-memory series.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    /// Series sorted by trade date, newest first
    series: HashMap<(Category, String), Vec<Bar>>,
    /// Listing order per category
    instruments: BTreeMap<Category, Vec<Instrument>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace one instrument series.
    ///
    /// Bars inherit the instrument's code and name and are stored newest first.
    pub fn insert_series(
        &mut self,
        category: Category,
        code: impl Into<String>,
        name: impl Into<String>,
        mut bars: Vec<Bar>,
    ) {
        let code = code.into();
        let name = name.into();
        for bar in &mut bars {
            bar.code.clone_from(&code);
            bar.name.clone_from(&name);
        }
        bars.sort_by(|a, b| b.trade_date.cmp(&a.trade_date));

        let listing = self.instruments.entry(category).or_default();
        match listing.iter_mut().find(|i| i.code == code) {
            Some(existing) => existing.name.clone_from(&name),
            None => listing.push(Instrument::new(code.clone(), name)),
        }
        self.series.insert((category, code), bars);
    }

    /// Builder-style variant of [`MemoryLoader::insert_series`].
    pub fn with_series(
        mut self,
        category: Category,
        code: impl Into<String>,
        name: impl Into<String>,
        bars: Vec<Bar>,
    ) -> Self {
        self.insert_series(category, code, name, bars);
        self
    }

    /// Build a loader from a dataset, rejecting duplicate trade dates.
    pub fn from_dataset(dataset: Dataset) -> screener_common::Result<Self> {
        let mut loader = Self::new();
        for entry in dataset.instruments {
            let mut dates: Vec<_> = entry.bars.iter().map(|b| b.trade_date).collect();
            dates.sort_unstable();
            if let Some(pair) = dates.windows(2).find(|w| w[0] == w[1]) {
                return Err(Error::InvalidInput(format!(
                    "{} {} has two bars dated {}",
                    entry.category, entry.code, pair[0]
                )));
            }
            loader.insert_series(entry.category, entry.code, entry.name, entry.bars);
        }
        Ok(loader)
    }

    /// Read a JSON [`Dataset`] from disk.
    pub fn from_json_file(path: &Path) -> screener_common::Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read dataset from {}", path.display()))?;
        let dataset: Dataset = serde_json::from_str(&content)
            .context(format!("Failed to parse dataset from {}", path.display()))?;
        let loader = Self::from_dataset(dataset)?;
        tracing::info!(
            path = %path.display(),
            series = loader.series.len(),
            "Dataset loaded"
        );
        Ok(loader)
    }

    /// Every stored instrument as a universe.
    pub fn universe(&self) -> Universe {
        let mut universe = Universe::new();
        for (&category, instruments) in &self.instruments {
            universe.set_category(category, instruments.clone());
        }
        universe
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_daily(
        &self,
        category: Category,
        query: &DailyQuery,
    ) -> Result<Vec<Bar>, LoaderError> {
        if query.limit == Some(0) {
            return Err(LoaderError::InvalidRequest("limit must be positive".into()));
        }
        let Some(series) = self.series.get(&(category, query.code.clone())) else {
            return Ok(Vec::new());
        };

        let eligible = series
            .iter()
            .filter(|bar| query.end_date.map_or(true, |end| bar.trade_date <= end));
        let limit = query.limit.unwrap_or(usize::MAX);

        let bars = match query.sort {
            SortOrder::Descending => eligible.take(limit).cloned().collect(),
            SortOrder::Ascending => {
                let mut bars: Vec<Bar> = eligible.cloned().collect();
                bars.reverse();
                bars.truncate(limit);
                bars
            }
        };
        Ok(bars)
    }

    async fn load_instruments(&self, category: Category) -> Result<Vec<Instrument>, LoaderError> {
        Ok(self.instruments.get(&category).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(day: u32, close: f64) -> Bar {
        Bar {
            code: String::new(),
            name: String::new(),
            trade_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: close,
            close,
            high: close,
            low: close,
            volume: 0.0,
            amount: 0.0,
            turnover: 0.0,
            chg_pct: 0.0,
            volume_chg_pct: 0.0,
            amount_chg_pct: 0.0,
        }
    }

    fn loader() -> MemoryLoader {
        MemoryLoader::new().with_series(
            Category::Stock,
            "000001",
            "PAB",
            vec![bar(2, 2.0), bar(5, 5.0), bar(3, 3.0), bar(4, 4.0)],
        )
    }

    #[test]
    fn test_load_daily_descending_with_bound_and_limit() {
        let loader = loader();
        let query = DailyQuery::latest("000001", NaiveDate::from_ymd_opt(2024, 1, 4), 2);
        let bars = tokio_test::block_on(loader.load_daily(Category::Stock, &query)).unwrap();

        let days: Vec<u32> = bars.iter().map(|b| chrono::Datelike::day(&b.trade_date)).collect();
        assert_eq!(days, vec![4, 3]);
        assert!(bars.iter().all(|b| b.code == "000001" && b.name == "PAB"));
    }

    #[test]
    fn test_load_daily_ascending() {
        let loader = loader();
        let query = DailyQuery {
            code: "000001".into(),
            end_date: None,
            sort: SortOrder::Ascending,
            limit: Some(3),
        };
        let bars = tokio_test::block_on(loader.load_daily(Category::Stock, &query)).unwrap();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_unknown_code_and_category() {
        let loader = loader();
        let query = DailyQuery::latest("999999", None, 10);
        let bars = tokio_test::block_on(loader.load_daily(Category::Stock, &query)).unwrap();
        assert!(bars.is_empty());

        let query = DailyQuery::latest("000001", None, 10);
        let bars = tokio_test::block_on(loader.load_daily(Category::Fund, &query)).unwrap();
        assert!(bars.is_empty());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let loader = loader();
        let query = DailyQuery::latest("000001", None, 0);
        let err = tokio_test::block_on(loader.load_daily(Category::Stock, &query)).unwrap_err();
        assert!(matches!(err, LoaderError::InvalidRequest(_)));
    }

    #[test]
    fn test_universe_and_instruments() {
        let mut loader = loader();
        loader.insert_series(Category::Stock, "000001", "Ping An Bank", vec![bar(6, 6.0)]);
        loader.insert_series(Category::Index, "000300", "CSI 300", vec![bar(6, 6.0)]);

        let universe = loader.universe();
        assert_eq!(universe.len(), 2);
        assert_eq!(universe.instruments(Category::Stock)[0].name, "Ping An Bank");

        let listed = tokio_test::block_on(loader.load_instruments(Category::Index)).unwrap();
        assert_eq!(listed, vec![Instrument::new("000300", "CSI 300")]);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        std::fs::write(
            &path,
            r#"{"instruments": [{"category": "fund", "code": "510300", "name": "CSI300 ETF",
                "bars": [{"trade_date": "2024-01-02", "open": 1, "close": 1, "high": 1, "low": 1}]}]}"#,
        )
        .unwrap();

        let loader = MemoryLoader::from_json_file(&path).unwrap();
        assert_eq!(loader.universe().instruments(Category::Fund).len(), 1);
    }

    #[test]
    fn test_duplicate_dates_rejected() {
        let dataset = Dataset {
            instruments: vec![DatasetEntry {
                category: Category::Stock,
                code: "000001".into(),
                name: "PAB".into(),
                bars: vec![bar(2, 1.0), bar(2, 1.5)],
            }],
        };
        let err = MemoryLoader::from_dataset(dataset).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
