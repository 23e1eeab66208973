//! Loader abstraction for daily bars and instrument listings.
//!
//! The screener never talks to a store directly. Everything a strategy needs
//! comes through the `Loader` trait, which is shared read-only by every
//! concurrently running test.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use super::{Bar, Category, Instrument};

// ============================================================================
// Query
// ============================================================================

/// Ordering of returned bars by trade date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Most recent first (index 0 is the latest bar)
    #[default]
    Descending,
    Ascending,
}

/// Daily-bar query for one instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyQuery {
    /// Instrument code
    pub code: String,
    /// Inclusive upper bound on trade date
    pub end_date: Option<NaiveDate>,
    /// Requested ordering
    pub sort: SortOrder,
    /// Maximum number of bars
    pub limit: Option<usize>,
}

impl DailyQuery {
    /// The `limit` most recent bars on or before `end_date`, newest first.
    pub fn latest(code: impl Into<String>, end_date: Option<NaiveDate>, limit: usize) -> Self {
        Self {
            code: code.into(),
            end_date,
            sort: SortOrder::Descending,
            limit: Some(limit),
        }
    }
}

// ============================================================================
// Loader Error
// ============================================================================

/// Errors returned by loaders.
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// Backing store unreachable or failing
    #[error("loader unavailable: {0}")]
    Unavailable(String),

    /// The loader has no source for this category
    #[error("unsupported category: {0}")]
    UnsupportedCategory(Category),

    /// Invalid query parameters
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Stored data could not be decoded
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

impl LoaderError {
    /// Check if the error is transient (worth retrying later)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

// ============================================================================
// Loader Trait
// ============================================================================

/// Source of daily bars and instrument listings.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Loader name for logs (e.g., "memory", "mongo")
    fn name(&self) -> &str;

    /// Load daily bars of one instrument.
    ///
    /// May return fewer bars than `query.limit`; an unknown code yields an
    /// empty vector rather than an error.
    async fn load_daily(
        &self,
        category: Category,
        query: &DailyQuery,
    ) -> Result<Vec<Bar>, LoaderError>;

    /// List every instrument of a category. Used to default the universe.
    async fn load_instruments(&self, category: Category) -> Result<Vec<Instrument>, LoaderError>;
}
