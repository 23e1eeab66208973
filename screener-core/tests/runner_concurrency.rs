//! Integration tests for the screening runner.
//!
//! Covers the concurrency bound, failure isolation, shutdown draining, and
//! universe handling, using gated mock strategies and loaders.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as Days, NaiveDate};
use tokio::sync::Semaphore;

use screener_core::data::{Instrument, LoaderError};
use screener_core::{
    Bar, Category, CommonParams, DailyQuery, Loader, MemoryLoader, RunError, RunEvent, Runner,
    RunnerConfig, RunnerState, Strategy, StrategyBase, StrategyError, StrategyParams,
    StrategyResult, Universe,
};

// ============================================================================
// Mocks
// ============================================================================

/// Strategy whose tests block on a gate and can be told to fail or panic.
struct GatedStrategy {
    base: StrategyBase,
    gate: Semaphore,
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    fail_codes: HashSet<String>,
    panic_codes: HashSet<String>,
}

impl GatedStrategy {
    fn new(open: bool) -> Self {
        Self {
            base: StrategyBase::new([Category::Stock, Category::Index]),
            gate: Semaphore::new(if open { Semaphore::MAX_PERMITS } else { 0 }),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            fail_codes: HashSet::new(),
            panic_codes: HashSet::new(),
        }
    }

    fn failing(mut self, code: &str) -> Self {
        self.fail_codes.insert(code.to_string());
        self
    }

    fn panicking(mut self, code: &str) -> Self {
        self.panic_codes.insert(code.to_string());
        self
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Strategy for GatedStrategy {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn base(&self) -> &StrategyBase {
        &self.base
    }

    fn help(&self) -> String {
        "test strategy".into()
    }

    fn prepare(&mut self, _: CommonParams, _: &StrategyParams) -> Result<(), StrategyError> {
        Ok(())
    }

    async fn test(
        &self,
        _loader: &dyn Loader,
        _category: Category,
        code: &str,
        name: &str,
    ) -> Result<Option<StrategyResult>, StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let permit = self.gate.acquire().await;
        drop(permit);
        self.current.fetch_sub(1, Ordering::SeqCst);

        if self.panic_codes.contains(code) {
            panic!("bad bar data for {}", code);
        }
        if self.fail_codes.contains(code) {
            return Err(StrategyError::Load(LoaderError::Corrupt(code.to_string())));
        }
        Ok(Some(StrategyResult::new(code, name)))
    }
}

/// Loader that is always down.
struct DownLoader;

#[async_trait]
impl Loader for DownLoader {
    fn name(&self) -> &str {
        "down"
    }

    async fn load_daily(&self, _: Category, _: &DailyQuery) -> Result<Vec<Bar>, LoaderError> {
        Err(LoaderError::Unavailable("connection refused".into()))
    }

    async fn load_instruments(&self, _: Category) -> Result<Vec<Instrument>, LoaderError> {
        Err(LoaderError::Unavailable("connection refused".into()))
    }
}

/// Loader whose instrument listing blocks until released.
struct SlowListingLoader {
    gate: Semaphore,
    listings: AtomicUsize,
}

impl SlowListingLoader {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            listings: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Loader for SlowListingLoader {
    fn name(&self) -> &str {
        "slow-listing"
    }

    async fn load_daily(&self, _: Category, _: &DailyQuery) -> Result<Vec<Bar>, LoaderError> {
        Ok(flat_bars(5))
    }

    async fn load_instruments(&self, category: Category) -> Result<Vec<Instrument>, LoaderError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await;
        drop(permit);
        Ok(match category {
            Category::Stock => vec![Instrument::new("600000", "SPDB")],
            _ => Vec::new(),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn runner_with(loader: Arc<dyn Loader>, concurrency: usize) -> Arc<Runner> {
    Arc::new(Runner::new(
        loader,
        RunnerConfig {
            concurrency,
            shutdown_timeout: Duration::from_millis(100),
        },
    ))
}

fn runner(concurrency: usize) -> Arc<Runner> {
    runner_with(Arc::new(MemoryLoader::new()), concurrency)
}

fn stocks(count: usize) -> Universe {
    let mut universe = Universe::new();
    for i in 0..count {
        universe.insert(Category::Stock, format!("{:06}", i), format!("Stock {}", i));
    }
    universe
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn flat_bars(days: usize) -> Vec<Bar> {
    let newest = NaiveDate::from_ymd_opt(2024, 6, 28).unwrap();
    (0..days)
        .map(|i| Bar {
            code: String::new(),
            name: String::new(),
            trade_date: newest - Days::days(i as i64),
            open: 10.0,
            close: 10.0,
            high: 10.0,
            low: 10.0,
            volume: 100.0,
            amount: 1000.0,
            turnover: 0.1,
            chg_pct: 0.0,
            volume_chg_pct: 0.0,
            amount_chg_pct: 0.0,
        })
        .collect()
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_tests_never_exceed_concurrency() {
    let strategy = Arc::new(GatedStrategy::new(false));
    let runner = runner(3);
    let universe = stocks(20);

    let handle = tokio::spawn({
        let runner = Arc::clone(&runner);
        let strategy: Arc<dyn Strategy> = strategy.clone();
        async move { runner.run(strategy, Some(&universe)).await }
    });

    wait_until("three blocked tests", || strategy.current() == 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(strategy.current(), 3);
    assert_eq!(runner.state(), RunnerState::Running { in_flight: 3 });

    strategy.release(20);
    let results = handle.await.unwrap().unwrap();

    assert_eq!(results[&Category::Stock].len(), 20);
    assert_eq!(strategy.calls(), 20);
    assert_eq!(strategy.peak(), 3);
    assert_eq!(runner.state(), RunnerState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_permit_serializes() {
    let strategy = Arc::new(GatedStrategy::new(true));
    let runner = runner(1);

    let results = runner.run(strategy.clone(), Some(&stocks(10))).await.unwrap();
    assert_eq!(results[&Category::Stock].len(), 10);
    assert_eq!(strategy.peak(), 1);
}

// ============================================================================
// Failure Isolation
// ============================================================================

#[tokio::test]
async fn test_errors_and_panics_are_isolated() {
    let strategy = Arc::new(
        GatedStrategy::new(true)
            .failing("000001")
            .panicking("000003"),
    );
    let runner = runner(4);

    let results = runner.run(strategy.clone(), Some(&stocks(6))).await.unwrap();

    let mut codes: Vec<_> = results[&Category::Stock].iter().map(|r| r.code.clone()).collect();
    codes.sort();
    assert_eq!(codes, vec!["000000", "000002", "000004", "000005"]);
    assert_eq!(strategy.calls(), 6);
    assert_eq!(runner.state(), RunnerState::Idle);
}

#[tokio::test]
async fn test_loader_failures_are_no_hits() {
    let runner = runner_with(Arc::new(DownLoader), 4);
    let strategy: Arc<dyn Strategy> = Arc::new(screener_core::strategy::RightSideStrategy::new());

    let results = runner.run(strategy, Some(&stocks(3))).await.unwrap();
    assert!(results.is_empty());
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_drains_in_flight_and_refuses_new_work() {
    let strategy = Arc::new(GatedStrategy::new(false));
    let runner = runner(2);

    let handle = tokio::spawn({
        let runner = Arc::clone(&runner);
        let strategy: Arc<dyn Strategy> = strategy.clone();
        async move { runner.run(strategy, Some(&stocks(5))).await }
    });
    wait_until("two blocked tests", || strategy.current() == 2).await;

    // Blocked tests outlive the bounded wait
    assert!(!runner.shutdown().await);
    assert_eq!(runner.state(), RunnerState::Draining { in_flight: 2 });

    let refused = runner.run(strategy.clone(), Some(&stocks(1))).await;
    assert!(matches!(refused, Err(RunError::ShutDown)));
    let refused = runner.fit(strategy.as_ref(), Category::Stock, "000001", "x").await;
    assert!(matches!(refused, Err(RunError::ShutDown)));

    strategy.release(5);
    assert!(runner.shutdown().await);
    assert_eq!(runner.state(), RunnerState::Terminated);

    // Only the two tests already in flight ran
    let results = handle.await.unwrap().unwrap();
    assert_eq!(results[&Category::Stock].len(), 2);
    assert_eq!(strategy.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_waits_for_run_loading_universe() {
    let strategy = Arc::new(GatedStrategy::new(true));
    let loader = Arc::new(SlowListingLoader::new());
    let runner = runner_with(loader.clone(), 2);

    let handle = tokio::spawn({
        let runner = Arc::clone(&runner);
        let strategy: Arc<dyn Strategy> = strategy.clone();
        async move { runner.run(strategy, None).await }
    });
    wait_until("listing started", || loader.listings.load(Ordering::SeqCst) == 1).await;

    // The run is still outstanding while its universe loads
    assert!(!runner.shutdown().await);
    assert_eq!(runner.state(), RunnerState::Draining { in_flight: 0 });
    assert!(!handle.is_finished());

    loader.gate.add_permits(Semaphore::MAX_PERMITS);
    assert!(runner.shutdown().await);
    assert_eq!(runner.state(), RunnerState::Terminated);

    // Draining stopped scheduling, so nothing was tested
    let results = handle.await.unwrap().unwrap();
    assert!(results.is_empty());
    assert_eq!(strategy.calls(), 0);
}

#[tokio::test]
async fn test_shutdown_events() {
    let runner = runner(2);
    let mut events = runner.subscribe();

    assert!(runner.shutdown().await);
    assert!(matches!(events.recv().await.unwrap(), RunEvent::Draining { in_flight: 0 }));
    assert!(matches!(events.recv().await.unwrap(), RunEvent::Terminated));
}

// ============================================================================
// Universe & Fit
// ============================================================================

#[tokio::test]
async fn test_results_grouped_by_accepted_category() {
    let strategy = Arc::new(GatedStrategy::new(true));
    let runner = runner(4);
    let universe = Universe::new()
        .with(Category::Stock, "600000", "SPDB")
        .with(Category::Index, "000300", "CSI 300")
        .with(Category::Index, "000905", "CSI 500")
        .with(Category::Bond, "019547", "Treasury");

    let results = runner.run(strategy.clone(), Some(&universe)).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[&Category::Stock].len(), 1);
    assert_eq!(results[&Category::Index].len(), 2);
    assert!(!results.contains_key(&Category::Bond));
    assert_eq!(strategy.calls(), 3);
}

#[tokio::test]
async fn test_default_universe_from_loader() {
    let loader = MemoryLoader::new()
        .with_series(Category::Stock, "600000", "SPDB", flat_bars(5))
        .with_series(Category::Stock, "600036", "CMB", flat_bars(5))
        .with_series(Category::Fund, "510300", "CSI300 ETF", flat_bars(5));
    let runner = runner_with(Arc::new(loader), 4);
    let strategy = Arc::new(GatedStrategy::new(true));

    let results = runner.run(strategy.clone(), None).await.unwrap();

    assert_eq!(results[&Category::Stock].len(), 2);
    assert_eq!(strategy.calls(), 2);
}

#[tokio::test]
async fn test_default_universe_listing_failure_propagates() {
    let runner = runner_with(Arc::new(DownLoader), 4);
    let strategy: Arc<dyn Strategy> = Arc::new(GatedStrategy::new(true));

    let err = runner.run(strategy, None).await.unwrap_err();
    assert!(matches!(err, RunError::Universe { source: LoaderError::Unavailable(_), .. }));
}

#[tokio::test]
async fn test_malformed_universe_is_rejected() {
    let strategy = Arc::new(GatedStrategy::new(true));
    let runner = runner(4);
    let universe = stocks(2).with(Category::Stock, "000001", "duplicate");

    let err = runner.run(strategy.clone(), Some(&universe)).await.unwrap_err();
    assert!(matches!(err, RunError::InvalidUniverse(_)));
    assert_eq!(strategy.calls(), 0);
}

#[tokio::test]
async fn test_fit_checks_category_and_isolates_failures() {
    let strategy = GatedStrategy::new(true).failing("000002");
    let runner = runner(4);

    let hit = runner.fit(&strategy, Category::Index, "000300", "CSI 300").await.unwrap();
    assert_eq!(hit.unwrap().code, "000300");

    let err = runner.fit(&strategy, Category::Fund, "510300", "ETF").await.unwrap_err();
    assert!(matches!(err, RunError::CategoryNotAccepted { category: Category::Fund, .. }));

    let miss = runner.fit(&strategy, Category::Stock, "000002", "x").await.unwrap();
    assert!(miss.is_none());
}

#[tokio::test]
async fn test_progress_events() {
    let strategy = Arc::new(GatedStrategy::new(true));
    let runner = runner(2);
    let mut events = runner.subscribe();

    runner.run(strategy, Some(&stocks(3))).await.unwrap();

    let run_id = match events.recv().await.unwrap() {
        RunEvent::Started { run_id, total, strategy } => {
            assert_eq!(total, 3);
            assert_eq!(strategy, "gated");
            run_id
        }
        other => panic!("unexpected event {:?}", other),
    };

    let mut done = Vec::new();
    for _ in 0..3 {
        match events.recv().await.unwrap() {
            RunEvent::Progress { run_id: id, done: n, total, hit, .. } => {
                assert_eq!(id, run_id);
                assert_eq!(total, 3);
                assert!(hit);
                done.push(n);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    done.sort();
    assert_eq!(done, vec![1, 2, 3]);

    assert!(matches!(
        events.recv().await.unwrap(),
        RunEvent::Finished { evaluated: 3, hits: 3, .. }
    ));
}
