//! Bounded-concurrency screening runner.
//!
//! The `Runner` fans one prepared strategy out over a universe of instruments
//! and collects the hits by category. At most `concurrency` tests are in
//! flight at once; each holds its permit for its whole duration, including
//! time spent waiting on the loader.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──run/fit──▶ Running ──shutdown──▶ Draining ──in-flight done──▶ Terminated
//!   ▲                  │
//!   └──────────────────┘
//! ```
//!
//! # Result Ordering
//!
//! Within a category, results appear in the order their tests completed,
//! which varies between runs. Sort by code if a stable order is needed.

use futures_util::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument as _};

use screener_common::logging::generate_run_id;
use screener_common::Config;

use crate::data::{Category, Instrument, Loader, LoaderError, Universe, UniverseError};
use crate::strategy::{Strategy, StrategyResult};

/// Hits grouped by category. Categories without hits are absent.
pub type RunResults = BTreeMap<Category, Vec<StrategyResult>>;

// ============================================================================
// Configuration
// ============================================================================

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum concurrent tests
    pub concurrency: usize,
    /// Bounded wait for in-flight tests during `shutdown`
    pub shutdown_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 50,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl RunnerConfig {
    /// Build from the runner section of the global config
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.runner.concurrency,
            shutdown_timeout: Duration::from_secs(config.runner.shutdown_timeout_secs),
        }
    }
}

// ============================================================================
// State, Events, Errors
// ============================================================================

/// Observable runner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunnerState {
    /// Accepting work, nothing in flight
    Idle,
    /// Accepting work, tests in flight
    Running { in_flight: usize },
    /// Refusing new work, waiting for in-flight tests
    Draining { in_flight: usize },
    /// Shut down
    Terminated,
}

/// Events emitted by the runner
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A run scheduled its first test
    Started {
        run_id: String,
        strategy: String,
        total: usize,
    },
    /// One test finished
    Progress {
        run_id: String,
        category: Category,
        code: String,
        name: String,
        done: usize,
        total: usize,
        hit: bool,
    },
    /// A run returned
    Finished {
        run_id: String,
        evaluated: usize,
        hits: usize,
    },
    /// `shutdown` was called
    Draining { in_flight: usize },
    /// All in-flight work completed after `shutdown`
    Terminated,
}

/// Errors that abort a whole `run` or `fit` call.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("runner is shut down")]
    ShutDown,

    #[error("strategy {strategy} does not accept category {category}")]
    CategoryNotAccepted {
        strategy: String,
        category: Category,
    },

    #[error("invalid universe: {0}")]
    InvalidUniverse(#[from] UniverseError),

    #[error("failed to list {category} instruments: {source}")]
    Universe {
        category: Category,
        #[source]
        source: LoaderError,
    },
}

const OPEN: u8 = 0;
const DRAINING: u8 = 1;
const TERMINATED: u8 = 2;

// ============================================================================
// In-flight tracking
// ============================================================================

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.current() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Screening runner. Long-lived; reuse it across runs until `shutdown`.
pub struct Runner {
    loader: Arc<dyn Loader>,
    config: RunnerConfig,
    permits: Arc<Semaphore>,
    /// Tests currently executing
    in_flight: Arc<InFlight>,
    /// Outstanding `run` calls, including universe loading and scheduling
    runs: Arc<InFlight>,
    lifecycle: AtomicU8,
    event_tx: broadcast::Sender<RunEvent>,
}

impl Runner {
    /// Create a runner. A concurrency of zero is treated as one.
    pub fn new(loader: Arc<dyn Loader>, config: RunnerConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        let (event_tx, _) = broadcast::channel(1024);

        Self {
            loader,
            config: RunnerConfig {
                concurrency,
                ..config
            },
            permits: Arc::new(Semaphore::new(concurrency)),
            in_flight: Arc::new(InFlight::default()),
            runs: Arc::new(InFlight::default()),
            lifecycle: AtomicU8::new(OPEN),
            event_tx,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Subscribe to runner events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.event_tx.subscribe()
    }

    /// Get current state
    pub fn state(&self) -> RunnerState {
        let in_flight = self.in_flight.current();
        match self.lifecycle.load(Ordering::SeqCst) {
            OPEN if in_flight == 0 && self.runs.current() == 0 => RunnerState::Idle,
            OPEN => RunnerState::Running { in_flight },
            DRAINING => RunnerState::Draining { in_flight },
            _ => RunnerState::Terminated,
        }
    }

    fn ensure_open(&self) -> Result<(), RunError> {
        if self.lifecycle.load(Ordering::SeqCst) == OPEN {
            Ok(())
        } else {
            Err(RunError::ShutDown)
        }
    }

    /// Screen every accepted instrument of `universe` with `strategy`.
    ///
    /// Without a universe, every instrument the loader lists for the accepted
    /// categories is screened. Failures of individual tests are logged and
    /// count as no hit. If `shutdown` is called mid-run, no further tests are
    /// scheduled and the hits of the tests already started are returned.
    pub async fn run(
        &self,
        strategy: Arc<dyn Strategy>,
        universe: Option<&Universe>,
    ) -> Result<RunResults, RunError> {
        let _run = self.runs.enter();
        self.ensure_open()?;
        let run_id = generate_run_id();
        let span = info_span!("run", run_id = %run_id, strategy = strategy.name());
        self.run_inner(run_id, strategy, universe)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: String,
        strategy: Arc<dyn Strategy>,
        universe: Option<&Universe>,
    ) -> Result<RunResults, RunError> {
        let loaded;
        let universe = match universe {
            Some(universe) => universe,
            None => {
                loaded = self.default_universe(strategy.as_ref()).await?;
                &loaded
            }
        };
        universe.validate()?;

        let jobs: Vec<(Category, Instrument)> = universe
            .categories()
            .filter(|&category| {
                let accepted = strategy.accepts(category);
                if !accepted {
                    debug!(category = %category, "Category not accepted, skipping");
                }
                accepted
            })
            .flat_map(|category| {
                universe
                    .instruments(category)
                    .iter()
                    .map(move |instrument| (category, instrument.clone()))
            })
            .collect();

        let total = jobs.len();
        info!(total, concurrency = self.config.concurrency, "Screening run started");
        let _ = self.event_tx.send(RunEvent::Started {
            run_id: run_id.clone(),
            strategy: strategy.name().to_string(),
            total,
        });

        let done = Arc::new(AtomicUsize::new(0));
        let mut tasks: JoinSet<(Category, Option<StrategyResult>)> = JoinSet::new();

        for (category, instrument) in jobs {
            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(
                        scheduled = tasks.len(),
                        total,
                        "Runner draining, remaining instruments not scheduled"
                    );
                    break;
                }
            };
            let guard = self.in_flight.enter();
            let strategy = Arc::clone(&strategy);
            let loader = Arc::clone(&self.loader);
            let done = Arc::clone(&done);
            let event_tx = self.event_tx.clone();
            let run_id = run_id.clone();

            tasks.spawn(
                async move {
                    let result =
                        evaluate(strategy.as_ref(), loader.as_ref(), category, &instrument).await;
                    let done = done.fetch_add(1, Ordering::SeqCst) + 1;
                    let _ = event_tx.send(RunEvent::Progress {
                        run_id,
                        category,
                        code: instrument.code,
                        name: instrument.name,
                        done,
                        total,
                        hit: result.is_some(),
                    });
                    drop(permit);
                    drop(guard);
                    (category, result)
                }
                .in_current_span(),
            );
        }

        let mut results = RunResults::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((category, Some(result))) => results.entry(category).or_default().push(result),
                Ok((_, None)) => {}
                Err(e) => error!(error = %e, "Screening task aborted"),
            }
        }

        let evaluated = done.load(Ordering::SeqCst);
        let hits = results.values().map(Vec::len).sum();
        info!(evaluated, hits, "Screening run finished");
        let _ = self.event_tx.send(RunEvent::Finished {
            run_id,
            evaluated,
            hits,
        });
        Ok(results)
    }

    async fn default_universe(&self, strategy: &dyn Strategy) -> Result<Universe, RunError> {
        let mut universe = Universe::new();
        for &category in strategy.accept() {
            let instruments = self
                .loader
                .load_instruments(category)
                .await
                .map_err(|source| RunError::Universe { category, source })?;
            debug!(
                category = %category,
                count = instruments.len(),
                loader = self.loader.name(),
                "Universe defaulted from loader"
            );
            universe.set_category(category, instruments);
        }
        Ok(universe)
    }

    /// Screen a single instrument, bypassing the concurrency limit.
    pub async fn fit(
        &self,
        strategy: &dyn Strategy,
        category: Category,
        code: &str,
        name: &str,
    ) -> Result<Option<StrategyResult>, RunError> {
        let _guard = self.in_flight.enter();
        self.ensure_open()?;
        if !strategy.accepts(category) {
            return Err(RunError::CategoryNotAccepted {
                strategy: strategy.name().to_string(),
                category,
            });
        }

        let instrument = Instrument::new(code, name);
        Ok(evaluate(strategy, self.loader.as_ref(), category, &instrument).await)
    }

    /// Stop accepting work and wait for in-flight tests.
    ///
    /// Returns `true` once no `run` or test is outstanding, or `false` if the configured
    /// timeout elapsed first. Calling again after `false` keeps waiting.
    pub async fn shutdown(&self) -> bool {
        match self
            .lifecycle
            .compare_exchange(OPEN, DRAINING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                self.permits.close();
                let in_flight = self.in_flight.current();
                info!(in_flight, "Runner draining");
                let _ = self.event_tx.send(RunEvent::Draining { in_flight });
            }
            Err(TERMINATED) => return true,
            Err(_) => {}
        }

        let drained = async {
            self.runs.wait_idle().await;
            self.in_flight.wait_idle().await;
        };
        match tokio::time::timeout(self.config.shutdown_timeout, drained).await {
            Ok(()) => {
                self.lifecycle.store(TERMINATED, Ordering::SeqCst);
                info!("Runner terminated");
                let _ = self.event_tx.send(RunEvent::Terminated);
                true
            }
            Err(_) => {
                warn!(
                    in_flight = self.in_flight.current(),
                    runs = self.runs.current(),
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "Shutdown timed out with tests still in flight"
                );
                false
            }
        }
    }
}

/// Run one test, turning errors and panics into a logged no-hit.
async fn evaluate(
    strategy: &dyn Strategy,
    loader: &dyn Loader,
    category: Category,
    instrument: &Instrument,
) -> Option<StrategyResult> {
    let outcome = AssertUnwindSafe(strategy.test(loader, category, &instrument.code, &instrument.name))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(result)) => {
            debug!(
                code = %instrument.code,
                name = %instrument.name,
                category = %category,
                hit = result.is_some(),
                "Instrument tested"
            );
            result
        }
        Ok(Err(e)) => {
            warn!(
                code = %instrument.code,
                name = %instrument.name,
                category = %category,
                error = %e,
                "Strategy test failed, treating as no hit"
            );
            None
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(
                code = %instrument.code,
                name = %instrument.name,
                category = %category,
                panic = %message,
                "Strategy test panicked, treating as no hit"
            );
            None
        }
    }
}
