//! Strategy registry.
//!
//! Maps strategy names to constructors. Strategies are registered explicitly;
//! [`StrategyRegistry::with_builtin`] registers the ones shipped with this crate.

use std::collections::BTreeMap;
use std::fmt;

use super::{
    CommonParams, RightSideStrategy, ShockRiseStrategy, Strategy, StrategyError, StrategyParams,
    TurnStrategy,
};

/// Builds a strategy with default parameters.
pub type StrategyConstructor = fn() -> Box<dyn Strategy>;

/// Name → constructor table.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    constructors: BTreeMap<&'static str, StrategyConstructor>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in strategy.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("ma_turn", || Box::new(TurnStrategy::new()));
        registry.register("right_side", || Box::new(RightSideStrategy::new()));
        registry.register("shock_rise", || Box::new(ShockRiseStrategy::new()));
        registry
    }

    /// Register a constructor, returning the one it replaced.
    pub fn register(
        &mut self,
        name: &'static str,
        constructor: StrategyConstructor,
    ) -> Option<StrategyConstructor> {
        self.constructors.insert(name, constructor)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&'static str> {
        self.constructors.keys().copied().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Construct a strategy with default parameters.
    pub fn create(&self, name: &str) -> Result<Box<dyn Strategy>, StrategyError> {
        self.constructors
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| StrategyError::UnknownStrategy(name.to_string()))
    }

    /// Construct and prepare a strategy.
    pub fn create_prepared(
        &self,
        name: &str,
        common: CommonParams,
        params: &StrategyParams,
    ) -> Result<Box<dyn Strategy>, StrategyError> {
        let mut strategy = self.create(name)?;
        strategy.prepare(common, params)?;
        tracing::debug!(strategy = %name, params = params.len(), "Strategy prepared");
        Ok(strategy)
    }
}
