//! Upstream election strategies.
//!
//! A [`Balancer`] picks one [`Target`] out of a route's upstream set for every
//! proxied request. Implementations are shared across request tasks and must
//! tolerate concurrent `elect` calls. Strategies are resolved by name through
//! [`BalancerFactory`] when a route is built, so an unknown algorithm fails the
//! configuration load rather than a request.
use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;

use crate::config::Target;

/// Errors returned while electing an upstream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BalancerError {
    #[error("can not elect a backend from an empty list")]
    EmptyBackendList,

    #[error("total weight of the targets must be greater than zero")]
    ZeroWeight,

    #[error("unsupported balancing algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Trait defining the interface for load balancing strategies
pub trait Balancer: Send + Sync + 'static {
    /// Elect one target out of `targets`.
    fn elect<'a>(&self, targets: &'a [Target]) -> Result<&'a Target, BalancerError>;

    /// Create a new instance of this strategy as a boxed trait object
    fn boxed(self) -> Box<dyn Balancer>
    where
        Self: Sized,
    {
        Box::new(self)
    }
}

/// Round-robin strategy: visits targets in order, wrapping around.
pub struct RoundRobinBalancer {
    cursor: AtomicUsize,
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Balancer for RoundRobinBalancer {
    fn elect<'a>(&self, targets: &'a [Target]) -> Result<&'a Target, BalancerError> {
        if targets.is_empty() {
            return Err(BalancerError::EmptyBackendList);
        }
        let position = self.cursor.fetch_add(1, Ordering::SeqCst);
        Ok(&targets[position % targets.len()])
    }
}

/// Weighted random strategy.
///
/// Draws `r` in `[0, total)` and returns the first target whose cumulative
/// weight exceeds `r`. Negative weights count as zero. A single-target list
/// always resolves to that target regardless of its weight.
pub struct WeightBalancer {
    // None draws from the thread-local generator
    rng: Option<Mutex<StdRng>>,
}

impl Default for WeightBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightBalancer {
    pub fn new() -> Self {
        Self { rng: None }
    }

    /// A balancer drawing from a deterministic generator seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    fn draw(&self, upper: i64) -> i64 {
        match &self.rng {
            Some(rng) => rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .random_range(0..upper),
            None => rand::rng().random_range(0..upper),
        }
    }
}

impl Balancer for WeightBalancer {
    fn elect<'a>(&self, targets: &'a [Target]) -> Result<&'a Target, BalancerError> {
        match targets {
            [] => return Err(BalancerError::EmptyBackendList),
            [only] => return Ok(only),
            _ => {}
        }

        let total: i64 = targets.iter().map(|t| i64::from(t.weight.max(0))).sum();
        if total <= 0 {
            return Err(BalancerError::ZeroWeight);
        }

        let r = self.draw(total);
        let mut cumulative = 0i64;
        for target in targets {
            cumulative += i64::from(target.weight.max(0));
            if cumulative > r {
                return Ok(target);
            }
        }

        // r < total, so the walk above always returns
        Err(BalancerError::ZeroWeight)
    }
}

type BalancerConstructor = fn() -> Box<dyn Balancer>;

/// Algorithm name to constructor table.
const ALGORITHMS: &[(&str, BalancerConstructor)] = &[
    ("roundrobin", || RoundRobinBalancer::new().boxed()),
    ("weight", || WeightBalancer::new().boxed()),
];

/// Factory for creating balancers from their configured algorithm name
pub struct BalancerFactory;

impl BalancerFactory {
    /// Build the balancer registered under `algorithm`.
    pub fn create(algorithm: &str) -> Result<Box<dyn Balancer>, BalancerError> {
        ALGORITHMS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(algorithm))
            .map(|(_, constructor)| constructor())
            .ok_or_else(|| BalancerError::UnsupportedAlgorithm(algorithm.to_string()))
    }

    /// Whether `algorithm` names a known strategy.
    pub fn is_supported(algorithm: &str) -> bool {
        ALGORITHMS
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(algorithm))
    }

    /// Names of every registered algorithm.
    pub fn algorithms() -> impl Iterator<Item = &'static str> {
        ALGORITHMS.iter().map(|(name, _)| *name)
    }
}
