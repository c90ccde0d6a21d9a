use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use rand::{Rng, SeedableRng, rngs::StdRng};
use url::Url;

/// Per-route backend selection. A closed set of strategies behind one
/// `pick` operation; configuration validation guarantees a non-empty pool.
pub struct LoadBalancer {
    backends: Vec<Url>,
    strategy: Strategy,
}

enum Strategy {
    Single,
    RoundRobin(AtomicUsize),
    Random(Mutex<StdRng>),
}

impl LoadBalancer {
    /// Always `backends[0]`.
    pub fn single(backends: Vec<Url>) -> Self {
        Self::with_strategy(backends, Strategy::Single)
    }

    /// Post-incremented counter modulo the pool size: the i-th call
    /// (0-indexed) yields `backends[i mod n]`. Safe under parallel calls.
    pub fn round_robin(backends: Vec<Url>) -> Self {
        Self::with_strategy(backends, Strategy::RoundRobin(AtomicUsize::new(0)))
    }

    /// Uniform pick from a PRNG seeded deterministically, so a fixed seed
    /// reproduces the same selection sequence.
    pub fn random(backends: Vec<Url>, seed: u64) -> Self {
        Self::with_strategy(
            backends,
            Strategy::Random(Mutex::new(StdRng::seed_from_u64(seed))),
        )
    }

    fn with_strategy(backends: Vec<Url>, strategy: Strategy) -> Self {
        debug_assert!(!backends.is_empty());
        Self { backends, strategy }
    }

    pub fn pick(&self) -> &Url {
        match &self.strategy {
            Strategy::Single => &self.backends[0],
            Strategy::RoundRobin(counter) => {
                let i = counter.fetch_add(1, Ordering::Relaxed);
                &self.backends[i % self.backends.len()]
            }
            Strategy::Random(rng) => {
                let idx = rng
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .gen_range(0..self.backends.len());
                &self.backends[idx]
            }
        }
    }
}
