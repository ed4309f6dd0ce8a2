//! Announcement turn-taking
//!
//! Hosts share the announce load in proportion to the number of prefixes
//! they own versus the number they have learned from neighbors, so a host
//! that already knows most of the segment speaks rarely.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::trace;

/// Prefix counts feeding the turn-taking decision
///
/// Each counter is independently atomic; readers may observe a
/// local/discovered pair from different moments.
#[derive(Debug, Default)]
pub struct PrefixCounters {
    local: AtomicU32,
    discovered: AtomicU32,
    last_total: AtomicU32,
}

impl PrefixCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(&self) -> u32 {
        self.local.load(Ordering::Relaxed)
    }

    pub fn discovered(&self) -> u32 {
        self.discovered.load(Ordering::Relaxed)
    }

    /// Replace the local count after re-reading the local table
    pub fn set_local(&self, n: u32) {
        self.local.store(n, Ordering::Relaxed);
    }

    /// Replace the discovered count after re-reading the main table
    pub fn set_discovered(&self, n: u32) {
        self.discovered.store(n, Ordering::Relaxed);
    }

    pub fn add_discovered(&self, n: u32) {
        self.discovered.fetch_add(n, Ordering::Relaxed);
    }

    /// Whether local + discovered moved since the previous call
    ///
    /// The first call reports a change whenever the total is nonzero.
    pub fn check_total_change(&self) -> bool {
        let total = self.local().saturating_add(self.discovered());
        let previous = self.last_total.swap(total, Ordering::Relaxed);
        previous != total
    }
}

/// Probability that this host takes the current turn
pub fn turn_probability(local: u32, discovered: u32) -> f64 {
    match (local, discovered) {
        (0, _) => 0.0,
        (_, 0) => 1.0,
        (l, d) => l as f64 / (l as f64 + d as f64),
    }
}

/// Random draw weighted by `turn_probability`
pub fn is_my_turn<R: Rng + ?Sized>(local: u32, discovered: u32, rng: &mut R) -> bool {
    let p = turn_probability(local, discovered);
    if p <= 0.0 {
        false
    } else if p >= 1.0 {
        true
    } else {
        rng.gen_bool(p)
    }
}

/// Turn-taking decisions drawn from a shared counter set
#[derive(Debug)]
pub struct TurnTaking {
    counters: Arc<PrefixCounters>,
    rng: Mutex<StdRng>,
}

impl TurnTaking {
    pub fn new(counters: Arc<PrefixCounters>) -> Self {
        Self {
            counters,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic draws for tests
    pub fn with_seed(counters: Arc<PrefixCounters>, seed: u64) -> Self {
        Self {
            counters,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn counters(&self) -> &PrefixCounters {
        &self.counters
    }

    /// Whether to speak now given the current counters
    pub fn my_turn(&self) -> bool {
        is_my_turn(
            self.counters.local(),
            self.counters.discovered(),
            &mut *self.rng.lock(),
        )
    }

    /// Periodic announce decision: announce when the prefix total moved,
    /// otherwise take a weighted turn
    pub fn should_try_announce(&self) -> bool {
        let changed = self.counters.check_total_change();
        let announce = changed || self.my_turn();
        trace!(
            local = self.counters.local(),
            discovered = self.counters.discovered(),
            changed,
            announce,
            "Turn-taking decision"
        );
        announce
    }
}

#[cfg(test)]
mod tests {
    use super::*;


    #[test]
    fn test_probability_edges() {
        assert_eq!(turn_probability(0, 0), 0.0);
        assert_eq!(turn_probability(0, 5), 0.0);
        assert_eq!(turn_probability(3, 0), 1.0);
        assert!((turn_probability(1, 3) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_never_and_always() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(!is_my_turn(0, 10, &mut rng));
            assert!(is_my_turn(4, 0, &mut rng));
        }
    }

    #[test]
    fn test_weighted_turns_roughly_proportional() {
        let mut rng = StdRng::seed_from_u64(42);
        let hits = (0..10_000).filter(|_| is_my_turn(1, 3, &mut rng)).count();
        assert!((2_000..3_000).contains(&hits), "hits = {}", hits);
    }

    #[test]
    fn test_total_change_detection() {
        let counters = PrefixCounters::new();
        assert!(!counters.check_total_change());
        counters.set_local(2);
        assert!(counters.check_total_change());
        assert!(!counters.check_total_change());
        counters.add_discovered(1);
        assert!(counters.check_total_change());
        counters.set_discovered(1);
        assert!(!counters.check_total_change());
    }

    #[test]
    fn test_should_try_announce_after_change() {
        let counters = Arc::new(PrefixCounters::new());
        let turns = TurnTaking::with_seed(counters.clone(), 1);
        counters.set_local(1);
        counters.set_discovered(1_000_000);
        assert!(turns.should_try_announce());
    }
}
