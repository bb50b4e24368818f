//! Runtime trait for abstracting away OS-esque features and allow different
//! implementations for test and prod.

use std::{
    ops::{
        Add,
        Sub,
    },
    pin::Pin,
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};

use futures::future::FusedFuture;
use rand::Rng;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// A Runtime can be considered somewhat like an operating system abstraction
/// for our codebase. Time and randomness should operate quite differently
/// between test and prod, e.g., we don't want `wait` to actually sleep in
/// test but instead just to advance local time. Code that sleeps, reads a
/// clock, or draws random numbers is parameterized by a runtime so tests stay
/// deterministic.
pub trait Runtime: Clone + Sync + Send + 'static {
    /// `std::time::Instant`-like type returned by `monotonic_now()`.
    type Instant: RuntimeInstant;

    /// Source of randomness associated with the runtime.
    type Rng: Rng;

    /// Sleep for the given duration.
    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>>;

    /// Return (a potentially-virtualized) system time. Compare with
    /// `std::time::UNIX_EPOCH` to obtain a Unix timestamp.
    fn system_time(&self) -> SystemTime;

    fn unix_timestamp(&self) -> Duration {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }

    /// Return (a potentially-virtualized) reading from a monotonic clock.
    fn monotonic_now(&self) -> Self::Instant;

    /// Use the runtime's source of randomness.
    fn with_rng<R>(&self, f: impl FnOnce(&mut Self::Rng) -> R) -> R;
}

/// Abstraction over different `Instant` types associated with a `Runtime`.
pub trait RuntimeInstant:
    Add<Duration, Output = Self> + Clone + Sub<Output = Duration> + Sync + Send + Ord + Eq
{
    fn elapsed(&self) -> Duration;
}

impl RuntimeInstant for std::time::Instant {
    fn elapsed(&self) -> Duration {
        std::time::Instant::elapsed(self)
    }
}

impl RuntimeInstant for tokio::time::Instant {
    fn elapsed(&self) -> Duration {
        tokio::time::Instant::elapsed(self)
    }
}
