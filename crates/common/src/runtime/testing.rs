use std::{
    pin::Pin,
    sync::{
        Arc,
        LazyLock,
    },
    time::{
        Duration,
        SystemTime,
    },
};

use futures::{
    future::FusedFuture,
    Future,
    FutureExt,
};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use tokio::runtime::Builder;

use super::Runtime;

pub static TEST_EPOCH: LazyLock<SystemTime> =
    LazyLock::new(|| SystemTime::UNIX_EPOCH + Duration::from_secs(1620198000));

/// Owns a current-thread tokio runtime with a paused clock, for driving
/// async code from synchronous tests such as proptest bodies.
pub struct TestDriver {
    tokio_runtime: tokio::runtime::Runtime,
    seed: u64,
}

impl TestDriver {
    pub fn new() -> Self {
        Self::new_with_seed(0)
    }

    pub fn new_with_seed(seed: u64) -> Self {
        let tokio_runtime = Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .expect("Failed to create Tokio runtime");
        Self {
            tokio_runtime,
            seed,
        }
    }

    pub fn rt(&self) -> TestRuntime {
        let _guard = self.tokio_runtime.enter();
        TestRuntime::new_with_seed(self.seed)
    }

    pub fn run_until<F: Future>(&self, f: F) -> F::Output {
        self.tokio_runtime.block_on(f)
    }
}

impl Default for TestDriver {
    fn default() -> Self {
        Self::new()
    }
}

struct TestRuntimeState {
    creation_time: tokio::time::Instant,
    rng: ChaCha12Rng,
}

/// Deterministic runtime: time only moves when tokio's paused clock is
/// advanced (or auto-advances because every task is asleep), and randomness
/// comes from a seeded generator.
///
/// Must be created inside a tokio runtime whose clock is paused, e.g. from
/// `#[tokio::test(start_paused = true)]` or via `TestDriver`.
#[derive(Clone)]
pub struct TestRuntime {
    state: Arc<Mutex<TestRuntimeState>>,
}

impl TestRuntime {
    pub fn new() -> Self {
        Self::new_with_seed(0)
    }

    pub fn new_with_seed(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(TestRuntimeState {
                creation_time: tokio::time::Instant::now(),
                rng: ChaCha12Rng::seed_from_u64(seed),
            })),
        }
    }

    pub async fn advance_time(&self, duration: Duration) {
        tokio::time::advance(duration).await
    }

    /// Virtual time elapsed since this runtime was created.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().creation_time.elapsed()
    }
}

impl Default for TestRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for TestRuntime {
    type Instant = tokio::time::Instant;
    type Rng = ChaCha12Rng;

    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>> {
        // NB: `TestRuntime` runs on a tokio runtime with the timer paused, so
        // this sleep suspends until time is manually advanced forward, or the
        // runtime runs out of work to do and auto advances to the next timer.
        Box::pin(tokio::time::sleep(duration).fuse())
    }

    fn system_time(&self) -> SystemTime {
        *TEST_EPOCH + self.elapsed()
    }

    fn monotonic_now(&self) -> tokio::time::Instant {
        tokio::time::Instant::now()
    }

    fn with_rng<R>(&self, f: impl FnOnce(&mut Self::Rng) -> R) -> R {
        let mut state = self.state.lock();
        f(&mut state.rng)
    }
}
