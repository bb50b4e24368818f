//! Tunable limits and parameters for index builds.
//!
//! Every knob here should have a comment explaining what it's for and the
//! upper/lower bounds if applicable so an operator can adjust these safely.
//!
//! Each knob can be overridden with an environment variable of the same name.
#![deny(missing_docs)]

use std::{
    sync::LazyLock,
    time::Duration,
};

use cmd_util::env::env_config;

/// Initial number of records an index build processes per transaction. The
/// builder shrinks this on its own when transactions do too much work, so it
/// only needs to be a reasonable starting point. Must be positive.
pub static INDEX_BUILD_RECORD_LIMIT: LazyLock<u32> =
    LazyLock::new(|| env_config("INDEX_BUILD_RECORD_LIMIT", 100));

/// Maximum number of attempts for one unit of index build work before the
/// last error is surfaced. Must be positive.
pub static INDEX_BUILD_MAX_RETRIES: LazyLock<u32> =
    LazyLock::new(|| env_config("INDEX_BUILD_MAX_RETRIES", 100));

/// Target throughput of an index build, in records per second. The build
/// sleeps between transactions to stay under this rate. `u32::MAX` disables
/// throttling.
pub static INDEX_BUILD_RECORDS_PER_SECOND: LazyLock<u32> =
    LazyLock::new(|| env_config("INDEX_BUILD_RECORDS_PER_SECOND", 10_000));

/// Initial backoff after an index build transaction did too much work.
pub static INDEX_BUILD_INITIAL_BACKOFF: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("INDEX_BUILD_INITIAL_BACKOFF_MS", 10)));

/// Maximum exponential backoff when index build transactions repeatedly do
/// too much work.
pub static INDEX_BUILD_MAX_BACKOFF: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("INDEX_BUILD_MAX_BACKOFF_MS", 1000)));

/// How often a long running sweep logs its progress.
pub static INDEX_BUILD_PROGRESS_LOG_INTERVAL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("INDEX_BUILD_PROGRESS_LOG_INTERVAL_SECS", 60)));

/// Number of tokio worker threads for the production runtime. Zero uses
/// tokio's default of one per core.
pub static RUNTIME_WORKER_THREADS: LazyLock<usize> =
    LazyLock::new(|| env_config("RUNTIME_WORKER_THREADS", 0));
