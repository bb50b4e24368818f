use std::time::Duration;

use common::knobs::{
    INDEX_BUILD_INITIAL_BACKOFF,
    INDEX_BUILD_MAX_BACKOFF,
    INDEX_BUILD_MAX_RETRIES,
    INDEX_BUILD_RECORDS_PER_SECOND,
    INDEX_BUILD_RECORD_LIMIT,
};
use errors::ErrorMetadata;

/// Disables the cap it is assigned to.
pub const UNLIMITED: u32 = u32::MAX;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexBuildConfig {
    /// Records scanned per transaction before adaptive shrinking.
    pub limit: u32,
    /// Attempts per retried unit of work.
    pub max_retries: u32,
    pub records_per_second: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for IndexBuildConfig {
    fn default() -> Self {
        Self {
            limit: *INDEX_BUILD_RECORD_LIMIT,
            max_retries: *INDEX_BUILD_MAX_RETRIES,
            records_per_second: *INDEX_BUILD_RECORDS_PER_SECOND,
            initial_backoff: *INDEX_BUILD_INITIAL_BACKOFF,
            max_backoff: *INDEX_BUILD_MAX_BACKOFF,
        }
    }
}

impl IndexBuildConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("limit", self.limit),
            ("max_retries", self.max_retries),
            ("records_per_second", self.records_per_second),
        ] {
            anyhow::ensure!(
                value > 0,
                ErrorMetadata::bad_request(
                    "InvalidIndexBuildConfig",
                    format!("{name} must be positive, got {value}"),
                )
            );
        }
        anyhow::ensure!(
            self.initial_backoff <= self.max_backoff,
            ErrorMetadata::bad_request(
                "InvalidIndexBuildConfig",
                format!(
                    "initial_backoff {:?} exceeds max_backoff {:?}",
                    self.initial_backoff, self.max_backoff
                ),
            )
        );
        Ok(())
    }

    /// How long to pause after a batch of `limit` records to stay under
    /// `records_per_second`.
    pub fn throttle_delay(&self, limit: u32) -> Duration {
        if self.records_per_second == UNLIMITED {
            return Duration::ZERO;
        }
        Duration::from_millis(1000 * u64::from(limit) / u64::from(self.records_per_second))
    }
}
