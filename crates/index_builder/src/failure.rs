use common::interval::Interval;
use errors::ErrorMetadata;

/// A build that expected `range` to be entirely unbuilt found progress
/// already recorded over part of it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Records in range {range:?} were already built")]
pub struct RangeAlreadyBuiltError {
    pub range: Interval,
}

impl RangeAlreadyBuiltError {
    pub fn new(range: Interval) -> Self {
        Self { range }
    }

    pub(crate) fn into_anyhow(self) -> anyhow::Error {
        anyhow::Error::new(self).context(ErrorMetadata::range_already_built())
    }
}

/// Why the retry driver stopped.
#[derive(thiserror::Error, Debug)]
pub enum RetryError {
    /// Not a lessen-work failure; retrying would not help.
    #[error(transparent)]
    Fatal(anyhow::Error),
    #[error("Gave up after {attempts} attempts: {source:#}")]
    Exhausted {
        attempts: u32,
        source: anyhow::Error,
    },
}

impl RetryError {
    /// Unwrap to the underlying error so its `ErrorMetadata` and engine
    /// error stay reachable.
    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            RetryError::Fatal(e) => e,
            RetryError::Exhausted { attempts, source } => {
                source.context(format!("Index build gave up after {attempts} attempts"))
            },
        }
    }
}
