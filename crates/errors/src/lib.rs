use std::borrow::Cow;

/// ErrorMetadata object can be attached to an anyhow error chain via
/// `.context(e /*ErrorMetadata*/)`. It tags errors with the information the
/// index builder uses to decide whether a failure is a configuration mistake,
/// a broken invariant, or something worth retrying.
///
/// The short_msg is a tag that is resilient to changes in copy, so tests and
/// log filters can match on it. The msg is the descriptive, human readable
/// message.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    /// The error code associated with this ErrorMetadata
    pub code: ErrorCode,
    /// short ScreamingCamelCase. Usable in tests for string matching.
    /// Eg IndexNotInMetadata
    pub short_msg: Cow<'static, str>,
    /// human readable - developer facing. Should be longer and descriptive.
    pub msg: Cow<'static, str>,
}

#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A caller-supplied parameter is out of range.
    BadRequest,
    /// Something referenced by stored data does not exist.
    NotFound,
    /// An index, record type or store was resolved against a different
    /// metadata snapshot than the one the caller supplied.
    MetadataMismatch,
    /// A range asserted to be unbuilt already has recorded progress.
    RangeAlreadyBuilt,
    /// The index is not in a state where the requested operation is legal.
    InvalidIndexState,
}

impl ErrorMetadata {
    /// Invalid argument or configuration.
    ///
    /// The short_msg should be a CapitalCamelCased describing the error.
    /// The msg should be a descriptive message targeted toward the developer.
    pub fn bad_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Resource not found.
    pub fn not_found(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::NotFound,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Stale or foreign metadata. Never retried: a retry would resolve the
    /// same stale objects again.
    pub fn metadata_mismatch(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::MetadataMismatch,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Recorded progress overlaps a range the caller claimed was unbuilt.
    pub fn range_already_built() -> Self {
        Self {
            code: ErrorCode::RangeAlreadyBuilt,
            short_msg: RANGE_ALREADY_BUILT.into(),
            msg: RANGE_ALREADY_BUILT_MSG.into(),
        }
    }

    /// The index is readable, disabled, or otherwise not in the state the
    /// operation requires.
    pub fn invalid_index_state(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::InvalidIndexState,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn is_bad_request(&self) -> bool {
        self.code == ErrorCode::BadRequest
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    pub fn is_metadata_mismatch(&self) -> bool {
        self.code == ErrorCode::MetadataMismatch
    }

    pub fn is_range_already_built(&self) -> bool {
        self.code == ErrorCode::RangeAlreadyBuilt
    }

    pub fn is_invalid_index_state(&self) -> bool {
        self.code == ErrorCode::InvalidIndexState
    }

    /// Return true if this error is caused by how the build was configured or
    /// driven rather than by the storage engine. Such errors are never fixed by
    /// retrying the same transaction.
    pub fn is_deterministic(&self) -> bool {
        match self.code {
            ErrorCode::BadRequest
            | ErrorCode::NotFound
            | ErrorCode::MetadataMismatch
            | ErrorCode::InvalidIndexState => true,
            // A concurrent builder caused this one; re-reading progress in a
            // fresh transaction resolves it.
            ErrorCode::RangeAlreadyBuilt => false,
        }
    }
}

pub trait ErrorMetadataAnyhowExt {
    fn is_bad_request(&self) -> bool;
    fn is_not_found(&self) -> bool;
    fn is_metadata_mismatch(&self) -> bool;
    fn is_range_already_built(&self) -> bool;
    fn is_invalid_index_state(&self) -> bool;
    fn is_deterministic(&self) -> bool;
    fn short_msg(&self) -> &str;
    fn msg(&self) -> &str;
    fn map_error_metadata<F: FnOnce(ErrorMetadata) -> ErrorMetadata>(self, f: F) -> Self;
    fn wrap_error_message<F>(self, f: F) -> Self
    where
        F: FnOnce(String) -> String;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    /// Returns true if error is tagged as BadRequest
    fn is_bad_request(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_bad_request();
        }
        false
    }

    /// Returns true if error is tagged as NotFound
    fn is_not_found(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_not_found();
        }
        false
    }

    /// Returns true if error is tagged as MetadataMismatch
    fn is_metadata_mismatch(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_metadata_mismatch();
        }
        false
    }

    /// Returns true if error is tagged as RangeAlreadyBuilt
    fn is_range_already_built(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_range_already_built();
        }
        false
    }

    /// Returns true if error is tagged as InvalidIndexState
    fn is_invalid_index_state(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_invalid_index_state();
        }
        false
    }

    fn is_deterministic(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_deterministic();
        }
        false
    }

    /// Return the short_msg associated with this Error
    fn short_msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.short_msg;
        }
        INTERNAL_ERROR
    }

    /// Return the descriptive msg associated with this Error
    fn msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.msg;
        }
        INTERNAL_ERROR_MSG
    }

    fn map_error_metadata<F>(self, f: F) -> Self
    where
        F: FnOnce(ErrorMetadata) -> ErrorMetadata,
    {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>().cloned() {
            return self.context(f(e));
        }
        self
    }

    /// Wrap the underlying error message, maintaining the underlying error
    /// metadata short code if it exists.
    fn wrap_error_message<F>(self, f: F) -> Self
    where
        F: FnOnce(String) -> String,
    {
        if let Some(mut em) = self.downcast_ref::<ErrorMetadata>().cloned() {
            em.msg = f(em.msg.to_string()).into();
            return self.context(em);
        }
        let new_msg = f(self.to_string());
        self.context(new_msg)
    }
}

pub const INTERNAL_ERROR: &str = "InternalError";
pub const INTERNAL_ERROR_MSG: &str = "The index build failed with an unclassified error.";
pub const RANGE_ALREADY_BUILT: &str = "RangeAlreadyBuilt";
pub const RANGE_ALREADY_BUILT_MSG: &str =
    "Range specified as unbuilt contained subranges that had already been built";

#[cfg(any(test, feature = "testing"))]
mod proptest_impls {
    use proptest::prelude::*;

    use super::{
        ErrorCode,
        ErrorMetadata,
    };

    impl Arbitrary for ErrorMetadata {
        type Parameters = ();

        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            any::<ErrorCode>()
                .prop_map(|ec| match ec {
                    ErrorCode::BadRequest => ErrorMetadata::bad_request("bad", "request"),
                    ErrorCode::NotFound => ErrorMetadata::not_found("not", "found"),
                    ErrorCode::MetadataMismatch => {
                        ErrorMetadata::metadata_mismatch("metadata", "mismatch")
                    },
                    ErrorCode::RangeAlreadyBuilt => ErrorMetadata::range_already_built(),
                    ErrorCode::InvalidIndexState => {
                        ErrorMetadata::invalid_index_state("invalid", "state")
                    },
                })
                .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::{
        ErrorCode,
        ErrorMetadata,
        ErrorMetadataAnyhowExt,
        INTERNAL_ERROR,
        RANGE_ALREADY_BUILT,
    };

    proptest! {
        #![proptest_config(
            ProptestConfig { failure_persistence: None, ..ProptestConfig::default() }
        )]

        #[test]
        fn test_metadata_survives_context(err in any::<ErrorMetadata>()) {
            let wrapped = anyhow::anyhow!("engine said no")
                .context(err.clone())
                .context("while building range");
            assert_eq!(wrapped.short_msg(), &*err.short_msg);
            assert_eq!(wrapped.is_deterministic(), err.is_deterministic());
            assert_eq!(
                wrapped.is_range_already_built(),
                err.code == ErrorCode::RangeAlreadyBuilt,
            );
        }
    }

    #[test]
    fn test_untagged_error_is_internal() {
        let e = anyhow::anyhow!("boom");
        assert_eq!(e.short_msg(), INTERNAL_ERROR);
        assert!(!e.is_deterministic());
        assert!(!e.is_range_already_built());
    }

    #[test]
    fn test_wrap_error_message_keeps_code() {
        let e = anyhow::anyhow!(ErrorMetadata::range_already_built())
            .wrap_error_message(|msg| format!("[1, 5): {msg}"));
        assert!(e.is_range_already_built());
        assert_eq!(e.short_msg(), RANGE_ALREADY_BUILT);
        assert!(e.msg().starts_with("[1, 5): "));
    }
}
