// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for backend operations.

/// Boxed error type used as the source of backend failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error from a cache backend operation.
///
/// Transport and serialization failures are *transient*: the caching layer
/// treats them as "no data" on reads and "no effect" on writes rather than
/// surfacing them to callers. Contract signals such as [`Error::KeyAlreadyExists`]
/// are not transient; they carry meaning (the lock protocol is built on them).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The backend transport or storage layer failed.
    #[error("backend operation failed: {source}")]
    Backend {
        /// The underlying cause.
        #[source]
        source: BoxError,
    },

    /// An `add` found the key already present.
    #[error("key {key:?} already exists")]
    KeyAlreadyExists {
        /// The colliding key.
        key: String,
    },

    /// An `increment` found a stored value that does not parse as an integer.
    #[error("value under {key:?} is not an integer")]
    NotANumber {
        /// The offending key.
        key: String,
    },

    /// A value could not be serialized or deserialized.
    #[error("serialization failed: {source}")]
    Serde {
        /// The underlying cause.
        #[source]
        source: BoxError,
    },
}

impl Error {
    /// Creates a backend failure from any error type.
    pub fn backend(cause: impl Into<BoxError>) -> Self {
        Self::Backend { source: cause.into() }
    }

    /// Creates a serialization failure from any error type.
    pub fn serde(cause: impl Into<BoxError>) -> Self {
        Self::Serde { source: cause.into() }
    }

    /// Creates the collision signal returned by `add`.
    pub fn key_already_exists(key: impl Into<String>) -> Self {
        Self::KeyAlreadyExists { key: key.into() }
    }

    /// Creates the non-numeric signal returned by `increment`.
    pub fn not_a_number(key: impl Into<String>) -> Self {
        Self::NotANumber { key: key.into() }
    }

    /// Returns `true` for failures the caching layer degrades over (transport,
    /// serialization), as opposed to contract signals like a key collision.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Serde { .. })
    }
}

/// A specialized [`Result`] type for backend operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_display_contains_cause_message() {
        let error = Error::backend("connection reset");
        assert!(
            format!("{error}").contains("connection reset"),
            "display output should contain the cause message, got: {error}"
        );
    }

    #[test]
    fn key_already_exists_names_the_key() {
        let error = Error::key_already_exists("user:1");
        assert!(format!("{error}").contains("user:1"));
        assert!(!error.is_transient());
    }

    #[test]
    fn transient_classification() {
        assert!(Error::backend("boom").is_transient());
        assert!(Error::serde("bad json").is_transient());
        assert!(!Error::not_a_number("k").is_transient());
    }

    #[test]
    fn result_type_alias_propagates_errors() {
        fn returns_err() -> Result<i32> {
            Err(Error::backend("expected failure"))
        }

        let err = returns_err().expect_err("should return an error");
        assert!(format!("{err}").contains("expected failure"));
    }
}
