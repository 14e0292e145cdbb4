//! Error types for bili-dl
//!
//! This module provides the error taxonomy for the library:
//! - Pipeline-phase errors (Signing, Resolution, Transfer, Transcode, Storage)
//! - Ambient errors (I/O, network, serialization, configuration)
//! - Control outcomes (`Cancelled`) that are signals, not failures

use thiserror::Error;

/// Result type alias for bili-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bili-dl
///
/// The first five variants map one-to-one onto the pipeline phases; whichever
/// phase fails first aborts the remaining phases and surfaces on the state
/// channel. `Cancelled` is a cooperative control outcome and is matched
/// separately at every consumption site and must never be folded into a
/// failure path.
#[derive(Debug, Error)]
pub enum Error {
    /// Signing-key derivation or upstream key retrieval failed
    #[error("signing error: {0}")]
    Signing(String),

    /// The metadata API returned no usable stream for the request
    #[error("resolution error: {0}")]
    Resolution(String),

    /// Network transfer failed after exhausting retries
    #[error("transfer error: {0}")]
    Transfer(String),

    /// External merge/transcode step failed
    #[error("transcode error: {0}")]
    Transcode(String),

    /// Final hand-off to the storage collaborator failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Operation was cancelled cooperatively (pause or cancel request)
    ///
    /// Not a failure: the supervisor maps this to `Paused` or `Cancelled`
    /// depending on which control operation triggered it.
    #[error("operation cancelled")]
    Cancelled,

    /// A start request arrived while a run is already active
    #[error("a download is already running")]
    AlreadyRunning,

    /// A resume request arrived with no previous run to resume
    #[error("no previous download to resume")]
    NothingToResume,

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "phase_weights")
        key: Option<String>,
    },

    /// Operation not supported (missing binary, stub implementation)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for the control outcome variants that are not failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Short machine-readable code for the error kind, used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Signing(_) => "signing_error",
            Error::Resolution(_) => "resolution_error",
            Error::Transfer(_) => "transfer_error",
            Error::Transcode(_) => "transcode_error",
            Error::Storage(_) => "storage_error",
            Error::Cancelled => "cancelled",
            Error::AlreadyRunning => "already_running",
            Error::NothingToResume => "nothing_to_resume",
            Error::Config { .. } => "config_error",
            Error::NotSupported(_) => "not_supported",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps_to_expected_code() {
        let cases: Vec<(Error, &str)> = vec![
            (Error::Signing("keys rotated".into()), "signing_error"),
            (Error::Resolution("no stream".into()), "resolution_error"),
            (Error::Transfer("gave up".into()), "transfer_error"),
            (Error::Transcode("ffmpeg exit 1".into()), "transcode_error"),
            (Error::Storage("move failed".into()), "storage_error"),
            (Error::Cancelled, "cancelled"),
            (Error::AlreadyRunning, "already_running"),
            (Error::NothingToResume, "nothing_to_resume"),
            (
                Error::Config {
                    message: "bad value".into(),
                    key: Some("phase_weights".into()),
                },
                "config_error",
            ),
            (Error::NotSupported("no ffmpeg".into()), "not_supported"),
            (Error::Io(std::io::Error::other("disk fail")), "io_error"),
            (
                Error::Serialization(serde_json::from_str::<String>("{").unwrap_err()),
                "serialization_error",
            ),
        ];

        for (error, expected_code) in cases {
            assert_eq!(
                error.code(),
                expected_code,
                "variant {error:?} returned wrong code"
            );
        }
    }

    #[test]
    fn only_cancelled_is_a_cancellation() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(!Error::Transfer("dropped connection".into()).is_cancellation());
        assert!(!Error::AlreadyRunning.is_cancellation());
    }

    #[test]
    fn display_messages_carry_the_cause() {
        let err = Error::Transfer("unexpected status 403 Forbidden".into());
        assert!(
            err.to_string().contains("403"),
            "transfer error Display should preserve the underlying cause"
        );

        let err = Error::Config {
            message: "weights must be ascending".into(),
            key: Some("phase_weights".into()),
        };
        assert!(err.to_string().contains("weights must be ascending"));
    }

    #[test]
    fn io_error_converts_via_from() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.code(), "io_error");
    }
}
