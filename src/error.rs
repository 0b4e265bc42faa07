//! Error kinds shared by the sender, the receiver and their collaborators.

use std::io;

/// Convenience alias used throughout `avrbridge`.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while moving a firmware image across the
/// serial link and getting it flashed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The serial device is missing or busy, or a setting is unusable. Fatal,
    /// never retried by the caller.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A line started with the start marker but could not be parsed.
    #[error("malformed frame header `{line}`: {reason}")]
    MalformedHeader { line: String, reason: &'static str },

    /// A header declared more payload bytes than the receiver accepts.
    #[error("declared payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// Nothing arrived on the serial link within the configured read timeout.
    #[error("transfer timed out: {0}")]
    TransferTimeout(String),

    /// The flashing tool could not be started.
    #[error("failed to launch `{program}`: {source}")]
    SubprocessLaunch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The other end of the serial link went away.
    #[error("serial link closed by peer")]
    Disconnected,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// `true` when the error is a read timeout on the serial link.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TransferTimeout(_))
    }

    /// `true` when the serial link can no longer be used.
    pub fn is_link_lost(&self) -> bool {
        matches!(self, Error::Disconnected | Error::Io(_))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn timeout_is_not_link_loss() {
    let err = Error::TransferTimeout("no end marker".into());
    assert!(err.is_timeout());
    assert!(!err.is_link_lost());
}

#[test]
fn io_errors_convert() {
    let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
    assert!(err.is_link_lost());
    assert!(!err.is_timeout());
}

#[test]
fn malformed_header_message_names_the_line() {
    let err = Error::MalformedHeader {
        line: "tx-begin,onlyonefield".into(),
        reason: "expected `marker,target,size`",
    };
    assert!(err.to_string().contains("tx-begin,onlyonefield"));
}
