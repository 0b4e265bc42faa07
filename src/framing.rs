//! Framing of a transfer session on the serial link.
//!
//! A session on the wire looks like this:
//!
//! ```text
//! tx-begin,<target>,<size>\n
//! <exactly `size` raw payload bytes>
//! <zero or more relay lines>\n
//! tx-end\n
//! ```
//!
//! Only the header and the end marker are handled here. The codec does no I/O;
//! reading the payload and the relay lines is left to
//! [`SerialLink`](crate::link::SerialLink).

use std::fmt;

use crate::error::{Error, Result};

/// Token opening a session. Lines starting with it are metadata, not relay
/// text.
pub const START_MARKER: &str = "tx-begin";

/// Token closing a session. Always the last line written by the receiver.
pub const END_MARKER: &str = "tx-end";

const FIELD_SEPARATOR: char = ',';

/// The metadata line preceding the raw payload.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FrameHeader {
    /// Opaque name of the microcontroller variant, e.g. `atmega328p`.
    pub target: String,
    /// Exact number of payload bytes following the header line.
    pub size: u64,
}

impl FrameHeader {
    pub fn new<'a>(target: impl Into<std::borrow::Cow<'a, str>>, size: u64) -> Self {
        FrameHeader {
            target: target.into().into_owned(),
            size,
        }
    }

    /// Encode the header as a complete line, newline included.
    pub fn encode(&self) -> String {
        encode_start(&self.target, self.size)
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.target, self.size)
    }
}

/// Produce `tx-begin,{target},{size}\n`.
///
/// `size` must be the exact byte length of the payload written right after the
/// line; the receiver reads exactly that many bytes.
pub fn encode_start(target: &str, size: u64) -> String {
    format!(
        "{}{sep}{}{sep}{}\n",
        START_MARKER,
        target,
        size,
        sep = FIELD_SEPARATOR
    )
}

/// Decode a line read from the link.
///
/// Returns `Ok(None)` when the line does not begin with [`START_MARKER`], in
/// which case it is passthrough text. A line that does begin with the marker
/// but cannot be parsed fails with [`Error::MalformedHeader`].
pub fn decode_start(line: &str) -> Result<Option<FrameHeader>> {
    if !line.starts_with(START_MARKER) {
        return Ok(None);
    }

    let trimmed = line.trim_end();
    let malformed = |reason| Error::MalformedHeader {
        line: trimmed.to_owned(),
        reason,
    };

    // A third separator lands in the size field and fails its digit check.
    let mut fields = trimmed.splitn(3, FIELD_SEPARATOR);
    let marker = fields.next().unwrap_or_default();
    let (target, size) = match (fields.next(), fields.next()) {
        (Some(target), Some(size)) => (target, size),
        _ => return Err(malformed("expected `marker,target,size`")),
    };

    if marker != START_MARKER {
        return Err(malformed("unknown marker"));
    }
    if target.is_empty() {
        return Err(malformed("empty target identifier"));
    }
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("payload size is not a non-negative integer"));
    }
    let size = size
        .parse::<u64>()
        .map_err(|_| malformed("payload size out of range"))?;

    Ok(Some(FrameHeader::new(target, size)))
}

/// Produce the end marker line, newline included.
pub fn encode_end() -> String {
    format!("{}\n", END_MARKER)
}

/// `true` iff `line` (trailing whitespace ignored) starts with [`END_MARKER`].
///
/// Anything trailing the token on the same line is tolerated.
pub fn is_end(line: &str) -> bool {
    line.trim_end().starts_with(END_MARKER)
}

/// Check that `target` can travel inside a header and come back unchanged.
pub fn validate_target(target: &str) -> Result<()> {
    if target.is_empty() {
        return Err(Error::Configuration("empty target identifier".into()));
    }
    if target
        .chars()
        .any(|c| c == FIELD_SEPARATOR || c.is_whitespace())
    {
        return Err(Error::Configuration(format!(
            "target identifier `{}` must not contain `{}` or whitespace",
            target, FIELD_SEPARATOR
        )));
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
