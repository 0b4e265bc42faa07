//! The serial channel as seen by a transfer session.
//!
//! The link mixes line-oriented text (headers, relay lines, end markers) with
//! a raw payload region of known length. Reads go through a read-ahead buffer
//! so that payload bytes arriving in the same chunk as the header line are not
//! lost. A line cut in half by a read timeout is completed by the next call,
//! unless the caller drops it first with [`SerialLink::discard_partial`].

mod virtual_port;

use std::io::{self, BufRead, BufReader, Read, Write};

use log::{debug, trace};

use crate::error::{Error, Result};

pub use virtual_port::VirtualPort;

/// Longest line kept whole; longer ones come out in pieces of this size.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Buffered, timeout-aware wrapper around the byte stream of the serial port.
///
/// The read timeout itself is owned by the underlying port: every blocking read
/// of `P` is expected to fail with [`io::ErrorKind::TimedOut`] once it expires,
/// which is what `serialport` does.
pub struct SerialLink<P: Read + Write> {
    reader: BufReader<P>,
    /// Bytes of a line not yet terminated when the last read timed out.
    pending: Vec<u8>,
}

impl<P: Read + Write> SerialLink<P> {
    pub fn new(port: P) -> Self {
        SerialLink {
            reader: BufReader::new(port),
            pending: Vec::new(),
        }
    }

    /// Read one line, trailing `\n` included.
    ///
    /// The last line before the end of the stream may lack its newline, and a
    /// line is cut after [`MAX_LINE_LENGTH`] bytes. Fails with
    /// [`Error::TransferTimeout`] when the port stays silent for the read
    /// timeout and with [`Error::Disconnected`] at the end of the stream.
    pub fn read_line(&mut self) -> Result<Vec<u8>> {
        loop {
            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Whatever was read so far stays in `pending`.
                Err(e) => return Err(map_read_error(e, "waiting for a line")),
            };
            if available.is_empty() {
                if self.pending.is_empty() {
                    return Err(Error::Disconnected);
                }
                return Ok(self.take_pending());
            }

            let room = MAX_LINE_LENGTH - self.pending.len();
            let (used, complete) = match available.iter().take(room).position(|b| *b == b'\n') {
                Some(newline) => (newline + 1, true),
                None => (available.len().min(room), false),
            };
            self.pending.extend_from_slice(&available[..used]);
            self.reader.consume(used);

            if complete {
                return Ok(self.take_pending());
            }
            if self.pending.len() >= MAX_LINE_LENGTH {
                debug!("line longer than {} bytes, cut", MAX_LINE_LENGTH);
                return Ok(self.take_pending());
            }
        }
    }

    /// Drop the bytes of a line left unterminated by a read timeout.
    pub fn discard_partial(&mut self) {
        if !self.pending.is_empty() {
            trace!(
                "dropping partial line {:?}",
                String::from_utf8_lossy(&self.pending)
            );
            self.pending.clear();
        }
    }

    fn take_pending(&mut self) -> Vec<u8> {
        let line = std::mem::take(&mut self.pending);
        trace!("line in: {:?}", String::from_utf8_lossy(&line));
        line
    }

    /// Read exactly `size` raw bytes, not line oriented.
    pub fn read_payload(&mut self, size: u64) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        // A line left half-read by a timeout is not part of the payload.
        self.pending.clear();
        let got = (&mut self.reader)
            .take(size)
            .read_to_end(&mut payload)
            .map_err(|e| map_read_error(e, "receiving the payload"))?;
        if (got as u64) < size {
            return Err(Error::Disconnected);
        }
        trace!("payload in: {} bytes", got);
        Ok(payload)
    }

    /// Read and throw away up to `size` raw bytes.
    ///
    /// Stops early, without error, when the port stays silent for the read
    /// timeout or the stream ends. Returns the number of bytes dropped.
    pub fn skip_payload(&mut self, size: u64) -> Result<u64> {
        self.pending.clear();
        let mut skipped = 0;
        while skipped < size {
            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => match map_read_error(e, "skipping a payload") {
                    Error::TransferTimeout(_) => break,
                    other => return Err(other),
                },
            };
            if available.is_empty() {
                break;
            }
            let used = available.len().min((size - skipped) as usize);
            self.reader.consume(used);
            skipped += used as u64;
        }
        trace!("skipped {} of {} payload bytes", skipped, size);
        Ok(skipped)
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.reader.get_mut();
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    /// Write `line` and make sure it ends with a newline.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        trace!("line out: {:?}", line);
        if line.ends_with('\n') {
            self.write_all(line.as_bytes())
        } else {
            let mut owned = line.to_owned();
            owned.push('\n');
            self.write_all(owned.as_bytes())
        }
    }

    /// Direct access to the write half of the port, bypassing the read buffer.
    pub fn writer(&mut self) -> &mut P {
        self.reader.get_mut()
    }
}

fn map_read_error(e: io::Error, doing: &str) -> Error {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            Error::TransferTimeout(format!("serial link silent while {}", doing))
        }
        io::ErrorKind::UnexpectedEof => Error::Disconnected,
        _ => Error::Io(e),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
