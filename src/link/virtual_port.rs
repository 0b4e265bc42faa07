//! In-memory serial port pair.
//!
//! Two [`VirtualPort`]s returned by [`VirtualPort::pair`] behave like the two
//! ends of a null-modem cable: bytes written on one end are read on the other.
//! Reads block for at most the configured timeout and then fail with
//! [`io::ErrorKind::TimedOut`], like a `serialport` port does. Once one end is
//! dropped, reads on the other end report the end of the stream.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

pub struct VirtualPort {
    rx: Receiver<Vec<u8>>,
    tx: Sender<Vec<u8>>,
    chunk: Vec<u8>,
    offset: usize,
    timeout: Duration,
}

impl VirtualPort {
    /// Create two connected ends sharing the same read `timeout`.
    pub fn pair(timeout: Duration) -> (VirtualPort, VirtualPort) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            VirtualPort::new(a_rx, a_tx, timeout),
            VirtualPort::new(b_rx, b_tx, timeout),
        )
    }

    fn new(rx: Receiver<Vec<u8>>, tx: Sender<Vec<u8>>, timeout: Duration) -> Self {
        VirtualPort {
            rx,
            tx,
            chunk: Vec::new(),
            offset: 0,
            timeout,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl Read for VirtualPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.chunk.len() {
            match self.rx.recv_timeout(self.timeout) {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.offset = 0;
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "operation timed out"))
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let available = &self.chunk[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

impl Write for VirtualPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "virtual port peer is gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
