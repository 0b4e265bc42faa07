//! Forwarding of the flashing tool's output to the serial link.
//!
//! The tool writes progress on both `stdout` and `stderr`. Both pipes are
//! drained at the same time by two scoped worker threads, one per stream, so
//! that a chatty stream can never fill its pipe buffer and stall the tool while
//! the other one is being read. Each worker forwards whole lines; the sink is
//! behind a [`Mutex`] and a line is written completely before the lock is
//! released, so lines from the two streams may interleave but never mix.
//!
//! Writes to the sink may block (the serial port is slow). That backpressure
//! propagates to the tool through the pipe buffers and is expected.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, ExitStatus};
use std::sync::Mutex;
use std::thread;

use log::{debug, trace, warn};

/// Which output stream of the subprocess a line came from.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Line counts of a finished relay.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct RelayStats {
    pub stdout_lines: usize,
    pub stderr_lines: usize,
}

impl RelayStats {
    pub fn total(&self) -> usize {
        self.stdout_lines + self.stderr_lines
    }
}

/// Drain `stdout` and `stderr` concurrently until both reach end-of-data,
/// writing every line to `sink` exactly once.
///
/// A final line missing its newline gets one, so that whatever the caller
/// writes next starts on a fresh line. When writing to `sink` fails, both
/// streams are still drained to the end (their content is then discarded) and
/// the first error is returned afterwards.
pub fn relay_streams<O, E, W>(stdout: O, stderr: E, sink: &Mutex<W>) -> io::Result<RelayStats>
where
    O: Read + Send,
    E: Read + Send,
    W: Write + Send,
{
    let (out, err) = thread::scope(|s| {
        let out = s.spawn(|| drain(stdout, Stream::Stdout, sink));
        let err = s.spawn(|| drain(stderr, Stream::Stderr, sink));
        (out.join(), err.join())
    });

    let out = out.map_err(|_| worker_panicked(Stream::Stdout))?;
    let err = err.map_err(|_| worker_panicked(Stream::Stderr))?;

    let stats = RelayStats {
        stdout_lines: out.lines,
        stderr_lines: err.lines,
    };
    match out.error.or(err.error) {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}

/// Relay the output of a child spawned with piped `stdout`/`stderr`, then reap
/// it.
///
/// A pipe that was not set up is treated as an empty stream.
pub fn relay_child<W>(child: &mut Child, sink: &Mutex<W>) -> io::Result<(RelayStats, ExitStatus)>
where
    W: Write + Send,
{
    let relayed = relay_streams(
        pipe_or_empty(child.stdout.take()),
        pipe_or_empty(child.stderr.take()),
        sink,
    );
    // Reap the child even when the sink broke, it has seen end-of-data on both
    // pipes by now.
    let status = child.wait()?;
    debug!("flasher exited with {}", status);
    relayed.map(|stats| (stats, status))
}

fn pipe_or_empty<R: Read + Send + 'static>(pipe: Option<R>) -> Box<dyn Read + Send> {
    match pipe {
        Some(pipe) => Box::new(pipe),
        None => Box::new(io::empty()),
    }
}

struct Drained {
    lines: usize,
    error: Option<io::Error>,
}

fn drain<R: Read, W: Write>(stream: R, which: Stream, sink: &Mutex<W>) -> Drained {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let mut drained = Drained {
        lines: 0,
        error: None,
    };

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                if !line.ends_with(b"\n") {
                    line.push(b'\n');
                }
                trace!("{:?}: {}", which, String::from_utf8_lossy(&line).trim_end());
                drained.lines += 1;
                if drained.error.is_none() {
                    if let Err(e) = forward(&line, sink) {
                        warn!("relay of {:?} stopped forwarding: {}", which, e);
                        drained.error = Some(e);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("failed reading flasher {:?}: {}", which, e);
                drained.error.get_or_insert(e);
                break;
            }
        }
    }
    drained
}

fn forward<W: Write>(line: &[u8], sink: &Mutex<W>) -> io::Result<()> {
    let mut sink = sink
        .lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "relay sink poisoned"))?;
    sink.write_all(line)?;
    sink.flush()
}

fn worker_panicked(which: Stream) -> io::Error {
    io::Error::new(
        io::ErrorKind::Other,
        format!("relay worker for {:?} panicked", which),
    )
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_of(bytes: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(bytes)
            .split_inclusive('\n')
            .map(str::to_owned)
            .collect()
    }

    /// Sink failing every write, counting attempts.
    struct BrokenSink {
        attempts: usize,
    }

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            self.attempts += 1;
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn every_line_once_in_stream_order() {
        let stdout: String = (0..200).map(|i| format!("out {}\n", i)).collect();
        let stderr: String = (0..150).map(|i| format!("err {}\n", i)).collect();
        let sink = Mutex::new(Vec::<u8>::new());

        let stats = relay_streams(stdout.as_bytes(), stderr.as_bytes(), &sink).unwrap();
        assert_eq!(stats.stdout_lines, 200);
        assert_eq!(stats.stderr_lines, 150);
        assert_eq!(stats.total(), 350);

        let lines = lines_of(&sink.into_inner().unwrap());
        assert_eq!(lines.len(), 350);
        let outs: Vec<_> = lines.iter().filter(|l| l.starts_with("out ")).cloned().collect();
        let errs: Vec<_> = lines.iter().filter(|l| l.starts_with("err ")).cloned().collect();
        assert_eq!(outs, lines_of(stdout.as_bytes()));
        assert_eq!(errs, lines_of(stderr.as_bytes()));
    }

    #[test]
    fn missing_final_newline_is_added() {
        let sink = Mutex::new(Vec::<u8>::new());
        let stats = relay_streams(&b"first\nno newline"[..], io::empty(), &sink).unwrap();
        assert_eq!(stats.stdout_lines, 2);
        assert_eq!(sink.into_inner().unwrap(), b"first\nno newline\n");
    }

    #[test]
    fn empty_streams() {
        let sink = Mutex::new(Vec::<u8>::new());
        let stats = relay_streams(io::empty(), io::empty(), &sink).unwrap();
        assert_eq!(stats, RelayStats::default());
        assert!(sink.into_inner().unwrap().is_empty());
    }

    #[test]
    fn broken_sink_still_drains_both_streams() {
        let sink = Mutex::new(BrokenSink { attempts: 0 });
        let err = relay_streams(&b"a\nb\nc\n"[..], &b"x\ny\n"[..], &sink).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        // One failed attempt per stream, the remaining lines are discarded.
        assert_eq!(sink.into_inner().unwrap().attempts, 2);
    }

    #[cfg(unix)]
    #[test]
    fn child_filling_both_pipes_does_not_stall() {
        use std::process::{Command, Stdio};

        // Far more than a pipe buffer on each stream, written stderr first.
        let script = "i=0; while [ $i -lt 5000 ]; do \
                      echo \"stderr line $i with some padding to fill the pipe\" >&2; \
                      i=$((i+1)); done; \
                      i=0; while [ $i -lt 5000 ]; do \
                      echo \"stdout line $i with some padding to fill the pipe\"; \
                      i=$((i+1)); done";
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let sink = Mutex::new(Vec::<u8>::new());
        let (stats, status) = relay_child(&mut child, &sink).unwrap();
        assert!(status.success());
        assert_eq!(stats.stdout_lines, 5000);
        assert_eq!(stats.stderr_lines, 5000);
        assert_eq!(lines_of(&sink.into_inner().unwrap()).len(), 10_000);
    }
}
