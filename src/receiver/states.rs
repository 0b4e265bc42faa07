//! States for the receiver state machine.
//!
//! This modules is private and restricted to the [`receiver`](crate::receiver)
//! scope. Refer to the [`state_machine`](super::state_machine) module for an
//! overview of states, events and transitions.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;

use console::style;
use log::{debug, info, trace, warn};

use super::events::*;
use super::state_machine::Bridge;

use crate::error::Error;
use crate::framing::{self, FrameHeader};
use crate::{gpio, relay, utils};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// Do the work of the state with exclusive access to the `bridge` context
    /// and request the next transition by returning an event.
    fn run<P: Read + Write + Send>(&mut self, bridge: &mut Bridge<P>) -> Event;
}

/// What a single line read while scanning turns out to be.
#[derive(Debug)]
pub(crate) enum Scan {
    /// A valid start header, within the payload limit.
    Start(FrameHeader),
    /// Unrelated traffic.
    Passthrough,
    /// Carries the start marker but cannot be served.
    Rejected(Error),
}

/// Classify a line read from the link, terminator included or not.
pub(crate) fn scan_line(line: &[u8], max_payload: u64) -> Scan {
    let text = String::from_utf8_lossy(line);
    match framing::decode_start(&text) {
        Ok(Some(header)) if header.size > max_payload => Scan::Rejected(Error::PayloadTooLarge {
            size: header.size,
            limit: max_payload,
        }),
        Ok(Some(header)) => Scan::Start(header),
        Ok(None) => Scan::Passthrough,
        Err(e) => Scan::Rejected(e),
    }
}

// Scanning State ==============================================================

/// The initial state of every session: consume lines until one is a valid
/// start header. Read timeouts are expected while the host is quiet; a line
/// interrupted by one is dropped. The payload of an oversized header is
/// skipped, not scanned.
///
///  * **[`HeaderParsedEvent`] => [`HeaderParsedState`]** on a valid header,
///  * **[`LinkLostEvent`] => [`DoneState`]** when the link goes away.
#[derive(Debug)]
pub(crate) struct ScanningState {}
impl Runnable for ScanningState {
    fn run<P: Read + Write + Send>(&mut self, bridge: &mut Bridge<P>) -> Event {
        info!("=> Scanning");
        loop {
            let line = match bridge.link.read_line() {
                Ok(line) => line,
                Err(e) if e.is_timeout() => {
                    // A header never spans a pause of the host.
                    bridge.link.discard_partial();
                    continue;
                }
                Err(error) => return Event::LinkLost(LinkLostEvent { error }),
            };

            match scan_line(&line, bridge.settings.max_payload) {
                Scan::Start(header) => {
                    return Event::HeaderParsed(HeaderParsedEvent { header });
                }
                Scan::Passthrough => {
                    trace!("ignoring {:?}", String::from_utf8_lossy(&line));
                }
                Scan::Rejected(Error::PayloadTooLarge { size, limit }) => {
                    warn!("skipping {} byte payload, limit is {}", size, limit);
                    if let Err(error) = bridge.link.skip_payload(size) {
                        return Event::LinkLost(LinkLostEvent { error });
                    }
                }
                Scan::Rejected(e) => warn!("{}", e),
            }
        }
    }
}

// HeaderParsed State ==========================================================

/// Reads exactly `size` payload bytes and stores them for the flashing tool.
///
///  * **[`PayloadReceivedEvent`] => [`RelayingState`]** once stored,
///  * **[`SessionAbandonedEvent`] => [`ScanningState`]** when the payload is
///    cut short by a read timeout,
///  * **[`AbortSessionEvent`] => [`SessionClosedState`]** when the scratch file
///    cannot be written,
///  * **[`LinkLostEvent`] => [`DoneState`]** when the link goes away.
#[derive(Debug)]
pub(crate) struct HeaderParsedState {
    pub header: FrameHeader,
}
impl Runnable for HeaderParsedState {
    fn run<P: Read + Write + Send>(&mut self, bridge: &mut Bridge<P>) -> Event {
        info!("=> HeaderParsed");
        println!("{}", style(format!("[AB] ⏬ Receiving {}", self.header)).cyan());

        let header = self.header.clone();
        let payload = match bridge.link.read_payload(header.size) {
            Ok(payload) => payload,
            Err(reason) if reason.is_timeout() => {
                warn!("abandoning session for {}: {}", header, reason);
                return Event::SessionAbandoned(SessionAbandonedEvent { header, reason });
            }
            Err(error) => return Event::LinkLost(LinkLostEvent { error }),
        };
        utils::dump("payload", &payload);

        let firmware = bridge.settings.scratch_firmware.clone();
        match utils::persist_image(&firmware, &payload) {
            Ok(()) => Event::PayloadReceived(PayloadReceivedEvent { header, firmware }),
            Err(e) => {
                warn!("cannot store firmware: {}", e);
                Event::AbortSession(AbortSessionEvent {
                    header,
                    notice: format!(
                        "avrbridge: cannot store firmware in {}: {}",
                        firmware.display(),
                        e
                    ),
                })
            }
        }
    }
}

// Relaying State ==============================================================

/// Runs the flashing tool and copies its output lines to the link as they
/// come, until it exits.
///
///  * **[`FlashFinishedEvent`] => [`SessionClosedState`]** once the tool exited,
///  * **[`AbortSessionEvent`] => [`SessionClosedState`]** when it cannot be
///    started.
#[derive(Debug)]
pub(crate) struct RelayingState {
    pub header: FrameHeader,
    pub firmware: PathBuf,
}
impl Runnable for RelayingState {
    fn run<P: Read + Write + Send>(&mut self, bridge: &mut Bridge<P>) -> Event {
        info!("=> Relaying");
        let header = self.header.clone();

        let mut command = bridge.flasher.command(&header.target, &self.firmware);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let program = command.get_program().to_string_lossy().into_owned();
        debug!("spawning {:?}", command);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let error = Error::SubprocessLaunch { program, source };
                warn!("{}", error);
                return Event::AbortSession(AbortSessionEvent {
                    header,
                    notice: format!("avrbridge: {}", error),
                });
            }
        };

        let sink = Mutex::new(bridge.link.writer());
        match relay::relay_child(&mut child, &sink) {
            Ok((stats, status)) => {
                debug!(
                    "{} exited with {}: {} stdout, {} stderr lines",
                    program, status, stats.stdout_lines, stats.stderr_lines
                );
                Event::FlashFinished(FlashFinishedEvent {
                    header,
                    status: Some(status),
                    relayed: stats.total(),
                })
            }
            Err(e) => {
                // A broken link surfaces again when the end marker is written.
                warn!("relaying {} output failed: {}", program, e);
                Event::FlashFinished(FlashFinishedEvent {
                    header,
                    status: None,
                    relayed: 0,
                })
            }
        }
    }
}

// SessionClosed State =========================================================

/// Finishes a session that got past the header: relays the pending notice,
/// releases the programming pins and writes the end marker.
///
///  * **[`RescanEvent`] => [`ScanningState`]** once the end marker is out,
///  * **[`LinkLostEvent`] => [`DoneState`]** when it cannot be written.
#[derive(Debug)]
pub(crate) struct SessionClosedState {
    pub header: FrameHeader,
    pub notice: Option<String>,
    pub status: Option<ExitStatus>,
    pub relayed: usize,
}
impl Runnable for SessionClosedState {
    fn run<P: Read + Write + Send>(&mut self, bridge: &mut Bridge<P>) -> Event {
        info!("=> SessionClosed");

        if let Some(notice) = self.notice.take() {
            if let Err(error) = bridge.link.write_line(&notice) {
                return Event::LinkLost(LinkLostEvent { error });
            }
        }

        gpio::release_all(bridge.pins.as_mut(), &bridge.settings.pins);

        if let Err(error) = bridge.link.write_all(framing::encode_end().as_bytes()) {
            return Event::LinkLost(LinkLostEvent { error });
        }
        bridge.sessions += 1;

        match self.status {
            Some(status) if status.success() => println!(
                "{}",
                style(format!("[AB] ✅ {} flashed, {} lines relayed", self.header, self.relayed))
                    .green()
            ),
            _ => println!(
                "{}",
                style(format!("[AB] ❌ {} not flashed", self.header)).red()
            ),
        }
        Event::Rescan(RescanEvent {})
    }
}

// Done State ==================================================================

/// Terminal state, keeps the reason the link was lost.
#[derive(Debug)]
pub(crate) struct DoneState {
    pub error: Option<Error>,
}

// =============================================================================
// Unit Tests
// =============================================================================
