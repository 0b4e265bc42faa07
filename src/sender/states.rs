//! States for the sender state machine.
//!
//! This modules is private and restricted to the [`sender`](crate::sender)
//! scope. Refer to the [`state_machine`](super::state_machine) module for an
//! overview of states, events and transitions.

use std::io::{Read, Write};

use log::{debug, info};

use super::events::*;
use super::state_machine::{Host, TransferReport};

use crate::error::{Error, Result};
use crate::framing::{self, FrameHeader};
use crate::utils;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// Do the work of the state with exclusive access to the `host` context and
    /// request the next transition by returning an event.
    fn run<P: Read + Write>(&mut self, host: &mut Host<P>) -> Event;
}

// Idle State ==================================================================

/// The initial state: load the image, frame it and push it.
///
///  * **[`PayloadSentEvent`] => [`AwaitingEchoState`]** once the header and the
///    payload are written,
///  * **[`FailedEvent`] => [`DoneState`]** when any of that fails.
#[derive(Debug)]
pub(crate) struct IdleState {}
impl Runnable for IdleState {
    fn run<P: Read + Write>(&mut self, host: &mut Host<P>) -> Event {
        info!("=> Idle");
        match push_image(host) {
            Ok(header) => Event::PayloadSent(PayloadSentEvent { header }),
            Err(error) => Event::Failed(FailedEvent { error }),
        }
    }
}

fn push_image<P: Read + Write>(host: &mut Host<P>) -> Result<FrameHeader> {
    let target = host
        .settings
        .target
        .clone()
        .ok_or_else(|| Error::Configuration("no target microcontroller given".into()))?;
    framing::validate_target(&target)?;
    let path = host
        .settings
        .firmware
        .clone()
        .ok_or_else(|| Error::Configuration("no firmware image given".into()))?;

    let image = utils::read_image(&path)?;
    let header = FrameHeader::new(target, image.len() as u64);
    let line = header.encode();
    utils::dump("frame header", line.as_bytes());
    utils::dump("payload", &image);

    utils::push_frame(&mut host.link, &line, &image)?;
    debug!("pushed {} from `{}`", header, path);
    Ok(header)
}

// AwaitingEcho State ==========================================================

/// Reads lines from the receiver, echoing relay output to the operator, until
/// the end marker shows up.
///
///  * **[`EndObservedEvent`] => [`DoneState`]** on the end marker,
///  * **[`FailedEvent`] => [`DoneState`]** on a read timeout or a broken link.
#[derive(Debug)]
pub(crate) struct AwaitingEchoState {
    pub header: FrameHeader,
    pub relay_lines: usize,
}
impl Runnable for AwaitingEchoState {
    fn run<P: Read + Write>(&mut self, host: &mut Host<P>) -> Event {
        info!("=> AwaitingEcho");
        loop {
            let line = match host.link.read_line() {
                Ok(line) => line,
                Err(Error::TransferTimeout(_)) => {
                    let error = Error::TransferTimeout(format!(
                        "no `{}` from the receiver within {:?}",
                        framing::END_MARKER,
                        host.settings.timeout
                    ));
                    return Event::Failed(FailedEvent { error });
                }
                Err(error) => return Event::Failed(FailedEvent { error }),
            };

            if framing::is_end(&String::from_utf8_lossy(&line)) {
                return Event::EndObserved(EndObservedEvent {
                    report: TransferReport {
                        target: self.header.target.clone(),
                        bytes_sent: self.header.size,
                        relay_lines: self.relay_lines,
                        elapsed: host.started.elapsed(),
                    },
                });
            }

            if let Err(e) = host.echo.write_all(&line).and_then(|_| host.echo.flush()) {
                return Event::Failed(FailedEvent { error: e.into() });
            }
            self.relay_lines += 1;
        }
    }
}

// Done State ==================================================================

/// Terminal state holding the outcome of the transfer until the event loop
/// hands it back to the caller.
#[derive(Debug)]
pub(crate) struct DoneState {
    pub outcome: Option<Result<TransferReport>>,
}
