//! Events for the receiver state machine.
//!
//! This modules is private and restricted to the [`receiver`](crate::receiver)
//! scope. Refer to the [`state_machine`](super::state_machine) module for an
//! overview of states, events and transitions.

use std::path::PathBuf;
use std::process::ExitStatus;

use crate::error::Error;
use crate::framing::FrameHeader;

// =============================================================================
// Crate-Public Interface
// =============================================================================

// HeaderParsedEvent ===========================================================

/// Event fired when a valid start header was scanned. Triggers the transition
/// from `Scanning` to `HeaderParsed`.
#[derive(Debug)]
pub(crate) struct HeaderParsedEvent {
    pub header: FrameHeader,
}

// PayloadReceivedEvent ========================================================

/// Event fired once the whole payload is stored in the scratch file. Triggers
/// the transition from `HeaderParsed` to `Relaying`.
#[derive(Debug)]
pub(crate) struct PayloadReceivedEvent {
    pub header: FrameHeader,
    pub firmware: PathBuf,
}

// SessionAbandonedEvent =======================================================

/// Event fired when the payload did not arrive in time. The session is dropped
/// without an end marker and scanning resumes.
#[derive(Debug)]
pub(crate) struct SessionAbandonedEvent {
    pub header: FrameHeader,
    pub reason: Error,
}

// AbortSessionEvent ===========================================================

/// Event fired when a session cannot reach the flashing tool. The `notice` is
/// relayed to the host in place of the tool output before the end marker.
#[derive(Debug)]
pub(crate) struct AbortSessionEvent {
    pub header: FrameHeader,
    pub notice: String,
}

// FlashFinishedEvent ==========================================================

/// Event fired when the flashing tool exited and both of its streams are
/// drained.
#[derive(Debug)]
pub(crate) struct FlashFinishedEvent {
    pub header: FrameHeader,
    pub status: Option<ExitStatus>,
    pub relayed: usize,
}

// RescanEvent =================================================================

/// Event fired after the end marker went out. Starts a fresh session.
#[derive(Debug)]
pub(crate) struct RescanEvent {}

// LinkLostEvent ===============================================================

/// Event fired from any state when the serial link is gone.
#[derive(Debug)]
pub(crate) struct LinkLostEvent {
    pub error: Error,
}

// Events enum ==================================================================

/// Events that can be triggered within the receiver state machine.
#[derive(Debug)]
pub(crate) enum Event {
    HeaderParsed(HeaderParsedEvent),
    PayloadReceived(PayloadReceivedEvent),
    SessionAbandoned(SessionAbandonedEvent),
    AbortSession(AbortSessionEvent),
    FlashFinished(FlashFinishedEvent),
    Rescan(RescanEvent),
    LinkLost(LinkLostEvent),
}
