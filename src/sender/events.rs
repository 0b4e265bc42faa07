//! Events for the sender state machine.
//!
//! This modules is private and restricted to the [`sender`](crate::sender)
//! scope. Refer to the [`state_machine`](super::state_machine) module for an
//! overview of states, events and transitions.

use crate::error::Error;
use crate::framing::FrameHeader;

use super::state_machine::TransferReport;

// =============================================================================
// Crate-Public Interface
// =============================================================================

// PayloadSentEvent ============================================================

/// Event fired once the header and the whole payload have been written to the
/// link. Triggers the transition from `Idle` to `AwaitingEcho`.
#[derive(Debug)]
pub(crate) struct PayloadSentEvent {
    pub header: FrameHeader,
}

// EndObservedEvent ============================================================

/// Event fired when the receiver's end marker was read. Triggers the
/// transition to `Done`.
#[derive(Debug)]
pub(crate) struct EndObservedEvent {
    pub report: TransferReport,
}

// FailedEvent =================================================================

/// Event fired from any state when the transfer cannot complete: unreadable
/// image, bad target, broken link or no end marker within the read timeout.
#[derive(Debug)]
pub(crate) struct FailedEvent {
    pub error: Error,
}

// Events enum ==================================================================

/// Events that can be triggered within the sender state machine.
#[derive(Debug)]
pub(crate) enum Event {
    PayloadSent(PayloadSentEvent),
    EndObserved(EndObservedEvent),
    Failed(FailedEvent),
}
