//! Sender state machine.
//!
//! A transfer is a single pass through three states. The serial link is owned
//! by the [`Sender`] and released when [`Sender::run`] returns, whatever the
//! outcome.
//!
//! ```text
//!        START
//!          |
//!          v
//!      .-------.   payload   .--------------.
//!      | Idle  |------------>| AwaitingEcho |---.
//!      '-------'    sent     '--------------'   | relay line
//!          |                   |      ^  |      | (echoed)
//!       failed             end |      '--+------'
//!          |            marker |         | timeout / link error
//!          v                   v         v
//!      .-------------------------------------.
//!      |                Done                 |
//!      '-------------------------------------'
//! ```

use std::fmt;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use super::events::*;
use super::states::*;

use crate::error::{Error, Result};
use crate::link::SerialLink;
use crate::settings::Settings;

// =============================================================================
// Public Interface
// =============================================================================

/// Outcome of a successful transfer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TransferReport {
    pub target: String,
    /// Payload bytes pushed, header excluded.
    pub bytes_sent: u64,
    /// Lines of flashing tool output echoed before the end marker.
    pub relay_lines: usize,
    pub elapsed: Duration,
}

/// Pushes one firmware image through the serial link and waits for the
/// receiver to finish flashing it.
pub struct Sender<P: Read + Write> {
    host: Host<P>,
    sm: SenderStates,
}

impl<P: Read + Write> Sender<P> {
    /// Relay output is echoed on `stdout` unless [`with_echo`](Self::with_echo)
    /// says otherwise.
    pub fn new(settings: Settings, port: P) -> Self {
        Sender {
            host: Host {
                settings,
                link: SerialLink::new(port),
                echo: Box::new(io::stdout()),
                started: Instant::now(),
            },
            sm: SenderStates::Idle(IdleState {}),
        }
    }

    /// Echo the relay lines to `echo` instead of `stdout`.
    pub fn with_echo(mut self, echo: impl Write + 'static) -> Self {
        self.host.echo = Box::new(echo);
        self
    }

    /// Run the transfer to completion. The link is closed on return.
    ///
    /// A read timeout while waiting for the end marker is reported as
    /// [`Error::TransferTimeout`]; it is not retried.
    pub fn run(mut self) -> Result<TransferReport> {
        self.host.started = Instant::now();
        loop {
            self.sm = self.sm.step(&mut self.host);
            if let SenderStates::Done(done) = &mut self.sm {
                return done.outcome.take().unwrap_or_else(|| {
                    Err(Error::Configuration("transfer already completed".into()))
                });
            }
        }
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// Data shared by all states of the sender for the duration of one transfer.
pub(crate) struct Host<P: Read + Write> {
    pub settings: Settings,
    pub link: SerialLink<P>,
    pub echo: Box<dyn Write>,
    pub started: Instant,
}

impl<P: Read + Write> fmt::Debug for Host<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("port", &self.settings.path)
            .field("target", &self.settings.target)
            .finish()
    }
}

/// An enum wrapper around the states of the sender state machine.
#[derive(Debug)]
enum SenderStates {
    Idle(IdleState),
    AwaitingEcho(AwaitingEchoState),
    Done(DoneState),
}
impl SenderStates {
    /// The unit of work in the state machine event loop: run the current
    /// state and turn the event it returns into the next state.
    fn step<P: Read + Write>(&mut self, host: &mut Host<P>) -> Self {
        match self {
            SenderStates::Idle(state) => {
                let event = state.run(host);
                match event {
                    Event::PayloadSent(ev) => SenderStates::AwaitingEcho(ev.into()),
                    Event::Failed(ev) => SenderStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, state),
                }
            }
            SenderStates::AwaitingEcho(state) => {
                let event = state.run(host);
                match event {
                    Event::EndObserved(ev) => SenderStates::Done(ev.into()),
                    Event::Failed(ev) => SenderStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, state),
                }
            }
            SenderStates::Done(state) => {
                unreachable!("no transition out of the terminal state {:#?}", state)
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<PayloadSentEvent> for AwaitingEchoState {
    fn from(event: PayloadSentEvent) -> AwaitingEchoState {
        AwaitingEchoState {
            header: event.header,
            relay_lines: 0,
        }
    }
}

impl From<EndObservedEvent> for DoneState {
    fn from(event: EndObservedEvent) -> DoneState {
        DoneState {
            outcome: Some(Ok(event.report)),
        }
    }
}

impl From<FailedEvent> for DoneState {
    fn from(event: FailedEvent) -> DoneState {
        DoneState {
            outcome: Some(Err(event.error)),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
