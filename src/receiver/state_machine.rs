//! Receiver state machine.
//!
//! A session starts in `Scanning` and, when it gets past a valid header, always
//! ends in `SessionClosed`, which is the only state writing the end marker.
//! Every session then starts over from `Scanning` with nothing carried over
//! from the previous one. The machine stops only when the link is lost.
//!
//! ```text
//!                   START
//!                     |
//!                     v
//!              .------------.  other text, malformed header
//!   .--------->|  Scanning  |<--------.
//!   |          '------------'---------'
//!   |     header      |
//!   |     parsed      v
//!   |          .--------------.  payload timeout
//!   |          | HeaderParsed |--------------------------> Scanning
//!   |          '--------------'
//!   |     payload    |      \  cannot store firmware
//!   |     stored     v       '---------------------.
//!   |          .------------.  cannot spawn tool   |
//!   |          |  Relaying  |-----------------.    |
//!   |          '------------'                 v    v
//!   |     tool        |              .----------------.
//!   |     exited      '------------->| SessionClosed  |
//!   |   rescan                       '----------------'
//!   '------------------------------------------'
//!
//!   link lost, from any state => Done
//! ```

use std::fmt;
use std::io::{Read, Write};

use log::{info, warn};

use super::events::*;
use super::states::*;

use crate::error::Error;
use crate::flasher::{Avrdude, Flasher};
use crate::gpio::{PinControl, SysfsGpio};
use crate::link::SerialLink;
use crate::settings::Settings;

// =============================================================================
// Public Interface
// =============================================================================

/// Serves transfer sessions over one serial link.
pub struct Receiver<P: Read + Write + Send> {
    bridge: Bridge<P>,
    sm: ReceiverStates,
}

impl<P: Read + Write + Send> Receiver<P> {
    /// Flash with `avrdude` as configured in `settings` and release the pins
    /// through sysfs.
    pub fn new(settings: Settings, port: P) -> Self {
        let flasher = Avrdude::from_settings(&settings);
        Receiver {
            bridge: Bridge {
                settings,
                link: SerialLink::new(port),
                flasher: Box::new(flasher),
                pins: Box::new(SysfsGpio::default()),
                sessions: 0,
            },
            sm: ReceiverStates::Scanning(ScanningState {}),
        }
    }

    pub fn with_flasher(mut self, flasher: impl Flasher + 'static) -> Self {
        self.bridge.flasher = Box::new(flasher);
        self
    }

    pub fn with_pins(mut self, pins: impl PinControl + 'static) -> Self {
        self.bridge.pins = Box::new(pins);
        self
    }

    /// Number of sessions closed with an end marker so far.
    pub fn sessions(&self) -> u64 {
        self.bridge.sessions
    }

    /// Serve sessions until the link is lost and return why.
    ///
    /// Calling it again resumes scanning on the same link.
    pub fn run(&mut self) -> Error {
        if let ReceiverStates::Done(_) = self.sm {
            self.sm = ReceiverStates::Scanning(ScanningState {});
        }
        loop {
            self.sm = self.sm.step(&mut self.bridge);
            if let ReceiverStates::Done(done) = &mut self.sm {
                let error = done.error.take().unwrap_or(Error::Disconnected);
                warn!("link lost after {} sessions: {}", self.bridge.sessions, error);
                return error;
            }
        }
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// Data shared by all states of the receiver, across sessions.
pub(crate) struct Bridge<P: Read + Write + Send> {
    pub settings: Settings,
    pub link: SerialLink<P>,
    pub flasher: Box<dyn Flasher>,
    pub pins: Box<dyn PinControl>,
    pub sessions: u64,
}

impl<P: Read + Write + Send> fmt::Debug for Bridge<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("port", &self.settings.path)
            .field("sessions", &self.sessions)
            .finish()
    }
}

/// An enum wrapper around the states of the receiver state machine.
#[derive(Debug)]
enum ReceiverStates {
    Scanning(ScanningState),
    HeaderParsed(HeaderParsedState),
    Relaying(RelayingState),
    SessionClosed(SessionClosedState),
    Done(DoneState),
}
impl ReceiverStates {
    /// The unit of work in the state machine event loop: run the current
    /// state and turn the event it returns into the next state.
    fn step<P: Read + Write + Send>(&mut self, bridge: &mut Bridge<P>) -> Self {
        match self {
            ReceiverStates::Scanning(state) => {
                let event = state.run(bridge);
                match event {
                    Event::HeaderParsed(ev) => ReceiverStates::HeaderParsed(ev.into()),
                    Event::LinkLost(ev) => ReceiverStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, state),
                }
            }
            ReceiverStates::HeaderParsed(state) => {
                let event = state.run(bridge);
                match event {
                    Event::PayloadReceived(ev) => ReceiverStates::Relaying(ev.into()),
                    Event::SessionAbandoned(ev) => ReceiverStates::Scanning(ev.into()),
                    Event::AbortSession(ev) => ReceiverStates::SessionClosed(ev.into()),
                    Event::LinkLost(ev) => ReceiverStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, state),
                }
            }
            ReceiverStates::Relaying(state) => {
                let event = state.run(bridge);
                match event {
                    Event::FlashFinished(ev) => ReceiverStates::SessionClosed(ev.into()),
                    Event::AbortSession(ev) => ReceiverStates::SessionClosed(ev.into()),
                    Event::LinkLost(ev) => ReceiverStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, state),
                }
            }
            ReceiverStates::SessionClosed(state) => {
                let event = state.run(bridge);
                match event {
                    Event::Rescan(ev) => ReceiverStates::Scanning(ev.into()),
                    Event::LinkLost(ev) => ReceiverStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, state),
                }
            }
            ReceiverStates::Done(state) => {
                unreachable!("no transition out of the terminal state {:#?}", state)
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<HeaderParsedEvent> for HeaderParsedState {
    fn from(event: HeaderParsedEvent) -> HeaderParsedState {
        info!("session for {}", event.header);
        HeaderParsedState {
            header: event.header,
        }
    }
}

impl From<PayloadReceivedEvent> for RelayingState {
    fn from(event: PayloadReceivedEvent) -> RelayingState {
        RelayingState {
            header: event.header,
            firmware: event.firmware,
        }
    }
}

impl From<SessionAbandonedEvent> for ScanningState {
    fn from(event: SessionAbandonedEvent) -> ScanningState {
        info!("dropped session for {}: {}", event.header, event.reason);
        ScanningState {}
    }
}

impl From<RescanEvent> for ScanningState {
    fn from(_: RescanEvent) -> ScanningState {
        ScanningState {}
    }
}

impl From<AbortSessionEvent> for SessionClosedState {
    fn from(event: AbortSessionEvent) -> SessionClosedState {
        SessionClosedState {
            header: event.header,
            notice: Some(event.notice),
            status: None,
            relayed: 0,
        }
    }
}

impl From<FlashFinishedEvent> for SessionClosedState {
    fn from(event: FlashFinishedEvent) -> SessionClosedState {
        SessionClosedState {
            header: event.header,
            notice: None,
            status: event.status,
            relayed: event.relayed,
        }
    }
}

impl From<LinkLostEvent> for DoneState {
    fn from(event: LinkLostEvent) -> DoneState {
        DoneState {
            error: Some(event.error),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::link::VirtualPort;
    use crate::settings::SettingsBuilder;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    struct Script(String);

    impl Flasher for Script {
        fn command(&self, _target: &str, _firmware: &Path) -> Command {
            let mut command = Command::new("sh");
            command.arg("-c").arg(&self.0);
            command
        }
    }

    struct Missing;

    impl Flasher for Missing {
        fn command(&self, _target: &str, _firmware: &Path) -> Command {
            Command::new("/nonexistent/avrbridge-flasher")
        }
    }

    #[derive(Clone, Default)]
    struct Pins(Arc<Mutex<Vec<u32>>>);

    impl PinControl for Pins {
        fn release(&mut self, pin: u32) -> io::Result<()> {
            self.0.lock().unwrap().push(pin);
            Ok(())
        }
    }

    fn settings(scratch: PathBuf) -> Settings {
        SettingsBuilder::new()
            .timeout(Duration::from_millis(100))
            .scratch_firmware(scratch)
            .finalize()
    }

    /// Lines sent back by the receiver up to and including the end marker.
    fn session_output(link: &mut SerialLink<VirtualPort>) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = String::from_utf8(link.read_line().unwrap()).unwrap();
            let end = crate::framing::is_end(&line);
            lines.push(line);
            if end {
                return lines;
            }
        }
    }

    fn spawn<F: Flasher + 'static>(
        settings: Settings,
        port: VirtualPort,
        flasher: F,
        pins: Pins,
    ) -> thread::JoinHandle<(Error, u64)> {
        thread::spawn(move || {
            let mut receiver = Receiver::new(settings, port)
                .with_flasher(flasher)
                .with_pins(pins);
            let error = receiver.run();
            (error, receiver.sessions())
        })
    }

    #[test]
    fn flashes_and_relays_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("main.hex");
        let (port, host) = VirtualPort::pair(Duration::from_millis(100));
        let pins = Pins::default();
        let worker = spawn(
            settings(scratch.clone()),
            port,
            Script("echo to-stdout; echo to-stderr >&2".into()),
            pins.clone(),
        );

        let mut host = SerialLink::new(host);
        host.writer().set_timeout(Duration::from_secs(5));
        host.write_all(b"boot noise\ntx-begin,atmega328p,5\nhello").unwrap();

        let mut lines = session_output(&mut host);
        assert_eq!(lines.pop().unwrap(), "tx-end\n");
        lines.sort();
        assert_eq!(lines, vec!["to-stderr\n", "to-stdout\n"]);
        assert_eq!(std::fs::read(&scratch).unwrap(), b"hello");
        assert_eq!(*pins.0.lock().unwrap(), vec![26, 19, 13, 6]);

        drop(host);
        let (error, sessions) = worker.join().unwrap();
        assert!(matches!(error, Error::Disconnected));
        assert_eq!(sessions, 1);
    }

    #[test]
    fn launch_failure_is_relayed_before_end_marker() {
        let dir = tempfile::tempdir().unwrap();
        let (port, host) = VirtualPort::pair(Duration::from_millis(100));
        let worker = spawn(
            settings(dir.path().join("main.hex")),
            port,
            Missing,
            Pins::default(),
        );

        let mut host = SerialLink::new(host);
        host.writer().set_timeout(Duration::from_secs(5));
        host.write_all(b"tx-begin,attiny85,3\nabc").unwrap();

        let lines = session_output(&mut host);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("/nonexistent/avrbridge-flasher"), "{}", lines[0]);
        assert_eq!(lines[1], "tx-end\n");

        drop(host);
        assert_eq!(worker.join().unwrap().1, 1);
    }

    #[test]
    fn short_payload_is_dropped_without_end_marker() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("main.hex");
        let (port, host) = VirtualPort::pair(Duration::from_millis(100));
        let worker = spawn(
            settings(scratch.clone()),
            port,
            Script("echo flashed".into()),
            Pins::default(),
        );

        let mut host = SerialLink::new(host);
        host.writer().set_timeout(Duration::from_secs(5));
        host.write_all(b"tx-begin,atmega328p,10\nabc").unwrap();
        thread::sleep(Duration::from_millis(400));
        host.write_all(b"tx-begin,atmega328p,2\nok").unwrap();

        let lines = session_output(&mut host);
        assert_eq!(lines, vec!["flashed\n", "tx-end\n"]);
        assert_eq!(std::fs::read(&scratch).unwrap(), b"ok");

        drop(host);
        assert_eq!(worker.join().unwrap().1, 1);
    }

    #[test]
    fn oversized_header_payload_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (port, host) = VirtualPort::pair(Duration::from_millis(100));
        let settings = SettingsBuilder::new()
            .timeout(Duration::from_millis(100))
            .scratch_firmware(dir.path().join("main.hex"))
            .max_payload(4)
            .finalize();
        let worker = spawn(settings, port, Script("echo flashed".into()), Pins::default());

        let mut host = SerialLink::new(host);
        host.writer().set_timeout(Duration::from_secs(5));
        // The rejected payload looks like a header itself and must not be
        // scanned.
        host.write_all(b"tx-begin,atmega328p,23\ntx-begin,atmega328p,1\nX")
            .unwrap();
        host.write_all(b"tx-begin,atmega328p,4\nabcd").unwrap();

        let lines = session_output(&mut host);
        assert_eq!(lines, vec!["flashed\n", "tx-end\n"]);
        assert_eq!(std::fs::read(dir.path().join("main.hex")).unwrap(), b"abcd");

        drop(host);
        assert_eq!(worker.join().unwrap().1, 1);
    }
}
