//! End-to-end transfers between a `Sender` and a `Receiver` joined by an
//! in-memory serial link.

#![cfg(unix)]

use std::cell::RefCell;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::Command;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use avrbridge::flasher::Flasher;
use avrbridge::gpio::PinControl;
use avrbridge::link::{SerialLink, VirtualPort};
use avrbridge::{Error, Receiver, Sender, Settings, SettingsBuilder};

use tempfile::TempDir;

/// Shell snippet standing in for `avrdude`; `$0` is the target and `$1` the
/// firmware path.
struct ShellFlasher {
    script: String,
    spawned: Arc<AtomicUsize>,
}

impl ShellFlasher {
    fn new(script: &str) -> Self {
        ShellFlasher {
            script: script.into(),
            spawned: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Flasher for ShellFlasher {
    fn command(&self, target: &str, firmware: &Path) -> Command {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let mut command = Command::new("sh");
        command.arg("-c").arg(&self.script).arg(target).arg(firmware);
        command
    }
}

#[derive(Clone, Default)]
struct RecordingPins(Arc<Mutex<Vec<u32>>>);

impl PinControl for RecordingPins {
    fn release(&mut self, pin: u32) -> io::Result<()> {
        self.0.lock().unwrap().push(pin);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Echo(Rc<RefCell<Vec<u8>>>);

impl Echo {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.borrow().clone())
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }
}

impl Write for Echo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Bench {
    dir: TempDir,
    timeout: Duration,
}

impl Bench {
    fn new() -> Self {
        Bench {
            dir: tempfile::tempdir().unwrap(),
            timeout: Duration::from_secs(5),
        }
    }

    fn receiver_settings(&self) -> Settings {
        SettingsBuilder::new()
            .timeout(self.timeout)
            .scratch_firmware(self.dir.path().join("scratch.hex"))
            .elevate(false)
            .finalize()
    }

    fn sender_settings(&self, target: &str, image: &[u8]) -> Settings {
        let firmware = self.dir.path().join("main.hex");
        fs::write(&firmware, image).unwrap();
        SettingsBuilder::new()
            .timeout(self.timeout)
            .target(target)
            .firmware(firmware.to_str().unwrap())
            .finalize()
    }

    fn scratch(&self) -> Vec<u8> {
        fs::read(self.dir.path().join("scratch.hex")).unwrap()
    }

    /// Start a receiver on one end of a fresh link and hand back the other end.
    fn start(
        &self,
        settings: Settings,
        flasher: Option<ShellFlasher>,
        pins: RecordingPins,
    ) -> (VirtualPort, thread::JoinHandle<(Error, u64)>) {
        let (relay, host) = VirtualPort::pair(settings.timeout);
        let worker = thread::spawn(move || {
            let mut receiver = Receiver::new(settings, relay).with_pins(pins);
            if let Some(flasher) = flasher {
                receiver = receiver.with_flasher(flasher);
            }
            let error = receiver.run();
            (error, receiver.sessions())
        });
        (host, worker)
    }
}

#[test]
fn empty_image_still_runs_the_flasher() {
    let bench = Bench::new();
    let flasher = ShellFlasher::new("echo \"flashing $0 from $1\"");
    let spawned = flasher.spawned.clone();
    let pins = RecordingPins::default();
    let (host, worker) = bench.start(bench.receiver_settings(), Some(flasher), pins.clone());

    let echo = Echo::default();
    let report = Sender::new(bench.sender_settings("atmega328p", b""), host)
        .with_echo(echo.clone())
        .run()
        .unwrap();

    assert_eq!(report.bytes_sent, 0);
    assert_eq!(report.relay_lines, 1);
    let lines = echo.lines();
    assert!(lines[0].starts_with("flashing atmega328p from "), "{:?}", lines);
    assert!(lines[0].ends_with("scratch.hex"), "{:?}", lines);

    let (error, sessions) = worker.join().unwrap();
    assert!(matches!(error, Error::Disconnected));
    assert_eq!(sessions, 1);
    assert_eq!(spawned.load(Ordering::SeqCst), 1);
    assert!(bench.scratch().is_empty());
    assert_eq!(*pins.0.lock().unwrap(), vec![26, 19, 13, 6]);
}

#[test]
fn both_streams_are_relayed_in_full() {
    let bench = Bench::new();
    let flasher = ShellFlasher::new(
        "i=0; while [ $i -lt 500 ]; do echo \"out $i\"; echo \"err $i\" >&2; i=$((i+1)); done; \
         printf 'no newline'",
    );
    let (host, worker) = bench.start(bench.receiver_settings(), Some(flasher), RecordingPins::default());

    let image: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let echo = Echo::default();
    let report = Sender::new(bench.sender_settings("atmega2560", &image), host)
        .with_echo(echo.clone())
        .run()
        .unwrap();

    assert_eq!(report.bytes_sent, 10_000);
    assert_eq!(report.relay_lines, 1001);
    assert_eq!(bench.scratch(), image);

    let lines = echo.lines();
    for i in 0..500 {
        let out = format!("out {}", i);
        let err = format!("err {}", i);
        assert_eq!(lines.iter().filter(|l| **l == out).count(), 1, "{}", out);
        assert_eq!(lines.iter().filter(|l| **l == err).count(), 1, "{}", err);
    }
    assert!(lines.contains(&"no newline".to_string()));
    assert!(!lines.iter().any(|l| l.starts_with("tx-end")));

    let (_, sessions) = worker.join().unwrap();
    assert_eq!(sessions, 1);
}

#[test]
fn short_payload_times_out_on_both_ends() {
    let mut bench = Bench::new();
    bench.timeout = Duration::from_millis(200);
    let flasher = ShellFlasher::new("echo flashed");
    let spawned = flasher.spawned.clone();
    let (mut host, worker) = bench.start(bench.receiver_settings(), Some(flasher), RecordingPins::default());

    host.write_all(b"tx-begin,atmega328p,100\n0123456789").unwrap();

    let mut link = SerialLink::new(host);
    let err = link.read_line().unwrap_err();
    assert!(err.is_timeout(), "{}", err);

    drop(link);
    let (error, sessions) = worker.join().unwrap();
    assert!(error.is_link_lost());
    assert_eq!(sessions, 0);
    assert_eq!(spawned.load(Ordering::SeqCst), 0);
}

#[test]
fn malformed_header_is_skipped() {
    let bench = Bench::new();
    let flasher = ShellFlasher::new("echo flashed");
    let spawned = flasher.spawned.clone();
    let (mut host, worker) = bench.start(bench.receiver_settings(), Some(flasher), RecordingPins::default());

    host.write_all(b"tx-begin,onlyonefield\nboot noise\n").unwrap();

    let echo = Echo::default();
    let report = Sender::new(bench.sender_settings("attiny85", b"abc"), host)
        .with_echo(echo.clone())
        .run()
        .unwrap();

    assert_eq!(report.relay_lines, 1);
    assert_eq!(echo.lines(), vec!["flashed"]);
    assert_eq!(bench.scratch(), b"abc");

    let (_, sessions) = worker.join().unwrap();
    assert_eq!(sessions, 1);
    assert_eq!(spawned.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_flasher_still_ends_the_session() {
    let bench = Bench::new();
    let settings = SettingsBuilder::new()
        .timeout(bench.timeout)
        .scratch_firmware(bench.dir.path().join("scratch.hex"))
        .flasher("/nonexistent/avrdude")
        .elevate(false)
        .finalize();
    let pins = RecordingPins::default();
    let (host, worker) = bench.start(settings, None, pins.clone());

    let echo = Echo::default();
    let report = Sender::new(bench.sender_settings("atmega328p", b":00000001FF\n"), host)
        .with_echo(echo.clone())
        .run()
        .unwrap();

    assert_eq!(report.relay_lines, 1);
    let lines = echo.lines();
    assert!(lines[0].contains("failed to launch `/nonexistent/avrdude`"), "{:?}", lines);

    let (_, sessions) = worker.join().unwrap();
    assert_eq!(sessions, 1);
    assert_eq!(pins.0.lock().unwrap().len(), 4);
}

#[test]
fn sessions_follow_each_other_on_one_link() {
    let bench = Bench::new();
    let flasher = ShellFlasher::new("echo \"flashed $0\"");
    let spawned = flasher.spawned.clone();
    let (host, worker) = bench.start(bench.receiver_settings(), Some(flasher), RecordingPins::default());

    // The sender consumes its port, so drive the second session by hand on
    // the same end once the first one has completed.
    let mut link = SerialLink::new(host);
    for target in &["atmega328p", "attiny85"] {
        link.write_all(avrbridge::framing::encode_start(target, 2).as_bytes())
            .unwrap();
        link.write_all(b"ok").unwrap();
        let first = String::from_utf8(link.read_line().unwrap()).unwrap();
        assert_eq!(first, format!("flashed {}\n", target));
        let end = String::from_utf8(link.read_line().unwrap()).unwrap();
        assert!(avrbridge::framing::is_end(&end));
    }

    drop(link);
    let (_, sessions) = worker.join().unwrap();
    assert_eq!(sessions, 2);
    assert_eq!(spawned.load(Ordering::SeqCst), 2);
}

#[test]
fn fragment_left_by_an_aborted_host_is_forgotten() {
    let mut bench = Bench::new();
    bench.timeout = Duration::from_millis(100);
    let flasher = ShellFlasher::new("echo flashed");
    let spawned = flasher.spawned.clone();
    let (mut host, worker) = bench.start(bench.receiver_settings(), Some(flasher), RecordingPins::default());
    host.set_timeout(Duration::from_secs(5));

    // Half a header, then silence well past the receiver's read timeout.
    host.write_all(b"tx-beg").unwrap();
    thread::sleep(Duration::from_millis(500));
    host.write_all(b"tx-begin,atmega328p,2\nok").unwrap();

    let mut link = SerialLink::new(host);
    let first = String::from_utf8(link.read_line().unwrap()).unwrap();
    assert_eq!(first, "flashed\n");
    let end = String::from_utf8(link.read_line().unwrap()).unwrap();
    assert!(avrbridge::framing::is_end(&end));
    assert_eq!(bench.scratch(), b"ok");

    drop(link);
    let (_, sessions) = worker.join().unwrap();
    assert_eq!(sessions, 1);
    assert_eq!(spawned.load(Ordering::SeqCst), 1);
}
