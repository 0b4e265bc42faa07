//! GPIO pins borrowed by the flashing tool to bit-bang the programming bus.
//!
//! `avrdude`'s `linuxgpio` programmer exports the pins through sysfs and does
//! not always give them back. After every flashing attempt the pins are
//! released again, on a best-effort basis.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use log::debug;

/// Default sysfs directory holding the `export`/`unexport` files.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// GPIO numbers wired to the programming pins of the target microcontroller.
///
/// Every role is configured independently.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PinAssignment {
    pub mosi: u32,
    pub miso: u32,
    pub sck: u32,
    pub reset: u32,
}

impl Default for PinAssignment {
    fn default() -> Self {
        PinAssignment {
            mosi: 26,
            miso: 19,
            sck: 13,
            reset: 6,
        }
    }
}

impl PinAssignment {
    /// All four pins, in release order.
    pub fn pins(&self) -> [u32; 4] {
        [self.mosi, self.miso, self.sck, self.reset]
    }
}

/// Capability to hand a GPIO pin back to the system.
pub trait PinControl: Send {
    fn release(&mut self, pin: u32) -> io::Result<()>;
}

/// Releases pins by writing their number to `<root>/unexport`.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SysfsGpio { root: root.into() }
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        SysfsGpio::new(SYSFS_GPIO_ROOT)
    }
}

impl PinControl for SysfsGpio {
    fn release(&mut self, pin: u32) -> io::Result<()> {
        let mut unexport = OpenOptions::new()
            .write(true)
            .open(self.root.join("unexport"))?;
        unexport.write_all(pin.to_string().as_bytes())
    }
}

/// Release every pin of `assignment`, ignoring failures.
///
/// A pin that was never exported makes the kernel reject the write; that is
/// the normal case after a failed flashing attempt.
pub fn release_all(control: &mut dyn PinControl, assignment: &PinAssignment) {
    for pin in assignment.pins().iter() {
        match control.release(*pin) {
            Ok(()) => debug!("released GPIO {}", pin),
            Err(e) => debug!("could not release GPIO {}: {}", pin, e),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct Flaky {
        released: Vec<u32>,
    }

    impl PinControl for Flaky {
        fn release(&mut self, pin: u32) -> io::Result<()> {
            self.released.push(pin);
            if pin % 2 == 0 {
                Err(io::Error::new(io::ErrorKind::InvalidInput, "not exported"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn default_roles_are_distinct() {
        let pins = PinAssignment::default();
        assert_eq!(pins.pins(), [26, 19, 13, 6]);
        assert_ne!(pins.mosi, pins.miso);
    }

    #[test]
    fn failures_do_not_stop_the_release() {
        let mut control = Flaky { released: vec![] };
        release_all(&mut control, &PinAssignment::default());
        assert_eq!(control.released, vec![26, 19, 13, 6]);
    }

    #[test]
    fn sysfs_writes_the_pin_number() {
        let dir = tempfile::tempdir().unwrap();
        let unexport = dir.path().join("unexport");
        fs::write(&unexport, "").unwrap();

        let mut gpio = SysfsGpio::new(dir.path());
        gpio.release(19).unwrap();
        assert_eq!(fs::read_to_string(&unexport).unwrap(), "19");
    }

    #[test]
    fn sysfs_without_unexport_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut gpio = SysfsGpio::new(dir.path());
        assert!(gpio.release(6).is_err());
    }
}
