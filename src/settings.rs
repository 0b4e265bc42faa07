//! Settings for the serial link, the flashing tool and the GPIO programmer.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values. The finalized [`Settings`] are built
//! once and handed to the [`Sender`](crate::Sender) or the
//! [`Receiver`](crate::Receiver).

use std::path::PathBuf;
use std::time::Duration;

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

pub use crate::gpio::PinAssignment;

// =============================================================================
// Public Interface
// =============================================================================

/// Groups all settings used by `avrbridge` on both ends of the serial link and
/// acts as a [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// The port name, usually the device path.
    pub path: Option<String>,
    /// The baud rate in symbols-per-second.
    pub baud_rate: u32,
    /// Read timeout applied to every blocking read on the serial link.
    pub timeout: Duration,
    /// Number of bits used to represent a character sent on the line.
    pub data_bits: DataBits,
    /// The type of signalling to use for controlling data transfer.
    pub flow_control: FlowControl,
    /// The type of parity to use for error checking.
    pub parity: Parity,
    /// Number of bits to use to signal the end of a character.
    pub stop_bits: StopBits,

    /// Microcontroller variant passed to the flashing tool (sender only).
    pub target: Option<String>,
    /// Path to the firmware image to push (sender only).
    pub firmware: Option<String>,

    /// System wide `avrdude` configuration the local copy is made from.
    pub base_configuration: PathBuf,
    /// Local `avrdude` configuration holding the GPIO programmer stanza.
    pub configuration: PathBuf,
    /// Where the receiver stores the firmware for the flashing tool. Overwritten
    /// by every session.
    pub scratch_firmware: PathBuf,
    /// GPIO pins wired to the programming bus of the target.
    pub pins: PinAssignment,
    /// Programmer id declared in the configuration stanza.
    pub programmer: String,
    /// The flashing tool.
    pub flasher: String,
    /// Run the flashing tool through `sudo`.
    pub elevate: bool,
    /// `avrdude` file format letter of the firmware.
    pub flash_format: String,
    /// Largest payload the receiver accepts, in bytes.
    pub max_payload: u64,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```
/// use avrbridge::SettingsBuilder;
///
/// let settings = SettingsBuilder::new()
///     .path("/dev/ttyACM0")
///     .target("atmega328p")
///     .firmware("main.hex")
///     .finalize();
/// assert_eq!(settings.baud_rate, 115_200);
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsBuilder {
    /// Start building the settings using default values and no path for the
    /// port.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                path: None,
                baud_rate: 115_200,
                timeout: Duration::from_secs(10),
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                target: None,
                firmware: None,
                base_configuration: PathBuf::from("/etc/avrdude.conf"),
                configuration: PathBuf::from("avrdude.conf"),
                scratch_firmware: PathBuf::from("/tmp/main.hex"),
                pins: PinAssignment::default(),
                programmer: "pi".into(),
                flasher: "avrdude".into(),
                elevate: true,
                flash_format: "i".into(),
                max_payload: 16 * 1024 * 1024,
                _private_use_builder: (),
            },
        }
    }

    /// Set the path to the serial port
    pub fn path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.path = Some(path.into().into_owned());
        self
    }

    /// Set the baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Set the read timeout of the serial link
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    /// Set the number of bits used to represent a character sent on the line
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.settings.data_bits = data_bits;
        self
    }

    /// Set the type of signalling to use for controlling data transfer
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.settings.flow_control = flow_control;
        self
    }

    /// Set the type of parity to use for error checking
    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    /// Set the number of bits to use to signal the end of a character
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.settings.stop_bits = stop_bits;
        self
    }

    /// Set the microcontroller variant to flash
    pub fn target<'a>(mut self, target: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.target = Some(target.into().into_owned());
        self
    }

    /// Set the path to the firmware image to push
    pub fn firmware<'a>(mut self, firmware: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.firmware = Some(firmware.into().into_owned());
        self
    }

    /// Set the system wide `avrdude` configuration
    pub fn base_configuration(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.base_configuration = path.into();
        self
    }

    /// Set the local `avrdude` configuration
    pub fn configuration(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.configuration = path.into();
        self
    }

    /// Set where the received firmware is stored before flashing
    pub fn scratch_firmware(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.scratch_firmware = path.into();
        self
    }

    /// Set the GPIO pins of the programming bus
    pub fn pins(mut self, pins: PinAssignment) -> Self {
        self.settings.pins = pins;
        self
    }

    /// Set the programmer id
    pub fn programmer<'a>(mut self, programmer: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.programmer = programmer.into().into_owned();
        self
    }

    /// Set the flashing tool
    pub fn flasher<'a>(mut self, flasher: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.flasher = flasher.into().into_owned();
        self
    }

    /// Run the flashing tool through `sudo` or not
    pub fn elevate(mut self, elevate: bool) -> Self {
        self.settings.elevate = elevate;
        self
    }

    /// Set the `avrdude` file format letter
    pub fn flash_format<'a>(mut self, format: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.flash_format = format.into().into_owned();
        self
    }

    /// Set the largest payload accepted by the receiver
    pub fn max_payload(mut self, max_payload: u64) -> Self {
        self.settings.max_payload = max_payload;
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            path: None,
            baud_rate: 115_200,
            timeout: Duration::from_secs(10),
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            target: None,
            firmware: None,
            base_configuration: PathBuf::from("/etc/avrdude.conf"),
            configuration: PathBuf::from("avrdude.conf"),
            scratch_firmware: PathBuf::from("/tmp/main.hex"),
            pins: PinAssignment {
                mosi: 26,
                miso: 19,
                sck: 13,
                reset: 6,
            },
            programmer: "pi".into(),
            flasher: "avrdude".into(),
            elevate: true,
            flash_format: "i".into(),
            max_payload: 16 * 1024 * 1024,
            _private_use_builder: (),
        }
    )
}

#[test]
fn path() {
    let settings = SettingsBuilder::new().path("/dev/ttyGS0").finalize();
    assert_eq!(settings.path.unwrap(), "/dev/ttyGS0");
}

#[test]
fn baud_rate() {
    let baud_rate = 9_600;
    let settings = SettingsBuilder::new().baud_rate(baud_rate).finalize();
    assert_eq!(settings.baud_rate, baud_rate);
}

#[test]
fn timeout() {
    let timeout = Duration::from_millis(250);
    let settings = SettingsBuilder::new().timeout(timeout).finalize();
    assert_eq!(settings.timeout, timeout);
}

#[test]
fn serial_framing() {
    let settings = SettingsBuilder::new()
        .data_bits(DataBits::Seven)
        .flow_control(FlowControl::Hardware)
        .stop_bits(StopBits::Two)
        .parity(Parity::Even)
        .finalize();
    assert_eq!(settings.data_bits, DataBits::Seven);
    assert_eq!(settings.flow_control, FlowControl::Hardware);
    assert_eq!(settings.stop_bits, StopBits::Two);
    assert_eq!(settings.parity, Parity::Even);
}

#[test]
fn sender_fields() {
    let settings = SettingsBuilder::new()
        .target("atmega328p")
        .firmware("build/main.hex")
        .finalize();
    assert_eq!(settings.target.unwrap(), "atmega328p");
    assert_eq!(settings.firmware.unwrap(), "build/main.hex");
}

#[test]
fn pins_are_independent() {
    let pins = PinAssignment {
        mosi: 10,
        miso: 9,
        sck: 11,
        reset: 25,
    };
    let settings = SettingsBuilder::new().pins(pins).finalize();
    assert_eq!(settings.pins.mosi, 10);
    assert_eq!(settings.pins.miso, 9);
}

#[test]
fn receiver_fields() {
    let settings = SettingsBuilder::new()
        .base_configuration("/usr/share/avrdude.conf")
        .configuration("/var/lib/avrbridge/avrdude.conf")
        .scratch_firmware("/run/avrbridge.hex")
        .programmer("gpio")
        .flasher("avrdude7")
        .elevate(false)
        .flash_format("a")
        .max_payload(1024)
        .finalize();
    assert_eq!(settings.base_configuration, PathBuf::from("/usr/share/avrdude.conf"));
    assert_eq!(settings.configuration, PathBuf::from("/var/lib/avrbridge/avrdude.conf"));
    assert_eq!(settings.scratch_firmware, PathBuf::from("/run/avrbridge.hex"));
    assert_eq!(settings.programmer, "gpio");
    assert_eq!(settings.flasher, "avrdude7");
    assert!(!settings.elevate);
    assert_eq!(settings.flash_format, "a");
    assert_eq!(settings.max_payload, 1024);
}
