//! The external flashing tool.
//!
//! The receiver only needs a [`Command`] to spawn; everything about which
//! program runs and with which arguments lives behind the [`Flasher`] trait.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::settings::Settings;

/// Builds the command that writes `firmware` to a `target` microcontroller.
pub trait Flasher: Send {
    fn command(&self, target: &str, firmware: &Path) -> Command;
}

/// `avrdude` driving the GPIO programmer declared in the provisioned
/// configuration file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Avrdude {
    /// Program to run, looked up in `PATH` when not absolute.
    pub program: String,
    /// Run through `sudo`, sysfs GPIO needs root on most boards.
    pub elevate: bool,
    /// Configuration file holding the programmer stanza.
    pub configuration: PathBuf,
    /// Programmer id, as declared in the configuration file.
    pub programmer: String,
    /// `avrdude` file format letter for the firmware (`i` for Intel HEX).
    pub format: String,
}

impl Avrdude {
    pub fn from_settings(settings: &Settings) -> Self {
        Avrdude {
            program: settings.flasher.clone(),
            elevate: settings.elevate,
            configuration: settings.configuration.clone(),
            programmer: settings.programmer.clone(),
            format: settings.flash_format.clone(),
        }
    }

    /// Arguments passed to `avrdude` itself.
    pub fn arguments(&self, target: &str, firmware: &Path) -> Vec<String> {
        vec![
            "-p".into(),
            target.into(),
            "-C".into(),
            self.configuration.display().to_string(),
            "-c".into(),
            self.programmer.clone(),
            "-v".into(),
            "-U".into(),
            format!("flash:w:{}:{}", firmware.display(), self.format),
        ]
    }
}

impl Flasher for Avrdude {
    fn command(&self, target: &str, firmware: &Path) -> Command {
        let mut command = if self.elevate {
            let mut sudo = Command::new("sudo");
            sudo.arg(&self.program);
            sudo
        } else {
            Command::new(&self.program)
        };
        command.args(self.arguments(target, firmware));
        command
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
