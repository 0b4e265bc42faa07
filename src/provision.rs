//! One-time preparation of the `avrdude` configuration used by the receiver.
//!
//! The system wide configuration does not know about the GPIO programmer, so a
//! local copy is made on the first run and a `linuxgpio` programmer stanza is
//! appended to it. Later runs reuse the local copy as it is, so the stanza is
//! never appended twice.

use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::gpio::PinAssignment;

/// What [`provision_configuration`] did.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Provisioning {
    /// The local copy was created from the base configuration.
    Created,
    /// A local copy already existed and was left untouched.
    Reused,
}

/// Render the programmer stanza for the given pins.
pub fn programmer_stanza(programmer: &str, pins: &PinAssignment) -> String {
    format!(
        "
programmer
  id    = \"{id}\";
  desc  = \"Use the Linux sysfs interface to bitbang GPIO lines\";
  type  = \"linuxgpio\";
  reset = {reset};
  sck   = {sck};
  miso  = {miso};
  mosi  = {mosi};
;
",
        id = programmer,
        reset = pins.reset,
        sck = pins.sck,
        miso = pins.miso,
        mosi = pins.mosi,
    )
}

/// Make sure `local` exists, creating it from `base` plus the programmer
/// stanza when it does not.
///
/// The new file is written in one go, so an interrupted first run never leaves
/// a copy without its stanza behind.
pub fn provision_configuration(
    base: &Path,
    local: &Path,
    programmer: &str,
    pins: &PinAssignment,
) -> Result<Provisioning> {
    if local.exists() {
        debug!("reusing avrdude configuration {}", local.display());
        return Ok(Provisioning::Reused);
    }

    let mut content = fs::read(base).map_err(|e| {
        Error::Configuration(format!(
            "cannot read base avrdude configuration {}: {}",
            base.display(),
            e
        ))
    })?;
    content.extend_from_slice(programmer_stanza(programmer, pins).as_bytes());
    fs::write(local, &content)?;

    info!(
        "created avrdude configuration {} from {}",
        local.display(),
        base.display()
    );
    Ok(Provisioning::Created)
}

// =============================================================================
// Unit Tests
// =============================================================================
