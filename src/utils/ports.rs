//! Serial port device manipulation.

use std::path::Path;
use std::{thread, time::Duration};

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use serialport::{available_ports, SerialPort};

use crate::error::{Error, Result};
use crate::Settings;

//==============================================================================
// Public Interface
//==============================================================================

/// Open the port named in `settings` with its baud rate, framing and read
/// timeout.
///
/// A missing or busy device and unusable settings fail right away with
/// [`Error::Configuration`]; other errors (e.g. a transient I/O error while
/// the device settles) are retried a few times before giving up.
pub fn open_and_setup_port(settings: &Settings) -> Result<Box<dyn SerialPort>> {
    use retry::{delay, retry_with_index, OperationResult};

    let path = settings
        .path
        .clone()
        .ok_or_else(|| Error::Configuration("no serial port given".into()))?;

    let result = retry_with_index(
        delay::Fixed::from_millis(1000).take(3),
        |index| -> OperationResult<Box<dyn SerialPort>, serialport::Error> {
            debug!("Trying to connect {}", index);
            let builder = serialport::new(&path, settings.baud_rate)
                .data_bits(settings.data_bits)
                .stop_bits(settings.stop_bits)
                .parity(settings.parity)
                .flow_control(settings.flow_control)
                .timeout(settings.timeout);
            match builder.open() {
                Ok(port) => OperationResult::Ok(port),
                Err(e) if is_fatal(&e) => OperationResult::Err(e),
                Err(e) => OperationResult::Retry(e),
            }
        },
    );

    match result {
        Ok(port) => {
            info!(
                "Connected to {} at {} baud",
                port.name().unwrap_or_else(|| path.clone()),
                settings.baud_rate
            );
            debug!("data_bits    : {:#?}", port.data_bits());
            debug!("stop_bits    : {:#?}", port.stop_bits());
            debug!("parity       : {:#?}", port.parity());
            debug!("flow control : {:#?}", port.flow_control());
            debug!("timeout      : {:?}", port.timeout());

            // Some drivers silently keep their previous rate.
            match port.baud_rate() {
                Ok(actual) if actual != settings.baud_rate => Err(Error::Configuration(format!(
                    "{} does not support {} baud (got {})",
                    path, settings.baud_rate, actual
                ))),
                _ => Ok(port),
            }
        }
        Err(retry::Error::Operation {
            error,
            total_delay,
            tries,
        }) => {
            info!(
                "Failed to open the port after {:?} and {} tries: {}",
                total_delay, tries, error,
            );
            Err(Error::Configuration(format!("cannot open {}: {}", path, error)))
        }
        Err(retry::Error::Internal(reason)) => {
            info!("Internal retry error while opening port: {}", reason);
            Err(Error::Configuration(format!(
                "internal error while retrying to open {}",
                path
            )))
        }
    }
}

/// Check for a device with the given path in the system. If not immediately
/// found, enter into a waiting loop, checking every period of time whether the
/// device has been created or not.
///
/// Used by the receiver after its link was lost (e.g. the USB gadget port went
/// away with the host cable).
pub fn wait_for_port(path: &str) {
    if port_present(path) {
        return;
    }

    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(120);
    pb.set_style(
        ProgressStyle::default_spinner()
            // For more spinners check out the cli-spinners project:
            // https://github.com/sindresorhus/cli-spinners/blob/master/spinners.json
            .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
            .template("[AB] {spinner:.blue} {msg}"),
    );

    let waiting_period = 2;
    let mut attempt: usize = 1;
    loop {
        if port_present(path) {
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
            break;
        }
        pb.set_message(format!(
            "[{:03}s] ⏳ Waiting for {} to be ready...",
            style(attempt * waiting_period).dim(),
            style(path).cyan()
        ));
        thread::sleep(Duration::from_secs(waiting_period as u64));
        attempt += 1;
    }
}

//==============================================================================
// Private stuff
//==============================================================================

fn is_fatal(error: &serialport::Error) -> bool {
    use serialport::ErrorKind;
    use std::io::ErrorKind as IoKind;

    matches!(
        error.kind(),
        ErrorKind::NoDevice
            | ErrorKind::InvalidInput
            | ErrorKind::Io(IoKind::NotFound)
            | ErrorKind::Io(IoKind::PermissionDenied)
    ) || is_busy(error)
}

/// `serialport` has no kind for `EBUSY` (another process holds the exclusive
/// lock), it only shows in the description.
fn is_busy(error: &serialport::Error) -> bool {
    matches!(error.kind(), serialport::ErrorKind::Io(_))
        && error.description.to_lowercase().contains("busy")
}

/// Device nodes like `/dev/ttyGS0` are not always enumerated, so the path on
/// disk is checked too.
fn port_present(path: &str) -> bool {
    if Path::new(path).exists() {
        return true;
    }
    match available_ports() {
        Ok(ports) => ports.iter().any(|p| p.port_name == path),
        Err(ref e) => {
            info!("error: {}", e.to_string());
            false
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
