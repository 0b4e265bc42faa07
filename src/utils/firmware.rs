//! Helper functions moving the firmware image between disk and the serial
//! link.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, log_enabled, trace, Level::Debug};

use hexplay::HexViewBuilder;

use crate::error::{Error, Result};
use crate::link::SerialLink;

/// Size of the chunks the payload is pushed in, for progress reporting.
const CHUNK_SIZE: usize = 1024;

/// Number of leading payload bytes dumped at debug level.
const DUMP_SIZE: usize = 64;

/// Read the whole firmware image into memory.
pub(crate) fn read_image(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        debug!("`{}` error: {}", path, e);
        Error::Configuration(format!("cannot read firmware image `{}`: {}", path, e))
    })
}

/// Store a received image where the flashing tool picks it up, replacing the
/// previous one.
pub(crate) fn persist_image(path: &Path, image: &[u8]) -> Result<()> {
    fs::write(path, image)?;
    debug!("{} bytes stored in {}", image.len(), path.display());
    Ok(())
}

/// Write the header line immediately followed by the raw payload.
pub(crate) fn push_frame<P: Read + Write>(
    link: &mut SerialLink<P>,
    header_line: &str,
    payload: &[u8],
) -> Result<()> {
    link.write_all(header_line.as_bytes())?;

    let pb = ProgressBar::new(payload.len() as u64);
    pb.set_style(ProgressStyle::default_bar()
        .template("[AB] ⏩ Pushing [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .progress_chars("=>-"));

    let mut written = 0;
    for chunk in payload.chunks(CHUNK_SIZE) {
        link.write_all(chunk)?;
        written += chunk.len();
        trace!("{} bytes written to serial port", written);
        pb.set_position(written as u64);
    }
    pb.finish_with_message("[AB] Firmware uploaded");

    Ok(())
}

/// Dump the first bytes of `data` in a hex table when debugging.
pub(crate) fn dump(label: &str, data: &[u8]) {
    if log_enabled!(Debug) {
        let shown = &data[..data.len().min(DUMP_SIZE)];
        let view = HexViewBuilder::new(shown)
            .address_offset(0)
            .row_width(16)
            .finish();
        debug!("{} ({} bytes):\n{}", label, data.len(), view);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::VirtualPort;
    use std::time::Duration;

    #[test]
    fn frame_is_header_then_raw_bytes() {
        let (host, mut relay) = VirtualPort::pair(Duration::from_millis(200));
        let mut link = SerialLink::new(host);
        let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

        push_frame(&mut link, "tx-begin,atmega328p,3000\n", &payload).unwrap();
        drop(link);

        let mut wire = Vec::new();
        relay.read_to_end(&mut wire).unwrap();
        let (header, body) = wire.split_at("tx-begin,atmega328p,3000\n".len());
        assert_eq!(header, b"tx-begin,atmega328p,3000\n");
        assert_eq!(body, &payload[..]);
    }

    #[test]
    fn missing_image_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.hex");
        let err = read_image(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn persisted_image_replaces_the_previous_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.hex");
        persist_image(&path, b":00000001FF\nlonger previous content").unwrap();
        persist_image(&path, b":00000001FF\n").unwrap();
        assert_eq!(read_image(path.to_str().unwrap()).unwrap(), b":00000001FF\n");
    }
}
