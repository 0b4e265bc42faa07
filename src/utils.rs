//! Helper functions to deal with serial ports and firmware images.

mod firmware;
mod ports;

pub(crate) use firmware::{dump, persist_image, push_frame, read_image};
pub use ports::{open_and_setup_port, wait_for_port};
