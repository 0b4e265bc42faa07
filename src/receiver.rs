//! Relay side of a transfer: wait for frames, flash them, relay the output.
//!
//! The receiver runs on the board wired to the target microcontroller. It
//! serves any number of sessions over the same link, one at a time, and only
//! gives up when the link itself goes away.
//!
//! **Example** - Serving the host behind `/dev/ttyS0`:
//! ```no_run
//! use avrbridge::{self as ab, Receiver};
//!
//! let settings = ab::SettingsBuilder::new().path("/dev/ttyS0").finalize();
//! let port = ab::open_and_setup_port(&settings)?;
//! let mut receiver = Receiver::new(settings, port);
//! let reason = receiver.run();
//! eprintln!("link lost: {}", reason);
//! # Ok::<(), ab::Error>(())
//! ```

mod events;
mod state_machine;
mod states;

pub use state_machine::Receiver;
