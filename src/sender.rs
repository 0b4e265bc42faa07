//! Host side of a transfer: push a firmware image and echo what comes back.
//!
//! **Example** - Pushing `main.hex` to an `atmega328p` behind `/dev/ttyACM0`:
//! ```no_run
//! use avrbridge::{self as ab, Sender};
//!
//! let settings = ab::SettingsBuilder::new()
//!     .path("/dev/ttyACM0")
//!     .target("atmega328p")
//!     .firmware("main.hex")
//!     .finalize();
//! let port = ab::open_and_setup_port(&settings)?;
//! let report = Sender::new(settings, port).run()?;
//! println!("{} relay lines", report.relay_lines);
//! # Ok::<(), ab::Error>(())
//! ```

mod events;
mod state_machine;
mod states;

pub use state_machine::{Sender, TransferReport};
