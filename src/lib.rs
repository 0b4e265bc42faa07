//! Avrbridge flashes AVR microcontrollers over a serial link. A host pushes a
//! firmware image to a relay board wired to the target through GPIO pins; the
//! relay runs `avrdude` with a `linuxgpio` programmer and streams the tool's
//! output back to the host, line by line, while it runs.
//!
//! Both ends speak a small framing protocol on the same serial line:
//!
//! * `tx-begin,<target>,<size>\n` followed by exactly `<size>` raw bytes,
//!   from the host,
//! * any number of text lines from the flashing tool, then `tx-end\n`, from
//!   the relay.
//!
//! The host side is the [`Sender`], the relay side is the [`Receiver`]. Both
//! are implemented as state machines. State machines are implemented in terms
//! of **states** and **transitions** between them with the following
//! characteristics:
//!
//! * Can only be in one state at any time.
//! * Each state can have its own associated data if needed.
//! * It is possible to have some shared data between **all** states.
//! * Transitions between states are triggered via typed **events** and follow
//!   defined semantics.
//! * Transitioning from one state to another consumes the original state and
//!   renders it unusable. Any transition back to that state would create a new
//!   state.
//! * Data can be transferred from one state to the next by attaching it to the
//!   transition event.
//!
//! The implementation of state transitions leverages `rust`'s `From` and `Into`
//! pattern: every authorized transition is a `From<Event> for State`
//! implementation, any other transition is rejected at compile-time.

mod error;
pub mod flasher;
pub mod framing;
pub mod gpio;
pub mod link;
pub mod provision;
mod receiver;
pub mod relay;
mod sender;
mod settings;
mod utils;

pub use error::{Error, Result};
pub use receiver::Receiver;
pub use sender::{Sender, TransferReport};
pub use settings::{
    DataBits, FlowControl, Parity, PinAssignment, Settings, SettingsBuilder, StopBits,
};
pub use utils::{open_and_setup_port, wait_for_port};
