//! # Picnet Sapp Protocol Engine
//!
//! A Rust library for communicating with Sinthesi Picnet MAS controllers
//! over the Sapp protocol: a checksummed, hex-ASCII framed request/response
//! protocol over TCP.
//!
//! The library covers two layers:
//!
//! - a **protocol layer**: frame codec, command set, response decoding and
//!   a session with address validation and reconnect-and-retry, and
//! - an **engine layer**: a register cache with differential polling, a
//!   write queue, and a watchdog-supervised background poll loop that
//!   turns raw register words into per-item change notifications.
//!
//! ## Features
//!
//! - **Complete command set** — inputs, outputs, virtual variables, user
//!   alarms, and the differential "changed since last read" commands
//! - **Checksummed framing** — every frame is validated before decoding;
//!   corruption surfaces as [`SappError::BadChecksum`]
//! - **Bounded retries** — every operation retries a fixed number of
//!   times with a connection refresh between attempts, never forever
//! - **Differential polling** — after one full pass per bank, each poll
//!   cycle fetches only the registers the MAS reports as changed
//! - **No panics** — all errors returned as `Result<T, SappError>`
//!
//! ## Quick Start
//!
//! Protocol layer, one command at a time:
//!
//! ```no_run
//! use picnet_sapp::Sapp;
//! use std::time::Duration;
//!
//! fn main() -> picnet_sapp::Result<()> {
//!     let mut sapp = Sapp::connect("192.168.1.100", 7001, Duration::from_secs(5))?;
//!
//!     // Read input module 1
//!     let word = sapp.read_input(1)?;
//!     println!("input 1 = 0x{word:04X}");
//!
//!     // Set virtual variable 120
//!     sapp.write_virtual(120, 1)?;
//!
//!     // Fetch everything that changed since the last differential read
//!     for (addr, value) in sapp.read_changed_virtuals()? {
//!         println!("virtual {addr} -> {value}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Engine layer, subscription-driven:
//!
//! ```no_run
//! use picnet_sapp::{
//!     AnalogItem, BankKind, DigitalItem, PollerConfig, SappItem, SappPoller,
//! };
//!
//! let poller = SappPoller::connect(PollerConfig::new("192.168.1.100"))?;
//!
//! // A light switch on bit 3 of output module 10
//! poller.subscribe_item("light", SappItem::Digital(
//!     DigitalItem::new(BankKind::Output, 10, 3),
//! ));
//! // A temperature on virtual 200, scaled by 10
//! poller.subscribe_item("temp", SappItem::Analog(
//!     AnalogItem::new(BankKind::Virtual, 200).with_divisor(10.0),
//! ));
//!
//! poller.on_change(|id, value| println!("{id} changed: {value:?}"));
//! poller.on_offline(|| eprintln!("MAS offline"));
//! poller.start();
//!
//! // Writes from any thread, dispatched by the poll loop in FIFO order
//! poller.enqueue_write(120, 1);
//! # Ok::<(), picnet_sapp::SappError>(())
//! ```
//!
//! ## Register Banks
//!
//! The MAS exposes three register banks, each a map from address to a
//! 16-bit word:
//!
//! | Bank | Addresses | Writable | Differential read |
//! |------|-----------|:--------:|:-----------------:|
//! | [`BankKind::Input`] | 0..=250 | ✗ | ✓ |
//! | [`BankKind::Output`] | 0..=250 | ✗ | ✓ |
//! | [`BankKind::Virtual`] | 0..=2500 | ✓ | ✓ |
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, SappError>`]. The library never
//! panics in public code.
//!
//! ```no_run
//! use picnet_sapp::{Sapp, SappError};
//! use std::time::Duration;
//!
//! let mut sapp = Sapp::connect("192.168.1.100", 7001, Duration::from_secs(5))?;
//!
//! match sapp.read_virtual(120) {
//!     Ok(value) => println!("value: {value}"),
//!     Err(SappError::Timeout) => println!("communication timeout"),
//!     Err(SappError::Device(code)) => println!("device refused: {code}"),
//!     Err(SappError::BadChecksum { expected, computed }) => {
//!         println!("line corruption: 0x{expected:04X} != 0x{computed:04X}");
//!     }
//!     Err(e) => println!("error: {e}"),
//! }
//! # Ok::<(), SappError>(())
//! ```
//!
//! ## Configuration
//!
//! ```no_run
//! use picnet_sapp::PollerConfig;
//! use std::time::Duration;
//!
//! let config = PollerConfig::new("192.168.1.100")
//!     .with_port(7001)                             // MAS port (default: 7001)
//!     .with_timeout(Duration::from_secs(5))        // response timeout
//!     .with_poll_interval(Duration::from_millis(100))
//!     .with_watchdog_period(Duration::from_secs(1));
//! ```
//!
//! ## Design Philosophy
//!
//! The protocol layer is deterministic: one command, one framed request,
//! one framed response, and a fixed retry budget on top. The engine layer
//! owns all mutation: register banks and items are touched only by the
//! poll loop, so external threads interact exclusively through the queue
//! and the subscription API, and a change notification always reflects a
//! real transition of the derived value.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod cache;
pub mod codec;
mod command;
mod error;
mod executor;
pub mod items;
mod poller;
mod queue;
mod response;
mod session;
mod transport;

// Public re-exports
pub use cache::{BankKind, BankState, RegisterBank, RegisterCache};
pub use command::SappCommand;
pub use error::{DeviceCode, Result, SappError};
pub use executor::SappExecutor;
pub use items::{AnalogItem, DigitalItem, ItemValue, SappItem};
pub use poller::{PollerConfig, PollerState, SappPoller};
pub use queue::{CommandQueue, WriteRequest};
pub use response::SappResponse;
pub use session::{Sapp, MAX_MODULE_ADDR, MAX_VIRTUAL_ADDR, RETRY_NUM};
pub use transport::{SappTransport, DEFAULT_MAS_PORT, DEFAULT_TIMEOUT};
