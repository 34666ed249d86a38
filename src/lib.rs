//! A library for driving Gilson liquid-handling instruments over the GSIOC bus.
//!
//! The crate has two layers:
//!
//!  * [`bus`]: the GSIOC protocol engine. A [`Bus`] owns the serial line
//!    through a worker thread and multiplexes immediate and buffered
//!    instructions to any number of registered devices.
//!  * [`quadz`]: a controller for the Quad-Z 215 liquid handler and the 402
//!    dual syringe pumps that feed its probes, with closed-loop moves and
//!    fluid transfers.
//!
//! ```rust
//! # use gsioc::{Probe, QuadZ};
//! # use std::time::Duration;
//! # fn wrapper() -> Result<(), gsioc::Error> {
//! let quadz = QuadZ::open_serial("/dev/ttyUSB0")?;
//! quadz.initialize()?;
//! quadz.add_pump(1, Probe::One, Probe::Two)?;
//! quadz.move_to(250, 1200, Probe::One, Duration::from_secs(10))?;
//! quadz.move_probe(-40, &[Probe::One, Probe::Two], true, Duration::from_secs(5))?;
//! quadz.pump(&[100.0, 100.0])?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(all(doc, feature = "doc_cfg"), feature(doc_cfg))]

pub mod backend;
pub mod bus;
pub mod error;
mod probe;
pub mod quadz;
#[cfg(any(test, feature = "mock"))]
#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "mock")))]
pub mod sim;
pub mod syringe;

pub use bus::{Bus, BusOptions};
pub use error::Error;
pub use probe::Probe;
pub use quadz::{ControlOptions, QuadZ};
