//! Driver for PCAL64-family 16-bit I2C port-expanders (two 8-bit ports,
//! per-pin direction, edge-latched interrupts), built around a non-blocking
//! register transaction engine.  See [`Pcal64`] for the poll-mode driver
//! and, with the `"async"` feature, [`asynch::Pcal64Async`] for the
//! `embedded-hal-async` front-end.
#![cfg_attr(not(test), no_std)]

mod builder;
mod bus;
mod common;
mod driver;
mod engine;
mod irq;

#[cfg(feature = "async")]
pub mod asynch;

pub use builder::Batch;
pub use bus::{BlockingBus, Bus, Completion};
pub use common::{Direction, Error, Level, Pin};
pub use driver::Pcal64;
pub use engine::Event;
pub use irq::IrqLine;
