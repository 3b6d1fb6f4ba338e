//! The split-phase bus transport.
//!
//! The engine never blocks on the wire: a transfer is *started*, the bus
//! works on it in the background (DMA, interrupt-driven peripheral, RTOS
//! I2C service), and its completion is picked up later.  [`Bus`] is that
//! contract.  At most one transfer is outstanding per device; the driver
//! guarantees it never starts a second one before the first completed.
//!
//! For platforms without a split-phase I2C service (and for tests), the
//! [`BlockingBus`] adapter wraps any [`embedded_hal::i2c::I2c`]
//! implementation: each transfer runs synchronously at start time and is
//! reported complete on the following poll.

use crate::engine::Xfer;

/// Completion of a previously started transfer, delivered exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion<E> {
    /// A read finished; the two data bytes, in wire order (port 0 first).
    Read([u8; 2]),
    /// A write finished.
    Write,
    /// The transfer failed.
    Fault(E),
}

/// A non-blocking register transport.
///
/// `start_read` and `start_write` only *begin* a transfer: two data bytes
/// from or to the register pair starting at `reg`, on the device at the
/// 7-bit address `addr`.  The outcome is delivered through
/// [`Bus::poll_complete`], exactly once per started transfer.  An `Err`
/// from a start method means the transfer could not be issued at all (for
/// example, a full command queue); wire-level failures arrive as
/// [`Completion::Fault`] instead.
pub trait Bus {
    type BusError;

    /// Begin reading two bytes starting at register `reg`.
    fn start_read(&mut self, addr: u8, reg: u8) -> Result<(), Self::BusError>;

    /// Begin writing two bytes starting at register `reg`.
    fn start_write(&mut self, addr: u8, reg: u8, bytes: [u8; 2]) -> Result<(), Self::BusError>;

    /// Take the completion of the outstanding transfer, if it has finished.
    fn poll_complete(&mut self) -> Option<Completion<Self::BusError>>;
}

pub(crate) fn start_xfer<B: Bus>(bus: &mut B, addr: u8, xfer: Xfer) -> Result<(), B::BusError> {
    match xfer {
        Xfer::Read(reg) => bus.start_read(addr, reg.into()),
        Xfer::Write(reg, value) => bus.start_write(addr, reg.into(), value.to_le_bytes()),
    }
}

/// Adapter that runs transfers synchronously over a blocking
/// [`embedded_hal::i2c::I2c`] bus.
///
/// The transfer happens inside `start_read`/`start_write`; the result
/// (including a bus fault) is held back and handed out on the next
/// [`Bus::poll_complete`], preserving the driver's start-then-complete flow.
pub struct BlockingBus<I2C: embedded_hal::i2c::I2c> {
    i2c: I2C,
    done: Option<Completion<I2C::Error>>,
}

impl<I2C: embedded_hal::i2c::I2c> BlockingBus<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self { i2c, done: None }
    }

    /// Give back the wrapped bus.
    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C: embedded_hal::i2c::I2c> Bus for BlockingBus<I2C> {
    type BusError = I2C::Error;

    fn start_read(&mut self, addr: u8, reg: u8) -> Result<(), Self::BusError> {
        let mut buf = [0x00; 2];
        self.done = Some(match self.i2c.write_read(addr, &[reg], &mut buf) {
            Ok(()) => Completion::Read(buf),
            Err(err) => Completion::Fault(err),
        });
        Ok(())
    }

    fn start_write(&mut self, addr: u8, reg: u8, bytes: [u8; 2]) -> Result<(), Self::BusError> {
        self.done = Some(match self.i2c.write(addr, &[reg, bytes[0], bytes[1]]) {
            Ok(()) => Completion::Write,
            Err(err) => Completion::Fault(err),
        });
        Ok(())
    }

    fn poll_complete(&mut self) -> Option<Completion<Self::BusError>> {
        self.done.take()
    }
}
