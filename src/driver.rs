//! The poll-mode device front-end.
//!
//! [`Pcal64`] owns a split-phase [`Bus`] and one register transaction
//! engine.  Operations are accepted or rejected synchronously; accepted
//! operations run to completion as [`Pcal64::poll`] feeds bus completions
//! through the engine.  `poll` belongs in the application's main loop or
//! wherever the bus signals completion, never in interrupt context.
//!
//! Only one logical operation is in flight at a time.  A request while the
//! engine is busy fails with [`Error::Busy`] and changes nothing; there is
//! no queue.  The single exception is the interrupt line: a falling edge
//! reported while busy is latched in a one-slot flag and serviced as soon
//! as the engine returns to idle, so no interrupt is dropped.

use crate::builder::Batch;
use crate::bus::{start_xfer, Bus, Completion};
use crate::engine::{Done, Engine, Event, Op, Step};
use crate::{Direction, Error, Level, Pin};

/// One PCAL64 expander.
///
/// `addr` selects between the two strap-selectable bus addresses
/// (`false` = 0x20, `true` = 0x21).
pub struct Pcal64<B: Bus> {
    bus: B,
    addr: u8,
    engine: Engine,
    irq_pending: bool,
}

impl<B: Bus> Pcal64<B> {
    pub fn new(bus: B, addr: bool) -> Self {
        Self {
            bus,
            addr: 0x20 | (addr as u8),
            engine: Engine::new(),
            irq_pending: false,
        }
    }

    /// Whether a new operation would currently be accepted.
    pub fn is_idle(&self) -> bool {
        self.engine.is_idle()
    }

    /// Give back the bus.
    pub fn release(self) -> B {
        self.bus
    }

    fn begin(&mut self, op: Op) -> Result<(), Error<B::BusError>> {
        let xfer = self.engine.start(op).map_err(|_| Error::Busy)?;
        if let Err(err) = start_xfer(&mut self.bus, self.addr, xfer) {
            self.engine.abort();
            return Err(Error::Bus(err));
        }
        Ok(())
    }

    /// Configure `pin` as input or output.
    ///
    /// If the pin already has the requested direction, the sequence ends
    /// after the register read, without a write.  Completes with
    /// [`Event::Done`].
    pub fn mode(&mut self, pin: Pin, dir: Direction) -> Result<(), Error<B::BusError>> {
        self.begin(Op::Mode { pin, dir })
    }

    /// Drive `pin` (when configured as output) to `level`.
    ///
    /// Skips the register write if the output latch already holds the
    /// requested level.  Completes with [`Event::Done`].
    pub fn write(&mut self, pin: Pin, level: Level) -> Result<(), Error<B::BusError>> {
        self.begin(Op::Write { pin, level })
    }

    /// Invert the output latch of `pin`.  Always writes, even if the
    /// flipped value happens to equal what another master wrote in the
    /// meantime.  Completes with [`Event::Done`].
    pub fn toggle(&mut self, pin: Pin) -> Result<(), Error<B::BusError>> {
        self.begin(Op::Toggle { pin })
    }

    /// Reconfigure direction and output level for all pins in `pins` in one
    /// operation: two read-modify-write round-trips (configuration first,
    /// then output), unconditionally.  Bit conventions: `directions` 1 =
    /// output, `values` 1 = high; bits outside `pins` are untouched.
    /// Completes with [`Event::Done`].
    pub fn bulk_write(
        &mut self,
        pins: u16,
        directions: u16,
        values: u16,
    ) -> Result<(), Error<B::BusError>> {
        self.begin(Op::BulkWrite {
            pins,
            directions,
            values,
        })
    }

    /// Invert the output latches of all pins in `pins`.  Completes with
    /// [`Event::Done`].
    pub fn bulk_toggle(&mut self, pins: u16) -> Result<(), Error<B::BusError>> {
        self.begin(Op::BulkToggle { pins })
    }

    /// Enable (`enabled` bit 1) or disable interrupt generation for the
    /// pins in `pins`, forcing them to inputs first.  Completes with
    /// [`Event::Done`].
    pub fn bulk_set_interrupts(
        &mut self,
        pins: u16,
        enabled: u16,
    ) -> Result<(), Error<B::BusError>> {
        self.begin(Op::BulkSetInterrupts { pins, enabled })
    }

    /// Read all 16 input values.  Completes with [`Event::Input`].
    pub fn bulk_read(&mut self) -> Result<(), Error<B::BusError>> {
        self.begin(Op::BulkRead)
    }

    /// Start accumulating per-pin changes for a single combined
    /// [`bulk_write`](Pcal64::bulk_write).
    pub fn batch(&mut self) -> Batch<'_, B> {
        Batch::new(self)
    }

    /// Report a falling edge on the expander's interrupt line.
    ///
    /// Call this from thread context after the edge was latched (see
    /// [`IrqLine`](crate::IrqLine)).  If the engine is idle, servicing
    /// starts immediately; otherwise the edge is remembered and servicing
    /// starts right after the in-flight operation completes.  Servicing
    /// completes with [`Event::Interrupt`].
    pub fn interrupt(&mut self) -> Result<(), Error<B::BusError>> {
        if self.engine.is_idle() {
            self.begin(Op::ServiceInterrupt)
        } else {
            self.irq_pending = true;
            Ok(())
        }
    }

    /// Drive the in-flight operation forward.
    ///
    /// Picks up at most one bus completion, advances the engine, and issues
    /// the sequence's next transfer if there is one.  Returns
    /// `Ok(Some(event))` when a logical operation finished.  A bus fault
    /// aborts the in-flight operation and is returned as [`Error::Bus`];
    /// the engine is idle again afterwards and retrying is the caller's
    /// decision.
    pub fn poll(&mut self) -> Result<Option<Event>, Error<B::BusError>> {
        // A deferred interrupt is picked up as soon as the engine is idle.
        if self.engine.is_idle() && self.irq_pending {
            self.irq_pending = false;
            self.begin(Op::ServiceInterrupt)?;
        }
        let done = match self.bus.poll_complete() {
            None => return Ok(None),
            Some(Completion::Fault(err)) => {
                self.engine.abort();
                return Err(Error::Bus(err));
            }
            Some(Completion::Read(bytes)) => Done::Read(u16::from_le_bytes(bytes)),
            Some(Completion::Write) => Done::Write,
        };
        match self.engine.advance(done).map_err(|_| Error::Unsolicited)? {
            Step::Transfer(xfer) => {
                if let Err(err) = start_xfer(&mut self.bus, self.addr, xfer) {
                    self.engine.abort();
                    return Err(Error::Bus(err));
                }
                Ok(None)
            }
            Step::Complete(event) => Ok(Some(event)),
        }
    }
}
