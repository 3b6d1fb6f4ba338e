//! Async device front-end, using embedded-hal-async's [`i2c::I2c`] trait.
//!
//! This module is only built if the `"async"` feature is enabled.
//!
//! [`Pcal64Async`] runs the same register transaction engine as the
//! poll-mode driver, but suspends with `.await` at every bus boundary
//! instead of returning to a poll loop.  Exclusive `&mut self` access makes
//! the busy rejection of the poll-mode driver a compile-time property here:
//! a second operation cannot even be started while one is awaited.
//!
//! Interrupt servicing becomes an ordinary operation:
//! [`Pcal64Async::service_interrupt`] is typically called after an
//! `embedded_hal_async::digital::Wait::wait_for_falling_edge` on the MCU
//! pin wired to the expander's interrupt line.
//!
//! [`i2c::I2c`]: embedded_hal_async::i2c::I2c

use embedded_hal_async::i2c::I2c;

use crate::engine::{Done, Engine, Event, Op, Step, Xfer};
use crate::{Direction, Error, Level, Pin};

/// One PCAL64 expander on an async I2C bus.
///
/// `addr` selects between the two strap-selectable bus addresses
/// (`false` = 0x20, `true` = 0x21).
pub struct Pcal64Async<I2C> {
    i2c: I2C,
    addr: u8,
    engine: Engine,
}

impl<I2C: I2c> Pcal64Async<I2C> {
    pub fn new(i2c: I2C, addr: bool) -> Self {
        Self {
            i2c,
            addr: 0x20 | (addr as u8),
            engine: Engine::new(),
        }
    }

    /// Give back the bus.
    pub fn release(self) -> I2C {
        self.i2c
    }

    async fn xfer(&mut self, xfer: Xfer) -> Result<Done, I2C::Error> {
        match xfer {
            Xfer::Read(reg) => {
                let mut buf = [0x00; 2];
                self.i2c
                    .write_read(self.addr, &[reg.into()], &mut buf)
                    .await?;
                Ok(Done::Read(u16::from_le_bytes(buf)))
            }
            Xfer::Write(reg, value) => {
                let bytes = value.to_le_bytes();
                self.i2c
                    .write(self.addr, &[reg.into(), bytes[0], bytes[1]])
                    .await?;
                Ok(Done::Write)
            }
        }
    }

    /// Drive one operation through the engine to its completion event.
    async fn run(&mut self, op: Op) -> Result<Event, Error<I2C::Error>> {
        let mut next = self.engine.start(op).map_err(|_| Error::Busy)?;
        loop {
            let done = match self.xfer(next).await {
                Ok(done) => done,
                Err(err) => {
                    self.engine.abort();
                    return Err(Error::Bus(err));
                }
            };
            match self.engine.advance(done).map_err(|_| Error::Unsolicited)? {
                Step::Transfer(xfer) => next = xfer,
                Step::Complete(event) => return Ok(event),
            }
        }
    }

    /// Configure `pin` as input or output.  Writes only if the direction
    /// actually changes.
    pub async fn mode(&mut self, pin: Pin, dir: Direction) -> Result<(), Error<I2C::Error>> {
        self.run(Op::Mode { pin, dir }).await.map(|_| ())
    }

    /// Drive `pin` to `level`.  Writes only if the output latch actually
    /// changes.
    pub async fn write(&mut self, pin: Pin, level: Level) -> Result<(), Error<I2C::Error>> {
        self.run(Op::Write { pin, level }).await.map(|_| ())
    }

    /// Read the current input level of `pin`.
    pub async fn read(&mut self, pin: Pin) -> Result<Level, Error<I2C::Error>> {
        let values = self.bulk_read().await?;
        Ok(Level::from(values & pin.mask() != 0))
    }

    /// Invert the output latch of `pin`.  Always writes.
    pub async fn toggle(&mut self, pin: Pin) -> Result<(), Error<I2C::Error>> {
        self.run(Op::Toggle { pin }).await.map(|_| ())
    }

    /// Reconfigure direction and output level for all pins in `pins`; see
    /// [`Pcal64::bulk_write`](crate::Pcal64::bulk_write) for the mask
    /// conventions.
    pub async fn bulk_write(
        &mut self,
        pins: u16,
        directions: u16,
        values: u16,
    ) -> Result<(), Error<I2C::Error>> {
        self.run(Op::BulkWrite {
            pins,
            directions,
            values,
        })
        .await
        .map(|_| ())
    }

    /// Invert the output latches of all pins in `pins`.
    pub async fn bulk_toggle(&mut self, pins: u16) -> Result<(), Error<I2C::Error>> {
        self.run(Op::BulkToggle { pins }).await.map(|_| ())
    }

    /// Enable (`enabled` bit 1) or disable interrupt generation for the
    /// pins in `pins`, forcing them to inputs first.
    pub async fn bulk_set_interrupts(
        &mut self,
        pins: u16,
        enabled: u16,
    ) -> Result<(), Error<I2C::Error>> {
        self.run(Op::BulkSetInterrupts { pins, enabled })
            .await
            .map(|_| ())
    }

    /// Read all 16 input values.
    pub async fn bulk_read(&mut self) -> Result<u16, Error<I2C::Error>> {
        match self.run(Op::BulkRead).await? {
            Event::Input(values) => Ok(values),
            _ => Err(Error::Unsolicited),
        }
    }

    /// Service a falling edge on the interrupt line.
    ///
    /// Returns `(changed, values)`: the pins that latched an edge (the
    /// status read clears the latch) and the input snapshot captured
    /// immediately before the status was read.
    pub async fn service_interrupt(&mut self) -> Result<(u16, u16), Error<I2C::Error>> {
        match self.run(Op::ServiceInterrupt).await? {
            Event::Interrupt { changed, values } => Ok((changed, values)),
            _ => Err(Error::Unsolicited),
        }
    }

    /// Start accumulating per-pin changes for a single combined
    /// [`bulk_write`](Pcal64Async::bulk_write).
    pub fn batch(&mut self) -> AsyncBatch<'_, I2C> {
        AsyncBatch {
            dev: self,
            pins: 0,
            directions: 0,
            values: 0,
            explicit: 0,
        }
    }
}

/// Accumulator for one combined bulk write; async counterpart of
/// [`Batch`](crate::Batch).
#[must_use = "a batch issues nothing until `commit` is called"]
pub struct AsyncBatch<'a, I2C> {
    dev: &'a mut Pcal64Async<I2C>,
    pins: u16,
    directions: u16,
    values: u16,
    explicit: u16,
}

impl<'a, I2C: I2c> AsyncBatch<'a, I2C> {
    /// Record a direction change for `pin`.
    pub fn direction(mut self, pin: Pin, dir: Direction) -> Self {
        self.pins |= pin.mask();
        self.explicit |= pin.mask();
        match dir {
            Direction::Output => self.directions |= pin.mask(),
            Direction::Input => self.directions &= !pin.mask(),
        }
        self
    }

    /// Record an output level for `pin`; implies `Direction::Output` unless
    /// a direction was set explicitly.
    pub fn level(mut self, pin: Pin, level: Level) -> Self {
        self.pins |= pin.mask();
        if self.explicit & pin.mask() == 0 {
            self.directions |= pin.mask();
        }
        match level {
            Level::High => self.values |= pin.mask(),
            Level::Low => self.values &= !pin.mask(),
        }
        self
    }

    /// Issue the accumulated changes as a single bulk write, or nothing if
    /// nothing was accumulated.
    pub async fn commit(self) -> Result<(), Error<I2C::Error>> {
        if self.pins == 0 {
            return Ok(());
        }
        self.dev
            .bulk_write(self.pins, self.directions, self.values)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_hal_mock::eh1::i2c as mock_i2c;

    #[test]
    fn mode_reads_then_writes_the_single_changed_bit() {
        let expectations = [
            mock_i2c::Transaction::write_read(0x20, vec![0x06], vec![0x00, 0x00]),
            mock_i2c::Transaction::write(0x20, vec![0x06, 0x08, 0x00]),
        ];
        let mut i2c = mock_i2c::Mock::new(&expectations);

        let mut dev = Pcal64Async::new(i2c.clone(), false);
        block_on(dev.mode(Pin::P0_3, Direction::Input)).unwrap();

        i2c.done();
    }

    #[test]
    fn read_extracts_a_single_pin_from_the_snapshot() {
        let expectations = [
            mock_i2c::Transaction::write_read(0x20, vec![0x00], vec![0x00, 0x04]),
            mock_i2c::Transaction::write_read(0x20, vec![0x00], vec![0x00, 0x04]),
        ];
        let mut i2c = mock_i2c::Mock::new(&expectations);

        let mut dev = Pcal64Async::new(i2c.clone(), false);
        assert_eq!(block_on(dev.read(Pin::P1_2)).unwrap(), Level::High);
        assert_eq!(block_on(dev.read(Pin::P0_2)).unwrap(), Level::Low);

        i2c.done();
    }

    #[test]
    fn bulk_write_runs_two_round_trips_in_order() {
        let expectations = [
            mock_i2c::Transaction::write_read(0x21, vec![0x06], vec![0xFF, 0xFF]),
            mock_i2c::Transaction::write(0x21, vec![0x06, 0xD7, 0xFF]),
            mock_i2c::Transaction::write_read(0x21, vec![0x02], vec![0xFF, 0xFF]),
            mock_i2c::Transaction::write(0x21, vec![0x02, 0xDF, 0xFF]),
        ];
        let mut i2c = mock_i2c::Mock::new(&expectations);

        let mut dev = Pcal64Async::new(i2c.clone(), true);
        block_on(dev.bulk_write(0x0028, 0x0028, 0x0008)).unwrap();

        i2c.done();
    }

    #[test]
    fn service_interrupt_reads_input_before_status() {
        let expectations = [
            mock_i2c::Transaction::write_read(0x20, vec![0x00], vec![0x0F, 0x00]),
            mock_i2c::Transaction::write_read(0x20, vec![0x4C], vec![0x01, 0x00]),
        ];
        let mut i2c = mock_i2c::Mock::new(&expectations);

        let mut dev = Pcal64Async::new(i2c.clone(), false);
        assert_eq!(
            block_on(dev.service_interrupt()).unwrap(),
            (0x0001, 0x000F)
        );

        i2c.done();
    }

    #[test]
    fn bus_fault_aborts_and_leaves_the_driver_usable() {
        let expectations = [
            mock_i2c::Transaction::write_read(0x20, vec![0x02], vec![0x00, 0x00])
                .with_error(embedded_hal::i2c::ErrorKind::Other),
            mock_i2c::Transaction::write_read(0x20, vec![0x02], vec![0x00, 0x00]),
            mock_i2c::Transaction::write(0x20, vec![0x02, 0x01, 0x00]),
        ];
        let mut i2c = mock_i2c::Mock::new(&expectations);

        let mut dev = Pcal64Async::new(i2c.clone(), false);
        assert!(matches!(
            block_on(dev.toggle(Pin::P0_0)),
            Err(Error::Bus(_))
        ));
        block_on(dev.toggle(Pin::P0_0)).unwrap();

        i2c.done();
    }

    #[test]
    fn batch_commits_one_bulk_write() {
        let expectations = [
            mock_i2c::Transaction::write_read(0x20, vec![0x06], vec![0xFF, 0xFF]),
            mock_i2c::Transaction::write(0x20, vec![0x06, 0xDF, 0xFB]),
            mock_i2c::Transaction::write_read(0x20, vec![0x02], vec![0x00, 0x00]),
            mock_i2c::Transaction::write(0x20, vec![0x02, 0x20, 0x00]),
        ];
        let mut i2c = mock_i2c::Mock::new(&expectations);

        let mut dev = Pcal64Async::new(i2c.clone(), false);
        block_on(
            dev.batch()
                .level(Pin::P0_5, Level::High)
                .level(Pin::P1_2, Level::Low)
                .commit(),
        )
        .unwrap();

        i2c.done();
    }

    #[test]
    fn empty_batch_commits_to_nothing() {
        let mut i2c = mock_i2c::Mock::new(&[]);
        let mut dev = Pcal64Async::new(i2c.clone(), false);
        block_on(dev.batch().commit()).unwrap();
        i2c.done();
    }
}
