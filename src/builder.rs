//! Batching of per-pin changes into one bulk operation.
//!
//! Every bulk write costs two I2C round-trips, so changing several pins one
//! call at a time multiplies bus traffic for no benefit.  A [`Batch`]
//! accumulates any number of per-pin direction and level intents and turns
//! them into exactly one `bulk_write` when [`Batch::commit`] is called:
//!
//! ```ignore
//! dev.batch()
//!     .direction(Pin::P0_5, Direction::Output)
//!     .level(Pin::P0_5, Level::High)
//!     .level(Pin::P1_2, Level::Low)
//!     .commit()?;
//! ```
//!
//! The side effect fires only in `commit`: dropping a batch issues
//! nothing, and a batch that never accumulated anything commits to nothing.

use crate::bus::Bus;
use crate::driver::Pcal64;
use crate::{Direction, Error, Level, Pin};

/// Accumulator for one combined bulk write.
///
/// Single-use and single-owner: it borrows the device exclusively, so no
/// other operation can slip in between accumulation and commit.
#[must_use = "a batch issues nothing until `commit` is called"]
pub struct Batch<'a, B: Bus> {
    dev: &'a mut Pcal64<B>,
    pins: u16,
    directions: u16,
    values: u16,
    /// Pins whose direction was set explicitly, as opposed to implied by a
    /// `level` call.
    explicit: u16,
}

impl<'a, B: Bus> Batch<'a, B> {
    pub(crate) fn new(dev: &'a mut Pcal64<B>) -> Self {
        Self {
            dev,
            pins: 0,
            directions: 0,
            values: 0,
            explicit: 0,
        }
    }

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

    /// Record an output level for `pin`.
    ///
    /// A level on a pin without an explicit [`direction`](Batch::direction)
    /// call implies `Direction::Output`, since the bulk write always
    /// applies a direction to every accumulated pin.
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

    /// Issue the accumulated changes as a single bulk write.
    ///
    /// With nothing accumulated this is a no-op and touches the bus zero
    /// times.  Otherwise it behaves exactly like
    /// [`Pcal64::bulk_write`] with the union of all accumulated pins.
    pub fn commit(self) -> Result<(), Error<B::BusError>> {
        if self.pins == 0 {
            return Ok(());
        }
        self.dev.bulk_write(self.pins, self.directions, self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BlockingBus;
    use crate::engine::Event;
    use embedded_hal_mock::eh1::i2c as mock_i2c;

    fn poll_event<B: Bus>(dev: &mut Pcal64<B>) -> Event
    where
        B::BusError: core::fmt::Debug,
    {
        for _ in 0..8 {
            if let Some(event) = dev.poll().unwrap() {
                return event;
            }
        }
        panic!("operation did not complete");
    }

    #[test]
    fn empty_batch_commits_to_nothing() {
        let mut i2c = mock_i2c::Mock::new(&[]);
        let mut dev = Pcal64::new(BlockingBus::new(i2c.clone()), false);
        dev.batch().commit().unwrap();
        assert!(dev.is_idle());
        i2c.done();
    }

    #[test]
    fn dropped_batch_issues_nothing() {
        let mut i2c = mock_i2c::Mock::new(&[]);
        let mut dev = Pcal64::new(BlockingBus::new(i2c.clone()), false);
        let batch = dev.batch().level(Pin::P0_0, Level::High);
        drop(batch);
        assert!(dev.is_idle());
        i2c.done();
    }

    #[test]
    fn two_pins_become_one_bulk_write() {
        let expectations = [
            mock_i2c::Transaction::write_read(0x20, vec![0x06], vec![0xFF, 0xFF]),
            // union of P0_5 and P1_2, both outputs (chip: 0 = output)
            mock_i2c::Transaction::write(0x20, vec![0x06, 0xDF, 0xFB]),
            mock_i2c::Transaction::write_read(0x20, vec![0x02], vec![0x00, 0x00]),
            // P0_5 high, P1_2 low
            mock_i2c::Transaction::write(0x20, vec![0x02, 0x20, 0x00]),
        ];
        let mut i2c = mock_i2c::Mock::new(&expectations);

        let mut dev = Pcal64::new(BlockingBus::new(i2c.clone()), false);
        dev.batch()
            .direction(Pin::P0_5, Direction::Output)
            .level(Pin::P0_5, Level::High)
            .direction(Pin::P1_2, Direction::Output)
            .level(Pin::P1_2, Level::Low)
            .commit()
            .unwrap();
        assert_eq!(poll_event(&mut dev), Event::Done);

        i2c.done();
    }

    #[test]
    fn level_without_direction_implies_output() {
        let expectations = [
            mock_i2c::Transaction::write_read(0x20, vec![0x06], vec![0xFF, 0xFF]),
            mock_i2c::Transaction::write(0x20, vec![0x06, 0xFE, 0xFF]),
            mock_i2c::Transaction::write_read(0x20, vec![0x02], vec![0x00, 0x00]),
            mock_i2c::Transaction::write(0x20, vec![0x02, 0x01, 0x00]),
        ];
        let mut i2c = mock_i2c::Mock::new(&expectations);

        let mut dev = Pcal64::new(BlockingBus::new(i2c.clone()), false);
        dev.batch().level(Pin::P0_0, Level::High).commit().unwrap();
        assert_eq!(poll_event(&mut dev), Event::Done);

        i2c.done();
    }

    #[test]
    fn explicit_input_direction_wins_over_a_later_level() {
        let expectations = [
            mock_i2c::Transaction::write_read(0x20, vec![0x06], vec![0x00, 0x00]),
            // P0_4 stays an input (chip: 1 = input)
            mock_i2c::Transaction::write(0x20, vec![0x06, 0x10, 0x00]),
            mock_i2c::Transaction::write_read(0x20, vec![0x02], vec![0x00, 0x00]),
            mock_i2c::Transaction::write(0x20, vec![0x02, 0x10, 0x00]),
        ];
        let mut i2c = mock_i2c::Mock::new(&expectations);

        let mut dev = Pcal64::new(BlockingBus::new(i2c.clone()), false);
        dev.batch()
            .direction(Pin::P0_4, Direction::Input)
            .level(Pin::P0_4, Level::High)
            .commit()
            .unwrap();
        assert_eq!(poll_event(&mut dev), Event::Done);

        i2c.done();
    }

    #[test]
    fn commit_while_busy_is_rejected() {
        let expectations = [
            mock_i2c::Transaction::write_read(0x20, vec![0x02], vec![0x00, 0x00]),
            mock_i2c::Transaction::write(0x20, vec![0x02, 0x01, 0x00]),
        ];
        let mut i2c = mock_i2c::Mock::new(&expectations);

        let mut dev = Pcal64::new(BlockingBus::new(i2c.clone()), false);
        dev.toggle(Pin::P0_0).unwrap();
        let result = dev.batch().level(Pin::P0_1, Level::High).commit();
        assert_eq!(result.unwrap_err(), Error::Busy);
        assert_eq!(poll_event(&mut dev), Event::Done);

        i2c.done();
    }
}
