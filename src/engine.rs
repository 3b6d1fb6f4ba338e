//! The register transaction engine.
//!
//! Every logical operation on the expander decomposes into a short sequence
//! of register reads and read-modify-writes.  The bus can only carry one
//! transfer at a time and completes each one asynchronously, so the engine
//! is written as an explicit state machine: [`Engine::start`] accepts an
//! operation and hands back the first transfer to issue, and every bus
//! completion is fed into [`Engine::advance`], which either produces the
//! next transfer of the sequence or the operation's final [`Event`].
//!
//! The engine performs no I/O itself.  Both the poll-mode driver and the
//! async front-end drive the same machine; the unit tests below drive it
//! directly.
//!
//! Read-modify-write steps all use the same merge rule: bits covered by the
//! operation's pin mask take their new value, all other bits are written
//! back exactly as they were read.

use crate::{Direction, Level, Pin};

/// Register map of the PCAL64 family.
///
/// Registers come in port pairs at consecutive addresses.  All transfers go
/// through the port-0 register of a pair and rely on the chip's address
/// auto-increment to cover port 1, so the 16-bit value travels as two
/// little-endian data bytes.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reg {
    InputPort0 = 0x00,
    InputPort1 = 0x01,
    OutputPort0 = 0x02,
    OutputPort1 = 0x03,
    PolarityInversion0 = 0x04,
    PolarityInversion1 = 0x05,
    Configuration0 = 0x06,
    Configuration1 = 0x07,
    InterruptMask0 = 0x4A,
    InterruptMask1 = 0x4B,
    InterruptStatus0 = 0x4C,
    InterruptStatus1 = 0x4D,
}

impl From<Reg> for u8 {
    fn from(r: Reg) -> u8 {
        r as u8
    }
}

/// A logical operation, as requested by one of the driver front-ends.
///
/// Bulk masks use the public bit conventions: direction bit 1 = output,
/// interrupt bit 1 = enabled.  The engine converts to the chip's native
/// encodings (configuration 1 = input, interrupt mask 1 = masked) exactly
/// once, in the merge step that touches the respective register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Mode { pin: Pin, dir: Direction },
    Write { pin: Pin, level: Level },
    Toggle { pin: Pin },
    BulkWrite { pins: u16, directions: u16, values: u16 },
    BulkToggle { pins: u16 },
    BulkSetInterrupts { pins: u16, enabled: u16 },
    BulkRead,
    ServiceInterrupt,
}

/// One bus transfer the engine wants issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Xfer {
    /// Read the 16-bit value of the register pair starting at `Reg`.
    Read(Reg),
    /// Write the 16-bit value across the register pair starting at `Reg`.
    Write(Reg, u16),
}

/// Completion of the transfer issued last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Done {
    Read(u16),
    Write,
}

/// Outcome of feeding a completion into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// The sequence continues; issue this transfer next.
    Transfer(Xfer),
    /// The operation finished; the engine is idle again.
    Complete(Event),
}

/// Completion notification of a logical operation.
///
/// An `Event` is produced exactly once per accepted operation and moves to
/// the caller by value, so a completion can neither be lost nor delivered
/// twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// A command sequence (`mode`, `write`, `toggle` or any bulk write)
    /// finished.
    Done,
    /// Snapshot of the input registers, from `bulk_read`.
    Input(u16),
    /// An interrupt was serviced.  `changed` is the interrupt status (which
    /// pins latched an edge, cleared by the read), `values` the input
    /// snapshot captured immediately before the status was read.
    Interrupt { changed: u16, values: u16 },
}

/// Marker: the engine is mid-sequence and rejected a new operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Busy;

/// Marker: a completion was fed in that no in-flight transfer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Unsolicited;

/// Engine state.  Every mid-sequence state carries the parameters the
/// remaining steps need, so an operation's pending data cannot outlive or
/// leak into another operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    ReadDirection { pin: Pin, dir: Direction },
    WriteDirection,
    ReadOutputForWrite { pin: Pin, level: Level },
    WriteOutputForWrite,
    ReadOutputForToggle { pin: Pin },
    WriteOutputForToggle,
    ReadDirectionForBulkWrite { pins: u16, directions: u16, values: u16 },
    WriteDirectionForBulkWrite { pins: u16, values: u16 },
    ReadOutputForBulkWrite { pins: u16, values: u16 },
    WriteOutputForBulkWrite,
    ReadOutputForBulkToggle { pins: u16 },
    WriteOutputForBulkToggle,
    ReadDirectionForIrqSetup { pins: u16, enabled: u16 },
    WriteDirectionForIrqSetup { pins: u16, enabled: u16 },
    ReadInterruptMask { pins: u16, enabled: u16 },
    WriteInterruptMask,
    ReadInput,
    ReadInputForService,
    ReadInterruptStatus { input: u16 },
}

/// Merge `desired` into `old` for the bits selected by `pins`; all other
/// bits of `old` are preserved verbatim.
fn merge(old: u16, pins: u16, desired: u16) -> u16 {
    (old & !pins) | (pins & desired)
}

/// Chip encoding of a direction for the given pin bits (configuration
/// register: 1 = input, 0 = output).
fn direction_bits(dir: Direction, mask: u16) -> u16 {
    match dir {
        Direction::Input => mask,
        Direction::Output => 0,
    }
}

fn level_bits(level: Level, mask: u16) -> u16 {
    match level {
        Level::High => mask,
        Level::Low => 0,
    }
}

pub(crate) struct Engine {
    state: State,
}

impl Engine {
    pub const fn new() -> Self {
        Self { state: State::Idle }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    /// Accept a new operation and return the first transfer of its
    /// sequence.  Rejected without any state change while another
    /// operation is in flight.
    pub fn start(&mut self, op: Op) -> Result<Xfer, Busy> {
        if !self.is_idle() {
            return Err(Busy);
        }
        let (state, xfer) = match op {
            Op::Mode { pin, dir } => (
                State::ReadDirection { pin, dir },
                Xfer::Read(Reg::Configuration0),
            ),
            Op::Write { pin, level } => (
                State::ReadOutputForWrite { pin, level },
                Xfer::Read(Reg::OutputPort0),
            ),
            Op::Toggle { pin } => (
                State::ReadOutputForToggle { pin },
                Xfer::Read(Reg::OutputPort0),
            ),
            Op::BulkWrite {
                pins,
                directions,
                values,
            } => (
                State::ReadDirectionForBulkWrite {
                    pins,
                    directions,
                    values,
                },
                Xfer::Read(Reg::Configuration0),
            ),
            Op::BulkToggle { pins } => (
                State::ReadOutputForBulkToggle { pins },
                Xfer::Read(Reg::OutputPort0),
            ),
            Op::BulkSetInterrupts { pins, enabled } => (
                State::ReadDirectionForIrqSetup { pins, enabled },
                Xfer::Read(Reg::Configuration0),
            ),
            Op::BulkRead => (State::ReadInput, Xfer::Read(Reg::InputPort0)),
            Op::ServiceInterrupt => {
                (State::ReadInputForService, Xfer::Read(Reg::InputPort0))
            }
        };
        self.state = state;
        Ok(xfer)
    }

    /// Feed the completion of the transfer issued last.
    ///
    /// A completion that does not match an in-flight transfer (nothing in
    /// flight, or a read completion answering a write and vice versa) aborts
    /// the sequence and leaves the engine idle; it is reported instead of
    /// being dropped in a catch-all arm.
    pub fn advance(&mut self, done: Done) -> Result<Step, Unsolicited> {
        let step = match (core::mem::replace(&mut self.state, State::Idle), done) {
            (State::ReadDirection { pin, dir }, Done::Read(cur)) => {
                let desired = merge(cur, pin.mask(), direction_bits(dir, pin.mask()));
                if desired == cur {
                    // Direction already matches; the read was the whole cost.
                    Step::Complete(Event::Done)
                } else {
                    self.state = State::WriteDirection;
                    Step::Transfer(Xfer::Write(Reg::Configuration0, desired))
                }
            }
            (State::WriteDirection, Done::Write) => Step::Complete(Event::Done),

            (State::ReadOutputForWrite { pin, level }, Done::Read(cur)) => {
                let desired = merge(cur, pin.mask(), level_bits(level, pin.mask()));
                if desired == cur {
                    Step::Complete(Event::Done)
                } else {
                    self.state = State::WriteOutputForWrite;
                    Step::Transfer(Xfer::Write(Reg::OutputPort0, desired))
                }
            }
            (State::WriteOutputForWrite, Done::Write) => Step::Complete(Event::Done),

            (State::ReadOutputForToggle { pin }, Done::Read(cur)) => {
                // No skip-if-unchanged here: a toggle always flips and
                // always writes.
                self.state = State::WriteOutputForToggle;
                Step::Transfer(Xfer::Write(Reg::OutputPort0, cur ^ pin.mask()))
            }
            (State::WriteOutputForToggle, Done::Write) => Step::Complete(Event::Done),

            (
                State::ReadDirectionForBulkWrite {
                    pins,
                    directions,
                    values,
                },
                Done::Read(cur),
            ) => {
                // Public mask: 1 = output.  Chip configuration: 1 = input.
                let desired = merge(cur, pins, !directions);
                self.state = State::WriteDirectionForBulkWrite { pins, values };
                Step::Transfer(Xfer::Write(Reg::Configuration0, desired))
            }
            (State::WriteDirectionForBulkWrite { pins, values }, Done::Write) => {
                self.state = State::ReadOutputForBulkWrite { pins, values };
                Step::Transfer(Xfer::Read(Reg::OutputPort0))
            }
            (State::ReadOutputForBulkWrite { pins, values }, Done::Read(cur)) => {
                self.state = State::WriteOutputForBulkWrite;
                Step::Transfer(Xfer::Write(Reg::OutputPort0, merge(cur, pins, values)))
            }
            (State::WriteOutputForBulkWrite, Done::Write) => Step::Complete(Event::Done),

            (State::ReadOutputForBulkToggle { pins }, Done::Read(cur)) => {
                self.state = State::WriteOutputForBulkToggle;
                Step::Transfer(Xfer::Write(Reg::OutputPort0, cur ^ pins))
            }
            (State::WriteOutputForBulkToggle, Done::Write) => Step::Complete(Event::Done),

            (State::ReadDirectionForIrqSetup { pins, enabled }, Done::Read(cur)) => {
                // Interrupt sources must be inputs (chip: 1 = input).
                self.state = State::WriteDirectionForIrqSetup { pins, enabled };
                Step::Transfer(Xfer::Write(Reg::Configuration0, cur | pins))
            }
            (State::WriteDirectionForIrqSetup { pins, enabled }, Done::Write) => {
                self.state = State::ReadInterruptMask { pins, enabled };
                Step::Transfer(Xfer::Read(Reg::InterruptMask0))
            }
            (State::ReadInterruptMask { pins, enabled }, Done::Read(cur)) => {
                // Public mask: 1 = enabled.  Chip interrupt mask: 1 = masked.
                self.state = State::WriteInterruptMask;
                Step::Transfer(Xfer::Write(Reg::InterruptMask0, merge(cur, pins, !enabled)))
            }
            (State::WriteInterruptMask, Done::Write) => Step::Complete(Event::Done),

            (State::ReadInput, Done::Read(values)) => {
                Step::Complete(Event::Input(values))
            }

            (State::ReadInputForService, Done::Read(input)) => {
                // The input snapshot must be taken before the status read:
                // the status register latches edges only until it is read.
                self.state = State::ReadInterruptStatus { input };
                Step::Transfer(Xfer::Read(Reg::InterruptStatus0))
            }
            (State::ReadInterruptStatus { input }, Done::Read(status)) => {
                Step::Complete(Event::Interrupt {
                    changed: status,
                    values: input,
                })
            }

            (_, _) => return Err(Unsolicited),
        };
        Ok(step)
    }

    /// Abort the in-flight sequence after a bus fault.  The engine returns
    /// to idle and accepts new operations.
    pub fn abort(&mut self) {
        self.state = State::Idle;
    }
}
