//! ISR-to-thread hand-off for the expander's interrupt line.
//!
//! The chip signals pin changes on an active-low open-drain line (run it
//! into an MCU input with the pull-up enabled and watch for falling edges).
//! Edge detection itself belongs to the platform; this module only carries
//! the edge from interrupt context into thread context, where
//! [`Pcal64::interrupt`](crate::Pcal64::interrupt) may be called.
//!
//! ```ignore
//! static IRQ: IrqLine = IrqLine::new();
//!
//! // in the falling-edge ISR:
//! IRQ.signal();
//!
//! // in the main loop:
//! if IRQ.take() {
//!     dev.interrupt()?;
//! }
//! while let Some(event) = dev.poll()? { /* ... */ }
//! ```

use core::cell::Cell;
use critical_section::Mutex;

/// Latch for falling edges on the interrupt line.
///
/// [`IrqLine::signal`] may be called from interrupt context; consuming the
/// latch with [`IrqLine::take`] happens in thread context.  Multiple edges
/// between two `take` calls collapse into one, which is sufficient: one
/// servicing pass reads and clears the chip's entire interrupt status.
pub struct IrqLine {
    pending: Mutex<Cell<bool>>,
}

impl IrqLine {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Cell::new(false)),
        }
    }

    /// Record a falling edge.  Safe to call from an ISR.
    pub fn signal(&self) {
        critical_section::with(|cs| self.pending.borrow(cs).set(true));
    }

    /// Consume the latch, returning whether an edge was recorded since the
    /// last call.
    pub fn take(&self) -> bool {
        critical_section::with(|cs| self.pending.borrow(cs).replace(false))
    }
}

impl Default for IrqLine {
    fn default() -> Self {
        Self::new()
    }
}
