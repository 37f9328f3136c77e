use core::cell::Cell;

use critical_section::Mutex;

use super::WakeReason;

/// A single-slot, interrupt-safe mailbox for the pending [`WakeReason`].
///
/// Meant to live in a `static` (see [`declare_wake_latch!`](crate::declare_wake_latch)).
/// The interrupt handler calls [`record`](Self::record); the main loop calls
/// [`take`](Self::take), which empties the slot so each wake is handled once.
///
/// # Example
/// ```rust
/// use fieldrelay::wake::{WakeLatch, WakeReason};
///
/// static WAKE: WakeLatch = WakeLatch::new();
///
/// WAKE.record(WakeReason::Heartbeat);
/// assert_eq!(WAKE.take(), Some(WakeReason::Heartbeat));
/// assert_eq!(WAKE.take(), None);
/// ```
#[derive(Debug)]
pub struct WakeLatch {
    pending: Mutex<Cell<Option<WakeReason>>>,
}

impl WakeLatch {
    /// An empty latch.
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Cell::new(None)),
        }
    }

    /// Records a wake. A wake already pending is merged with it.
    pub fn record(&self, reason: WakeReason) {
        critical_section::with(|cs| {
            let slot = self.pending.borrow(cs);
            let merged = match slot.get() {
                Some(previous) => previous.merge(reason),
                None => reason,
            };
            slot.set(Some(merged));
        });
    }

    /// Records a wake from a fired-alarms mask. An empty mask records nothing.
    pub fn record_mask(&self, mask: u8) {
        if let Some(reason) = WakeReason::from_mask(mask) {
            self.record(reason);
        }
    }

    /// Takes the pending wake, leaving the latch empty.
    pub fn take(&self) -> Option<WakeReason> {
        critical_section::with(|cs| self.pending.borrow(cs).take())
    }

    /// Whether a wake is pending.
    pub fn is_pending(&self) -> bool {
        critical_section::with(|cs| self.pending.borrow(cs).get().is_some())
    }
}

impl Default for WakeLatch {
    fn default() -> Self {
        Self::new()
    }
}
