//! Wake events handed from the RTC interrupt to the main loop.
//!
//! The alarm interrupt does one thing: end the low-power sleep. Everything else happens
//! afterwards in ordinary code. To get the reason for the wake out of interrupt context
//! without a callback pointer, the handler records a [`WakeReason`] in a [`WakeLatch`]
//! (feature `wake-isr`) and the main loop takes it exactly once per cycle, handing it to
//! [`DutyCycleScheduler::apply_wake`](crate::scheduler::DutyCycleScheduler::apply_wake).
//!
//! ```rust,ignore
//! fieldrelay::declare_wake_latch!(WAKE);
//!
//! #[interrupt]
//! fn EIC() {
//!     fieldrelay::record_wake!(WAKE, WakeReason::Heartbeat);
//! }
//!
//! loop {
//!     sleep_until_interrupt();
//!     if let Some(reason) = WAKE.take() {
//!         scheduler.apply_wake(reason);
//!     }
//! }
//! ```

#[cfg(feature = "wake-isr")]
mod isr;
#[cfg(feature = "wake-isr")]
pub use isr::*;

#[cfg(feature = "wake-isr")]
mod macros;

use crate::rtc::{BM_ALARM_1, BM_ALARM_2};

/// Why the node woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum WakeReason {
    /// Alarm 1: collect and send a full sample.
    NormalWork,
    /// Alarm 2: send a heartbeat.
    Heartbeat,
}

impl WakeReason {
    /// Reason for a wake given which alarms fired.
    ///
    /// When both fired, normal work takes precedence. Returns `None` if neither did.
    pub fn from_alarms(normal_work_fired: bool, heartbeat_fired: bool) -> Option<Self> {
        match (normal_work_fired, heartbeat_fired) {
            (true, _) => Some(WakeReason::NormalWork),
            (false, true) => Some(WakeReason::Heartbeat),
            (false, false) => None,
        }
    }

    /// Reason for a wake given a fired-alarms mask.
    pub fn from_mask(mask: u8) -> Option<Self> {
        Self::from_alarms(mask & BM_ALARM_1 != 0, mask & BM_ALARM_2 != 0)
    }

    /// Combines two wakes that happened before either was handled.
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (WakeReason::Heartbeat, WakeReason::Heartbeat) => WakeReason::Heartbeat,
            _ => WakeReason::NormalWork,
        }
    }

    /// Whether this wake should send a heartbeat.
    pub fn is_heartbeat(self) -> bool {
        self == WakeReason::Heartbeat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_work_takes_precedence() {
        assert_eq!(
            WakeReason::from_alarms(true, true),
            Some(WakeReason::NormalWork)
        );
        assert_eq!(
            WakeReason::from_alarms(true, false),
            Some(WakeReason::NormalWork)
        );
        assert_eq!(
            WakeReason::from_alarms(false, true),
            Some(WakeReason::Heartbeat)
        );
        assert_eq!(WakeReason::from_alarms(false, false), None);
    }

    #[test]
    fn test_from_mask() {
        assert_eq!(WakeReason::from_mask(BM_ALARM_2), Some(WakeReason::Heartbeat));
        assert_eq!(
            WakeReason::from_mask(BM_ALARM_1 | BM_ALARM_2),
            Some(WakeReason::NormalWork)
        );
        assert_eq!(WakeReason::from_mask(0), None);
    }

    #[test]
    fn test_merge() {
        assert_eq!(
            WakeReason::Heartbeat.merge(WakeReason::Heartbeat),
            WakeReason::Heartbeat
        );
        assert_eq!(
            WakeReason::Heartbeat.merge(WakeReason::NormalWork),
            WakeReason::NormalWork
        );
        assert!(!WakeReason::NormalWork.is_heartbeat());
    }
}
