/// Declares a static [`WakeLatch`](crate::wake::WakeLatch) shared by the alarm interrupt
/// and the main loop.
///
/// Without an argument the static is named `WAKE_LATCH`.
///
/// # Example
/// ```rust
/// fieldrelay::declare_wake_latch!();
/// fieldrelay::declare_wake_latch!(RADIO_WAKE);
///
/// assert_eq!(WAKE_LATCH.take(), None);
/// assert_eq!(RADIO_WAKE.take(), None);
/// ```
#[macro_export]
macro_rules! declare_wake_latch {
    () => {
        $crate::declare_wake_latch!(WAKE_LATCH);
    };
    ( $name:ident ) => {
        /// Pending wake shared with the RTC alarm interrupt.
        pub static $name: $crate::wake::WakeLatch = $crate::wake::WakeLatch::new();
    };
}

/// Records a [`WakeReason`](crate::wake::WakeReason) from interrupt context.
///
/// Without a latch name the static declared by `declare_wake_latch!()` is used.
///
/// # Example
/// ```rust
/// use fieldrelay::wake::WakeReason;
///
/// fieldrelay::declare_wake_latch!();
///
/// // inside the RTC interrupt handler
/// fieldrelay::record_wake!(WakeReason::Heartbeat);
///
/// assert_eq!(WAKE_LATCH.take(), Some(WakeReason::Heartbeat));
/// ```
#[macro_export]
macro_rules! record_wake {
    ( $name:ident, $reason:expr ) => {
        $name.record($reason)
    };
    ( $reason:expr ) => {
        WAKE_LATCH.record($reason)
    };
}
