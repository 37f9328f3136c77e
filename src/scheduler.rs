//! Dual-alarm duty-cycle scheduler.
//!
//! Two independent countdowns share one RTC: *normal work* (alarm 1) and *heartbeat*
//! (alarm 2). [`DutyCycleScheduler::calculate_next_event`] picks whichever is due first and
//! how long to sleep; [`DutyCycleScheduler::ensure_alarms_active`] reconciles the RTC's
//! alarms after a wake so they never land on top of each other; and
//! [`DutyCycleScheduler::adjust_flag_from_alarms`] decides whether this wake sends a
//! heartbeat or does normal work.
//!
//! A typical wake, after the RTC interrupt has ended sleep:
//!
//! ```rust,ignore
//! scheduler.adjust_flag_from_alarms(&mut rtc)?;
//! scheduler.ensure_alarms_active(&mut rtc)?;
//! if scheduler.heartbeat_flag() {
//!     let ts = scheduler.heartbeat_timestamp(&mut rtc)?;
//!     transport.send_heartbeat(Some(&ts), BASE)?;
//! } else {
//!     // collect readings into `doc`
//!     transport.send(&doc, BASE)?;
//! }
//! ```
//!
//! Sleeps shorter than [`MIN_WAIT_SECS`] are never requested: power-rail transitions that
//! close together corrupt serial, radio and RTC state.

use core::time::Duration;

use crate::config::SchedulerConfig;
use crate::consts::{ALARM_CONFLICT_SECS, MIN_RTC_HEARTBEAT_SECS, MIN_WAIT_SECS};
use crate::document::DocTimestamp;
use crate::error::SchedulerError;
use crate::rtc::{Alarm, AlarmClock, AlarmObservation, UnixTime};
use crate::wake::WakeReason;

/// The scheduler's countdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct DutyCycleState {
    /// Configured seconds between heartbeats.
    pub heartbeat_interval_secs: u32,
    /// Seconds until the next heartbeat.
    pub heartbeat_timer_secs: u32,
    /// Configured seconds between normal work cycles.
    pub normal_work_interval_secs: u32,
    /// Seconds until the next normal work cycle.
    pub normal_work_timer_secs: u32,
    /// Whether the current wake sends a heartbeat.
    pub heartbeat_flag: bool,
}

/// What [`DutyCycleScheduler::ensure_alarms_active`] did to the RTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum AlarmAction {
    /// Both alarms were armed from their full intervals.
    BothReset {
        /// When normal work fires.
        normal_work_at: UnixTime,
        /// When the heartbeat fires.
        heartbeat_at: UnixTime,
    },
    /// Only the normal work alarm was armed.
    NormalWorkReset {
        /// When normal work fires.
        at: UnixTime,
    },
    /// Normal work would have collided with the pending heartbeat, so that heartbeat
    /// was folded into the next heartbeat cycle.
    MergedHeartbeat {
        /// When normal work fires.
        normal_work_at: UnixTime,
        /// When the postponed heartbeat fires.
        heartbeat_at: UnixTime,
    },
    /// Only the heartbeat alarm was armed.
    HeartbeatReset {
        /// When the heartbeat fires.
        at: UnixTime,
    },
    /// The heartbeat would have collided with pending normal work and was left unarmed.
    HeartbeatSkipped,
    /// Neither alarm needed arming.
    NothingToDo,
}

/// Decides when to wake and why.
#[derive(Debug, Clone)]
pub struct DutyCycleScheduler {
    config: SchedulerConfig,
    state: DutyCycleState,
}

impl DutyCycleScheduler {
    /// Creates a scheduler with both countdowns at their full (sanitized) intervals.
    pub fn new(config: SchedulerConfig) -> Self {
        let config = sanitize(config);
        Self {
            state: DutyCycleState {
                heartbeat_interval_secs: config.heartbeat_interval_secs,
                heartbeat_timer_secs: config.heartbeat_interval_secs,
                normal_work_interval_secs: config.normal_work_interval_secs,
                normal_work_timer_secs: config.normal_work_interval_secs,
                heartbeat_flag: false,
            },
            config,
        }
    }

    /// The settings in effect, after sanitizing.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current countdowns.
    pub fn state(&self) -> &DutyCycleState {
        &self.state
    }

    /// Whether the current wake sends a heartbeat.
    pub fn heartbeat_flag(&self) -> bool {
        self.state.heartbeat_flag
    }

    /// Overrides the heartbeat flag.
    pub fn set_heartbeat_flag(&mut self, flag: bool) {
        self.state.heartbeat_flag = flag;
    }

    /// Sets the flag from a wake event.
    pub fn apply_wake(&mut self, reason: WakeReason) {
        self.state.heartbeat_flag = reason.is_heartbeat();
        debug!("Woke for {:?}", reason);
    }

    /// Picks the next event and returns how long to sleep until it.
    ///
    /// The sooner countdown wins (normal work on a tie) and is refilled from its interval;
    /// the other is charged the wait. Neither the wait nor any countdown drops below
    /// [`MIN_WAIT_SECS`].
    pub fn calculate_next_event(&mut self) -> Duration {
        let state = &mut self.state;
        let wait = if state.heartbeat_timer_secs < state.normal_work_timer_secs {
            let wait = state.heartbeat_timer_secs;
            state.normal_work_timer_secs = remaining(state.normal_work_timer_secs, wait);
            state.heartbeat_timer_secs = state.heartbeat_interval_secs;
            state.heartbeat_flag = true;
            wait
        } else {
            let wait = state.normal_work_timer_secs;
            state.heartbeat_timer_secs = remaining(state.heartbeat_timer_secs, wait);
            state.normal_work_timer_secs = state.normal_work_interval_secs;
            state.heartbeat_flag = false;
            wait
        };
        let wait = wait.max(MIN_WAIT_SECS);
        debug!(
            "Next event in {} s (heartbeat: {}), heartbeat timer {} s, normal work timer {} s",
            wait,
            state.heartbeat_flag,
            state.heartbeat_timer_secs,
            state.normal_work_timer_secs
        );
        Duration::from_secs(u64::from(wait))
    }

    /// Re-arms the RTC alarms after a wake and acknowledges the fired mask.
    ///
    /// An alarm needs arming if it fired or is disarmed. When only one does and arming it
    /// would land within [`ALARM_CONFLICT_SECS`] of the other, pending, alarm, the conflict
    /// is resolved in favour of normal work: a pending heartbeat is pushed back by a full
    /// interval, a heartbeat that needs arming is skipped this round.
    pub fn ensure_alarms_active<C: AlarmClock>(
        &self,
        clock: &mut C,
    ) -> Result<AlarmAction, SchedulerError<C::Error>> {
        let observation = AlarmObservation::observe(clock).map_err(SchedulerError::Clock)?;
        clock.clear_fired_alarms().map_err(SchedulerError::Clock)?;
        let now = clock.now().map_err(SchedulerError::Clock)?;

        let normal_work_at = now.saturating_add(self.config.normal_work_interval_secs);
        let heartbeat_at = now.saturating_add(self.config.heartbeat_interval_secs);
        let pending = observation.alarm_time;

        let action = match (
            observation.needs_setting(Alarm::NormalWork),
            observation.needs_setting(Alarm::Heartbeat),
        ) {
            (true, true) => {
                let heartbeat_at = separate(normal_work_at, heartbeat_at);
                arm_both(clock, normal_work_at, heartbeat_at)?;
                info!(
                    "Both alarms reset: normal work at {}, heartbeat at {}",
                    normal_work_at, heartbeat_at
                );
                AlarmAction::BothReset {
                    normal_work_at,
                    heartbeat_at,
                }
            }
            (true, false) => match pending.heartbeat.filter(|&t| t != 0) {
                Some(old) if conflicts(normal_work_at, old) => {
                    let remaining = old.saturating_sub(now);
                    let heartbeat_at =
                        separate(normal_work_at, heartbeat_at.saturating_add(remaining));
                    arm_both(clock, normal_work_at, heartbeat_at)?;
                    warn!(
                        "Normal work at {} overlaps heartbeat at {}; heartbeat moved to {}",
                        normal_work_at, old, heartbeat_at
                    );
                    AlarmAction::MergedHeartbeat {
                        normal_work_at,
                        heartbeat_at,
                    }
                }
                _ => {
                    clock
                        .set_alarm(Alarm::NormalWork, normal_work_at)
                        .map_err(SchedulerError::Clock)?;
                    info!("Normal work alarm set for {}", normal_work_at);
                    AlarmAction::NormalWorkReset { at: normal_work_at }
                }
            },
            (false, true) => match pending.normal_work.filter(|&t| t != 0) {
                Some(next) if conflicts(heartbeat_at, next) => {
                    warn!(
                        "Heartbeat at {} overlaps normal work at {}; skipping heartbeat",
                        heartbeat_at, next
                    );
                    AlarmAction::HeartbeatSkipped
                }
                _ => {
                    clock
                        .set_alarm(Alarm::Heartbeat, heartbeat_at)
                        .map_err(SchedulerError::Clock)?;
                    info!("Heartbeat alarm set for {}", heartbeat_at);
                    AlarmAction::HeartbeatReset { at: heartbeat_at }
                }
            },
            (false, false) => {
                warn!("Woke but no alarm needs setting");
                AlarmAction::NothingToDo
            }
        };
        Ok(action)
    }

    /// Sets the heartbeat flag from which alarms fired and returns the wake reason.
    ///
    /// Normal work takes precedence when both fired. Fails with
    /// [`SchedulerError::NoAlarmFired`] if neither did.
    pub fn adjust_flag_from_alarms<C: AlarmClock>(
        &mut self,
        clock: &mut C,
    ) -> Result<WakeReason, SchedulerError<C::Error>> {
        let normal_work = clock
            .alarm_fired(Alarm::NormalWork)
            .map_err(SchedulerError::Clock)?;
        let heartbeat = clock
            .alarm_fired(Alarm::Heartbeat)
            .map_err(SchedulerError::Clock)?;
        match WakeReason::from_alarms(normal_work, heartbeat) {
            Some(reason) => {
                self.apply_wake(reason);
                Ok(reason)
            }
            None => {
                error!("Adjusting heartbeat flag but no alarm fired");
                Err(SchedulerError::NoAlarmFired)
            }
        }
    }

    /// The heartbeat's timestamp block for the clock's current time.
    pub fn heartbeat_timestamp<C: AlarmClock>(
        &self,
        clock: &mut C,
    ) -> Result<DocTimestamp, SchedulerError<C::Error>> {
        let now = clock.now().map_err(SchedulerError::Clock)?;
        Ok(DocTimestamp::from_unix(now, self.config.utc_offset_secs))
    }
}

/// Raises intervals to their floors.
fn sanitize(mut config: SchedulerConfig) -> SchedulerConfig {
    let heartbeat_floor = if config.hardware_rtc {
        MIN_RTC_HEARTBEAT_SECS
    } else {
        MIN_WAIT_SECS
    };
    if config.heartbeat_interval_secs < heartbeat_floor {
        warn!(
            "Heartbeat interval {} s below minimum, using {} s",
            config.heartbeat_interval_secs, heartbeat_floor
        );
        config.heartbeat_interval_secs = heartbeat_floor;
    }
    if config.normal_work_interval_secs < MIN_WAIT_SECS {
        warn!(
            "Normal work interval {} s below minimum, using {} s",
            config.normal_work_interval_secs, MIN_WAIT_SECS
        );
        config.normal_work_interval_secs = MIN_WAIT_SECS;
    }
    config
}

/// `timer - elapsed`, or [`MIN_WAIT_SECS`] if that would not be positive.
fn remaining(timer: u32, elapsed: u32) -> u32 {
    if timer > elapsed {
        timer - elapsed
    } else {
        MIN_WAIT_SECS
    }
}

fn conflicts(a: UnixTime, b: UnixTime) -> bool {
    a.abs_diff(b) < ALARM_CONFLICT_SECS
}

/// Moves `heartbeat_at` clear of `normal_work_at` if they conflict.
fn separate(normal_work_at: UnixTime, heartbeat_at: UnixTime) -> UnixTime {
    if conflicts(normal_work_at, heartbeat_at) {
        normal_work_at.saturating_add(ALARM_CONFLICT_SECS)
    } else {
        heartbeat_at
    }
}

fn arm_both<C: AlarmClock>(
    clock: &mut C,
    normal_work_at: UnixTime,
    heartbeat_at: UnixTime,
) -> Result<(), SchedulerError<C::Error>> {
    clock.clear_alarms().map_err(SchedulerError::Clock)?;
    clock
        .set_alarm(Alarm::NormalWork, normal_work_at)
        .map_err(SchedulerError::Clock)?;
    clock
        .set_alarm(Alarm::Heartbeat, heartbeat_at)
        .map_err(SchedulerError::Clock)
}
