//! The real-time clock collaborator that drives the duty cycle.
//!
//! A node has one RTC with two alarms. Alarm 1 wakes the node for normal work, alarm 2
//! for a heartbeat. Alarms are one-shot: once an alarm fires it reports itself as cleared
//! until it is set again.
//!
//! The RTC driver latches which alarms fired in a small bitmask (see [`BM_ALARM_1`] and
//! [`BM_ALARM_2`]) that the scheduler acknowledges with
//! [`clear_fired_alarms`](AlarmClock::clear_fired_alarms) once it has reconciled them.

/// Seconds since the Unix epoch, as kept by the RTC.
pub type UnixTime = u32;

/// Bit of the fired-alarms mask set when alarm 1 (normal work) fires.
pub const BM_ALARM_1: u8 = 0b01;

/// Bit of the fired-alarms mask set when alarm 2 (heartbeat) fires.
pub const BM_ALARM_2: u8 = 0b10;

/// One of the two RTC alarms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Alarm {
    /// Alarm 1, scheduling normal work.
    NormalWork,
    /// Alarm 2, scheduling heartbeats.
    Heartbeat,
}

impl Alarm {
    /// The alarm's bit in the fired-alarms mask.
    pub const fn mask(self) -> u8 {
        match self {
            Alarm::NormalWork => BM_ALARM_1,
            Alarm::Heartbeat => BM_ALARM_2,
        }
    }
}

/// An RTC with two one-shot alarms.
pub trait AlarmClock {
    /// Error reported by the clock (usually a bus error).
    type Error: core::fmt::Debug;

    /// Current time.
    fn now(&mut self) -> Result<UnixTime, Self::Error>;

    /// Arms `alarm` to fire at `at`.
    fn set_alarm(&mut self, alarm: Alarm, at: UnixTime) -> Result<(), Self::Error>;

    /// Disarms both alarms.
    fn clear_alarms(&mut self) -> Result<(), Self::Error>;

    /// Mask of the alarms that fired since the last acknowledgement.
    fn fired_alarms(&mut self) -> Result<u8, Self::Error>;

    /// Acknowledges the fired-alarms mask.
    fn clear_fired_alarms(&mut self) -> Result<(), Self::Error>;

    /// Whether `alarm` is disarmed.
    fn is_alarm_cleared(&mut self, alarm: Alarm) -> Result<bool, Self::Error>;

    /// Whether `alarm` has fired.
    fn alarm_fired(&mut self, alarm: Alarm) -> Result<bool, Self::Error>;

    /// Time `alarm` is armed for.
    fn alarm_time(&mut self, alarm: Alarm) -> Result<UnixTime, Self::Error>;
}

/// A value per alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct AlarmPair<T> {
    /// Value for alarm 1.
    pub normal_work: T,
    /// Value for alarm 2.
    pub heartbeat: T,
}

impl<T: Copy> AlarmPair<T> {
    /// The value for `alarm`.
    pub fn get(&self, alarm: Alarm) -> T {
        match alarm {
            Alarm::NormalWork => self.normal_work,
            Alarm::Heartbeat => self.heartbeat,
        }
    }
}

/// A snapshot of both alarms, read once per wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct AlarmObservation {
    /// Which alarms are latched in the fired mask.
    pub fired: AlarmPair<bool>,
    /// Which alarms are disarmed.
    pub cleared: AlarmPair<bool>,
    /// When each still-armed alarm is due; `None` for alarms that fired or are disarmed.
    pub alarm_time: AlarmPair<Option<UnixTime>>,
}

impl AlarmObservation {
    /// Reads the fired mask, cleared flags and pending alarm times from `clock`.
    ///
    /// Does not acknowledge the fired mask.
    pub fn observe<C: AlarmClock>(clock: &mut C) -> Result<Self, C::Error> {
        let mask = clock.fired_alarms()?;
        let fired = AlarmPair {
            normal_work: mask & BM_ALARM_1 != 0,
            heartbeat: mask & BM_ALARM_2 != 0,
        };
        let cleared = AlarmPair {
            normal_work: clock.is_alarm_cleared(Alarm::NormalWork)?,
            heartbeat: clock.is_alarm_cleared(Alarm::Heartbeat)?,
        };
        let mut alarm_time = AlarmPair::default();
        if !(fired.normal_work || cleared.normal_work) {
            alarm_time.normal_work = Some(clock.alarm_time(Alarm::NormalWork)?);
        }
        if !(fired.heartbeat || cleared.heartbeat) {
            alarm_time.heartbeat = Some(clock.alarm_time(Alarm::Heartbeat)?);
        }
        Ok(Self {
            fired,
            cleared,
            alarm_time,
        })
    }

    /// Whether `alarm` must be armed again: it fired or is disarmed.
    pub fn needs_setting(&self, alarm: Alarm) -> bool {
        self.fired.get(alarm) || self.cleared.get(alarm)
    }
}
