//! Construction-time settings for the transport and scheduler.
//!
//! Both structs implement `Default` with the values the firmware ships with, and derive
//! `serde` so a board crate can keep them alongside its other persisted settings.

use alloc::string::String;

use serde::{Deserialize, Serialize};

use crate::consts::{
    Address, BATCH_DELAY_MS, BROADCAST_ADDRESS, DEFAULT_POWER_LEVEL, DEFAULT_RETRIES,
    DEFAULT_TIMEOUT_MS, FRAGMENT_DELAY_MAX_MS, FRAGMENT_DELAY_MIN_MS, KIND_HEARTBEAT,
    RADIO_MODULE_NAME,
};
use crate::document::DeviceId;

/// Settings of a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// This node's link address.
    pub address: Address,
    /// Link-level retransmissions per datagram.
    pub retries: u8,
    /// Link acknowledgement timeout, in milliseconds.
    pub timeout_ms: u16,
    /// Number of Error outcomes a `receive` tolerates before failing.
    pub receive_retries: u8,
    /// Transmit power level, recorded for the board layer.
    pub power_level: u8,
    /// Inclusive bounds of the randomized pause before each fragment body, in milliseconds.
    pub fragment_delay_ms: (u32, u32),
    /// Pause between records of a batch send, in milliseconds.
    pub batch_delay_ms: u32,
    /// Document kind used by heartbeat sends.
    pub heartbeat_kind: String,
    /// Module name the radio packages its signal strength under.
    pub module_name: String,
    /// Identity stamped on heartbeats and replaced when proxying.
    pub identity: DeviceId,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: BROADCAST_ADDRESS,
            retries: DEFAULT_RETRIES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            receive_retries: DEFAULT_RETRIES,
            power_level: DEFAULT_POWER_LEVEL,
            fragment_delay_ms: (FRAGMENT_DELAY_MIN_MS, FRAGMENT_DELAY_MAX_MS),
            batch_delay_ms: BATCH_DELAY_MS,
            heartbeat_kind: String::from(KIND_HEARTBEAT),
            module_name: String::from(RADIO_MODULE_NAME),
            identity: DeviceId::default(),
        }
    }
}

impl TransportConfig {
    /// Default settings for a node at `address` identifying as `identity`.
    pub fn new(address: Address, identity: DeviceId) -> Self {
        Self {
            address,
            identity,
            ..Self::default()
        }
    }
}

/// Settings of a [`DutyCycleScheduler`](crate::scheduler::DutyCycleScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct SchedulerConfig {
    /// Seconds between heartbeats.
    pub heartbeat_interval_secs: u32,
    /// Seconds between normal work cycles.
    pub normal_work_interval_secs: u32,
    /// Whether a hardware RTC drives the alarms (raises the heartbeat floor to a minute).
    pub hardware_rtc: bool,
    /// Offset of local time from UTC, in seconds, for heartbeat timestamps.
    pub utc_offset_secs: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 3_600,
            normal_work_interval_secs: 900,
            hardware_rtc: true,
            utc_offset_secs: 0,
        }
    }
}
