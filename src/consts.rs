//! Constants used across the transport and scheduler.
//!
//! This module defines the protocol-wide limits, wire keys, and timing floors
//! shared by the fragmenting transport and the duty-cycle scheduler.
//!
//! ## Key Concepts
//!
//! - **Packet limits**: the largest payload any supported link can carry in one datagram.
//! - **Wire keys**: reserved top-level document keys that drive packet classification.
//! - **Timing floors**: minimum sleep durations and alarm separation that keep power-rail
//!   transitions, serial/radio teardown and RTC rounding from corrupting peripheral state.
//! - **Link defaults**: retry and timeout settings applied to the datagram link on `init`.

/// A one-byte node identifier on the radio link.
pub type Address = u8;

/// The broadcast address; every node accepts packets sent here.
pub const BROADCAST_ADDRESS: Address = u8::MAX;

/// Largest datagram payload (in bytes) the transport will ever hand to a link.
///
/// Matches the 251-byte message limit of the RFM95 family. Links reporting a larger
/// MTU are clamped to this value.
pub const MAX_PACKET_LEN: u8 = 251;

/// See [`MAX_PACKET_LEN`](crate::consts::MAX_PACKET_LEN)
pub const MAX_PACKET_LEN_USIZE: usize = MAX_PACKET_LEN as usize;

/// Key holding the document kind (`"data"`, `"heartbeat"`, ...).
pub const KEY_TYPE: &str = "type";
/// Key holding the `{name, instance}` identity block.
pub const KEY_ID: &str = "id";
/// Key of the device name inside the identity block.
pub const KEY_NAME: &str = "name";
/// Key of the instance number inside the identity block.
pub const KEY_INSTANCE: &str = "instance";
/// Key holding the optional `{time_utc, time_local}` block.
pub const KEY_TIMESTAMP: &str = "timestamp";
/// Key of the UTC time string inside the timestamp block.
pub const KEY_TIME_UTC: &str = "time_utc";
/// Key of the local time string inside the timestamp block.
pub const KEY_TIME_LOCAL: &str = "time_local";
/// Key holding the ordered per-source data blocks.
pub const KEY_CONTENTS: &str = "contents";
/// Key naming the source of a data block.
pub const KEY_MODULE: &str = "module";
/// Key holding the readings of a data block.
pub const KEY_DATA: &str = "data";
/// Key present only on fragment headers: number of body packets that follow.
pub const KEY_NUM_PACKETS: &str = "numPackets";
/// Key present only on batch headers: number of complete documents that follow.
pub const KEY_BATCH_SIZE: &str = "batch_size";

/// Optional heartbeat key carrying the node's battery voltage.
pub const KEY_BATTERY_VOLTAGE: &str = "battery_voltage";

/// Document kind used for ordinary samples.
pub const KIND_DATA: &str = "data";
/// Default document kind used for heartbeats.
pub const KIND_HEARTBEAT: &str = "heartbeat";

/// Shortest sleep the scheduler will ever request, in seconds.
pub const MIN_WAIT_SECS: u32 = 5;

/// Two alarms landing closer than this many seconds to each other are in conflict.
pub const ALARM_CONFLICT_SECS: u32 = 5;

/// Heartbeat interval floor when a hardware RTC drives the alarms, in seconds.
pub const MIN_RTC_HEARTBEAT_SECS: u32 = 60;

/// Lower bound of the randomized pause between fragment packets, in milliseconds.
pub const FRAGMENT_DELAY_MIN_MS: u32 = 400;

/// Upper bound of the randomized pause between fragment packets, in milliseconds.
pub const FRAGMENT_DELAY_MAX_MS: u32 = 1_000;

/// Pause between records of a batch send, in milliseconds.
pub const BATCH_DELAY_MS: u32 = 500;

/// Default number of link-level transmission retries.
pub const DEFAULT_RETRIES: u8 = 3;

/// Default link acknowledgement timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u16 = 200;

/// Default transmit power level passed to the radio.
pub const DEFAULT_POWER_LEVEL: u8 = 23;

/// Module name under which the radio packages its signal strength.
pub const RADIO_MODULE_NAME: &str = "LoRa";
