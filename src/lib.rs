//! # fieldrelay
//!
//! A portable, no_std Rust core for battery-powered field sensor nodes that sleep on a
//! real-time clock, wake to collect readings, and relay them to a base station over a
//! small-packet radio.
//!
//! The crate provides two pieces:
//! - a **fragmenting transport** ([`transport::Transport`]) that carries a structured sample
//!   document of any size over a reliable datagram link whose packets hold a few dozen to
//!   ~250 bytes, reassembling it per sender on the other side
//! - a **dual-alarm duty-cycle scheduler** ([`scheduler::DutyCycleScheduler`]) that
//!   interleaves normal work and heartbeats on the two alarms of one RTC without ever
//!   oversleeping or firing both at once
//!
//! Hardware is reached through narrow traits: [`link::DatagramLink`] for the radio,
//! [`rtc::AlarmClock`] for the RTC, [`batch::BatchStore`] for stored batches, and
//! `embedded-hal`'s `DelayNs` for blocking pauses.
//!
//! ## Crate features
//! | Feature              | Description |
//! |----------------------|-------------|
//! | `std`                | Disables `#![no_std]` and enables `std` in the dependencies |
//! | `wake-isr` (default) | Interrupt-safe [`wake::WakeLatch`] using `critical_section::with` |
//! | `defmt-0-3`          | Uses `defmt` logging |
//! | `log`                | Uses `log` logging |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fieldrelay::{DutyCycleScheduler, SampleDocument, Transport};
//!
//! let mut transport = Transport::new(radio, delay, rng, transport_config);
//! transport.init()?;
//! let mut scheduler = DutyCycleScheduler::new(scheduler_config);
//!
//! loop {
//!     let sleep_for = scheduler.calculate_next_event();
//!     sleep_until_alarm(sleep_for);
//!
//!     scheduler.adjust_flag_from_alarms(&mut rtc)?;
//!     scheduler.ensure_alarms_active(&mut rtc)?;
//!     if scheduler.heartbeat_flag() {
//!         let ts = scheduler.heartbeat_timestamp(&mut rtc)?;
//!         transport.send_heartbeat(Some(&ts), BASE_STATION)?;
//!     } else {
//!         let mut doc = collect_readings();
//!         transport.package(&mut doc);
//!         transport.send(&doc, BASE_STATION)?;
//!     }
//! }
//! ```
//!
//! ## Integration Notes
//!
//! - Everything runs on one thread; link calls and inter-packet pauses block.
//! - The RTC interrupt should only end sleep and record a [`wake::WakeReason`].
//! - The sample document is lent to the transport by `&mut` for one call at a time.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[macro_use]
mod fmt;

#[cfg(feature = "wake-isr")]
pub use critical_section;

pub use heapless;

pub mod batch;
pub mod calendar;
pub mod config;
pub mod consts;
pub mod document;
pub mod encoding;
pub mod error;
pub mod link;
pub mod rtc;
pub mod scheduler;
pub mod transport;
pub mod wake;

#[cfg(test)]
mod mock;

pub use config::{SchedulerConfig, TransportConfig};
pub use document::{DeviceId, DocTimestamp, SampleDocument, Value};
pub use error::{SchedulerError, TransportError};
pub use scheduler::DutyCycleScheduler;
pub use transport::Transport;
