//! Error types for the transport and scheduler.
//!
//! Every failure in this crate is recovered locally and surfaced as a `Result`;
//! nothing here aborts the firmware. Link, clock and batch-store errors are carried
//! through as the collaborator's own associated error type.

use crate::consts::Address;
use thiserror::Error;

/// Failures of the binary wire encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The document could not be serialized.
    #[error("failed to encode packet: {0}")]
    Encode(postcard::Error),
    /// The received bytes are not a valid encoded document.
    #[error("failed to decode packet: {0}")]
    Decode(postcard::Error),
    /// The packet decoded, but its root value is not a map.
    #[error("decoded packet is not a document")]
    NotADocument,
}

/// Structural problems with a [`SampleDocument`](crate::document::SampleDocument).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum DocumentError {
    /// Fragmentation needs a `contents` array and the document has none.
    #[error("document has no contents array")]
    MissingContents,
    /// A block that must be a map holds some other value.
    #[error("document block is not a map")]
    NotAMap,
}

/// Failures of [`Transport`](crate::transport::Transport) operations.
///
/// `E` is the error type of the underlying [`DatagramLink`](crate::link::DatagramLink).
#[derive(Debug, Error)]
pub enum TransportError<E> {
    /// The link has not been brought up with [`init`](crate::transport::Transport::init).
    #[error("radio link not initialized")]
    NotInitialized,
    /// The link primitive reported a failure (no ack, bus error, ...).
    #[error("link failure: {0:?}")]
    Link(E),
    /// No packet arrived before the receive timeout.
    #[error("no packet received before timeout")]
    Timeout,
    /// A packet could not be encoded or decoded.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The outgoing document cannot be sent in its current shape.
    #[error("malformed outgoing document: {0}")]
    MalformedDocument(#[from] DocumentError),
    /// A single fragment body does not fit in one packet.
    #[error("fragment {index} encodes to {len} bytes, link MTU is {mtu}")]
    FragmentTooLarge {
        /// Position of the offending element in `contents`.
        index: usize,
        /// Encoded size of the element.
        len: usize,
        /// The link's maximum payload size.
        mtu: usize,
    },
    /// A received packet carried a protocol key with an unusable value.
    #[error("malformed packet from {from}")]
    MalformedPacket {
        /// Sender of the packet.
        from: Address,
    },
    /// The fragment header alone does not fit in one packet.
    #[error("fragment header encodes to {len} bytes, link MTU is {mtu}")]
    HeaderTooLarge {
        /// Encoded size of the header.
        len: usize,
        /// The link's maximum payload size.
        mtu: usize,
    },
    /// The receive retry budget ran out before a document was assembled.
    #[error("receive failed after {attempts} attempts")]
    RetriesExhausted {
        /// Number of Error outcomes that consumed the budget.
        attempts: u8,
    },
    /// The batch store could not provide its records.
    #[error("batch store unavailable")]
    Store,
}

/// Failures of [`DutyCycleScheduler`](crate::scheduler::DutyCycleScheduler) operations.
///
/// `E` is the error type of the underlying [`AlarmClock`](crate::rtc::AlarmClock).
#[derive(Debug, Error)]
pub enum SchedulerError<E> {
    /// The real-time clock reported a failure.
    #[error("clock failure: {0:?}")]
    Clock(E),
    /// Asked to adjust the heartbeat flag but neither alarm has fired.
    #[error("no alarm has fired")]
    NoAlarmFired,
}

#[cfg(feature = "defmt-0-3")]
impl defmt::Format for WireError {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", defmt::Debug2Format(self))
    }
}

#[cfg(feature = "defmt-0-3")]
impl<E: core::fmt::Debug> defmt::Format for TransportError<E> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", defmt::Debug2Format(self))
    }
}

#[cfg(feature = "defmt-0-3")]
impl<E: core::fmt::Debug> defmt::Format for SchedulerError<E> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", defmt::Debug2Format(self))
    }
}
