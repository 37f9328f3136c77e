//! The point-to-point reliable datagram link the transport is built on.
//!
//! [`DatagramLink`] is the narrow interface this crate consumes from a lower link layer
//! (for example a RadioHead-style reliable datagram manager over an RFM95 LoRa radio,
//! or a serial radio modem). The link owns per-packet acknowledgement, bounded automatic
//! retries and the ack timeout; the transport layers fragmentation on top and never
//! retransmits on its own.
//!
//! ## Receive modes
//!
//! - [`recv_from_ack`](DatagramLink::recv_from_ack) polls once in `nb` style and returns
//!   [`nb::Error::WouldBlock`] when nothing is waiting.
//! - [`recv_from_ack_timeout`](DatagramLink::recv_from_ack_timeout) blocks up to the given
//!   number of milliseconds and returns `Ok(None)` on timeout.

use crate::consts::Address;

/// Metadata of a datagram written into the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Received {
    /// Number of payload bytes written.
    pub len: usize,
    /// Address of the sending node.
    pub from: Address,
}

/// An addressed, acknowledged datagram link.
pub trait DatagramLink {
    /// Error reported by the link (bus failure, missing ack, ...).
    type Error: core::fmt::Debug;

    /// Brings the link up.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Sets the address this node answers to.
    fn set_this_address(&mut self, address: Address);

    /// Sets how many times a datagram is retransmitted before giving up.
    fn set_retries(&mut self, retries: u8);

    /// Sets how long to wait for an acknowledgement, in milliseconds.
    fn set_timeout(&mut self, timeout_ms: u16);

    /// Largest payload one datagram can carry.
    fn max_message_len(&self) -> usize;

    /// Sends `bytes` to `to` and waits for the acknowledgement.
    fn send_to_wait(&mut self, bytes: &[u8], to: Address) -> Result<(), Self::Error>;

    /// Polls for one datagram, acknowledging it if present.
    fn recv_from_ack(&mut self, buf: &mut [u8]) -> nb::Result<Received, Self::Error>;

    /// Waits up to `timeout_ms` for one datagram, acknowledging it if present.
    fn recv_from_ack_timeout(
        &mut self,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<Option<Received>, Self::Error>;

    /// Puts the radio into its low-power state.
    fn sleep(&mut self);

    /// Wakes the radio from its low-power state.
    fn wake(&mut self);

    /// Signal strength of the last packet exchanged, in dBm.
    fn last_rssi(&self) -> i16;
}
