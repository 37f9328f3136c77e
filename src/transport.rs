//! Fragmenting, retry-aware transport over a [`DatagramLink`].
//!
//! A [`SampleDocument`] that fits one packet travels as one packet. A larger one is split
//! along its `contents` array: a *fragment header* announcing `numPackets`, then one
//! *fragment body* per element, in array order, with a randomized pause before each body
//! so that nodes sharing the channel are less likely to collide.
//!
//! On the receiving side every packet is classified, in this order:
//!
//! 1. `batch_size` present: a batch header, the outstanding estimate grows.
//! 2. `numPackets` present: a fragment header, (re)starting reassembly for the sender.
//! 3. the sender has reassembly in progress: a fragment body, appended to `contents`.
//! 4. `module` present: an orphaned body, dropped.
//! 5. anything else: a complete document.
//!
//! Each classification is a [`FragmentOutcome::Incomplete`] or
//! [`FragmentOutcome::Complete`]; timeouts and undecodable packets are errors.
//! [`Transport::receive`] only charges its retry budget for errors, so a sender that is
//! legitimately streaming fragments is never penalized.
//!
//! ## Example
//!
//! ```rust
//! use embedded_hal_mock::eh1::delay::NoopDelay;
//! use fieldrelay::config::TransportConfig;
//! use fieldrelay::document::{DeviceId, SampleDocument, Value};
//! use fieldrelay::transport::Transport;
//! # use fieldrelay::link::{DatagramLink, Received};
//! # struct Loopback(Vec<Vec<u8>>);
//! # impl DatagramLink for Loopback {
//! #     type Error = ();
//! #     fn init(&mut self) -> Result<(), ()> { Ok(()) }
//! #     fn set_this_address(&mut self, _: u8) {}
//! #     fn set_retries(&mut self, _: u8) {}
//! #     fn set_timeout(&mut self, _: u16) {}
//! #     fn max_message_len(&self) -> usize { 251 }
//! #     fn send_to_wait(&mut self, b: &[u8], _: u8) -> Result<(), ()> { self.0.push(b.to_vec()); Ok(()) }
//! #     fn recv_from_ack(&mut self, _: &mut [u8]) -> nb::Result<Received, ()> { Err(nb::Error::WouldBlock) }
//! #     fn recv_from_ack_timeout(&mut self, _: &mut [u8], _: u32) -> Result<Option<Received>, ()> { Ok(None) }
//! #     fn sleep(&mut self) {}
//! #     fn wake(&mut self) {}
//! #     fn last_rssi(&self) -> i16 { -60 }
//! # }
//! # let link = Loopback(Vec::new());
//! let rng = rand::rngs::mock::StepRng::new(0, 1);
//! let config = TransportConfig::new(1, DeviceId::new("Dend", 4));
//! let mut transport = Transport::new(link, NoopDelay::new(), rng, config);
//! transport.init().unwrap();
//!
//! let mut doc = SampleDocument::with_kind("data", transport.identity());
//! let _ = doc
//!     .data_block("SHT31")
//!     .insert("Temperature".into(), Value::from(21.5));
//! transport.send(&doc, 0).unwrap();
//! ```

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use rand_core::RngCore;

use crate::batch::BatchStore;
use crate::config::TransportConfig;
use crate::consts::{
    Address, KEY_BATCH_SIZE, KEY_CONTENTS, KEY_ID, KEY_MODULE, KEY_NUM_PACKETS, KEY_TIMESTAMP,
    KEY_TYPE, MAX_PACKET_LEN_USIZE,
};
use crate::document::{DeviceId, DocTimestamp, Map, SampleDocument, Value};
use crate::encoding::{self, PacketBuf};
use crate::error::{DocumentError, TransportError};
use crate::link::{DatagramLink, Received};

/// Reassembly state for one sender.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialPacket {
    remaining_fragments: u32,
    working: SampleDocument,
}

impl PartialPacket {
    /// Bodies still expected before the document is complete.
    pub fn remaining_fragments(&self) -> u32 {
        self.remaining_fragments
    }

    /// The document assembled so far.
    pub fn working(&self) -> &SampleDocument {
        &self.working
    }
}

/// Result of classifying one received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum FragmentOutcome {
    /// A whole document from `from` is now in the caller's document.
    Complete {
        /// Sender of the finished document.
        from: Address,
    },
    /// The packet was consumed but no document is finished yet.
    Incomplete,
}

/// The radio transport.
///
/// Owns the link, a delay source for inter-packet pauses, an RNG for the fragment jitter,
/// and the per-sender reassembly table.
#[derive(Debug)]
pub struct Transport<L, D, R> {
    link: L,
    delay: D,
    rng: R,
    config: TransportConfig,
    initialized: bool,
    partials: BTreeMap<Address, PartialPacket>,
    expected_packets: u32,
    signal_strength: i16,
}

impl<L, D, R> Transport<L, D, R>
where
    L: DatagramLink,
    D: DelayNs,
    R: RngCore,
{
    /// Creates a transport. The link is not touched until [`init`](Self::init).
    pub fn new(link: L, delay: D, rng: R, config: TransportConfig) -> Self {
        Self {
            link,
            delay,
            rng,
            config,
            initialized: false,
            partials: BTreeMap::new(),
            expected_packets: 0,
            signal_strength: 0,
        }
    }

    /// Brings the link up, applies address, retries and timeout, then puts the radio to
    /// sleep.
    pub fn init(&mut self) -> Result<(), TransportError<L::Error>> {
        debug!("Initializing radio link");
        if let Err(e) = self.link.init() {
            error!("Radio failed to initialize");
            return Err(TransportError::Link(e));
        }
        self.link.set_this_address(self.config.address);
        self.link.set_retries(self.config.retries);
        self.link.set_timeout(self.config.timeout_ms);
        info!(
            "Radio ready: address {}, retries {}, timeout {} ms, power level {}",
            self.config.address,
            self.config.retries,
            self.config.timeout_ms,
            self.config.power_level
        );
        self.link.sleep();
        self.initialized = true;
        Ok(())
    }

    /// Whether [`init`](Self::init) has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// This node's address.
    pub fn address(&self) -> Address {
        self.config.address
    }

    /// Changes this node's address.
    pub fn set_address(&mut self, address: Address) {
        self.config.address = address;
        if self.initialized {
            self.link.set_this_address(address);
            self.link.sleep();
        }
        info!("Radio address set to {}", address);
    }

    /// The identity stamped on heartbeats.
    pub fn identity(&self) -> &DeviceId {
        &self.config.identity
    }

    /// The transport's settings.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Signal strength of the last packet exchanged, in dBm.
    pub fn signal_strength(&self) -> i16 {
        self.signal_strength
    }

    /// Estimate of documents still expected from announced batches.
    ///
    /// Grows with every batch header and shrinks with every completed document. Lost
    /// packets and interleaved batches make it drift; do not rely on it being exact.
    pub fn expected_packets(&self) -> u32 {
        self.expected_packets
    }

    /// Reassembly state for `from`, if a fragmented document is in progress.
    pub fn partial(&self, from: Address) -> Option<&PartialPacket> {
        self.partials.get(&from)
    }

    /// Number of senders with reassembly in progress.
    pub fn pending_senders(&self) -> usize {
        self.partials.len()
    }

    /// Largest payload handed to the link.
    pub fn mtu(&self) -> usize {
        self.link.max_message_len().min(MAX_PACKET_LEN_USIZE)
    }

    /// Wakes the radio.
    pub fn power_up(&mut self) {
        if self.initialized {
            self.link.wake();
            debug!("Radio powered up");
        }
    }

    /// Puts the radio to sleep.
    pub fn power_down(&mut self) {
        if self.initialized {
            self.link.sleep();
            debug!("Radio powered down");
        }
    }

    /// Writes the last signal strength into `doc` under the radio's module block.
    pub fn package(&self, doc: &mut SampleDocument) {
        if !self.initialized {
            return;
        }
        let _ = doc
            .data_block(&self.config.module_name)
            .insert("RSSI".into(), Value::from(self.signal_strength));
    }

    /// Borrows the link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutably borrows the link.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Gives back the link, delay and RNG.
    pub fn release(self) -> (L, D, R) {
        (self.link, self.delay, self.rng)
    }

    /// Sends `doc` to `to`, fragmenting it if it does not fit one packet.
    pub fn send(
        &mut self,
        doc: &SampleDocument,
        to: Address,
    ) -> Result<(), TransportError<L::Error>> {
        self.ensure_initialized()?;
        let bytes = doc.to_record()?;
        let mtu = self.mtu();
        if bytes.len() <= mtu {
            self.send_full_packet(&bytes, to)
        } else {
            debug!(
                "Document encodes to {} bytes, MTU is {}; fragmenting",
                bytes.len(),
                mtu
            );
            self.send_fragmented_packet(doc, to)
        }
    }

    /// Sends the compact heartbeat document to `to`.
    pub fn send_heartbeat(
        &mut self,
        timestamp: Option<&DocTimestamp>,
        to: Address,
    ) -> Result<(), TransportError<L::Error>> {
        self.send_heartbeat_with(timestamp, &Map::new(), to)
    }

    /// Sends the heartbeat document with extra top-level fields, such as
    /// [`KEY_BATTERY_VOLTAGE`](crate::consts::KEY_BATTERY_VOLTAGE).
    ///
    /// Fields named like a protocol key (`type`, `id`, `timestamp`, `contents`, `module`,
    /// `numPackets`, `batch_size`) are ignored.
    pub fn send_heartbeat_with(
        &mut self,
        timestamp: Option<&DocTimestamp>,
        extra: &Map,
        to: Address,
    ) -> Result<(), TransportError<L::Error>> {
        let mut doc = SampleDocument::heartbeat(
            &self.config.heartbeat_kind,
            &self.config.identity,
            timestamp,
        );
        for (key, value) in extra {
            if is_reserved(key) {
                warn!("Heartbeat field {} is reserved, ignoring", key.as_str());
                continue;
            }
            let _ = doc.insert(key, value.clone());
        }
        info!("Sending heartbeat to {}", to);
        self.send(&doc, to)
    }

    fn send_full_packet(
        &mut self,
        bytes: &[u8],
        to: Address,
    ) -> Result<(), TransportError<L::Error>> {
        self.transmit(bytes, to)?;
        info!("Sent {} byte packet to {}", bytes.len(), to);
        Ok(())
    }

    fn send_fragmented_packet(
        &mut self,
        doc: &SampleDocument,
        to: Address,
    ) -> Result<(), TransportError<L::Error>> {
        let contents = match doc.contents() {
            Some(contents) => contents,
            None => {
                error!("Document too large for one packet and has no contents to split");
                return Err(DocumentError::MissingContents.into());
            }
        };
        let mtu = self.mtu();

        // Everything is encoded up front so nothing goes out for a document that cannot
        // be sent whole.
        let header = fragment_header(doc, contents.len()).to_record()?;
        if header.len() > mtu {
            error!("Fragment header is {} bytes, MTU is {}", header.len(), mtu);
            return Err(TransportError::HeaderTooLarge {
                len: header.len(),
                mtu,
            });
        }
        let mut bodies: Vec<PacketBuf> = Vec::with_capacity(contents.len());
        for (index, block) in contents.iter().enumerate() {
            if block.as_map().is_none() {
                error!("Fragment {} is not a map, receivers would reject it", index);
                return Err(DocumentError::NotAMap.into());
            }
            let mut buf = PacketBuf::new();
            let len = match encoding::encode_into(block, &mut buf) {
                Ok(()) => buf.len(),
                Err(_) => encoding::encoded_len(block)?,
            };
            if len > mtu {
                error!("Fragment {} is {} bytes, MTU is {}", index, len, mtu);
                return Err(TransportError::FragmentTooLarge { index, len, mtu });
            }
            bodies.push(buf);
        }

        let total = bodies.len();
        if let Err(e) = self.transmit(&header, to) {
            error!(
                "Failed to send fragment header to {}, {} bodies not sent",
                to, total
            );
            return Err(e);
        }
        info!("Sent fragment header to {} announcing {} bodies", to, total);

        for (index, body) in bodies.iter().enumerate() {
            self.pause_before_fragment();
            if let Err(e) = self.transmit(body, to) {
                error!(
                    "Failed to send fragment {} / {} to {}, aborting",
                    index + 1,
                    total,
                    to
                );
                return Err(e);
            }
            debug!("Sent fragment {} / {} to {}", index + 1, total, to);
        }
        Ok(())
    }

    /// Waits a random time within the configured fragment delay bounds.
    fn pause_before_fragment(&mut self) {
        let (low, high) = self.config.fragment_delay_ms;
        let span = high.saturating_sub(low).saturating_add(1);
        let ms = low.saturating_add(self.rng.next_u32() % span);
        trace!("Waiting {} ms before next fragment", ms);
        self.delay.delay_ms(ms);
    }

    /// Hands one packet to the link, then samples RSSI and puts the radio to sleep.
    fn transmit(&mut self, bytes: &[u8], to: Address) -> Result<(), TransportError<L::Error>> {
        let result = self.link.send_to_wait(bytes, to);
        self.signal_strength = self.link.last_rssi();
        self.link.sleep();
        result.map_err(|e| {
            warn!("Link failed to deliver {} bytes to {}", bytes.len(), to);
            TransportError::Link(e)
        })
    }

    /// Receives one complete document into `doc`.
    ///
    /// `timeout_ms` bounds each link receive; `0` polls once without blocking. With
    /// `from` set, packets from other senders are dropped. With `should_proxy` set, the
    /// transport adopts the identity of the received document.
    ///
    /// Returns the sender. Fails with [`TransportError::RetriesExhausted`] once the
    /// configured number of timeouts or undecodable packets has been seen.
    pub fn receive(
        &mut self,
        doc: &mut SampleDocument,
        timeout_ms: u32,
        from: Option<Address>,
        should_proxy: bool,
    ) -> Result<Address, TransportError<L::Error>> {
        self.ensure_initialized()?;
        let budget = self.config.receive_retries;
        let mut attempts: u8 = 0;
        while attempts < budget {
            match self.receive_fragment(doc, timeout_ms, from) {
                Ok(FragmentOutcome::Complete { from: sender }) => {
                    self.on_complete(doc, should_proxy);
                    info!("Received complete document from {}", sender);
                    return Ok(sender);
                }
                Ok(FragmentOutcome::Incomplete) => {}
                Err(_) => {
                    attempts += 1;
                    warn!("Receive attempt {} / {} failed", attempts, budget);
                }
            }
        }
        error!("No document received after {} attempts", attempts);
        Err(TransportError::RetriesExhausted { attempts })
    }

    /// Receives and classifies a single packet.
    ///
    /// Errors are timeouts, link faults, undecodable packets and protocol keys with
    /// unusable values. Completion bookkeeping is left to [`receive`](Self::receive).
    fn receive_fragment(
        &mut self,
        doc: &mut SampleDocument,
        timeout_ms: u32,
        from: Option<Address>,
    ) -> Result<FragmentOutcome, TransportError<L::Error>> {
        self.ensure_initialized()?;
        let mut buf = [0u8; MAX_PACKET_LEN_USIZE];
        let received = self.receive_packet(&mut buf, timeout_ms)?;
        let bytes = &buf[..received.len.min(buf.len())];
        let sender = received.from;

        if let Some(expected) = from {
            if expected != sender {
                warn!("Ignoring packet from {}, waiting for {}", sender, expected);
                return Ok(FragmentOutcome::Incomplete);
            }
        }

        let packet = match encoding::decode_map(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                error!("Failed to decode packet from {}: {:?}", sender, e);
                return Err(e.into());
            }
        };
        self.classify(packet, sender, doc)
    }

    fn receive_packet(
        &mut self,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<Received, TransportError<L::Error>> {
        trace!("Waiting up to {} ms for a packet", timeout_ms);
        let result = if timeout_ms == 0 {
            match self.link.recv_from_ack(buf) {
                Ok(received) => Ok(Some(received)),
                Err(nb::Error::WouldBlock) => Ok(None),
                Err(nb::Error::Other(e)) => Err(e),
            }
        } else {
            self.link.recv_from_ack_timeout(buf, timeout_ms)
        };
        self.link.sleep();
        match result {
            Ok(Some(received)) => {
                self.signal_strength = self.link.last_rssi();
                debug!(
                    "Received {} bytes from {} (RSSI {})",
                    received.len,
                    received.from,
                    self.signal_strength
                );
                Ok(received)
            }
            Ok(None) => {
                debug!("No packet received");
                Err(TransportError::Timeout)
            }
            Err(e) => {
                error!("Link receive failed");
                Err(TransportError::Link(e))
            }
        }
    }

    fn classify(
        &mut self,
        mut packet: Map,
        sender: Address,
        doc: &mut SampleDocument,
    ) -> Result<FragmentOutcome, TransportError<L::Error>> {
        if let Some(size) = packet.get(KEY_BATCH_SIZE) {
            let size = count_field(size).ok_or(TransportError::MalformedPacket { from: sender })?;
            self.expected_packets = self.expected_packets.saturating_add(size);
            info!(
                "Batch of {} announced by {}, expecting {}",
                size, sender, self.expected_packets
            );
            return Ok(FragmentOutcome::Incomplete);
        }

        if let Some(count) = packet.remove(KEY_NUM_PACKETS) {
            let count =
                count_field(&count).ok_or(TransportError::MalformedPacket { from: sender })?;
            return Ok(self.start_sequence(packet, count, sender, doc));
        }

        if self.partials.contains_key(&sender) {
            return Ok(self.append_fragment(packet, sender, doc));
        }

        if packet.contains_key(KEY_MODULE) {
            warn!("Dropping fragment body from {} with no header", sender);
            return Ok(FragmentOutcome::Incomplete);
        }

        doc.replace(SampleDocument::from_map(packet));
        Ok(FragmentOutcome::Complete { from: sender })
    }

    fn start_sequence(
        &mut self,
        header: Map,
        count: u32,
        sender: Address,
        doc: &mut SampleDocument,
    ) -> FragmentOutcome {
        if let Some(stale) = self.partials.remove(&sender) {
            warn!(
                "Dropping corrupted sequence from {} with {} fragments outstanding",
                sender,
                stale.remaining_fragments
            );
        }
        let mut working = SampleDocument::from_map(header);
        working.contents_mut().clear();

        if count == 0 {
            doc.replace(working);
            return FragmentOutcome::Complete { from: sender };
        }
        let _ = self.partials.insert(
            sender,
            PartialPacket {
                remaining_fragments: count,
                working,
            },
        );
        info!("Expecting {} fragments from {}", count, sender);
        FragmentOutcome::Incomplete
    }

    fn append_fragment(
        &mut self,
        body: Map,
        sender: Address,
        doc: &mut SampleDocument,
    ) -> FragmentOutcome {
        let remaining = match self.partials.get_mut(&sender) {
            Some(partial) => {
                partial.working.contents_mut().push(Value::Map(body));
                partial.remaining_fragments = partial.remaining_fragments.saturating_sub(1);
                partial.remaining_fragments
            }
            None => return FragmentOutcome::Incomplete,
        };
        debug!("Fragment from {} stored, {} remaining", sender, remaining);
        if remaining > 0 {
            return FragmentOutcome::Incomplete;
        }
        match self.partials.remove(&sender) {
            Some(done) => {
                doc.replace(done.working);
                FragmentOutcome::Complete { from: sender }
            }
            None => FragmentOutcome::Incomplete,
        }
    }

    fn on_complete(&mut self, doc: &SampleDocument, should_proxy: bool) {
        if should_proxy {
            match doc.id() {
                Some(id) => {
                    info!("Proxying as {} {}", id.name.as_str(), id.instance);
                    self.config.identity = id;
                }
                None => warn!("Received document has no identity to proxy"),
            }
        }
        self.expected_packets = self.expected_packets.saturating_sub(1);
    }

    /// Relays the store's batch to `to`, one document at a time, using `doc` as the
    /// working document.
    ///
    /// Does nothing and returns `Ok(0)` if the store is not ready to publish. Otherwise a
    /// batch header announcing the number of readable records goes first. Unreadable
    /// records are skipped. The first failed send aborts the batch.
    ///
    /// Returns the number of documents sent.
    pub fn send_batch<S: BatchStore>(
        &mut self,
        store: &mut S,
        doc: &mut SampleDocument,
        to: Address,
    ) -> Result<usize, TransportError<L::Error>> {
        self.ensure_initialized()?;
        if !store.should_publish() {
            debug!(
                "Batch not ready: {} / {} records",
                store.current_batch(),
                store.batch_size()
            );
            return Ok(0);
        }
        let records = store.records().map_err(|_| {
            error!("Batch store could not provide its records");
            TransportError::Store
        })?;

        let mut documents = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match SampleDocument::from_record(record) {
                Ok(d) => documents.push(d),
                Err(e) => warn!("Skipping unreadable batch record {}: {:?}", index, e),
            }
        }
        if documents.is_empty() {
            warn!("Batch has no readable records");
            return Ok(0);
        }

        let total = documents.len();
        let mut header = SampleDocument::new();
        let _ = header.insert(
            KEY_BATCH_SIZE,
            Value::from(i64::try_from(total).unwrap_or(i64::MAX)),
        );
        self.transmit(&header.to_record()?, to)?;
        info!("Announced batch of {} to {}", total, to);

        let mut sent = 0;
        for next in documents {
            self.delay.delay_ms(self.config.batch_delay_ms);
            doc.replace(next);
            if let Err(e) = self.send(doc, to) {
                error!("Batch send stopped after {} / {} documents", sent, total);
                return Err(e);
            }
            sent += 1;
        }
        info!("Sent batch of {} documents to {}", sent, to);
        Ok(sent)
    }

    /// Receives one document of a batch and returns how many are still expected.
    ///
    /// Call repeatedly until it returns `0`. The count is an estimate, see
    /// [`expected_packets`](Self::expected_packets).
    pub fn receive_batch(
        &mut self,
        doc: &mut SampleDocument,
        timeout_ms: u32,
        should_proxy: bool,
    ) -> Result<u32, TransportError<L::Error>> {
        let _ = self.receive(doc, timeout_ms, None, should_proxy)?;
        Ok(self.expected_packets)
    }

    fn ensure_initialized(&self) -> Result<(), TransportError<L::Error>> {
        if self.initialized {
            Ok(())
        } else {
            error!("Radio used before init");
            Err(TransportError::NotInitialized)
        }
    }
}

/// The header announcing `count` bodies: the document's kind, identity and timestamp
/// with an empty `contents`.
fn fragment_header(doc: &SampleDocument, count: usize) -> SampleDocument {
    let mut header = SampleDocument::new();
    for key in [KEY_TYPE, KEY_ID, KEY_TIMESTAMP] {
        if let Some(value) = doc.get(key) {
            let _ = header.insert(key, value.clone());
        }
    }
    let _ = header.insert(
        KEY_NUM_PACKETS,
        Value::from(i64::try_from(count).unwrap_or(i64::MAX)),
    );
    let _ = header.insert(KEY_CONTENTS, Value::array());
    header
}

/// Keys that drive packet classification or identify the document.
fn is_reserved(key: &str) -> bool {
    matches!(
        key,
        KEY_TYPE
            | KEY_ID
            | KEY_TIMESTAMP
            | KEY_CONTENTS
            | KEY_MODULE
            | KEY_NUM_PACKETS
            | KEY_BATCH_SIZE
    )
}

/// A non-negative packet count.
fn count_field(value: &Value) -> Option<u32> {
    value.as_i64().and_then(|n| u32::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{KEY_BATTERY_VOLTAGE, KEY_DATA, KIND_DATA};
    use crate::mock::{MockLink, RecordingDelay};
    use alloc::format;
    use alloc::string::String;
    use alloc::vec;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use rand::rngs::mock::StepRng;

    const BASE: Address = 0;
    const NODE_A: Address = 1;
    const NODE_B: Address = 2;

    type TestTransport<D, R> = Transport<MockLink, D, R>;

    fn transport(mtu: usize, address: Address) -> TestTransport<NoopDelay, StepRng> {
        let config = TransportConfig::new(address, DeviceId::new("Node", i64::from(address)));
        let mut t = Transport::new(
            MockLink::new(mtu),
            NoopDelay::new(),
            StepRng::new(0, 1),
            config,
        );
        t.init().unwrap();
        t
    }

    fn block(module: &str, readings: usize) -> Value {
        let mut data = Map::new();
        for i in 0..readings {
            let _ = data.insert(format!("reading_{i}"), Value::from(i as f64 + 0.5));
        }
        let mut b = Map::new();
        let _ = b.insert(String::from(KEY_MODULE), Value::from(module));
        let _ = b.insert(String::from(KEY_DATA), Value::Map(data));
        Value::Map(b)
    }

    /// Two readings per block give 63 byte blocks; four blocks encode to ~300 bytes.
    fn sample(blocks: usize, readings: usize) -> SampleDocument {
        let mut doc = SampleDocument::with_kind(KIND_DATA, &DeviceId::new("Dend", 4));
        for i in 0..blocks {
            doc.contents_mut().push(block(&format!("Sensor{i}"), readings));
        }
        doc
    }

    #[test]
    fn test_init_configures_link() {
        let t = transport(251, 7);
        let link = t.link();
        assert!(link.initialized);
        assert_eq!(link.address, Some(7));
        assert_eq!(link.retries, Some(3));
        assert_eq!(link.timeout_ms, Some(200));
        assert!(link.sleeping);
    }

    #[test]
    fn test_init_failure() {
        let mut link = MockLink::new(251);
        link.fail_init = true;
        let mut t = Transport::new(
            link,
            NoopDelay::new(),
            StepRng::new(0, 1),
            TransportConfig::default(),
        );
        assert!(matches!(t.init(), Err(TransportError::Link(_))));
        assert!(!t.is_initialized());
        let doc = sample(1, 1);
        assert!(matches!(
            t.send(&doc, BASE),
            Err(TransportError::NotInitialized)
        ));
    }

    #[test]
    fn test_round_trip_single_packet() {
        let mut tx = transport(251, NODE_A);
        let doc = sample(1, 2);
        tx.send(&doc, BASE).unwrap();
        assert_eq!(tx.link().sent.len(), 1);
        assert_eq!(tx.link().sent[0].0, BASE);

        let mut rx = transport(251, BASE);
        rx.link_mut().deliver_from(tx.link(), NODE_A);
        let mut received = SampleDocument::new();
        let from = rx.receive(&mut received, 100, None, false).unwrap();
        assert_eq!(from, NODE_A);
        assert_eq!(received, doc);
        assert_eq!(rx.link().receive_timeouts, vec![100]);
    }

    #[test]
    fn test_fragmentation_round_trip() {
        let mut tx = transport(64, NODE_A);
        let doc = sample(4, 2);
        assert!(doc.to_record().unwrap().len() > 64);
        tx.send(&doc, BASE).unwrap();

        let sent = &tx.link().sent;
        assert_eq!(sent.len(), 5);
        let header = SampleDocument::from_record(&sent[0].1).unwrap();
        assert_eq!(header.get(KEY_NUM_PACKETS).and_then(Value::as_i64), Some(4));
        assert_eq!(header.id(), doc.id());
        assert_eq!(header.contents().map(Vec::len), Some(0));
        for (i, (_, bytes)) in sent[1..].iter().enumerate() {
            assert_eq!(
                &encoding::decode(bytes).unwrap(),
                &doc.contents().unwrap()[i]
            );
        }

        let mut rx = transport(64, BASE);
        rx.link_mut().deliver_from(tx.link(), NODE_A);
        let mut received = SampleDocument::new();
        assert_eq!(rx.receive(&mut received, 100, None, false).unwrap(), NODE_A);
        assert_eq!(received, doc);
        assert_eq!(rx.pending_senders(), 0);
    }

    #[test]
    fn test_fragment_header_keeps_timestamp() {
        let mut tx = transport(251, NODE_A);
        let mut doc = sample(8, 3);
        doc.set_timestamp(&DocTimestamp::from_unix(1_669_790_901, 0));
        tx.send(&doc, BASE).unwrap();
        assert_eq!(tx.link().sent.len(), 9);
        let header = SampleDocument::from_record(&tx.link().sent[0].1).unwrap();
        assert_eq!(header.kind(), Some(KIND_DATA));
        assert_eq!(header.timestamp(), doc.timestamp());
    }

    #[test]
    fn test_fragment_delays_within_bounds() {
        let config = TransportConfig::new(NODE_A, DeviceId::new("Node", 1));
        let mut tx = Transport::new(
            MockLink::new(64),
            RecordingDelay::default(),
            SmallRng::seed_from_u64(7),
            config,
        );
        tx.init().unwrap();
        tx.send(&sample(4, 2), BASE).unwrap();
        let (link, delay, _) = tx.release();
        assert_eq!(link.sent.len(), 5);
        assert_eq!(delay.ms.len(), 4);
        assert!(delay.ms.iter().all(|ms| (400..=1_000).contains(ms)));
    }

    #[test]
    fn test_fragmenting_requires_contents() {
        let mut tx = transport(64, NODE_A);
        let mut doc = SampleDocument::new();
        let _ = doc.insert("notes", Value::from(String::from_utf8(vec![b'n'; 120]).unwrap()));
        assert!(matches!(
            tx.send(&doc, BASE),
            Err(TransportError::MalformedDocument(DocumentError::MissingContents))
        ));
        assert!(tx.link().sent.is_empty());
    }

    #[test]
    fn test_non_map_fragment_fails_before_sending() {
        let mut tx = transport(64, NODE_A);
        let mut doc = SampleDocument::with_kind(KIND_DATA, &DeviceId::new("Dend", 4));
        for i in 0..10 {
            doc.contents_mut().push(Value::from(format!("reading-{i}")));
        }
        assert!(doc.to_record().unwrap().len() > 64);
        assert!(matches!(
            tx.send(&doc, BASE),
            Err(TransportError::MalformedDocument(DocumentError::NotAMap))
        ));
        assert_eq!(tx.link().send_attempts, 0);
    }

    #[test]
    fn test_oversized_fragment_fails_before_sending() {
        let mut tx = transport(64, NODE_A);
        let mut doc = sample(1, 1);
        doc.contents_mut().push(block("Huge", 20));
        assert!(matches!(
            tx.send(&doc, BASE),
            Err(TransportError::FragmentTooLarge { index: 1, mtu: 64, .. })
        ));
        assert_eq!(tx.link().send_attempts, 0);
    }

    #[test]
    fn test_header_failure_sends_no_bodies() {
        let mut tx = transport(64, NODE_A);
        tx.link_mut().fail_send = Some(0);
        assert!(matches!(
            tx.send(&sample(4, 2), BASE),
            Err(TransportError::Link(_))
        ));
        assert_eq!(tx.link().send_attempts, 1);
        assert!(tx.link().sent.is_empty());
    }

    #[test]
    fn test_body_failure_aborts_sequence() {
        let mut tx = transport(64, NODE_A);
        tx.link_mut().fail_send = Some(2);
        assert!(matches!(
            tx.send(&sample(4, 2), BASE),
            Err(TransportError::Link(_))
        ));
        // Header and first body went out, the second body failed, nothing after it.
        assert_eq!(tx.link().send_attempts, 3);
        assert_eq!(tx.link().sent.len(), 2);
    }

    #[test]
    fn test_retry_budget_counts_only_errors() {
        let mut rx = transport(251, BASE);
        let budget = rx.config().receive_retries;
        for _ in 0..=budget {
            rx.link_mut().push_silence();
        }
        let mut doc = SampleDocument::new();
        assert!(matches!(
            rx.receive(&mut doc, 50, None, false),
            Err(TransportError::RetriesExhausted { attempts }) if attempts == budget
        ));
        // The budget stopped the loop; one scripted timeout is left over.
        assert_eq!(rx.link().inbox.len(), 1);

        let mut tx = transport(64, NODE_A);
        let big = sample(40, 1);
        tx.send(&big, BASE).unwrap();
        let mut rx = transport(64, BASE);
        rx.link_mut().push_silence();
        rx.link_mut().push_bytes(NODE_A, vec![0xff, 0xff]);
        rx.link_mut().deliver_from(tx.link(), NODE_A);
        assert_eq!(rx.receive(&mut doc, 50, None, false).unwrap(), NODE_A);
        assert_eq!(doc.contents().map(Vec::len), Some(40));
    }

    #[test]
    fn test_link_fault_consumes_retry() {
        let mut rx = transport(251, BASE);
        rx.link_mut().push_fault();
        rx.link_mut().push_document(NODE_A, &sample(1, 1));
        let mut doc = SampleDocument::new();
        assert_eq!(rx.receive(&mut doc, 50, None, false).unwrap(), NODE_A);
    }

    #[test]
    fn test_stale_sequence_is_replaced() {
        let mut first = transport(64, NODE_A);
        first.send(&sample(4, 2), BASE).unwrap();
        let mut second = transport(64, NODE_A);
        let mut fresh = sample(2, 2);
        fresh.set_kind("new");
        second.send(&fresh, BASE).unwrap();

        let mut rx = transport(64, BASE);
        // Header and two bodies of the first sequence, then the whole second one.
        for (_, bytes) in first.link().sent.iter().take(3) {
            rx.link_mut().push_bytes(NODE_A, bytes.clone());
        }
        rx.link_mut().deliver_from(second.link(), NODE_A);

        let mut doc = SampleDocument::new();
        for _ in 0..3 {
            assert_eq!(
                rx.receive_fragment(&mut doc, 50, None).unwrap(),
                FragmentOutcome::Incomplete
            );
        }
        assert_eq!(rx.partial(NODE_A).unwrap().remaining_fragments(), 2);

        assert_eq!(rx.receive(&mut doc, 50, None, false).unwrap(), NODE_A);
        assert_eq!(doc, fresh);
    }

    #[test]
    fn test_orphan_body_is_dropped() {
        let mut rx = transport(251, BASE);
        rx.link_mut()
            .push_bytes(NODE_B, encoding::encode(&block("SHT31", 2)).unwrap());
        let mut doc = SampleDocument::new();
        assert_eq!(
            rx.receive_fragment(&mut doc, 50, None).unwrap(),
            FragmentOutcome::Incomplete
        );
        assert!(rx.partial(NODE_B).is_none());
        assert!(doc.is_empty());
    }

    #[test]
    fn test_interleaved_senders() {
        let mut a = transport(64, NODE_A);
        let doc_a = sample(2, 2);
        a.send(&doc_a, BASE).unwrap();
        let mut b = transport(64, NODE_B);
        let mut doc_b = sample(3, 2);
        doc_b.set_id(&DeviceId::new("Oth", 9));
        b.send(&doc_b, BASE).unwrap();

        let mut rx = transport(64, BASE);
        let (sa, sb) = (&a.link().sent, &b.link().sent);
        let order = [
            (NODE_A, &sa[0]),
            (NODE_B, &sb[0]),
            (NODE_B, &sb[1]),
            (NODE_A, &sa[1]),
            (NODE_B, &sb[2]),
            (NODE_A, &sa[2]),
            (NODE_B, &sb[3]),
        ];
        for (from, (_, bytes)) in order {
            rx.link_mut().push_bytes(from, bytes.clone());
        }

        let mut doc = SampleDocument::new();
        assert_eq!(rx.receive(&mut doc, 50, None, false).unwrap(), NODE_A);
        assert_eq!(doc, doc_a);
        assert_eq!(rx.partial(NODE_B).unwrap().remaining_fragments(), 1);
        assert_eq!(rx.receive(&mut doc, 50, None, false).unwrap(), NODE_B);
        assert_eq!(doc, doc_b);
    }

    #[test]
    fn test_receive_filters_sender() {
        let mut rx = transport(251, BASE);
        rx.link_mut().push_document(NODE_B, &sample(1, 1));
        let mut expected = sample(1, 1);
        expected.set_kind("wanted");
        rx.link_mut().push_document(NODE_A, &expected);
        let mut doc = SampleDocument::new();
        assert_eq!(rx.receive(&mut doc, 50, Some(NODE_A), false).unwrap(), NODE_A);
        assert_eq!(doc, expected);
    }

    #[test]
    fn test_proxy_adopts_identity() {
        let mut rx = transport(251, BASE);
        rx.link_mut().push_document(NODE_A, &sample(1, 1));
        let mut doc = SampleDocument::new();
        let _ = rx.receive(&mut doc, 50, None, true).unwrap();
        assert_eq!(rx.identity(), &DeviceId::new("Dend", 4));

        rx.send_heartbeat(None, NODE_B).unwrap();
        let hb = SampleDocument::from_record(&rx.link().sent[0].1).unwrap();
        assert_eq!(hb.id(), Some(DeviceId::new("Dend", 4)));
    }

    #[test]
    fn test_heartbeat_document() {
        let mut tx = transport(251, NODE_A);
        let ts = DocTimestamp::from_unix(1_669_790_901, 3_600);
        tx.send_heartbeat(Some(&ts), BASE).unwrap();
        let hb = SampleDocument::from_record(&tx.link().sent[0].1).unwrap();
        assert_eq!(hb.kind(), Some("heartbeat"));
        assert_eq!(hb.id(), Some(DeviceId::new("Node", 1)));
        assert_eq!(hb.timestamp(), Some(ts));
        assert_eq!(hb.contents().map(Vec::len), Some(0));
    }

    #[test]
    fn test_heartbeat_extra_fields() {
        let mut tx = transport(251, NODE_A);
        let mut extra = Map::new();
        let _ = extra.insert(String::from(KEY_BATTERY_VOLTAGE), Value::from(4.2));
        let _ = extra.insert(String::from(KEY_TYPE), Value::from("data"));
        let _ = extra.insert(String::from(KEY_MODULE), Value::from("Analog"));
        tx.send_heartbeat_with(None, &extra, BASE).unwrap();

        let hb = SampleDocument::from_record(&tx.link().sent[0].1).unwrap();
        assert_eq!(
            hb.get(KEY_BATTERY_VOLTAGE).and_then(Value::as_f64),
            Some(4.2)
        );
        assert_eq!(hb.kind(), Some("heartbeat"));
        assert!(!hb.contains_key(KEY_MODULE));
    }

    #[test]
    fn test_non_blocking_receive() {
        let mut rx = transport(251, BASE);
        let mut doc = SampleDocument::new();
        assert!(matches!(
            rx.receive(&mut doc, 0, None, false),
            Err(TransportError::RetriesExhausted { attempts: 3 })
        ));
        assert_eq!(rx.link().polls, 3);

        rx.link_mut().push_document(NODE_A, &sample(1, 1));
        assert_eq!(rx.receive(&mut doc, 0, None, false).unwrap(), NODE_A);
        assert_eq!(rx.link().polls, 4);
        assert!(rx.link().receive_timeouts.is_empty());
    }

    fn batch_header(size: i64) -> SampleDocument {
        let mut header = SampleDocument::new();
        let _ = header.insert(KEY_BATCH_SIZE, Value::from(size));
        header
    }

    #[test]
    fn test_completion_decrements_estimate() {
        let mut rx = transport(251, BASE);
        rx.link_mut().push_document(NODE_A, &batch_header(2));
        rx.link_mut().push_document(NODE_A, &sample(1, 1));
        let mut doc = SampleDocument::new();
        assert_eq!(rx.receive(&mut doc, 50, None, false).unwrap(), NODE_A);
        assert_eq!(rx.expected_packets(), 1);
    }

    #[test]
    fn test_second_batch_header_grows_estimate() {
        let mut rx = transport(251, BASE);
        rx.link_mut().push_document(NODE_A, &batch_header(2));
        rx.link_mut().push_document(NODE_A, &sample(1, 1));
        rx.link_mut().push_document(NODE_B, &batch_header(3));
        rx.link_mut().push_document(NODE_A, &sample(1, 2));
        let mut doc = SampleDocument::new();
        assert_eq!(rx.receive_batch(&mut doc, 50, false).unwrap(), 1);
        assert_eq!(rx.receive_batch(&mut doc, 50, false).unwrap(), 3);
        assert_eq!(doc, sample(1, 2));
    }

    #[test]
    fn test_estimate_does_not_underflow() {
        let mut rx = transport(251, BASE);
        rx.link_mut().push_document(NODE_A, &sample(1, 1));
        rx.link_mut().push_document(NODE_A, &sample(1, 2));
        let mut doc = SampleDocument::new();
        assert_eq!(rx.receive_batch(&mut doc, 50, false).unwrap(), 0);
        assert_eq!(rx.receive_batch(&mut doc, 50, false).unwrap(), 0);
    }

    #[test]
    fn test_malformed_protocol_field() {
        let mut rx = transport(251, BASE);
        let mut header = SampleDocument::new();
        let _ = header.insert(KEY_NUM_PACKETS, Value::from(-3));
        rx.link_mut().push_document(NODE_A, &header);
        let mut doc = SampleDocument::new();
        assert!(matches!(
            rx.receive_fragment(&mut doc, 50, None),
            Err(TransportError::MalformedPacket { from: NODE_A })
        ));
    }

    #[test]
    fn test_empty_fragment_sequence_completes() {
        let mut rx = transport(251, BASE);
        let header = fragment_header(&sample(0, 0), 0);
        rx.link_mut().push_document(NODE_A, &header);
        let mut doc = SampleDocument::new();
        assert_eq!(
            rx.receive_fragment(&mut doc, 50, None).unwrap(),
            FragmentOutcome::Complete { from: NODE_A }
        );
        assert_eq!(doc.contents().map(Vec::len), Some(0));
        assert!(!doc.contains_key(KEY_NUM_PACKETS));
    }

    #[test]
    fn test_package_signal_strength() {
        let mut tx = transport(251, NODE_A);
        tx.link_mut().rssi = -87;
        tx.send(&sample(1, 1), BASE).unwrap();
        assert_eq!(tx.signal_strength(), -87);

        let mut doc = sample(1, 1);
        tx.package(&mut doc);
        let rssi = doc.data_block("LoRa").get("RSSI").and_then(Value::as_i64);
        assert_eq!(rssi, Some(-87));
    }

    #[test]
    fn test_power_and_address() {
        let mut t = transport(251, NODE_A);
        t.power_up();
        assert_eq!(t.link().wakes, 1);
        assert!(!t.link().sleeping);
        t.power_down();
        assert!(t.link().sleeping);
        t.set_address(9);
        assert_eq!(t.address(), 9);
        assert_eq!(t.link().address, Some(9));
    }

    struct Store {
        ready: bool,
        records: Vec<Vec<u8>>,
    }

    impl BatchStore for Store {
        type Error = ();

        fn should_publish(&self) -> bool {
            self.ready
        }

        fn batch_size(&self) -> usize {
            3
        }

        fn current_batch(&self) -> usize {
            self.records.len()
        }

        fn records(&mut self) -> Result<Vec<Vec<u8>>, ()> {
            Ok(self.records.clone())
        }
    }

    #[test]
    fn test_send_batch_not_ready() {
        let mut tx = transport(251, NODE_A);
        let mut store = Store {
            ready: false,
            records: vec![sample(1, 1).to_record().unwrap()],
        };
        let mut doc = SampleDocument::new();
        assert_eq!(tx.send_batch(&mut store, &mut doc, BASE).unwrap(), 0);
        assert!(tx.link().sent.is_empty());
    }

    #[test]
    fn test_batch_round_trip() {
        let docs: Vec<SampleDocument> = (0..3)
            .map(|i| {
                let mut d = sample(1, 1);
                let _ = d.insert("seq", Value::from(i));
                d
            })
            .collect();
        let mut records: Vec<Vec<u8>> = docs.iter().map(|d| d.to_record().unwrap()).collect();
        records.insert(1, vec![0xff, 0xff, 0xff]);
        let mut store = Store {
            ready: true,
            records,
        };

        let config = TransportConfig::new(NODE_A, DeviceId::new("Node", 1));
        let mut tx = Transport::new(
            MockLink::new(251),
            RecordingDelay::default(),
            StepRng::new(0, 1),
            config,
        );
        tx.init().unwrap();
        let mut doc = SampleDocument::new();
        assert_eq!(tx.send_batch(&mut store, &mut doc, BASE).unwrap(), 3);
        let (link, delay, _) = tx.release();
        assert_eq!(link.sent.len(), 4);
        assert_eq!(delay.ms, vec![500, 500, 500]);

        let mut rx = transport(251, BASE);
        rx.link_mut().deliver_from(&link, NODE_A);
        let mut remaining = Vec::new();
        let mut got = Vec::new();
        for _ in 0..3 {
            remaining.push(rx.receive_batch(&mut doc, 50, false).unwrap());
            got.push(doc.clone());
        }
        assert_eq!(remaining, vec![2, 1, 0]);
        assert_eq!(got, docs);
    }
}
