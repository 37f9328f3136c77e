//! Scripted link, clock and delay doubles for unit tests.

#![allow(dead_code)]

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;

use crate::consts::Address;
use crate::document::SampleDocument;
use crate::link::{DatagramLink, Received};
use crate::rtc::{Alarm, AlarmClock, UnixTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MockLinkError;

/// One scripted receive result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Inbound {
    Packet { from: Address, bytes: Vec<u8> },
    Silence,
    Fault,
}

#[derive(Debug)]
pub(crate) struct MockLink {
    pub address: Option<Address>,
    pub retries: Option<u8>,
    pub timeout_ms: Option<u16>,
    pub initialized: bool,
    pub fail_init: bool,
    pub mtu: usize,
    /// Successfully sent packets, in order.
    pub sent: Vec<(Address, Vec<u8>)>,
    pub send_attempts: usize,
    /// Zero-based index of the send attempt that fails.
    pub fail_send: Option<usize>,
    pub inbox: VecDeque<Inbound>,
    pub receive_timeouts: Vec<u32>,
    pub polls: usize,
    pub sleeping: bool,
    pub sleeps: usize,
    pub wakes: usize,
    pub rssi: i16,
}

impl MockLink {
    pub fn new(mtu: usize) -> Self {
        Self {
            address: None,
            retries: None,
            timeout_ms: None,
            initialized: false,
            fail_init: false,
            mtu,
            sent: Vec::new(),
            send_attempts: 0,
            fail_send: None,
            inbox: VecDeque::new(),
            receive_timeouts: Vec::new(),
            polls: 0,
            sleeping: false,
            sleeps: 0,
            wakes: 0,
            rssi: -42,
        }
    }

    pub fn push_bytes(&mut self, from: Address, bytes: Vec<u8>) {
        self.inbox.push_back(Inbound::Packet { from, bytes });
    }

    pub fn push_document(&mut self, from: Address, doc: &SampleDocument) {
        self.push_bytes(from, doc.to_record().unwrap());
    }

    pub fn push_silence(&mut self) {
        self.inbox.push_back(Inbound::Silence);
    }

    pub fn push_fault(&mut self) {
        self.inbox.push_back(Inbound::Fault);
    }

    /// Queues everything `other` sent as if it came from `from`.
    pub fn deliver_from(&mut self, other: &MockLink, from: Address) {
        for (_, bytes) in &other.sent {
            self.push_bytes(from, bytes.clone());
        }
    }

    fn pop(&mut self, buf: &mut [u8]) -> Option<Result<Received, MockLinkError>> {
        match self.inbox.pop_front()? {
            Inbound::Packet { from, bytes } => {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Some(Ok(Received { len, from }))
            }
            Inbound::Silence => None,
            Inbound::Fault => Some(Err(MockLinkError)),
        }
    }
}

impl DatagramLink for MockLink {
    type Error = MockLinkError;

    fn init(&mut self) -> Result<(), MockLinkError> {
        if self.fail_init {
            return Err(MockLinkError);
        }
        self.initialized = true;
        Ok(())
    }

    fn set_this_address(&mut self, address: Address) {
        self.address = Some(address);
    }

    fn set_retries(&mut self, retries: u8) {
        self.retries = Some(retries);
    }

    fn set_timeout(&mut self, timeout_ms: u16) {
        self.timeout_ms = Some(timeout_ms);
    }

    fn max_message_len(&self) -> usize {
        self.mtu
    }

    fn send_to_wait(&mut self, bytes: &[u8], to: Address) -> Result<(), MockLinkError> {
        let attempt = self.send_attempts;
        self.send_attempts += 1;
        self.sleeping = false;
        if self.fail_send == Some(attempt) {
            return Err(MockLinkError);
        }
        assert!(bytes.len() <= self.mtu, "packet larger than MTU");
        self.sent.push((to, bytes.to_vec()));
        Ok(())
    }

    fn recv_from_ack(&mut self, buf: &mut [u8]) -> nb::Result<Received, MockLinkError> {
        self.polls += 1;
        self.sleeping = false;
        match self.pop(buf) {
            Some(Ok(r)) => Ok(r),
            Some(Err(e)) => Err(nb::Error::Other(e)),
            None => Err(nb::Error::WouldBlock),
        }
    }

    fn recv_from_ack_timeout(
        &mut self,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<Option<Received>, MockLinkError> {
        self.receive_timeouts.push(timeout_ms);
        self.sleeping = false;
        self.pop(buf).transpose()
    }

    fn sleep(&mut self) {
        self.sleeping = true;
        self.sleeps += 1;
    }

    fn wake(&mut self) {
        self.sleeping = false;
        self.wakes += 1;
    }

    fn last_rssi(&self) -> i16 {
        self.rssi
    }
}

/// Records every requested pause, in milliseconds.
#[derive(Debug, Default)]
pub(crate) struct RecordingDelay {
    pub ms: Vec<u32>,
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.ms.push(ns / 1_000_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.ms.push(ms);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MockClockError;

/// An RTC with one-shot alarms and a latched fired mask.
#[derive(Debug)]
pub(crate) struct MockClock {
    pub now: UnixTime,
    pub alarms: [Option<UnixTime>; 2],
    pub fired: u8,
    pub set_log: Vec<(Alarm, UnixTime)>,
    pub clear_calls: usize,
    pub failing: bool,
}

impl MockClock {
    pub fn new(now: UnixTime) -> Self {
        Self {
            now,
            alarms: [None, None],
            fired: 0,
            set_log: Vec::new(),
            clear_calls: 0,
            failing: false,
        }
    }

    fn index(alarm: Alarm) -> usize {
        match alarm {
            Alarm::NormalWork => 0,
            Alarm::Heartbeat => 1,
        }
    }

    /// Advances to `at` and fires `alarm`, disarming it.
    pub fn fire(&mut self, alarm: Alarm, at: UnixTime) {
        self.now = at;
        self.fired |= alarm.mask();
        self.alarms[Self::index(alarm)] = None;
    }

    pub fn armed(&self, alarm: Alarm) -> Option<UnixTime> {
        self.alarms[Self::index(alarm)]
    }

    fn check(&self) -> Result<(), MockClockError> {
        if self.failing {
            Err(MockClockError)
        } else {
            Ok(())
        }
    }
}

impl AlarmClock for MockClock {
    type Error = MockClockError;

    fn now(&mut self) -> Result<UnixTime, MockClockError> {
        self.check()?;
        Ok(self.now)
    }

    fn set_alarm(&mut self, alarm: Alarm, at: UnixTime) -> Result<(), MockClockError> {
        self.check()?;
        self.alarms[Self::index(alarm)] = Some(at);
        self.set_log.push((alarm, at));
        Ok(())
    }

    fn clear_alarms(&mut self) -> Result<(), MockClockError> {
        self.check()?;
        self.alarms = [None, None];
        self.clear_calls += 1;
        Ok(())
    }

    fn fired_alarms(&mut self) -> Result<u8, MockClockError> {
        self.check()?;
        Ok(self.fired)
    }

    fn clear_fired_alarms(&mut self) -> Result<(), MockClockError> {
        self.check()?;
        self.fired = 0;
        Ok(())
    }

    fn is_alarm_cleared(&mut self, alarm: Alarm) -> Result<bool, MockClockError> {
        self.check()?;
        Ok(self.armed(alarm).is_none())
    }

    fn alarm_fired(&mut self, alarm: Alarm) -> Result<bool, MockClockError> {
        self.check()?;
        Ok(self.fired & alarm.mask() != 0)
    }

    fn alarm_time(&mut self, alarm: Alarm) -> Result<UnixTime, MockClockError> {
        self.check()?;
        Ok(self.armed(alarm).unwrap_or(0))
    }
}
