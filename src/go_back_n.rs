use crate::config::EffectiveSenderConfig;
use crate::packet;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// nothing queued, nothing in flight
    Idle,
    /// there are queued packets and the window has room for them
    Sending,
    /// everything that fits into the window is in flight, waiting for ACKs
    Waiting,
    /// a timeout or NAK marked (part of) the window for retransmission
    Retransmitting,
    /// the terminator was acknowledged
    Done,
    /// too many consecutive retransmissions (timeouts or NAKs) without progress
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    pub index: u64,
    pub sequence: u16,
    pub checksum: u16,
    pub datagram: Bytes,
    pub is_terminator: bool,
}

#[derive(Debug)]
struct WindowEntry {
    packet: OutboundPacket,
    sent_at: Instant,
    in_transit: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub retransmissions: u64,
    pub packets_acked: u64,
    pub timeouts: u64,
    pub naks: u64,
}

/// The sender side of Go-Back-N for a single peer.
///
/// This is a pure state machine: it never does I/O and never reads the clock. Callers feed it
///  time and feedback, and send whatever [GoBackN::poll_transmit] returns.
///
/// Packets are numbered with absolute indexes starting at 1, and the wire sequence is the index
///  modulo the configured sequence modulus. The window is a contiguous run of indexes starting at
///  the oldest unacknowledged packet, so with the window size limited to half the modulus, every
///  wire sequence identifies at most one window entry.
pub struct GoBackN {
    config: Arc<EffectiveSenderConfig>,
    next_index: u64,
    queue: VecDeque<OutboundPacket>,
    window: VecDeque<WindowEntry>,
    retries: u32,
    state: SenderState,
    stats: SenderStats,
}

impl GoBackN {
    pub fn new(config: Arc<EffectiveSenderConfig>) -> GoBackN {
        GoBackN {
            config,
            next_index: 1,
            queue: Default::default(),
            window: Default::default(),
            retries: 0,
            state: SenderState::Idle,
            stats: Default::default(),
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SenderState::Done | SenderState::Abandoned)
    }

    /// number of packets that were sent (at least once) but are not acknowledged yet
    pub fn num_in_flight(&self) -> usize {
        self.window.len()
    }

    pub fn num_queued(&self) -> usize {
        self.queue.len()
    }

    /// Appends a data packet without sending it, returning its wire sequence
    pub fn enqueue(&mut self, payload: &[u8]) -> u16 {
        debug_assert!(payload.len() <= self.config.max_payload_len);
        let sequence = self.config.sequence_space.wire(self.next_index);
        self.push(packet::encode(sequence, payload), sequence, packet::checksum(payload), false)
    }

    pub fn enqueue_terminator(&mut self) -> u16 {
        let sequence = self.config.sequence_space.wire(self.next_index);
        self.push(packet::encode_terminator(sequence), sequence, packet::checksum(&packet::TERMINATOR_PAYLOAD), true)
    }

    /// Splits a document into packets of maximum payload size and appends them, followed by
    ///  the terminator
    pub fn enqueue_document(&mut self, document: &[u8]) {
        for chunk in document.chunks(self.config.max_payload_len) {
            self.enqueue(chunk);
        }
        self.enqueue_terminator();
        debug!("enqueued document of {} bytes as {} packets", document.len(), self.queue.len());
    }

    fn push(&mut self, datagram: Bytes, sequence: u16, checksum: u16, is_terminator: bool) -> u16 {
        self.queue.push_back(OutboundPacket {
            index: self.next_index,
            sequence,
            checksum,
            datagram,
            is_terminator,
        });
        self.next_index += 1;
        self.update_state();
        sequence
    }

    /// Returns all packets that should go on the wire now: window entries marked for
    ///  retransmission first, then queued packets as long as the window has room.
    pub fn poll_transmit(&mut self, now: Instant) -> Vec<OutboundPacket> {
        if self.is_finished() {
            return Vec::new();
        }

        let mut result = Vec::new();
        for entry in self.window.iter_mut() {
            if !entry.in_transit {
                trace!("retransmitting packet #{}", entry.packet.sequence);
                entry.in_transit = true;
                entry.sent_at = now;
                self.stats.retransmissions += 1;
                result.push(entry.packet.clone());
            }
        }

        while self.window.len() < self.config.window_size {
            let Some(packet) = self.queue.pop_front() else {
                break;
            };
            trace!("sending packet #{}", packet.sequence);
            self.stats.packets_sent += 1;
            result.push(packet.clone());
            self.window.push_back(WindowEntry {
                packet,
                sent_at: now,
                in_transit: true,
            });
        }

        self.update_state();
        result
    }

    /// The point in time when the oldest in-flight packet times out
    pub fn next_deadline(&self) -> Option<Instant> {
        self.window.iter()
            .filter(|e| e.in_transit)
            .map(|e| e.sent_at)
            .min()
            .map(|sent_at| sent_at + self.config.packet_timeout)
    }

    /// Cumulative ACK: retires every window entry up to and including the acknowledged sequence.
    ///  Returns the number of retired packets, which is 0 for stale or unknown sequences.
    pub fn on_ack(&mut self, sequence: u16) -> usize {
        if self.is_finished() {
            return 0;
        }

        let Some(pos) = self.position_in_window(sequence) else {
            trace!("ignoring ACK for #{} outside the window", sequence);
            return 0;
        };

        let mut terminator_acked = false;
        for entry in self.window.drain(..=pos) {
            terminator_acked |= entry.packet.is_terminator;
        }

        let num_retired = pos + 1;
        self.stats.packets_acked += num_retired as u64;
        self.retries = 0;
        trace!("ACK for #{} retired {} packets", sequence, num_retired);

        if terminator_acked {
            info!("terminator acknowledged - transfer complete");
            self.state = SenderState::Done;
        }
        else {
            self.update_state();
        }
        num_retired
    }

    /// Marks the window from the NAKed packet onward for immediate retransmission. Returns
    ///  `false` if the sequence is not in the window, or if the retry budget is used up and the
    ///  session was abandoned.
    pub fn on_nak(&mut self, sequence: u16) -> bool {
        if self.is_finished() {
            return false;
        }

        let Some(pos) = self.position_in_window(sequence) else {
            trace!("ignoring NAK for #{} outside the window", sequence);
            return false;
        };

        self.stats.naks += 1;
        if !self.count_retry() {
            return false;
        }

        debug!("NAK for #{} - going back to it (retry {} of {})", sequence, self.retries, self.config.max_retries);
        for entry in self.window.iter_mut().skip(pos) {
            entry.in_transit = false;
        }
        self.state = SenderState::Retransmitting;
        true
    }

    /// Checks the oldest in-flight packet against the timeout. On timeout the entire window is
    ///  marked for retransmission, or the session is abandoned if the retry budget is used up.
    ///  Returns `true` if a retransmission was scheduled.
    pub fn on_timer(&mut self, now: Instant) -> bool {
        if self.is_finished() {
            return false;
        }

        match self.next_deadline() {
            Some(deadline) if now >= deadline => {}
            _ => return false,
        }

        self.stats.timeouts += 1;
        if !self.count_retry() {
            return false;
        }

        if let Some(oldest) = self.window.front() {
            debug!("timeout - going back to #{} (retry {} of {})", oldest.packet.sequence, self.retries, self.config.max_retries);
        }
        for entry in self.window.iter_mut() {
            entry.in_transit = false;
        }
        self.state = SenderState::Retransmitting;
        true
    }

    /// Every go-back counts against the retry budget until an ACK makes progress. Returns
    ///  `false` if the budget is exhausted, which abandons the session.
    fn count_retry(&mut self) -> bool {
        self.retries += 1;
        if self.retries > self.config.max_retries {
            warn!("no progress after {} retries - abandoning transfer", self.config.max_retries);
            self.state = SenderState::Abandoned;
            return false;
        }
        true
    }

    fn position_in_window(&self, sequence: u16) -> Option<usize> {
        self.window.iter()
            .position(|e| e.packet.sequence == sequence)
    }

    fn update_state(&mut self) {
        if self.is_finished() {
            return;
        }

        self.state = if self.window.is_empty() && self.queue.is_empty() {
            SenderState::Idle
        }
        else if self.window.iter().any(|e| !e.in_transit) {
            SenderState::Retransmitting
        }
        else if self.window.len() < self.config.window_size && !self.queue.is_empty() {
            SenderState::Sending
        }
        else {
            SenderState::Waiting
        };
    }
}
