use crate::config::EffectiveReceiverConfig;
use crate::packet;
use rustc_hash::FxHashSet;
use tracing::{debug, info, trace, warn};

/// What the receiver should send back after a datagram was processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    /// nothing to acknowledge
    Ignored,
    Ack(u16),
    Nak(u16),
    /// the terminator arrived in order: acknowledge it, the transfer is complete
    Finished(u16),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    /// data packets, excluding the terminator, including duplicates and corrupted packets
    pub packets_received: u64,
    pub checksum_errors: u64,
}

impl ReceiveStats {
    /// percentage of received data packets that failed checksum verification
    pub fn corruption_rate(&self) -> f64 {
        if self.packets_received == 0 {
            0.0
        }
        else {
            100.0 * self.checksum_errors as f64 / self.packets_received as f64
        }
    }
}

/// The receiving end of a transfer: validates arriving packets and copies their payload into a
///  buffer of the announced content length, at the offset implied by the packet's position in
///  the stream.
///
/// Wire sequences are mapped back to absolute packet indexes relative to the next expected
///  index, so transfers may be longer than the sequence space. Acknowledgements are cumulative,
///  i.e. they refer to the last packet up to which everything arrived intact.
pub struct Reassembler {
    config: EffectiveReceiverConfig,
    buffer: Vec<u8>,
    next_expected: u64,
    /// packets beyond `next_expected` that arrived intact
    verified_ahead: FxHashSet<u64>,
    terminator: Option<u64>,
    stats: ReceiveStats,
}

impl Reassembler {
    pub fn new(content_length: usize, config: EffectiveReceiverConfig) -> Reassembler {
        Reassembler {
            config,
            buffer: vec![0; content_length],
            next_expected: 1,
            verified_ahead: Default::default(),
            terminator: None,
            stats: Default::default(),
        }
    }

    pub fn stats(&self) -> ReceiveStats {
        self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.terminator.is_some()
    }

    pub fn content(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_content(self) -> Vec<u8> {
        self.buffer
    }

    pub fn on_datagram(&mut self, datagram: &[u8]) -> Reception {
        let packet = match packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("dropping datagram: {}", e);
                return Reception::Ignored;
            }
        };

        if let Some(terminator) = self.terminator {
            trace!("packet #{} after the terminator - acknowledging the terminator again", packet.sequence);
            return Reception::Ack(self.config.sequence_space.wire(terminator));
        }

        let index = match self.config.sequence_space.unwrap(packet.sequence, self.next_expected) {
            Some(index) if index > 0 => index,
            _ => {
                debug!("packet #{} does not belong to this transfer", packet.sequence);
                return self.cumulative_ack();
            }
        };

        let offset = (index - 1).saturating_mul(self.config.max_payload_len as u64);
        let valid = packet.is_valid();

        if valid && packet.has_terminator_payload() && offset >= self.buffer.len() as u64 {
            return self.on_terminator(index, packet.sequence);
        }

        self.stats.packets_received += 1;
        debug!("received packet #{} (checksum {}, {} bytes)", packet.sequence, packet.checksum, packet.payload.len());

        if valid {
            self.write(offset, packet.payload);
            if index == self.next_expected {
                self.verified_ahead.remove(&index);
                self.next_expected += 1;
            }
            else if index > self.next_expected {
                self.verified_ahead.insert(index);
            }
            self.cumulative_ack()
        }
        else {
            self.stats.checksum_errors += 1;
            warn!("checksum error in packet #{}: expected {}, was {}", packet.sequence, packet.checksum, packet::checksum(packet.payload));

            // best effort, but never overwrite data that arrived intact
            if index >= self.next_expected && !self.verified_ahead.contains(&index) {
                self.write(offset, packet.payload);
            }

            if self.config.nak_enabled {
                Reception::Nak(packet.sequence)
            }
            else {
                self.cumulative_ack()
            }
        }
    }

    fn on_terminator(&mut self, index: u64, sequence: u16) -> Reception {
        if index != self.next_expected {
            debug!("terminator #{} arrived while packets before it are missing", sequence);
            return self.cumulative_ack();
        }

        info!("received terminator #{} - transfer complete", sequence);
        self.terminator = Some(index);
        self.next_expected += 1;
        Reception::Finished(sequence)
    }

    fn cumulative_ack(&self) -> Reception {
        if self.next_expected <= 1 {
            Reception::Ignored
        }
        else {
            Reception::Ack(self.config.sequence_space.wire(self.next_expected - 1))
        }
    }

    /// writes payload at the offset, clipped to the buffer's bounds
    fn write(&mut self, offset: u64, payload: &[u8]) {
        if offset >= self.buffer.len() as u64 {
            if !payload.is_empty() {
                debug!("payload at offset {} is beyond the content length of {} - ignoring it", offset, self.buffer.len());
            }
            return;
        }

        let start = offset as usize;
        let len = payload.len().min(self.buffer.len() - start);
        if len < payload.len() {
            debug!("clipping payload at offset {} to {} bytes", offset, len);
        }
        self.buffer[start..start + len].copy_from_slice(&payload[..len]);
    }
}
