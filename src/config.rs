use crate::impairment::ImpairmentConfig;
use crate::packet::HEADER_SIZE;
use crate::sequence::SequenceSpace;
use anyhow::bail;
use std::time::Duration;

/// Largest UDP payload that can be sent over IPV4
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// Receive buffers must be able to hold text framing datagrams (request line, response header)
///  even if data packets are configured to be tiny
const MIN_RECEIVE_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// This is the full size of data packets on the wire, including the packet header. Both
    ///  ends of a transfer must agree on this value since the receiver derives payload offsets
    ///  from it.
    pub packet_size: usize,

    /// This is the maximum number of packets that are sent but not yet acknowledged
    pub window_size: u16,
    /// Wire sequence numbers wrap at this modulus. It must be at least twice the window size
    ///  so that the receiver can map wire sequences to packets unambiguously.
    pub sequence_modulus: u16,

    /// If the oldest unacknowledged packet is this old, the entire window is sent again
    pub packet_timeout: Duration,
    /// Number of consecutive retransmissions (after a timeout or a NAK) without acknowledged
    ///  progress after which a session is abandoned
    pub max_retries: u32,

    pub nak_enabled: bool,

    pub response_timeout: Duration,
    pub request_attempts: u32,
    /// The client gives up on a transfer if the server is silent for this long
    pub idle_timeout: Duration,
    /// After the terminator arrived, the client keeps acknowledging retransmitted terminators
    ///  for this long in case its final ACK was lost
    pub linger: Duration,
    /// The client refuses documents whose announced length exceeds this, before allocating the
    ///  reassembly buffer
    pub max_content_length: usize,

    pub buffer_pool_size: usize,

    pub impairment: ImpairmentConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            packet_size: 512,
            window_size: 32,
            sequence_modulus: 64,
            packet_timeout: Duration::from_millis(20),
            max_retries: 100,
            nak_enabled: true,
            response_timeout: Duration::from_secs(1),
            request_attempts: 5,
            idle_timeout: Duration::from_secs(10),
            linger: Duration::from_millis(250),
            max_content_length: 1 << 30,
            buffer_pool_size: 64,
            impairment: ImpairmentConfig::default(),
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.packet_size <= HEADER_SIZE {
            bail!("packet size must exceed the {} byte packet header, was {}", HEADER_SIZE, self.packet_size);
        }
        if self.packet_size > MAX_DATAGRAM_SIZE {
            bail!("packet size must not exceed {}, was {}", MAX_DATAGRAM_SIZE, self.packet_size);
        }
        if self.sequence_modulus < 2 {
            bail!("sequence modulus must be at least 2, was {}", self.sequence_modulus);
        }
        if self.window_size == 0 {
            bail!("window size must be at least 1");
        }
        if 2 * self.window_size as u32 > self.sequence_modulus as u32 {
            bail!("window size {} is too big for sequence modulus {} - it may be at most half the modulus", self.window_size, self.sequence_modulus);
        }
        if self.packet_timeout.is_zero() {
            bail!("packet timeout must not be zero");
        }
        if self.max_retries == 0 {
            bail!("max retries must be at least 1");
        }
        if self.request_attempts == 0 {
            bail!("request attempts must be at least 1");
        }
        Ok(())
    }

    pub fn max_payload_len(&self) -> usize {
        self.packet_size - HEADER_SIZE
    }

    pub fn receive_buffer_size(&self) -> usize {
        self.packet_size.max(MIN_RECEIVE_BUFFER_SIZE)
    }

    pub fn sequence_space(&self) -> SequenceSpace {
        SequenceSpace::new(self.sequence_modulus)
    }

    pub fn get_effective_sender_config(&self) -> EffectiveSenderConfig {
        EffectiveSenderConfig {
            max_payload_len: self.max_payload_len(),
            window_size: self.window_size as usize,
            packet_timeout: self.packet_timeout,
            max_retries: self.max_retries,
            sequence_space: self.sequence_space(),
        }
    }

    pub fn get_effective_receiver_config(&self) -> EffectiveReceiverConfig {
        EffectiveReceiverConfig {
            max_payload_len: self.max_payload_len(),
            sequence_space: self.sequence_space(),
            nak_enabled: self.nak_enabled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EffectiveSenderConfig {
    pub max_payload_len: usize,
    pub window_size: usize,
    pub packet_timeout: Duration,
    pub max_retries: u32,
    pub sequence_space: SequenceSpace,
}

#[derive(Debug, Clone, Copy)]
pub struct EffectiveReceiverConfig {
    pub max_payload_len: usize,
    pub sequence_space: SequenceSpace,
    pub nak_enabled: bool,
}
