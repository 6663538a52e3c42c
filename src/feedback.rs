use anyhow::bail;
use bytes::{Buf, BufMut};

/// Receiver-to-sender acknowledgement datagrams.
///
/// ```ascii
/// 0: kind (ASCII ACK 0x06 / NAK 0x15)
/// 1: sequence (u16 BE)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    /// cumulative: everything up to and including this sequence arrived intact
    Ack(u16),
    /// this sequence arrived corrupted, please go back to it right away
    Nak(u16),
}

impl Feedback {
    const KIND_ACK: u8 = 0x06;
    const KIND_NAK: u8 = 0x15;

    pub const SERIALIZED_LEN: usize = 3;

    pub fn sequence(&self) -> u16 {
        match self {
            Feedback::Ack(sequence) => *sequence,
            Feedback::Nak(sequence) => *sequence,
        }
    }

    /// cheap check whether a datagram should be parsed as feedback at all
    pub fn looks_like_feedback(datagram: &[u8]) -> bool {
        datagram.len() == Self::SERIALIZED_LEN
            && (datagram[0] == Self::KIND_ACK || datagram[0] == Self::KIND_NAK)
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        match self {
            Feedback::Ack(sequence) => {
                buf.put_u8(Self::KIND_ACK);
                buf.put_u16(*sequence);
            }
            Feedback::Nak(sequence) => {
                buf.put_u8(Self::KIND_NAK);
                buf.put_u16(*sequence);
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Feedback> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            bail!("feedback datagram needs {} bytes, was {}", Self::SERIALIZED_LEN, buf.remaining());
        }

        let kind = buf.get_u8();
        let sequence = buf.get_u16();
        match kind {
            Self::KIND_ACK => Ok(Feedback::Ack(sequence)),
            Self::KIND_NAK => Ok(Feedback::Nak(sequence)),
            other => bail!("invalid feedback kind {:#04x}", other),
        }
    }

    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = bytes::BytesMut::with_capacity(Self::SERIALIZED_LEN);
        self.ser(&mut buf);
        buf.freeze()
    }
}
