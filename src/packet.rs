use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Offset of the big-endian checksum field inside a packet
pub const CHECKSUM_OFFSET: usize = 0;
/// Offset of the big-endian sequence field inside a packet
pub const SEQUENCE_OFFSET: usize = 2;
/// Number of header bytes preceding the payload. Nothing that tampers with packets (e.g. the
///  impairment simulator) ever touches bytes before this offset.
pub const DATA_OFFSET: usize = 4;
pub const HEADER_SIZE: usize = DATA_OFFSET;

/// The payload of the end-of-stream marker: a single reserved zero byte and no file data.
pub const TERMINATOR_PAYLOAD: [u8; 1] = [0];

/// The arithmetic sum of all payload bytes, wrapping at 2^16.
///
/// This is a deliberately weak checksum: errors that compensate each other (one byte going up by
///  the same amount another goes down) are not detected.
pub fn checksum(payload: &[u8]) -> u16 {
    payload.iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(b as u16))
}

pub fn verify(payload: &[u8], checksum: u16) -> bool {
    self::checksum(payload) == checksum
}

pub fn encode(sequence: u16, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u16(checksum(payload));
    buf.put_u16(sequence);
    buf.put_slice(payload);
    buf.freeze()
}

pub fn encode_terminator(sequence: u16) -> Bytes {
    encode(sequence, &TERMINATOR_PAYLOAD)
}

pub fn decode(datagram: &[u8]) -> anyhow::Result<PacketView<'_>> {
    if datagram.len() < HEADER_SIZE {
        bail!("datagram of {} bytes is shorter than the packet header", datagram.len());
    }

    let mut buf = datagram;
    let checksum = buf.get_u16();
    let sequence = buf.get_u16();
    Ok(PacketView {
        checksum,
        sequence,
        payload: buf,
    })
}

/// A decoded packet, borrowing its payload from the received datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketView<'a> {
    pub checksum: u16,
    pub sequence: u16,
    pub payload: &'a [u8],
}

impl PacketView<'_> {
    pub fn is_valid(&self) -> bool {
        verify(self.payload, self.checksum)
    }

    /// NB: a one-byte data chunk containing a zero byte looks exactly like this. Only the
    ///  receiver can tell them apart, based on the packet's position relative to the content
    ///  length.
    pub fn has_terminator_payload(&self) -> bool {
        self.payload == TERMINATOR_PAYLOAD
    }
}
