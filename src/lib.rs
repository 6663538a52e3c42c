//! A minimal reliable file transfer over UDP, using Go-Back-N ARQ, with a network impairment
//!  simulator to exercise the failure paths.
//!
//! ## Protocol
//!
//! * The client requests a document with an HTTP/1.0 style request line
//!   (`GET <name> HTTP/1.0`) in a single datagram
//! * The server answers with a response header in a single datagram, announcing the document's
//!   length (`Content-Length`), or with a 4xx / 5xx status line if it can not serve the document
//! * The server then sends the document in packets, followed by a terminator packet
//!   * packets have a 16 bit checksum (arithmetic sum of the payload bytes) and a sequence
//!     number that wraps at a small modulus (64 by default)
//!   * up to a fixed window of packets (32 by default) is in flight
//!   * if the oldest unacknowledged packet times out, the entire window is sent again
//! * The client acknowledges cumulatively (ACK) and asks for immediate retransmission of
//!   corrupted packets (NAK)
//! * The server's session for a client ends when the terminator is acknowledged, or when the
//!   client stopped responding for too long
//!
//! Both sides can send their outgoing packets through a simulated unreliable link that drops,
//!  corrupts or delays packets with configurable probabilities.
//!
//! ## Wire format
//!
//! Data packets:
//!
//! ```ascii
//! 0: checksum (u16 BE) - sum of the payload bytes, wrapping
//! 2: sequence (u16 BE)
//! 4: payload (up to packet size - 4 bytes)
//! ```
//!
//! The terminator is a packet with a single `0` payload byte, positioned after the last data
//!  packet.
//!
//! Feedback from client to server:
//!
//! ```ascii
//! 0: kind (u8) - 0x06 for ACK, 0x15 for NAK
//! 1: sequence (u16 BE)
//! ```

pub mod buffer_pool;
pub mod client;
pub mod config;
pub mod document_source;
pub mod feedback;
pub mod go_back_n;
pub mod http_frame;
pub mod impairment;
pub mod packet;
pub mod random;
pub mod reassembler;
pub mod send_pipeline;
pub mod send_session;
pub mod sequence;
pub mod server;
pub mod session_registry;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
