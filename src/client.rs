use crate::buffer_pool::BufferPool;
use crate::config::TransferConfig;
use crate::feedback::Feedback;
use crate::http_frame;
use crate::impairment::Impairment;
use crate::reassembler::{Reassembler, ReceiveStats, Reception};
use crate::send_pipeline::{SendPipeline, SendSocket};
use anyhow::bail;
use bytes::BytesMut;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

/// A finished download
#[derive(Debug)]
pub struct Transfer {
    pub content: Vec<u8>,
    pub stats: ReceiveStats,
}

/// Requests a document from a server and reassembles it from the packets the server sends,
///  acknowledging them as it goes.
pub struct Client {
    config: Arc<TransferConfig>,
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    pipeline: SendPipeline,
    buffer_pool: BufferPool,
}

impl Client {
    pub async fn connect(server_addr: SocketAddr, config: Arc<TransferConfig>) -> anyhow::Result<Client> {
        config.validate()?;

        let bind_addr = if server_addr.is_ipv6() {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        }
        else {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        debug!("bound client socket to {:?}", socket.local_addr()?);

        let impairment = Impairment::from_config(&config.impairment);
        if impairment.is_active() {
            warn!("simulating an impaired network for outgoing feedback: {:?}", impairment.config());
        }

        let send_socket: Arc<dyn SendSocket> = socket.clone();
        Ok(Client {
            pipeline: SendPipeline::new(send_socket, Arc::new(impairment)),
            buffer_pool: BufferPool::new(config.receive_buffer_size(), 4),
            config,
            socket,
            server_addr,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn fetch(&self, filename: &str) -> anyhow::Result<Transfer> {
        let content_length = self.request(filename).await?;
        if content_length > self.config.max_content_length {
            bail!("{:?} announced a content length of {} bytes, exceeding the limit of {} bytes", self.server_addr, content_length, self.config.max_content_length);
        }
        info!("receiving {:?} ({} bytes) from {:?}", filename, content_length, self.server_addr);

        let mut reassembler = Reassembler::new(content_length, self.config.get_effective_receiver_config());
        while !reassembler.is_finished() {
            let buf = match time::timeout(self.config.idle_timeout, self.recv_from_server()).await {
                Ok(buf) => buf?,
                Err(_) => bail!("no packets from {:?} for {:?} - giving up", self.server_addr, self.config.idle_timeout),
            };
            let reception = reassembler.on_datagram(&buf);
            self.buffer_pool.return_to_pool(buf);
            self.send_feedback(reception).await?;
        }

        self.linger(&mut reassembler).await?;

        let stats = reassembler.stats();
        info!("received {} packets with {} checksum errors ({:.2}% corrupted)", stats.packets_received, stats.checksum_errors, stats.corruption_rate());
        Ok(Transfer {
            content: reassembler.into_content(),
            stats,
        })
    }

    /// sends the request line until the response header arrives, returning the content length
    async fn request(&self, filename: &str) -> anyhow::Result<usize> {
        let request = http_frame::request_line(filename);

        for attempt in 1..=self.config.request_attempts {
            debug!("sending request {:?} (attempt {})", request, attempt);
            self.pipeline.send_control(self.server_addr, request.as_bytes()).await?;

            match time::timeout(self.config.response_timeout, self.recv_response()).await {
                Ok(content_length) => return content_length,
                Err(_) => warn!("no response from {:?} within {:?}", self.server_addr, self.config.response_timeout),
            }
        }
        bail!("no response from {:?} after {} attempts", self.server_addr, self.config.request_attempts)
    }

    async fn recv_response(&self) -> anyhow::Result<usize> {
        loop {
            let buf = self.recv_from_server().await?;
            let is_response = http_frame::is_response(&buf);
            let result = if is_response {
                Some(http_frame::parse_response(&buf))
            }
            else {
                trace!("ignoring datagram that arrived before the response header");
                None
            };
            self.buffer_pool.return_to_pool(buf);

            if let Some(result) = result {
                return result;
            }
        }
    }

    /// keeps acknowledging retransmitted terminators for a while, in case the final ACK was lost
    async fn linger(&self, reassembler: &mut Reassembler) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.config.linger;
        loop {
            let buf = match time::timeout_at(deadline, self.recv_from_server()).await {
                Ok(buf) => buf?,
                Err(_) => return Ok(()),
            };
            trace!("re-acknowledging after the terminator");
            let reception = reassembler.on_datagram(&buf);
            self.buffer_pool.return_to_pool(buf);
            self.send_feedback(reception).await?;
        }
    }

    async fn send_feedback(&self, reception: Reception) -> anyhow::Result<()> {
        let feedback = match reception {
            Reception::Ignored => return Ok(()),
            Reception::Ack(sequence) | Reception::Finished(sequence) => Feedback::Ack(sequence),
            Reception::Nak(sequence) => Feedback::Nak(sequence),
        };
        trace!("sending {:?}", feedback);
        self.pipeline.send_packet(self.server_addr, feedback.to_bytes()).await
    }

    async fn recv_from_server(&self) -> anyhow::Result<BytesMut> {
        loop {
            let mut buf = self.buffer_pool.get_from_pool();
            let (num_read, from) = self.socket.recv_from(&mut buf).await?;
            if from != self.server_addr {
                debug!("ignoring datagram from {:?}", from);
                self.buffer_pool.return_to_pool(buf);
                continue;
            }
            buf.truncate(num_read);
            return Ok(buf);
        }
    }
}
