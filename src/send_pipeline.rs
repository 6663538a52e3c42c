use crate::impairment::{Impairment, Verdict};
use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time;
use tracing::{error, trace, Instrument, Span};

/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate mocking
///  the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) -> anyhow::Result<()>;
}

#[async_trait]
impl SendSocket for UdpSocket {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) -> anyhow::Result<()> {
        trace!("UDP socket: sending {} bytes to {:?}", datagram.len(), to);
        self.send_to(datagram, to).await?;
        Ok(())
    }
}

/// All outgoing traffic goes through here. Protocol packets pass the (simulated) impaired
///  network link, text control datagrams are sent as they are.
#[derive(Clone)]
pub struct SendPipeline {
    socket: Arc<dyn SendSocket>,
    impairment: Arc<Impairment>,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn SendSocket>, impairment: Arc<Impairment>) -> SendPipeline {
        SendPipeline { socket, impairment }
    }

    pub fn unimpaired(socket: Arc<dyn SendSocket>) -> SendPipeline {
        SendPipeline::new(socket, Arc::new(Impairment::disabled()))
    }

    /// Sends a protocol packet through the impairment simulator. A dropped packet counts as
    ///  successfully sent, and a delayed packet is delivered from a separate task so that it
    ///  does not hold up anything else. Send errors for delayed packets can only be logged.
    pub async fn send_packet(&self, to: SocketAddr, datagram: Bytes) -> anyhow::Result<()> {
        match self.impairment.apply(datagram) {
            Verdict::Drop => {
                trace!("packet to {:?} lost on the simulated link", to);
                Ok(())
            }
            Verdict::Deliver { datagram, delay: None, .. } => {
                self.socket.send_datagram(to, &datagram).await
            }
            Verdict::Deliver { datagram, delay: Some(delay), .. } => {
                let socket = self.socket.clone();
                tokio::spawn(async move {
                    time::sleep(delay).await;
                    if let Err(e) = socket.send_datagram(to, &datagram).await {
                        error!("error sending delayed packet to {:?}: {}", to, e);
                    }
                }.instrument(Span::current()));
                Ok(())
            }
        }
    }

    pub async fn send_control(&self, to: SocketAddr, datagram: &[u8]) -> anyhow::Result<()> {
        self.socket.send_datagram(to, datagram).await
    }
}
