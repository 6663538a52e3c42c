use crate::feedback::Feedback;
use crate::go_back_n::{GoBackN, SenderState, SenderStats};
use crate::send_pipeline::SendPipeline;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, error, trace};

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// the terminator was acknowledged
    Completed(SenderStats),
    /// the peer stopped acknowledging, i.e. it was silent or only sent NAKs
    Abandoned(SenderStats),
    TransportFailed(anyhow::Error),
    /// the feedback channel was closed, i.e. the server shut down
    Disconnected,
}

/// Drives a single peer's [GoBackN] engine: transmits whatever the engine releases, then waits
///  for feedback or for the oldest in-flight packet to time out, until the engine is finished.
pub struct SendSession {
    peer: SocketAddr,
    engine: GoBackN,
    pipeline: Arc<SendPipeline>,
    feedback: mpsc::Receiver<Feedback>,
}

impl SendSession {
    pub fn new(peer: SocketAddr, engine: GoBackN, pipeline: Arc<SendPipeline>, feedback: mpsc::Receiver<Feedback>) -> SendSession {
        SendSession {
            peer,
            engine,
            pipeline,
            feedback,
        }
    }

    pub async fn run(mut self) -> SessionOutcome {
        loop {
            for packet in self.engine.poll_transmit(Instant::now()) {
                trace!("sending packet #{} (checksum {}) to {:?}", packet.sequence, packet.checksum, self.peer);
                if let Err(e) = self.pipeline.send_packet(self.peer, packet.datagram).await {
                    error!("error sending packet #{} to {:?}: {}", packet.sequence, self.peer, e);
                    return SessionOutcome::TransportFailed(e);
                }
            }

            match self.engine.state() {
                SenderState::Done => return SessionOutcome::Completed(self.engine.stats()),
                SenderState::Abandoned => return SessionOutcome::Abandoned(self.engine.stats()),
                _ => {}
            }

            let deadline = self.engine.next_deadline();
            select! {
                feedback = self.feedback.recv() => {
                    match feedback {
                        Some(Feedback::Ack(sequence)) => {
                            trace!("received ACK for #{}", sequence);
                            self.engine.on_ack(sequence);
                        }
                        Some(Feedback::Nak(sequence)) => {
                            trace!("received NAK for #{}", sequence);
                            self.engine.on_nak(sequence);
                        }
                        None => {
                            debug!("feedback channel closed - stopping session");
                            return SessionOutcome::Disconnected;
                        }
                    }
                }
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.engine.on_timer(Instant::now());
                }
            }
        }
    }
}
