use crate::buffer_pool::BufferPool;
use crate::config::TransferConfig;
use crate::document_source::DocumentSource;
use crate::feedback::Feedback;
use crate::go_back_n::GoBackN;
use crate::http_frame;
use crate::impairment::Impairment;
use crate::send_pipeline::{SendPipeline, SendSocket};
use crate::send_session::{SendSession, SessionOutcome};
use crate::session_registry::{SessionHandle, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;

/// Feedback is lossy anyway, so a session that falls behind this much just misses some of it
const FEEDBACK_CHANNEL_CAPACITY: usize = 256;

/// The server is where everything comes together: it listens on a UdpSocket, starts a session
///  for each document request, and routes ACK / NAK feedback to the requesting peer's session.
pub struct Server {
    socket: Arc<UdpSocket>,
    sessions: SessionStarter,
    buffer_pool: BufferPool,
}

impl Server {
    pub async fn bind(addr: SocketAddr, config: Arc<TransferConfig>, documents: Arc<dyn DocumentSource>) -> anyhow::Result<Server> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("bound server socket to {:?}", socket.local_addr()?);

        let impairment = Impairment::from_config(&config.impairment);
        if impairment.is_active() {
            warn!("simulating an impaired network for outgoing packets: {:?}", impairment.config());
        }

        let send_socket: Arc<dyn SendSocket> = socket.clone();
        Ok(Server {
            buffer_pool: BufferPool::new(config.receive_buffer_size(), config.buffer_pool_size),
            sessions: SessionStarter {
                pipeline: Arc::new(SendPipeline::new(send_socket, Arc::new(impairment))),
                registry: Default::default(),
                config,
                documents,
            },
            socket,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn num_active_sessions(&self) -> usize {
        self.sessions.registry.len()
    }

    pub async fn recv_loop(&self) {
        info!("starting receive loop");

        loop {
            let mut buf = self.buffer_pool.get_from_pool();
            let (num_read, from) = match self.socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    self.buffer_pool.return_to_pool(buf);
                    continue;
                }
            };
            buf.truncate(num_read);

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "datagram_received", ?correlation_id);
            self.on_datagram(from, &buf).instrument(span).await;

            self.buffer_pool.return_to_pool(buf);
        }
    }

    async fn on_datagram(&self, from: SocketAddr, datagram: &[u8]) {
        trace!("received {} bytes from {:?}", datagram.len(), from);

        if Feedback::looks_like_feedback(datagram) {
            match Feedback::deser(&mut &datagram[..]) {
                Ok(feedback) => self.on_feedback(from, feedback),
                Err(e) => warn!("unparsable feedback from {:?}: {}", from, e),
            }
            return;
        }

        match http_frame::parse_request(datagram) {
            Ok(filename) => {
                // loading the document may take a while, and the receive loop must keep routing
                //  feedback to running sessions in the meantime
                let sessions = self.sessions.clone();
                tokio::spawn(async move {
                    sessions.on_request(from, &filename).await
                }.in_current_span());
            }
            Err(e) => {
                warn!("dropping malformed request from {:?}: {}", from, e);
                self.sessions.send_text(from, http_frame::BAD_REQUEST).await;
            }
        }
    }

    fn on_feedback(&self, from: SocketAddr, feedback: Feedback) {
        let Some(session) = self.sessions.registry.get(&from) else {
            trace!("{:?} from {:?} without an active session - ignoring", feedback, from);
            return;
        };

        match session.feedback.try_send(feedback) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("session {} is falling behind - dropping {:?}", session.session_id, feedback),
            Err(TrySendError::Closed(_)) => trace!("session {} is shutting down - dropping {:?}", session.session_id, feedback),
        }
    }
}

/// Everything it takes to answer a request and run the resulting session, detached from the
///  receive loop
#[derive(Clone)]
struct SessionStarter {
    config: Arc<TransferConfig>,
    pipeline: Arc<SendPipeline>,
    registry: Arc<SessionRegistry>,
    documents: Arc<dyn DocumentSource>,
}

impl SessionStarter {
    async fn on_request(&self, from: SocketAddr, filename: &str) {
        if let Some(session) = self.registry.get(&from) {
            debug!("repeated request from {:?} - sending the response header again", from);
            self.send_text(from, &http_frame::response_header(session.content_length)).await;
            return;
        }

        let document = match self.documents.load(filename).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                info!("{:?} requested {:?} which does not exist", from, filename);
                self.send_text(from, http_frame::NOT_FOUND).await;
                return;
            }
            Err(e) => {
                error!("error loading {:?}: {}", filename, e);
                self.send_text(from, http_frame::INTERNAL_SERVER_ERROR).await;
                return;
            }
        };

        let session_id = Uuid::new_v4();
        let span = span!(Level::INFO, "session", %from, %session_id);
        async {
            info!("sending {:?} ({} bytes)", filename, document.len());
            if let Err(e) = self.pipeline.send_control(from, http_frame::response_header(document.len()).as_bytes()).await {
                error!("error sending response header: {}", e);
                return;
            }
            self.start_session(from, session_id, &document);
        }.instrument(span).await
    }

    fn start_session(&self, peer: SocketAddr, session_id: Uuid, document: &[u8]) {
        let mut engine = GoBackN::new(Arc::new(self.config.get_effective_sender_config()));
        engine.enqueue_document(document);

        let (feedback_tx, feedback_rx) = mpsc::channel(FEEDBACK_CHANNEL_CAPACITY);
        let handle = SessionHandle {
            session_id,
            feedback: feedback_tx,
            content_length: document.len(),
        };
        if !self.registry.register(peer, handle) {
            // a concurrent request from the same peer won the race
            warn!("there is a session for {:?} already", peer);
            return;
        }

        let session = SendSession::new(peer, engine, self.pipeline.clone(), feedback_rx);
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let outcome = session.run().await;
            registry.remove(&peer, session_id);

            match outcome {
                SessionOutcome::Completed(stats) => info!("transfer complete: {:?}", stats),
                SessionOutcome::Abandoned(stats) => warn!("peer stopped responding - abandoned transfer: {:?}", stats),
                SessionOutcome::TransportFailed(e) => error!("transfer failed: {}", e),
                SessionOutcome::Disconnected => debug!("server shut down during transfer"),
            }
        }.in_current_span());
    }

    /// best effort
    async fn send_text(&self, to: SocketAddr, text: &str) {
        if let Err(e) = self.pipeline.send_control(to, text.as_bytes()).await {
            warn!("error sending {:?} to {:?}: {}", text.lines().next().unwrap_or_default(), to, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_source::{InMemorySource, MockDocumentSource};
    use crate::packet;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;

    /// a document source that never finishes loading "slow"
    struct StallingSource(InMemorySource);

    #[async_trait]
    impl DocumentSource for StallingSource {
        async fn load(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
            if name == "slow" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.0.load(name).await
        }
    }

    async fn server(documents: Arc<dyn DocumentSource>) -> Server {
        let config = TransferConfig {
            packet_size: 10,
            ..TransferConfig::default()
        };
        Server::bind(SocketAddr::from(([127, 0, 0, 1], 0)), Arc::new(config), documents).await.unwrap()
    }

    async fn peer_socket() -> UdpSocket {
        UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap()
    }

    async fn recv(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = vec![0; 2048];
        let (n, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf)).await
            .expect("timed out waiting for a datagram")
            .unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn test_serves_document() {
        let server = Arc::new(server(Arc::new(InMemorySource::default().with_document("a", "ABCDEFGHIJ"))).await);
        let server_addr = server.local_addr().unwrap();
        let server_clone = server.clone();
        tokio::spawn(async move { server_clone.recv_loop().await });

        let peer = peer_socket().await;
        peer.send_to(http_frame::request_line("a").as_bytes(), server_addr).await.unwrap();

        assert_eq!(http_frame::parse_response(&recv(&peer).await).unwrap(), 10);
        assert_eq!(recv(&peer).await, packet::encode(1, b"ABCDEF").to_vec());
        assert_eq!(recv(&peer).await, packet::encode(2, b"GHIJ").to_vec());
        assert_eq!(recv(&peer).await, packet::encode_terminator(3).to_vec());
        assert_eq!(server.num_active_sessions(), 1);

        peer.send_to(&Feedback::Ack(3).to_bytes(), server_addr).await.unwrap();
        timeout(Duration::from_secs(5), async {
            while server.num_active_sessions() > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }).await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_request_resends_header() {
        let server = Arc::new(server(Arc::new(InMemorySource::default().with_document("a", "ABC"))).await);
        let server_addr = server.local_addr().unwrap();
        let server_clone = server.clone();
        tokio::spawn(async move { server_clone.recv_loop().await });

        let peer = peer_socket().await;
        peer.send_to(http_frame::request_line("a").as_bytes(), server_addr).await.unwrap();
        assert_eq!(http_frame::parse_response(&recv(&peer).await).unwrap(), 3);
        assert_eq!(recv(&peer).await, packet::encode(1, b"ABC").to_vec());

        peer.send_to(http_frame::request_line("a").as_bytes(), server_addr).await.unwrap();
        // retransmissions may be interleaved with the repeated header
        timeout(Duration::from_secs(5), async {
            while !http_frame::is_response(&recv(&peer).await) {}
        }).await.unwrap();
        assert_eq!(server.num_active_sessions(), 1);
    }

    #[tokio::test]
    async fn test_missing_document() {
        let mut documents = MockDocumentSource::new();
        documents.expect_load()
            .withf(|name| name == "missing.txt")
            .returning(|_| Ok(None));
        let server = Arc::new(server(Arc::new(documents)).await);
        let server_addr = server.local_addr().unwrap();
        let server_clone = server.clone();
        tokio::spawn(async move { server_clone.recv_loop().await });

        let peer = peer_socket().await;
        peer.send_to(http_frame::request_line("missing.txt").as_bytes(), server_addr).await.unwrap();
        assert_eq!(recv(&peer).await, http_frame::NOT_FOUND.as_bytes());
        assert_eq!(server.num_active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_document_source_error() {
        let mut documents = MockDocumentSource::new();
        documents.expect_load()
            .returning(|_| Err(anyhow::anyhow!("disk on fire")));
        let server = Arc::new(server(Arc::new(documents)).await);
        let server_addr = server.local_addr().unwrap();
        let server_clone = server.clone();
        tokio::spawn(async move { server_clone.recv_loop().await });

        let peer = peer_socket().await;
        peer.send_to(http_frame::request_line("a").as_bytes(), server_addr).await.unwrap();
        assert_eq!(recv(&peer).await, http_frame::INTERNAL_SERVER_ERROR.as_bytes());
    }

    #[tokio::test]
    async fn test_slow_load_does_not_block_other_peers() {
        let documents = StallingSource(InMemorySource::default().with_document("a", "ABC"));
        let server = Arc::new(server(Arc::new(documents)).await);
        let server_addr = server.local_addr().unwrap();
        let server_clone = server.clone();
        tokio::spawn(async move { server_clone.recv_loop().await });

        let slow_peer = peer_socket().await;
        slow_peer.send_to(http_frame::request_line("slow").as_bytes(), server_addr).await.unwrap();

        let peer = peer_socket().await;
        peer.send_to(http_frame::request_line("a").as_bytes(), server_addr).await.unwrap();
        assert_eq!(http_frame::parse_response(&recv(&peer).await).unwrap(), 3);
        assert_eq!(recv(&peer).await, packet::encode(1, b"ABC").to_vec());

        peer.send_to(&Feedback::Ack(2).to_bytes(), server_addr).await.unwrap();
        timeout(Duration::from_secs(5), async {
            while server.num_active_sessions() > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }).await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let server = Arc::new(server(Arc::new(InMemorySource::default())).await);
        let server_addr = server.local_addr().unwrap();
        let server_clone = server.clone();
        tokio::spawn(async move { server_clone.recv_loop().await });

        let peer = peer_socket().await;
        peer.send_to(b"HELLO", server_addr).await.unwrap();
        assert_eq!(recv(&peer).await, http_frame::BAD_REQUEST.as_bytes());

        // feedback without a session is ignored silently
        peer.send_to(&Feedback::Ack(1).to_bytes(), server_addr).await.unwrap();
        peer.send_to(b"PUT x HTTP/1.0", server_addr).await.unwrap();
        assert_eq!(recv(&peer).await, http_frame::BAD_REQUEST.as_bytes());
    }
}
