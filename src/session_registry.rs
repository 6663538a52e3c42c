use crate::feedback::Feedback;
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// The server's handle on a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub feedback: mpsc::Sender<Feedback>,
    pub content_length: usize,
}

/// Keeps track of the sessions that are currently running, one per peer address. The receive
///  loop is the only place that creates sessions, and each session removes itself when it ends.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<FxHashMap<SocketAddr, SessionHandle>>,
}

impl SessionRegistry {
    pub fn get(&self, peer: &SocketAddr) -> Option<SessionHandle> {
        self.sessions.lock().unwrap()
            .get(peer)
            .cloned()
    }

    /// Registers a new session, returning `false` and leaving the registry unchanged if there is
    ///  a session for the peer already
    pub fn register(&self, peer: SocketAddr, handle: SessionHandle) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(&peer) {
            return false;
        }
        debug!("registering session {} for {:?}", handle.session_id, peer);
        sessions.insert(peer, handle);
        true
    }

    /// Removes a session's registration. A registration is only removed by the session that
    ///  created it, so a finished session can never remove a successor for the same peer.
    pub fn remove(&self, peer: &SocketAddr, session_id: Uuid) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get(peer) {
            Some(handle) if handle.session_id == session_id => {
                sessions.remove(peer);
                debug!("removed session {} for {:?}", session_id, peer);
                true
            }
            _ => {
                trace!("session {} for {:?} is not registered", session_id, peer);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (SessionHandle, mpsc::Receiver<Feedback>) {
        let (tx, rx) = mpsc::channel(1);
        (SessionHandle { session_id: Uuid::new_v4(), feedback: tx, content_length: 10 }, rx)
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = SessionRegistry::default();
        assert!(registry.is_empty());

        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();
        assert!(registry.register(peer(1), h1.clone()));
        assert!(registry.register(peer(2), h2.clone()));
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.get(&peer(1)).unwrap().session_id, h1.session_id);
        assert_eq!(registry.get(&peer(2)).unwrap().session_id, h2.session_id);
        assert!(registry.get(&peer(3)).is_none());
    }

    #[test]
    fn test_one_session_per_peer() {
        let registry = SessionRegistry::default();
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();

        assert!(registry.register(peer(1), h1.clone()));
        assert!(!registry.register(peer(1), h2));
        assert_eq!(registry.get(&peer(1)).unwrap().session_id, h1.session_id);
    }

    #[test]
    fn test_remove_only_own_registration() {
        let registry = SessionRegistry::default();
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();

        assert!(registry.register(peer(1), h1.clone()));
        assert!(!registry.remove(&peer(1), h2.session_id));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&peer(1), h1.session_id));
        assert!(registry.is_empty());
        assert!(!registry.remove(&peer(1), h1.session_id));

        assert!(registry.register(peer(1), h2));
    }
}
