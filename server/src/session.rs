//! Connected-client sessions
//!
//! Maps each client name to the session record that owns the outbound half
//! of the client's stream and the abort handle of its reader task. The
//! inbound half lives inside the reader task, wrapped in the framing codec,
//! so the event loop never blocks on a single client's reads.

use std::collections::HashMap;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;

/// One connected client
#[derive(Debug)]
pub struct ClientSession {
    /// Monotonic id distinguishing this session from any later session that
    /// reuses the same name.
    pub id: u64,
    /// Outbound half of the client's stream. Dropping it closes the stream.
    pub writer: OwnedWriteHalf,
    /// Reader task feeding the event loop; aborted when the session ends.
    pub reader: JoinHandle<()>,
}

/// All live sessions, by client name
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<String, ClientSession>,
}

impl SessionManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session under its client name. The name has already
    /// been reserved in the registry.
    pub fn insert(&mut self, name: String, session: ClientSession) {
        self.sessions.insert(name, session);
    }

    /// Detaches and returns the session so the caller can ack and close
    /// it. Returns `None` when the name is not connected.
    pub fn remove(&mut self, name: &str) -> Option<ClientSession> {
        self.sessions.remove(name)
    }

    /// True when `id` identifies the live session registered under `name`.
    ///
    /// Guards against events queued by a session that was torn down while a
    /// new client reused the name.
    pub fn is_current(&self, name: &str, id: u64) -> bool {
        self.sessions
            .get(name)
            .map(|session| session.id == id)
            .unwrap_or(false)
    }

    /// The outbound stream half of a connected client, for replies and
    /// relayed messages.
    pub fn writer_mut(&mut self, name: &str) -> Option<&mut OwnedWriteHalf> {
        self.sessions.get_mut(name).map(|session| &mut session.writer)
    }

    /// All connected names in lexicographic (byte) order.
    pub fn names_sorted(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of currently connected clients.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no clients are currently connected.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Removes and returns every session, for shutdown fan-out.
    pub fn drain(&mut self) -> Vec<(String, ClientSession)> {
        self.sessions.drain().collect()
    }
}
