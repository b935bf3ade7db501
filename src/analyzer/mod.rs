pub mod handshake;
mod session;

use std::collections::HashMap;

use crate::protocol::{self, ConnectionKey, TcpSegment};
use crate::stream::DecryptedPacket;

pub use session::{LOGIN_PORT, SessionInfo};
use session::Session;

/// The flow demultiplexer: owns every tracked session and routes each TCP
/// segment to the right one.
///
/// A session is reachable through up to four keys (forward/reverse of the
/// creating segment, forward/reverse of the handshake-learned server
/// endpoints); the alias table maps keys to session ids so removal through
/// any alias prunes them all. Processing is strictly synchronous: the
/// capture thread owns the analyzer, and emitted records are plain values
/// that may be handed to any other thread.
pub struct Analyzer {
    aliases: HashMap<ConnectionKey, u32>,
    sessions: HashMap<u32, Session>,
    next_session_id: u32,
}

impl Analyzer {
    pub fn new() -> Self {
        Analyzer {
            aliases: HashMap::new(),
            sessions: HashMap::new(),
            next_session_id: 1,
        }
    }

    /// Ingress for one raw Ethernet frame. Non-TCP and malformed frames are
    /// dropped silently.
    pub fn on_frame(&mut self, data: &[u8], timestamp: f64) -> Vec<DecryptedPacket> {
        match protocol::parse_segment(data) {
            Some(seg) => self.process_segment(&seg, timestamp),
            None => Vec::new(),
        }
    }

    /// Route one parsed segment through the session lifecycle.
    pub fn process_segment(&mut self, seg: &TcpSegment, timestamp: f64) -> Vec<DecryptedPacket> {
        let key = seg.key();
        let existing = self.lookup(&key);

        // A fresh SYN always begins a new session; a leftover session on the
        // same tuple missed its FIN/RST and is discarded.
        if seg.syn && !seg.ack {
            if let Some(id) = existing {
                self.remove_session(id);
            }
            let id = self.alloc_session_id();
            self.aliases.insert(key, id);
            self.aliases.insert(key.reverse(), id);
            self.sessions.insert(id, Session::new(id, seg, true));
            return Vec::new();
        }

        if seg.syn && seg.ack {
            if let Some(id) = existing {
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.on_syn_ack(seg);
                }
            }
            return Vec::new();
        }

        if seg.fin || seg.rst {
            if let Some(id) = existing {
                self.remove_session(id);
            }
            return Vec::new();
        }

        if seg.payload.is_empty() {
            return Vec::new();
        }

        // Mid-stream join: a payload segment with no session starts one; the
        // handshake will reveal which endpoint is the server.
        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.alloc_session_id();
                self.aliases.insert(key, id);
                self.aliases.insert(key.reverse(), id);
                self.sessions.insert(id, Session::new(id, seg, false));
                id
            }
        };

        let was_active = self
            .sessions
            .get(&id)
            .map(|s| s.is_active())
            .unwrap_or(false);
        let records = match self.sessions.get_mut(&id) {
            Some(session) => session.process_segment(seg, timestamp),
            None => return Vec::new(),
        };

        if let Some(session) = self.sessions.get(&id) {
            if !was_active && session.is_active() {
                if let Some((forward, reverse)) = session.server_keys() {
                    self.aliases.insert(forward, id);
                    self.aliases.insert(reverse, id);
                }
            }
            if session.is_terminated() {
                self.remove_session(id);
            }
        }

        records
    }

    /// Metadata of every session that has completed its handshake.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> =
            self.sessions.values().filter_map(|s| s.info()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    fn lookup(&self, key: &ConnectionKey) -> Option<u32> {
        self.aliases
            .get(key)
            .or_else(|| self.aliases.get(&key.reverse()))
            .copied()
    }

    fn alloc_session_id(&mut self) -> u32 {
        let id = self.next_session_id;
        self.next_session_id = self.next_session_id.wrapping_add(1);
        id
    }

    /// Drop a session and every alias that points at it.
    fn remove_session(&mut self, id: u32) {
        self.aliases.retain(|_, v| *v != id);
        self.sessions.remove(&id);
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Analyzer::new()
    }
}
