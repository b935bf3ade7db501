use std::net::Ipv4Addr;

use crate::analyzer::handshake::{self, Handshake, HandshakeParse};
use crate::crypto::opcodes::{OpcodeMap, REMAP_TRIGGER_OPCODE};
use crate::protocol::{ConnectionKey, TcpSegment};
use crate::reassembly::Reasm;
use crate::stream::{DecryptedPacket, MapleStream};

/// The Maple login server listens here; everything else is a game server.
pub const LOGIN_PORT: u16 = 8484;

/// Caps on the only structures an uncooperative peer can grow without bound.
const MAX_PENDING_BYTES: usize = 2 * 1024 * 1024;
const MAX_STAGED_BYTES: usize = 2 * 1024 * 1024;
const MAX_STAGED_SEGMENTS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    PreHandshake,
    Active,
    Terminated,
}

/// Summary of an activated session, for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: u32,
    pub version: u16,
    pub sub_version: String,
    pub locale: u8,
    pub server_ip: Ipv4Addr,
    pub server_port: u16,
    pub client_port: u16,
}

/// The two endpoints of a connection, in first-seen order. Which one is the
/// server is only known once the handshake parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

/// One logical Maple connection.
///
/// Before the handshake, raw segment payloads accumulate per direction (the
/// handshake fits one segment and reassembly's hold-back would only delay
/// it). The handshake names the server side, seeds both cipher streams, and
/// pins the reassemblers to the observed sequence ends; from then on every
/// segment flows reassembly -> framer -> records.
pub struct Session {
    id: u32,
    state: SessionState,
    side_a: (Ipv4Addr, u16),
    side_b: (Ipv4Addr, u16),
    /// Set when the session began with a SYN: side A is the client.
    from_syn: bool,

    server_ip: Ipv4Addr,
    server_port: u16,
    client_ip: Ipv4Addr,
    client_port: u16,
    version: u16,
    sub_version: String,
    locale: u8,

    pending_a: Vec<u8>,
    pending_b: Vec<u8>,
    last_seq_end_a: Option<u32>,
    last_seq_end_b: Option<u32>,

    /// Reassembler for segments *sent by* side A / side B.
    reasm_a: Reasm,
    reasm_b: Reasm,

    outbound: Option<MapleStream>,
    inbound: Option<MapleStream>,
    dead_notified: bool,
}

impl Session {
    /// `from_syn` marks a session created by a SYN segment; its source is
    /// then known to be the client and its sequence number seeds the client
    /// reassembler.
    pub fn new(id: u32, seg: &TcpSegment, from_syn: bool) -> Self {
        let mut session = Session {
            id,
            state: SessionState::PreHandshake,
            side_a: (seg.src_ip, seg.src_port),
            side_b: (seg.dst_ip, seg.dst_port),
            from_syn,
            server_ip: Ipv4Addr::UNSPECIFIED,
            server_port: 0,
            client_ip: Ipv4Addr::UNSPECIFIED,
            client_port: 0,
            version: 0,
            sub_version: String::new(),
            locale: 0,
            pending_a: Vec::new(),
            pending_b: Vec::new(),
            last_seq_end_a: None,
            last_seq_end_b: None,
            reasm_a: Reasm::new(),
            reasm_b: Reasm::new(),
            outbound: None,
            inbound: None,
            dead_notified: false,
        };
        if from_syn {
            session.reasm_a.init(seg.seq.wrapping_add(1));
        }
        session
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// Handshake-derived metadata, available once active.
    pub fn info(&self) -> Option<SessionInfo> {
        if !self.is_active() {
            return None;
        }
        Some(SessionInfo {
            id: self.id,
            version: self.version,
            sub_version: self.sub_version.clone(),
            locale: self.locale,
            server_ip: self.server_ip,
            server_port: self.server_port,
            client_port: self.client_port,
        })
    }

    /// Server-oriented aliases for the dispatcher, available once active.
    pub fn server_keys(&self) -> Option<(ConnectionKey, ConnectionKey)> {
        if !self.is_active() {
            return None;
        }
        let key = ConnectionKey::new(
            self.server_ip,
            self.server_port,
            self.client_ip,
            self.client_port,
        );
        Some((key, key.reverse()))
    }

    /// A SYN-ACK pins the sender's initial sequence number.
    pub fn on_syn_ack(&mut self, seg: &TcpSegment) {
        let reasm = if (seg.src_ip, seg.src_port) == self.side_a {
            &mut self.reasm_a
        } else {
            &mut self.reasm_b
        };
        reasm.init(seg.seq.wrapping_add(1));
    }

    /// Route one payload-bearing segment. Records come back stamped with the
    /// session id and server port.
    pub fn process_segment(&mut self, seg: &TcpSegment, timestamp: f64) -> Vec<DecryptedPacket> {
        let mut records = match self.state {
            SessionState::Terminated => Vec::new(),
            SessionState::PreHandshake => self.process_pre_handshake(seg, timestamp),
            SessionState::Active => self.process_active(seg, timestamp),
        };
        for record in &mut records {
            record.session_id = self.id;
            record.server_port = self.server_port;
        }
        records
    }

    fn side_of(&self, seg: &TcpSegment) -> Side {
        if (seg.src_ip, seg.src_port) == self.side_a {
            Side::A
        } else {
            Side::B
        }
    }

    fn pending(&self, side: Side) -> &Vec<u8> {
        match side {
            Side::A => &self.pending_a,
            Side::B => &self.pending_b,
        }
    }

    fn process_pre_handshake(&mut self, seg: &TcpSegment, timestamp: f64) -> Vec<DecryptedPacket> {
        let from = self.side_of(seg);
        {
            let (pending, last_end) = match from {
                Side::A => (&mut self.pending_a, &mut self.last_seq_end_a),
                Side::B => (&mut self.pending_b, &mut self.last_seq_end_b),
            };
            if pending.len() + seg.payload.len() > MAX_PENDING_BYTES {
                self.state = SessionState::Terminated;
                return Vec::new();
            }
            pending.extend_from_slice(seg.payload);
            *last_end = Some(seg.seq_end());
        }

        // The handshake travels server -> client. With a SYN observed the
        // server side is known; otherwise whichever side parses first wins.
        let candidates: &[Side] = if self.from_syn {
            &[Side::B]
        } else {
            match from {
                Side::A => &[Side::A, Side::B],
                Side::B => &[Side::B, Side::A],
            }
        };

        for &side in candidates {
            if self.pending(side).is_empty() {
                continue;
            }
            match handshake::parse(self.pending(side)) {
                HandshakeParse::Parsed(h) => return self.activate(side, h, timestamp),
                HandshakeParse::Malformed => {
                    self.state = SessionState::Terminated;
                    return Vec::new();
                }
                HandshakeParse::NotYet => {}
            }
        }
        Vec::new()
    }

    /// The handshake parsed on `server_side`: derive the cipher state, build
    /// both framers, re-align the reassemblers, and replay any bytes that
    /// arrived beyond (or opposite) the handshake.
    fn activate(
        &mut self,
        server_side: Side,
        h: Handshake,
        timestamp: f64,
    ) -> Vec<DecryptedPacket> {
        let (server, client) = match server_side {
            Side::A => (self.side_a, self.side_b),
            Side::B => (self.side_b, self.side_a),
        };
        self.server_ip = server.0;
        self.server_port = server.1;
        self.client_ip = client.0;
        self.client_port = client.1;
        self.version = h.version;
        self.sub_version = h.patch.clone();
        self.locale = h.locale;

        let is_login_server = self.server_port == LOGIN_PORT;
        let extra_cipher = h.locale == 6 && !h.patch.contains(':') && !is_login_server;

        self.outbound = Some(MapleStream::new(
            true,
            h.version,
            h.locale,
            h.send_iv,
            extra_cipher,
        ));
        self.inbound = Some(MapleStream::new(
            false,
            h.version,
            h.locale,
            h.recv_iv,
            extra_cipher,
        ));

        // Align reassembly with the end of the raw pre-handshake traffic.
        let (server_end, client_end) = match server_side {
            Side::A => (self.last_seq_end_a, self.last_seq_end_b),
            Side::B => (self.last_seq_end_b, self.last_seq_end_a),
        };
        {
            let (server_reasm, client_reasm) = match server_side {
                Side::A => (&mut self.reasm_a, &mut self.reasm_b),
                Side::B => (&mut self.reasm_b, &mut self.reasm_a),
            };
            if let Some(end) = server_end {
                server_reasm.init(end);
            }
            if let Some(end) = client_end {
                client_reasm.init(end);
            }
        }

        self.state = SessionState::Active;

        let (pending_server, pending_client) = match server_side {
            Side::A => (
                std::mem::take(&mut self.pending_a),
                std::mem::take(&mut self.pending_b),
            ),
            Side::B => (
                std::mem::take(&mut self.pending_b),
                std::mem::take(&mut self.pending_a),
            ),
        };

        let mut records = vec![DecryptedPacket::handshake(
            timestamp,
            h.version,
            h.patch.clone(),
            h.locale,
            &pending_server[2..h.consumed],
        )];

        // Bytes past the handshake and any early client bytes flow straight
        // into the fresh streams.
        records.extend(self.feed_stream(false, &pending_server[h.consumed..], timestamp));
        records.extend(self.feed_stream(true, &pending_client, timestamp));
        records
    }

    fn process_active(&mut self, seg: &TcpSegment, timestamp: f64) -> Vec<DecryptedPacket> {
        let from_server = (seg.src_ip, seg.src_port) == (self.server_ip, self.server_port);
        let reasm = match self.side_of(seg) {
            Side::A => &mut self.reasm_a,
            Side::B => &mut self.reasm_b,
        };
        reasm.add_segment(seg.seq, seg.payload);
        if reasm.staged_bytes() > MAX_STAGED_BYTES || reasm.staged_segments() > MAX_STAGED_SEGMENTS
        {
            self.state = SessionState::Terminated;
            return Vec::new();
        }

        let bytes = reasm.drain(true);
        if bytes.is_empty() {
            return Vec::new();
        }
        self.feed_stream(!from_server, &bytes, timestamp)
    }

    /// Push reassembled bytes through one direction's framer and collect
    /// every complete frame, handling the remap announcement and the
    /// one-shot dead notice.
    fn feed_stream(&mut self, outbound: bool, data: &[u8], timestamp: f64) -> Vec<DecryptedPacket> {
        let mut records = Vec::new();
        let stream = match if outbound {
            self.outbound.as_mut()
        } else {
            self.inbound.as_mut()
        } {
            Some(s) => s,
            None => return records,
        };

        stream.append(data);
        while let Some(record) = stream.try_read(timestamp) {
            records.push(record);
        }
        let stream_dead = stream.is_dead();

        if !outbound {
            // The server announces the outbound opcode translation table.
            let mut announced = None;
            for record in &records {
                if record.opcode == REMAP_TRIGGER_OPCODE {
                    if let Some(map) = OpcodeMap::parse(&record.payload) {
                        announced = Some(map);
                    }
                }
            }
            if let Some(map) = announced {
                if let Some(out_stream) = self.outbound.as_mut() {
                    out_stream.set_opcode_map(map);
                }
            }
        }

        if stream_dead && !self.dead_notified {
            self.dead_notified = true;
            records.push(DecryptedPacket::dead(timestamp, outbound));
        }
        records
    }
}
