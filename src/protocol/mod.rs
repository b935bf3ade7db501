use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use std::net::Ipv4Addr;

/// Directional TCP connection identifier.
///
/// Unlike a normalized bidirectional key, both orientations of a connection
/// are distinct values; the analyzer registers both (and, once the handshake
/// reveals the server endpoints, possibly two more) as aliases of one session.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct ConnectionKey {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl ConnectionKey {
    pub fn new(src_ip: Ipv4Addr, src_port: u16, dst_ip: Ipv4Addr, dst_port: u16) -> Self {
        ConnectionKey {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
        }
    }

    /// The same connection seen from the peer's side.
    pub fn reverse(&self) -> ConnectionKey {
        ConnectionKey {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}

/// One TCP segment as seen on the wire. The payload borrows from the captured
/// frame; segments are consumed before the next frame arrives.
#[derive(Debug)]
pub struct TcpSegment<'a> {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub payload: &'a [u8],
}

impl TcpSegment<'_> {
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(self.src_ip, self.src_port, self.dst_ip, self.dst_port)
    }

    /// Sequence number of the byte just past this segment's payload.
    pub fn seq_end(&self) -> u32 {
        self.seq.wrapping_add(self.payload.len() as u32)
    }
}

/// Parse a raw Ethernet II frame into a TCP segment.
///
/// Anything that is not Ethernet II + IPv4 + TCP (or is truncated at any
/// layer) yields `None` and is dropped by the caller without a record.
pub fn parse_segment(data: &[u8]) -> Option<TcpSegment<'_>> {
    let sliced = SlicedPacket::from_ethernet(data).ok()?;

    let (src_ip, dst_ip) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => (
            ipv4.header().source_addr(),
            ipv4.header().destination_addr(),
        ),
        _ => return None,
    };

    let tcp = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => tcp,
        _ => return None,
    };

    Some(TcpSegment {
        src_ip,
        dst_ip,
        src_port: tcp.source_port(),
        dst_port: tcp.destination_port(),
        seq: tcp.sequence_number(),
        syn: tcp.syn(),
        ack: tcp.ack(),
        fin: tcp.fin(),
        rst: tcp.rst(),
        payload: tcp.payload(),
    })
}
