use std::collections::BTreeMap;

/// Per-direction TCP reassembly buffer.
///
/// Segments are staged by sequence number and drained as a contiguous byte
/// stream. A retransmit at a staged sequence number only wins if it is
/// longer; the server habitually re-sends the same seq with a longer payload
/// that must replace the shorter copy before delivery. All ordering
/// comparisons go through signed 32-bit differences so sequence numbers that
/// straddle the 2^32 boundary reassemble like any others.
pub struct Reasm {
    next_seq: u32,
    initialized: bool,
    staged: BTreeMap<u32, Vec<u8>>,
}

/// Signed distance from `b` to `a` in sequence space.
fn seq_delta(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

impl Reasm {
    pub fn new() -> Self {
        Reasm {
            next_seq: 0,
            initialized: false,
            staged: BTreeMap::new(),
        }
    }

    /// Pin the next expected sequence number (from SYN/SYN-ACK or from the
    /// end of the last pre-handshake segment).
    pub fn init(&mut self, seq: u32) {
        self.next_seq = seq;
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Stage a segment. An existing segment at the same seq is replaced only
    /// by a longer one.
    pub fn add_segment(&mut self, seq: u32, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if !self.initialized {
            self.init(seq);
        }
        match self.staged.get(&seq) {
            Some(existing) if existing.len() >= data.len() => {}
            _ => {
                self.staged.insert(seq, data.to_vec());
            }
        }
    }

    /// Total bytes currently staged, for resource capping.
    pub fn staged_bytes(&self) -> usize {
        self.staged.values().map(|v| v.len()).sum()
    }

    pub fn staged_segments(&self) -> usize {
        self.staged.len()
    }

    /// Drain the contiguous prefix starting at the next expected sequence
    /// number. With `hold_last`, a lone staged segment is kept pending so a
    /// longer retransmit can still replace it; once a successor has been
    /// staged the whole deliverable prefix drains.
    pub fn drain(&mut self, hold_last: bool) -> Vec<u8> {
        let mut out = Vec::new();

        self.drop_stale();
        if hold_last && self.staged.len() <= 1 {
            return out;
        }

        loop {
            self.drop_stale();
            let seq = match self
                .staged
                .keys()
                .copied()
                .find(|&s| seq_delta(s, self.next_seq) <= 0)
            {
                Some(s) => s,
                None => break,
            };
            let data = match self.staged.remove(&seq) {
                Some(d) => d,
                None => break,
            };
            // Skip the overlap already delivered; drop_stale guarantees the
            // segment extends past next_seq.
            let offset = self.next_seq.wrapping_sub(seq) as usize;
            out.extend_from_slice(&data[offset..]);
            self.next_seq = seq.wrapping_add(data.len() as u32);
        }

        out
    }

    /// Discard segments that end at or before the next expected seq.
    fn drop_stale(&mut self) {
        let next_seq = self.next_seq;
        self.staged
            .retain(|&seq, data| seq_delta(seq.wrapping_add(data.len() as u32), next_seq) > 0);
    }
}

impl Default for Reasm {
    fn default() -> Self {
        Reasm::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(start: u8, len: usize) -> Vec<u8> {
        (0..len).map(|i| start.wrapping_add(i as u8)).collect()
    }

    #[test]
    fn in_order_delivery() {
        let mut r = Reasm::new();
        r.init(1000);
        r.add_segment(1000, b"hello");
        r.add_segment(1005, b"world");
        assert_eq!(r.drain(false), b"helloworld");
        assert_eq!(r.drain(false), b"");
    }

    #[test]
    fn out_of_order_delivery() {
        let mut r = Reasm::new();
        r.init(1000);
        r.add_segment(1005, b"world");
        assert_eq!(r.drain(false), b"");
        r.add_segment(1000, b"hello");
        assert_eq!(r.drain(false), b"helloworld");
    }

    #[test]
    fn arbitrary_order_with_duplicates_yields_range_once() {
        // Cover [5000, 5060) out of order, with duplicates and a segment
        // later replaced by a longer one at the same seq.
        let mut r = Reasm::new();
        r.init(5000);
        r.add_segment(5040, &bytes(40, 20));
        r.add_segment(5000, &bytes(0, 10));
        r.add_segment(5020, &bytes(20, 10)); // will be replaced
        r.add_segment(5000, &bytes(0, 10)); // duplicate
        r.add_segment(5020, &bytes(20, 20)); // longer replacement
        r.add_segment(5010, &bytes(10, 10));

        let expected: Vec<u8> = bytes(0, 60);
        assert_eq!(r.drain(false), expected);
        assert_eq!(r.drain(false), b"");
    }

    #[test]
    fn wraparound_reassembly() {
        let start = u32::MAX - 4; // 5 bytes before wrap
        let mut r = Reasm::new();
        r.init(start);
        r.add_segment(3, b"defgh"); // after wrap
        r.add_segment(start, b"12345");
        r.add_segment(start.wrapping_add(5), b"abc"); // straddles nothing, ends at 3
        assert_eq!(r.drain(false), b"12345abcdefgh");
    }

    #[test]
    fn overlap_trimmed_from_head() {
        let mut r = Reasm::new();
        r.init(100);
        r.add_segment(100, b"hello");
        assert_eq!(r.drain(false), b"hello");
        // Re-send overlapping the delivered range, extending past it
        r.add_segment(103, b"lo wo");
        assert_eq!(r.drain(false), b" wo");
    }

    #[test]
    fn fully_delivered_retransmit_discarded() {
        let mut r = Reasm::new();
        r.init(100);
        r.add_segment(100, b"hello");
        assert_eq!(r.drain(false), b"hello");
        r.add_segment(100, b"hello");
        assert_eq!(r.drain(false), b"");
        assert_eq!(r.staged_segments(), 0);
    }

    #[test]
    fn gap_stalls_delivery() {
        let mut r = Reasm::new();
        r.init(100);
        r.add_segment(110, b"later");
        r.add_segment(120, b"even-later");
        assert_eq!(r.drain(false), b"");
        r.add_segment(100, &bytes(0, 10));
        let mut expected = bytes(0, 10);
        expected.extend_from_slice(b"later");
        assert_eq!(r.drain(false), expected[..].to_vec());
    }

    #[test]
    fn hold_last_keeps_lone_segment() {
        let mut r = Reasm::new();
        r.init(1000);
        r.add_segment(1000, b"pending");
        assert_eq!(r.drain(true), b"");
        // A flushing drain delivers it
        assert_eq!(r.drain(false), b"pending");
    }

    #[test]
    fn hold_last_releases_on_successor() {
        let mut r = Reasm::new();
        r.init(1000);
        r.add_segment(1000, b"first");
        assert_eq!(r.drain(true), b"");
        r.add_segment(1005, b"second");
        assert_eq!(r.drain(true), b"firstsecond");
    }

    #[test]
    fn hold_last_allows_replacement() {
        // seq=1000 len=10, then the same seq re-sent with len=30, then a
        // follow-up at 1030: the drain yields 35 bytes, not 15.
        let mut r = Reasm::new();
        r.init(1000);
        r.add_segment(1000, &bytes(0, 10));
        assert_eq!(r.drain(true), b"");
        r.add_segment(1000, &bytes(0, 30));
        assert_eq!(r.drain(true), b"");
        r.add_segment(1030, &bytes(30, 5));
        let drained = r.drain(true);
        assert_eq!(drained.len(), 35);
        assert_eq!(drained, bytes(0, 35));
    }

    #[test]
    fn hold_last_ignores_stale_trailing_segment() {
        let mut r = Reasm::new();
        r.init(100);
        r.add_segment(100, b"hello");
        assert_eq!(r.drain(false), b"hello");
        // Only a fully-delivered retransmit staged: nothing to hold or emit
        r.add_segment(100, b"hello");
        assert_eq!(r.drain(true), b"");
    }

    #[test]
    fn uninitialized_first_segment_sets_origin() {
        let mut r = Reasm::new();
        assert!(!r.is_initialized());
        r.add_segment(7777, b"data");
        assert!(r.is_initialized());
        assert_eq!(r.drain(false), b"data");
    }

    #[test]
    fn staged_bytes_tracks_total() {
        let mut r = Reasm::new();
        r.init(0);
        r.add_segment(10, b"abc");
        r.add_segment(20, b"defg");
        assert_eq!(r.staged_bytes(), 7);
    }
}
