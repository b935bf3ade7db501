mod keys;
pub mod opcodes;

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};

/// Longest keystream ever needed: the wire chunks payloads at 1460 bytes, so
/// 92 blocks (1472 bytes) cover any single XOR run.
pub const MAX_KEYSTREAM_BLOCKS: usize = 92;

/// Short-header length sentinel: this value in the length field announces an
/// 8-byte extended header.
const EXTENDED_HEADER_SENTINEL: u16 = 0xFF00;

/// Per-direction cipher state: the AES-256 key (fixed per session), the
/// 4-byte rolling IV, and the header version the peer encodes against.
pub struct AesEngine {
    version: u16,
    iv: [u8; 4],
    cipher: Aes256,
}

impl AesEngine {
    /// `version` is the value headers are validated against. Inbound streams
    /// pass `0xFFFF - build`; key derivation recovers the build from the
    /// complement so both directions land on the same key.
    pub fn new(version: u16, locale: u8, iv: [u8; 4]) -> Self {
        let key = derive_key(version, locale);
        AesEngine {
            version,
            iv,
            cipher: Aes256::new(&GenericArray::from(key)),
        }
    }

    pub fn iv(&self) -> [u8; 4] {
        self.iv
    }

    /// Validate a frame header against the current IV.
    pub fn confirm_header(&self, buf: &[u8]) -> bool {
        buf.len() >= 2
            && (buf[0] ^ self.iv[2]) == (self.version & 0xFF) as u8
            && (buf[1] ^ self.iv[3]) == (self.version >> 8) as u8
    }

    /// Header length encoded in the first 4 bytes: 4, or 8 when the XORed
    /// length field carries the extended sentinel.
    pub fn header_length(buf: &[u8], old_header: bool) -> usize {
        if old_header {
            return 4;
        }
        let iv_word = u16::from_le_bytes([buf[0], buf[1]]);
        let xorred = u16::from_le_bytes([buf[2], buf[3]]);
        if xorred ^ iv_word == EXTENDED_HEADER_SENTINEL {
            8
        } else {
            4
        }
    }

    /// Payload length for a frame whose full header is in `buf`.
    pub fn payload_length(buf: &[u8], old_header: bool) -> usize {
        if old_header {
            return u16::from_le_bytes([buf[2], buf[3]]) as usize;
        }
        let iv_word = u16::from_le_bytes([buf[0], buf[1]]);
        let xorred = u16::from_le_bytes([buf[2], buf[3]]);
        let length = xorred ^ iv_word;
        if length == EXTENDED_HEADER_SENTINEL {
            let big = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
            ((big ^ iv_word as u32) & 0x7FFF_FFFF) as usize
        } else {
            length as usize
        }
    }

    /// XOR the payload with the AES-ECB chained keystream seeded from the
    /// current IV. Symmetric: applying it twice restores the input.
    ///
    /// The XOR runs restart the keystream every 1460 wire bytes (1456 for the
    /// first run, 1452 when the total payload needs an extended header),
    /// mirroring the sender's per-segment encryption.
    pub fn transform(&self, data: &mut [u8]) {
        if data.is_empty() {
            return;
        }

        let mut table = [0u8; MAX_KEYSTREAM_BLOCKS * 16];
        let mut block = [0u8; 16];
        for (i, b) in block.iter_mut().enumerate() {
            *b = self.iv[i % 4];
        }

        let blocks = (data.len() / 16 + 1).min(MAX_KEYSTREAM_BLOCKS);
        for i in 0..blocks {
            self.cipher
                .encrypt_block(GenericArray::from_mut_slice(&mut block));
            table[i * 16..(i + 1) * 16].copy_from_slice(&block);
        }

        let first_run = if data.len() >= 0xFF00 { 1452 } else { 1456 };
        let mut run = first_run.min(data.len());
        let mut pos = 0;
        while pos < data.len() {
            for i in 0..run {
                data[pos + i] ^= table[i];
            }
            pos += run;
            run = (data.len() - pos).min(1460);
        }
    }

    /// The alternate game-server inbound transform: subtract the first IV
    /// byte from every payload byte.
    pub fn byte_shift(&self, data: &mut [u8]) {
        let iv0 = self.iv[0];
        for b in data.iter_mut() {
            *b = b.wrapping_sub(iv0);
        }
    }

    /// Evolve the IV after a frame: morph a fresh seed once per current IV
    /// byte through the shuffle table, rotating the result left by 3 bits
    /// each round.
    pub fn shift_iv(&mut self) {
        let old = self.iv;
        let mut new = [0xF2, 0x53, 0x50, 0xC6];
        for v in old {
            morph(v, &mut new);
        }
        self.iv = new;
    }
}

fn morph(value: u8, iv: &mut [u8; 4]) {
    let t = keys::SHUFFLE[value as usize];
    iv[0] = iv[0].wrapping_add(keys::SHUFFLE[iv[1] as usize].wrapping_sub(value));
    iv[1] = iv[1].wrapping_sub(iv[2] ^ t);
    iv[2] ^= keys::SHUFFLE[iv[3] as usize].wrapping_add(value);
    iv[3] = iv[3].wrapping_sub(iv[0].wrapping_sub(t));

    let rotated = u32::from_le_bytes(*iv).rotate_left(3);
    *iv = rotated.to_le_bytes();
}

/// Derive the session's AES-256 key from the header version and locale.
/// This is the one place the inbound `0xFFFF - build` complement is undone.
fn derive_key(version: u16, locale: u8) -> [u8; 32] {
    let build = if (version as i16) < 0 {
        0xFFFF - version
    } else {
        version
    };

    if locale != 6 {
        return keys::DEFAULT_KEY;
    }

    let row = keys::VERSION_KEYS[(build % 20) as usize];
    let mut parsed = [0u8; 32];
    for (i, b) in parsed.iter_mut().enumerate() {
        *b = u8::from_str_radix(&row[i * 2..i * 2 + 2], 16).unwrap_or(0);
    }

    // Every fourth parsed byte lands at the same offset of the key; the rest
    // of the key stays zero.
    let mut key = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        key[i] = parsed[i];
        i += 4;
    }
    key
}
