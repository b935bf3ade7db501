//! Parsing of the cleartext server hello that opens every Maple session.
//!
//! Wire form: `[u16 size][size bytes]`. Payloads longer than 0x10 bytes use
//! the standard layout with an embedded Pascal-style patch string; anything
//! shorter uses the compact layout whose patch value is rendered in decimal.

/// Everything a session needs from the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub version: u16,
    /// Raw patch location, kept for display.
    pub patch: String,
    /// Numeric rendering of the patch location; 1 when it is not a plain
    /// decimal.
    pub sub_version: u16,
    pub locale: u8,
    pub send_iv: [u8; 4],
    pub recv_iv: [u8; 4],
    /// Bytes of the buffer the handshake occupies, size prefix included.
    pub consumed: usize,
}

/// Outcome of a parse attempt over the accumulated inbound bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeParse {
    /// Plausible but incomplete (or failing a field check that more bytes
    /// could fix); keep buffering.
    NotYet,
    /// The size prefix cannot be a handshake; the session is a lost cause.
    Malformed,
    Parsed(Handshake),
}

/// Smallest payload either layout can occupy.
const MIN_SIZE: usize = 13;
/// Handshakes are tiny; anything bigger than this is not one.
const MAX_SIZE: usize = 512;
/// Upper bound on the embedded patch string.
const MAX_PATCH_LEN: usize = 100;

/// Locales are 1..=0x12 on the wire.
fn valid_locale(locale: u8) -> bool {
    (1..=0x12).contains(&locale)
}

fn sub_version_of(patch: &str) -> u16 {
    if !patch.is_empty() && patch.chars().all(|c| c.is_ascii_digit()) {
        patch.parse().unwrap_or(1)
    } else {
        1
    }
}

/// Try to parse a handshake at the start of `buf`.
pub fn parse(buf: &[u8]) -> HandshakeParse {
    if buf.len() < 2 {
        return HandshakeParse::NotYet;
    }
    let size = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if !(MIN_SIZE..=MAX_SIZE).contains(&size) {
        return HandshakeParse::Malformed;
    }
    if buf.len() < 2 + size {
        return HandshakeParse::NotYet;
    }

    let payload = &buf[2..2 + size];
    if size > 0x10 {
        parse_standard(payload)
    } else {
        parse_short(payload)
    }
}

/// `[u16 version][u16 strLen][strLen patch][4 localIV][4 remoteIV][u8 locale]`
fn parse_standard(payload: &[u8]) -> HandshakeParse {
    let version = u16::from_le_bytes([payload[0], payload[1]]);
    let str_len = u16::from_le_bytes([payload[2], payload[3]]) as usize;
    if str_len > MAX_PATCH_LEN {
        return HandshakeParse::NotYet;
    }
    if payload.len() < 4 + str_len + 9 {
        return HandshakeParse::NotYet;
    }

    let patch = String::from_utf8_lossy(&payload[4..4 + str_len]).into_owned();
    let rest = &payload[4 + str_len..];
    let locale = rest[8];
    if !valid_locale(locale) {
        return HandshakeParse::NotYet;
    }

    HandshakeParse::Parsed(Handshake {
        version,
        sub_version: sub_version_of(&patch),
        patch,
        locale,
        send_iv: [rest[0], rest[1], rest[2], rest[3]],
        recv_iv: [rest[4], rest[5], rest[6], rest[7]],
        consumed: 2 + payload.len(),
    })
}

/// `[u16 version][2 skipped][u16 patchVal][4 localIV][4 remoteIV][u8 locale]`
/// with the patch location derived as `patchVal + 1` in decimal.
fn parse_short(payload: &[u8]) -> HandshakeParse {
    if payload.len() < 15 {
        return HandshakeParse::NotYet;
    }

    let version = u16::from_le_bytes([payload[0], payload[1]]);
    let patch_val = u16::from_le_bytes([payload[4], payload[5]]);
    let locale = payload[14];
    if !valid_locale(locale) {
        return HandshakeParse::NotYet;
    }

    let patch = (patch_val as u32 + 1).to_string();
    HandshakeParse::Parsed(Handshake {
        version,
        sub_version: sub_version_of(&patch),
        patch,
        locale,
        send_iv: [payload[6], payload[7], payload[8], payload[9]],
        recv_iv: [payload[10], payload[11], payload[12], payload[13]],
        consumed: 2 + payload.len(),
    })
}
