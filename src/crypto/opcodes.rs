use des::TdesEde3;
use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockDecrypt, KeyInit};
use std::collections::HashMap;

/// Real opcodes assigned to remapped entries start here: the k-th token of
/// the table maps to `0xCC + k`.
pub const DYNAMIC_OPCODE_BASE: u16 = 0xCC;

/// Inbound opcode announcing an opcode-remap table.
pub const REMAP_TRIGGER_OPCODE: u16 = 0x46;

/// 16-character 3DES key; the 24-byte schedule is the key followed by its
/// first 8 characters again.
const REMAP_KEY: &[u8; 16] = b"BrN=r54jQp2@yP6G";

/// Translation table from on-wire (encrypted) outbound opcodes to real ones.
/// Installed on a session's outbound framer when the server announces it;
/// inbound opcodes are never translated.
pub struct OpcodeMap {
    map: HashMap<i32, u16>,
}

impl OpcodeMap {
    /// Parse a remap announcement payload: `[i32 le size][size bytes of
    /// 3DES-ECB ciphertext]` decrypting to `op1|op2|...`. Parsing stops at
    /// the first empty, non-numeric, or duplicate token and keeps whatever
    /// was built; a malformed envelope yields no map at all.
    pub fn parse(payload: &[u8]) -> Option<OpcodeMap> {
        if payload.len() < 4 {
            return None;
        }
        let buffer_size = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if buffer_size <= 0 {
            return None;
        }
        let buffer_size = buffer_size as usize;
        if payload.len() < 4 + buffer_size {
            return None;
        }

        let plaintext = decrypt_table(&payload[4..4 + buffer_size]);
        let text = String::from_utf8_lossy(&plaintext);

        let mut map = HashMap::new();
        for (index, token) in text.split('|').enumerate() {
            if token.is_empty() {
                break;
            }
            let encrypted = match parse_leading_int(token) {
                Some(v) => v,
                None => break,
            };
            if map.contains_key(&encrypted) {
                break;
            }
            map.insert(encrypted, DYNAMIC_OPCODE_BASE + index as u16);
        }

        Some(OpcodeMap { map })
    }

    /// Build a map from explicit entries (encrypted opcode, real opcode).
    pub fn from_entries(entries: impl IntoIterator<Item = (i32, u16)>) -> OpcodeMap {
        OpcodeMap {
            map: entries.into_iter().collect(),
        }
    }

    /// Translate an outbound opcode; unlisted opcodes pass through unchanged.
    pub fn translate(&self, opcode: u16) -> u16 {
        self.map.get(&(opcode as i32)).copied().unwrap_or(opcode)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// 3DES-ECB decrypt of every complete 8-byte block; a trailing partial block
/// carries no tokens and is dropped.
fn decrypt_table(data: &[u8]) -> Vec<u8> {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(REMAP_KEY);
    key[16..].copy_from_slice(&REMAP_KEY[..8]);
    let cipher = TdesEde3::new(&GenericArray::from(key));

    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks_exact(8) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.decrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    out
}

/// Parse the leading decimal run of a token, so trailing block padding in
/// the last token does not reject it.
fn parse_leading_int(token: &str) -> Option<i32> {
    let token = token.trim_start();
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let value: i64 = digits[..end].parse().ok()?;
    let value = if negative { -value } else { value };
    i32::try_from(value).ok()
}
