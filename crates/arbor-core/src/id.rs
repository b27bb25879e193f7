//! Message identifiers.
//!
//! An identifier packs a message's logical clock and a prefix of its content
//! hash into a fixed-width byte string:
//!
//! ```text
//! [ n ][ clock: n bytes, big-endian ][ hash prefix: ID_LENGTH - 1 - n bytes ]
//! ```
//!
//! `n` is the minimal number of bytes needed for the clock (1..=8). Because a
//! larger clock never needs fewer bytes, comparing identifiers as raw bytes
//! orders them by clock first and hash second, without decoding.

use crate::error::CodecError;
use crate::hash::{Hash, Hasher};
use crate::message::{Message, Signature};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Total width of an encoded identifier in bytes.
pub const ID_LENGTH: usize = 28;

/// Smallest hash prefix carried by an identifier (reached at 8-byte clocks).
pub const HASH_PREFIX_MIN: usize = ID_LENGTH - 1 - 8;

const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";
const TEXT_LENGTH: usize = (ID_LENGTH * 8 + 4) / 5;

/// Identifier of a message in the causal log.
///
/// Deserialization goes through [`MessageId::from_bytes`], so identifiers
/// read off the wire always carry a valid clock prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "[u8; ID_LENGTH]", into = "[u8; ID_LENGTH]")]
pub struct MessageId([u8; ID_LENGTH]);

impl MessageId {
    /// Encode a clock and content hash.
    pub fn new(clock: u64, hash: &Hash) -> Self {
        let width = clock_width(clock);
        let mut bytes = [0u8; ID_LENGTH];
        bytes[0] = width as u8;
        bytes[1..1 + width].copy_from_slice(&clock.to_be_bytes()[8 - width..]);
        let tail = ID_LENGTH - 1 - width;
        bytes[1 + width..].copy_from_slice(&hash.as_bytes()[..tail]);
        MessageId(bytes)
    }

    /// Derive the identifier of a (possibly signed) message.
    ///
    /// The hash covers the encoded signature followed by the encoded message.
    pub fn for_message(signature: Option<&Signature>, message: &Message) -> Result<Self, CodecError> {
        let signature_bytes = bincode::serialize(&signature)?;
        let message_bytes = message.encode()?;
        let hash = Hasher::hash_all(&[&signature_bytes, &message_bytes]);
        Ok(Self::new(message.clock, &hash))
    }

    /// Parse raw identifier bytes, checking the clock prefix.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != ID_LENGTH {
            return Err(CodecError::InvalidLength(bytes.len()));
        }
        let width = bytes[0];
        if width == 0 || width > 8 {
            return Err(CodecError::InvalidClock(width));
        }
        let mut raw = [0u8; ID_LENGTH];
        raw.copy_from_slice(bytes);
        let id = MessageId(raw);
        // Non-minimal clock encodings would break byte ordering.
        if clock_width(id.clock()) != width as usize {
            return Err(CodecError::InvalidClock(width));
        }
        Ok(id)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    pub fn clock(&self) -> u64 {
        self.decode().0
    }

    /// Split back into the clock and the truncated hash.
    pub fn decode(&self) -> (u64, &[u8]) {
        let width = self.0[0] as usize;
        let mut clock = [0u8; 8];
        clock[8 - width..].copy_from_slice(&self.0[1..1 + width]);
        (u64::from_be_bytes(clock), &self.0[1 + width..])
    }

    pub fn hash_prefix(&self) -> &[u8] {
        self.decode().1
    }

    /// Abbreviated form for log lines: clock plus six characters of hash.
    pub fn short(&self) -> String {
        let text = self.to_string();
        format!("{}:{}", self.clock(), &text[TEXT_LENGTH - 6..])
    }
}

impl TryFrom<[u8; ID_LENGTH]> for MessageId {
    type Error = CodecError;

    fn try_from(bytes: [u8; ID_LENGTH]) -> Result<Self, Self::Error> {
        MessageId::from_bytes(&bytes)
    }
}

impl From<MessageId> for [u8; ID_LENGTH] {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

fn clock_width(clock: u64) -> usize {
    let significant = 8 - (clock.leading_zeros() / 8) as usize;
    significant.max(1)
}

impl fmt::Display for MessageId {
    /// Base32hex (lowercase, unpadded); string order equals byte order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::with_capacity(TEXT_LENGTH);
        let mut buffer: u16 = 0;
        let mut bits = 0;
        for byte in self.0 {
            buffer = (buffer << 8) | byte as u16;
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                out.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
            }
        }
        if bits > 0 {
            out.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
        }
        f.write_str(&out)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.short())
    }
}

impl FromStr for MessageId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != TEXT_LENGTH {
            return Err(CodecError::InvalidLength(s.len()));
        }
        let mut bytes = Vec::with_capacity(ID_LENGTH);
        let mut buffer: u16 = 0;
        let mut bits = 0;
        for c in s.chars() {
            let value = ALPHABET
                .iter()
                .position(|&a| a as char == c)
                .ok_or(CodecError::InvalidCharacter(c))?;
            buffer = ((buffer << 5) | value as u16) & 0x1fff;
            bits += 5;
            if bits >= 8 {
                bits -= 8;
                bytes.push((buffer >> bits) as u8);
            }
        }
        // Leftover padding bits must be zero for the text form to be canonical.
        if buffer & ((1 << bits) - 1) != 0 {
            return Err(CodecError::InvalidLength(s.len()));
        }
        MessageId::from_bytes(&bytes)
    }
}
