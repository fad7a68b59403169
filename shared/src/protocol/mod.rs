//! Fixed-layout binary protocol shared by the lobby (TCP) and gameplay (UDP)
//! channels.
//!
//! Every message is a single opcode byte followed by its fields encoded with
//! bincode's fixed-int little-endian layout, so a message always occupies
//! exactly [`WireMessage::SIZE`] bytes. Variable-length responses are a
//! header message carrying a record count, followed by exactly that many
//! fixed-size records.

use serde::de::{self, DeserializeOwned, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Largest UDP payload either side will send or accept.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("expected opcode {expected}, found {found}")]
    UnexpectedOpcode { expected: u8, found: u8 },
    #[error("expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("header announces {announced} records, {actual} present")]
    CountMismatch { announced: usize, actual: usize },
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A message with a fixed opcode and a fixed encoded size (opcode included).
pub trait WireMessage: Serialize + DeserializeOwned {
    const OPCODE: u8;
    const SIZE: usize;
}

/// A fixed-size record that follows a [`ListHeader`].
pub trait WireRecord: Serialize + DeserializeOwned {
    const SIZE: usize;
}

/// A header message announcing how many records follow it.
pub trait ListHeader: WireMessage {
    fn record_count(&self) -> usize;
}

macro_rules! wire_message {
    ($ty:ty, $opcode:expr, $size:expr) => {
        impl $crate::protocol::WireMessage for $ty {
            const OPCODE: u8 = $opcode as u8;
            const SIZE: usize = $size;
        }
    };
}

macro_rules! wire_record {
    ($ty:ty, $size:expr) => {
        impl $crate::protocol::WireRecord for $ty {
            const SIZE: usize = $size;
        }
    };
}

pub(crate) use wire_message;
pub(crate) use wire_record;

pub mod tcp;
pub mod udp;

/// Returns the opcode byte of an encoded message without decoding it.
pub fn peek_opcode(bytes: &[u8]) -> Option<u8> {
    bytes.first().copied()
}

pub fn encode<M: WireMessage>(message: &M) -> Result<Vec<u8>, ProtocolError> {
    let mut buffer = Vec::with_capacity(M::SIZE);
    buffer.push(M::OPCODE);
    bincode::serialize_into(&mut buffer, message)?;

    if buffer.len() != M::SIZE {
        return Err(ProtocolError::SizeMismatch {
            expected: M::SIZE,
            actual: buffer.len(),
        });
    }
    Ok(buffer)
}

/// Decodes a whole message; the opcode and the exact length are both checked.
pub fn decode<M: WireMessage>(bytes: &[u8]) -> Result<M, ProtocolError> {
    let opcode = peek_opcode(bytes).ok_or(ProtocolError::Empty)?;
    if opcode != M::OPCODE {
        return Err(ProtocolError::UnexpectedOpcode {
            expected: M::OPCODE,
            found: opcode,
        });
    }
    if bytes.len() != M::SIZE {
        return Err(ProtocolError::SizeMismatch {
            expected: M::SIZE,
            actual: bytes.len(),
        });
    }
    decode_body(&bytes[1..])
}

/// Decodes the fields of a message whose opcode byte was already consumed.
pub fn decode_body<M: WireMessage>(body: &[u8]) -> Result<M, ProtocolError> {
    if body.len() != M::SIZE - 1 {
        return Err(ProtocolError::SizeMismatch {
            expected: M::SIZE - 1,
            actual: body.len(),
        });
    }
    Ok(bincode::deserialize(body)?)
}

pub fn encode_list<H: ListHeader, R: WireRecord>(
    header: &H,
    records: &[R],
) -> Result<Vec<u8>, ProtocolError> {
    if header.record_count() != records.len() {
        return Err(ProtocolError::CountMismatch {
            announced: header.record_count(),
            actual: records.len(),
        });
    }

    let mut buffer = encode(header)?;
    buffer.reserve(records.len() * R::SIZE);
    for record in records {
        bincode::serialize_into(&mut buffer, record)?;
    }
    Ok(buffer)
}

/// Reads the header first, then exactly as many records as it announces.
pub fn decode_list<H: ListHeader, R: WireRecord>(
    bytes: &[u8],
) -> Result<(H, Vec<R>), ProtocolError> {
    if bytes.len() < H::SIZE {
        return Err(ProtocolError::SizeMismatch {
            expected: H::SIZE,
            actual: bytes.len(),
        });
    }

    let header: H = decode(&bytes[..H::SIZE])?;
    let body = &bytes[H::SIZE..];
    let announced = header.record_count();
    if body.len() != announced * R::SIZE {
        return Err(ProtocolError::CountMismatch {
            announced,
            actual: body.len() / R::SIZE,
        });
    }

    let records = body
        .chunks_exact(R::SIZE)
        .map(|chunk| bincode::deserialize(chunk))
        .collect::<Result<Vec<R>, _>>()?;
    Ok((header, records))
}

/// NUL-padded text field of exactly `N` bytes on the wire.
///
/// Text longer than `N - 1` bytes is cut at a character boundary so the
/// field always ends with at least one NUL.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedString<const N: usize>([u8; N]);

impl<const N: usize> FixedString<N> {
    pub fn new(text: &str) -> Self {
        let mut end = text.len().min(N.saturating_sub(1));
        while !text.is_char_boundary(end) {
            end -= 1;
        }

        let mut bytes = [0u8; N];
        bytes[..end].copy_from_slice(&text.as_bytes()[..end]);
        Self(bytes)
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(N);
        String::from_utf8_lossy(&self.0[..end])
    }
}

impl<const N: usize> Default for FixedString<N> {
    fn default() -> Self {
        Self([0u8; N])
    }
}

impl<const N: usize> fmt::Debug for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> From<&str> for FixedString<N> {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl<const N: usize> Serialize for FixedString<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(N)?;
        for byte in &self.0 {
            tuple.serialize_element(byte)?;
        }
        tuple.end()
    }
}

impl<'de, const N: usize> Deserialize<'de> for FixedString<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FixedStringVisitor<const N: usize>;

        impl<'de, const N: usize> Visitor<'de> for FixedStringVisitor<N> {
            type Value = FixedString<N>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} bytes", N)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut bytes = [0u8; N];
                for (index, slot) in bytes.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(index, &self))?;
                }
                Ok(FixedString(bytes))
            }
        }

        deserializer.deserialize_tuple(N, FixedStringVisitor::<N>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_string_pads_and_reads_back() {
        let name: FixedString<8> = FixedString::new("Alice");
        assert_eq!(name.as_str(), "Alice");

        let bytes = bincode::serialize(&name).unwrap();
        assert_eq!(bytes, b"Alice\0\0\0");
    }

    #[test]
    fn test_fixed_string_truncates_on_char_boundary() {
        let name: FixedString<5> = FixedString::new("abcé");
        // "abcé" is 5 bytes; only 4 fit and 'é' would be split.
        assert_eq!(name.as_str(), "abc");

        let long: FixedString<4> = FixedString::new("abcdefgh");
        assert_eq!(long.as_str(), "abc");
    }

    #[test]
    fn test_fixed_string_wider_than_serde_array_limit() {
        let text: FixedString<64> = FixedString::new("hello there");
        let bytes = bincode::serialize(&text).unwrap();
        assert_eq!(bytes.len(), 64);

        let back: FixedString<64> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, text);
    }

    #[test]
    fn test_peek_opcode() {
        assert_eq!(peek_opcode(&[]), None);
        assert_eq!(peek_opcode(&[7, 1, 2]), Some(7));
    }
}
