// ABOUTME: HPACK header compression (RFC 7541) with connection-lifetime table state
// ABOUTME: Decoder yields fields lazily so the caller can classify them as they appear

mod decoder;
mod encoder;
mod huffman;
mod table;

pub use decoder::{Decoder, DecoderIter};
pub use encoder::Encoder;

use thiserror::Error;

/// Initial dynamic-table size on both sides (RFC 7541 Section 4.2 via
/// SETTINGS_HEADER_TABLE_SIZE, RFC 7540 Section 6.5.2).
pub const DEFAULT_TABLE_SIZE: usize = 4096;

/// One decoded header field. Names arrive in their wire form (lowercase for
/// well-formed peers); classification and canonicalization are the caller's
/// concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> HeaderField {
        HeaderField {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Table-occupancy cost of this entry (RFC 7541 Section 4.1).
    pub(crate) fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

/// Errors raised while decoding a header block. All of them poison the
/// shared compression state, so the connection maps every one of these to a
/// connection-level COMPRESSION_ERROR.
#[derive(Debug, Error)]
pub enum HpackError {
    #[error("header block ended inside a field representation")]
    Truncated,

    #[error("integer literal overflows the decoder")]
    IntegerOverflow,

    #[error("table index {0} is out of range")]
    InvalidIndex(usize),

    #[error("invalid huffman coding in string literal")]
    InvalidHuffman,

    #[error("dynamic table size update to {requested} exceeds the protocol maximum {max}")]
    TableSizeUpdateTooLarge { requested: usize, max: usize },
}
