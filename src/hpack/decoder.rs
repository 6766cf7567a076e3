// ABOUTME: HPACK decoder - parses header block fragments against connection-lifetime tables
// ABOUTME: Exposes a lazy iterator so each field can be classified as it is decoded

use super::huffman;
use super::table::{lookup, DynamicTable};
use super::{HeaderField, HpackError, DEFAULT_TABLE_SIZE};

/// Stateful HPACK decoder. One per connection; its dynamic table persists
/// across header blocks for the connection's lifetime (RFC 7541 Section 2.2).
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,

    // Ceiling for dynamic table size updates, set by our own
    // SETTINGS_HEADER_TABLE_SIZE (which this server never raises).
    protocol_max_size: usize,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder {
            table: DynamicTable::new(DEFAULT_TABLE_SIZE),
            protocol_max_size: DEFAULT_TABLE_SIZE,
        }
    }

    /// Decode one complete header block, yielding fields in wire order.
    ///
    /// The iterator borrows the decoder: table insertions happen as each
    /// field is produced, so the caller must drain it fully even when it
    /// intends to discard the fields, or the compression state desyncs.
    pub fn decode<'d, 'i>(&'d mut self, input: &'i [u8]) -> DecoderIter<'d, 'i> {
        DecoderIter {
            decoder: self,
            input,
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DecoderIter<'d, 'i> {
    decoder: &'d mut Decoder,
    input: &'i [u8],
}

impl DecoderIter<'_, '_> {
    fn decode_next(&mut self) -> Result<Option<HeaderField>, HpackError> {
        while let Some(&first) = self.input.first() {
            if first & 0x80 != 0 {
                // Indexed field (Section 6.1).
                let index = self.read_int(7)?;
                let (name, value) = lookup(index, &self.decoder.table)
                    .ok_or(HpackError::InvalidIndex(index))?;
                return Ok(Some(HeaderField::new(name, value)));
            }

            if first & 0xc0 == 0x40 {
                // Literal with incremental indexing (Section 6.2.1).
                let field = self.read_literal(6)?;
                self.decoder.table.insert(field.clone());
                return Ok(Some(field));
            }

            if first & 0xe0 == 0x20 {
                // Dynamic table size update (Section 6.3).
                let size = self.read_int(5)?;
                if size > self.decoder.protocol_max_size {
                    return Err(HpackError::TableSizeUpdateTooLarge {
                        requested: size,
                        max: self.decoder.protocol_max_size,
                    });
                }
                self.decoder.table.resize(size);
                continue;
            }

            // Literal without indexing (0000) or never indexed (0001),
            // both with a 4-bit prefix (Sections 6.2.2, 6.2.3).
            let field = self.read_literal(4)?;
            return Ok(Some(field));
        }
        Ok(None)
    }

    /// Prefix-coded integer (Section 5.1).
    fn read_int(&mut self, prefix_bits: u8) -> Result<usize, HpackError> {
        let limit = (1usize << prefix_bits) - 1;
        let (&first, rest) = self.input.split_first().ok_or(HpackError::Truncated)?;
        self.input = rest;

        let mut value = first as usize & limit;
        if value < limit {
            return Ok(value);
        }

        let mut shift = 0u32;
        loop {
            let (&byte, rest) = self.input.split_first().ok_or(HpackError::Truncated)?;
            self.input = rest;
            value = ((byte & 0x7f) as usize)
                .checked_shl(shift)
                .and_then(|v| value.checked_add(v))
                .ok_or(HpackError::IntegerOverflow)?;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > usize::BITS {
                return Err(HpackError::IntegerOverflow);
            }
        }
    }

    fn read_literal(&mut self, prefix_bits: u8) -> Result<HeaderField, HpackError> {
        let index = self.read_int(prefix_bits)?;
        let name = if index == 0 {
            self.read_string()?
        } else {
            lookup(index, &self.decoder.table)
                .ok_or(HpackError::InvalidIndex(index))?
                .0
                .to_vec()
        };
        let value = self.read_string()?;
        Ok(HeaderField { name, value })
    }

    /// String literal with optional Huffman coding (Section 5.2).
    fn read_string(&mut self) -> Result<Vec<u8>, HpackError> {
        let huffman_coded = self.input.first().ok_or(HpackError::Truncated)? & 0x80 != 0;
        let len = self.read_int(7)?;
        if len > self.input.len() {
            return Err(HpackError::Truncated);
        }
        let (raw, rest) = self.input.split_at(len);
        self.input = rest;
        if huffman_coded {
            huffman::decode(raw)
        } else {
            Ok(raw.to_vec())
        }
    }
}

impl Iterator for DecoderIter<'_, '_> {
    type Item = Result<HeaderField, HpackError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next().transpose()
    }
}
