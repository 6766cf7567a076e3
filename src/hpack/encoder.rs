// ABOUTME: HPACK encoder - emits header blocks against the connection's encoding table
// ABOUTME: Uses table references where possible and Huffman-codes strings when shorter

use super::huffman;
use super::table::{find, DynamicTable};
use super::{HeaderField, DEFAULT_TABLE_SIZE};

/// Stateful HPACK encoder; one per connection, mirroring the table the peer's
/// decoder maintains from our output.
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,

    // A SETTINGS_HEADER_TABLE_SIZE from the peer takes effect at the start
    // of the next header block (RFC 7541 Section 4.2).
    pending_resize: Option<usize>,
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder {
            table: DynamicTable::new(DEFAULT_TABLE_SIZE),
            pending_resize: None,
        }
    }

    /// Record a new table ceiling from the peer's SETTINGS. The size update
    /// itself is emitted at the front of the next encoded block.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.pending_resize = Some(max_size);
    }

    /// Append one field to the block being accumulated in `out`.
    pub fn encode_field(&mut self, name: &[u8], value: &[u8], out: &mut Vec<u8>) {
        if let Some(size) = self.pending_resize.take() {
            encode_int(size, 5, 0x20, out);
            self.table.resize(size);
        }

        match find(name, value, &self.table) {
            Some((index, true)) => {
                // Indexed field (Section 6.1).
                encode_int(index, 7, 0x80, out);
            }
            Some((index, false)) => {
                // Known name, literal value, incremental indexing (6.2.1).
                encode_int(index, 6, 0x40, out);
                encode_string(value, out);
                self.table.insert(HeaderField::new(name, value));
            }
            None => {
                encode_int(0, 6, 0x40, out);
                encode_string(name, out);
                encode_string(value, out);
                self.table.insert(HeaderField::new(name, value));
            }
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix-coded integer (Section 5.1). `first_byte` carries the pattern
/// bits above the prefix.
fn encode_int(mut value: usize, prefix_bits: u8, first_byte: u8, out: &mut Vec<u8>) {
    let limit = (1usize << prefix_bits) - 1;
    if value < limit {
        out.push(first_byte | value as u8);
        return;
    }
    out.push(first_byte | limit as u8);
    value -= limit;
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// String literal (Section 5.2), Huffman-coded when that is shorter.
fn encode_string(data: &[u8], out: &mut Vec<u8>) {
    let coded_len = huffman::encoded_len(data);
    if coded_len < data.len() {
        encode_int(coded_len, 7, 0x80, out);
        huffman::encode(data, out);
    } else {
        encode_int(data.len(), 7, 0x00, out);
        out.extend_from_slice(data);
    }
}
