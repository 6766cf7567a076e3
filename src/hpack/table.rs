// ABOUTME: HPACK indexing tables - the fixed static table and the evicting dynamic table
// ABOUTME: Index space is 1-based: 1..=61 static, 62.. dynamic (RFC 7541 Section 2.3.3)

use super::HeaderField;
use std::collections::VecDeque;

/// The static table (RFC 7541 Appendix A).
#[rustfmt::skip]
pub(crate) const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// The FIFO dynamic table with size-based eviction (RFC 7541 Section 4).
/// Newest entry has the lowest dynamic index.
#[derive(Debug)]
pub(crate) struct DynamicTable {
    entries: VecDeque<HeaderField>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub(crate) fn new(max_size: usize) -> DynamicTable {
        DynamicTable {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    pub(crate) fn max_size(&self) -> usize {
        self.max_size
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&HeaderField> {
        self.entries.get(index)
    }

    /// Insert at the front, evicting from the back until the entry fits.
    /// An entry larger than the whole table empties it (Section 4.4).
    pub(crate) fn insert(&mut self, field: HeaderField) {
        let entry_size = field.size();
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        while self.size + entry_size > self.max_size {
            if let Some(evicted) = self.entries.pop_back() {
                self.size -= evicted.size();
            } else {
                break;
            }
        }
        self.size += entry_size;
        self.entries.push_front(field);
    }

    /// Apply a new maximum size, evicting as needed (Section 4.3).
    pub(crate) fn resize(&mut self, max_size: usize) {
        while self.size > max_size {
            if let Some(evicted) = self.entries.pop_back() {
                self.size -= evicted.size();
            } else {
                break;
            }
        }
        self.max_size = max_size;
    }
}

/// Resolve a 1-based HPACK index into (name, value).
pub(crate) fn lookup(index: usize, dynamic: &DynamicTable) -> Option<(&[u8], &[u8])> {
    if index == 0 {
        return None;
    }
    if index <= STATIC_TABLE.len() {
        let (name, value) = STATIC_TABLE[index - 1];
        return Some((name.as_bytes(), value.as_bytes()));
    }
    dynamic
        .get(index - STATIC_TABLE.len() - 1)
        .map(|f| (f.name.as_slice(), f.value.as_slice()))
}

/// Find the best index for a field: `(index, exact)` where `exact` means
/// both name and value matched; otherwise the index is a name-only match.
pub(crate) fn find(name: &[u8], value: &[u8], dynamic: &DynamicTable) -> Option<(usize, bool)> {
    let mut name_only = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if n.as_bytes() == name {
            if v.as_bytes() == value {
                return Some((i + 1, true));
            }
            name_only.get_or_insert(i + 1);
        }
    }
    for i in 0..dynamic.len() {
        let Some(field) = dynamic.get(i) else { break };
        if field.name == name {
            let index = STATIC_TABLE.len() + 1 + i;
            if field.value == value {
                return Some((index, true));
            }
            name_only.get_or_insert(index);
        }
    }
    name_only.map(|i| (i, false))
}
