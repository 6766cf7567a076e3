// ABOUTME: Header map with canonical display names, plus the transient header-block assembly
// ABOUTME: Classifies decoded fields (pseudo-headers, cookies, regular) per RFC 7540 Section 8.1.2

use crate::frame::StreamId;
use crate::hpack::HeaderField;
use bytes::BytesMut;
use std::collections::HashMap;
use thiserror::Error;

/// A multi-valued header map keyed by canonical display names
/// ("content-type" is stored and looked up as "Content-Type").
///
/// Canonicalization happens on insert and lookup, so handler code can use
/// whichever casing it likes.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HeaderMap {
    entries: HashMap<String, Vec<String>>,
}

impl HeaderMap {
    pub fn new() -> HeaderMap {
        HeaderMap::default()
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&canonical(name))
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values for `name`.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&canonical(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Replace any existing values for `name`.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(canonical(name), vec![value.into()]);
    }

    /// Add a value, keeping existing ones.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries
            .entry(canonical(name))
            .or_default()
            .push(value.into());
    }

    /// Append under an already-canonical key (assembly fast path).
    pub(crate) fn append_canonical(&mut self, name: String, value: String) {
        self.entries.entry(name).or_default().push(value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate (canonical name, values). Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }
}

/// Canonical display form of a header name: first letter of each
/// hyphen-separated segment upper-cased, the rest lower-cased.
pub(crate) fn canonical(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for ch in name.chars() {
        if upper_next {
            out.extend(ch.to_uppercase());
        } else {
            out.extend(ch.to_lowercase());
        }
        upper_next = ch == '-';
    }
    out
}

/// Cache-backed canonicalization. The cache is connection-local and keyed by
/// the lowercase wire name; canonical strings are stable, so repeated headers
/// cost one lookup after the first request.
pub(crate) fn canonical_cached(cache: &mut HashMap<String, String>, lower: &str) -> String {
    if let Some(hit) = cache.get(lower) {
        return hit.clone();
    }
    let canon = canonical(lower);
    cache.insert(lower.to_string(), canon.clone());
    canon
}

/// Field-name validity for HTTP/2: a nonempty RFC 7230 token with no
/// uppercase letters (Section 8.1.2 requires lowercase on the wire).
pub(crate) fn valid_field_name(name: &[u8]) -> bool {
    !name.is_empty()
        && name.iter().all(|&b| {
            matches!(b,
                b'a'..=b'z' | b'0'..=b'9' |
                b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
                b'^' | b'_' | b'`' | b'|' | b'~')
        })
}

/// Field-value validity: visible ASCII plus space and horizontal tab.
fn valid_field_value(value: &[u8]) -> bool {
    value.iter().all(|&b| b == b'\t' || (b' '..=b'~').contains(&b))
}

/// What to do with the request once its header block completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Build the request and spawn a handler.
    Dispatch,
    /// Drain the block for HPACK state only (HEADERS after GOAWAY).
    Discard,
    /// Drain the block, then refuse the stream (concurrency cap).
    Refuse,
}

/// Why a completed header block could not become a request.
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum InvalidRequest {
    #[error("malformed or misplaced header field")]
    BadField,
    #[error("missing :method or :path pseudo-header")]
    MissingPseudo,
    #[error("scheme {0:?} is not http or https")]
    BadScheme(String),
    #[error("unparseable content-length")]
    BadContentLength,
}

/// Transient record tracking one in-flight header block: HEADERS plus any
/// CONTINUATION frames, until END_HEADERS. While one of these exists, only
/// CONTINUATION frames on the same stream are legal.
#[derive(Debug)]
pub(crate) struct HeaderAssembly {
    pub(crate) stream_id: StreamId,
    pub(crate) end_stream: bool,
    pub(crate) disposition: Disposition,
    fragments: BytesMut,
    headers: HeaderMap,
    method: Option<String>,
    path: Option<String>,
    scheme: Option<String>,
    authority: Option<String>,
    cookies: Vec<String>,
    saw_regular: bool,
    invalid: bool,
}

impl HeaderAssembly {
    pub(crate) fn new(
        stream_id: StreamId,
        end_stream: bool,
        disposition: Disposition,
    ) -> HeaderAssembly {
        HeaderAssembly {
            stream_id,
            end_stream,
            disposition,
            fragments: BytesMut::new(),
            headers: HeaderMap::new(),
            method: None,
            path: None,
            scheme: None,
            authority: None,
            cookies: Vec::new(),
            saw_regular: false,
            invalid: false,
        }
    }

    pub(crate) fn push_fragment(&mut self, fragment: &[u8]) {
        self.fragments.extend_from_slice(fragment);
    }

    pub(crate) fn fragment_len(&self) -> usize {
        self.fragments.len()
    }

    /// Hand the accumulated block to the HPACK decoder.
    pub(crate) fn take_fragments(&mut self) -> bytes::Bytes {
        self.fragments.split().freeze()
    }

    /// Classify one decoded field (RFC 7540 Section 8.1.2). Invalid fields
    /// taint the whole block; decoding still continues so the compression
    /// state stays synchronized.
    pub(crate) fn absorb(&mut self, field: HeaderField, cache: &mut HashMap<String, String>) {
        if self.invalid {
            return;
        }
        if !valid_field_value(&field.value) {
            self.invalid = true;
            return;
        }
        // Values are ASCII once validated, so from_utf8 cannot fail here.
        let Ok(value) = String::from_utf8(field.value) else {
            self.invalid = true;
            return;
        };

        if field.name.first() == Some(&b':') {
            // Pseudo-headers must precede regular fields (Section 8.1.2.1).
            if self.saw_regular {
                self.invalid = true;
                return;
            }
            let slot = match field.name.as_slice() {
                b":method" => &mut self.method,
                b":path" => &mut self.path,
                b":scheme" => &mut self.scheme,
                b":authority" => &mut self.authority,
                _ => {
                    self.invalid = true;
                    return;
                }
            };
            if slot.is_some() {
                self.invalid = true;
                return;
            }
            *slot = Some(value);
            return;
        }

        if !valid_field_name(&field.name) {
            self.invalid = true;
            return;
        }
        let Ok(lower) = std::str::from_utf8(&field.name) else {
            self.invalid = true;
            return;
        };

        self.saw_regular = true;
        if lower == "cookie" {
            // Coalesced into one logical header at finish (Section 8.1.2.5).
            self.cookies.push(value);
            return;
        }
        let canon = canonical_cached(cache, lower);
        self.headers.append_canonical(canon, value);
    }

    /// Validate and convert into request parts once the block ends.
    pub(crate) fn finish(mut self) -> Result<RequestParts, InvalidRequest> {
        if self.invalid {
            return Err(InvalidRequest::BadField);
        }
        let method = self.method.take().filter(|m| !m.is_empty());
        let path = self.path.take().filter(|p| !p.is_empty());
        let (Some(method), Some(path)) = (method, path) else {
            return Err(InvalidRequest::MissingPseudo);
        };
        let scheme = self.scheme.take().unwrap_or_default();
        if scheme != "http" && scheme != "https" {
            return Err(InvalidRequest::BadScheme(scheme));
        }

        if !self.cookies.is_empty() {
            self.headers.insert("Cookie", self.cookies.join("; "));
        }

        let declared_body_bytes = match self.headers.get("Content-Length") {
            None => -1,
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|&n| n >= 0)
                .ok_or(InvalidRequest::BadContentLength)?,
        };

        Ok(RequestParts {
            method,
            path,
            scheme,
            authority: self.authority.take().unwrap_or_default(),
            headers: self.headers,
            declared_body_bytes,
        })
    }
}

/// The validated output of a finished header block.
#[derive(Debug, PartialEq)]
pub(crate) struct RequestParts {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) scheme: String,
    pub(crate) authority: String,
    pub(crate) headers: HeaderMap,
    pub(crate) declared_body_bytes: i64,
}
