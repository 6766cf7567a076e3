// ABOUTME: The immutable request view handed to application handlers

use crate::body::Body;
use crate::headers::HeaderMap;

/// Transport-security details for a request, present when the request
/// scheme is https. Negotiation itself happens outside this crate; this is
/// the stub the handler can inspect.
#[derive(Debug, Clone)]
pub struct TlsState {
    negotiated_protocol: &'static str,
}

impl TlsState {
    pub(crate) fn h2() -> TlsState {
        TlsState {
            negotiated_protocol: crate::server::ALPN_H2,
        }
    }

    /// The ALPN protocol the surrounding TLS stack negotiated.
    pub fn negotiated_protocol(&self) -> &str {
        self.negotiated_protocol
    }
}

/// One HTTP/2 request as dispatched to a handler.
///
/// Header names are canonical display forms (`Content-Type`); multiple
/// `cookie` fields have been coalesced into a single `Cookie` header.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) scheme: String,
    pub(crate) authority: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
    pub(crate) tls: Option<TlsState>,
}

impl Request {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The `:authority` pseudo-header; may be empty.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Always "HTTP/2.0".
    pub fn protocol(&self) -> &'static str {
        "HTTP/2.0"
    }

    /// The request body; immediate EOF when the request has none.
    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// TLS connection state, present iff the scheme is https.
    pub fn tls(&self) -> Option<&TlsState> {
        self.tls.as_ref()
    }
}
