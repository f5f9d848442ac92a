// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request methods and the connection state machine.
//!
//! ```text
//!            write/read request line
//!  waiting ----------------------------> Request(m)
//!     ^                                      |
//!     |                     body declared    | no body
//!     |                         v            v
//!     |                     Recv(m) ----> Send(m) ----> Status
//!     |                    (server rx)   (body tx/rx)     |
//!     +---------------------------------------------------+
//!                      keep-alive end-of-exchange
//! ```
//!
//! Any state can drop to `Error` on a socket or framing failure, and any
//! state returns to `Waiting` on close.

use std::fmt;

/// HTTP request methods understood by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Options,
    Get,
    Head,
    Post,
    Put,
    Delete,
    Trace,
    Connect,
    Copy,
    Lock,
    MkCol,
    Move,
    PropFind,
    PropPatch,
    Unlock,
}

impl Method {
    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Copy => "COPY",
            Method::Lock => "LOCK",
            Method::MkCol => "MKCOL",
            Method::Move => "MOVE",
            Method::PropFind => "PROPFIND",
            Method::PropPatch => "PROPPATCH",
            Method::Unlock => "UNLOCK",
        }
    }

    /// Exact-match parse (method names are case-sensitive on the wire).
    pub fn parse(s: &str) -> Option<Method> {
        match s {
            "OPTIONS" => Some(Method::Options),
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            "TRACE" => Some(Method::Trace),
            "CONNECT" => Some(Method::Connect),
            "COPY" => Some(Method::Copy),
            "LOCK" => Some(Method::Lock),
            "MKCOL" => Some(Method::MkCol),
            "MOVE" => Some(Method::Move),
            "PROPFIND" => Some(Method::PropFind),
            "PROPPATCH" => Some(Method::PropPatch),
            "UNLOCK" => Some(Method::Unlock),
            _ => None,
        }
    }

    /// Methods whose requests never carry a body when no length is given.
    pub fn zero_length_default(self) -> bool {
        matches!(
            self,
            Method::Options | Method::Head | Method::Delete | Method::Trace | Method::Connect
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Connection state
// ============================================================================

/// Protocol state of one HTTP connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HttpState {
    /// Fatal socket or framing error; cleared only by close.
    Error,
    /// Between exchanges; the socket is shareable.
    #[default]
    Waiting,
    /// Request line written (client) or read (server); headers in flight.
    Request(Method),
    /// Server reading the request body.
    Recv(Method),
    /// Body transfer toward the client (client reads, server writes).
    Send(Method),
    /// Exchange complete, status delivered.
    Status,
    /// Server read a request line with an unrecognized method.
    UnknownMethod,
    /// Server read a request line with an unrecognized HTTP version.
    UnknownVersion,
}

impl HttpState {
    /// Connection owns its socket exclusively in every state but `Waiting`.
    pub fn owns_socket(&self) -> bool {
        !matches!(self, HttpState::Waiting)
    }

    /// Whether an exchange is in flight.
    pub fn in_exchange(&self) -> bool {
        matches!(
            self,
            HttpState::Request(_) | HttpState::Recv(_) | HttpState::Send(_)
        )
    }
}

impl fmt::Display for HttpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpState::Error => write!(f, "ERROR"),
            HttpState::Waiting => write!(f, "WAITING"),
            HttpState::Request(m) => write!(f, "{}", m),
            HttpState::Recv(m) => write!(f, "{}-RECV", m),
            HttpState::Send(m) => write!(f, "{}-SEND", m),
            HttpState::Status => write!(f, "STATUS"),
            HttpState::UnknownMethod => write!(f, "UNKNOWN-METHOD"),
            HttpState::UnknownVersion => write!(f, "UNKNOWN-VERSION"),
        }
    }
}

// ============================================================================
// Body framing
// ============================================================================

/// How the bytes of the current message body are delimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DataEncoding {
    /// Header fields are being read or written; no body framing yet.
    #[default]
    Fields,
    /// Chunked transfer coding.  `chunk_remaining == 0` means the next
    /// chunk-length line has not been read yet.
    Chunked { chunk_remaining: u64 },
    /// Fixed Content-Length body with `remaining` bytes outstanding.
    Length { remaining: u64 },
    /// No length known: read until close, bounded by the safety ceiling.
    /// `consumed` counts bytes already read.
    UntilClose { consumed: u64 },
}

impl DataEncoding {
    /// Whether the current message body is fully consumed/produced.
    ///
    /// `Chunked` completion is signalled separately (the zero-length chunk
    /// flips the encoding back to `Fields`).
    pub fn is_complete(&self) -> bool {
        matches!(self, DataEncoding::Fields | DataEncoding::Length { remaining: 0 })
    }
}
