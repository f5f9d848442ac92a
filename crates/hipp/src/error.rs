// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by all HIPP operations.
//!
//! Connection-level failures (`Io`, `Timeout`, `Tls`, `Protocol`) are sticky:
//! once one is recorded on a connection it stays until the connection is
//! closed and reopened.  `Auth` and `Resolve` are per-operation and do not
//! poison the connection.  `Cancelled` is reported to the caller but never
//! logged.

use std::fmt;
use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by HIPP operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Transport
    // ========================================================================
    /// Socket send/recv/connect/poll returned an OS error.
    Io(io::Error),
    /// I/O budget elapsed with no progress.
    Timeout,
    /// The caller's cancel flag was observed.
    Cancelled,

    // ========================================================================
    // Protocol
    // ========================================================================
    /// HTTP framing error: bad status line, bad chunk length, unknown
    /// method or version, oversized read-until-close body.
    Protocol(String),
    /// TLS handshake or certificate-chain failure.
    Tls(String),
    /// Authentication failed: three digest attempts exhausted or the server
    /// requested an unsupported scheme.
    Auth(String),

    // ========================================================================
    // Resolver
    // ========================================================================
    /// DNS-SD query produced no answer within the budget.
    Resolve(String),

    // ========================================================================
    // Usage
    // ========================================================================
    /// Malformed URI, empty buffer, or otherwise invalid caller input.
    InvalidArgument(String),
}

impl Error {
    /// Whether this error poisons the connection it occurred on.
    ///
    /// Sticky errors must be cleared by close-and-reconnect.
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Timeout | Error::Tls(_) | Error::Protocol(_)
        )
    }

    /// Stable numeric code for callers that track a last-error integer.
    pub fn code(&self) -> i32 {
        match self {
            Error::Io(_) => 1,
            Error::Timeout => 2,
            Error::Cancelled => 3,
            Error::Protocol(_) => 4,
            Error::Tls(_) => 5,
            Error::Auth(_) => 6,
            Error::Resolve(_) => 7,
            Error::InvalidArgument(_) => 8,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Error {
        Error::Protocol(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Error {
        Error::InvalidArgument(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::Tls(msg) => write!(f, "TLS error: {}", msg),
            Error::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            Error::Resolve(msg) => write!(f, "Resolve failed: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout,
            _ => Error::Io(e),
        }
    }
}
