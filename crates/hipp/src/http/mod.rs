// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP/1.1 engine: connection state machine, header fields, chunked and
//! content-coded bodies, digest/basic authentication, and TLS upgrade.
//!
//! ```text
//! +--------------------------------------------------------------+
//! |  HttpConnection (client or server)                           |
//! |    write_request / update / read_body        (client)        |
//! |    read_request / write_response / write_body (server)       |
//! +--------------------------------------------------------------+
//! |  fields: closed ~80-name table   state: per-method pairs     |
//! |  coding: gzip/deflate (flate2)   auth: RFC 7616 digest       |
//! +--------------------------------------------------------------+
//! |  transport::HttpStream  (TcpStream | UnixStream | TlsStream) |
//! +--------------------------------------------------------------+
//! ```

pub mod auth;
pub mod coding;
mod connection;
pub mod date;
pub mod fields;
mod state;
mod status;
pub mod tls;
pub mod uri;

pub use auth::{basic_authorization, DigestAlgorithm, DigestState};
pub use coding::ContentCoding;
pub use connection::{
    AuthCredentials, ConnMode, ConnectOptions, ContinueCallback, Encryption, HttpConnection,
};
pub use date::{format_date, parse_date};
pub use fields::{HttpField, FIELD_COUNT};
pub use state::{DataEncoding, HttpState, Method};
pub use status::{HttpStatus, HttpVersion};
pub use tls::{TlsStream, TrustPolicy};
pub use uri::{assemble_uri, percent_decode, percent_encode, separate_uri, SeparatedUri};

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;

use crate::error::{Error, Result};

// ============================================================================
// Base64 helpers (Basic auth, token filenames, nonce transport)
// ============================================================================

/// Standard Base64 with padding.
pub fn encode64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode standard Base64.
pub fn decode64(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data)
        .map_err(|e| Error::InvalidArgument(format!("bad Base64 data: {}", e)))
}

/// URL-safe Base64 without padding (token and filename alphabet).
pub fn encode64_url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode URL-safe unpadded Base64.
pub fn decode64_url(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|e| Error::InvalidArgument(format!("bad Base64 data: {}", e)))
}

#[cfg(test)]
mod base64_tests {
    use super::*;

    #[test]
    fn test_encode64_known_value() {
        assert_eq!(encode64(b"Aladdin:open sesame"), "QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
        assert_eq!(decode64("QWxhZGRpbjpvcGVuIHNlc2FtZQ==").unwrap(), b"Aladdin:open sesame");
    }

    #[test]
    fn test_url_safe_no_padding() {
        let encoded = encode64_url(&[0xfb, 0xff, 0xfe]);
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(decode64_url(&encoded).unwrap(), vec![0xfb, 0xff, 0xfe]);
    }
}
