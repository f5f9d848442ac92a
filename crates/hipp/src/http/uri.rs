// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! URI separation, assembly, and percent coding.
//!
//! Covers the `ipp`/`ipps`/`http`/`https` URI shapes the runtime deals
//! with, including IPv6 literals with zone identifiers
//! (`[fe80::1%25eth0]`) and DNS-SD host names containing spaces.

use std::fmt::Write as _;

use crate::error::{Error, Result};

// ============================================================================
// Percent coding
// ============================================================================

/// RFC 3986 unreserved characters.
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~')
}

fn push_pct(out: &mut String, b: u8) {
    let _ = write!(out, "%{:02X}", b);
}

/// Percent-encode `s`, keeping unreserved characters plus `extra_safe`.
pub fn percent_encode(s: &str, extra_safe: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_unreserved(b) || extra_safe.as_bytes().contains(&b) {
            out.push(b as char);
        } else {
            push_pct(&mut out, b);
        }
    }
    out
}

/// Decode every `%XX` escape in `s`.
pub fn percent_decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).copied().and_then(hex_digit);
            let lo = bytes.get(i + 2).copied().and_then(hex_digit);
            match (hi, lo) {
                (Some(h), Some(l)) => {
                    out.push(h << 4 | l);
                    i += 3;
                }
                _ => return Err(Error::invalid(format!("bad percent escape in \"{}\"", s))),
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).map_err(|_| Error::invalid("percent-decoded data is not UTF-8"))
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

// ============================================================================
// Separate / assemble
// ============================================================================

/// A URI broken into its components, all percent-decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeparatedUri {
    /// Lowercased scheme.
    pub scheme: String,
    /// `user` or `user:password`, without the trailing `@`.
    pub userpass: Option<String>,
    /// Hostname, IP literal (brackets removed), or local socket path.
    pub host: String,
    /// Port: explicit, or the scheme default when absent.
    pub port: u16,
    /// Whether the URI spelled the port out.
    pub explicit_port: bool,
    /// Resource path beginning with `/` (plus any query).
    pub resource: String,
}

/// Default port for a scheme, 0 when the scheme has none.
pub fn default_port(scheme: &str) -> u16 {
    match scheme {
        "ipp" | "ipps" => 631,
        "http" => 80,
        "https" => 443,
        "lpd" => 515,
        "socket" => 9100,
        _ => 0,
    }
}

/// Split a URI into components.
pub fn separate_uri(uri: &str) -> Result<SeparatedUri> {
    let colon = uri
        .find(':')
        .ok_or_else(|| Error::invalid(format!("URI \"{}\" has no scheme", uri)))?;
    let scheme = uri[..colon].to_ascii_lowercase();
    if scheme.is_empty() || !scheme.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.') {
        return Err(Error::invalid(format!("URI \"{}\" has a malformed scheme", uri)));
    }

    let rest = &uri[colon + 1..];
    let rest = rest
        .strip_prefix("//")
        .ok_or_else(|| Error::invalid(format!("URI \"{}\" has no authority", uri)))?;

    let (authority, resource) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, "/"),
    };

    let (userpass, hostport) = match authority.rfind('@') {
        Some(at) => (Some(percent_decode(&authority[..at])?), &authority[at + 1..]),
        None => (None, authority),
    };

    let (host_raw, port_str) = if let Some(stripped) = hostport.strip_prefix('[') {
        // IPv6 literal; the zone separator arrives as %25
        let close = stripped
            .find(']')
            .ok_or_else(|| Error::invalid(format!("URI \"{}\" has an unterminated address", uri)))?;
        let host = &stripped[..close];
        let after = &stripped[close + 1..];
        let port = after.strip_prefix(':');
        (host, port)
    } else {
        match hostport.rfind(':') {
            Some(c) => (&hostport[..c], Some(&hostport[c + 1..])),
            None => (hostport, None),
        }
    };

    if host_raw.is_empty() {
        return Err(Error::invalid(format!("URI \"{}\" has no host", uri)));
    }

    let (port, explicit_port) = match port_str {
        Some(p) => (
            p.parse::<u16>()
                .map_err(|_| Error::invalid(format!("URI \"{}\" has a bad port", uri)))?,
            true,
        ),
        None => (default_port(&scheme), false),
    };

    Ok(SeparatedUri {
        scheme,
        userpass,
        host: percent_decode(host_raw)?,
        port,
        explicit_port,
        resource: percent_decode(resource)?,
    })
}

/// Reassemble a URI from components.
///
/// The userpass keeps `:` literal, the host is bracketed when it contains
/// a colon (IPv6), and the port is emitted only when it was explicit (or
/// nonzero for hand-built URIs).
pub fn assemble_uri(parts: &SeparatedUri) -> String {
    let mut out = String::new();
    out.push_str(&parts.scheme);
    out.push_str("://");

    if let Some(up) = &parts.userpass {
        out.push_str(&percent_encode(up, ":"));
        out.push('@');
    }

    if parts.host.contains(':') {
        out.push('[');
        out.push_str(&percent_encode(&parts.host, ":"));
        out.push(']');
    } else {
        out.push_str(&percent_encode(&parts.host, "!$&'()*+,;=:"));
    }

    if parts.explicit_port && parts.port != 0 {
        let _ = write!(out, ":{}", parts.port);
    }

    out.push_str(&percent_encode(&parts.resource, "/?=&+@!$'()*,;:"));
    out
}

/// Assemble a `device-uri` for a DNS-SD service.
///
/// The host slot carries the decoded full service name; no port is
/// emitted because the consumer resolves the service before connecting.
pub fn assemble_service_uri(scheme: &str, fullname: &str, resource: &str) -> String {
    assemble_uri(&SeparatedUri {
        scheme: scheme.to_string(),
        userpass: None,
        host: fullname.to_string(),
        port: 0,
        explicit_port: false,
        resource: resource.to_string(),
    })
}
