// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The closed set of recognized HTTP header fields and the per-connection
//! value table.
//!
//! Names are matched case-insensitively against a sorted table; repeated
//! fields either replace the stored value or, for a small list-valued set
//! (`Accept-Encoding`, `Transfer-Encoding`, `WWW-Authenticate`, ...),
//! append with a comma delimiter.  Unrecognized fields are not stored.

use std::cmp::Ordering;

/// Recognized header fields, in case-insensitive alphabetical order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpField {
    Accept,
    AcceptCh,
    AcceptEncoding,
    AcceptLanguage,
    AcceptRanges,
    AccessControlAllowCredentials,
    AccessControlAllowHeaders,
    AccessControlAllowMethods,
    AccessControlAllowOrigin,
    AccessControlExposeHeaders,
    AccessControlMaxAge,
    AccessControlRequestHeaders,
    AccessControlRequestMethod,
    Age,
    Allow,
    AuthenticationControl,
    AuthenticationInfo,
    Authorization,
    CacheControl,
    CacheStatus,
    CertNotAfter,
    CertNotBefore,
    Connection,
    ContentDisposition,
    ContentEncoding,
    ContentLanguage,
    ContentLength,
    ContentLocation,
    ContentRange,
    ContentSecurityPolicy,
    ContentSecurityPolicyReportOnly,
    ContentType,
    CrossOriginEmbedderPolicy,
    CrossOriginEmbedderPolicyReportOnly,
    CrossOriginOpenerPolicy,
    CrossOriginOpenerPolicyReportOnly,
    CrossOriginResourcePolicy,
    Dasl,
    Date,
    Dav,
    Depth,
    Destination,
    Etag,
    Expires,
    Forwarded,
    From,
    Host,
    If,
    IfMatch,
    IfModifiedSince,
    IfNoneMatch,
    IfRange,
    IfScheduleTagMatch,
    IfUnmodifiedSince,
    KeepAlive,
    LastModified,
    Link,
    Location,
    LockToken,
    MaxForwards,
    OptionalWwwAuthenticate,
    Origin,
    Oscore,
    Overwrite,
    Pragma,
    ProxyAuthenticate,
    ProxyAuthenticationInfo,
    ProxyAuthorization,
    ProxyStatus,
    Public,
    Range,
    Referer,
    Refresh,
    ReplayNonce,
    RetryAfter,
    ScheduleReply,
    ScheduleTag,
    Server,
    StrictTransportSecurity,
    Te,
    Timeout,
    Trailer,
    TransferEncoding,
    Upgrade,
    UserAgent,
    Vary,
    Via,
    WwwAuthenticate,
    XContentOptions,
    XFrameOptions,
}

/// Number of recognized fields.
pub const FIELD_COUNT: usize = 90;

/// Wire names, index-aligned with the enum (alphabetical order, so binary
/// search works on this table directly).
const NAMES: [&str; FIELD_COUNT] = [
    "Accept",
    "Accept-CH",
    "Accept-Encoding",
    "Accept-Language",
    "Accept-Ranges",
    "Access-Control-Allow-Credentials",
    "Access-Control-Allow-Headers",
    "Access-Control-Allow-Methods",
    "Access-Control-Allow-Origin",
    "Access-Control-Expose-Headers",
    "Access-Control-Max-Age",
    "Access-Control-Request-Headers",
    "Access-Control-Request-Method",
    "Age",
    "Allow",
    "Authentication-Control",
    "Authentication-Info",
    "Authorization",
    "Cache-Control",
    "Cache-Status",
    "Cert-Not-After",
    "Cert-Not-Before",
    "Connection",
    "Content-Disposition",
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-Location",
    "Content-Range",
    "Content-Security-Policy",
    "Content-Security-Policy-Report-Only",
    "Content-Type",
    "Cross-Origin-Embedder-Policy",
    "Cross-Origin-Embedder-Policy-Report-Only",
    "Cross-Origin-Opener-Policy",
    "Cross-Origin-Opener-Policy-Report-Only",
    "Cross-Origin-Resource-Policy",
    "DASL",
    "Date",
    "DAV",
    "Depth",
    "Destination",
    "ETag",
    "Expires",
    "Forwarded",
    "From",
    "Host",
    "If",
    "If-Match",
    "If-Modified-Since",
    "If-None-Match",
    "If-Range",
    "If-Schedule-Tag-Match",
    "If-Unmodified-Since",
    "Keep-Alive",
    "Last-Modified",
    "Link",
    "Location",
    "Lock-Token",
    "Max-Forwards",
    "Optional-WWW-Authenticate",
    "Origin",
    "OSCORE",
    "Overwrite",
    "Pragma",
    "Proxy-Authenticate",
    "Proxy-Authentication-Info",
    "Proxy-Authorization",
    "Proxy-Status",
    "Public",
    "Range",
    "Referer",
    "Refresh",
    "Replay-Nonce",
    "Retry-After",
    "Schedule-Reply",
    "Schedule-Tag",
    "Server",
    "Strict-Transport-Security",
    "TE",
    "Timeout",
    "Trailer",
    "Transfer-Encoding",
    "Upgrade",
    "User-Agent",
    "Vary",
    "Via",
    "WWW-Authenticate",
    "X-Content-Options",
    "X-Frame-Options",
];

const ALL: [HttpField; FIELD_COUNT] = {
    use HttpField::*;
    [
        Accept,
        AcceptCh,
        AcceptEncoding,
        AcceptLanguage,
        AcceptRanges,
        AccessControlAllowCredentials,
        AccessControlAllowHeaders,
        AccessControlAllowMethods,
        AccessControlAllowOrigin,
        AccessControlExposeHeaders,
        AccessControlMaxAge,
        AccessControlRequestHeaders,
        AccessControlRequestMethod,
        Age,
        Allow,
        AuthenticationControl,
        AuthenticationInfo,
        Authorization,
        CacheControl,
        CacheStatus,
        CertNotAfter,
        CertNotBefore,
        Connection,
        ContentDisposition,
        ContentEncoding,
        ContentLanguage,
        ContentLength,
        ContentLocation,
        ContentRange,
        ContentSecurityPolicy,
        ContentSecurityPolicyReportOnly,
        ContentType,
        CrossOriginEmbedderPolicy,
        CrossOriginEmbedderPolicyReportOnly,
        CrossOriginOpenerPolicy,
        CrossOriginOpenerPolicyReportOnly,
        CrossOriginResourcePolicy,
        Dasl,
        Date,
        Dav,
        Depth,
        Destination,
        Etag,
        Expires,
        Forwarded,
        From,
        Host,
        If,
        IfMatch,
        IfModifiedSince,
        IfNoneMatch,
        IfRange,
        IfScheduleTagMatch,
        IfUnmodifiedSince,
        KeepAlive,
        LastModified,
        Link,
        Location,
        LockToken,
        MaxForwards,
        OptionalWwwAuthenticate,
        Origin,
        Oscore,
        Overwrite,
        Pragma,
        ProxyAuthenticate,
        ProxyAuthenticationInfo,
        ProxyAuthorization,
        ProxyStatus,
        Public,
        Range,
        Referer,
        Refresh,
        ReplayNonce,
        RetryAfter,
        ScheduleReply,
        ScheduleTag,
        Server,
        StrictTransportSecurity,
        Te,
        Timeout,
        Trailer,
        TransferEncoding,
        Upgrade,
        UserAgent,
        Vary,
        Via,
        WwwAuthenticate,
        XContentOptions,
        XFrameOptions,
    ]
};

fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    let mut ai = a.bytes().map(|c| c.to_ascii_lowercase());
    let mut bi = b.bytes().map(|c| c.to_ascii_lowercase());
    loop {
        match (ai.next(), bi.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match x.cmp(&y) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

impl HttpField {
    /// Wire name of this field.
    pub fn name(self) -> &'static str {
        NAMES[self as usize]
    }

    /// Case-insensitive lookup; `None` for unrecognized names.
    pub fn from_name(name: &str) -> Option<HttpField> {
        let mut lo = 0usize;
        let mut hi = FIELD_COUNT;
        while lo < hi {
            let mid = (lo + hi) / 2;
            match cmp_ignore_case(name, NAMES[mid]) {
                Ordering::Less => hi = mid,
                Ordering::Greater => lo = mid + 1,
                Ordering::Equal => return Some(ALL[mid]),
            }
        }
        None
    }

    /// Fields whose repeats append with a comma instead of replacing.
    pub fn is_comma_append(self) -> bool {
        matches!(
            self,
            HttpField::AcceptEncoding
                | HttpField::AcceptLanguage
                | HttpField::AcceptRanges
                | HttpField::Allow
                | HttpField::Link
                | HttpField::TransferEncoding
                | HttpField::Upgrade
                | HttpField::WwwAuthenticate
        )
    }
}

// ============================================================================
// Field table
// ============================================================================

/// Per-connection field values plus defaults.
///
/// Defaults survive [`FieldTable::clear`] and are re-applied to requests
/// after reconnects (`User-Agent`, `Accept-Encoding`, ...).
#[derive(Debug)]
pub struct FieldTable {
    values: Box<[Option<String>]>,
    defaults: Box<[Option<String>]>,
}

impl FieldTable {
    pub fn new() -> FieldTable {
        FieldTable {
            values: vec![None; FIELD_COUNT].into_boxed_slice(),
            defaults: vec![None; FIELD_COUNT].into_boxed_slice(),
        }
    }

    /// Current value, falling back to the default.
    pub fn get(&self, field: HttpField) -> Option<&str> {
        self.values[field as usize]
            .as_deref()
            .or(self.defaults[field as usize].as_deref())
    }

    /// Value without default fallback.
    pub fn get_raw(&self, field: HttpField) -> Option<&str> {
        self.values[field as usize].as_deref()
    }

    /// Set a field, honoring the comma-append rule on repeats.
    pub fn add(&mut self, field: HttpField, value: &str) {
        let slot = &mut self.values[field as usize];
        match slot {
            Some(existing) if field.is_comma_append() && !existing.is_empty() => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            _ => *slot = Some(value.to_string()),
        }
    }

    /// Replace a field unconditionally; an empty value clears it.
    pub fn set(&mut self, field: HttpField, value: &str) {
        self.values[field as usize] = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };
    }

    /// Set a default applied whenever no explicit value exists.
    pub fn set_default(&mut self, field: HttpField, value: &str) {
        self.defaults[field as usize] = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };
    }

    /// Clear all non-default values.
    pub fn clear(&mut self) {
        for v in self.values.iter_mut() {
            *v = None;
        }
    }

    /// Iterate set fields (explicit values only), in table order.
    pub fn iter_set(&self) -> impl Iterator<Item = (HttpField, &str)> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_deref().map(|s| (ALL[i], s)))
    }

    /// Iterate default values, in table order.
    pub fn iter_defaults(&self) -> impl Iterator<Item = (HttpField, &str)> {
        self.defaults
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_deref().map(|s| (ALL[i], s)))
    }
}

impl Default for FieldTable {
    fn default() -> FieldTable {
        FieldTable::new()
    }
}

/// Normalize a value for the `Host` field: bracket bare IPv6 literals and
/// strip a trailing dot.
pub fn normalize_host(host: &str) -> String {
    let trimmed = host.strip_suffix('.').unwrap_or(host);
    if trimmed.contains(':') && !trimmed.starts_with('[') {
        format!("[{}]", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Extract a `name=value` sub-field from a comma-separated field value
/// (`Authentication-Info: nextnonce="abc", rspauth=...`).
pub fn sub_field(value: &str, name: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        // skip separators
        while i < bytes.len() && (bytes[i] == b',' || bytes[i].is_ascii_whitespace()) {
            i += 1;
        }
        let key_start = i;
        while i < bytes.len() && bytes[i] != b'=' && bytes[i] != b',' && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let key = &value[key_start..i];

        if i >= bytes.len() || bytes[i] != b'=' {
            continue;
        }
        i += 1;

        let val = if i < bytes.len() && bytes[i] == b'"' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i] != b'"' {
                i += 1;
            }
            let v = &value[start..i];
            i = (i + 1).min(bytes.len());
            v
        } else {
            let start = i;
            while i < bytes.len() && bytes[i] != b',' && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            &value[start..i]
        };

        if key.eq_ignore_ascii_case(name) {
            return Some(val.to_string());
        }
    }

    None
}
