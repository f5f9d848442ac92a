// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP authentication: RFC 7616 digest and RFC 7617 basic.
//!
//! The digest scratch lives on the connection; a successful response may
//! carry `Authentication-Info: nextnonce=...` which rolls the nonce
//! forward for the next request without another challenge.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::{Digest as _, Md5};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::http::Method;

/// Hash algorithm carried in the challenge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// RFC 7616 compatibility default when the challenge names none.
    #[default]
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    pub fn from_name(name: &str) -> Option<DigestAlgorithm> {
        if name.eq_ignore_ascii_case("MD5") {
            Some(DigestAlgorithm::Md5)
        } else if name.eq_ignore_ascii_case("MD5-sess") {
            Some(DigestAlgorithm::Md5Sess)
        } else if name.eq_ignore_ascii_case("SHA-256") {
            Some(DigestAlgorithm::Sha256)
        } else if name.eq_ignore_ascii_case("SHA-256-sess") {
            Some(DigestAlgorithm::Sha256Sess)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Md5Sess => "MD5-sess",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(self) -> bool {
        matches!(self, DigestAlgorithm::Md5Sess | DigestAlgorithm::Sha256Sess)
    }

    fn hash_hex(self, data: &str) -> String {
        match self {
            DigestAlgorithm::Md5 | DigestAlgorithm::Md5Sess => {
                hex(&Md5::digest(data.as_bytes()))
            }
            DigestAlgorithm::Sha256 | DigestAlgorithm::Sha256Sess => {
                hex(&Sha256::digest(data.as_bytes()))
            }
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

// ============================================================================
// Challenge parsing
// ============================================================================

/// Digest state kept on a connection between requests.
#[derive(Clone, Debug, Default)]
pub struct DigestState {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub qop: Option<String>,
    pub algorithm: DigestAlgorithm,
    /// Monotonic per-nonce request counter (`nc`).
    pub nonce_count: u32,
    pub cnonce: String,
}

impl DigestState {
    /// Absorb a `WWW-Authenticate` value; returns `false` when no Digest
    /// challenge is present.
    pub fn absorb_challenge(&mut self, www_authenticate: &str) -> bool {
        let Some(params) = digest_segment(www_authenticate) else {
            return false;
        };

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut qop = None;
        let mut algorithm = DigestAlgorithm::Md5;

        for (key, value) in AuthParams::new(params) {
            if key.eq_ignore_ascii_case("realm") {
                realm = Some(value);
            } else if key.eq_ignore_ascii_case("nonce") {
                nonce = Some(value);
            } else if key.eq_ignore_ascii_case("opaque") {
                opaque = Some(value);
            } else if key.eq_ignore_ascii_case("qop") {
                // Value is a list; prefer plain "auth".
                qop = value
                    .split(',')
                    .map(str::trim)
                    .find(|q| q.eq_ignore_ascii_case("auth"))
                    .map(str::to_string)
                    .or(Some(value));
            } else if key.eq_ignore_ascii_case("algorithm") {
                match DigestAlgorithm::from_name(&value) {
                    Some(a) => algorithm = a,
                    None => return false,
                }
            }
        }

        let (Some(realm), Some(nonce)) = (realm, nonce) else {
            return false;
        };

        // A fresh nonce resets the request counter.
        if nonce != self.nonce {
            self.nonce_count = 0;
        }

        self.realm = realm;
        self.nonce = nonce;
        self.opaque = opaque;
        self.qop = qop;
        self.algorithm = algorithm;
        true
    }

    /// Roll the nonce forward from `Authentication-Info: nextnonce=...`.
    pub fn roll_nonce(&mut self, nextnonce: &str) {
        if !nextnonce.is_empty() && nextnonce != self.nonce {
            self.nonce = nextnonce.to_string();
            self.nonce_count = 0;
        }
    }

    /// Compute the `Authorization` value for one request.
    ///
    /// Increments `nc` and generates a fresh cnonce.
    pub fn authorization(
        &mut self,
        username: &str,
        password: &str,
        method: Method,
        resource: &str,
    ) -> Result<String> {
        if self.nonce.is_empty() {
            return Err(Error::Auth("no digest challenge received".to_string()));
        }

        self.nonce_count += 1;
        self.cnonce = make_cnonce();

        let response = self.response(username, password, method, resource);

        let mut out = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
            username, self.realm, self.nonce, resource, response, self.algorithm.name()
        );
        if let Some(qop) = &self.qop {
            out.push_str(&format!(
                ", qop={}, nc={:08x}, cnonce=\"{}\"",
                qop, self.nonce_count, self.cnonce
            ));
        }
        if let Some(opaque) = &self.opaque {
            out.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        Ok(out)
    }

    /// RFC 7616 response computation with the current nc/cnonce.
    ///
    /// Public so a verifying peer can recompute the expected value.
    pub fn response(&self, username: &str, password: &str, method: Method, resource: &str) -> String {
        let alg = self.algorithm;

        let mut ha1 = alg.hash_hex(&format!("{}:{}:{}", username, self.realm, password));
        if alg.is_session() {
            ha1 = alg.hash_hex(&format!("{}:{}:{}", ha1, self.nonce, self.cnonce));
        }

        let ha2 = alg.hash_hex(&format!("{}:{}", method.name(), resource));

        match &self.qop {
            Some(qop) => alg.hash_hex(&format!(
                "{}:{}:{:08x}:{}:{}:{}",
                ha1, self.nonce, self.nonce_count, self.cnonce, qop, ha2
            )),
            None => alg.hash_hex(&format!("{}:{}:{}", ha1, self.nonce, ha2)),
        }
    }
}

fn make_cnonce() -> String {
    format!("{:016x}{:016x}", fastrand::u64(..), fastrand::u64(..))
}

/// Locate the parameter list of the `Digest` challenge inside a
/// (possibly multi-scheme, comma-joined) `WWW-Authenticate` value.
fn digest_segment(value: &str) -> Option<&str> {
    let mut rest = value;
    loop {
        let trimmed = rest.trim_start_matches(|c: char| c == ',' || c.is_ascii_whitespace());
        if trimmed.is_empty() {
            return None;
        }
        let end = trimmed
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(trimmed.len());
        let scheme = &trimmed[..end];
        if scheme.eq_ignore_ascii_case("Digest") {
            return Some(trimmed[end..].trim_start());
        }
        // Skip this scheme's parameters: advance to the next token that
        // looks like a scheme name (a bare token followed by whitespace,
        // never '=').
        let mut after = &trimmed[end..];
        loop {
            match AuthParams::new(after).next_span() {
                Some(consumed) => after = &after[consumed..],
                None => break,
            }
        }
        if after.len() == rest.len() {
            return None;
        }
        rest = after;
    }
}

/// Iterator over `key=value` / `key="value"` auth parameters.
struct AuthParams<'a> {
    rest: &'a str,
}

impl<'a> AuthParams<'a> {
    fn new(s: &'a str) -> AuthParams<'a> {
        AuthParams { rest: s }
    }

    /// Length consumed by one parameter, `None` when the next token is
    /// not a parameter (end of segment or a new scheme name).
    fn next_span(&self) -> Option<usize> {
        let s = self.rest;
        let skipped = s.len() - s.trim_start_matches(|c: char| c == ',' || c.is_ascii_whitespace()).len();
        let t = &s[skipped..];
        let key_len = t
            .find(|c: char| c == '=' || c == ',' || c.is_ascii_whitespace())
            .unwrap_or(t.len());
        if key_len == 0 || !t[key_len..].starts_with('=') {
            return None;
        }
        let mut i = skipped + key_len + 1;
        let bytes = s.as_bytes();
        if i < s.len() && bytes[i] == b'"' {
            i += 1;
            while i < s.len() && bytes[i] != b'"' {
                i += 1;
            }
            i = (i + 1).min(s.len());
        } else {
            while i < s.len() && bytes[i] != b',' && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
        }
        Some(i)
    }
}

impl<'a> Iterator for AuthParams<'a> {
    type Item = (&'a str, String);

    fn next(&mut self) -> Option<Self::Item> {
        let s = self.rest.trim_start_matches(|c: char| c == ',' || c.is_ascii_whitespace());
        if s.is_empty() {
            return None;
        }
        let key_len = s
            .find(|c: char| c == '=' || c == ',' || c.is_ascii_whitespace())
            .unwrap_or(s.len());
        if key_len == 0 || !s[key_len..].starts_with('=') {
            // Next token is a scheme name; stop here.
            return None;
        }
        let key = &s[..key_len];
        let after = &s[key_len + 1..];

        let (value, consumed) = if let Some(stripped) = after.strip_prefix('"') {
            match stripped.find('"') {
                Some(close) => (stripped[..close].to_string(), key_len + 1 + close + 2),
                None => (stripped.to_string(), s.len()),
            }
        } else {
            let end = after
                .find(|c: char| c == ',' || c.is_ascii_whitespace())
                .unwrap_or(after.len());
            (after[..end].to_string(), key_len + 1 + end)
        };

        self.rest = &s[consumed.min(s.len())..];
        Some((key, value))
    }
}

// ============================================================================
// Basic
// ============================================================================

/// RFC 7617 `Authorization` value.
pub fn basic_authorization(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        BASE64.encode(format!("{}:{}", username, password))
    )
}
