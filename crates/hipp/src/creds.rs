// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! X.509 credentials and the pinned-credential trust cache.
//!
//! A [`Credentials`] handle is a reference-counted, immutable certificate
//! chain (cloning shares the backing material; it is freed when the last
//! clone drops).  The [`CredentialStore`] pins one PEM file per hostname
//! under the user config directory and answers trust queries with a
//! trust-on-first-use-plus-changes decision:
//!
//! | observation                                   | trust     |
//! |-----------------------------------------------|-----------|
//! | same chain as pinned                          | `Ok`      |
//! | same subject, newer not-before                | `Renewed` |
//! | different subject                             | `Changed` |
//! | chain expired                                 | `Expired` |
//! | hostname never seen                           | `Unknown` |
//! | chain empty or unparsable                     | `Invalid` |

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

use crate::config::Context;
use crate::error::{Error, Result};

// ============================================================================
// Credentials handle
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
struct CredsInner {
    /// DER certificates in chain order (leaf first).
    chain: Vec<Vec<u8>>,
    /// Optional private key material (kept as raw PEM block contents).
    key: Option<Vec<u8>>,
}

/// Reference-counted, immutable certificate chain.
#[derive(Clone, Debug)]
pub struct Credentials {
    inner: Arc<CredsInner>,
}

impl Credentials {
    /// Empty handle; append certificates with [`Credentials::add_pem`].
    pub fn new() -> Credentials {
        Credentials {
            inner: Arc::new(CredsInner {
                chain: Vec::new(),
                key: None,
            }),
        }
    }

    /// Parse a PEM bundle: certificates in order, plus an optional key.
    pub fn from_pem(pem_data: &str) -> Result<Credentials> {
        let blocks = pem::parse_many(pem_data.as_bytes())
            .map_err(|e| Error::Tls(format!("bad PEM data: {}", e)))?;

        let mut chain = Vec::new();
        let mut key = None;
        for block in blocks {
            match block.tag() {
                "CERTIFICATE" => chain.push(block.contents().to_vec()),
                "PRIVATE KEY" | "RSA PRIVATE KEY" | "EC PRIVATE KEY" => {
                    key = Some(block.contents().to_vec());
                }
                other => log::debug!("[CREDS] ignoring PEM block \"{}\"", other),
            }
        }

        Ok(Credentials {
            inner: Arc::new(CredsInner { chain, key }),
        })
    }

    /// Build from DER certificates in chain order.
    pub fn from_der_chain(chain: Vec<Vec<u8>>) -> Credentials {
        Credentials {
            inner: Arc::new(CredsInner { chain, key: None }),
        }
    }

    /// Append one PEM-encoded certificate.
    ///
    /// Copy-on-write: handles sharing this chain keep seeing the old one.
    pub fn add_pem(&mut self, pem_cert: &str) -> Result<()> {
        let block = pem::parse(pem_cert.as_bytes())
            .map_err(|e| Error::Tls(format!("bad PEM certificate: {}", e)))?;
        if block.tag() != "CERTIFICATE" {
            return Err(Error::Tls(format!(
                "expected CERTIFICATE PEM block, got \"{}\"",
                block.tag()
            )));
        }

        // Copy-on-write keeps shared handles immutable.
        let inner = Arc::make_mut(&mut self.inner);
        inner.chain.push(block.contents().to_vec());
        Ok(())
    }

    /// DER certificates, leaf first.
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.inner.chain
    }

    /// Private key material, if loaded.
    pub fn key(&self) -> Option<&[u8]> {
        self.inner.key.as_deref()
    }

    /// Number of live handles sharing this chain.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Byte-equality of the concatenated chains.
    pub fn matches(&self, other: &Credentials) -> bool {
        self.inner.chain == other.inner.chain
    }

    /// Serialize the chain back to PEM.
    pub fn to_pem(&self) -> String {
        let mut out = String::new();
        for der in &self.inner.chain {
            out.push_str(&pem::encode(&pem::Pem::new("CERTIFICATE", der.clone())));
        }
        out
    }

    /// Check the leaf certificate's CN / SAN against `hostname`.
    ///
    /// Wildcards match in the leftmost label only (`*.example.com`
    /// matches `a.example.com` but not `a.b.example.com`).
    pub fn validate_for_name(&self, hostname: &str) -> bool {
        let Some(leaf) = self.inner.chain.first() else {
            return false;
        };
        let Ok((_, cert)) = X509Certificate::from_der(leaf) else {
            return false;
        };

        // SAN entries take precedence when present.
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            let mut saw_dns = false;
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    saw_dns = true;
                    if hostname_matches(dns, hostname) {
                        return true;
                    }
                }
            }
            if saw_dns {
                return false;
            }
        }

        match subject_common_name(&cert) {
            Some(cn) => hostname_matches(&cn, hostname),
            None => false,
        }
    }

    /// Nearest `not-after` across the chain, as seconds since the epoch.
    pub fn expiration(&self) -> Option<i64> {
        self.inner
            .chain
            .iter()
            .filter_map(|der| {
                X509Certificate::from_der(der)
                    .ok()
                    .map(|(_, cert)| cert.validity().not_after.timestamp())
            })
            .min()
    }

    fn is_empty(&self) -> bool {
        self.inner.chain.is_empty()
    }

    fn leaf_subject(&self) -> Option<String> {
        let leaf = self.inner.chain.first()?;
        let (_, cert) = X509Certificate::from_der(leaf).ok()?;
        Some(cert.subject().to_string())
    }

    fn leaf_not_before(&self) -> Option<i64> {
        let leaf = self.inner.chain.first()?;
        let (_, cert) = X509Certificate::from_der(leaf).ok()?;
        Some(cert.validity().not_before.timestamp())
    }

    fn parses(&self) -> bool {
        !self.is_empty()
            && self
                .inner
                .chain
                .iter()
                .all(|der| X509Certificate::from_der(der).is_ok())
    }
}

impl Default for Credentials {
    fn default() -> Credentials {
        Credentials::new()
    }
}

fn subject_common_name(cert: &X509Certificate<'_>) -> Option<String> {
    for rdn in cert.subject().iter() {
        for attr in rdn.iter() {
            if attr.attr_type() == &x509_parser::oid_registry::OID_X509_COMMON_NAME {
                if let Ok(cn) = attr.attr_value().as_str() {
                    return Some(cn.to_string());
                }
            }
        }
    }
    None
}

/// RFC 6125-style match: wildcard allowed in the leftmost label only, and
/// it spans exactly one label.
pub fn hostname_matches(pattern: &str, hostname: &str) -> bool {
    let pattern = pattern.trim_end_matches('.');
    let hostname = hostname.trim_end_matches('.');

    if let Some(suffix) = pattern.strip_prefix("*.") {
        match hostname.split_once('.') {
            Some((first, rest)) => !first.is_empty() && rest.eq_ignore_ascii_case(suffix),
            None => false,
        }
    } else {
        pattern.eq_ignore_ascii_case(hostname)
    }
}

// ============================================================================
// Trust evaluation
// ============================================================================

/// Outcome of a pinned-trust query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trust {
    /// Chain matches the pinned credentials.
    Ok,
    /// Chain is empty or does not parse.
    Invalid,
    /// Subject differs from the pinned chain.
    Changed,
    /// Chain (or pin) has passed its not-after date.
    Expired,
    /// Same subject as the pin but a newer not-before.
    Renewed,
    /// Hostname has no pinned credentials yet.
    Unknown,
}

/// Pure decision function; `now` in seconds since the epoch.
pub fn evaluate_trust(pinned: Option<&Credentials>, current: &Credentials, now: i64) -> Trust {
    if !current.parses() {
        return Trust::Invalid;
    }

    if let Some(expires) = current.expiration() {
        if expires < now {
            return Trust::Expired;
        }
    }

    let Some(pinned) = pinned else {
        return Trust::Unknown;
    };

    if current.matches(pinned) {
        return Trust::Ok;
    }

    match (
        current.leaf_subject(),
        pinned.leaf_subject(),
        current.leaf_not_before(),
        pinned.leaf_not_before(),
    ) {
        (Some(cur_subj), Some(pin_subj), Some(cur_nb), Some(pin_nb))
            if cur_subj == pin_subj && cur_nb > pin_nb =>
        {
            Trust::Renewed
        }
        _ => Trust::Changed,
    }
}

// ============================================================================
// Pinned-credential store
// ============================================================================

/// On-disk pin cache: one PEM file per hostname.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// Store under the user config path; `None` when there is none.
    pub fn new(ctx: &Context) -> Option<CredentialStore> {
        ctx.ssl_dir().map(|dir| CredentialStore { dir })
    }

    /// Store rooted at an explicit directory.
    pub fn with_dir(dir: PathBuf) -> CredentialStore {
        CredentialStore { dir }
    }

    fn path_for(&self, hostname: &str) -> PathBuf {
        self.dir.join(format!("{}.crt", hostname.to_ascii_lowercase()))
    }

    /// Load the pinned credentials for `hostname`, if any.
    pub fn load(&self, hostname: &str) -> Result<Option<Credentials>> {
        let path = self.path_for(hostname);

        match fs::symlink_metadata(&path) {
            Err(_) => return Ok(None),
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(Error::Tls(format!(
                    "refusing to follow symlink {}",
                    path.display()
                )))
            }
            Ok(_) => {}
        }

        let data = fs::read_to_string(&path).map_err(Error::Io)?;
        Credentials::from_pem(&data).map(Some)
    }

    /// Pin `creds` for `hostname` (0700 directory, 0600 file, no symlinks).
    pub fn save(&self, hostname: &str, creds: &Credentials) -> Result<()> {
        create_private_dir(&self.dir)?;

        let path = self.path_for(hostname);
        if let Ok(meta) = fs::symlink_metadata(&path) {
            if meta.file_type().is_symlink() {
                return Err(Error::Tls(format!(
                    "refusing to follow symlink {}",
                    path.display()
                )));
            }
        }

        let mut file = open_private(&path)?;
        file.write_all(creds.to_pem().as_bytes()).map_err(Error::Io)?;
        Ok(())
    }

    /// Evaluate `current` against the pin for `hostname`.
    pub fn trust(&self, hostname: &str, current: &Credentials) -> Trust {
        let pinned = match self.load(hostname) {
            Ok(p) => p,
            Err(_) => None,
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        evaluate_trust(pinned.as_ref(), current, now)
    }
}

fn create_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .map_err(Error::Io)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir).map_err(Error::Io)
    }
}

fn open_private(path: &Path) -> Result<fs::File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(Error::Io)
    }
    #[cfg(not(unix))]
    {
        fs::File::create(path).map_err(Error::Io)
    }
}
