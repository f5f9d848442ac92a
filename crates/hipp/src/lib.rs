// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HIPP - High-performance IPP client runtime
//!
//! A pure Rust implementation of the client-side printing runtime:
//! discover printers over DNS-SD, merge them with user preferences, and
//! carry IPP requests over HTTP/1.1 with TLS, compression, and digest
//! authentication.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hipp::{Context, EnumOptions, Result};
//!
//! fn main() -> Result<()> {
//!     let ctx = Context::new();
//!
//!     // Stream destinations: local queues first, then discoveries.
//!     for dest in hipp::dest::enumerate(&ctx, EnumOptions::default())? {
//!         println!("{}{}", dest.full_name(), if dest.is_default { " (default)" } else { "" });
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        Application Layer                            |
//! |        enumerate / get_dests -> Destination -> HttpConnection       |
//! +---------------------------------------------------------------------+
//! |                          Resolver Layer                             |
//! |   lpoptions overlays | Get-Printers fetch | DNS-SD browse + TXT     |
//! +---------------------------------------------------------------------+
//! |                           HTTP Layer                                |
//! |   State machine | Fields | Chunking | Codings | Digest | Upgrade    |
//! +---------------------------------------------------------------------+
//! |                        Transport Layer                              |
//! |   AddrList resolve | cancellable connect | TCP / Unix / TLS         |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Context`] | Explicit per-caller configuration (env, config paths) |
//! | [`HttpConnection`] | One client or server HTTP/1.1 connection |
//! | [`Destination`] | A user-facing printer reference with options |
//! | [`DnssdContext`] | DNS-SD browse/query/resolve with a monitor thread |
//! | [`Credentials`] | Reference-counted X.509 chain with pinned trust |
//!
//! ## Modules Overview
//!
//! - [`dest`] - Destination enumeration and maintenance (start here)
//! - [`http`] - HTTP/1.1 engine
//! - [`dnssd`] - DNS-SD discovery (mDNS backend + backend trait)
//! - [`creds`] - Credential store and trust evaluation
//! - [`transport`] - Sockets, connect, readiness waits
//! - [`ipp`] - Minimal IPP request/response payloads
//!
//! ## See Also
//!
//! - [RFC 8010/8011](https://datatracker.ietf.org/doc/html/rfc8010) - IPP
//! - [RFC 7230-7235](https://datatracker.ietf.org/doc/html/rfc7230) - HTTP/1.1
//! - [RFC 7616](https://datatracker.ietf.org/doc/html/rfc7616) - Digest auth
//! - [RFC 6762/6763](https://datatracker.ietf.org/doc/html/rfc6763) - DNS-SD

/// Global configuration: constants plus the explicit [`Context`].
pub mod config;
/// X.509 credentials, pinning cache, and trust evaluation.
pub mod creds;
/// Destination model, overlays, and the enumeration pipeline.
pub mod dest;
/// DNS-SD browse/query/resolve over a pluggable backend.
pub mod dnssd;
/// Crate-wide error type.
pub mod error;
/// HTTP/1.1 engine (fields, framing, codings, auth, TLS upgrade).
pub mod http;
/// Minimal IPP payload builder and response walker.
pub mod ipp;
/// Socket transport underneath the HTTP engine.
pub mod transport;

pub use config::Context;
pub use creds::{CredentialStore, Credentials, Trust};
pub use dest::{
    enum_dests, get_dests, DestFlags, DestList, Destination, Destinations, EnumOptions, Options,
    PrinterType,
};
pub use dnssd::{DnssdBackend, DnssdContext};
pub use error::{Error, Result};
pub use http::{
    ConnectOptions, Encryption, HttpConnection, HttpField, HttpState, HttpStatus, HttpVersion,
    Method, TrustPolicy,
};
pub use transport::{AddrFamily, AddrList, Endpoint, HttpListener};

/// HIPP version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
