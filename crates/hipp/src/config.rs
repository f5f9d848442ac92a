// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global configuration - single source of truth.
//!
//! This module centralizes protocol constants and per-caller runtime context.
//! **NEVER hardcode ports or timeouts elsewhere!**
//!
//! Two levels:
//!
//! - **Level 1 (static)**: compile-time constants (ports, timeouts, ceilings).
//! - **Level 2 (dynamic)**: [`Context`], the explicit per-caller state that
//!   replaces process-wide globals (scheduler address, config directories,
//!   user default destination).

use std::env;
use std::path::{Path, PathBuf};

// =======================================================================
// Ports
// =======================================================================

/// IANA-registered IPP port.
pub const IPP_PORT: u16 = 631;

/// mDNS port (RFC 6762 Sec.5).
pub const MDNS_PORT: u16 = 5353;

/// mDNS IPv4 multicast group (RFC 6762 Sec.3).
pub const MDNS_GROUP_V4: [u8; 4] = [224, 0, 0, 251];

// =======================================================================
// Timeouts and ceilings
// =======================================================================

/// Default wait for blocking reads when no timeout is configured.
pub const BLOCKING_READ_MSEC: i64 = 60_000;

/// Default wait for non-blocking reads.
pub const NONBLOCKING_READ_MSEC: i64 = 10_000;

/// Budget for the `Upgrade: TLS` handshake exchange.
pub const TLS_UPGRADE_MSEC: i64 = 30_000;

/// Fallback deadline for a one-shot DNS-SD resolve.
pub const DNSSD_RESOLVE_MSEC: i64 = 75_000;

/// Poll interval for the destination enumeration loop.
pub const ENUM_POLL_MSEC: u64 = 100;

/// Safety ceiling for read-until-close bodies.
///
/// Exceeding the ceiling is a protocol error, never a silent truncation.
pub const MAX_UNKNOWN_BODY: u64 = i32::MAX as u64;

/// Maximum digest authentication retries before surfacing the 401.
pub const MAX_DIGEST_RETRIES: u32 = 3;

// =======================================================================
// Runtime context
// =======================================================================

/// Explicit per-caller context.
///
/// Resolves the environment once at construction time; every public
/// operation that used to consult process-wide state takes a `&Context`
/// instead.
#[derive(Clone, Debug)]
pub struct Context {
    /// Scheduler host from `CUPS_SERVER`, or `localhost`.
    server: String,
    /// Scheduler port from `IPP_PORT`, or 631.
    port: u16,
    /// System configuration directory (`CUPS_SYSCONFIG` or `/etc/cups`).
    sysconfig: PathBuf,
    /// User configuration directory (`CUPS_USERCONFIG` or `~/.cups`),
    /// absent when no home directory can be determined.
    userconfig: Option<PathBuf>,
    /// User default destination from `LPDEST` or `PRINTER`.
    user_default: Option<String>,
    /// `CUPS_DISABLE_APPLE_DEFAULT` / `CUPS_NO_APPLE_DEFAULT` seen.
    apple_default_disabled: bool,
}

impl Context {
    /// Build a context from the process environment.
    pub fn new() -> Context {
        let server = env::var("CUPS_SERVER")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "localhost".to_string());

        let port = env::var("IPP_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(IPP_PORT);

        let sysconfig = env::var_os("CUPS_SYSCONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/etc/cups"));

        let userconfig = env::var_os("CUPS_USERCONFIG").map(PathBuf::from).or_else(|| {
            env::var_os("HOME").map(|home| {
                let mut p = PathBuf::from(home);
                p.push(".cups");
                p
            })
        });

        // LPDEST wins over PRINTER; "unknown" is the historical lp(1)
        // placeholder and is ignored.
        let user_default = env::var("LPDEST")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| env::var("PRINTER").ok().filter(|s| !s.is_empty() && s != "unknown"));

        let apple_default_disabled = env::var_os("CUPS_DISABLE_APPLE_DEFAULT").is_some()
            || env::var_os("CUPS_NO_APPLE_DEFAULT").is_some();

        Context {
            server,
            port,
            sysconfig,
            userconfig,
            user_default,
            apple_default_disabled,
        }
    }

    /// Scheduler hostname.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Scheduler port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the scheduler is on this host.
    pub fn server_is_local(&self) -> bool {
        self.server == "localhost"
            || self.server.starts_with('/')
            || self.server == "127.0.0.1"
            || self.server == "[::1]"
    }

    /// System configuration directory.
    pub fn sysconfig(&self) -> &Path {
        &self.sysconfig
    }

    /// User configuration directory, if one exists for this process.
    pub fn userconfig(&self) -> Option<&Path> {
        self.userconfig.as_deref()
    }

    /// `NAME` or `NAME/INSTANCE` from `LPDEST`/`PRINTER`.
    pub fn user_default(&self) -> Option<&str> {
        self.user_default.as_deref()
    }

    /// Whether macOS location-based defaults were disabled by environment.
    pub fn apple_default_disabled(&self) -> bool {
        self.apple_default_disabled
    }

    /// Path of the system `lpoptions` file.
    pub fn sys_lpoptions(&self) -> PathBuf {
        self.sysconfig.join("lpoptions")
    }

    /// Path of the user `lpoptions` file, if a user config dir exists.
    pub fn user_lpoptions(&self) -> Option<PathBuf> {
        self.userconfig.as_ref().map(|d| d.join("lpoptions"))
    }

    /// Directory holding pinned credentials, one PEM file per hostname.
    pub fn ssl_dir(&self) -> Option<PathBuf> {
        self.userconfig.as_ref().map(|d| d.join("ssl"))
    }

    /// Directory holding OAuth/JWT tokens, one file per issuer/resource pair.
    pub fn oauth_dir(&self) -> Option<PathBuf> {
        self.userconfig.as_ref().map(|d| d.join("oauth"))
    }

    // Test hook: build a context with explicit directories, bypassing env.
    #[cfg(test)]
    pub(crate) fn for_test(sysconfig: PathBuf, userconfig: Option<PathBuf>) -> Context {
        Context {
            server: "localhost".to_string(),
            port: IPP_PORT,
            sysconfig,
            userconfig,
            user_default: None,
            apple_default_disabled: false,
        }
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_paths() {
        let ctx = Context::for_test(PathBuf::from("/etc/cups"), Some(PathBuf::from("/home/u/.cups")));
        assert_eq!(ctx.sys_lpoptions(), PathBuf::from("/etc/cups/lpoptions"));
        assert_eq!(
            ctx.user_lpoptions().unwrap(),
            PathBuf::from("/home/u/.cups/lpoptions")
        );
        assert_eq!(ctx.ssl_dir().unwrap(), PathBuf::from("/home/u/.cups/ssl"));
        assert_eq!(ctx.oauth_dir().unwrap(), PathBuf::from("/home/u/.cups/oauth"));
    }

    #[test]
    fn test_server_is_local() {
        let ctx = Context::for_test(PathBuf::from("/etc/cups"), None);
        assert!(ctx.server_is_local());
    }
}
