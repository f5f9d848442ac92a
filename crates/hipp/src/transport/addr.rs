// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint addresses and address-list resolution.
//!
//! A hostname resolves to an ordered list of candidate addresses; connect
//! tries each in turn and the first successful one wins.  Resolution is
//! lazy for plain hostnames so that a connection object can be created
//! without touching the resolver.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
#[cfg(unix)]
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Address family constraint for resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddrFamily {
    /// No constraint; prefer the widest family (IPv6 before IPv4).
    #[default]
    Any,
    /// IPv4 only.
    V4,
    /// IPv6 only.
    V6,
}

/// One candidate endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// A resolved socket address.
    Resolved(SocketAddr),
    /// A local-domain socket path.
    #[cfg(unix)]
    Unix(PathBuf),
    /// An unresolved host plus port, looked up lazily at connect time.
    Host { host: String, port: u16 },
}

/// Ordered list of endpoints to try.
#[derive(Clone, Debug)]
pub struct AddrList {
    endpoints: Vec<Endpoint>,
    family: AddrFamily,
}

impl AddrList {
    /// Build an address list for `host:port`.
    ///
    /// `host` may be an IP literal (IPv6 with or without brackets), a
    /// local-socket path starting with `/`, or a hostname.  Hostnames are
    /// kept unresolved until [`AddrList::resolved`] is called.
    pub fn new(host: &str, port: u16, family: AddrFamily) -> Result<AddrList> {
        if host.is_empty() {
            return Err(Error::invalid("empty hostname"));
        }

        #[cfg(unix)]
        if host.starts_with('/') {
            return Ok(AddrList {
                endpoints: vec![Endpoint::Unix(PathBuf::from(host))],
                family,
            });
        }

        let bare = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);

        let endpoints = if let Ok(ip) = bare.parse::<IpAddr>() {
            match (family, ip) {
                (AddrFamily::V4, IpAddr::V6(_)) | (AddrFamily::V6, IpAddr::V4(_)) => {
                    return Err(Error::invalid(format!(
                        "address {} does not match requested family",
                        host
                    )))
                }
                _ => vec![Endpoint::Resolved(SocketAddr::new(ip, port))],
            }
        } else {
            vec![Endpoint::Host {
                host: bare.to_string(),
                port,
            }]
        };

        Ok(AddrList { endpoints, family })
    }

    /// The raw endpoint list, in try-order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Resolve every endpoint to concrete addresses, in try-order.
    ///
    /// IPv6 addresses sort before IPv4 when the family is unconstrained
    /// (widest family first); a family constraint filters the results.
    pub fn resolved(&self) -> Result<Vec<Endpoint>> {
        let mut out = Vec::new();

        for ep in &self.endpoints {
            match ep {
                Endpoint::Resolved(_) => out.push(ep.clone()),
                #[cfg(unix)]
                Endpoint::Unix(_) => out.push(ep.clone()),
                Endpoint::Host { host, port } => {
                    let addrs = (host.as_str(), *port)
                        .to_socket_addrs()
                        .map_err(|e| Error::Resolve(format!("lookup of {} failed: {}", host, e)))?;

                    let mut v6 = Vec::new();
                    let mut v4 = Vec::new();
                    for addr in addrs {
                        match (self.family, addr) {
                            (AddrFamily::V4, SocketAddr::V6(_)) => {}
                            (AddrFamily::V6, SocketAddr::V4(_)) => {}
                            (_, a @ SocketAddr::V6(_)) => v6.push(Endpoint::Resolved(a)),
                            (_, a @ SocketAddr::V4(_)) => v4.push(Endpoint::Resolved(a)),
                        }
                    }
                    out.extend(v6);
                    out.extend(v4);
                }
            }
        }

        if out.is_empty() {
            return Err(Error::Resolve("no usable addresses".to_string()));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_literal_is_preresolved() {
        let list = AddrList::new("127.0.0.1", 631, AddrFamily::Any).unwrap();
        assert_eq!(
            list.endpoints(),
            &[Endpoint::Resolved("127.0.0.1:631".parse().unwrap())]
        );
    }

    #[test]
    fn test_bracketed_v6_literal() {
        let list = AddrList::new("[::1]", 631, AddrFamily::Any).unwrap();
        assert_eq!(
            list.endpoints(),
            &[Endpoint::Resolved("[::1]:631".parse().unwrap())]
        );
    }

    #[test]
    fn test_hostname_is_lazy() {
        let list = AddrList::new("printer.local", 631, AddrFamily::Any).unwrap();
        assert!(matches!(list.endpoints()[0], Endpoint::Host { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_path() {
        let list = AddrList::new("/run/cups/cups.sock", 0, AddrFamily::Any).unwrap();
        assert!(matches!(list.endpoints()[0], Endpoint::Unix(_)));
    }

    #[test]
    fn test_family_mismatch_rejected() {
        assert!(AddrList::new("127.0.0.1", 631, AddrFamily::V6).is_err());
        assert!(AddrList::new("[::1]", 631, AddrFamily::V4).is_err());
    }

    #[test]
    fn test_localhost_resolves() {
        let list = AddrList::new("localhost", 631, AddrFamily::Any).unwrap();
        let resolved = list.resolved().unwrap();
        assert!(!resolved.is_empty());
        for ep in resolved {
            match ep {
                Endpoint::Resolved(a) => assert!(a.ip().is_loopback()),
                other => panic!("unexpected endpoint {:?}", other),
            }
        }
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(AddrList::new("", 631, AddrFamily::Any).is_err());
    }
}
