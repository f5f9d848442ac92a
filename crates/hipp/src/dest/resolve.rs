// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resolution of `dnssd:`-style device URIs to connectable `ipp(s)` URIs.
//!
//! A destination whose URI host contains `._tcp` is backed by a DNS-SD
//! service; before connecting, the service is resolved one-shot with a
//! 75-second fallback deadline (or the caller's budget) and the resolved
//! URI replaces `device-uri` on the destination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::DNSSD_RESOLVE_MSEC;
use crate::dest::Destination;
use crate::dnssd::{DnssdBackend, DnssdContext};
use crate::error::{Error, Result};
use crate::http::uri::{assemble_uri, separate_uri, SeparatedUri};

/// Resolve the destination's `device-uri` in place and return the
/// resolved URI.
///
/// URIs without a `._tcp` service host pass through unchanged.  `msec`
/// of zero or less selects the 75 s fallback deadline; the cancel flag is
/// polled on a monotonic 100 ms cadence.
pub fn resolve_device_uri(
    dest: &mut Destination,
    msec: i64,
    cancel: Option<&AtomicBool>,
    backend: Option<Arc<dyn DnssdBackend>>,
) -> Result<String> {
    let uri = dest
        .device_uri()
        .ok_or_else(|| Error::invalid(format!("destination \"{}\" has no device-uri", dest.name)))?
        .to_string();

    if !uri.contains("._tcp") {
        return Ok(uri);
    }

    let parts = separate_uri(&uri)?;
    let Some((instance, regtype, domain)) = split_service_host(&parts.host) else {
        return Err(Error::invalid(format!("unresolvable service URI \"{}\"", uri)));
    };

    log::debug!("[DEST] resolving \"{}\" ({})", instance, regtype);

    let ctx = match backend {
        Some(backend) => DnssdContext::with_backend(backend, None),
        None => DnssdContext::new(None)?,
    };

    let (tx, rx) = mpsc::channel::<(String, u16, Vec<(String, String)>)>();
    let tx = std::sync::Mutex::new(tx);
    ctx.resolve(
        &instance,
        &regtype,
        &domain,
        Arc::new(
            move |_if_index: u32,
                  _fullname: &str,
                  host: &str,
                  port: u16,
                  txt: &[(String, String)]| {
                let _ = tx
                    .lock()
                    .unwrap()
                    .send((host.to_string(), port, txt.to_vec()));
            },
        ),
    )?;

    let deadline = Instant::now()
        + Duration::from_millis(if msec > 0 {
            msec as u64
        } else {
            DNSSD_RESOLVE_MSEC as u64
        });

    // Monotonic-time continue predicate: wake every 100 ms to check the
    // cancel flag against the deadline.
    let (host, port, txt) = loop {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
        }
        if Instant::now() >= deadline {
            return Err(Error::Resolve(format!(
                "\"{}\" did not resolve within the budget",
                instance
            )));
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(result) => break result,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(Error::Resolve("resolver went away".to_string()))
            }
        }
    };

    // Scheme from the registration type, resource from the TXT "rp" key.
    let scheme = if regtype.starts_with("_ipps") { "ipps" } else { "ipp" };
    let resource = txt
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("rp"))
        .map(|(_, v)| {
            if v.starts_with('/') {
                v.clone()
            } else {
                format!("/{}", v)
            }
        })
        .unwrap_or_else(|| "/".to_string());

    let resolved = assemble_uri(&SeparatedUri {
        scheme: scheme.to_string(),
        userpass: None,
        host: host.trim_end_matches('.').to_string(),
        port,
        explicit_port: true,
        resource,
    });

    dest.options.set("device-uri", &resolved);
    Ok(resolved)
}

fn split_service_host(host: &str) -> Option<(String, String, String)> {
    let pos = host.find("._ipp").or_else(|| host.find("._"))?;
    let instance = &host[..pos];
    let rest = &host[pos + 1..];
    let tcp = rest.find("._tcp")?;
    let regtype = &rest[..tcp + 5];
    let domain = rest[tcp + 5..].trim_start_matches('.');
    if instance.is_empty() {
        return None;
    }
    Some((
        instance.to_string(),
        regtype.to_string(),
        if domain.is_empty() {
            "local".to_string()
        } else {
            domain.to_string()
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnssd::LoopbackBackend;

    fn service_dest(uri: &str) -> Destination {
        let mut dest = Destination::new("Photo", None);
        dest.options.set("device-uri", uri);
        dest
    }

    #[test]
    fn test_non_service_uri_passthrough() {
        let mut dest = service_dest("ipp://printer.local:631/ipp/print");
        let resolved = resolve_device_uri(&mut dest, 1000, None, None).unwrap();
        assert_eq!(resolved, "ipp://printer.local:631/ipp/print");
    }

    #[test]
    fn test_resolve_replaces_uri() {
        let backend = Arc::new(LoopbackBackend::new());
        backend
            .register(
                1,
                "Photo",
                "_ipp._tcp",
                6310,
                &[("rp".to_string(), "ipp/print".to_string())],
            )
            .unwrap();

        let mut dest = service_dest("dnssd://Photo._ipp._tcp.local/");
        let resolved = resolve_device_uri(
            &mut dest,
            5000,
            None,
            Some(backend as Arc<dyn DnssdBackend>),
        )
        .unwrap();

        assert_eq!(resolved, "ipp://localhost:6310/ipp/print");
        assert_eq!(dest.device_uri(), Some("ipp://localhost:6310/ipp/print"));
    }

    #[test]
    fn test_resolve_timeout() {
        let backend = Arc::new(LoopbackBackend::new());
        let mut dest = service_dest("dnssd://Ghost._ipp._tcp.local/");

        let err = resolve_device_uri(
            &mut dest,
            300,
            None,
            Some(backend as Arc<dyn DnssdBackend>),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Resolve(_)));
    }

    #[test]
    fn test_resolve_cancelled() {
        let backend = Arc::new(LoopbackBackend::new());
        let cancel = AtomicBool::new(true);
        let mut dest = service_dest("dnssd://Ghost._ipp._tcp.local/");

        let err = resolve_device_uri(
            &mut dest,
            5000,
            Some(&cancel),
            Some(backend as Arc<dyn DnssdBackend>),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_split_service_host_variants() {
        assert_eq!(
            split_service_host("Photo._ipp._tcp.local"),
            Some(("Photo".into(), "_ipp._tcp".into(), "local".into()))
        );
        assert_eq!(
            split_service_host("Secure._ipps._tcp.example.org"),
            Some(("Secure".into(), "_ipps._tcp".into(), "example.org".into()))
        );
        assert_eq!(split_service_host("plain.host"), None);
    }
}
