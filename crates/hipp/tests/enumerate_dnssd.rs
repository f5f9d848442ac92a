// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! End-to-end destination enumeration over the loopback DNS-SD backend.
//!
//! Environment-dependent paths (`CUPS_SYSCONFIG`/`CUPS_USERCONFIG`) are
//! process-global, so everything runs inside one test function.

use std::fs;
use std::sync::Arc;

use hipp::dest::{self, queue_name, DestFlags, EnumOptions};
use hipp::dnssd::{DnssdBackend, LoopbackBackend};
use hipp::{Context, PrinterType};

fn txt(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn discovered_only(backend: Arc<LoopbackBackend>) -> EnumOptions {
    EnumOptions {
        msec: 5000,
        wanted: PrinterType::DISCOVERED,
        mask: PrinterType::DISCOVERED,
        cancel: None,
        backend: Some(backend as Arc<dyn DnssdBackend>),
    }
}

#[test]
fn test_enumeration_scenarios() {
    let tmp = tempfile::tempdir().unwrap();
    let sys = tmp.path().join("sys");
    let user = tmp.path().join("user");
    fs::create_dir_all(&sys).unwrap();
    fs::create_dir_all(&user).unwrap();

    std::env::set_var("CUPS_SYSCONFIG", &sys);
    std::env::set_var("CUPS_USERCONFIG", &user);
    std::env::remove_var("LPDEST");
    std::env::remove_var("PRINTER");

    // ------------------------------------------------------------------
    // Service-name sanitization: the discovered queue carries the
    // sanitized name, underscore runs collapsed and trailing trimmed.
    // ------------------------------------------------------------------
    assert_eq!(queue_name("Acme Laser (01:23:45)"), "Acme_Laser_01_23_45");

    let backend = Arc::new(LoopbackBackend::new());
    backend
        .register(
            1,
            "Acme Laser (01:23:45)",
            "_ipp._tcp",
            631,
            &txt(&[("pdl", "application/pdf"), ("ty", "Acme Laser Pro")]),
        )
        .unwrap();

    let ctx = Context::new();
    let dests = dest::get_dests(&ctx, discovered_only(backend)).unwrap();
    assert_eq!(dests.len(), 1);
    let found = dests.iter().next().unwrap();
    assert_eq!(found.name, "Acme_Laser_01_23_45");
    assert_eq!(found.option("printer-make-and-model"), Some("Acme Laser Pro"));

    // ------------------------------------------------------------------
    // Overlay merge with a default instance: the Photo/draft overlay
    // merges onto the discovered Photo service; overlay options win and
    // the default flag lands on the merged instance.
    // ------------------------------------------------------------------
    fs::write(
        user.join("lpoptions"),
        "Default Photo/draft media=na_letter_8.5x11in\nDest Photo/draft media=na_index-4x6_4x6in\n",
    )
    .unwrap();

    let backend = Arc::new(LoopbackBackend::new());
    backend
        .register(
            2,
            "Photo",
            "_ipp._tcp",
            631,
            &txt(&[("pdl", "application/pdf"), ("ty", "Photo Printer")]),
        )
        .unwrap();

    let ctx = Context::new();
    let mut deliveries = Vec::new();
    dest::enum_dests(&ctx, discovered_only(backend), |flags, dest| {
        assert!(!flags.contains(DestFlags::REMOVED));
        deliveries.push(dest.clone());
        true
    })
    .unwrap();

    assert_eq!(deliveries.len(), 1, "got {:?}", deliveries);
    let merged = &deliveries[0];
    assert_eq!(merged.name, "Photo");
    assert_eq!(merged.instance.as_deref(), Some("draft"));
    assert!(merged.is_default);
    assert_eq!(merged.option("media"), Some("na_index-4x6_4x6in"));
    assert_eq!(merged.option("printer-make-and-model"), Some("Photo Printer"));
    assert!(merged
        .option("device-uri")
        .unwrap()
        .starts_with("ipp://Photo._ipp._tcp.local"));

    // ------------------------------------------------------------------
    // IPPS preference: both registration types announce one instance and
    // the assembled device URI uses ipps.
    // ------------------------------------------------------------------
    fs::remove_file(user.join("lpoptions")).unwrap();

    let backend = Arc::new(LoopbackBackend::new());
    backend
        .register(
            3,
            "Secure",
            "_ipp._tcp",
            631,
            &txt(&[("pdl", "application/pdf")]),
        )
        .unwrap();
    backend
        .register(
            4,
            "Secure",
            "_ipps._tcp",
            631,
            &txt(&[("pdl", "application/pdf")]),
        )
        .unwrap();

    let ctx = Context::new();
    let dests = dest::get_dests(&ctx, discovered_only(backend)).unwrap();
    assert_eq!(dests.len(), 1);
    let secure = dests.iter().next().unwrap();
    assert!(
        secure.option("device-uri").unwrap().starts_with("ipps://"),
        "uri {:?}",
        secure.option("device-uri")
    );

    std::env::remove_var("CUPS_SYSCONFIG");
    std::env::remove_var("CUPS_USERCONFIG");
}
