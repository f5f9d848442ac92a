// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TXT-record interpretation for discovered printers.
//!
//! The TXT record carries `key=value` metadata; the interesting keys
//! become destination options, a `printer-type` bitmask is derived (or
//! taken verbatim from an explicit `printer-type=` key, which marks the
//! announcer as a CUPS server), and printers whose `pdl` offers none of
//! PDF, PWG raster, or Apple raster are dropped as incompatible.

use crate::dest::options::PrinterType;
use crate::dest::Destination;
use crate::http::uri::assemble_service_uri;

/// Create a local queue name from a service instance name.
///
/// Alphanumerics pass through; every other run of characters collapses
/// to a single underscore, and a trailing underscore is trimmed unless it
/// is the only character.
pub fn queue_name(service_name: &str) -> String {
    let mut name = String::with_capacity(service_name.len());
    for c in service_name.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }
    if name.len() > 1 && name.ends_with('_') {
        name.pop();
    }
    name
}

/// What the TXT record told us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxtOutcome {
    /// Options populated; the service is usable.
    Compatible,
    /// No supported page description language; drop the service.
    Incompatible,
}

/// Parse raw TXT rdata (length-prefixed `key=value` strings).
fn txt_pairs(rdata: &[u8]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut i = 0;

    while i < rdata.len() {
        let len = rdata[i] as usize;
        i += 1;
        if len == 0 || i + len > rdata.len() {
            break;
        }
        let entry = &rdata[i..i + len];
        i += len;

        let Some(eq) = entry.iter().position(|&b| b == b'=') else {
            continue;
        };
        pairs.push((
            String::from_utf8_lossy(&entry[..eq]).into_owned(),
            String::from_utf8_lossy(&entry[eq + 1..]).into_owned(),
        ));
    }

    pairs
}

fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("t")
}

fn pdl_is_supported(value: &str) -> bool {
    value.split(',').map(str::trim).any(|pdl| {
        pdl.eq_ignore_ascii_case("application/pdf")
            || pdl.eq_ignore_ascii_case("image/pwg-raster")
            || pdl.eq_ignore_ascii_case("image/urf")
    })
}

/// Populate `dest` from a TXT record.
///
/// `fullname` is the decoded full service name (used for the assembled
/// `device-uri`), `regtype` selects the `ipp`/`ipps` scheme.  Returns the
/// outcome plus the final printer type.
pub fn apply_txt(
    dest: &mut Destination,
    regtype: &str,
    fullname: &str,
    rdata: &[u8],
) -> (TxtOutcome, PrinterType) {
    let mut printer_type = PrinterType::DISCOVERED | PrinterType::BW;
    let mut saw_printer_type = false;
    let mut outcome = TxtOutcome::Compatible;

    let mut make = String::new();
    let mut model = "Unknown".to_string();

    for (key, value) in txt_pairs(rdata) {
        if key.eq_ignore_ascii_case("usb_MFG")
            || key.eq_ignore_ascii_case("usb_MANU")
            || key.eq_ignore_ascii_case("usb_MANUFACTURER")
        {
            make = value;
        } else if key.eq_ignore_ascii_case("usb_MDL") || key.eq_ignore_ascii_case("usb_MODEL") {
            model = value;
        } else if key.eq_ignore_ascii_case("product") && !value.contains("Ghostscript") {
            // Historical form is parenthesized: "(HP LaserJet 4)"
            let trimmed = value
                .strip_prefix('(')
                .map(|v| v.strip_suffix(')').unwrap_or(v))
                .unwrap_or(&value);
            model = trimmed.to_string();
        } else if key.eq_ignore_ascii_case("ty") {
            model = value.split(',').next().unwrap_or("").to_string();
        } else if key.eq_ignore_ascii_case("note") {
            dest.options.set("printer-location", &value);
        } else if key.eq_ignore_ascii_case("pdl") {
            if !pdl_is_supported(&value) {
                outcome = TxtOutcome::Incompatible;
            }
        } else if key.eq_ignore_ascii_case("printer-type") {
            // NNNN or 0xXXXX; an explicit type comes from a CUPS server
            // and overrides everything inferred.
            saw_printer_type = true;
            let parsed = if let Some(hex) =
                value.strip_prefix("0x").or_else(|| value.strip_prefix("0X"))
            {
                u32::from_str_radix(hex, 16).unwrap_or(0)
            } else {
                value.parse::<u32>().unwrap_or(0)
            };
            printer_type = PrinterType(parsed) | PrinterType::DISCOVERED;
        } else if !saw_printer_type {
            if key.eq_ignore_ascii_case("air") && is_true(&value) {
                printer_type |= PrinterType::AUTHENTICATED;
            } else if key.eq_ignore_ascii_case("bind") && is_true(&value) {
                printer_type |= PrinterType::BIND;
            } else if key.eq_ignore_ascii_case("collate") && is_true(&value) {
                printer_type |= PrinterType::COLLATE;
            } else if key.eq_ignore_ascii_case("color") && is_true(&value) {
                printer_type |= PrinterType::COLOR;
            } else if key.eq_ignore_ascii_case("copies") && is_true(&value) {
                printer_type |= PrinterType::COPIES;
            } else if key.eq_ignore_ascii_case("duplex") && is_true(&value) {
                printer_type |= PrinterType::DUPLEX;
            } else if (key.eq_ignore_ascii_case("fax") || key.eq_ignore_ascii_case("scan"))
                && is_true(&value)
            {
                printer_type |= PrinterType::MFP;
            } else if key.eq_ignore_ascii_case("papercustom") && is_true(&value) {
                printer_type |= PrinterType::VARIABLE;
            } else if key.eq_ignore_ascii_case("papermax") {
                if value.eq_ignore_ascii_case("legal-a4") {
                    printer_type |= PrinterType::SMALL;
                } else if value.eq_ignore_ascii_case("isoc-a2") {
                    printer_type |= PrinterType::MEDIUM;
                } else if value.eq_ignore_ascii_case(">isoc-a2") {
                    printer_type |= PrinterType::LARGE;
                }
            } else if key.eq_ignore_ascii_case("punch") && is_true(&value) {
                printer_type |= PrinterType::PUNCH;
            } else if key.eq_ignore_ascii_case("sort") && is_true(&value) {
                printer_type |= PrinterType::SORT;
            } else if key.eq_ignore_ascii_case("staple") && is_true(&value) {
                printer_type |= PrinterType::STAPLE;
            }
        }
    }

    // printer-make-and-model from make + model.
    if make.is_empty() {
        dest.options.set("printer-make-and-model", &model);
    } else {
        dest.options
            .set("printer-make-and-model", &format!("{} {}", make, model));
    }

    dest.options.set("printer-type", &printer_type.to_string());

    // Assemble the device URI; CUPS-hosted queues (explicit printer-type)
    // live under /cups.
    let scheme = if regtype.starts_with("_ipps") {
        "ipps"
    } else {
        "ipp"
    };
    let resource = if saw_printer_type { "/cups" } else { "/" };
    dest.options
        .set("device-uri", &assemble_service_uri(scheme, fullname, resource));

    (outcome, printer_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnssd::wire::{encode_txt, txt_rdata};

    fn rdata_of(pairs: &[(&str, &str)]) -> Vec<u8> {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        txt_rdata(&encode_txt(&pairs))
    }

    #[test]
    fn test_queue_name_sanitization() {
        assert_eq!(queue_name("Acme Laser (01:23:45)"), "Acme_Laser_01_23_45");
        assert_eq!(queue_name("Photo"), "Photo");
        assert_eq!(queue_name("A  B"), "A_B");
        assert_eq!(queue_name("!"), "_");
        assert_eq!(queue_name("Trailing!"), "Trailing");
    }

    #[test]
    fn test_apply_txt_model_and_uri() {
        let mut dest = Destination::new("Photo", None);
        let rdata = rdata_of(&[("ty", "Photo Printer"), ("pdl", "application/pdf,image/urf")]);

        let (outcome, ptype) = apply_txt(&mut dest, "_ipp._tcp", "Photo._ipp._tcp.local", &rdata);

        assert_eq!(outcome, TxtOutcome::Compatible);
        assert!(ptype.contains(PrinterType::DISCOVERED));
        assert_eq!(dest.option("printer-make-and-model"), Some("Photo Printer"));
        assert_eq!(
            dest.option("device-uri"),
            Some("ipp://Photo._ipp._tcp.local/")
        );
    }

    #[test]
    fn test_apply_txt_incompatible_pdl() {
        let mut dest = Destination::new("Legacy", None);
        let rdata = rdata_of(&[("pdl", "application/postscript,application/vnd.hp-PCL")]);

        let (outcome, _) = apply_txt(&mut dest, "_ipp._tcp", "Legacy._ipp._tcp.local", &rdata);
        assert_eq!(outcome, TxtOutcome::Incompatible);
    }

    #[test]
    fn test_apply_txt_type_inference() {
        let mut dest = Destination::new("Fancy", None);
        let rdata = rdata_of(&[
            ("pdl", "image/pwg-raster"),
            ("color", "T"),
            ("duplex", "t"),
            ("staple", "t"),
            ("papermax", "legal-a4"),
            ("fax", "f"),
        ]);

        let (_, ptype) = apply_txt(&mut dest, "_ipp._tcp", "Fancy._ipp._tcp.local", &rdata);
        assert!(ptype.contains(PrinterType::COLOR));
        assert!(ptype.contains(PrinterType::DUPLEX));
        assert!(ptype.contains(PrinterType::STAPLE));
        assert!(ptype.contains(PrinterType::SMALL));
        assert!(!ptype.contains(PrinterType::MFP));
    }

    #[test]
    fn test_apply_txt_explicit_printer_type() {
        let mut dest = Destination::new("CupsQueue", None);
        let rdata = rdata_of(&[
            ("printer-type", "0x8090c"),
            ("pdl", "application/pdf"),
            // Inferred keys after an explicit type are ignored.
            ("staple", "t"),
        ]);

        let (_, ptype) = apply_txt(
            &mut dest,
            "_ipps._tcp",
            "CupsQueue._ipps._tcp.local",
            &rdata,
        );
        assert!(ptype.contains(PrinterType::DISCOVERED));
        assert!(ptype.contains(PrinterType::COLOR));
        assert!(!ptype.contains(PrinterType::STAPLE));
        // Explicit type means a CUPS server: /cups resource, ipps scheme.
        assert_eq!(
            dest.option("device-uri"),
            Some("ipps://CupsQueue._ipps._tcp.local/cups")
        );
    }

    #[test]
    fn test_apply_txt_make_model_concat() {
        let mut dest = Destination::new("X", None);
        let rdata = rdata_of(&[
            ("usb_MFG", "Acme"),
            ("usb_MDL", "LaserWriter 9000"),
            ("pdl", "application/pdf"),
        ]);

        apply_txt(&mut dest, "_ipp._tcp", "X._ipp._tcp.local", &rdata);
        assert_eq!(
            dest.option("printer-make-and-model"),
            Some("Acme LaserWriter 9000")
        );
    }

    #[test]
    fn test_apply_txt_product_parens() {
        let mut dest = Destination::new("X", None);
        let rdata = rdata_of(&[("product", "(HP LaserJet 4)"), ("pdl", "application/pdf")]);
        apply_txt(&mut dest, "_ipp._tcp", "X._ipp._tcp.local", &rdata);
        assert_eq!(dest.option("printer-make-and-model"), Some("HP LaserJet 4"));
    }

    #[test]
    fn test_apply_txt_note_becomes_location() {
        let mut dest = Destination::new("X", None);
        let rdata = rdata_of(&[("note", "2nd floor"), ("pdl", "application/pdf")]);
        apply_txt(&mut dest, "_ipp._tcp", "X._ipp._tcp.local", &rdata);
        assert_eq!(dest.option("printer-location"), Some("2nd floor"));
    }
}
