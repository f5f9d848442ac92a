// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RFC 6763 service-name escaping.
//!
//! DNS-SD full names are dotted strings whose instance label may itself
//! contain dots, backslashes, and arbitrary bytes.  On the textual side
//! `.` and `\` are escaped with a backslash and bytes outside printable
//! ASCII use a 3-digit decimal escape (`\226\128\166`).

/// Escape one label for inclusion in a dotted full name.
pub fn escape_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for &b in label.as_bytes() {
        match b {
            b'.' | b'\\' => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\{:03}", b)),
        }
    }
    out
}

/// Remove backslash escapes (`\.`, `\\`, `\DDD`).
pub fn unquote(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let next = bytes[i + 1];
            if next.is_ascii_digit() && i + 3 < bytes.len() + 1 {
                // Up to three decimal digits
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 3 && i + 1 + digits < bytes.len() && bytes[i + 1 + digits].is_ascii_digit() {
                    value = value * 10 + u32::from(bytes[i + 1 + digits] - b'0');
                    digits += 1;
                }
                out.push((value & 0xFF) as u8);
                i += 1 + digits;
            } else {
                out.push(next);
                i += 2;
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Split a dotted name into decoded labels, honoring escapes.
pub fn split_labels(name: &str) -> Vec<String> {
    let mut labels = Vec::new();
    let mut current = String::new();
    let mut chars = name.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push('\\');
                if let Some(next) = chars.next() {
                    current.push(next);
                    if next.is_ascii_digit() {
                        for _ in 0..2 {
                            if let Some(d) = chars.clone().next() {
                                if d.is_ascii_digit() {
                                    current.push(d);
                                    chars.next();
                                }
                            }
                        }
                    }
                }
            }
            '.' => {
                labels.push(unquote(&current));
                current.clear();
            }
            other => current.push(other),
        }
    }
    if !current.is_empty() {
        labels.push(unquote(&current));
    }
    labels
}

/// Assemble `instance.regtype.domain` with proper escaping.
pub fn assemble_fullname(instance: &str, regtype: &str, domain: &str) -> String {
    let domain = if domain.is_empty() { "local" } else { domain };
    format!(
        "{}.{}.{}",
        escape_label(instance),
        regtype.trim_matches('.'),
        domain.trim_matches('.')
    )
}

/// Whether a hostname is link-local (`.local` / `.local.` suffix).
pub fn is_local_hostname(host: &str) -> bool {
    let host = host.trim_end_matches('.');
    host.eq_ignore_ascii_case("local") || host.to_ascii_lowercase().ends_with(".local")
}

/// Break a full name into `(instance, regtype, domain)`.
///
/// The registration type is found at the first label starting with `_`;
/// everything before it (unescaped) is the instance, the two `_` labels
/// are the regtype, and the rest is the domain.
pub fn decode_fullname(fullname: &str) -> Option<(String, String, String)> {
    let labels = split_labels(fullname);
    let reg_start = labels.iter().position(|l| l.starts_with('_'))?;
    if reg_start == 0 || labels.len() < reg_start + 2 {
        return None;
    }

    let instance = labels[..reg_start].join(".");
    let regtype = format!("{}.{}", labels[reg_start], labels[reg_start + 1]);
    let domain = labels[reg_start + 2..].join(".");
    Some((instance, regtype, domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_label_basics() {
        assert_eq!(escape_label("Photo"), "Photo");
        assert_eq!(escape_label("My.Printer"), "My\\.Printer");
        assert_eq!(escape_label("Back\\slash"), "Back\\\\slash");
        assert_eq!(escape_label("caf\u{e9}"), "caf\\195\\169");
    }

    #[test]
    fn test_unquote_round_trip() {
        for s in ["Photo", "My.Printer", "Back\\slash", "caf\u{e9}", "A (B)"] {
            assert_eq!(unquote(&escape_label(s)), s, "sample {:?}", s);
        }
    }

    #[test]
    fn test_unquote_decimal() {
        assert_eq!(unquote("\\226\\128\\166"), "\u{2026}");
    }

    #[test]
    fn test_assemble_and_decode() {
        let fullname = assemble_fullname("My.Printer", "_ipp._tcp", "local");
        assert_eq!(fullname, "My\\.Printer._ipp._tcp.local");

        let (instance, regtype, domain) = decode_fullname(&fullname).unwrap();
        assert_eq!(instance, "My.Printer");
        assert_eq!(regtype, "_ipp._tcp");
        assert_eq!(domain, "local");
    }

    #[test]
    fn test_decode_fullname_plain() {
        let (instance, regtype, domain) = decode_fullname("Photo._ipp._tcp.local").unwrap();
        assert_eq!(instance, "Photo");
        assert_eq!(regtype, "_ipp._tcp");
        assert_eq!(domain, "local");
    }

    #[test]
    fn test_decode_fullname_rejects_garbage() {
        assert!(decode_fullname("noservice.local").is_none());
        assert!(decode_fullname("_ipp._tcp.local").is_none());
    }

    #[test]
    fn test_is_local_hostname() {
        assert!(is_local_hostname("printer.local"));
        assert!(is_local_hostname("printer.LOCAL."));
        assert!(!is_local_hostname("printer.example.com"));
        assert!(!is_local_hostname("mylocal"));
    }

    #[test]
    fn test_split_labels_escaped_dot() {
        let labels = split_labels("A\\.B._ipp._tcp.local");
        assert_eq!(labels, vec!["A.B", "_ipp", "_tcp", "local"]);
    }
}
