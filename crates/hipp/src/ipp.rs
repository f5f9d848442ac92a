// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minimal IPP payload support.
//!
//! IPP stays opaque to this crate except for what the resolver needs: a
//! `Get-Printers` request builder and a response walker that flattens each
//! printer attribute group into `{name, value-as-string}` pairs.  Values
//! are stringified the way user-facing option lists expect: integers and
//! enums in decimal, booleans as `true`/`false`, ranges as `lo-hi`,
//! resolutions as `NxMdpi`, and multi-valued attributes comma-joined with
//! backslash escaping.

use crate::error::{Error, Result};

// ============================================================================
// Wire constants (RFC 8010)
// ============================================================================

/// Operation: Get-Printers (IPP Everywhere).
pub const OP_GET_PRINTERS: u16 = 0x004B;
/// Operation: CUPS-Get-Printers (CUPS scheduler extension).
pub const OP_CUPS_GET_PRINTERS: u16 = 0x4002;
/// Operation: CUPS-Get-Default.
pub const OP_CUPS_GET_DEFAULT: u16 = 0x4001;

const TAG_OPERATION: u8 = 0x01;
const TAG_END: u8 = 0x03;
const TAG_PRINTER: u8 = 0x04;

const VALUE_INTEGER: u8 = 0x21;
const VALUE_BOOLEAN: u8 = 0x22;
const VALUE_ENUM: u8 = 0x23;
const VALUE_DATETIME: u8 = 0x31;
const VALUE_RESOLUTION: u8 = 0x32;
const VALUE_RANGE: u8 = 0x33;
const VALUE_KEYWORD: u8 = 0x44;
const VALUE_URI: u8 = 0x45;
const VALUE_CHARSET: u8 = 0x47;
const VALUE_LANGUAGE: u8 = 0x48;

// ============================================================================
// Request builder
// ============================================================================

/// A request under construction.
pub struct IppRequest {
    operation: u16,
    request_id: u32,
    attrs: Vec<(u8, String, Vec<Vec<u8>>)>,
}

impl IppRequest {
    /// Start a request; the standard charset and language attributes are
    /// included automatically.
    pub fn new(operation: u16, request_id: u32) -> IppRequest {
        let mut req = IppRequest {
            operation,
            request_id,
            attrs: Vec::new(),
        };
        req.add_string(VALUE_CHARSET, "attributes-charset", "utf-8");
        req.add_string(VALUE_LANGUAGE, "attributes-natural-language", "en");
        req
    }

    fn add_string(&mut self, tag: u8, name: &str, value: &str) {
        self.attrs
            .push((tag, name.to_string(), vec![value.as_bytes().to_vec()]));
    }

    /// Add a `uri` attribute.
    pub fn add_uri(&mut self, name: &str, value: &str) {
        self.add_string(VALUE_URI, name, value);
    }

    /// Add a multi-valued `keyword` attribute.
    pub fn add_keywords(&mut self, name: &str, values: &[&str]) {
        self.attrs.push((
            VALUE_KEYWORD,
            name.to_string(),
            values.iter().map(|v| v.as_bytes().to_vec()).collect(),
        ));
    }

    /// Encode to the opaque byte buffer carried in the HTTP body.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&[0x02, 0x00]); // IPP/2.0
        out.extend_from_slice(&self.operation.to_be_bytes());
        out.extend_from_slice(&self.request_id.to_be_bytes());
        out.push(TAG_OPERATION);

        for (tag, name, values) in &self.attrs {
            for (i, value) in values.iter().enumerate() {
                out.push(*tag);
                if i == 0 {
                    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
                    out.extend_from_slice(name.as_bytes());
                } else {
                    // Additional value of the previous attribute.
                    out.extend_from_slice(&0u16.to_be_bytes());
                }
                out.extend_from_slice(&(value.len() as u16).to_be_bytes());
                out.extend_from_slice(value);
            }
        }

        out.push(TAG_END);
        out
    }
}

/// Build the `Get-Printers` request sent during destination enumeration.
pub fn get_printers_request(printer_uri: &str, cups_server: bool) -> Vec<u8> {
    let op = if cups_server {
        OP_CUPS_GET_PRINTERS
    } else {
        OP_GET_PRINTERS
    };
    let mut req = IppRequest::new(op, 1);
    if !cups_server {
        req.add_uri("system-uri", printer_uri);
    }
    req.add_keywords(
        "requested-attributes",
        &[
            "printer-name",
            "printer-uri-supported",
            "device-uri",
            "printer-info",
            "printer-location",
            "printer-make-and-model",
            "printer-state",
            "printer-state-reasons",
            "printer-type",
            "printer-is-accepting-jobs",
            "printer-is-shared",
        ],
    );
    req.encode()
}

// ============================================================================
// Response walker
// ============================================================================

/// One attribute group from a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IppGroup {
    /// Delimiter tag that opened the group (0x01..0x05).
    pub tag: u8,
    /// Attributes flattened to name/value strings, in wire order.
    pub options: Vec<(String, String)>,
}

impl IppGroup {
    /// Case-insensitive attribute lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A decoded response header plus its attribute groups.
#[derive(Clone, Debug)]
pub struct IppResponse {
    pub status: u16,
    pub request_id: u32,
    pub groups: Vec<IppGroup>,
}

impl IppResponse {
    /// Status in the `successful-ok` family.
    pub fn is_successful(&self) -> bool {
        self.status < 0x0100
    }

    /// Only the printer attribute groups.
    pub fn printer_groups(&self) -> impl Iterator<Item = &IppGroup> {
        self.groups.iter().filter(|g| g.tag == TAG_PRINTER)
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::protocol("truncated IPP message"))?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes([self.u8()?, self.u8()?]))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes([
            self.u8()?,
            self.u8()?,
            self.u8()?,
            self.u8()?,
        ]))
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::protocol("truncated IPP value"));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }
}

/// Stringify one value per its tag.
fn value_to_string(tag: u8, value: &[u8]) -> String {
    match tag {
        VALUE_INTEGER | VALUE_ENUM => {
            if value.len() == 4 {
                i32::from_be_bytes([value[0], value[1], value[2], value[3]]).to_string()
            } else {
                String::new()
            }
        }
        VALUE_BOOLEAN => {
            if value.first() == Some(&1) {
                "true".to_string()
            } else {
                "false".to_string()
            }
        }
        VALUE_RANGE => {
            if value.len() == 8 {
                let lower = i32::from_be_bytes([value[0], value[1], value[2], value[3]]);
                let upper = i32::from_be_bytes([value[4], value[5], value[6], value[7]]);
                if lower == upper {
                    lower.to_string()
                } else {
                    format!("{}-{}", lower, upper)
                }
            } else {
                String::new()
            }
        }
        VALUE_RESOLUTION => {
            if value.len() == 9 {
                let x = i32::from_be_bytes([value[0], value[1], value[2], value[3]]);
                let y = i32::from_be_bytes([value[4], value[5], value[6], value[7]]);
                let units = if value[8] == 4 { "dpc" } else { "dpi" };
                if x == y {
                    format!("{}{}", x, units)
                } else {
                    format!("{}x{}{}", x, y, units)
                }
            } else {
                String::new()
            }
        }
        VALUE_DATETIME => {
            if value.len() == 11 {
                let year = u16::from_be_bytes([value[0], value[1]]);
                format!(
                    "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
                    year, value[2], value[3], value[4], value[5], value[6]
                )
            } else {
                String::new()
            }
        }
        _ => String::from_utf8_lossy(value).into_owned(),
    }
}

/// Escape a value for inclusion in a comma-joined list.
fn escape_listed(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ' ' | '\t' | '\n' | '\\' | '\'' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Decode a response into attribute groups of name/value strings.
///
/// Multi-valued attributes become one comma-joined string; single string
/// values are passed through unescaped.
pub fn decode_response(data: &[u8]) -> Result<IppResponse> {
    let mut r = Reader { data, pos: 0 };

    let _version_major = r.u8()?;
    let _version_minor = r.u8()?;
    let status = r.u16()?;
    let request_id = r.u32()?;

    let mut groups: Vec<IppGroup> = Vec::new();
    let mut current: Option<IppGroup> = None;
    // (tag, name, raw values) of the attribute being accumulated
    let mut pending: Option<(u8, String, Vec<String>)> = None;

    loop {
        let Some(byte) = r.peek() else {
            return Err(Error::protocol("IPP message missing end tag"));
        };

        if byte <= 0x0F {
            // Delimiter: flush the pending attribute and group.
            r.u8()?;
            if let (Some(group), Some(attr)) = (current.as_mut(), pending.take()) {
                push_attr(group, attr);
            }
            if let Some(group) = current.take() {
                groups.push(group);
            }
            if byte == TAG_END {
                break;
            }
            current = Some(IppGroup {
                tag: byte,
                options: Vec::new(),
            });
            continue;
        }

        // Attribute (or additional value when the name is empty).
        let tag = r.u8()?;
        let name_len = r.u16()? as usize;
        let name = String::from_utf8_lossy(r.bytes(name_len)?).into_owned();
        let value_len = r.u16()? as usize;
        let value = value_to_string(tag, r.bytes(value_len)?);

        let group = current
            .as_mut()
            .ok_or_else(|| Error::protocol("IPP attribute outside any group"))?;

        if name.is_empty() {
            match pending.as_mut() {
                Some((_, _, values)) => values.push(value),
                None => return Err(Error::protocol("IPP additional value without attribute")),
            }
        } else {
            if let Some(attr) = pending.take() {
                push_attr(group, attr);
            }
            pending = Some((tag, name, vec![value]));
        }
    }

    Ok(IppResponse {
        status,
        request_id,
        groups,
    })
}

fn push_attr(group: &mut IppGroup, (tag, name, values): (u8, String, Vec<String>)) {
    let joined = if values.len() == 1 && !matches!(tag, VALUE_INTEGER | VALUE_ENUM | VALUE_BOOLEAN | VALUE_RANGE)
    {
        values.into_iter().next().unwrap_or_default()
    } else {
        values
            .iter()
            .map(|v| escape_listed(v))
            .collect::<Vec<_>>()
            .join(",")
    };
    group.options.push((name, joined));
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-build a response: header + groups of (tag, name, value bytes).
    fn build_response(groups: &[(u8, Vec<(u8, &str, Vec<u8>)>)]) -> Vec<u8> {
        let mut out = vec![0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
        for (delim, attrs) in groups {
            out.push(*delim);
            for (tag, name, value) in attrs {
                out.push(*tag);
                out.extend_from_slice(&(name.len() as u16).to_be_bytes());
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(&(value.len() as u16).to_be_bytes());
                out.extend_from_slice(value);
            }
        }
        out.push(TAG_END);
        out
    }

    #[test]
    fn test_request_encoding_shape() {
        let req = IppRequest::new(OP_CUPS_GET_PRINTERS, 42);
        let bytes = req.encode();

        assert_eq!(&bytes[..2], &[0x02, 0x00]);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), OP_CUPS_GET_PRINTERS);
        assert_eq!(u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 42);
        assert_eq!(bytes[8], TAG_OPERATION);
        assert_eq!(*bytes.last().unwrap(), TAG_END);

        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("attributes-charset"));
        assert!(text.contains("utf-8"));
        assert!(text.contains("attributes-natural-language"));
    }

    #[test]
    fn test_multi_keyword_uses_empty_names() {
        let mut req = IppRequest::new(OP_GET_PRINTERS, 1);
        req.add_keywords("requested-attributes", &["printer-name", "printer-type"]);
        let bytes = req.encode();
        let text = String::from_utf8_lossy(&bytes);
        // The attribute name appears once; the second value rides on an
        // empty name.
        assert_eq!(text.matches("requested-attributes").count(), 1);
        assert!(text.contains("printer-name"));
        assert!(text.contains("printer-type"));
    }

    #[test]
    fn test_decode_printer_groups() {
        let data = build_response(&[
            (
                TAG_OPERATION,
                vec![(VALUE_CHARSET, "attributes-charset", b"utf-8".to_vec())],
            ),
            (
                TAG_PRINTER,
                vec![
                    (0x42, "printer-name", b"Laser".to_vec()),
                    (VALUE_INTEGER, "printer-type", 0x0004_i32.to_be_bytes().to_vec()),
                    (VALUE_BOOLEAN, "printer-is-accepting-jobs", vec![1]),
                    (VALUE_ENUM, "printer-state", 3_i32.to_be_bytes().to_vec()),
                ],
            ),
            (
                TAG_PRINTER,
                vec![(0x42, "printer-name", b"Inkjet".to_vec())],
            ),
        ]);

        let resp = decode_response(&data).unwrap();
        assert!(resp.is_successful());
        assert_eq!(resp.request_id, 1);

        let printers: Vec<_> = resp.printer_groups().collect();
        assert_eq!(printers.len(), 2);
        assert_eq!(printers[0].get("printer-name"), Some("Laser"));
        assert_eq!(printers[0].get("printer-type"), Some("4"));
        assert_eq!(printers[0].get("printer-is-accepting-jobs"), Some("true"));
        assert_eq!(printers[0].get("printer-state"), Some("3"));
        assert_eq!(printers[1].get("printer-name"), Some("Inkjet"));
    }

    #[test]
    fn test_decode_multi_value_joins() {
        let mut data = vec![0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
        data.push(TAG_PRINTER);
        // printer-state-reasons with two keyword values
        for (name, value) in [("printer-state-reasons", "none"), ("", "paused report")] {
            data.push(VALUE_KEYWORD);
            data.extend_from_slice(&(name.len() as u16).to_be_bytes());
            data.extend_from_slice(name.as_bytes());
            data.extend_from_slice(&(value.len() as u16).to_be_bytes());
            data.extend_from_slice(value.as_bytes());
        }
        data.push(TAG_END);

        let resp = decode_response(&data).unwrap();
        let group = resp.printer_groups().next().unwrap();
        assert_eq!(
            group.get("printer-state-reasons"),
            Some("none,paused\\ report")
        );
    }

    #[test]
    fn test_decode_range_and_resolution() {
        let mut range = 1_i32.to_be_bytes().to_vec();
        range.extend(100_i32.to_be_bytes());
        let mut res = 300_i32.to_be_bytes().to_vec();
        res.extend(600_i32.to_be_bytes());
        res.push(3); // dots per inch

        let data = build_response(&[(
            TAG_PRINTER,
            vec![
                (VALUE_RANGE, "copies-supported", range),
                (VALUE_RESOLUTION, "printer-resolution-default", res),
            ],
        )]);

        let resp = decode_response(&data).unwrap();
        let group = resp.printer_groups().next().unwrap();
        assert_eq!(group.get("copies-supported"), Some("1-100"));
        assert_eq!(group.get("printer-resolution-default"), Some("300x600dpi"));
    }

    #[test]
    fn test_decode_truncated_fails() {
        assert!(decode_response(&[0x02, 0x00, 0x00]).is_err());

        // Missing end tag
        let data = vec![0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, TAG_OPERATION];
        assert!(decode_response(&data).is_err());
    }
}
