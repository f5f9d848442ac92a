// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DNS message encode/decode for the mDNS backend.
//!
//! Covers the record types DNS-SD needs (PTR, SRV, TXT, A/AAAA) per RFC
//! 1035/2782/6762.  Names are held as decoded label vectors so instance
//! labels may contain any byte; compression pointers are followed on
//! decode and never emitted on encode.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{Error, Result};

pub const RRTYPE_A: u16 = 1;
pub const RRTYPE_PTR: u16 = 12;
pub const RRTYPE_TXT: u16 = 16;
pub const RRTYPE_AAAA: u16 = 28;
pub const RRTYPE_SRV: u16 = 33;

pub const CLASS_IN: u16 = 1;
/// mDNS cache-flush bit on record class.
pub const CACHE_FLUSH: u16 = 0x8000;
/// mDNS unicast-response bit on question class.
pub const UNICAST_RESPONSE: u16 = 0x8000;

/// Response + authoritative-answer flags.
pub const FLAGS_RESPONSE_AA: u16 = 0x8400;

/// A DNS name as decoded labels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsName {
    pub labels: Vec<Vec<u8>>,
}

impl DnsName {
    pub fn from_labels<I: IntoIterator<Item = S>, S: AsRef<[u8]>>(labels: I) -> DnsName {
        DnsName {
            labels: labels.into_iter().map(|l| l.as_ref().to_vec()).collect(),
        }
    }

    /// Case-insensitive name equality (RFC 1035 Sec.2.3.3).
    pub fn equals(&self, other: &DnsName) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(&other.labels)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// Dotted representation with lossy UTF-8 labels (for logging).
    pub fn to_dotted(&self) -> String {
        self.labels
            .iter()
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// One question entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: DnsName,
    pub rrtype: u16,
    pub class: u16,
}

/// Record payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RData {
    Ptr(DnsName),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: DnsName,
    },
    /// TXT character-strings, raw.
    Txt(Vec<Vec<u8>>),
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Raw(Vec<u8>),
}

/// One resource record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: DnsName,
    pub rrtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: RData,
}

/// A full message.
#[derive(Clone, Debug, Default)]
pub struct DnsMessage {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub additionals: Vec<DnsRecord>,
}

// ============================================================================
// Encoding
// ============================================================================

fn encode_name(out: &mut Vec<u8>, name: &DnsName) {
    for label in &name.labels {
        let len = label.len().min(63);
        out.push(len as u8);
        out.extend_from_slice(&label[..len]);
    }
    out.push(0);
}

fn encode_rdata(out: &mut Vec<u8>, rdata: &RData) {
    let start = out.len();
    out.extend_from_slice(&[0, 0]); // placeholder length

    match rdata {
        RData::Ptr(target) => encode_name(out, target),
        RData::Srv {
            priority,
            weight,
            port,
            target,
        } => {
            out.extend_from_slice(&priority.to_be_bytes());
            out.extend_from_slice(&weight.to_be_bytes());
            out.extend_from_slice(&port.to_be_bytes());
            encode_name(out, target);
        }
        RData::Txt(strings) => {
            if strings.is_empty() {
                out.push(0);
            }
            for s in strings {
                let len = s.len().min(255);
                out.push(len as u8);
                out.extend_from_slice(&s[..len]);
            }
        }
        RData::A(addr) => out.extend_from_slice(&addr.octets()),
        RData::Aaaa(addr) => out.extend_from_slice(&addr.octets()),
        RData::Raw(bytes) => out.extend_from_slice(bytes),
    }

    let len = (out.len() - start - 2) as u16;
    out[start..start + 2].copy_from_slice(&len.to_be_bytes());
}

impl DnsMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(512);
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        out.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // no authority records
        out.extend_from_slice(&(self.additionals.len() as u16).to_be_bytes());

        for q in &self.questions {
            encode_name(&mut out, &q.name);
            out.extend_from_slice(&q.rrtype.to_be_bytes());
            out.extend_from_slice(&q.class.to_be_bytes());
        }
        for r in self.answers.iter().chain(&self.additionals) {
            encode_name(&mut out, &r.name);
            out.extend_from_slice(&r.rrtype.to_be_bytes());
            out.extend_from_slice(&r.class.to_be_bytes());
            out.extend_from_slice(&r.ttl.to_be_bytes());
            encode_rdata(&mut out, &r.rdata);
        }
        out
    }

    /// Build a one-question query.
    pub fn query(name: DnsName, rrtype: u16) -> DnsMessage {
        DnsMessage {
            id: 0,
            flags: 0,
            questions: vec![DnsQuestion {
                name,
                rrtype,
                class: CLASS_IN | UNICAST_RESPONSE,
            }],
            answers: Vec::new(),
            additionals: Vec::new(),
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags & 0x8000 != 0
    }
}

// ============================================================================
// Decoding
// ============================================================================

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::protocol("truncated DNS message"))?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes([self.u8()?, self.u8()?]))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes([self.u8()?, self.u8()?, self.u8()?, self.u8()?]))
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::protocol("truncated DNS data"));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Decode a possibly-compressed name starting at the cursor.
    fn name(&mut self) -> Result<DnsName> {
        let mut labels = Vec::new();
        let mut pos = self.pos;
        let mut jumped = false;
        let mut jumps = 0;

        loop {
            let len = *self
                .data
                .get(pos)
                .ok_or_else(|| Error::protocol("truncated DNS name"))? as usize;

            if len == 0 {
                pos += 1;
                if !jumped {
                    self.pos = pos;
                }
                return Ok(DnsName { labels });
            }

            if len & 0xC0 == 0xC0 {
                // Compression pointer
                let second = *self
                    .data
                    .get(pos + 1)
                    .ok_or_else(|| Error::protocol("truncated DNS pointer"))?
                    as usize;
                let target = ((len & 0x3F) << 8) | second;
                if !jumped {
                    self.pos = pos + 2;
                }
                jumped = true;
                jumps += 1;
                if jumps > 16 {
                    return Err(Error::protocol("DNS compression loop"));
                }
                pos = target;
                continue;
            }

            if len > 63 {
                return Err(Error::protocol("bad DNS label length"));
            }
            let end = pos + 1 + len;
            if end > self.data.len() {
                return Err(Error::protocol("truncated DNS label"));
            }
            labels.push(self.data[pos + 1..end].to_vec());
            pos = end;
        }
    }
}

fn decode_record(c: &mut Cursor<'_>) -> Result<DnsRecord> {
    let name = c.name()?;
    let rrtype = c.u16()?;
    let class = c.u16()?;
    let ttl = c.u32()?;
    let rdlen = c.u16()? as usize;
    let rdata_start = c.pos;
    let rdata_end = rdata_start + rdlen;
    if rdata_end > c.data.len() {
        return Err(Error::protocol("truncated DNS rdata"));
    }

    let rdata = match rrtype {
        RRTYPE_PTR => {
            let target = c.name()?;
            RData::Ptr(target)
        }
        RRTYPE_SRV => {
            let priority = c.u16()?;
            let weight = c.u16()?;
            let port = c.u16()?;
            let target = c.name()?;
            RData::Srv {
                priority,
                weight,
                port,
                target,
            }
        }
        RRTYPE_TXT => {
            let mut strings = Vec::new();
            while c.pos < rdata_end {
                let len = c.u8()? as usize;
                strings.push(c.bytes(len.min(rdata_end - c.pos))?.to_vec());
            }
            RData::Txt(strings)
        }
        RRTYPE_A if rdlen == 4 => {
            let b = c.bytes(4)?;
            RData::A(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
        }
        RRTYPE_AAAA if rdlen == 16 => {
            let b = c.bytes(16)?;
            let mut o = [0u8; 16];
            o.copy_from_slice(b);
            RData::Aaaa(Ipv6Addr::from(o))
        }
        _ => RData::Raw(c.bytes(rdlen)?.to_vec()),
    };

    // Skip any rdata bytes a name decoder left unread.
    c.pos = rdata_end;

    Ok(DnsRecord {
        name,
        rrtype,
        class,
        ttl,
        rdata,
    })
}

impl DnsMessage {
    pub fn decode(data: &[u8]) -> Result<DnsMessage> {
        let mut c = Cursor { data, pos: 0 };

        let id = c.u16()?;
        let flags = c.u16()?;
        let qdcount = c.u16()?;
        let ancount = c.u16()?;
        let nscount = c.u16()?;
        let arcount = c.u16()?;

        let mut questions = Vec::with_capacity(qdcount as usize);
        for _ in 0..qdcount {
            let name = c.name()?;
            let rrtype = c.u16()?;
            let class = c.u16()?;
            questions.push(DnsQuestion {
                name,
                rrtype,
                class,
            });
        }

        let mut answers = Vec::with_capacity(ancount as usize);
        for _ in 0..ancount {
            answers.push(decode_record(&mut c)?);
        }
        // Authority records are parsed and dropped.
        for _ in 0..nscount {
            let _ = decode_record(&mut c)?;
        }
        let mut additionals = Vec::with_capacity(arcount as usize);
        for _ in 0..arcount {
            additionals.push(decode_record(&mut c)?);
        }

        Ok(DnsMessage {
            id,
            flags,
            questions,
            answers,
            additionals,
        })
    }
}

/// Encode TXT key/value pairs as DNS character-strings.
pub fn encode_txt(pairs: &[(String, String)]) -> Vec<Vec<u8>> {
    pairs
        .iter()
        .map(|(k, v)| {
            let mut s = Vec::with_capacity(k.len() + v.len() + 1);
            s.extend_from_slice(k.as_bytes());
            if !v.is_empty() {
                s.push(b'=');
                s.extend_from_slice(v.as_bytes());
            }
            s
        })
        .collect()
}

/// Decode TXT character-strings into key/value pairs.
pub fn decode_txt(strings: &[Vec<u8>]) -> Vec<(String, String)> {
    strings
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| match s.iter().position(|&b| b == b'=') {
            Some(eq) => (
                String::from_utf8_lossy(&s[..eq]).into_owned(),
                String::from_utf8_lossy(&s[eq + 1..]).into_owned(),
            ),
            None => (String::from_utf8_lossy(s).into_owned(), String::new()),
        })
        .collect()
}

/// Flatten TXT character-strings into raw `len key=value` rdata bytes.
pub fn txt_rdata(strings: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for s in strings {
        out.push(s.len().min(255) as u8);
        out.extend_from_slice(&s[..s.len().min(255)]);
    }
    if out.is_empty() {
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_name() -> DnsName {
        DnsName::from_labels(["Photo Printer", "_ipp", "_tcp", "local"])
    }

    #[test]
    fn test_query_round_trip() {
        let msg = DnsMessage::query(service_name(), RRTYPE_TXT);
        let wire = msg.encode();
        let decoded = DnsMessage::decode(&wire).unwrap();

        assert!(!decoded.is_response());
        assert_eq!(decoded.questions.len(), 1);
        assert!(decoded.questions[0].name.equals(&service_name()));
        assert_eq!(decoded.questions[0].rrtype, RRTYPE_TXT);
    }

    #[test]
    fn test_answer_round_trip() {
        let txt = encode_txt(&[
            ("rp".to_string(), "ipp/print".to_string()),
            ("pdl".to_string(), "application/pdf".to_string()),
        ]);
        let msg = DnsMessage {
            id: 0,
            flags: FLAGS_RESPONSE_AA,
            questions: Vec::new(),
            answers: vec![
                DnsRecord {
                    name: DnsName::from_labels(["_ipp", "_tcp", "local"]),
                    rrtype: RRTYPE_PTR,
                    class: CLASS_IN,
                    ttl: 4500,
                    rdata: RData::Ptr(service_name()),
                },
                DnsRecord {
                    name: service_name(),
                    rrtype: RRTYPE_SRV,
                    class: CLASS_IN | CACHE_FLUSH,
                    ttl: 120,
                    rdata: RData::Srv {
                        priority: 0,
                        weight: 0,
                        port: 631,
                        target: DnsName::from_labels(["printer", "local"]),
                    },
                },
                DnsRecord {
                    name: service_name(),
                    rrtype: RRTYPE_TXT,
                    class: CLASS_IN | CACHE_FLUSH,
                    ttl: 4500,
                    rdata: RData::Txt(txt),
                },
            ],
            additionals: vec![DnsRecord {
                name: DnsName::from_labels(["printer", "local"]),
                rrtype: RRTYPE_A,
                class: CLASS_IN,
                ttl: 120,
                rdata: RData::A("192.168.1.9".parse().unwrap()),
            }],
        };

        let decoded = DnsMessage::decode(&msg.encode()).unwrap();
        assert!(decoded.is_response());
        assert_eq!(decoded.answers.len(), 3);
        assert_eq!(decoded.additionals.len(), 1);

        match &decoded.answers[0].rdata {
            RData::Ptr(target) => assert!(target.equals(&service_name())),
            other => panic!("unexpected rdata {:?}", other),
        }
        match &decoded.answers[1].rdata {
            RData::Srv { port, target, .. } => {
                assert_eq!(*port, 631);
                assert_eq!(target.to_dotted(), "printer.local");
            }
            other => panic!("unexpected rdata {:?}", other),
        }
        match &decoded.answers[2].rdata {
            RData::Txt(strings) => {
                let pairs = decode_txt(strings);
                assert_eq!(pairs[0], ("rp".to_string(), "ipp/print".to_string()));
            }
            other => panic!("unexpected rdata {:?}", other),
        }
    }

    #[test]
    fn test_compression_pointer() {
        // Hand-built response: question name, answer name as pointer to it.
        let mut wire = Vec::new();
        wire.extend_from_slice(&0u16.to_be_bytes()); // id
        wire.extend_from_slice(&FLAGS_RESPONSE_AA.to_be_bytes());
        wire.extend_from_slice(&1u16.to_be_bytes()); // qd
        wire.extend_from_slice(&1u16.to_be_bytes()); // an
        wire.extend_from_slice(&0u16.to_be_bytes()); // ns
        wire.extend_from_slice(&0u16.to_be_bytes()); // ar

        let name_offset = wire.len(); // 12
        wire.extend_from_slice(b"\x04_ipp\x04_tcp\x05local\x00");
        wire.extend_from_slice(&RRTYPE_PTR.to_be_bytes());
        wire.extend_from_slice(&CLASS_IN.to_be_bytes());

        // Answer: name = pointer to offset 12
        wire.push(0xC0);
        wire.push(name_offset as u8);
        wire.extend_from_slice(&RRTYPE_PTR.to_be_bytes());
        wire.extend_from_slice(&CLASS_IN.to_be_bytes());
        wire.extend_from_slice(&120u32.to_be_bytes());
        // rdata: "Photo" + pointer to offset 12
        let rdata = {
            let mut r = vec![5u8];
            r.extend_from_slice(b"Photo");
            r.push(0xC0);
            r.push(name_offset as u8);
            r
        };
        wire.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        wire.extend_from_slice(&rdata);

        let decoded = DnsMessage::decode(&wire).unwrap();
        assert_eq!(decoded.answers[0].name.to_dotted(), "_ipp._tcp.local");
        match &decoded.answers[0].rdata {
            RData::Ptr(target) => {
                assert_eq!(target.to_dotted(), "Photo._ipp._tcp.local");
            }
            other => panic!("unexpected rdata {:?}", other),
        }
    }

    #[test]
    fn test_truncated_rejected() {
        assert!(DnsMessage::decode(&[0, 1, 2]).is_err());

        let msg = DnsMessage::query(service_name(), RRTYPE_PTR);
        let wire = msg.encode();
        assert!(DnsMessage::decode(&wire[..wire.len() - 3]).is_err());
    }

    #[test]
    fn test_txt_empty_value() {
        let pairs = decode_txt(&encode_txt(&[("air".to_string(), String::new())]));
        assert_eq!(pairs, vec![("air".to_string(), String::new())]);
    }
}
