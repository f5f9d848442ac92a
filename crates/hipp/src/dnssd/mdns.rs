// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast DNS backend (RFC 6762) for link-local service discovery.
//!
//! One UDP socket joined to 224.0.0.251:5353 serves every request on the
//! backend: browses send PTR questions, queries send TXT questions,
//! resolves send SRV+TXT, and registrations answer matching questions
//! from other hosts.  Outstanding questions are retransmitted with a
//! simple 1-second cadence until answered or cancelled.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::{MDNS_GROUP_V4, MDNS_PORT};
use crate::dnssd::backend::{BackendEvent, DnssdBackend, IF_INDEX_ANY};
use crate::dnssd::name::{assemble_fullname, split_labels};
use crate::dnssd::wire::{
    encode_txt, txt_rdata, DnsMessage, DnsName, DnsRecord, RData, CLASS_IN, FLAGS_RESPONSE_AA,
    RRTYPE_PTR, RRTYPE_SRV, RRTYPE_TXT,
};
use crate::error::{Error, Result};

const RESEND_INTERVAL: Duration = Duration::from_secs(1);
const ANNOUNCE_TTL: u32 = 4500;

#[derive(Debug)]
enum RequestKind {
    Browse {
        regtype: String,
        /// Instances already announced (dedup across retransmits).
        announced: HashSet<String>,
    },
    Query {
        fullname: String,
        rrtype: u16,
        answered: bool,
    },
    Resolve {
        name: String,
        regtype: String,
        domain: String,
        srv: Option<(String, u16)>,
        txt: Option<Vec<(String, String)>>,
        done: bool,
    },
    Register {
        name: String,
        regtype: String,
        port: u16,
        txt: Vec<(String, String)>,
    },
}

#[derive(Debug)]
struct Request {
    id: u64,
    kind: RequestKind,
    last_send: Instant,
}

/// mDNS over UDP multicast.
pub struct MdnsBackend {
    socket: UdpSocket,
    group: SocketAddr,
    requests: Mutex<Vec<Request>>,
    hostname: String,
}

impl MdnsBackend {
    pub fn new() -> Result<MdnsBackend> {
        let group_ip = Ipv4Addr::from(MDNS_GROUP_V4);

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(Error::Io)?;
        socket.set_reuse_address(true).map_err(Error::Io)?;
        #[cfg(unix)]
        let _ = socket.set_reuse_port(true);

        let bind: SocketAddr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), MDNS_PORT);
        socket.bind(&bind.into()).map_err(Error::Io)?;
        socket
            .join_multicast_v4(&group_ip, &Ipv4Addr::UNSPECIFIED)
            .map_err(Error::Io)?;
        socket.set_multicast_loop_v4(true).map_err(Error::Io)?;

        let socket: UdpSocket = socket.into();
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .map_err(Error::Io)?;

        Ok(MdnsBackend {
            socket,
            group: SocketAddr::new(group_ip.into(), MDNS_PORT),
            requests: Mutex::new(Vec::new()),
            hostname: local_hostname(),
        })
    }

    fn name_for_regtype(regtype: &str) -> DnsName {
        let mut labels: Vec<String> = regtype
            .trim_matches('.')
            .split('.')
            .map(str::to_string)
            .collect();
        labels.push("local".to_string());
        DnsName::from_labels(labels)
    }

    fn name_for_fullname(fullname: &str) -> DnsName {
        DnsName::from_labels(split_labels(fullname))
    }

    fn send_question(&self, name: DnsName, rrtype: u16) {
        let msg = DnsMessage::query(name, rrtype);
        if let Err(err) = self.socket.send_to(&msg.encode(), self.group) {
            log::debug!("[DNSSD] mDNS send failed: {}", err);
        }
    }

    fn send_request(&self, kind: &RequestKind) {
        match kind {
            RequestKind::Browse { regtype, .. } => {
                self.send_question(Self::name_for_regtype(regtype), RRTYPE_PTR);
            }
            RequestKind::Query {
                fullname,
                rrtype,
                answered,
            } => {
                if !answered {
                    self.send_question(Self::name_for_fullname(fullname), *rrtype);
                }
            }
            RequestKind::Resolve {
                name,
                regtype,
                domain,
                done,
                ..
            } => {
                if !done {
                    let fullname = assemble_fullname(name, regtype, domain);
                    let dns_name = Self::name_for_fullname(&fullname);
                    self.send_question(dns_name.clone(), RRTYPE_SRV);
                    self.send_question(dns_name, RRTYPE_TXT);
                }
            }
            RequestKind::Register {
                name,
                regtype,
                port,
                txt,
            } => {
                self.announce(name, regtype, *port, txt);
            }
        }
    }

    fn announce(&self, name: &str, regtype: &str, port: u16, txt: &[(String, String)]) {
        let service = {
            let mut labels = vec![name.as_bytes().to_vec()];
            labels.extend(
                Self::name_for_regtype(regtype)
                    .labels
                    .into_iter(),
            );
            DnsName { labels }
        };
        let target = DnsName::from_labels([self.hostname.as_str(), "local"]);

        let msg = DnsMessage {
            id: 0,
            flags: FLAGS_RESPONSE_AA,
            questions: Vec::new(),
            answers: vec![
                DnsRecord {
                    name: Self::name_for_regtype(regtype),
                    rrtype: RRTYPE_PTR,
                    class: CLASS_IN,
                    ttl: ANNOUNCE_TTL,
                    rdata: RData::Ptr(service.clone()),
                },
                DnsRecord {
                    name: service.clone(),
                    rrtype: RRTYPE_SRV,
                    class: CLASS_IN,
                    ttl: ANNOUNCE_TTL,
                    rdata: RData::Srv {
                        priority: 0,
                        weight: 0,
                        port,
                        target,
                    },
                },
                DnsRecord {
                    name: service,
                    rrtype: RRTYPE_TXT,
                    class: CLASS_IN,
                    ttl: ANNOUNCE_TTL,
                    rdata: RData::Txt(encode_txt(txt)),
                },
            ],
            additionals: Vec::new(),
        };

        if let Err(err) = self.socket.send_to(&msg.encode(), self.group) {
            log::debug!("[DNSSD] mDNS announce failed: {}", err);
        }
    }

    /// Match one received record against outstanding requests.
    fn record_events(&self, record: &DnsRecord, events: &mut Vec<BackendEvent>) {
        let mut requests = self.requests.lock();

        for req in requests.iter_mut() {
            match &mut req.kind {
                RequestKind::Browse { regtype, announced } => {
                    if record.rrtype != RRTYPE_PTR
                        || !record.name.equals(&Self::name_for_regtype(regtype))
                    {
                        continue;
                    }
                    let RData::Ptr(service) = &record.rdata else {
                        continue;
                    };
                    let Some(first) = service.labels.first() else {
                        continue;
                    };
                    let instance = String::from_utf8_lossy(first).into_owned();

                    if record.ttl == 0 {
                        if announced.remove(&instance) {
                            events.push(BackendEvent::ServiceLost {
                                browse_id: req.id,
                                if_index: IF_INDEX_ANY,
                                name: instance,
                                regtype: regtype.clone(),
                                domain: "local".to_string(),
                            });
                        }
                    } else if announced.insert(instance.clone()) {
                        events.push(BackendEvent::ServiceFound {
                            browse_id: req.id,
                            if_index: IF_INDEX_ANY,
                            name: instance,
                            regtype: regtype.clone(),
                            domain: "local".to_string(),
                        });
                    }
                }
                RequestKind::Query {
                    fullname,
                    rrtype,
                    answered,
                } => {
                    if *answered
                        || record.rrtype != *rrtype
                        || !record.name.equals(&Self::name_for_fullname(fullname))
                    {
                        continue;
                    }
                    let rdata = match &record.rdata {
                        RData::Txt(strings) => txt_rdata(strings),
                        RData::Raw(bytes) => bytes.clone(),
                        other => {
                            log::debug!("[DNSSD] unexpected rdata {:?} for query", other);
                            continue;
                        }
                    };
                    *answered = true;
                    events.push(BackendEvent::QueryResult {
                        query_id: req.id,
                        if_index: IF_INDEX_ANY,
                        fullname: fullname.clone(),
                        rrtype: *rrtype,
                        rdata,
                    });
                }
                RequestKind::Resolve {
                    name,
                    regtype,
                    domain,
                    srv,
                    txt,
                    done,
                } => {
                    if *done {
                        continue;
                    }
                    let fullname = assemble_fullname(name, regtype, domain);
                    if !record.name.equals(&Self::name_for_fullname(&fullname)) {
                        continue;
                    }
                    match &record.rdata {
                        RData::Srv { port, target, .. } => {
                            *srv = Some((target.to_dotted(), *port));
                        }
                        RData::Txt(strings) => {
                            *txt = Some(crate::dnssd::wire::decode_txt(strings));
                        }
                        _ => continue,
                    }
                    if let (Some((host, port)), Some(pairs)) = (srv.clone(), txt.clone()) {
                        *done = true;
                        events.push(BackendEvent::Resolved {
                            resolve_id: req.id,
                            if_index: IF_INDEX_ANY,
                            fullname,
                            host,
                            port,
                            txt: pairs,
                        });
                    }
                }
                RequestKind::Register { .. } => {}
            }
        }
    }

    /// Answer questions that match one of our registrations.
    fn answer_questions(&self, msg: &DnsMessage) {
        let registrations: Vec<(String, String, u16, Vec<(String, String)>)> = self
            .requests
            .lock()
            .iter()
            .filter_map(|req| match &req.kind {
                RequestKind::Register {
                    name,
                    regtype,
                    port,
                    txt,
                } => Some((name.clone(), regtype.clone(), *port, txt.clone())),
                _ => None,
            })
            .collect();

        for question in &msg.questions {
            for (name, regtype, port, txt) in &registrations {
                let type_name = Self::name_for_regtype(regtype);
                if question.rrtype == RRTYPE_PTR && question.name.equals(&type_name) {
                    self.announce(name, regtype, *port, txt);
                }
            }
        }
    }
}

impl DnssdBackend for MdnsBackend {
    fn start_browse(&self, id: u64, regtype: &str) -> Result<()> {
        let kind = RequestKind::Browse {
            regtype: regtype.to_string(),
            announced: HashSet::new(),
        };
        self.send_request(&kind);
        self.requests.lock().push(Request {
            id,
            kind,
            last_send: Instant::now(),
        });
        Ok(())
    }

    fn start_query(&self, id: u64, fullname: &str, rrtype: u16) -> Result<()> {
        let kind = RequestKind::Query {
            fullname: fullname.to_string(),
            rrtype,
            answered: false,
        };
        self.send_request(&kind);
        self.requests.lock().push(Request {
            id,
            kind,
            last_send: Instant::now(),
        });
        Ok(())
    }

    fn start_resolve(&self, id: u64, name: &str, regtype: &str, domain: &str) -> Result<()> {
        let kind = RequestKind::Resolve {
            name: name.to_string(),
            regtype: regtype.to_string(),
            domain: domain.to_string(),
            srv: None,
            txt: None,
            done: false,
        };
        self.send_request(&kind);
        self.requests.lock().push(Request {
            id,
            kind,
            last_send: Instant::now(),
        });
        Ok(())
    }

    fn register(
        &self,
        id: u64,
        name: &str,
        regtype: &str,
        port: u16,
        txt: &[(String, String)],
    ) -> Result<()> {
        let kind = RequestKind::Register {
            name: name.to_string(),
            regtype: regtype.to_string(),
            port,
            txt: txt.to_vec(),
        };
        self.send_request(&kind);
        self.requests.lock().push(Request {
            id,
            kind,
            last_send: Instant::now(),
        });
        Ok(())
    }

    fn cancel(&self, id: u64) {
        self.requests.lock().retain(|req| req.id != id);
    }

    fn poll(&self, timeout_ms: u64) -> Vec<BackendEvent> {
        let mut events = Vec::new();
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut buf = [0u8; 9000];

        loop {
            // Retransmit unanswered questions on a 1 s cadence.
            {
                let mut requests = self.requests.lock();
                for req in requests.iter_mut() {
                    if req.last_send.elapsed() >= RESEND_INTERVAL {
                        req.last_send = Instant::now();
                        self.send_request(&req.kind);
                    }
                }
            }

            match self.socket.recv_from(&mut buf) {
                Ok((len, _peer)) => {
                    let msg = match DnsMessage::decode(&buf[..len]) {
                        Ok(msg) => msg,
                        Err(err) => {
                            log::debug!("[DNSSD] dropping undecodable packet: {}", err);
                            continue;
                        }
                    };

                    if msg.is_response() {
                        for record in msg.answers.iter().chain(&msg.additionals) {
                            self.record_events(record, &mut events);
                        }
                    } else {
                        self.answer_questions(&msg);
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    events.push(BackendEvent::Error {
                        message: format!("mDNS socket error: {}", e),
                    });
                    return events;
                }
            }

            if !events.is_empty() || Instant::now() >= deadline {
                return events;
            }
        }
    }
}

fn local_hostname() -> String {
    #[cfg(unix)]
    {
        let mut buf = [0u8; 256];
        let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
        if rc == 0 {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            if let Ok(name) = std::str::from_utf8(&buf[..end]) {
                // Strip an existing .local / domain suffix.
                return name.split('.').next().unwrap_or("printer").to_string();
            }
        }
    }
    "printer".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regtype_name() {
        let name = MdnsBackend::name_for_regtype("_ipp._tcp");
        assert_eq!(name.to_dotted(), "_ipp._tcp.local");

        let name = MdnsBackend::name_for_regtype("_ipps._tcp.");
        assert_eq!(name.to_dotted(), "_ipps._tcp.local");
    }

    #[test]
    fn test_fullname_name_with_escapes() {
        let name = MdnsBackend::name_for_fullname("My\\.Printer._ipp._tcp.local");
        assert_eq!(name.labels.len(), 4);
        assert_eq!(name.labels[0], b"My.Printer");
    }

    #[test]
    fn test_local_hostname_nonempty() {
        assert!(!local_hostname().is_empty());
    }
}
