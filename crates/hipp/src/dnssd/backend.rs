// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backend abstraction for the DNS-SD machinery.
//!
//! A backend performs the actual browse/query/resolve/register work; the
//! context's monitor thread drains its events and dispatches handlers.
//! The shipped backends are [`MdnsBackend`](super::MdnsBackend) (multicast
//! DNS on the local link) and [`LoopbackBackend`] (an in-process registry
//! used by tests and by local service registration).

use std::collections::VecDeque;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::time::Duration;

use crate::dnssd::name::assemble_fullname;
use crate::dnssd::wire::{encode_txt, txt_rdata, RRTYPE_TXT};
use crate::error::{Error, Result};

/// Interface index wildcard (all interfaces).
pub const IF_INDEX_ANY: u32 = 0;

/// Event produced by a backend, tagged with the request id it belongs to.
#[derive(Clone, Debug)]
pub enum BackendEvent {
    /// A browse found a service instance.
    ServiceFound {
        browse_id: u64,
        if_index: u32,
        name: String,
        regtype: String,
        domain: String,
    },
    /// A previously announced instance went away.
    ServiceLost {
        browse_id: u64,
        if_index: u32,
        name: String,
        regtype: String,
        domain: String,
    },
    /// A record query produced an answer.
    QueryResult {
        query_id: u64,
        if_index: u32,
        fullname: String,
        rrtype: u16,
        rdata: Vec<u8>,
    },
    /// A resolve completed.
    Resolved {
        resolve_id: u64,
        if_index: u32,
        fullname: String,
        host: String,
        port: u16,
        txt: Vec<(String, String)>,
    },
    /// Backend-level failure, preformatted for the error handler.
    Error { message: String },
}

/// Platform machinery behind a DNS-SD context.
///
/// Request ids are allocated by the context; `cancel` must be idempotent.
pub trait DnssdBackend: Send + Sync {
    fn start_browse(&self, id: u64, regtype: &str) -> Result<()>;
    fn start_query(&self, id: u64, fullname: &str, rrtype: u16) -> Result<()>;
    fn start_resolve(&self, id: u64, name: &str, regtype: &str, domain: &str) -> Result<()>;
    fn register(
        &self,
        id: u64,
        name: &str,
        regtype: &str,
        port: u16,
        txt: &[(String, String)],
    ) -> Result<()>;
    fn cancel(&self, id: u64);

    /// Block up to `timeout_ms` for events.
    fn poll(&self, timeout_ms: u64) -> Vec<BackendEvent>;
}

// ============================================================================
// Loopback backend
// ============================================================================

#[derive(Clone, Debug)]
struct Registration {
    id: u64,
    name: String,
    regtype: String,
    port: u16,
    txt: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
struct Browse {
    id: u64,
    regtype: String,
}

/// In-process backend: registered services are immediately visible to
/// browses, queries, and resolves on the same backend instance.
///
/// Deterministic by construction, which makes it the backend of choice
/// for tests and for exercising the enumeration pipeline without network
/// access.
pub struct LoopbackBackend {
    registrations: Mutex<Vec<Registration>>,
    browses: Mutex<Vec<Browse>>,
    tx: Sender<BackendEvent>,
    rx: Receiver<BackendEvent>,
}

impl LoopbackBackend {
    pub fn new() -> LoopbackBackend {
        let (tx, rx) = unbounded();
        LoopbackBackend {
            registrations: Mutex::new(Vec::new()),
            browses: Mutex::new(Vec::new()),
            tx,
            rx,
        }
    }

    fn fullname(reg: &Registration) -> String {
        assemble_fullname(&reg.name, &reg.regtype, "local")
    }
}

impl Default for LoopbackBackend {
    fn default() -> LoopbackBackend {
        LoopbackBackend::new()
    }
}

impl DnssdBackend for LoopbackBackend {
    fn start_browse(&self, id: u64, regtype: &str) -> Result<()> {
        self.browses.lock().push(Browse {
            id,
            regtype: regtype.to_string(),
        });

        // Everything already registered is announced immediately.
        for reg in self.registrations.lock().iter() {
            if reg.regtype.eq_ignore_ascii_case(regtype) {
                let _ = self.tx.send(BackendEvent::ServiceFound {
                    browse_id: id,
                    if_index: IF_INDEX_ANY,
                    name: reg.name.clone(),
                    regtype: reg.regtype.clone(),
                    domain: "local".to_string(),
                });
            }
        }
        Ok(())
    }

    fn start_query(&self, id: u64, fullname: &str, rrtype: u16) -> Result<()> {
        if rrtype != RRTYPE_TXT {
            return Err(Error::Resolve(format!(
                "loopback backend only answers TXT queries (got rrtype {})",
                rrtype
            )));
        }

        let found = self
            .registrations
            .lock()
            .iter()
            .find(|reg| Self::fullname(reg).eq_ignore_ascii_case(fullname))
            .cloned();

        match found {
            Some(reg) => {
                let rdata = txt_rdata(&encode_txt(&reg.txt));
                let _ = self.tx.send(BackendEvent::QueryResult {
                    query_id: id,
                    if_index: IF_INDEX_ANY,
                    fullname: fullname.to_string(),
                    rrtype,
                    rdata,
                });
                Ok(())
            }
            None => {
                let _ = self.tx.send(BackendEvent::Error {
                    message: format!("no TXT record for \"{}\"", fullname),
                });
                Ok(())
            }
        }
    }

    fn start_resolve(&self, id: u64, name: &str, regtype: &str, _domain: &str) -> Result<()> {
        let found = self
            .registrations
            .lock()
            .iter()
            .find(|reg| reg.name == name && reg.regtype.eq_ignore_ascii_case(regtype))
            .cloned();

        if let Some(reg) = found {
            let _ = self.tx.send(BackendEvent::Resolved {
                resolve_id: id,
                if_index: IF_INDEX_ANY,
                fullname: Self::fullname(&reg),
                host: "localhost".to_string(),
                port: reg.port,
                txt: reg.txt.clone(),
            });
        }
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
        let reg = Registration {
            id,
            name: name.to_string(),
            regtype: regtype.to_string(),
            port,
            txt: txt.to_vec(),
        };

        // Announce to matching browses.
        for browse in self.browses.lock().iter() {
            if browse.regtype.eq_ignore_ascii_case(regtype) {
                let _ = self.tx.send(BackendEvent::ServiceFound {
                    browse_id: browse.id,
                    if_index: IF_INDEX_ANY,
                    name: reg.name.clone(),
                    regtype: reg.regtype.clone(),
                    domain: "local".to_string(),
                });
            }
        }

        self.registrations.lock().push(reg);
        Ok(())
    }

    fn cancel(&self, id: u64) {
        self.browses.lock().retain(|b| b.id != id);

        // Removing a registration announces the loss to matching browses.
        let removed: Vec<Registration> = {
            let mut regs = self.registrations.lock();
            let mut removed = VecDeque::new();
            regs.retain(|r| {
                if r.id == id {
                    removed.push_back(r.clone());
                    false
                } else {
                    true
                }
            });
            removed.into_iter().collect()
        };

        for reg in removed {
            for browse in self.browses.lock().iter() {
                if browse.regtype.eq_ignore_ascii_case(&reg.regtype) {
                    let _ = self.tx.send(BackendEvent::ServiceLost {
                        browse_id: browse.id,
                        if_index: IF_INDEX_ANY,
                        name: reg.name.clone(),
                        regtype: reg.regtype.clone(),
                        domain: "local".to_string(),
                    });
                }
            }
        }
    }

    fn poll(&self, timeout_ms: u64) -> Vec<BackendEvent> {
        let mut events = Vec::new();
        if let Ok(first) = self.rx.recv_timeout(Duration::from_millis(timeout_ms)) {
            events.push(first);
            while let Ok(more) = self.rx.try_recv() {
                events.push(more);
            }
        }
        events
    }
}
