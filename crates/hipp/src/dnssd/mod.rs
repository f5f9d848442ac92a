// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DNS-SD context: browse, query, resolve, and register operations with
//! callbacks dispatched from a single monitor thread.
//!
//! ```text
//! +--------------------------------------------------------------+
//! |  DnssdContext                                                |
//! |    browses[] queries[] resolves[]   (mutex-protected)        |
//! +--------------------------------------------------------------+
//! |  monitor thread:  loop { backend.poll() -> dispatch }        |
//! +--------------------------------------------------------------+
//! |  DnssdBackend:  MdnsBackend (multicast) | LoopbackBackend    |
//! +--------------------------------------------------------------+
//! ```
//!
//! Ordering guarantee: the browse event announcing a service is always
//! dispatched before any query/resolve result for it, because one thread
//! drains one backend in arrival order.

mod backend;
mod mdns;
pub mod name;
pub mod wire;

pub use backend::{BackendEvent, DnssdBackend, LoopbackBackend, IF_INDEX_ANY};
pub use mdns::MdnsBackend;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::error::Result;

/// Re-exported record types used with [`DnssdContext::query`].
pub use wire::{RRTYPE_A, RRTYPE_PTR, RRTYPE_SRV, RRTYPE_TXT};

/// Flags delivered to handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DnssdFlags {
    /// Record/service added.
    Add,
    /// Record/service removed.
    Remove,
}

// ============================================================================
// Handler traits (one per callback site)
// ============================================================================

/// Receives browse add/remove events.
pub trait BrowseHandler: Send + Sync {
    fn service(&self, flags: DnssdFlags, if_index: u32, name: &str, regtype: &str, domain: &str);
}

impl<F> BrowseHandler for F
where
    F: Fn(DnssdFlags, u32, &str, &str, &str) + Send + Sync,
{
    fn service(&self, flags: DnssdFlags, if_index: u32, name: &str, regtype: &str, domain: &str) {
        self(flags, if_index, name, regtype, domain)
    }
}

/// Receives record query results.
pub trait QueryHandler: Send + Sync {
    fn record(&self, flags: DnssdFlags, if_index: u32, fullname: &str, rrtype: u16, rdata: &[u8]);
}

impl<F> QueryHandler for F
where
    F: Fn(DnssdFlags, u32, &str, u16, &[u8]) + Send + Sync,
{
    fn record(&self, flags: DnssdFlags, if_index: u32, fullname: &str, rrtype: u16, rdata: &[u8]) {
        self(flags, if_index, fullname, rrtype, rdata)
    }
}

/// Receives resolve completions.
pub trait ResolveHandler: Send + Sync {
    fn resolved(
        &self,
        if_index: u32,
        fullname: &str,
        host: &str,
        port: u16,
        txt: &[(String, String)],
    );
}

impl<F> ResolveHandler for F
where
    F: Fn(u32, &str, &str, u16, &[(String, String)]) + Send + Sync,
{
    fn resolved(
        &self,
        if_index: u32,
        fullname: &str,
        host: &str,
        port: u16,
        txt: &[(String, String)],
    ) {
        self(if_index, fullname, host, port, txt)
    }
}

/// Receives preformatted error messages from the backend.
pub trait ErrorHandler: Send + Sync {
    fn error(&self, message: &str);
}

impl<F> ErrorHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn error(&self, message: &str) {
        self(message)
    }
}

// ============================================================================
// Context
// ============================================================================

struct BrowseRequest {
    id: u64,
    handler: Arc<dyn BrowseHandler>,
}

struct QueryRequest {
    id: u64,
    handler: Arc<dyn QueryHandler>,
}

struct ResolveRequest {
    id: u64,
    handler: Arc<dyn ResolveHandler>,
}

struct Shared {
    backend: Arc<dyn DnssdBackend>,
    browses: Mutex<Vec<BrowseRequest>>,
    queries: Mutex<Vec<QueryRequest>>,
    resolves: Mutex<Vec<ResolveRequest>>,
    error_handler: Mutex<Option<Arc<dyn ErrorHandler>>>,
    shutdown: AtomicBool,
}

impl Shared {
    fn dispatch(&self, event: BackendEvent) {
        match event {
            BackendEvent::ServiceFound {
                browse_id,
                if_index,
                name,
                regtype,
                domain,
            } => {
                let handler = self
                    .browses
                    .lock()
                    .iter()
                    .find(|b| b.id == browse_id)
                    .map(|b| Arc::clone(&b.handler));
                if let Some(handler) = handler {
                    handler.service(DnssdFlags::Add, if_index, &name, &regtype, &domain);
                }
            }
            BackendEvent::ServiceLost {
                browse_id,
                if_index,
                name,
                regtype,
                domain,
            } => {
                let handler = self
                    .browses
                    .lock()
                    .iter()
                    .find(|b| b.id == browse_id)
                    .map(|b| Arc::clone(&b.handler));
                if let Some(handler) = handler {
                    handler.service(DnssdFlags::Remove, if_index, &name, &regtype, &domain);
                }
            }
            BackendEvent::QueryResult {
                query_id,
                if_index,
                fullname,
                rrtype,
                rdata,
            } => {
                let handler = self
                    .queries
                    .lock()
                    .iter()
                    .find(|q| q.id == query_id)
                    .map(|q| Arc::clone(&q.handler));
                if let Some(handler) = handler {
                    handler.record(DnssdFlags::Add, if_index, &fullname, rrtype, &rdata);
                }
            }
            BackendEvent::Resolved {
                resolve_id,
                if_index,
                fullname,
                host,
                port,
                txt,
            } => {
                let handler = self
                    .resolves
                    .lock()
                    .iter()
                    .find(|r| r.id == resolve_id)
                    .map(|r| Arc::clone(&r.handler));
                if let Some(handler) = handler {
                    handler.resolved(if_index, &fullname, &host, port, &txt);
                }
            }
            BackendEvent::Error { message } => {
                log::warn!("[DNSSD] {}", message);
                let handler = self.error_handler.lock().clone();
                if let Some(handler) = handler {
                    handler.error(&message);
                }
            }
        }
    }
}

/// A DNS-SD context owning one monitor thread.
///
/// Dropping the context stops the thread and cancels every outstanding
/// request.
pub struct DnssdContext {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    monitor: Option<JoinHandle<()>>,
}

impl DnssdContext {
    /// Context over the default (multicast) backend.
    pub fn new(error_handler: Option<Arc<dyn ErrorHandler>>) -> Result<DnssdContext> {
        let backend = Arc::new(MdnsBackend::new()?);
        Ok(Self::with_backend(backend, error_handler))
    }

    /// Context over an explicit backend (tests use [`LoopbackBackend`]).
    pub fn with_backend(
        backend: Arc<dyn DnssdBackend>,
        error_handler: Option<Arc<dyn ErrorHandler>>,
    ) -> DnssdContext {
        let shared = Arc::new(Shared {
            backend,
            browses: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            resolves: Mutex::new(Vec::new()),
            error_handler: Mutex::new(error_handler),
            shutdown: AtomicBool::new(false),
        });

        let thread_shared = Arc::clone(&shared);
        let monitor = std::thread::Builder::new()
            .name("hipp-dnssd".to_string())
            .spawn(move || {
                while !thread_shared.shutdown.load(Ordering::Relaxed) {
                    for event in thread_shared.backend.poll(100) {
                        thread_shared.dispatch(event);
                    }
                }
            })
            .expect("spawning the DNS-SD monitor thread");

        DnssdContext {
            shared,
            next_id: AtomicU64::new(1),
            monitor: Some(monitor),
        }
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Start browsing for `regtype` (e.g. `_ipp._tcp`).
    pub fn browse(&self, regtype: &str, handler: Arc<dyn BrowseHandler>) -> Result<u64> {
        let id = self.alloc_id();
        self.shared.browses.lock().push(BrowseRequest {
            id,
            handler,
        });
        if let Err(err) = self.shared.backend.start_browse(id, regtype) {
            self.shared.browses.lock().retain(|b| b.id != id);
            return Err(err);
        }
        log::debug!("[DNSSD] browse {} started for {}", id, regtype);
        Ok(id)
    }

    /// Start a one-shot record query for `fullname`.
    pub fn query(
        &self,
        fullname: &str,
        rrtype: u16,
        handler: Arc<dyn QueryHandler>,
    ) -> Result<u64> {
        let id = self.alloc_id();
        self.shared.queries.lock().push(QueryRequest { id, handler });
        if let Err(err) = self.shared.backend.start_query(id, fullname, rrtype) {
            self.shared.queries.lock().retain(|q| q.id != id);
            return Err(err);
        }
        Ok(id)
    }

    /// Start a service resolve.
    pub fn resolve(
        &self,
        name: &str,
        regtype: &str,
        domain: &str,
        handler: Arc<dyn ResolveHandler>,
    ) -> Result<u64> {
        let id = self.alloc_id();
        self.shared
            .resolves
            .lock()
            .push(ResolveRequest { id, handler });
        if let Err(err) = self.shared.backend.start_resolve(id, name, regtype, domain) {
            self.shared.resolves.lock().retain(|r| r.id != id);
            return Err(err);
        }
        Ok(id)
    }

    /// Advertise a service (used by tests and local registration).
    pub fn register(
        &self,
        name: &str,
        regtype: &str,
        port: u16,
        txt: &[(String, String)],
    ) -> Result<u64> {
        let id = self.alloc_id();
        self.shared.backend.register(id, name, regtype, port, txt)?;
        Ok(id)
    }

    /// Cancel an outstanding request by id.
    pub fn cancel(&self, id: u64) {
        self.shared.backend.cancel(id);
        self.shared.browses.lock().retain(|b| b.id != id);
        self.shared.queries.lock().retain(|q| q.id != id);
        self.shared.resolves.lock().retain(|r| r.id != id);
    }
}

impl Drop for DnssdContext {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.monitor.take() {
            let _ = handle.join();
        }
    }
}
