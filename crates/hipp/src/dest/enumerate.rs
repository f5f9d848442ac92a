// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Destination enumeration: the multi-source pipeline that fuses locally
//! configured queues, scheduler-known queues, and DNS-SD discoveries into
//! one deduplicated, default-aware stream.
//!
//! Pipeline order:
//!
//! 1. Load user/system `lpoptions` overlays, record the default.
//! 2. Fetch scheduler queues via IPP `CUPS-Get-Printers` (unless the
//!    caller restricted the filter to discovered printers).
//! 3. Pre-seed queues with `dnssd:` device URIs as already-active
//!    services so discovery does not re-announce them.
//! 4. Browse `_ipp._tcp` and `_ipps._tcp` (IPPS preferred when both
//!    announce one instance).
//! 5. Poll: TXT-query new services, merge compatible ones against the
//!    overlays, and stream them out until the budget elapses or the
//!    cancel flag trips.
//!
//! The stream is exposed two ways: the callback primitive
//! ([`enum_dests`]) and the [`Destinations`] iterator built on it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::config::{Context, ENUM_POLL_MSEC};
use crate::dest::lpoptions::{load_overlay, Overlay};
use crate::dest::txt::{apply_txt, queue_name, TxtOutcome};
use crate::dest::{DestFlags, DestList, Destination, PrinterType};
use crate::dnssd::name::{assemble_fullname, unquote};
use crate::dnssd::{DnssdBackend, DnssdContext, DnssdFlags, RRTYPE_TXT};
use crate::error::{Error, Result};
use crate::http::{ConnectOptions, HttpConnection, HttpField, HttpStatus, Method};
use crate::ipp;

/// Inputs for one enumeration run.
pub struct EnumOptions {
    /// Overall budget in milliseconds: `0` returns only the local
    /// snapshot, negative runs until every discovered service resolves.
    pub msec: i64,
    /// Wanted printer-type bits.
    pub wanted: PrinterType,
    /// Mask selecting which bits of `wanted` are significant.
    pub mask: PrinterType,
    /// Cooperative cancel flag, polled every loop iteration.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Discovery backend override (tests use the loopback backend).
    pub backend: Option<Arc<dyn DnssdBackend>>,
}

impl Default for EnumOptions {
    fn default() -> EnumOptions {
        EnumOptions {
            msec: 5000,
            wanted: PrinterType::NONE,
            mask: PrinterType::NONE,
            cancel: None,
            backend: None,
        }
    }
}

// ============================================================================
// Discovered services
// ============================================================================

/// Lifecycle of one discovered service instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ServiceState {
    /// Announced by a browse; no TXT query yet.
    New,
    /// TXT query outstanding.
    Querying,
    /// TXT parsed; not yet delivered.
    Pending,
    /// Delivered to the caller (or pre-seeded from the scheduler).
    Active,
    /// No usable page description language.
    Incompatible,
    /// Query failed.
    Error,
}

#[derive(Debug)]
struct DiscoveredService {
    state: ServiceState,
    fullname: String,
    regtype: String,
    printer_type: PrinterType,
    dest: Destination,
}

/// Table shared between the caller loop and the DNS-SD monitor thread.
#[derive(Default)]
struct ServiceTable {
    /// Sorted by sanitized queue name.
    services: RwLock<Vec<DiscoveredService>>,
    /// Services that went away while active.
    removals: Mutex<VecDeque<Destination>>,
}

impl ServiceTable {
    fn position(services: &[DiscoveredService], name: &str) -> std::result::Result<usize, usize> {
        services.binary_search_by(|svc| {
            svc.dest
                .name
                .to_ascii_lowercase()
                .cmp(&name.to_ascii_lowercase())
        })
    }

    /// Browse-add: create or update the record for a service instance.
    fn add_service(&self, instance: &str, regtype: &str, domain: &str) {
        let name = queue_name(instance);
        let fullname = assemble_fullname(instance, regtype, domain);
        let mut services = self.services.write();

        match Self::position(&services, &name) {
            Ok(index) => {
                let svc = &mut services[index];
                // IPPS wins when both registration types announce the
                // same instance; requery under the new type.
                if regtype.starts_with("_ipps") && !svc.regtype.starts_with("_ipps") {
                    svc.regtype = regtype.to_string();
                    svc.fullname = fullname;
                    svc.state = ServiceState::New;
                }
            }
            Err(index) => {
                log::debug!("[DEST] discovered \"{}\" ({})", name, regtype);
                services.insert(
                    index,
                    DiscoveredService {
                        state: ServiceState::New,
                        fullname,
                        regtype: regtype.to_string(),
                        printer_type: PrinterType::NONE,
                        dest: Destination::new(&name, None),
                    },
                );
            }
        }
    }

    /// Browse-remove: an active service leaving emits a removal.
    fn remove_service(&self, instance: &str) {
        let name = queue_name(instance);
        let mut services = self.services.write();
        if let Ok(index) = Self::position(&services, &name) {
            let svc = services.remove(index);
            if svc.state == ServiceState::Active {
                self.removals.lock().push_back(svc.dest);
            }
        }
    }

    /// TXT answer for `fullname`: populate options and printer type.
    fn apply_query_result(&self, fullname: &str, rdata: &[u8]) {
        let service_name = unquote(fullname);
        let service_name = service_name
            .split_once("._")
            .map(|(head, _)| head)
            .unwrap_or(&service_name);
        let name = queue_name(service_name);

        let mut services = self.services.write();
        let Ok(index) = Self::position(&services, &name) else {
            log::debug!("[DEST] TXT for unknown service \"{}\"", fullname);
            return;
        };
        let svc = &mut services[index];
        if !matches!(svc.state, ServiceState::New | ServiceState::Querying) {
            return;
        }

        let fullname_decoded = unquote(&svc.fullname);
        let (outcome, printer_type) =
            apply_txt(&mut svc.dest, &svc.regtype, &fullname_decoded, rdata);
        svc.printer_type = printer_type;
        svc.state = match outcome {
            TxtOutcome::Compatible => ServiceState::Pending,
            TxtOutcome::Incompatible => ServiceState::Incompatible,
        };
    }

    /// Pre-seed a queue already known to the scheduler.
    fn preseed_active(&self, instance: &str, regtype: &str, domain: &str) {
        let name = queue_name(instance);
        let mut services = self.services.write();
        if let Err(index) = Self::position(&services, &name) {
            services.insert(
                index,
                DiscoveredService {
                    state: ServiceState::Active,
                    fullname: assemble_fullname(instance, regtype, domain),
                    regtype: regtype.to_string(),
                    printer_type: PrinterType::DISCOVERED,
                    dest: Destination::new(&name, None),
                },
            );
        }
    }
}

// ============================================================================
// Overlay merge
// ============================================================================

fn default_matches(
    def_name: Option<&str>,
    def_instance: Option<&str>,
    name: &str,
    instance: Option<&str>,
) -> bool {
    match def_name {
        None => false,
        Some(def_name) => {
            def_name.eq_ignore_ascii_case(name)
                && match (def_instance, instance) {
                    (None, None) => true,
                    (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                    _ => false,
                }
        }
    }
}

/// Merge one produced destination against the overlays and emit one
/// result per matching overlay instance (or the destination itself when
/// no overlay names it).  Overlay options win on conflict.
fn merge_overlay(
    overlay: &Overlay,
    def_name: Option<&str>,
    def_instance: Option<&str>,
    dest: &Destination,
) -> Vec<Destination> {
    let entries: Vec<Destination> = overlay.dests.matching_name(&dest.name).cloned().collect();

    if entries.is_empty() {
        let mut out = dest.clone();
        out.is_default = dest.instance.is_none()
            && default_matches(def_name, def_instance, &dest.name, None);
        return vec![out];
    }

    entries
        .into_iter()
        .map(|entry| {
            let mut merged = dest.clone();
            merged.name = entry.name.clone();
            merged.instance = entry.instance.clone();
            for (name, value) in entry.options.iter() {
                merged.options.set(name, value);
            }
            merged.is_default = default_matches(
                def_name,
                def_instance,
                &merged.name,
                merged.instance.as_deref(),
            );
            merged
        })
        .collect()
}

// ============================================================================
// Scheduler fetch
// ============================================================================

fn fetch_server_dests(
    ctx: &Context,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<(DestList, Option<String>)> {
    let mut conn = HttpConnection::connect(
        ctx.server(),
        ctx.port(),
        ConnectOptions {
            msec: 5000,
            cancel: cancel.clone(),
            ..ConnectOptions::default()
        },
    )?;

    let scheduler_uri = format!("ipp://{}:{}/", ctx.server(), ctx.port());
    let body = ipp::get_printers_request(&scheduler_uri, true);

    conn.set_field(HttpField::ContentType, "application/ipp");
    let status = conn.send_request(Method::Post, "/", Some(&body))?;
    if status != HttpStatus::Ok {
        return Err(Error::protocol(format!(
            "scheduler returned {} to Get-Printers",
            status
        )));
    }

    let mut payload = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = conn.read_body(&mut buf)?;
        if n == 0 {
            break;
        }
        payload.extend_from_slice(&buf[..n]);
    }

    let response = ipp::decode_response(&payload)?;
    let mut dests = DestList::new();
    for group in response.printer_groups() {
        let Some(name) = group.get("printer-name") else {
            continue;
        };
        let mut dest = Destination::new(name, None);
        for (opt_name, opt_value) in &group.options {
            if !opt_name.eq_ignore_ascii_case("printer-name") {
                dest.options.set(opt_name, opt_value);
            }
        }
        dests.insert(dest);
    }

    // Scheduler default, only consulted when nothing else named one.
    let default = fetch_server_default(&mut conn).ok().flatten();

    Ok((dests, default))
}

fn fetch_server_default(conn: &mut HttpConnection) -> Result<Option<String>> {
    let body = ipp::IppRequest::new(ipp::OP_CUPS_GET_DEFAULT, 2).encode();
    // Drop the previous exchange's response fields before reusing the
    // connection.
    conn.clear_fields();
    conn.set_field(HttpField::ContentType, "application/ipp");
    let status = conn.send_request(Method::Post, "/", Some(&body))?;
    if status != HttpStatus::Ok {
        return Ok(None);
    }

    let mut payload = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = conn.read_body(&mut buf)?;
        if n == 0 {
            break;
        }
        payload.extend_from_slice(&buf[..n]);
    }

    let response = ipp::decode_response(&payload)?;
    let result = response
        .printer_groups()
        .next()
        .and_then(|group| group.get("printer-name"))
        .map(str::to_string);
    Ok(result)
}

/// Split a `dnssd://Service%20Name._ipp._tcp.local/...` URI host into
/// `(instance, regtype, domain)`.
fn split_dnssd_host(host: &str) -> Option<(String, String, String)> {
    let pos = host.find("._ipp")?;
    let instance = &host[..pos];
    let rest = &host[pos + 1..];
    let tcp = rest.find("._tcp")?;
    let regtype = &rest[..tcp + 5];
    let domain = rest[tcp + 5..].trim_start_matches('.');
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

// ============================================================================
// The enumeration engine
// ============================================================================

struct Enumeration {
    overlay: Overlay,
    def_name: Option<String>,
    def_instance: Option<String>,
    wanted: PrinterType,
    mask: PrinterType,
    cancel: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
    queue: VecDeque<(DestFlags, Destination)>,
    table: Arc<ServiceTable>,
    dnssd: Option<DnssdContext>,
    done: bool,
}

impl Enumeration {
    fn new(ctx: &Context, opts: EnumOptions) -> Result<Enumeration> {
        // 1. Overlays and default resolution: environment, then overlay,
        //    then (later) the scheduler.
        let user_default = ctx.user_default().map(str::to_string);
        let overlay = load_overlay(ctx, user_default.is_some());

        let mut default_full = user_default.or_else(|| overlay.default_name.clone());

        let discovered_only = opts.mask.contains(PrinterType::DISCOVERED)
            && opts.wanted.contains(PrinterType::DISCOVERED);
        let discovery_excluded = opts.mask.contains(PrinterType::DISCOVERED)
            && !opts.wanted.contains(PrinterType::DISCOVERED);

        let table = Arc::new(ServiceTable::default());
        let mut queue = VecDeque::new();

        // 2. Scheduler queues.
        let mut server_dests = DestList::new();
        if !discovered_only {
            match fetch_server_dests(ctx, opts.cancel.clone()) {
                Ok((dests, server_default)) => {
                    if default_full.is_none() {
                        default_full = server_default;
                    }
                    server_dests = dests;
                }
                Err(err) => {
                    log::debug!("[DEST] scheduler fetch failed: {}", err);
                }
            }
        }

        let (def_name, def_instance) = match &default_full {
            None => (None, None),
            Some(full) => match full.split_once('/') {
                Some((n, i)) => (Some(n.to_string()), Some(i.to_string())),
                None => (Some(full.clone()), None),
            },
        };

        // Stream the scheduler queues through the merger, pre-seeding
        // dnssd-backed ones (step 3).
        let mut merged_batch = Vec::new();
        for dest in server_dests.iter() {
            if !dest.printer_type().matches(opts.wanted, opts.mask) {
                continue;
            }

            merged_batch.extend(merge_overlay(
                &overlay,
                def_name.as_deref(),
                def_instance.as_deref(),
                dest,
            ));

            if dest.instance.is_none() {
                if let Some(uri) = dest.device_uri() {
                    if uri.starts_with("dnssd://") {
                        if let Ok(parts) = crate::http::uri::separate_uri(uri) {
                            if let Some((instance, regtype, domain)) =
                                split_dnssd_host(&parts.host)
                            {
                                table.preseed_active(&instance, &regtype, &domain);
                            }
                        }
                    }
                }
            }
        }
        let batch_len = merged_batch.len();
        for (i, dest) in merged_batch.into_iter().enumerate() {
            let flags = if i + 1 < batch_len {
                DestFlags::MORE
            } else {
                DestFlags::NONE
            };
            queue.push_back((flags, dest));
        }

        // 4. Discovery, unless excluded or the caller only wanted the
        //    local snapshot.
        let mut dnssd = None;
        if opts.msec != 0 && !discovery_excluded {
            let context = match opts.backend {
                Some(backend) => DnssdContext::with_backend(backend, None),
                None => DnssdContext::new(None)?,
            };

            for regtype in ["_ipp._tcp", "_ipps._tcp"] {
                let table_ref = Arc::clone(&table);
                context.browse(
                    regtype,
                    Arc::new(
                        move |flags: DnssdFlags,
                              _if_index: u32,
                              name: &str,
                              regtype: &str,
                              domain: &str| {
                            match flags {
                                DnssdFlags::Add => table_ref.add_service(name, regtype, domain),
                                DnssdFlags::Remove => table_ref.remove_service(name),
                            }
                        },
                    ),
                )?;
            }
            dnssd = Some(context);
        }

        let deadline = if opts.msec > 0 {
            Some(Instant::now() + Duration::from_millis(opts.msec as u64))
        } else {
            None
        };

        Ok(Enumeration {
            overlay,
            def_name,
            def_instance,
            wanted: opts.wanted,
            mask: opts.mask,
            cancel: opts.cancel,
            deadline,
            queue,
            table,
            dnssd,
            done: opts.msec == 0 || discovery_excluded,
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(AtomicOrdering::Relaxed))
            .unwrap_or(false)
    }

    /// Drive the pipeline until the next deliverable destination.
    fn next_event(&mut self) -> Option<(DestFlags, Destination)> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Some(item);
            }
            if self.done {
                return None;
            }
            if self.cancelled() {
                self.done = true;
                return None;
            }
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    self.done = true;
                    return None;
                }
            }

            let Some(dnssd) = &self.dnssd else {
                self.done = true;
                return None;
            };

            // Start TXT queries for newly announced services.
            let to_query: Vec<String> = {
                let mut services = self.table.services.write();
                services
                    .iter_mut()
                    .filter(|svc| svc.state == ServiceState::New)
                    .map(|svc| {
                        svc.state = ServiceState::Querying;
                        svc.fullname.clone()
                    })
                    .collect()
            };
            for fullname in to_query {
                let table_ref = Arc::clone(&self.table);
                let result = dnssd.query(
                    &fullname,
                    RRTYPE_TXT,
                    Arc::new(
                        move |_flags: DnssdFlags,
                              _if_index: u32,
                              fullname: &str,
                              _rrtype: u16,
                              rdata: &[u8]| {
                            table_ref.apply_query_result(fullname, rdata);
                        },
                    ),
                );
                if let Err(err) = result {
                    log::debug!("[DEST] TXT query for \"{}\" failed: {}", fullname, err);
                    let mut services = self.table.services.write();
                    for svc in services.iter_mut() {
                        if svc.fullname == fullname {
                            svc.state = ServiceState::Error;
                        }
                    }
                }
            }

            // Deliver resolved services through the merger.
            let deliverable: Vec<Destination> = {
                let mut services = self.table.services.write();
                let mut out = Vec::new();
                for svc in services.iter_mut() {
                    if svc.state == ServiceState::Pending {
                        svc.state = ServiceState::Active;
                        if svc.printer_type.matches(self.wanted, self.mask) {
                            out.push(svc.dest.clone());
                        }
                    }
                }
                out
            };
            for dest in deliverable {
                for merged in merge_overlay(
                    &self.overlay,
                    self.def_name.as_deref(),
                    self.def_instance.as_deref(),
                    &dest,
                ) {
                    self.queue.push_back((DestFlags::NONE, merged));
                }
            }

            // Removed-while-active services surface with the REMOVED flag.
            while let Some(removed) = self.table.removals.lock().pop_front() {
                self.queue.push_back((DestFlags::REMOVED, removed));
            }

            if !self.queue.is_empty() {
                continue;
            }

            // All discovered services settled?
            {
                let services = self.table.services.read();
                let total = services.len();
                let settled = services
                    .iter()
                    .filter(|svc| {
                        matches!(
                            svc.state,
                            ServiceState::Active
                                | ServiceState::Incompatible
                                | ServiceState::Error
                        )
                    })
                    .count();
                if total > 0 && settled == total {
                    self.done = true;
                    return None;
                }
            }

            std::thread::sleep(Duration::from_millis(ENUM_POLL_MSEC));
        }
    }
}

// ============================================================================
// Public surface
// ============================================================================

/// Streaming iterator over enumerated destinations.
///
/// Dropping it early stops discovery (equivalent to a `false`-returning
/// callback).
pub struct Destinations {
    inner: Enumeration,
}

impl Iterator for Destinations {
    type Item = Destination;

    fn next(&mut self) -> Option<Destination> {
        loop {
            let (flags, dest) = self.inner.next_event()?;
            // The iterator view only yields additions.
            if !flags.contains(DestFlags::REMOVED) {
                return Some(dest);
            }
        }
    }
}

impl Destinations {
    /// Iterate with enumeration flags (removals included).
    pub fn next_with_flags(&mut self) -> Option<(DestFlags, Destination)> {
        self.inner.next_event()
    }
}

/// Start an enumeration and return the destination stream.
pub fn enumerate(ctx: &Context, opts: EnumOptions) -> Result<Destinations> {
    Ok(Destinations {
        inner: Enumeration::new(ctx, opts)?,
    })
}

/// Callback-driven enumeration; returning `false` ends it early.
pub fn enum_dests(
    ctx: &Context,
    opts: EnumOptions,
    mut cb: impl FnMut(DestFlags, &Destination) -> bool,
) -> Result<()> {
    let mut stream = enumerate(ctx, opts)?;
    while let Some((flags, dest)) = stream.next_with_flags() {
        if !cb(flags, &dest) {
            break;
        }
    }
    Ok(())
}

/// Convenience snapshot: collect the enumeration into a sorted list.
pub fn get_dests(ctx: &Context, opts: EnumOptions) -> Result<DestList> {
    let mut dests = DestList::new();
    enum_dests(ctx, opts, |flags, dest| {
        if flags.contains(DestFlags::REMOVED) {
            dests.remove(&dest.name, dest.instance.as_deref());
        } else {
            dests.copy_in(dest);
        }
        true
    })?;
    Ok(dests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnssd::LoopbackBackend;
    use std::fs;

    fn test_ctx(lpoptions: Option<&str>) -> (Context, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let sys = tmp.path().join("sys");
        let user = tmp.path().join("user");
        fs::create_dir_all(&sys).unwrap();
        fs::create_dir_all(&user).unwrap();
        if let Some(content) = lpoptions {
            fs::write(user.join("lpoptions"), content).unwrap();
        }
        (Context::for_test(sys, Some(user)), tmp)
    }

    fn discovered_only(backend: Arc<LoopbackBackend>, msec: i64) -> EnumOptions {
        EnumOptions {
            msec,
            wanted: PrinterType::DISCOVERED,
            mask: PrinterType::DISCOVERED,
            cancel: None,
            backend: Some(backend as Arc<dyn DnssdBackend>),
        }
    }

    #[test]
    fn test_enumerate_discovers_registered_service() {
        let (ctx, _tmp) = test_ctx(None);
        let backend = Arc::new(LoopbackBackend::new());
        backend
            .register(
                1000,
                "Photo",
                "_ipp._tcp",
                631,
                &[
                    ("pdl".to_string(), "application/pdf".to_string()),
                    ("ty".to_string(), "Photo Printer".to_string()),
                ],
            )
            .unwrap();

        let dests = get_dests(&ctx, discovered_only(backend, 3000)).unwrap();
        assert_eq!(dests.len(), 1);
        let dest = dests.iter().next().unwrap();
        assert_eq!(dest.name, "Photo");
        assert_eq!(dest.option("printer-make-and-model"), Some("Photo Printer"));
        assert!(dest.printer_type().contains(PrinterType::DISCOVERED));
    }

    #[test]
    fn test_enumerate_overlay_merge_with_default() {
        // A Default/Dest overlay pair for Photo/draft
        // plus a discovered "Photo" service merge into exactly one
        // delivery with overlay options winning.
        let (ctx, _tmp) = test_ctx(Some(
            "Default Photo/draft media=na_letter_8.5x11in\nDest Photo/draft media=na_index-4x6_4x6in\n",
        ));
        let backend = Arc::new(LoopbackBackend::new());
        backend
            .register(
                1000,
                "Photo",
                "_ipp._tcp",
                631,
                &[
                    ("pdl".to_string(), "application/pdf".to_string()),
                    ("ty".to_string(), "Photo Printer".to_string()),
                ],
            )
            .unwrap();

        let mut results = Vec::new();
        enum_dests(&ctx, discovered_only(backend, 3000), |_flags, dest| {
            results.push(dest.clone());
            true
        })
        .unwrap();

        assert_eq!(results.len(), 1, "got {:?}", results);
        let dest = &results[0];
        assert_eq!(dest.name, "Photo");
        assert_eq!(dest.instance.as_deref(), Some("draft"));
        assert!(dest.is_default);
        assert_eq!(dest.option("media"), Some("na_index-4x6_4x6in"));
        assert_eq!(dest.option("printer-make-and-model"), Some("Photo Printer"));
    }

    #[test]
    fn test_enumerate_filters_incompatible_pdl() {
        let (ctx, _tmp) = test_ctx(None);
        let backend = Arc::new(LoopbackBackend::new());
        backend
            .register(
                1000,
                "Legacy",
                "_ipp._tcp",
                631,
                &[("pdl".to_string(), "application/postscript".to_string())],
            )
            .unwrap();

        let dests = get_dests(&ctx, discovered_only(backend, 1500)).unwrap();
        assert!(dests.is_empty());
    }

    #[test]
    fn test_enumerate_type_filter() {
        let (ctx, _tmp) = test_ctx(None);
        let backend = Arc::new(LoopbackBackend::new());
        backend
            .register(
                1000,
                "Mono",
                "_ipp._tcp",
                631,
                &[("pdl".to_string(), "application/pdf".to_string())],
            )
            .unwrap();
        backend
            .register(
                1001,
                "Colorful",
                "_ipp._tcp",
                631,
                &[
                    ("pdl".to_string(), "application/pdf".to_string()),
                    ("color".to_string(), "T".to_string()),
                ],
            )
            .unwrap();

        let opts = EnumOptions {
            msec: 3000,
            wanted: PrinterType::DISCOVERED | PrinterType::COLOR,
            mask: PrinterType::DISCOVERED | PrinterType::COLOR,
            cancel: None,
            backend: Some(backend as Arc<dyn DnssdBackend>),
        };

        let dests = get_dests(&ctx, opts).unwrap();
        assert_eq!(dests.len(), 1);
        assert_eq!(dests.iter().next().unwrap().name, "Colorful");
    }

    #[test]
    fn test_enumerate_cancel_stops_quickly() {
        let (ctx, _tmp) = test_ctx(None);
        let backend = Arc::new(LoopbackBackend::new());
        let cancel = Arc::new(AtomicBool::new(true));

        let opts = EnumOptions {
            msec: -1,
            cancel: Some(cancel),
            ..discovered_only(backend, -1)
        };

        let start = Instant::now();
        let dests = get_dests(&ctx, opts).unwrap();
        assert!(dests.is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_enumerate_msec_zero_is_local_snapshot() {
        let (ctx, _tmp) = test_ctx(None);
        let backend = Arc::new(LoopbackBackend::new());
        backend
            .register(
                1000,
                "Photo",
                "_ipp._tcp",
                631,
                &[("pdl".to_string(), "application/pdf".to_string())],
            )
            .unwrap();

        // Budget 0: no discovery at all.
        let dests = get_dests(&ctx, discovered_only(backend, 0)).unwrap();
        assert!(dests.is_empty());
    }

    #[test]
    fn test_iterator_streams_destinations() {
        let (ctx, _tmp) = test_ctx(None);
        let backend = Arc::new(LoopbackBackend::new());
        backend
            .register(
                1000,
                "Photo",
                "_ipp._tcp",
                631,
                &[("pdl".to_string(), "application/pdf".to_string())],
            )
            .unwrap();

        let mut stream = enumerate(&ctx, discovered_only(backend, 3000)).unwrap();
        let first = stream.next().unwrap();
        assert_eq!(first.name, "Photo");
        // Early drop terminates discovery without issue.
        drop(stream);
    }

    #[test]
    fn test_split_dnssd_host() {
        let (instance, regtype, domain) =
            split_dnssd_host("Photo Printer._ipps._tcp.local").unwrap();
        assert_eq!(instance, "Photo Printer");
        assert_eq!(regtype, "_ipps._tcp");
        assert_eq!(domain, "local");

        assert!(split_dnssd_host("plainhost.example.com").is_none());
    }

    #[test]
    fn test_ipps_preferred_over_ipp() {
        let table = ServiceTable::default();
        table.add_service("Photo", "_ipp._tcp", "local");
        table.add_service("Photo", "_ipps._tcp", "local");

        let services = table.services.read();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].regtype, "_ipps._tcp");
        assert_eq!(services[0].state, ServiceState::New);
    }

    #[test]
    fn test_merge_overlay_no_entries_passthrough() {
        let overlay = Overlay::default();
        let mut dest = Destination::new("Solo", None);
        dest.options.set("printer-make-and-model", "X");

        let merged = merge_overlay(&overlay, Some("Solo"), None, &dest);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].is_default);
    }
}
