// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The HTTP/1.1 connection: request/response state machine, body framing,
//! content coding, authentication retries, and TLS upgrade.
//!
//! One connection serializes its exchanges strictly (no pipelining).  The
//! same type serves both roles: clients are built with
//! [`HttpConnection::connect`], servers wrap an accepted socket with
//! [`HttpConnection::accepted`].
//!
//! Error stickiness: `io`/`timeout`/`tls`/`protocol` failures poison the
//! connection until [`HttpConnection::close`]; `auth` and `resolve` do
//! not.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{
    BLOCKING_READ_MSEC, MAX_DIGEST_RETRIES, MAX_UNKNOWN_BODY, NONBLOCKING_READ_MSEC,
};
use crate::error::{Error, Result};
use crate::http::auth::{basic_authorization, DigestState};
use crate::http::coding::{ContentCoding, Decoder, Encoder, CODING_BUFFER};
use crate::http::fields::{normalize_host, sub_field, FieldTable, HttpField};
use crate::http::state::{DataEncoding, HttpState, Method};
use crate::http::status::{HttpStatus, HttpVersion};
use crate::http::tls::{TlsStream, TrustPolicy};
use crate::transport::{connect, AddrFamily, AddrList, HttpStream};

/// Client or server role of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnMode {
    Client,
    Server,
}

/// When to encrypt the connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encryption {
    /// Upgrade when the peer asks for it.
    #[default]
    IfRequested,
    /// Never encrypt.
    Never,
    /// Upgrade immediately after connecting (via `Upgrade: TLS`).
    Required,
    /// TLS from the first byte (ipps/https).
    Always,
}

/// Continuation callback invoked on each timeout tick; returning `false`
/// turns the tick into a hard timeout error.
pub type ContinueCallback = Box<dyn FnMut() -> bool + Send>;

/// Options for [`HttpConnection::connect`].
pub struct ConnectOptions {
    pub family: AddrFamily,
    pub encryption: Encryption,
    /// Overall connect budget in milliseconds (negative = indefinite).
    pub msec: i64,
    pub cancel: Option<Arc<AtomicBool>>,
    pub tls_policy: TrustPolicy,
    pub blocking: bool,
}

impl Default for ConnectOptions {
    fn default() -> ConnectOptions {
        ConnectOptions {
            family: AddrFamily::Any,
            encryption: Encryption::IfRequested,
            msec: 30_000,
            cancel: None,
            tls_policy: TrustPolicy::default(),
            blocking: true,
        }
    }
}

/// Username/password pair used to answer authentication challenges.
#[derive(Clone, Debug)]
pub struct AuthCredentials {
    pub username: String,
    pub password: String,
}

// ============================================================================
// Connection
// ============================================================================

/// One HTTP connection (client or server side).
pub struct HttpConnection {
    mode: ConnMode,
    stream: Option<Box<dyn HttpStream>>,
    hostname: String,
    addrlist: Option<AddrList>,
    blocking: bool,
    timeout_secs: Option<f64>,
    timeout_cb: Option<ContinueCallback>,
    encryption: Encryption,
    tls_policy: TrustPolicy,
    cancel: Option<Arc<AtomicBool>>,

    state: HttpState,
    version: HttpVersion,
    status: HttpStatus,
    keep_alive: bool,

    fields: FieldTable,
    cookie: Option<String>,

    // Read side
    rbuf: Vec<u8>,
    rstart: usize,
    saw_eof: bool,
    data_encoding: DataEncoding,
    read_decoder: Option<Decoder>,
    decoded: Vec<u8>,
    decoded_start: usize,

    // Write side
    write_encoder: Option<Encoder>,

    // Auth
    digest: DigestState,
    auth: Option<AuthCredentials>,
    authorization: Option<String>,

    /// Send `Expect: 100-continue` on requests with a body.
    expect_continue: bool,

    last_error: Option<(i32, String)>,
    activity: Instant,
}

impl HttpConnection {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Connect to `host:port` as a client.
    pub fn connect(host: &str, port: u16, options: ConnectOptions) -> Result<HttpConnection> {
        let addrlist = AddrList::new(host, port, options.family)?;
        let stream = connect(&addrlist, options.msec, options.cancel.as_deref())?;

        let mut conn = HttpConnection::from_parts(ConnMode::Client, stream, host.to_string());
        conn.addrlist = Some(addrlist);
        conn.blocking = options.blocking;
        conn.encryption = options.encryption;
        conn.tls_policy = options.tls_policy;
        conn.cancel = options.cancel;
        conn.fields
            .set_default(HttpField::Host, &normalize_host(host));
        conn.fields.set_default(HttpField::UserAgent, USER_AGENT);

        match conn.encryption {
            Encryption::Always => conn.start_tls()?,
            Encryption::Required => conn.upgrade()?,
            _ => {}
        }

        Ok(conn)
    }

    /// Wrap an accepted socket as a server-side connection.
    pub fn accepted(stream: Box<dyn HttpStream>, peer: String) -> HttpConnection {
        HttpConnection::from_parts(ConnMode::Server, stream, peer)
    }

    fn from_parts(mode: ConnMode, stream: Box<dyn HttpStream>, hostname: String) -> HttpConnection {
        HttpConnection {
            mode,
            stream: Some(stream),
            hostname,
            addrlist: None,
            blocking: true,
            timeout_secs: None,
            timeout_cb: None,
            encryption: Encryption::IfRequested,
            tls_policy: TrustPolicy::default(),
            cancel: None,
            state: HttpState::Waiting,
            version: HttpVersion::Http11,
            status: HttpStatus::Continue,
            keep_alive: true,
            fields: FieldTable::new(),
            cookie: None,
            rbuf: Vec::new(),
            rstart: 0,
            saw_eof: false,
            data_encoding: DataEncoding::Fields,
            read_decoder: None,
            decoded: Vec::new(),
            decoded_start: 0,
            write_encoder: None,
            digest: DigestState::default(),
            auth: None,
            authorization: None,
            expect_continue: false,
            last_error: None,
            activity: Instant::now(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> HttpState {
        self.state
    }

    pub fn status(&self) -> HttpStatus {
        self.status
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn is_tls(&self) -> bool {
        self.stream.as_ref().map(|s| s.is_tls()).unwrap_or(false)
    }

    /// Seconds since the last successful I/O.
    pub fn idle_secs(&self) -> f64 {
        self.activity.elapsed().as_secs_f64()
    }

    pub fn error_code(&self) -> Option<i32> {
        self.last_error.as_ref().map(|(code, _)| *code)
    }

    pub fn error_string(&self) -> Option<&str> {
        self.last_error.as_ref().map(|(_, msg)| msg.as_str())
    }

    /// Stored cookie string, if any was received/set.
    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    pub fn set_cookie(&mut self, cookie: &str) {
        self.cookie = Some(cookie.to_string());
    }

    /// Header field value (explicit or default).
    pub fn field(&self, field: HttpField) -> Option<&str> {
        self.fields.get(field)
    }

    /// Set a header field for the next message.
    pub fn set_field(&mut self, field: HttpField, value: &str) {
        if field == HttpField::Host {
            let normalized = normalize_host(value);
            self.fields.set(field, &normalized);
        } else {
            self.fields.set(field, value);
        }
    }

    /// Set a default field value that survives [`FieldTable::clear`].
    pub fn set_default_field(&mut self, field: HttpField, value: &str) {
        self.fields.set_default(field, value);
    }

    pub fn clear_fields(&mut self) {
        self.fields.clear();
    }

    /// Install the user I/O timeout (fractional seconds) and an optional
    /// continuation callback.
    pub fn set_timeout(&mut self, secs: f64, callback: Option<ContinueCallback>) {
        self.timeout_secs = if secs > 0.0 { Some(secs) } else { None };
        self.timeout_cb = callback;
        self.apply_socket_timeouts();
    }

    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
        self.apply_socket_timeouts();
    }

    /// Credentials for answering 401 challenges.
    pub fn set_auth(&mut self, username: &str, password: &str) {
        self.auth = Some(AuthCredentials {
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    /// Explicit `Authorization` value (overrides challenge handling).
    pub fn set_authorization(&mut self, value: Option<String>) {
        self.authorization = value;
    }

    /// Ask the server for an interim `100 Continue` before request
    /// bodies; [`HttpConnection::update`] surfaces the interim status.
    pub fn set_expect_continue(&mut self, expect: bool) {
        self.expect_continue = expect;
    }

    /// Change the encryption requirement, upgrading if necessary.
    pub fn set_encryption(&mut self, encryption: Encryption) -> Result<()> {
        self.encryption = encryption;
        if matches!(encryption, Encryption::Required | Encryption::Always) && !self.is_tls() {
            self.upgrade()?;
        }
        Ok(())
    }

    // ========================================================================
    // Error bookkeeping
    // ========================================================================

    fn fail(&mut self, err: Error) -> Error {
        if !matches!(err, Error::Cancelled) {
            log::debug!("[HTTP] {} error: {}", self.hostname, err);
        }
        self.last_error = Some((err.code(), err.to_string()));
        if err.is_sticky() {
            self.state = HttpState::Error;
        }
        err
    }

    fn check_cancel(&self) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Socket plumbing
    // ========================================================================

    fn read_budget_ms(&self) -> i64 {
        if let Some(secs) = self.timeout_secs {
            (secs * 1000.0) as i64
        } else if self.blocking {
            BLOCKING_READ_MSEC
        } else {
            NONBLOCKING_READ_MSEC
        }
    }

    fn apply_socket_timeouts(&mut self) {
        let budget = Duration::from_millis(self.read_budget_ms().max(1) as u64);
        if let Some(stream) = &self.stream {
            let _ = stream.set_read_timeout(Some(budget));
            let _ = stream.set_write_timeout(Some(budget));
        }
    }

    fn stream_mut(&mut self) -> Result<&mut Box<dyn HttpStream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::invalid("connection is closed"))
    }

    /// Pull more bytes into the read buffer, honoring the timeout loop and
    /// continuation callback.  Sets `saw_eof` at end of stream.
    fn fill(&mut self) -> Result<usize> {
        if self.saw_eof {
            return Ok(0);
        }
        self.apply_socket_timeouts();

        let mut tmp = [0u8; CODING_BUFFER];
        loop {
            self.check_cancel()?;

            let stream = self.stream_mut()?;
            match stream.read(&mut tmp) {
                Ok(0) => {
                    self.saw_eof = true;
                    return Ok(0);
                }
                Ok(n) => {
                    self.activity = Instant::now();
                    // Compact consumed prefix before growing.
                    if self.rstart > 0 {
                        self.rbuf.drain(..self.rstart);
                        self.rstart = 0;
                    }
                    self.rbuf.extend_from_slice(&tmp[..n]);
                    return Ok(n);
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    if let Some(cb) = self.timeout_cb.as_mut() {
                        if cb() {
                            continue;
                        }
                    }
                    return Err(Error::Timeout);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    fn buffered(&self) -> &[u8] {
        &self.rbuf[self.rstart..]
    }

    fn consume(&mut self, n: usize) {
        self.rstart += n;
        if self.rstart >= self.rbuf.len() {
            self.rbuf.clear();
            self.rstart = 0;
        }
    }

    /// Read one CRLF (or bare LF) terminated line, without the terminator.
    fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.buffered().iter().position(|&b| b == b'\n') {
                let mut line = self.buffered()[..pos].to_vec();
                self.consume(pos + 1);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return String::from_utf8(line)
                    .map_err(|_| Error::protocol("non-UTF-8 header data"));
            }
            if self.fill()? == 0 {
                return Err(Error::protocol("unexpected end of stream in headers"));
            }
        }
    }

    /// Read up to `buf.len()` raw wire bytes (buffer first, then socket).
    fn raw_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.buffered().is_empty() && self.fill()? == 0 {
            return Ok(0);
        }
        let avail = self.buffered();
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        self.consume(n);
        Ok(n)
    }

    fn raw_write(&mut self, data: &[u8]) -> Result<()> {
        self.apply_socket_timeouts();
        let mut written = 0;
        while written < data.len() {
            self.check_cancel()?;
            let stream = self.stream_mut()?;
            match stream.write(&data[written..]) {
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection closed during write",
                    )))
                }
                Ok(n) => {
                    written += n;
                    self.activity = Instant::now();
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    if let Some(cb) = self.timeout_cb.as_mut() {
                        if cb() {
                            continue;
                        }
                    }
                    return Err(Error::Timeout);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    // ========================================================================
    // TLS
    // ========================================================================

    fn start_tls(&mut self) -> Result<()> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| Error::invalid("connection is closed"))?;

        match TlsStream::start_client(stream, &self.hostname, self.tls_policy.clone()) {
            Ok(tls) => {
                self.stream = Some(Box::new(tls));
                Ok(())
            }
            Err(err) => {
                // Socket already consumed by the failed handshake.
                self.state = HttpState::Error;
                Err(self.fail(err))
            }
        }
    }

    /// `OPTIONS * HTTP/1.1` + `Upgrade: TLS` dance, then TLS start-up.
    fn upgrade(&mut self) -> Result<()> {
        log::debug!("[HTTP] requesting TLS upgrade from {}", self.hostname);

        let host = self
            .fields
            .get(HttpField::Host)
            .map(str::to_string)
            .unwrap_or_else(|| normalize_host(&self.hostname));

        let request = format!(
            "OPTIONS * HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: TLS/1.2,TLS/1.1,TLS/1.0\r\n\r\n",
            host
        );
        self.raw_write(request.as_bytes())
            .map_err(|e| self.fail(e))?;

        // Drain the response headers.
        let status_line = self.read_line().map_err(|e| self.fail(e))?;
        let status = parse_status_line(&status_line).map_err(|e| self.fail(e))?.1;
        let mut content_length = 0u64;
        loop {
            let line = self.read_line().map_err(|e| self.fail(e))?;
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = split_header(&line) {
                if name.eq_ignore_ascii_case("Content-Length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        // Drain any body on the dummy response.
        let mut remaining = content_length;
        let mut sink = [0u8; 512];
        while remaining > 0 {
            let take = sink.len().min(remaining as usize);
            let n = self
                .raw_read(&mut sink[..take])
                .map_err(|e| self.fail(e))?;
            if n == 0 {
                break;
            }
            remaining -= n as u64;
        }

        if status != HttpStatus::SwitchingProtocols {
            let err = Error::Tls(format!("server refused TLS upgrade ({})", status));
            self.close();
            return Err(self.fail(err));
        }

        self.rbuf.clear();
        self.rstart = 0;
        self.start_tls()
    }

    // ========================================================================
    // Client: request / response
    // ========================================================================

    /// Write the request line and headers; body framing comes from the
    /// `Content-Length` / `Transfer-Encoding` fields the caller set.
    ///
    /// On a broken-pipe-style failure the connection reconnects and
    /// retries exactly once (no response data has been consumed yet).
    pub fn write_request(&mut self, method: Method, resource: &str) -> Result<()> {
        if self.mode != ConnMode::Client {
            return Err(Error::invalid("write_request on a server connection"));
        }
        if self.state.in_exchange() {
            return Err(self.fail(Error::protocol(format!(
                "request started in state {}",
                self.state
            ))));
        }
        if resource.is_empty() {
            return Err(Error::invalid("empty resource"));
        }
        if let Some(err) = &self.last_error {
            // Sticky errors require close-and-reconnect first.
            if self.state == HttpState::Error {
                return Err(Error::protocol(format!(
                    "connection poisoned by earlier error: {}",
                    err.1
                )));
            }
        }
        if self.stream.is_none() {
            // Keep-alive ended or previous exchange closed the socket.
            self.reconnect()?;
        }

        // Explicit Authorization wins; otherwise keep using the digest
        // session rolled forward by Authentication-Info: nextnonce.
        let auth_value = match self.authorization.take() {
            Some(value) => Some(value),
            None => match &self.auth {
                Some(creds) if !self.digest.nonce.is_empty() => {
                    let creds = creds.clone();
                    Some(self.digest.authorization(
                        &creds.username,
                        &creds.password,
                        method,
                        resource,
                    )?)
                }
                _ => None,
            },
        };
        if let Some(value) = auth_value {
            self.fields.set(HttpField::Authorization, &value);
        }

        let message = self.format_request(method, resource);

        match self.raw_write(message.as_bytes()) {
            Ok(()) => {}
            Err(Error::Io(e)) if is_broken_pipe(&e) && self.addrlist.is_some() => {
                log::debug!("[HTTP] reconnecting to {} after broken pipe", self.hostname);
                self.reconnect()?;
                let message = self.format_request(method, resource);
                self.raw_write(message.as_bytes()).map_err(|e| self.fail(e))?;
            }
            Err(err) => return Err(self.fail(err)),
        }

        self.state = HttpState::Request(method);
        self.status = HttpStatus::Continue;
        self.data_encoding = request_body_encoding(&self.fields);
        // The engine compresses only chunked bodies; a fixed-length body
        // with a content coding carries pre-encoded wire bytes (the
        // declared length is the wire length).
        self.write_encoder = match self.data_encoding {
            DataEncoding::Chunked { .. } => self
                .fields
                .get(HttpField::ContentEncoding)
                .and_then(ContentCoding::from_name)
                .filter(|c| *c != ContentCoding::Identity)
                .map(Encoder::new),
            _ => None,
        };

        Ok(())
    }

    fn format_request(&self, method: Method, resource: &str) -> String {
        let mut out = format!("{} {} {}\r\n", method.name(), resource, self.version);
        for (field, value) in self.fields.iter_set() {
            out.push_str(&format!("{}: {}\r\n", field.name(), value));
        }
        // Defaults that were not overridden.
        let defaults: Vec<(HttpField, String)> = self
            .fields
            .iter_defaults()
            .filter(|(field, _)| self.fields.get_raw(*field).is_none())
            .map(|(field, value)| (field, value.to_string()))
            .collect();
        for (field, value) in defaults {
            out.push_str(&format!("{}: {}\r\n", field.name(), value));
        }
        if let Some(cookie) = &self.cookie {
            out.push_str(&format!("Cookie: {}\r\n", cookie));
        }
        if self.expect_continue && !method.zero_length_default() {
            out.push_str("Expect: 100-continue\r\n");
        }
        out.push_str("\r\n");
        out
    }

    fn reconnect(&mut self) -> Result<()> {
        let addrlist = self
            .addrlist
            .clone()
            .ok_or_else(|| Error::invalid("no address list to reconnect"))?;

        let was_tls = self.is_tls();
        self.close();
        let stream = connect(&addrlist, 30_000, self.cancel.as_deref())?;
        self.stream = Some(stream);
        self.saw_eof = false;
        self.last_error = None;
        if was_tls || matches!(self.encryption, Encryption::Always) {
            self.start_tls()?;
        }
        Ok(())
    }

    /// Write message body bytes (client request or server response).
    ///
    /// Content coding and chunk framing are applied as negotiated.
    pub fn write_body(&mut self, data: &[u8]) -> Result<usize> {
        match self.state {
            HttpState::Request(_) if self.mode == ConnMode::Client => {}
            HttpState::Send(_) if self.mode == ConnMode::Server => {}
            other => {
                return Err(self.fail(Error::protocol(format!("body write in state {}", other))))
            }
        }

        if self.write_encoder.is_some() {
            let fed = {
                let encoder = self.write_encoder.as_mut().expect("checked above");
                encoder.feed(data).map(|()| encoder.take())
            };
            let wire = match fed {
                Ok(wire) => wire,
                Err(e) => return Err(self.fail(Error::Io(e))),
            };
            if !wire.is_empty() {
                self.write_framed(&wire)?;
            }
        } else {
            self.write_framed(data)?;
        }
        Ok(data.len())
    }

    fn write_framed(&mut self, wire: &[u8]) -> Result<()> {
        match self.data_encoding {
            DataEncoding::Chunked { .. } => {
                // An empty chunk would read as the body terminator.
                if wire.is_empty() {
                    return Ok(());
                }
                let mut msg = format!("{:X}\r\n", wire.len()).into_bytes();
                msg.extend_from_slice(wire);
                msg.extend_from_slice(b"\r\n");
                self.raw_write(&msg).map_err(|e| self.fail(e))
            }
            DataEncoding::Length { remaining } => {
                if (wire.len() as u64) > remaining {
                    return Err(self.fail(Error::protocol("write exceeds Content-Length")));
                }
                self.raw_write(wire).map_err(|e| self.fail(e))?;
                self.data_encoding = DataEncoding::Length {
                    remaining: remaining - wire.len() as u64,
                };
                Ok(())
            }
            _ => self.raw_write(wire).map_err(|e| self.fail(e)),
        }
    }

    /// Finish the outgoing request body: flush the codec and emit the
    /// chunked terminator.  Must be called before [`HttpConnection::update`]
    /// when the request carried a body.
    pub fn finish_request(&mut self) -> Result<()> {
        if self.mode != ConnMode::Client {
            return Err(Error::invalid("finish_request on a server connection"));
        }
        self.finish_body_write()
    }

    /// Finish the outgoing body: flush the codec and emit the chunked
    /// terminator when needed.
    fn finish_body_write(&mut self) -> Result<()> {
        if let Some(encoder) = self.write_encoder.take() {
            let tail = encoder.finish().map_err(|e| self.fail(Error::Io(e)))?;
            if !tail.is_empty() {
                self.write_framed(&tail)?;
            }
        }
        if let DataEncoding::Chunked { .. } = self.data_encoding {
            self.raw_write(b"0\r\n\r\n").map_err(|e| self.fail(e))?;
        }
        self.data_encoding = DataEncoding::Fields;
        Ok(())
    }

    /// Finish the request and read the response status and headers.
    ///
    /// `100 Continue` and `101 Switching Protocols` both report
    /// [`HttpStatus::Continue`]-class results without advancing the
    /// exchange; `101` performs the TLS start-up first.
    pub fn update(&mut self) -> Result<HttpStatus> {
        if self.mode != ConnMode::Client {
            return Err(Error::invalid("update on a server connection"));
        }
        let HttpState::Request(method) = self.state else {
            return Err(self.fail(Error::protocol(format!(
                "update in state {}",
                self.state
            ))));
        };

        let status_line = self.read_line().map_err(|e| self.fail(e))?;
        let (version, status) = parse_status_line(&status_line).map_err(|e| self.fail(e))?;
        self.version = version;

        self.fields.clear();
        loop {
            let line = self.read_line().map_err(|e| self.fail(e))?;
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = split_header(&line) else {
                return Err(self.fail(Error::protocol(format!("malformed header \"{}\"", line))));
            };
            self.store_header(name, value);
        }

        self.status = status;

        match status {
            HttpStatus::Continue => {
                // State and request-body framing do not advance; the caller
                // may continue writing the body.
                return Ok(status);
            }
            HttpStatus::SwitchingProtocols => {
                // No pipelining: the peer stays silent until our ClientHello,
                // so the read buffer is empty here.
                self.rbuf.clear();
                self.rstart = 0;
                self.start_tls()?;
                self.data_encoding = DataEncoding::Fields;
                self.state = HttpState::Waiting;
                return Ok(HttpStatus::Continue);
            }
            _ => {}
        }

        // Keep-alive bookkeeping.
        let conn_field = self.fields.get(HttpField::Connection).unwrap_or("");
        self.keep_alive = match self.version {
            HttpVersion::Http10 => conn_field.eq_ignore_ascii_case("keep-alive"),
            HttpVersion::Http11 => !conn_field.eq_ignore_ascii_case("close"),
        };

        // Digest nonce rollforward.
        if let Some(info) = self.fields.get(HttpField::AuthenticationInfo) {
            if let Some(nextnonce) = sub_field(info, "nextnonce") {
                self.digest.roll_nonce(&nextnonce);
            }
        }

        self.data_encoding = response_body_encoding(&self.fields, method, status)
            .map_err(|e| self.fail(e))?;

        self.read_decoder = self
            .fields
            .get(HttpField::ContentEncoding)
            .and_then(ContentCoding::from_name)
            .filter(|c| *c != ContentCoding::Identity)
            .map(Decoder::new);
        self.decoded.clear();
        self.decoded_start = 0;

        if self.data_encoding.is_complete() && self.read_decoder.is_none() {
            self.end_exchange();
        } else {
            self.state = HttpState::Send(method);
        }

        Ok(status)
    }

    fn store_header(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("Set-Cookie") || name.eq_ignore_ascii_case("Cookie") {
            self.cookie = Some(value.to_string());
            return;
        }
        match HttpField::from_name(name) {
            Some(field) => self.fields.add(field, value),
            None => log::debug!("[HTTP] ignoring unknown field \"{}\"", name),
        }
    }

    /// Read decoded body bytes; `Ok(0)` signals end of body, after which
    /// the connection is back in `Waiting` (keep-alive permitting).
    pub fn read_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.state {
            HttpState::Send(_) if self.mode == ConnMode::Client => {}
            HttpState::Recv(_) if self.mode == ConnMode::Server => {}
            // Server in Send: the request body was already consumed.
            HttpState::Send(_) if self.mode == ConnMode::Server => return Ok(0),
            HttpState::Waiting | HttpState::Status => return Ok(0),
            other => {
                return Err(self.fail(Error::protocol(format!("body read in state {}", other))))
            }
        }

        loop {
            // Serve decoded bytes first.
            let pending = &self.decoded[self.decoded_start..];
            if !pending.is_empty() {
                let n = pending.len().min(buf.len());
                buf[..n].copy_from_slice(&pending[..n]);
                self.decoded_start += n;
                if self.decoded_start >= self.decoded.len() {
                    self.decoded.clear();
                    self.decoded_start = 0;
                }
                return Ok(n);
            }

            let mut wire = [0u8; CODING_BUFFER];
            let n = match self.read_wire_body(&mut wire) {
                Ok(n) => n,
                Err(e) => return Err(self.fail(e)),
            };

            if self.read_decoder.is_some() {
                if n == 0 {
                    let decoder = self.read_decoder.take().expect("checked above");
                    let tail = match decoder.finish() {
                        Ok(tail) => tail,
                        Err(e) => return Err(self.fail(Error::Io(e))),
                    };
                    self.decoded.extend(tail);
                    if self.decoded[self.decoded_start..].is_empty() {
                        self.body_complete();
                        return Ok(0);
                    }
                    continue;
                }
                let fed = {
                    let decoder = self.read_decoder.as_mut().expect("checked above");
                    decoder.feed(&wire[..n]).map(|()| decoder.take())
                };
                match fed {
                    Ok(out) => self.decoded.extend(out),
                    Err(e) => return Err(self.fail(Error::Io(e))),
                }
                // Loop back to serve (or read more if nothing decoded yet).
            } else {
                if n == 0 {
                    self.body_complete();
                    return Ok(0);
                }
                let take = n.min(buf.len());
                buf[..take].copy_from_slice(&wire[..take]);
                if take < n {
                    // Stash the overflow as decoded output.
                    self.decoded.extend_from_slice(&wire[take..n]);
                }
                return Ok(take);
            }
        }
    }

    /// Read raw (wire-framed) body bytes; `Ok(0)` at end of body.
    fn read_wire_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.data_encoding {
            DataEncoding::Fields => Ok(0),
            DataEncoding::Length { remaining } => {
                if remaining == 0 {
                    return Ok(0);
                }
                let want = buf.len().min(remaining.min(usize::MAX as u64) as usize);
                let n = self.raw_read(&mut buf[..want])?;
                if n == 0 {
                    return Err(Error::protocol("connection closed mid-body"));
                }
                self.data_encoding = DataEncoding::Length {
                    remaining: remaining - n as u64,
                };
                Ok(n)
            }
            DataEncoding::Chunked { chunk_remaining } => {
                let mut remaining = chunk_remaining;
                if remaining == 0 {
                    let line = self.read_line()?;
                    let len_str = line.split(';').next().unwrap_or("").trim();
                    let len = u64::from_str_radix(len_str, 16)
                        .map_err(|_| Error::protocol(format!("bad chunk length \"{}\"", line)))?;
                    if len == 0 {
                        // Terminal chunk: consume the trailing CRLF (and any
                        // trailer lines).
                        loop {
                            let trailer = self.read_line()?;
                            if trailer.is_empty() {
                                break;
                            }
                        }
                        self.data_encoding = DataEncoding::Fields;
                        return Ok(0);
                    }
                    remaining = len;
                }

                let want = buf.len().min(remaining.min(usize::MAX as u64) as usize);
                let n = self.raw_read(&mut buf[..want])?;
                if n == 0 {
                    return Err(Error::protocol("connection closed mid-chunk"));
                }
                remaining -= n as u64;
                if remaining == 0 {
                    // Chunk data is followed by CRLF.
                    let sep = self.read_line()?;
                    if !sep.is_empty() {
                        return Err(Error::protocol("missing CRLF after chunk"));
                    }
                }
                self.data_encoding = DataEncoding::Chunked {
                    chunk_remaining: remaining,
                };
                Ok(n)
            }
            DataEncoding::UntilClose { consumed } => {
                let n = self.raw_read(buf)?;
                if n == 0 {
                    self.data_encoding = DataEncoding::Fields;
                    return Ok(0);
                }
                let consumed = consumed + n as u64;
                if consumed > MAX_UNKNOWN_BODY {
                    return Err(Error::protocol("read-until-close body exceeds ceiling"));
                }
                self.data_encoding = DataEncoding::UntilClose { consumed };
                Ok(n)
            }
        }
    }

    fn body_complete(&mut self) {
        match self.state {
            HttpState::Send(_) if self.mode == ConnMode::Client => self.end_exchange(),
            HttpState::Recv(m) if self.mode == ConnMode::Server => {
                self.state = HttpState::Send(m);
            }
            _ => {}
        }
    }

    fn end_exchange(&mut self) {
        self.data_encoding = DataEncoding::Fields;
        self.read_decoder = None;
        if self.keep_alive {
            self.state = HttpState::Waiting;
        } else {
            self.close();
        }
    }

    /// Discard the rest of the incoming message body.
    pub fn flush_body(&mut self) -> Result<()> {
        let mut sink = [0u8; CODING_BUFFER];
        while self.read_body(&mut sink)? > 0 {}
        Ok(())
    }

    // ========================================================================
    // Client: one-shot request with auth retries
    // ========================================================================

    /// Send a complete request and return the final status.
    ///
    /// Handles `100 Continue`, TLS upgrade (`101`), and up to three digest
    /// retries on `401` before surfacing the status.  The response body
    /// (if any) is left for the caller to read.
    pub fn send_request(
        &mut self,
        method: Method,
        resource: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpStatus> {
        let mut digest_attempts = 0u32;
        let mut upgraded = false;

        // The field table is shared between requests and responses, so
        // snapshot the caller's request fields for the retry loop.
        let request_fields: Vec<(HttpField, String)> = self
            .fields
            .iter_set()
            .map(|(f, v)| (f, v.to_string()))
            .collect();

        loop {
            self.check_cancel()?;

            self.fields.clear();
            for (field, value) in &request_fields {
                self.fields.set(*field, value);
            }

            // Requests with a body need framing; default to a fixed length
            // when the caller set neither header.
            if body.is_some()
                && self.fields.get_raw(HttpField::ContentLength).is_none()
                && self.fields.get_raw(HttpField::TransferEncoding).is_none()
            {
                let len = body.map(|b| b.len()).unwrap_or(0);
                self.set_field(HttpField::ContentLength, &len.to_string());
            }

            self.write_request(method, resource)?;
            if let Some(body) = body {
                self.write_body(body)?;
            }
            self.finish_request()?;

            let mut status = self.update()?;
            // Interim 100s: read again until the final status arrives.
            while status == HttpStatus::Continue && self.state.in_exchange() {
                status = self.update()?;
            }

            // A 101 upgrade completed TLS and left the exchange unsent.
            if status == HttpStatus::Continue && self.state == HttpState::Waiting && self.is_tls()
            {
                if upgraded {
                    return Err(self.fail(Error::Tls("repeated TLS upgrade".to_string())));
                }
                upgraded = true;
                continue;
            }

            if status == HttpStatus::Unauthorized {
                let challenge = self
                    .fields
                    .get(HttpField::WwwAuthenticate)
                    .map(str::to_string)
                    .unwrap_or_default();
                let Some(auth) = self.auth.clone() else {
                    return Ok(status);
                };

                // Drop the 401 body before retrying.
                self.flush_body()?;

                if self.digest.absorb_challenge(&challenge) {
                    if digest_attempts >= MAX_DIGEST_RETRIES {
                        self.fail(Error::Auth("digest retries exhausted".to_string()));
                        return Ok(status);
                    }
                    digest_attempts += 1;
                    let value = self.digest.authorization(
                        &auth.username,
                        &auth.password,
                        method,
                        resource,
                    )?;
                    self.authorization = Some(value);
                    continue;
                } else if challenge.to_ascii_lowercase().contains("basic") {
                    if digest_attempts >= 1 {
                        self.fail(Error::Auth("basic credentials rejected".to_string()));
                        return Ok(status);
                    }
                    digest_attempts += 1;
                    self.authorization =
                        Some(basic_authorization(&auth.username, &auth.password));
                    continue;
                } else {
                    self.fail(Error::Auth(format!(
                        "unsupported authentication scheme \"{}\"",
                        challenge
                    )));
                    return Ok(status);
                }
            }

            return Ok(status);
        }
    }

    // ========================================================================
    // Server: request / response
    // ========================================================================

    /// Read a request line and headers; returns the method and resource.
    pub fn read_request(&mut self) -> Result<(Method, String)> {
        if self.mode != ConnMode::Server {
            return Err(Error::invalid("read_request on a client connection"));
        }
        if self.state != HttpState::Waiting {
            return Err(self.fail(Error::protocol(format!(
                "request read in state {}",
                self.state
            ))));
        }

        let line = self.read_line().map_err(|e| self.fail(e))?;
        let mut parts = line.split_ascii_whitespace();
        let (method_str, resource, version_str) =
            match (parts.next(), parts.next(), parts.next()) {
                (Some(m), Some(r), Some(v)) => (m, r.to_string(), v),
                _ => {
                    return Err(self.fail(Error::protocol(format!(
                        "malformed request line \"{}\"",
                        line
                    ))))
                }
            };

        let Some(version) = HttpVersion::parse(version_str) else {
            self.state = HttpState::UnknownVersion;
            return Err(self.fail(Error::protocol(format!(
                "unknown HTTP version \"{}\"",
                version_str
            ))));
        };
        self.version = version;

        let Some(method) = Method::parse(method_str) else {
            self.state = HttpState::UnknownMethod;
            return Err(self.fail(Error::protocol(format!(
                "unknown method \"{}\"",
                method_str
            ))));
        };

        self.fields.clear();
        loop {
            let header = self.read_line().map_err(|e| self.fail(e))?;
            if header.is_empty() {
                break;
            }
            let Some((name, value)) = split_header(&header) else {
                return Err(self.fail(Error::protocol(format!(
                    "malformed header \"{}\"",
                    header
                ))));
            };
            self.store_header(name, value);
        }

        self.keep_alive = match self.version {
            HttpVersion::Http10 => self
                .fields
                .get(HttpField::Connection)
                .map(|v| v.eq_ignore_ascii_case("keep-alive"))
                .unwrap_or(false),
            HttpVersion::Http11 => !self
                .fields
                .get(HttpField::Connection)
                .map(|v| v.eq_ignore_ascii_case("close"))
                .unwrap_or(false),
        };

        self.data_encoding = request_body_encoding(&self.fields);
        self.read_decoder = self
            .fields
            .get(HttpField::ContentEncoding)
            .and_then(ContentCoding::from_name)
            .filter(|c| *c != ContentCoding::Identity)
            .map(Decoder::new);
        self.decoded.clear();
        self.decoded_start = 0;

        self.state = if self.data_encoding.is_complete() && self.read_decoder.is_none() {
            HttpState::Send(method)
        } else {
            HttpState::Recv(method)
        };

        Ok((method, resource))
    }

    /// Write the response status line and headers.
    ///
    /// If the fields declare a body (`Content-Length` > 0 or chunked), the
    /// connection stays in `Send` for [`HttpConnection::write_body`] and
    /// [`HttpConnection::finish_response`]; otherwise the exchange ends.
    pub fn write_response(&mut self, status: HttpStatus) -> Result<()> {
        if self.mode != ConnMode::Server {
            return Err(Error::invalid("write_response on a client connection"));
        }
        let HttpState::Send(method) = self.state else {
            return Err(self.fail(Error::protocol(format!(
                "response written in state {}",
                self.state
            ))));
        };

        let mut out = format!("{} {}\r\n", self.version, status);
        for (field, value) in self.fields.iter_set() {
            out.push_str(&format!("{}: {}\r\n", field.name(), value));
        }
        out.push_str("\r\n");
        self.raw_write(out.as_bytes()).map_err(|e| self.fail(e))?;

        self.status = status;
        self.data_encoding = request_body_encoding(&self.fields);
        self.write_encoder = match self.data_encoding {
            DataEncoding::Chunked { .. } => self
                .fields
                .get(HttpField::ContentEncoding)
                .and_then(ContentCoding::from_name)
                .filter(|c| *c != ContentCoding::Identity)
                .map(Encoder::new),
            _ => None,
        };

        if self.data_encoding.is_complete() && self.write_encoder.is_none() {
            self.fields.clear();
            self.end_exchange();
        } else {
            self.state = HttpState::Send(method);
        }
        Ok(())
    }

    /// Finish the server response body and return to `Waiting`.
    pub fn finish_response(&mut self) -> Result<()> {
        self.finish_body_write()?;
        self.fields.clear();
        self.end_exchange();
        Ok(())
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Shut the connection down.  Socket shutdown and TLS teardown happen
    /// on every path; the object can reconnect (client) afterwards.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.state = HttpState::Waiting;
        self.data_encoding = DataEncoding::Fields;
        self.read_decoder = None;
        self.write_encoder = None;
        self.rbuf.clear();
        self.rstart = 0;
        self.saw_eof = false;
        self.decoded.clear();
        self.decoded_start = 0;
        self.last_error = None;
    }
}

impl Drop for HttpConnection {
    fn drop(&mut self) {
        self.close();
    }
}

const USER_AGENT: &str = concat!("hipp/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Framing helpers
// ============================================================================

fn is_broken_pipe(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

fn split_header(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let name = line[..colon].trim();
    let value = line[colon + 1..].trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value))
}

fn parse_status_line(line: &str) -> Result<(HttpVersion, HttpStatus)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .and_then(HttpVersion::parse)
        .ok_or_else(|| Error::protocol(format!("malformed status line \"{}\"", line)))?;
    let code = parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| Error::protocol(format!("malformed status line \"{}\"", line)))?;
    Ok((version, HttpStatus::from_code(code)))
}

/// Body framing declared by the sender's own headers (requests, and
/// server responses being written).
fn request_body_encoding(fields: &FieldTable) -> DataEncoding {
    let chunked = fields
        .get_raw(HttpField::TransferEncoding)
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    if chunked {
        return DataEncoding::Chunked { chunk_remaining: 0 };
    }
    match fields
        .get_raw(HttpField::ContentLength)
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        Some(0) | None => DataEncoding::Fields,
        Some(n) => DataEncoding::Length { remaining: n },
    }
}

/// Body framing of a response as seen by the client.
fn response_body_encoding(
    fields: &FieldTable,
    method: Method,
    status: HttpStatus,
) -> Result<DataEncoding> {
    // No body ever on HEAD, 1xx, 204, 304.
    if method == Method::Head
        || status.is_informational()
        || status == HttpStatus::NoContent
        || status == HttpStatus::NotModified
    {
        return Ok(DataEncoding::Fields);
    }

    // Chunked wins whenever present; Content-Length only applies when
    // chunked is absent.
    let chunked = fields
        .get_raw(HttpField::TransferEncoding)
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    if chunked {
        return Ok(DataEncoding::Chunked { chunk_remaining: 0 });
    }

    if let Some(value) = fields.get_raw(HttpField::ContentLength) {
        let n = value
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::protocol(format!("bad Content-Length \"{}\"", value)))?;
        return Ok(if n == 0 {
            DataEncoding::Fields
        } else {
            DataEncoding::Length { remaining: n }
        });
    }

    // No explicit body: >= 300 forces zero length, as do the bodyless
    // methods; everything else reads until close under the ceiling.
    if status.is_error_class() || method.zero_length_default() {
        return Ok(DataEncoding::Fields);
    }

    Ok(DataEncoding::UntilClose { consumed: 0 })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockStream;

    fn client_with_mock() -> (HttpConnection, crate::transport::mock::MockHandles) {
        let mock = MockStream::new();
        let handles = mock.handles();
        let mut conn =
            HttpConnection::from_parts(ConnMode::Client, Box::new(mock), "test.local".to_string());
        conn.fields
            .set_default(HttpField::Host, &normalize_host("test.local"));
        conn.addrlist = None;
        (conn, handles)
    }

    fn server_with_mock() -> (HttpConnection, crate::transport::mock::MockHandles) {
        let mock = MockStream::new();
        let handles = mock.handles();
        let conn = HttpConnection::accepted(Box::new(mock), "peer".to_string());
        (conn, handles)
    }

    #[test]
    fn test_client_get_with_content_length() {
        let (mut conn, handles) = client_with_mock();

        conn.write_request(Method::Get, "/a").unwrap();
        assert_eq!(conn.state(), HttpState::Request(Method::Get));

        let written = String::from_utf8(handles.written()).unwrap();
        assert!(written.starts_with("GET /a HTTP/1.1\r\n"));
        assert!(written.contains("Host: test.local\r\n"));
        assert!(written.ends_with("\r\n\r\n"));

        handles.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nworld");
        let status = conn.update().unwrap();
        assert_eq!(status, HttpStatus::Ok);
        assert_eq!(conn.state(), HttpState::Send(Method::Get));

        let mut buf = [0u8; 16];
        let n = conn.read_body(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
        assert_eq!(conn.read_body(&mut buf).unwrap(), 0);
        assert_eq!(conn.state(), HttpState::Waiting);
    }

    #[test]
    fn test_client_chunked_response() {
        let (mut conn, handles) = client_with_mock();

        conn.write_request(Method::Get, "/chunky").unwrap();
        handles.feed(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        );
        conn.update().unwrap();

        let mut body = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = conn.read_body(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
        }
        assert_eq!(body, b"hello world");
        assert_eq!(conn.state(), HttpState::Waiting);
    }

    #[test]
    fn test_client_chunked_request_framing() {
        let (mut conn, handles) = client_with_mock();

        conn.set_field(HttpField::TransferEncoding, "chunked");
        conn.write_request(Method::Post, "/x").unwrap();
        conn.write_body(b"hello world").unwrap();
        conn.finish_request().unwrap();

        handles.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        let status = conn.update().unwrap();
        assert_eq!(status, HttpStatus::Ok);

        let written = String::from_utf8(handles.written()).unwrap();
        assert!(written.contains("B\r\nhello world\r\n"), "got: {}", written);
        assert!(written.ends_with("0\r\n\r\n"));
        assert_eq!(conn.state(), HttpState::Waiting);
    }

    #[test]
    fn test_bad_status_line_is_fatal() {
        let (mut conn, handles) = client_with_mock();

        conn.write_request(Method::Get, "/").unwrap();
        handles.feed(b"BOGUS NONSENSE\r\n\r\n");
        let err = conn.update().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(conn.state(), HttpState::Error);

        // Sticky: new requests are refused until close().
        assert!(conn.write_request(Method::Get, "/again").is_err());
        conn.close();
        assert_eq!(conn.state(), HttpState::Waiting);
    }

    #[test]
    fn test_bad_chunk_length_is_fatal() {
        let (mut conn, handles) = client_with_mock();

        conn.write_request(Method::Get, "/").unwrap();
        handles.feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nZZZ\r\n");
        conn.update().unwrap();

        let mut buf = [0u8; 8];
        let err = conn.read_body(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(conn.state(), HttpState::Error);
    }

    #[test]
    fn test_100_continue_keeps_state() {
        let (mut conn, handles) = client_with_mock();

        conn.set_field(HttpField::ContentLength, "5");
        conn.write_request(Method::Post, "/upload").unwrap();

        handles.feed(b"HTTP/1.1 100 Continue\r\n\r\n");
        let status = conn.update().unwrap();
        assert_eq!(status, HttpStatus::Continue);
        assert_eq!(conn.state(), HttpState::Request(Method::Post));

        conn.write_body(b"hello").unwrap();
        handles.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        assert_eq!(conn.update().unwrap(), HttpStatus::Ok);
    }

    #[test]
    fn test_gzip_response_decoding() {
        let (mut conn, handles) = client_with_mock();

        let mut enc = Encoder::new(ContentCoding::Gzip);
        enc.feed(b"compressed payload").unwrap();
        let wire = enc.finish().unwrap();

        conn.write_request(Method::Get, "/z").unwrap();
        let headers = format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            wire.len()
        );
        handles.feed(headers.as_bytes());
        handles.feed(&wire);
        conn.update().unwrap();

        let mut body = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = conn.read_body(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
        }
        assert_eq!(body, b"compressed payload");
        assert_eq!(conn.state(), HttpState::Waiting);
    }

    #[test]
    fn test_response_zero_body_on_error_status() {
        let (mut conn, handles) = client_with_mock();

        conn.write_request(Method::Get, "/missing").unwrap();
        handles.feed(b"HTTP/1.1 404 Not Found\r\n\r\n");
        let status = conn.update().unwrap();
        assert_eq!(status, HttpStatus::NotFound);
        // No Content-Length and status >= 300: body is zero, exchange over.
        assert_eq!(conn.state(), HttpState::Waiting);
    }

    #[test]
    fn test_connection_close_header_drops_keepalive() {
        let (mut conn, handles) = client_with_mock();

        conn.write_request(Method::Get, "/bye").unwrap();
        handles.feed(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok");
        conn.update().unwrap();
        assert!(!conn.keep_alive());

        let mut buf = [0u8; 4];
        assert_eq!(conn.read_body(&mut buf).unwrap(), 2);
        assert_eq!(conn.read_body(&mut buf).unwrap(), 0);
        // Closed rather than back to a shareable Waiting on a live socket.
        assert!(conn.stream.is_none());
    }

    #[test]
    fn test_nextnonce_rolls_digest_state() {
        let (mut conn, handles) = client_with_mock();
        conn.digest
            .absorb_challenge("Digest realm=\"r\", nonce=\"old\", qop=\"auth\"");

        conn.write_request(Method::Get, "/n").unwrap();
        handles.feed(
            b"HTTP/1.1 200 OK\r\nAuthentication-Info: nextnonce=\"fresh\"\r\nContent-Length: 0\r\n\r\n",
        );
        conn.update().unwrap();
        assert_eq!(conn.digest.nonce, "fresh");
    }

    #[test]
    fn test_server_reads_request_and_responds() {
        let (mut conn, handles) = server_with_mock();

        handles.feed(b"POST /x HTTP/1.1\r\nHost: h\r\nContent-Length: 11\r\n\r\nhello world");
        let (method, resource) = conn.read_request().unwrap();
        assert_eq!(method, Method::Post);
        assert_eq!(resource, "/x");
        assert_eq!(conn.state(), HttpState::Recv(Method::Post));

        let mut body = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = conn.read_body(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
        }
        assert_eq!(body, b"hello world");
        assert_eq!(conn.state(), HttpState::Send(Method::Post));

        conn.set_field(HttpField::ContentLength, "5");
        conn.write_response(HttpStatus::Ok).unwrap();
        conn.write_body(b"world").unwrap();
        conn.finish_response().unwrap();
        assert_eq!(conn.state(), HttpState::Waiting);

        let written = String::from_utf8(handles.written()).unwrap();
        assert!(written.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(written.ends_with("world"));
    }

    #[test]
    fn test_server_unknown_method() {
        let (mut conn, handles) = server_with_mock();
        handles.feed(b"BREW /pot HTTP/1.1\r\n\r\n");
        assert!(conn.read_request().is_err());
        assert_eq!(conn.state(), HttpState::UnknownMethod);
    }

    #[test]
    fn test_server_unknown_version() {
        let (mut conn, handles) = server_with_mock();
        handles.feed(b"GET / HTTP/9.9\r\n\r\n");
        assert!(conn.read_request().is_err());
        assert_eq!(conn.state(), HttpState::UnknownVersion);
    }

    #[test]
    fn test_set_cookie_capture() {
        let (mut conn, handles) = client_with_mock();

        conn.write_request(Method::Get, "/c").unwrap();
        handles.feed(b"HTTP/1.1 200 OK\r\nSet-Cookie: sid=42\r\nContent-Length: 0\r\n\r\n");
        conn.update().unwrap();
        assert_eq!(conn.cookie(), Some("sid=42"));

        // Cookie echoes back on the next request.
        conn.write_request(Method::Get, "/c2").unwrap();
        let written = String::from_utf8(handles.written()).unwrap();
        assert!(written.contains("Cookie: sid=42\r\n"));
    }

    #[test]
    fn test_expect_continue_header() {
        let (mut conn, handles) = client_with_mock();
        conn.set_expect_continue(true);
        conn.set_field(HttpField::ContentLength, "5");
        conn.write_request(Method::Post, "/big").unwrap();

        let written = String::from_utf8(handles.written()).unwrap();
        assert!(written.contains("Expect: 100-continue\r\n"));
    }

    #[test]
    fn test_host_field_normalization() {
        let (mut conn, _handles) = client_with_mock();
        conn.set_field(HttpField::Host, "printer.local.");
        assert_eq!(conn.field(HttpField::Host), Some("printer.local"));

        conn.set_field(HttpField::Host, "fe80::1");
        assert_eq!(conn.field(HttpField::Host), Some("[fe80::1]"));
    }

    #[test]
    fn test_content_length_parse_failure_is_fatal() {
        let (mut conn, handles) = client_with_mock();
        conn.write_request(Method::Get, "/").unwrap();
        handles.feed(b"HTTP/1.1 200 OK\r\nContent-Length: banana\r\n\r\n");
        assert!(matches!(conn.update(), Err(Error::Protocol(_))));
    }
}
