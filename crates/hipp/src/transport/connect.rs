// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cancellable connect and readiness waits.
//!
//! Connect walks the address list with a per-address deadline carved out
//! of the overall millisecond budget.  The cancel flag is checked on every
//! poll iteration (50 ms granularity), so cancellation latency is bounded
//! regardless of the budget.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};
use crate::transport::{AddrList, Endpoint, HttpStream};

/// Cancel-check granularity for connect/wait loops.
const POLL_SLICE_MS: i32 = 50;

// ============================================================================
// Readiness waits
// ============================================================================

#[cfg(unix)]
fn poll_fd(fd: std::os::unix::io::RawFd, events: i16, timeout_ms: i32) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    loop {
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(rc > 0);
    }
}

/// Wait up to `msec` milliseconds for `stream` to become readable.
///
/// Returns `true` on readable, `false` on timeout.  A negative budget
/// waits indefinitely.
#[cfg(unix)]
pub fn wait_readable(stream: &dyn HttpStream, msec: i64) -> Result<bool> {
    let timeout = if msec < 0 {
        -1
    } else {
        msec.min(i32::MAX as i64) as i32
    };
    poll_fd(stream.as_raw_fd(), libc::POLLIN, timeout).map_err(Error::Io)
}

/// Readiness waits are unavailable without `poll(2)`; the read path's
/// socket timeouts provide the budget instead.
#[cfg(not(unix))]
pub fn wait_readable(_stream: &dyn HttpStream, _msec: i64) -> Result<bool> {
    Ok(true)
}

// ============================================================================
// Connect
// ============================================================================

fn check_cancel(cancel: Option<&AtomicBool>) -> Result<()> {
    if let Some(flag) = cancel {
        if flag.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
    }
    Ok(())
}

fn configure_stream(socket: &Socket) -> io::Result<()> {
    socket.set_nodelay(true)?;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    socket.set_nosigpipe(true)?;
    Ok(())
}

/// Connect one pre-resolved endpoint with its own deadline.
fn connect_one(
    ep: &Endpoint,
    deadline: Instant,
    cancel: Option<&AtomicBool>,
) -> Result<Box<dyn HttpStream>> {
    let (socket, sockaddr) = match ep {
        Endpoint::Resolved(addr) => {
            let domain = match addr {
                SocketAddr::V4(_) => Domain::IPV4,
                SocketAddr::V6(_) => Domain::IPV6,
            };
            (
                Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(Error::Io)?,
                socket2::SockAddr::from(*addr),
            )
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => (
            Socket::new(Domain::UNIX, Type::STREAM, None).map_err(Error::Io)?,
            socket2::SockAddr::unix(path).map_err(Error::Io)?,
        ),
        Endpoint::Host { host, .. } => {
            // resolved() flattens these away; seeing one here is a bug
            return Err(Error::invalid(format!("unresolved endpoint {}", host)));
        }
    };

    socket.set_nonblocking(true).map_err(Error::Io)?;

    match socket.connect(&sockaddr) {
        Ok(()) => {}
        Err(e)
            if e.raw_os_error() == Some(libc_einprogress())
                || e.kind() == io::ErrorKind::WouldBlock =>
        {
            // Connection in progress: poll for writability in slices so the
            // cancel flag is observed promptly.
            loop {
                check_cancel(cancel)?;

                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::Timeout);
                }
                let remaining = (deadline - now).as_millis() as i32;
                let slice = remaining.min(POLL_SLICE_MS);

                #[cfg(unix)]
                {
                    use std::os::unix::io::AsRawFd;
                    if poll_fd(socket.as_raw_fd(), libc::POLLOUT, slice).map_err(Error::Io)? {
                        break;
                    }
                }
                #[cfg(not(unix))]
                {
                    std::thread::sleep(Duration::from_millis(slice as u64));
                    break;
                }
            }

            if let Some(err) = socket.take_error().map_err(Error::Io)? {
                return Err(Error::Io(err));
            }
        }
        Err(e) => return Err(Error::Io(e)),
    }

    check_cancel(cancel)?;

    socket.set_nonblocking(false).map_err(Error::Io)?;
    configure_stream(&socket).map_err(Error::Io)?;

    match ep {
        Endpoint::Resolved(_) => Ok(Box::new(TcpStream::from(socket))),
        #[cfg(unix)]
        Endpoint::Unix(_) => Ok(Box::new(std::os::unix::net::UnixStream::from(socket))),
        Endpoint::Host { .. } => unreachable!(),
    }
}

/// Connect to the first reachable endpoint in `list`.
///
/// `msec` is the overall budget (negative = indefinite, mapped to 30 s per
/// address); each endpoint gets an equal share of what remains.  The
/// cancel flag unwinds the attempt at the next poll boundary.
pub fn connect(
    list: &AddrList,
    msec: i64,
    cancel: Option<&AtomicBool>,
) -> Result<Box<dyn HttpStream>> {
    let endpoints = list.resolved()?;
    let start = Instant::now();
    let mut last_err = None;

    for (i, ep) in endpoints.iter().enumerate() {
        check_cancel(cancel)?;

        let remaining_eps = (endpoints.len() - i) as i64;
        let per_addr_ms = if msec < 0 {
            30_000
        } else {
            let elapsed = start.elapsed().as_millis() as i64;
            let remaining = msec - elapsed;
            if remaining <= 0 {
                return Err(last_err.unwrap_or(Error::Timeout));
            }
            (remaining / remaining_eps).max(1)
        };
        let deadline = Instant::now() + Duration::from_millis(per_addr_ms as u64);

        match connect_one(ep, deadline, cancel) {
            Ok(stream) => {
                log::debug!("[TRANSPORT] connected to {:?}", ep);
                return Ok(stream);
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                log::debug!("[TRANSPORT] connect to {:?} failed: {}", ep, err);
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or(Error::Timeout))
}

fn libc_einprogress() -> i32 {
    #[cfg(unix)]
    {
        libc::EINPROGRESS
    }
    #[cfg(not(unix))]
    {
        10036 // WSAEINPROGRESS
    }
}

// ============================================================================
// Listener (server mode)
// ============================================================================

/// TCP listener producing accepted sockets for server-mode connections.
pub struct HttpListener {
    inner: TcpListener,
}

impl HttpListener {
    /// Bind with `SO_REUSEADDR` on the given address.
    pub fn bind(addr: SocketAddr) -> Result<HttpListener> {
        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(Error::Io)?;
        socket.set_reuse_address(true).map_err(Error::Io)?;
        socket.bind(&addr.into()).map_err(Error::Io)?;
        socket.listen(128).map_err(Error::Io)?;

        Ok(HttpListener {
            inner: socket.into(),
        })
    }

    /// Local address (useful after binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Error::Io)
    }

    /// Accept one connection; the socket comes back blocking with
    /// `TCP_NODELAY` set.
    pub fn accept(&self) -> Result<(Box<dyn HttpStream>, SocketAddr)> {
        let (stream, peer) = self.inner.accept().map_err(Error::Io)?;
        stream.set_nodelay(true).map_err(Error::Io)?;
        Ok((Box::new(stream), peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::AddrFamily;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_connect_loopback() {
        let listener = HttpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let port = listener.local_addr().unwrap().port();

        let list = AddrList::new("127.0.0.1", port, AddrFamily::V4).unwrap();
        let stream = connect(&list, 5000, None).unwrap();
        assert!(!stream.is_tls());

        let (_accepted, peer) = listener.accept().unwrap();
        assert!(peer.ip().is_loopback());
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to find a port that is almost certainly closed.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };

        let list = AddrList::new("127.0.0.1", port, AddrFamily::V4).unwrap();
        let err = connect(&list, 2000, None).unwrap_err();
        assert!(matches!(err, Error::Io(_) | Error::Timeout));
    }

    #[test]
    fn test_connect_cancelled_quickly() {
        // RFC 5737 TEST-NET address: unroutable, connect will hang until
        // the deadline, so cancellation is what ends the attempt.
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::Relaxed);
        });

        let start = Instant::now();
        let list = AddrList::new("192.0.2.1", 631, AddrFamily::V4).unwrap();
        let err = connect(&list, 5000, Some(&cancel)).unwrap_err();
        let elapsed = start.elapsed();

        handle.join().unwrap();

        assert!(matches!(err, Error::Cancelled), "got {:?}", err);
        assert!(elapsed <= Duration::from_millis(150), "took {:?}", elapsed);
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_readable_timeout() {
        let listener = HttpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let port = listener.local_addr().unwrap().port();
        let list = AddrList::new("127.0.0.1", port, AddrFamily::V4).unwrap();
        let stream = connect(&list, 5000, None).unwrap();
        let (_accepted, _) = listener.accept().unwrap();

        // Nothing written yet: must time out.
        assert!(!wait_readable(&*stream, 50).unwrap());
    }
}
