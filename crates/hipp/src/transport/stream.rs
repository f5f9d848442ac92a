// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream abstraction over plain TCP, local-domain sockets, and TLS.
//!
//! The HTTP engine is agnostic about what carries its bytes; everything it
//! needs from a socket is collected in the [`HttpStream`] trait.  TLS
//! sessions wrap another `HttpStream` and implement the same trait (see
//! `http::tls`), so encryption can start mid-connection during an
//! `Upgrade` exchange.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Abstraction over byte-oriented connection streams.
///
/// Implementations carry their own timeout plumbing; readiness waits go
/// through the raw descriptor (`poll(2)`), data waits through the socket
/// receive timeout so that TLS-buffered plaintext is never missed.
pub trait HttpStream: Read + Write + Send + std::fmt::Debug {
    /// Shut down the stream.  Close happens on drop.
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()>;

    /// Set non-blocking mode.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Set the receive timeout (`None` blocks indefinitely).
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;

    /// Set the send timeout (`None` blocks indefinitely).
    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()>;

    /// Take a pending socket error, if any.
    fn take_error(&self) -> io::Result<Option<io::Error>>;

    /// Whether this stream carries a TLS session.
    fn is_tls(&self) -> bool {
        false
    }

    /// Raw descriptor for `poll(2)` readiness waits.
    #[cfg(unix)]
    fn as_raw_fd(&self) -> RawFd;
}

// ============================================================================
// TcpStream
// ============================================================================

impl HttpStream for TcpStream {
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, dur)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        TcpStream::take_error(self)
    }

    #[cfg(unix)]
    fn as_raw_fd(&self) -> RawFd {
        AsRawFd::as_raw_fd(self)
    }
}

// ============================================================================
// UnixStream
// ============================================================================

#[cfg(unix)]
impl HttpStream for UnixStream {
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        UnixStream::shutdown(self, how)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        UnixStream::set_nonblocking(self, nonblocking)
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        UnixStream::set_write_timeout(self, dur)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        UnixStream::take_error(self)
    }

    #[cfg(unix)]
    fn as_raw_fd(&self) -> RawFd {
        AsRawFd::as_raw_fd(self)
    }
}

// ============================================================================
// Test mock stream
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trait_is_object_safe() {
        fn _takes_dyn(_s: &dyn HttpStream) {}
    }

    #[test]
    fn test_mock_feed_and_read() {
        let mut s = mock::MockStream::new();
        s.feed(b"abc");

        let mut buf = [0u8; 8];
        let n = s.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");

        let err = s.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_mock_write_capture() {
        let mut s = mock::MockStream::new();
        s.write_all(b"POST /x HTTP/1.1\r\n").unwrap();
        assert!(s.written().starts_with(b"POST"));
    }

    #[test]
    fn test_mock_disconnect() {
        let mut s = mock::MockStream::new();
        s.disconnect();

        let mut buf = [0u8; 4];
        assert_eq!(s.read(&mut buf).unwrap(), 0);
        assert!(s.write(b"x").is_err());
    }
}
