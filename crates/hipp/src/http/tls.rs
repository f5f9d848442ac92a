// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TLS sessions over an existing transport stream.
//!
//! Client trust is decided by the pinned-credential store, not webpki
//! roots: the verifier records the presented chain, evaluates it against
//! the pin for the hostname, pins on first use, and rejects `Changed`,
//! `Expired`, and `Invalid` chains.  Signatures inside the handshake are
//! still verified cryptographically.
//!
//! The stream implements [`HttpStream`], so a plaintext connection can be
//! upgraded in place after a `101 Switching Protocols` response.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConnection, Connection, DigitallySignedStruct, ServerConnection, SignatureScheme};

use crate::config::TLS_UPGRADE_MSEC;
use crate::creds::{CredentialStore, Credentials, Trust};
use crate::error::{Error, Result};
use crate::transport::HttpStream;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

// ============================================================================
// Pinned-trust verifier
// ============================================================================

/// What to do with each trust verdict.
#[derive(Clone, Debug)]
pub struct TrustPolicy {
    /// Pin store; `None` accepts everything without pinning (no user
    /// config directory).
    pub store: Option<CredentialStore>,
    /// Require the leaf certificate to match the hostname.
    pub require_name_match: bool,
    /// Accept `Expired` chains (printers are routinely stale).
    pub allow_expired: bool,
}

impl Default for TrustPolicy {
    fn default() -> TrustPolicy {
        TrustPolicy {
            store: None,
            require_name_match: false,
            allow_expired: false,
        }
    }
}

#[derive(Debug)]
struct PinnedTrustVerifier {
    hostname: String,
    policy: TrustPolicy,
    provider: Arc<CryptoProvider>,
}

impl PinnedTrustVerifier {
    fn decide(&self, chain: &Credentials) -> std::result::Result<(), rustls::Error> {
        if self.policy.require_name_match && !chain.validate_for_name(&self.hostname) {
            return Err(rustls::Error::General(format!(
                "certificate is not valid for \"{}\"",
                self.hostname
            )));
        }

        let Some(store) = &self.policy.store else {
            return Ok(());
        };

        let trust = store.trust(&self.hostname, chain);
        log::debug!("[TLS] trust for {} is {:?}", self.hostname, trust);

        match trust {
            Trust::Ok => Ok(()),
            Trust::Unknown | Trust::Renewed => {
                // First sight (or legitimate renewal): pin it.
                if let Err(err) = store.save(&self.hostname, chain) {
                    log::warn!("[TLS] unable to pin credentials for {}: {}", self.hostname, err);
                }
                Ok(())
            }
            Trust::Expired if self.policy.allow_expired => Ok(()),
            Trust::Expired => Err(rustls::Error::General(format!(
                "pinned credentials for \"{}\" have expired",
                self.hostname
            ))),
            Trust::Changed => Err(rustls::Error::General(format!(
                "credentials for \"{}\" have changed",
                self.hostname
            ))),
            Trust::Invalid => Err(rustls::Error::General(format!(
                "credentials for \"{}\" are invalid",
                self.hostname
            ))),
        }
    }
}

impl ServerCertVerifier for PinnedTrustVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let mut chain = vec![end_entity.as_ref().to_vec()];
        chain.extend(intermediates.iter().map(|c| c.as_ref().to_vec()));

        self.decide(&Credentials::from_der_chain(chain))?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ============================================================================
// TLS stream
// ============================================================================

/// A TLS session layered over another [`HttpStream`].
#[derive(Debug)]
pub struct TlsStream {
    conn: Connection,
    sock: Box<dyn HttpStream>,
    /// Peer chain captured after the handshake.
    peer_creds: Option<Credentials>,
}

impl TlsStream {
    /// Start a client session on `sock` and run the handshake.
    pub fn start_client(
        sock: Box<dyn HttpStream>,
        hostname: &str,
        policy: TrustPolicy,
    ) -> Result<TlsStream> {
        let provider = provider();
        let verifier = Arc::new(PinnedTrustVerifier {
            hostname: hostname.to_string(),
            policy,
            provider: Arc::clone(&provider),
        });

        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
            .map_err(|e| Error::Tls(format!("protocol setup failed: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|_| Error::Tls(format!("bad server name \"{}\"", hostname)))?;

        let conn = ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| Error::Tls(format!("session setup failed: {}", e)))?;

        Self::handshake(Connection::Client(conn), sock)
    }

    /// Start a server session on `sock` using the given chain and key.
    pub fn start_server(sock: Box<dyn HttpStream>, creds: &Credentials) -> Result<TlsStream> {
        let chain: Vec<CertificateDer<'static>> = creds
            .chain()
            .iter()
            .map(|der| CertificateDer::from(der.clone()))
            .collect();
        let key = creds
            .key()
            .ok_or_else(|| Error::Tls("server credentials have no private key".to_string()))?;
        let key = PrivateKeyDer::try_from(key.to_vec())
            .map_err(|e| Error::Tls(format!("bad private key: {}", e)))?;

        let config = rustls::ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
            .map_err(|e| Error::Tls(format!("protocol setup failed: {}", e)))?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| Error::Tls(format!("bad server credentials: {}", e)))?;

        let conn = ServerConnection::new(Arc::new(config))
            .map_err(|e| Error::Tls(format!("session setup failed: {}", e)))?;

        Self::handshake(Connection::Server(conn), sock)
    }

    fn handshake(mut conn: Connection, mut sock: Box<dyn HttpStream>) -> Result<TlsStream> {
        // Budget the whole handshake, then restore normal timeouts.
        let _ = sock.set_read_timeout(Some(Duration::from_millis(TLS_UPGRADE_MSEC as u64)));
        let _ = sock.set_write_timeout(Some(Duration::from_millis(TLS_UPGRADE_MSEC as u64)));

        let map_io = |e: io::Error| {
            if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut {
                Error::Timeout
            } else {
                Error::Tls(format!("handshake failed: {}", e))
            }
        };

        while conn.is_handshaking() {
            while conn.wants_write() {
                conn.write_tls(&mut sock).map_err(map_io)?;
            }
            if !conn.is_handshaking() {
                break;
            }
            let n = conn.read_tls(&mut sock).map_err(map_io)?;
            if n == 0 {
                return Err(Error::Tls("peer closed during handshake".to_string()));
            }
            conn.process_new_packets()
                .map_err(|e| Error::Tls(format!("handshake failed: {}", e)))?;
        }
        while conn.wants_write() {
            conn.write_tls(&mut sock).map_err(map_io)?;
        }

        let _ = sock.set_read_timeout(None);
        let _ = sock.set_write_timeout(None);

        let peer_creds = conn.peer_certificates().map(|certs| {
            Credentials::from_der_chain(certs.iter().map(|c| c.as_ref().to_vec()).collect())
        });

        log::debug!("[TLS] handshake complete");
        Ok(TlsStream {
            conn,
            sock,
            peer_creds,
        })
    }

    /// Credentials the peer presented during the handshake.
    pub fn peer_credentials(&self) -> Option<&Credentials> {
        self.peer_creds.as_ref()
    }
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // Need more TLS records from the socket.
                    while self.conn.wants_write() {
                        self.conn.write_tls(&mut self.sock)?;
                    }
                    let n = self.conn.read_tls(&mut self.sock)?;
                    if n == 0 {
                        return Ok(0);
                    }
                    self.conn
                        .process_new_packets()
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.sock)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.conn.writer().flush()?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.sock)?;
        }
        self.sock.flush()
    }
}

impl HttpStream for TlsStream {
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        // One close_notify attempt; abandoned if the socket will not take
        // it immediately.
        self.conn.send_close_notify();
        let _ = self.conn.write_tls(&mut self.sock);
        self.sock.shutdown(how)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.sock.set_nonblocking(nonblocking)
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.sock.set_read_timeout(dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.sock.set_write_timeout(dur)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        self.sock.take_error()
    }

    fn is_tls(&self) -> bool {
        true
    }

    #[cfg(unix)]
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.sock.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_shape() {
        let policy = TrustPolicy::default();
        assert!(policy.store.is_none());
        assert!(!policy.require_name_match);
        assert!(!policy.allow_expired);
    }

    #[test]
    fn test_verifier_accepts_without_store() {
        let verifier = PinnedTrustVerifier {
            hostname: "printer.local".to_string(),
            policy: TrustPolicy::default(),
            provider: provider(),
        };
        // Opaque DER is fine when no store/name checks are configured.
        let chain = Credentials::from_der_chain(vec![vec![0x30, 0x00]]);
        assert!(verifier.decide(&chain).is_ok());
    }

    #[test]
    fn test_verifier_pins_and_detects_change() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::with_dir(tmp.path().join("ssl"));

        let verifier = PinnedTrustVerifier {
            hostname: "printer.local".to_string(),
            policy: TrustPolicy {
                store: Some(store.clone()),
                require_name_match: false,
                allow_expired: false,
            },
            provider: provider(),
        };

        // Opaque chains are Invalid under the store, so they are refused.
        let bogus = Credentials::from_der_chain(vec![vec![0xde, 0xad]]);
        assert!(verifier.decide(&bogus).is_err());
    }
}
