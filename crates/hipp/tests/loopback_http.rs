// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::too_many_lines)] // Test code
#![allow(clippy::wildcard_imports)] // Test utility imports

//! Loopback HTTP integration tests
//!
//! Exercises the full client/server engine over real sockets: body
//! round-trips across framings and codings, the chunked-upload scenario,
//! digest authentication, and connection teardown.

use std::net::SocketAddr;
use std::thread::{self, JoinHandle};

use hipp::http::auth::DigestAlgorithm;
use hipp::http::coding::{ContentCoding, Encoder};
use hipp::http::fields::sub_field;
use hipp::http::{ConnectOptions, DigestState, HttpConnection, HttpField, HttpState};
use hipp::{HttpListener, HttpStatus, Method};

fn spawn_server<F>(handler: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(HttpConnection) + Send + 'static,
{
    let listener = HttpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, peer) = listener.accept().unwrap();
        handler(HttpConnection::accepted(stream, peer.to_string()));
    });
    (addr, handle)
}

fn client_for(addr: SocketAddr) -> HttpConnection {
    HttpConnection::connect(
        "127.0.0.1",
        addr.port(),
        ConnectOptions {
            msec: 5000,
            ..ConnectOptions::default()
        },
    )
    .unwrap()
}

fn read_all(conn: &mut HttpConnection) -> Vec<u8> {
    let mut body = Vec::new();
    let mut buf = [0u8; 16384];
    loop {
        let n = conn.read_body(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    body
}

// ============================================================================
// Scenario: chunked upload then fixed-length download
// ============================================================================

#[test]
fn test_chunked_upload_then_fixed_download() {
    let (addr, server) = spawn_server(|mut conn| {
        let (method, resource) = conn.read_request().unwrap();
        assert_eq!(method, Method::Post);
        assert_eq!(resource, "/x");

        let body = read_all(&mut conn);
        assert_eq!(body, b"hello world");
        assert_eq!(body.len(), 11);

        conn.set_field(HttpField::ContentLength, "5");
        conn.write_response(HttpStatus::Ok).unwrap();
        conn.write_body(b"world").unwrap();
        conn.finish_response().unwrap();
        assert_eq!(conn.state(), HttpState::Waiting);
    });

    let mut conn = client_for(addr);
    conn.set_field(HttpField::TransferEncoding, "chunked");
    conn.write_request(Method::Post, "/x").unwrap();
    conn.write_body(b"hello world").unwrap();
    conn.finish_request().unwrap();

    let status = conn.update().unwrap();
    assert_eq!(status, HttpStatus::Ok);

    let body = read_all(&mut conn);
    assert_eq!(body, b"world");
    assert_eq!(body.len(), 5);
    assert_eq!(conn.state(), HttpState::Waiting);

    server.join().unwrap();
}

// ============================================================================
// Property: body round-trips across framing x coding x size
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Framing {
    Chunked,
    Fixed,
}

fn round_trip_case(framing: Framing, coding: ContentCoding, size: usize) {
    let payload: Vec<u8> = (0..size).map(|i| (i * 131 % 251) as u8).collect();
    let expected = payload.clone();

    let (addr, server) = spawn_server(move |mut conn| {
        let _ = conn.read_request().unwrap();
        let body = read_all(&mut conn);

        // Echo the decoded body back with the same framing and coding.
        match framing {
            Framing::Chunked => {
                conn.set_field(HttpField::TransferEncoding, "chunked");
                if coding != ContentCoding::Identity {
                    conn.set_field(HttpField::ContentEncoding, coding.name());
                }
                conn.write_response(HttpStatus::Ok).unwrap();
                conn.write_body(&body).unwrap();
                conn.finish_response().unwrap();
            }
            Framing::Fixed => {
                let wire = pre_encode(coding, &body);
                conn.set_field(HttpField::ContentLength, &wire.len().to_string());
                if coding != ContentCoding::Identity {
                    conn.set_field(HttpField::ContentEncoding, coding.name());
                }
                conn.write_response(HttpStatus::Ok).unwrap();
                if !wire.is_empty() {
                    conn.write_body(&wire).unwrap();
                    conn.finish_response().unwrap();
                }
            }
        }
    });

    let mut conn = client_for(addr);
    match framing {
        Framing::Chunked => {
            conn.set_field(HttpField::TransferEncoding, "chunked");
            if coding != ContentCoding::Identity {
                conn.set_field(HttpField::ContentEncoding, coding.name());
            }
            conn.write_request(Method::Post, "/echo").unwrap();
            conn.write_body(&payload).unwrap();
        }
        Framing::Fixed => {
            let wire = pre_encode(coding, &payload);
            conn.set_field(HttpField::ContentLength, &wire.len().to_string());
            if coding != ContentCoding::Identity {
                conn.set_field(HttpField::ContentEncoding, coding.name());
            }
            conn.write_request(Method::Post, "/echo").unwrap();
            conn.write_body(&wire).unwrap();
        }
    }
    conn.finish_request().unwrap();

    let status = conn.update().unwrap();
    assert_eq!(status, HttpStatus::Ok, "case {:?}/{:?}/{}", framing, coding, size);

    let body = read_all(&mut conn);
    assert_eq!(body, expected, "case {:?}/{:?}/{}", framing, coding, size);
    assert_eq!(conn.state(), HttpState::Waiting);

    server.join().unwrap();
}

fn pre_encode(coding: ContentCoding, data: &[u8]) -> Vec<u8> {
    let mut enc = Encoder::new(coding);
    enc.feed(data).unwrap();
    enc.finish().unwrap()
}

#[test]
fn test_round_trip_small_sizes() {
    for framing in [Framing::Chunked, Framing::Fixed] {
        for coding in [ContentCoding::Identity, ContentCoding::Gzip, ContentCoding::Deflate] {
            for size in [0usize, 1, 15, 16] {
                round_trip_case(framing, coding, size);
            }
        }
    }
}

#[test]
fn test_round_trip_medium_sizes() {
    for framing in [Framing::Chunked, Framing::Fixed] {
        for coding in [ContentCoding::Identity, ContentCoding::Gzip, ContentCoding::Deflate] {
            for size in [32767usize, 65536] {
                round_trip_case(framing, coding, size);
            }
        }
    }
}

#[test]
fn test_round_trip_large_body() {
    for framing in [Framing::Chunked, Framing::Fixed] {
        for coding in [ContentCoding::Identity, ContentCoding::Gzip, ContentCoding::Deflate] {
            round_trip_case(framing, coding, 1_000_000);
        }
    }
}

// ============================================================================
// Scenario: digest challenge retry
// ============================================================================

#[test]
fn test_digest_challenge_retry() {
    let (addr, server) = spawn_server(|mut conn| {
        // First attempt: no Authorization, send the challenge.
        let (method, resource) = conn.read_request().unwrap();
        assert_eq!(method, Method::Get);
        assert_eq!(resource, "/a");
        assert!(conn.field(HttpField::Authorization).is_none());

        conn.set_field(
            HttpField::WwwAuthenticate,
            "Digest realm=\"cups\", qop=\"auth\", nonce=\"abc123\", algorithm=MD5",
        );
        conn.set_field(HttpField::ContentLength, "0");
        conn.write_response(HttpStatus::Unauthorized).unwrap();

        // Second attempt must carry a correctly computed response.
        let (_, _) = conn.read_request().unwrap();
        let auth = conn
            .field(HttpField::Authorization)
            .expect("retry carries Authorization")
            .to_string();
        assert!(auth.starts_with("Digest "));

        let cnonce = sub_field(&auth, "cnonce").unwrap();
        let nc = sub_field(&auth, "nc").unwrap();
        assert_eq!(nc, "00000001");

        let expected = DigestState {
            realm: "cups".to_string(),
            nonce: "abc123".to_string(),
            opaque: None,
            qop: Some("auth".to_string()),
            algorithm: DigestAlgorithm::Md5,
            nonce_count: 1,
            cnonce,
        }
        .response("user", "pass", Method::Get, "/a");
        assert_eq!(sub_field(&auth, "response").unwrap(), expected);

        conn.set_field(HttpField::ContentLength, "2");
        conn.write_response(HttpStatus::Ok).unwrap();
        conn.write_body(b"ok").unwrap();
        conn.finish_response().unwrap();
    });

    let mut conn = client_for(addr);
    conn.set_auth("user", "pass");
    let status = conn.send_request(Method::Get, "/a", None).unwrap();
    assert_eq!(status, HttpStatus::Ok);

    let body = read_all(&mut conn);
    assert_eq!(body, b"ok");

    server.join().unwrap();
}

// ============================================================================
// Close semantics
// ============================================================================

#[test]
fn test_close_releases_socket() {
    let (addr, server) = spawn_server(|mut conn| {
        let _ = conn.read_request().unwrap();
        conn.set_field(HttpField::ContentLength, "0");
        // The client closed already: either the response write trips on
        // the dead socket, or the next header read fails instead of
        // hanging on a live one.
        if conn.write_response(HttpStatus::Ok).is_ok() && conn.state() == HttpState::Waiting {
            assert!(conn.read_request().is_err());
        }
    });

    let mut conn = client_for(addr);
    conn.set_field(HttpField::ContentLength, "0");
    conn.write_request(Method::Get, "/bye").unwrap();
    conn.close();
    assert_eq!(conn.state(), HttpState::Waiting);

    server.join().unwrap();
}

#[test]
fn test_basic_auth_retry() {
    let (addr, server) = spawn_server(|mut conn| {
        let _ = conn.read_request().unwrap();
        conn.set_field(HttpField::WwwAuthenticate, "Basic realm=\"cups\"");
        conn.set_field(HttpField::ContentLength, "0");
        conn.write_response(HttpStatus::Unauthorized).unwrap();

        let _ = conn.read_request().unwrap();
        let auth = conn.field(HttpField::Authorization).unwrap();
        // base64("user:pass")
        assert_eq!(auth, "Basic dXNlcjpwYXNz");

        conn.set_field(HttpField::ContentLength, "0");
        conn.write_response(HttpStatus::Ok).unwrap();
    });

    let mut conn = client_for(addr);
    conn.set_auth("user", "pass");
    let status = conn.send_request(Method::Get, "/b", None).unwrap();
    assert_eq!(status, HttpStatus::Ok);

    server.join().unwrap();
}
