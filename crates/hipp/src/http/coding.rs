// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Content codings: `gzip`/`x-gzip` and `deflate`/`x-deflate` via zlib.
//!
//! Window conventions: reads use raw inflate (15) for deflate and gunzip
//! (31) for gzip; writes use raw deflate (-11) and gzip (27).  In flate2
//! terms these are `DeflateDecoder`, `GzDecoder`, `DeflateEncoder`, and
//! `GzEncoder`.

use std::io::{self, Write};

use flate2::write::{DeflateDecoder, DeflateEncoder, GzDecoder, GzEncoder};
use flate2::Compression;

/// Scratch-buffer granularity for feeding the codec.
pub const CODING_BUFFER: usize = 32 * 1024;

/// Content coding negotiated via `Content-Encoding`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContentCoding {
    #[default]
    Identity,
    Gzip,
    Deflate,
}

impl ContentCoding {
    /// Parse a `Content-Encoding` token.
    pub fn from_name(name: &str) -> Option<ContentCoding> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("identity") || name.is_empty() {
            Some(ContentCoding::Identity)
        } else if name.eq_ignore_ascii_case("gzip") || name.eq_ignore_ascii_case("x-gzip") {
            Some(ContentCoding::Gzip)
        } else if name.eq_ignore_ascii_case("deflate") || name.eq_ignore_ascii_case("x-deflate") {
            Some(ContentCoding::Deflate)
        } else {
            None
        }
    }

    /// Canonical token for the header.
    pub fn name(self) -> &'static str {
        match self {
            ContentCoding::Identity => "identity",
            ContentCoding::Gzip => "gzip",
            ContentCoding::Deflate => "deflate",
        }
    }
}

// ============================================================================
// Streaming decoder
// ============================================================================

enum DecoderKind {
    Identity(Vec<u8>),
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(DeflateDecoder<Vec<u8>>),
}

/// Incremental body decoder: feed wire bytes, drain decoded bytes.
pub struct Decoder {
    kind: DecoderKind,
}

impl Decoder {
    pub fn new(coding: ContentCoding) -> Decoder {
        let kind = match coding {
            ContentCoding::Identity => DecoderKind::Identity(Vec::new()),
            ContentCoding::Gzip => DecoderKind::Gzip(GzDecoder::new(Vec::new())),
            ContentCoding::Deflate => DecoderKind::Deflate(DeflateDecoder::new(Vec::new())),
        };
        Decoder { kind }
    }

    /// Feed compressed bytes from the wire.
    pub fn feed(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.kind {
            DecoderKind::Identity(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            DecoderKind::Gzip(d) => d.write_all(data),
            DecoderKind::Deflate(d) => d.write_all(data),
        }
    }

    /// Drain whatever has been decoded so far.
    pub fn take(&mut self) -> Vec<u8> {
        match &mut self.kind {
            DecoderKind::Identity(buf) => std::mem::take(buf),
            DecoderKind::Gzip(d) => std::mem::take(d.get_mut()),
            DecoderKind::Deflate(d) => std::mem::take(d.get_mut()),
        }
    }

    /// Flush the stream at end of body and return the final bytes.
    pub fn finish(self) -> io::Result<Vec<u8>> {
        match self.kind {
            DecoderKind::Identity(buf) => Ok(buf),
            DecoderKind::Gzip(d) => d.finish(),
            DecoderKind::Deflate(d) => d.finish(),
        }
    }
}

// ============================================================================
// Streaming encoder
// ============================================================================

enum EncoderKind {
    Identity(Vec<u8>),
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(DeflateEncoder<Vec<u8>>),
}

/// Incremental body encoder: feed plain bytes, drain wire bytes.
pub struct Encoder {
    kind: EncoderKind,
}

impl Encoder {
    pub fn new(coding: ContentCoding) -> Encoder {
        let kind = match coding {
            ContentCoding::Identity => EncoderKind::Identity(Vec::new()),
            ContentCoding::Gzip => {
                EncoderKind::Gzip(GzEncoder::new(Vec::new(), Compression::default()))
            }
            ContentCoding::Deflate => {
                EncoderKind::Deflate(DeflateEncoder::new(Vec::new(), Compression::default()))
            }
        };
        Encoder { kind }
    }

    /// Feed plaintext body bytes.
    pub fn feed(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.kind {
            EncoderKind::Identity(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            EncoderKind::Gzip(e) => e.write_all(data),
            EncoderKind::Deflate(e) => e.write_all(data),
        }
    }

    /// Drain whatever wire bytes the codec has produced so far.
    pub fn take(&mut self) -> Vec<u8> {
        match &mut self.kind {
            EncoderKind::Identity(buf) => std::mem::take(buf),
            EncoderKind::Gzip(e) => std::mem::take(e.get_mut()),
            EncoderKind::Deflate(e) => std::mem::take(e.get_mut()),
        }
    }

    /// Finish the stream (`Z_FINISH`) and return the trailing bytes.
    pub fn finish(self) -> io::Result<Vec<u8>> {
        match self.kind {
            EncoderKind::Identity(buf) => Ok(buf),
            EncoderKind::Gzip(e) => e.finish(),
            EncoderKind::Deflate(e) => e.finish(),
        }
    }
}
