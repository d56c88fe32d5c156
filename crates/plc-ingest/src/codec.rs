// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Inbound payload decoding seam.
//!
//! The feed delivers opaque encoded blobs; deployments plug in whatever
//! cipher their plant gateway uses.  The contract is deliberately
//! infallible: a codec that cannot make sense of a blob returns its
//! best-effort text rendering so the caller can still attempt to parse or
//! log it.  Payload validation happens downstream, not here.

/// Decodes inbound feed blobs to text.
pub trait PayloadCodec: Send + Sync {
    /// Decode a raw frame into UTF-8 text. Must not fail: on any decode
    /// problem, return the input rendered as text unchanged.
    fn decode(&self, raw: &[u8]) -> String;
}

/// Codec for feeds that transmit plaintext frames.
pub struct PlainCodec;

impl PayloadCodec for PlainCodec {
    fn decode(&self, raw: &[u8]) -> String {
        String::from_utf8_lossy(raw).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_codec_passes_utf8_through() {
        let codec = PlainCodec;
        assert_eq!(codec.decode(b"{\"timestamp\":null}"), "{\"timestamp\":null}");
    }

    #[test]
    fn plain_codec_is_lossy_on_invalid_utf8() {
        let codec = PlainCodec;
        let text = codec.decode(&[0xff, 0xfe, b'o', b'k']);
        assert!(text.ends_with("ok"));
    }
}
