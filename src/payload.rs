//! Incompressible, form-safe upload payloads
//!
//! Every random byte is folded into a 32-symbol alphabet so the body can be
//! sent as `application/x-www-form-urlencoded` without escaping while still
//! defeating transport compression.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::PayloadError;

/// Alphabet random bytes are mapped into (indexed by the low 5 bits)
pub const SAFE_CHARS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Form field assignment prefixed to every payload
pub const FORM_HEADER: &[u8] = b"content1=";

/// Content type matching the payload encoding
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Largest chunk yielded by the stream (64KB)
const CHUNK_SIZE: usize = 64 * 1024;

/// Fill `buf` from `rng`, remapping every byte into [`SAFE_CHARS`]
pub fn fill_safe<R: RngCore + ?Sized>(rng: &mut R, buf: &mut [u8]) -> Result<(), PayloadError> {
    rng.try_fill_bytes(buf)?;
    for b in buf.iter_mut() {
        *b = SAFE_CHARS[(*b & 31) as usize];
    }
    Ok(())
}

/// Random source backing a payload
pub type PayloadRng = Box<dyn RngCore + Send + Sync>;

/// Lazily generated upload body of a fixed total length
///
/// Yields the form header first, then random safe bytes in chunks of at most
/// 64KB. A random source failure is yielded once and ends the stream.
pub struct UploadPayload {
    rng: PayloadRng,
    header_sent: bool,
    header: &'static [u8],
    remaining: usize,
    failed: bool,
}

impl UploadPayload {
    /// Payload of `size` bytes backed by the operating system's secure RNG
    pub fn new(size: usize) -> Self {
        Self::with_rng(size, OsRng)
    }

    /// Payload of `size` bytes drawn from `rng`
    ///
    /// Sizes at or below the header length produce the header alone.
    pub fn with_rng(size: usize, rng: impl RngCore + Send + Sync + 'static) -> Self {
        Self {
            rng: Box::new(rng),
            header_sent: false,
            header: FORM_HEADER,
            remaining: size.saturating_sub(FORM_HEADER.len()),
            failed: false,
        }
    }

    /// Total bytes this payload still has to yield
    pub fn len(&self) -> usize {
        let header = if self.header_sent { 0 } else { self.header.len() };
        header + self.remaining
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_chunk(&mut self) -> Option<Result<Bytes, PayloadError>> {
        if self.failed {
            return None;
        }
        if !self.header_sent {
            self.header_sent = true;
            return Some(Ok(Bytes::from_static(self.header)));
        }
        if self.remaining == 0 {
            return None;
        }

        let n = self.remaining.min(CHUNK_SIZE);
        let mut buf = vec![0u8; n];
        match fill_safe(self.rng.as_mut(), &mut buf) {
            Ok(()) => {
                self.remaining -= n;
                Some(Ok(Bytes::from(buf)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl Stream for UploadPayload {
    type Item = Result<Bytes, PayloadError>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().next_chunk())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let chunks = usize::from(!self.header_sent) + self.remaining.div_ceil(CHUNK_SIZE);
        if self.failed {
            (0, Some(0))
        } else {
            (chunks, Some(chunks))
        }
    }
}
