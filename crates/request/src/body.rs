//! Outgoing request bodies.
//!
//! A request names at most one authoritative body source. The first non-empty
//! source in the order form, text, binary, file, generic stream is used, and
//! the same order decides the inferred content type.

use crate::error::{RequestError, Result};
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

/// A byte stream a request body can be read from.
pub type SourceStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync + 'static>>;

/// A generic body source. It can be read once; clones share the stream.
#[derive(Clone)]
pub struct ByteSource {
    inner: Arc<Mutex<Option<SourceStream>>>,
}

impl ByteSource {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(Mutex::new(Some(Box::pin(stream)))) }
    }

    pub fn take(&self) -> Option<SourceStream> {
        self.inner.lock().take()
    }

    pub fn is_taken(&self) -> bool {
        self.inner.lock().is_none()
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSource").field("taken", &self.is_taken()).finish()
    }
}

/// The body handed to a transport.
pub enum OutgoingBody {
    Empty,
    Bytes(Bytes),
    File { path: PathBuf, len: u64 },
    Stream(SourceStream),
}

impl OutgoingBody {
    /// A second copy of the body for replaying it on a redirect; `None` for
    /// streams, which can only be read once.
    pub fn try_clone(&self) -> Option<OutgoingBody> {
        match self {
            OutgoingBody::Empty => Some(OutgoingBody::Empty),
            OutgoingBody::Bytes(bytes) => Some(OutgoingBody::Bytes(bytes.clone())),
            OutgoingBody::File { path, len } => Some(OutgoingBody::File { path: path.clone(), len: *len }),
            OutgoingBody::Stream(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            OutgoingBody::Empty => true,
            OutgoingBody::Bytes(bytes) => bytes.is_empty(),
            OutgoingBody::File { len, .. } => *len == 0,
            OutgoingBody::Stream(_) => false,
        }
    }

    /// Length to announce in `Content-Length`. Only files need it: the other
    /// sources are sized by the transport itself.
    pub fn announced_len(&self) -> Option<u64> {
        match self {
            OutgoingBody::File { len, .. } if *len > 0 => Some(*len),
            _ => None,
        }
    }
}

impl fmt::Debug for OutgoingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutgoingBody::Empty => f.write_str("Empty"),
            OutgoingBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            OutgoingBody::File { path, len } => f.debug_struct("File").field("path", path).field("len", len).finish(),
            OutgoingBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Which source a request body comes from, resolved before any I/O.
#[derive(Debug, Clone)]
pub(crate) enum BodyPlan {
    Empty,
    Text(String),
    Binary(Bytes),
    File(PathBuf),
    Source(ByteSource),
}

impl BodyPlan {
    /// Materializes the body. Files are measured here; a missing file fails
    /// the request before it is sent.
    pub(crate) async fn open(&self) -> Result<OutgoingBody> {
        Ok(match self {
            BodyPlan::Empty => OutgoingBody::Empty,
            BodyPlan::Text(text) => OutgoingBody::Bytes(Bytes::from(text.clone())),
            BodyPlan::Binary(bytes) => OutgoingBody::Bytes(bytes.clone()),
            BodyPlan::File(path) => {
                let metadata = tokio::fs::metadata(path)
                    .await
                    .map_err(|e| RequestError::body(format!("can't stat {}: {e}", path.display())))?;
                OutgoingBody::File { path: path.clone(), len: metadata.len() }
            }
            BodyPlan::Source(source) => match source.take() {
                Some(stream) => OutgoingBody::Stream(stream),
                None => return Err(RequestError::body("body source has already been read")),
            },
        })
    }
}

/// Encodes form pairs as `application/x-www-form-urlencoded`; pairs with an
/// empty name are skipped.
pub(crate) fn encode_form(form: &[(String, String)]) -> Result<String> {
    let pairs: Vec<(&str, &str)> =
        form.iter().filter(|(name, _)| !name.is_empty()).map(|(name, value)| (name.as_str(), value.as_str())).collect();
    serde_urlencoded::to_string(pairs).map_err(|e| RequestError::body(format!("can't encode form: {e}")))
}

/// Guesses a content type from the leading bytes of a binary body.
pub(crate) fn sniff_content_type(data: &[u8]) -> &'static str {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1F\x8B\x08", "application/x-gzip"),
        (b"\x00\x00\x01\x00", "image/x-icon"),
        (b"BM", "image/bmp"),
    ];

    if let Some(mime) = SIGNATURES.iter().find(|(magic, _)| data.starts_with(magic)).map(|(_, mime)| *mime) {
        return mime;
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return "image/webp";
    }

    let head = &data[..data.len().min(512)];
    let trimmed = head.iter().position(|b| !b.is_ascii_whitespace()).map_or(&head[..0], |start| &head[start..]);
    let lower: Vec<u8> = trimmed.iter().take(14).map(u8::to_ascii_lowercase).collect();
    if lower.starts_with(b"<!doctype html") || lower.starts_with(b"<html") {
        return "text/html; charset=utf-8";
    }
    if lower.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }
    if head.iter().all(|b| !b.is_ascii_control() || b.is_ascii_whitespace() || *b == 0x1B) {
        return "text/plain; charset=utf-8";
    }
    "application/octet-stream"
}
