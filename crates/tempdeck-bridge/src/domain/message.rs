//! The opaque payload relayed from the broker to viewers.

use bytes::Bytes;

/// One broker payload, immutable once created.
///
/// The relay never looks inside: interpreting `currentTemp`/`targetTemp` is
/// the viewer page's job.  Cloning bumps a reference count, so fanning one
/// message out to N session queues shares a single allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message(Bytes);

impl Message {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self(payload.into())
    }

    /// Copies `payload` into a new owned message.
    pub fn copy_from_slice(payload: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(payload))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// The payload as UTF-8 text, or `None` if it is not valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for Message {
    fn from(payload: Bytes) -> Self {
        Self(payload)
    }
}

impl From<&'static str> for Message {
    fn from(payload: &'static str) -> Self {
        Self(Bytes::from_static(payload.as_bytes()))
    }
}

impl From<String> for Message {
    fn from(payload: String) -> Self {
        Self(Bytes::from(payload))
    }
}

impl From<Vec<u8>> for Message {
    fn from(payload: Vec<u8>) -> Self {
        Self(Bytes::from(payload))
    }
}
