use std::ops::Deref;

use bytes::Bytes;

/// One unit of raw PCM or compressed audio.
///
/// Backed by [`Bytes`], so handing a frame from one queue or buffer to the
/// next moves a reference-counted handle instead of copying samples.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame(Bytes);

impl Frame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Self(data)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

impl From<&'static [u8]> for Frame {
    fn from(data: &'static [u8]) -> Self {
        Self(Bytes::from_static(data))
    }
}
