use bytes::Bytes;

use super::software::Transform;

/// Identity transform for raw PCM sessions.
#[derive(Debug, Default)]
pub struct PcmPassthrough;

impl PcmPassthrough {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for PcmPassthrough {
    fn name(&self) -> &str {
        "pcm"
    }

    fn key_frames(&self) -> bool {
        true
    }

    fn process(&mut self, input: &[u8], out: &mut Vec<Bytes>) -> anyhow::Result<()> {
        out.push(Bytes::copy_from_slice(input));
        Ok(())
    }
}
