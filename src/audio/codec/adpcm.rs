//! 4-bit ADPCM codec.
//!
//! Every pair of 16-bit samples packs into one byte, high nibble first:
//! `(left << 4) | right` for stereo, two consecutive samples for mono.
//! Each channel keeps its own predictor, so decoder output tracks the
//! encoder's reconstruction exactly.

use bytes::{BufMut, Bytes, BytesMut};

use super::software::Transform;

const STEP_INDEX_TABLE: [i32; 16] = [8, 6, 4, 2, -1, -1, -1, -1, -1, -1, -1, -1, 2, 4, 6, 8];

const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

/// Bytes of PCM consumed per encoded byte (two 16-bit samples).
const PCM_BYTES_PER_CODE: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
struct Predictor {
    step_index: i32,
    predicted: i32,
}

impl Predictor {
    fn encode(&mut self, sample: i16) -> u8 {
        let step = STEP_TABLE[self.step_index as usize];
        let code = (((sample as i32 - self.predicted) * 4 + step * 8) / step).clamp(0, 15);
        self.update(code, step);
        code as u8
    }

    fn decode(&mut self, code: u8) -> i16 {
        let code = (code & 0x0f) as i32;
        let step = STEP_TABLE[self.step_index as usize];
        self.update(code, step);
        self.predicted as i16
    }

    fn update(&mut self, code: i32, step: i32) {
        self.predicted += ((code * step) >> 2) - ((15 * step) >> 3);
        self.predicted = self.predicted.clamp(i16::MIN as i32, i16::MAX as i32);
        self.step_index = (self.step_index + STEP_INDEX_TABLE[code as usize]).clamp(0, 88);
    }
}

fn predictor_pair(channels: u32, predictors: &mut [Predictor; 2]) -> (&mut Predictor, Option<&mut Predictor>) {
    let [first, second] = predictors;
    if channels == 2 {
        (first, Some(second))
    } else {
        (first, None)
    }
}

/// 16-bit little-endian PCM → ADPCM.
#[derive(Debug)]
pub struct AdpcmEncoder {
    channels: u32,
    predictors: [Predictor; 2],
    pending: Vec<u8>,
}

impl AdpcmEncoder {
    pub fn new(channels: u32) -> Self {
        Self {
            channels: channels.clamp(1, 2),
            predictors: [Predictor::default(); 2],
            pending: Vec::new(),
        }
    }

    fn encode_chunks(&mut self, data: &[u8], out: &mut BytesMut) -> usize {
        let mut consumed = 0;
        for chunk in data.chunks_exact(PCM_BYTES_PER_CODE) {
            let first = i16::from_le_bytes([chunk[0], chunk[1]]);
            let second = i16::from_le_bytes([chunk[2], chunk[3]]);
            let (p0, p1) = predictor_pair(self.channels, &mut self.predictors);
            let high = p0.encode(first);
            let low = match p1 {
                Some(p1) => p1.encode(second),
                None => p0.encode(second),
            };
            out.put_u8((high << 4) | low);
            consumed += PCM_BYTES_PER_CODE;
        }
        consumed
    }
}

impl Transform for AdpcmEncoder {
    fn name(&self) -> &str {
        "adpcm-encoder"
    }

    fn process(&mut self, input: &[u8], out: &mut Vec<Bytes>) -> anyhow::Result<()> {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(input);
        let mut encoded = BytesMut::with_capacity(data.len() / PCM_BYTES_PER_CODE);
        let consumed = self.encode_chunks(&data, &mut encoded);
        data.drain(..consumed);
        self.pending = data;
        if !encoded.is_empty() {
            out.push(encoded.freeze());
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<Bytes>) -> anyhow::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut data = std::mem::take(&mut self.pending);
        if data.len() % 2 != 0 {
            log::warn!("ADPCM encoder dropping dangling byte at end of stream");
            data.pop();
        }
        // Pad the last code with silence.
        data.resize(PCM_BYTES_PER_CODE, 0);
        let mut encoded = BytesMut::with_capacity(1);
        self.encode_chunks(&data, &mut encoded);
        out.push(encoded.freeze());
        Ok(())
    }

    fn reset(&mut self) {
        self.predictors = [Predictor::default(); 2];
        self.pending.clear();
    }
}

/// ADPCM → 16-bit little-endian PCM.
#[derive(Debug)]
pub struct AdpcmDecoder {
    channels: u32,
    predictors: [Predictor; 2],
}

impl AdpcmDecoder {
    pub fn new(channels: u32) -> Self {
        Self {
            channels: channels.clamp(1, 2),
            predictors: [Predictor::default(); 2],
        }
    }
}

impl Transform for AdpcmDecoder {
    fn name(&self) -> &str {
        "adpcm-decoder"
    }

    fn process(&mut self, input: &[u8], out: &mut Vec<Bytes>) -> anyhow::Result<()> {
        let mut pcm = BytesMut::with_capacity(input.len() * PCM_BYTES_PER_CODE);
        for &byte in input {
            let (p0, p1) = predictor_pair(self.channels, &mut self.predictors);
            let first = p0.decode(byte >> 4);
            let second = match p1 {
                Some(p1) => p1.decode(byte & 0x0f),
                None => p0.decode(byte & 0x0f),
            };
            pcm.put_i16_le(first);
            pcm.put_i16_le(second);
        }
        out.push(pcm.freeze());
        Ok(())
    }

    fn reset(&mut self) {
        self.predictors = [Predictor::default(); 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn samples(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn silence_stays_near_zero() {
        let mut encoder = AdpcmEncoder::new(1);
        let mut decoder = AdpcmDecoder::new(1);
        let mut encoded = Vec::new();
        encoder.process(&pcm_bytes(&[0; 256]), &mut encoded).unwrap();
        assert_eq!(encoded[0].len(), 128);

        let mut decoded = Vec::new();
        decoder.process(&encoded[0], &mut decoded).unwrap();
        let out = samples(&decoded[0]);
        assert_eq!(out.len(), 256);
        assert!(out.iter().all(|s| s.abs() <= 2), "{:?}", out);
    }

    #[test]
    fn decoder_matches_encoder_reconstruction() {
        let input: Vec<i16> = (0..400)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();

        let mut encoder = AdpcmEncoder::new(2);
        let mut reference = [Predictor::default(); 2];
        let mut expected = Vec::new();
        for pair in input.chunks_exact(2) {
            for (ch, &sample) in pair.iter().enumerate() {
                reference[ch].encode(sample);
                expected.push(reference[ch].predicted as i16);
            }
        }

        let mut encoded = Vec::new();
        encoder.process(&pcm_bytes(&input), &mut encoded).unwrap();
        let mut decoder = AdpcmDecoder::new(2);
        let mut decoded = Vec::new();
        decoder.process(&encoded[0], &mut decoded).unwrap();
        assert_eq!(samples(&decoded[0]), expected);
    }

    #[test]
    fn partial_input_is_carried_over() {
        let mut encoder = AdpcmEncoder::new(1);
        let bytes = pcm_bytes(&[100, 200, 300]);
        let mut out = Vec::new();
        encoder.process(&bytes, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 1);

        encoder.finish(&mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].len(), 1);
    }
}
