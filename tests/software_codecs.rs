use audiopipe::CodecError;
use audiopipe::audio::codec::{
    create_codec, create_codec_with_pool, AdpcmDecoder, AdpcmEncoder, BufferFlags, Codec,
    CodecConfiguration, CodecDirection, CodecKind, SlotPool, SoftwareCodec, Transform,
};

fn sine(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as f32 * 0.03).sin() * 12000.0) as i16)
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

fn drain(codec: &mut dyn Codec, data: &mut Vec<u8>, flags: &mut Vec<BufferFlags>) {
    while let Some(out) = codec.dequeue_output_buffer().unwrap() {
        data.extend_from_slice(&out.data);
        flags.push(out.info.flags);
        codec.release_output_buffer(out.index).unwrap();
    }
}

/// Push `chunks` plus end of stream through `codec`, collecting outputs.
fn transcode(codec: &mut dyn Codec, chunks: &[&[u8]]) -> (Vec<u8>, Vec<BufferFlags>) {
    let mut data = Vec::new();
    let mut flags = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let mut input = codec.dequeue_input_buffer().unwrap().unwrap();
        input.data.extend_from_slice(chunk);
        codec.queue_input_buffer(input, i as u64, BufferFlags::NONE).unwrap();
        drain(codec, &mut data, &mut flags);
    }
    let input = codec.dequeue_input_buffer().unwrap().unwrap();
    codec
        .queue_input_buffer(input, chunks.len() as u64, BufferFlags::END_OF_STREAM)
        .unwrap();
    drain(codec, &mut data, &mut flags);
    (data, flags)
}

#[test]
fn test_adpcm_codec_round_trip_through_slots() {
    let pcm = sine(4000);
    let encode_config =
        CodecConfiguration::new(CodecKind::Adpcm, CodecDirection::Encode, 16000, 1).unwrap();
    let mut encoder = create_codec(&encode_config).unwrap();
    encoder.start().unwrap();
    let chunks: Vec<&[u8]> = pcm.chunks(1001).collect();
    let (encoded, flags) = transcode(encoder.as_mut(), &chunks);
    assert_eq!(encoded.len(), pcm.len() / 4);
    assert!(flags.last().unwrap().contains(BufferFlags::END_OF_STREAM));

    let decode_config =
        CodecConfiguration::new(CodecKind::Adpcm, CodecDirection::Decode, 16000, 1).unwrap();
    let mut decoder = create_codec(&decode_config).unwrap();
    decoder.start().unwrap();
    let (decoded, _) = transcode(decoder.as_mut(), &[&encoded[..]]);
    assert_eq!(decoded.len(), pcm.len());

    // 4-bit ADPCM tracks a smooth signal closely.
    let error: i64 = decoded
        .chunks_exact(2)
        .zip(pcm.chunks_exact(2))
        .map(|(d, p)| {
            let d = i16::from_le_bytes([d[0], d[1]]) as i64;
            let p = i16::from_le_bytes([p[0], p[1]]) as i64;
            (d - p).abs()
        })
        .sum::<i64>()
        / (pcm.len() as i64 / 2);
    assert!(error < 2000, "mean error {}", error);
}

#[test]
fn test_stereo_adpcm_keeps_channels_apart() {
    let mut pcm = Vec::new();
    for _ in 0..500 {
        pcm.extend_from_slice(&8000i16.to_le_bytes());
        pcm.extend_from_slice(&(-8000i16).to_le_bytes());
    }
    let mut encoder = AdpcmEncoder::new(2);
    let mut decoder = AdpcmDecoder::new(2);
    let mut encoded = Vec::new();
    encoder.process(&pcm, &mut encoded).unwrap();
    let mut decoded = Vec::new();
    decoder.process(&encoded[0], &mut decoded).unwrap();

    let tail: Vec<i16> = decoded[0][decoded[0].len() - 8..]
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    for pair in tail.chunks_exact(2) {
        assert!(pair[0] > 6000, "{:?}", tail);
        assert!(pair[1] < -6000, "{:?}", tail);
    }
}

#[test]
fn test_slot_pool_comes_from_configuration() {
    let config = CodecConfiguration::new(CodecKind::Pcm, CodecDirection::Decode, 8000, 1)
        .unwrap()
        .with_max_input_size(16)
        .unwrap();
    let mut codec = create_codec(&config).unwrap();
    codec.start().unwrap();
    let mut input = codec.dequeue_input_buffer().unwrap().unwrap();
    assert!(input.data.capacity() >= 16);
    input.data.extend_from_slice(&[0; 17]);
    let err = codec
        .queue_input_buffer(input, 0, BufferFlags::NONE)
        .unwrap_err();
    assert!(!err.is_fatal());
    // The slot went back to the pool despite the failure.
    assert!(codec.dequeue_input_buffer().unwrap().is_some());
}

#[test]
fn test_engine_rejects_calls_outside_executing() {
    let config = CodecConfiguration::new(CodecKind::Pcm, CodecDirection::Decode, 8000, 1).unwrap();
    let mut codec = create_codec_with_pool(
        &config,
        SlotPool {
            input_slots: 1,
            output_slots: 1,
            max_input_size: 32,
        },
    )
    .unwrap();
    assert!(matches!(codec.dequeue_input_buffer(), Err(CodecError::Illegal(_))));

    codec.start().unwrap();
    let input = codec.dequeue_input_buffer().unwrap().unwrap();
    assert!(codec.dequeue_input_buffer().unwrap().is_none());
    codec.queue_input_buffer(input, 0, BufferFlags::NONE).unwrap();

    codec.stop().unwrap();
    codec.stop().unwrap();
    codec.release();
    assert!(codec.dequeue_output_buffer().unwrap_err().is_fatal());
}

#[test]
fn test_config_frame_precedes_output() {
    struct WithHeader;
    impl Transform for WithHeader {
        fn name(&self) -> &str {
            "with-header"
        }
        fn config_frame(&mut self) -> Option<bytes::Bytes> {
            Some(bytes::Bytes::from_static(b"HDR"))
        }
        fn process(&mut self, input: &[u8], out: &mut Vec<bytes::Bytes>) -> anyhow::Result<()> {
            out.push(bytes::Bytes::copy_from_slice(input));
            Ok(())
        }
    }

    let mut codec = SoftwareCodec::new(WithHeader, SlotPool::default());
    codec.start().unwrap();
    let (data, flags) = transcode(&mut codec, &[&b"body"[..]]);
    assert_eq!(data, b"HDRbody");
    assert!(flags[0].contains(BufferFlags::CODEC_CONFIG));
    assert!(!flags[1].contains(BufferFlags::CODEC_CONFIG));
    assert!(flags[2].contains(BufferFlags::END_OF_STREAM));
}

#[cfg(not(feature = "opus"))]
#[test]
fn test_opus_needs_feature() {
    let config = CodecConfiguration::new(CodecKind::Opus, CodecDirection::Encode, 48000, 2).unwrap();
    assert!(matches!(create_codec(&config).err(), Some(CodecError::Unsupported(_))));
}
