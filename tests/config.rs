use std::path::PathBuf;
use std::time::Duration;

use audiopipe::ConfigError;
use audiopipe::audio::codec::{CodecDirection, CodecKind};
use audiopipe::audio::SessionState;
use audiopipe::config::{PipelineConfig, SinkConfig, SourceConfig};

const FULL: &str = r#"
[codec]
kind = "adpcm"
direction = "encode"
sample_rate = 16000
channels = 2
bitrate = 32000
samples_per_frame = 512
csd = [1, 2, 3]

[queue]
input_capacity = 32
output_capacity = 16

[codec_loop]
idle_backoff_ms = 5
input_slots = 2
output_slots = 3
forward_config = false

[source]
type = "file"
path = "capture.raw"

[sink]
type = "udp"
target = "127.0.0.1:5000"
"#;

#[test]
fn test_full_config_parses() {
    let config: PipelineConfig = FULL.parse().unwrap();
    assert_eq!(config.codec.kind, CodecKind::Adpcm);
    assert_eq!(config.codec.direction, CodecDirection::Encode);
    assert_eq!(
        config.source,
        SourceConfig::File {
            path: PathBuf::from("capture.raw"),
            chunk_size: 2048,
        }
    );
    assert_eq!(
        config.sink,
        SinkConfig::Udp {
            bind: "0.0.0.0:0".to_string(),
            target: "127.0.0.1:5000".to_string(),
        }
    );

    let codec = config.codec_configuration().unwrap();
    assert_eq!(codec.channel_count(), 2);
    assert_eq!(codec.bitrate(), Some(32000));
    assert_eq!(codec.samples_per_frame(), 512);
    assert_eq!(&codec.csd()[..], &[1, 2, 3]);

    let pool = config.slot_pool();
    assert_eq!((pool.input_slots, pool.output_slots), (2, 3));

    let options = config.pipeline_options();
    assert_eq!(options.input_capacity, 32);
    assert_eq!(options.output_capacity, 16);
    assert_eq!(options.idle_backoff, Duration::from_millis(5));
    assert!(!options.forward_config);
}

#[test]
fn test_defaults_round_trip_through_toml() {
    let config = PipelineConfig::default();
    let text = config.to_toml_string().unwrap();
    let parsed: PipelineConfig = text.parse().unwrap();
    assert_eq!(parsed, config);

    let full: PipelineConfig = FULL.parse().unwrap();
    let parsed: PipelineConfig = full.to_toml_string().unwrap().parse().unwrap();
    assert_eq!(parsed, full);
}

#[test]
fn test_invalid_values_are_rejected() {
    let err = "[codec]\nsample_rate = 0\n".parse::<PipelineConfig>().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));

    let err = "[codec_loop]\noutput_slots = 0\n".parse::<PipelineConfig>().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));

    let err = "[codec]\nkind = \"mp3\"\n".parse::<PipelineConfig>().unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_load_reports_missing_file() {
    let err = PipelineConfig::load("/nonexistent/audiopipe.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_load_from_disk_and_create_session() {
    let path = std::env::temp_dir().join(format!("audiopipe-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(&path, "[codec]\nkind = \"pcm\"\n[sink]\ntype = \"null\"\n").unwrap();
    let config = PipelineConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.sink, SinkConfig::Null);
    let session = config.create_session().unwrap();
    assert_eq!(session.state(), SessionState::Created);
    assert_eq!(session.codec_name(), "pcm");
}
