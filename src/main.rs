use std::time::Duration;

use anyhow::Context;
use audiopipe::audio::{
    AudioPipeline, CaptureSource, NullSink, PlaybackSink, RawFileSink, RawFileSource,
};
use audiopipe::audio_bridge::{UdpInput, UdpSender};
use audiopipe::config::{PipelineConfig, SinkConfig, SourceConfig};
use tokio::signal;

/// Build the capture source, plus the network input feeding it if any.
async fn build_source(
    config: &SourceConfig,
) -> anyhow::Result<(Box<dyn CaptureSource>, Option<UdpInput>)> {
    let mut udp_input = None;
    let source: Box<dyn CaptureSource> = match config {
        SourceConfig::File { path, chunk_size } => Box::new(RawFileSource::open(path, *chunk_size)?),
        SourceConfig::Udp { bind, capacity } => {
            let input = UdpInput::spawn(bind, *capacity).await?;
            let source = input.source();
            udp_input = Some(input);
            Box::new(source)
        }
        #[cfg(feature = "alsa")]
        SourceConfig::Alsa {
            device,
            sample_rate,
            channels,
        } => Box::new(audiopipe::audio::AlsaCapture::open(device, *sample_rate, *channels)?),
        #[cfg(not(feature = "alsa"))]
        SourceConfig::Alsa { .. } => anyhow::bail!("ALSA capture needs the `alsa` feature"),
    };
    Ok((source, udp_input))
}

async fn build_sink(config: &SinkConfig) -> anyhow::Result<Box<dyn PlaybackSink>> {
    match config {
        SinkConfig::File { path } => Ok(Box::new(RawFileSink::create(path)?)),
        SinkConfig::Udp { bind, target } => {
            let (sender, sink) = UdpSender::bind(bind, target).await?;
            tokio::spawn(async move {
                if let Err(e) = sender.run().await {
                    log::error!("UDP sender error: {:#}", e);
                }
            });
            Ok(Box::new(sink))
        }
        #[cfg(feature = "alsa")]
        SinkConfig::Alsa {
            device,
            sample_rate,
            channels,
            period_size,
        } => Ok(Box::new(audiopipe::audio::AlsaPlayback::open(
            device,
            *sample_rate,
            *channels,
            *period_size,
        )?)),
        #[cfg(not(feature = "alsa"))]
        SinkConfig::Alsa { .. } => anyhow::bail!("ALSA playback needs the `alsa` feature"),
        SinkConfig::Null => Ok(Box::new(NullSink)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .context("usage: audiopipe <config.toml>")?;
    let config = PipelineConfig::load(&path)?;

    let session = config.create_session()?;
    let (source, udp_input) = build_source(&config.source).await?;
    let sink = build_sink(&config.sink).await?;
    let mut pipeline = AudioPipeline::start(config.pipeline_options(), source, sink, session)?;

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("Received Ctrl-C, shutting down...");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if pipeline.is_finished() {
                    break;
                }
            }
        }
    }

    // Joining the stage threads blocks; keep it off the async workers.
    let stats = tokio::task::spawn_blocking(move || {
        pipeline.stop();
        pipeline.stats()
    })
    .await?;
    if let Some(input) = udp_input {
        let _ = input.close().await;
    }
    println!(
        "captured={} produced={} written={} dropped(in/out)={}/{}",
        stats.frames_captured,
        stats.frames_produced,
        stats.frames_written,
        stats.input_dropped,
        stats.output_dropped,
    );
    Ok(())
}
