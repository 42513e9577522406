//! Synthetic stream publisher example
//!
//! Run with: cargo run --example synthetic_publisher -- rtmp://localhost/live stream_key
//!
//! Publishes ten seconds of placeholder H.264/AAC frames at 30 fps and
//! prints throughput samples the way a bitrate controller would see them.
//! The frames are not decodable; this only exercises the transport.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rtmp_publish::client::{PublisherConfig, PublisherEvent, RtmpPublisher};
use rtmp_publish::media::{AudioFormat, Sample, VideoFormat};
use rtmp_publish::session::FileStore;
use rtmp_publish::stats::AbrFeedback;

const SPS_PPS: &[u8] = &[
    0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x01, 0x40, 0x16, 0xE8, //
    0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80,
];
const AUDIO_SPECIFIC_CONFIG: &[u8] = &[0x12, 0x10];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_publish=debug".parse()?)
                .add_directive("synthetic_publisher=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (url, key) = match (args.next(), args.next()) {
        (Some(url), Some(key)) => (url, key),
        _ => {
            eprintln!("Usage: synthetic_publisher <rtmp_url> <stream_key>");
            eprintln!("Example: synthetic_publisher rtmp://localhost/live test_key");
            std::process::exit(1);
        }
    };

    let store = Arc::new(FileStore::new(std::env::temp_dir().join("rtmp-publish")));
    let config = PublisherConfig::new(url.as_str(), key)
        .buffer_limit(512 * 1024)
        .send_fc_publish(true);
    let audio = AudioFormat::new(44100, 2, 128_000);
    let video = VideoFormat::new(1280, 720, 2_500_000, 30.0);

    println!("Publishing to {}", url);
    let (mut publisher, mut events) = RtmpPublisher::start(config, store, &audio, &video).await?;

    let event_handle = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PublisherEvent::Connected => println!("Connected!"),
                PublisherEvent::Status { command, code } => {
                    println!("Server {}: {}", command, code.unwrap_or_default());
                }
                PublisherEvent::WindowChanged(size) => println!("Window now {} bytes", size),
                PublisherEvent::Error(e) => eprintln!("Error: {}", e),
                PublisherEvent::Disconnected => {
                    println!("Disconnected");
                    break;
                }
            }
        }
    });

    publisher.set_video_config(Bytes::from_static(SPS_PPS))?;
    publisher.set_audio_config(Bytes::from_static(AUDIO_SPECIFIC_CONFIG))?;

    let abr = publisher.abr();
    let mut frame_timer = tokio::time::interval(Duration::from_micros(33_333));
    let started = tokio::time::Instant::now();
    let mut audio_pts = 0i64;

    for frame in 0..300i64 {
        frame_timer.tick().await;
        let pts = frame * 33_333;

        let mut payload = vec![0, 0, 0, 1, if frame % 60 == 0 { 0x65 } else { 0x41 }];
        payload.resize(8 * 1024, 0xAA);
        let sample = Sample::video(Bytes::from(payload), frame % 60 == 0, pts);
        if let Err(e) = publisher.send_sample(&sample).await {
            eprintln!("Send failed: {}", e);
            break;
        }

        // 1024 samples per AAC frame at 44.1 kHz
        while audio_pts <= pts {
            let sample = Sample::audio(Bytes::from(vec![0x21; 300]), audio_pts);
            publisher.send_sample(&sample).await?;
            audio_pts += 1024 * 1_000_000 / 44100;
        }

        if frame % 30 == 29 {
            let sample = abr.poll_throughput();
            println!(
                "t={:.1}s: {} kbit/s written, {} bytes buffered (limit {})",
                started.elapsed().as_secs_f64(),
                sample.write_bitrate() / 1000,
                sample.buffered_bytes,
                abr.buffer_limit()
            );
        }
    }

    let stats = publisher.stats();
    println!(
        "Final stats: {} video, {} audio, {} keyframes, {} dropped, {} bytes",
        stats.samples.video_frames,
        stats.samples.audio_frames,
        stats.samples.keyframes,
        stats.samples.dropped_frames(),
        stats.bytes_sent
    );

    publisher.stop().await?;
    let _ = event_handle.await;

    Ok(())
}
