//! Integration tests wiring encoder consumers to outputs.

use crate::support::{init_tracing, FakeSdk, Recorder};
use livecast_audio::Mixer;
use livecast_core::{
    AudioFormat, AudioOutputConfig, CacheConfig, FrameRate, MediaFormat, PixelFormat, PoolConfig,
    SpeakerLayout, VideoFormat, VideoOutputConfig,
};
use livecast_encoder::{EncoderConsumer, SurfaceDescriptor};
use livecast_engine::ConsumerOptions;
use livecast_video::VideoOutput;
use std::thread;
use std::time::{Duration, Instant};

fn video_config() -> VideoOutputConfig {
    VideoOutputConfig {
        format: VideoFormat::new(PixelFormat::Nv12, 64, 32),
        frame_rate: FrameRate::new(30, 1),
        cache: CacheConfig::default(),
        pool: PoolConfig {
            preallocate: 4,
            max_outstanding: 24,
        },
        parallel_dispatch: true,
    }
}

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

fn publish_frames(output: &VideoOutput, count: u64) {
    for ts in 0..count {
        let mut frame = output.acquire_frame().unwrap();
        if let Some(planes) = frame.video_planes_mut() {
            planes[0].data.fill(ts as u8);
        }
        output.publish_frame(frame, ts).unwrap();
        thread::sleep(Duration::from_millis(3));
    }
}

#[test]
fn video_frames_are_encoded_in_order() {
    init_tracing();
    let output = VideoOutput::new(video_config()).unwrap();
    let (mut sdk, log) = FakeSdk::new();
    sdk.latency = 1;
    let native = MediaFormat::Video(output.format());
    let (encoder, packets) =
        EncoderConsumer::spawn("h264", sdk, SurfaceDescriptor::device(native, 256)).unwrap();
    let id = output.attach(encoder.clone(), ConsumerOptions::default()).unwrap();

    publish_frames(&output, 8);
    assert!(wait_for(|| log.lock().mapped.last() == Some(&7)));
    output.detach(id).unwrap();
    encoder.finish();

    let log = log.lock();
    let stamps: Vec<u64> = packets.try_iter().map(|p| p.timestamp).collect();
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    // One input is still inside the encoder when the session closes.
    assert_eq!(stamps, log.mapped[..log.mapped.len() - 1]);
    assert_eq!(log.unmapped, log.mapped.len());
    assert_eq!(log.unregistered, 1);
    assert_eq!(output.stats().pool.in_use, 0);
}

#[test]
fn busy_surface_does_not_affect_other_consumers() {
    init_tracing();
    let output = VideoOutput::new(video_config()).unwrap();
    let (mut sdk, log) = FakeSdk::new();
    sdk.surface_busy = true;
    let native = MediaFormat::Video(output.format());
    let (encoder, packets) =
        EncoderConsumer::spawn("busy", sdk, SurfaceDescriptor::host(native)).unwrap();
    let recorder = Recorder::new();
    output.attach(encoder.clone(), ConsumerOptions::default()).unwrap();
    output.attach(recorder.clone(), ConsumerOptions::default()).unwrap();

    publish_frames(&output, 5);
    assert!(wait_for(|| recorder.stamps().last() == Some(&4)));
    assert!(wait_for(|| {
        let s = encoder.stats();
        s.received > 0 && s.mapping_failures == s.received
    }));
    encoder.finish();

    assert_eq!(packets.try_iter().count(), 0);
    assert!(log.lock().mapped.is_empty());
    assert_eq!(encoder.stats().failures, 0);
    assert!(encoder.stats().mapping_failures > 0);
}

#[test]
fn failed_registration_never_attaches() {
    let output = VideoOutput::new(video_config()).unwrap();
    let (mut sdk, _log) = FakeSdk::new();
    sdk.fail_register = true;
    let native = MediaFormat::Video(output.format());
    assert!(EncoderConsumer::spawn("none", sdk, SurfaceDescriptor::host(native)).is_err());
    assert_eq!(output.stats().dispatch.delivered, 0);
}

#[test]
fn audio_bus_feeds_encoder() {
    let format = AudioFormat::new(48_000, SpeakerLayout::Stereo, 1024);
    let mixer = Mixer::new(AudioOutputConfig {
        format,
        bus_count: 2,
        cache: CacheConfig::default(),
        pool: PoolConfig {
            preallocate: 2,
            max_outstanding: 16,
        },
        source_queue_depth: 4,
    })
    .unwrap();
    let (sdk, _log) = FakeSdk::new();
    let (encoder, packets) =
        EncoderConsumer::spawn("aac", sdk, SurfaceDescriptor::host(format.into())).unwrap();
    mixer.attach(1, encoder.clone(), ConsumerOptions::default()).unwrap();

    // Three windows fit in the hand-off queue, so none are dropped.
    for n in 0..3u64 {
        mixer.process_window(n * 1024).unwrap();
    }
    encoder.finish();

    let stamps: Vec<u64> = packets.try_iter().map(|p| p.timestamp).collect();
    assert_eq!(stamps, vec![0, 1024, 2048]);
    assert_eq!(mixer.stats().pool.in_use, 0);
}
