//! Integration tests for the video output.

use crate::support::{init_tracing, Recorder};
use livecast_core::{
    CacheConfig, FrameRate, LiveCastError, MediaFormat, PixelFormat, PoolConfig, VideoFormat,
    VideoOutputConfig,
};
use livecast_engine::ConsumerOptions;
use livecast_video::{RawFrame, VideoOutput};
use std::thread;
use std::time::{Duration, Instant};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 32;

fn config(fps: u32) -> VideoOutputConfig {
    VideoOutputConfig {
        format: VideoFormat::new(PixelFormat::Nv12, WIDTH, HEIGHT),
        frame_rate: FrameRate::new(fps, 1),
        cache: CacheConfig::default(),
        pool: PoolConfig {
            preallocate: 4,
            max_outstanding: 20,
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

struct Planes {
    y: Vec<u8>,
    uv: Vec<u8>,
}

impl Planes {
    fn filled(luma: u8) -> Self {
        Self {
            y: vec![luma; (WIDTH * HEIGHT) as usize],
            uv: vec![128; (WIDTH * HEIGHT / 2) as usize],
        }
    }

    fn raw(&self) -> RawFrame<'_> {
        RawFrame::new(&[self.y.as_slice(), self.uv.as_slice()], &[WIDTH as usize, WIDTH as usize])
    }
}

#[test]
fn submitted_frames_arrive_in_order() {
    init_tracing();
    let output = VideoOutput::new(config(30)).unwrap();
    let recorder = Recorder::new();
    output
        .attach(recorder.clone(), ConsumerOptions::default())
        .unwrap();

    let planes = Planes::filled(16);
    for ts in 0..10 {
        output.submit(&planes.raw(), ts).unwrap();
        thread::sleep(Duration::from_millis(3));
    }
    assert!(wait_for(|| recorder.stamps().last() == Some(&9)));

    let stamps = recorder.stamps();
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    let stats = output.stats();
    assert_eq!(stats.total_frames, 10);
    assert_eq!(stats.skipped_frames + stamps.len() as u64, 10);
}

#[test]
fn consumers_receive_their_target_format() {
    init_tracing();
    let output = VideoOutput::new(config(30)).unwrap();
    let i420: MediaFormat = VideoFormat::new(PixelFormat::I420, WIDTH, HEIGHT).into();
    let half: MediaFormat = VideoFormat::new(PixelFormat::Nv12, WIDTH / 2, HEIGHT / 2).into();
    let native = Recorder::new();
    let planar = Recorder::new();
    let scaled = Recorder::new();
    output.attach(native.clone(), ConsumerOptions::default()).unwrap();
    output
        .attach(planar.clone(), ConsumerOptions::default().with_target(i420))
        .unwrap();
    output
        .attach(scaled.clone(), ConsumerOptions::default().with_target(half))
        .unwrap();

    output.submit(&Planes::filled(200).raw(), 0).unwrap();
    assert!(wait_for(|| native.count() == 1 && planar.count() == 1 && scaled.count() == 1));

    assert_eq!(native.formats.lock()[0], MediaFormat::Video(output.format()));
    assert_eq!(planar.formats.lock()[0], i420);
    assert_eq!(scaled.formats.lock()[0], half);
    assert_eq!(output.stats().dispatch.conversions, 2);
}

#[test]
fn unsupported_target_is_refused_at_attach() {
    let output = VideoOutput::new(config(30)).unwrap();
    let uyvy: MediaFormat = VideoFormat::new(PixelFormat::Uyvy, WIDTH, HEIGHT).into();
    let result = output.attach(Recorder::new(), ConsumerOptions::default().with_target(uyvy));
    assert!(matches!(result, Err(LiveCastError::FormatMismatch { .. })));
}

#[test]
fn timestamps_must_increase() {
    let output = VideoOutput::new(config(30)).unwrap();
    let planes = Planes::filled(0);
    output.submit(&planes.raw(), 5).unwrap();
    assert!(output.submit(&planes.raw(), 5).is_err());
    assert!(output.submit(&planes.raw(), 4).is_err());
    assert!(output.submit(&planes.raw(), 6).is_ok());
}

#[test]
fn producer_runs_at_canvas_rate_and_shutdown_releases_storage() {
    init_tracing();
    let mut output = VideoOutput::new(config(200)).unwrap();
    let recorder = Recorder::new();
    output
        .attach(recorder.clone(), ConsumerOptions::every(2))
        .unwrap();
    output
        .start_producer(|tick, frame| {
            if let Some(planes) = frame.video_planes_mut() {
                planes[0].data.fill(tick as u8);
            }
            Ok(())
        })
        .unwrap();

    assert!(wait_for(|| recorder.count() >= 5));
    output.shutdown();
    let delivered = recorder.count();

    let stats = output.stats();
    assert!(stats.total_frames >= 5);
    assert_eq!(stats.pool.in_use, 0);
    assert!(recorder.stamps().windows(2).all(|w| w[0] < w[1]));

    // Nothing reaches a consumer after shutdown.
    thread::sleep(Duration::from_millis(20));
    assert_eq!(recorder.count(), delivered);
    assert!(matches!(
        output.attach(Recorder::new(), ConsumerOptions::default()),
        Err(LiveCastError::ShutDown)
    ));
}
