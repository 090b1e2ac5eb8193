//! Integration tests for the audio mix path.

use crate::support::{init_tracing, Recorder};
use livecast_audio::{AudioBlock, AudioOutput, Mixer};
use livecast_core::{AudioFormat, AudioOutputConfig, CacheConfig, PoolConfig, Result, SpeakerLayout};
use livecast_engine::{BufferHandle, Consumer, ConsumerOptions};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Keeps a copy of every block it is handed.
#[derive(Default)]
struct Capture(Mutex<Vec<(u64, Vec<Vec<f32>>)>>);

impl Consumer for Capture {
    fn on_delivery(&self, buffer: BufferHandle) -> Result<()> {
        let channels = buffer.audio_channels().map(<[Vec<f32>]>::to_vec).unwrap_or_default();
        self.0.lock().push((buffer.timestamp(), channels));
        Ok(())
    }
}

fn config(layout: SpeakerLayout, frames: usize, buses: usize) -> AudioOutputConfig {
    AudioOutputConfig {
        format: AudioFormat::new(48_000, layout, frames),
        bus_count: buses,
        cache: CacheConfig::default(),
        pool: PoolConfig {
            preallocate: buses,
            max_outstanding: buses * 20,
        },
        source_queue_depth: 8,
    }
}

#[test]
fn overdriven_and_nan_samples_are_clamped() {
    init_tracing();
    let mixer = Mixer::new(config(SpeakerLayout::Stereo, 2, 1)).unwrap();
    let a = mixer.add_source("a", 0b1).unwrap();
    let b = mixer.add_source("b", 0b1).unwrap();
    let capture = Arc::new(Capture::default());
    mixer.attach(0, capture.clone(), ConsumerOptions::default()).unwrap();

    a.push(AudioBlock::new(0, [vec![0.6, f32::NAN], vec![0.25, 0.0]]))
        .unwrap();
    b.push(AudioBlock::new(0, [vec![0.6, 0.0], vec![0.25, 0.0]]))
        .unwrap();
    let report = mixer.process_window(0).unwrap();
    assert_eq!(report.contributing_sources, 2);
    assert_eq!(report.delivered, 1);

    let blocks = capture.0.lock();
    assert_eq!(blocks[0].0, 0);
    assert_eq!(blocks[0].1, vec![vec![1.0, 0.0], vec![0.5, 0.0]]);
}

#[test]
fn buses_mix_only_their_sources() {
    let mixer = Mixer::new(config(SpeakerLayout::Mono, 4, 3)).unwrap();
    let music = mixer.add_source("music", 0b011).unwrap();
    let mic = mixer.add_source("mic", 0b110).unwrap();
    let captures: Vec<Arc<Capture>> = (0..3).map(|_| Arc::new(Capture::default())).collect();
    for (bus, capture) in captures.iter().enumerate() {
        mixer.attach(bus, capture.clone(), ConsumerOptions::default()).unwrap();
    }

    music.push(AudioBlock::new(0, [vec![0.5; 4]])).unwrap();
    mic.push(AudioBlock::new(0, [vec![0.25; 4]])).unwrap();
    mixer.process_window(0).unwrap();

    let first = |c: &Capture| c.0.lock()[0].1[0][0];
    assert_eq!(first(&captures[0]), 0.5);
    assert_eq!(first(&captures[1]), 0.75);
    assert_eq!(first(&captures[2]), 0.25);
}

#[test]
fn bus_divisor_applies_per_window() {
    let mixer = Mixer::new(config(SpeakerLayout::Mono, 4, 1)).unwrap();
    let every_third = Recorder::new();
    mixer.attach(0, every_third.clone(), ConsumerOptions::every(3)).unwrap();
    for n in 0..7u64 {
        mixer.process_window(n * 4).unwrap();
    }
    assert_eq!(every_third.stamps(), vec![0, 12, 24]);
}

#[test]
fn paced_output_delivers_until_shutdown() {
    init_tracing();
    let mut output = AudioOutput::start(config(SpeakerLayout::Stereo, 480, 2)).unwrap();
    let recorder = Recorder::new();
    output
        .mixer()
        .attach(1, recorder.clone(), ConsumerOptions::default())
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while recorder.count() < 4 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    output.shutdown();
    let delivered = recorder.count();
    assert!(delivered >= 4);

    thread::sleep(Duration::from_millis(30));
    assert_eq!(recorder.count(), delivered);
    let stats = output.stats();
    assert_eq!(stats.mixer.pool.in_use, 0);
    assert_eq!(stats.mixer.active_buses, 0);
}
