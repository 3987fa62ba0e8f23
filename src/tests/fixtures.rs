//! Test fixtures: a recording container fake, format builders, and
//! simple media generators.

use crate::encode::RawVideoFrame;
use crate::error::{RecError, Result};
use crate::mux::ContainerSink;
use crate::session::AudioSource;
use crate::types::{Sample, TrackFormat, TrackKind};
use ffmpeg_next as ffmpeg;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One `write` call captured by [`RecordingSink`].
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub track_index: usize,
    pub payload: Vec<u8>,
    pub timestamp_us: i64,
    pub is_key: bool,
}

/// Shared view into everything a [`RecordingSink`] has seen.
#[derive(Default)]
pub struct SinkLog {
    tracks: AtomicUsize,
    begins: AtomicUsize,
    finishes: AtomicUsize,
    closes: AtomicUsize,
    writes: Mutex<Vec<WriteRecord>>,
    rotation: Mutex<Option<u32>>,
    fail_begin: AtomicBool,
}

impl SinkLog {
    pub fn track_count(&self) -> usize {
        self.tracks.load(Ordering::SeqCst)
    }

    pub fn begin_count(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn finish_count(&self) -> usize {
        self.finishes.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    pub fn rotation(&self) -> Option<u32> {
        *self.rotation.lock()
    }

    /// Make the next `begin` call fail.
    pub fn fail_next_begin(&self) {
        self.fail_begin.store(true, Ordering::SeqCst);
    }
}

/// Container fake that records every call instead of touching FFmpeg.
pub struct RecordingSink {
    log: Arc<SinkLog>,
}

impl RecordingSink {
    pub fn new() -> (Self, Arc<SinkLog>) {
        let log = Arc::new(SinkLog::default());
        (
            Self {
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl ContainerSink for RecordingSink {
    fn add_track(&mut self, _format: &TrackFormat) -> Result<usize> {
        Ok(self.log.tracks.fetch_add(1, Ordering::SeqCst))
    }

    fn set_rotation(&mut self, degrees: u32) {
        *self.log.rotation.lock() = Some(degrees);
    }

    fn begin(&mut self) -> Result<()> {
        if self.log.fail_begin.swap(false, Ordering::SeqCst) {
            return Err(RecError::Muxing("injected begin failure".to_string()));
        }
        self.log.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, track_index: usize, sample: &Sample<'_>) -> Result<()> {
        self.log.writes.lock().push(WriteRecord {
            track_index,
            payload: sample.payload.to_vec(),
            timestamp_us: sample.timestamp_us,
            is_key: sample.is_key,
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.log.finishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A format descriptor for state-machine tests. The fake sink never
/// inspects the parameters, so freshly allocated ones suffice.
pub fn test_format(kind: TrackKind) -> TrackFormat {
    TrackFormat {
        kind,
        parameters: ffmpeg::codec::Parameters::new(),
        time_base: crate::ffmpeg_utils::utils::micro_timebase(),
    }
}

/// A flat mid-gray I420 frame.
pub fn gray_frame(width: u32, height: u32, timestamp_us: i64) -> RawVideoFrame {
    let y = (width * height) as usize;
    let c = y / 4;
    RawVideoFrame {
        data: vec![128u8; y + 2 * c],
        width,
        height,
        timestamp_us,
    }
}

/// Endless 440 Hz sine, interleaved across `channels`.
pub struct SineSource {
    channels: usize,
    sample_rate: u32,
    position: u64,
    /// Stop producing after this many samples per channel.
    limit: Option<u64>,
}

impl SineSource {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            channels,
            sample_rate,
            position: 0,
            limit: None,
        }
    }

    pub fn with_limit(mut self, samples: u64) -> Self {
        self.limit = Some(samples);
        self
    }
}

impl AudioSource for SineSource {
    fn read(&mut self, buf: &mut [f32]) -> usize {
        let mut frames = buf.len() / self.channels;
        if let Some(limit) = self.limit {
            let left = limit.saturating_sub(self.position) as usize;
            frames = frames.min(left);
        }
        for i in 0..frames {
            let t = (self.position + i as u64) as f32 / self.sample_rate as f32;
            let value = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.4;
            for ch in 0..self.channels {
                buf[i * self.channels + ch] = value;
            }
        }
        self.position += frames as u64;
        frames * self.channels
    }
}

/// Install a test tracing subscriber; harmless if one is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
