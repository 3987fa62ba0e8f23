//! Recording session: wires the two encoders and the muxer together and
//! drives them from worker threads.

use crate::config::{Orientation, SessionConfig};
use crate::encode::{AudioSampleEncoder, RawVideoFrame, VideoSampleEncoder};
use crate::error::Result;
use crate::mux::{Mp4Container, TrackMuxer};
use crate::types::MuxerState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use uuid::Uuid;

/// Capacity of the frame channel feeding the video worker. Small on
/// purpose: when encoding falls behind, frames are dropped at the source
/// instead of ballooning memory.
const VIDEO_QUEUE_DEPTH: usize = 4;

/// How many PCM samples (per channel) the audio worker pulls per read.
const AUDIO_CHUNK: usize = 2048;

/// A pull-based PCM source, read from the session's audio worker thread.
///
/// `read` fills `buf` with interleaved f32 samples and returns how many
/// values were written; 0 means no data right now (the worker retries).
pub trait AudioSource: Send + 'static {
    fn read(&mut self, buf: &mut [f32]) -> usize;
}

/// One audio+video recording into a single MP4 file.
///
/// `start` opens the container, configures both encoders, and spawns one
/// worker thread per track. Frames are pushed via [`push_frame`]
/// (non-blocking); audio is pulled from the supplied [`AudioSource`].
/// [`stop`] tears the whole pipeline down in order: encoders flush, the
/// muxer finalizes, the file handle is released.
///
/// [`push_frame`]: RecordingSession::push_frame
/// [`stop`]: RecordingSession::stop
pub struct RecordingSession {
    muxer: Arc<TrackMuxer>,
    video_tx: Option<SyncSender<RawVideoFrame>>,
    workers: Vec<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    session_id: Uuid,
}

impl RecordingSession {
    /// Build and start the full pipeline described by `config`.
    ///
    /// Fails fast on any configuration problem (unavailable codec, bad
    /// parameters, unwritable output path); on failure the output file
    /// handle is released before returning.
    pub fn start<S: AudioSource>(config: SessionConfig, audio_source: S) -> Result<Self> {
        let session_id = Uuid::new_v4();
        tracing::info!(%session_id, path = ?config.output_path, "recording session starting");

        let container = Mp4Container::create(&config.output_path)?;
        let muxer = Arc::new(TrackMuxer::new(
            Box::new(container),
            config.expected_tracks.max(1),
        ));

        // Everything past container creation must release the file on
        // error, so the fallible part runs under one closure.
        let setup = || -> Result<(AudioSampleEncoder, VideoSampleEncoder)> {
            if config.orientation != Orientation::Deg0 {
                muxer.set_orientation_hint(config.orientation.degrees())?;
            }
            let mut audio_enc =
                AudioSampleEncoder::configure(Arc::clone(&muxer), &config.audio)?;
            let mut video_enc =
                VideoSampleEncoder::configure(Arc::clone(&muxer), &config.video)?;
            audio_enc.start()?;
            video_enc.start()?;
            Ok((audio_enc, video_enc))
        };
        let (mut audio_enc, mut video_enc) = match setup() {
            Ok(pair) => pair,
            Err(e) => {
                muxer.stop();
                return Err(e);
            }
        };

        let stop_flag = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(2);

        let audio_stop = Arc::clone(&stop_flag);
        let mut source = audio_source;
        let channels = config.audio.channels as usize;
        let audio_worker = std::thread::Builder::new()
            .name("camrec-audio".to_string())
            .spawn(move || {
                let mut buf = vec![0f32; AUDIO_CHUNK * channels];
                while !audio_stop.load(Ordering::Relaxed) {
                    let n = source.read(&mut buf);
                    if n == 0 {
                        std::thread::sleep(std::time::Duration::from_millis(2));
                        continue;
                    }
                    if let Err(e) = audio_enc.submit_pcm(&buf[..n]) {
                        tracing::warn!(error = %e, "audio submit failed");
                    }
                }
                audio_enc.stop();
            });
        match audio_worker {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                muxer.stop();
                return Err(e.into());
            }
        }

        let (video_tx, video_rx) = sync_channel::<RawVideoFrame>(VIDEO_QUEUE_DEPTH);
        let video_worker = std::thread::Builder::new()
            .name("camrec-video".to_string())
            .spawn(move || {
                while let Ok(frame) = video_rx.recv() {
                    if let Err(e) = video_enc.submit(&frame) {
                        tracing::warn!(error = %e, "video submit failed");
                    }
                }
                video_enc.stop();
            });
        match video_worker {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                // Unwind the audio worker before releasing the container.
                stop_flag.store(true, Ordering::Relaxed);
                for worker in workers {
                    let _ = worker.join();
                }
                muxer.stop();
                return Err(e.into());
            }
        }

        Ok(Self {
            muxer,
            video_tx: Some(video_tx),
            workers,
            stop_flag,
            session_id,
        })
    }

    /// Hand a raw frame to the video worker without blocking.
    ///
    /// If the encoder is backed up the frame is dropped, keeping the
    /// capture thread real-time.
    pub fn push_frame(&self, frame: RawVideoFrame) {
        let Some(tx) = self.video_tx.as_ref() else {
            return;
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                tracing::warn!(
                    timestamp_us = frame.timestamp_us,
                    "video queue full, frame dropped"
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("video worker gone, frame dropped");
            }
        }
    }

    /// Stop recording and finalize the output file.
    ///
    /// Blocks until both workers have flushed their encoders, then stops
    /// the muxer. Safe to call any time after `start`.
    pub fn stop(mut self) {
        tracing::info!(session_id = %self.session_id, "recording session stopping");

        self.stop_flag.store(true, Ordering::Relaxed);
        // Dropping the sender ends the video worker's recv loop.
        drop(self.video_tx.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("recording worker panicked");
            }
        }
        self.muxer.stop();
    }

    pub fn muxer_state(&self) -> MuxerState {
        self.muxer.state()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        // `stop` consumes self; reaching here without it means the
        // session is being abandoned. Signal the workers so the threads
        // do not spin forever, but do not block in drop.
        self.stop_flag.store(true, Ordering::Relaxed);
        drop(self.video_tx.take());
    }
}
