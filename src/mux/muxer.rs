//! Write-gating track muxer.
//!
//! Owns the single output container and serializes access from the two
//! encoder threads. Writes are gated behind a registration barrier: the
//! container only starts accepting samples once every expected track has
//! announced its format, because the mp4 schema is frozen at header
//! time. Samples written before that point are silently dropped.

use crate::error::{RecError, Result};
use crate::mux::container::ContainerSink;
use crate::types::{MuxerState, Sample, Track, TrackFormat};
use parking_lot::Mutex;
use std::time::Instant;

/// Thread-safe owner of the output container.
///
/// `add_track`, `write_sample` and `stop` share one mutual-exclusion
/// domain; the `Created → Started` transition inside `add_track` and the
/// finalize-and-release inside `stop` are each atomic with respect to
/// every other operation.
pub struct TrackMuxer {
    inner: Mutex<Inner>,
}

struct Inner {
    sink: Box<dyn ContainerSink>,
    state: MuxerState,
    expected_tracks: usize,
    tracks: Vec<Track>,
    closed: bool,
}

impl TrackMuxer {
    pub fn new(sink: Box<dyn ContainerSink>, expected_tracks: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sink,
                state: MuxerState::Created,
                expected_tracks: expected_tracks.max(1),
                tracks: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Register a track and, when the expected count is reached, start
    /// the container.
    ///
    /// Returns the stable track index. The `Created → Started` transition
    /// fires synchronously inside the call that completes registration;
    /// registering after that is a state error (an encoder announcing its
    /// format twice is a bug).
    pub fn add_track(&self, format: TrackFormat) -> Result<usize> {
        let mut inner = self.inner.lock();

        match inner.state {
            MuxerState::Created => {}
            MuxerState::Started => {
                return Err(RecError::InvalidState(
                    "track registered after muxer start".to_string(),
                ))
            }
            MuxerState::Stopped => {
                return Err(RecError::InvalidState(
                    "track registered after muxer stop".to_string(),
                ))
            }
        }
        if inner.tracks.len() >= inner.expected_tracks {
            return Err(RecError::TrackLimit {
                expected: inner.expected_tracks,
            });
        }

        let index = inner.sink.add_track(&format)?;
        inner.tracks.push(Track {
            index,
            kind: format.kind,
            registered_at: Instant::now(),
        });

        tracing::info!(
            index,
            kind = ?format.kind,
            registered = inner.tracks.len(),
            expected = inner.expected_tracks,
            "track registered"
        );

        if inner.tracks.len() == inner.expected_tracks {
            inner.sink.begin()?;
            inner.state = MuxerState::Started;
            tracing::info!("muxer started");
        }

        Ok(index)
    }

    /// Write one sample if the muxer has started.
    ///
    /// Before `Started` (and after `stop`) the sample is silently
    /// dropped; config-only and zero-size samples are never forwarded.
    pub fn write_sample(&self, track_index: usize, sample: &Sample<'_>) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.state != MuxerState::Started {
            tracing::trace!(
                track_index,
                state = ?inner.state,
                timestamp_us = sample.timestamp_us,
                "sample dropped outside Started"
            );
            return Ok(());
        }
        if sample.is_config || sample.payload.is_empty() {
            return Ok(());
        }

        inner.sink.write(track_index, sample)
    }

    /// Stop and release the muxer safely.
    ///
    /// Idempotent: finalizes the container if it ever started, then
    /// releases the file handle, each step best-effort so one failure
    /// never blocks the other release.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();

        if inner.state == MuxerState::Started {
            if let Err(e) = inner.sink.finish() {
                tracing::warn!(error = %e, "container finalize failed");
            }
        }
        if !inner.closed {
            inner.sink.close();
            inner.closed = true;
        }
        inner.state = MuxerState::Stopped;
    }

    /// Set how many tracks to wait for before starting (default 2).
    ///
    /// Ignored after `Started`; never lowered below what has already
    /// registered.
    pub fn set_expected_track_count(&self, count: usize) {
        let mut inner = self.inner.lock();
        if inner.state != MuxerState::Created {
            tracing::debug!(count, "expected track count change ignored after start");
            return;
        }
        inner.expected_tracks = count.max(1).max(inner.tracks.len());
    }

    /// Set the playback rotation hint. Valid values: 0, 90, 180, 270.
    ///
    /// Must be called before the muxer starts (i.e. before the last track
    /// triggers the header write).
    pub fn set_orientation_hint(&self, degrees: u32) -> Result<()> {
        if !matches!(degrees, 0 | 90 | 180 | 270) {
            return Err(RecError::InvalidOrientation(degrees));
        }

        let mut inner = self.inner.lock();
        if inner.state != MuxerState::Created {
            return Err(RecError::InvalidState(
                "orientation hint must be set before muxer start".to_string(),
            ));
        }
        inner.sink.set_rotation(degrees);
        Ok(())
    }

    pub fn state(&self) -> MuxerState {
        self.inner.lock().state
    }

    pub fn is_started(&self) -> bool {
        self.state() == MuxerState::Started
    }

    pub fn track_count(&self) -> usize {
        self.inner.lock().tracks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{test_format, RecordingSink};
    use crate::types::TrackKind;

    fn sample(payload: &[u8], timestamp_us: i64) -> Sample<'_> {
        Sample {
            payload,
            timestamp_us,
            is_key: false,
            is_config: false,
        }
    }

    #[test]
    fn test_starts_exactly_on_expected_count() {
        let (sink, log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 2);

        assert_eq!(muxer.state(), MuxerState::Created);
        muxer.add_track(test_format(TrackKind::Audio)).unwrap();
        assert_eq!(muxer.state(), MuxerState::Created);
        assert_eq!(log.begin_count(), 0);

        muxer.add_track(test_format(TrackKind::Video)).unwrap();
        assert_eq!(muxer.state(), MuxerState::Started);
        assert_eq!(log.begin_count(), 1);
        assert_eq!(muxer.track_count(), 2);
        assert_eq!(log.track_count(), 2);
    }

    #[test]
    fn test_add_track_after_start_is_rejected() {
        let (sink, log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 1);

        muxer.add_track(test_format(TrackKind::Video)).unwrap();
        assert!(muxer.is_started());

        let err = muxer.add_track(test_format(TrackKind::Audio)).unwrap_err();
        assert!(matches!(err, RecError::InvalidState(_)));
        assert_eq!(log.begin_count(), 1);
        assert_eq!(muxer.track_count(), 1);
    }

    #[test]
    fn test_write_before_start_is_dropped() {
        let (sink, log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 2);

        let track = muxer.add_track(test_format(TrackKind::Audio)).unwrap();
        muxer.write_sample(track, &sample(b"early", 0)).unwrap();

        assert_eq!(log.write_count(), 0);
        assert_eq!(muxer.state(), MuxerState::Created);
    }

    #[test]
    fn test_write_after_start_is_forwarded_once() {
        let (sink, log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 2);

        let a = muxer.add_track(test_format(TrackKind::Audio)).unwrap();
        muxer.add_track(test_format(TrackKind::Video)).unwrap();

        muxer.write_sample(a, &sample(b"payload", 42)).unwrap();

        let writes = log.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].track_index, a);
        assert_eq!(writes[0].payload, b"payload");
        assert_eq!(writes[0].timestamp_us, 42);
    }

    #[test]
    fn test_config_and_empty_samples_are_never_forwarded() {
        let (sink, log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 1);
        let track = muxer.add_track(test_format(TrackKind::Video)).unwrap();

        muxer.write_sample(track, &sample(b"", 0)).unwrap();
        muxer
            .write_sample(
                track,
                &Sample {
                    payload: b"sps-pps",
                    timestamp_us: 0,
                    is_key: false,
                    is_config: true,
                },
            )
            .unwrap();

        assert_eq!(log.write_count(), 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (sink, log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 1);
        muxer.add_track(test_format(TrackKind::Video)).unwrap();

        muxer.stop();
        muxer.stop();
        muxer.stop();

        assert_eq!(muxer.state(), MuxerState::Stopped);
        assert_eq!(log.finish_count(), 1);
        assert_eq!(log.close_count(), 1);
    }

    #[test]
    fn test_stop_without_start_still_releases_once() {
        let (sink, log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 2);

        muxer.stop();
        muxer.stop();

        // Never started: nothing to finalize, but the handle is closed.
        assert_eq!(log.finish_count(), 0);
        assert_eq!(log.close_count(), 1);
        assert_eq!(muxer.state(), MuxerState::Stopped);
    }

    #[test]
    fn test_write_after_stop_is_dropped() {
        let (sink, log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 1);
        let track = muxer.add_track(test_format(TrackKind::Video)).unwrap();
        muxer.stop();

        muxer.write_sample(track, &sample(b"late", 99)).unwrap();
        assert_eq!(log.write_count(), 0);
    }

    #[test]
    fn test_registration_barrier_scenario() {
        // Full lifecycle: register A, write (dropped), register B (starts),
        // write (lands), stop twice.
        let (sink, log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 2);

        let a = muxer.add_track(test_format(TrackKind::Audio)).unwrap();
        assert_eq!(muxer.state(), MuxerState::Created);

        muxer.write_sample(a, &sample(b"dropped", 1)).unwrap();
        assert_eq!(log.write_count(), 0);

        muxer.add_track(test_format(TrackKind::Video)).unwrap();
        assert_eq!(muxer.state(), MuxerState::Started);

        muxer.write_sample(a, &sample(b"written", 2)).unwrap();
        assert_eq!(log.write_count(), 1);

        muxer.stop();
        muxer.stop();
        assert_eq!(log.finish_count(), 1);
        assert_eq!(log.close_count(), 1);
    }

    #[test]
    fn test_orientation_hint_lifecycle() {
        let (sink, log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 1);

        muxer.set_orientation_hint(90).unwrap();
        assert_eq!(log.rotation(), Some(90));

        muxer.add_track(test_format(TrackKind::Video)).unwrap();
        assert!(muxer.is_started());

        let err = muxer.set_orientation_hint(180).unwrap_err();
        assert!(matches!(err, RecError::InvalidState(_)));
        assert_eq!(log.rotation(), Some(90));
    }

    #[test]
    fn test_orientation_hint_rejects_invalid_degrees() {
        let (sink, _log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 2);

        for degrees in [1, 45, 91, 359, 360] {
            let err = muxer.set_orientation_hint(degrees).unwrap_err();
            assert!(matches!(err, RecError::InvalidOrientation(d) if d == degrees));
        }
    }

    #[test]
    fn test_track_limit_is_enforced() {
        let (sink, _log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 2);
        muxer.set_expected_track_count(0); // clamped to 1

        muxer.add_track(test_format(TrackKind::Video)).unwrap();
        assert!(muxer.is_started());
    }

    #[test]
    fn test_expected_count_change_ignored_after_start() {
        let (sink, log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 1);
        muxer.add_track(test_format(TrackKind::Video)).unwrap();
        assert!(muxer.is_started());

        muxer.set_expected_track_count(3);
        assert_eq!(log.begin_count(), 1);
        assert!(muxer.is_started());
    }

    #[test]
    fn test_expected_count_never_below_registered() {
        let (sink, log) = RecordingSink::new();
        let muxer = TrackMuxer::new(Box::new(sink), 3);

        muxer.add_track(test_format(TrackKind::Audio)).unwrap();
        muxer.add_track(test_format(TrackKind::Video)).unwrap();

        // Lowering below the registered count clamps; the transition still
        // only ever fires inside add_track.
        muxer.set_expected_track_count(1);
        assert_eq!(muxer.state(), MuxerState::Created);
        assert_eq!(log.begin_count(), 0);
    }

    #[test]
    fn test_begin_failure_leaves_muxer_created() {
        let (sink, log) = RecordingSink::new();
        log.fail_next_begin();
        let muxer = TrackMuxer::new(Box::new(sink), 1);

        let err = muxer.add_track(test_format(TrackKind::Video)).unwrap_err();
        assert!(matches!(err, RecError::Muxing(_)));
        assert_eq!(muxer.state(), MuxerState::Created);

        // Teardown still releases the handle.
        muxer.stop();
        assert_eq!(log.finish_count(), 0);
        assert_eq!(log.close_count(), 1);
    }

    #[test]
    fn test_concurrent_writers_and_stop() {
        use std::sync::Arc;

        let (sink, log) = RecordingSink::new();
        let muxer = Arc::new(TrackMuxer::new(Box::new(sink), 2));

        let a = muxer.add_track(test_format(TrackKind::Audio)).unwrap();
        let v = muxer.add_track(test_format(TrackKind::Video)).unwrap();
        assert!(muxer.is_started());

        let mut handles = Vec::new();
        for track in [a, v] {
            let muxer = Arc::clone(&muxer);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let payload = [track as u8];
                    let s = Sample {
                        payload: &payload,
                        timestamp_us: i,
                        is_key: false,
                        is_config: false,
                    };
                    muxer.write_sample(track, &s).unwrap();
                }
            }));
        }
        // Race a stop against the writers; late writes must be dropped,
        // not error.
        let stopper = {
            let muxer = Arc::clone(&muxer);
            std::thread::spawn(move || muxer.stop())
        };
        for handle in handles {
            handle.join().unwrap();
        }
        stopper.join().unwrap();

        assert_eq!(muxer.state(), MuxerState::Stopped);
        assert_eq!(log.finish_count(), 1);
        assert_eq!(log.close_count(), 1);
        assert!(log.write_count() <= 200);
    }
}
