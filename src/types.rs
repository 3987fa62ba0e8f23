use ffmpeg_next as ffmpeg;
use std::time::Instant;

/// Which media stream a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One-time output format descriptor announced by an encoder before it
/// emits any payload-bearing sample.
///
/// `time_base` is the timebase `Sample::timestamp_us` values for this
/// track are expressed in; the encoders in this crate always announce
/// 1/1,000,000 (microseconds).
pub struct TrackFormat {
    pub kind: TrackKind,
    pub parameters: ffmpeg::codec::Parameters,
    pub time_base: ffmpeg::Rational,
}

/// One compressed media sample.
///
/// The payload is borrowed: ownership stays with the encoder, and the
/// muxer must not retain it past the write call (the backing buffer is
/// reused for the next drain cycle).
pub struct Sample<'a> {
    pub payload: &'a [u8],
    pub timestamp_us: i64,
    pub is_key: bool,
    pub is_config: bool,
}

impl Sample<'_> {
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Muxer lifecycle: `Created → Started → Stopped`, with `Started`
/// reached exactly once, inside the track registration that completes
/// the expected set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    Created,
    Started,
    Stopped,
}

/// Encoder lifecycle. Draining is a transient condition inside `stop`,
/// not an observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EncoderState {
    Configured,
    Running,
    Released,
}

/// A registered track entry; immutable once assigned by the muxer.
#[derive(Debug, Clone, Copy)]
pub struct Track {
    pub index: usize,
    pub kind: TrackKind,
    pub registered_at: Instant,
}
