//! Per-track sample encoders.
//!
//! Each encoder owns one FFmpeg codec context and one track on the
//! shared [`TrackMuxer`](crate::mux::TrackMuxer). Both follow the same
//! shape: configure, start, feed raw media, drain compressed samples
//! into the muxer, stop with a bounded flush.

pub mod audio;
pub mod video;

pub use audio::AudioSampleEncoder;
pub use video::{RawVideoFrame, VideoSampleEncoder};
