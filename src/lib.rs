pub(crate) mod config;
pub(crate) mod encode;
pub(crate) mod error;
pub(crate) mod ffmpeg_utils;
pub(crate) mod mux;
pub(crate) mod session;
pub(crate) mod types;

#[cfg(test)]
pub(crate) mod tests;

pub use config::{AudioParams, Orientation, SessionConfig, VideoParams};
pub use encode::{AudioSampleEncoder, RawVideoFrame, VideoSampleEncoder};
pub use error::{FfmpegError, RecError, Result};
pub use ffmpeg_utils::{init, install_log_filter};
pub use mux::{ContainerSink, Mp4Container, TrackMuxer};
pub use session::{AudioSource, RecordingSession};
pub use types::{MuxerState, Sample, Track, TrackFormat, TrackKind};
