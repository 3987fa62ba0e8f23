//! Output container ownership and write gating.

pub mod container;
pub mod muxer;

pub use container::{ContainerSink, Mp4Container};
pub use muxer::TrackMuxer;
