//! Container backends for the track muxer.

use crate::error::{FfmpegError, RecError, Result};
use crate::ffmpeg_utils::helpers;
use crate::ffmpeg_utils::utils::{micro_timebase, rescale_ts};
use crate::types::{Sample, TrackFormat, TrackKind};
use ffmpeg_next as ffmpeg;
use std::path::Path;

/// Seam between the muxer's lifecycle logic and the container library.
///
/// Calls arrive strictly serialized by the `TrackMuxer` lock and in
/// lifecycle order: `add_track` and `set_rotation` before `begin`,
/// `write` only between `begin` and `finish`, `close` at most once and
/// in any lifecycle state.
pub trait ContainerSink: Send {
    /// Register a stream for `format` and return its track index.
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize>;

    /// Record a playback rotation hint for the video track.
    fn set_rotation(&mut self, degrees: u32);

    /// Write the container header. After this the schema is frozen.
    fn begin(&mut self) -> Result<()>;

    /// Write one compressed sample to the given track.
    fn write(&mut self, track_index: usize, sample: &Sample<'_>) -> Result<()>;

    /// Finalize the container (trailing index/metadata).
    fn finish(&mut self) -> Result<()>;

    /// Release the OS-level handle.
    fn close(&mut self);
}

/// MP4 file-backed container built on an FFmpeg output context.
pub struct Mp4Container {
    output: Option<ffmpeg::format::context::Output>,
    /// Timebase each track's incoming `timestamp_us` is expressed in,
    /// indexed by track index.
    track_time_bases: Vec<ffmpeg::Rational>,
    rotation: Option<u32>,
}

// SAFETY: the AVFormatContext inside `output` is only ever touched while
// holding the TrackMuxer lock, so no two threads access it concurrently.
unsafe impl Send for Mp4Container {}

impl Mp4Container {
    /// Open an MP4 output file at `path`. The file handle is held until
    /// `close`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let output = ffmpeg::format::output_as(&path, "mp4").map_err(|e| {
            FfmpegError::MuxerCreate(format!("failed to open {:?}: {}", path.as_ref(), e))
        })?;

        tracing::debug!(path = ?path.as_ref(), "mp4 container created");

        Ok(Self {
            output: Some(output),
            track_time_bases: Vec::new(),
            rotation: None,
        })
    }

    fn output_mut(&mut self) -> Result<&mut ffmpeg::format::context::Output> {
        self.output
            .as_mut()
            .ok_or_else(|| RecError::InvalidState("container already closed".to_string()))
    }
}

impl ContainerSink for Mp4Container {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        let rotation = self.rotation;
        let output = self.output_mut()?;

        let mut stream = output
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
            .map_err(|e| FfmpegError::StreamConfig(format!("failed to add stream: {}", e)))?;
        stream.set_parameters(format.parameters.clone());
        // Reset codec_tag to let the muxer decide the correct tag for mp4.
        helpers::stream_reset_codec_tag(&mut stream);

        match format.kind {
            TrackKind::Video => {
                // 90 kHz is the conventional mp4 video timescale.
                stream.set_time_base(ffmpeg::Rational::new(1, 90_000));
                if let Some(degrees) = rotation {
                    helpers::stream_set_rotation(&mut stream, degrees);
                }
            }
            TrackKind::Audio => {
                let sample_rate = helpers::codec_params_sample_rate(&format.parameters).max(1);
                stream.set_time_base(ffmpeg::Rational::new(1, sample_rate as i32));
            }
        }

        let index = stream.index();
        self.track_time_bases.push(format.time_base);

        tracing::debug!(index, kind = ?format.kind, "container stream added");

        Ok(index)
    }

    fn set_rotation(&mut self, degrees: u32) {
        self.rotation = Some(degrees);

        // A video track may already be registered; patch it in place.
        if let Some(output) = self.output.as_mut() {
            let video_index = output
                .streams()
                .find(|s| s.parameters().medium() == ffmpeg::media::Type::Video)
                .map(|s| s.index());
            if let Some(index) = video_index {
                if let Some(mut stream) = output.stream_mut(index) {
                    helpers::stream_set_rotation(&mut stream, degrees);
                }
            }
        }
    }

    fn begin(&mut self) -> Result<()> {
        let output = self.output_mut()?;

        let mut opts = ffmpeg::Dictionary::new();
        // faststart relocates the moov box to the front at finalize so the
        // finished file is progressively playable.
        opts.set("movflags", "faststart");

        output
            .write_header_with(opts)
            .map_err(|e| FfmpegError::WriteHeader(e.to_string()))?;

        tracing::debug!("container header written");

        Ok(())
    }

    fn write(&mut self, track_index: usize, sample: &Sample<'_>) -> Result<()> {
        let src_tb = self
            .track_time_bases
            .get(track_index)
            .copied()
            .unwrap_or_else(micro_timebase);
        let output = self.output_mut()?;
        let dst_tb = output
            .stream(track_index)
            .map(|s| s.time_base())
            .ok_or_else(|| RecError::Muxing(format!("no stream for track {}", track_index)))?;

        let mut packet = ffmpeg::Packet::copy(sample.payload);
        let ts = rescale_ts(sample.timestamp_us, src_tb, dst_tb);
        // The encoders emit no B-frames, so decode order equals
        // presentation order.
        packet.set_pts(Some(ts));
        packet.set_dts(Some(ts));
        packet.set_stream(track_index);
        packet.set_position(-1);
        if sample.is_key {
            packet.set_flags(ffmpeg::codec::packet::Flags::KEY);
        }

        packet.write_interleaved(output).map_err(|e| {
            FfmpegError::WritePacket(format!("track {}: {}", track_index, e)).into()
        })
    }

    fn finish(&mut self) -> Result<()> {
        let output = self.output_mut()?;
        output
            .write_trailer()
            .map_err(|e| FfmpegError::WriteTrailer(e.to_string()))?;

        tracing::debug!("container trailer written");

        Ok(())
    }

    fn close(&mut self) {
        if self.output.take().is_some() {
            tracing::debug!("container file handle released");
        }
    }
}
