//! AAC audio sample encoder.

use crate::error::{FfmpegError, RecError, Result};
use crate::ffmpeg_utils::helpers;
use crate::ffmpeg_utils::utils::{micro_timebase, samples_to_us};
use crate::mux::TrackMuxer;
use crate::types::{EncoderState, Sample, TrackFormat, TrackKind};
use crate::AudioParams;
use ffmpeg_next as ffmpeg;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// PCM layout the encoder consumes internally. Callers submit interleaved
/// f32; deinterleaving into planes happens here.
const PCM_FORMAT: ffmpeg::format::Sample =
    ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Planar);

/// AAC's fixed frame size; used as a fallback when the opened context
/// does not report one.
const AAC_FRAME_SIZE: usize = 1024;

/// How long `submit_pcm` waits for the encoder to make room before
/// dropping a frame.
const SUBMIT_WAIT: Duration = Duration::from_millis(10);

/// Upper bound on the flush loop in `stop`.
const STOP_DRAIN_DEADLINE: Duration = Duration::from_secs(1);

/// Encodes interleaved f32 PCM to AAC and feeds the resulting samples to
/// the shared muxer.
///
/// Input is buffered until a full codec frame (`frame_size` samples per
/// channel) is available; the tail shorter than one frame is encoded at
/// `stop`.
pub struct AudioSampleEncoder {
    muxer: Arc<TrackMuxer>,
    encoder: ffmpeg::encoder::Audio,
    frame_size: usize,
    channels: u16,
    sample_rate: u32,
    /// Interleaved samples not yet forming a full codec frame.
    pending: Vec<f32>,
    /// Running sample count, the pts of the next frame in 1/sample_rate.
    next_pts: i64,
    state: EncoderState,
    track_index: Option<usize>,
}

impl std::fmt::Debug for AudioSampleEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSampleEncoder")
            .field("frame_size", &self.frame_size)
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("pending_len", &self.pending.len())
            .field("next_pts", &self.next_pts)
            .field("state", &self.state)
            .field("track_index", &self.track_index)
            .finish_non_exhaustive()
    }
}

// SAFETY: the AVCodecContext is owned exclusively by this struct, which
// is moved to a single worker thread and never shared by reference
// across threads.
unsafe impl Send for AudioSampleEncoder {}

impl AudioSampleEncoder {
    /// Create and open an AAC encoder for the given parameters.
    ///
    /// Only mono and stereo are supported. Fails with
    /// [`RecError::Configuration`] when no AAC encoder is available.
    pub fn configure(muxer: Arc<TrackMuxer>, params: &AudioParams) -> Result<Self> {
        let layout = match params.channels {
            1 => ffmpeg::ChannelLayout::MONO,
            2 => ffmpeg::ChannelLayout::STEREO,
            n => {
                return Err(RecError::Configuration(format!(
                    "unsupported channel count: {}",
                    n
                )))
            }
        };
        if params.sample_rate == 0 {
            return Err(RecError::Configuration("sample rate must be non-zero".to_string()));
        }

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::AAC).ok_or_else(|| {
            RecError::Configuration("no AAC encoder in this FFmpeg build".to_string())
        })?;

        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec);
        context.set_time_base(ffmpeg::Rational::new(1, params.sample_rate as i32));

        let mut encoder = context
            .encoder()
            .audio()
            .map_err(|e| FfmpegError::EncoderCreate(format!("AAC: {}", e)))?;

        encoder.set_rate(params.sample_rate as i32);
        encoder.set_format(PCM_FORMAT);
        encoder.set_channel_layout(layout);
        encoder.set_bit_rate(params.bit_rate);
        encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);

        let encoder = encoder
            .open_as(codec)
            .map_err(|e| FfmpegError::EncoderConfigure(format!("AAC: {}", e)))?;

        let frame_size = match encoder.frame_size() {
            0 => AAC_FRAME_SIZE,
            n => n as usize,
        };

        tracing::info!(
            sample_rate = params.sample_rate,
            channels = params.channels,
            bit_rate = params.bit_rate,
            frame_size,
            "audio encoder configured"
        );

        Ok(Self {
            muxer,
            encoder,
            frame_size,
            channels: params.channels,
            sample_rate: params.sample_rate,
            pending: Vec::new(),
            next_pts: 0,
            state: EncoderState::Configured,
            track_index: None,
        })
    }

    /// Begin accepting PCM.
    pub fn start(&mut self) -> Result<()> {
        if self.state != EncoderState::Configured {
            return Err(RecError::InvalidState(format!(
                "audio encoder start in state {:?}",
                self.state
            )));
        }
        self.state = EncoderState::Running;
        Ok(())
    }

    /// Feed interleaved f32 PCM. Encodes as many full codec frames as the
    /// accumulated input allows and forwards finished samples to the
    /// muxer; the remainder is buffered.
    pub fn submit_pcm(&mut self, pcm: &[f32]) -> Result<()> {
        if self.state != EncoderState::Running {
            return Err(RecError::InvalidState(format!(
                "audio pcm submitted in state {:?}",
                self.state
            )));
        }

        self.pending.extend_from_slice(pcm);

        let frame_len = self.frame_size * self.channels as usize;
        while self.pending.len() >= frame_len {
            let frame = self.build_frame(self.frame_size)?;
            self.pending.drain(..frame_len);
            self.encode_frame(&frame)?;
        }
        Ok(())
    }

    /// Flush buffered PCM and remaining codec output, then release the
    /// codec. Best-effort and idempotent; never returns an error.
    pub fn stop(&mut self) {
        if self.state == EncoderState::Released {
            return;
        }
        if self.state == EncoderState::Running {
            // Encode the sub-frame tail before EOF so no captured audio
            // is lost.
            let residual = self.pending.len() / self.channels as usize;
            if residual > 0 {
                match self.build_frame(residual) {
                    Ok(frame) => {
                        self.pending.clear();
                        if let Err(e) = self.encode_frame(&frame) {
                            tracing::warn!(error = %e, "audio tail encode failed");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "audio tail frame build failed"),
                }
            }
            if let Err(e) = self.encoder.send_eof() {
                tracing::warn!(error = %e, "audio encoder eof failed");
            }
            let deadline = Instant::now() + STOP_DRAIN_DEADLINE;
            while let Err(e) = self.drain() {
                tracing::warn!(error = %e, "audio flush drain failed");
                if Instant::now() >= deadline {
                    break;
                }
            }
        }
        self.state = EncoderState::Released;
        tracing::debug!("audio encoder released");
    }

    pub fn track_index(&self) -> Option<usize> {
        self.track_index
    }

    /// Build a planar FLTP frame holding the first `sample_count` samples
    /// per channel of the pending buffer.
    fn build_frame(&mut self, sample_count: usize) -> Result<ffmpeg::util::frame::Audio> {
        let layout = match self.channels {
            1 => ffmpeg::ChannelLayout::MONO,
            _ => ffmpeg::ChannelLayout::STEREO,
        };
        let mut frame = ffmpeg::util::frame::Audio::new(PCM_FORMAT, sample_count, layout);
        frame.set_rate(self.sample_rate);

        for ch in 0..self.channels as usize {
            let bytes = helpers::audio_plane_data_mut(&mut frame, ch);
            let plane = helpers::fltp_plane_as_f32_mut(bytes, sample_count).ok_or_else(|| {
                RecError::Configuration(format!(
                    "audio plane {} too small for {} samples",
                    ch, sample_count
                ))
            })?;
            for (i, sample) in plane.iter_mut().enumerate() {
                *sample = self.pending[i * self.channels as usize + ch];
            }
        }

        frame.set_pts(Some(self.next_pts));
        self.next_pts += sample_count as i64;
        Ok(frame)
    }

    fn encode_frame(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<()> {
        let deadline = Instant::now() + SUBMIT_WAIT;
        loop {
            match self.encoder.send_frame(frame) {
                Ok(()) => break,
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    self.drain()?;
                    if Instant::now() >= deadline {
                        tracing::warn!("audio encoder busy, frame dropped");
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => {
                    return Err(FfmpegError::EncodeFrame(format!("audio: {}", e)).into());
                }
            }
        }
        self.drain()
    }

    /// Pull every finished packet out of the encoder and hand it to the
    /// muxer. Packet timestamps arrive in 1/sample_rate and are converted
    /// to the crate-wide microsecond timebase here.
    fn drain(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    let track = self.ensure_track()?;
                    let payload = match packet.data() {
                        Some(data) if !data.is_empty() => data,
                        _ => continue,
                    };
                    let pts = packet.pts().or(packet.dts()).unwrap_or(0);
                    let sample = Sample {
                        payload,
                        timestamp_us: samples_to_us(pts, self.sample_rate),
                        is_key: packet.is_key(),
                        is_config: false,
                    };
                    self.muxer.write_sample(track, &sample)?;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(FfmpegError::EncodeFrame(format!("audio: {}", e)).into()),
            }
        }
        Ok(())
    }

    /// Announce the track format on first output. The opened encoder
    /// context carries the AudioSpecificConfig extradata the container
    /// needs.
    fn ensure_track(&mut self) -> Result<usize> {
        if let Some(index) = self.track_index {
            return Ok(index);
        }
        let ctx: &ffmpeg::codec::Context = &self.encoder;
        let format = TrackFormat {
            kind: TrackKind::Audio,
            parameters: helpers::codec_parameters_from_context(ctx),
            time_base: micro_timebase(),
        };
        let index = self.muxer.add_track(format)?;
        self.track_index = Some(index);
        Ok(index)
    }
}
