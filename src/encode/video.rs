//! H.264 video sample encoder.

use crate::error::{FfmpegError, RecError, Result};
use crate::ffmpeg_utils::helpers;
use crate::ffmpeg_utils::utils::micro_timebase;
use crate::mux::TrackMuxer;
use crate::types::{EncoderState, Sample, TrackFormat, TrackKind};
use crate::VideoParams;
use ffmpeg_next as ffmpeg;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long `submit` waits for the encoder to make room before dropping
/// the frame. Keeping this short keeps the capture path real-time.
const SUBMIT_WAIT: Duration = Duration::from_millis(10);

/// Upper bound on the flush loop in `stop`.
const STOP_DRAIN_DEADLINE: Duration = Duration::from_secs(1);

/// One uncompressed frame in planar I420 (YUV 4:2:0) layout: a full-size
/// Y plane followed by quarter-size U and V planes, no row padding.
pub struct RawVideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture-time presentation timestamp in microseconds.
    pub timestamp_us: i64,
}

/// Encodes raw frames to H.264 and feeds the resulting samples to the
/// shared muxer.
///
/// Single-writer: one session thread owns the encoder and calls
/// `submit`/`stop` on it; the muxer handle is the only shared state.
pub struct VideoSampleEncoder {
    muxer: Arc<TrackMuxer>,
    encoder: ffmpeg::encoder::Video,
    width: u32,
    height: u32,
    state: EncoderState,
    track_index: Option<usize>,
}

// SAFETY: the AVCodecContext is owned exclusively by this struct, which
// is moved to a single worker thread and never shared by reference
// across threads.
unsafe impl Send for VideoSampleEncoder {}

impl VideoSampleEncoder {
    /// Create and open an H.264 encoder for the given parameters.
    ///
    /// Odd dimensions are rounded up to even, as 4:2:0 subsampling
    /// requires. Fails with [`RecError::Configuration`] when no H.264
    /// encoder is available in the linked FFmpeg build.
    pub fn configure(muxer: Arc<TrackMuxer>, params: &VideoParams) -> Result<Self> {
        let width = params.width + (params.width & 1);
        let height = params.height + (params.height & 1);
        let frame_rate = params.frame_rate.max(1);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::H264).ok_or_else(|| {
            RecError::Configuration("no H.264 encoder in this FFmpeg build".to_string())
        })?;

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| FfmpegError::EncoderCreate(format!("H.264: {}", e)))?;

        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(ffmpeg::format::Pixel::YUV420P);
        encoder.set_time_base(micro_timebase());
        encoder.set_frame_rate(Some(ffmpeg::Rational::new(frame_rate as i32, 1)));
        encoder.set_bit_rate(params.bit_rate);
        // One keyframe per second; no B-frames so samples leave the
        // encoder in presentation order.
        encoder.set_gop(frame_rate);
        encoder.set_max_b_frames(0);
        encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);

        let mut opts = ffmpeg::Dictionary::new();
        opts.set("preset", "veryfast");
        opts.set("tune", "zerolatency");

        let encoder = encoder
            .open_with(opts)
            .map_err(|e| FfmpegError::EncoderConfigure(format!("H.264: {}", e)))?;

        tracing::info!(width, height, frame_rate, bit_rate = params.bit_rate, "video encoder configured");

        Ok(Self {
            muxer,
            encoder,
            width,
            height,
            state: EncoderState::Configured,
            track_index: None,
        })
    }

    /// Begin accepting frames.
    pub fn start(&mut self) -> Result<()> {
        if self.state != EncoderState::Configured {
            return Err(RecError::InvalidState(format!(
                "video encoder start in state {:?}",
                self.state
            )));
        }
        self.state = EncoderState::Running;
        Ok(())
    }

    /// Encode one raw frame and forward any finished samples to the
    /// muxer.
    ///
    /// When the encoder's input queue is full, waits up to
    /// [`SUBMIT_WAIT`] while draining output; if the queue is still full
    /// after that, the frame is dropped with a warning rather than
    /// stalling the capture thread.
    pub fn submit(&mut self, raw: &RawVideoFrame) -> Result<()> {
        if self.state != EncoderState::Running {
            return Err(RecError::InvalidState(format!(
                "video frame submitted in state {:?}",
                self.state
            )));
        }

        let mut frame =
            ffmpeg::util::frame::Video::new(ffmpeg::format::Pixel::YUV420P, self.width, self.height);
        self.fill_planes(&mut frame, raw)?;
        frame.set_pts(Some(raw.timestamp_us));

        let deadline = Instant::now() + SUBMIT_WAIT;
        loop {
            match self.encoder.send_frame(&frame) {
                Ok(()) => break,
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    // Output queue is full; drain to make room.
                    self.drain()?;
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            timestamp_us = raw.timestamp_us,
                            "video encoder busy, frame dropped"
                        );
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => {
                    return Err(FfmpegError::EncodeFrame(format!("video: {}", e)).into());
                }
            }
        }

        self.drain()
    }

    /// Flush remaining frames and release the codec. Best-effort and
    /// idempotent; never returns an error.
    pub fn stop(&mut self) {
        if self.state == EncoderState::Released {
            return;
        }
        if self.state == EncoderState::Running {
            if let Err(e) = self.encoder.send_eof() {
                tracing::warn!(error = %e, "video encoder eof failed");
            }
            let deadline = Instant::now() + STOP_DRAIN_DEADLINE;
            while let Err(e) = self.drain() {
                tracing::warn!(error = %e, "video flush drain failed");
                if Instant::now() >= deadline {
                    break;
                }
            }
        }
        self.state = EncoderState::Released;
        tracing::debug!("video encoder released");
    }

    pub fn track_index(&self) -> Option<usize> {
        self.track_index
    }

    /// Copy packed I420 data into the (possibly stride-padded) frame
    /// planes.
    fn fill_planes(&self, frame: &mut ffmpeg::util::frame::Video, raw: &RawVideoFrame) -> Result<()> {
        if raw.width != self.width || raw.height != self.height {
            return Err(RecError::Configuration(format!(
                "frame is {}x{}, encoder expects {}x{}",
                raw.width, raw.height, self.width, self.height
            )));
        }

        let w = self.width as usize;
        let h = self.height as usize;
        let y_size = w * h;
        let c_w = w / 2;
        let c_h = h / 2;
        let c_size = c_w * c_h;
        if raw.data.len() < y_size + 2 * c_size {
            return Err(RecError::Configuration(format!(
                "I420 frame too short: {} bytes for {}x{}",
                raw.data.len(),
                w,
                h
            )));
        }

        let planes = [
            (0usize, &raw.data[..y_size], w, h),
            (1, &raw.data[y_size..y_size + c_size], c_w, c_h),
            (2, &raw.data[y_size + c_size..y_size + 2 * c_size], c_w, c_h),
        ];
        for (index, src, row_len, rows) in planes {
            let stride = frame.stride(index);
            let dst = frame.data_mut(index);
            for row in 0..rows {
                let s = &src[row * row_len..(row + 1) * row_len];
                dst[row * stride..row * stride + row_len].copy_from_slice(s);
            }
        }
        Ok(())
    }

    /// Pull every finished packet out of the encoder and hand it to the
    /// muxer.
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
                    let sample = Sample {
                        payload,
                        timestamp_us: packet.pts().or(packet.dts()).unwrap_or(0),
                        is_key: packet.is_key(),
                        is_config: false,
                    };
                    self.muxer.write_sample(track, &sample)?;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(FfmpegError::EncodeFrame(format!("video: {}", e)).into()),
            }
        }
        Ok(())
    }

    /// Announce the track format on first output. The opened encoder
    /// context carries the SPS/PPS extradata the container needs.
    fn ensure_track(&mut self) -> Result<usize> {
        if let Some(index) = self.track_index {
            return Ok(index);
        }
        let ctx: &ffmpeg::codec::Context = &self.encoder;
        let format = TrackFormat {
            kind: TrackKind::Video,
            parameters: helpers::codec_parameters_from_context(ctx),
            time_base: micro_timebase(),
        };
        let index = self.muxer.add_track(format)?;
        self.track_index = Some(index);
        Ok(index)
    }
}
