//! FFmpeg utility functions

use ffmpeg_next as ffmpeg;

/// The timebase all encoder-facing timestamps in this crate use:
/// microseconds, matching capture-device presentation timestamps.
pub fn micro_timebase() -> ffmpeg::Rational {
    ffmpeg::Rational::new(1, 1_000_000)
}

/// Convert timestamps from one timebase to another
///
/// This is essential when copying packets between streams with different
/// timebases.
pub fn rescale_ts(ts: i64, from: ffmpeg::Rational, to: ffmpeg::Rational) -> i64 {
    unsafe { ffmpeg::ffi::av_rescale_q(ts, from.into(), to.into()) }
}

/// Convert a sample-count timestamp (timebase 1/sample_rate) into
/// microseconds.
pub fn samples_to_us(samples: i64, sample_rate: u32) -> i64 {
    rescale_ts(
        samples,
        ffmpeg::Rational::new(1, sample_rate.max(1) as i32),
        micro_timebase(),
    )
}
