//! Safe wrappers around FFmpeg FFI calls.
//!
//! Every function in this module is `pub` and **safe** to call.  All `unsafe`
//! blocks are contained here with explicit safety arguments.  Callers outside
//! this module should never need to write `unsafe` for routine FFmpeg access.

use ffmpeg_next as ffmpeg;
use std::ffi::CString;

// ── Codec-parameter field accessors ─────────────────────────────────────────

/// Read `sample_rate` from an `AVCodecParameters` struct.
///
/// `ffmpeg-next` does not expose this field through a safe accessor.
pub fn codec_params_sample_rate(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    // SAFETY: `params.as_ptr()` returns a valid non-null pointer for the
    // lifetime of `params`.  `sample_rate` is a plain i32 field with no
    // ownership semantics.
    unsafe { (*params.as_ptr()).sample_rate as u32 }
}

/// Read `ch_layout.nb_channels` from an `AVCodecParameters` struct.
pub fn codec_params_channels(params: &ffmpeg::codec::parameters::Parameters) -> u16 {
    // SAFETY: same as `codec_params_sample_rate`.
    unsafe { (*params.as_ptr()).ch_layout.nb_channels as u16 }
}

/// Read `width` from an `AVCodecParameters` struct.
pub fn codec_params_width(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    unsafe { (*params.as_ptr()).width as u32 }
}

/// Read `height` from an `AVCodecParameters` struct.
pub fn codec_params_height(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    unsafe { (*params.as_ptr()).height as u32 }
}

/// Zero out `codec_tag` on the `AVCodecParameters` attached to an output
/// stream, so the muxer picks the correct tag for the target container.
///
/// Must be called after `out_stream.set_parameters(...)` and before
/// `write_header`.
pub fn stream_reset_codec_tag(out_stream: &mut ffmpeg::format::stream::StreamMut) {
    // SAFETY: `out_stream.as_mut_ptr()` is valid for the lifetime of the
    // stream.  `codecpar` is set by `set_parameters` and is non-null.
    // Writing 0 to `codec_tag` is always safe — it is a plain u32 field.
    unsafe {
        (*(*out_stream.as_mut_ptr()).codecpar).codec_tag = 0;
    }
}

/// Set the `rotate` metadata entry on an output stream.
///
/// The MOV/MP4 muxer translates this into a display matrix in the track
/// header, which players use to rotate video on playback without any
/// pixel-level processing.  Must be called before `write_header`.
pub fn stream_set_rotation(out_stream: &mut ffmpeg::format::stream::StreamMut, degrees: u32) {
    let key = CString::new("rotate").expect("static key");
    let value = CString::new(degrees.to_string()).expect("formatted integer");
    // SAFETY: `out_stream.as_mut_ptr()` is valid for the lifetime of the
    // stream.  `av_dict_set` copies both strings and manages the dictionary
    // allocation itself; passing a null metadata pointer is allowed (it
    // allocates a fresh dictionary).
    unsafe {
        ffmpeg::ffi::av_dict_set(
            &mut (*out_stream.as_mut_ptr()).metadata,
            key.as_ptr(),
            value.as_ptr(),
            0,
        );
    }
}

/// Allocate a fresh `AVCodecParameters`, copy an opened encoder context into
/// it, and return it as a safe `ffmpeg::codec::Parameters`.
///
/// Used to extract codec parameters (including extradata such as SPS/PPS or
/// the AudioSpecificConfig) from an encoder for muxer stream setup.  Opened
/// encoders deref-coerce to `codec::Context`, so this works for both audio
/// and video.
pub fn codec_parameters_from_context(ctx: &ffmpeg::codec::Context) -> ffmpeg::codec::Parameters {
    use std::rc::Rc;
    // SAFETY: `avcodec_parameters_alloc` returns a valid pointer or null.
    // Allocation only fails under OOM which is unrecoverable here.
    // `avcodec_parameters_from_context` copies fields from a valid, open
    // encoder context — safe as long as `ctx.as_ptr()` is non-null (it is,
    // since `ctx` is a live object).
    unsafe {
        let params = ffmpeg::ffi::avcodec_parameters_alloc();
        ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr());
        ffmpeg::codec::Parameters::wrap(params, None::<Rc<dyn std::any::Any>>)
    }
}

// ── FLTP audio plane reinterpretation ───────────────────────────────────────

/// Reinterpret a mutable raw byte slice from an FLTP audio plane as `&mut [f32]`.
///
/// `byte_slice` must be the data plane of an `ffmpeg::util::frame::Audio`
/// frame in `FLTP` (planar float32) format.  `sample_count` is the number of
/// samples in the plane.
///
/// Returns `None` if:
/// - the pointer is not 4-byte aligned, or
/// - `byte_slice.len()` is shorter than `sample_count * 4`.
pub fn fltp_plane_as_f32_mut(byte_slice: &mut [u8], sample_count: usize) -> Option<&mut [f32]> {
    let expected_bytes = sample_count.checked_mul(4)?;
    if byte_slice.len() < expected_bytes {
        return None;
    }
    let ptr = byte_slice.as_mut_ptr();
    if (ptr as usize) % std::mem::align_of::<f32>() != 0 {
        return None;
    }
    // SAFETY: alignment and length are verified above.  FLTP planes are
    // native-endian f32 values laid out contiguously.
    Some(unsafe { std::slice::from_raw_parts_mut(ptr as *mut f32, sample_count) })
}

/// Extract a mutable audio plane slice from an `AVFrame`.
///
/// Works around a bug in `ffmpeg-next`'s `Audio::data_mut(index)` method
/// where it stops counting planes if `linesize[1] == 0`. In FFmpeg, planar
/// audio frames often only populate `linesize[0]` to represent the size of
/// *every* plane.
pub fn audio_plane_data_mut(frame: &mut ffmpeg::util::frame::Audio, index: usize) -> &mut [u8] {
    unsafe {
        let f = frame.as_mut_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        // Ensure index is valid for planar; packed has only 1 data plane.
        let is_planar = frame.format().is_planar();
        if is_planar {
            if index >= channels {
                return &mut [];
            }
        } else if index > 0 {
            return &mut [];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &mut [];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &mut [];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts_mut(plane_ptr, size)
    }
}
