use thiserror::Error;

/// Main error type for the recording pipeline
#[derive(Error, Debug)]
pub enum RecError {
    /// An error originating from the underlying FFmpeg library
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested codec or parameters are unsupported on this platform;
    /// fatal, the session must not start
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation was invoked in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An orientation hint outside {0, 90, 180, 270}
    #[error("Invalid orientation hint: {0} degrees")]
    InvalidOrientation(u32),

    /// A track registration beyond the configured expected count
    #[error("Track limit reached: muxer expects {expected} tracks")]
    TrackLimit { expected: usize },

    /// A single sample failed to reach the container
    #[error("Muxing error: {0}")]
    Muxing(String),
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    /// Failure during global FFmpeg initialization
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    /// The requested encoder for a specific codec ID was not found
    #[error("Failed to find encoder: codec_id={0}")]
    EncoderNotFound(String),

    /// Failure instantiating an encoder
    #[error("Failed to create encoder: {0}")]
    EncoderCreate(String),

    /// Failure applying configuration parameters to an encoder
    #[error("Failed to configure encoder: {0}")]
    EncoderConfigure(String),

    /// Failure encoding a single frame into a packet
    #[error("Failed to encode frame: {0}")]
    EncodeFrame(String),

    /// Failure creating an output format muxer
    #[error("Failed to create muxer: {0}")]
    MuxerCreate(String),

    /// Failure configuring stream contexts or parameters
    #[error("Stream configuration failed: {0}")]
    StreamConfig(String),

    /// Failure writing the container header
    #[error("Failed to write header: {0}")]
    WriteHeader(String),

    /// Failure writing a media packet to the container
    #[error("Failed to write packet: {0}")]
    WritePacket(String),

    /// Failure writing the container trailer
    #[error("Failed to write trailer: {0}")]
    WriteTrailer(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, RecError>;
