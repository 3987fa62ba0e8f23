use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Container-level rotation hint for playback, distinct from re-encoding
/// pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    pub fn degrees(self) -> u32 {
        match self {
            Orientation::Deg0 => 0,
            Orientation::Deg90 => 90,
            Orientation::Deg180 => 180,
            Orientation::Deg270 => 270,
        }
    }

    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Orientation::Deg0),
            90 => Some(Orientation::Deg90),
            180 => Some(Orientation::Deg180),
            270 => Some(Orientation::Deg270),
            _ => None,
        }
    }
}

/// Video encoder parameters, fixed at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bit_rate: usize,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
            bit_rate: 2_000_000,
        }
    }
}

/// Audio encoder parameters, fixed at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: usize,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            bit_rate: 64_000,
        }
    }
}

fn default_expected_tracks() -> usize {
    2
}

/// Full configuration surface of one recording session. Supplied once at
/// construction; immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub output_path: PathBuf,
    #[serde(default)]
    pub video: VideoParams,
    #[serde(default)]
    pub audio: AudioParams,
    #[serde(default)]
    pub orientation: Orientation,
    /// How many tracks the muxer waits for before starting (default:
    /// audio + video).
    #[serde(default = "default_expected_tracks")]
    pub expected_tracks: usize,
}

impl SessionConfig {
    pub fn new<P: Into<PathBuf>>(output_path: P) -> Self {
        Self {
            output_path: output_path.into(),
            video: VideoParams::default(),
            audio: AudioParams::default(),
            orientation: Orientation::default(),
            expected_tracks: default_expected_tracks(),
        }
    }
}
