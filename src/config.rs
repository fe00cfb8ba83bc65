// Stream configuration
//
// Typed, validated configuration records for every stage of the push
// pipeline. Everything is checked before the engine ever sees a property,
// and any field can be overridden from an optional `nagare.toml`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::{MediaCaps, PixelFormat};
use crate::error::{PushError, PushResult};

/// Complete configuration of one push run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// RTMP publish URL
    pub url: String,
    /// Output video width in pixels
    pub width: u32,
    /// Output video height in pixels
    pub height: u32,
    /// Output framerate in frames per second
    pub framerate: u32,
    /// Video bitrate in kbit/s
    pub video_bitrate_kbps: u32,
    /// Audio bitrate in kbit/s
    pub audio_bitrate_kbps: u32,
    pub overlay: OverlayStyle,
    pub encoder: EncoderTuning,
    pub muxer: MuxerTuning,
    pub sink: SinkTuning,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: "rtmp://localhost:1935/live/livestream".to_string(),
            width: 640,
            height: 480,
            framerate: 30,
            video_bitrate_kbps: 1000,
            audio_bitrate_kbps: 128,
            overlay: OverlayStyle::default(),
            encoder: EncoderTuning::default(),
            muxer: MuxerTuning::default(),
            sink: SinkTuning::default(),
        }
    }
}

impl StreamSettings {
    /// Load settings from a TOML file, validating before returning
    pub fn load(path: &Path) -> PushResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PushError::configuration(format!("cannot read {}: {}", path.display(), e)))?;
        let settings: Self = toml::from_str(&raw)
            .map_err(|e| PushError::configuration(format!("cannot parse {}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the given file if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> PushResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let settings = Self::default();
            settings.validate()?;
            Ok(settings)
        }
    }

    /// Reject settings the engine would choke on at build or negotiate time
    pub fn validate(&self) -> PushResult<()> {
        if self.url.is_empty() {
            return Err(PushError::configuration("target URL is empty"));
        }
        if !self.url.starts_with("rtmp://") {
            return Err(PushError::configuration(format!(
                "target URL must use the rtmp:// scheme, got {}",
                self.url
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(PushError::configuration(format!(
                "invalid resolution {}x{}",
                self.width, self.height
            )));
        }
        if self.framerate == 0 {
            return Err(PushError::configuration("framerate must be positive"));
        }
        if self.video_bitrate_kbps == 0 {
            return Err(PushError::configuration("video bitrate must be positive"));
        }
        if self.audio_bitrate_kbps == 0 {
            return Err(PushError::configuration("audio bitrate must be positive"));
        }
        self.overlay.validate()?;
        self.encoder.validate()?;
        Ok(())
    }

    /// Caps restriction applied after the scaler
    pub fn video_caps(&self) -> MediaCaps {
        MediaCaps {
            width: self.width,
            height: self.height,
            framerate: self.framerate,
            format: PixelFormat::I420,
        }
    }
}

/// Corner the timestamp overlay is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Placement {
    /// Horizontal and vertical alignment names in the engine's enumeration
    pub fn alignment(&self) -> (&'static str, &'static str) {
        match self {
            Placement::TopLeft => ("left", "top"),
            Placement::TopRight => ("right", "top"),
            Placement::BottomLeft => ("left", "bottom"),
            Placement::BottomRight => ("right", "bottom"),
        }
    }
}

/// Placement and styling of the timestamp overlay
///
/// Placement is a configuration value rather than a hardcoded alignment
/// pair, so deployments can move the stamp without rebuilding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub placement: Placement,
    /// Horizontal distance from the anchored edge, pixels
    pub xpad: u32,
    /// Vertical distance from the anchored edge, pixels
    pub ypad: u32,
    /// Pango-style font description
    pub font: String,
    /// ARGB text color
    pub color: u32,
    /// Render a shaded box behind the text for legibility
    pub shaded_background: bool,
    /// Text shown until the first timer tick replaces it
    pub initial_text: String,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            placement: Placement::BottomRight,
            xpad: 15,
            ypad: 10,
            font: "Sans Bold 20".to_string(),
            color: 0xFFFF_FFFF,
            shaded_background: true,
            initial_text: "Initializing...".to_string(),
        }
    }
}

impl OverlayStyle {
    fn validate(&self) -> PushResult<()> {
        if self.font.is_empty() {
            return Err(PushError::configuration("overlay font is empty"));
        }
        Ok(())
    }
}

/// Video encoder rate control and latency tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderTuning {
    /// Zero-latency tuning: no lookahead, no frame reordering
    pub zero_latency: bool,
    /// Engine speed/quality preset name
    pub speed_preset: String,
    /// Maximum distance between key frames, in frames
    pub keyframe_interval: u32,
    /// Number of B-frames; kept at 0 for live latency
    pub bframes: u32,
    /// Emit byte-stream format rather than packetized
    pub byte_stream: bool,
    /// Encoder thread count
    pub threads: u32,
}

impl Default for EncoderTuning {
    fn default() -> Self {
        Self {
            zero_latency: true,
            speed_preset: "ultrafast".to_string(),
            keyframe_interval: 30,
            bframes: 0,
            byte_stream: true,
            threads: 4,
        }
    }
}

impl EncoderTuning {
    fn validate(&self) -> PushResult<()> {
        if self.keyframe_interval == 0 {
            return Err(PushError::configuration(
                "encoder keyframe interval must be positive",
            ));
        }
        if self.threads == 0 {
            return Err(PushError::configuration("encoder thread count must be positive"));
        }
        if self.speed_preset.is_empty() {
            return Err(PushError::configuration("encoder speed preset is empty"));
        }
        Ok(())
    }
}

/// Muxer streaming behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxerTuning {
    /// Write a streamable header instead of seeking back to patch it
    pub streamable: bool,
}

impl Default for MuxerTuning {
    fn default() -> Self {
        Self { streamable: true }
    }
}

/// Network sink buffering and clock behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkTuning {
    /// Synchronize writes against the pipeline clock
    pub sync: bool,
    /// Perform state changes asynchronously
    #[serde(rename = "async")]
    pub async_state_change: bool,
    /// Maximum lateness before a buffer is dropped, nanoseconds
    pub max_lateness: i64,
}

impl Default for SinkTuning {
    fn default() -> Self {
        Self {
            sync: false,
            async_state_change: false,
            max_lateness: 0,
        }
    }
}
