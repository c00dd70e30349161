//! Per-codec configuration
//!
//! Every record is validated before an engine instance is created. Video
//! configs share [`VideoParams`], flattened into their serialized form:
//!
//! ```json
//! { "codec": "h264", "width": 1280, "height": 720, "bitrate": 2000000,
//!   "framerate": 30, "keyframe_interval": 60, "profile": "main" }
//! ```

use crate::{CodecError, CodecType, Result, MAX_HEIGHT, MAX_WIDTH};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opus sample rates (Hz)
pub const OPUS_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Opus bitrate bounds (bits per second)
pub const OPUS_MIN_BITRATE: u32 = 6000;
pub const OPUS_MAX_BITRATE: u32 = 510_000;

/// Parameters shared by every video codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Frames per second
    pub framerate: u32,
    /// Frames between forced keyframes; 0 leaves placement to the engine
    #[serde(default)]
    pub keyframe_interval: u32,
}

impl VideoParams {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bitrate: 1_000_000,
            framerate: 30,
            keyframe_interval: 60,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::InvalidDimensions(self.width, self.height));
        }
        if self.width > MAX_WIDTH || self.height > MAX_HEIGHT {
            return Err(CodecError::InvalidDimensions(self.width, self.height));
        }
        if self.bitrate == 0 {
            return Err(CodecError::InvalidConfig("bitrate must be positive".into()));
        }
        if self.framerate == 0 {
            return Err(CodecError::InvalidConfig("framerate must be positive".into()));
        }
        Ok(())
    }

    /// Conservative bound on one encoded picture: raw I420 size
    /// (`width * height * 3 / 2`), raised to a 1024-byte floor so tiny
    /// pictures still fit their headers and parameter sets. The floor is a
    /// deliberate departure from the plain I420 formula.
    pub fn max_encoded_size(&self) -> usize {
        const MIN_ENCODED_SIZE: usize = 1024;
        let raw = self.width as usize * self.height as usize * 3 / 2;
        raw.max(MIN_ENCODED_SIZE)
    }
}

/// H.264 profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum H264Profile {
    #[default]
    ConstrainedBaseline,
    Baseline,
    Main,
    High,
}

impl H264Profile {
    /// `profile_idc` as written into the SPS
    pub fn profile_idc(&self) -> u8 {
        match self {
            H264Profile::ConstrainedBaseline | H264Profile::Baseline => 66,
            H264Profile::Main => 77,
            H264Profile::High => 100,
        }
    }

    /// `constraint_set` flags byte as written into the SPS
    pub fn constraint_flags(&self) -> u8 {
        match self {
            H264Profile::ConstrainedBaseline => 0xc0,
            _ => 0x00,
        }
    }
}

impl fmt::Display for H264Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            H264Profile::ConstrainedBaseline => "constrained_baseline",
            H264Profile::Baseline => "baseline",
            H264Profile::Main => "main",
            H264Profile::High => "high",
        })
    }
}

impl FromStr for H264Profile {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "constrained_baseline" | "cb" => Ok(H264Profile::ConstrainedBaseline),
            "baseline" => Ok(H264Profile::Baseline),
            "main" => Ok(H264Profile::Main),
            "high" => Ok(H264Profile::High),
            _ => Err(CodecError::InvalidConfig(format!("unknown H.264 profile {s:?}"))),
        }
    }
}

/// NAL unit framing of H.264 encoder output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum H264StreamFormat {
    /// Start-code delimited
    #[default]
    AnnexB,
    /// Four-byte big-endian length prefixes
    Avcc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct H264Config {
    #[serde(flatten)]
    pub video: VideoParams,
    #[serde(default)]
    pub profile: H264Profile,
    #[serde(default)]
    pub stream_format: H264StreamFormat,
}

impl H264Config {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            video: VideoParams::new(width, height),
            profile: H264Profile::default(),
            stream_format: H264StreamFormat::default(),
        }
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.video.bitrate = bitrate;
        self
    }

    pub fn with_framerate(mut self, framerate: u32) -> Self {
        self.video.framerate = framerate;
        self
    }

    pub fn with_keyframe_interval(mut self, interval: u32) -> Self {
        self.video.keyframe_interval = interval;
        self
    }

    pub fn with_profile(mut self, profile: H264Profile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_stream_format(mut self, format: H264StreamFormat) -> Self {
        self.stream_format = format;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.video.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vp8Config {
    #[serde(flatten)]
    pub video: VideoParams,
}

impl Vp8Config {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            video: VideoParams::new(width, height),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.video.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vp9Config {
    #[serde(flatten)]
    pub video: VideoParams,
    /// VP9 profile 0-3
    #[serde(default)]
    pub profile: u8,
}

impl Vp9Config {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            video: VideoParams::new(width, height),
            profile: 0,
        }
    }

    pub fn with_profile(mut self, profile: u8) -> Self {
        self.profile = profile;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.video.validate()?;
        if self.profile > 3 {
            return Err(CodecError::InvalidConfig(format!(
                "VP9 profile must be 0-3, got {}",
                self.profile
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Av1Config {
    #[serde(flatten)]
    pub video: VideoParams,
}

impl Av1Config {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            video: VideoParams::new(width, height),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.video.validate()
    }
}

/// Opus audio encoder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpusConfig {
    /// One of [`OPUS_SAMPLE_RATES`]
    pub sample_rate: u32,
    /// 1 or 2
    pub channels: u16,
    /// Bitrate in bits per second (6000 - 510000)
    pub bitrate: u32,
    /// Encoder complexity 0-10
    #[serde(default = "default_complexity")]
    pub complexity: u8,
}

fn default_complexity() -> u8 {
    10
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            bitrate: 64000, // 64 kbps
            complexity: default_complexity(),
        }
    }
}

impl OpusConfig {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            ..Default::default()
        }
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_opus_layout(self.sample_rate, self.channels)?;
        if self.bitrate < OPUS_MIN_BITRATE || self.bitrate > OPUS_MAX_BITRATE {
            return Err(CodecError::InvalidConfig(format!(
                "bitrate {} out of range ({OPUS_MIN_BITRATE}-{OPUS_MAX_BITRATE})",
                self.bitrate
            )));
        }
        if self.complexity > 10 {
            return Err(CodecError::InvalidConfig(format!(
                "complexity must be 0-10, got {}",
                self.complexity
            )));
        }
        Ok(())
    }
}

/// Check an Opus sample-rate/channel pair.
pub fn validate_opus_layout(sample_rate: u32, channels: u16) -> Result<()> {
    if !OPUS_SAMPLE_RATES.contains(&sample_rate) {
        return Err(CodecError::InvalidConfig(format!(
            "unsupported Opus sample rate {sample_rate}"
        )));
    }
    if !(1..=2).contains(&channels) {
        return Err(CodecError::InvalidConfig(format!(
            "Opus supports 1 or 2 channels, got {channels}"
        )));
    }
    Ok(())
}

/// Configuration for any supported codec, tagged by codec name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "lowercase")]
pub enum CodecConfig {
    H264(H264Config),
    Vp8(Vp8Config),
    Vp9(Vp9Config),
    Av1(Av1Config),
    Opus(OpusConfig),
}

impl CodecConfig {
    pub fn codec(&self) -> CodecType {
        match self {
            CodecConfig::H264(_) => CodecType::H264,
            CodecConfig::Vp8(_) => CodecType::Vp8,
            CodecConfig::Vp9(_) => CodecType::Vp9,
            CodecConfig::Av1(_) => CodecType::Av1,
            CodecConfig::Opus(_) => CodecType::Opus,
        }
    }

    /// Shared video parameters, `None` for audio codecs.
    pub fn video(&self) -> Option<&VideoParams> {
        match self {
            CodecConfig::H264(c) => Some(&c.video),
            CodecConfig::Vp8(c) => Some(&c.video),
            CodecConfig::Vp9(c) => Some(&c.video),
            CodecConfig::Av1(c) => Some(&c.video),
            CodecConfig::Opus(_) => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            CodecConfig::H264(c) => c.validate(),
            CodecConfig::Vp8(c) => c.validate(),
            CodecConfig::Vp9(c) => c.validate(),
            CodecConfig::Av1(c) => c.validate(),
            CodecConfig::Opus(c) => c.validate(),
        }
    }
}

impl From<H264Config> for CodecConfig {
    fn from(config: H264Config) -> Self {
        CodecConfig::H264(config)
    }
}

impl From<Vp8Config> for CodecConfig {
    fn from(config: Vp8Config) -> Self {
        CodecConfig::Vp8(config)
    }
}

impl From<Vp9Config> for CodecConfig {
    fn from(config: Vp9Config) -> Self {
        CodecConfig::Vp9(config)
    }
}

impl From<Av1Config> for CodecConfig {
    fn from(config: Av1Config) -> Self {
        CodecConfig::Av1(config)
    }
}

impl From<OpusConfig> for CodecConfig {
    fn from(config: OpusConfig) -> Self {
        CodecConfig::Opus(config)
    }
}
