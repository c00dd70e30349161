#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(unsafe_code)]

//! Video and audio codec layer
//!
//! A uniform encode/decode API for H.264, VP8, VP9, AV1 and Opus elementary
//! streams on top of a native media engine.
//!
//! # Layout
//!
//! - [`frame`] and [`pool`]: raw frame model and recycling frame pools.
//! - [`config`]: per-codec configuration records and their validation.
//! - [`engine`]: the native engine contract plus [`SoftwareEngine`], a
//!   pure-Rust simulation used for development and tests.
//! - [`h264`], [`vp8`], [`vp9`], [`av1`], [`opus`]: one encoder and one
//!   decoder type per codec.
//! - [`factory`]: the single place that maps a [`CodecType`] to a concrete
//!   instance.
//!
//! # Steady-state allocation
//!
//! `encode_into`/`decode_into` write into caller-provided buffers. Frames come
//! from a [`FramePool`] and go back with [`FramePool::put`]. Once the pools and
//! instances are warm, the encode/decode loop does not allocate.
//!
//! # Example
//!
//! ```
//! use mediakit_codecs::{
//!     CodecConfig, CodecFactory, CodecType, H264Config, PixelFormat, VideoDecoder,
//!     VideoEncoder, VideoFrame, VideoFramePool, VideoShape,
//! };
//!
//! # fn main() -> mediakit_codecs::Result<()> {
//! let factory = CodecFactory::software();
//! let config = CodecConfig::H264(H264Config::new(320, 240));
//! let encoder = factory.new_video_encoder(CodecType::H264, config)?;
//! let decoder = factory.new_video_decoder(CodecType::H264)?;
//!
//! let mut frame = VideoFrame::new(320, 240, PixelFormat::I420);
//! frame.fill_gray(128);
//! let mut packet = vec![0u8; encoder.max_encoded_size()];
//! let out = encoder.encode_into(&frame, &mut packet, true)?;
//! assert!(out.is_keyframe);
//!
//! let pool = VideoFramePool::new(VideoShape::new(320, 240, PixelFormat::I420), 4);
//! let mut decoded = pool.get();
//! decoder.decode_into(&packet[..out.bytes_written], &mut decoded, 0, true)?;
//! assert_eq!((decoded.width, decoded.height), (320, 240));
//! pool.put(decoded);
//!
//! encoder.close();
//! decoder.close();
//! # Ok(())
//! # }
//! ```

pub mod annexb;
pub mod av1;
pub mod codec;
pub mod config;
pub mod engine;
pub mod factory;
pub mod frame;
pub mod h264;
pub mod opus;
pub mod pool;
pub mod transcode;
pub mod vp8;
pub mod vp9;

mod session;
mod video;

use engine::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Codec error types
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Encoder is closed")]
    EncoderClosed,
    #[error("Decoder is closed")]
    DecoderClosed,
    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),
    #[error("Invalid codec data: {0}")]
    InvalidData(&'static str),
    #[error("Buffer too small: need {required} bytes, have {available}")]
    BufferTooSmall { required: usize, available: usize },
    #[error("Invalid codec configuration: {0}")]
    InvalidConfig(String),
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("Decoder needs more data")]
    NeedMoreData,
    #[error("Dimension mismatch: frame ({frame_width}x{frame_height}) vs config ({cfg_width}x{cfg_height})")]
    DimensionMismatch {
        frame_width: u32,
        frame_height: u32,
        cfg_width: u32,
        cfg_height: u32,
    },
    #[error("Invalid dimensions: width={0}, height={1}")]
    InvalidDimensions(u32, u32),
    #[error("Numeric overflow in codec operation")]
    Overflow,
    #[error("Engine failure: {0}")]
    Engine(EngineError),
}

/// Coarse error classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation attempted after `close`.
    ClosedResource,
    /// Empty or malformed caller-supplied frame or bytes.
    InvalidInput,
    /// Destination buffer undersized.
    BufferTooSmall,
    /// Configuration rejected or mismatched with the codec.
    InvalidConfig,
    /// Unknown or wrong-direction codec tag.
    UnsupportedCodec,
    /// Recoverable: feed more bitstream and retry.
    NeedMoreData,
    /// Opaque failure reported by the native engine.
    EngineFailure,
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EncoderClosed | Self::DecoderClosed => ErrorKind::ClosedResource,
            Self::InvalidFrame(_)
            | Self::InvalidData(_)
            | Self::DimensionMismatch { .. }
            | Self::InvalidDimensions(..) => ErrorKind::InvalidInput,
            Self::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
            Self::InvalidConfig(_) | Self::Overflow => ErrorKind::InvalidConfig,
            Self::UnsupportedCodec(_) => ErrorKind::UnsupportedCodec,
            Self::NeedMoreData => ErrorKind::NeedMoreData,
            Self::Engine(_) => ErrorKind::EngineFailure,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.kind() == ErrorKind::ClosedResource
    }

    pub fn is_need_more_data(&self) -> bool {
        self.kind() == ErrorKind::NeedMoreData
    }
}

impl From<EngineError> for CodecError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NeedMoreData => Self::NeedMoreData,
            EngineError::BufferTooSmall {
                required,
                available,
            } => Self::BufferTooSmall {
                required,
                available,
            },
            other => Self::Engine(other),
        }
    }
}

/// Codec result type
pub type Result<T> = std::result::Result<T, CodecError>;

/// Maximum allowed dimensions for safety
pub const MAX_WIDTH: u32 = 8192;
pub const MAX_HEIGHT: u32 = 8192;

/// Upper bound on one encoded Opus packet.
pub const MAX_OPUS_PACKET_SIZE: usize = 4000;

/// Codec selection tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecType {
    H264,
    Vp8,
    Vp9,
    Av1,
    Opus,
}

impl CodecType {
    pub const ALL: [CodecType; 5] = [
        CodecType::H264,
        CodecType::Vp8,
        CodecType::Vp9,
        CodecType::Av1,
        CodecType::Opus,
    ];

    pub fn is_video(&self) -> bool {
        !self.is_audio()
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, CodecType::Opus)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodecType::H264 => "h264",
            CodecType::Vp8 => "vp8",
            CodecType::Vp9 => "vp9",
            CodecType::Av1 => "av1",
            CodecType::Opus => "opus",
        }
    }

    /// RTP/WebRTC MIME type
    pub fn mime_type(&self) -> &'static str {
        match self {
            CodecType::H264 => "video/H264",
            CodecType::Vp8 => "video/VP8",
            CodecType::Vp9 => "video/VP9",
            CodecType::Av1 => "video/AV1",
            CodecType::Opus => "audio/opus",
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        let name = name
            .split_once('/')
            .map_or(name, |(_, subtype)| subtype)
            .to_ascii_lowercase();
        match name.as_str() {
            "h264" | "avc" | "avc1" => Ok(CodecType::H264),
            "vp8" => Ok(CodecType::Vp8),
            "vp9" | "vp09" => Ok(CodecType::Vp9),
            "av1" | "av01" => Ok(CodecType::Av1),
            "opus" => Ok(CodecType::Opus),
            _ => Err(CodecError::UnsupportedCodec(s.to_string())),
        }
    }
}

pub use codec::{
    AudioDecoder, AudioEncoder, AudioEncoderExt, EncodeOutcome, EncodedChunk, VideoDecoder,
    VideoEncoder, VideoEncoderExt,
};
pub use config::{
    Av1Config, CodecConfig, H264Config, H264Profile, H264StreamFormat, OpusConfig, VideoParams,
    Vp8Config, Vp9Config,
};
pub use engine::{Engine, EngineHandle, SoftwareEngine};
pub use factory::{
    AudioDecoderKind, AudioEncoderKind, CodecFactory, VideoDecoderKind, VideoEncoderKind,
};
pub use frame::{AudioFrame, PixelFormat, SampleFormat, VideoFrame};
pub use h264::{H264Decoder, H264Encoder, H264Normalizer};
pub use opus::{OpusDecoder, OpusEncoder};
pub use pool::{
    AudioFramePool, AudioShape, FramePool, PoolFrame, PoolId, PoolStats, VideoFramePool,
    VideoShape,
};
pub use av1::{Av1Decoder, Av1Encoder};
pub use transcode::VideoTranscoder;
pub use vp8::{Vp8Decoder, Vp8Encoder};
pub use vp9::{Vp9Decoder, Vp9Encoder};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_type_parsing() {
        assert_eq!("h264".parse::<CodecType>().unwrap(), CodecType::H264);
        assert_eq!("AVC".parse::<CodecType>().unwrap(), CodecType::H264);
        assert_eq!("video/H264".parse::<CodecType>().unwrap(), CodecType::H264);
        assert_eq!("VP8".parse::<CodecType>().unwrap(), CodecType::Vp8);
        assert_eq!("video/VP9".parse::<CodecType>().unwrap(), CodecType::Vp9);
        assert_eq!("av01".parse::<CodecType>().unwrap(), CodecType::Av1);
        assert_eq!("audio/opus".parse::<CodecType>().unwrap(), CodecType::Opus);
    }

    #[test]
    fn test_codec_type_unknown() {
        let err = "hevc".parse::<CodecType>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedCodec);
    }

    #[test]
    fn test_codec_type_display_roundtrip() {
        for codec in CodecType::ALL {
            assert_eq!(codec.to_string().parse::<CodecType>().unwrap(), codec);
        }
    }

    #[test]
    fn test_engine_error_conversion_keeps_need_more_data() {
        let err: CodecError = EngineError::NeedMoreData.into();
        assert!(err.is_need_more_data());

        let err: CodecError = EngineError::BufferTooSmall {
            required: 10,
            available: 5,
        }
        .into();
        assert!(matches!(
            err,
            CodecError::BufferTooSmall {
                required: 10,
                available: 5
            }
        ));

        let err: CodecError = EngineError::Failed("boom".into()).into();
        assert_eq!(err.kind(), ErrorKind::EngineFailure);
    }

    #[test]
    fn test_error_kinds() {
        assert!(CodecError::EncoderClosed.is_closed());
        assert!(CodecError::DecoderClosed.is_closed());
        assert_eq!(
            CodecError::InvalidFrame("x").kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            CodecError::InvalidConfig("x".into()).kind(),
            ErrorKind::InvalidConfig
        );
    }
}
