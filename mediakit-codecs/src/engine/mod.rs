//! Native media engine contract
//!
//! The codec layer drives an [`Engine`] through opaque [`EngineHandle`]s: one
//! handle per encoder or decoder instance, destroyed exactly once when the
//! instance closes. Implementations must be safe to call from many threads
//! for *different* handles at once; calls for the same handle are serialized
//! by the owning instance.
//!
//! [`SoftwareEngine`] is a pure-Rust implementation used when no native
//! library is linked.

mod bitstream;
mod picture;
mod software;

pub use software::SoftwareEngine;

use crate::config::CodecConfig;
use crate::frame::{AudioFrame, SampleFormat, VideoFrame};
use crate::CodecType;
use std::fmt;

/// Opaque engine resource id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(u64);

impl EngineHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The decoder needs more bitstream before it can emit a picture.
    #[error("need more data")]
    NeedMoreData,
    #[error("output buffer too small: need {required} bytes, have {available}")]
    BufferTooSmall { required: usize, available: usize },
    #[error("invalid engine handle {0}")]
    InvalidHandle(EngineHandle),
    #[error("operation not supported for {0}")]
    Unsupported(CodecType),
    #[error("invalid bitstream: {0}")]
    InvalidBitstream(&'static str),
    #[error("{0}")]
    Failed(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Output of one encode call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOutcome {
    pub bytes_written: usize,
    pub is_keyframe: bool,
}

/// Picture layout written by a decode call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedPicture {
    pub width: u32,
    pub height: u32,
    /// I420 plane strides
    pub strides: [usize; 3],
    pub is_keyframe: bool,
}

/// Sample layout an audio decoder is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioLayout {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Call contract of a native codec engine.
pub trait Engine: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Open an encoder for an already validated configuration.
    fn create_encoder(&self, config: &CodecConfig) -> EngineResult<EngineHandle>;

    /// Open a decoder. Audio codecs require `audio`.
    fn create_decoder(
        &self,
        codec: CodecType,
        audio: Option<AudioLayout>,
    ) -> EngineResult<EngineHandle>;

    /// Encode one picture into `dst`.
    fn encode(
        &self,
        handle: EngineHandle,
        frame: &VideoFrame,
        timestamp: u64,
        force_keyframe: bool,
        dst: &mut [u8],
    ) -> EngineResult<EncodeOutcome>;

    /// Decode one access unit into I420 `planes`.
    ///
    /// Must not write anything if the planes are too small for the picture.
    fn decode(
        &self,
        handle: EngineHandle,
        src: &[u8],
        timestamp: u64,
        is_keyframe: bool,
        planes: &mut [Vec<u8>],
    ) -> EngineResult<DecodedPicture>;

    /// Encode one audio frame into `dst`, returning bytes written.
    fn encode_audio(
        &self,
        handle: EngineHandle,
        frame: &AudioFrame,
        dst: &mut [u8],
    ) -> EngineResult<usize>;

    /// Decode one packet into interleaved `dst` samples of `format`, returning
    /// samples per channel.
    fn decode_audio(
        &self,
        handle: EngineHandle,
        src: &[u8],
        format: SampleFormat,
        dst: &mut [u8],
    ) -> EngineResult<usize>;

    fn set_bitrate(&self, handle: EngineHandle, bps: u32) -> EngineResult<()>;

    fn set_framerate(&self, handle: EngineHandle, fps: u32) -> EngineResult<()>;

    /// Release the resource. Unknown handles are ignored.
    fn destroy(&self, handle: EngineHandle);
}
