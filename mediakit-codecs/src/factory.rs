//! Codec dispatch
//!
//! [`CodecFactory`] is the only place that enumerates the codec set. It checks
//! that a configuration matches the requested codec, validates it, and opens
//! the matching concrete instance behind a closed enum.

use crate::av1::{Av1Decoder, Av1Encoder};
use crate::codec::{AudioDecoder, AudioEncoder, EncodeOutcome, VideoDecoder, VideoEncoder};
use crate::config::CodecConfig;
use crate::engine::{Engine, SoftwareEngine};
use crate::frame::{AudioFrame, VideoFrame};
use crate::h264::{H264Decoder, H264Encoder};
use crate::opus::{OpusDecoder, OpusEncoder};
use crate::vp8::{Vp8Decoder, Vp8Encoder};
use crate::vp9::{Vp9Decoder, Vp9Encoder};
use crate::{CodecError, CodecType, Result};
use std::fmt;
use std::sync::Arc;

/// Any video encoder
pub enum VideoEncoderKind {
    H264(H264Encoder),
    Vp8(Vp8Encoder),
    Vp9(Vp9Encoder),
    Av1(Av1Encoder),
}

/// Any video decoder
pub enum VideoDecoderKind {
    H264(H264Decoder),
    Vp8(Vp8Decoder),
    Vp9(Vp9Decoder),
    Av1(Av1Decoder),
}

/// Any audio encoder
pub enum AudioEncoderKind {
    Opus(OpusEncoder),
}

/// Any audio decoder
pub enum AudioDecoderKind {
    Opus(OpusDecoder),
}

macro_rules! dispatch_video {
    ($enum:ident, $self:ident, $inner:ident => $body:expr) => {
        match $self {
            $enum::H264($inner) => $body,
            $enum::Vp8($inner) => $body,
            $enum::Vp9($inner) => $body,
            $enum::Av1($inner) => $body,
        }
    };
}

impl VideoEncoder for VideoEncoderKind {
    fn codec(&self) -> CodecType {
        dispatch_video!(VideoEncoderKind, self, e => e.codec())
    }

    fn dimensions(&self) -> (u32, u32) {
        dispatch_video!(VideoEncoderKind, self, e => e.dimensions())
    }

    fn encode_into(
        &self,
        frame: &VideoFrame,
        dst: &mut [u8],
        force_keyframe: bool,
    ) -> Result<EncodeOutcome> {
        dispatch_video!(VideoEncoderKind, self, e => e.encode_into(frame, dst, force_keyframe))
    }

    fn max_encoded_size(&self) -> usize {
        dispatch_video!(VideoEncoderKind, self, e => e.max_encoded_size())
    }

    fn set_bitrate(&self, bps: u32) -> Result<()> {
        dispatch_video!(VideoEncoderKind, self, e => e.set_bitrate(bps))
    }

    fn set_framerate(&self, fps: u32) -> Result<()> {
        dispatch_video!(VideoEncoderKind, self, e => e.set_framerate(fps))
    }

    fn request_keyframe(&self) {
        dispatch_video!(VideoEncoderKind, self, e => e.request_keyframe())
    }

    fn close(&self) {
        dispatch_video!(VideoEncoderKind, self, e => e.close())
    }

    fn is_closed(&self) -> bool {
        dispatch_video!(VideoEncoderKind, self, e => e.is_closed())
    }
}

impl VideoDecoder for VideoDecoderKind {
    fn codec(&self) -> CodecType {
        dispatch_video!(VideoDecoderKind, self, d => d.codec())
    }

    fn decode_into(
        &self,
        src: &[u8],
        dst: &mut VideoFrame,
        timestamp: u64,
        is_keyframe: bool,
    ) -> Result<()> {
        dispatch_video!(VideoDecoderKind, self, d => {
            d.decode_into(src, dst, timestamp, is_keyframe)
        })
    }

    fn close(&self) {
        dispatch_video!(VideoDecoderKind, self, d => d.close())
    }

    fn is_closed(&self) -> bool {
        dispatch_video!(VideoDecoderKind, self, d => d.is_closed())
    }
}

impl AudioEncoder for AudioEncoderKind {
    fn codec(&self) -> CodecType {
        match self {
            AudioEncoderKind::Opus(e) => e.codec(),
        }
    }

    fn sample_rate(&self) -> u32 {
        match self {
            AudioEncoderKind::Opus(e) => e.sample_rate(),
        }
    }

    fn channels(&self) -> u16 {
        match self {
            AudioEncoderKind::Opus(e) => e.channels(),
        }
    }

    fn encode_into(
        &self,
        frame: &AudioFrame,
        dst: &mut [u8],
        force_keyframe: bool,
    ) -> Result<EncodeOutcome> {
        match self {
            AudioEncoderKind::Opus(e) => e.encode_into(frame, dst, force_keyframe),
        }
    }

    fn max_encoded_size(&self) -> usize {
        match self {
            AudioEncoderKind::Opus(e) => e.max_encoded_size(),
        }
    }

    fn set_bitrate(&self, bps: u32) -> Result<()> {
        match self {
            AudioEncoderKind::Opus(e) => e.set_bitrate(bps),
        }
    }

    fn request_keyframe(&self) {
        match self {
            AudioEncoderKind::Opus(e) => e.request_keyframe(),
        }
    }

    fn close(&self) {
        match self {
            AudioEncoderKind::Opus(e) => e.close(),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            AudioEncoderKind::Opus(e) => e.is_closed(),
        }
    }
}

impl AudioDecoder for AudioDecoderKind {
    fn codec(&self) -> CodecType {
        match self {
            AudioDecoderKind::Opus(d) => d.codec(),
        }
    }

    fn sample_rate(&self) -> u32 {
        match self {
            AudioDecoderKind::Opus(d) => d.sample_rate(),
        }
    }

    fn channels(&self) -> u16 {
        match self {
            AudioDecoderKind::Opus(d) => d.channels(),
        }
    }

    fn max_samples_per_frame(&self) -> usize {
        match self {
            AudioDecoderKind::Opus(d) => d.max_samples_per_frame(),
        }
    }

    fn decode_into(&self, src: &[u8], dst: &mut AudioFrame, timestamp: u64) -> Result<()> {
        match self {
            AudioDecoderKind::Opus(d) => d.decode_into(src, dst, timestamp),
        }
    }

    fn close(&self) {
        match self {
            AudioDecoderKind::Opus(d) => d.close(),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            AudioDecoderKind::Opus(d) => d.is_closed(),
        }
    }
}

fn config_mismatch(codec: CodecType, config: &CodecConfig) -> CodecError {
    CodecError::InvalidConfig(format!(
        "{} configuration given for {codec}",
        config.codec()
    ))
}

/// Opens codec instances on one shared engine
#[derive(Clone)]
pub struct CodecFactory {
    engine: Arc<dyn Engine>,
}

impl CodecFactory {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    /// Factory over a fresh [`SoftwareEngine`].
    pub fn software() -> Self {
        Self::new(Arc::new(SoftwareEngine::new()))
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn new_video_encoder(
        &self,
        codec: CodecType,
        config: CodecConfig,
    ) -> Result<VideoEncoderKind> {
        if codec.is_audio() {
            return Err(CodecError::UnsupportedCodec(format!(
                "{codec} is not a video codec"
            )));
        }
        let engine = self.engine.clone();
        let encoder = match (codec, config) {
            (CodecType::H264, CodecConfig::H264(c)) => {
                VideoEncoderKind::H264(H264Encoder::new(engine, c)?)
            }
            (CodecType::Vp8, CodecConfig::Vp8(c)) => {
                VideoEncoderKind::Vp8(Vp8Encoder::new(engine, c)?)
            }
            (CodecType::Vp9, CodecConfig::Vp9(c)) => {
                VideoEncoderKind::Vp9(Vp9Encoder::new(engine, c)?)
            }
            (CodecType::Av1, CodecConfig::Av1(c)) => {
                VideoEncoderKind::Av1(Av1Encoder::new(engine, c)?)
            }
            (codec, config) => return Err(config_mismatch(codec, &config)),
        };
        Ok(encoder)
    }

    pub fn new_audio_encoder(
        &self,
        codec: CodecType,
        config: CodecConfig,
    ) -> Result<AudioEncoderKind> {
        if codec.is_video() {
            return Err(CodecError::UnsupportedCodec(format!(
                "{codec} is not an audio codec"
            )));
        }
        match (codec, config) {
            (CodecType::Opus, CodecConfig::Opus(c)) => {
                let encoder = OpusEncoder::new(self.engine.clone(), c)?;
                Ok(AudioEncoderKind::Opus(encoder))
            }
            (codec, config) => Err(config_mismatch(codec, &config)),
        }
    }

    pub fn new_video_decoder(&self, codec: CodecType) -> Result<VideoDecoderKind> {
        let engine = self.engine.clone();
        let decoder = match codec {
            CodecType::H264 => VideoDecoderKind::H264(H264Decoder::new(engine)?),
            CodecType::Vp8 => VideoDecoderKind::Vp8(Vp8Decoder::new(engine)?),
            CodecType::Vp9 => VideoDecoderKind::Vp9(Vp9Decoder::new(engine)?),
            CodecType::Av1 => VideoDecoderKind::Av1(Av1Decoder::new(engine)?),
            CodecType::Opus => {
                return Err(CodecError::UnsupportedCodec(format!(
                    "{codec} is not a video codec"
                )))
            }
        };
        Ok(decoder)
    }

    pub fn new_audio_decoder(
        &self,
        codec: CodecType,
        sample_rate: u32,
        channels: u16,
    ) -> Result<AudioDecoderKind> {
        match codec {
            CodecType::Opus => {
                let decoder = OpusDecoder::new(self.engine.clone(), sample_rate, channels)?;
                Ok(AudioDecoderKind::Opus(decoder))
            }
            _ => Err(CodecError::UnsupportedCodec(format!(
                "{codec} is not an audio codec"
            ))),
        }
    }

    /// Open a video encoder for a codec name or MIME type.
    pub fn video_encoder_by_name(
        &self,
        name: &str,
        config: CodecConfig,
    ) -> Result<VideoEncoderKind> {
        self.new_video_encoder(name.parse()?, config)
    }

    /// Open a video decoder for a codec name or MIME type.
    pub fn video_decoder_by_name(&self, name: &str) -> Result<VideoDecoderKind> {
        self.new_video_decoder(name.parse()?)
    }
}

impl Default for CodecFactory {
    fn default() -> Self {
        Self::software()
    }
}

impl fmt::Debug for CodecFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecFactory")
            .field("engine", &self.engine.name())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{Av1Config, H264Config, OpusConfig, Vp8Config, Vp9Config};
    use crate::ErrorKind;

    fn video_config(codec: CodecType) -> CodecConfig {
        match codec {
            CodecType::H264 => H264Config::new(320, 240).into(),
            CodecType::Vp8 => Vp8Config::new(320, 240).into(),
            CodecType::Vp9 => Vp9Config::new(320, 240).into(),
            _ => Av1Config::new(320, 240).into(),
        }
    }

    #[test]
    fn test_creates_every_video_codec() {
        let factory = CodecFactory::software();
        for codec in CodecType::ALL.into_iter().filter(CodecType::is_video) {
            let encoder = factory.new_video_encoder(codec, video_config(codec)).unwrap();
            assert_eq!(encoder.codec(), codec);
            assert_eq!(encoder.dimensions(), (320, 240));
            let decoder = factory.new_video_decoder(codec).unwrap();
            assert_eq!(decoder.codec(), codec);
        }
    }

    #[test]
    fn test_config_mismatch() {
        let factory = CodecFactory::software();
        let result = factory.new_video_encoder(CodecType::Vp8, video_config(CodecType::H264));
        assert!(matches!(result, Err(CodecError::InvalidConfig(_))));

        let result = factory.new_audio_encoder(CodecType::Opus, video_config(CodecType::Av1));
        assert!(matches!(result, Err(CodecError::InvalidConfig(_))));
    }

    #[test]
    fn test_wrong_media_kind_is_unsupported() {
        let factory = CodecFactory::software();
        let result = factory.new_video_encoder(CodecType::Opus, OpusConfig::default().into());
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::UnsupportedCodec));
        assert!(factory.new_video_decoder(CodecType::Opus).is_err());
        assert!(factory.new_audio_decoder(CodecType::H264, 48000, 2).is_err());
        assert!(factory
            .new_audio_encoder(CodecType::Vp9, video_config(CodecType::Vp9))
            .is_err());
    }

    #[test]
    fn test_validation_runs_before_creation() {
        let engine = Arc::new(SoftwareEngine::new());
        let factory = CodecFactory::new(engine.clone());
        let bad = H264Config::new(0, 240).into();
        assert!(factory.new_video_encoder(CodecType::H264, bad).is_err());
        let bad = OpusConfig::new(44100, 2).into();
        assert!(factory.new_audio_encoder(CodecType::Opus, bad).is_err());
        assert!(factory.new_audio_decoder(CodecType::Opus, 48000, 6).is_err());
        assert_eq!(engine.live_sessions(), 0);
    }

    #[test]
    fn test_audio_instances() {
        let factory = CodecFactory::software();
        let encoder = factory
            .new_audio_encoder(CodecType::Opus, OpusConfig::new(24000, 2).into())
            .unwrap();
        assert_eq!(encoder.sample_rate(), 24000);
        assert_eq!(encoder.max_encoded_size(), crate::MAX_OPUS_PACKET_SIZE);
        let decoder = factory.new_audio_decoder(CodecType::Opus, 24000, 2).unwrap();
        assert_eq!(decoder.max_samples_per_frame(), 2880);
    }

    #[test]
    fn test_lookup_by_name() {
        let factory = CodecFactory::software();
        let encoder = factory
            .video_encoder_by_name("video/VP8", video_config(CodecType::Vp8))
            .unwrap();
        assert_eq!(encoder.codec(), CodecType::Vp8);
        assert!(matches!(
            factory.video_decoder_by_name("video/H265"),
            Err(CodecError::UnsupportedCodec(_))
        ));
    }
}
