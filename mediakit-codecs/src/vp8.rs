//! VP8 encoder and decoder

use crate::config::{CodecConfig, Vp8Config};
use crate::engine::Engine;
use crate::video::{video_decoder_impl, video_encoder_impl, VideoDecoderCore, VideoEncoderCore};
use crate::{CodecType, Result};
use std::sync::Arc;

/// VP8 encoder
pub struct Vp8Encoder {
    core: VideoEncoderCore,
    config: Vp8Config,
}

impl Vp8Encoder {
    pub fn new(engine: Arc<dyn Engine>, config: Vp8Config) -> Result<Self> {
        let core = VideoEncoderCore::open(engine, &CodecConfig::Vp8(config.clone()))?;
        Ok(Self { core, config })
    }

    pub fn config(&self) -> &Vp8Config {
        &self.config
    }
}

video_encoder_impl!(Vp8Encoder);

/// VP8 decoder
pub struct Vp8Decoder {
    core: VideoDecoderCore,
}

impl Vp8Decoder {
    pub fn new(engine: Arc<dyn Engine>) -> Result<Self> {
        Ok(Self {
            core: VideoDecoderCore::open(engine, CodecType::Vp8, ())?,
        })
    }
}

video_decoder_impl!(Vp8Decoder);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{VideoDecoder, VideoEncoder};
    use crate::engine::SoftwareEngine;
    use crate::frame::{PixelFormat, VideoFrame};
    use crate::CodecError;

    #[test]
    fn test_encoder_rejects_oversized_dimensions() {
        let engine = Arc::new(SoftwareEngine::new());
        let result = Vp8Encoder::new(engine, Vp8Config::new(crate::MAX_WIDTH + 1, 480));
        assert!(matches!(result, Err(CodecError::InvalidDimensions(..))));
    }

    #[test]
    fn test_keyframe_carries_start_code() {
        let engine: Arc<dyn Engine> = Arc::new(SoftwareEngine::new());
        let encoder = Vp8Encoder::new(engine.clone(), Vp8Config::new(176, 144)).unwrap();
        let mut frame = VideoFrame::new(176, 144, PixelFormat::Nv12);
        frame.fill_gray(90);
        let mut packet = vec![0u8; encoder.max_encoded_size()];
        let out = encoder.encode_into(&frame, &mut packet, true).unwrap();
        assert!(out.is_keyframe);
        assert_eq!(packet[0] & 0x01, 0);
        assert_eq!(&packet[3..6], &[0x9d, 0x01, 0x2a]);

        let decoder = Vp8Decoder::new(engine).unwrap();
        let mut decoded = VideoFrame::new(176, 144, PixelFormat::I420);
        decoder
            .decode_into(&packet[..out.bytes_written], &mut decoded, 90, true)
            .unwrap();
        assert_eq!(decoded.format, PixelFormat::I420);
        assert_eq!(decoded.strides, vec![176, 88, 88]);
        assert!(decoded.planes[0].iter().all(|&b| b == 90));
    }
}
