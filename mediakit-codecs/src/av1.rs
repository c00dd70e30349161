//! AV1 encoder and decoder

use crate::config::{Av1Config, CodecConfig};
use crate::engine::Engine;
use crate::video::{video_decoder_impl, video_encoder_impl, VideoDecoderCore, VideoEncoderCore};
use crate::{CodecType, Result};
use std::sync::Arc;

/// AV1 encoder
pub struct Av1Encoder {
    core: VideoEncoderCore,
    config: Av1Config,
}

impl Av1Encoder {
    pub fn new(engine: Arc<dyn Engine>, config: Av1Config) -> Result<Self> {
        let core = VideoEncoderCore::open(engine, &CodecConfig::Av1(config.clone()))?;
        Ok(Self { core, config })
    }

    pub fn config(&self) -> &Av1Config {
        &self.config
    }
}

video_encoder_impl!(Av1Encoder);

/// AV1 decoder
pub struct Av1Decoder {
    core: VideoDecoderCore,
}

impl Av1Decoder {
    pub fn new(engine: Arc<dyn Engine>) -> Result<Self> {
        Ok(Self {
            core: VideoDecoderCore::open(engine, CodecType::Av1, ())?,
        })
    }
}

video_decoder_impl!(Av1Decoder);
