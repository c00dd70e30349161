//! VP9 encoder and decoder

use crate::config::{CodecConfig, Vp9Config};
use crate::engine::Engine;
use crate::video::{video_decoder_impl, video_encoder_impl, VideoDecoderCore, VideoEncoderCore};
use crate::{CodecType, Result};
use std::sync::Arc;

/// VP9 encoder
pub struct Vp9Encoder {
    core: VideoEncoderCore,
    config: Vp9Config,
}

impl Vp9Encoder {
    pub fn new(engine: Arc<dyn Engine>, config: Vp9Config) -> Result<Self> {
        let core = VideoEncoderCore::open(engine, &CodecConfig::Vp9(config.clone()))?;
        Ok(Self { core, config })
    }

    pub fn config(&self) -> &Vp9Config {
        &self.config
    }

    pub fn profile(&self) -> u8 {
        self.config.profile
    }
}

video_encoder_impl!(Vp9Encoder);

/// VP9 decoder
pub struct Vp9Decoder {
    core: VideoDecoderCore,
}

impl Vp9Decoder {
    pub fn new(engine: Arc<dyn Engine>) -> Result<Self> {
        Ok(Self {
            core: VideoDecoderCore::open(engine, CodecType::Vp9, ())?,
        })
    }
}

video_decoder_impl!(Vp9Decoder);
