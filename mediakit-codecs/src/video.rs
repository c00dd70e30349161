//! Shared machinery of the video encoder and decoder instances

use crate::config::CodecConfig;
use crate::engine::{DecodedPicture, EncodeOutcome, Engine};
use crate::frame::{PixelFormat, VideoFrame};
use crate::session::{EngineSession, Role};
use crate::{CodecError, CodecType, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Engine-backed video encoder state common to every codec.
pub(crate) struct VideoEncoderCore {
    session: EngineSession,
    width: u32,
    height: u32,
    max_encoded_size: usize,
    force_keyframe: AtomicBool,
}

impl VideoEncoderCore {
    pub(crate) fn open(engine: Arc<dyn Engine>, config: &CodecConfig) -> Result<Self> {
        config.validate()?;
        let codec = config.codec();
        let video = *config
            .video()
            .ok_or_else(|| CodecError::InvalidConfig(format!("{codec} is not a video codec")))?;
        let handle = engine.create_encoder(config)?;
        tracing::debug!(
            codec = %codec,
            width = video.width,
            height = video.height,
            bitrate = video.bitrate,
            framerate = video.framerate,
            keyframe_interval = video.keyframe_interval,
            engine = engine.name(),
            "Created video encoder"
        );
        Ok(Self {
            session: EngineSession::new(engine, codec, Role::Encoder, handle, ()),
            width: video.width,
            height: video.height,
            max_encoded_size: video.max_encoded_size(),
            force_keyframe: AtomicBool::new(false),
        })
    }

    pub(crate) fn codec(&self) -> CodecType {
        self.session.codec()
    }

    pub(crate) fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub(crate) fn max_encoded_size(&self) -> usize {
        self.max_encoded_size
    }

    pub(crate) fn encode_into(
        &self,
        frame: &VideoFrame,
        dst: &mut [u8],
        force_keyframe: bool,
    ) -> Result<EncodeOutcome> {
        self.session.ensure_open()?;
        frame.validate()?;
        if frame.width != self.width || frame.height != self.height {
            return Err(CodecError::DimensionMismatch {
                frame_width: frame.width,
                frame_height: frame.height,
                cfg_width: self.width,
                cfg_height: self.height,
            });
        }
        if dst.len() < self.max_encoded_size {
            return Err(CodecError::BufferTooSmall {
                required: self.max_encoded_size,
                available: dst.len(),
            });
        }

        self.session.with_engine(|engine, handle, _| {
            let requested = self.force_keyframe.swap(false, Ordering::AcqRel);
            let force = requested || force_keyframe;
            engine
                .encode(handle, frame, frame.timestamp, force, dst)
                .map_err(|e| {
                    if requested {
                        self.force_keyframe.store(true, Ordering::Release);
                    }
                    CodecError::from(e)
                })
        })
    }

    pub(crate) fn set_bitrate(&self, bps: u32) -> Result<()> {
        self.session.ensure_open()?;
        if bps == 0 {
            return Err(CodecError::InvalidConfig("bitrate must be positive".into()));
        }
        self.session
            .with_engine(|engine, handle, _| Ok(engine.set_bitrate(handle, bps)?))?;
        tracing::debug!(codec = %self.codec(), bitrate = bps, "Updated encoder bitrate");
        Ok(())
    }

    pub(crate) fn set_framerate(&self, fps: u32) -> Result<()> {
        self.session.ensure_open()?;
        if fps == 0 {
            return Err(CodecError::InvalidConfig("framerate must be positive".into()));
        }
        self.session
            .with_engine(|engine, handle, _| Ok(engine.set_framerate(handle, fps)?))?;
        tracing::debug!(codec = %self.codec(), framerate = fps, "Updated encoder framerate");
        Ok(())
    }

    pub(crate) fn request_keyframe(&self) {
        self.force_keyframe.store(true, Ordering::Release);
    }

    pub(crate) fn close(&self) {
        self.session.close();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.session.is_closed()
    }
}

/// Rewrites a compressed access unit before it reaches the engine.
pub(crate) trait BitstreamFilter: Send {
    fn filter<'a>(&'a mut self, data: &'a [u8]) -> &'a [u8];
}

impl BitstreamFilter for () {
    fn filter<'a>(&'a mut self, data: &'a [u8]) -> &'a [u8] {
        data
    }
}

/// Engine-backed video decoder state common to every codec.
pub(crate) struct VideoDecoderCore<F: BitstreamFilter = ()> {
    session: EngineSession<F>,
}

impl<F: BitstreamFilter> VideoDecoderCore<F> {
    pub(crate) fn open(engine: Arc<dyn Engine>, codec: CodecType, filter: F) -> Result<Self> {
        if !codec.is_video() {
            return Err(CodecError::UnsupportedCodec(format!(
                "{codec} is not a video codec"
            )));
        }
        let handle = engine.create_decoder(codec, None)?;
        tracing::debug!(codec = %codec, engine = engine.name(), "Created video decoder");
        Ok(Self {
            session: EngineSession::new(engine, codec, Role::Decoder, handle, filter),
        })
    }

    pub(crate) fn codec(&self) -> CodecType {
        self.session.codec()
    }

    pub(crate) fn decode_into(
        &self,
        src: &[u8],
        dst: &mut VideoFrame,
        timestamp: u64,
        is_keyframe: bool,
    ) -> Result<()> {
        self.session.ensure_open()?;
        if src.is_empty() {
            return Err(CodecError::InvalidData("empty bitstream"));
        }
        if dst.planes.len() < 3 {
            return Err(CodecError::BufferTooSmall {
                required: 3,
                available: dst.planes.len(),
            });
        }

        let picture = self.session.with_engine(|engine, handle, filter| {
            let data = filter.filter(src);
            Ok(engine.decode(handle, data, timestamp, is_keyframe, &mut dst.planes)?)
        })?;
        apply_picture(dst, &picture, timestamp);
        Ok(())
    }

    pub(crate) fn close(&self) {
        self.session.close();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.session.is_closed()
    }
}

fn apply_picture(dst: &mut VideoFrame, picture: &DecodedPicture, timestamp: u64) {
    dst.width = picture.width;
    dst.height = picture.height;
    dst.format = PixelFormat::I420;
    dst.planes.truncate(3);
    dst.strides.clear();
    dst.strides.extend_from_slice(&picture.strides);
    dst.timestamp = timestamp;
    dst.keyframe = picture.is_keyframe;
}

/// Implement [`VideoEncoder`](crate::codec::VideoEncoder) for a type with a
/// `core: VideoEncoderCore` field.
macro_rules! video_encoder_impl {
    ($ty:ty) => {
        impl $crate::codec::VideoEncoder for $ty {
            fn codec(&self) -> $crate::CodecType {
                self.core.codec()
            }

            fn dimensions(&self) -> (u32, u32) {
                self.core.dimensions()
            }

            fn encode_into(
                &self,
                frame: &$crate::frame::VideoFrame,
                dst: &mut [u8],
                force_keyframe: bool,
            ) -> $crate::Result<$crate::codec::EncodeOutcome> {
                self.core.encode_into(frame, dst, force_keyframe)
            }

            fn max_encoded_size(&self) -> usize {
                self.core.max_encoded_size()
            }

            fn set_bitrate(&self, bps: u32) -> $crate::Result<()> {
                self.core.set_bitrate(bps)
            }

            fn set_framerate(&self, fps: u32) -> $crate::Result<()> {
                self.core.set_framerate(fps)
            }

            fn request_keyframe(&self) {
                self.core.request_keyframe()
            }

            fn close(&self) {
                self.core.close()
            }

            fn is_closed(&self) -> bool {
                self.core.is_closed()
            }
        }
    };
}

/// Implement [`VideoDecoder`](crate::codec::VideoDecoder) for a type with a
/// `core: VideoDecoderCore<_>` field.
macro_rules! video_decoder_impl {
    ($ty:ty) => {
        impl $crate::codec::VideoDecoder for $ty {
            fn codec(&self) -> $crate::CodecType {
                self.core.codec()
            }

            fn decode_into(
                &self,
                src: &[u8],
                dst: &mut $crate::frame::VideoFrame,
                timestamp: u64,
                is_keyframe: bool,
            ) -> $crate::Result<()> {
                self.core.decode_into(src, dst, timestamp, is_keyframe)
            }

            fn close(&self) {
                self.core.close()
            }

            fn is_closed(&self) -> bool {
                self.core.is_closed()
            }
        }
    };
}

pub(crate) use video_decoder_impl;
pub(crate) use video_encoder_impl;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Vp8Config;
    use crate::engine::SoftwareEngine;

    fn encoder() -> VideoEncoderCore {
        let engine = Arc::new(SoftwareEngine::new());
        VideoEncoderCore::open(engine, &CodecConfig::Vp8(Vp8Config::new(64, 64))).unwrap()
    }

    #[test]
    fn test_rejects_mismatched_frame() {
        let core = encoder();
        let frame = VideoFrame::new(32, 32, PixelFormat::I420);
        let mut dst = vec![0u8; core.max_encoded_size()];
        assert!(matches!(
            core.encode_into(&frame, &mut dst, false),
            Err(CodecError::DimensionMismatch { frame_width: 32, cfg_width: 64, .. })
        ));
    }

    #[test]
    fn test_request_keyframe_consumed_once() {
        let core = encoder();
        let frame = VideoFrame::new(64, 64, PixelFormat::I420);
        let mut dst = vec![0u8; core.max_encoded_size()];
        assert!(core.encode_into(&frame, &mut dst, false).unwrap().is_keyframe);
        assert!(!core.encode_into(&frame, &mut dst, false).unwrap().is_keyframe);
        core.request_keyframe();
        assert!(core.encode_into(&frame, &mut dst, false).unwrap().is_keyframe);
        assert!(!core.encode_into(&frame, &mut dst, false).unwrap().is_keyframe);
    }

    #[test]
    fn test_zero_bitrate_rejected() {
        let core = encoder();
        assert!(matches!(core.set_bitrate(0), Err(CodecError::InvalidConfig(_))));
        assert!(core.set_bitrate(250_000).is_ok());
        assert!(core.set_framerate(15).is_ok());
    }

    #[test]
    fn test_decoder_rejects_audio_codec() {
        let engine = Arc::new(SoftwareEngine::new());
        assert!(matches!(
            VideoDecoderCore::open(engine, CodecType::Opus, ()),
            Err(CodecError::UnsupportedCodec(_))
        ));
    }

    #[test]
    fn test_decoder_checks_inputs() {
        let engine = Arc::new(SoftwareEngine::new());
        let core = VideoDecoderCore::open(engine, CodecType::Vp8, ()).unwrap();
        let mut frame = VideoFrame::new(64, 64, PixelFormat::I420);
        assert!(matches!(
            core.decode_into(&[], &mut frame, 0, false),
            Err(CodecError::InvalidData(_))
        ));
        let mut rgba = VideoFrame::new(64, 64, PixelFormat::Rgba);
        assert!(matches!(
            core.decode_into(&[0x00], &mut rgba, 0, false),
            Err(CodecError::BufferTooSmall { required: 3, available: 1 })
        ));
    }
}
