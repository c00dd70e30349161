//! Decode-then-encode video pipeline
//!
//! The output is always the re-encoded *decoded* picture; source packets are
//! never forwarded as-is.

use crate::codec::{EncodeOutcome, VideoDecoder, VideoEncoder};
use crate::config::CodecConfig;
use crate::factory::{CodecFactory, VideoDecoderKind, VideoEncoderKind};
use crate::frame::{PixelFormat, VideoFrame};
use crate::pool::{PoolStats, VideoFramePool, VideoShape};
use crate::{CodecError, CodecType, Result};
use std::sync::atomic::{AtomicU64, Ordering};

const POOL_FRAMES: usize = 2;

/// Transcodes one video stream into another codec.
pub struct VideoTranscoder {
    decoder: VideoDecoderKind,
    encoder: VideoEncoderKind,
    pool: VideoFramePool,
    pictures: AtomicU64,
    pending: AtomicU64,
}

impl VideoTranscoder {
    /// Open a `from` decoder and an encoder for `to` on the factory's engine.
    pub fn new(factory: &CodecFactory, from: CodecType, to: CodecConfig) -> Result<Self> {
        let decoder = factory.new_video_decoder(from)?;
        let encoder = factory.new_video_encoder(to.codec(), to)?;
        Ok(Self::from_parts(decoder, encoder))
    }

    pub fn from_parts(decoder: VideoDecoderKind, encoder: VideoEncoderKind) -> Self {
        let (width, height) = encoder.dimensions();
        tracing::debug!(
            from = %decoder.codec(),
            to = %encoder.codec(),
            width,
            height,
            "Created video transcoder"
        );
        Self {
            decoder,
            encoder,
            pool: VideoFramePool::new(
                VideoShape::new(width, height, PixelFormat::I420),
                POOL_FRAMES,
            ),
            pictures: AtomicU64::new(0),
            pending: AtomicU64::new(0),
        }
    }

    pub fn decoder(&self) -> &VideoDecoderKind {
        &self.decoder
    }

    pub fn encoder(&self) -> &VideoEncoderKind {
        &self.encoder
    }

    /// Minimum `dst` length for [`transcode_into`](Self::transcode_into).
    pub fn max_encoded_size(&self) -> usize {
        self.encoder.max_encoded_size()
    }

    /// Decode `src` and re-encode the picture into `dst`.
    ///
    /// Returns `Ok(None)` while the decoder needs more data. Source keyframes
    /// stay keyframes in the output.
    pub fn transcode_into(
        &self,
        src: &[u8],
        timestamp: u64,
        is_keyframe: bool,
        dst: &mut [u8],
    ) -> Result<Option<EncodeOutcome>> {
        let mut frame = self.pool.get();
        let result = self.transcode_frame(&mut frame, src, timestamp, is_keyframe, dst);
        self.pool.put(frame);
        result
    }

    fn transcode_frame(
        &self,
        frame: &mut VideoFrame,
        src: &[u8],
        timestamp: u64,
        is_keyframe: bool,
        dst: &mut [u8],
    ) -> Result<Option<EncodeOutcome>> {
        match self.decoder.decode_into(src, frame, timestamp, is_keyframe) {
            Ok(()) => {}
            Err(CodecError::NeedMoreData) => {
                self.pending.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let (width, height) = self.encoder.dimensions();
        if frame.width != width || frame.height != height {
            return Err(CodecError::DimensionMismatch {
                frame_width: frame.width,
                frame_height: frame.height,
                cfg_width: width,
                cfg_height: height,
            });
        }

        let outcome = self.encoder.encode_into(frame, dst, frame.keyframe)?;
        self.pictures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            timestamp,
            keyframe = outcome.is_keyframe,
            bytes = outcome.bytes_written,
            "Transcoded picture"
        );
        Ok(Some(outcome))
    }

    /// Pictures transcoded so far.
    pub fn pictures(&self) -> u64 {
        self.pictures.load(Ordering::Relaxed)
    }

    /// Inputs the decoder buffered without emitting a picture.
    pub fn pending_inputs(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn close(&self) {
        self.decoder.close();
        self.encoder.close();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{Av1Config, H264Config, Vp8Config};

    fn source_packets(count: usize) -> Vec<(Vec<u8>, bool)> {
        let factory = CodecFactory::software();
        let encoder = factory
            .new_video_encoder(CodecType::H264, H264Config::new(96, 64).into())
            .unwrap();
        let mut frame = VideoFrame::new(96, 64, PixelFormat::I420);
        frame.fill_gray(70);
        let mut packet = vec![0u8; encoder.max_encoded_size()];
        (0..count)
            .map(|i| {
                frame.timestamp = i as u64 * 3000;
                let out = encoder.encode_into(&frame, &mut packet, false).unwrap();
                (packet[..out.bytes_written].to_vec(), out.is_keyframe)
            })
            .collect()
    }

    #[test]
    fn test_h264_to_vp8() {
        let factory = CodecFactory::software();
        let transcoder =
            VideoTranscoder::new(&factory, CodecType::H264, Vp8Config::new(96, 64).into()).unwrap();
        let mut dst = vec![0u8; transcoder.max_encoded_size()];

        for (i, (packet, key)) in source_packets(5).into_iter().enumerate() {
            let out = transcoder
                .transcode_into(&packet, i as u64 * 3000, key, &mut dst)
                .unwrap()
                .unwrap();
            assert_eq!(out.is_keyframe, i == 0);
            if i == 0 {
                assert_eq!(&dst[3..6], &[0x9d, 0x01, 0x2a]);
            }
        }
        assert_eq!(transcoder.pictures(), 5);
        let stats = transcoder.pool_stats();
        assert_eq!(stats.allocated, POOL_FRAMES as u64);
        assert_eq!(stats.reused, 5);
        assert_eq!(stats.available, POOL_FRAMES);
    }

    #[test]
    fn test_missing_keyframe_is_pending() {
        let factory = CodecFactory::software();
        let transcoder =
            VideoTranscoder::new(&factory, CodecType::H264, Av1Config::new(96, 64).into()).unwrap();
        let mut dst = vec![0u8; transcoder.max_encoded_size()];
        let packets = source_packets(3);
        let (inter, _) = &packets[1];
        assert_eq!(transcoder.transcode_into(inter, 0, false, &mut dst).unwrap(), None);
        assert_eq!(transcoder.pending_inputs(), 1);
    }

    #[test]
    fn test_size_mismatch() {
        let factory = CodecFactory::software();
        let transcoder =
            VideoTranscoder::new(&factory, CodecType::H264, Vp8Config::new(128, 96).into())
                .unwrap();
        let mut dst = vec![0u8; transcoder.max_encoded_size()];
        let packets = source_packets(1);
        let result = transcoder.transcode_into(&packets[0].0, 0, true, &mut dst);
        assert!(matches!(result, Err(CodecError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_close_closes_both() {
        let factory = CodecFactory::software();
        let transcoder =
            VideoTranscoder::new(&factory, CodecType::Vp8, H264Config::new(64, 64).into()).unwrap();
        transcoder.close();
        assert!(transcoder.decoder().is_closed());
        assert!(transcoder.encoder().is_closed());
        let mut dst = vec![0u8; transcoder.max_encoded_size()];
        assert!(matches!(
            transcoder.transcode_into(&[1, 2, 3], 0, true, &mut dst),
            Err(CodecError::DecoderClosed)
        ));
    }
}
