//! H.264 encoder and decoder
//!
//! The decoder runs every access unit through an [`H264Normalizer`] before
//! the engine sees it, so length-prefixed input and keyframes that omit their
//! parameter sets decode like clean Annex B.

use crate::annexb::{self, nal_type, AnnexBUnitIter, START_CODE};
use crate::codec::{EncodeOutcome, VideoEncoder};
use crate::config::{CodecConfig, H264Config, H264StreamFormat};
use crate::engine::{Engine, EngineError};
use crate::frame::VideoFrame;
use crate::video::{video_decoder_impl, BitstreamFilter, VideoDecoderCore, VideoEncoderCore};
use crate::{CodecError, CodecType, Result};
use std::sync::Arc;

/// H.264 encoder
pub struct H264Encoder {
    core: VideoEncoderCore,
    config: H264Config,
}

impl H264Encoder {
    pub fn new(engine: Arc<dyn Engine>, config: H264Config) -> Result<Self> {
        let core = VideoEncoderCore::open(engine, &CodecConfig::H264(config.clone()))?;
        Ok(Self { core, config })
    }

    pub fn config(&self) -> &H264Config {
        &self.config
    }
}

impl VideoEncoder for H264Encoder {
    fn codec(&self) -> CodecType {
        CodecType::H264
    }

    fn dimensions(&self) -> (u32, u32) {
        self.core.dimensions()
    }

    fn encode_into(
        &self,
        frame: &VideoFrame,
        dst: &mut [u8],
        force_keyframe: bool,
    ) -> Result<EncodeOutcome> {
        let outcome = self.core.encode_into(frame, dst, force_keyframe)?;
        if self.config.stream_format == H264StreamFormat::Avcc
            && !annexb::annexb_to_avcc_in_place(&mut dst[..outcome.bytes_written])
        {
            return Err(CodecError::Engine(EngineError::InvalidBitstream(
                "engine output is not framed with 4-byte start codes",
            )));
        }
        Ok(outcome)
    }

    fn max_encoded_size(&self) -> usize {
        self.core.max_encoded_size()
    }

    fn set_bitrate(&self, bps: u32) -> Result<()> {
        self.core.set_bitrate(bps)
    }

    fn set_framerate(&self, fps: u32) -> Result<()> {
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

/// H.264 decoder
pub struct H264Decoder {
    core: VideoDecoderCore<H264Normalizer>,
}

impl H264Decoder {
    pub fn new(engine: Arc<dyn Engine>) -> Result<Self> {
        Ok(Self {
            core: VideoDecoderCore::open(engine, CodecType::H264, H264Normalizer::new())?,
        })
    }
}

video_decoder_impl!(H264Decoder);

/// Repairs H.264 access units for an Annex B decoder.
///
/// For each buffer, in order:
///
/// 1. Length-prefixed (AVCC) input is rewritten as Annex B. Input that is
///    neither Annex B nor consistent AVCC passes through untouched.
/// 2. SPS and PPS units replace the cached copies.
/// 3. A buffer with neither an SPS nor a PPS gets the cached pair prepended.
///
/// The cache lives as long as the normalizer. All scratch buffers are reused,
/// so a warm normalizer does not allocate.
#[derive(Debug, Default)]
pub struct H264Normalizer {
    sps: Vec<u8>,
    pps: Vec<u8>,
    converted: Vec<u8>,
    output: Vec<u8>,
    avcc_seen: bool,
    injection_seen: bool,
}

impl H264Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last SPS seen, with a 4-byte start code.
    pub fn cached_sps(&self) -> Option<&[u8]> {
        (!self.sps.is_empty()).then_some(self.sps.as_slice())
    }

    /// Last PPS seen, with a 4-byte start code.
    pub fn cached_pps(&self) -> Option<&[u8]> {
        (!self.pps.is_empty()).then_some(self.pps.as_slice())
    }

    /// Normalize one access unit.
    pub fn normalize<'a>(&'a mut self, data: &'a [u8]) -> &'a [u8] {
        let Self {
            sps,
            pps,
            converted,
            output,
            avcc_seen,
            injection_seen,
        } = self;

        let stream: &[u8] = if data.starts_with(&START_CODE) {
            data
        } else if annexb::is_avcc(data) && annexb::avcc_to_annexb_into(data, converted) {
            if !*avcc_seen {
                *avcc_seen = true;
                tracing::debug!(len = data.len(), "Converting AVCC H.264 input to Annex B");
            }
            converted.as_slice()
        } else if annexb::leading_start_code(data).is_some() {
            data
        } else {
            tracing::warn!(len = data.len(), "Unrecognized H.264 framing, passing through");
            return data;
        };

        let mut has_sps = false;
        let mut has_pps = false;
        for (kind, unit) in AnnexBUnitIter::new(stream) {
            let cache = match kind {
                Some(nal_type::SPS) => {
                    has_sps = true;
                    &mut *sps
                }
                Some(nal_type::PPS) => {
                    has_pps = true;
                    &mut *pps
                }
                _ => continue,
            };
            let code_len = annexb::leading_start_code(unit).unwrap_or(0);
            cache.clear();
            cache.extend_from_slice(&START_CODE);
            cache.extend_from_slice(&unit[code_len..]);
        }

        if has_sps || has_pps || sps.is_empty() || pps.is_empty() {
            return stream;
        }

        if !*injection_seen {
            *injection_seen = true;
            tracing::debug!(
                sps_len = sps.len(),
                pps_len = pps.len(),
                "Injecting cached SPS/PPS into H.264 input"
            );
        }
        output.clear();
        output.extend_from_slice(sps);
        output.extend_from_slice(pps);
        output.extend_from_slice(stream);
        output.as_slice()
    }
}

impl BitstreamFilter for H264Normalizer {
    fn filter<'a>(&'a mut self, data: &'a [u8]) -> &'a [u8] {
        self.normalize(data)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::VideoDecoder;
    use crate::engine::SoftwareEngine;
    use crate::frame::PixelFormat;

    const SPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xc0, 0x1f];
    const PPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x68, 0xce, 0x38, 0x80];
    const IDR: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84];
    const SLICE: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x41, 0x9a, 0x02];

    fn access_unit(parts: &[&[u8]]) -> Vec<u8> {
        parts.concat()
    }

    #[test]
    fn test_avcc_single_nal_grows_by_start_code() {
        let nal = [0x65, 0x88, 0x84, 0x00, 0x10];
        let mut avcc = (nal.len() as u32).to_be_bytes().to_vec();
        avcc.extend_from_slice(&nal);

        let mut normalizer = H264Normalizer::new();
        let out = normalizer.normalize(&avcc);
        assert_eq!(out.len(), nal.len() + 4);
        assert!(out.starts_with(&START_CODE));
        assert_eq!(&out[4..], &nal);
    }

    #[test]
    fn test_annexb_passes_through() {
        let au = access_unit(&[SPS, PPS, IDR]);
        let mut normalizer = H264Normalizer::new();
        assert_eq!(normalizer.normalize(&au), &au[..]);
        assert_eq!(normalizer.cached_sps(), Some(SPS));
        assert_eq!(normalizer.cached_pps(), Some(PPS));
    }

    #[test]
    fn test_three_byte_start_codes_cached_with_four() {
        let au = [&[0x00, 0x00, 0x01][..], &SPS[4..], &[0x00, 0x00, 0x01][..], &PPS[4..]].concat();
        let mut normalizer = H264Normalizer::new();
        assert_eq!(normalizer.normalize(&au), &au[..]);
        assert_eq!(normalizer.cached_sps(), Some(SPS));
        assert_eq!(normalizer.cached_pps(), Some(PPS));
    }

    #[test]
    fn test_injects_cached_parameter_sets() {
        let mut normalizer = H264Normalizer::new();
        let first = access_unit(&[SPS, PPS, IDR]);
        normalizer.normalize(&first);
        for _ in 0..8 {
            normalizer.normalize(SLICE);
        }

        let out = normalizer.normalize(IDR).to_vec();
        assert_eq!(out, access_unit(&[SPS, PPS, IDR]));
    }

    #[test]
    fn test_no_injection_without_complete_cache() {
        let mut normalizer = H264Normalizer::new();
        let only_sps = access_unit(&[SPS, IDR]);
        normalizer.normalize(&only_sps);
        assert_eq!(normalizer.normalize(IDR), IDR);
    }

    #[test]
    fn test_new_sps_replaces_cache() {
        let mut normalizer = H264Normalizer::new();
        normalizer.normalize(&access_unit(&[SPS, PPS, IDR]));
        let sps2: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x28];
        let out = normalizer.normalize(&access_unit(&[sps2, IDR])).to_vec();
        assert_eq!(out, access_unit(&[sps2, IDR]));
        assert_eq!(normalizer.cached_sps(), Some(sps2));
        assert_eq!(normalizer.cached_pps(), Some(PPS));
    }

    #[test]
    fn test_inconsistent_avcc_passes_through() {
        let data = [0x00, 0x00, 0x00, 0x10, 0x65, 0x88];
        let mut normalizer = H264Normalizer::new();
        assert_eq!(normalizer.normalize(&data), &data[..]);
    }

    #[test]
    fn test_avcc_converted_then_injected() {
        let mut normalizer = H264Normalizer::new();
        normalizer.normalize(&access_unit(&[SPS, PPS, IDR]));

        let mut avcc = 3u32.to_be_bytes().to_vec();
        avcc.extend_from_slice(&IDR[4..]);
        let out = normalizer.normalize(&avcc).to_vec();
        assert_eq!(out, access_unit(&[SPS, PPS, IDR]));
    }

    fn gray_frame(width: u32, height: u32) -> VideoFrame {
        let mut frame = VideoFrame::new(width, height, PixelFormat::I420);
        frame.fill_gray(128);
        frame
    }

    #[test]
    fn test_avcc_encoder_output_decodes() {
        let engine: Arc<dyn Engine> = Arc::new(SoftwareEngine::new());
        let config = H264Config::new(64, 48).with_stream_format(H264StreamFormat::Avcc);
        let encoder = H264Encoder::new(engine.clone(), config).unwrap();
        let decoder = H264Decoder::new(engine).unwrap();

        let frame = gray_frame(64, 48);
        let mut packet = vec![0u8; encoder.max_encoded_size()];
        let out = encoder.encode_into(&frame, &mut packet, true).unwrap();
        let data = &packet[..out.bytes_written];
        assert!(!data.starts_with(&START_CODE));
        assert!(annexb::is_avcc(data));

        let mut decoded = VideoFrame::new(64, 48, PixelFormat::I420);
        decoder.decode_into(data, &mut decoded, 0, true).unwrap();
        assert_eq!((decoded.width, decoded.height), (64, 48));
        assert!(decoded.planes[0].iter().all(|&b| b == 128));
    }

    #[test]
    fn test_decoder_recovers_stripped_keyframe() {
        let engine: Arc<dyn Engine> = Arc::new(SoftwareEngine::new());
        let encoder = H264Encoder::new(engine.clone(), H264Config::new(64, 48)).unwrap();
        let frame = gray_frame(64, 48);
        let mut packet = vec![0u8; encoder.max_encoded_size()];

        let first = encoder.encode_into(&frame, &mut packet, true).unwrap();
        let first = packet[..first.bytes_written].to_vec();
        let second = encoder.encode_into(&frame, &mut packet, true).unwrap();
        let stripped: Vec<u8> = AnnexBUnitIter::new(&packet[..second.bytes_written])
            .filter(|(kind, _)| *kind == Some(nal_type::IDR_SLICE))
            .flat_map(|(_, unit)| unit.iter().copied())
            .collect();

        let decoder = H264Decoder::new(engine).unwrap();
        let mut decoded = VideoFrame::new(64, 48, PixelFormat::I420);
        decoder.decode_into(&first, &mut decoded, 0, true).unwrap();
        decoder.decode_into(&stripped, &mut decoded, 3000, true).unwrap();
        assert!(decoded.keyframe);
        assert_eq!(decoded.timestamp, 3000);
    }

    #[test]
    fn test_slice_before_parameter_sets_needs_more_data() {
        let engine: Arc<dyn Engine> = Arc::new(SoftwareEngine::new());
        let encoder = H264Encoder::new(engine.clone(), H264Config::new(64, 48)).unwrap();
        let frame = gray_frame(64, 48);
        let mut packet = vec![0u8; encoder.max_encoded_size()];
        encoder.encode_into(&frame, &mut packet, true).unwrap();
        let inter = encoder.encode_into(&frame, &mut packet, false).unwrap();
        assert!(!inter.is_keyframe);

        let decoder = H264Decoder::new(engine).unwrap();
        let mut decoded = VideoFrame::new(64, 48, PixelFormat::I420);
        let result = decoder.decode_into(&packet[..inter.bytes_written], &mut decoded, 0, false);
        assert!(matches!(result, Err(CodecError::NeedMoreData)));
    }
}
