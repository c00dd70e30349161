//! Pure-Rust engine
//!
//! Encodes pictures as per-macroblock colour means and audio as coarse
//! sample envelopes. Output is framed in each codec's real bitstream syntax,
//! so keyframe detection, parameter-set handling and buffer sizing behave as
//! they do with a native engine.

use super::bitstream::{self, ParsedFrame};
use super::picture;
use super::{
    AudioLayout, DecodedPicture, EncodeOutcome, Engine, EngineError, EngineHandle, EngineResult,
};
use crate::config::CodecConfig;
use crate::frame::{AudioFrame, SampleFormat, VideoFrame};
use crate::CodecType;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pure-Rust [`Engine`] implementation
pub struct SoftwareEngine {
    next_handle: AtomicU64,
    sessions: RwLock<HashMap<u64, Arc<Mutex<Session>>>>,
}

enum Session {
    VideoEncoder(VideoEncoderState),
    VideoDecoder(VideoDecoderState),
    AudioEncoder(AudioEncoderState),
    AudioDecoder(AudioLayout),
}

struct VideoEncoderState {
    codec: CodecType,
    width: u32,
    height: u32,
    bitrate: u32,
    framerate: u32,
    keyframe_interval: u32,
    /// H.264 (profile_idc, constraint flags) or VP9 profile in `.0`
    profile: (u8, u8),
    frames_encoded: u64,
    frames_since_keyframe: u32,
    payload: Vec<u8>,
    packet: Vec<u8>,
}

struct VideoDecoderState {
    codec: CodecType,
    dims: Option<(u32, u32)>,
    has_pps: bool,
    synced: bool,
    rbsp: Vec<u8>,
    payload: Vec<u8>,
}

struct AudioEncoderState {
    sample_rate: u32,
    channels: u16,
    bitrate: u32,
    complexity: u8,
}

impl SoftwareEngine {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of open encoder and decoder sessions.
    pub fn live_sessions(&self) -> usize {
        self.sessions.read().len()
    }

    fn insert(&self, session: Session) -> EngineHandle {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .write()
            .insert(raw, Arc::new(Mutex::new(session)));
        EngineHandle::from_raw(raw)
    }

    fn session(&self, handle: EngineHandle) -> EngineResult<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .get(&handle.as_raw())
            .cloned()
            .ok_or(EngineError::InvalidHandle(handle))
    }
}

impl Default for SoftwareEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SoftwareEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareEngine")
            .field("live_sessions", &self.live_sessions())
            .finish()
    }
}

impl Engine for SoftwareEngine {
    fn name(&self) -> &'static str {
        "software"
    }

    fn create_encoder(&self, config: &CodecConfig) -> EngineResult<EngineHandle> {
        let session = match config {
            CodecConfig::Opus(opus) => Session::AudioEncoder(AudioEncoderState {
                sample_rate: opus.sample_rate,
                channels: opus.channels,
                bitrate: opus.bitrate,
                complexity: opus.complexity,
            }),
            _ => {
                let Some(video) = config.video() else {
                    return Err(EngineError::Unsupported(config.codec()));
                };
                let profile = match config {
                    CodecConfig::H264(h264) => {
                        (h264.profile.profile_idc(), h264.profile.constraint_flags())
                    }
                    CodecConfig::Vp9(vp9) => (vp9.profile, 0),
                    _ => (0, 0),
                };
                Session::VideoEncoder(VideoEncoderState {
                    codec: config.codec(),
                    width: video.width,
                    height: video.height,
                    bitrate: video.bitrate,
                    framerate: video.framerate,
                    keyframe_interval: video.keyframe_interval,
                    profile,
                    frames_encoded: 0,
                    frames_since_keyframe: 0,
                    payload: Vec::with_capacity(picture::summary_len(video.width, video.height) + 1),
                    packet: Vec::new(),
                })
            }
        };
        let handle = self.insert(session);
        tracing::debug!(
            engine = self.name(),
            codec = %config.codec(),
            handle = %handle,
            "Created encoder session"
        );
        Ok(handle)
    }

    fn create_decoder(
        &self,
        codec: CodecType,
        audio: Option<AudioLayout>,
    ) -> EngineResult<EngineHandle> {
        let session = if codec.is_audio() {
            let layout = audio.ok_or_else(|| {
                EngineError::Failed(format!("{codec} decoder requires a sample layout"))
            })?;
            Session::AudioDecoder(layout)
        } else {
            Session::VideoDecoder(VideoDecoderState {
                codec,
                dims: None,
                has_pps: false,
                synced: false,
                rbsp: Vec::new(),
                payload: Vec::new(),
            })
        };
        let handle = self.insert(session);
        tracing::debug!(
            engine = self.name(),
            codec = %codec,
            handle = %handle,
            "Created decoder session"
        );
        Ok(handle)
    }

    fn encode(
        &self,
        handle: EngineHandle,
        frame: &VideoFrame,
        timestamp: u64,
        force_keyframe: bool,
        dst: &mut [u8],
    ) -> EngineResult<EncodeOutcome> {
        let session = self.session(handle)?;
        let mut session = session.lock();
        let Session::VideoEncoder(state) = &mut *session else {
            return Err(EngineError::InvalidHandle(handle));
        };
        state.encode(frame, timestamp, force_keyframe, dst)
    }

    fn decode(
        &self,
        handle: EngineHandle,
        src: &[u8],
        timestamp: u64,
        _is_keyframe: bool,
        planes: &mut [Vec<u8>],
    ) -> EngineResult<DecodedPicture> {
        let session = self.session(handle)?;
        let mut session = session.lock();
        let Session::VideoDecoder(state) = &mut *session else {
            return Err(EngineError::InvalidHandle(handle));
        };
        let frame = state.parse(src)?;
        let (width, height) = frame.dims.ok_or(EngineError::NeedMoreData)?;
        let summary = frame
            .payload
            .get(1..)
            .ok_or(EngineError::InvalidBitstream("empty picture payload"))?;
        picture::check_planes(width, height, planes)?;
        let strides = picture::reconstruct(summary, width, height, planes)?;
        tracing::trace!(handle = %handle, timestamp, keyframe = frame.keyframe, "Decoded picture");
        Ok(DecodedPicture {
            width,
            height,
            strides,
            is_keyframe: frame.keyframe,
        })
    }

    fn encode_audio(
        &self,
        handle: EngineHandle,
        frame: &AudioFrame,
        dst: &mut [u8],
    ) -> EngineResult<usize> {
        let session = self.session(handle)?;
        let session = session.lock();
        let Session::AudioEncoder(state) = &*session else {
            return Err(EngineError::InvalidHandle(handle));
        };
        state.encode(frame, dst)
    }

    fn decode_audio(
        &self,
        handle: EngineHandle,
        src: &[u8],
        format: SampleFormat,
        dst: &mut [u8],
    ) -> EngineResult<usize> {
        let session = self.session(handle)?;
        let session = session.lock();
        let Session::AudioDecoder(layout) = &*session else {
            return Err(EngineError::InvalidHandle(handle));
        };
        decode_opus(*layout, src, format, dst)
    }

    fn set_bitrate(&self, handle: EngineHandle, bps: u32) -> EngineResult<()> {
        if bps == 0 {
            return Err(EngineError::Failed("bitrate must be positive".into()));
        }
        let session = self.session(handle)?;
        let mut session = session.lock();
        match &mut *session {
            Session::VideoEncoder(state) => state.bitrate = bps,
            Session::AudioEncoder(state) => state.bitrate = bps,
            Session::VideoDecoder(state) => return Err(EngineError::Unsupported(state.codec)),
            Session::AudioDecoder(_) => return Err(EngineError::Unsupported(CodecType::Opus)),
        }
        Ok(())
    }

    fn set_framerate(&self, handle: EngineHandle, fps: u32) -> EngineResult<()> {
        if fps == 0 {
            return Err(EngineError::Failed("framerate must be positive".into()));
        }
        let session = self.session(handle)?;
        let mut session = session.lock();
        match &mut *session {
            Session::VideoEncoder(state) => {
                state.framerate = fps;
                Ok(())
            }
            Session::VideoDecoder(state) => Err(EngineError::Unsupported(state.codec)),
            Session::AudioEncoder(_) | Session::AudioDecoder(_) => {
                Err(EngineError::Unsupported(CodecType::Opus))
            }
        }
    }

    fn destroy(&self, handle: EngineHandle) {
        if self.sessions.write().remove(&handle.as_raw()).is_some() {
            tracing::debug!(engine = self.name(), handle = %handle, "Destroyed session");
        } else {
            tracing::warn!(engine = self.name(), handle = %handle, "Destroy of unknown handle");
        }
    }
}

impl VideoEncoderState {
    fn encode(
        &mut self,
        frame: &VideoFrame,
        timestamp: u64,
        force_keyframe: bool,
        dst: &mut [u8],
    ) -> EngineResult<EncodeOutcome> {
        if frame.width != self.width || frame.height != self.height {
            return Err(EngineError::Failed(format!(
                "frame {}x{} does not match encoder {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        let keyframe = self.frames_encoded == 0
            || force_keyframe
            || (self.keyframe_interval > 0
                && self.frames_since_keyframe + 1 >= self.keyframe_interval);

        let q = picture::quantizer(self.width, self.height, self.bitrate, self.framerate);
        self.payload.clear();
        self.payload.push(q);
        picture::summarize(frame, q, &mut self.payload);

        let dims = (self.width, self.height);
        match self.codec {
            CodecType::H264 => {
                bitstream::write_h264(&mut self.packet, keyframe, self.profile, dims, &self.payload)
            }
            CodecType::Vp8 => bitstream::write_vp8(&mut self.packet, keyframe, dims, &self.payload),
            CodecType::Vp9 => {
                bitstream::write_vp9(&mut self.packet, keyframe, self.profile.0, dims, &self.payload)
            }
            CodecType::Av1 => bitstream::write_av1(&mut self.packet, keyframe, dims, &self.payload),
            CodecType::Opus => return Err(EngineError::Unsupported(CodecType::Opus)),
        }

        let written = self.packet.len();
        let available = dst.len();
        let out = dst.get_mut(..written).ok_or(EngineError::BufferTooSmall {
            required: written,
            available,
        })?;
        out.copy_from_slice(&self.packet);

        self.frames_encoded += 1;
        self.frames_since_keyframe = if keyframe {
            0
        } else {
            self.frames_since_keyframe + 1
        };
        tracing::trace!(
            codec = %self.codec,
            timestamp,
            keyframe,
            bytes = written,
            "Encoded picture"
        );
        Ok(EncodeOutcome {
            bytes_written: written,
            is_keyframe: keyframe,
        })
    }
}

impl VideoDecoderState {
    /// Parse one access unit, tracking parameter sets and keyframe sync.
    fn parse<'a>(&'a mut self, src: &'a [u8]) -> EngineResult<ParsedFrame<'a>> {
        let frame = match self.codec {
            CodecType::H264 => {
                let units = bitstream::parse_h264(src, &mut self.rbsp, &mut self.payload)?;
                if units.dims.is_some() {
                    self.dims = units.dims;
                }
                self.has_pps |= units.has_pps;
                let keyframe = units.slice.ok_or(EngineError::NeedMoreData)?;
                if self.dims.is_none() || !self.has_pps {
                    return Err(EngineError::NeedMoreData);
                }
                ParsedFrame {
                    keyframe,
                    dims: self.dims,
                    payload: &self.payload,
                }
            }
            CodecType::Vp8 => bitstream::parse_vp8(src)?,
            CodecType::Vp9 => bitstream::parse_vp9(src)?,
            CodecType::Av1 => bitstream::parse_av1(src)?,
            CodecType::Opus => return Err(EngineError::Unsupported(CodecType::Opus)),
        };
        if frame.dims.is_some() {
            self.dims = frame.dims;
        }
        if frame.keyframe {
            self.synced = true;
        } else if !self.synced {
            return Err(EngineError::NeedMoreData);
        }
        Ok(ParsedFrame {
            dims: self.dims,
            ..frame
        })
    }
}

impl AudioEncoderState {
    /// Input samples per coded sample; lower complexity keeps fewer.
    fn stride(&self) -> usize {
        match self.complexity {
            0..=3 => 16,
            4..=6 => 8,
            _ => 4,
        }
    }

    fn encode(&self, frame: &AudioFrame, dst: &mut [u8]) -> EngineResult<usize> {
        if frame.sample_rate != self.sample_rate || frame.channels != self.channels {
            return Err(EngineError::Failed(format!(
                "frame {} Hz/{} ch does not match encoder {} Hz/{} ch",
                frame.sample_rate, frame.channels, self.sample_rate, self.channels
            )));
        }
        let scaled = frame.samples_per_channel as u64 * 10_000;
        let rate = u64::from(self.sample_rate);
        let toc = (scaled % rate == 0)
            .then(|| u32::try_from(scaled / rate).ok())
            .flatten()
            .and_then(|duration| bitstream::opus_toc(duration, self.channels == 2))
            .ok_or_else(|| {
                EngineError::Failed(format!(
                    "{} samples at {} Hz is not an Opus frame duration",
                    frame.samples_per_channel, self.sample_rate
                ))
            })?;

        let channels = usize::from(self.channels);
        let stride = self.stride();
        let steps = frame.samples_per_channel.div_ceil(stride);
        let required = 1 + steps * channels;
        if dst.len() < required {
            return Err(EngineError::BufferTooSmall {
                required,
                available: dst.len(),
            });
        }
        dst[0] = toc;
        let mut pos = 1;
        for step in 0..steps {
            for channel in 0..channels {
                let sample = frame.sample_i16(step * stride * channels + channel).unwrap_or(0);
                dst[pos] = sample.to_be_bytes()[0];
                pos += 1;
            }
        }
        tracing::trace!(
            bitrate = self.bitrate,
            complexity = self.complexity,
            bytes = pos,
            "Encoded audio packet"
        );
        Ok(pos)
    }
}

fn decode_opus(
    layout: AudioLayout,
    src: &[u8],
    format: SampleFormat,
    dst: &mut [u8],
) -> EngineResult<usize> {
    let (&toc, body) = src
        .split_first()
        .ok_or(EngineError::InvalidBitstream("empty Opus packet"))?;
    let (duration, stereo) = bitstream::parse_opus_toc(toc);
    let packet_channels = if stereo { 2 } else { 1 };
    let out_channels = usize::from(layout.channels);
    let samples = (u64::from(layout.sample_rate) * u64::from(duration) / 10_000) as usize;

    let bytes_per_sample = format.bytes_per_sample();
    let required = samples * out_channels * bytes_per_sample;
    if dst.len() < required {
        return Err(EngineError::BufferTooSmall {
            required,
            available: dst.len(),
        });
    }

    let steps = body.len() / packet_channels;
    let source = |step: usize, channel: usize| -> i16 {
        body.get(step * packet_channels + channel)
            .map_or(0, |&b| i16::from(b as i8) << 8)
    };
    let mut pos = 0;
    for i in 0..samples {
        let step = i * steps / samples;
        for channel in 0..out_channels {
            let sample = match (packet_channels, out_channels) {
                (2, 1) => ((i32::from(source(step, 0)) + i32::from(source(step, 1))) / 2) as i16,
                (1, _) => source(step, 0),
                _ => source(step, channel),
            };
            match format {
                SampleFormat::S16 => dst[pos..pos + 2].copy_from_slice(&sample.to_le_bytes()),
                SampleFormat::F32 => dst[pos..pos + 4]
                    .copy_from_slice(&crate::frame::i16_to_f32(sample).to_le_bytes()),
            }
            pos += bytes_per_sample;
        }
    }
    Ok(samples)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{H264Config, OpusConfig, Vp8Config};
    use crate::frame::PixelFormat;

    fn h264_encoder(engine: &SoftwareEngine, interval: u32) -> EngineHandle {
        let config = CodecConfig::H264(H264Config::new(64, 48).with_keyframe_interval(interval));
        engine.create_encoder(&config).unwrap()
    }

    #[test]
    fn test_first_frame_is_keyframe() {
        let engine = SoftwareEngine::new();
        let handle = h264_encoder(&engine, 0);
        let mut frame = VideoFrame::new(64, 48, PixelFormat::I420);
        frame.fill_gray(128);
        let mut dst = vec![0u8; 4096];

        let first = engine.encode(handle, &frame, 0, false, &mut dst).unwrap();
        assert!(first.is_keyframe);
        let second = engine.encode(handle, &frame, 1, false, &mut dst).unwrap();
        assert!(!second.is_keyframe);
        let forced = engine.encode(handle, &frame, 2, true, &mut dst).unwrap();
        assert!(forced.is_keyframe);
    }

    #[test]
    fn test_encode_reports_short_destination() {
        let engine = SoftwareEngine::new();
        let handle = h264_encoder(&engine, 0);
        let mut frame = VideoFrame::new(64, 48, PixelFormat::I420);
        frame.fill_gray(128);
        let mut dst = vec![0u8; 8];
        assert!(matches!(
            engine.encode(handle, &frame, 0, true, &mut dst),
            Err(EngineError::BufferTooSmall { available: 8, .. })
        ));
    }

    #[test]
    fn test_keyframe_interval() {
        let engine = SoftwareEngine::new();
        let handle = h264_encoder(&engine, 3);
        let frame = VideoFrame::new(64, 48, PixelFormat::I420);
        let mut dst = vec![0u8; 4096];
        let keys: Vec<bool> = (0..8)
            .map(|ts| engine.encode(handle, &frame, ts, false, &mut dst).unwrap().is_keyframe)
            .collect();
        assert_eq!(keys, vec![true, false, false, true, false, false, true, false]);
    }

    #[test]
    fn test_encode_small_buffer_keeps_state() {
        let engine = SoftwareEngine::new();
        let handle = h264_encoder(&engine, 0);
        let frame = VideoFrame::new(64, 48, PixelFormat::I420);
        let mut tiny = [0u8; 4];
        assert!(matches!(
            engine.encode(handle, &frame, 0, false, &mut tiny),
            Err(EngineError::BufferTooSmall { .. })
        ));
        let mut dst = vec![0u8; 4096];
        assert!(engine.encode(handle, &frame, 0, false, &mut dst).unwrap().is_keyframe);
    }

    #[test]
    fn test_decoder_waits_for_keyframe() {
        let engine = SoftwareEngine::new();
        let encoder = engine
            .create_encoder(&CodecConfig::Vp8(Vp8Config::new(32, 32)))
            .unwrap();
        let decoder = engine.create_decoder(CodecType::Vp8, None).unwrap();
        let frame = VideoFrame::new(32, 32, PixelFormat::I420);
        let mut key = vec![0u8; 2048];
        let mut inter = vec![0u8; 2048];
        let k = engine.encode(encoder, &frame, 0, false, &mut key).unwrap();
        let i = engine.encode(encoder, &frame, 1, false, &mut inter).unwrap();

        let mut planes = VideoFrame::new(32, 32, PixelFormat::I420).planes;
        assert_eq!(
            engine.decode(decoder, &inter[..i.bytes_written], 1, false, &mut planes),
            Err(EngineError::NeedMoreData)
        );
        let picture = engine
            .decode(decoder, &key[..k.bytes_written], 0, true, &mut planes)
            .unwrap();
        assert_eq!((picture.width, picture.height), (32, 32));
        assert!(picture.is_keyframe);
        assert!(engine
            .decode(decoder, &inter[..i.bytes_written], 1, false, &mut planes)
            .is_ok());
    }

    #[test]
    fn test_opus_roundtrip_stereo_to_mono() {
        let engine = SoftwareEngine::new();
        let encoder = engine
            .create_encoder(&CodecConfig::Opus(OpusConfig::new(48000, 2)))
            .unwrap();
        let decoder = engine
            .create_decoder(
                CodecType::Opus,
                Some(AudioLayout {
                    sample_rate: 16000,
                    channels: 1,
                }),
            )
            .unwrap();

        let samples = vec![0x4000i16; 960 * 2];
        let frame = AudioFrame::from_i16(48000, 2, &samples).unwrap();
        let mut packet = vec![0u8; 4000];
        let len = engine.encode_audio(encoder, &frame, &mut packet).unwrap();
        assert_eq!(len, 1 + 240 * 2);

        let mut pcm = vec![0u8; 320 * 2];
        let decoded = engine
            .decode_audio(decoder, &packet[..len], SampleFormat::S16, &mut pcm)
            .unwrap();
        assert_eq!(decoded, 320);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 0x4000);
    }

    #[test]
    fn test_opus_complexity_sets_packet_size() {
        let engine = SoftwareEngine::new();
        let decoder = engine
            .create_decoder(
                CodecType::Opus,
                Some(AudioLayout {
                    sample_rate: 48000,
                    channels: 1,
                }),
            )
            .unwrap();
        let frame = AudioFrame::from_i16(48000, 1, &[0x2000i16; 960]).unwrap();
        let mut packet = vec![0u8; 4000];
        let mut pcm = vec![0u8; 960 * 2];

        for (complexity, body) in [(10, 240), (5, 120), (0, 60)] {
            let config = OpusConfig::new(48000, 1).with_complexity(complexity);
            let encoder = engine.create_encoder(&CodecConfig::Opus(config)).unwrap();
            let len = engine.encode_audio(encoder, &frame, &mut packet).unwrap();
            assert_eq!(len, 1 + body);
            let decoded = engine
                .decode_audio(decoder, &packet[..len], SampleFormat::S16, &mut pcm)
                .unwrap();
            assert_eq!(decoded, 960);
            assert_eq!(i16::from_le_bytes([pcm[1918], pcm[1919]]), 0x2000);
        }
    }

    #[test]
    fn test_opus_rejects_odd_duration() {
        let engine = SoftwareEngine::new();
        let encoder = engine
            .create_encoder(&CodecConfig::Opus(OpusConfig::new(48000, 1)))
            .unwrap();
        let frame = AudioFrame::from_i16(48000, 1, &[0i16; 100]).unwrap();
        let mut packet = vec![0u8; 4000];
        assert!(matches!(
            engine.encode_audio(encoder, &frame, &mut packet),
            Err(EngineError::Failed(_))
        ));
    }

    #[test]
    fn test_destroy_and_invalid_handle() {
        let engine = SoftwareEngine::new();
        let handle = h264_encoder(&engine, 0);
        assert_eq!(engine.live_sessions(), 1);
        engine.destroy(handle);
        engine.destroy(handle);
        assert_eq!(engine.live_sessions(), 0);
        assert_eq!(
            engine.set_bitrate(handle, 1000),
            Err(EngineError::InvalidHandle(handle))
        );
    }

    #[test]
    fn test_decoder_rejects_rate_changes() {
        let engine = SoftwareEngine::new();
        let decoder = engine.create_decoder(CodecType::Av1, None).unwrap();
        assert_eq!(
            engine.set_framerate(decoder, 30),
            Err(EngineError::Unsupported(CodecType::Av1))
        );
    }
}
