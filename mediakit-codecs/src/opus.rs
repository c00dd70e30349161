//! Opus encoder and decoder
//!
//! Frames must carry 2.5, 5, 10, 20, 40 or 60 ms of audio at the configured
//! sample rate. Every Opus packet decodes on its own, so each one reports as
//! a keyframe.

use crate::codec::{AudioDecoder, AudioEncoder, EncodeOutcome};
use crate::config::{validate_opus_layout, CodecConfig, OpusConfig};
use crate::engine::{AudioLayout, Engine};
use crate::frame::AudioFrame;
use crate::session::{EngineSession, Role};
use crate::{CodecError, CodecType, Result, MAX_OPUS_PACKET_SIZE};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Longest Opus frame, in milliseconds
pub const MAX_FRAME_DURATION_MS: u32 = 120;

/// Frame durations the encoder accepts, in microseconds
pub const FRAME_DURATIONS_US: [u64; 6] = [2_500, 5_000, 10_000, 20_000, 40_000, 60_000];

/// Opus encoder
pub struct OpusEncoder {
    session: EngineSession,
    sample_rate: u32,
    channels: u16,
    bitrate: AtomicU32,
}

impl OpusEncoder {
    pub fn new(engine: Arc<dyn Engine>, config: OpusConfig) -> Result<Self> {
        config.validate()?;
        let handle = engine.create_encoder(&CodecConfig::Opus(config.clone()))?;
        tracing::debug!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            bitrate = config.bitrate,
            engine = engine.name(),
            "Created Opus encoder"
        );
        Ok(Self {
            session: EngineSession::new(engine, CodecType::Opus, Role::Encoder, handle, ()),
            sample_rate: config.sample_rate,
            channels: config.channels,
            bitrate: AtomicU32::new(config.bitrate),
        })
    }

    /// Current target bitrate in bits per second.
    pub fn bitrate(&self) -> u32 {
        self.bitrate.load(Ordering::Relaxed)
    }

    fn check_frame(&self, frame: &AudioFrame) -> Result<()> {
        frame.validate()?;
        if frame.sample_rate != self.sample_rate {
            return Err(CodecError::InvalidFrame("sample rate does not match encoder"));
        }
        if frame.channels != self.channels {
            return Err(CodecError::InvalidFrame("channel count does not match encoder"));
        }
        let scaled = frame.samples_per_channel as u64 * 1_000_000;
        let rate = u64::from(self.sample_rate);
        if scaled % rate != 0 || !FRAME_DURATIONS_US.contains(&(scaled / rate)) {
            return Err(CodecError::InvalidFrame("unsupported Opus frame duration"));
        }
        Ok(())
    }
}

impl AudioEncoder for OpusEncoder {
    fn codec(&self) -> CodecType {
        CodecType::Opus
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn encode_into(
        &self,
        frame: &AudioFrame,
        dst: &mut [u8],
        _force_keyframe: bool,
    ) -> Result<EncodeOutcome> {
        self.session.ensure_open()?;
        self.check_frame(frame)?;
        if dst.len() < MAX_OPUS_PACKET_SIZE {
            return Err(CodecError::BufferTooSmall {
                required: MAX_OPUS_PACKET_SIZE,
                available: dst.len(),
            });
        }
        self.session.with_engine(|engine, handle, _| {
            let bytes_written = engine.encode_audio(handle, frame, dst)?;
            Ok(EncodeOutcome {
                bytes_written,
                is_keyframe: true,
            })
        })
    }

    fn max_encoded_size(&self) -> usize {
        MAX_OPUS_PACKET_SIZE
    }

    fn set_bitrate(&self, bps: u32) -> Result<()> {
        self.session.ensure_open()?;
        OpusConfig::new(self.sample_rate, self.channels)
            .with_bitrate(bps)
            .validate()?;
        self.session
            .with_engine(|engine, handle, _| Ok(engine.set_bitrate(handle, bps)?))?;
        self.bitrate.store(bps, Ordering::Relaxed);
        tracing::debug!(bitrate = bps, "Updated Opus bitrate");
        Ok(())
    }

    /// Every packet already decodes on its own.
    fn request_keyframe(&self) {}

    fn close(&self) {
        self.session.close();
    }

    fn is_closed(&self) -> bool {
        self.session.is_closed()
    }
}

/// Opus decoder
pub struct OpusDecoder {
    session: EngineSession,
    sample_rate: u32,
    channels: u16,
}

impl OpusDecoder {
    /// Open a decoder emitting `sample_rate`/`channels` audio.
    pub fn new(engine: Arc<dyn Engine>, sample_rate: u32, channels: u16) -> Result<Self> {
        validate_opus_layout(sample_rate, channels)?;
        let layout = AudioLayout {
            sample_rate,
            channels,
        };
        let handle = engine.create_decoder(CodecType::Opus, Some(layout))?;
        tracing::debug!(sample_rate, channels, engine = engine.name(), "Created Opus decoder");
        Ok(Self {
            session: EngineSession::new(engine, CodecType::Opus, Role::Decoder, handle, ()),
            sample_rate,
            channels,
        })
    }
}

impl AudioDecoder for OpusDecoder {
    fn codec(&self) -> CodecType {
        CodecType::Opus
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn max_samples_per_frame(&self) -> usize {
        (self.sample_rate * MAX_FRAME_DURATION_MS / 1000) as usize
    }

    fn decode_into(&self, src: &[u8], dst: &mut AudioFrame, timestamp: u64) -> Result<()> {
        self.session.ensure_open()?;
        if src.is_empty() {
            return Err(CodecError::InvalidData("empty Opus packet"));
        }
        let bytes_per_sample = dst.format.bytes_per_sample();
        let frame_bytes = usize::from(self.channels) * bytes_per_sample;
        let required = self.max_samples_per_frame() * frame_bytes;
        if dst.data.capacity() < required {
            return Err(CodecError::BufferTooSmall {
                required,
                available: dst.data.capacity(),
            });
        }

        let original_len = dst.data.len();
        if original_len < required {
            dst.data.resize(required, 0);
        }
        let format = dst.format;
        let decoded = self.session.with_engine(|engine, handle, _| {
            Ok(engine.decode_audio(handle, src, format, &mut dst.data)?)
        });
        let samples = match decoded {
            Ok(samples) => samples,
            Err(e) => {
                dst.data.truncate(original_len);
                return Err(e);
            }
        };

        dst.data.truncate(samples * frame_bytes);
        dst.samples_per_channel = samples;
        dst.sample_rate = self.sample_rate;
        dst.channels = self.channels;
        dst.timestamp = timestamp;
        Ok(())
    }

    fn close(&self) {
        self.session.close();
    }

    fn is_closed(&self) -> bool {
        self.session.is_closed()
    }
}
