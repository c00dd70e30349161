//! Encoder and decoder contracts
//!
//! Every method takes `&self`: instances are shared across threads and
//! serialize engine calls internally. After `close` every operation fails
//! with [`CodecError::EncoderClosed`] or [`CodecError::DecoderClosed`].
//!
//! [`CodecError::EncoderClosed`]: crate::CodecError::EncoderClosed
//! [`CodecError::DecoderClosed`]: crate::CodecError::DecoderClosed

use crate::frame::{AudioFrame, VideoFrame};
use crate::{CodecType, Result};
use bytes::{Bytes, BytesMut};

pub use crate::engine::EncodeOutcome;

/// Video encoder contract
pub trait VideoEncoder: Send + Sync {
    fn codec(&self) -> CodecType;

    /// Configured (width, height); input frames must match.
    fn dimensions(&self) -> (u32, u32);

    /// Encode `frame` into `dst`, which must hold at least
    /// [`max_encoded_size`](Self::max_encoded_size) bytes.
    ///
    /// A pending [`request_keyframe`](Self::request_keyframe) is consumed by
    /// this call and OR-ed with `force_keyframe`.
    fn encode_into(
        &self,
        frame: &VideoFrame,
        dst: &mut [u8],
        force_keyframe: bool,
    ) -> Result<EncodeOutcome>;

    /// Upper bound on one encoded picture.
    fn max_encoded_size(&self) -> usize;

    fn set_bitrate(&self, bps: u32) -> Result<()>;

    fn set_framerate(&self, fps: u32) -> Result<()>;

    /// Make the next encoded picture a keyframe.
    fn request_keyframe(&self);

    /// Release the engine resource. Safe to call any number of times.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Audio encoder contract
pub trait AudioEncoder: Send + Sync {
    fn codec(&self) -> CodecType;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Encode one frame into `dst`, which must hold at least
    /// [`max_encoded_size`](Self::max_encoded_size) bytes.
    fn encode_into(
        &self,
        frame: &AudioFrame,
        dst: &mut [u8],
        force_keyframe: bool,
    ) -> Result<EncodeOutcome>;

    fn max_encoded_size(&self) -> usize;

    fn set_bitrate(&self, bps: u32) -> Result<()>;

    fn request_keyframe(&self);

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Video decoder contract
pub trait VideoDecoder: Send + Sync {
    fn codec(&self) -> CodecType;

    /// Decode one access unit into `dst`, rewriting its size, strides,
    /// format and timestamp. `dst` needs at least three planes.
    ///
    /// [`CodecError::NeedMoreData`](crate::CodecError::NeedMoreData) means the
    /// engine buffered the input without emitting a picture.
    fn decode_into(
        &self,
        src: &[u8],
        dst: &mut VideoFrame,
        timestamp: u64,
        is_keyframe: bool,
    ) -> Result<()>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Audio decoder contract
pub trait AudioDecoder: Send + Sync {
    fn codec(&self) -> CodecType;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Largest frame the decoder can emit, in samples per channel.
    fn max_samples_per_frame(&self) -> usize;

    /// Decode one packet into `dst`, whose sample buffer must have capacity
    /// for [`max_samples_per_frame`](Self::max_samples_per_frame) samples per
    /// channel.
    fn decode_into(&self, src: &[u8], dst: &mut AudioFrame, timestamp: u64) -> Result<()>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// An encoded picture or packet split off a reusable buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub data: Bytes,
    pub is_keyframe: bool,
}

/// Encode into a `BytesMut` scratch buffer, freezing the result.
///
/// The buffer's allocation is reused once earlier chunks are dropped.
fn encode_with_scratch(
    buf: &mut BytesMut,
    max_size: usize,
    encode: impl FnOnce(&mut [u8]) -> Result<EncodeOutcome>,
) -> Result<EncodedChunk> {
    buf.clear();
    buf.resize(max_size, 0);
    match encode(&mut buf[..]) {
        Ok(outcome) => {
            buf.truncate(outcome.bytes_written);
            Ok(EncodedChunk {
                data: buf.split().freeze(),
                is_keyframe: outcome.is_keyframe,
            })
        }
        Err(e) => {
            buf.clear();
            Err(e)
        }
    }
}

pub trait VideoEncoderExt: VideoEncoder {
    /// Encode `frame` into `buf`'s spare capacity and split it off as
    /// [`Bytes`].
    fn encode_chunk(
        &self,
        frame: &VideoFrame,
        buf: &mut BytesMut,
        force_keyframe: bool,
    ) -> Result<EncodedChunk> {
        encode_with_scratch(buf, self.max_encoded_size(), |dst| {
            self.encode_into(frame, dst, force_keyframe)
        })
    }
}

impl<T: VideoEncoder + ?Sized> VideoEncoderExt for T {}

pub trait AudioEncoderExt: AudioEncoder {
    fn encode_chunk(
        &self,
        frame: &AudioFrame,
        buf: &mut BytesMut,
        force_keyframe: bool,
    ) -> Result<EncodedChunk> {
        encode_with_scratch(buf, self.max_encoded_size(), |dst| {
            self.encode_into(frame, dst, force_keyframe)
        })
    }
}

impl<T: AudioEncoder + ?Sized> AudioEncoderExt for T {}
