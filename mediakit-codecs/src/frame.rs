//! Raw video and audio frame model
//!
//! Frames own their pixel planes or sample bytes. Encoders read them, decoders
//! rewrite them in place, and pools recycle them (see [`crate::pool`]).

use crate::pool::PoolId;
use crate::{CodecError, Result, MAX_HEIGHT, MAX_WIDTH};
use serde::{Deserialize, Serialize};

/// Raw pixel layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Planar Y, U, V at 4:2:0
    I420,
    /// Y plane followed by interleaved U/V at 4:2:0
    Nv12,
    /// Y plane followed by interleaved V/U at 4:2:0
    Nv21,
    Rgba,
    Bgra,
}

impl PixelFormat {
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::I420 => 3,
            PixelFormat::Nv12 | PixelFormat::Nv21 => 2,
            PixelFormat::Rgba | PixelFormat::Bgra => 1,
        }
    }

    pub fn is_yuv(&self) -> bool {
        matches!(self, PixelFormat::I420 | PixelFormat::Nv12 | PixelFormat::Nv21)
    }

    /// Minimum bytes per row of `plane` for a picture `width` pixels wide.
    pub fn row_bytes(&self, plane: usize, width: u32) -> usize {
        let width = width as usize;
        let chroma = width.div_ceil(2);
        match (self, plane) {
            (PixelFormat::I420, 0) | (PixelFormat::Nv12, 0) | (PixelFormat::Nv21, 0) => width,
            (PixelFormat::I420, _) => chroma,
            (PixelFormat::Nv12, _) | (PixelFormat::Nv21, _) => chroma * 2,
            (PixelFormat::Rgba, _) | (PixelFormat::Bgra, _) => width * 4,
        }
    }

    /// Rows in `plane` for a picture `height` pixels tall.
    pub fn rows(&self, plane: usize, height: u32) -> usize {
        let height = height as usize;
        if plane > 0 && self.is_yuv() {
            height.div_ceil(2)
        } else {
            height
        }
    }

    /// Total bytes of a tightly packed picture.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        (0..self.plane_count())
            .map(|p| self.row_bytes(p, width) * self.rows(p, height))
            .sum()
    }
}

/// Interleaved audio sample encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit little-endian
    S16,
    /// 32-bit float little-endian
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Raw video frame
///
/// Plane and stride counts follow [`PixelFormat::plane_count`]; each plane
/// holds at least `stride * rows` bytes. The timestamp runs on a 90 kHz clock.
#[derive(Debug)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Vec<u8>>,
    pub strides: Vec<usize>,
    pub timestamp: u64,
    pub keyframe: bool,
    pool_id: Option<PoolId>,
}

impl VideoFrame {
    /// Allocate a zeroed, tightly packed frame.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let count = format.plane_count();
        let mut planes = Vec::with_capacity(count);
        let mut strides = Vec::with_capacity(count);
        for plane in 0..count {
            let stride = format.row_bytes(plane, width);
            strides.push(stride);
            planes.push(vec![0u8; stride * format.rows(plane, height)]);
        }
        Self {
            width,
            height,
            format,
            planes,
            strides,
            timestamp: 0,
            keyframe: false,
            pool_id: None,
        }
    }

    /// Wrap existing plane buffers, checking the layout invariant.
    pub fn from_planes(
        width: u32,
        height: u32,
        format: PixelFormat,
        planes: Vec<Vec<u8>>,
        strides: Vec<usize>,
    ) -> Result<Self> {
        let frame = Self {
            width,
            height,
            format,
            planes,
            strides,
            timestamp: 0,
            keyframe: false,
            pool_id: None,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Check dimensions and the plane/stride layout against the pixel format.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::InvalidDimensions(self.width, self.height));
        }
        if self.width > MAX_WIDTH || self.height > MAX_HEIGHT {
            return Err(CodecError::InvalidDimensions(self.width, self.height));
        }
        let count = self.format.plane_count();
        if self.planes.len() != count || self.strides.len() != count {
            return Err(CodecError::InvalidFrame("plane count does not match pixel format"));
        }
        for plane in 0..count {
            let stride = self.strides[plane];
            if stride < self.format.row_bytes(plane, self.width) {
                return Err(CodecError::InvalidFrame("stride shorter than row"));
            }
            let needed = stride
                .checked_mul(self.format.rows(plane, self.height))
                .ok_or(CodecError::Overflow)?;
            if self.planes[plane].len() < needed {
                return Err(CodecError::InvalidFrame("plane buffer shorter than stride * rows"));
            }
        }
        Ok(())
    }

    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        self.planes.get(index).map(Vec::as_slice)
    }

    pub fn plane_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.planes.get_mut(index).map(Vec::as_mut_slice)
    }

    /// Row `row` of `plane`, trimmed to the visible width.
    pub fn row(&self, plane: usize, row: usize) -> Option<&[u8]> {
        let stride = *self.strides.get(plane)?;
        let start = stride.checked_mul(row)?;
        let len = self.format.row_bytes(plane, self.width);
        self.planes.get(plane)?.get(start..start + len)
    }

    /// Fill with a flat YUV colour. RGB formats get the BT.601 equivalent.
    pub fn fill_yuv(&mut self, y: u8, u: u8, v: u8) {
        match self.format {
            PixelFormat::I420 => {
                self.fill_plane(0, &[y]);
                self.fill_plane(1, &[u]);
                self.fill_plane(2, &[v]);
            }
            PixelFormat::Nv12 => {
                self.fill_plane(0, &[y]);
                self.fill_plane(1, &[u, v]);
            }
            PixelFormat::Nv21 => {
                self.fill_plane(0, &[y]);
                self.fill_plane(1, &[v, u]);
            }
            PixelFormat::Rgba => {
                let (r, g, b) = yuv_to_rgb(y, u, v);
                self.fill_plane(0, &[r, g, b, 255]);
            }
            PixelFormat::Bgra => {
                let (r, g, b) = yuv_to_rgb(y, u, v);
                self.fill_plane(0, &[b, g, r, 255]);
            }
        }
    }

    /// Fill with neutral grey of the given luma.
    pub fn fill_gray(&mut self, luma: u8) {
        self.fill_yuv(luma, 128, 128);
    }

    fn fill_plane(&mut self, plane: usize, pattern: &[u8]) {
        let row_bytes = self.format.row_bytes(plane, self.width);
        let rows = self.format.rows(plane, self.height);
        let stride = self.strides.get(plane).copied().unwrap_or(row_bytes);
        let Some(buf) = self.planes.get_mut(plane) else {
            return;
        };
        for row in 0..rows {
            let start = row * stride;
            let Some(line) = buf.get_mut(start..start + row_bytes) else {
                break;
            };
            for (dst, src) in line.iter_mut().zip(pattern.iter().cycle()) {
                *dst = *src;
            }
        }
    }

    /// Copy pixels and metadata from `src` without reallocating.
    ///
    /// Formats must match and every destination plane must be large enough for
    /// `src`'s dimensions at this frame's strides.
    pub fn copy_from(&mut self, src: &VideoFrame) -> Result<()> {
        src.validate()?;
        if src.format != self.format || self.planes.len() != src.planes.len() {
            return Err(CodecError::InvalidFrame("pixel format mismatch"));
        }
        for plane in 0..src.format.plane_count() {
            let row_bytes = src.format.row_bytes(plane, src.width);
            let rows = src.format.rows(plane, src.height);
            let dst_stride = self.strides[plane].max(row_bytes);
            let required = dst_stride * rows;
            let available = self.planes[plane].len();
            if available < required {
                return Err(CodecError::BufferTooSmall {
                    required,
                    available,
                });
            }
        }
        for plane in 0..src.format.plane_count() {
            let row_bytes = src.format.row_bytes(plane, src.width);
            let rows = src.format.rows(plane, src.height);
            let dst_stride = self.strides[plane].max(row_bytes);
            let src_stride = src.strides[plane];
            for row in 0..rows {
                let s = row * src_stride;
                let d = row * dst_stride;
                self.planes[plane][d..d + row_bytes]
                    .copy_from_slice(&src.planes[plane][s..s + row_bytes]);
            }
            self.strides[plane] = dst_stride;
        }
        self.width = src.width;
        self.height = src.height;
        self.timestamp = src.timestamp;
        self.keyframe = src.keyframe;
        Ok(())
    }

    pub fn pool_id(&self) -> Option<PoolId> {
        self.pool_id
    }

    pub(crate) fn set_pool_id(&mut self, id: Option<PoolId>) {
        self.pool_id = id;
    }
}

impl Clone for VideoFrame {
    /// Clones are detached: they never belong to the source frame's pool.
    fn clone(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            format: self.format,
            planes: self.planes.clone(),
            strides: self.strides.clone(),
            timestamp: self.timestamp,
            keyframe: self.keyframe,
            pool_id: None,
        }
    }
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    (
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    )
}

/// Raw interleaved audio frame
///
/// `data.len() == samples_per_channel * channels * format.bytes_per_sample()`.
#[derive(Debug)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub data: Vec<u8>,
    pub samples_per_channel: usize,
    /// Presentation time in samples at `sample_rate`
    pub timestamp: u64,
    pool_id: Option<PoolId>,
}

impl AudioFrame {
    /// Allocate a silent frame.
    pub fn new(
        sample_rate: u32,
        channels: u16,
        format: SampleFormat,
        samples_per_channel: usize,
    ) -> Self {
        let len = samples_per_channel * usize::from(channels) * format.bytes_per_sample();
        Self {
            sample_rate,
            channels,
            format,
            data: vec![0u8; len],
            samples_per_channel,
            timestamp: 0,
            pool_id: None,
        }
    }

    /// Build an S16 frame from interleaved samples.
    pub fn from_i16(sample_rate: u32, channels: u16, samples: &[i16]) -> Result<Self> {
        let per_channel = samples_per_channel(samples.len(), channels)?;
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let frame = Self {
            sample_rate,
            channels,
            format: SampleFormat::S16,
            data,
            samples_per_channel: per_channel,
            timestamp: 0,
            pool_id: None,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Build an F32 frame from interleaved samples.
    pub fn from_f32(sample_rate: u32, channels: u16, samples: &[f32]) -> Result<Self> {
        let per_channel = samples_per_channel(samples.len(), channels)?;
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let frame = Self {
            sample_rate,
            channels,
            format: SampleFormat::F32,
            data,
            samples_per_channel: per_channel,
            timestamp: 0,
            pool_id: None,
        };
        frame.validate()?;
        Ok(frame)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(CodecError::InvalidFrame("sample rate is zero"));
        }
        if self.channels == 0 {
            return Err(CodecError::InvalidFrame("channel count is zero"));
        }
        if self.samples_per_channel == 0 {
            return Err(CodecError::InvalidFrame("empty audio frame"));
        }
        let expected = self
            .samples_per_channel
            .checked_mul(usize::from(self.channels))
            .and_then(|n| n.checked_mul(self.format.bytes_per_sample()))
            .ok_or(CodecError::Overflow)?;
        if self.data.len() != expected {
            return Err(CodecError::InvalidFrame("sample buffer length mismatch"));
        }
        Ok(())
    }

    /// Total interleaved samples.
    pub fn sample_count(&self) -> usize {
        self.samples_per_channel * usize::from(self.channels)
    }

    /// Interleaved sample `index` converted to i16.
    pub fn sample_i16(&self, index: usize) -> Option<i16> {
        match self.format {
            SampleFormat::S16 => {
                let bytes = self.data.get(index * 2..index * 2 + 2)?;
                Some(i16::from_le_bytes([bytes[0], bytes[1]]))
            }
            SampleFormat::F32 => self.sample_f32(index).map(f32_to_i16),
        }
    }

    /// Interleaved sample `index` converted to f32 in [-1, 1].
    pub fn sample_f32(&self, index: usize) -> Option<f32> {
        match self.format {
            SampleFormat::S16 => self.sample_i16(index).map(i16_to_f32),
            SampleFormat::F32 => {
                let bytes = self.data.get(index * 4..index * 4 + 4)?;
                Some(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
        }
    }

    /// Duration in microseconds.
    pub fn duration_us(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples_per_channel as u64 * 1_000_000 / u64::from(self.sample_rate)
    }

    pub fn pool_id(&self) -> Option<PoolId> {
        self.pool_id
    }

    pub(crate) fn set_pool_id(&mut self, id: Option<PoolId>) {
        self.pool_id = id;
    }
}

impl Clone for AudioFrame {
    fn clone(&self) -> Self {
        Self {
            sample_rate: self.sample_rate,
            channels: self.channels,
            format: self.format,
            data: self.data.clone(),
            samples_per_channel: self.samples_per_channel,
            timestamp: self.timestamp,
            pool_id: None,
        }
    }
}

fn samples_per_channel(total: usize, channels: u16) -> Result<usize> {
    if channels == 0 {
        return Err(CodecError::InvalidFrame("channel count is zero"));
    }
    let channels = usize::from(channels);
    if total % channels != 0 {
        return Err(CodecError::InvalidFrame("samples not a multiple of channel count"));
    }
    Ok(total / channels)
}

pub(crate) fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_i420_layout() {
        let frame = VideoFrame::new(320, 240, PixelFormat::I420);
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(frame.strides, vec![320, 160, 160]);
        assert_eq!(frame.planes[0].len(), 320 * 240);
        assert_eq!(frame.planes[1].len(), 160 * 120);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_odd_dimensions_round_chroma_up() {
        let frame = VideoFrame::new(33, 17, PixelFormat::I420);
        assert_eq!(frame.strides, vec![33, 17, 17]);
        assert_eq!(frame.planes[1].len(), 17 * 9);
        assert_eq!(PixelFormat::I420.frame_size(33, 17), 33 * 17 + 2 * 17 * 9);
    }

    #[test]
    fn test_nv12_and_rgba_layout() {
        let nv12 = VideoFrame::new(64, 48, PixelFormat::Nv12);
        assert_eq!(nv12.strides, vec![64, 64]);
        assert_eq!(nv12.planes[1].len(), 64 * 24);

        let rgba = VideoFrame::new(64, 48, PixelFormat::Rgba);
        assert_eq!(rgba.strides, vec![256]);
        assert_eq!(rgba.planes[0].len(), 256 * 48);
    }

    #[test]
    fn test_from_planes_rejects_short_plane() {
        let result = VideoFrame::from_planes(
            16,
            16,
            PixelFormat::I420,
            vec![vec![0; 16 * 16], vec![0; 8 * 8], vec![0; 10]],
            vec![16, 8, 8],
        );
        assert!(matches!(result, Err(CodecError::InvalidFrame(_))));
    }

    #[test]
    fn test_from_planes_rejects_wrong_plane_count() {
        let result = VideoFrame::from_planes(
            16,
            16,
            PixelFormat::I420,
            vec![vec![0; 256]],
            vec![16],
        );
        assert!(matches!(result, Err(CodecError::InvalidFrame(_))));
    }

    #[test]
    fn test_validate_zero_dimensions() {
        let frame = VideoFrame::new(0, 240, PixelFormat::I420);
        assert!(matches!(
            frame.validate(),
            Err(CodecError::InvalidDimensions(0, 240))
        ));
    }

    #[test]
    fn test_fill_gray_nv21() {
        let mut frame = VideoFrame::new(4, 4, PixelFormat::Nv21);
        frame.fill_yuv(50, 60, 70);
        assert!(frame.planes[0].iter().all(|&b| b == 50));
        assert_eq!(&frame.planes[1][..4], &[70, 60, 70, 60]);
    }

    #[test]
    fn test_fill_respects_padded_stride() {
        let mut frame = VideoFrame::from_planes(
            4,
            2,
            PixelFormat::I420,
            vec![vec![0; 16], vec![0; 8], vec![0; 8]],
            vec![8, 8, 8],
        )
        .unwrap();
        frame.fill_gray(200);
        assert_eq!(&frame.planes[0][..4], &[200; 4]);
        assert_eq!(&frame.planes[0][4..8], &[0; 4]);
        assert_eq!(frame.row(0, 1).unwrap(), &[200; 4]);
    }

    #[test]
    fn test_copy_from() {
        let mut src = VideoFrame::new(32, 32, PixelFormat::I420);
        src.fill_yuv(10, 20, 30);
        src.timestamp = 9000;
        src.keyframe = true;

        let mut dst = VideoFrame::new(64, 64, PixelFormat::I420);
        dst.copy_from(&src).unwrap();
        assert_eq!((dst.width, dst.height), (32, 32));
        assert_eq!(dst.timestamp, 9000);
        assert!(dst.keyframe);
        assert_eq!(dst.row(1, 0).unwrap(), &[20; 16]);
        assert!(dst.validate().is_ok());
    }

    #[test]
    fn test_copy_from_too_small() {
        let src = VideoFrame::new(64, 64, PixelFormat::I420);
        let mut dst = VideoFrame::new(32, 32, PixelFormat::I420);
        assert!(matches!(
            dst.copy_from(&src),
            Err(CodecError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_clone_is_detached_from_pool() {
        let mut frame = VideoFrame::new(8, 8, PixelFormat::I420);
        frame.set_pool_id(Some(PoolId::next()));
        assert!(frame.clone().pool_id().is_none());
    }

    #[test]
    fn test_audio_frame_invariant() {
        let frame = AudioFrame::new(48000, 2, SampleFormat::S16, 960);
        assert_eq!(frame.data.len(), 960 * 2 * 2);
        assert!(frame.validate().is_ok());
        assert_eq!(frame.duration_us(), 20_000);

        let frame = AudioFrame::new(48000, 2, SampleFormat::F32, 960);
        assert_eq!(frame.data.len(), 960 * 2 * 4);
    }

    #[test]
    fn test_audio_from_i16() {
        let frame = AudioFrame::from_i16(16000, 2, &[1, -1, 300, -300]).unwrap();
        assert_eq!(frame.samples_per_channel, 2);
        assert_eq!(frame.sample_i16(2), Some(300));
        assert_eq!(frame.sample_i16(3), Some(-300));
        assert_eq!(frame.sample_i16(4), None);
    }

    #[test]
    fn test_audio_from_i16_rejects_partial_channel() {
        assert!(AudioFrame::from_i16(16000, 2, &[1, 2, 3]).is_err());
        assert!(AudioFrame::from_i16(16000, 0, &[1, 2]).is_err());
    }

    #[test]
    fn test_audio_f32_conversion() {
        let frame = AudioFrame::from_f32(48000, 1, &[0.5, -1.0]).unwrap();
        assert_eq!(frame.sample_i16(0), Some(16383));
        assert_eq!(frame.sample_i16(1), Some(-32767));
        let back = frame.sample_f32(0).unwrap();
        assert!((back - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_audio_validate_length_mismatch() {
        let mut frame = AudioFrame::new(48000, 1, SampleFormat::S16, 480);
        frame.data.pop();
        assert!(matches!(frame.validate(), Err(CodecError::InvalidFrame(_))));
    }
}
