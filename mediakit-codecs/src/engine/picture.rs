//! Macroblock picture model of the software engine
//!
//! A picture is reduced to the mean Y, U and V of each 16x16 macroblock and
//! rebuilt as flat blocks. Flat content (test patterns, grey frames) survives
//! the round trip exactly.

use crate::engine::{EngineError, EngineResult};
use crate::frame::{PixelFormat, VideoFrame};

const MB_SIZE: usize = 16;
const CHROMA_MB_SIZE: usize = MB_SIZE / 2;

/// Macroblock columns and rows.
pub(crate) fn mb_dims(width: u32, height: u32) -> (usize, usize) {
    (
        (width as usize).div_ceil(MB_SIZE),
        (height as usize).div_ceil(MB_SIZE),
    )
}

/// Bytes produced by [`summarize`].
pub(crate) fn summary_len(width: u32, height: u32) -> usize {
    let (cols, rows) = mb_dims(width, height);
    cols * rows * 3
}

/// Quantizer step for a per-frame byte budget.
pub(crate) fn quantizer(width: u32, height: u32, bitrate: u32, framerate: u32) -> u8 {
    let budget = (u64::from(bitrate) / u64::from(framerate.max(1)) / 8) as usize;
    let needed = summary_len(width, height).max(1);
    let mut q = 1u8;
    while q < 32 && budget < needed * usize::from(q) / 4 {
        q *= 2;
    }
    q
}

fn quantize(value: u32, q: u8) -> u8 {
    let q = u32::from(q.max(1));
    let v = (value / q) * q + q / 2;
    v.min(255) as u8
}

/// Append per-macroblock Y, U, V means of `frame`, quantized by `q`.
///
/// `frame` must already have passed [`VideoFrame::validate`].
pub(crate) fn summarize(frame: &VideoFrame, q: u8, out: &mut Vec<u8>) {
    let (cols, rows) = mb_dims(frame.width, frame.height);
    for mby in 0..rows {
        for mbx in 0..cols {
            let [y, u, v] = match frame.format {
                PixelFormat::I420 | PixelFormat::Nv12 | PixelFormat::Nv21 => {
                    yuv_block_mean(frame, mbx, mby)
                }
                PixelFormat::Rgba => rgb_block_mean(frame, mbx, mby, [0, 1, 2]),
                PixelFormat::Bgra => rgb_block_mean(frame, mbx, mby, [2, 1, 0]),
            };
            out.push(quantize(y, q));
            out.push(quantize(u, q));
            out.push(quantize(v, q));
        }
    }
}

fn luma_span(mb: usize, limit: u32) -> std::ops::Range<usize> {
    let start = mb * MB_SIZE;
    start..(start + MB_SIZE).min(limit as usize)
}

fn chroma_span(mb: usize, limit: u32) -> std::ops::Range<usize> {
    let start = mb * CHROMA_MB_SIZE;
    start..(start + CHROMA_MB_SIZE).min((limit as usize).div_ceil(2))
}

fn yuv_block_mean(frame: &VideoFrame, mbx: usize, mby: usize) -> [u32; 3] {
    let mut sum_y = 0u32;
    let mut count_y = 0u32;
    let luma = &frame.planes[0];
    let stride = frame.strides[0];
    for row in luma_span(mby, frame.height) {
        for col in luma_span(mbx, frame.width) {
            sum_y += u32::from(luma[row * stride + col]);
            count_y += 1;
        }
    }

    let mut sum_u = 0u32;
    let mut sum_v = 0u32;
    let mut count_c = 0u32;
    for row in chroma_span(mby, frame.height) {
        for col in chroma_span(mbx, frame.width) {
            let (u, v) = match frame.format {
                PixelFormat::I420 => (
                    frame.planes[1][row * frame.strides[1] + col],
                    frame.planes[2][row * frame.strides[2] + col],
                ),
                PixelFormat::Nv12 => {
                    let i = row * frame.strides[1] + col * 2;
                    (frame.planes[1][i], frame.planes[1][i + 1])
                }
                _ => {
                    let i = row * frame.strides[1] + col * 2;
                    (frame.planes[1][i + 1], frame.planes[1][i])
                }
            };
            sum_u += u32::from(u);
            sum_v += u32::from(v);
            count_c += 1;
        }
    }

    [
        sum_y / count_y.max(1),
        sum_u / count_c.max(1),
        sum_v / count_c.max(1),
    ]
}

fn rgb_block_mean(frame: &VideoFrame, mbx: usize, mby: usize, order: [usize; 3]) -> [u32; 3] {
    let pixels = &frame.planes[0];
    let stride = frame.strides[0];
    let mut sums = [0i64; 3];
    let mut count = 0i64;
    for row in luma_span(mby, frame.height) {
        for col in luma_span(mbx, frame.width) {
            let i = row * stride + col * 4;
            let r = i64::from(pixels[i + order[0]]);
            let g = i64::from(pixels[i + order[1]]);
            let b = i64::from(pixels[i + order[2]]);
            sums[0] += ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            sums[1] += ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
            sums[2] += ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
            count += 1;
        }
    }
    let count = count.max(1);
    sums.map(|s| (s / count).clamp(0, 255) as u32)
}

/// I420 strides of a tightly packed decoded picture.
pub(crate) fn i420_strides(width: u32) -> [usize; 3] {
    let chroma = (width as usize).div_ceil(2);
    [width as usize, chroma, chroma]
}

/// Check that `planes` can hold a tightly packed I420 picture.
pub(crate) fn check_planes(width: u32, height: u32, planes: &[Vec<u8>]) -> EngineResult<()> {
    if planes.len() < 3 {
        return Err(EngineError::BufferTooSmall {
            required: 3,
            available: planes.len(),
        });
    }
    let strides = i420_strides(width);
    for (plane, stride) in strides.iter().enumerate() {
        let required = stride * PixelFormat::I420.rows(plane, height);
        let available = planes[plane].len();
        if available < required {
            return Err(EngineError::BufferTooSmall {
                required,
                available,
            });
        }
    }
    Ok(())
}

/// Rebuild a flat-block I420 picture from a macroblock summary.
///
/// Callers check the planes with [`check_planes`] first.
pub(crate) fn reconstruct(
    summary: &[u8],
    width: u32,
    height: u32,
    planes: &mut [Vec<u8>],
) -> EngineResult<[usize; 3]> {
    if summary.len() < summary_len(width, height) {
        return Err(EngineError::InvalidBitstream("truncated picture payload"));
    }
    check_planes(width, height, planes)?;
    let strides = i420_strides(width);
    let (cols, rows) = mb_dims(width, height);
    for mby in 0..rows {
        for mbx in 0..cols {
            let base = (mby * cols + mbx) * 3;
            let values = [summary[base], summary[base + 1], summary[base + 2]];
            for row in luma_span(mby, height) {
                let start = row * strides[0];
                let span = luma_span(mbx, width);
                planes[0][start + span.start..start + span.end].fill(values[0]);
            }
            for plane in 1..3 {
                for row in chroma_span(mby, height) {
                    let start = row * strides[plane];
                    let span = chroma_span(mbx, width);
                    planes[plane][start + span.start..start + span.end].fill(values[plane]);
                }
            }
        }
    }
    Ok(strides)
}
