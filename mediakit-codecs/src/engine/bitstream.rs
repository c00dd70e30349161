//! Bitstream framing of the software engine
//!
//! Each codec wraps the macroblock payload in its real container syntax
//! (Annex B NAL units, VP8/VP9 frame tags, AV1 OBUs, Opus TOC bytes) so the
//! output passes the same inspection as native engine output.

use crate::annexb::{self, nal_type, START_CODE};
use crate::engine::{EngineError, EngineResult};

/// One parsed compressed picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ParsedFrame<'a> {
    pub keyframe: bool,
    /// Coded size, carried by keyframes
    pub dims: Option<(u32, u32)>,
    pub payload: &'a [u8],
}

// ---------------------------------------------------------------------------
// H.264

const RBSP_STOP_BIT: u8 = 0x80;
const H264_LEVEL_3_1: u8 = 31;
const PPS_BODY: [u8; 3] = [0xce, 0x38, 0x80];

fn push_nal(out: &mut Vec<u8>, header: u8, body: &[u8]) {
    out.extend_from_slice(&START_CODE);
    out.push(header);
    annexb::escape_into(body, out);
    out.push(RBSP_STOP_BIT);
}

/// Write one H.264 access unit. Keyframes carry SPS and PPS ahead of an IDR
/// slice.
pub(crate) fn write_h264(
    out: &mut Vec<u8>,
    keyframe: bool,
    profile: (u8, u8),
    dims: (u32, u32),
    payload: &[u8],
) {
    out.clear();
    if keyframe {
        let (w, h) = (dims.0 as u16, dims.1 as u16);
        let mut sps = [0u8; 7];
        sps[0] = profile.0;
        sps[1] = profile.1;
        sps[2] = H264_LEVEL_3_1;
        sps[3..5].copy_from_slice(&w.to_be_bytes());
        sps[5..7].copy_from_slice(&h.to_be_bytes());
        push_nal(out, 0x67, &sps);
        out.extend_from_slice(&START_CODE);
        out.push(0x68);
        out.extend_from_slice(&PPS_BODY);
        push_nal(out, 0x65, payload);
    } else {
        push_nal(out, 0x41, payload);
    }
}

/// Units found in one H.264 access unit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct H264Units {
    /// Coded size from an SPS
    pub dims: Option<(u32, u32)>,
    pub has_pps: bool,
    /// Slice present, and whether it is IDR
    pub slice: Option<bool>,
}

/// Scan an Annex B access unit. The slice payload, unescaped, is left in
/// `payload`.
pub(crate) fn parse_h264(
    data: &[u8],
    rbsp: &mut Vec<u8>,
    payload: &mut Vec<u8>,
) -> EngineResult<H264Units> {
    if annexb::leading_start_code(data).is_none() {
        return Err(EngineError::InvalidBitstream("missing Annex B start code"));
    }
    let mut units = H264Units::default();
    for nal in annexb::AnnexBNalIter::new(data) {
        let Some((_, body)) = nal.split_first() else {
            continue;
        };
        match annexb::nal_unit_type(nal) {
            Some(nal_type::SPS) => {
                annexb::unescape_into(body, rbsp);
                if rbsp.len() < 7 {
                    return Err(EngineError::InvalidBitstream("truncated SPS"));
                }
                let w = u16::from_be_bytes([rbsp[3], rbsp[4]]);
                let h = u16::from_be_bytes([rbsp[5], rbsp[6]]);
                if w == 0 || h == 0 {
                    return Err(EngineError::InvalidBitstream("SPS with zero size"));
                }
                units.dims = Some((u32::from(w), u32::from(h)));
            }
            Some(nal_type::PPS) => units.has_pps = true,
            Some(t @ (nal_type::IDR_SLICE | nal_type::NON_IDR_SLICE)) => {
                annexb::unescape_into(body, payload);
                if payload.last() == Some(&RBSP_STOP_BIT) {
                    payload.pop();
                }
                units.slice = Some(t == nal_type::IDR_SLICE);
            }
            _ => {}
        }
    }
    Ok(units)
}

// ---------------------------------------------------------------------------
// VP8

const VP8_SYNC: [u8; 3] = [0x9d, 0x01, 0x2a];
const VP8_DIMENSION_MASK: u16 = 0x3fff;

pub(crate) fn write_vp8(out: &mut Vec<u8>, keyframe: bool, dims: (u32, u32), payload: &[u8]) {
    out.clear();
    let partition = (payload.len() as u32) & 0x7_ffff;
    let tag = u32::from(!keyframe) | (1 << 4) | (partition << 5);
    out.extend_from_slice(&tag.to_le_bytes()[..3]);
    if keyframe {
        out.extend_from_slice(&VP8_SYNC);
        out.extend_from_slice(&(dims.0 as u16 & VP8_DIMENSION_MASK).to_le_bytes());
        out.extend_from_slice(&(dims.1 as u16 & VP8_DIMENSION_MASK).to_le_bytes());
    }
    out.extend_from_slice(payload);
}

pub(crate) fn parse_vp8(data: &[u8]) -> EngineResult<ParsedFrame<'_>> {
    let tag = data
        .get(..3)
        .ok_or(EngineError::InvalidBitstream("truncated VP8 frame tag"))?;
    let keyframe = tag[0] & 0x01 == 0;
    if !keyframe {
        return Ok(ParsedFrame {
            keyframe,
            dims: None,
            payload: &data[3..],
        });
    }
    let header = data
        .get(3..10)
        .ok_or(EngineError::InvalidBitstream("truncated VP8 keyframe header"))?;
    if header[..3] != VP8_SYNC {
        return Err(EngineError::InvalidBitstream("bad VP8 sync code"));
    }
    let w = u16::from_le_bytes([header[3], header[4]]) & VP8_DIMENSION_MASK;
    let h = u16::from_le_bytes([header[5], header[6]]) & VP8_DIMENSION_MASK;
    if w == 0 || h == 0 {
        return Err(EngineError::InvalidBitstream("VP8 keyframe with zero size"));
    }
    Ok(ParsedFrame {
        keyframe,
        dims: Some((u32::from(w), u32::from(h))),
        payload: &data[10..],
    })
}

// ---------------------------------------------------------------------------
// VP9

const VP9_SYNC: [u8; 3] = [0x49, 0x83, 0x42];
const VP9_FRAME_MARKER: u8 = 0b10;

pub(crate) fn write_vp9(
    out: &mut Vec<u8>,
    keyframe: bool,
    profile: u8,
    dims: (u32, u32),
    payload: &[u8],
) {
    out.clear();
    let marker = (VP9_FRAME_MARKER << 6)
        | ((profile & 1) << 5)
        | (((profile >> 1) & 1) << 4)
        | (u8::from(!keyframe) << 2)
        | (1 << 1);
    out.push(marker);
    if keyframe {
        out.extend_from_slice(&VP9_SYNC);
        out.extend_from_slice(&((dims.0 - 1) as u16).to_be_bytes());
        out.extend_from_slice(&((dims.1 - 1) as u16).to_be_bytes());
    }
    out.extend_from_slice(payload);
}

pub(crate) fn parse_vp9(data: &[u8]) -> EngineResult<ParsedFrame<'_>> {
    let marker = *data
        .first()
        .ok_or(EngineError::InvalidBitstream("empty VP9 frame"))?;
    if marker >> 6 != VP9_FRAME_MARKER {
        return Err(EngineError::InvalidBitstream("bad VP9 frame marker"));
    }
    let keyframe = marker & (1 << 2) == 0;
    if !keyframe {
        return Ok(ParsedFrame {
            keyframe,
            dims: None,
            payload: &data[1..],
        });
    }
    let header = data
        .get(1..8)
        .ok_or(EngineError::InvalidBitstream("truncated VP9 keyframe header"))?;
    if header[..3] != VP9_SYNC {
        return Err(EngineError::InvalidBitstream("bad VP9 sync code"));
    }
    let w = u32::from(u16::from_be_bytes([header[3], header[4]])) + 1;
    let h = u32::from(u16::from_be_bytes([header[5], header[6]])) + 1;
    Ok(ParsedFrame {
        keyframe,
        dims: Some((w, h)),
        payload: &data[8..],
    })
}

// ---------------------------------------------------------------------------
// AV1

mod obu_type {
    pub const SEQUENCE_HEADER: u8 = 1;
    pub const TEMPORAL_DELIMITER: u8 = 2;
    pub const FRAME: u8 = 6;
}

const OBU_HAS_SIZE_FIELD: u8 = 0x02;

fn push_leb128(out: &mut Vec<u8>, mut value: usize) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_leb128(data: &[u8]) -> Option<(usize, usize)> {
    let mut value = 0usize;
    for (i, &byte) in data.iter().take(8).enumerate() {
        value |= usize::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

fn push_obu(out: &mut Vec<u8>, kind: u8, parts: &[&[u8]]) {
    out.push((kind << 3) | OBU_HAS_SIZE_FIELD);
    push_leb128(out, parts.iter().map(|p| p.len()).sum());
    for part in parts {
        out.extend_from_slice(part);
    }
}

pub(crate) fn write_av1(out: &mut Vec<u8>, keyframe: bool, dims: (u32, u32), payload: &[u8]) {
    out.clear();
    push_obu(out, obu_type::TEMPORAL_DELIMITER, &[]);
    if keyframe {
        let w = ((dims.0 - 1) as u16).to_be_bytes();
        let h = ((dims.1 - 1) as u16).to_be_bytes();
        push_obu(out, obu_type::SEQUENCE_HEADER, &[&[0], &w, &h]);
    }
    push_obu(out, obu_type::FRAME, &[&[u8::from(!keyframe)], payload]);
}

pub(crate) fn parse_av1(data: &[u8]) -> EngineResult<ParsedFrame<'_>> {
    let mut dims = None;
    let mut frame = None;
    let mut pos = 0;
    while pos < data.len() {
        let header = data[pos];
        if header & 0x80 != 0 || header & OBU_HAS_SIZE_FIELD == 0 {
            return Err(EngineError::InvalidBitstream("unsupported OBU header"));
        }
        let (size, leb_len) = read_leb128(&data[pos + 1..])
            .ok_or(EngineError::InvalidBitstream("truncated OBU size"))?;
        let start = pos + 1 + leb_len;
        let body = start
            .checked_add(size)
            .and_then(|end| data.get(start..end))
            .ok_or(EngineError::InvalidBitstream("OBU overruns buffer"))?;
        match (header >> 3) & 0x0f {
            obu_type::SEQUENCE_HEADER => {
                if body.len() < 5 {
                    return Err(EngineError::InvalidBitstream("truncated sequence header"));
                }
                let w = u32::from(u16::from_be_bytes([body[1], body[2]])) + 1;
                let h = u32::from(u16::from_be_bytes([body[3], body[4]])) + 1;
                dims = Some((w, h));
            }
            obu_type::FRAME => {
                let (&frame_type, payload) = body
                    .split_first()
                    .ok_or(EngineError::InvalidBitstream("empty frame OBU"))?;
                frame = Some((frame_type == 0, payload));
            }
            _ => {}
        }
        pos = start + size;
    }
    let (keyframe, payload) = frame.ok_or(EngineError::NeedMoreData)?;
    Ok(ParsedFrame {
        keyframe,
        dims,
        payload,
    })
}

// ---------------------------------------------------------------------------
// Opus

/// TOC byte for a single-frame packet, `None` for durations Opus cannot code.
pub(crate) fn opus_toc(duration: u32, stereo: bool) -> Option<u8> {
    let config = match duration {
        25 => 28,
        50 => 29,
        100 => 30,
        200 => 31,
        // SILK wideband carries the long frames.
        400 => 10,
        600 => 11,
        _ => return None,
    };
    Some((config << 3) | (u8::from(stereo) << 2))
}

/// Frame duration (100 µs units) and stereo flag of a TOC byte.
pub(crate) fn parse_opus_toc(toc: u8) -> (u32, bool) {
    let config = toc >> 3;
    let duration = match config {
        0..=11 => [100, 200, 400, 600][usize::from(config % 4)],
        12..=15 => [100, 200][usize::from(config % 2)],
        _ => [25, 50, 100, 200][usize::from(config % 4)],
    };
    (duration, toc & 0x04 != 0)
}
