//! H.264 NAL unit framing
//!
//! Annex B delimits NAL units with start codes (`00 00 01` or `00 00 00 01`).
//! AVCC prefixes each NAL unit with its length as a 4-byte big-endian
//! integer. Helpers here convert between the two into caller-owned buffers so
//! a warmed-up buffer is reused across calls.

/// H.264 NAL unit type constants.
pub mod nal_type {
    /// Non-IDR coded slice (P/B frame)
    pub const NON_IDR_SLICE: u8 = 1;
    /// IDR coded slice (keyframe)
    pub const IDR_SLICE: u8 = 5;
    /// Supplemental enhancement information
    pub const SEI: u8 = 6;
    /// Sequence Parameter Set
    pub const SPS: u8 = 7;
    /// Picture Parameter Set
    pub const PPS: u8 = 8;
    /// Access unit delimiter
    pub const AUD: u8 = 9;
}

/// Four-byte Annex B start code
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// NAL unit type from the first header byte.
#[inline]
pub fn nal_unit_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1f)
}

/// Find the next Annex B start code in `data` at or after `from`.
///
/// Returns the position and length (3 or 4) of the start code. The 4-byte form
/// is checked first so `00 00 00 01` is not reported as a 3-byte code one byte
/// late.
pub fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    if data.len() < 3 || from >= data.len() {
        return None;
    }

    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
        }
        i += 1;
    }
    None
}

/// Length of the start code `data` begins with, if any.
pub fn leading_start_code(data: &[u8]) -> Option<usize> {
    if data.starts_with(&START_CODE) {
        Some(4)
    } else if data.starts_with(&[0x00, 0x00, 0x01]) {
        Some(3)
    } else {
        None
    }
}

/// Iterator over NAL units including their leading start code.
pub(crate) struct AnnexBUnitIter<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> AnnexBUnitIter<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }
}

impl<'a> Iterator for AnnexBUnitIter<'a> {
    /// (NAL type, start code + NAL bytes)
    type Item = (Option<u8>, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (pos, len) = find_start_code(self.data, self.cursor)?;
        let nal_start = pos + len;
        let nal_end =
            find_start_code(self.data, nal_start).map_or(self.data.len(), |(next, _)| next);
        self.cursor = nal_end;
        Some((
            nal_unit_type(&self.data[nal_start..nal_end]),
            &self.data[pos..nal_end],
        ))
    }
}

/// Iterator over NAL unit payloads (without start codes) in Annex B data.
pub struct AnnexBNalIter<'a> {
    units: AnnexBUnitIter<'a>,
}

impl<'a> AnnexBNalIter<'a> {
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            units: AnnexBUnitIter::new(data),
        }
    }
}

impl<'a> Iterator for AnnexBNalIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let (_, unit) = self.units.next()?;
        let skip = leading_start_code(unit).unwrap_or(0);
        Some(&unit[skip..])
    }
}

/// Whether `data` parses as a run of 4-byte length-prefixed NAL units that
/// exactly covers the buffer.
pub fn is_avcc(data: &[u8]) -> bool {
    if data.len() < 5 {
        return false;
    }
    let mut pos = 0;
    while pos < data.len() {
        let Some(prefix) = data.get(pos..pos + 4) else {
            return false;
        };
        let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if len == 0 {
            return false;
        }
        match pos.checked_add(4).and_then(|p| p.checked_add(len)) {
            Some(end) if end <= data.len() => pos = end,
            _ => return false,
        }
    }
    true
}

/// Rewrite AVCC `data` as Annex B into `out` (cleared first).
///
/// Returns `false`, leaving `out` empty, if a length prefix runs past the end
/// of the buffer.
pub fn avcc_to_annexb_into(data: &[u8], out: &mut Vec<u8>) -> bool {
    out.clear();
    let mut pos = 0;
    while pos < data.len() {
        let Some(prefix) = data.get(pos..pos + 4) else {
            out.clear();
            return false;
        };
        let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        let start = pos + 4;
        let Some(nal) = start.checked_add(len).and_then(|end| data.get(start..end)) else {
            out.clear();
            return false;
        };
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(nal);
        pos = start + len;
    }
    true
}

/// Rewrite Annex B data framed with 4-byte start codes as AVCC in place.
///
/// Each `00 00 00 01` becomes the following NAL unit's big-endian length, so
/// the buffer length does not change. Returns `false`, leaving `data`
/// untouched, if the buffer does not start with a 4-byte start code or
/// contains 3-byte start codes.
pub fn annexb_to_avcc_in_place(data: &mut [u8]) -> bool {
    if !data.starts_with(&START_CODE) {
        return false;
    }
    // Validate first so a failure leaves the buffer as it was.
    let mut cursor = 0;
    while let Some((pos, len)) = find_start_code(data, cursor) {
        if len != 4 {
            return false;
        }
        cursor = pos + len;
    }

    let mut cursor = 0;
    while let Some((pos, _)) = find_start_code(data, cursor) {
        let nal_start = pos + 4;
        let nal_end = find_start_code(data, nal_start).map_or(data.len(), |(next, _)| next);
        let len = (nal_end - nal_start) as u32;
        data[pos..nal_start].copy_from_slice(&len.to_be_bytes());
        cursor = nal_end;
    }
    true
}

/// Append `payload` to `out` with emulation-prevention bytes inserted, so the
/// result never contains `00 00 0x` for x <= 3.
pub fn escape_into(payload: &[u8], out: &mut Vec<u8>) {
    let mut zeros = 0;
    for &byte in payload {
        if zeros >= 2 && byte <= 3 {
            out.push(0x03);
            zeros = 0;
        }
        out.push(byte);
        if byte == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
}

/// Write `payload` with emulation-prevention removed into `out` (cleared first).
pub fn unescape_into(payload: &[u8], out: &mut Vec<u8>) {
    out.clear();
    let mut zeros = 0;
    for &byte in payload {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        out.push(byte);
        if byte == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
}

/// Whether the Annex B data contains an IDR slice.
pub fn is_h264_keyframe(data: &[u8]) -> bool {
    AnnexBNalIter::new(data).any(|nal| nal_unit_type(nal) == Some(nal_type::IDR_SLICE))
}
