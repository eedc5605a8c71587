//! Escape-coded frame codec used by the BSL protocol.
//!
//! A frame is a byte sequence delimited by the sentinel `0x7E` at both ends. The payload carries
//! a user message followed by a big-endian 16-bit CRC of that message; both the message and the
//! CRC are escape-encoded together. This is a known deviation from standard HDLC, where the CRC
//! is never itself escaped.

use thiserror::Error;

const FLAG_BYTE: u8 = 0x7E;
const ESCAPE_BYTE: u8 = 0x7D;
const ESCAPE_XOR: u8 = 0x20;

/// Which CRC algorithm frames an exchange. The ROM bootloader and the loaded FDL stages were
/// implemented independently and disagree on this, so the session orchestrator tracks the
/// current mode and flips it exactly once, at FDL1 handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcMode {
    /// XMODEM-style CRC16, used before any FDL stage is running.
    Boot,
    /// 16-bit ones'-complement running sum, used once an FDL stage is running.
    Fdl,
    /// CRC disabled: the field is written as `0x0000` and ignored on decode.
    Disabled,
}

/// How a CRC mismatch on decode should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcPolicy {
    /// Fail with [`FrameError::CrcMismatch`].
    Strict,
    /// Return `Ok(None)` instead of failing, for speculative reads (e.g. during a baud change).
    Tolerant,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is missing both sentinel bytes")]
    MissingSentinels,
    #[error("frame is shorter than the minimum 2-byte CRC trailer")]
    Truncated,
    #[error("invalid escape sequence 0x{0:02x} while decoding frame")]
    InvalidEscape(u8),
    #[error("frame ended with a dangling escape byte")]
    DanglingEscape,
    #[error("frame CRC mismatch: expected 0x{expected:04x}, found 0x{found:04x}")]
    CrcMismatch { expected: u16, found: u16 },
}

/// The CRC-16/XMODEM algorithm (poly `0x1021`, init `0x0000`, no reflection), used for Boot-mode
/// frames. `crc16_xmodem(b"123456789") == 0x31C3`.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    const ALGORITHM: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM);
    ALGORITHM.checksum(data)
}

/// The FDL-mode checksum: a 16-bit ones'-complement sum of big-endian 16-bit words (the final
/// odd byte, if any, contributes as its own value), with carries folded in twice before the
/// final complement. Structurally an internet-checksum variant; no standard CRC algorithm
/// matches it, so it is hand-written rather than sourced from the `crc` crate.
pub fn crc16_fdl(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last);
    }
    sum = (sum >> 16) + (sum & 0xFFFF);
    sum += sum >> 16;
    !(sum as u16)
}

/// A running byte-sum checksum truncated to 32 bits, used in flash-write mode to authenticate
/// payload integrity. Associative over concatenation modulo 2^32.
pub fn chksum32(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)))
}

fn crc_for(mode: CrcMode, data: &[u8]) -> u16 {
    match mode {
        CrcMode::Boot => crc16_xmodem(data),
        CrcMode::Fdl => crc16_fdl(data),
        CrcMode::Disabled => 0,
    }
}

/// Encodes `payload` into a complete sentinel-delimited frame: CRC is appended, the combined
/// bytes are escaped, then bracketed with `0x7E`.
pub fn encode(payload: &[u8], mode: CrcMode) -> Vec<u8> {
    let crc = crc_for(mode, payload);

    let mut raw = Vec::with_capacity(payload.len() + 2);
    raw.extend_from_slice(payload);
    raw.extend_from_slice(&crc.to_be_bytes());

    let mut framed = Vec::with_capacity(raw.len() + 4);
    framed.push(FLAG_BYTE);
    for byte in raw {
        if byte == FLAG_BYTE || byte == ESCAPE_BYTE {
            framed.push(ESCAPE_BYTE);
            framed.push(byte ^ ESCAPE_XOR);
        } else {
            framed.push(byte);
        }
    }
    framed.push(FLAG_BYTE);
    framed
}

/// Decodes a complete sentinel-delimited frame, verifying the trailing CRC.
///
/// Returns `Ok(None)` only under [`CrcPolicy::Tolerant`] on a CRC mismatch; any other failure is
/// an `Err`.
pub fn decode(
    framed: &[u8],
    mode: CrcMode,
    policy: CrcPolicy,
) -> Result<Option<Vec<u8>>, FrameError> {
    if framed.len() < 2 || framed[0] != FLAG_BYTE || framed[framed.len() - 1] != FLAG_BYTE {
        return Err(FrameError::MissingSentinels);
    }
    let body = &framed[1..framed.len() - 1];

    let mut out = Vec::with_capacity(body.len());
    let mut escaped = false;
    for &byte in body {
        if escaped {
            match byte {
                0x5E | 0x5D => out.push(byte ^ ESCAPE_XOR),
                other => return Err(FrameError::InvalidEscape(other)),
            }
            escaped = false;
        } else if byte == ESCAPE_BYTE {
            escaped = true;
        } else {
            out.push(byte);
        }
    }
    if escaped {
        return Err(FrameError::DanglingEscape);
    }

    if out.len() < 2 {
        return Err(FrameError::Truncated);
    }
    let crc_offset = out.len() - 2;
    let found_crc = u16::from_be_bytes([out[crc_offset], out[crc_offset + 1]]);
    out.truncate(crc_offset);

    let expected_crc = crc_for(mode, &out);
    if mode != CrcMode::Disabled && found_crc != expected_crc {
        return match policy {
            CrcPolicy::Strict => Err(FrameError::CrcMismatch {
                expected: expected_crc,
                found: found_crc,
            }),
            CrcPolicy::Tolerant => Ok(None),
        };
    }

    Ok(Some(out))
}
