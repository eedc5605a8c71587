//! Standard LZMA1 "alone"-format streams, as embedded in `DRPS`/`RRPS` sections whose compression
//! discriminator is `0x5D`/`0x67` followed by `0x00`.
//!
//! The alone format's 13-byte header is a properties byte, a 4-byte little-endian dictionary
//! size, and an 8-byte little-endian uncompressed size (`u64::MAX` meaning "unknown, decode until
//! the end-of-stream marker"). What follows is the range-coder stream itself.

use super::decoder::{DecodeLimit, LzmaCore, LzmaError, LzmaProps};
use super::range_coder::RangeDecoder;
use super::window::OutputWindow;

const HEADER_LEN: usize = 13;
const UNKNOWN_SIZE: u64 = u64::MAX;

/// Decodes one complete LZMA1 "alone" stream.
pub fn decode(data: &[u8]) -> Result<Vec<u8>, LzmaError> {
    if data.len() < HEADER_LEN {
        return Err(LzmaError::UnexpectedEndOfStream);
    }
    let props = LzmaProps::from_byte(data[0])?;
    let dict_size = u32::from_le_bytes(data[1..5].try_into().unwrap()).max(1) as usize;
    let uncompressed_size = u64::from_le_bytes(data[5..13].try_into().unwrap());

    let mut rc = RangeDecoder::new(&data[HEADER_LEN..]);
    let mut window = OutputWindow::new(dict_size);
    let mut core = LzmaCore::new(props);

    let limit = if uncompressed_size == UNKNOWN_SIZE {
        DecodeLimit::UntilEndMarker
    } else {
        DecodeLimit::ExactSize(uncompressed_size)
    };
    core.decode(&mut rc, &mut window, limit)?;
    Ok(window.take_output())
}
