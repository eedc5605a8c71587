//! The proprietary LZMA_SPD variant, selected when a compressed sub-block's two-byte
//! discriminator is `0x5A 0x00` (see [`super::detect_compression_type`]).
//!
//! Unlike the standard "alone" format, a LZMA_SPD block carries no per-block (or per-sub-block)
//! uncompressed-size field anywhere in the container: the `COLB` block descriptor only records
//! packed sizes, and the `CAPN` sub-block table only records byte offsets. Decoding instead relies
//! on the same mechanism [`super::lzma1`] falls back to for an unknown-size "alone" stream: an
//! explicit end-of-stream marker encoded into the range-coded data itself, so [`LzmaCore::decode`]
//! is driven with [`DecodeLimit::UntilEndMarker`] rather than any externally supplied length. Only
//! the *first* sub-block of a `CAPN` block carries the two-byte discriminator header; a single
//! [`LzmaSpdDecoder`] instance is then reused across the remaining sub-blocks so its adaptive
//! probability model, state register, and dictionary window keep the continuity the encoder
//! assumed. Fixed coding parameters (`lc=3, lp=0, pb=2`, the conventional LZMA defaults) are used
//! since the variant carries no properties byte of its own.
use super::decoder::{DecodeLimit, LzmaCore, LzmaError, LzmaProps};
use super::range_coder::RangeDecoder;
use super::window::OutputWindow;

const DISCRIMINATOR: [u8; 2] = [0x5A, 0x00];
const DEFAULT_PROPS: LzmaProps = LzmaProps { lc: 3, lp: 0, pb: 2 };

pub struct LzmaSpdDecoder {
    core: LzmaCore,
    window: OutputWindow,
    header_consumed: bool,
}

impl LzmaSpdDecoder {
    pub fn new(dict_size: usize) -> Self {
        Self {
            core: LzmaCore::new(DEFAULT_PROPS),
            window: OutputWindow::new(dict_size),
            header_consumed: false,
        }
    }

    /// Decodes one sub-block's worth of compressed data, stopping at its end-of-stream marker.
    /// The dictionary and probability state carry forward to the next call.
    pub fn decode_block(&mut self, data: &[u8]) -> Result<Vec<u8>, LzmaError> {
        let body = if self.header_consumed {
            data
        } else {
            if data.len() < DISCRIMINATOR.len() || data[..2] != DISCRIMINATOR {
                return Err(LzmaError::InvalidProperties(data.first().copied().unwrap_or(0)));
            }
            self.header_consumed = true;
            &data[2..]
        };

        let mut rc = RangeDecoder::new(body);
        self.core.decode(&mut rc, &mut self.window, DecodeLimit::UntilEndMarker)?;
        Ok(self.window.take_output())
    }
}
