//! Shared test-only LZMA encoder used by [`super::lzma_spd`] and [`crate::stone`] tests to build
//! fixtures: a run of literals terminated by an explicit end-of-stream marker, matching exactly
//! what [`super::decoder::LzmaCore::decode`] expects under [`super::decoder::DecodeLimit::UntilEndMarker`].
//! No conformance corpus of real stone images ships with this crate (see that module's docs).
#![cfg(test)]

use super::decoder::LzmaProps;
use super::range_coder::{bit_tree_encode, bit_tree_reverse_encode, RangeEncoder, PROB_INIT};

const NUM_STATES: usize = 12;
const NUM_POS_STATES_MAX: usize = 16;
const NUM_LEN_TO_POS_STATES: usize = 4;

/// Mirrors just enough of [`super::decoder::LzmaCore`]'s adaptive model to encode literal runs
/// and end markers. State (`state`, adaptive probabilities, position) persists across calls to
/// [`Self::encode_block`], the same way a real [`super::lzma_spd::LzmaSpdDecoder`] keeps one
/// `LzmaCore` alive across a `CAPN` block's sub-blocks — including the fact that an end marker
/// leaves `state >= 7`, so the next call's first literal goes through the matched-literal coding
/// path rather than plain literal coding.
pub(crate) struct LiteralStreamEncoder {
    props: LzmaProps,
    lit_probs: Vec<u16>,
    is_match: [[u16; NUM_POS_STATES_MAX]; NUM_STATES],
    is_rep: [u16; NUM_STATES],
    len_choice: u16,
    len_low: [[u16; 8]; NUM_POS_STATES_MAX],
    pos_slot: [[u16; 64]; NUM_LEN_TO_POS_STATES],
    align: [u16; 16],
    state: u32,
    total_pos: u64,
    prev_byte: u8,
}

impl LiteralStreamEncoder {
    pub(crate) fn new(props: LzmaProps) -> Self {
        let lit_state_count = 1usize << (props.lc + props.lp);
        Self {
            props,
            lit_probs: vec![PROB_INIT; 0x300 * lit_state_count],
            is_match: [[PROB_INIT; NUM_POS_STATES_MAX]; NUM_STATES],
            is_rep: [PROB_INIT; NUM_STATES],
            len_choice: PROB_INIT,
            len_low: [[PROB_INIT; 8]; NUM_POS_STATES_MAX],
            pos_slot: [[PROB_INIT; 64]; NUM_LEN_TO_POS_STATES],
            align: [PROB_INIT; 16],
            state: 0,
            total_pos: 0,
            prev_byte: 0,
        }
    }

    fn pos_state(&self) -> usize {
        (self.total_pos as usize) & ((1 << self.props.pb) - 1)
    }

    /// Mirrors `LzmaCore::decode_literal`'s indexing, inverted: emits the bits that would decode
    /// back to `byte`. Distance-0 ("rep0") is always the most recent output byte in these
    /// fixtures, since a pure literal-and-end-marker stream never reassigns `rep0` away from its
    /// initial value of zero — so `prev_byte` doubles as both the literal-state predictor and the
    /// matched-literal's `match_byte`, exactly as `window.get_byte(0)` would.
    fn encode_literal(&mut self, enc: &mut RangeEncoder, byte: u8) {
        let pos_state = self.pos_state();
        enc.encode_bit(&mut self.is_match[self.state as usize][pos_state], 0);

        let pos_mask = (1u64 << self.props.lp) - 1;
        let lit_state = (((self.total_pos & pos_mask) << self.props.lc) as usize)
            + (usize::from(self.prev_byte) >> (8 - self.props.lc));
        let probs = &mut self.lit_probs[lit_state * 0x300..lit_state * 0x300 + 0x300];

        let mut symbol: u32 = 1;
        let mut bits_done = 0u32;
        if self.state >= 7 {
            let mut match_byte = u32::from(self.prev_byte);
            loop {
                let match_bit = (match_byte >> 7) & 1;
                match_byte <<= 1;
                let bit = (u32::from(byte) >> (7 - bits_done)) & 1;
                enc.encode_bit(&mut probs[(((1 + match_bit) << 8) + symbol) as usize], bit);
                symbol = (symbol << 1) | bit;
                bits_done += 1;
                if match_bit != bit || symbol >= 0x100 {
                    break;
                }
            }
        }
        while symbol < 0x100 {
            let bit = (u32::from(byte) >> (7 - bits_done)) & 1;
            enc.encode_bit(&mut probs[symbol as usize], bit);
            symbol = (symbol << 1) | bit;
            bits_done += 1;
        }

        self.state = if self.state < 4 {
            0
        } else if self.state < 10 {
            self.state - 3
        } else {
            self.state - 6
        };
        self.prev_byte = byte;
        self.total_pos += 1;
    }

    /// Encodes an explicit end-of-stream marker: a new-distance match whose distance decodes to
    /// `0xFFFF_FFFF` (position slot 63, all direct and alignment bits set). Leaves `state == 7`,
    /// matching `LzmaCore::decode`'s own bookkeeping for a new-distance match.
    fn encode_end_marker(&mut self, enc: &mut RangeEncoder) {
        let pos_state = self.pos_state();
        enc.encode_bit(&mut self.is_match[self.state as usize][pos_state], 1);
        enc.encode_bit(&mut self.is_rep[self.state as usize], 0);

        // length = 2 (len_state 0): choice = 0, 3-bit low-tree value 0.
        enc.encode_bit(&mut self.len_choice, 0);
        bit_tree_encode(enc, &mut self.len_low[pos_state], 3, 0);

        // pos_slot = 63, all direct/align bits set -> distance 0xFFFF_FFFF.
        bit_tree_encode(enc, &mut self.pos_slot[0], 6, 63);
        enc.encode_direct_bits(0x3FF_FFFF, 26);
        bit_tree_reverse_encode(enc, &mut self.align, 4, 0xF);

        self.state = 7;
    }

    /// Encodes one independently range-coded call: `message`'s bytes as literals followed by an
    /// end marker, continuing this encoder's adaptive model and position from any previous call.
    pub(crate) fn encode_block(&mut self, message: &[u8]) -> Vec<u8> {
        let mut enc = RangeEncoder::new();
        for &byte in message {
            self.encode_literal(&mut enc, byte);
        }
        self.encode_end_marker(&mut enc);
        enc.finish()
    }
}
