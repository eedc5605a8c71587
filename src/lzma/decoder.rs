//! The LZMA literal/length/distance state machine: shared by [`super::lzma1`] and
//! [`super::lzma_spd`], which differ only in container framing (see module docs).

use super::range_coder::{bit_tree_decode, bit_tree_reverse_decode, RangeDecoder, PROB_INIT};
use super::window::OutputWindow;
use thiserror::Error;

const NUM_STATES: usize = 12;
const NUM_POS_STATES_MAX: usize = 1 << 4;
const NUM_LEN_TO_POS_STATES: usize = 4;
const NUM_ALIGN_BITS: u32 = 4;
const START_POS_MODEL_INDEX: u32 = 4;
const END_POS_MODEL_INDEX: u32 = 14;
const NUM_FULL_DISTANCES: usize = 1 << (END_POS_MODEL_INDEX / 2);
const MATCH_MIN_LEN: u32 = 2;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LzmaError {
    #[error("lzma properties byte {0:#x} decodes to out-of-range lc/lp/pb")]
    InvalidProperties(u8),
    #[error("lzma stream ended before the expected output length was reached")]
    UnexpectedEndOfStream,
    #[error("lzma stream referenced a distance outside the decoded dictionary window")]
    DistanceOutOfRange,
    #[error("lzma end-of-stream marker encountered with {0} bytes still expected")]
    PrematureEndMarker(u64),
}

struct LenDecoder {
    choice: u16,
    choice2: u16,
    low: [[u16; 8]; NUM_POS_STATES_MAX],
    mid: [[u16; 8]; NUM_POS_STATES_MAX],
    high: [u16; 256],
}

impl LenDecoder {
    fn new() -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: [[PROB_INIT; 8]; NUM_POS_STATES_MAX],
            mid: [[PROB_INIT; 8]; NUM_POS_STATES_MAX],
            high: [PROB_INIT; 256],
        }
    }

    fn decode(&mut self, rc: &mut RangeDecoder, pos_state: usize) -> u32 {
        if rc.decode_bit(&mut self.choice) == 0 {
            bit_tree_decode(rc, &mut self.low[pos_state], 3)
        } else if rc.decode_bit(&mut self.choice2) == 0 {
            8 + bit_tree_decode(rc, &mut self.mid[pos_state], 3)
        } else {
            16 + bit_tree_decode(rc, &mut self.high, 8)
        }
    }
}

/// Literal/length/distance coding properties, packed the same way the reference LZMA properties
/// byte does: `props = (pb * 5 + lp) * 9 + lc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaProps {
    pub lc: u32,
    pub lp: u32,
    pub pb: u32,
}

impl LzmaProps {
    pub fn from_byte(byte: u8) -> Result<Self, LzmaError> {
        let mut value = u32::from(byte);
        if value >= 9 * 5 * 5 {
            return Err(LzmaError::InvalidProperties(byte));
        }
        let lc = value % 9;
        value /= 9;
        let lp = value % 5;
        let pb = value / 5;
        Ok(Self { lc, lp, pb })
    }
}

/// What determines when a decode pass stops.
pub enum DecodeLimit {
    ExactSize(u64),
    UntilEndMarker,
}

/// The full adaptive probability model plus LZMA state machine register (`state`, rep0..rep3).
/// A fresh instance starts in the canonical initial state; [`super::lzma_spd`] keeps one instance
/// alive across all sub-blocks of a `CAPN` block so this state (and the dictionary window)
/// persists between them.
pub struct LzmaCore {
    props: LzmaProps,
    lit_probs: Vec<u16>,
    is_match: [[u16; NUM_POS_STATES_MAX]; NUM_STATES],
    is_rep: [u16; NUM_STATES],
    is_rep_g0: [u16; NUM_STATES],
    is_rep_g1: [u16; NUM_STATES],
    is_rep_g2: [u16; NUM_STATES],
    is_rep0_long: [[u16; NUM_POS_STATES_MAX]; NUM_STATES],
    pos_slot_decoder: [[u16; 64]; NUM_LEN_TO_POS_STATES],
    spec_pos: [u16; NUM_FULL_DISTANCES],
    align_decoder: [u16; 1 << NUM_ALIGN_BITS],
    len_decoder: LenDecoder,
    rep_len_decoder: LenDecoder,
    state: u32,
    rep0: u32,
    rep1: u32,
    rep2: u32,
    rep3: u32,
}

impl LzmaCore {
    pub fn new(props: LzmaProps) -> Self {
        let lit_state_count = 1usize << (props.lc + props.lp);
        Self {
            props,
            lit_probs: vec![PROB_INIT; 0x300 * lit_state_count],
            is_match: [[PROB_INIT; NUM_POS_STATES_MAX]; NUM_STATES],
            is_rep: [PROB_INIT; NUM_STATES],
            is_rep_g0: [PROB_INIT; NUM_STATES],
            is_rep_g1: [PROB_INIT; NUM_STATES],
            is_rep_g2: [PROB_INIT; NUM_STATES],
            is_rep0_long: [[PROB_INIT; NUM_POS_STATES_MAX]; NUM_STATES],
            pos_slot_decoder: [[PROB_INIT; 64]; NUM_LEN_TO_POS_STATES],
            spec_pos: [PROB_INIT; NUM_FULL_DISTANCES],
            align_decoder: [PROB_INIT; 1 << NUM_ALIGN_BITS],
            len_decoder: LenDecoder::new(),
            rep_len_decoder: LenDecoder::new(),
            state: 0,
            rep0: 0,
            rep1: 0,
            rep2: 0,
            rep3: 0,
        }
    }

    fn literal_state(&self, window: &OutputWindow) -> usize {
        let pos_mask = (1u64 << self.props.lp) - 1;
        let prev_byte = if window.is_empty() {
            0
        } else {
            window.get_byte(0)
        };
        (((window.total_pos() & pos_mask) << self.props.lc) as usize)
            + (usize::from(prev_byte) >> (8 - self.props.lc))
    }

    fn decode_literal(&mut self, rc: &mut RangeDecoder, window: &OutputWindow) -> u8 {
        let lit_state = self.literal_state(window);
        let probs = &mut self.lit_probs[lit_state * 0x300..lit_state * 0x300 + 0x300];

        let mut symbol: u32 = 1;
        if self.state >= 7 {
            let mut match_byte = u32::from(window.get_byte(self.rep0));
            loop {
                let match_bit = (match_byte >> 7) & 1;
                match_byte <<= 1;
                let bit = rc.decode_bit(&mut probs[(((1 + match_bit) << 8) + symbol) as usize]);
                symbol = (symbol << 1) | bit;
                if match_bit != bit {
                    break;
                }
                if symbol >= 0x100 {
                    break;
                }
            }
        }
        while symbol < 0x100 {
            symbol = (symbol << 1) | rc.decode_bit(&mut probs[symbol as usize]);
        }
        (symbol & 0xFF) as u8
    }

    fn decode_distance(&mut self, rc: &mut RangeDecoder, len: u32) -> u32 {
        let len_state = (len - MATCH_MIN_LEN).min(NUM_LEN_TO_POS_STATES as u32 - 1) as usize;
        let pos_slot = bit_tree_decode(rc, &mut self.pos_slot_decoder[len_state], 6);
        if pos_slot < START_POS_MODEL_INDEX {
            return pos_slot;
        }
        let num_direct_bits = (pos_slot >> 1) - 1;
        let mut dist: u32 = (2 | (pos_slot & 1)) << num_direct_bits;
        if pos_slot < END_POS_MODEL_INDEX {
            let base = (dist - pos_slot - 1) as usize;
            dist += bit_tree_reverse_decode(
                rc,
                &mut self.spec_pos[base..base + (1 << num_direct_bits)],
                num_direct_bits,
            );
        } else {
            dist = dist.wrapping_add(
                rc.decode_direct_bits(num_direct_bits - NUM_ALIGN_BITS) << NUM_ALIGN_BITS,
            );
            dist = dist.wrapping_add(bit_tree_reverse_decode(
                rc,
                &mut self.align_decoder,
                NUM_ALIGN_BITS,
            ));
        }
        dist
    }

    /// Decodes into `window` until `limit` is satisfied. Returns the number of bytes produced in
    /// this call. The core's probability tables and window keep accumulating across calls, which
    /// is what lets [`super::lzma_spd`] reuse one `LzmaCore` across a `CAPN` block's sub-blocks.
    pub fn decode(
        &mut self,
        rc: &mut RangeDecoder,
        window: &mut OutputWindow,
        limit: DecodeLimit,
    ) -> Result<u64, LzmaError> {
        let start_pos = window.total_pos();
        let target = match limit {
            DecodeLimit::ExactSize(n) => Some(start_pos + n),
            DecodeLimit::UntilEndMarker => None,
        };

        loop {
            if let Some(target) = target {
                if window.total_pos() >= target {
                    break;
                }
            }

            let pos_state = (window.total_pos() as usize) & ((1 << self.props.pb) - 1);
            if rc.decode_bit(&mut self.is_match[self.state as usize][pos_state]) == 0 {
                let byte = self.decode_literal(rc, window);
                window.put_byte(byte);
                self.state = if self.state < 4 {
                    0
                } else if self.state < 10 {
                    self.state - 3
                } else {
                    self.state - 6
                };
                continue;
            }

            let len;
            if rc.decode_bit(&mut self.is_rep[self.state as usize]) != 0 {
                // Repeated-distance match.
                if window.is_empty() {
                    return Err(LzmaError::DistanceOutOfRange);
                }
                if rc.decode_bit(&mut self.is_rep_g0[self.state as usize]) == 0 {
                    if rc.decode_bit(&mut self.is_rep0_long[self.state as usize][pos_state]) == 0 {
                        self.state = if self.state < 7 { 9 } else { 11 };
                        let byte = window.get_byte(self.rep0);
                        window.put_byte(byte);
                        continue;
                    }
                } else {
                    let dist;
                    if rc.decode_bit(&mut self.is_rep_g1[self.state as usize]) == 0 {
                        dist = self.rep1;
                    } else if rc.decode_bit(&mut self.is_rep_g2[self.state as usize]) == 0 {
                        dist = self.rep2;
                        self.rep2 = self.rep1;
                    } else {
                        dist = self.rep3;
                        self.rep3 = self.rep2;
                        self.rep2 = self.rep1;
                    }
                    self.rep1 = self.rep0;
                    self.rep0 = dist;
                }
                len = self.rep_len_decoder.decode(rc, pos_state) + MATCH_MIN_LEN;
                self.state = if self.state < 7 { 8 } else { 11 };
            } else {
                // New-distance match.
                self.rep3 = self.rep2;
                self.rep2 = self.rep1;
                self.rep1 = self.rep0;
                len = self.len_decoder.decode(rc, pos_state) + MATCH_MIN_LEN;
                self.state = if self.state < 7 { 7 } else { 10 };

                let dist = self.decode_distance(rc, len);
                if dist == 0xFFFF_FFFF {
                    // End-of-stream marker.
                    return match target {
                        Some(target) if window.total_pos() < target => {
                            Err(LzmaError::PrematureEndMarker(target - window.total_pos()))
                        }
                        _ => Ok(window.total_pos() - start_pos),
                    };
                }
                self.rep0 = dist;
                if !window.check_distance(self.rep0) {
                    return Err(LzmaError::DistanceOutOfRange);
                }
            }
            window.copy_match(self.rep0, len);
        }
        Ok(window.total_pos() - start_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::range_coder::{
        bit_tree_encode, bit_tree_reverse_encode, RangeEncoder, PROB_INIT,
    };

    /// Mirrors [`LzmaCore::decode`]'s literal/match encoding, built only to produce fixtures for
    /// the decoder since no real stone-image corpus ships with this crate.
    struct ToyEncoder {
        props: LzmaProps,
        lit_probs: Vec<u16>,
        is_match: [[u16; NUM_POS_STATES_MAX]; NUM_STATES],
        state: u32,
    }

    impl ToyEncoder {
        fn new(props: LzmaProps) -> Self {
            let lit_state_count = 1usize << (props.lc + props.lp);
            Self {
                props,
                lit_probs: vec![PROB_INIT; 0x300 * lit_state_count],
                is_match: [[PROB_INIT; NUM_POS_STATES_MAX]; NUM_STATES],
                state: 0,
            }
        }

        /// Encodes `data` as a stream of literals only (no matches), which is all the decoder's
        /// literal path needs to exercise correctness.
        fn encode_literals(&mut self, enc: &mut RangeEncoder, data: &[u8]) {
            for (i, &byte) in data.iter().enumerate() {
                let pos_state = i & ((1 << self.props.pb) - 1);
                enc.encode_bit(&mut self.is_match[self.state as usize][pos_state], 0);

                let pos_mask = (1u64 << self.props.lp) - 1;
                let prev_byte = if i == 0 { 0 } else { data[i - 1] };
                let lit_state = (((i as u64 & pos_mask) << self.props.lc) as usize)
                    + (usize::from(prev_byte) >> (8 - self.props.lc));
                let probs = &mut self.lit_probs[lit_state * 0x300..lit_state * 0x300 + 0x300];
                bit_tree_encode(enc, probs, 8, u32::from(byte));
                self.state = 0;
            }
        }
    }

    #[test]
    fn round_trips_literal_only_stream() {
        let props = LzmaProps { lc: 3, lp: 0, pb: 2 };
        let mut toy = ToyEncoder::new(props);
        let mut enc = RangeEncoder::new();
        let message = b"the quick brown fox jumps over the lazy dog";
        toy.encode_literals(&mut enc, message);
        let bytes = enc.finish();

        let mut rc = RangeDecoder::new(&bytes);
        let mut core = LzmaCore::new(props);
        let mut window = OutputWindow::new(1 << 16);
        core.decode(&mut rc, &mut window, DecodeLimit::ExactSize(message.len() as u64))
            .unwrap();
        assert_eq!(window.take_output(), message);
    }

    #[test]
    fn bit_tree_round_trips_through_encoder_and_decoder() {
        let mut enc = RangeEncoder::new();
        let mut probs = [PROB_INIT; 256];
        bit_tree_encode(&mut enc, &mut probs, 8, 0xA5);
        let bytes = enc.finish();

        let mut rc = RangeDecoder::new(&bytes);
        let mut probs = [PROB_INIT; 256];
        assert_eq!(bit_tree_decode(&mut rc, &mut probs, 8), 0xA5);
    }

    #[test]
    fn reverse_bit_tree_round_trips() {
        let mut enc = RangeEncoder::new();
        let mut probs = [PROB_INIT; 16];
        bit_tree_reverse_encode(&mut enc, &mut probs, 4, 0b1011);
        let bytes = enc.finish();

        let mut rc = RangeDecoder::new(&bytes);
        let mut probs = [PROB_INIT; 16];
        assert_eq!(bit_tree_reverse_decode(&mut rc, &mut probs, 4), 0b1011);
    }

    #[test]
    fn properties_byte_decodes_lc_lp_pb() {
        // props = (pb*5 + lp)*9 + lc, the standard LZMA packing.
        let byte = (2 * 5 + 1) * 9 + 3;
        let props = LzmaProps::from_byte(byte).unwrap();
        assert_eq!(props, LzmaProps { lc: 3, lp: 1, pb: 2 });
    }

    #[test]
    fn properties_byte_out_of_range_is_rejected() {
        assert!(matches!(
            LzmaProps::from_byte(255),
            Err(LzmaError::InvalidProperties(255))
        ));
    }
}
