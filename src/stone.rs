//! Unpacks Unisoc/Spreadtrum "stone" flash images into their component artifacts (kernel,
//! userdata, resources, protocol-station image, ...).
//!
//! A stone image is an optional 1024-byte signed-image preamble, followed by a `TRAPGAMI` master
//! header giving up to 28 section addresses, each pointing at a `DRPS`/`RRPS` section of `COLB`
//! blocks, each block holding one or more LZMA-compressed sub-blocks (optionally indexed by a
//! trailing `CAPN` offset table).

use crate::lzma::decoder::LzmaError;
use crate::lzma::{decode_lzma1, detect_compression_type, CompressionType, LzmaSpdDecoder};
use thiserror::Error;

const SECURE_FLAG_MAGIC: &[u8] = b"SPRD-SECUREFLAG";
const SECURE_FLAG_OFFSET: usize = 1024;
const TRAPGAMI_MAGIC: &[u8] = b"TRAPGAMI";
const NUM_SECTION_SLOTS: usize = 28;

const DRPS_MAGIC: u32 = 0x5350_5244;
const RRPS_MAGIC: u32 = 0x5350_5252;
const COLB_MAGIC: u32 = 0x424C_4F43;
const CAPN_MAGIC: u32 = 0x4E50_4143;

const BLOCK_ID_KERNEL: u32 = 0x494D_4147; // "GAMI"
const BLOCK_ID_USERDATA: u32 = 0x7573_6572; // "resu"
const BLOCK_ID_RESOURCES: u32 = 0x7253_736F;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoneError {
    #[error("stone image is smaller than the minimum header size")]
    TooSmall,
    #[error("no TRAPGAMI master header found in the image")]
    MissingMasterHeader,
    #[error("section at offset {offset:#x} has invalid BZP magic {found:#010x}")]
    InvalidSectionMagic { offset: usize, found: u32 },
    #[error("block at offset {offset:#x} has invalid COLB magic {found:#010x}")]
    InvalidBlockMagic { offset: usize, found: u32 },
    #[error("block declares an unsupported compression discriminator")]
    UnsupportedCompression,
    #[error("section or block header runs past the end of the image")]
    Truncated,
    #[error(transparent)]
    Lzma(#[from] LzmaError),
}

/// One file extracted from a stone image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub data: Vec<u8>,
}

fn read_u32_le(data: &[u8], offset: usize) -> Result<u32, StoneError> {
    let bytes = data.get(offset..offset + 4).ok_or(StoneError::Truncated)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn block_name(block_id: u32) -> String {
    match block_id {
        BLOCK_ID_KERNEL => "kern.bin".to_string(),
        BLOCK_ID_USERDATA => "user.bin".to_string(),
        BLOCK_ID_RESOURCES => "rsrc.bin".to_string(),
        other => format!("blk_{other:X}.bin"),
    }
}

/// Decompresses one block's LZMA sub-blocks (possibly `CAPN`-indexed) into a single byte buffer.
///
/// `packed_halfwords` is the block descriptor's declared packed size in 16-bit units; the
/// reference unpacker bounds each sub-block's compressed slice to twice that value as a generous
/// upper bound, since the true compressed length is determined by the decoder consuming exactly
/// as many bytes as it needs.
///
/// Compression is classified once, from the first sub-block's two-byte discriminator, and that
/// classification is reused for every remaining sub-block: only the first sub-block of a `CAPN`
/// block carries the discriminator, so re-running detection on later sub-blocks' raw continuation
/// bytes would misclassify them.
fn unpack_block(block_data: &[u8], packed_halfwords: u32) -> Result<Vec<u8>, StoneError> {
    if block_data.len() < 16 {
        return Err(StoneError::Truncated);
    }
    let npac_magic = read_u32_le(block_data, 0)?;
    let comp_data_size = read_u32_le(block_data, 8)? as usize;
    let mut lzma_blocks_amount = read_u32_le(block_data, 12)? as usize;

    let offsets: Option<Vec<u32>> = if npac_magic == CAPN_MAGIC {
        let table = block_data.get(comp_data_size..).ok_or(StoneError::Truncated)?;
        let mut offsets = Vec::with_capacity(lzma_blocks_amount);
        for i in 0..lzma_blocks_amount {
            offsets.push(read_u32_le(table, i * 4)?);
        }
        Some(offsets)
    } else {
        lzma_blocks_amount = 1;
        None
    };

    let in_size_pure = (packed_halfwords as usize) * 2;
    let mut dest = Vec::new();
    let mut spd_decoder: Option<LzmaSpdDecoder> = None;
    let mut codec: Option<CompressionType> = None;

    for i in 0..lzma_blocks_amount {
        let data_offset = offsets.as_ref().map_or(0, |t| t[i] as usize);
        let comp_data = block_data.get(data_offset..).ok_or(StoneError::Truncated)?;
        let lz_data = &comp_data[..comp_data.len().min(in_size_pure)];

        let this_codec = *codec.get_or_insert_with(|| detect_compression_type(lz_data));
        match this_codec {
            CompressionType::Lzma => {
                dest.extend(decode_lzma1(lz_data)?);
            }
            CompressionType::LzmaSpd => {
                let decoder = spd_decoder.get_or_insert_with(|| LzmaSpdDecoder::new(1 << 20));
                dest.extend(decoder.decode_block(lz_data)?);
            }
            CompressionType::None => return Err(StoneError::UnsupportedCompression),
        }
    }
    Ok(dest)
}

fn unpack_section(section_data: &[u8], section_offset: usize) -> Result<Vec<Artifact>, StoneError> {
    if section_data.len() < 16 {
        return Err(StoneError::Truncated);
    }
    let magic = read_u32_le(section_data, 0)?;
    if magic != DRPS_MAGIC && magic != RRPS_MAGIC {
        return Err(StoneError::InvalidSectionMagic { offset: section_offset, found: magic });
    }
    let blocks_offset = read_u32_le(section_data, 8)? as usize;
    let blocks_amount = read_u32_le(section_data, 12)? as usize;

    let mut artifacts = Vec::with_capacity(blocks_amount);
    for i in 0..blocks_amount {
        let hdr_start = blocks_offset + i * 20;
        let hdr_magic = read_u32_le(section_data, hdr_start)?;
        if hdr_magic != COLB_MAGIC {
            return Err(StoneError::InvalidBlockMagic {
                offset: section_offset + hdr_start,
                found: hdr_magic,
            });
        }
        let block_id = read_u32_le(section_data, hdr_start + 4)?;
        let block_data_offset = read_u32_le(section_data, hdr_start + 8)? as usize;
        let packed_halfwords = read_u32_le(section_data, hdr_start + 16)?;

        let block_data = section_data.get(block_data_offset..).ok_or(StoneError::Truncated)?;
        let data = unpack_block(block_data, packed_halfwords)?;
        artifacts.push(Artifact { name: block_name(block_id), data });
    }
    Ok(artifacts)
}

/// Unpacks a complete stone image into its component artifacts, in the order their sections
/// appear in the `TRAPGAMI` master header, followed by the leading protocol-station image (named
/// `ps.bin`) if the header left a gap before the first section.
pub fn unpack_stone(data: &[u8]) -> Result<Vec<Artifact>, StoneError> {
    if data.len() < 0x10 {
        return Err(StoneError::TooSmall);
    }

    let section_offset = if data.len() >= SECURE_FLAG_MAGIC.len() && &data[..SECURE_FLAG_MAGIC.len()] == SECURE_FLAG_MAGIC {
        SECURE_FLAG_OFFSET
    } else {
        0
    };

    let start_pos = data
        .windows(TRAPGAMI_MAGIC.len())
        .position(|window| window == TRAPGAMI_MAGIC)
        .ok_or(StoneError::MissingMasterHeader)?;

    let mut artifacts = Vec::new();
    let mut ps_image_end: u32 = 0xFFFF_FFFF;

    for slot in 0..NUM_SECTION_SLOTS {
        let addr_offset = start_pos + 8 + slot * 4;
        let target_addr = read_u32_le(data, addr_offset)?;
        if target_addr == 0xFFFF_FFFF {
            continue;
        }
        if target_addr < ps_image_end {
            ps_image_end = target_addr;
        }
        let section_start = section_offset + target_addr as usize;
        let section_data = data.get(section_start..).ok_or(StoneError::Truncated)?;
        artifacts.extend(unpack_section(section_data, section_start)?);
    }

    if ps_image_end > 0 && ps_image_end != 0xFFFF_FFFF {
        artifacts.push(Artifact {
            name: "ps.bin".to_string(),
            data: data[..ps_image_end as usize].to_vec(),
        });
    }
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lzma::decoder::LzmaProps;
    use crate::lzma::range_coder::{bit_tree_encode, RangeEncoder, PROB_INIT};
    use crate::lzma::test_support::LiteralStreamEncoder;

    fn encode_alone(props: LzmaProps, message: &[u8]) -> Vec<u8> {
        let mut header = Vec::with_capacity(13);
        header.push(((props.pb * 5 + props.lp) * 9 + props.lc) as u8);
        header.extend_from_slice(&(1u32 << 16).to_le_bytes());
        header.extend_from_slice(&(message.len() as u64).to_le_bytes());

        let mut lit_probs = vec![PROB_INIT; 0x300 << (props.lc + props.lp)];
        let mut is_match = [[PROB_INIT; 16]; 12];
        let mut enc = RangeEncoder::new();
        for (i, &byte) in message.iter().enumerate() {
            let pos_state = i & ((1 << props.pb) - 1);
            enc.encode_bit(&mut is_match[0][pos_state], 0);
            let pos_mask = (1u64 << props.lp) - 1;
            let prev_byte = if i == 0 { 0 } else { message[i - 1] };
            let lit_state = (((i as u64 & pos_mask) << props.lc) as usize)
                + (usize::from(prev_byte) >> (8 - props.lc));
            let probs = &mut lit_probs[lit_state * 0x300..lit_state * 0x300 + 0x300];
            bit_tree_encode(&mut enc, probs, 8, u32::from(byte));
        }
        header.extend(enc.finish());
        header
    }

    fn build_block(payload: &[u8]) -> (Vec<u8>, u32) {
        let props = LzmaProps { lc: 3, lp: 0, pb: 2 };
        let compressed = encode_alone(props, payload);
        let packed_halfwords = (compressed.len() as u32).div_ceil(2) + 4;
        (compressed, packed_halfwords)
    }

    fn build_section(block_id: u32, payload: &[u8]) -> Vec<u8> {
        let (compressed, packed_halfwords) = build_block(payload);
        let blocks_offset = 16u32;
        let block_data_offset = blocks_offset + 20; // right after the one COLB header
        let mut section = Vec::new();
        section.extend_from_slice(&DRPS_MAGIC.to_le_bytes());
        section.extend_from_slice(&0u32.to_le_bytes()); // bzpType, unused by the unpacker
        section.extend_from_slice(&blocks_offset.to_le_bytes());
        section.extend_from_slice(&1u32.to_le_bytes()); // blocksAmount

        section.extend_from_slice(&COLB_MAGIC.to_le_bytes());
        section.extend_from_slice(&block_id.to_le_bytes());
        section.extend_from_slice(&block_data_offset.to_le_bytes());
        section.extend_from_slice(&(compressed.len() as u32).to_le_bytes()); // blkPackedSize
        section.extend_from_slice(&packed_halfwords.to_le_bytes()); // blkPacSize

        section.extend_from_slice(&compressed);
        section
    }

    /// Builds a `CAPN`-indexed block body from independently-produced sub-block byte streams,
    /// with a trailing little-endian offset table pointing at each one.
    fn build_capn_block(sub_blocks: &[Vec<u8>]) -> (Vec<u8>, u32) {
        let header_len = 16usize;
        let mut offsets = Vec::with_capacity(sub_blocks.len());
        let mut payload = Vec::new();
        for sb in sub_blocks {
            offsets.push((header_len + payload.len()) as u32);
            payload.extend_from_slice(sb);
        }
        let comp_data_size = header_len + payload.len();

        let mut block = Vec::new();
        block.extend_from_slice(&CAPN_MAGIC.to_le_bytes());
        block.extend_from_slice(&0u32.to_le_bytes()); // flags, unused by the unpacker
        block.extend_from_slice(&(comp_data_size as u32).to_le_bytes());
        block.extend_from_slice(&(sub_blocks.len() as u32).to_le_bytes());
        block.extend_from_slice(&payload);
        for off in &offsets {
            block.extend_from_slice(&off.to_le_bytes());
        }

        let longest = sub_blocks.iter().map(Vec::len).max().unwrap_or(0);
        let packed_halfwords = (longest as u32).div_ceil(2) + 4;
        (block, packed_halfwords)
    }

    #[test]
    fn capn_block_with_multiple_lzma1_sub_blocks_concatenates_decodes() {
        let props = LzmaProps { lc: 3, lp: 0, pb: 2 };
        let payload_a = b"first independent lzma1 stream payload";
        let payload_b = b"second independent lzma1 stream payload";
        let sub_a = encode_alone(props, payload_a);
        let sub_b = encode_alone(props, payload_b);

        let (block, packed_halfwords) = build_capn_block(&[sub_a, sub_b]);
        let data = unpack_block(&block, packed_halfwords).unwrap();

        let mut expected = payload_a.to_vec();
        expected.extend_from_slice(payload_b);
        assert_eq!(data, expected);
    }

    #[test]
    fn capn_block_with_multiple_lzma_spd_sub_blocks_shares_decoder_state() {
        let part_a = b"first lzma_spd sub-block of the image";
        let part_b = b"second lzma_spd sub-block of the image";

        let mut fixture = LiteralStreamEncoder::new(LzmaProps { lc: 3, lp: 0, pb: 2 });
        let body_a = fixture.encode_block(part_a);
        let body_b = fixture.encode_block(part_b);

        let mut sub_a = vec![0x5A, 0x00];
        sub_a.extend_from_slice(&body_a);

        let (block, packed_halfwords) = build_capn_block(&[sub_a, body_b]);
        let data = unpack_block(&block, packed_halfwords).unwrap();

        let mut expected = part_a.to_vec();
        expected.extend_from_slice(part_b);
        assert_eq!(data, expected);
    }

    fn build_stone(sections: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let mut image = Vec::new();
        image.extend_from_slice(TRAPGAMI_MAGIC);
        let header_addrs_start = image.len() + 8 - 8; // placeholder, recomputed below
        let _ = header_addrs_start;

        let mut addrs = vec![0xFFFF_FFFFu32; NUM_SECTION_SLOTS];
        let body_start = 8 + NUM_SECTION_SLOTS * 4;
        let mut body = Vec::new();
        for (i, (_, section_bytes)) in sections.iter().enumerate() {
            addrs[i] = (body_start + body.len()) as u32;
            body.extend_from_slice(section_bytes);
        }

        for addr in addrs {
            image.extend_from_slice(&addr.to_le_bytes());
        }
        image.extend_from_slice(&body);
        image
    }

    #[test]
    fn rejects_too_small_image() {
        assert_eq!(unpack_stone(&[0u8; 4]), Err(StoneError::TooSmall));
    }

    #[test]
    fn rejects_image_without_trapgami_header() {
        let data = vec![0u8; 64];
        assert_eq!(unpack_stone(&data), Err(StoneError::MissingMasterHeader));
    }

    #[test]
    fn unpacks_single_kernel_section() {
        let kernel_payload = b"this is a pretend kernel image payload";
        let section = build_section(BLOCK_ID_KERNEL, kernel_payload);
        let image = build_stone(&[(BLOCK_ID_KERNEL, section)]);

        let artifacts = unpack_stone(&image).unwrap();
        let kernel = artifacts.iter().find(|a| a.name == "kern.bin").unwrap();
        assert_eq!(kernel.data, kernel_payload);
    }

    #[test]
    fn unknown_block_id_falls_back_to_hex_name() {
        assert_eq!(block_name(0xDEAD_BEEF), "blk_DEADBEEF.bin");
    }

    #[test]
    fn section_with_invalid_magic_is_rejected() {
        let mut section = vec![0u8; 32];
        section[0..4].copy_from_slice(&0xBADC_0FFEu32.to_le_bytes());
        let err = unpack_section(&section, 0).unwrap_err();
        assert!(matches!(err, StoneError::InvalidSectionMagic { .. }));
    }
}
