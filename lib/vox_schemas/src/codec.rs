//! Binary wire codec for the `CHUNK_FULL` frame: header, the three block-array compression
//! modes, and the optional supplemental zlib deflate pass.

use std::io::{Read, Write};

use bitvec::prelude::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::coordinates::CHUNK_DIM3Z;
use crate::voxel::block::BlockId;
use crate::voxel::chunk::Chunk;

/// Message type tag for a full chunk frame.
pub const CHUNK_FULL_MSG_TYPE: u8 = 1;
/// Total header length in bytes, before the payload.
pub const FRAME_HEADER_LEN: usize = 26;

/// Compression mode: 4096 block ids as raw little-endian u16s.
pub const MODE_RAW: u8 = 0;
/// Compression mode: repeated `(run, value)` u16 pairs.
pub const MODE_RLE: u8 = 1;
/// Compression mode: palette + bitpacked indices.
pub const MODE_PALETTE: u8 = 2;

const ZLIB_FLAG: u8 = 0x80;
const MODE_MASK: u8 = 0x7F;
/// Deflate is only adopted if it saves at least this many bytes over the chosen mode.
const DEFLATE_MIN_GAIN: usize = 8;

/// Errors produced while decoding a `CHUNK_FULL` frame.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame shorter than the fixed header.
    #[error("frame too short: {0} bytes")]
    Truncated(usize),
    /// First byte wasn't `CHUNK_FULL_MSG_TYPE`.
    #[error("unexpected message type {0}")]
    WrongMessageType(u8),
    /// Compression mode nibble wasn't 0, 1 or 2.
    #[error("unknown compression mode {0}")]
    UnknownMode(u8),
    /// The header's payload length field didn't match the bytes actually present.
    #[error("payload length mismatch: header says {header}, frame has {actual}")]
    LengthMismatch {
        /// Length claimed by the header.
        header: u32,
        /// Length actually present in the buffer.
        actual: usize,
    },
    /// Truncated or otherwise malformed bytes inside the payload.
    #[error("io error decoding frame: {0}")]
    Io(#[from] std::io::Error),
    /// Bitpacked index pointed outside the palette.
    #[error("palette index out of range")]
    IllegalPaletteIndex,
}

/// A decoded `CHUNK_FULL` frame.
pub struct DecodedChunkFrame {
    /// Sequence number stamped by the sender.
    pub seq: u32,
    /// Chunk x coordinate.
    pub cx: i32,
    /// Chunk y coordinate.
    pub cy: i32,
    /// Chunk z coordinate.
    pub cz: i32,
    /// Chunk version at encode time.
    pub version: i32,
    /// The 4096 decoded block ids, in XZY storage order.
    pub blocks: Box<[BlockId; CHUNK_DIM3Z]>,
}

/// Encodes a chunk into a full, framed `CHUNK_FULL` payload, picking the smallest of the three
/// compression modes and applying deflate on top if it helps.
pub fn encode_chunk_frame(seq: u32, cx: i32, cy: i32, cz: i32, version: i32, chunk: &Chunk) -> Vec<u8> {
    let mut dense = [BlockId::AIR; CHUNK_DIM3Z];
    chunk.copy_dense(&mut dense);
    encode_dense_frame(seq, cx, cy, cz, version, &dense)
}

/// Same as [`encode_chunk_frame`] but from an already-flattened block array (what the generator
/// and worker pools pass around).
pub fn encode_dense_frame(seq: u32, cx: i32, cy: i32, cz: i32, version: i32, blocks: &[BlockId; CHUNK_DIM3Z]) -> Vec<u8> {
    let candidates = [(MODE_RAW, Some(encode_raw(blocks))), (MODE_RLE, Some(encode_rle(blocks))), (MODE_PALETTE, encode_palette(blocks))];
    let (mode, mut payload) = candidates
        .into_iter()
        .filter_map(|(mode, payload)| payload.map(|p| (mode, p)))
        .min_by_key(|(_, p)| p.len())
        .expect("raw and RLE candidates always succeed");
    let mut mode_byte = mode;
    if let Some(deflated) = try_deflate(&payload) {
        if deflated.len() + DEFLATE_MIN_GAIN <= payload.len() {
            payload = deflated;
            mode_byte |= ZLIB_FLAG;
        }
    }
    build_frame(seq, cx, cy, cz, version, mode_byte, &payload)
}

fn build_frame(seq: u32, cx: i32, cy: i32, cz: i32, version: i32, mode_byte: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.write_u8(CHUNK_FULL_MSG_TYPE).unwrap();
    buf.write_u32::<LittleEndian>(seq).unwrap();
    buf.write_i32::<LittleEndian>(cx).unwrap();
    buf.write_i32::<LittleEndian>(cy).unwrap();
    buf.write_i32::<LittleEndian>(cz).unwrap();
    buf.write_i32::<LittleEndian>(version).unwrap();
    buf.write_u8(mode_byte).unwrap();
    buf.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
    buf.extend_from_slice(payload);
    buf
}

/// Decodes a full `CHUNK_FULL` frame, inflating and inverting whichever mode was used.
pub fn decode_chunk_frame(bytes: &[u8]) -> Result<DecodedChunkFrame, CodecError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(CodecError::Truncated(bytes.len()));
    }
    let mut cur = bytes;
    let msg_type = cur.read_u8()?;
    if msg_type != CHUNK_FULL_MSG_TYPE {
        return Err(CodecError::WrongMessageType(msg_type));
    }
    let seq = cur.read_u32::<LittleEndian>()?;
    let cx = cur.read_i32::<LittleEndian>()?;
    let cy = cur.read_i32::<LittleEndian>()?;
    let cz = cur.read_i32::<LittleEndian>()?;
    let version = cur.read_i32::<LittleEndian>()?;
    let mode_byte = cur.read_u8()?;
    let payload_len = cur.read_u32::<LittleEndian>()?;
    if cur.len() as u32 != payload_len {
        return Err(CodecError::LengthMismatch {
            header: payload_len,
            actual: cur.len(),
        });
    }

    let mode = mode_byte & MODE_MASK;
    let zlib = mode_byte & ZLIB_FLAG != 0;
    let inflated;
    let payload: &[u8] = if zlib {
        inflated = inflate(cur)?;
        &inflated
    } else {
        cur
    };

    let blocks = match mode {
        MODE_RAW => decode_raw(payload),
        MODE_RLE => decode_rle(payload),
        MODE_PALETTE => decode_palette(payload)?,
        other => return Err(CodecError::UnknownMode(other)),
    };

    Ok(DecodedChunkFrame {
        seq,
        cx,
        cy,
        cz,
        version,
        blocks: Box::new(blocks),
    })
}

fn try_deflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::with_capacity(data.len()), Compression::default());
    enc.write_all(data).ok()?;
    enc.finish().ok()
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut dec = ZlibDecoder::new(data);
    let mut out = Vec::new();
    dec.read_to_end(&mut out)?;
    Ok(out)
}

fn encode_raw(blocks: &[BlockId; CHUNK_DIM3Z]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CHUNK_DIM3Z * 2);
    for block in blocks {
        buf.write_u16::<LittleEndian>(block.0).unwrap();
    }
    buf
}

fn decode_raw(payload: &[u8]) -> [BlockId; CHUNK_DIM3Z] {
    let mut out = [BlockId::AIR; CHUNK_DIM3Z];
    let mut cur = payload;
    for slot in out.iter_mut() {
        match cur.read_u16::<LittleEndian>() {
            Ok(v) => *slot = BlockId(v),
            Err(_) => break,
        }
    }
    out
}

fn encode_rle(blocks: &[BlockId; CHUNK_DIM3Z]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut i = 0;
    while i < CHUNK_DIM3Z {
        let value = blocks[i];
        let mut run = 1usize;
        while i + run < CHUNK_DIM3Z && blocks[i + run] == value && run < 65535 {
            run += 1;
        }
        buf.write_u16::<LittleEndian>(run as u16).unwrap();
        buf.write_u16::<LittleEndian>(value.0).unwrap();
        i += run;
    }
    buf
}

fn decode_rle(payload: &[u8]) -> [BlockId; CHUNK_DIM3Z] {
    let mut out = [BlockId::AIR; CHUNK_DIM3Z];
    let mut cur = payload;
    let mut i = 0;
    while i < CHUNK_DIM3Z {
        let (Ok(run), Ok(value)) = (cur.read_u16::<LittleEndian>(), cur.read_u16::<LittleEndian>()) else {
            break;
        };
        for _ in 0..run {
            if i >= CHUNK_DIM3Z {
                break;
            }
            out[i] = BlockId(value);
            i += 1;
        }
    }
    out
}

fn bits_needed(palette_len: usize) -> u8 {
    let mut bits = 1u8;
    while (1usize << bits) < palette_len {
        bits += 1;
    }
    bits
}

/// Max distinct block ids the palette mode's one-byte length prefix can address.
const MAX_PALETTE_LEN: usize = 256;

/// Builds the palette-mode candidate, or `None` if the chunk has too many distinct block ids
/// for the one-byte palette length prefix — the caller then falls back to raw/RLE.
fn encode_palette(blocks: &[BlockId; CHUNK_DIM3Z]) -> Option<Vec<u8>> {
    let mut palette: Vec<BlockId> = Vec::new();
    let mut indices: Vec<u32> = Vec::with_capacity(CHUNK_DIM3Z);
    for &block in blocks {
        let idx = match palette.iter().position(|&p| p == block) {
            Some(pos) => pos,
            None => {
                if palette.len() == MAX_PALETTE_LEN {
                    return None;
                }
                palette.push(block);
                palette.len() - 1
            }
        };
        indices.push(idx as u32);
    }

    let bits_per_entry = bits_needed(palette.len());
    let mut bitstream: BitVec<u8, Lsb0> = BitVec::with_capacity(CHUNK_DIM3Z * bits_per_entry as usize);
    for idx in indices {
        for bit in 0..bits_per_entry {
            bitstream.push((idx >> bit) & 1 != 0);
        }
    }
    let packed = bitstream.into_vec();

    let mut buf = Vec::with_capacity(1 + palette.len() * 2 + 1 + 4 + packed.len());
    // `palette.len()` is in `1..=MAX_PALETTE_LEN`; stored as `len - 1` so the full range fits
    // in a byte and round-trips (`decode_palette` mirrors this with a `+ 1`).
    buf.write_u8((palette.len() - 1) as u8).unwrap();
    for entry in &palette {
        buf.write_u16::<LittleEndian>(entry.0).unwrap();
    }
    buf.write_u8(bits_per_entry).unwrap();
    buf.write_u32::<LittleEndian>(packed.len() as u32).unwrap();
    buf.extend_from_slice(&packed);
    Some(buf)
}

fn decode_palette(payload: &[u8]) -> Result<[BlockId; CHUNK_DIM3Z], CodecError> {
    let mut cur = payload;
    // Stored as `len - 1` (see `encode_palette`), so this is always a valid length in `1..=256`.
    let palette_len = cur.read_u8()? as usize + 1;
    let mut palette = Vec::with_capacity(palette_len);
    for _ in 0..palette_len {
        palette.push(BlockId(cur.read_u16::<LittleEndian>()?));
    }
    let bits_per_entry = cur.read_u8()? as usize;
    let packed_len = cur.read_u32::<LittleEndian>()? as usize;
    if cur.len() < packed_len {
        return Err(CodecError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "packed bitstream shorter than declared length",
        )));
    }
    let packed = &cur[..packed_len];
    let bits: &BitSlice<u8, Lsb0> = BitSlice::from_slice(packed);

    let mut out = [BlockId::AIR; CHUNK_DIM3Z];
    for (i, slot) in out.iter_mut().enumerate() {
        let start = i * bits_per_entry;
        if start + bits_per_entry > bits.len() {
            break;
        }
        let mut idx: u32 = 0;
        for bit in 0..bits_per_entry {
            if bits[start + bit] {
                idx |= 1 << bit;
            }
        }
        *slot = *palette
            .get(idx as usize)
            .ok_or(CodecError::IllegalPaletteIndex)?;
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    fn alternating_chunk() -> [BlockId; CHUNK_DIM3Z] {
        let mut blocks = [BlockId::AIR; CHUNK_DIM3Z];
        for (i, slot) in blocks.iter_mut().enumerate() {
            *slot = if (i / 16) % 2 == 0 { BlockId::AIR } else { BlockId(1) };
        }
        blocks
    }

    #[test]
    fn round_trip_every_mode() {
        let blocks = alternating_chunk();
        let frame = encode_dense_frame(7, 1, 2, 3, 4, &blocks);
        let decoded = decode_chunk_frame(&frame).unwrap();
        assert_eq!(decoded.seq, 7);
        assert_eq!((decoded.cx, decoded.cy, decoded.cz), (1, 2, 3));
        assert_eq!(decoded.version, 4);
        assert_eq!(*decoded.blocks, blocks);
    }

    #[test]
    fn header_length_matches_payload() {
        let blocks = alternating_chunk();
        let frame = encode_dense_frame(0, 0, 0, 0, 1, &blocks);
        let declared = u32::from_le_bytes(frame[22..26].try_into().unwrap()) as usize;
        assert_eq!(frame.len(), FRAME_HEADER_LEN + declared);
    }

    #[test]
    fn s1_codec_determinism_picks_palette() {
        let blocks = alternating_chunk();
        let raw = encode_raw(&blocks);
        let rle = encode_rle(&blocks);
        let palette = encode_palette(&blocks).unwrap();
        assert!(palette.len() < raw.len());
        assert!(palette.len() <= rle.len());
        assert_eq!(palette[0], 1); // palette_len - 1 (2 distinct block ids)
        assert_eq!(palette[5], 1); // bits_per_entry, after 1 (len) + 2*2 (entries)
        let packed_len = u32::from_le_bytes(palette[6..10].try_into().unwrap());
        assert_eq!(packed_len, 512);
    }

    #[test]
    fn palette_length_over_budget_falls_back_to_another_mode() {
        let mut blocks = [BlockId::AIR; CHUNK_DIM3Z];
        for (i, slot) in blocks.iter_mut().enumerate() {
            *slot = BlockId((i % 300) as u16); // 300 distinct ids, over the 256-entry palette budget
        }
        assert!(encode_palette(&blocks).is_none());

        let frame = encode_dense_frame(0, 0, 0, 0, 1, &blocks);
        let mode_byte = frame[21];
        assert_ne!(mode_byte & MODE_MASK, MODE_PALETTE);
        let decoded = decode_chunk_frame(&frame).unwrap();
        assert_eq!(*decoded.blocks, blocks, "round trip must hold even when palette mode is skipped");
    }

    #[test]
    fn palette_mode_round_trips_at_exactly_the_256_entry_budget() {
        let mut blocks = [BlockId::AIR; CHUNK_DIM3Z];
        for (i, slot) in blocks.iter_mut().enumerate() {
            *slot = BlockId((i % 256) as u16); // exactly at the budget, still representable
        }
        let palette = encode_palette(&blocks).expect("256 distinct ids must still fit");
        assert_eq!(palette[0], 255); // palette_len - 1

        let frame = encode_dense_frame(0, 0, 0, 0, 1, &blocks);
        let decoded = decode_chunk_frame(&frame).unwrap();
        assert_eq!(*decoded.blocks, blocks);
    }

    #[test]
    fn s2_uniform_chunk_selects_rle_without_deflate() {
        let blocks = [BlockId(1); CHUNK_DIM3Z];
        let frame = encode_dense_frame(0, 0, 0, 0, 1, &blocks);
        let mode_byte = frame[21];
        assert_eq!(mode_byte & MODE_MASK, MODE_RLE);
        assert_eq!(mode_byte & ZLIB_FLAG, 0);
        let decoded = decode_chunk_frame(&frame).unwrap();
        assert_eq!(*decoded.blocks, blocks);
    }

    #[test]
    fn raw_mode_shortfall_is_implicit_air() {
        let mut blocks = [BlockId::AIR; CHUNK_DIM3Z];
        blocks[0] = BlockId(9);
        let truncated = &encode_raw(&blocks)[..4]; // only the first block id
        let decoded = decode_raw(truncated);
        assert_eq!(decoded[0], BlockId(9));
        assert_eq!(decoded[1], BlockId::AIR);
        assert_eq!(decoded[CHUNK_DIM3Z - 1], BlockId::AIR);
    }
}
