//! On-disk commit frames.
//!
//! A store file is a short magic preamble followed by a sequence of frames.
//! Each frame is the atom of durability: it carries every staged operation
//! of one commit, preceded by a little-endian header and followed by a
//! crc32c over header and payload. A frame whose trailing bytes are missing
//! is a torn write and is discarded on open; a fully present frame with a
//! bad checksum is corruption.

use std::io::{self, Write};

use crc32c::Crc32cWriter;

use crate::codec::Reader;
use crate::error::DecodeError;
use crate::RecordId;

pub(crate) const MAGIC: [u8; 4] = *b"qdbr";
pub(crate) const FORMAT_VERSION: u8 = 1;
/// Magic + format version.
pub(crate) const PREAMBLE_LEN: usize = MAGIC.len() + 1;

const TAG_PUT: u8 = 0;
const TAG_UPDATE: u8 = 1;
const TAG_DELETE: u8 = 2;
const TAG_PREALLOCATE: u8 = 3;

/// One staged mutation, as serialized into a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    /// Write `bytes` at a freshly allocated record id.
    Put { recid: RecordId, bytes: Vec<u8> },
    /// Overwrite (or upsert) the value at `recid`.
    Update { recid: RecordId, bytes: Vec<u8> },
    /// Remove `recid` entirely.
    Delete { recid: RecordId },
    /// Reserve `recid` without a value. Replaying this over an existing
    /// record clears its value while keeping the id allocated.
    Preallocate { recid: RecordId },
}

impl Op {
    pub(crate) fn recid(&self) -> RecordId {
        match *self {
            Op::Put { recid, .. }
            | Op::Update { recid, .. }
            | Op::Delete { recid }
            | Op::Preallocate { recid } => recid,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Op::Put { recid, bytes } => {
                out.push(TAG_PUT);
                out.extend_from_slice(&recid.to_le_bytes());
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
            Op::Update { recid, bytes } => {
                out.push(TAG_UPDATE);
                out.extend_from_slice(&recid.to_le_bytes());
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
            Op::Delete { recid } => {
                out.push(TAG_DELETE);
                out.extend_from_slice(&recid.to_le_bytes());
            }
            Op::Preallocate { recid } => {
                out.push(TAG_PREALLOCATE);
                out.extend_from_slice(&recid.to_le_bytes());
            }
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let tag = r.get_u8()?;
        let recid = r.get_i64()?;
        match tag {
            TAG_PUT | TAG_UPDATE => {
                let len = r.get_u32()? as usize;
                let bytes = r.get_bytes(len)?.to_vec();
                Ok(if tag == TAG_PUT {
                    Op::Put { recid, bytes }
                } else {
                    Op::Update { recid, bytes }
                })
            }
            TAG_DELETE => Ok(Op::Delete { recid }),
            TAG_PREALLOCATE => Ok(Op::Preallocate { recid }),
            other => Err(DecodeError::InvalidTag(other)),
        }
    }
}

/// Fixed-size frame header: `{min_op_seq: u64, n: u32, len: u32}`.
pub(crate) struct FrameHeader {
    /// Sequence number of the first op in this frame, counted from the
    /// beginning of the store's life.
    pub min_op_seq: u64,
    /// Number of ops in the payload.
    pub n: u32,
    /// Payload length in bytes.
    pub len: u32,
}

impl FrameHeader {
    pub(crate) const LEN: usize = 8 + 4 + 4;
    pub(crate) const TRAILER_LEN: usize = 4; // crc32c
}

/// Serialize and write one frame, returning its crc32c.
pub(crate) fn write_frame<W: Write>(out: W, min_op_seq: u64, ops: &[Op]) -> io::Result<u32> {
    let mut payload = Vec::new();
    for op in ops {
        op.encode(&mut payload);
    }

    let mut out = Crc32cWriter::new(out);
    out.write_all(&min_op_seq.to_le_bytes())?;
    out.write_all(&(ops.len() as u32).to_le_bytes())?;
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(&payload)?;

    let crc = out.crc32c();
    let mut out = out.into_inner();
    out.write_all(&crc.to_le_bytes())?;

    Ok(crc)
}

/// Outcome of reading one frame from the replay buffer.
pub(crate) enum ReplayStep {
    /// A complete, checksum-verified frame. `consumed` is its total size in
    /// bytes including header and trailer.
    Frame {
        min_op_seq: u64,
        ops: Vec<Op>,
        consumed: usize,
    },
    /// The buffer ends inside a frame: a torn write from a crash before the
    /// commit finished. The caller truncates here.
    Torn,
    /// Clean end of the buffer.
    End,
}

/// Read the frame starting at `buf[offset..]`.
///
/// `offset` is only used for error reporting. A frame that is fully present
/// but fails its checksum yields `Err(offset)`, which the caller maps to
/// [`crate::StorageError::Corruption`].
pub(crate) fn read_frame(buf: &[u8], offset: usize) -> Result<ReplayStep, u64> {
    let rest = &buf[offset..];
    if rest.is_empty() {
        return Ok(ReplayStep::End);
    }
    if rest.len() < FrameHeader::LEN {
        return Ok(ReplayStep::Torn);
    }

    let mut r = Reader::new(rest);
    let header = FrameHeader {
        min_op_seq: r.get_u64().expect("length checked"),
        n: r.get_u32().expect("length checked"),
        len: r.get_u32().expect("length checked"),
    };

    let total = FrameHeader::LEN + header.len as usize + FrameHeader::TRAILER_LEN;
    if rest.len() < total {
        return Ok(ReplayStep::Torn);
    }

    let body_end = FrameHeader::LEN + header.len as usize;
    let payload = &rest[FrameHeader::LEN..body_end];
    let stored_crc =
        u32::from_le_bytes(rest[body_end..total].try_into().expect("length checked"));
    let actual_crc = crc32c::crc32c(&rest[..body_end]);
    if stored_crc != actual_crc {
        return Err(offset as u64);
    }

    let mut r = Reader::new(payload);
    let mut ops = Vec::with_capacity(header.n as usize);
    for _ in 0..header.n {
        // The checksum already matched, so a malformed op is corruption,
        // not a torn write.
        let op = Op::decode(&mut r).map_err(|_| offset as u64)?;
        ops.push(op);
    }
    if r.expect_end().is_err() {
        return Err(offset as u64);
    }

    Ok(ReplayStep::Frame {
        min_op_seq: header.min_op_seq,
        ops,
        consumed: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn op_strategy() -> impl Strategy<Value = Op> {
        let recid = 1i64..1_000_000;
        prop_oneof![
            (recid.clone(), proptest::collection::vec(any::<u8>(), 0..64))
                .prop_map(|(recid, bytes)| Op::Put { recid, bytes }),
            (recid.clone(), proptest::collection::vec(any::<u8>(), 0..64))
                .prop_map(|(recid, bytes)| Op::Update { recid, bytes }),
            recid.clone().prop_map(|recid| Op::Delete { recid }),
            recid.prop_map(|recid| Op::Preallocate { recid }),
        ]
    }

    proptest! {
        #[test]
        fn frame_roundtrip(ops in proptest::collection::vec(op_strategy(), 0..32), seq in any::<u32>()) {
            let mut buf = Vec::new();
            write_frame(&mut buf, seq as u64, &ops).unwrap();

            match read_frame(&buf, 0).unwrap() {
                ReplayStep::Frame { min_op_seq, ops: decoded, consumed } => {
                    prop_assert_eq!(min_op_seq, seq as u64);
                    prop_assert_eq!(decoded, ops);
                    prop_assert_eq!(consumed, buf.len());
                }
                _ => prop_assert!(false, "expected a complete frame"),
            }
        }
    }

    #[test]
    fn torn_frame_detected() {
        let mut buf = Vec::new();
        write_frame(
            &mut buf,
            0,
            &[Op::Put {
                recid: 1,
                bytes: vec![1, 2, 3],
            }],
        )
        .unwrap();
        buf.truncate(buf.len() - 3);

        assert!(matches!(read_frame(&buf, 0), Ok(ReplayStep::Torn)));
    }

    #[test]
    fn flipped_bit_fails_checksum() {
        let mut buf = Vec::new();
        write_frame(
            &mut buf,
            0,
            &[Op::Put {
                recid: 1,
                bytes: vec![1, 2, 3],
            }],
        )
        .unwrap();
        let mid = FrameHeader::LEN + 1;
        buf[mid] ^= 0x40;

        assert_eq!(read_frame(&buf, 0).err(), Some(0));
    }
}
