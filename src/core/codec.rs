//! Tokio codec for framing packets over a byte stream.
//!
//! The transport frames every packet with a varint byte-length prefix. The
//! decoder validates the declared length against [`MAX_PACKET_SIZE`] before
//! reserving any memory, so a hostile peer cannot force unbounded
//! allocation with a single forged prefix.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::writer::varint_len;
use crate::error::{constants, ProtocolError};

/// Maximum framed packet size (2MB).
pub const MAX_PACKET_SIZE: usize = 2 * 1024 * 1024;

/// Widest legal length prefix; 5 varint bytes already exceed the size cap.
const MAX_PREFIX_BYTES: usize = 5;

/// Varint length framing for whole packets.
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        // Decode the length prefix without consuming; the frame may still be
        // partial.
        let mut len: u64 = 0;
        let mut prefix = 0;
        loop {
            if prefix >= src.len() {
                return Ok(None);
            }
            let b = src[prefix];
            len |= ((b & 0x7F) as u64) << (7 * prefix as u32);
            prefix += 1;
            if b & 0x80 == 0 {
                break;
            }
            if prefix == MAX_PREFIX_BYTES {
                return Err(ProtocolError::Malformed(constants::ERR_VARINT_TOO_LONG));
            }
        }

        let len = len as usize;
        if len > MAX_PACKET_SIZE {
            return Err(ProtocolError::Malformed(constants::ERR_OVERSIZED_FRAME));
        }
        if src.len() < prefix + len {
            src.reserve(prefix + len - src.len());
            return Ok(None);
        }

        src.advance(prefix);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::Malformed(constants::ERR_OVERSIZED_FRAME));
        }

        let mut val = item.len() as u64;
        dst.reserve(varint_len(val) + item.len());
        while val > 0x7F {
            dst.put_u8(0x80 | (val & 0x7F) as u8);
            val >>= 7;
        }
        dst.put_u8(val as u8);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
