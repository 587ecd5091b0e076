//! QUIC-style variable-length integers and the primitive field codecs built
//! on top of them.
//!
//! Encoding (RFC 9000 §16):
//! - `0x00..0x3F` → 1 byte (6 bits)
//! - `0x40..0x3FFF` → 2 bytes (14 bits), prefix `01`
//! - `0x4000..0x3FFF_FFFF` → 4 bytes (30 bits), prefix `10`
//! - up to `2^62 - 1` → 8 bytes (62 bits), prefix `11`

use bytes::{Buf, BufMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{DecodeError, EncodeError};

/// Largest value a varint can carry.
pub const MAX_U62: u64 = (1 << 62) - 1;
/// Largest sequence number the protocol allows for group/object/priority.
pub const MAX_U53: u64 = (1 << 53) - 1;

pub trait Encode {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError>;
}

pub trait Decode: Sized {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError>;
}

pub fn varint_len(v: u64) -> usize {
    if v < 0x40 {
        1
    } else if v < 0x4000 {
        2
    } else if v < 0x4000_0000 {
        4
    } else {
        8
    }
}

#[expect(clippy::cast_possible_truncation)] // length class guarantees the value fits
pub fn encode_varint<W: BufMut>(v: u64, w: &mut W) -> Result<(), EncodeError> {
    if v > MAX_U62 {
        return Err(EncodeError::BoundsExceeded(v));
    }
    match varint_len(v) {
        1 => w.put_u8(v as u8),
        2 => w.put_u16(0x4000 | v as u16),
        4 => w.put_u32(0x8000_0000 | v as u32),
        _ => w.put_u64(0xC000_0000_0000_0000 | v),
    }
    Ok(())
}

pub fn decode_varint<R: Buf>(r: &mut R) -> Result<u64, DecodeError> {
    if !r.has_remaining() {
        return Err(DecodeError::UnexpectedEnd);
    }
    let len = 1usize << (r.chunk()[0] >> 6);
    if r.remaining() < len {
        return Err(DecodeError::UnexpectedEnd);
    }
    let v = match len {
        1 => u64::from(r.get_u8() & 0x3F),
        2 => u64::from(r.get_u16() & 0x3FFF),
        4 => u64::from(r.get_u32() & 0x3FFF_FFFF),
        _ => r.get_u64() & MAX_U62,
    };
    Ok(v)
}

/// Read one varint from an async byte stream.
pub async fn read_varint<R: AsyncRead + Unpin>(r: &mut R) -> Result<u64, DecodeError> {
    let first = r.read_u8().await?;
    let len = 1usize << (first >> 6);
    let mut v = u64::from(first & 0x3F);
    for _ in 1..len {
        v = (v << 8) | u64::from(r.read_u8().await?);
    }
    Ok(v)
}

pub async fn read_u53<R: AsyncRead + Unpin>(r: &mut R) -> Result<u64, DecodeError> {
    let v = read_varint(r).await?;
    check_u53(v)
}

pub fn decode_u53<R: Buf>(r: &mut R) -> Result<u64, DecodeError> {
    check_u53(decode_varint(r)?)
}

fn check_u53(v: u64) -> Result<u64, DecodeError> {
    if v > MAX_U53 {
        return Err(DecodeError::BoundsExceeded(v));
    }
    Ok(v)
}

pub fn encode_u53<W: BufMut>(v: u64, w: &mut W) -> Result<(), EncodeError> {
    if v > MAX_U53 {
        return Err(EncodeError::BoundsExceeded(v));
    }
    encode_varint(v, w)
}

impl Encode for String {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        encode_varint(self.len() as u64, w)?;
        w.put_slice(self.as_bytes());
        Ok(())
    }
}

impl Decode for String {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        let len = decode_varint(r)?;
        let len = usize::try_from(len).map_err(|_| DecodeError::BoundsExceeded(len))?;
        if r.remaining() < len {
            return Err(DecodeError::UnexpectedEnd);
        }
        let mut buf = vec![0; len];
        r.copy_to_slice(&mut buf);
        String::from_utf8(buf).map_err(|_| DecodeError::InvalidString)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::one_byte(37, &[0x25])]
    #[case::two_bytes(15_293, &[0x7b, 0xbd])]
    #[case::four_bytes(494_878_333, &[0x9d, 0x7f, 0x3e, 0x7d])]
    #[case::eight_bytes(151_288_809_941_952_652, &[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c])]
    fn rfc9000_vectors(#[case] value: u64, #[case] wire: &[u8]) {
        let mut buf = BytesMut::new();
        encode_varint(value, &mut buf).unwrap();
        assert_eq!(&buf[..], wire);
        assert_eq!(decode_varint(&mut &wire[..]).unwrap(), value);
    }

    #[tokio::test]
    async fn async_reader_matches_buf_decoder() {
        let wire: &[u8] = &[0x9d, 0x7f, 0x3e, 0x7d, 0x25];
        let mut r = wire;
        assert_eq!(read_varint(&mut r).await.unwrap(), 494_878_333);
        assert_eq!(read_varint(&mut r).await.unwrap(), 37);
        assert_eq!(read_varint(&mut r).await, Err(DecodeError::UnexpectedEnd));
    }

    #[test]
    fn varint_over_62_bits_is_rejected() {
        let mut buf = BytesMut::new();
        assert_eq!(
            encode_varint(MAX_U62 + 1, &mut buf),
            Err(EncodeError::BoundsExceeded(MAX_U62 + 1))
        );
    }

    #[test]
    fn u53_bound_enforced_on_decode() {
        let mut buf = BytesMut::new();
        encode_varint(MAX_U53 + 1, &mut buf).unwrap();
        assert_eq!(
            decode_u53(&mut buf.freeze()),
            Err(DecodeError::BoundsExceeded(MAX_U53 + 1))
        );
    }

    #[test]
    fn truncated_varint() {
        assert_eq!(
            decode_varint(&mut &[0x7b][..]),
            Err(DecodeError::UnexpectedEnd)
        );
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        let wire: &[u8] = &[0x02, 0xff, 0xfe];
        assert_eq!(
            String::decode(&mut &wire[..]),
            Err(DecodeError::InvalidString)
        );
    }
}
