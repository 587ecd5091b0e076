use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::trace;

use crate::{
    coding::{decode_u53, decode_varint, encode_u53, encode_varint, read_u53, read_varint},
    error::{DecodeError, EncodeError, SessionError, SessionResult},
    transport::{RecvStream, SendStream, Transport},
};

/// Header type: payload runs to the end of the stream.
const TYPE_UNSIZED: u8 = 0;
/// Header type: explicit payload size follows the header fields.
const TYPE_SIZED: u8 = 2;

/// Prefix written before the payload of every object stream.
///
/// `ntp_timestamp` and `expires` travel as zero when absent, so a zero value
/// always decodes to `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Subscription id the object belongs to.
    pub track: u64,
    pub group: u64,
    pub object: u64,
    pub priority: u64,
    /// Producer wall-clock time in milliseconds.
    pub ntp_timestamp: Option<u64>,
    /// Expiration in seconds.
    pub expires: Option<u64>,
    pub size: Option<u64>,
}

impl ObjectHeader {
    fn header_type(&self) -> u8 {
        if self.size.is_some_and(|s| s > 0) {
            TYPE_SIZED
        } else {
            TYPE_UNSIZED
        }
    }

    pub fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        let ty = self.header_type();
        w.put_u8(ty);
        encode_varint(self.track, w)?;
        encode_u53(self.group, w)?;
        encode_u53(self.object, w)?;
        encode_u53(self.priority, w)?;
        encode_u53(self.ntp_timestamp.unwrap_or(0), w)?;
        encode_u53(self.expires.unwrap_or(0), w)?;
        if let Some(size) = self.size.filter(|_| ty == TYPE_SIZED) {
            encode_u53(size, w)?;
        }
        Ok(())
    }

    pub fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        if !r.has_remaining() {
            return Err(DecodeError::UnexpectedEnd);
        }
        let ty = r.get_u8();
        let sized = parse_type(ty)?;
        Ok(Self {
            track: decode_varint(r)?,
            group: decode_u53(r)?,
            object: decode_u53(r)?,
            priority: decode_u53(r)?,
            ntp_timestamp: non_zero(decode_u53(r)?),
            expires: non_zero(decode_u53(r)?),
            size: if sized { Some(decode_u53(r)?) } else { None },
        })
    }

    /// Decode the header from the front of an object stream, leaving the
    /// payload unread.
    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, DecodeError> {
        let sized = parse_type(r.read_u8().await?)?;
        Ok(Self {
            track: read_varint(r).await?,
            group: read_u53(r).await?,
            object: read_u53(r).await?,
            priority: read_u53(r).await?,
            ntp_timestamp: non_zero(read_u53(r).await?),
            expires: non_zero(read_u53(r).await?),
            size: if sized { Some(read_u53(r).await?) } else { None },
        })
    }
}

fn parse_type(ty: u8) -> Result<bool, DecodeError> {
    match ty {
        TYPE_UNSIZED => Ok(false),
        TYPE_SIZED => Ok(true),
        other => Err(DecodeError::InvalidObjectType(other)),
    }
}

fn non_zero(v: u64) -> Option<u64> {
    (v != 0).then_some(v)
}

/// Data plane: one object per unidirectional stream.
#[derive(Clone)]
pub struct Objects {
    transport: Arc<dyn Transport>,
}

impl Objects {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Open a stream and write `header`. The caller writes the payload and
    /// shuts the stream down.
    pub async fn send(&self, header: &ObjectHeader) -> SessionResult<SendStream> {
        trace!(?header, "object send");
        let mut stream = self.transport.open_uni().await?;
        let mut buf = BytesMut::new();
        header.encode(&mut buf)?;
        stream
            .write_all(&buf)
            .await
            .map_err(SessionError::transport)?;
        Ok(stream)
    }

    /// Accept the next incoming stream and decode its header.
    ///
    /// `Ok(None)` once the transport stops delivering streams.
    pub async fn recv(&self) -> SessionResult<Option<(ObjectHeader, RecvStream)>> {
        let Some(mut stream) = self.transport.accept_uni().await? else {
            return Ok(None);
        };
        let header = ObjectHeader::read(&mut stream).await?;
        trace!(?header, "object recv");
        Ok(Some((header, stream)))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn encoded(h: &ObjectHeader) -> Vec<u8> {
        let mut buf = BytesMut::new();
        h.encode(&mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn minimal_header_round_trips() {
        let h = ObjectHeader {
            track: 5,
            group: 10,
            object: 0,
            priority: 0,
            ..Default::default()
        };
        let wire = encoded(&h);
        assert_eq!(wire, [0, 5, 10, 0, 0, 0, 0]);
        assert_eq!(ObjectHeader::decode(&mut &wire[..]).unwrap(), h);
    }

    #[tokio::test]
    async fn sized_header_uses_type_two() {
        let h = ObjectHeader {
            track: 1 << 40,
            group: 77,
            object: 0,
            priority: 2,
            ntp_timestamp: Some(1_700_000_000_123),
            expires: Some(30),
            size: Some(4096),
        };
        let mut wire = encoded(&h);
        assert_eq!(wire[0], 2);
        wire.extend_from_slice(b"payload");

        let mut r = &wire[..];
        let decoded = ObjectHeader::read(&mut r).await.unwrap();
        assert_eq!(decoded, h);
        assert_eq!(decoded.size, Some(4096));
        assert_eq!(r, b"payload");
    }

    #[rstest]
    #[case::one(1)]
    #[case::three(3)]
    #[case::high(0xff)]
    fn invalid_type_is_protocol_error(#[case] ty: u8) {
        let wire = [ty, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            ObjectHeader::decode(&mut &wire[..]),
            Err(DecodeError::InvalidObjectType(ty))
        );
    }

    #[tokio::test]
    async fn truncated_header_fails() {
        let mut r: &[u8] = &[2, 1, 1];
        assert_eq!(
            ObjectHeader::read(&mut r).await,
            Err(DecodeError::UnexpectedEnd)
        );
    }

    #[test]
    fn zero_size_encodes_unsized() {
        let h = ObjectHeader {
            size: Some(0),
            ..Default::default()
        };
        let wire = encoded(&h);
        assert_eq!(wire[0], 0);
        assert_eq!(ObjectHeader::decode(&mut &wire[..]).unwrap().size, None);
    }
}
