//! Message framing over TCP streams and UDP datagrams

use crate::error::WireError;
use crate::header::{HEADER_LEN, MAX_MSG_LEN, MsgHeader, MsgType};
use crate::msgs::AnyMsg;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Header fields a sender controls per frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameMeta {
    pub flags: u16,
    pub requestor: u32,
    pub seq: u64,
    pub seq_done: u64,
}

impl FrameMeta {
    /// Carry-over of the mirrored fields of an incoming header, for
    /// forwarding a message to the secondary.
    #[must_use]
    pub const fn forwarded_from(hdr: &MsgHeader, flags: u16) -> Self {
        Self {
            flags,
            requestor: hdr.requestor,
            seq: hdr.seq,
            seq_done: hdr.seq_done,
        }
    }

    fn apply(self, hdr: &mut MsgHeader) {
        hdr.flags = self.flags;
        hdr.requestor = self.requestor;
        hdr.seq = self.seq;
        hdr.seq_done = self.seq_done;
    }
}

/// Write one framed message.
pub async fn write_msg<W: AsyncWrite + Unpin>(
    w: &mut W,
    msg: &AnyMsg,
    meta: FrameMeta,
) -> Result<(), WireError> {
    let mut payload = BytesMut::with_capacity(256);
    msg.encode_payload(&mut payload);
    if payload.len() > MAX_MSG_LEN - HEADER_LEN {
        return Err(WireError::TooLarge(payload.len()));
    }

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    let mut hdr = MsgHeader::new(msg.msg_type());
    meta.apply(&mut hdr);
    hdr.payload_len = payload.len() as u32;
    hdr.encode(&mut frame);
    frame.extend_from_slice(&payload);

    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}

/// Read one framed message. Fails fast on bad magic or oversized
/// declared lengths, before any payload byte is read.
pub async fn read_msg<R: AsyncRead + Unpin>(r: &mut R) -> Result<(MsgHeader, AnyMsg), WireError> {
    let mut hdr_buf = [0u8; HEADER_LEN];
    r.read_exact(&mut hdr_buf).await?;
    let hdr = MsgHeader::decode(Bytes::copy_from_slice(&hdr_buf))?;

    let mut payload = vec![0u8; hdr.payload_len as usize];
    r.read_exact(&mut payload).await?;

    let msg = AnyMsg::decode(hdr.msg_type, Bytes::from(payload))?;
    Ok((hdr, msg))
}

/// Write a message whose body is already one big serialized blob: the
/// header declares the full length up front and the body goes straight
/// from the caller's buffer to the socket, skipping payload assembly.
/// The receiver decodes it through the ordinary path (u32 length prefix
/// + body), so only the send side is special.
pub async fn write_stream_msg<W: AsyncWrite + Unpin>(
    w: &mut W,
    msg_type: MsgType,
    meta: FrameMeta,
    body: &[u8],
) -> Result<(), WireError> {
    let payload_len = 4 + body.len();
    if payload_len > MAX_MSG_LEN - HEADER_LEN {
        return Err(WireError::TooLarge(payload_len));
    }

    let mut head = BytesMut::with_capacity(HEADER_LEN + 4);
    let mut hdr = MsgHeader::new(msg_type);
    meta.apply(&mut hdr);
    hdr.payload_len = payload_len as u32;
    hdr.encode(&mut head);
    head.put_u32_le(body.len() as u32);

    w.write_all(&head).await?;
    w.write_all(body).await?;
    w.flush().await?;
    Ok(())
}

/// Pack a message into a single UDP datagram.
#[must_use]
pub fn encode_datagram(msg: &AnyMsg, meta: FrameMeta) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(256);
    msg.encode_payload(&mut payload);

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    let mut hdr = MsgHeader::new(msg.msg_type());
    meta.apply(&mut hdr);
    hdr.payload_len = payload.len() as u32;
    hdr.encode(&mut frame);
    frame.extend_from_slice(&payload);
    frame.to_vec()
}

/// Decode a message from a received UDP datagram.
pub fn decode_datagram(datagram: &[u8]) -> Result<(MsgHeader, AnyMsg), WireError> {
    if datagram.len() < HEADER_LEN {
        return Err(WireError::Truncated);
    }
    let hdr = MsgHeader::decode(Bytes::copy_from_slice(&datagram[..HEADER_LEN]))?;
    let payload_end = HEADER_LEN + hdr.payload_len as usize;
    if datagram.len() < payload_end {
        return Err(WireError::Truncated);
    }
    let msg = AnyMsg::decode(
        hdr.msg_type,
        Bytes::copy_from_slice(&datagram[HEADER_LEN..payload_end]),
    )?;
    Ok((hdr, msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::FLAG_HAS_SEQUENCE_NUMBER;
    use crate::msgs::{Ack, GenericResponse, ResyncSessionStore};

    #[tokio::test]
    async fn test_tcp_frame_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        let msg = AnyMsg::Ack(Ack {
            ack_id: "hb-9".to_string(),
        });
        let meta = FrameMeta {
            flags: FLAG_HAS_SEQUENCE_NUMBER,
            requestor: 301,
            seq: 5,
            seq_done: 2,
        };
        write_msg(&mut a, &msg, meta).await.unwrap();

        let (hdr, decoded) = read_msg(&mut b).await.unwrap();
        assert_eq!(hdr.msg_type, MsgType::Ack);
        assert_eq!(hdr.requestor, 301);
        assert_eq!(hdr.seq, 5);
        assert_eq!(hdr.seq_done, 2);
        assert!(hdr.has_sequence_number());
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn test_stream_msg_decodes_like_ordinary_frame() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        let body = vec![7u8; 1024];
        write_stream_msg(
            &mut a,
            MsgType::ResyncSessionStore,
            FrameMeta::default(),
            &body,
        )
        .await
        .unwrap();

        let (hdr, decoded) = read_msg(&mut b).await.unwrap();
        assert_eq!(hdr.msg_type, MsgType::ResyncSessionStore);
        match decoded {
            AnyMsg::ResyncSessionStore(ResyncSessionStore { session_data }) => {
                assert_eq!(session_data, body);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_datagram_round_trip() {
        let msg = AnyMsg::GenericResponse(GenericResponse::new_seq_base(99));
        let datagram = encode_datagram(&msg, FrameMeta::default());
        let (hdr, decoded) = decode_datagram(&datagram).unwrap();
        assert_eq!(hdr.msg_type, MsgType::GenericResponse);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_datagram_truncated() {
        let msg = AnyMsg::GenericResponse(GenericResponse::new_seq_base(99));
        let datagram = encode_datagram(&msg, FrameMeta::default());
        assert!(matches!(
            decode_datagram(&datagram[..datagram.len() - 1]),
            Err(WireError::Truncated)
        ));
    }
}
