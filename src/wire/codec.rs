//! Frame codec: `[u32 tag][u32 len][bincode payload]`.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;
use crate::wire::message::{tag, WireMessage};

const HEADER_LEN: usize = 8;

/// Upper bound on a single frame's payload. A channel announcement for
/// a very large channel stays well under this; anything bigger is a
/// corrupt or hostile stream.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Length/type-prefixed framing over bincode payloads.
///
/// Implements [`Decoder`] for the link read loop and [`Encoder`] for
/// synchronous encoding into the send queue.
#[derive(Debug, Default)]
pub struct WireCodec;

impl Decoder for WireCodec {
    type Item = WireMessage;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireMessage>, WireError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..HEADER_LEN];
        let msg_tag = header.get_u32();
        let len = header.get_u32() as usize;

        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge {
                actual: len,
                limit: MAX_FRAME_LEN,
            });
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len);

        decode_payload(msg_tag, &payload).map(Some)
    }
}

impl Encoder<&WireMessage> for WireCodec {
    type Error = WireError;

    fn encode(&mut self, msg: &WireMessage, dst: &mut BytesMut) -> Result<(), WireError> {
        let payload = encode_payload(msg)?;
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(msg.tag());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

fn encode_payload(msg: &WireMessage) -> Result<Vec<u8>, WireError> {
    let result = match msg {
        WireMessage::Hello(m) => bincode::serialize(m),
        WireMessage::BurstComplete(m) => bincode::serialize(m),
        WireMessage::Sync(m) => bincode::serialize(m),
        WireMessage::Client(m) => bincode::serialize(m),
        WireMessage::Server(m) => bincode::serialize(m),
        WireMessage::Kill(m) => bincode::serialize(m),
        WireMessage::Split(m) => bincode::serialize(m),
        WireMessage::Channel(m) => bincode::serialize(m),
        WireMessage::ChannelMode(m) => bincode::serialize(m),
        WireMessage::Membership(m) => bincode::serialize(m),
        WireMessage::MembershipEnd(m) => bincode::serialize(m),
        WireMessage::PrivateMessage(m) => bincode::serialize(m),
        WireMessage::ChannelMessage(m) => bincode::serialize(m),
    };
    result.map_err(WireError::Encode)
}

fn decode_payload(msg_tag: u32, payload: &[u8]) -> Result<WireMessage, WireError> {
    let decode_err = |source| WireError::Decode {
        tag: msg_tag,
        source,
    };
    let msg = match msg_tag {
        tag::HELLO => WireMessage::Hello(bincode::deserialize(payload).map_err(decode_err)?),
        tag::BURST_COMPLETE => {
            WireMessage::BurstComplete(bincode::deserialize(payload).map_err(decode_err)?)
        }
        tag::SYNC => WireMessage::Sync(bincode::deserialize(payload).map_err(decode_err)?),
        tag::CLIENT => WireMessage::Client(bincode::deserialize(payload).map_err(decode_err)?),
        tag::SERVER => WireMessage::Server(bincode::deserialize(payload).map_err(decode_err)?),
        tag::KILL => WireMessage::Kill(bincode::deserialize(payload).map_err(decode_err)?),
        tag::SPLIT => WireMessage::Split(bincode::deserialize(payload).map_err(decode_err)?),
        tag::CHANNEL => WireMessage::Channel(bincode::deserialize(payload).map_err(decode_err)?),
        tag::CHANNEL_MODE => {
            WireMessage::ChannelMode(bincode::deserialize(payload).map_err(decode_err)?)
        }
        tag::MEMBERSHIP => {
            WireMessage::Membership(bincode::deserialize(payload).map_err(decode_err)?)
        }
        tag::MEMBERSHIP_END => {
            WireMessage::MembershipEnd(bincode::deserialize(payload).map_err(decode_err)?)
        }
        tag::PRIVATE_MESSAGE => {
            WireMessage::PrivateMessage(bincode::deserialize(payload).map_err(decode_err)?)
        }
        tag::CHANNEL_MESSAGE => {
            WireMessage::ChannelMessage(bincode::deserialize(payload).map_err(decode_err)?)
        }
        other => return Err(WireError::UnknownMessageType(other)),
    };
    Ok(msg)
}
