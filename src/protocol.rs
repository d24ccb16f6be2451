//! Wire format shared by the coordinator and the workers.
//!
//! A message is a 3-byte command tag (`map`, `red`, `rip`) followed by a
//! NUL-terminated payload. Replies from workers carry no tag, except for the
//! shutdown acknowledgment which is the bare `rip` tag. The whole frame,
//! terminator included, never exceeds [`MSG_LEN`] bytes.

use std::fmt;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{MrError, Result};

/// Frame budget in bytes, terminator included.
pub const MSG_LEN: usize = 1500;
/// Length of a command tag.
pub const TAG_LEN: usize = 3;
/// Largest payload a tagged request can carry.
pub const MAX_PAYLOAD: usize = MSG_LEN - TAG_LEN - 1;
/// Largest payload an untagged reply can carry.
pub const MAX_REPLY_PAYLOAD: usize = MSG_LEN - 1;

const TERMINATOR: u8 = b'\0';
const MAP_TAG: &[u8; TAG_LEN] = b"map";
const REDUCE_TAG: &[u8; TAG_LEN] = b"red";
const SHUTDOWN_TAG: &[u8; TAG_LEN] = b"rip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Map,
    Reduce,
    Shutdown,
    /// Untagged payload, only ever sent from a worker to the coordinator.
    Empty,
    Invalid,
}

impl MessageType {
    fn tag(self) -> Option<&'static [u8; TAG_LEN]> {
        match self {
            MessageType::Map => Some(MAP_TAG),
            MessageType::Reduce => Some(REDUCE_TAG),
            MessageType::Shutdown => Some(SHUTDOWN_TAG),
            MessageType::Empty | MessageType::Invalid => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Map => "map",
            MessageType::Reduce => "red",
            MessageType::Shutdown => "rip",
            MessageType::Empty => "empty",
            MessageType::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

fn check_payload(payload: &[u8], limit: usize) -> Result<()> {
    if payload.len() > limit {
        return Err(MrError::Encode(format!(
            "payload of {} bytes exceeds the {} byte budget",
            payload.len(),
            limit
        )));
    }
    if let Some(pos) = payload.iter().position(|&b| b == TERMINATOR) {
        return Err(MrError::Encode(format!(
            "payload contains a NUL byte at offset {pos}"
        )));
    }
    Ok(())
}

/// Encode a coordinator -> worker request. Only `Map`, `Reduce` and
/// `Shutdown` can be sent to a worker.
pub fn encode_request(kind: MessageType, payload: &[u8]) -> Result<Vec<u8>> {
    let tag = kind
        .tag()
        .ok_or_else(|| MrError::Encode(format!("{kind} cannot be sent to a worker")))?;
    check_payload(payload, MAX_PAYLOAD)?;

    let mut frame = Vec::with_capacity(TAG_LEN + payload.len() + 1);
    frame.extend_from_slice(tag);
    frame.extend_from_slice(payload);
    frame.push(TERMINATOR);
    Ok(frame)
}

/// Encode a worker -> coordinator reply. `Empty` carries the payload
/// verbatim; `Shutdown` is the bare acknowledgment tag.
pub fn encode_reply(kind: MessageType, payload: &[u8]) -> Result<Vec<u8>> {
    match kind {
        MessageType::Empty => {
            check_payload(payload, MAX_REPLY_PAYLOAD)?;
            let mut frame = Vec::with_capacity(payload.len() + 1);
            frame.extend_from_slice(payload);
            frame.push(TERMINATOR);
            Ok(frame)
        }
        MessageType::Shutdown => {
            let mut frame = SHUTDOWN_TAG.to_vec();
            frame.push(TERMINATOR);
            Ok(frame)
        }
        other => Err(MrError::Encode(format!(
            "{other} cannot be sent as a worker reply"
        ))),
    }
}

/// Bytes before the first terminator.
fn body(frame: &[u8]) -> &[u8] {
    match frame.iter().position(|&b| b == TERMINATOR) {
        Some(end) => &frame[..end],
        None => frame,
    }
}

/// Decode a request as seen by a worker. Anything without a known tag is
/// `Invalid`.
pub fn decode_request(frame: &[u8]) -> (MessageType, &[u8]) {
    let body = body(frame);
    if body.is_empty() {
        return (MessageType::Invalid, body);
    }

    for kind in [MessageType::Map, MessageType::Reduce, MessageType::Shutdown] {
        if let Some(tag) = kind.tag() {
            if body.starts_with(tag) {
                return (kind, &body[TAG_LEN..]);
            }
        }
    }
    (MessageType::Invalid, &[])
}

/// Decode a reply as seen by the coordinator.
///
/// Worker output is free text, so a reply is only the shutdown
/// acknowledgment when it is exactly the tag; `ripe1` is data.
pub fn decode_reply(frame: &[u8]) -> (MessageType, &[u8]) {
    let body = body(frame);
    if body == SHUTDOWN_TAG {
        return (MessageType::Shutdown, &[]);
    }
    (MessageType::Empty, body)
}

/// Read one frame, terminator included. At most [`MSG_LEN`] bytes are
/// consumed from `reader`.
pub async fn read_frame<R>(reader: R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader.take(MSG_LEN as u64));
    let mut frame = Vec::with_capacity(MSG_LEN);
    reader.read_until(TERMINATOR, &mut frame).await?;

    match frame.last() {
        Some(&TERMINATOR) => Ok(frame),
        None => Err(MrError::decode("connection closed before a frame arrived")),
        Some(_) if frame.len() >= MSG_LEN => Err(MrError::Decode(format!(
            "no terminator within the {MSG_LEN} byte frame budget"
        ))),
        Some(_) => Err(MrError::Decode(format!(
            "connection closed after {} bytes of an unterminated frame",
            frame.len()
        ))),
    }
}

pub async fn write_frame<W>(mut writer: W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip_for_every_command() {
        for kind in [MessageType::Map, MessageType::Reduce, MessageType::Shutdown] {
            let frame = encode_request(kind, b"the cat sat").unwrap();
            assert_eq!(decode_request(&frame), (kind, &b"the cat sat"[..]));
        }
    }

    #[test]
    fn request_frame_layout() {
        let frame = encode_request(MessageType::Reduce, b"cat11").unwrap();
        assert_eq!(frame, b"redcat11\0");
    }

    #[test]
    fn empty_payload_round_trips() {
        let frame = encode_request(MessageType::Map, b"").unwrap();
        assert_eq!(frame, b"map\0");
        assert_eq!(decode_request(&frame), (MessageType::Map, &b""[..]));
    }

    #[test]
    fn untagged_or_empty_request_is_invalid() {
        assert_eq!(decode_request(b"\0").0, MessageType::Invalid);
        assert_eq!(decode_request(b"").0, MessageType::Invalid);
        assert_eq!(decode_request(b"hello\0").0, MessageType::Invalid);
        assert_eq!(decode_request(b"ma\0").0, MessageType::Invalid);
    }

    #[test]
    fn only_commands_can_be_sent_to_workers() {
        assert!(matches!(
            encode_request(MessageType::Empty, b"x"),
            Err(MrError::Encode(_))
        ));
        assert!(matches!(
            encode_request(MessageType::Invalid, b"x"),
            Err(MrError::Encode(_))
        ));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![b'a'; MAX_PAYLOAD];
        assert!(encode_request(MessageType::Map, &payload).is_ok());

        let payload = vec![b'a'; MAX_PAYLOAD + 1];
        assert!(encode_request(MessageType::Map, &payload).is_err());

        let payload = vec![b'a'; MAX_REPLY_PAYLOAD + 1];
        assert!(encode_reply(MessageType::Empty, &payload).is_err());
    }

    #[test]
    fn embedded_terminator_is_rejected() {
        assert!(encode_request(MessageType::Map, b"ab\0cd").is_err());
    }

    #[test]
    fn bare_shutdown_tag_is_an_acknowledgment() {
        let frame = encode_reply(MessageType::Shutdown, b"").unwrap();
        assert_eq!(frame, b"rip\0");
        assert_eq!(decode_reply(&frame), (MessageType::Shutdown, &b""[..]));
    }

    #[test]
    fn word_starting_with_shutdown_tag_is_data() {
        let frame = encode_reply(MessageType::Empty, b"ripe1").unwrap();
        assert_eq!(decode_reply(&frame), (MessageType::Empty, &b"ripe1"[..]));

        let frame = encode_reply(MessageType::Empty, b"rip1").unwrap();
        assert_eq!(decode_reply(&frame), (MessageType::Empty, &b"rip1"[..]));
    }

    #[test]
    fn empty_reply_decodes_as_empty_payload() {
        let frame = encode_reply(MessageType::Empty, b"").unwrap();
        assert_eq!(decode_reply(&frame), (MessageType::Empty, &b""[..]));
    }

    #[test]
    fn commands_cannot_be_replies() {
        assert!(encode_reply(MessageType::Map, b"x").is_err());
        assert!(encode_reply(MessageType::Reduce, b"x").is_err());
    }

    #[tokio::test]
    async fn frames_travel_over_a_stream() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let frame = encode_request(MessageType::Map, b"hello world").unwrap();

        write_frame(&mut client, &frame).await.unwrap();
        let received = read_frame(&mut server).await.unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn unterminated_frame_is_a_decode_error() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_frame(&mut client, b"mapabc").await.unwrap();
        drop(client);

        assert!(matches!(
            read_frame(&mut server).await,
            Err(MrError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn frame_over_budget_is_a_decode_error() {
        let (mut client, mut server) = tokio::io::duplex(2 * MSG_LEN);
        write_frame(&mut client, &vec![b'a'; MSG_LEN + 10])
            .await
            .unwrap();

        assert!(matches!(
            read_frame(&mut server).await,
            Err(MrError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn closed_connection_is_a_decode_error() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_frame(&mut server).await.is_err());
    }
}
