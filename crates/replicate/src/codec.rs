use crate::message::{Message, MessageKind};

/// Errors encoding or decoding wire messages.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("empty packet")]
    Empty,
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    #[error("tag says {tagged:?} but payload is {decoded:?}")]
    TagMismatch {
        tagged: MessageKind,
        decoded: MessageKind,
    },
    #[error("CBOR serialization error: {0}")]
    Encode(String),
    #[error("CBOR deserialization error: {0}")]
    Decode(String),
}

/// Encode as a one-byte kind tag followed by the CBOR payload.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let mut buf = vec![message.kind().tag()];
    ciborium::into_writer(message, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Kind of an encoded message, without decoding the payload.
pub fn peek_kind(packet: &[u8]) -> Result<MessageKind, CodecError> {
    let tag = *packet.first().ok_or(CodecError::Empty)?;
    MessageKind::from_tag(tag).ok_or(CodecError::UnknownTag(tag))
}

pub fn decode(packet: &[u8]) -> Result<Message, CodecError> {
    let tagged = peek_kind(packet)?;
    let message: Message =
        ciborium::from_reader(&packet[1..]).map_err(|e| CodecError::Decode(e.to_string()))?;
    let decoded = message.kind();
    if decoded != tagged {
        return Err(CodecError::TagMismatch { tagged, decoded });
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;
    use worldcache_common::EntityId;

    fn position() -> Message {
        Message::EntityPosition {
            frame: 9,
            id: EntityId(3),
            position: Vec2::new(1.0, 2.0),
            rotation: 0.5,
            movement: Vec2::ZERO,
        }
    }

    #[test]
    fn encoded_message_decodes_to_itself() {
        let packet = encode(&position()).unwrap();
        assert_eq!(peek_kind(&packet).unwrap(), MessageKind::EntityPosition);
        assert_eq!(decode(&packet).unwrap(), position());
    }

    #[test]
    fn malformed_packets_are_rejected() {
        assert_eq!(decode(&[]), Err(CodecError::Empty));
        assert_eq!(decode(&[99, 0]), Err(CodecError::UnknownTag(99)));

        let mut packet = encode(&position()).unwrap();
        packet[0] = MessageKind::ChunkData.tag();
        assert_eq!(
            decode(&packet),
            Err(CodecError::TagMismatch {
                tagged: MessageKind::ChunkData,
                decoded: MessageKind::EntityPosition,
            })
        );

        let whole = encode(&position()).unwrap();
        assert!(matches!(decode(&whole[..4]), Err(CodecError::Decode(_))));
    }
}
