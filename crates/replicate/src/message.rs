use glam::Vec2;
use serde::{Deserialize, Serialize};
use worldcache_common::{ChunkKey, EntityId};
use worldcache_kernel::{Chunk, EntityRecord, Trigger};
use worldcache_property::{PropertyId, PropertyKind};

/// Delivery guarantee requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Delivery {
    Unreliable,
    ReliableUnordered,
    ReliableOrdered,
}

/// Closed registry of wire message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    CreateEntities,
    EntityPosition,
    EntityProperties,
    DestroyEntities,
    ChunkData,
    TriggerData,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        Self::CreateEntities,
        Self::EntityPosition,
        Self::EntityProperties,
        Self::DestroyEntities,
        Self::ChunkData,
        Self::TriggerData,
    ];

    /// Stable one-byte tag prefixed to every encoded message.
    pub fn tag(self) -> u8 {
        match self {
            Self::CreateEntities => 1,
            Self::EntityPosition => 2,
            Self::EntityProperties => 3,
            Self::DestroyEntities => 4,
            Self::ChunkData => 5,
            Self::TriggerData => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// Entity lifecycle and property changes must arrive in order after
    /// their create; positions are superseded by the next one anyway.
    pub fn delivery(self) -> Delivery {
        match self {
            Self::CreateEntities | Self::EntityProperties | Self::DestroyEntities => {
                Delivery::ReliableOrdered
            }
            Self::EntityPosition => Delivery::Unreliable,
            Self::ChunkData | Self::TriggerData => Delivery::ReliableUnordered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Entities first seen this frame, grouped by the chunk they spawned in.
    CreateEntities {
        frame: u64,
        chunk: ChunkKey,
        entities: Vec<EntityRecord>,
    },
    EntityPosition {
        frame: u64,
        id: EntityId,
        position: Vec2,
        rotation: f32,
        movement: Vec2,
    },
    /// Dirty instance-owned properties, transforms excluded.
    EntityProperties {
        frame: u64,
        id: EntityId,
        properties: Vec<(PropertyId, PropertyKind, Vec<u8>)>,
    },
    DestroyEntities {
        frame: u64,
        ids: Vec<EntityId>,
    },
    ChunkData {
        chunk: Chunk,
    },
    TriggerData {
        chunk: ChunkKey,
        triggers: Vec<Trigger>,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::CreateEntities { .. } => MessageKind::CreateEntities,
            Self::EntityPosition { .. } => MessageKind::EntityPosition,
            Self::EntityProperties { .. } => MessageKind::EntityProperties,
            Self::DestroyEntities { .. } => MessageKind::DestroyEntities,
            Self::ChunkData { .. } => MessageKind::ChunkData,
            Self::TriggerData { .. } => MessageKind::TriggerData,
        }
    }

    pub fn delivery(&self) -> Delivery {
        self.kind().delivery()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_unique_and_resolvable() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(MessageKind::from_tag(0), None);
        assert_eq!(MessageKind::from_tag(200), None);
    }

    #[test]
    fn lifecycle_messages_are_reliable_ordered() {
        let destroy = Message::DestroyEntities {
            frame: 1,
            ids: vec![EntityId(1)],
        };
        assert_eq!(destroy.delivery(), Delivery::ReliableOrdered);
        assert_eq!(MessageKind::EntityPosition.delivery(), Delivery::Unreliable);
        assert_eq!(MessageKind::ChunkData.delivery(), Delivery::ReliableUnordered);
    }
}
