use glam::Vec2;
use serde::{Deserialize, Serialize};
use worldcache_common::{ChunkKey, Rect, TriggerKey};
use worldcache_property::Color;

use crate::error::RegistryError;

/// Static geometry of a chunk as an indexed triangle list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMesh {
    pub vertices: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl ChunkMesh {
    /// A single quad covering `bounds`.
    pub fn quad(bounds: Rect) -> Self {
        Self {
            vertices: vec![
                bounds.min,
                Vec2::new(bounds.max.x, bounds.min.y),
                bounds.max,
                Vec2::new(bounds.min.x, bounds.max.y),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub id: u32,
    pub position: Vec2,
    pub color: Color,
    pub radius: f32,
    pub intensity: f32,
}

/// A fixed-size world tile. One per key, cached for the whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub key: ChunkKey,
    pub mesh: ChunkMesh,
    pub lights: Vec<Light>,
    #[serde(skip)]
    pub dirty: bool,
}

impl Chunk {
    pub fn new(key: ChunkKey) -> Self {
        Self {
            key,
            mesh: ChunkMesh::default(),
            lights: Vec::new(),
            dirty: false,
        }
    }

    pub fn with_mesh(mut self, mesh: ChunkMesh) -> Self {
        self.mesh = mesh;
        self
    }

    pub fn with_light(mut self, light: Light) -> Self {
        self.lights.push(light);
        self
    }
}

/// Closed registry of trigger behaviours, keyed by a stable wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    Area,
    Damage,
    Teleport,
    Spawn,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 4] = [Self::Area, Self::Damage, Self::Teleport, Self::Spawn];

    pub fn tag(self) -> u16 {
        match self {
            Self::Area => 1,
            Self::Damage => 2,
            Self::Teleport => 3,
            Self::Spawn => 4,
        }
    }

    pub fn from_tag(tag: u16) -> Result<Self, RegistryError> {
        Self::ALL
            .into_iter()
            .find(|k| k.tag() == tag)
            .ok_or(RegistryError::UnknownTriggerTag(tag))
    }
}

/// A region of a chunk that reacts when entities enter it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub key: TriggerKey,
    pub kind: TriggerKind,
    pub bounds: Rect,
    pub enabled: bool,
    pub payload: Vec<u8>,
}

impl Trigger {
    pub fn new(key: TriggerKey, kind: TriggerKind, bounds: Rect) -> Self {
        Self {
            key,
            kind,
            bounds,
            enabled: true,
            payload: Vec::new(),
        }
    }

    /// Construct from a wire tag.
    pub fn from_tag(key: TriggerKey, tag: u16, bounds: Rect) -> Result<Self, RegistryError> {
        Ok(Self::new(key, TriggerKind::from_tag(tag)?, bounds))
    }

    pub fn contains(&self, p: Vec2) -> bool {
        self.enabled && self.bounds.contains(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_tags_round_trip() {
        for kind in TriggerKind::ALL {
            assert_eq!(TriggerKind::from_tag(kind.tag()).unwrap(), kind);
        }
        assert_eq!(
            TriggerKind::from_tag(99),
            Err(RegistryError::UnknownTriggerTag(99))
        );
    }

    #[test]
    fn disabled_trigger_contains_nothing() {
        let key = TriggerKey::new(ChunkKey::ORIGIN, 1);
        let mut t = Trigger::from_tag(key, 1, Rect::new(Vec2::ZERO, Vec2::splat(4.0))).unwrap();
        assert!(t.contains(Vec2::new(2.0, 2.0)));
        t.enabled = false;
        assert!(!t.contains(Vec2::new(2.0, 2.0)));
    }

    #[test]
    fn quad_mesh_has_two_triangles() {
        let mesh = ChunkMesh::quad(ChunkKey::ORIGIN.bounds(32.0));
        assert_eq!(mesh.triangle_count(), 2);
        assert!(!mesh.is_empty());
    }
}
