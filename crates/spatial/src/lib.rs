//! Spatial index: one quad-tree region per chunk, split on demand.
//!
//! # Invariants
//! - An item is filed in exactly one leaf at a time.
//! - Regions only ever split; they never merge back.
//! - Removing an unknown id is not an error: it returns `None`.
//!
//! Layers, innermost first: [`QuadTreeRegion`] (one chunk's rectangle),
//! [`QuadTree`] (chunk key → region), [`PartitionedTree`] (static and mobile
//! items in separate trees) and [`LockedTree`] (one coarse mutex, shared
//! between the simulation thread and observable-area workers).

mod locked;
mod partition;
mod region;
mod tree;

pub use locked::LockedTree;
pub use partition::{EntityFilter, PartitionedTree};
pub use region::QuadTreeRegion;
pub use tree::{QuadTree, QuadTreeConfig};

use glam::Vec2;
use worldcache_common::EntityId;

/// Anything that can be filed in the index.
pub trait SpatialItem: Clone {
    fn id(&self) -> EntityId;
    fn position(&self) -> Vec2;
    /// Static items never move and live in their own partition.
    fn is_static(&self) -> bool {
        false
    }
}

/// Consistency violations. Expected races are reported as `None`, not errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpatialError {
    #[error("entity {0} is already indexed")]
    DuplicateId(EntityId),
    #[error("entity {id} at ({x}, {y}) lies outside the region it was filed into")]
    OutOfBounds { id: EntityId, x: f32, y: f32 },
    #[error("index placement for entity {0} does not match any leaf")]
    Inconsistent(EntityId),
}

pub fn crate_info() -> &'static str {
    "worldcache-spatial v0.1.0"
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Dot {
        pub id: EntityId,
        pub pos: Vec2,
        pub fixed: bool,
    }

    impl Dot {
        pub fn new(id: u32, x: f32, y: f32) -> Self {
            Self {
                id: EntityId(id),
                pos: Vec2::new(x, y),
                fixed: false,
            }
        }

        pub fn fixed(id: u32, x: f32, y: f32) -> Self {
            Self {
                fixed: true,
                ..Self::new(id, x, y)
            }
        }
    }

    impl SpatialItem for Dot {
        fn id(&self) -> EntityId {
            self.id
        }

        fn position(&self) -> Vec2 {
            self.pos
        }

        fn is_static(&self) -> bool {
            self.fixed
        }
    }
}
