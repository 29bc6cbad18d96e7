//! Shared types for the world cache: identifiers, the chunk grid and
//! axis-aligned rectangles.
//!
//! # Invariants
//! - `ChunkKey` hashing distinguishes `(a, b)` from `(b, a)`.
//! - Chunk bounds tile the plane: every point maps to exactly one key.

mod grid;
mod types;

pub use grid::{ChunkKey, Rect, TriggerKey};
pub use types::{EntityId, ObserverId};

pub fn crate_info() -> &'static str {
    "worldcache-common v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("common"));
    }
}
