use glam::Vec2;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use worldcache_common::{ChunkKey, Rect};
use worldcache_kernel::{AreaId, Chunk, Entity, Light, WorldCache};
use worldcache_spatial::EntityFilter;

/// Static collision geometry around the window: chunk mesh triangles plus the
/// boxes of static entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionMesh {
    pub triangles: Vec<[Vec2; 3]>,
    pub boxes: Vec<Rect>,
}

impl CollisionMesh {
    pub fn len(&self) -> usize {
        self.triangles.len() + self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty() && self.boxes.is_empty()
    }
}

/// One complete computed window. Immutable once published.
#[derive(Debug, Clone, Default)]
pub struct AreaWindow {
    pub generation: u64,
    pub center: Option<ChunkKey>,
    /// Observed keys, row-major from the bottom-left corner.
    pub keys: Vec<ChunkKey>,
    /// Observed keys plus every neighbour of each.
    pub extended: BTreeSet<ChunkKey>,
    /// Cached chunks of the extended set.
    pub chunks: Vec<Arc<Chunk>>,
    pub lights: Vec<Light>,
    pub entities: Vec<Entity>,
    pub collision: CollisionMesh,
}

impl AreaWindow {
    pub fn contains(&self, key: ChunkKey) -> bool {
        self.keys.contains(&key)
    }

    /// True when every chunk of the extended set has been loaded.
    pub fn is_complete(&self) -> bool {
        !self.extended.is_empty() && self.chunks.len() == self.extended.len()
    }
}

/// Inputs shared by every step of one compute pass.
pub struct StepContext<'a> {
    pub cache: &'a WorldCache,
    pub area: AreaId,
    pub center: ChunkKey,
    pub window_size: u32,
}

/// One stage of the window pipeline. Steps run in order on the worker thread
/// and only ever write into the back window.
pub trait WindowStep: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, window: &mut AreaWindow, ctx: &StepContext<'_>);
}

impl fmt::Debug for dyn WindowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Recompute window keys around the center and register them with the cache.
#[derive(Debug, Default)]
pub struct Recentre;

impl WindowStep for Recentre {
    fn name(&self) -> &'static str {
        "recentre"
    }

    fn apply(&self, window: &mut AreaWindow, ctx: &StepContext<'_>) {
        let keys = ChunkKey::window(ctx.center, ctx.window_size);
        let mut extended: BTreeSet<ChunkKey> = keys.iter().copied().collect();
        for key in &keys {
            extended.extend(key.neighbours());
        }
        ctx.cache.observe(ctx.area, keys.clone());
        window.center = Some(ctx.center);
        window.keys = keys;
        window.extended = extended;
    }
}

#[derive(Debug, Default)]
pub struct FetchEntities;

impl WindowStep for FetchEntities {
    fn name(&self) -> &'static str {
        "entities"
    }

    fn apply(&self, window: &mut AreaWindow, ctx: &StepContext<'_>) {
        window.entities = ctx.cache.get_entities(&window.keys);
    }
}

/// Lights of the observed chunks.
#[derive(Debug, Default)]
pub struct FetchLights;

impl WindowStep for FetchLights {
    fn name(&self) -> &'static str {
        "lights"
    }

    fn apply(&self, window: &mut AreaWindow, ctx: &StepContext<'_>) {
        window.lights = ctx
            .cache
            .get_chunks(&window.keys)
            .iter()
            .flat_map(|c| c.lights.iter().cloned())
            .collect();
    }
}

/// Chunk meshes of the extended set.
#[derive(Debug, Default)]
pub struct FetchMeshes;

impl WindowStep for FetchMeshes {
    fn name(&self) -> &'static str {
        "meshes"
    }

    fn apply(&self, window: &mut AreaWindow, ctx: &StepContext<'_>) {
        let keys: Vec<ChunkKey> = window.extended.iter().copied().collect();
        window.chunks = ctx.cache.get_chunks(&keys);
    }
}

/// Aggregate static collision from chunk meshes and static entities of the
/// extended set.
#[derive(Debug, Default)]
pub struct BuildCollision;

impl WindowStep for BuildCollision {
    fn name(&self) -> &'static str {
        "collision"
    }

    fn apply(&self, window: &mut AreaWindow, ctx: &StepContext<'_>) {
        let mut mesh = CollisionMesh::default();
        for chunk in &window.chunks {
            let vertices = &chunk.mesh.vertices;
            for tri in chunk.mesh.indices.chunks_exact(3) {
                let corners = [tri[0], tri[1], tri[2]].map(|i| vertices.get(i as usize).copied());
                match corners {
                    [Some(a), Some(b), Some(c)] => mesh.triangles.push([a, b, c]),
                    _ => tracing::warn!(key = %chunk.key, "chunk mesh index out of range"),
                }
            }
        }
        let keys: Vec<ChunkKey> = window.extended.iter().copied().collect();
        for entity in ctx.cache.tree().query_chunks(&keys, EntityFilter::StaticOnly) {
            if let Some(half) = entity.collision() {
                mesh.boxes.push(Rect::from_center(entity.position(), half));
            }
        }
        window.collision = mesh;
    }
}

/// The standard pipeline: recentre, entities, lights, meshes, collision.
pub fn default_pipeline() -> Vec<Box<dyn WindowStep>> {
    vec![
        Box::new(Recentre),
        Box::new(FetchEntities),
        Box::new(FetchLights),
        Box::new(FetchMeshes),
        Box::new(BuildCollision),
    ]
}
