use worldcache_common::EntityId;
use worldcache_property::PropertyError;
use worldcache_spatial::SpatialError;

use crate::entity::EntityTypeId;

/// Configuration errors: fatal at startup or first use.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("entity type {0:?} is not registered")]
    UnknownEntityType(EntityTypeId),
    #[error("entity type {0:?} is registered twice")]
    DuplicateEntityType(EntityTypeId),
    #[error("entity type {0:?} has no spawn test")]
    MissingSpawnTest(EntityTypeId),
    #[error("unknown trigger tag {0}")]
    UnknownTriggerTag(u16),
    #[error("chunk size {0} must be positive and finite")]
    InvalidChunkSize(f32),
    #[error(transparent)]
    Property(#[from] PropertyError),
}

/// Errors from the world cache.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("spatial index consistency violation: {0}")]
    Spatial(#[from] SpatialError),
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("entity {0} is not in the cache")]
    UnknownEntity(EntityId),
}
