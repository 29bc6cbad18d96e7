use serde::{Deserialize, Serialize};
use worldcache_spatial::QuadTreeConfig;

use crate::error::RegistryError;

/// World cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Edge length of a chunk in world units.
    pub chunk_size: f32,
    /// Frames an outstanding load may stay unanswered before it is re-issued.
    /// Doubles with every retry. Zero disables retries.
    pub request_timeout_frames: u64,
    /// Attempts after which an unanswered request is forgotten.
    pub max_request_attempts: u32,
    pub quad_tree: QuadTreeConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32.0,
            request_timeout_frames: 120,
            max_request_attempts: 4,
            quad_tree: QuadTreeConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Reject settings the cache cannot run with.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if !(self.chunk_size.is_finite() && self.chunk_size > 0.0) {
            return Err(RegistryError::InvalidChunkSize(self.chunk_size));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.chunk_size, 32.0);
        assert_eq!(config.request_timeout_frames, 120);
        assert_eq!(config.max_request_attempts, 4);
        assert_eq!(config.quad_tree.max_items, 5);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn non_positive_chunk_size_is_rejected() {
        for chunk_size in [0.0, -4.0, f32::INFINITY] {
            let config = CacheConfig {
                chunk_size,
                ..CacheConfig::default()
            };
            assert_eq!(config.validate(), Err(RegistryError::InvalidChunkSize(chunk_size)));
        }
    }
}
