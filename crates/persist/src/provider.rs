use std::sync::Arc;
use tracing::{debug, trace, warn};
use worldcache_common::ChunkKey;
use worldcache_kernel::{
    CacheError, Chunk, Entity, EntityTypeRegistry, ProviderRequest, RequestQueue, Trigger,
    WorldCache, WorldProvider,
};

use crate::store::{RegionRecord, RegionStore};

/// Procedural source for chunks that were never saved.
pub trait ChunkGenerator: Send + Sync {
    fn generate_chunk(&self, key: ChunkKey) -> Chunk;

    fn generate_entities(&self, _key: ChunkKey, _registry: &EntityTypeRegistry) -> Vec<Entity> {
        Vec::new()
    }

    fn generate_triggers(&self, _key: ChunkKey) -> Vec<Trigger> {
        Vec::new()
    }
}

/// What one [`StoreProvider::deliver`] call handed to the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub chunks_loaded: usize,
    pub chunks_generated: usize,
    pub entity_chunks: usize,
    pub trigger_chunks: usize,
    /// Keys left unanswered because their region could not be read.
    pub failed: usize,
}

/// [`WorldProvider`] backed by a [`RegionStore`].
///
/// Requests are queued as they arrive and answered in bulk by [`Self::deliver`],
/// from disk when a region exists and from the generator otherwise. Unanswered
/// keys are left to the cache's retry policy.
pub struct StoreProvider {
    store: Arc<RegionStore>,
    registry: Arc<EntityTypeRegistry>,
    generator: Option<Arc<dyn ChunkGenerator>>,
    queue: RequestQueue,
}

impl std::fmt::Debug for StoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreProvider")
            .field("root", &self.store.root())
            .field("generator", &self.generator.is_some())
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl StoreProvider {
    pub fn new(store: Arc<RegionStore>, registry: Arc<EntityTypeRegistry>) -> Self {
        Self {
            store,
            registry,
            generator: None,
            queue: RequestQueue::new(),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn ChunkGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn store(&self) -> &Arc<RegionStore> {
        &self.store
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Answer every queued request through the cache's provider callbacks.
    pub fn deliver(&self, cache: &WorldCache) -> Result<DeliveryReport, CacheError> {
        let _span = tracing::info_span!("deliver").entered();
        let mut report = DeliveryReport::default();
        for request in self.queue.drain() {
            match request {
                ProviderRequest::Chunks(keys) => self.deliver_chunks(cache, &keys, &mut report),
                ProviderRequest::Entities(keys) => {
                    self.deliver_entities(cache, &keys, &mut report)?
                }
                ProviderRequest::Triggers(keys) => {
                    self.deliver_triggers(cache, &keys, &mut report)
                }
            }
        }
        trace!(
            chunks_loaded = report.chunks_loaded,
            chunks_generated = report.chunks_generated,
            entity_chunks = report.entity_chunks,
            trigger_chunks = report.trigger_chunks,
            failed = report.failed,
            "requests delivered"
        );
        Ok(report)
    }

    /// `Err(())` when the region exists but cannot be read.
    fn region(&self, key: ChunkKey, report: &mut DeliveryReport) -> Result<Option<RegionRecord>, ()> {
        self.store.load_region(key).map_err(|err| {
            warn!(%key, %err, "unreadable region");
            report.failed += 1;
        })
    }

    fn deliver_chunks(&self, cache: &WorldCache, keys: &[ChunkKey], report: &mut DeliveryReport) {
        let mut loaded = Vec::new();
        let mut generated = Vec::new();
        for key in keys {
            let Ok(record) = self.region(*key, report) else {
                continue;
            };
            match (record.and_then(|r| r.chunk), &self.generator) {
                (Some(chunk), _) => loaded.push(chunk),
                (None, Some(generator)) => generated.push(generator.generate_chunk(*key)),
                (None, None) => debug!(%key, "no stored chunk and no generator"),
            }
        }
        report.chunks_loaded += loaded.len();
        report.chunks_generated += generated.len();
        if !loaded.is_empty() {
            cache.chunks_loaded(loaded);
        }
        if !generated.is_empty() {
            cache.chunks_generated(generated);
        }
    }

    fn deliver_entities(
        &self,
        cache: &WorldCache,
        keys: &[ChunkKey],
        report: &mut DeliveryReport,
    ) -> Result<(), CacheError> {
        for key in keys {
            let Ok(record) = self.region(*key, report) else {
                continue;
            };
            report.entity_chunks += 1;
            match (record, &self.generator) {
                (Some(record), _) => {
                    let entities = record
                        .entities
                        .iter()
                        .filter_map(|r| match self.registry.instantiate(r) {
                            Ok(entity) => Some(entity),
                            Err(err) => {
                                warn!(id = %r.id, %err, "dropping stored entity");
                                None
                            }
                        })
                        .collect();
                    cache.entities_loaded(entities, *key);
                }
                (None, Some(generator)) => {
                    cache.entities_generated(generator.generate_entities(*key, &self.registry), *key)?;
                }
                (None, None) => cache.entities_loaded(Vec::new(), *key),
            }
        }
        Ok(())
    }

    fn deliver_triggers(&self, cache: &WorldCache, keys: &[ChunkKey], report: &mut DeliveryReport) {
        for key in keys {
            let Ok(record) = self.region(*key, report) else {
                continue;
            };
            report.trigger_chunks += 1;
            match (record, &self.generator) {
                (Some(record), _) => cache.triggers_loaded(*key, record.triggers),
                (None, Some(generator)) => {
                    cache.triggers_generated(*key, generator.generate_triggers(*key))
                }
                (None, None) => cache.triggers_loaded(*key, Vec::new()),
            }
        }
    }
}

impl WorldProvider for StoreProvider {
    fn load_chunks(&self, keys: &[ChunkKey]) {
        self.queue.load_chunks(keys);
    }

    fn load_entities(&self, area: &[ChunkKey]) {
        self.queue.load_entities(area);
    }

    fn load_triggers(&self, area: &[ChunkKey]) {
        self.queue.load_triggers(area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;
    use worldcache_common::{EntityId, TriggerKey};
    use worldcache_kernel::{
        CacheConfig, ChunkMesh, EntityType, EntityTypeId, Light, TriggerKind,
    };
    use worldcache_property::{Color, PropertyId, PropertyTemplate, PropertyValue};

    const MOB: EntityTypeId = EntityTypeId(1);
    const HEALTH: PropertyId = PropertyId(10);

    struct Flat;

    impl ChunkGenerator for Flat {
        fn generate_chunk(&self, key: ChunkKey) -> Chunk {
            Chunk::new(key)
                .with_mesh(ChunkMesh::quad(key.bounds(32.0)))
                .with_light(Light {
                    id: 1,
                    position: key.bounds(32.0).center(),
                    color: Color::WHITE,
                    radius: 8.0,
                    intensity: 1.0,
                })
        }

        fn generate_triggers(&self, key: ChunkKey) -> Vec<Trigger> {
            vec![Trigger::new(
                TriggerKey::new(key, 0),
                TriggerKind::Spawn,
                key.bounds(32.0),
            )]
        }
    }

    fn registry() -> Arc<EntityTypeRegistry> {
        let mut r = EntityTypeRegistry::new();
        r.register(
            EntityType::new(MOB, "mob")
                .defaults(PropertyTemplate::new().declare(HEALTH, PropertyValue::Int(10))),
        )
        .unwrap();
        Arc::new(r)
    }

    fn world(path: &std::path::Path, generator: bool) -> (Arc<WorldCache>, Arc<StoreProvider>) {
        let store = Arc::new(RegionStore::open(path, 32.0).unwrap());
        let mut provider = StoreProvider::new(store.clone(), registry());
        if generator {
            provider = provider.with_generator(Arc::new(Flat));
        }
        let provider = Arc::new(provider);
        let cache = Arc::new(WorldCache::new(CacheConfig::default(), provider.clone(), store));
        (cache, provider)
    }

    #[test]
    fn generated_chunk_is_saved_and_reloaded() {
        let tmp = tempfile::tempdir().unwrap();
        let key = ChunkKey::new(3, -2);
        {
            let (cache, provider) = world(tmp.path(), true);
            assert!(cache.get_chunks(&[key]).is_empty());
            let report = provider.deliver(&cache).unwrap();
            assert_eq!(report.chunks_generated, 1);
            cache.process_loaded_data();
            assert_eq!(cache.chunk(key).unwrap().lights.len(), 1);
            assert_eq!(provider.store().stored_keys(), vec![key]);
        }

        let (cache, provider) = world(tmp.path(), false);
        cache.get_chunks(&[key]);
        let report = provider.deliver(&cache).unwrap();
        assert_eq!(report.chunks_loaded, 1);
        assert_eq!(report.chunks_generated, 0);
        cache.process_loaded_data();
        assert_eq!(cache.chunk(key).unwrap().mesh.triangle_count(), 2);
    }

    #[test]
    fn missing_chunk_without_generator_stays_unanswered() {
        let tmp = tempfile::tempdir().unwrap();
        let (cache, provider) = world(tmp.path(), false);
        cache.get_chunks(&[ChunkKey::ORIGIN]);
        let report = provider.deliver(&cache).unwrap();
        assert_eq!(report, DeliveryReport::default());
        cache.process_loaded_data();
        assert!(cache.chunk(ChunkKey::ORIGIN).is_none());
    }

    #[test]
    fn entities_survive_a_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry();
        {
            let (cache, _provider) = world(tmp.path(), false);
            let mut mob = registry.create(MOB, EntityId(7), Vec2::new(4.0, 4.0)).unwrap();
            mob.set(HEALTH, PropertyValue::Int(3)).unwrap();
            cache.add_entities(vec![mob]).unwrap();
            cache.process_loaded_data();
        }

        let (cache, provider) = world(tmp.path(), false);
        assert!(cache.get_entities(&[ChunkKey::ORIGIN]).is_empty());
        let report = provider.deliver(&cache).unwrap();
        assert_eq!(report.entity_chunks, 1);
        cache.process_loaded_data();

        let entities = cache.get_entities(&[ChunkKey::ORIGIN]);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].position(), Vec2::new(4.0, 4.0));
        assert_eq!(entities[0].property(HEALTH).as_int().unwrap(), 3);
    }

    #[test]
    fn deleted_entity_is_removed_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry();
        let (cache, provider) = world(tmp.path(), false);
        let mob = registry.create(MOB, EntityId(1), Vec2::ONE).unwrap();
        cache.add_entities(vec![mob]).unwrap();
        cache.process_loaded_data();
        assert_eq!(provider.store().entity_region(EntityId(1)), Some(ChunkKey::ORIGIN));

        cache.delete_entity(EntityId(1)).unwrap();
        cache.process_loaded_data();
        assert_eq!(provider.store().entity_region(EntityId(1)), None);
    }

    #[test]
    fn triggers_fall_back_to_generator_then_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let key = ChunkKey::new(1, 1);
        {
            let (cache, provider) = world(tmp.path(), true);
            cache.get_triggers(&[key]);
            assert_eq!(provider.deliver(&cache).unwrap().trigger_chunks, 1);
            cache.process_loaded_data();
            assert_eq!(cache.cached_triggers(key).unwrap().len(), 1);
        }

        let (cache, provider) = world(tmp.path(), false);
        cache.get_triggers(&[key]);
        provider.deliver(&cache).unwrap();
        cache.process_loaded_data();
        let triggers = cache.cached_triggers(key).unwrap();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].kind, TriggerKind::Spawn);
    }

    #[test]
    fn empty_region_answers_with_no_entities() {
        let tmp = tempfile::tempdir().unwrap();
        let (cache, provider) = world(tmp.path(), false);
        cache.get_entities(&[ChunkKey::new(9, 9)]);
        provider.deliver(&cache).unwrap();
        cache.process_loaded_data();
        assert!(cache.get_entities(&[ChunkKey::new(9, 9)]).is_empty());
        assert_eq!(provider.pending(), 0);
    }
}
