use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};
use worldcache_common::{ChunkKey, EntityId, TriggerKey};
use worldcache_property::{PropertyError, PropertyId, PropertyValue};
use worldcache_spatial::{EntityFilter, LockedTree, PartitionedTree};

use crate::chunk::{Chunk, Trigger};
use crate::config::CacheConfig;
use crate::entity::Entity;
use crate::error::CacheError;
use crate::events::CacheEvent;
use crate::provider::{WorldProvider, WorldSaver};

/// Handle of an observable area registered with the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AreaId(pub u64);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    /// Frame of the first attempt; retries keep it.
    since: u64,
    issued: u64,
    attempts: u32,
}

/// Outstanding provider requests of one category, keyed by chunk.
#[derive(Debug, Default)]
struct RequestTracker {
    pending: HashMap<ChunkKey, Pending>,
}

impl RequestTracker {
    /// Mark keys as requested; returns those that were not already pending.
    fn claim(&mut self, keys: impl IntoIterator<Item = ChunkKey>, frame: u64) -> Vec<ChunkKey> {
        let mut claimed = Vec::new();
        for key in keys {
            if let Entry::Vacant(slot) = self.pending.entry(key) {
                slot.insert(Pending {
                    since: frame,
                    issued: frame,
                    attempts: 1,
                });
                claimed.push(key);
            }
        }
        claimed
    }

    fn resolve(&mut self, key: ChunkKey) -> bool {
        self.pending.remove(&key).is_some()
    }

    /// First-attempt frame of the oldest outstanding request.
    fn oldest(&self) -> Option<u64> {
        self.pending.values().map(|p| p.since).min()
    }

    /// Split overdue requests into those to re-issue and those given up on.
    /// The deadline doubles with each attempt.
    fn expire(&mut self, frame: u64, timeout: u64, max_attempts: u32) -> (Vec<ChunkKey>, Vec<ChunkKey>) {
        let mut reissue = Vec::new();
        let mut dropped = Vec::new();
        for (key, pending) in &mut self.pending {
            let shift = pending.attempts.saturating_sub(1).min(32);
            let deadline = timeout.saturating_mul(1u64 << shift);
            if frame.saturating_sub(pending.issued) < deadline {
                continue;
            }
            if pending.attempts >= max_attempts {
                dropped.push(*key);
            } else {
                pending.attempts += 1;
                pending.issued = frame;
                reissue.push(*key);
            }
        }
        for key in &dropped {
            self.pending.remove(key);
        }
        reissue.sort_unstable();
        dropped.sort_unstable();
        (reissue, dropped)
    }
}

#[derive(Debug, Default)]
struct ChunkCache {
    chunks: HashMap<ChunkKey, Arc<Chunk>>,
    requested: RequestTracker,
    loaded: Vec<Chunk>,
    generated: Vec<Chunk>,
    updated: Vec<Chunk>,
}

#[derive(Debug)]
struct TriggerBatch {
    chunk: ChunkKey,
    triggers: Vec<Trigger>,
    generated: bool,
}

#[derive(Debug, Default)]
struct TriggerCache {
    triggers: HashMap<TriggerKey, Arc<Trigger>>,
    by_chunk: HashMap<ChunkKey, BTreeSet<TriggerKey>>,
    requested: RequestTracker,
    loaded: Vec<TriggerBatch>,
    updated: Vec<Trigger>,
}

#[derive(Debug)]
enum StagedUpdate {
    Whole(Entity),
    Selected(Entity, PropertyId),
}

impl StagedUpdate {
    fn id(&self) -> EntityId {
        match self {
            Self::Whole(e) | Self::Selected(e, _) => e.id(),
        }
    }

    fn into_entity(self) -> Entity {
        match self {
            Self::Whole(e) | Self::Selected(e, _) => e,
        }
    }
}

#[derive(Debug, Default)]
struct EntityStaging {
    requested: RequestTracker,
    /// Chunks whose entities have been loaded or generated.
    resolved: HashSet<ChunkKey>,
    answered: Vec<ChunkKey>,
    loaded: Vec<Entity>,
    /// Inserted immediately, not yet reported.
    created: Vec<EntityId>,
    updated: Vec<StagedUpdate>,
    deleted: BTreeSet<EntityId>,
    /// Deleted ids and the frame of deletion. Kept while a request issued
    /// at or before that frame may still deliver a stale copy.
    tombstones: HashMap<EntityId, u64>,
}

/// Single point of truth for chunk, trigger and entity state.
///
/// Provider callbacks and mutation calls only stage data; it reaches the live
/// caches and index in [`WorldCache::process_loaded_data`], which must run
/// once per tick after movement. Every method takes `&self` so the cache can
/// be shared with observable-area workers and provider threads.
pub struct WorldCache {
    config: CacheConfig,
    provider: Arc<dyn WorldProvider>,
    saver: Arc<dyn WorldSaver>,
    frame: AtomicU64,
    chunks: Mutex<ChunkCache>,
    triggers: Mutex<TriggerCache>,
    entities: Mutex<EntityStaging>,
    tree: LockedTree<Entity>,
    areas: Mutex<HashMap<AreaId, Vec<ChunkKey>>>,
    observed: Mutex<Arc<Vec<Entity>>>,
    next_area: AtomicU64,
}

impl fmt::Debug for WorldCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldCache")
            .field("config", &self.config)
            .field("frame", &self.frame())
            .field("entities", &self.tree.len())
            .finish_non_exhaustive()
    }
}

impl WorldCache {
    pub fn new(
        config: CacheConfig,
        provider: Arc<dyn WorldProvider>,
        saver: Arc<dyn WorldSaver>,
    ) -> Self {
        let tree = LockedTree::new(config.chunk_size, config.quad_tree);
        Self {
            config,
            provider,
            saver,
            frame: AtomicU64::new(0),
            chunks: Mutex::default(),
            triggers: Mutex::default(),
            entities: Mutex::default(),
            tree,
            areas: Mutex::default(),
            observed: Mutex::new(Arc::new(Vec::new())),
            next_area: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn chunk_size(&self) -> f32 {
        self.config.chunk_size
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// Advance the frame counter; returns the new frame.
    pub fn advance_frame(&self) -> u64 {
        self.frame.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The live entity index, for read-mostly consumers.
    pub fn tree(&self) -> &LockedTree<Entity> {
        &self.tree
    }

    // --- chunks ---

    /// Cached chunks among `keys`. Keys neither cached nor already requested
    /// are requested from the provider in a single call.
    pub fn get_chunks(&self, keys: &[ChunkKey]) -> Vec<Arc<Chunk>> {
        let frame = self.frame();
        let (found, missing) = {
            let mut guard = lock(&self.chunks);
            let cache = &mut *guard;
            let mut found = Vec::new();
            let mut unresolved = Vec::new();
            for key in keys {
                match cache.chunks.get(key) {
                    Some(chunk) => found.push(chunk.clone()),
                    None => unresolved.push(*key),
                }
            }
            (found, cache.requested.claim(unresolved, frame))
        };
        if !missing.is_empty() {
            debug!(count = missing.len(), "requesting chunks");
            self.provider.load_chunks(&missing);
        }
        found
    }

    /// Cached chunks among `keys`, without requesting the rest.
    pub fn cached_chunks(&self, keys: &[ChunkKey]) -> Vec<Arc<Chunk>> {
        let cache = lock(&self.chunks);
        keys.iter()
            .filter_map(|k| cache.chunks.get(k).cloned())
            .collect()
    }

    pub fn chunk(&self, key: ChunkKey) -> Option<Arc<Chunk>> {
        lock(&self.chunks).chunks.get(&key).cloned()
    }

    pub fn chunk_count(&self) -> usize {
        lock(&self.chunks).chunks.len()
    }

    /// Stage modified chunks for saving and an update notification.
    pub fn update_chunks(&self, changed: Vec<Chunk>) {
        lock(&self.chunks).updated.extend(changed);
    }

    pub fn chunks_loaded(&self, chunks: Vec<Chunk>) {
        lock(&self.chunks).loaded.extend(chunks);
    }

    /// Like [`Self::chunks_loaded`], but the chunks are also saved.
    pub fn chunks_generated(&self, chunks: Vec<Chunk>) {
        lock(&self.chunks).generated.extend(chunks);
    }

    // --- triggers ---

    /// Cached triggers of the chunks in `area`, requesting unresolved chunks.
    pub fn get_triggers(&self, area: &[ChunkKey]) -> Vec<Arc<Trigger>> {
        let frame = self.frame();
        let (found, missing) = {
            let mut guard = lock(&self.triggers);
            let cache = &mut *guard;
            let mut found = Vec::new();
            let mut unresolved = Vec::new();
            for key in area {
                match cache.by_chunk.get(key) {
                    Some(keys) => found.extend(keys.iter().filter_map(|k| cache.triggers.get(k).cloned())),
                    None => unresolved.push(*key),
                }
            }
            (found, cache.requested.claim(unresolved, frame))
        };
        if !missing.is_empty() {
            debug!(count = missing.len(), "requesting triggers");
            self.provider.load_triggers(&missing);
        }
        found
    }

    /// Triggers of one chunk, or `None` while the chunk is unresolved.
    pub fn cached_triggers(&self, chunk: ChunkKey) -> Option<Vec<Arc<Trigger>>> {
        let cache = lock(&self.triggers);
        let keys = cache.by_chunk.get(&chunk)?;
        Some(keys.iter().filter_map(|k| cache.triggers.get(k).cloned()).collect())
    }

    pub fn update_triggers(&self, changed: Vec<Trigger>) {
        lock(&self.triggers).updated.extend(changed);
    }

    pub fn triggers_loaded(&self, chunk: ChunkKey, triggers: Vec<Trigger>) {
        lock(&self.triggers).loaded.push(TriggerBatch {
            chunk,
            triggers,
            generated: false,
        });
    }

    pub fn triggers_generated(&self, chunk: ChunkKey, triggers: Vec<Trigger>) {
        lock(&self.triggers).loaded.push(TriggerBatch {
            chunk,
            triggers,
            generated: true,
        });
    }

    // --- entities ---

    /// Live entities in `area`, skipping those pending destruction. Chunks
    /// whose entities were never loaded are requested.
    pub fn get_entities(&self, area: &[ChunkKey]) -> Vec<Entity> {
        let frame = self.frame();
        let missing = {
            let mut guard = lock(&self.entities);
            let staging = &mut *guard;
            let unresolved: Vec<ChunkKey> = area
                .iter()
                .copied()
                .filter(|k| !staging.resolved.contains(k))
                .collect();
            staging.requested.claim(unresolved, frame)
        };
        if !missing.is_empty() {
            debug!(count = missing.len(), "requesting entities");
            self.provider.load_entities(&missing);
        }
        self.tree
            .query_chunks(area, EntityFilter::All)
            .into_iter()
            .filter(|e| !e.is_pending_destruction())
            .collect()
    }

    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        self.tree.get(id)
    }

    pub fn entity_count(&self) -> usize {
        self.tree.len()
    }

    /// Insert new entities into the index now; they are reported as loaded by
    /// the next drain. A duplicate id stops the batch with an error.
    pub fn add_entities(&self, entities: Vec<Entity>) -> Result<(), CacheError> {
        let mut inserted = Vec::with_capacity(entities.len());
        let mut result = Ok(());
        for entity in entities {
            let id = entity.id();
            match self.tree.insert(entity) {
                Ok(_) => inserted.push(id),
                Err(err) => {
                    result = Err(err.into());
                    break;
                }
            }
        }
        let mut staging = lock(&self.entities);
        for id in &inserted {
            staging.tombstones.remove(id);
            staging.deleted.remove(id);
        }
        staging.created.extend(inserted);
        result
    }

    /// Flag the entity for destruction now and remove it on the next drain.
    /// Later loads carrying the same id are discarded. Returns whether the
    /// entity was live.
    pub fn delete_entity(&self, id: EntityId) -> Result<bool, CacheError> {
        let live = self.tree.update(id, Entity::mark_pending_destruction)?;
        let frame = self.frame();
        let mut staging = lock(&self.entities);
        staging.deleted.insert(id);
        staging.tombstones.insert(id, frame);
        debug!(%id, live, "entity staged for deletion");
        Ok(live)
    }

    /// Stage one changed property of `entity` to be merged into the live
    /// instance.
    pub fn update_entity(&self, entity: Entity, changed: PropertyId) {
        lock(&self.entities)
            .updated
            .push(StagedUpdate::Selected(entity, changed));
    }

    /// Stage every instance-owned property of `entity` for merging.
    pub fn merge_entity(&self, entity: Entity) {
        lock(&self.entities).updated.push(StagedUpdate::Whole(entity));
    }

    /// Set one property on a copy of the live entity and stage the change.
    pub fn set_entity_property(
        &self,
        id: EntityId,
        property: PropertyId,
        value: PropertyValue,
    ) -> Result<bool, CacheError> {
        let mut entity = self.entity(id).ok_or(CacheError::UnknownEntity(id))?;
        if !entity.set(property, value)? {
            return Ok(false);
        }
        self.update_entity(entity, property);
        Ok(true)
    }

    pub fn entities_loaded(&self, entities: Vec<Entity>, chunk: ChunkKey) {
        let mut staging = lock(&self.entities);
        staging.loaded.extend(entities);
        staging.answered.push(chunk);
    }

    /// Generated entities are inserted immediately, like [`Self::add_entities`].
    pub fn entities_generated(&self, entities: Vec<Entity>, chunk: ChunkKey) -> Result<(), CacheError> {
        lock(&self.entities).answered.push(chunk);
        self.add_entities(entities)
    }

    pub fn entities_updated(&self, entities: Vec<Entity>) {
        lock(&self.entities)
            .updated
            .extend(entities.into_iter().map(StagedUpdate::Whole));
    }

    pub fn entities_deleted(&self, ids: &[EntityId]) -> Result<(), CacheError> {
        for id in ids {
            self.delete_entity(*id)?;
        }
        Ok(())
    }

    // --- observed areas ---

    pub fn register_area(&self) -> AreaId {
        AreaId(self.next_area.fetch_add(1, Ordering::Relaxed))
    }

    /// Replace the chunk keys observed by `area`. Takes effect on the next drain.
    pub fn observe(&self, area: AreaId, keys: Vec<ChunkKey>) {
        lock(&self.areas).insert(area, keys);
    }

    pub fn release(&self, area: AreaId) {
        lock(&self.areas).remove(&area);
    }

    /// Entities in the union of all observed windows, as of the last drain.
    pub fn all_observed_entities(&self) -> Arc<Vec<Entity>> {
        lock(&self.observed).clone()
    }

    // --- drain ---

    /// Merge all staged data into the live caches and index and report what
    /// changed: chunks, then triggers, then entities (deletions first).
    ///
    /// An entity that cannot be indexed or merged is logged and skipped; the
    /// rest of the pass still lands and is reported.
    pub fn process_loaded_data(&self) -> Vec<CacheEvent> {
        let frame = self.frame();
        let _span = tracing::info_span!("process_loaded_data", frame).entered();
        let mut events = Vec::new();
        self.drain_chunks(&mut events);
        self.drain_triggers(&mut events);
        self.drain_entities(&mut events);
        self.retry_expired(frame);
        self.rebuild_observed();
        trace!(events = events.len(), "drain pass complete");
        events
    }

    fn drain_chunks(&self, events: &mut Vec<CacheEvent>) {
        let (loaded, updated, to_save) = {
            let mut guard = lock(&self.chunks);
            let cache = &mut *guard;
            let staged = std::mem::take(&mut cache.loaded)
                .into_iter()
                .map(|c| (c, false))
                .chain(std::mem::take(&mut cache.generated).into_iter().map(|c| (c, true)));
            let mut loaded = Vec::new();
            let mut to_save = Vec::new();
            for (mut chunk, generated) in staged {
                cache.requested.resolve(chunk.key);
                if cache.chunks.contains_key(&chunk.key) {
                    debug!(key = %chunk.key, "chunk already cached, ignoring");
                    continue;
                }
                chunk.dirty = false;
                let chunk = Arc::new(chunk);
                cache.chunks.insert(chunk.key, chunk.clone());
                if generated {
                    to_save.push(chunk.clone());
                }
                loaded.push(chunk);
            }
            let mut updated = Vec::new();
            for mut chunk in std::mem::take(&mut cache.updated) {
                cache.requested.resolve(chunk.key);
                chunk.dirty = false;
                let chunk = Arc::new(chunk);
                cache.chunks.insert(chunk.key, chunk.clone());
                to_save.push(chunk.clone());
                updated.push(chunk);
            }
            (loaded, updated, to_save)
        };
        if !to_save.is_empty() {
            self.saver.save_chunks(&to_save);
        }
        trace!(loaded = loaded.len(), updated = updated.len(), "chunks drained");
        if !loaded.is_empty() {
            events.push(CacheEvent::ChunksLoaded(loaded));
        }
        if !updated.is_empty() {
            events.push(CacheEvent::ChunksUpdated(updated));
        }
    }

    fn drain_triggers(&self, events: &mut Vec<CacheEvent>) {
        let (chunks, loaded, updated, to_save) = {
            let mut guard = lock(&self.triggers);
            let cache = &mut *guard;
            let mut chunks = Vec::new();
            let mut loaded = Vec::new();
            let mut to_save = Vec::new();
            for batch in std::mem::take(&mut cache.loaded) {
                cache.requested.resolve(batch.chunk);
                cache.by_chunk.entry(batch.chunk).or_default();
                chunks.push(batch.chunk);
                for trigger in batch.triggers {
                    let trigger = Arc::new(trigger);
                    cache
                        .by_chunk
                        .entry(trigger.key.chunk)
                        .or_default()
                        .insert(trigger.key);
                    cache.triggers.insert(trigger.key, trigger.clone());
                    if batch.generated {
                        to_save.push(trigger.clone());
                    }
                    loaded.push(trigger);
                }
            }
            let mut updated = Vec::new();
            for trigger in std::mem::take(&mut cache.updated) {
                let trigger = Arc::new(trigger);
                cache
                    .by_chunk
                    .entry(trigger.key.chunk)
                    .or_default()
                    .insert(trigger.key);
                cache.triggers.insert(trigger.key, trigger.clone());
                to_save.push(trigger.clone());
                updated.push(trigger);
            }
            (chunks, loaded, updated, to_save)
        };
        if !to_save.is_empty() {
            self.saver.save_triggers(&to_save);
        }
        if !chunks.is_empty() {
            events.push(CacheEvent::TriggersLoaded {
                chunks,
                triggers: loaded,
            });
        }
        if !updated.is_empty() {
            events.push(CacheEvent::TriggersUpdated(updated));
        }
    }

    fn drain_entities(&self, events: &mut Vec<CacheEvent>) {
        let (deleted, loaded, mut created, updates) = {
            let mut guard = lock(&self.entities);
            let staging = &mut *guard;
            for key in std::mem::take(&mut staging.answered) {
                staging.requested.resolve(key);
                staging.resolved.insert(key);
            }
            let loaded: Vec<Entity> = std::mem::take(&mut staging.loaded)
                .into_iter()
                .filter(|e| {
                    let deleted = staging.tombstones.contains_key(&e.id());
                    if deleted {
                        debug!(id = %e.id(), "discarding load of deleted entity");
                    }
                    !deleted
                })
                .collect();
            let updates: Vec<StagedUpdate> = std::mem::take(&mut staging.updated)
                .into_iter()
                .filter(|u| !staging.tombstones.contains_key(&u.id()))
                .collect();
            let deleted: Vec<EntityId> = std::mem::take(&mut staging.deleted).into_iter().collect();
            match staging.requested.oldest() {
                Some(oldest) => staging.tombstones.retain(|_, frame| oldest <= *frame),
                None => staging.tombstones.clear(),
            }
            (deleted, loaded, std::mem::take(&mut staging.created), updates)
        };

        // Added and deleted before anyone heard of it: nothing to report.
        let unreported: HashSet<EntityId> = created.iter().copied().collect();
        let mut removed = Vec::new();
        for id in deleted {
            if self.tree.remove(id).is_none() {
                debug!(%id, "deleted entity was not indexed");
                continue;
            }
            self.saver.delete_entity(id);
            if !unreported.contains(&id) {
                removed.push(id);
            }
        }

        let mut updated = Vec::new();
        for entity in loaded {
            let id = entity.id();
            if self.tree.contains(id) {
                if self.merge_or_warn(id, |live| live.merge_from(&entity)) {
                    updated.push(id);
                }
            } else {
                match self.tree.insert(entity) {
                    Ok(_) => created.push(id),
                    Err(err) => warn!(%id, %err, "dropping loaded entity"),
                }
            }
        }

        for update in updates {
            let id = update.id();
            if !self.tree.contains(id) {
                debug!(%id, "update for unindexed entity, inserting");
                match self.tree.insert(update.into_entity()) {
                    Ok(_) => created.push(id),
                    Err(err) => warn!(%id, %err, "dropping entity update"),
                }
                continue;
            }
            let changed = match &update {
                StagedUpdate::Whole(staged) => self.merge_or_warn(id, |live| live.merge_from(staged)),
                StagedUpdate::Selected(staged, property) => {
                    self.merge_or_warn(id, |live| live.merge_selected(staged, [*property]))
                }
            };
            if changed {
                updated.push(id);
            }
        }

        let created_ids = unique(created, &HashSet::new());
        let updated_ids = unique(updated, &created_ids.iter().copied().collect());
        let (loaded, updated) = self.tree.with(|tree| {
            let loaded = snapshot(tree, &created_ids);
            let updated = snapshot(tree, &updated_ids);
            for id in created_ids.iter().chain(&updated_ids) {
                if let Err(err) = tree.update(*id, Entity::clear_dirty) {
                    warn!(%id, %err, "failed to clear dirty flags");
                }
            }
            (loaded, updated)
        });

        if !loaded.is_empty() {
            self.saver.save_entities(&loaded);
        }
        if !updated.is_empty() {
            self.saver.save_entities(&updated);
        }
        trace!(
            deleted = removed.len(),
            loaded = loaded.len(),
            updated = updated.len(),
            "entities drained"
        );
        if !removed.is_empty() {
            events.push(CacheEvent::EntitiesDeleted(removed));
        }
        if !loaded.is_empty() {
            events.push(CacheEvent::EntitiesLoaded(loaded));
        }
        if !updated.is_empty() {
            events.push(CacheEvent::EntitiesUpdated(updated));
        }
    }

    /// [`Self::merge_live`], logging and skipping the entity on failure.
    fn merge_or_warn(
        &self,
        id: EntityId,
        merge: impl FnOnce(&mut Entity) -> Result<Vec<PropertyId>, PropertyError>,
    ) -> bool {
        self.merge_live(id, merge).unwrap_or_else(|err| {
            warn!(%id, %err, "dropping entity merge");
            false
        })
    }

    /// Merge into the live instance by value; true if any property changed.
    fn merge_live(
        &self,
        id: EntityId,
        merge: impl FnOnce(&mut Entity) -> Result<Vec<PropertyId>, PropertyError>,
    ) -> Result<bool, CacheError> {
        let mut outcome = Ok(Vec::new());
        let found = self.tree.update(id, |live| outcome = merge(live))?;
        Ok(found && !outcome?.is_empty())
    }

    fn retry_expired(&self, frame: u64) {
        let timeout = self.config.request_timeout_frames;
        if timeout == 0 {
            return;
        }
        let max = self.config.max_request_attempts;
        let (chunks, dropped) = lock(&self.chunks).requested.expire(frame, timeout, max);
        report_dropped("chunks", &dropped);
        if !chunks.is_empty() {
            debug!(count = chunks.len(), "re-issuing chunk requests");
            self.provider.load_chunks(&chunks);
        }
        let (triggers, dropped) = lock(&self.triggers).requested.expire(frame, timeout, max);
        report_dropped("triggers", &dropped);
        if !triggers.is_empty() {
            debug!(count = triggers.len(), "re-issuing trigger requests");
            self.provider.load_triggers(&triggers);
        }
        let (entities, dropped) = lock(&self.entities).requested.expire(frame, timeout, max);
        report_dropped("entities", &dropped);
        if !entities.is_empty() {
            debug!(count = entities.len(), "re-issuing entity requests");
            self.provider.load_entities(&entities);
        }
    }

    fn rebuild_observed(&self) {
        let keys: Vec<ChunkKey> = {
            let areas = lock(&self.areas);
            let union: BTreeSet<ChunkKey> = areas.values().flatten().copied().collect();
            union.into_iter().collect()
        };
        let entities: Vec<Entity> = if keys.is_empty() {
            Vec::new()
        } else {
            self.tree
                .query_chunks(&keys, EntityFilter::All)
                .into_iter()
                .filter(|e| !e.is_pending_destruction())
                .collect()
        };
        *lock(&self.observed) = Arc::new(entities);
    }
}

fn report_dropped(category: &str, dropped: &[ChunkKey]) {
    for key in dropped {
        warn!(category, %key, "provider never answered, giving up on request");
    }
}

/// First occurrence of each id, minus `exclude`, in order.
fn unique(ids: Vec<EntityId>, exclude: &HashSet<EntityId>) -> Vec<EntityId> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| !exclude.contains(id) && seen.insert(*id))
        .collect()
}

fn snapshot(tree: &PartitionedTree<Entity>, ids: &[EntityId]) -> Vec<Entity> {
    ids.iter()
        .filter_map(|id| tree.get(*id))
        .filter(|e| !e.is_pending_destruction())
        .cloned()
        .collect()
}
