use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use worldcache_common::{ChunkKey, EntityId, ObserverId};
use worldcache_kernel::{builtin, CacheEvent, Chunk, Entity, EntityRecord, Trigger, WorldCache};

use crate::codec::{encode, CodecError};
use crate::config::ReplicationConfig;
use crate::message::{Delivery, Message};
use crate::transport::Transport;

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("observer {0} is not connected")]
    UnknownObserver(ObserverId),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Counts from one replication call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    /// Distinct messages encoded.
    pub messages: usize,
    /// Packets handed to the transport.
    pub packets: usize,
    /// Packets the transport refused.
    pub failed: usize,
}

#[derive(Debug, Default)]
struct ObserverState {
    joined: bool,
    chunk_requests: HashSet<ChunkKey>,
    trigger_requests: HashSet<ChunkKey>,
    /// Chunks whose entities this observer asked for before joining.
    entity_requests: HashSet<ChunkKey>,
}

/// Turns world cache change events into per-observer delta messages.
///
/// Entity payloads are the cache's drain snapshots, so their dirty bits
/// describe exactly one tick; the cache has already cleared the live bits by
/// the time they get here.
pub struct Replicator {
    config: ReplicationConfig,
    cache: Arc<WorldCache>,
    transport: Arc<dyn Transport>,
    observers: HashMap<ObserverId, ObserverState>,
}

impl fmt::Debug for Replicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicator")
            .field("config", &self.config)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Replicator {
    pub fn new(
        cache: Arc<WorldCache>,
        transport: Arc<dyn Transport>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            config,
            cache,
            transport,
            observers: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Register a connection. It receives only targeted answers until joined.
    pub fn connect(&mut self, observer: ObserverId) -> bool {
        if self.observers.contains_key(&observer) {
            return false;
        }
        self.observers.insert(observer, ObserverState::default());
        debug!(%observer, "observer connected");
        true
    }

    /// Start broadcasting to `observer`.
    pub fn mark_joined(&mut self, observer: ObserverId) -> Result<(), ReplicationError> {
        let state = self
            .observers
            .get_mut(&observer)
            .ok_or(ReplicationError::UnknownObserver(observer))?;
        state.joined = true;
        state.entity_requests.clear();
        debug!(%observer, "observer joined");
        Ok(())
    }

    pub fn disconnect(&mut self, observer: ObserverId) -> bool {
        let known = self.observers.remove(&observer).is_some();
        if known {
            debug!(%observer, "observer disconnected");
        }
        known
    }

    pub fn is_joined(&self, observer: ObserverId) -> bool {
        self.observers.get(&observer).is_some_and(|s| s.joined)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Replicate one drain pass worth of events.
    pub fn handle_events(&mut self, events: &[CacheEvent]) -> Result<ReplicationReport, ReplicationError> {
        let frame = self.cache.frame();
        let _span = tracing::info_span!("replicate", frame).entered();
        let mut report = ReplicationReport::default();
        for event in events {
            match event {
                CacheEvent::EntitiesDeleted(ids) => self.replicate_deleted(frame, ids, &mut report)?,
                CacheEvent::EntitiesLoaded(entities) => {
                    self.replicate_created(frame, entities, &mut report)?
                }
                CacheEvent::EntitiesUpdated(entities) => {
                    self.replicate_updated(frame, entities, &mut report)?
                }
                CacheEvent::ChunksLoaded(chunks) => self.answer_chunks(chunks, &mut report)?,
                CacheEvent::ChunksUpdated(chunks) => self.broadcast_chunks(chunks, &mut report)?,
                CacheEvent::TriggersLoaded { chunks, triggers } => {
                    self.answer_triggers(chunks, triggers, &mut report)?
                }
                CacheEvent::TriggersUpdated(triggers) => {
                    self.broadcast_triggers(triggers, &mut report)?
                }
            }
        }
        trace!(
            messages = report.messages,
            packets = report.packets,
            failed = report.failed,
            "replication pass complete"
        );
        Ok(report)
    }

    /// Answer cached chunks immediately; the rest are requested once and sent
    /// to this observer when they load.
    pub fn request_chunks(
        &mut self,
        observer: ObserverId,
        keys: &[ChunkKey],
    ) -> Result<ReplicationReport, ReplicationError> {
        let state = self
            .observers
            .get_mut(&observer)
            .ok_or(ReplicationError::UnknownObserver(observer))?;
        let fresh: Vec<ChunkKey> = keys
            .iter()
            .copied()
            .filter(|k| !state.chunk_requests.contains(k))
            .collect();
        let found = self.cache.get_chunks(&fresh);
        let found_keys: HashSet<ChunkKey> = found.iter().map(|c| c.key).collect();
        state
            .chunk_requests
            .extend(fresh.into_iter().filter(|k| !found_keys.contains(k)));

        let mut report = ReplicationReport::default();
        for chunk in found {
            let message = Message::ChunkData {
                chunk: (*chunk).clone(),
            };
            self.dispatch(&[observer], &message, message.delivery(), &mut report)?;
        }
        Ok(report)
    }

    pub fn request_triggers(
        &mut self,
        observer: ObserverId,
        keys: &[ChunkKey],
    ) -> Result<ReplicationReport, ReplicationError> {
        let state = self
            .observers
            .get_mut(&observer)
            .ok_or(ReplicationError::UnknownObserver(observer))?;
        let mut answers = Vec::new();
        let mut missing = Vec::new();
        for key in keys {
            if state.trigger_requests.contains(key) {
                continue;
            }
            match self.cache.cached_triggers(*key) {
                Some(triggers) => answers.push((*key, triggers)),
                None => {
                    state.trigger_requests.insert(*key);
                    missing.push(*key);
                }
            }
        }
        if !missing.is_empty() {
            self.cache.get_triggers(&missing);
        }

        let mut report = ReplicationReport::default();
        for (chunk, triggers) in answers {
            let message = Message::TriggerData {
                chunk,
                triggers: triggers.iter().map(|t| (**t).clone()).collect(),
            };
            self.dispatch(&[observer], &message, message.delivery(), &mut report)?;
        }
        Ok(report)
    }

    /// Send creates for the live entities of `keys` to this observer. Before
    /// it joins, later creates in those chunks are forwarded to it as well.
    pub fn request_entities(
        &mut self,
        observer: ObserverId,
        keys: &[ChunkKey],
    ) -> Result<ReplicationReport, ReplicationError> {
        let state = self
            .observers
            .get_mut(&observer)
            .ok_or(ReplicationError::UnknownObserver(observer))?;
        if !state.joined {
            state.entity_requests.extend(keys.iter().copied());
        }
        let entities = self.cache.get_entities(keys);
        let frame = self.cache.frame();
        let mut report = ReplicationReport::default();
        for (chunk, records) in self.group_by_chunk(&entities) {
            self.send_creates(&[observer], frame, chunk, &records, &mut report)?;
        }
        Ok(report)
    }

    fn joined(&self) -> Vec<ObserverId> {
        let mut ids: Vec<ObserverId> = self
            .observers
            .iter()
            .filter(|(_, s)| s.joined)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Joined observers plus those matching `extra`.
    fn recipients(&self, extra: impl Fn(&ObserverState) -> bool) -> Vec<ObserverId> {
        let mut ids: Vec<ObserverId> = self
            .observers
            .iter()
            .filter(|(_, s)| s.joined || extra(s))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn group_by_chunk(&self, entities: &[Entity]) -> BTreeMap<ChunkKey, Vec<EntityRecord>> {
        let chunk_size = self.cache.chunk_size();
        let mut groups: BTreeMap<ChunkKey, Vec<EntityRecord>> = BTreeMap::new();
        for entity in entities.iter().filter(|e| !e.is_pending_destruction()) {
            groups
                .entry(entity.chunk(chunk_size))
                .or_default()
                .push(entity.to_record());
        }
        groups
    }

    fn send_creates(
        &self,
        to: &[ObserverId],
        frame: u64,
        chunk: ChunkKey,
        records: &[EntityRecord],
        report: &mut ReplicationReport,
    ) -> Result<(), CodecError> {
        for batch in records.chunks(self.config.max_entities_per_create.max(1)) {
            let message = Message::CreateEntities {
                frame,
                chunk,
                entities: batch.to_vec(),
            };
            self.dispatch(to, &message, message.delivery(), report)?;
        }
        Ok(())
    }

    fn replicate_created(
        &self,
        frame: u64,
        entities: &[Entity],
        report: &mut ReplicationReport,
    ) -> Result<(), CodecError> {
        for (chunk, records) in self.group_by_chunk(entities) {
            let to = self.recipients(|s| s.entity_requests.contains(&chunk));
            self.send_creates(&to, frame, chunk, &records, report)?;
        }
        Ok(())
    }

    fn replicate_updated(
        &self,
        frame: u64,
        entities: &[Entity],
        report: &mut ReplicationReport,
    ) -> Result<(), CodecError> {
        let chunk_size = self.cache.chunk_size();
        for entity in entities.iter().filter(|e| !e.is_pending_destruction()) {
            // Observers still joining follow the chunks they were sent creates for.
            let chunk = entity.chunk(chunk_size);
            let to = self.recipients(|s| s.entity_requests.contains(&chunk));
            if to.is_empty() {
                continue;
            }
            let dirty = entity.dirty_ids();
            if dirty.iter().any(|id| builtin::is_transform(*id)) {
                let message = Message::EntityPosition {
                    frame,
                    id: entity.id(),
                    position: entity.position(),
                    rotation: entity.rotation(),
                    movement: entity.movement(),
                };
                self.dispatch(&to, &message, self.config.position_delivery, report)?;
            }
            let properties: Vec<_> = dirty
                .iter()
                .filter(|id| !builtin::is_transform(**id))
                .filter(|id| entity.properties().is_instance_owned(**id))
                .map(|id| {
                    let p = entity.property(*id);
                    (p.id(), p.kind(), p.raw().to_vec())
                })
                .collect();
            if !properties.is_empty() {
                let message = Message::EntityProperties {
                    frame,
                    id: entity.id(),
                    properties,
                };
                self.dispatch(&to, &message, message.delivery(), report)?;
            }
        }
        Ok(())
    }

    fn replicate_deleted(
        &self,
        frame: u64,
        ids: &[EntityId],
        report: &mut ReplicationReport,
    ) -> Result<(), CodecError> {
        if ids.is_empty() {
            return Ok(());
        }
        let to = self.recipients(|s| !s.entity_requests.is_empty());
        let message = Message::DestroyEntities {
            frame,
            ids: ids.to_vec(),
        };
        self.dispatch(&to, &message, message.delivery(), report)
    }

    /// Observers waiting on `key`, who are no longer waiting afterwards.
    fn take_requesters(
        &mut self,
        key: ChunkKey,
        pick: impl Fn(&mut ObserverState) -> &mut HashSet<ChunkKey>,
    ) -> Vec<ObserverId> {
        let mut ids: Vec<ObserverId> = self
            .observers
            .iter_mut()
            .filter_map(|(id, s)| pick(s).remove(&key).then_some(*id))
            .collect();
        ids.sort_unstable();
        ids
    }

    fn answer_chunks(&mut self, chunks: &[Arc<Chunk>], report: &mut ReplicationReport) -> Result<(), CodecError> {
        for chunk in chunks {
            let to = self.take_requesters(chunk.key, |s| &mut s.chunk_requests);
            if to.is_empty() {
                continue;
            }
            let message = Message::ChunkData {
                chunk: (**chunk).clone(),
            };
            self.dispatch(&to, &message, message.delivery(), report)?;
        }
        Ok(())
    }

    fn broadcast_chunks(&mut self, chunks: &[Arc<Chunk>], report: &mut ReplicationReport) -> Result<(), CodecError> {
        for chunk in chunks {
            let mut to = self.take_requesters(chunk.key, |s| &mut s.chunk_requests);
            to.extend(self.joined());
            to.sort_unstable();
            to.dedup();
            let message = Message::ChunkData {
                chunk: (**chunk).clone(),
            };
            self.dispatch(&to, &message, message.delivery(), report)?;
        }
        Ok(())
    }

    fn answer_triggers(
        &mut self,
        chunks: &[ChunkKey],
        triggers: &[Arc<Trigger>],
        report: &mut ReplicationReport,
    ) -> Result<(), CodecError> {
        let mut grouped = group_triggers(triggers);
        for chunk in chunks {
            let to = self.take_requesters(*chunk, |s| &mut s.trigger_requests);
            let triggers = grouped.remove(chunk).unwrap_or_default();
            if to.is_empty() {
                continue;
            }
            let message = Message::TriggerData {
                chunk: *chunk,
                triggers,
            };
            self.dispatch(&to, &message, message.delivery(), report)?;
        }
        Ok(())
    }

    fn broadcast_triggers(&mut self, triggers: &[Arc<Trigger>], report: &mut ReplicationReport) -> Result<(), CodecError> {
        for (chunk, triggers) in group_triggers(triggers) {
            let mut to = self.take_requesters(chunk, |s| &mut s.trigger_requests);
            to.extend(self.joined());
            to.sort_unstable();
            to.dedup();
            let message = Message::TriggerData { chunk, triggers };
            self.dispatch(&to, &message, message.delivery(), report)?;
        }
        Ok(())
    }

    /// Encode once and send to every recipient. Transport failures are logged
    /// and counted, never propagated.
    fn dispatch(
        &self,
        to: &[ObserverId],
        message: &Message,
        delivery: Delivery,
        report: &mut ReplicationReport,
    ) -> Result<(), CodecError> {
        if to.is_empty() {
            return Ok(());
        }
        let payload = encode(message)?;
        report.messages += 1;
        for observer in to {
            match self.transport.send(*observer, delivery, payload.clone()) {
                Ok(()) => report.packets += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(%observer, kind = ?message.kind(), %err, "send failed");
                }
            }
        }
        Ok(())
    }
}

fn group_triggers(triggers: &[Arc<Trigger>]) -> BTreeMap<ChunkKey, Vec<Trigger>> {
    let mut grouped: BTreeMap<ChunkKey, Vec<Trigger>> = BTreeMap::new();
    for trigger in triggers {
        grouped
            .entry(trigger.key.chunk)
            .or_default()
            .push((**trigger).clone());
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use glam::Vec2;
    use worldcache_common::TriggerKey;
    use worldcache_kernel::{
        CacheConfig, EntityType, EntityTypeId, EntityTypeRegistry, NullSaver, ProviderRequest,
        RequestQueue, TriggerKind,
    };
    use worldcache_property::{PropertyId, PropertyKind, PropertyTemplate, PropertyValue};

    use crate::message::MessageKind;

    const MOB: EntityTypeId = EntityTypeId(1);
    const HEALTH: PropertyId = PropertyId(10);

    struct Fixture {
        cache: Arc<WorldCache>,
        queue: Arc<RequestQueue>,
        transport: Arc<LoopbackTransport>,
        replicator: Replicator,
        registry: EntityTypeRegistry,
    }

    impl Fixture {
        fn new(config: ReplicationConfig) -> Self {
            let queue = Arc::new(RequestQueue::new());
            let cache = Arc::new(WorldCache::new(
                CacheConfig::default(),
                queue.clone(),
                Arc::new(NullSaver),
            ));
            let transport = Arc::new(LoopbackTransport::new());
            let replicator = Replicator::new(cache.clone(), transport.clone(), config);
            let mut registry = EntityTypeRegistry::new();
            registry
                .register(
                    EntityType::new(MOB, "mob")
                        .defaults(PropertyTemplate::new().declare(HEALTH, PropertyValue::Int(10))),
                )
                .unwrap();
            Self {
                cache,
                queue,
                transport,
                replicator,
                registry,
            }
        }

        fn mob(&self, id: u32, x: f32, y: f32) -> Entity {
            self.registry
                .create(MOB, EntityId(id), Vec2::new(x, y))
                .unwrap()
        }

        fn joined(&mut self) -> ObserverId {
            let id = ObserverId::new();
            self.replicator.connect(id);
            self.replicator.mark_joined(id).unwrap();
            id
        }

        fn tick(&mut self) -> ReplicationReport {
            let events = self.cache.process_loaded_data();
            self.replicator.handle_events(&events).unwrap()
        }

        fn messages(&self, observer: ObserverId) -> Vec<Message> {
            self.transport.take_messages(observer).unwrap()
        }
    }

    fn kinds(messages: &[Message]) -> Vec<MessageKind> {
        messages.iter().map(Message::kind).collect()
    }

    fn fixture() -> Fixture {
        Fixture::new(ReplicationConfig::default())
    }

    #[test]
    fn creates_are_grouped_by_chunk_for_joined_observers() {
        let mut f = fixture();
        let a = f.joined();
        let b = ObserverId::new();
        f.replicator.connect(b);

        f.cache
            .add_entities(vec![f.mob(1, 1.0, 1.0), f.mob(2, 2.0, 2.0), f.mob(3, 40.0, 1.0)])
            .unwrap();
        f.cache.advance_frame();
        let report = f.tick();
        assert_eq!(report.packets, 2);

        let messages = f.messages(a);
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            Message::CreateEntities {
                frame,
                chunk,
                entities,
            } => {
                assert_eq!(*frame, 1);
                assert_eq!(*chunk, ChunkKey::ORIGIN);
                assert_eq!(entities.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&messages[1], Message::CreateEntities { chunk, .. } if *chunk == ChunkKey::new(1, 0)));
        assert!(f.messages(b).is_empty());
    }

    #[test]
    fn dirty_position_sends_one_message_then_nothing() {
        let mut f = fixture();
        let a = f.joined();
        f.cache.add_entities(vec![f.mob(1, 1.0, 1.0)]).unwrap();
        f.tick();
        f.transport.take(a);

        let moved = PropertyValue::Vec2(Vec2::new(2.0, 1.0));
        f.cache
            .set_entity_property(EntityId(1), builtin::POSITION, moved)
            .unwrap();
        let report = f.tick();
        assert_eq!(report.messages, 1);
        let packets = f.transport.take(a);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].delivery, Delivery::Unreliable);
        assert!(!f.cache.entity(EntityId(1)).unwrap().is_dirty());

        assert_eq!(f.tick(), ReplicationReport::default());
        assert!(f.messages(a).is_empty());
    }

    #[test]
    fn property_message_lists_only_dirty_non_transform_values() {
        let mut f = fixture();
        let a = f.joined();
        f.cache.add_entities(vec![f.mob(1, 1.0, 1.0)]).unwrap();
        f.tick();
        f.transport.take(a);

        let mut copy = f.cache.entity(EntityId(1)).unwrap();
        copy.set(HEALTH, PropertyValue::Int(4)).unwrap();
        copy.set_rotation(1.0).unwrap();
        f.cache.merge_entity(copy);
        f.tick();

        let messages = f.messages(a);
        assert_eq!(
            kinds(&messages),
            vec![MessageKind::EntityPosition, MessageKind::EntityProperties]
        );
        match &messages[1] {
            Message::EntityProperties { id, properties, .. } => {
                assert_eq!(*id, EntityId(1));
                assert_eq!(
                    properties,
                    &vec![(HEALTH, PropertyKind::Int, 4i32.to_le_bytes().to_vec())]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pending_destruction_is_skipped() {
        let mut f = fixture();
        f.joined();
        let mut doomed = f.mob(1, 1.0, 1.0);
        doomed.set_position(Vec2::new(3.0, 3.0)).unwrap();
        doomed.mark_pending_destruction();
        let report = f
            .replicator
            .handle_events(&[CacheEvent::EntitiesUpdated(vec![doomed.clone()]), CacheEvent::EntitiesLoaded(vec![doomed])])
            .unwrap();
        assert_eq!(report, ReplicationReport::default());
    }

    #[test]
    fn deletion_sends_destroy_with_ids() {
        let mut f = fixture();
        let a = f.joined();
        f.cache.add_entities(vec![f.mob(1, 1.0, 1.0)]).unwrap();
        f.tick();
        f.transport.take(a);

        f.cache.delete_entity(EntityId(1)).unwrap();
        f.tick();
        let messages = f.messages(a);
        assert!(matches!(&messages[..], [Message::DestroyEntities { ids, .. }] if ids == &[EntityId(1)]));
    }

    #[test]
    fn chunk_request_is_answered_point_to_point() {
        let mut f = fixture();
        let a = f.joined();
        let b = f.joined();
        let key = ChunkKey::new(2, 3);

        assert_eq!(f.replicator.request_chunks(a, &[key]).unwrap().packets, 0);
        assert_eq!(f.replicator.request_chunks(a, &[key]).unwrap().packets, 0);
        assert_eq!(f.queue.drain(), vec![ProviderRequest::Chunks(vec![key])]);

        f.cache.chunks_loaded(vec![Chunk::new(key)]);
        f.tick();
        assert!(matches!(&f.messages(a)[..], [Message::ChunkData { chunk }] if chunk.key == key));
        assert!(f.messages(b).is_empty());

        assert_eq!(f.replicator.request_chunks(b, &[key]).unwrap().packets, 1);
        assert_eq!(f.messages(b).len(), 1);
        assert!(f.queue.is_empty());
    }

    #[test]
    fn chunk_updates_are_broadcast() {
        let mut f = fixture();
        let a = f.joined();
        let b = f.joined();
        f.cache.chunks_loaded(vec![Chunk::new(ChunkKey::ORIGIN)]);
        f.tick();
        assert!(f.messages(a).is_empty());

        f.cache.update_chunks(vec![Chunk::new(ChunkKey::ORIGIN)]);
        let report = f.tick();
        assert_eq!(report.messages, 1);
        assert_eq!(report.packets, 2);
        assert_eq!(kinds(&f.messages(b)), vec![MessageKind::ChunkData]);
    }

    #[test]
    fn trigger_request_waits_for_load() {
        let mut f = fixture();
        let a = f.joined();
        let key = ChunkKey::new(1, 1);
        f.replicator.request_triggers(a, &[key]).unwrap();
        assert_eq!(f.queue.drain(), vec![ProviderRequest::Triggers(vec![key])]);

        let trigger = Trigger::new(TriggerKey::new(key, 3), TriggerKind::Damage, key.bounds(32.0));
        f.cache.triggers_loaded(key, vec![trigger]);
        f.tick();
        assert!(matches!(
            &f.messages(a)[..],
            [Message::TriggerData { chunk, triggers }] if *chunk == key && triggers.len() == 1
        ));

        assert_eq!(f.replicator.request_triggers(a, &[key]).unwrap().packets, 1);
    }

    #[test]
    fn unknown_observer_is_rejected() {
        let mut f = fixture();
        let stranger = ObserverId::new();
        assert!(matches!(
            f.replicator.request_chunks(stranger, &[ChunkKey::ORIGIN]),
            Err(ReplicationError::UnknownObserver(id)) if id == stranger
        ));
        assert!(f.replicator.mark_joined(stranger).is_err());
        assert!(!f.replicator.disconnect(stranger));
    }

    #[test]
    fn transport_failure_is_counted_not_fatal() {
        let mut f = fixture();
        let a = f.joined();
        let b = f.joined();
        f.transport.cut(a);
        f.cache.add_entities(vec![f.mob(1, 1.0, 1.0)]).unwrap();
        let report = f.tick();
        assert_eq!(report.failed, 1);
        assert_eq!(report.packets, 1);
        assert_eq!(f.messages(b).len(), 1);
    }

    #[test]
    fn large_creates_are_split() {
        let mut f = Fixture::new(ReplicationConfig {
            max_entities_per_create: 2,
            ..ReplicationConfig::default()
        });
        let a = f.joined();
        let mobs = (1..=5).map(|i| f.mob(i, i as f32, 1.0)).collect();
        f.cache.add_entities(mobs).unwrap();
        f.tick();
        assert_eq!(f.messages(a).len(), 3);
    }

    #[test]
    fn pre_join_observer_gets_requested_chunk_entities() {
        let mut f = fixture();
        let early = ObserverId::new();
        f.replicator.connect(early);
        f.cache.add_entities(vec![f.mob(1, 1.0, 1.0)]).unwrap();
        f.tick();

        let report = f.replicator.request_entities(early, &[ChunkKey::ORIGIN]).unwrap();
        assert_eq!(report.packets, 1);
        f.transport.take(early);

        f.cache.add_entities(vec![f.mob(2, 2.0, 2.0), f.mob(3, 90.0, 90.0)]).unwrap();
        f.tick();
        let messages = f.messages(early);
        assert!(matches!(&messages[..], [Message::CreateEntities { chunk, .. }] if *chunk == ChunkKey::ORIGIN));

        f.replicator.mark_joined(early).unwrap();
        assert!(f.replicator.is_joined(early));
    }

    #[test]
    fn pre_join_observer_follows_updates_in_requested_chunks() {
        let mut f = fixture();
        let early = ObserverId::new();
        f.replicator.connect(early);
        let late = ObserverId::new();
        f.replicator.connect(late);
        f.cache
            .add_entities(vec![f.mob(1, 1.0, 1.0), f.mob(2, 90.0, 90.0)])
            .unwrap();
        f.tick();
        f.replicator.request_entities(early, &[ChunkKey::ORIGIN]).unwrap();
        f.transport.take(early);

        for id in [1, 2] {
            let mut copy = f.cache.entity(EntityId(id)).unwrap();
            copy.set(HEALTH, PropertyValue::Int(2)).unwrap();
            f.cache.merge_entity(copy);
        }
        f.tick();

        let messages = f.messages(early);
        assert!(matches!(
            &messages[..],
            [Message::EntityProperties { id, .. }] if *id == EntityId(1)
        ));
        assert!(f.messages(late).is_empty());
    }
}
