use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use worldcache_common::{ChunkKey, EntityId};
use worldcache_property::{
    Property, PropertyError, PropertyId, PropertyKind, PropertySet, PropertyTemplate,
    PropertyValue,
};
use worldcache_spatial::SpatialItem;

/// Property ids every entity type declares.
pub mod builtin {
    use worldcache_property::PropertyId;

    pub const POSITION: PropertyId = PropertyId(0);
    pub const ROTATION: PropertyId = PropertyId(1);
    pub const MOVEMENT: PropertyId = PropertyId(2);

    /// Ids carried by position messages rather than property messages.
    pub const TRANSFORM: [PropertyId; 3] = [POSITION, ROTATION, MOVEMENT];

    pub fn is_transform(id: PropertyId) -> bool {
        TRANSFORM.contains(&id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityTypeId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BehaviourId(pub u16);

/// Game logic attached to an entity. Runs on the simulation thread.
pub trait Behaviour: fmt::Debug + Send + Sync {
    fn id(&self) -> BehaviourId;

    fn update(&self, entity: &mut Entity, dt: f32) -> Result<(), PropertyError>;
}

/// A simulated object. Position and rotation mirror their properties.
#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    type_id: EntityTypeId,
    parent: Option<EntityId>,
    is_static: bool,
    collision: Option<Vec2>,
    position: Vec2,
    rotation: f32,
    properties: PropertySet,
    behaviours: BTreeMap<BehaviourId, Vec<Arc<dyn Behaviour>>>,
    pending_destruction: bool,
}

impl Entity {
    /// Build an entity over a type's defaults. The template must declare the
    /// [`builtin`] transform properties.
    pub(crate) fn new(
        id: EntityId,
        type_id: EntityTypeId,
        defaults: Arc<PropertyTemplate>,
        is_static: bool,
        collision: Option<Vec2>,
    ) -> Self {
        let mut entity = Self {
            id,
            type_id,
            parent: None,
            is_static,
            collision,
            position: Vec2::ZERO,
            rotation: 0.0,
            properties: PropertySet::new(defaults),
            behaviours: BTreeMap::new(),
            pending_destruction: false,
        };
        entity.refresh_mirrors();
        entity
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn type_id(&self) -> EntityTypeId {
        self.type_id
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<EntityId>) {
        self.parent = parent;
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Half extents of the static collision box, if the type has one.
    pub fn collision(&self) -> Option<Vec2> {
        self.collision
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn movement(&self) -> Vec2 {
        self.properties
            .get(builtin::MOVEMENT)
            .as_vec2()
            .unwrap_or(Vec2::ZERO)
    }

    /// Chunk the entity currently stands in.
    pub fn chunk(&self, chunk_size: f32) -> ChunkKey {
        ChunkKey::from_position(self.position, chunk_size)
    }

    pub fn set_position(&mut self, position: Vec2) -> Result<bool, PropertyError> {
        self.set(builtin::POSITION, PropertyValue::Vec2(position))
    }

    pub fn set_rotation(&mut self, rotation: f32) -> Result<bool, PropertyError> {
        self.set(builtin::ROTATION, PropertyValue::Float(rotation))
    }

    pub fn set_movement(&mut self, movement: Vec2) -> Result<bool, PropertyError> {
        self.set(builtin::MOVEMENT, PropertyValue::Vec2(movement))
    }

    /// Read a property. Panics if the type never declared it.
    pub fn property(&self, id: PropertyId) -> &Property {
        self.properties.get(id)
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    pub fn set(&mut self, id: PropertyId, value: PropertyValue) -> Result<bool, PropertyError> {
        let changed = self.properties.set(id, value)?;
        if changed && builtin::is_transform(id) {
            self.refresh_mirrors();
        }
        Ok(changed)
    }

    pub fn write(&mut self, id: PropertyId, bytes: &[u8]) -> Result<bool, PropertyError> {
        let changed = self.properties.write(id, bytes)?;
        if changed && builtin::is_transform(id) {
            self.refresh_mirrors();
        }
        Ok(changed)
    }

    fn refresh_mirrors(&mut self) {
        if let Some(p) = self.properties.try_get(builtin::POSITION) {
            self.position = p.as_vec2().unwrap_or(self.position);
        }
        if let Some(r) = self.properties.try_get(builtin::ROTATION) {
            self.rotation = r.as_float().unwrap_or(self.rotation);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.properties.has_dirty()
    }

    pub fn dirty_ids(&self) -> Vec<PropertyId> {
        self.properties.dirty_ids().collect()
    }

    pub fn clear_dirty(&mut self) {
        self.properties.clear_dirty();
    }

    pub fn is_pending_destruction(&self) -> bool {
        self.pending_destruction
    }

    pub fn mark_pending_destruction(&mut self) {
        self.pending_destruction = true;
    }

    /// Copy every instance-owned value of `other` in by value; identity and
    /// behaviours of `self` are kept.
    pub fn merge_from(&mut self, other: &Entity) -> Result<Vec<PropertyId>, PropertyError> {
        let changed = self.properties.merge_from(&other.properties)?;
        self.parent = other.parent;
        self.refresh_mirrors();
        Ok(changed)
    }

    /// Copy only the listed properties of `other` in by value.
    pub fn merge_selected(
        &mut self,
        other: &Entity,
        ids: impl IntoIterator<Item = PropertyId>,
    ) -> Result<Vec<PropertyId>, PropertyError> {
        let mut changed = Vec::new();
        for id in ids {
            if let Some(p) = other.properties.try_get(id) {
                if self.write(id, p.raw())? {
                    changed.push(id);
                }
            }
        }
        Ok(changed)
    }

    pub fn add_behaviour(&mut self, behaviour: Arc<dyn Behaviour>) {
        self.behaviours
            .entry(behaviour.id())
            .or_default()
            .push(behaviour);
    }

    pub fn behaviours(&self, id: BehaviourId) -> &[Arc<dyn Behaviour>] {
        self.behaviours.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn remove_behaviours(&mut self, id: BehaviourId) -> Vec<Arc<dyn Behaviour>> {
        self.behaviours.remove(&id).unwrap_or_default()
    }

    /// Run every attached behaviour once, in id order.
    pub fn run_behaviours(&mut self, dt: f32) -> Result<(), PropertyError> {
        let all: Vec<Arc<dyn Behaviour>> = self.behaviours.values().flatten().cloned().collect();
        for behaviour in all {
            behaviour.update(self, dt)?;
        }
        Ok(())
    }

    /// Instance-owned state for persistence and replication.
    pub fn to_record(&self) -> EntityRecord {
        EntityRecord {
            id: self.id,
            type_id: self.type_id,
            parent: self.parent,
            properties: self
                .properties
                .instance_properties()
                .map(|p| (p.id(), p.kind(), p.raw().to_vec()))
                .collect(),
        }
    }

    /// Apply a record's instance properties on top of this entity's defaults.
    pub(crate) fn apply_record(&mut self, record: &EntityRecord) -> Result<(), PropertyError> {
        self.parent = record.parent;
        for (id, kind, raw) in &record.properties {
            if self.properties.contains(*id) {
                self.properties.write(*id, raw)?;
            } else {
                self.properties
                    .insert(Property::from_raw(*id, *kind, raw.clone())?);
            }
        }
        self.properties.clear_dirty();
        self.refresh_mirrors();
        Ok(())
    }
}

impl SpatialItem for Entity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn position(&self) -> Vec2 {
        self.position
    }

    fn is_static(&self) -> bool {
        self.is_static
    }
}

/// Serializable instance state of an entity. Defaults are not included; they
/// are rebuilt from the type registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub type_id: EntityTypeId,
    pub parent: Option<EntityId>,
    pub properties: Vec<(PropertyId, PropertyKind, Vec<u8>)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEALTH: PropertyId = PropertyId(10);

    fn template() -> Arc<PropertyTemplate> {
        PropertyTemplate::new()
            .declare(builtin::POSITION, PropertyValue::Vec2(Vec2::ZERO))
            .declare(builtin::ROTATION, PropertyValue::Float(0.0))
            .declare(builtin::MOVEMENT, PropertyValue::Vec2(Vec2::ZERO))
            .declare(HEALTH, PropertyValue::Int(10))
            .into_shared()
    }

    fn entity(id: u32) -> Entity {
        Entity::new(EntityId(id), EntityTypeId(1), template(), false, None)
    }

    #[derive(Debug)]
    struct Drift;

    impl Behaviour for Drift {
        fn id(&self) -> BehaviourId {
            BehaviourId(1)
        }

        fn update(&self, entity: &mut Entity, dt: f32) -> Result<(), PropertyError> {
            let next = entity.position() + entity.movement() * dt;
            entity.set_position(next).map(|_| ())
        }
    }

    #[test]
    fn position_mirror_follows_property() {
        let mut e = entity(1);
        assert_eq!(e.position(), Vec2::ZERO);
        assert!(e.set_position(Vec2::new(3.0, 4.0)).unwrap());
        assert_eq!(e.position(), Vec2::new(3.0, 4.0));
        assert!(e.write(builtin::ROTATION, &1.5f32.to_le_bytes()).unwrap());
        assert_eq!(e.rotation(), 1.5);
        assert_eq!(e.dirty_ids(), vec![builtin::POSITION, builtin::ROTATION]);
    }

    #[test]
    fn merge_keeps_identity_and_copies_values() {
        let mut live = entity(1);
        live.add_behaviour(Arc::new(Drift));
        let mut staged = entity(1);
        staged.set(HEALTH, PropertyValue::Int(3)).unwrap();
        staged.set_position(Vec2::new(1.0, 1.0)).unwrap();

        let changed = live.merge_from(&staged).unwrap();
        assert_eq!(changed.len(), 2);
        assert_eq!(live.position(), Vec2::new(1.0, 1.0));
        assert_eq!(live.behaviours(BehaviourId(1)).len(), 1);
    }

    #[test]
    fn merge_selected_only_touches_listed_ids() {
        let mut live = entity(1);
        let mut staged = entity(1);
        staged.set(HEALTH, PropertyValue::Int(3)).unwrap();
        staged.set_position(Vec2::new(1.0, 1.0)).unwrap();
        let changed = live.merge_selected(&staged, [HEALTH]).unwrap();
        assert_eq!(changed, vec![HEALTH]);
        assert_eq!(live.position(), Vec2::ZERO);
    }

    #[test]
    fn behaviours_run_against_the_entity() {
        let mut e = entity(1);
        e.set_movement(Vec2::new(2.0, 0.0)).unwrap();
        e.add_behaviour(Arc::new(Drift));
        e.run_behaviours(0.5).unwrap();
        assert_eq!(e.position(), Vec2::new(1.0, 0.0));
        assert_eq!(e.remove_behaviours(BehaviourId(1)).len(), 1);
        assert!(e.behaviours(BehaviourId(1)).is_empty());
    }

    #[test]
    fn record_restores_instance_state() {
        let mut e = entity(4);
        e.set_position(Vec2::new(8.0, 9.0)).unwrap();
        e.set(HEALTH, PropertyValue::Int(1)).unwrap();
        e.set_parent(Some(EntityId(2)));
        let record = e.to_record();
        assert_eq!(record.properties.len(), 2);

        let mut fresh = entity(4);
        fresh.apply_record(&record).unwrap();
        assert_eq!(fresh.position(), Vec2::new(8.0, 9.0));
        assert_eq!(fresh.property(HEALTH).as_int().unwrap(), 1);
        assert_eq!(fresh.parent(), Some(EntityId(2)));
        assert!(!fresh.is_dirty());
    }
}
