use glam::Vec2;
use std::collections::HashMap;
use std::sync::Arc;
use worldcache_common::{ChunkKey, EntityId};
use worldcache_property::{PropertyTemplate, PropertyValue};

use crate::chunk::Chunk;
use crate::entity::{builtin, Entity, EntityRecord, EntityTypeId};
use crate::error::RegistryError;

/// Inputs to a spawn test.
#[derive(Debug, Clone, Copy)]
pub struct SpawnContext<'a> {
    pub chunk: ChunkKey,
    pub position: Vec2,
    pub chunk_data: Option<&'a Chunk>,
}

/// Decides whether an entity type may spawn at a location.
pub type SpawnTest = fn(&SpawnContext<'_>) -> bool;

/// Registration record of one entity type.
#[derive(Debug, Clone)]
pub struct EntityType {
    pub id: EntityTypeId,
    pub name: String,
    pub is_static: bool,
    pub collision: Option<Vec2>,
    defaults: Arc<PropertyTemplate>,
    spawn_test: Option<SpawnTest>,
}

impl EntityType {
    pub fn new(id: EntityTypeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_static: false,
            collision: None,
            defaults: Arc::new(PropertyTemplate::new()),
            spawn_test: None,
        }
    }

    pub fn static_body(mut self, half_extents: Vec2) -> Self {
        self.is_static = true;
        self.collision = Some(half_extents);
        self
    }

    pub fn defaults(mut self, template: PropertyTemplate) -> Self {
        self.defaults = Arc::new(template);
        self
    }

    pub fn spawn_test(mut self, test: SpawnTest) -> Self {
        self.spawn_test = Some(test);
        self
    }

    pub fn template(&self) -> &Arc<PropertyTemplate> {
        &self.defaults
    }
}

/// Explicit registry of entity types, filled once at startup.
#[derive(Debug, Default)]
pub struct EntityTypeRegistry {
    types: HashMap<EntityTypeId, EntityType>,
}

impl EntityTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. The transform properties are declared on its
    /// template when the type leaves them out.
    pub fn register(&mut self, mut ty: EntityType) -> Result<(), RegistryError> {
        if self.types.contains_key(&ty.id) {
            return Err(RegistryError::DuplicateEntityType(ty.id));
        }
        let mut template = (*ty.defaults).clone();
        let builtins = [
            (builtin::POSITION, PropertyValue::Vec2(Vec2::ZERO)),
            (builtin::ROTATION, PropertyValue::Float(0.0)),
            (builtin::MOVEMENT, PropertyValue::Vec2(Vec2::ZERO)),
        ];
        for (id, value) in builtins {
            if !template.contains(id) {
                template = template.declare(id, value);
            }
        }
        ty.defaults = template.into_shared();
        tracing::debug!(type_id = ty.id.0, name = %ty.name, "registered entity type");
        self.types.insert(ty.id, ty);
        Ok(())
    }

    pub fn get(&self, id: EntityTypeId) -> Result<&EntityType, RegistryError> {
        self.types.get(&id).ok_or(RegistryError::UnknownEntityType(id))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Create a clean entity of a registered type at `position`.
    pub fn create(
        &self,
        type_id: EntityTypeId,
        id: EntityId,
        position: Vec2,
    ) -> Result<Entity, RegistryError> {
        let ty = self.get(type_id)?;
        let mut entity = Entity::new(id, type_id, ty.defaults.clone(), ty.is_static, ty.collision);
        entity.set_position(position)?;
        entity.clear_dirty();
        Ok(entity)
    }

    /// Run the type's spawn test. A type without one is a configuration error.
    pub fn can_spawn(
        &self,
        type_id: EntityTypeId,
        ctx: &SpawnContext<'_>,
    ) -> Result<bool, RegistryError> {
        let ty = self.get(type_id)?;
        let test = ty
            .spawn_test
            .ok_or(RegistryError::MissingSpawnTest(type_id))?;
        Ok(test(ctx))
    }

    /// Rebuild an entity from persisted or replicated instance state.
    pub fn instantiate(&self, record: &EntityRecord) -> Result<Entity, RegistryError> {
        let ty = self.get(record.type_id)?;
        let mut entity = Entity::new(
            record.id,
            record.type_id,
            ty.defaults.clone(),
            ty.is_static,
            ty.collision,
        );
        entity.apply_record(record)?;
        Ok(entity)
    }
}
