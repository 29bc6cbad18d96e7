use std::collections::BTreeMap;
use std::sync::Arc;

use crate::property::{Property, PropertyError, PropertyId, PropertyValue};

/// Default properties shared by every instance of one entity/chunk type.
///
/// Built once at registration and then only read, behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct PropertyTemplate {
    defaults: BTreeMap<PropertyId, Property>,
}

impl PropertyTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a replicated default.
    pub fn declare(mut self, id: PropertyId, value: PropertyValue) -> Self {
        self.defaults.insert(id, Property::new(id, value));
        self
    }

    /// Declare a default that is never replicated.
    pub fn declare_local(mut self, id: PropertyId, value: PropertyValue) -> Self {
        let mut p = Property::new(id, value);
        p.set_dirtyable(false);
        self.defaults.insert(id, p);
        self
    }

    pub fn get(&self, id: PropertyId) -> Option<&Property> {
        self.defaults.get(&id)
    }

    pub fn contains(&self, id: PropertyId) -> bool {
        self.defaults.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.defaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defaults.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.defaults.values()
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// Properties of one instance: instance-owned cells layered over a shared
/// template of defaults.
///
/// The first effective write to a default clones it into the instance map;
/// from then on the instance copy is the only one touched for that id.
#[derive(Debug, Clone, Default)]
pub struct PropertySet {
    defaults: Arc<PropertyTemplate>,
    instance: BTreeMap<PropertyId, Property>,
}

impl PropertySet {
    pub fn new(defaults: Arc<PropertyTemplate>) -> Self {
        Self {
            defaults,
            instance: BTreeMap::new(),
        }
    }

    pub fn defaults(&self) -> &Arc<PropertyTemplate> {
        &self.defaults
    }

    /// Read a property.
    ///
    /// # Panics
    /// Panics if `id` is neither instance-owned nor declared in the template.
    /// All defaults must be declared when the type is registered.
    pub fn get(&self, id: PropertyId) -> &Property {
        match self.try_get(id) {
            Some(p) => p,
            None => panic!("missing property {id}: declare it in the type's default properties"),
        }
    }

    pub fn try_get(&self, id: PropertyId) -> Option<&Property> {
        self.instance.get(&id).or_else(|| self.defaults.get(id))
    }

    pub fn contains(&self, id: PropertyId) -> bool {
        self.try_get(id).is_some()
    }

    /// Whether `id` has been promoted to (or created as) an instance-owned cell.
    pub fn is_instance_owned(&self, id: PropertyId) -> bool {
        self.instance.contains_key(&id)
    }

    /// Write raw bytes. Returns `Ok(true)` when the value changed.
    pub fn write(&mut self, id: PropertyId, bytes: &[u8]) -> Result<bool, PropertyError> {
        if let Some(p) = self.instance.get_mut(&id) {
            return p.write_bytes(bytes);
        }
        let default = self.defaults.get(id).ok_or(PropertyError::Undeclared(id))?;
        if default.raw() == bytes {
            return Ok(false);
        }
        let mut promoted = default.clone();
        let changed = promoted.write_bytes(bytes)?;
        tracing::trace!(%id, "promoted default property");
        self.instance.insert(id, promoted);
        Ok(changed)
    }

    /// Write a typed value. Returns `Ok(true)` when the value changed.
    pub fn set(&mut self, id: PropertyId, value: PropertyValue) -> Result<bool, PropertyError> {
        if let Some(p) = self.instance.get_mut(&id) {
            return p.set(value);
        }
        let default = self.defaults.get(id).ok_or(PropertyError::Undeclared(id))?;
        let mut promoted = default.clone();
        let changed = promoted.set(value)?;
        if changed {
            tracing::trace!(%id, "promoted default property");
            self.instance.insert(id, promoted);
        }
        Ok(changed)
    }

    /// Insert an instance-owned property directly, replacing any previous one.
    pub fn insert(&mut self, property: Property) {
        self.instance.insert(property.id(), property);
    }

    /// Instance-owned properties, in id order.
    pub fn instance_properties(&self) -> impl Iterator<Item = &Property> {
        self.instance.values()
    }

    /// Ids of instance-owned properties with the dirty bit set.
    pub fn dirty_ids(&self) -> impl Iterator<Item = PropertyId> + '_ {
        self.instance
            .values()
            .filter(|p| p.is_dirty())
            .map(|p| p.id())
    }

    pub fn has_dirty(&self) -> bool {
        self.instance.values().any(|p| p.is_dirty())
    }

    pub fn clear_dirty(&mut self) {
        for p in self.instance.values_mut() {
            p.clear_dirty();
        }
    }

    pub fn clear_dirty_ids(&mut self, ids: &[PropertyId]) {
        for id in ids {
            if let Some(p) = self.instance.get_mut(id) {
                p.clear_dirty();
            }
        }
    }

    /// Copy every instance-owned value of `other` into `self` by value.
    ///
    /// Identity of `self` is kept; unchanged bytes stay clean. Returns the ids
    /// whose value actually changed.
    pub fn merge_from(&mut self, other: &PropertySet) -> Result<Vec<PropertyId>, PropertyError> {
        let mut changed = Vec::new();
        for p in other.instance.values() {
            let wrote = if self.contains(p.id()) {
                self.write(p.id(), p.raw())?
            } else {
                let mut fresh = p.clone();
                fresh.mark_dirty();
                self.instance.insert(p.id(), fresh);
                true
            };
            if wrote {
                changed.push(p.id());
            }
        }
        Ok(changed)
    }
}
