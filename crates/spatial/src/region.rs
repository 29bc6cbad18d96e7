use glam::Vec2;
use worldcache_common::{EntityId, Rect};

use crate::tree::QuadTreeConfig;
use crate::{SpatialError, SpatialItem};

/// Whether a region with `bounds` accepts an item at `p`, allowing for
/// float error on the edges.
pub(crate) fn admits(bounds: Rect, p: Vec2) -> bool {
    let margin = bounds.size().max_element() * 1e-5;
    bounds.contains_approx(p, margin)
}

/// A rectangle holding at most `max_items` items, or four equal children.
///
/// A leaf splits once it exceeds `max_items` while its depth is below
/// `max_depth`; at the depth cap it keeps growing instead.
#[derive(Debug, Clone)]
pub struct QuadTreeRegion<T> {
    bounds: Rect,
    depth: u32,
    items: Vec<T>,
    children: Option<Box<[QuadTreeRegion<T>; 4]>>,
}

impl<T: SpatialItem> QuadTreeRegion<T> {
    pub fn new(bounds: Rect) -> Self {
        Self::at_depth(bounds, 0)
    }

    fn at_depth(bounds: Rect, depth: u32) -> Self {
        Self {
            bounds,
            depth,
            items: Vec::new(),
            children: None,
        }
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_split(&self) -> bool {
        self.children.is_some()
    }

    pub fn children(&self) -> Option<&[QuadTreeRegion<T>; 4]> {
        self.children.as_deref()
    }

    /// Items held directly by this region (empty once split).
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// File `item` into the leaf containing its position.
    pub fn insert(&mut self, item: T, config: &QuadTreeConfig) -> Result<(), SpatialError> {
        let p = item.position();
        if !admits(self.bounds, p) {
            return Err(SpatialError::OutOfBounds {
                id: item.id(),
                x: p.x,
                y: p.y,
            });
        }
        self.insert_unchecked(item, config);
        Ok(())
    }

    fn insert_unchecked(&mut self, item: T, config: &QuadTreeConfig) {
        if let Some(children) = self.children.as_mut() {
            let q = self.bounds.quadrant_of(item.position());
            children[q].insert_unchecked(item, config);
            return;
        }
        self.items.push(item);
        if self.items.len() > config.max_items && self.depth < config.max_depth {
            self.split(config);
        }
    }

    fn split(&mut self, config: &QuadTreeConfig) {
        let bounds = self.bounds;
        let depth = self.depth + 1;
        let mut children = Box::new(bounds.quadrants().map(|b| Self::at_depth(b, depth)));
        for item in self.items.drain(..) {
            let q = bounds.quadrant_of(item.position());
            children[q].insert_unchecked(item, config);
        }
        tracing::trace!(depth, "quad-tree region split");
        self.children = Some(children);
    }

    /// Bounds of the leaf that a point at `p` descends into.
    pub fn leaf_bounds(&self, p: Vec2) -> Rect {
        let mut node = self;
        while let Some(children) = node.children.as_deref() {
            node = &children[node.bounds.quadrant_of(p)];
        }
        node.bounds
    }

    /// Child-index path to the leaf holding `id`, trying the descent for
    /// `hint` first and falling back to a full search.
    fn path_to(&self, id: EntityId, hint: Vec2) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut node = self;
        while let Some(children) = node.children.as_deref() {
            let q = node.bounds.quadrant_of(hint);
            path.push(q);
            node = &children[q];
        }
        if node.items.iter().any(|i| i.id() == id) {
            return Some(path);
        }
        let mut path = Vec::new();
        self.search(id, &mut path).then_some(path)
    }

    fn search(&self, id: EntityId, path: &mut Vec<usize>) -> bool {
        match self.children.as_deref() {
            None => self.items.iter().any(|i| i.id() == id),
            Some(children) => {
                for (q, child) in children.iter().enumerate() {
                    path.push(q);
                    if child.search(id, path) {
                        return true;
                    }
                    path.pop();
                }
                false
            }
        }
    }

    fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut Self> {
        match path.split_first() {
            None => Some(self),
            Some((&q, rest)) => self.children.as_deref_mut()?[q].node_at_mut(rest),
        }
    }

    fn node_at(&self, path: &[usize]) -> Option<&Self> {
        match path.split_first() {
            None => Some(self),
            Some((&q, rest)) => self.children.as_deref()?[q].node_at(rest),
        }
    }

    /// Remove `id`, located via its last filed position.
    pub fn remove(&mut self, id: EntityId, hint: Vec2) -> Option<T> {
        let path = self.path_to(id, hint)?;
        let leaf = self.node_at_mut(&path)?;
        let idx = leaf.items.iter().position(|i| i.id() == id)?;
        Some(leaf.items.swap_remove(idx))
    }

    pub fn get(&self, id: EntityId, hint: Vec2) -> Option<&T> {
        let path = self.path_to(id, hint)?;
        self.node_at(&path)?.items.iter().find(|i| i.id() == id)
    }

    /// Mutable access to `id` together with the bounds of its leaf.
    pub(crate) fn get_mut(&mut self, id: EntityId, hint: Vec2) -> Option<(&mut T, Rect)> {
        let path = self.path_to(id, hint)?;
        let leaf = self.node_at_mut(&path)?;
        let bounds = leaf.bounds;
        leaf.items
            .iter_mut()
            .find(|i| i.id() == id)
            .map(|item| (item, bounds))
    }

    /// Every item in this region and its descendants.
    pub fn get_all_items(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.visit(&mut |item| out.push(item));
        out
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a T)) {
        self.items.iter().for_each(&mut *f);
        if let Some(children) = self.children.as_deref() {
            for child in children {
                child.visit(f);
            }
        }
    }

    /// Items within `radius` of `center`, pruning regions the circle misses.
    pub fn query_circle(&self, center: Vec2, radius: f32, out: &mut Vec<T>) {
        if !self.bounds.intersects_circle(center, radius) {
            return;
        }
        let r2 = radius * radius;
        out.extend(
            self.items
                .iter()
                .filter(|i| i.position().distance_squared(center) <= r2)
                .cloned(),
        );
        if let Some(children) = self.children.as_deref() {
            for child in children {
                child.query_circle(center, radius, out);
            }
        }
    }

    /// Consume the region, yielding all items.
    pub fn into_items(self) -> Vec<T> {
        let mut out = self.items;
        if let Some(children) = self.children {
            let [a, b, c, d] = *children;
            for child in [a, b, c, d] {
                out.extend(child.into_items());
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.items.len()
            + self
                .children
                .as_deref()
                .map_or(0, |c| c.iter().map(Self::len).sum())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn leaf_count(&self) -> usize {
        self.children
            .as_deref()
            .map_or(1, |c| c.iter().map(Self::leaf_count).sum())
    }

    /// Number of leaves holding `id`. Always 0 or 1 for a consistent tree.
    pub fn membership_count(&self, id: EntityId) -> usize {
        match self.children.as_deref() {
            None => self.items.iter().filter(|i| i.id() == id).count(),
            Some(children) => children.iter().map(|c| c.membership_count(id)).sum(),
        }
    }
}
