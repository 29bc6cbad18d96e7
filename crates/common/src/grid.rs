use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Integer coordinate of a chunk in the unbounded world grid.
///
/// `top` is +y, `right` is +x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub x: i32,
    pub y: i32,
}

impl ChunkKey {
    pub const ORIGIN: ChunkKey = ChunkKey { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Chunk containing a world position.
    pub fn from_position(pos: Vec2, chunk_size: f32) -> Self {
        Self {
            x: (pos.x / chunk_size).floor() as i32,
            y: (pos.y / chunk_size).floor() as i32,
        }
    }

    pub fn left(self) -> Self {
        Self::new(self.x - 1, self.y)
    }

    pub fn right(self) -> Self {
        Self::new(self.x + 1, self.y)
    }

    pub fn top(self) -> Self {
        Self::new(self.x, self.y + 1)
    }

    pub fn bottom(self) -> Self {
        Self::new(self.x, self.y - 1)
    }

    /// The eight surrounding keys, row by row from the bottom-left.
    pub fn neighbours(self) -> [ChunkKey; 8] {
        [
            Self::new(self.x - 1, self.y - 1),
            Self::new(self.x, self.y - 1),
            Self::new(self.x + 1, self.y - 1),
            Self::new(self.x - 1, self.y),
            Self::new(self.x + 1, self.y),
            Self::new(self.x - 1, self.y + 1),
            Self::new(self.x, self.y + 1),
            Self::new(self.x + 1, self.y + 1),
        ]
    }

    /// World-space rectangle covered by this chunk.
    pub fn bounds(self, chunk_size: f32) -> Rect {
        let min = Vec2::new(self.x as f32 * chunk_size, self.y as f32 * chunk_size);
        Rect::new(min, min + Vec2::splat(chunk_size))
    }

    /// All keys of a `size`×`size` window centred on `center`, row-major from
    /// the bottom-left. An even `size` is rounded up to the next odd size.
    pub fn window(center: ChunkKey, size: u32) -> Vec<ChunkKey> {
        let radius = (size / 2) as i32;
        let mut keys = Vec::with_capacity(((radius * 2 + 1) * (radius * 2 + 1)) as usize);
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                keys.push(Self::new(center.x + dx, center.y + dy));
            }
        }
        keys
    }

    /// Chebyshev distance in chunks.
    pub fn distance(self, other: ChunkKey) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }
}

impl Hash for ChunkKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Pack both halves into one word so (a, b) and (b, a) never collide.
        let packed = ((self.x as u32 as u64) << 32) | (self.y as u32 as u64);
        state.write_u64(packed);
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Identity of a trigger: a per-chunk id scoped to its chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    pub chunk: ChunkKey,
    pub id: i16,
}

impl TriggerKey {
    pub fn new(chunk: ChunkKey, id: i16) -> Self {
        Self { chunk, id }
    }
}

/// Axis-aligned rectangle with inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn from_center(center: Vec2, half_extents: Vec2) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Containment test tolerant to rounding at the edges.
    pub fn contains_approx(&self, p: Vec2, margin: f32) -> bool {
        p.x >= self.min.x - margin
            && p.x <= self.max.x + margin
            && p.y >= self.min.y - margin
            && p.y <= self.max.y + margin
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn intersects_circle(&self, center: Vec2, radius: f32) -> bool {
        let nearest = center.clamp(self.min, self.max);
        nearest.distance_squared(center) <= radius * radius
    }

    /// The four equal quadrants in partition order: bottom-left, top-left,
    /// bottom-right, top-right.
    pub fn quadrants(&self) -> [Rect; 4] {
        let mid = self.center();
        [
            Rect::new(self.min, mid),
            Rect::new(Vec2::new(self.min.x, mid.y), Vec2::new(mid.x, self.max.y)),
            Rect::new(Vec2::new(mid.x, self.min.y), Vec2::new(self.max.x, mid.y)),
            Rect::new(mid, self.max),
        ]
    }

    /// Index into [`Rect::quadrants`] of the first quadrant containing `p`.
    ///
    /// Points on a shared edge go to the earlier quadrant.
    pub fn quadrant_of(&self, p: Vec2) -> usize {
        let mid = self.center();
        let right = p.x > mid.x;
        let top = p.y > mid.y;
        match (right, top) {
            (false, false) => 0,
            (false, true) => 1,
            (true, false) => 2,
            (true, true) => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    fn hash_of(key: ChunkKey) -> u64 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish()
    }

    #[test]
    fn from_position_floors_negative() {
        assert_eq!(ChunkKey::from_position(Vec2::new(10.0, 10.0), 16.0), ChunkKey::new(0, 0));
        assert_eq!(ChunkKey::from_position(Vec2::new(20.0, -5.0), 16.0), ChunkKey::new(1, -1));
    }

    #[test]
    fn hash_distinguishes_swapped_coordinates() {
        assert_ne!(hash_of(ChunkKey::new(2, 3)), hash_of(ChunkKey::new(3, 2)));
        assert_ne!(hash_of(ChunkKey::new(-1, 0)), hash_of(ChunkKey::new(0, -1)));
    }

    #[test]
    fn neighbour_operators() {
        let k = ChunkKey::new(4, -2);
        assert_eq!(k.left(), ChunkKey::new(3, -2));
        assert_eq!(k.right(), ChunkKey::new(5, -2));
        assert_eq!(k.top(), ChunkKey::new(4, -1));
        assert_eq!(k.bottom(), ChunkKey::new(4, -3));

        let all: HashSet<ChunkKey> = k.neighbours().into_iter().collect();
        assert_eq!(all.len(), 8);
        assert!(!all.contains(&k));
        assert!(all.iter().all(|n| n.distance(k) == 1));
    }

    #[test]
    fn window_is_square_and_centred() {
        let keys = ChunkKey::window(ChunkKey::new(10, 10), 5);
        assert_eq!(keys.len(), 25);
        assert_eq!(keys[12], ChunkKey::new(10, 10));
        assert!(keys.iter().all(|k| k.distance(ChunkKey::new(10, 10)) <= 2));
    }

    #[test]
    fn bounds_contain_own_positions() {
        let key = ChunkKey::new(-3, 2);
        let b = key.bounds(32.0);
        assert!(b.contains(Vec2::new(-96.0, 64.0)));
        assert!(b.contains(Vec2::new(-64.5, 95.0)));
        assert!(!b.contains(Vec2::new(-97.0, 70.0)));
    }

    #[test]
    fn quadrant_of_matches_first_containing_quadrant() {
        let r = Rect::new(Vec2::ZERO, Vec2::splat(100.0));
        let quads = r.quadrants();
        let samples = [
            Vec2::new(10.0, 10.0),
            Vec2::new(10.0, 90.0),
            Vec2::new(90.0, 10.0),
            Vec2::new(90.0, 90.0),
            Vec2::new(50.0, 50.0),
            Vec2::new(50.0, 80.0),
            Vec2::new(80.0, 50.0),
        ];
        for p in samples {
            let first = quads.iter().position(|q| q.contains(p)).unwrap();
            assert_eq!(r.quadrant_of(p), first, "point {p:?}");
        }
    }

    #[test]
    fn circle_intersection() {
        let r = Rect::new(Vec2::ZERO, Vec2::splat(10.0));
        assert!(r.intersects_circle(Vec2::new(12.0, 5.0), 2.5));
        assert!(!r.intersects_circle(Vec2::new(15.0, 15.0), 3.0));
    }
}
