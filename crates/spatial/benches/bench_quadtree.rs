use std::hint::black_box;
use std::time::Instant;

use glam::Vec2;
use worldcache_common::{ChunkKey, EntityId};
use worldcache_spatial::{EntityFilter, PartitionedTree, QuadTreeConfig, SpatialItem};

#[derive(Debug, Clone)]
struct Marker {
    id: EntityId,
    pos: Vec2,
    fixed: bool,
}

impl SpatialItem for Marker {
    fn id(&self) -> EntityId {
        self.id
    }

    fn position(&self) -> Vec2 {
        self.pos
    }

    fn is_static(&self) -> bool {
        self.fixed
    }
}

fn make_markers(count: usize, spacing: f32) -> Vec<Marker> {
    let side = (count as f32).sqrt().ceil() as usize;
    (0..count)
        .map(|i| Marker {
            id: EntityId(i as u32),
            pos: Vec2::new((i % side) as f32 * spacing, (i / side) as f32 * spacing),
            fixed: i % 4 == 0,
        })
        .collect()
}

fn filled(markers: &[Marker]) -> PartitionedTree<Marker> {
    let mut tree = PartitionedTree::new(32.0, QuadTreeConfig::default());
    for m in markers {
        tree.insert(m.clone()).expect("unique ids");
    }
    tree
}

fn bench_insert(count: usize, iterations: usize) {
    let markers = make_markers(count, 2.0);
    let start = Instant::now();
    for _ in 0..iterations {
        black_box(filled(black_box(&markers)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  insert ({count} items, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn bench_query_area(count: usize, radius: f32, iterations: usize) {
    let tree = filled(&make_markers(count, 2.0));
    let keys = ChunkKey::window(ChunkKey::new(1, 1), 3);
    let center = Vec2::new(48.0, 48.0);
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(tree.query_area(
            black_box(&keys),
            black_box(center),
            black_box(radius),
            EntityFilter::All,
        ));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  area query ({count} items, r={radius}, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_update(count: usize, iterations: usize) {
    let mut tree = filled(&make_markers(count, 2.0));
    let start = Instant::now();
    for step in 0..iterations {
        let id = EntityId((step % count) as u32 | 1);
        let dx = if step % 2 == 0 { 3.0 } else { -3.0 };
        let _ = black_box(tree.update(id, |m| m.pos.x = (m.pos.x + dx).max(0.0)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  update ({count} items, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn main() {
    println!("=== Quad-tree Benchmarks ===\n");

    println!("Insert:");
    bench_insert(100, 1000);
    bench_insert(1000, 100);
    bench_insert(10000, 10);

    println!("\nArea query:");
    bench_query_area(1000, 8.0, 10000);
    bench_query_area(10000, 16.0, 1000);
    bench_query_area(10000, 48.0, 1000);

    println!("\nUpdate (in-place or re-file):");
    bench_update(1000, 100000);
    bench_update(10000, 100000);

    println!("\n=== Done ===");
}
