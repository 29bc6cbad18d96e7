use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use worldcache_common::{ChunkKey, EntityId, ObserverId};
use worldcache_kernel::{
    Behaviour, BehaviourId, CacheConfig, Chunk, ChunkMesh, Entity, EntityType, EntityTypeId,
    EntityTypeRegistry, Light, WorldCache,
};
use worldcache_persist::{ChunkGenerator, RegionStore, StoreProvider};
use worldcache_property::{Color, PropertyError, PropertyId, PropertyTemplate, PropertyValue};
use worldcache_replicate::{LoopbackTransport, ReplicationConfig, Replicator};
use worldcache_stream::{AreaConfig, ObservableArea};

#[derive(Parser)]
#[command(name = "worldcache-cli", about = "Headless driver for the world cache")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON file with cache, area and replication settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate info and effective settings
    Info,
    /// Spawn entities and run the cache, replication and an observable area
    Simulate {
        /// Number of ticks to run
        #[arg(short, long, default_value = "10")]
        ticks: u64,
        /// Number of entities to spawn
        #[arg(short, long, default_value = "20")]
        entities: u32,
        /// Seed for spawn positions and velocities
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// Store directory; a temporary one is used when omitted
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Print store metadata and verify its integrity manifest
    Inspect {
        #[arg(long)]
        store: PathBuf,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Settings {
    cache: CacheConfig,
    area: AreaConfig,
    replication: ReplicationConfig,
}

impl Settings {
    fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening config {}", path.display()))?;
        let settings: Self = serde_json::from_reader(file)
            .with_context(|| format!("parsing config {}", path.display()))?;
        settings
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.cache.validate()?;
        self.area.validate()?;
        Ok(())
    }
}

const MOB: EntityTypeId = EntityTypeId(1);
const HEALTH: PropertyId = PropertyId(10);
const DRIFT: BehaviourId = BehaviourId(1);

/// Movement stub: integrate the movement vector.
#[derive(Debug)]
struct Drift;

impl Behaviour for Drift {
    fn id(&self) -> BehaviourId {
        DRIFT
    }

    fn update(&self, entity: &mut Entity, dt: f32) -> Result<(), PropertyError> {
        let next = entity.position() + entity.movement() * dt;
        entity.set_position(next).map(|_| ())
    }
}

/// Flat ground with one light per chunk.
struct FlatGround {
    chunk_size: f32,
}

impl ChunkGenerator for FlatGround {
    fn generate_chunk(&self, key: ChunkKey) -> Chunk {
        let bounds = key.bounds(self.chunk_size);
        Chunk::new(key).with_mesh(ChunkMesh::quad(bounds)).with_light(Light {
            id: 0,
            position: bounds.center(),
            color: Color::WHITE,
            radius: self.chunk_size * 0.5,
            intensity: 1.0,
        })
    }
}

fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Deterministic value in `[-1, 1)`.
fn unit(state: &mut u64) -> f32 {
    *state = splitmix64(*state);
    (*state >> 40) as f32 / (1u64 << 23) as f32 - 1.0
}

fn registry() -> anyhow::Result<EntityTypeRegistry> {
    let mut registry = EntityTypeRegistry::new();
    registry.register(
        EntityType::new(MOB, "mob")
            .defaults(PropertyTemplate::new().declare(HEALTH, PropertyValue::Int(10))),
    )?;
    Ok(registry)
}

fn simulate(settings: Settings, ticks: u64, count: u32, seed: u64, store: Option<PathBuf>) -> anyhow::Result<()> {
    let (root, _tmp) = match store {
        Some(path) => (path, None),
        None => {
            let dir = tempfile::tempdir()?;
            (dir.path().to_path_buf(), Some(dir))
        }
    };
    let chunk_size = settings.cache.chunk_size;
    let registry = Arc::new(registry()?);
    let store = Arc::new(RegionStore::open(&root, chunk_size)?);
    let provider = Arc::new(
        StoreProvider::new(store.clone(), registry.clone())
            .with_generator(Arc::new(FlatGround { chunk_size })),
    );
    let cache = Arc::new(WorldCache::new(settings.cache.clone(), provider.clone(), store.clone()));
    let transport = Arc::new(LoopbackTransport::new());
    let mut replicator = Replicator::new(cache.clone(), transport.clone(), settings.replication);
    let observer = ObserverId::new();
    replicator.connect(observer);
    replicator.mark_joined(observer)?;
    let mut area = ObservableArea::new(cache.clone(), settings.area)?;

    println!("Simulate: seed={seed}, entities={count}, ticks={ticks}, store={}", root.display());

    let mut rng = seed;
    let spread = chunk_size * 2.0;
    let mut mobs = Vec::with_capacity(count as usize);
    for i in 1..=count {
        let position = Vec2::new(unit(&mut rng), unit(&mut rng)) * spread;
        let mut mob = registry.create(MOB, EntityId(i), position)?;
        mob.set_movement(Vec2::new(unit(&mut rng), unit(&mut rng)) * 4.0)?;
        mob.add_behaviour(Arc::new(Drift));
        mobs.push(mob);
    }
    cache.add_entities(mobs)?;

    let dt = 0.25;
    for _ in 0..ticks {
        let frame = cache.advance_frame();
        provider.deliver(&cache)?;

        for i in 1..=count {
            if let Some(mut mob) = cache.entity(EntityId(i)) {
                mob.run_behaviours(dt)?;
                if mob.is_dirty() {
                    cache.merge_entity(mob);
                }
            }
        }

        let events = cache.process_loaded_data();
        let report = replicator.handle_events(&events)?;
        transport.take(observer);

        let camera = cache.entity(EntityId(1)).map_or(Vec2::ZERO, |e| e.position());
        area.update(camera);
        area.refresh_on(&events);
        let swapped = area.swap_buffers();
        let window = area.active();
        println!(
            "frame {frame:>4}: events={} messages={} packets={} chunks={} window_entities={} window_chunks={} lights={} swapped={}",
            events.len(),
            report.messages,
            report.packets,
            cache.chunk_count(),
            window.entities.len(),
            window.chunks.len(),
            window.lights.len(),
            swapped.is_some(),
        );
    }

    area.dispose();
    let stats = area.stats();
    println!(
        "Area: generation={}, passes={}, avg={:?}, min={:?}, max={:?}",
        area.generation(),
        stats.passes,
        stats.average,
        stats.min,
        stats.max
    );
    let meta = store.meta();
    println!("Store: regions={}, revision={}", meta.region_count, meta.revision);
    Ok(())
}

fn inspect(settings: &Settings, path: &Path) -> anyhow::Result<()> {
    let store = RegionStore::open(path, settings.cache.chunk_size)
        .with_context(|| format!("opening store {}", path.display()))?;
    let meta = store.meta();
    println!("Store: {}", path.display());
    println!("  schema: v{}", meta.schema_version);
    println!("  chunk size: {}", meta.chunk_size);
    println!("  regions: {}", meta.region_count);
    println!("  revision: {}", meta.revision);
    for key in store.quarantined() {
        println!("  {key}: unreadable, moved aside");
    }
    for key in store.stored_keys() {
        if let Some(record) = store.load_region(key)? {
            println!(
                "  {key}: chunk={} triggers={} entities={}",
                record.chunk.is_some(),
                record.triggers.len(),
                record.entities.len()
            );
        }
    }
    let checked = store.verify_integrity()?;
    println!("Integrity: OK ({checked} files)");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("worldcache-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", worldcache_common::crate_info());
            println!("property: {}", worldcache_property::crate_info());
            println!("spatial: {}", worldcache_spatial::crate_info());
            println!("kernel: {}", worldcache_kernel::crate_info());
            println!("stream: {}", worldcache_stream::crate_info());
            println!("replicate: {}", worldcache_replicate::crate_info());
            println!("persist: {}", worldcache_persist::crate_info());
            println!("settings: {}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::Simulate {
            ticks,
            entities,
            seed,
            store,
        } => simulate(settings, ticks, entities, seed, store)?,
        Commands::Inspect { store } => inspect(&settings, &store)?,
    }

    Ok(())
}
