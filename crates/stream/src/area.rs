use glam::Vec2;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use worldcache_common::ChunkKey;
use worldcache_kernel::{AreaId, CacheEvent, WorldCache};

use crate::config::AreaConfig;
use crate::error::AreaError;
use crate::timer::{AreaStats, PassTimer};
use crate::window::{default_pipeline, AreaWindow, StepContext, WindowStep};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct AreaState {
    work: u32,
    swap_pending: bool,
    shutdown: bool,
    center: Option<ChunkKey>,
}

/// State shared between the owner and the worker thread.
#[derive(Debug)]
struct Shared {
    state: Mutex<AreaState>,
    wake: Condvar,
    /// Set by the worker once `pending` holds a complete window.
    ready: AtomicBool,
    pending: Mutex<Option<Arc<AreaWindow>>>,
    active: RwLock<Arc<AreaWindow>>,
    timer: Mutex<PassTimer>,
}

impl Shared {
    fn shutting_down(&self) -> bool {
        lock(&self.state).shutdown
    }
}

/// A camera-centred window of chunks, entities and lights, recomputed on a
/// dedicated worker thread.
///
/// The worker builds each new window privately and publishes it as an
/// immutable snapshot; [`ObservableArea::swap_buffers`] makes it active.
/// Readers always get a complete window, at worst one generation old.
pub struct ObservableArea {
    id: AreaId,
    cache: Arc<WorldCache>,
    config: AreaConfig,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    requested_center: Option<ChunkKey>,
}

impl fmt::Debug for ObservableArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableArea")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("generation", &self.generation())
            .field("disposed", &self.worker.is_none())
            .finish_non_exhaustive()
    }
}

impl ObservableArea {
    pub fn new(cache: Arc<WorldCache>, config: AreaConfig) -> Result<Self, AreaError> {
        Self::with_pipeline(cache, config, default_pipeline())
    }

    /// Start an area running `steps` in order on every compute pass.
    pub fn with_pipeline(
        cache: Arc<WorldCache>,
        config: AreaConfig,
        steps: Vec<Box<dyn WindowStep>>,
    ) -> Result<Self, AreaError> {
        config.validate()?;
        let id = cache.register_area();
        let shared = Arc::new(Shared {
            state: Mutex::default(),
            wake: Condvar::new(),
            ready: AtomicBool::new(false),
            pending: Mutex::new(None),
            active: RwLock::new(Arc::new(AreaWindow::default())),
            timer: Mutex::new(PassTimer::new(config.timing_history)),
        });
        let worker = {
            let shared = shared.clone();
            let cache = cache.clone();
            let window_size = config.window_size;
            thread::Builder::new()
                .name(format!("observable-area-{}", id.0))
                .spawn(move || run_worker(&shared, &cache, id, window_size, &steps))?
        };
        debug!(area = id.0, "observable area started");
        Ok(Self {
            id,
            cache,
            config,
            shared,
            worker: Some(worker),
            requested_center: None,
        })
    }

    pub fn id(&self) -> AreaId {
        self.id
    }

    pub fn config(&self) -> &AreaConfig {
        &self.config
    }

    /// Queue a recompute. Calls made before the worker picks the work up
    /// coalesce into one pass.
    pub fn force_update(&self) {
        lock(&self.shared.state).work += 1;
        self.shared.wake.notify_all();
    }

    /// Follow the camera. Queues a recompute only when the camera has moved
    /// into another chunk; returns whether it did.
    pub fn update(&mut self, camera: Vec2) -> bool {
        let center = ChunkKey::from_position(camera, self.cache.chunk_size());
        if self.requested_center == Some(center) {
            return false;
        }
        self.requested_center = Some(center);
        {
            let mut state = lock(&self.shared.state);
            state.center = Some(center);
            state.work += 1;
        }
        self.shared.wake.notify_all();
        trace!(area = self.id.0, %center, "window recentre queued");
        true
    }

    /// Queue a recompute when a drain brought chunks, triggers or entities
    /// for keys the window reads, including the ring of neighbours. Returns
    /// whether it did.
    pub fn refresh_on(&self, events: &[CacheEvent]) -> bool {
        let Some(center) = self.requested_center else {
            return false;
        };
        let reach = self.config.window_size / 2 + 1;
        let chunk_size = self.cache.chunk_size();
        let touches = |key: ChunkKey| key.distance(center) <= reach;
        let hit = events.iter().any(|event| match event {
            CacheEvent::ChunksLoaded(chunks) | CacheEvent::ChunksUpdated(chunks) => {
                chunks.iter().any(|c| touches(c.key))
            }
            CacheEvent::TriggersLoaded { chunks, .. } => chunks.iter().any(|k| touches(*k)),
            CacheEvent::EntitiesLoaded(entities) => entities
                .iter()
                .any(|e| touches(ChunkKey::from_position(e.position(), chunk_size))),
            _ => false,
        });
        if hit {
            trace!(area = self.id.0, "loaded data inside window, recompute queued");
            self.force_update();
        }
        hit
    }

    /// True when a computed window is waiting for [`Self::swap_buffers`].
    pub fn is_swap_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Make the latest computed window active. Returns it when a swap
    /// happened, `None` when nothing new was ready. Main thread only.
    pub fn swap_buffers(&self) -> Option<Arc<AreaWindow>> {
        if !self.shared.ready.load(Ordering::Acquire) {
            return None;
        }
        let next = lock(&self.shared.pending).take()?;
        *self
            .shared
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next.clone();
        self.shared.ready.store(false, Ordering::Release);
        lock(&self.shared.state).swap_pending = false;
        self.shared.wake.notify_all();
        debug!(area = self.id.0, generation = next.generation, "observable area updated");
        Some(next)
    }

    /// The active window.
    pub fn active(&self) -> Arc<AreaWindow> {
        self.shared
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Generation of the active window; zero before the first swap.
    pub fn generation(&self) -> u64 {
        self.active().generation
    }

    pub fn stats(&self) -> AreaStats {
        AreaStats::from(&*lock(&self.shared.timer))
    }

    pub fn is_disposed(&self) -> bool {
        self.worker.is_none()
    }

    /// Stop the worker. A pass in flight is abandoned at its next step
    /// boundary. Waits at most `dispose_timeout_ms`, then detaches the thread.
    pub fn dispose(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        lock(&self.shared.state).shutdown = true;
        self.shared.wake.notify_all();

        let deadline = Instant::now() + Duration::from_millis(self.config.dispose_timeout_ms);
        while !worker.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        if worker.is_finished() {
            if worker.join().is_err() {
                warn!(area = self.id.0, "observable area worker panicked");
            }
        } else {
            warn!(area = self.id.0, "observable area worker did not stop in time, detaching");
        }
        self.cache.release(self.id);
        debug!(area = self.id.0, "observable area disposed");
    }
}

impl Drop for ObservableArea {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn run_worker(
    shared: &Shared,
    cache: &WorldCache,
    area: AreaId,
    window_size: u32,
    steps: &[Box<dyn WindowStep>],
) {
    let mut latest = Arc::new(AreaWindow::default());
    let mut generation = 0u64;
    loop {
        let center = {
            let mut state = lock(&shared.state);
            loop {
                if state.shutdown {
                    return;
                }
                if state.work > 0 && !state.swap_pending {
                    break;
                }
                state = shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            state.work = 0;
            state.center
        };
        let Some(center) = center else {
            trace!(area = area.0, "no center yet, skipping pass");
            continue;
        };

        let _span = tracing::info_span!("area_pass", area = area.0, %center).entered();
        let started = Instant::now();
        let mut back = (*latest).clone();
        let ctx = StepContext {
            cache,
            area,
            center,
            window_size,
        };
        for step in steps {
            if shared.shutting_down() {
                debug!(area = area.0, step = step.name(), "pass cancelled");
                return;
            }
            step.apply(&mut back, &ctx);
        }

        generation += 1;
        back.generation = generation;
        let elapsed = started.elapsed();
        lock(&shared.timer).record(elapsed);
        trace!(
            generation,
            keys = back.keys.len(),
            chunks = back.chunks.len(),
            entities = back.entities.len(),
            ?elapsed,
            "area pass complete"
        );

        latest = Arc::new(back);
        *lock(&shared.pending) = Some(latest.clone());
        lock(&shared.state).swap_pending = true;
        shared.ready.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{BuildCollision, FetchMeshes, Recentre};
    use worldcache_kernel::{
        CacheConfig, Chunk, ChunkMesh, EntityType, EntityTypeId, EntityTypeRegistry, Light,
        NullSaver, RequestQueue,
    };
    use worldcache_common::EntityId;
    use worldcache_property::Color;

    fn cache() -> Arc<WorldCache> {
        Arc::new(WorldCache::new(
            CacheConfig::default(),
            Arc::new(RequestQueue::new()),
            Arc::new(NullSaver),
        ))
    }

    /// Load every chunk within `radius` of the origin, one light in the origin.
    fn preload(cache: &WorldCache, radius: i32) {
        let mut chunks = Vec::new();
        for y in -radius..=radius {
            for x in -radius..=radius {
                let key = ChunkKey::new(x, y);
                let mut chunk = Chunk::new(key).with_mesh(ChunkMesh::quad(key.bounds(32.0)));
                if key == ChunkKey::ORIGIN {
                    chunk = chunk.with_light(Light {
                        id: 1,
                        position: Vec2::new(16.0, 16.0),
                        color: Color::WHITE,
                        radius: 8.0,
                        intensity: 1.0,
                    });
                }
                chunks.push(chunk);
            }
        }
        cache.chunks_loaded(chunks);
        cache.process_loaded_data();
    }

    fn wait_for_swap(area: &ObservableArea) -> Arc<AreaWindow> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(window) = area.swap_buffers() {
                return window;
            }
            assert!(Instant::now() < deadline, "area never became ready");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn wait_until_ready(area: &ObservableArea) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !area.is_swap_ready() {
            assert!(Instant::now() < deadline, "area never became ready");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[derive(Debug)]
    struct Slow(Duration);

    impl WindowStep for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn apply(&self, _window: &mut AreaWindow, _ctx: &StepContext<'_>) {
            thread::sleep(self.0);
        }
    }

    #[test]
    fn even_window_is_rejected() {
        let config = AreaConfig {
            window_size: 4,
            ..AreaConfig::default()
        };
        assert!(matches!(
            ObservableArea::new(cache(), config),
            Err(AreaError::EvenWindow(4))
        ));
    }

    #[test]
    fn oversized_window_is_rejected() {
        let config = AreaConfig {
            window_size: 1001,
            ..AreaConfig::default()
        };
        assert!(matches!(
            ObservableArea::new(cache(), config),
            Err(AreaError::WindowTooLarge { size: 1001, .. })
        ));
    }

    #[test]
    fn recentres_only_when_chunk_changes() {
        let mut area = ObservableArea::new(cache(), AreaConfig::default()).unwrap();
        assert!(area.update(Vec2::new(1.0, 1.0)));
        assert!(!area.update(Vec2::new(20.0, 30.0)));
        assert!(area.update(Vec2::new(40.0, 1.0)));
    }

    #[test]
    fn nothing_to_swap_before_first_pass() {
        let area = ObservableArea::new(cache(), AreaConfig::default()).unwrap();
        assert!(area.swap_buffers().is_none());
        assert_eq!(area.generation(), 0);
        assert!(area.active().keys.is_empty());
    }

    #[test]
    fn swap_publishes_complete_window() {
        let cache = cache();
        preload(&cache, 3);
        let mut registry = EntityTypeRegistry::new();
        registry
            .register(EntityType::new(EntityTypeId(1), "pillar").static_body(Vec2::splat(1.0)))
            .unwrap();
        let pillar = registry
            .create(EntityTypeId(1), EntityId(1), Vec2::new(5.0, 5.0))
            .unwrap();
        cache.add_entities(vec![pillar]).unwrap();

        let mut area = ObservableArea::new(cache.clone(), AreaConfig::default()).unwrap();
        area.update(Vec2::new(10.0, 10.0));
        let window = wait_for_swap(&area);

        assert_eq!(window.generation, 1);
        assert_eq!(window.center, Some(ChunkKey::ORIGIN));
        assert_eq!(window.keys.len(), 25);
        assert_eq!(window.extended.len(), 49);
        assert!(window.is_complete());
        assert_eq!(window.lights.len(), 1);
        assert_eq!(window.entities.len(), 1);
        assert_eq!(window.collision.triangles.len(), 49 * 2);
        assert_eq!(window.collision.boxes.len(), 1);
        assert_eq!(area.generation(), 1);
        assert_eq!(area.stats().passes, 1);

        cache.process_loaded_data();
        assert_eq!(cache.all_observed_entities().len(), 1);
    }

    #[test]
    fn delivered_chunk_reaches_window_without_camera_move() {
        let cache = cache();
        let mut area = ObservableArea::new(cache.clone(), AreaConfig::default()).unwrap();
        area.update(Vec2::new(10.0, 10.0));
        let first = wait_for_swap(&area);
        assert!(first.chunks.is_empty());

        let far = ChunkKey::new(40, 40);
        cache.chunks_loaded(vec![Chunk::new(far)]);
        assert!(!area.refresh_on(&cache.process_loaded_data()));

        cache.chunks_loaded(vec![Chunk::new(ChunkKey::ORIGIN).with_mesh(ChunkMesh::quad(
            ChunkKey::ORIGIN.bounds(32.0),
        ))]);
        let events = cache.process_loaded_data();
        assert!(!area.update(Vec2::new(12.0, 12.0)));
        assert!(area.refresh_on(&events));

        let window = wait_for_swap(&area);
        assert_eq!(window.generation, 2);
        assert!(window.chunks.iter().any(|c| c.key == ChunkKey::ORIGIN));
        assert!(window.chunks.iter().all(|c| c.key != far));
    }

    #[test]
    fn worker_waits_for_swap_and_coalesces_work() {
        let mut area = ObservableArea::new(cache(), AreaConfig::default()).unwrap();
        area.update(Vec2::ZERO);
        wait_until_ready(&area);

        area.force_update();
        area.force_update();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(area.stats().passes, 1);

        assert!(area.swap_buffers().is_some());
        wait_until_ready(&area);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(area.stats().passes, 2);
        assert_eq!(wait_for_swap(&area).generation, 2);
    }

    #[test]
    fn readers_never_see_partial_window() {
        let cache = cache();
        preload(&cache, 4);
        let steps: Vec<Box<dyn WindowStep>> = vec![
            Box::new(Recentre),
            Box::new(Slow(Duration::from_millis(1))),
            Box::new(FetchMeshes),
            Box::new(BuildCollision),
        ];
        let mut area = ObservableArea::with_pipeline(cache, AreaConfig::default(), steps).unwrap();
        let shared = area.shared.clone();
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                let stop = stop.clone();
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let window = shared.active.read().unwrap().clone();
                        if window.generation == 0 {
                            assert!(window.keys.is_empty());
                            continue;
                        }
                        assert_eq!(window.keys.len(), 25);
                        assert_eq!(window.extended.len(), 49);
                        assert_eq!(window.collision.triangles.len(), window.chunks.len() * 2);
                        let center = window.center.unwrap();
                        assert_eq!(window.keys[12], center);
                    }
                })
            })
            .collect();

        for step in 0..10 {
            area.update(Vec2::new((step % 2) as f32 * 32.0, 0.0));
            wait_for_swap(&area);
        }
        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn dispose_cancels_pass_in_flight() {
        let steps: Vec<Box<dyn WindowStep>> = vec![
            Box::new(Recentre),
            Box::new(Slow(Duration::from_millis(100))),
            Box::new(Slow(Duration::from_millis(100))),
        ];
        let cache = cache();
        let mut area = ObservableArea::with_pipeline(cache, AreaConfig::default(), steps).unwrap();
        area.update(Vec2::ZERO);
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        area.dispose();
        assert!(area.is_disposed());
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(area.swap_buffers().is_none());
        area.dispose();
    }
}
