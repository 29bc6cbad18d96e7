//! File-backed region store.
//!
//! Layout inside the store directory:
//! ```text
//! store.meta.json            - schema version and chunk size
//! regions/
//!   <x>_<y>.region.cbor.zst  - CBOR+zstd record of one chunk: mesh, lights,
//!                              triggers and the entities filed under it
//! integrity/
//!   manifest.json            - sha256 of every region file
//! ```
//!
//! Every file is written to a `.tmp` sibling and renamed into place, and the
//! manifest is rewritten after each region. A region that still fails its
//! hash when the store opens (a crash between the two renames) is moved
//! aside as `<name>.corrupt` and dropped from the manifest.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};
use worldcache_common::{ChunkKey, EntityId};
use worldcache_kernel::{Chunk, Entity, EntityRecord, Trigger, WorldSaver};

/// Current on-disk schema version.
pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Errors from file-backed persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed for {file}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("store was written with chunk size {stored}, opened with {requested}")]
    ChunkSizeMismatch { stored: f32, requested: f32 },
}

/// Metadata stored in store.meta.json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub chunk_size: f32,
    pub region_count: u32,
    /// Total region writes since the store was created.
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub key: ChunkKey,
    pub sha256: String,
    pub revision: u64,
}

/// Hash of every region file, keyed by file name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: BTreeMap<String, ManifestEntry>,
}

/// Everything persisted for one chunk key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    pub key: ChunkKey,
    pub chunk: Option<Chunk>,
    pub triggers: Vec<Trigger>,
    pub entities: Vec<EntityRecord>,
}

impl RegionRecord {
    pub fn new(key: ChunkKey) -> Self {
        Self {
            key,
            chunk: None,
            triggers: Vec::new(),
            entities: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunk.is_none() && self.triggers.is_empty() && self.entities.is_empty()
    }

    fn upsert_entity(&mut self, record: EntityRecord) {
        match self.entities.iter_mut().find(|e| e.id == record.id) {
            Some(slot) => *slot = record,
            None => self.entities.push(record),
        }
    }

    fn remove_entity(&mut self, id: EntityId) -> bool {
        let before = self.entities.len();
        self.entities.retain(|e| e.id != id);
        self.entities.len() != before
    }

    fn upsert_trigger(&mut self, trigger: Trigger) {
        match self.triggers.iter_mut().find(|t| t.key == trigger.key) {
            Some(slot) => *slot = trigger,
            None => self.triggers.push(trigger),
        }
    }
}

#[derive(Debug)]
struct StoreState {
    meta: StoreMeta,
    manifest: IntegrityManifest,
    /// Region each stored entity is filed under.
    entity_regions: HashMap<EntityId, ChunkKey>,
    /// Regions set aside by `open` because they failed to read back.
    quarantined: Vec<ChunkKey>,
}

/// File-backed world store. Implements [`WorldSaver`]; writes that fail are
/// logged and dropped.
#[derive(Debug)]
pub struct RegionStore {
    root: PathBuf,
    chunk_size: f32,
    state: Mutex<StoreState>,
}

impl RegionStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>, chunk_size: f32) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("regions"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("store.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.schema_version != STORE_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.schema_version,
                    expected_version: STORE_SCHEMA_VERSION,
                });
            }
            if meta.chunk_size != chunk_size {
                return Err(StoreError::ChunkSizeMismatch {
                    stored: meta.chunk_size,
                    requested: chunk_size,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = StoreMeta {
                schema_version: STORE_SCHEMA_VERSION,
                chunk_size,
                region_count: 0,
                revision: 0,
            };
            let manifest = IntegrityManifest::default();
            write_json(&meta_path, &meta)?;
            write_json(&manifest_path, &manifest)?;
            (meta, manifest)
        };

        let mut state = StoreState {
            meta,
            manifest,
            entity_regions: HashMap::new(),
            quarantined: Vec::new(),
        };
        let keys: Vec<ChunkKey> = state.manifest.entries.values().map(|e| e.key).collect();
        for key in keys {
            match read_region(&root, &state.manifest, key) {
                Ok(Some(record)) => {
                    for entity in &record.entities {
                        state.entity_regions.insert(entity.id, key);
                    }
                }
                Ok(None) => {}
                Err(err) if is_damage(&err) => {
                    warn!(%key, %err, "region unreadable, moving it aside");
                    quarantine(&root, &mut state, key)?;
                }
                Err(err) => return Err(err),
            }
        }
        if !state.quarantined.is_empty() {
            state.meta.region_count = region_count(&state.manifest);
            write_json(&meta_path, &state.meta)?;
            write_json(&manifest_path, &state.manifest)?;
        }
        debug!(
            root = %root.display(),
            regions = state.meta.region_count,
            entities = state.entity_regions.len(),
            quarantined = state.quarantined.len(),
            "region store opened"
        );

        Ok(Self {
            root,
            chunk_size,
            state: Mutex::new(state),
        })
    }

    /// Regions moved aside when the store was opened.
    pub fn quarantined(&self) -> Vec<ChunkKey> {
        self.lock().quarantined.clone()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunk_size(&self) -> f32 {
        self.chunk_size
    }

    pub fn meta(&self) -> StoreMeta {
        self.lock().meta.clone()
    }

    /// Keys with a region file, in key order.
    pub fn stored_keys(&self) -> Vec<ChunkKey> {
        let mut keys: Vec<ChunkKey> = self.lock().manifest.entries.values().map(|e| e.key).collect();
        keys.sort_unstable();
        keys
    }

    /// Region the entity is currently filed under.
    pub fn entity_region(&self, id: EntityId) -> Option<ChunkKey> {
        self.lock().entity_regions.get(&id).copied()
    }

    /// Read one region, verifying its hash. `None` when it was never written.
    pub fn load_region(&self, key: ChunkKey) -> Result<Option<RegionRecord>, StoreError> {
        let state = self.lock();
        read_region(&self.root, &state.manifest, key)
    }

    pub fn write_chunks(&self, chunks: &[Arc<Chunk>]) -> Result<(), StoreError> {
        let mut state = self.lock();
        let mut touched = BTreeMap::new();
        for chunk in chunks {
            let record = self.region_mut(&state, &mut touched, chunk.key)?;
            record.chunk = Some((**chunk).clone());
        }
        self.flush(&mut state, touched)
    }

    pub fn write_triggers(&self, triggers: &[Arc<Trigger>]) -> Result<(), StoreError> {
        let mut state = self.lock();
        let mut touched = BTreeMap::new();
        for trigger in triggers {
            let record = self.region_mut(&state, &mut touched, trigger.key.chunk)?;
            record.upsert_trigger((**trigger).clone());
        }
        self.flush(&mut state, touched)
    }

    /// File each entity under its current chunk, moving it out of the region
    /// it was filed under before.
    pub fn write_entities(&self, entities: &[Entity]) -> Result<(), StoreError> {
        let mut state = self.lock();
        let mut touched = BTreeMap::new();
        for entity in entities.iter().filter(|e| !e.is_pending_destruction()) {
            let key = entity.chunk(self.chunk_size);
            if let Some(previous) = state.entity_regions.get(&entity.id()).copied() {
                if previous != key {
                    trace!(id = %entity.id(), from = %previous, to = %key, "entity changed region");
                    self.region_mut(&state, &mut touched, previous)?
                        .remove_entity(entity.id());
                }
            }
            self.region_mut(&state, &mut touched, key)?
                .upsert_entity(entity.to_record());
            state.entity_regions.insert(entity.id(), key);
        }
        self.flush(&mut state, touched)
    }

    /// Returns whether the entity was stored.
    pub fn remove_entity(&self, id: EntityId) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(key) = state.entity_regions.remove(&id) else {
            return Ok(false);
        };
        let mut touched = BTreeMap::new();
        let removed = self.region_mut(&state, &mut touched, key)?.remove_entity(id);
        self.flush(&mut state, touched)?;
        Ok(removed)
    }

    /// Verify every region file against the manifest. Returns the number of
    /// files checked.
    pub fn verify_integrity(&self) -> Result<usize, StoreError> {
        let state = self.lock();
        for (filename, entry) in &state.manifest.entries {
            let data = std::fs::read(self.root.join("regions").join(filename))?;
            let actual = sha256_hex(&data);
            if actual != entry.sha256 {
                return Err(StoreError::IntegrityMismatch {
                    file: filename.clone(),
                    expected: entry.sha256.clone(),
                    actual,
                });
            }
        }
        Ok(state.manifest.entries.len())
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Region being modified in this batch, read from disk on first touch.
    fn region_mut<'a>(
        &self,
        state: &StoreState,
        touched: &'a mut BTreeMap<ChunkKey, RegionRecord>,
        key: ChunkKey,
    ) -> Result<&'a mut RegionRecord, StoreError> {
        match touched.entry(key) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let record = read_region(&self.root, &state.manifest, key)?
                    .unwrap_or_else(|| RegionRecord::new(key));
                Ok(slot.insert(record))
            }
        }
    }

    fn flush(
        &self,
        state: &mut StoreState,
        touched: BTreeMap<ChunkKey, RegionRecord>,
    ) -> Result<(), StoreError> {
        if touched.is_empty() {
            return Ok(());
        }
        let manifest_path = self.root.join("integrity").join("manifest.json");
        for (key, record) in touched {
            let filename = region_filename(key);
            let compressed = zstd_compress(&cbor_serialize(&record)?)?;
            write_atomic(&self.root.join("regions").join(&filename), &compressed)?;
            state.meta.revision += 1;
            let revision = state.meta.revision;
            state.manifest.entries.insert(
                filename,
                ManifestEntry {
                    key,
                    sha256: sha256_hex(&compressed),
                    revision,
                },
            );
            write_json(&manifest_path, &state.manifest)?;
        }
        state.meta.region_count = region_count(&state.manifest);
        write_json(&self.root.join("store.meta.json"), &state.meta)
    }
}

impl WorldSaver for RegionStore {
    fn save_chunks(&self, chunks: &[Arc<Chunk>]) {
        if let Err(err) = self.write_chunks(chunks) {
            warn!(count = chunks.len(), %err, "failed to save chunks");
        }
    }

    fn save_entities(&self, entities: &[Entity]) {
        if let Err(err) = self.write_entities(entities) {
            warn!(count = entities.len(), %err, "failed to save entities");
        }
    }

    fn save_triggers(&self, triggers: &[Arc<Trigger>]) {
        if let Err(err) = self.write_triggers(triggers) {
            warn!(count = triggers.len(), %err, "failed to save triggers");
        }
    }

    fn delete_entity(&self, id: EntityId) {
        if let Err(err) = self.remove_entity(id) {
            warn!(%id, %err, "failed to delete stored entity");
        }
    }
}

pub fn region_filename(key: ChunkKey) -> String {
    format!("{}_{}.region.cbor.zst", key.x, key.y)
}

fn region_count(manifest: &IntegrityManifest) -> u32 {
    u32::try_from(manifest.entries.len()).unwrap_or(u32::MAX)
}

/// Errors that mean the region file itself is bad, as opposed to the store
/// being unreachable.
fn is_damage(err: &StoreError) -> bool {
    match err {
        StoreError::IntegrityMismatch { .. } | StoreError::CborDecode(_) => true,
        StoreError::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
        _ => false,
    }
}

fn quarantine(root: &Path, state: &mut StoreState, key: ChunkKey) -> Result<(), StoreError> {
    let filename = region_filename(key);
    let path = root.join("regions").join(&filename);
    if path.exists() {
        std::fs::rename(&path, root.join("regions").join(format!("{filename}.corrupt")))?;
    }
    state.manifest.entries.remove(&filename);
    state.quarantined.push(key);
    Ok(())
}

/// Write `data` next to `path` and rename it into place.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    write_atomic(path, &serde_json::to_vec_pretty(value)?)
}

fn read_region(
    root: &Path,
    manifest: &IntegrityManifest,
    key: ChunkKey,
) -> Result<Option<RegionRecord>, StoreError> {
    let filename = region_filename(key);
    let Some(entry) = manifest.entries.get(&filename) else {
        return Ok(None);
    };
    let compressed = std::fs::read(root.join("regions").join(&filename))?;
    let actual = sha256_hex(&compressed);
    if actual != entry.sha256 {
        return Err(StoreError::IntegrityMismatch {
            file: filename,
            expected: entry.sha256.clone(),
            actual,
        });
    }
    let cbor_bytes = zstd_decompress(&compressed)?;
    cbor_deserialize(&cbor_bytes).map(Some)
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
