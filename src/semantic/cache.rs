//! Content-addressed embedding cache with an append-only log on disk.
//!
//! Keys are `(model id, SHA-256 of the normalized passage text)`. Values never
//! change for a key, so the log is only ever appended to and needs no
//! invalidation.
//!
//! File format: embeddings.log
//!
//! Header (9 bytes):
//! - magic: [u8; 4] (`SSEC`)
//! - version: u8 (1)
//! - checksum: u32 (CRC32 of magic + version)
//!
//! Records (repeated):
//! - record_magic: u32 (little-endian)
//! - payload_len: u32 (little-endian)
//! - payload:
//!   - model_len: u16, model_id: [u8; model_len]
//!   - content_hash: [u8; 32]
//!   - last_used: u64 (unix millis)
//!   - dimensions: u32
//!   - embedding: [f32; dimensions] (little-endian)
//! - checksum: u32 (CRC32 of payload)
//!
//! A record that fails its checksum is skipped and the reader resyncs on the
//! next record magic; a torn tail is ignored. Whenever anything was skipped
//! the log is rewritten so later appends stay reachable.
//!
//! A cache hit re-appends its record with a fresh `last_used` when the stored
//! stamp is older than [`TOUCH_INTERVAL_MILLIS`]. On load the newest stamp of
//! a key wins, so pruning in a later process sees real recency. Logs where
//! superseded records outnumber live ones are compacted on open.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, RwLock};

use serde::Serialize;

use crate::semantic::embeddings::EmbeddingError;
use crate::semantic::preprocess::content_hash;

const FILE_MAGIC: &[u8; 4] = b"SSEC";

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: magic(4) + version(1) + checksum(4)
pub const HEADER_SIZE: usize = 9;

const RECORD_MAGIC: u32 = 0x5245_4353;

/// record_magic(4) + payload_len(4) + checksum(4)
const RECORD_OVERHEAD: usize = 12;

/// Anything larger is a corrupt length field, not a real embedding
const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Minimum age of a stored stamp before a hit writes a newer one
pub const TOUCH_INTERVAL_MILLIS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub model_id: String,
    pub content_hash: [u8; 32],
}

impl CacheKey {
    pub fn new(model_id: &str, text: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            content_hash: content_hash(text),
        }
    }
}

struct CacheEntry {
    embedding: Vec<f32>,
    last_used: AtomicU64,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub models: BTreeMap<String, usize>,
    pub hits: u64,
    pub misses: u64,
    /// Records skipped as unreadable when the log was loaded
    pub corrupt_records: u64,
    pub file_bytes: u64,
    pub path: Option<PathBuf>,
}

/// Result of scanning a log file.
#[derive(Default)]
struct LoadOutcome {
    records: Vec<(CacheKey, Vec<f32>, u64)>,
    corrupt: u64,
}

/// Embedding cache shared by every search in the process.
///
/// Guarantees at most one computation per key: keys being computed are
/// tracked in `inflight`, and other callers wait on `inflight_done` instead of
/// computing the same vector again.
pub struct EmbeddingCache {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    writer: Mutex<Option<File>>,
    inflight: Mutex<HashSet<CacheKey>>,
    inflight_done: Condvar,
    hits: AtomicU64,
    misses: AtomicU64,
    corrupt_records: AtomicU64,
}

impl EmbeddingCache {
    /// Cache that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
            writer: Mutex::new(None),
            inflight: Mutex::new(HashSet::new()),
            inflight_done: Condvar::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            corrupt_records: AtomicU64::new(0),
        }
    }

    /// Open (or create) the cache log at `path`.
    ///
    /// Never fails: unreadable storage degrades to an empty cache, and if the
    /// log cannot be written the cache keeps working in memory only.
    pub fn open(path: PathBuf) -> Self {
        let mut cache = Self::in_memory();

        let outcome = match std::fs::read(&path) {
            Ok(bytes) => match parse_log(&bytes) {
                Some(outcome) => outcome,
                None => {
                    let aside = path.with_extension("log.corrupt");
                    log::warn!(
                        "embedding cache {} has an unreadable header, moving it to {} and starting cold",
                        path.display(),
                        aside.display()
                    );
                    let _ = std::fs::rename(&path, &aside);
                    LoadOutcome::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LoadOutcome::default(),
            Err(e) => {
                log::warn!(
                    "failed to read embedding cache {}: {}, starting cold",
                    path.display(),
                    e
                );
                LoadOutcome::default()
            }
        };

        let records = outcome.records.len();
        let loaded = {
            let entries = cache.entries.get_mut().unwrap_or_else(|e| e.into_inner());
            for (key, embedding, last_used) in outcome.records {
                match entries.get_mut(&key) {
                    Some(existing) => {
                        let stamp = existing.last_used.get_mut();
                        *stamp = (*stamp).max(last_used);
                    }
                    None => {
                        entries.insert(
                            key,
                            CacheEntry {
                                embedding,
                                last_used: AtomicU64::new(last_used),
                            },
                        );
                    }
                }
            }
            entries.len()
        };
        let superseded = records - loaded;
        cache.corrupt_records = AtomicU64::new(outcome.corrupt);
        cache.path = Some(path.clone());

        if outcome.corrupt > 0 {
            log::warn!(
                "skipped {} unreadable records in embedding cache {}",
                outcome.corrupt,
                path.display()
            );
        }

        let needs_rewrite = outcome.corrupt > 0 || superseded > loaded || !path.exists();
        let writer = if needs_rewrite {
            cache.rewrite_log()
        } else {
            open_append(&path)
        };

        match writer {
            Ok(file) => *cache.writer.get_mut().unwrap_or_else(|e| e.into_inner()) = Some(file),
            Err(e) => log::warn!(
                "embedding cache {} is not writable ({}), caching in memory only",
                path.display(),
                e
            ),
        }

        log::info!("Loaded {} cached embeddings from {}", loaded, path.display());

        cache
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Look up a cached vector without computing anything.
    #[cfg(test)]
    pub fn get(&self, model_id: &str, text: &str) -> Option<Vec<f32>> {
        let key = CacheKey::new(model_id, text);
        let (embedding, touched) = {
            let entries = self.read_entries();
            let entry = entries.get(&key)?;
            (entry.embedding.clone(), self.touch(&key, entry, now_millis()))
        };
        self.append_records(touched.into_iter().collect());
        Some(embedding)
    }

    /// Store a vector, writing it through to the log.
    #[cfg(test)]
    pub fn insert(&self, model_id: &str, text: &str, embedding: Vec<f32>) {
        self.insert_key(CacheKey::new(model_id, text), embedding);
    }

    /// Return the cached vector for `text`, computing and storing it on a miss.
    pub fn get_or_compute<F>(
        &self,
        model_id: &str,
        text: &str,
        compute: F,
    ) -> Result<Vec<f32>, EmbeddingError>
    where
        F: FnOnce(&str) -> Result<Vec<f32>, EmbeddingError>,
    {
        let mut compute = Some(compute);
        let mut vectors = self.get_or_compute_batch(model_id, &[text.to_string()], |texts| {
            let compute = compute.take().ok_or_else(|| {
                EmbeddingError::EmbeddingFailed("single-text compute invoked twice".to_string())
            })?;
            match texts.first() {
                Some(text) => Ok(vec![compute(text.as_str())?]),
                None => Ok(Vec::new()),
            }
        })?;

        vectors
            .pop()
            .ok_or(EmbeddingError::CountMismatch { expected: 1, got: 0 })
    }

    /// Batched [`get_or_compute`](Self::get_or_compute).
    ///
    /// `compute` is called only with texts whose keys are neither cached nor
    /// being computed by another caller, at most once per distinct key. The
    /// result has one vector per input text, in input order.
    pub fn get_or_compute_batch<F>(
        &self,
        model_id: &str,
        texts: &[String],
        mut compute: F,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError>
    where
        F: FnMut(&[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>,
    {
        let keys: Vec<CacheKey> = texts.iter().map(|t| CacheKey::new(model_id, t)).collect();
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut counted_hits = false;

        loop {
            // positions still missing, first position per distinct key
            let mut missing: Vec<usize> = Vec::new();
            let mut touched = Vec::new();
            {
                let entries = self.read_entries();
                let mut seen = HashSet::new();
                let now = now_millis();
                for (idx, key) in keys.iter().enumerate() {
                    if results[idx].is_some() {
                        continue;
                    }
                    match entries.get(key) {
                        Some(entry) => {
                            touched.extend(self.touch(key, entry, now));
                            results[idx] = Some(entry.embedding.clone());
                        }
                        None => {
                            if seen.insert(key) {
                                missing.push(idx);
                            }
                        }
                    }
                }
            }
            self.append_records(touched);

            if !counted_hits {
                let hits = results.iter().filter(|r| r.is_some()).count();
                self.hits.fetch_add(hits as u64, Ordering::Relaxed);
                counted_hits = true;
            }

            if missing.is_empty() {
                break;
            }

            let mine = {
                let mut inflight = self.lock_inflight();
                let entries = self.read_entries();

                let mut mine = Vec::new();
                let mut theirs = Vec::new();
                for &idx in &missing {
                    let key = &keys[idx];
                    if entries.contains_key(key) {
                        continue;
                    }
                    if inflight.contains(key) {
                        theirs.push(key.clone());
                    } else {
                        inflight.insert(key.clone());
                        mine.push(idx);
                    }
                }
                drop(entries);

                if mine.is_empty() {
                    while theirs.iter().any(|key| inflight.contains(key)) {
                        inflight = self
                            .inflight_done
                            .wait(inflight)
                            .unwrap_or_else(|e| e.into_inner());
                    }
                    continue;
                }

                mine
            };

            let batch: Vec<String> = mine.iter().map(|&idx| texts[idx].clone()).collect();
            let outcome = match compute(&batch) {
                Ok(vectors) if vectors.len() == batch.len() => {
                    for (&idx, embedding) in mine.iter().zip(vectors) {
                        self.insert_key(keys[idx].clone(), embedding);
                    }
                    self.misses.fetch_add(batch.len() as u64, Ordering::Relaxed);
                    Ok(())
                }
                Ok(vectors) => Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    got: vectors.len(),
                }),
                Err(e) => Err(e),
            };

            {
                let mut inflight = self.lock_inflight();
                for &idx in &mine {
                    inflight.remove(&keys[idx]);
                }
            }
            self.inflight_done.notify_all();

            outcome?;
        }

        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("cache lost a computed entry".to_string()))
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.read_entries();
        let mut models = BTreeMap::new();
        for key in entries.keys() {
            *models.entry(key.model_id.clone()).or_insert(0) += 1;
        }

        CacheStats {
            entries: entries.len(),
            models,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            corrupt_records: self.corrupt_records.load(Ordering::Relaxed),
            file_bytes: self
                .path
                .as_ref()
                .and_then(|p| std::fs::metadata(p).ok())
                .map(|m| m.len())
                .unwrap_or(0),
            path: self.path.clone(),
        }
    }

    /// Rewrite the log with one record per live entry.
    pub fn compact(&self) -> std::io::Result<()> {
        let mut writer = self.lock_writer();
        let file = self.rewrite_log()?;
        *writer = Some(file);
        Ok(())
    }

    /// Drop entries not used since `cutoff_millis` and compact the log.
    /// Returns the number of entries removed.
    pub fn prune_older_than(&self, cutoff_millis: u64) -> std::io::Result<usize> {
        let removed = {
            let mut entries = self.write_entries();
            let before = entries.len();
            entries.retain(|_, entry| entry.last_used.load(Ordering::Relaxed) >= cutoff_millis);
            before - entries.len()
        };

        if removed > 0 {
            self.compact()?;
        }

        Ok(removed)
    }

    /// Remove every entry, in memory and on disk.
    pub fn clear(&self) -> std::io::Result<()> {
        let mut writer = self.lock_writer();
        self.write_entries().clear();
        if self.path.is_some() {
            *writer = Some(self.rewrite_log()?);
        }
        Ok(())
    }

    /// Stamp a hit. Returns the record to re-append when the persisted stamp
    /// is too old to count as recent use.
    fn touch(&self, key: &CacheKey, entry: &CacheEntry, now: u64) -> Option<Vec<u8>> {
        let previous = entry.last_used.fetch_max(now, Ordering::Relaxed);
        if self.path.is_none() || now.saturating_sub(previous) < TOUCH_INTERVAL_MILLIS {
            return None;
        }
        Some(encode_record(key, &entry.embedding, now))
    }

    fn append_records(&self, records: Vec<Vec<u8>>) {
        if records.is_empty() {
            return;
        }

        let mut writer = self.lock_writer();
        if let Some(file) = writer.as_mut() {
            let written = records
                .iter()
                .try_for_each(|record| file.write_all(record))
                .and_then(|_| file.flush());
            if let Err(e) = written {
                log::warn!("failed to persist cache usage stamps: {}", e);
            }
        }
    }

    fn insert_key(&self, key: CacheKey, embedding: Vec<f32>) {
        let last_used = now_millis();
        let record = encode_record(&key, &embedding, last_used);

        self.write_entries().insert(
            key,
            CacheEntry {
                embedding,
                last_used: AtomicU64::new(last_used),
            },
        );

        let mut writer = self.lock_writer();
        if let Some(file) = writer.as_mut() {
            if let Err(e) = file.write_all(&record).and_then(|_| file.flush()) {
                log::warn!("failed to persist embedding, keeping it in memory only: {}", e);
            }
        }
    }

    /// Write header + all entries to a temp file, then atomically replace
    /// the log. Returns an append handle on the new log.
    fn rewrite_log(&self) -> std::io::Result<File> {
        let path = match &self.path {
            Some(path) => path,
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "in-memory cache has no log",
                ))
            }
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("log.tmp");
        let result = (|| {
            let mut buf = encode_header().to_vec();
            for (key, entry) in self.read_entries().iter() {
                buf.extend(encode_record(
                    key,
                    &entry.embedding,
                    entry.last_used.load(Ordering::Relaxed),
                ));
            }

            let mut file = File::create(&temp_path)?;
            file.write_all(&buf)?;
            file.sync_all()?;
            Ok(())
        })();

        if let Err(e) = result {
            // Clean up temp file on error
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        std::fs::rename(&temp_path, path)?;
        open_append(path)
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<File>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_inflight(&self) -> MutexGuard<'_, HashSet<CacheKey>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().append(true).open(path)
}

fn encode_header() -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(FILE_MAGIC);
    header[4] = FORMAT_VERSION;
    let checksum = crc32fast::hash(&header[0..5]);
    header[5..9].copy_from_slice(&checksum.to_le_bytes());
    header
}

/// Serialize one record including framing and checksum.
pub fn encode_record(key: &CacheKey, embedding: &[f32], last_used: u64) -> Vec<u8> {
    let model = key.model_id.as_bytes();
    let payload_len = 2 + model.len() + 32 + 8 + 4 + embedding.len() * 4;

    let mut payload = Vec::with_capacity(payload_len);
    payload.extend_from_slice(&(model.len() as u16).to_le_bytes());
    payload.extend_from_slice(model);
    payload.extend_from_slice(&key.content_hash);
    payload.extend_from_slice(&last_used.to_le_bytes());
    payload.extend_from_slice(&(embedding.len() as u32).to_le_bytes());
    for value in embedding {
        payload.extend_from_slice(&value.to_le_bytes());
    }

    let mut record = Vec::with_capacity(RECORD_OVERHEAD + payload.len());
    record.extend_from_slice(&RECORD_MAGIC.to_le_bytes());
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(&payload);
    record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    record
}

fn decode_payload(payload: &[u8]) -> Option<(CacheKey, Vec<f32>, u64)> {
    let mut cursor = Cursor { bytes: payload, pos: 0 };

    let model_len = u16::from_le_bytes(cursor.take_array()?) as usize;
    let model_id = std::str::from_utf8(cursor.take(model_len)?).ok()?.to_string();
    let content_hash: [u8; 32] = cursor.take_array()?;
    let last_used = u64::from_le_bytes(cursor.take_array()?);
    let dimensions = u32::from_le_bytes(cursor.take_array()?) as usize;

    let body = cursor.take(dimensions.checked_mul(4)?)?;
    if cursor.pos != payload.len() {
        return None;
    }

    let embedding = body
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Some((
        CacheKey {
            model_id,
            content_hash,
        },
        embedding,
        last_used,
    ))
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }
}

fn read_u32(bytes: &[u8], pos: usize) -> Option<u32> {
    let slice = bytes.get(pos..pos + 4)?;
    Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

/// Parse a whole log. `None` when the header itself is unusable.
fn parse_log(bytes: &[u8]) -> Option<LoadOutcome> {
    let header = bytes.get(0..HEADER_SIZE)?;
    if &header[0..4] != FILE_MAGIC || header[4] > FORMAT_VERSION {
        return None;
    }
    if read_u32(header, 5)? != crc32fast::hash(&header[0..5]) {
        return None;
    }

    let magic = RECORD_MAGIC.to_le_bytes();
    let mut outcome = LoadOutcome::default();
    let mut pos = HEADER_SIZE;

    while pos < bytes.len() {
        if bytes.len() - pos < RECORD_OVERHEAD {
            // torn tail
            outcome.corrupt += 1;
            break;
        }

        let record = read_u32(bytes, pos).and_then(|m| {
            if m != RECORD_MAGIC {
                return None;
            }
            let len = read_u32(bytes, pos + 4)? as usize;
            if len > MAX_PAYLOAD {
                return None;
            }
            Some(len)
        });

        let parsed = record.and_then(|len| {
            let payload = bytes.get(pos + 8..pos + 8 + len)?;
            let checksum = read_u32(bytes, pos + 8 + len)?;
            if checksum != crc32fast::hash(payload) {
                return None;
            }
            Some((decode_payload(payload)?, pos + RECORD_OVERHEAD + len))
        });

        match parsed {
            Some((entry, next)) => {
                outcome.records.push(entry);
                pos = next;
            }
            None => {
                outcome.corrupt += 1;
                // resync on the next record magic
                match bytes[pos + 1..].windows(4).position(|w| w == magic) {
                    Some(offset) => pos = pos + 1 + offset,
                    None => break,
                }
            }
        }
    }

    Some(outcome)
}
