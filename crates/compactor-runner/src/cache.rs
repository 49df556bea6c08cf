//! Persistent result cache
//!
//! Entries are addressed by a key derived from the task id and validated
//! by an identity fingerprint covering the tool version, the effective
//! options, and the input content. A fingerprint mismatch means the entry
//! is stale, never that something is wrong: lookups degrade to a miss and
//! the next successful run overwrites the entry wholesale.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use compactor_core::{TaskId, TaskOptions, TaskOutput};

/// Cache key: SHA-256 of the task id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_task(id: &TaskId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(id.as_str().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The transform tool an entry was produced by. Part of the fingerprint
/// so tool upgrades invalidate stale results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolIdentity {
    pub name: String,
    pub version: String,
}

impl ToolIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// The identity compiled into this crate.
    pub fn current() -> Self {
        Self::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }
}

/// Identity fingerprint: SHA-256 over tool identity, canonical encoded
/// options, input content, and optional caller-supplied key material.
/// Each segment is length-prefixed so adjacent segments cannot collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(
        tool: &ToolIdentity,
        options: &TaskOptions,
        input: &str,
        extra: Option<&str>,
    ) -> Self {
        let mut hasher = Sha256::new();
        update_segment(&mut hasher, tool.name.as_bytes());
        update_segment(&mut hasher, tool.version.as_bytes());
        // Encoded options serialize with sorted object keys, so equal
        // options always produce equal bytes.
        let canonical = options.encode().to_string();
        update_segment(&mut hasher, canonical.as_bytes());
        update_segment(&mut hasher, input.as_bytes());
        if let Some(extra) = extra {
            update_segment(&mut hasher, extra.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn update_segment(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// A cached task result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub task_id: TaskId,
    /// Fingerprint the entry was stored under.
    pub fingerprint: String,
    pub output: TaskOutput,
    /// RFC 3339 store time, used for pruning.
    pub stored_at: String,
}

/// Directory-backed cache for minification results.
#[derive(Debug, Clone)]
pub struct MinifyCache {
    cache_dir: PathBuf,
}

impl MinifyCache {
    pub fn open(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let shard = &key.as_str()[..2];
        self.cache_dir.join(shard).join(format!("{key}.json"))
    }

    /// Look up a stored result. Absence, a stale fingerprint, and storage
    /// problems all come back as `None`; storage problems are logged.
    pub fn get(&self, key: &CacheKey, fingerprint: &Fingerprint) -> Option<TaskOutput> {
        let path = self.entry_path(key);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(%key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(%key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };
        let entry: CacheEntry = match serde_json::from_str(&contents) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%key, error = %e, "cache entry unreadable, treating as miss");
                return None;
            }
        };
        if entry.fingerprint != fingerprint.as_str() {
            debug!(%key, task = %entry.task_id, "cache entry expired");
            return None;
        }
        debug!(%key, task = %entry.task_id, "cache hit");
        Some(entry.output)
    }

    /// Store a result. The entry is written to a temporary file and
    /// renamed into place, so concurrent writers of the same key are
    /// last-write-wins and readers never see a torn entry.
    pub fn put(
        &self,
        key: &CacheKey,
        fingerprint: &Fingerprint,
        id: &TaskId,
        output: &TaskOutput,
    ) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        let parent = match path.parent() {
            Some(parent) => parent,
            None => return Err(CacheError::Io(std::io::Error::other("entry path has no parent"))),
        };
        fs::create_dir_all(parent)?;

        let entry = CacheEntry {
            task_id: id.clone(),
            fingerprint: fingerprint.as_str().to_string(),
            output: output.clone(),
            stored_at: chrono::Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_string_pretty(&entry)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&path).map_err(|e| CacheError::Io(e.error))?;
        debug!(%key, task = %id, "stored cache entry");
        Ok(())
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<(), CacheError> {
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)?;
        }
        Ok(())
    }

    /// All readable entries, sorted by task id. Unreadable files are
    /// skipped with a warning.
    pub fn list(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries = Vec::new();
        for path in self.entry_files() {
            let parsed = fs::read_to_string(&path)
                .ok()
                .and_then(|contents| serde_json::from_str::<CacheEntry>(&contents).ok());
            match parsed {
                Some(entry) => entries.push(entry),
                None => warn!(path = %path.display(), "skipping unreadable cache entry"),
            }
        }
        entries.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(entries)
    }

    /// Remove entries stored longer ago than `max_age`.
    pub fn prune(&self, max_age: Duration) -> Result<PruneStats, CacheError> {
        let mut stats = PruneStats::default();
        // an unrepresentable cutoff means nothing can be old enough
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| chrono::Utc::now().checked_sub_signed(age));

        for path in self.entry_files() {
            stats.total += 1;
            let expired = fs::read_to_string(&path)
                .ok()
                .and_then(|contents| serde_json::from_str::<CacheEntry>(&contents).ok())
                .and_then(|entry| chrono::DateTime::parse_from_rfc3339(&entry.stored_at).ok())
                .is_some_and(|stored| cutoff.is_some_and(|cutoff| stored < cutoff));
            if expired && fs::remove_file(&path).is_ok() {
                stats.removed += 1;
            } else {
                stats.kept += 1;
            }
        }

        info!(
            total = stats.total,
            removed = stats.removed,
            kept = stats.kept,
            "cache prune complete"
        );
        Ok(stats)
    }

    /// Entry count and total size on disk.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();
        for path in self.entry_files() {
            stats.entries += 1;
            if let Ok(meta) = fs::metadata(&path) {
                stats.total_size += meta.len();
            }
        }
        Ok(stats)
    }

    fn entry_files(&self) -> impl Iterator<Item = PathBuf> {
        WalkDir::new(&self.cache_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|ext| ext == "json")
            })
            .map(|entry| entry.into_path())
    }
}

/// Statistics from a prune operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub total: usize,
    pub removed: usize,
    pub kept: usize,
}

/// Cache statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
}

impl CacheStats {
    /// Format total size in human-readable form.
    pub fn formatted_size(&self) -> String {
        if self.total_size < 1024 {
            format!("{} B", self.total_size)
        } else if self.total_size < 1024 * 1024 {
            format!("{:.1} KB", self.total_size as f64 / 1024.0)
        } else {
            format!("{:.1} MB", self.total_size as f64 / (1024.0 * 1024.0))
        }
    }
}

/// Cache errors. Call sites degrade reads to misses and log write
/// failures instead of failing the computed result.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
