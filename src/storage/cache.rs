//! Durable storage for the coordinator's persisted documents.
//!
//! Three independent JSON documents live in the data directory:
//! - `forecasts.json`: site metadata plus raw per-site records
//! - `usage.json`: per-key API usage counters
//! - `dampening.json`: global and per-site dampening factors
//!
//! # Features
//! - Atomic writes using temp file + rename (prevents corruption)
//! - Version check on every load; a mismatch is never silently misread
//! - Usage data is never auto-repaired
//! - One process at a time owns a data directory (`pvcast.lock`)

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::core::models::{ForecastRecord, Site};
use crate::core::quota::KeyUsage;
use crate::error::{PvcastError, Result};
use crate::storage::paths::AppPaths;

/// Current `forecasts.json` layout.
pub const FORECASTS_VERSION: u32 = 1;
/// Current `usage.json` layout.
pub const USAGE_VERSION: u32 = 1;
/// Current `dampening.json` layout.
pub const DAMPENING_VERSION: u32 = 1;

// =============================================================================
// Documents
// =============================================================================

/// Raw forecast cache: site metadata plus every retained record per site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDocument {
    pub version: u32,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    /// Auto-update mode in effect when the document was written.
    #[serde(default)]
    pub auto_updated: u8,
    pub sites: Vec<Site>,
    /// Site id to records ordered by `period_start`.
    pub site_forecasts: BTreeMap<String, Vec<ForecastRecord>>,
}

impl Default for ForecastDocument {
    fn default() -> Self {
        Self {
            version: FORECASTS_VERSION,
            last_updated: None,
            last_attempt: None,
            auto_updated: 0,
            sites: Vec::new(),
            site_forecasts: BTreeMap::new(),
        }
    }
}

impl ForecastDocument {
    /// Structural checks beyond what serde enforces.
    fn validate(&self) -> std::result::Result<(), String> {
        for (site, records) in &self.site_forecasts {
            if let Some(bad) = records.iter().find(|r| !r.is_well_formed()) {
                return Err(format!(
                    "site {site} has a malformed record at {}",
                    bad.period_start
                ));
            }
            if records
                .windows(2)
                .any(|w| w[0].period_start >= w[1].period_start)
            {
                return Err(format!("site {site} records are not strictly ordered"));
            }
        }
        Ok(())
    }
}

/// Per-key usage counters keyed by key fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDocument {
    pub version: u32,
    pub keys: BTreeMap<String, KeyUsage>,
}

impl Default for UsageDocument {
    fn default() -> Self {
        Self {
            version: USAGE_VERSION,
            keys: BTreeMap::new(),
        }
    }
}

impl UsageDocument {
    fn validate(&self) -> std::result::Result<(), String> {
        match self.keys.iter().find(|(_, u)| u.daily_limit < 1) {
            Some((fp, u)) => Err(format!("key {fp} has daily_limit {}", u.daily_limit)),
            None => Ok(()),
        }
    }
}

/// Persisted dampening factors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DampeningDocument {
    pub version: u32,
    pub global: Vec<f64>,
    #[serde(default)]
    pub sites: BTreeMap<String, Vec<f64>>,
}

impl Default for DampeningDocument {
    fn default() -> Self {
        Self {
            version: DAMPENING_VERSION,
            global: vec![1.0; 24],
            sites: BTreeMap::new(),
        }
    }
}

/// Result of loading a recoverable document.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome<T> {
    Loaded(T),
    Missing,
    /// Present but unreadable; recoverable by refetching or defaults.
    Invalid(String),
}

impl<T> LoadOutcome<T> {
    #[must_use]
    pub fn loaded(self) -> Option<T> {
        match self {
            Self::Loaded(doc) => Some(doc),
            Self::Missing | Self::Invalid(_) => None,
        }
    }
}

// =============================================================================
// Cache Store
// =============================================================================

/// Exclusive ownership of a data directory.
///
/// Held for the lifetime of a coordinator; released when dropped or when the
/// process exits.
#[derive(Debug)]
pub struct DataDirLock {
    path: PathBuf,
    _file: RwLock<File>,
}

impl DataDirLock {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// File-backed store for the three documents.
///
/// Only the coordinator holding the directory's [`DataDirLock`] writes
/// through a `CacheStore`, so writes are never concurrent with each other.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn from_paths(paths: &AppPaths) -> Self {
        Self::new(paths.data.clone())
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join("pvcast.lock")
    }

    /// Take exclusive ownership of the data directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PvcastError::DataDirLocked`] when another coordinator, in
    /// this process or another, already holds it.
    pub fn lock(&self) -> Result<DataDirLock> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        let mut lock = RwLock::new(file);
        match lock.try_write() {
            // The OS lock lives as long as the file handle, not the guard.
            Ok(guard) => std::mem::forget(guard),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(PvcastError::DataDirLocked {
                    path: self.dir.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(path = %path.display(), "Data directory locked");
        Ok(DataDirLock { path, _file: lock })
    }

    #[must_use]
    pub fn forecasts_path(&self) -> PathBuf {
        self.dir.join("forecasts.json")
    }

    #[must_use]
    pub fn usage_path(&self) -> PathBuf {
        self.dir.join("usage.json")
    }

    #[must_use]
    pub fn dampening_path(&self) -> PathBuf {
        self.dir.join("dampening.json")
    }

    /// Load the forecast cache. Unreadable content is recoverable; a foreign
    /// version is not.
    pub fn load_forecasts(&self) -> Result<LoadOutcome<ForecastDocument>> {
        let path = self.forecasts_path();
        let outcome = load_versioned::<ForecastDocument>(&path, FORECASTS_VERSION)?;
        Ok(match outcome {
            LoadOutcome::Loaded(doc) => match doc.validate() {
                Ok(()) => LoadOutcome::Loaded(doc),
                Err(reason) => LoadOutcome::Invalid(reason),
            },
            other => other,
        })
    }

    /// Load usage counters. `None` when the file does not exist yet.
    ///
    /// Anything unreadable is [`PvcastError::UsageDataCorrupt`].
    pub fn load_usage(&self) -> Result<Option<UsageDocument>> {
        let path = self.usage_path();
        match load_versioned::<UsageDocument>(&path, USAGE_VERSION)? {
            LoadOutcome::Missing => Ok(None),
            LoadOutcome::Invalid(reason) => Err(PvcastError::UsageDataCorrupt {
                path: path.display().to_string(),
                reason,
            }),
            LoadOutcome::Loaded(doc) => match doc.validate() {
                Ok(()) => Ok(Some(doc)),
                Err(reason) => Err(PvcastError::UsageDataCorrupt {
                    path: path.display().to_string(),
                    reason,
                }),
            },
        }
    }

    pub fn load_dampening(&self) -> Result<LoadOutcome<DampeningDocument>> {
        load_versioned(&self.dampening_path(), DAMPENING_VERSION)
    }

    pub fn save_forecasts(&self, doc: &ForecastDocument) -> Result<()> {
        write(&self.forecasts_path(), doc)
    }

    pub fn save_usage(&self, doc: &UsageDocument) -> Result<()> {
        write(&self.usage_path(), doc)
    }

    pub fn save_dampening(&self, doc: &DampeningDocument) -> Result<()> {
        write(&self.dampening_path(), doc)
    }

    /// Delete the forecast cache. Usage and dampening survive.
    pub fn clear_forecasts(&self) -> Result<bool> {
        let path = self.forecasts_path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Removed forecast cache");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Read / Write
// =============================================================================

/// Read a document, checking its `version` before decoding the rest.
fn load_versioned<T: DeserializeOwned>(path: &Path, expected: u32) -> Result<LoadOutcome<T>> {
    let start = Instant::now();

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadOutcome::Missing),
        Err(e) => return Err(e.into()),
    };

    let value: serde_json::Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => return Ok(LoadOutcome::Invalid(e.to_string())),
    };

    let Some(found) = value.get("version").and_then(serde_json::Value::as_u64) else {
        return Ok(LoadOutcome::Invalid("missing version field".to_string()));
    };
    if found != u64::from(expected) {
        return Err(PvcastError::IncompatibleCacheSchema {
            path: path.display().to_string(),
            found: u32::try_from(found).unwrap_or(u32::MAX),
            expected,
        });
    }

    let outcome = match serde_json::from_value(value) {
        Ok(doc) => LoadOutcome::Loaded(doc),
        Err(e) => LoadOutcome::Invalid(e.to_string()),
    };

    tracing::debug!(
        path = %path.display(),
        elapsed_us = start.elapsed().as_micros(),
        "Loaded document"
    );

    Ok(outcome)
}

/// Write a document atomically.
pub fn write<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_vec_pretty(data)?;
    write_atomic(path, &content)?;

    tracing::debug!(path = %path.display(), bytes = content.len(), "Wrote document");
    Ok(())
}

/// Write bytes atomically using temp file + rename.
/// The previous file stays intact if the process dies mid-write.
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    // Same directory, so the rename never crosses filesystems
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("document"),
        std::process::id()
    ));

    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    std::fs::rename(&temp_path, path)?;

    Ok(())
}
