//! Storage collaborator
//!
//! The relational persistence layer lives outside this process; the core
//! only needs three narrow, idempotent operations keyed by natural
//! identifiers, so callers can retry them on transient failure without
//! double-writing.
//!
//! [`JsonStorage`] is the bundled implementation for standalone runs: an
//! append-only JSON-lines audit trail plus a radar registry file under the
//! data directory. Fines are idempotent on `correlation_id`, which is also
//! reloaded from disk on startup so a restart cannot double-bill.
//!
//! Storage layout: `{data_dir}/readings.jsonl`, `{data_dir}/fines.jsonl`,
//! `{data_dir}/radars.json`

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use log::{debug, error, info};
use thiserror::Error;

use velora_core::{Fine, RadarEvent, RadarUnit};

/// Errors from the storage collaborator
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O operation failed")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialize(e.to_string())
    }
}

/// Narrow persistence interface the ingestion core depends on.
///
/// All operations are idempotent on natural keys: a retried
/// `save_fine` for an already-persisted correlation id is a no-op,
/// and `find_or_create_radar` returns the existing unit.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist one decoded reading for the audit trail
    async fn save_reading(&self, event: &RadarEvent) -> Result<(), StorageError>;

    /// Persist a fine. Returns false when a fine with this correlation id
    /// already exists (replay-safe no-op).
    async fn save_fine(&self, fine: &Fine) -> Result<bool, StorageError>;

    /// Look up a radar unit by wire id, registering it with the given
    /// posted limit on first sight
    async fn find_or_create_radar(
        &self,
        radar_id: u32,
        default_limit: u16,
    ) -> Result<RadarUnit, StorageError>;
}

struct Inner {
    radars: HashMap<u32, RadarUnit>,
    fines_seen: HashSet<String>,
}

/// Local JSON-lines storage backend
pub struct JsonStorage {
    data_dir: PathBuf,
    inner: RwLock<Inner>,
}

impl JsonStorage {
    /// Open (or initialize) storage under `data_dir`.
    ///
    /// Reloads the radar registry and the set of already-billed
    /// correlation ids from previous runs.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(data_dir)?;
        debug!("storage directory: {}", data_dir.display());

        let radars = match File::open(data_dir.join("radars.json")) {
            Ok(file) => serde_json::from_reader(BufReader::new(file))?,
            Err(_) => HashMap::new(),
        };

        let mut fines_seen = HashSet::new();
        if let Ok(file) = File::open(data_dir.join("fines.jsonl")) {
            for line in BufReader::new(file).lines() {
                let line = line?;
                match serde_json::from_str::<Fine>(&line) {
                    Ok(fine) => {
                        fines_seen.insert(fine.correlation_id);
                    }
                    Err(e) => error!("skipping unreadable fine record: {}", e),
                }
            }
        }
        if !fines_seen.is_empty() {
            info!("loaded {} previously billed correlation ids", fines_seen.len());
        }

        Ok(JsonStorage {
            data_dir: data_dir.to_owned(),
            inner: RwLock::new(Inner { radars, fines_seen }),
        })
    }

    fn append_line(&self, file: &str, json: String) -> Result<(), StorageError> {
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.data_dir.join(file))?;
        out.write_all(json.as_bytes())?;
        out.write_all(b"\n")?;
        Ok(())
    }

    fn write_radars(&self, radars: &HashMap<u32, RadarUnit>) -> Result<(), StorageError> {
        let file = File::create(self.data_dir.join("radars.json"))?;
        serde_json::to_writer_pretty(file, radars)?;
        Ok(())
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn save_reading(&self, event: &RadarEvent) -> Result<(), StorageError> {
        let json = serde_json::to_string(event)?;
        // Appends are serialized through the write lock
        let _guard = self.inner.write().unwrap();
        self.append_line("readings.jsonl", json)
    }

    async fn save_fine(&self, fine: &Fine) -> Result<bool, StorageError> {
        let json = serde_json::to_string(fine)?;
        let mut inner = self.inner.write().unwrap();
        if inner.fines_seen.contains(&fine.correlation_id) {
            debug!("fine {} already persisted", fine.correlation_id);
            return Ok(false);
        }
        self.append_line("fines.jsonl", json)?;
        inner.fines_seen.insert(fine.correlation_id.clone());
        Ok(true)
    }

    async fn find_or_create_radar(
        &self,
        radar_id: u32,
        default_limit: u16,
    ) -> Result<RadarUnit, StorageError> {
        {
            let inner = self.inner.read().unwrap();
            if let Some(unit) = inner.radars.get(&radar_id) {
                return Ok(unit.clone());
            }
        }
        let mut inner = self.inner.write().unwrap();
        // Lost the race to another writer: take theirs
        if let Some(unit) = inner.radars.get(&radar_id) {
            return Ok(unit.clone());
        }
        let unit = RadarUnit {
            radar_id,
            speed_limit: default_limit,
        };
        inner.radars.insert(radar_id, unit.clone());
        self.write_radars(&inner.radars)?;
        info!("registered radar {} with limit {} km/h", radar_id, default_limit);
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use velora_core::{FineStatus, SourceFormat};

    fn reading() -> RadarEvent {
        RadarEvent {
            radar_id: 3,
            speed: 82,
            speed_limit: 60,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap(),
            source: SourceFormat::Json,
            plate: None,
            checksum_ok: true,
            raw: vec![],
        }
    }

    fn fine(correlation_id: &str) -> Fine {
        Fine {
            plate: "UNKNOWN".to_string(),
            speed: 82,
            speed_limit: 60,
            amount: 200,
            image_path: None,
            status: FineStatus::Pending,
            correlation_id: correlation_id.to_string(),
            issued_at: Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 30).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_save_reading_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::open(dir.path()).unwrap();

        storage.save_reading(&reading()).await.unwrap();
        storage.save_reading(&reading()).await.unwrap();

        let content = fs::read_to_string(dir.path().join("readings.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
        let parsed: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["radarId"], 3);
    }

    #[tokio::test]
    async fn test_save_fine_is_idempotent_on_correlation_id() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::open(dir.path()).unwrap();

        assert!(storage.save_fine(&fine("1-100-1")).await.unwrap());
        assert!(!storage.save_fine(&fine("1-100-1")).await.unwrap());
        assert!(storage.save_fine(&fine("1-100-2")).await.unwrap());

        let content = fs::read_to_string(dir.path().join("fines.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_fine_idempotence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = JsonStorage::open(dir.path()).unwrap();
            assert!(storage.save_fine(&fine("1-100-1")).await.unwrap());
        }
        let storage = JsonStorage::open(dir.path()).unwrap();
        assert!(!storage.save_fine(&fine("1-100-1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_or_create_radar_registers_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::open(dir.path()).unwrap();

        let unit = storage.find_or_create_radar(7, 50).await.unwrap();
        assert_eq!(unit.speed_limit, 50);

        // Second call with a different default keeps the registered limit
        let unit = storage.find_or_create_radar(7, 90).await.unwrap();
        assert_eq!(unit.speed_limit, 50);

        let reopened = JsonStorage::open(dir.path()).unwrap();
        let unit = reopened.find_or_create_radar(7, 90).await.unwrap();
        assert_eq!(unit.speed_limit, 50);
    }
}
