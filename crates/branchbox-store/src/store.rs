use crate::layout::StoreLayout;
use crate::ports::{first_free_port, PortLease};
use crate::record::{EnvRecord, EnvState};
use crate::StoreError;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::sync::{Arc, Mutex, RwLock};
use tempfile::NamedTempFile;
use tracing::warn;

/// Concurrency-safe table of environment records, one fsync'd JSON file per
/// record.
///
/// Mutations take the write side of an internal lock; snapshot scans
/// (`list_all`, `expired_ids`) take the read side, so a scan never observes
/// a record mid-transition and a record never becomes visible before its
/// commit completes. Port reservations for in-flight provisions live in an
/// in-memory table consulted by the same allocation scan that reads
/// committed records.
pub struct StateStore {
    layout: StoreLayout,
    // Guards record files and the reservation table together. The lock
    // carries no data; the files are the data.
    lock: RwLock<()>,
    reserved_ports: Arc<Mutex<HashSet<u16>>>,
}

impl StateStore {
    /// Open (and initialize if needed) the store rooted at `layout`.
    pub fn open(layout: StoreLayout) -> Result<Self, StoreError> {
        layout.initialize()?;
        Ok(Self {
            layout,
            lock: RwLock::new(()),
            reserved_ports: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Commit a new record durably. Fails with [`StoreError::Conflict`] if
    /// the id is already present.
    pub fn create(&self, record: &EnvRecord) -> Result<(), StoreError> {
        let _g = self
            .lock
            .write()
            .map_err(|e| StoreError::LockFailed(e.to_string()))?;
        let dest = self.layout.records_dir().join(&record.env_id);
        if dest.exists() {
            return Err(StoreError::Conflict(record.env_id.clone()));
        }
        self.write_record(record)
    }

    pub fn get(&self, env_id: &str) -> Result<EnvRecord, StoreError> {
        let _g = self
            .lock
            .read()
            .map_err(|e| StoreError::LockFailed(e.to_string()))?;
        self.read_record(env_id)
    }

    pub fn contains(&self, env_id: &str) -> bool {
        self.layout.records_dir().join(env_id).exists()
    }

    /// Remove a record durably. Removing an absent id is not an error, so
    /// racing deletes stay idempotent.
    pub fn delete(&self, env_id: &str) -> Result<(), StoreError> {
        let _g = self
            .lock
            .write()
            .map_err(|e| StoreError::LockFailed(e.to_string()))?;
        let path = self.layout.records_dir().join(env_id);
        if path.exists() {
            fs::remove_file(&path)?;
            crate::fsync_dir(&self.layout.records_dir())?;
        }
        Ok(())
    }

    /// Snapshot of all records, consistent at a single instant. Corrupted
    /// entries are skipped with a warning rather than failing the scan.
    pub fn list_all(&self) -> Result<Vec<EnvRecord>, StoreError> {
        let _g = self
            .lock
            .read()
            .map_err(|e| StoreError::LockFailed(e.to_string()))?;
        self.scan_records()
    }

    /// Atomically claim a record for destruction.
    ///
    /// Returns the record after persisting its `Destroying` state, or
    /// `None` if another destroy already holds the claim. An absent id is
    /// [`StoreError::EnvNotFound`].
    pub fn mark_destroying(&self, env_id: &str) -> Result<Option<EnvRecord>, StoreError> {
        let _g = self
            .lock
            .write()
            .map_err(|e| StoreError::LockFailed(e.to_string()))?;
        let mut record = self.read_record(env_id)?;
        if record.state == EnvState::Destroying {
            return Ok(None);
        }
        record.state = EnvState::Destroying;
        self.write_record(&record)?;
        Ok(Some(record))
    }

    /// Ids of records whose TTL has elapsed and that are still running.
    pub fn expired_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let _g = self
            .lock
            .read()
            .map_err(|e| StoreError::LockFailed(e.to_string()))?;
        Ok(self
            .scan_records()?
            .into_iter()
            .filter(|r| r.state == EnvState::Running && r.expired(now))
            .map(|r| r.env_id)
            .collect())
    }

    /// Records stranded in `Destroying`, e.g. by a crash mid-destroy.
    pub fn stranded_destroying(&self) -> Result<Vec<EnvRecord>, StoreError> {
        let _g = self
            .lock
            .read()
            .map_err(|e| StoreError::LockFailed(e.to_string()))?;
        Ok(self
            .scan_records()?
            .into_iter()
            .filter(|r| r.state == EnvState::Destroying)
            .collect())
    }

    /// Reserve a free host port from `lo..=hi`, consulting committed
    /// records and outstanding reservations. The returned lease releases
    /// the reservation when dropped.
    pub fn reserve_port(&self, lo: u16, hi: u16) -> Result<PortLease, StoreError> {
        let _g = self
            .lock
            .write()
            .map_err(|e| StoreError::LockFailed(e.to_string()))?;
        let mut used: HashSet<u16> = self
            .scan_records()?
            .iter()
            .filter(|r| r.state != EnvState::Destroyed)
            .map(|r| r.port)
            .collect();
        let mut reserved = self
            .reserved_ports
            .lock()
            .map_err(|e| StoreError::LockFailed(e.to_string()))?;
        used.extend(reserved.iter().copied());

        let port = first_free_port(lo, hi, &used).ok_or(StoreError::PortsExhausted { lo, hi })?;
        reserved.insert(port);
        Ok(PortLease::new(port, Arc::clone(&self.reserved_ports)))
    }

    fn write_record(&self, record: &EnvRecord) -> Result<(), StoreError> {
        let dest = self.layout.records_dir().join(&record.env_id);

        // Compute and embed checksum before writing
        let mut with_checksum = record.clone();
        with_checksum.checksum = Some(with_checksum.compute_checksum()?);
        let content = serde_json::to_string_pretty(&with_checksum)?;

        let dir = self.layout.records_dir();
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        crate::fsync_dir(&dir)?;

        Ok(())
    }

    fn read_record(&self, env_id: &str) -> Result<EnvRecord, StoreError> {
        let path = self.layout.records_dir().join(env_id);
        if !path.exists() {
            return Err(StoreError::EnvNotFound(env_id.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        let record: EnvRecord = serde_json::from_str(&content)?;

        // Verify checksum if present (legacy records have None)
        if let Some(ref expected) = record.checksum {
            let actual = record.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    env_id: env_id.to_owned(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(record)
    }

    fn scan_records(&self) -> Result<Vec<EnvRecord>, StoreError> {
        let dir = self.layout.records_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let name = entry.file_name();
                let name_str = name.to_str().unwrap_or("");
                if !name_str.starts_with('.') {
                    match self.read_record(name_str) {
                        Ok(record) => results.push(record),
                        Err(e) => {
                            warn!("skipping corrupted record '{name_str}': {e}");
                        }
                    }
                }
            }
        }
        results.sort_by(|a, b| a.env_id.cmp(&b.env_id));
        Ok(results)
    }
}
