use crate::record::{ConsumptionRecord, Month, StoredAttachment};
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use uuid::Uuid;

const RECORDS_FILE: &str = "records.json";
const ATTACHMENTS_DIR: &str = "attachments";

/// Key under which a record is unique: one record per owner per month
/// per year.
type RecordKey = (String, Month, i32);

/// An attachment received by the record endpoint, not yet persisted.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// A fully parsed submission ready to be stored.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub owner: String,
    pub month: Month,
    pub year: i32,
    pub baseline_cost: f64,
    pub consumption_kwh: f64,
    pub attachments: Vec<NewAttachment>,
}

/// Result of an upsert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed; a new one was created
    Inserted,

    /// A record existed and the force flag was set; it was overwritten
    Updated,

    /// A record exists and the force flag was not set; nothing changed
    Exists,
}

/// Failure inside the record store.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Serde(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "store io error: {}", e),
            StoreError::Serde(e) => write!(f, "store serialization error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde(e)
    }
}

/// File-backed store for consumption records
///
/// Records live in an in-memory map persisted to `records.json` under
/// the store root; attachment blobs are written under
/// `<root>/<owner>/attachments/`. The map is the source of truth while
/// the process runs; every mutation is flushed to disk before the
/// write lock is released.
pub struct RecordStore {
    root: PathBuf,
    records: RwLock<HashMap<RecordKey, ConsumptionRecord>>,
}

impl RecordStore {
    /// Open (or initialize) a store rooted at `root`
    ///
    /// Creates the directory and loads any existing `records.json`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        create_dir_all(&root)?;

        let path = root.join(RECORDS_FILE);
        let records = if path.exists() {
            let data = fs::read_to_string(&path)?;
            let list: Vec<ConsumptionRecord> = serde_json::from_str(&data)?;
            list.into_iter()
                .map(|r| ((r.owner.clone(), r.month, r.year), r))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(RecordStore {
            root,
            records: RwLock::new(records),
        })
    }

    /// Insert or overwrite the record for (owner, month, year)
    ///
    /// The existence check and the mutation happen under one write
    /// lock, so two concurrent submitters for the same key serialize:
    /// the first inserts, the second deterministically sees `Exists`
    /// (or overwrites, if forced). When a record exists and `force` is
    /// unset, nothing is mutated.
    pub fn upsert(&self, new: NewRecord, force: bool) -> Result<UpsertOutcome, StoreError> {
        let key = (new.owner.clone(), new.month, new.year);
        let mut records = self.records.write().unwrap();

        let existing = records.get(&key).cloned();
        if existing.is_some() && !force {
            return Ok(UpsertOutcome::Exists);
        }

        let now = Utc::now();
        let created_at = existing.as_ref().map(|r| r.created_at).unwrap_or(now);

        // New blobs go to disk first; the previous record's blobs are
        // only removed once the replacement is durably written.
        let attachments = self.write_attachments(&new.owner, &new.attachments)?;
        let attachment_count = attachments.len();

        let outcome = if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        };

        let record = ConsumptionRecord {
            owner: new.owner,
            month: new.month,
            year: new.year,
            baseline_cost: new.baseline_cost,
            consumption_kwh: new.consumption_kwh,
            attachments,
            created_at,
            updated_at: now,
        };
        records.insert(key.clone(), record);

        if let Err(e) = self.persist(&records) {
            // Put the map back so the caller is never told about a
            // record that was not durably written: a retry must not see
            // `Exists` for a month that never saved.
            let rejected = match existing {
                Some(old) => records.insert(key, old),
                None => records.remove(&key),
            };
            if let Some(rejected) = rejected {
                self.remove_attachment_files(&rejected);
            }
            return Err(e);
        }

        // The new state is durable; now the stale blobs can go.
        if let Some(old) = existing {
            self.remove_attachment_files(&old);
        }

        log::info!(
            "{:?} record for {} {} {} ({} attachments)",
            outcome,
            key.0,
            key.1,
            key.2,
            attachment_count
        );
        Ok(outcome)
    }

    fn remove_attachment_files(&self, record: &ConsumptionRecord) {
        for attachment in &record.attachments {
            let path = self.attachment_path(&record.owner, &attachment.stored_name);
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("failed to remove attachment {:?}: {}", path, e);
            }
        }
    }

    /// All records of one owner, ordered by (year, month).
    pub fn list(&self, owner: &str) -> Vec<ConsumptionRecord> {
        let records = self.records.read().unwrap();
        let mut owned: Vec<ConsumptionRecord> = records
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        owned.sort_by_key(|r| (r.year, r.month));
        owned
    }

    /// Look up one record by its uniqueness key.
    pub fn get(&self, owner: &str, month: Month, year: i32) -> Option<ConsumptionRecord> {
        let records = self.records.read().unwrap();
        records.get(&(owner.to_string(), month, year)).cloned()
    }

    /// Read back the bytes of a stored attachment.
    pub fn attachment_bytes(&self, owner: &str, stored_name: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.attachment_path(owner, stored_name))
    }

    fn attachment_path(&self, owner: &str, stored_name: &str) -> PathBuf {
        self.root.join(owner).join(ATTACHMENTS_DIR).join(stored_name)
    }

    fn write_attachments(
        &self,
        owner: &str,
        attachments: &[NewAttachment],
    ) -> Result<Vec<StoredAttachment>, StoreError> {
        let dir = self.root.join(owner).join(ATTACHMENTS_DIR);
        create_dir_all(&dir)?;

        let mut stored = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            // Keep only the final path component of the client name.
            let base = Path::new(&attachment.file_name)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("attachment");
            let stored_name = format!("{}-{}", Uuid::new_v4(), base);
            fs::write(dir.join(&stored_name), &attachment.bytes)?;
            stored.push(StoredAttachment {
                file_name: attachment.file_name.clone(),
                stored_name,
                size: attachment.bytes.len() as u64,
                mime_type: attachment.mime_type.clone(),
            });
        }
        Ok(stored)
    }

    fn persist(&self, records: &HashMap<RecordKey, ConsumptionRecord>) -> Result<(), StoreError> {
        let mut list: Vec<&ConsumptionRecord> = records.values().collect();
        list.sort_by_key(|r| (r.owner.clone(), r.year, r.month));
        let json = serde_json::to_string_pretty(&list)?;
        fs::write(self.root.join(RECORDS_FILE), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn new_record(owner: &str, month: Month, baseline: f64) -> NewRecord {
        NewRecord {
            owner: owner.to_string(),
            month,
            year: 2026,
            baseline_cost: baseline,
            consumption_kwh: 320.5,
            attachments: vec![NewAttachment {
                file_name: "bill.png".to_string(),
                mime_type: "image/png".to_string(),
                bytes: vec![1, 2, 3],
            }],
        }
    }

    #[test]
    fn first_submission_inserts() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let outcome = store.upsert(new_record("alice", Month::March, 1500.0), false).unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let record = store.get("alice", Month::March, 2026).unwrap();
        assert_eq!(record.baseline_cost, 1500.0);
        assert_eq!(record.attachments.len(), 1);
        assert_eq!(
            store.attachment_bytes("alice", &record.attachments[0].stored_name).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn duplicate_without_force_leaves_record_unchanged() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        store.upsert(new_record("alice", Month::March, 1500.0), false).unwrap();

        let outcome = store.upsert(new_record("alice", Month::March, 9999.0), false).unwrap();
        assert_eq!(outcome, UpsertOutcome::Exists);
        let record = store.get("alice", Month::March, 2026).unwrap();
        assert_eq!(record.baseline_cost, 1500.0);
    }

    #[test]
    fn forced_update_overwrites_fields_and_attachments() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        store.upsert(new_record("alice", Month::March, 1500.0), false).unwrap();
        let old = store.get("alice", Month::March, 2026).unwrap();

        let mut replacement = new_record("alice", Month::March, 1750.0);
        replacement.attachments = vec![NewAttachment {
            file_name: "statement.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            bytes: vec![9, 9],
        }];
        let outcome = store.upsert(replacement, true).unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let record = store.get("alice", Month::March, 2026).unwrap();
        assert_eq!(record.baseline_cost, 1750.0);
        assert_eq!(record.attachments.len(), 1);
        assert_eq!(record.attachments[0].file_name, "statement.pdf");
        assert_eq!(record.created_at, old.created_at);
        assert!(record.updated_at >= old.updated_at);

        // The stale blob is gone from disk.
        assert!(store
            .attachment_bytes("alice", &old.attachments[0].stored_name)
            .is_err());
    }

    #[test]
    fn records_are_scoped_per_owner_and_month() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        store.upsert(new_record("alice", Month::March, 1.0), false).unwrap();
        store.upsert(new_record("alice", Month::January, 2.0), false).unwrap();
        store.upsert(new_record("bob", Month::March, 3.0), false).unwrap();

        let listed = store.list("alice");
        assert_eq!(listed.len(), 2);
        // Ordered by calendar position within the year.
        assert_eq!(listed[0].month, Month::January);
        assert_eq!(listed[1].month, Month::March);
        assert_eq!(store.list("bob").len(), 1);
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RecordStore::open(dir.path()).unwrap();
            store.upsert(new_record("alice", Month::March, 1500.0), false).unwrap();
        }
        let store = RecordStore::open(dir.path()).unwrap();
        let record = store.get("alice", Month::March, 2026).unwrap();
        assert_eq!(record.consumption_kwh, 320.5);
    }

    #[test]
    fn failed_persist_leaves_no_phantom_record() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        // Turn the records file into a directory so every persist fails.
        fs::create_dir(dir.path().join("records.json")).unwrap();

        assert!(store
            .upsert(new_record("alice", Month::April, 100.0), false)
            .is_err());

        // The failed insert must not be remembered: a retry sees no
        // conflict, and the map holds nothing for that month.
        assert!(store.get("alice", Month::April, 2026).is_none());
        let retry = store.upsert(new_record("alice", Month::April, 100.0), false);
        assert!(retry.is_err());
        assert!(!matches!(retry, Ok(UpsertOutcome::Exists)));

        // The rolled-back blobs are gone from disk too.
        let attachment_dir = dir.path().join("alice").join(ATTACHMENTS_DIR);
        let leftover = fs::read_dir(&attachment_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);
    }

    #[test]
    fn failed_persist_keeps_the_existing_record_intact() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        store
            .upsert(new_record("alice", Month::March, 1500.0), false)
            .unwrap();
        let before = store.get("alice", Month::March, 2026).unwrap();

        fs::remove_file(dir.path().join("records.json")).unwrap();
        fs::create_dir(dir.path().join("records.json")).unwrap();

        assert!(store
            .upsert(new_record("alice", Month::March, 9.0), true)
            .is_err());

        // The overwrite never happened: same fields, and the original
        // blobs are still readable.
        let after = store.get("alice", Month::March, 2026).unwrap();
        assert_eq!(after.baseline_cost, 1500.0);
        assert_eq!(
            store
                .attachment_bytes("alice", &before.attachments[0].stored_name)
                .unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn concurrent_submitters_serialize_on_the_write_lock() {
        let dir = tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .upsert(new_record("alice", Month::March, i as f64), false)
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<UpsertOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let inserted = outcomes.iter().filter(|o| **o == UpsertOutcome::Inserted).count();
        let exists = outcomes.iter().filter(|o| **o == UpsertOutcome::Exists).count();
        assert_eq!(inserted, 1);
        assert_eq!(exists, 3);
    }
}
