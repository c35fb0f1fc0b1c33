use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use tokio::time;
use tracing::{debug, info, warn};

use super::model::{SecretRecord, SecretStatus};

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");
// Unique index: public token -> internal id. Entries are never removed,
// so a token can never be recycled by a later insert.
const TOKENS: TableDefinition<&str, &str> = TableDefinition::new("tokens");

/// Outcome of an insert attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The token already exists. The caller regenerates and retries.
    Conflict,
}

/// Thread-safe handle to the redb store. redb serializes write
/// transactions, which is what makes `conditional_update_status` a
/// per-record linearizable compare-and-swap.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure all tables exist.
        let write_txn = db.begin_write()?;
        write_txn.open_table(SECRETS)?;
        write_txn.open_table(TOKENS)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Current time in Unix milliseconds.
    pub fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// Insert a new record. Fails with `Conflict` if the token is taken.
    /// The record and its token-index entry commit in one transaction.
    pub fn insert(&self, record: &SecretRecord) -> Result<InsertOutcome> {
        let bytes = encode(record)?;
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut tokens = write_txn.open_table(TOKENS)?;
            if tokens.get(record.token.as_str())?.is_some() {
                InsertOutcome::Conflict
            } else {
                tokens.insert(record.token.as_str(), record.id.as_str())?;
                let mut secrets = write_txn.open_table(SECRETS)?;
                secrets.insert(record.id.as_str(), bytes.as_slice())?;
                InsertOutcome::Inserted
            }
        };
        write_txn.commit()?;

        if outcome == InsertOutcome::Inserted {
            debug!(id = %record.id, "stored secret");
        }
        Ok(outcome)
    }

    /// Look up a record by its public token.
    pub fn find_by_token(&self, token: &str) -> Result<Option<SecretRecord>> {
        let read_txn = self.db.begin_read()?;
        let tokens = read_txn.open_table(TOKENS)?;

        let id: Option<String> = tokens.get(token)?.map(|g| g.value().to_owned());
        let Some(id) = id else {
            return Ok(None);
        };

        let secrets = read_txn.open_table(SECRETS)?;
        match secrets.get(id.as_str())? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Look up a record by its internal id.
    pub fn find_by_id(&self, id: &str) -> Result<Option<SecretRecord>> {
        let read_txn = self.db.begin_read()?;
        let secrets = read_txn.open_table(SECRETS)?;
        match secrets.get(id)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Atomically transition `status` from `expected` to `new`.
    ///
    /// Load, compare, and store happen inside a single write transaction;
    /// concurrent callers racing on the same record observe exactly one
    /// winner. Returns false if the record is missing or its status no
    /// longer matches `expected`.
    ///
    /// A transition to `Viewed` also sets `is_viewed` and stamps
    /// `viewed_at`, exactly once.
    pub fn conditional_update_status(
        &self,
        id: &str,
        expected: SecretStatus,
        new: SecretStatus,
    ) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let swapped = {
            let mut secrets = write_txn.open_table(SECRETS)?;

            // Clone the raw bytes so the AccessGuard (which borrows the
            // table) is dropped before the re-insert.
            let raw: Option<Vec<u8>> = secrets.get(id)?.map(|g| g.value().to_vec());

            match raw {
                None => false,
                Some(bytes) => {
                    let mut record = decode(&bytes)?;
                    if record.status != expected {
                        false
                    } else {
                        record.status = new;
                        if new == SecretStatus::Viewed {
                            record.is_viewed = true;
                            record.viewed_at = Some(Self::now());
                        }
                        let updated = encode(&record)?;
                        secrets.insert(id, updated.as_slice())?;
                        true
                    }
                }
            }
        };
        write_txn.commit()?;

        if swapped {
            debug!(id, from = expected.as_str(), to = new.as_str(), "status transition");
        }
        Ok(swapped)
    }

    /// All records belonging to `owner_id`, most recent first.
    pub fn list_by_owner(&self, owner_id: &str) -> Result<Vec<SecretRecord>> {
        let read_txn = self.db.begin_read()?;
        let secrets = read_txn.open_table(SECRETS)?;

        let mut records = Vec::new();
        for item in secrets.iter()? {
            let (_k, v) = item?;
            let record = decode(v.value())?;
            if record.owner_id.as_deref() == Some(owner_id) {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Transition every timed-out `Active` record to `Expired`. Records
    /// are never physically removed; expiry is a status change so owner
    /// listings stay consistent. Returns the number transitioned.
    pub fn mark_expired(&self) -> Result<usize> {
        let now = Self::now();

        // Read pass: collect candidates.
        let candidates: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let secrets = read_txn.open_table(SECRETS)?;
            let mut ids = Vec::new();
            for item in secrets.iter()? {
                let (k, v) = item?;
                let record = decode(v.value())?;
                if record.status == SecretStatus::Active && record.is_expired(now) {
                    ids.push(k.value().to_owned());
                }
            }
            ids
        };

        // Write pass: re-check under the write transaction. A reader may
        // have already expired (or a winner consumed) a candidate.
        let mut count = 0usize;
        for id in &candidates {
            if self.conditional_update_status(id, SecretStatus::Active, SecretStatus::Expired)? {
                count += 1;
            }
        }

        if count > 0 {
            info!(expired = count, "marked expired secrets");
        }
        Ok(count)
    }

    /// Spawn a background Tokio task that runs `mark_expired` every
    /// `interval`. Expiry is also evaluated lazily on every read, so
    /// the sweep only keeps listings tidy.
    pub fn spawn_expiry_sweep(self, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                if let Err(e) = self.mark_expired() {
                    warn!(error = %e, "expiry sweep error");
                }
            }
        });
    }
}

fn encode(record: &SecretRecord) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard()).context("bincode encode")
}

fn decode(bytes: &[u8]) -> Result<SecretRecord> {
    let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("bincode decode")?;
    Ok(record)
}
