//! StateStore — redb-backed state persistence for fleetgrid.
//!
//! Provides typed CRUD operations over runs, jobs, volumes, placement
//! groups, compute groups, and job metrics, plus the row claim query used
//! by every periodic task. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).
//!
//! # Claiming
//!
//! [`StateStore::claim`] selects the IDs of eligible rows, oldest
//! `last_processed_at` first, skipping IDs the caller already holds. It runs
//! inside a write transaction: redb admits a single writer at a time, so the
//! selection is serialized against every other claim and mutation. A row
//! that another writer is mutating is never seen half-written, which is the
//! guarantee `FOR UPDATE SKIP LOCKED` gives a relational store. The
//! transaction is aborted right after selection; the caller's in-process
//! claim set keeps the rows reserved while it works on them.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableHandle};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [
            RUNS,
            JOBS,
            VOLUMES,
            VOLUME_ATTACHMENTS,
            PLACEMENT_GROUPS,
            COMPUTE_GROUPS,
            JOB_METRICS,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic table access ───────────────────────────────────────

    fn put<T: Keyed>(&self, value: &T) -> StateResult<()> {
        self.put_many(std::slice::from_ref(value))
    }

    /// Write several values of one table in a single transaction.
    fn put_many<T: Keyed>(&self, values: &[T]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            for value in values {
                let key = value.table_key();
                let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: Keyed>(&self, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List values whose key starts with `prefix` (all values for `""`).
    fn list_prefix<T: Keyed>(&self, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }

    fn remove<T: Keyed>(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Claiming ───────────────────────────────────────────────────

    /// Select up to `limit` IDs of records matching `eligible`, skipping
    /// `excluded`, ordered by `last_processed_at` ascending (ties by ID).
    pub fn claim<R, F>(
        &self,
        excluded: &HashSet<String>,
        limit: usize,
        mut eligible: F,
    ) -> StateResult<Vec<String>>
    where
        R: Record,
        F: FnMut(&R) -> bool,
    {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut candidates: Vec<(u64, String)> = Vec::new();
        {
            let table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                if excluded.contains(key.value()) {
                    continue;
                }
                let record: R = match decode(value.value()) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(table = R::TABLE.name(), id = key.value(), error = %e, "skipping unreadable row");
                        continue;
                    }
                };
                if eligible(&record) {
                    candidates.push((record.last_processed_at(), record.id().to_string()));
                }
            }
        }
        txn.abort().map_err(map_err!(Transaction))?;

        candidates.sort();
        candidates.truncate(limit);
        Ok(candidates.into_iter().map(|(_, id)| id).collect())
    }

    /// Read-modify-write a record in one transaction.
    ///
    /// Returns the updated record, or `None` if it no longer exists.
    pub fn update<R, F>(&self, id: &str, mutate: F) -> StateResult<Option<R>>
    where
        R: Record,
        F: FnOnce(&mut R),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
            let current: Option<R> = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            match current {
                Some(mut record) => {
                    mutate(&mut record);
                    let bytes = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    table
                        .insert(id, bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    Some(record)
                }
                None => None,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    /// Set `last_processed_at` on every listed record that still exists.
    pub fn touch<R: Record>(&self, ids: &[String], now: u64) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
            for id in ids {
                let current: Option<R> = match table.get(id.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(decode(guard.value())?),
                    None => None,
                };
                if let Some(mut record) = current {
                    record.set_last_processed_at(now);
                    let bytes = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    table
                        .insert(id.as_str(), bytes.as_slice())
                        .map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Runs ───────────────────────────────────────────────────────

    /// Insert or update a run.
    pub fn put_run(&self, run: &Run) -> StateResult<()> {
        self.put(run)?;
        debug!(run = %run.id, status = ?run.status, "run stored");
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> StateResult<Option<Run>> {
        self.get(id)
    }

    pub fn list_runs(&self) -> StateResult<Vec<Run>> {
        self.list_prefix("")
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Insert or update a job submission.
    pub fn put_job(&self, job: &Job) -> StateResult<()> {
        self.put(job)
    }

    /// Insert or update several jobs atomically.
    pub fn put_jobs(&self, jobs: &[Job]) -> StateResult<()> {
        self.put_many(jobs)
    }

    pub fn get_job(&self, id: &str) -> StateResult<Option<Job>> {
        self.get(id)
    }

    pub fn list_jobs(&self) -> StateResult<Vec<Job>> {
        self.list_prefix("")
    }

    /// All submissions of all jobs of a run, ordered by
    /// `(replica_num, job_num, submission_num)`.
    pub fn list_jobs_for_run(&self, run_id: &str) -> StateResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .list_prefix::<Job>("")?
            .into_iter()
            .filter(|j| j.run_id == run_id)
            .collect();
        jobs.sort_by_key(|j| (j.replica_num, j.job_num, j.submission_num));
        Ok(jobs)
    }

    // ── Volumes ────────────────────────────────────────────────────

    /// Insert or update a volume.
    pub fn put_volume(&self, volume: &Volume) -> StateResult<()> {
        self.put(volume)?;
        debug!(volume = %volume.id, status = ?volume.status, "volume stored");
        Ok(())
    }

    pub fn get_volume(&self, id: &str) -> StateResult<Option<Volume>> {
        self.get(id)
    }

    pub fn list_volumes(&self) -> StateResult<Vec<Volume>> {
        self.list_prefix("")
    }

    /// Load volumes with their attachments in a single read transaction.
    ///
    /// IDs that no longer exist are skipped.
    pub fn load_volumes_with_attachments(
        &self,
        ids: &[String],
    ) -> StateResult<Vec<VolumeWithAttachments>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let volumes = txn.open_table(VOLUMES).map_err(map_err!(Table))?;
        let attachments = txn.open_table(VOLUME_ATTACHMENTS).map_err(map_err!(Table))?;

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let volume: Volume = match volumes.get(id.as_str()).map_err(map_err!(Read))? {
                Some(guard) => match decode(guard.value()) {
                    Ok(volume) => volume,
                    Err(e) => {
                        warn!(volume = %id, error = %e, "skipping unreadable volume");
                        continue;
                    }
                },
                None => continue,
            };
            let prefix = format!("{id}:");
            let mut attached = Vec::new();
            let mut readable = true;
            for entry in attachments.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                if !key.value().starts_with(&prefix) {
                    continue;
                }
                match decode(value.value()) {
                    Ok(attachment) => attached.push(attachment),
                    Err(e) => {
                        warn!(volume = %id, attachment = key.value(), error = %e, "unreadable attachment");
                        readable = false;
                    }
                }
            }
            // Idleness cannot be judged without every attachment.
            if !readable {
                continue;
            }
            results.push(VolumeWithAttachments {
                volume,
                attachments: attached,
            });
        }
        Ok(results)
    }

    // ── Volume attachments ─────────────────────────────────────────

    pub fn put_attachment(&self, attachment: &VolumeAttachment) -> StateResult<()> {
        self.put(attachment)
    }

    pub fn list_attachments_for_volume(&self, volume_id: &str) -> StateResult<Vec<VolumeAttachment>> {
        self.list_prefix(&format!("{volume_id}:"))
    }

    /// Detach a volume from an instance. Returns true if it was attached.
    pub fn delete_attachment(&self, volume_id: &str, instance_id: &str) -> StateResult<bool> {
        self.remove::<VolumeAttachment>(&format!("{volume_id}:{instance_id}"))
    }

    // ── Placement groups ───────────────────────────────────────────

    pub fn put_placement_group(&self, group: &PlacementGroup) -> StateResult<()> {
        self.put(group)
    }

    pub fn get_placement_group(&self, id: &str) -> StateResult<Option<PlacementGroup>> {
        self.get(id)
    }

    pub fn list_placement_groups(&self) -> StateResult<Vec<PlacementGroup>> {
        self.list_prefix("")
    }

    // ── Compute groups ─────────────────────────────────────────────

    pub fn put_compute_group(&self, group: &ComputeGroup) -> StateResult<()> {
        self.put(group)
    }

    pub fn get_compute_group(&self, id: &str) -> StateResult<Option<ComputeGroup>> {
        self.get(id)
    }

    pub fn list_compute_groups(&self) -> StateResult<Vec<ComputeGroup>> {
        self.list_prefix("")
    }

    // ── Job metrics ────────────────────────────────────────────────

    /// Append a metrics point.
    pub fn put_metrics_point(&self, point: &JobMetricsPoint) -> StateResult<()> {
        self.put(point)
    }

    /// Metrics points of a job in chronological order, at most `limit`.
    pub fn list_metrics_for_job(&self, job_id: &str, limit: usize) -> StateResult<Vec<JobMetricsPoint>> {
        let mut points: Vec<JobMetricsPoint> = self.list_prefix(&format!("{job_id}:"))?;
        points.truncate(limit);
        Ok(points)
    }

    /// Delete every metrics point for which `expired(job_id, timestamp_micro)`
    /// holds. Returns the number of points deleted.
    pub fn delete_metrics_where<F>(&self, mut expired: F) -> StateResult<usize>
    where
        F: FnMut(&str, u64) -> bool,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let deleted;
        {
            let mut table = txn.open_table(JOB_METRICS).map_err(map_err!(Table))?;
            let mut doomed = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                let key = key.value();
                let (job_id, ts) = key.rsplit_once(':').ok_or_else(|| StateError::InvalidKey {
                    table: "job_metrics",
                    key: key.to_string(),
                })?;
                let ts: u64 = ts.parse().map_err(|_| StateError::InvalidKey {
                    table: "job_metrics",
                    key: key.to_string(),
                })?;
                if expired(job_id, ts) {
                    doomed.push(key.to_string());
                }
            }
            for key in &doomed {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            deleted = doomed.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(deleted)
    }
}
