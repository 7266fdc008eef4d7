//! Worker registry — one row per meeting controller / media handler.
//!
//! Rows are created on first registration and mutated by heartbeats and
//! the staleness sweep. They are never physically deleted: a worker that
//! goes away simply ages into `Unhealthy`.

use std::time::Duration;

use redb::{ReadableDatabase, ReadableTable};
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::store::{StateStore, decode, encode, epoch_secs};
use crate::tables::WORKERS;
use crate::types::*;

impl StateStore {
    /// Register (or re-register) a worker.
    ///
    /// A new id creates a `Pending` row. A known id of the same kind and
    /// region is refreshed in place: endpoints, zone, capacity and load are
    /// replaced, `last_heartbeat_at` is reset and `registered_at` is kept.
    /// An id that already belongs to a different kind or region is a
    /// [`StateError::Conflict`].
    pub fn register_worker(&self, mut record: WorkerRecord) -> StateResult<RegisterOutcome> {
        record.health_status = HealthStatus::Pending;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            let existing = table
                .get(record.id.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());

            outcome = match existing {
                Some(bytes) => {
                    let prev: WorkerRecord = decode(&bytes)?;
                    if prev.kind != record.kind || prev.region != record.region {
                        return Err(StateError::Conflict(format!(
                            "worker {} is registered as {} in {}",
                            prev.id, prev.kind, prev.region
                        )));
                    }
                    record.registered_at = prev.registered_at;
                    RegisterOutcome::Refreshed
                }
                None => RegisterOutcome::Created,
            };

            let value = encode(&record)?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;

        info!(
            worker_id = %record.id,
            kind = %record.kind,
            region = %record.region,
            zone = %record.zone,
            ?outcome,
            "worker registered"
        );
        Ok(outcome)
    }

    /// Apply a heartbeat: load, health, and optionally resource usage.
    ///
    /// Returns [`StateError::NotFound`] for an unknown worker; the worker is
    /// expected to re-register.
    pub fn update_heartbeat(
        &self,
        worker_id: &str,
        current_load: u32,
        health: HealthStatus,
        usage: Option<ResourceUsage>,
    ) -> StateResult<()> {
        self.modify_worker(worker_id, |record| {
            record.current_load = current_load;
            record.health_status = health;
            if usage.is_some() {
                record.resource_usage = usage;
            }
            record.last_heartbeat_at = epoch_secs();
        })?;
        debug!(%worker_id, current_load, ?health, "heartbeat recorded");
        Ok(())
    }

    /// Override a worker's health, e.g. after it rejected an assignment as
    /// `Unhealthy`. The next heartbeat may restore it.
    pub fn set_health(&self, worker_id: &str, health: HealthStatus) -> StateResult<()> {
        self.modify_worker(worker_id, |record| record.health_status = health)?;
        info!(%worker_id, ?health, "worker health set");
        Ok(())
    }

    /// Mark every worker whose last heartbeat is older than `threshold` as
    /// `Unhealthy`, skipping `Draining` and already-`Unhealthy` rows.
    ///
    /// Runs as one write transaction and returns the ids it transitioned.
    /// Running it twice in a row transitions nothing the second time.
    pub fn mark_stale_unhealthy(&self, threshold: Duration) -> StateResult<Vec<WorkerId>> {
        let cutoff = epoch_secs().saturating_sub(threshold.as_secs());

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut transitioned = Vec::new();
        {
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;

            let mut stale = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let record: WorkerRecord = decode(value.value())?;
                let exempt = matches!(
                    record.health_status,
                    HealthStatus::Draining | HealthStatus::Unhealthy
                );
                if !exempt && record.last_heartbeat_at < cutoff {
                    stale.push(record);
                }
            }

            for mut record in stale {
                record.health_status = HealthStatus::Unhealthy;
                let value = encode(&record)?;
                table
                    .insert(record.id.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                transitioned.push(record.id);
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;

        if !transitioned.is_empty() {
            info!(count = transitioned.len(), ids = ?transitioned, "stale workers marked unhealthy");
        }
        Ok(transitioned)
    }

    /// Get a worker by id.
    pub fn get_worker(&self, worker_id: &str) -> StateResult<Option<WorkerRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        match table.get(worker_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List every registered worker.
    pub fn list_workers(&self) -> StateResult<Vec<WorkerRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// List `Healthy` workers of one kind in one region.
    pub fn list_healthy(&self, kind: WorkerKind, region: &str) -> StateResult<Vec<WorkerRecord>> {
        Ok(self
            .list_workers()?
            .into_iter()
            .filter(|w| {
                w.kind == kind && w.region == region && w.health_status == HealthStatus::Healthy
            })
            .collect())
    }

    /// List `Healthy` workers of one kind in every region.
    pub fn list_healthy_any_region(&self, kind: WorkerKind) -> StateResult<Vec<WorkerRecord>> {
        Ok(self
            .list_workers()?
            .into_iter()
            .filter(|w| w.kind == kind && w.health_status == HealthStatus::Healthy)
            .collect())
    }

    /// Read-modify-write of one worker row in a single transaction.
    fn modify_worker(
        &self,
        worker_id: &str,
        apply: impl FnOnce(&mut WorkerRecord),
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            let bytes = table
                .get(worker_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(format!("worker {worker_id}")))?;
            let mut record: WorkerRecord = decode(&bytes)?;
            apply(&mut record);
            let value = encode(&record)?;
            table
                .insert(worker_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}
