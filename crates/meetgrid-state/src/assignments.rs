//! Meeting assignments — at most one live row per meeting.
//!
//! Uniqueness comes from the table key plus insert-if-absent inside a
//! single write transaction; two coordinators racing on one meeting both
//! call [`StateStore::insert_assignment_if_absent`] and exactly one wins.

use redb::{ReadableDatabase, ReadableTable};
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::store::{StateStore, decode, encode};
use crate::tables::ASSIGNMENTS;
use crate::types::*;

impl StateStore {
    /// Get the live assignment for a meeting.
    pub fn get_assignment(&self, meeting_id: &str) -> StateResult<Option<MeetingAssignment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        match table.get(meeting_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Persist `assignment` unless the meeting already has a row.
    ///
    /// On a lost race the winner's row is returned unchanged.
    pub fn insert_assignment_if_absent(
        &self,
        assignment: &MeetingAssignment,
    ) -> StateResult<InsertOutcome> {
        let key = assignment.meeting_id.as_str();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            let existing = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            if let Some(bytes) = existing {
                let winner: MeetingAssignment = decode(&bytes)?;
                debug!(meeting_id = %key, mc_id = %winner.mc_id, "assignment already present");
                return Ok(InsertOutcome::Existing(winner));
            }
            let value = encode(assignment)?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(
            meeting_id = %key,
            mc_id = %assignment.mc_id,
            mh_primary_id = %assignment.mh_primary_id,
            generation = assignment.generation,
            "assignment persisted"
        );
        Ok(InsertOutcome::Inserted)
    }

    /// Delete a meeting's row only if it is still bound to `mc_id`.
    ///
    /// Returns true if a row was deleted.
    pub fn delete_assignment_if_bound(&self, meeting_id: &str, mc_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let deleted;
        {
            let mut table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            let existing = table
                .get(meeting_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            deleted = match existing {
                Some(bytes) => {
                    let current: MeetingAssignment = decode(&bytes)?;
                    if current.mc_id == mc_id {
                        table.remove(meeting_id).map_err(map_err!(Write))?;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%meeting_id, %mc_id, deleted, "compare-and-delete assignment");
        Ok(deleted)
    }

    /// Delete a meeting's row unconditionally. Returns true if it existed.
    pub fn delete_assignment(&self, meeting_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            existed = table.remove(meeting_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%meeting_id, existed, "assignment deleted");
        Ok(existed)
    }

    /// Swap the MH columns of a live row, compare-and-swap against the
    /// MH ids the caller last saw.
    ///
    /// Returns the updated row, [`StateError::NotFound`] if the meeting has
    /// no row, or [`StateError::Conflict`] if the MH ids changed underneath.
    pub fn replace_media_handlers(
        &self,
        meeting_id: &str,
        expected_primary: &str,
        expected_backup: Option<&str>,
        new_primary: &str,
        new_backup: Option<&str>,
    ) -> StateResult<MeetingAssignment> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            let bytes = table
                .get(meeting_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(format!("assignment {meeting_id}")))?;
            let mut current: MeetingAssignment = decode(&bytes)?;
            if current.mh_primary_id != expected_primary
                || current.mh_backup_id.as_deref() != expected_backup
            {
                return Err(StateError::Conflict(format!(
                    "media handlers of {meeting_id} changed concurrently"
                )));
            }
            current.mh_primary_id = new_primary.to_string();
            current.mh_backup_id = new_backup.map(str::to_string);
            let value = encode(&current)?;
            table
                .insert(meeting_id, value.as_slice())
                .map_err(map_err!(Write))?;
            updated = current;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(
            %meeting_id,
            mh_primary_id = %updated.mh_primary_id,
            mh_backup_id = ?updated.mh_backup_id,
            "media handlers replaced"
        );
        Ok(updated)
    }

    /// List every live assignment.
    pub fn list_assignments(&self) -> StateResult<Vec<MeetingAssignment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// List the assignments bound to one meeting controller.
    pub fn list_assignments_for_controller(
        &self,
        mc_id: &str,
    ) -> StateResult<Vec<MeetingAssignment>> {
        Ok(self
            .list_assignments()?
            .into_iter()
            .filter(|a| a.mc_id == mc_id)
            .collect())
    }
}
