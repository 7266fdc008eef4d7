//! Embedded fencing tables — per-meeting generation counters and
//! generation-guarded values.
//!
//! A coordinator claims a fresh generation with
//! [`StateStore::advance_generation`] each time it offers a meeting to a
//! controller. Writers then present that generation on every
//! [`StateStore::fenced_write`]; a write is accepted iff the presented
//! generation is at least the stored one, so a writer holding an older
//! generation can never overwrite state produced under a newer one.

use redb::{ReadableDatabase, ReadableTable};
use tracing::{debug, warn};

use crate::error::StateResult;
use crate::store::{StateStore, decode, encode, epoch_secs};
use crate::tables::{FENCED_VALUES, GENERATIONS};
use crate::types::*;

impl StateStore {
    /// Atomically increment and return a meeting's generation. The first
    /// claim returns 1.
    pub fn advance_generation(&self, meeting_id: &str) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next;
        {
            let mut table = txn.open_table(GENERATIONS).map_err(map_err!(Table))?;
            let current = table
                .get(meeting_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            next = current.saturating_add(1);
            table.insert(meeting_id, next).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%meeting_id, generation = next, "generation advanced");
        Ok(next)
    }

    /// The stored generation of a meeting, 0 if never claimed.
    pub fn current_generation(&self, meeting_id: &str) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(GENERATIONS).map_err(map_err!(Table))?;
        Ok(table
            .get(meeting_id)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0))
    }

    /// Write `value` under `{meeting_id}/{field}` if `generation` is at
    /// least the meeting's stored generation.
    ///
    /// On success the stored generation becomes `generation` and the value,
    /// generation and writer id are recorded in the same transaction.
    pub fn fenced_write(
        &self,
        meeting_id: &str,
        field: &str,
        value: &str,
        generation: u64,
        writer_id: &str,
    ) -> StateResult<FenceOutcome> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut generations = txn.open_table(GENERATIONS).map_err(map_err!(Table))?;
            let stored = generations
                .get(meeting_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            if generation < stored {
                warn!(%meeting_id, %field, %writer_id, presented = generation, current = stored, "fenced write rejected");
                return Ok(FenceOutcome::FencedOut { current: stored });
            }
            generations
                .insert(meeting_id, generation)
                .map_err(map_err!(Write))?;

            let record = FencedValue {
                value: value.to_string(),
                generation,
                writer_id: writer_id.to_string(),
                written_at: epoch_secs(),
            };
            let bytes = encode(&record)?;
            let key = fenced_value_key(meeting_id, field);
            let mut values = txn.open_table(FENCED_VALUES).map_err(map_err!(Table))?;
            values
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%meeting_id, %field, %writer_id, generation, "fenced write accepted");
        Ok(FenceOutcome::Accepted)
    }

    /// Read a fenced value.
    pub fn read_fenced(&self, meeting_id: &str, field: &str) -> StateResult<Option<FencedValue>> {
        let key = fenced_value_key(meeting_id, field);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FENCED_VALUES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }
}
