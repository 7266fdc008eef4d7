//! A single writer's view of one meeting's fence.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{FenceOutcome, FencedValue, FencingError, FencingResult, FencingStore};

/// Writer handle bound to one meeting and one generation.
///
/// The first `FencedOut` latches: every later write fails immediately
/// without touching the store, and the owner is expected to abandon the
/// meeting.
pub struct MeetingFence {
    store: Arc<dyn FencingStore>,
    meeting_id: String,
    writer_id: String,
    generation: u64,
    fenced_out: Option<u64>,
}

impl MeetingFence {
    pub fn new(
        store: Arc<dyn FencingStore>,
        meeting_id: impl Into<String>,
        writer_id: impl Into<String>,
        generation: u64,
    ) -> Self {
        Self {
            store,
            meeting_id: meeting_id.into(),
            writer_id: writer_id.into(),
            generation,
            fenced_out: None,
        }
    }

    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a write has already been fenced out.
    pub fn is_fenced_out(&self) -> bool {
        self.fenced_out.is_some()
    }

    /// Fenced write of `field`. Store errors are returned as-is and do not
    /// latch; only a rejected generation does.
    pub async fn write(&mut self, field: &str, value: &str) -> FencingResult<()> {
        if let Some(current) = self.fenced_out {
            return Err(self.fenced_out_error(current));
        }

        let outcome = self
            .store
            .fenced_write(
                &self.meeting_id,
                field,
                value,
                self.generation,
                &self.writer_id,
            )
            .await?;

        match outcome {
            FenceOutcome::Accepted => {
                debug!(meeting_id = %self.meeting_id, %field, generation = self.generation, "fenced write");
                Ok(())
            }
            FenceOutcome::FencedOut { current } => {
                warn!(
                    meeting_id = %self.meeting_id,
                    writer_id = %self.writer_id,
                    presented = self.generation,
                    current,
                    "fenced out, abandoning meeting state"
                );
                self.fenced_out = Some(current);
                Err(self.fenced_out_error(current))
            }
        }
    }

    /// Read back a fenced field.
    pub async fn read(&self, field: &str) -> FencingResult<Option<FencedValue>> {
        self.store.read_fenced(&self.meeting_id, field).await
    }

    fn fenced_out_error(&self, current: u64) -> FencingError {
        FencingError::FencedOut {
            meeting_id: self.meeting_id.clone(),
            presented: self.generation,
            current,
        }
    }
}

impl std::fmt::Debug for MeetingFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeetingFence")
            .field("meeting_id", &self.meeting_id)
            .field("writer_id", &self.writer_id)
            .field("generation", &self.generation)
            .field("fenced_out", &self.fenced_out)
            .finish()
    }
}
