//! [`FencingStore`] over the embedded redb state store.

use async_trait::async_trait;
use meetgrid_state::{FenceOutcome, FencedValue, StateStore};

use crate::{FencingResult, FencingStore};

#[async_trait]
impl FencingStore for StateStore {
    async fn advance_generation(&self, meeting_id: &str) -> FencingResult<u64> {
        Ok(StateStore::advance_generation(self, meeting_id)?)
    }

    async fn current_generation(&self, meeting_id: &str) -> FencingResult<u64> {
        Ok(StateStore::current_generation(self, meeting_id)?)
    }

    async fn fenced_write(
        &self,
        meeting_id: &str,
        field: &str,
        value: &str,
        generation: u64,
        writer_id: &str,
    ) -> FencingResult<FenceOutcome> {
        Ok(StateStore::fenced_write(
            self, meeting_id, field, value, generation, writer_id,
        )?)
    }

    async fn read_fenced(
        &self,
        meeting_id: &str,
        field: &str,
    ) -> FencingResult<Option<FencedValue>> {
        Ok(StateStore::read_fenced(self, meeting_id, field)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn trait_object_delegates_to_state_store() {
        let state = StateStore::open_in_memory().unwrap();
        let store: Arc<dyn FencingStore> = Arc::new(state.clone());

        let generation = store.advance_generation("m-1").await.unwrap();
        assert_eq!(generation, 1);
        assert_eq!(
            store
                .fenced_write("m-1", "mh", "mh-a", generation, "mc-1")
                .await
                .unwrap(),
            FenceOutcome::Accepted
        );

        // Visible through the synchronous API too.
        assert_eq!(state.read_fenced("m-1", "mh").unwrap().unwrap().value, "mh-a");
        assert_eq!(store.current_generation("m-1").await.unwrap(), 1);
    }
}
