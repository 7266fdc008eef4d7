//! [`FencingStore`] over a shared Redis, for coordinators that do not
//! share one embedded database.
//!
//! Keys are hash-tagged on the meeting id so the generation counter and
//! the meeting's values land on the same cluster slot:
//!
//! ```text
//! {prefix}:{<meeting_id>}:generation      -> u64 counter
//! {prefix}:{<meeting_id>}:value:<field>   -> JSON FencedValue
//! ```

use async_trait::async_trait;
use meetgrid_state::{FenceOutcome, FencedValue, epoch_secs};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info, warn};

use crate::{FencingError, FencingResult, FencingStore};

/// Compare-and-set on the generation plus the value write, in one script.
///
/// KEYS[1] generation key, KEYS[2] value key.
/// ARGV[1] presented generation, ARGV[2] JSON value.
/// Returns `{1, presented}` on accept, `{0, current}` when fenced out.
const FENCED_WRITE_LUA: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local presented = tonumber(ARGV[1])
if presented < current then
  return {0, current}
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SET', KEYS[2], ARGV[2])
return {1, presented}
"#;

/// Redis-backed fencing store.
#[derive(Clone)]
pub struct RedisFencingStore {
    conn: ConnectionManager,
    prefix: String,
    fenced_write: redis::Script,
}

impl RedisFencingStore {
    /// Connect to `url` and namespace every key under `prefix`.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> FencingResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        let prefix = prefix.into();
        info!(%prefix, "connected to redis fencing store");
        Ok(Self {
            conn,
            prefix,
            fenced_write: redis::Script::new(FENCED_WRITE_LUA),
        })
    }

    fn generation_key(&self, meeting_id: &str) -> String {
        generation_key(&self.prefix, meeting_id)
    }

    fn value_key(&self, meeting_id: &str, field: &str) -> String {
        value_key(&self.prefix, meeting_id, field)
    }
}

fn generation_key(prefix: &str, meeting_id: &str) -> String {
    format!("{prefix}:{{{meeting_id}}}:generation")
}

fn value_key(prefix: &str, meeting_id: &str, field: &str) -> String {
    format!("{prefix}:{{{meeting_id}}}:value:{field}")
}

#[async_trait]
impl FencingStore for RedisFencingStore {
    async fn advance_generation(&self, meeting_id: &str) -> FencingResult<u64> {
        let mut conn = self.conn.clone();
        let next: u64 = conn.incr(self.generation_key(meeting_id), 1u64).await?;
        debug!(%meeting_id, generation = next, "generation advanced");
        Ok(next)
    }

    async fn current_generation(&self, meeting_id: &str) -> FencingResult<u64> {
        let mut conn = self.conn.clone();
        let current: Option<u64> = conn.get(self.generation_key(meeting_id)).await?;
        Ok(current.unwrap_or(0))
    }

    async fn fenced_write(
        &self,
        meeting_id: &str,
        field: &str,
        value: &str,
        generation: u64,
        writer_id: &str,
    ) -> FencingResult<FenceOutcome> {
        let record = FencedValue {
            value: value.to_string(),
            generation,
            writer_id: writer_id.to_string(),
            written_at: epoch_secs(),
        };
        let json = serde_json::to_string(&record).map_err(|e| FencingError::Decode(e.to_string()))?;

        let mut conn = self.conn.clone();
        let (accepted, current): (u8, u64) = self
            .fenced_write
            .key(self.generation_key(meeting_id))
            .key(self.value_key(meeting_id, field))
            .arg(generation)
            .arg(json)
            .invoke_async(&mut conn)
            .await?;

        if accepted == 1 {
            debug!(%meeting_id, %field, %writer_id, generation, "fenced write accepted");
            Ok(FenceOutcome::Accepted)
        } else {
            warn!(%meeting_id, %field, %writer_id, presented = generation, current, "fenced write rejected");
            Ok(FenceOutcome::FencedOut { current })
        }
    }

    async fn read_fenced(
        &self,
        meeting_id: &str,
        field: &str,
    ) -> FencingResult<Option<FencedValue>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.value_key(meeting_id, field)).await?;
        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| FencingError::Decode(e.to_string()))
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Live Redis tests run only when `MEETGRID_TEST_REDIS_URL` is set.
    async fn live_store() -> Option<RedisFencingStore> {
        let url = std::env::var("MEETGRID_TEST_REDIS_URL").ok()?;
        let prefix = format!("meetgrid-test-{}", epoch_secs());
        Some(RedisFencingStore::connect(&url, prefix).await.unwrap())
    }

    #[test]
    fn keys_share_a_hash_tag_per_meeting() {
        assert_eq!(generation_key("mg", "m-1"), "mg:{m-1}:generation");
        assert_eq!(value_key("mg", "m-1", "mh"), "mg:{m-1}:value:mh");
    }

    #[tokio::test]
    async fn live_generation_fencing() {
        let Some(store) = live_store().await else {
            return;
        };

        let old = store.advance_generation("m-1").await.unwrap();
        let new = store.advance_generation("m-1").await.unwrap();
        assert_eq!(new, old + 1);

        assert_eq!(
            store.fenced_write("m-1", "mh", "a", new, "mc-new").await.unwrap(),
            FenceOutcome::Accepted
        );
        assert_eq!(
            store.fenced_write("m-1", "mh", "z", old, "mc-old").await.unwrap(),
            FenceOutcome::FencedOut { current: new }
        );

        let stored = store.read_fenced("m-1", "mh").await.unwrap().unwrap();
        assert_eq!(stored.value, "a");
        assert_eq!(stored.writer_id, "mc-new");
        assert_eq!(store.current_generation("m-1").await.unwrap(), new);
    }
}
