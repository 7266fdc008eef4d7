//! Registry-backed candidate selection.

use meetgrid_state::{StateStore, WorkerKind, WorkerRecord};
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{SelectionError, SelectionResult};
use crate::scorer::{Candidate, SelectionWeights, score_worker, weighted_pick};

/// What to do when the requested region has no eligible worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionFallback {
    /// Fail with `NoCapacity`.
    #[default]
    Deny,
    /// Consider healthy workers in every region.
    AnyRegion,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionConfig {
    /// Zone of the coordinator running the selection.
    pub local_zone: Option<String>,
    pub weights: SelectionWeights,
    pub region_fallback: RegionFallback,
}

/// Picks MCs and MHs out of the worker registry.
#[derive(Clone)]
pub struct CandidateSelector {
    state: StateStore,
    config: SelectionConfig,
}

impl CandidateSelector {
    pub fn new(state: StateStore, config: SelectionConfig) -> Self {
        Self { state, config }
    }

    /// Pick a meeting controller in `region`, skipping ids in `exclude`.
    pub fn select_mc(&self, region: &str, exclude: &[String]) -> SelectionResult<WorkerRecord> {
        self.select_mc_with(region, exclude, &mut rand::rng())
    }

    /// [`select_mc`](Self::select_mc) with a caller-supplied RNG.
    pub fn select_mc_with<R: Rng>(
        &self,
        region: &str,
        exclude: &[String],
        rng: &mut R,
    ) -> SelectionResult<WorkerRecord> {
        let kind = WorkerKind::MeetingController;
        let workers = self.eligible_workers(kind, region, |w| !exclude.contains(&w.id))?;
        let candidates = self.score(&workers);

        let picked = weighted_pick(&candidates, rng)
            .map(|i| candidates[i].record.clone())
            .ok_or_else(|| no_capacity(kind, region))?;
        debug!(%region, mc_id = %picked.id, candidates = candidates.len(), "meeting controller selected");
        Ok(picked)
    }

    /// Pick a primary MH and, when another zone has one, a backup MH in a
    /// different zone.
    pub fn select_mh_pair(
        &self,
        region: &str,
    ) -> SelectionResult<(WorkerRecord, Option<WorkerRecord>)> {
        self.select_mh_pair_with(region, &mut rand::rng())
    }

    /// [`select_mh_pair`](Self::select_mh_pair) with a caller-supplied RNG.
    pub fn select_mh_pair_with<R: Rng>(
        &self,
        region: &str,
        rng: &mut R,
    ) -> SelectionResult<(WorkerRecord, Option<WorkerRecord>)> {
        let kind = WorkerKind::MediaHandler;
        let workers = self.eligible_workers(kind, region, |_| true)?;
        let candidates = self.score(&workers);

        let primary = weighted_pick(&candidates, rng)
            .map(|i| candidates[i].record.clone())
            .ok_or_else(|| no_capacity(kind, region))?;

        let others: Vec<Candidate<'_>> = candidates
            .into_iter()
            .filter(|c| c.zone != primary.zone)
            .collect();
        let backup = weighted_pick(&others, rng).map(|i| others[i].record.clone());

        if backup.is_none() {
            debug!(%region, zone = %primary.zone, "no media handler in another zone, assigning without backup");
        }
        debug!(
            %region,
            mh_primary_id = %primary.id,
            mh_backup_id = ?backup.as_ref().map(|b| &b.id),
            "media handlers selected"
        );
        Ok((primary, backup))
    }

    /// Pick a replacement MH, skipping `exclude` and preferring a zone other
    /// than `avoid_zone` (the surviving MH's zone).
    pub fn select_mh_replacement(
        &self,
        region: &str,
        exclude: &[String],
        avoid_zone: Option<&str>,
    ) -> SelectionResult<WorkerRecord> {
        self.select_mh_replacement_with(region, exclude, avoid_zone, &mut rand::rng())
    }

    /// [`select_mh_replacement`](Self::select_mh_replacement) with a caller-supplied RNG.
    pub fn select_mh_replacement_with<R: Rng>(
        &self,
        region: &str,
        exclude: &[String],
        avoid_zone: Option<&str>,
        rng: &mut R,
    ) -> SelectionResult<WorkerRecord> {
        let kind = WorkerKind::MediaHandler;
        let workers = self.eligible_workers(kind, region, |w| !exclude.contains(&w.id))?;
        let candidates = self.score(&workers);

        let (diverse, same_zone): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|c| avoid_zone != Some(c.zone));
        let pool = if diverse.is_empty() { same_zone } else { diverse };

        let picked = weighted_pick(&pool, rng)
            .map(|i| pool[i].record.clone())
            .ok_or_else(|| no_capacity(kind, region))?;
        debug!(%region, mh_id = %picked.id, "replacement media handler selected");
        Ok(picked)
    }

    /// Healthy workers of `kind` in `region` passing `keep`, widened to
    /// every region when the policy allows and the region has none.
    fn eligible_workers(
        &self,
        kind: WorkerKind,
        region: &str,
        keep: impl Fn(&WorkerRecord) -> bool,
    ) -> SelectionResult<Vec<WorkerRecord>> {
        let in_region: Vec<WorkerRecord> = self
            .state
            .list_healthy(kind, region)?
            .into_iter()
            .filter(|w| w.has_headroom() && keep(w))
            .collect();

        if !in_region.is_empty() || self.config.region_fallback == RegionFallback::Deny {
            return Ok(in_region);
        }

        let anywhere: Vec<WorkerRecord> = self
            .state
            .list_healthy_any_region(kind)?
            .into_iter()
            .filter(|w| w.has_headroom() && keep(w))
            .collect();
        if !anywhere.is_empty() {
            warn!(%kind, %region, candidates = anywhere.len(), "no capacity in region, falling back to other regions");
        }
        Ok(anywhere)
    }

    fn score<'a>(&self, workers: &'a [WorkerRecord]) -> Vec<Candidate<'a>> {
        let local_zone = self.config.local_zone.as_deref();
        workers
            .iter()
            .filter_map(|w| score_worker(w, local_zone, &self.config.weights))
            .collect()
    }
}

fn no_capacity(kind: WorkerKind, region: &str) -> SelectionError {
    SelectionError::NoCapacity {
        kind,
        region: region.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meetgrid_state::HealthStatus;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn add(state: &StateStore, id: &str, kind: WorkerKind, region: &str, zone: &str, load: u32) {
        state
            .register_worker(WorkerRecord {
                id: id.to_string(),
                kind,
                region: region.to_string(),
                zone: zone.to_string(),
                endpoint: format!("{id}:7000"),
                media_endpoint: None,
                max_capacity: 10,
                current_load: 0,
                health_status: HealthStatus::Pending,
                resource_usage: None,
                last_heartbeat_at: 1000,
                registered_at: 1000,
            })
            .unwrap();
        state
            .update_heartbeat(id, load, HealthStatus::Healthy, None)
            .unwrap();
    }

    fn selector(state: &StateStore) -> CandidateSelector {
        CandidateSelector::new(state.clone(), SelectionConfig::default())
    }

    #[test]
    fn select_mc_honors_exclude_and_capacity() {
        let state = StateStore::open_in_memory().unwrap();
        add(&state, "mc-1", WorkerKind::MeetingController, "us", "a", 0);
        add(&state, "mc-2", WorkerKind::MeetingController, "us", "a", 10);
        add(&state, "mc-3", WorkerKind::MeetingController, "us", "b", 3);

        let sel = selector(&state);
        for _ in 0..50 {
            let picked = sel.select_mc("us", &["mc-1".to_string()]).unwrap();
            assert_eq!(picked.id, "mc-3");
        }

        let err = sel
            .select_mc("us", &["mc-1".to_string(), "mc-3".to_string()])
            .unwrap_err();
        assert!(matches!(err, SelectionError::NoCapacity { .. }));
    }

    #[test]
    fn select_mc_skips_draining_and_other_regions() {
        let state = StateStore::open_in_memory().unwrap();
        add(&state, "mc-drain", WorkerKind::MeetingController, "us", "a", 0);
        state.set_health("mc-drain", HealthStatus::Draining).unwrap();
        add(&state, "mc-eu", WorkerKind::MeetingController, "eu", "a", 0);

        let err = selector(&state).select_mc("us", &[]).unwrap_err();
        assert!(matches!(err, SelectionError::NoCapacity { .. }));
    }

    #[test]
    fn region_fallback_any_region_widens_the_pool() {
        let state = StateStore::open_in_memory().unwrap();
        add(&state, "mc-eu", WorkerKind::MeetingController, "eu", "a", 0);

        let sel = CandidateSelector::new(
            state.clone(),
            SelectionConfig {
                region_fallback: RegionFallback::AnyRegion,
                ..Default::default()
            },
        );
        assert_eq!(sel.select_mc("us", &[]).unwrap().id, "mc-eu");
    }

    #[test]
    fn local_zone_is_preferred() {
        let state = StateStore::open_in_memory().unwrap();
        add(&state, "mc-local", WorkerKind::MeetingController, "us", "a", 0);
        add(&state, "mc-remote", WorkerKind::MeetingController, "us", "b", 0);

        let sel = CandidateSelector::new(
            state.clone(),
            SelectionConfig {
                local_zone: Some("a".to_string()),
                ..Default::default()
            },
        );
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..3000 {
            let picked = sel.select_mc_with("us", &[], &mut rng).unwrap();
            *counts.entry(picked.id).or_default() += 1;
        }
        // Expected 2:1.
        let local = f64::from(counts["mc-local"]) / 3000.0;
        assert!((0.62..0.72).contains(&local), "local share {local}");
    }

    #[test]
    fn mh_pair_spans_two_zones() {
        let state = StateStore::open_in_memory().unwrap();
        add(&state, "mh-a1", WorkerKind::MediaHandler, "us", "a", 0);
        add(&state, "mh-a2", WorkerKind::MediaHandler, "us", "a", 0);
        add(&state, "mh-b1", WorkerKind::MediaHandler, "us", "b", 0);

        let sel = selector(&state);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let (primary, backup) = sel.select_mh_pair_with("us", &mut rng).unwrap();
            let backup = backup.expect("two zones available");
            assert_ne!(primary.zone, backup.zone);
        }
    }

    #[test]
    fn mh_pair_single_zone_has_no_backup() {
        let state = StateStore::open_in_memory().unwrap();
        add(&state, "mh-a1", WorkerKind::MediaHandler, "us", "a", 0);
        add(&state, "mh-a2", WorkerKind::MediaHandler, "us", "a", 0);

        let (_, backup) = selector(&state).select_mh_pair("us").unwrap();
        assert!(backup.is_none());
    }

    #[test]
    fn mh_pair_without_handlers_is_no_capacity() {
        let state = StateStore::open_in_memory().unwrap();
        add(&state, "mc-1", WorkerKind::MeetingController, "us", "a", 0);
        assert!(matches!(
            selector(&state).select_mh_pair("us"),
            Err(SelectionError::NoCapacity { kind: WorkerKind::MediaHandler, .. })
        ));
    }

    #[test]
    fn mh_replacement_prefers_another_zone() {
        let state = StateStore::open_in_memory().unwrap();
        add(&state, "mh-a1", WorkerKind::MediaHandler, "us", "a", 0);
        add(&state, "mh-a2", WorkerKind::MediaHandler, "us", "a", 0);
        add(&state, "mh-b1", WorkerKind::MediaHandler, "us", "b", 0);
        add(&state, "mh-c1", WorkerKind::MediaHandler, "us", "c", 0);

        let sel = selector(&state);
        let exclude = vec!["mh-c1".to_string(), "mh-a1".to_string()];
        for _ in 0..50 {
            let picked = sel.select_mh_replacement("us", &exclude, Some("a")).unwrap();
            assert_eq!(picked.id, "mh-b1");
        }

        // Only the avoided zone is left.
        let exclude = vec!["mh-c1".to_string(), "mh-b1".to_string(), "mh-a1".to_string()];
        let picked = sel.select_mh_replacement("us", &exclude, Some("a")).unwrap();
        assert_eq!(picked.id, "mh-a2");
    }
}
