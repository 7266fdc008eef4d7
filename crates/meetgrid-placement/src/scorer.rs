//! Worker scoring for selection.
//!
//! A worker is eligible when it is `Healthy` and has headroom. Its weight
//! is the fraction of capacity still free, multiplied by the locality
//! boost when it shares the coordinator's zone.

use meetgrid_state::{HealthStatus, WorkerRecord};
use rand::Rng;

/// Weights for the scoring components.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SelectionWeights {
    /// Multiplier applied to candidates in the local zone.
    pub locality_boost: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            locality_boost: 2.0,
        }
    }
}

/// An eligible worker with its draw weight. Lives for one selection call.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub id: &'a str,
    pub zone: &'a str,
    pub weight: f64,
    pub record: &'a WorkerRecord,
}

/// Score one worker. Returns `None` if it is not eligible.
pub fn score_worker<'a>(
    worker: &'a WorkerRecord,
    local_zone: Option<&str>,
    weights: &SelectionWeights,
) -> Option<Candidate<'a>> {
    if worker.health_status != HealthStatus::Healthy || !worker.has_headroom() {
        return None;
    }

    let headroom = 1.0 - worker.load_ratio();
    let locality = if local_zone == Some(worker.zone.as_str()) {
        weights.locality_boost
    } else {
        1.0
    };

    Some(Candidate {
        id: &worker.id,
        zone: &worker.zone,
        weight: headroom * locality,
        record: worker,
    })
}

/// Draw one candidate index with probability proportional to weight.
///
/// Returns `None` for an empty slice. When every weight is zero the draw
/// is uniform.
pub fn weighted_pick<R: Rng>(candidates: &[Candidate<'_>], rng: &mut R) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    let total: f64 = candidates.iter().map(|c| c.weight.max(0.0)).sum();
    if total <= 0.0 || !total.is_finite() {
        return Some(rng.random_range(0..candidates.len()));
    }

    let mut target = rng.random_range(0.0..total);
    for (i, candidate) in candidates.iter().enumerate() {
        let weight = candidate.weight.max(0.0);
        if target < weight {
            return Some(i);
        }
        target -= weight;
    }
    // Float rounding can leave target marginally above the last bucket.
    Some(candidates.len() - 1)
}
