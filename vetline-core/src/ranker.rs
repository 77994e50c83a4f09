//! Proximity ranking of candidate responders
//!
//! Final score = weighted combination of three components in [0, 1]:
//! - distance score: min-max normalized over the candidate set, closer is better
//! - rating score:   `rating_average / 5`
//! - response score: min-max normalized estimated response time, faster is better
//!
//! A component whose values are identical across the set scores 1.0 for everyone.
//! Ties on the final score fall back to responder id so ranking is deterministic.

use serde::{Deserialize, Serialize};

use crate::directory::NearbyResponder;
use crate::models::Responder;

/// Maximum rating on the responder rating scale.
const MAX_RATING: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankWeights {
    pub distance: f64,
    pub rating: f64,
    pub response_time: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            distance: 0.5,
            rating: 0.3,
            response_time: 0.2,
        }
    }
}

/// A responder with its ranking breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub responder: Responder,
    pub distance_km: f64,
    pub estimated_response_minutes: u32,
    pub distance_score: f64,
    pub rating_score: f64,
    pub response_score: f64,
    pub score: f64,
}

/// Rank candidates by composite score, best first.
pub fn rank(candidates: Vec<NearbyResponder>, weights: &RankWeights) -> Vec<RankedCandidate> {
    if candidates.is_empty() {
        return vec![];
    }

    let distance_bounds = bounds(candidates.iter().map(|c| c.distance_km));
    let response_bounds = bounds(
        candidates
            .iter()
            .map(|c| c.responder.response_minutes as f64),
    );

    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .map(|c| {
            let estimated_response_minutes = c.responder.response_minutes;
            let distance_score = inverted_min_max(c.distance_km, distance_bounds);
            let rating_score = (c.responder.rating_average / MAX_RATING).clamp(0.0, 1.0);
            let response_score =
                inverted_min_max(estimated_response_minutes as f64, response_bounds);
            let score = weights.distance * distance_score
                + weights.rating * rating_score
                + weights.response_time * response_score;

            RankedCandidate {
                responder: c.responder,
                distance_km: c.distance_km,
                estimated_response_minutes,
                distance_score,
                rating_score,
                response_score,
                score,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.responder.id.cmp(&b.responder.id))
    });
    ranked
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// 1.0 at the minimum, 0.0 at the maximum.
fn inverted_min_max(value: f64, (lo, hi): (f64, f64)) -> f64 {
    let span = hi - lo;
    if span <= f64::EPSILON {
        return 1.0;
    }
    (1.0 - (value - lo) / span).clamp(0.0, 1.0)
}
