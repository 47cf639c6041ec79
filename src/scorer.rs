//! `LoopScorer`: quality score from efficiency, fairness, demand, and
//! collection diversity. Pure — same loop + same valuations
//! always yield the same score.

use std::collections::BTreeSet;

use crate::graph_store::Projection;
use crate::types::{LoopMetrics, Step};

/// Loops scoring below this are dropped before publication.
pub const MIN_SCORE: f64 = 0.5;

const WEIGHT_EFFICIENCY: f64 = 0.40;
const WEIGHT_FAIRNESS: f64 = 0.30;
const WEIGHT_DEMAND: f64 = 0.20;
const WEIGHT_DIVERSITY: f64 = 0.10;

const EPSILON: f64 = 1e-9;

/// Computes `(total_score, metrics)` for a candidate loop's steps.
pub fn score(steps: &[Step], projection: &Projection) -> (f64, LoopMetrics) {
    let participants = steps.len().max(1) as f64;

    let efficiency = 0.4 + 0.6 * (2.0 / participants);

    let values: Vec<f64> = steps
        .iter()
        .flat_map(|s| &s.nfts)
        .map(|nft_id| projection.nft_value.get(nft_id).copied().unwrap_or(0.0))
        .collect();
    let max_v = values.iter().cloned().fold(f64::MIN, f64::max).max(0.0);
    let min_v = values.iter().cloned().fold(f64::MAX, f64::min).max(0.0);
    let fairness = 1.0 - (max_v - min_v) / max_v.max(EPSILON);

    let demand = if values.is_empty() {
        0.0
    } else {
        let sum: f64 = steps
            .iter()
            .flat_map(|s| &s.nfts)
            .map(|nft_id| (projection.want_count(nft_id) as f64 / 10.0).min(1.0))
            .sum();
        sum / steps.iter().flat_map(|s| &s.nfts).count().max(1) as f64
    };

    let unique_collections: BTreeSet<&str> = steps
        .iter()
        .flat_map(|s| &s.nfts)
        .filter_map(|nft_id| projection.nft_collection.get(nft_id).map(|c| c.as_str()))
        .collect();
    let collection_diversity = unique_collections.len() as f64 / participants;

    let metrics = LoopMetrics {
        efficiency,
        fairness,
        demand,
        collection_diversity,
    };

    let total = (WEIGHT_EFFICIENCY * efficiency
        + WEIGHT_FAIRNESS * fairness
        + WEIGHT_DEMAND * demand
        + WEIGHT_DIVERSITY * collection_diversity)
        .clamp(0.0, 1.0);

    (total, metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::GraphStore;
    use crate::types::Nft;

    fn two_party_projection() -> Projection {
        let mut store = GraphStore::new();
        store.add_nft(Nft::new("n1").with_owner("a").with_value(10.0)).unwrap();
        store.add_nft(Nft::new("n2").with_owner("b").with_value(10.0)).unwrap();
        store.add_want(&"b".to_string(), &"n1".to_string());
        store.add_want(&"a".to_string(), &"n2".to_string());
        store.build_projection()
    }

    #[test]
    fn two_party_equal_value_scores_above_threshold() {
        let projection = two_party_projection();
        let steps = vec![
            Step {
                from: "a".to_string(),
                to: "b".to_string(),
                nfts: vec!["n1".to_string()],
            },
            Step {
                from: "b".to_string(),
                to: "a".to_string(),
                nfts: vec!["n2".to_string()],
            },
        ];
        let (total, metrics) = score(&steps, &projection);
        assert!(total >= MIN_SCORE, "expected >= {MIN_SCORE}, got {total}");
        assert_eq!(metrics.efficiency, 1.0);
        assert_eq!(metrics.fairness, 1.0);
    }

    #[test]
    fn score_is_pure() {
        let projection = two_party_projection();
        let steps = vec![
            Step {
                from: "a".to_string(),
                to: "b".to_string(),
                nfts: vec!["n1".to_string()],
            },
            Step {
                from: "b".to_string(),
                to: "a".to_string(),
                nfts: vec!["n2".to_string()],
            },
        ];
        let (t1, _) = score(&steps, &projection);
        let (t2, _) = score(&steps, &projection);
        assert_eq!(t1, t2);
    }

    #[test]
    fn efficiency_decreases_with_more_participants() {
        let projection = two_party_projection();
        let two: Vec<Step> = (0..2)
            .map(|_| Step {
                from: "a".to_string(),
                to: "b".to_string(),
                nfts: vec!["n1".to_string()],
            })
            .collect();
        let four: Vec<Step> = (0..4)
            .map(|_| Step {
                from: "a".to_string(),
                to: "b".to_string(),
                nfts: vec!["n1".to_string()],
            })
            .collect();
        let (_, m2) = score(&two, &projection);
        let (_, m4) = score(&four, &projection);
        assert!(m2.efficiency > m4.efficiency);
    }
}
