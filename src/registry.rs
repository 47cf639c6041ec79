//! `LoopRegistry`: the set of active loops for one tenant — insert,
//! dedupe by canonical hash, invalidate.

use dashmap::DashMap;

use crate::types::{AffectedSet, LoopId, TradeLoop};

/// An event emitted by a reconcile pass, handed to the `WebhookDispatcher`.
#[derive(Clone, Debug)]
pub enum DiscoveryEvent {
    LoopDiscovered(TradeLoop),
    LoopInvalidated { loop_: TradeLoop, reason: String },
    LoopCompleted(TradeLoop),
}

impl DiscoveryEvent {
    pub fn loop_id(&self) -> &LoopId {
        match self {
            DiscoveryEvent::LoopDiscovered(l) => &l.id,
            DiscoveryEvent::LoopInvalidated { loop_, .. } => &loop_.id,
            DiscoveryEvent::LoopCompleted(l) => &l.id,
        }
    }
}

fn loop_touches(loop_: &TradeLoop, affected: &AffectedSet) -> bool {
    loop_.wallets().any(|w| affected.wallet_ids.contains(w))
        || loop_.nfts().any(|n| affected.nft_ids.contains(n))
}

/// Active loops for one tenant, keyed by canonical `LoopId`. Reads are
/// concurrent (`dashmap`); writes only ever come from the tenant's serial
/// mutation pipeline.
#[derive(Default)]
pub struct LoopRegistry {
    loops: DashMap<LoopId, TradeLoop>,
}

impl LoopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn get(&self, loop_id: &LoopId) -> Option<TradeLoop> {
        self.loops.get(loop_id).map(|r| r.clone())
    }

    pub fn all(&self) -> Vec<TradeLoop> {
        self.loops.iter().map(|r| r.value().clone()).collect()
    }

    /// Reconciles freshly-discovered `candidates` against the currently
    /// active set, restricted to loops whose vertex set intersects
    /// `affected`. Returns the events to hand to the
    /// dispatcher, in `discovered` → `invalidated` order.
    pub fn reconcile(&self, candidates: Vec<TradeLoop>, affected: &AffectedSet) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        let mut seen_ids = std::collections::HashSet::with_capacity(candidates.len());

        for candidate in candidates {
            seen_ids.insert(candidate.id.clone());
            if !self.loops.contains_key(&candidate.id) {
                self.loops.insert(candidate.id.clone(), candidate.clone());
                events.push(DiscoveryEvent::LoopDiscovered(candidate));
            }
        }

        let stale: Vec<TradeLoop> = self
            .loops
            .iter()
            .filter(|entry| !seen_ids.contains(entry.key()) && loop_touches(entry.value(), affected))
            .map(|entry| entry.value().clone())
            .collect();

        for loop_ in stale {
            self.loops.remove(&loop_.id);
            events.push(DiscoveryEvent::LoopInvalidated {
                loop_,
                reason: "no longer a valid cycle under current graph state".to_string(),
            });
        }

        events
    }

    /// External `markCompleted(loopId)`: removes the loop and emits
    /// `trade_loop_completed`. `None` if the loop is unknown.
    pub fn mark_completed(&self, loop_id: &LoopId) -> Option<DiscoveryEvent> {
        self.loops
            .remove(loop_id)
            .map(|(_, loop_)| DiscoveryEvent::LoopCompleted(loop_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LoopMetrics, Step};

    fn sample_loop(id: &str, wallet: &str) -> TradeLoop {
        TradeLoop {
            id: id.to_string(),
            steps: vec![
                Step {
                    from: wallet.to_string(),
                    to: "other".to_string(),
                    nfts: vec!["n1".to_string()],
                },
                Step {
                    from: "other".to_string(),
                    to: wallet.to_string(),
                    nfts: vec!["n2".to_string()],
                },
            ],
            participants: 2,
            quality_score: 0.8,
            metrics: LoopMetrics::default(),
        }
    }

    #[test]
    fn new_candidate_emits_discovered() {
        let registry = LoopRegistry::new();
        let affected = AffectedSet {
            wallet_ids: ["a".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let events = registry.reconcile(vec![sample_loop("l1", "a")], &affected);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DiscoveryEvent::LoopDiscovered(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_loop_touching_affected_set_invalidated() {
        let registry = LoopRegistry::new();
        let affected = AffectedSet {
            wallet_ids: ["a".to_string()].into_iter().collect(),
            ..Default::default()
        };
        registry.reconcile(vec![sample_loop("l1", "a")], &affected);
        let events = registry.reconcile(vec![], &affected);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DiscoveryEvent::LoopInvalidated { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn loop_outside_affected_set_not_revalidated() {
        let registry = LoopRegistry::new();
        let affected_a = AffectedSet {
            wallet_ids: ["a".to_string()].into_iter().collect(),
            ..Default::default()
        };
        registry.reconcile(vec![sample_loop("l1", "a")], &affected_a);
        let affected_z = AffectedSet {
            wallet_ids: ["z".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let events = registry.reconcile(vec![], &affected_z);
        assert!(events.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn mark_completed_removes_and_emits() {
        let registry = LoopRegistry::new();
        let affected = AffectedSet {
            wallet_ids: ["a".to_string()].into_iter().collect(),
            ..Default::default()
        };
        registry.reconcile(vec![sample_loop("l1", "a")], &affected);
        let event = registry.mark_completed(&"l1".to_string()).unwrap();
        assert!(matches!(event, DiscoveryEvent::LoopCompleted(_)));
        assert!(registry.is_empty());
    }
}
