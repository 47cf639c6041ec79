//! `CycleEnumerator`: Johnson-style elementary cycle enumeration
//! inside one SCC, iterative and bounded. The core of the
//! engine.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::edges::{capped_edge_label, out_neighbors};
use crate::graph_store::Projection;
use crate::types::{NftId, Step, WalletId};

#[derive(Clone, Copy, Debug)]
pub struct CycleConfig {
    pub max_depth: usize,
    pub max_cycles_per_scc: usize,
    pub global_timeout: Duration,
    pub max_collection_expansion: usize,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_cycles_per_scc: 1000,
            global_timeout: Duration::from_secs(45),
            max_collection_expansion: 64,
        }
    }
}

/// Why enumeration stopped short of exhausting the search space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    MaxCyclesPerScc,
    MaxCyclesGlobal,
    Timeout,
    Cancelled,
}

/// A cycle budget shared across every SCC processed within one discovery
/// pipeline run. Cheap to clone;
/// the counters are atomics so `sccConcurrency` parallel enumerators can
/// share one without a lock.
#[derive(Clone)]
pub struct Budget {
    remaining_global: std::sync::Arc<AtomicUsize>,
    deadline: Instant,
    exhausted_global: std::sync::Arc<AtomicBool>,
    cancellation: CancellationToken,
}

impl Budget {
    pub fn new(max_cycles_global: usize, wall_timeout: Duration, cancellation: CancellationToken) -> Self {
        Self {
            remaining_global: std::sync::Arc::new(AtomicUsize::new(max_cycles_global)),
            deadline: Instant::now() + wall_timeout,
            exhausted_global: std::sync::Arc::new(AtomicBool::new(false)),
            cancellation,
        }
    }

    fn try_take(&self) -> bool {
        loop {
            let remaining = self.remaining_global.load(Ordering::Acquire);
            if remaining == 0 {
                self.exhausted_global.store(true, Ordering::Release);
                return false;
            }
            if self
                .remaining_global
                .compare_exchange(remaining, remaining - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// The outcome of enumerating one SCC.
#[derive(Clone, Debug, Default)]
pub struct EnumerationOutcome {
    /// Each cycle as the sequence of wallets visited, in discovery order.
    pub cycles: Vec<Vec<WalletId>>,
    pub stop_reason: Option<StopReason>,
}

struct Frame<'a> {
    v: &'a WalletId,
    neighbors: Vec<&'a WalletId>,
    pos: usize,
    found: bool,
}

/// Enumerates elementary cycles within `scc_vertices`. Vertex
/// iteration is sorted `walletId`; edge iteration is sorted
/// `(targetWalletId, nftId)` via [`out_neighbors`], giving identical cycles
/// in identical order across runs on identical graphs.
pub fn enumerate_cycles(
    projection: &Projection,
    scc_vertices: &BTreeSet<WalletId>,
    enable_collection_trading: bool,
    config: &CycleConfig,
    budget: &Budget,
) -> EnumerationOutcome {
    let adjacency: HashMap<&WalletId, Vec<&WalletId>> = scc_vertices
        .iter()
        .map(|v| {
            let neighbors: Vec<&WalletId> = out_neighbors(projection, v, enable_collection_trading)
                .into_iter()
                .filter(|w| scc_vertices.contains(w))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .filter_map(|w| scc_vertices.get(&w))
                .collect();
            (v, neighbors)
        })
        .collect();

    let mut cycles: Vec<Vec<WalletId>> = Vec::new();
    let mut cycles_this_scc = 0usize;
    let mut pops = 0u64;
    let mut stop_reason = None;

    // Johnson's algorithm: the search rooted at `s` only ever runs over the
    // subgraph induced by vertices not yet fully processed. Once `s` is
    // done, it's removed from `remaining` so later starts can't rediscover
    // the same elementary cycle as a different rotation.
    let mut remaining: BTreeSet<&WalletId> = scc_vertices.iter().collect();
    let neighbors_of = |v: &WalletId, remaining: &BTreeSet<&WalletId>| -> Vec<&WalletId> {
        adjacency
            .get(v)
            .into_iter()
            .flatten()
            .copied()
            .filter(|w| remaining.contains(w))
            .collect()
    };

    'start: for s in scc_vertices {
        if cycles_this_scc >= config.max_cycles_per_scc {
            stop_reason = Some(StopReason::MaxCyclesPerScc);
            break;
        }
        if budget.cancelled() {
            stop_reason = Some(StopReason::Cancelled);
            break;
        }
        if budget.expired() {
            stop_reason = Some(StopReason::Timeout);
            break;
        }

        let mut blocked: HashMap<&WalletId, bool> = HashMap::new();
        let mut b_sets: HashMap<&WalletId, Vec<&WalletId>> = HashMap::new();
        let mut path: Vec<&WalletId> = vec![s];
        blocked.insert(s, true);

        let mut work_stack: Vec<Frame> = vec![Frame {
            v: s,
            neighbors: neighbors_of(s, &remaining),
            pos: 0,
            found: false,
        }];

        while let Some(frame) = work_stack.last_mut() {
            pops += 1;
            if pops % 1024 == 0 {
                if budget.cancelled() {
                    stop_reason = Some(StopReason::Cancelled);
                    break 'start;
                }
                if budget.expired() {
                    stop_reason = Some(StopReason::Timeout);
                    break 'start;
                }
            }

            if frame.pos < frame.neighbors.len() {
                let w = frame.neighbors[frame.pos];
                frame.pos += 1;

                if w == s {
                    if !budget.try_take() {
                        stop_reason = Some(StopReason::MaxCyclesGlobal);
                        break 'start;
                    }
                    cycles.push(path.iter().map(|w| (**w).clone()).collect());
                    cycles_this_scc += 1;
                    frame.found = true;
                    if cycles_this_scc >= config.max_cycles_per_scc {
                        stop_reason = Some(StopReason::MaxCyclesPerScc);
                        break 'start;
                    }
                } else if !*blocked.get(w).unwrap_or(&false) && path.len() < config.max_depth {
                    blocked.insert(w, true);
                    path.push(w);
                    work_stack.push(Frame {
                        v: w,
                        neighbors: neighbors_of(w, &remaining),
                        pos: 0,
                        found: false,
                    });
                }
            } else {
                let v = frame.v;
                let found = frame.found;
                let neighbors = std::mem::take(&mut frame.neighbors);
                work_stack.pop();
                path.pop();

                if found {
                    unblock(v, &mut blocked, &mut b_sets);
                } else {
                    for w in neighbors {
                        b_sets.entry(w).or_default().push(v);
                    }
                }

                if let Some(parent) = work_stack.last_mut() {
                    parent.found = parent.found || found;
                }
            }
        }

        remaining.remove(s);
    }

    EnumerationOutcome { cycles, stop_reason }
}

fn unblock<'a>(
    start: &'a WalletId,
    blocked: &mut HashMap<&'a WalletId, bool>,
    b_sets: &mut HashMap<&'a WalletId, Vec<&'a WalletId>>,
) {
    let mut stack = vec![start];
    while let Some(x) = stack.pop() {
        blocked.insert(x, false);
        if let Some(successors) = b_sets.remove(x) {
            for w in successors {
                if *blocked.get(w).unwrap_or(&false) {
                    stack.push(w);
                }
            }
        }
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Turns a raw wallet cycle into concrete `Step`s: one NFT per edge, chosen
/// by value-closest-to-the-cycle's-median, lexicographic tie-break. Returns
/// `None` if any edge along the cycle has no eligible NFT left (e.g. a
/// rejection or cap change raced the enumeration).
pub fn build_steps(
    projection: &Projection,
    cycle: &[WalletId],
    enable_collection_trading: bool,
    max_collection_expansion: usize,
) -> Option<Vec<Step>> {
    let len = cycle.len();
    if len < 2 {
        return None;
    }
    let mut candidates: Vec<Vec<NftId>> = Vec::with_capacity(len);
    for i in 0..len {
        let from = &cycle[i];
        let to = &cycle[(i + 1) % len];
        let label = capped_edge_label(projection, from, to, enable_collection_trading, max_collection_expansion);
        if label.is_empty() {
            return None;
        }
        candidates.push(label);
    }

    let pooled: Vec<f64> = candidates
        .iter()
        .flatten()
        .map(|nft_id| projection.nft_value.get(nft_id).copied().unwrap_or(0.0))
        .collect();
    let target = median(&pooled);

    let mut steps = Vec::with_capacity(len);
    for (i, label) in candidates.into_iter().enumerate() {
        let chosen = label
            .into_iter()
            .min_by(|a, b| {
                let va = projection.nft_value.get(a).copied().unwrap_or(0.0);
                let vb = projection.nft_value.get(b).copied().unwrap_or(0.0);
                (va - target)
                    .abs()
                    .partial_cmp(&(vb - target).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.cmp(b))
            })
            .expect("non-empty label checked above");
        steps.push(Step {
            from: cycle[i].clone(),
            to: cycle[(i + 1) % len].clone(),
            nfts: vec![chosen],
        });
    }
    Some(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::GraphStore;
    use crate::types::Nft;

    fn two_cycle() -> (Projection, BTreeSet<WalletId>) {
        let mut store = GraphStore::new();
        store.add_nft(Nft::new("n1").with_owner("a").with_value(10.0)).unwrap();
        store.add_nft(Nft::new("n2").with_owner("b").with_value(12.0)).unwrap();
        store.add_want(&"b".to_string(), &"n1".to_string());
        store.add_want(&"a".to_string(), &"n2".to_string());
        let vertices: BTreeSet<WalletId> = ["a".to_string(), "b".to_string()].into_iter().collect();
        (store.build_projection(), vertices)
    }

    #[test]
    fn finds_single_two_cycle() {
        let (projection, vertices) = two_cycle();
        let budget = Budget::new(1000, Duration::from_secs(5), CancellationToken::new());
        let outcome = enumerate_cycles(&projection, &vertices, true, &CycleConfig::default(), &budget);
        assert_eq!(outcome.cycles.len(), 1);
        assert_eq!(outcome.cycles[0].len(), 2);
    }

    #[test]
    fn three_cycle_found_regardless_of_start_order() {
        let mut store = GraphStore::new();
        store.add_nft(Nft::new("n1").with_owner("a")).unwrap();
        store.add_nft(Nft::new("n2").with_owner("b")).unwrap();
        store.add_nft(Nft::new("n3").with_owner("c")).unwrap();
        store.add_want(&"b".to_string(), &"n1".to_string());
        store.add_want(&"c".to_string(), &"n2".to_string());
        store.add_want(&"a".to_string(), &"n3".to_string());
        let projection = store.build_projection();
        let vertices: BTreeSet<WalletId> = ["a".to_string(), "b".to_string(), "c".to_string()]
            .into_iter()
            .collect();
        let budget = Budget::new(1000, Duration::from_secs(5), CancellationToken::new());
        let outcome = enumerate_cycles(&projection, &vertices, true, &CycleConfig::default(), &budget);
        assert_eq!(outcome.cycles.len(), 1);
        assert_eq!(outcome.cycles[0].len(), 3);
    }

    #[test]
    fn per_scc_budget_truncates() {
        let (projection, vertices) = two_cycle();
        let config = CycleConfig {
            max_cycles_per_scc: 0,
            ..CycleConfig::default()
        };
        let budget = Budget::new(1000, Duration::from_secs(5), CancellationToken::new());
        let outcome = enumerate_cycles(&projection, &vertices, true, &config, &budget);
        assert_eq!(outcome.stop_reason, Some(StopReason::MaxCyclesPerScc));
        assert!(outcome.cycles.is_empty());
    }

    #[test]
    fn build_steps_picks_median_closest_value() {
        let (projection, _) = two_cycle();
        let cycle = vec!["a".to_string(), "b".to_string()];
        let steps = build_steps(&projection, &cycle, true, 64).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].from, "a");
        assert_eq!(steps[0].nfts, vec!["n1".to_string()]);
    }
}
