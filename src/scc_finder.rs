//! `SCCFinder`: iterative (explicit-stack) Tarjan's algorithm over an
//! induced subgraph of the wallet graph.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::edges::out_neighbors;
use crate::error::{EngineError, EngineResult};
use crate::graph_store::Projection;
use crate::types::WalletId;

#[derive(Clone, Copy, Debug)]
pub struct SccConfig {
    pub max_vertices: usize,
    pub timeout: Duration,
    pub batch_log_threshold: usize,
}

impl Default for SccConfig {
    fn default() -> Self {
        Self {
            max_vertices: 100_000,
            timeout: Duration::from_secs(45),
            batch_log_threshold: 100_000,
        }
    }
}

/// Result of one `SCCFinder` pass: SCCs with ≥ 2 vertices, ascending by size.
#[derive(Clone, Debug, Default)]
pub struct SccOutcome {
    pub sccs: Vec<Vec<WalletId>>,
    pub truncated: bool,
}

/// Runs Tarjan's SCC decomposition over the induced subgraph restricted to
/// `vertices`. Checks the cancellation token and the wall clock at least
/// every 1024 edge relaxations.
pub fn find_sccs(
    projection: &Projection,
    vertices: &BTreeSet<WalletId>,
    enable_collection_trading: bool,
    config: &SccConfig,
    cancellation: &CancellationToken,
) -> EngineResult<SccOutcome> {
    if vertices.len() > config.max_vertices {
        return Err(EngineError::SccExceedsMaxVertices(format!(
            "{} vertices exceeds configured max {}",
            vertices.len(),
            config.max_vertices
        )));
    }
    if vertices.len() >= config.batch_log_threshold {
        info!(vertex_count = vertices.len(), "scc_finder: large induced subgraph");
    }

    let adjacency: HashMap<&WalletId, Vec<WalletId>> = vertices
        .iter()
        .map(|v| {
            let mut neighbors: Vec<WalletId> = out_neighbors(projection, v, enable_collection_trading)
                .into_iter()
                .filter(|w| vertices.contains(w))
                .collect();
            neighbors.sort();
            (v, neighbors)
        })
        .collect();

    let started = Instant::now();
    let mut indices: HashMap<&WalletId, usize> = HashMap::new();
    let mut lowlink: HashMap<&WalletId, usize> = HashMap::new();
    let mut on_stack: HashMap<&WalletId, bool> = HashMap::new();
    let mut tarjan_stack: Vec<&WalletId> = Vec::new();
    let mut next_index = 0usize;
    let mut relaxations = 0u64;
    let mut truncated = false;
    let mut result: Vec<Vec<WalletId>> = Vec::new();

    'outer: for start in vertices {
        if indices.contains_key(start) {
            continue;
        }

        struct Frame<'a> {
            v: &'a WalletId,
            pos: usize,
        }

        let mut work_stack: Vec<Frame> = vec![Frame { v: start, pos: 0 }];
        indices.insert(start, next_index);
        lowlink.insert(start, next_index);
        next_index += 1;
        tarjan_stack.push(start);
        on_stack.insert(start, true);

        while let Some(frame) = work_stack.last_mut() {
            relaxations += 1;
            if relaxations % 1024 == 0 {
                if cancellation.is_cancelled() {
                    truncated = true;
                    break 'outer;
                }
                if started.elapsed() > config.timeout {
                    warn!("scc_finder: timeout exceeded, returning partial result");
                    truncated = true;
                    break 'outer;
                }
            }

            let v = frame.v;
            let neighbors = &adjacency[v];
            if frame.pos < neighbors.len() {
                let w = &neighbors[frame.pos];
                frame.pos += 1;
                // SAFETY-free: `w` borrows from `adjacency`, keyed by the same
                // `vertices` set that owns every `WalletId` we touch, so the
                // reference outlives this loop.
                let w_ref: &WalletId = vertices.get(w).unwrap();
                if !indices.contains_key(w_ref) {
                    indices.insert(w_ref, next_index);
                    lowlink.insert(w_ref, next_index);
                    next_index += 1;
                    tarjan_stack.push(w_ref);
                    on_stack.insert(w_ref, true);
                    work_stack.push(Frame { v: w_ref, pos: 0 });
                } else if *on_stack.get(w_ref).unwrap_or(&false) {
                    let w_index = indices[w_ref];
                    let v_low = lowlink[v];
                    lowlink.insert(v, v_low.min(w_index));
                }
            } else {
                let v = frame.v;
                let v_low = lowlink[v];
                work_stack.pop();
                if let Some(parent) = work_stack.last() {
                    let p_low = lowlink[parent.v];
                    lowlink.insert(parent.v, p_low.min(v_low));
                }
                if v_low == indices[v] {
                    let mut scc = Vec::new();
                    loop {
                        let w = tarjan_stack.pop().expect("scc stack non-empty by invariant");
                        on_stack.insert(w, false);
                        scc.push(w.clone());
                        if w == v {
                            break;
                        }
                    }
                    if scc.len() >= 2 {
                        result.push(scc);
                    }
                    // size-1 SCCs are discarded; self-trade is disallowed by
                    // GraphStore, so no vertex ever has a self-loop to rescue.
                }
            }
        }
    }

    result.sort_by_key(|scc| scc.len());
    Ok(SccOutcome {
        sccs: result,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::GraphStore;
    use crate::types::Nft;

    fn two_cycle_projection() -> (Projection, BTreeSet<WalletId>) {
        let mut store = GraphStore::new();
        store.add_nft(Nft::new("n1").with_owner("a")).unwrap();
        store.add_nft(Nft::new("n2").with_owner("b")).unwrap();
        store.add_want(&"b".to_string(), &"n1".to_string());
        store.add_want(&"a".to_string(), &"n2".to_string());
        let projection = store.build_projection();
        let vertices: BTreeSet<WalletId> = ["a".to_string(), "b".to_string()].into_iter().collect();
        (projection, vertices)
    }

    #[test]
    fn finds_two_cycle_scc() {
        let (projection, vertices) = two_cycle_projection();
        let outcome = find_sccs(
            &projection,
            &vertices,
            true,
            &SccConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(outcome.sccs.len(), 1);
        assert_eq!(outcome.sccs[0].len(), 2);
    }

    #[test]
    fn isolated_vertex_has_no_scc() {
        let mut store = GraphStore::new();
        store.add_nft(Nft::new("n1").with_owner("a")).unwrap();
        let projection = store.build_projection();
        let vertices: BTreeSet<WalletId> = ["a".to_string()].into_iter().collect();
        let outcome = find_sccs(
            &projection,
            &vertices,
            true,
            &SccConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(outcome.sccs.is_empty());
    }

    #[test]
    fn exceeds_max_vertices_errors() {
        let (projection, vertices) = two_cycle_projection();
        let config = SccConfig {
            max_vertices: 1,
            ..SccConfig::default()
        };
        let err = find_sccs(&projection, &vertices, true, &config, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::SccExceedsMaxVertices(_)));
    }
}
