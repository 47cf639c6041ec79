//! `DiscoveryOrchestrator`: the event router. Runs the full
//! mutation → delta → SCC → cycles → score → registry → webhook pipeline.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::TransformationCache;
use crate::canonical::loop_id;
use crate::config::TenantConfig;
use crate::cycle_enumerator::{build_steps, enumerate_cycles, Budget, CycleConfig};
use crate::delta_engine::affected_set;
use crate::edges::{in_neighbors, out_neighbors};
use crate::error::{EngineError, EngineResult};
use crate::graph_store::{GraphStore, Projection};
use crate::registry::{DiscoveryEvent, LoopRegistry};
use crate::scc_finder::{find_sccs, SccConfig};
use crate::scorer;
use crate::types::{GraphChange, GraphChangeKind, Mutation, TenantId, TradeLoop, WalletId};
use crate::webhook::WebhookDispatcher;

/// Rejects a mutation that would push a wallet or collection past the
/// tenant's configured security limits, before it ever reaches `GraphStore`.
fn enforce_security(store: &GraphStore, config: &TenantConfig, mutation: &Mutation) -> EngineResult<()> {
    let security = &config.security;
    match mutation {
        Mutation::AddNft(nft) => {
            if let Some(collection_id) = &nft.collection_id {
                if security.blacklisted_collections.contains(collection_id) {
                    return Err(EngineError::InvalidInput(format!(
                        "collection {collection_id} is blacklisted for this tenant"
                    )));
                }
            }
            if let Some(owner) = &nft.owner_wallet_id {
                let already_owned = store.wallet(owner).is_some_and(|w| w.owned_nfts.contains(&nft.nft_id));
                let owned_count = store.wallet(owner).map(|w| w.owned_nfts.len()).unwrap_or(0);
                if !already_owned && owned_count >= security.max_nfts_per_wallet {
                    return Err(EngineError::InvalidInput(format!(
                        "wallet {owner} already owns the configured maximum of {} nfts",
                        security.max_nfts_per_wallet
                    )));
                }
            }
        }
        Mutation::AddWant { wallet_id, nft_id } => {
            let already_wanted = store.wallet(wallet_id).is_some_and(|w| w.wanted_nfts.contains(nft_id));
            let want_count = store
                .wallet(wallet_id)
                .map(|w| w.wanted_nfts.len() + w.wanted_collections.len())
                .unwrap_or(0);
            if !already_wanted && want_count >= security.max_wants_per_wallet {
                return Err(EngineError::InvalidInput(format!(
                    "wallet {wallet_id} already has the configured maximum of {} wants",
                    security.max_wants_per_wallet
                )));
            }
        }
        Mutation::AddCollectionWant { wallet_id, collection_id } => {
            if security.blacklisted_collections.contains(collection_id) {
                return Err(EngineError::InvalidInput(format!(
                    "collection {collection_id} is blacklisted for this tenant"
                )));
            }
            let already_wanted = store.wallet(wallet_id).is_some_and(|w| w.wanted_collections.contains(collection_id));
            let want_count = store
                .wallet(wallet_id)
                .map(|w| w.wanted_nfts.len() + w.wanted_collections.len())
                .unwrap_or(0);
            if !already_wanted && want_count >= security.max_wants_per_wallet {
                return Err(EngineError::InvalidInput(format!(
                    "wallet {wallet_id} already has the configured maximum of {} wants",
                    security.max_wants_per_wallet
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Step 1: applies a graph-shaped mutation to the store and produces the
/// append-only audit record.
/// `MarkCompleted` is not a graph mutation and is handled by the caller.
fn apply_mutation(store: &mut GraphStore, config: &TenantConfig, mutation: &Mutation) -> EngineResult<Option<GraphChange>> {
    enforce_security(store, config, mutation)?;
    let now = Utc::now();
    let change = match mutation {
        Mutation::AddNft(nft) => {
            store.add_nft(nft.clone())?;
            Some(GraphChange {
                kind: GraphChangeKind::NftAdded,
                entity_id: nft.nft_id.clone(),
                timestamp: now,
                payload: serde_json::to_value(nft).map_err(|e| EngineError::Internal(e.to_string()))?,
            })
        }
        Mutation::RemoveNft { nft_id } => {
            let removed = store.remove_nft(nft_id);
            Some(GraphChange {
                kind: GraphChangeKind::NftRemoved,
                entity_id: nft_id.clone(),
                timestamp: now,
                payload: serde_json::to_value(&removed).map_err(|e| EngineError::Internal(e.to_string()))?,
            })
        }
        Mutation::AddWant { wallet_id, nft_id } => {
            store.add_want(wallet_id, nft_id);
            Some(GraphChange {
                kind: GraphChangeKind::WantAdded,
                entity_id: nft_id.clone(),
                timestamp: now,
                payload: serde_json::json!({"walletId": wallet_id, "nftId": nft_id, "scope": "nft"}),
            })
        }
        Mutation::RemoveWant { wallet_id, nft_id } => {
            store.remove_want(wallet_id, nft_id);
            Some(GraphChange {
                kind: GraphChangeKind::WantRemoved,
                entity_id: nft_id.clone(),
                timestamp: now,
                payload: serde_json::json!({"walletId": wallet_id, "nftId": nft_id, "scope": "nft"}),
            })
        }
        Mutation::AddCollectionWant { wallet_id, collection_id } => {
            store.add_collection_want(wallet_id, collection_id);
            Some(GraphChange {
                kind: GraphChangeKind::WantAdded,
                entity_id: collection_id.clone(),
                timestamp: now,
                payload: serde_json::json!({"walletId": wallet_id, "collectionId": collection_id, "scope": "collection"}),
            })
        }
        Mutation::RemoveCollectionWant { wallet_id, collection_id } => {
            store.remove_collection_want(wallet_id, collection_id);
            Some(GraphChange {
                kind: GraphChangeKind::WantRemoved,
                entity_id: collection_id.clone(),
                timestamp: now,
                payload: serde_json::json!({"walletId": wallet_id, "collectionId": collection_id, "scope": "collection"}),
            })
        }
        Mutation::UpdateRejection {
            wallet_id,
            rejected_wallets,
            rejected_nfts,
        } => {
            store.update_rejections(wallet_id, rejected_wallets.clone(), rejected_nfts.clone());
            Some(GraphChange {
                kind: GraphChangeKind::WalletRejectionUpdated,
                entity_id: wallet_id.clone(),
                timestamp: now,
                payload: serde_json::json!({"rejectedWallets": rejected_wallets, "rejectedNfts": rejected_nfts}),
            })
        }
        Mutation::MarkCompleted { .. } => None,
    };
    Ok(change)
}

/// Forward+reverse closure of `seed`, up to `max_depth` hops.
fn closure(
    projection: &Projection,
    seed: &BTreeSet<WalletId>,
    enable_collection_trading: bool,
    max_depth: usize,
) -> BTreeSet<WalletId> {
    let mut visited: BTreeSet<WalletId> = seed.clone();
    let mut frontier: Vec<WalletId> = seed.iter().cloned().collect();
    for _ in 0..max_depth {
        let mut next = Vec::new();
        for v in &frontier {
            let neighbors = out_neighbors(projection, v, enable_collection_trading)
                .into_iter()
                .chain(in_neighbors(projection, v, enable_collection_trading));
            for w in neighbors {
                if visited.insert(w.clone()) {
                    next.push(w);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    visited
}

/// What step 1 (apply mutation) + the cache/fingerprint lookup hand off to
/// the async portion of the pipeline. Computed entirely synchronously so
/// the caller (`TenantRuntime`) never has to hold a lock on `GraphStore`
/// across an `.await`.
pub enum Prepared {
    /// `MarkCompleted`: resolved entirely against the registry, no graph
    /// mutation or search involved.
    Completed(Vec<DiscoveryEvent>),
    /// The mutation was applied but nothing depends on it (empty
    /// `AffectedSet`) — nothing further to search.
    NoOp { change: Option<GraphChange> },
    /// A search is needed: the projection to search over, the set it must
    /// intersect, and the graph-mutation audit record.
    Search {
        projection: Arc<Projection>,
        affected: crate::types::AffectedSet,
        change: Option<GraphChange>,
    },
}

/// Step 1 plus the `TransformationCache` lookup.
/// Takes `&mut GraphStore` and returns before any `.await` is needed, so
/// the caller's lock guard never has to cross an await point.
pub fn prepare(
    tenant_id: &TenantId,
    store: &mut GraphStore,
    cache: &TransformationCache,
    registry: &LoopRegistry,
    config: &TenantConfig,
    mutation: &Mutation,
) -> EngineResult<Prepared> {
    if let Mutation::MarkCompleted { loop_id } = mutation {
        let events: Vec<DiscoveryEvent> = registry.mark_completed(loop_id).into_iter().collect();
        return Ok(Prepared::Completed(events));
    }

    debug!(%tenant_id, ?mutation, "orchestrator: applying mutation");
    let change = apply_mutation(store, config, mutation)?;
    cache.invalidate_tenant(tenant_id);

    let active_loops = registry.all();
    let affected = affected_set(store, mutation, &active_loops);
    if affected.is_empty() {
        return Ok(Prepared::NoOp { change });
    }

    let fingerprint = store.fingerprint();
    let projection = match cache.get(tenant_id, fingerprint) {
        Some(projection) => projection,
        None => {
            let projection = store.build_projection();
            cache.insert(tenant_id, fingerprint, projection.clone());
            projection
        }
    };

    Ok(Prepared::Search {
        projection: Arc::new(projection),
        affected,
        change,
    })
}

/// Steps 5–9 of the discovery pipeline, run without touching `GraphStore`
/// (everything it needs is in `projection`, already a deep, immutable
/// copy).
pub async fn discover(
    tenant_id: &TenantId,
    projection: Arc<Projection>,
    affected: crate::types::AffectedSet,
    registry: &LoopRegistry,
    dispatcher: &WebhookDispatcher,
    config: &TenantConfig,
    cancellation: &CancellationToken,
) -> EngineResult<(Vec<DiscoveryEvent>, bool)> {
    let closure_vertices = closure(
        &projection,
        &affected.wallet_ids,
        config.enable_collection_trading,
        config.max_depth,
    );

    let scc_config = SccConfig {
        max_vertices: config.max_vertices,
        timeout: config.scc_timeout,
        batch_log_threshold: config.max_vertices,
    };
    let scc_outcome = match find_sccs(
        &projection,
        &closure_vertices,
        config.enable_collection_trading,
        &scc_config,
        cancellation,
    ) {
        Ok(outcome) => outcome,
        Err(EngineError::SccExceedsMaxVertices(detail)) => {
            warn!(%tenant_id, detail, "orchestrator: scc skipped, induced subgraph too large");
            return Ok((Vec::new(), true));
        }
        Err(other) => return Err(other),
    };

    let touching_sccs: Vec<BTreeSet<WalletId>> = scc_outcome
        .sccs
        .into_iter()
        .map(|scc| scc.into_iter().collect::<BTreeSet<_>>())
        .filter(|scc| scc.iter().any(|v| affected.wallet_ids.contains(v)))
        .collect();

    let cycle_config = CycleConfig {
        max_depth: config.max_depth,
        max_cycles_per_scc: config.max_loops_per_request,
        global_timeout: config.enumerator_timeout,
        max_collection_expansion: config.max_collection_expansion,
    };
    let budget = Budget::new(config.max_loops_per_request, config.enumerator_timeout, cancellation.clone());
    let permits = Arc::new(Semaphore::new(config.scc_concurrency.max(1)));

    let mut join_set = tokio::task::JoinSet::new();
    for scc in touching_sccs {
        let projection = projection.clone();
        let cycle_config = cycle_config.clone();
        let budget = budget.clone();
        let permits = permits.clone();
        let enable_collection_trading = config.enable_collection_trading;
        join_set.spawn(async move {
            let _permit = permits.acquire_owned().await.expect("semaphore never closed");
            tokio::task::spawn_blocking(move || {
                enumerate_cycles(&projection, &scc, enable_collection_trading, &cycle_config, &budget)
            })
            .await
            .expect("enumerator task panicked")
        });
    }

    let mut truncated = scc_outcome.truncated;
    let mut candidates: Vec<TradeLoop> = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        let outcome = joined.map_err(|e| EngineError::Internal(e.to_string()))?;
        if outcome.stop_reason.is_some() {
            truncated = true;
        }
        for cycle in outcome.cycles {
            let Some(steps) = build_steps(
                &projection,
                &cycle,
                config.enable_collection_trading,
                config.max_collection_expansion,
            ) else {
                continue;
            };
            let (quality_score, metrics) = scorer::score(&steps, &projection);
            if quality_score < config.min_score {
                continue;
            }
            let id = loop_id(&steps);
            candidates.push(TradeLoop {
                id,
                participants: steps.len(),
                steps,
                quality_score,
                metrics,
            });
        }
    }

    if truncated {
        info!(%tenant_id, "orchestrator: discovery pass truncated by budget or vertex limit");
    }

    let events = registry.reconcile(candidates, &affected);
    for event in &events {
        dispatcher.enqueue(event.clone()).await;
    }

    Ok((events, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::store::InMemoryStore;
    use crate::types::Nft;
    use crate::webhook::{Transport, WebhookConfig};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        async fn send(
            &self,
            _url: &str,
            _headers: Vec<(&'static str, String)>,
            _body: Vec<u8>,
            _timeout: Duration,
        ) -> Result<u16, String> {
            Ok(200)
        }
    }

    fn dispatcher() -> WebhookDispatcher {
        WebhookDispatcher::spawn(
            WebhookConfig {
                url: "http://example.invalid".to_string(),
                secret: "s".to_string(),
                enabled: false,
            },
            Arc::new(NoopTransport),
            "t1".to_string(),
            "Tenant One".to_string(),
        )
    }

    async fn run_once(
        tenant_id: &TenantId,
        store: &mut GraphStore,
        cache: &TransformationCache,
        registry: &LoopRegistry,
        dispatcher: &WebhookDispatcher,
        config: &TenantConfig,
        mutation: Mutation,
        cancellation: &CancellationToken,
    ) -> (Vec<DiscoveryEvent>, bool) {
        match prepare(tenant_id, store, cache, registry, config, &mutation).unwrap() {
            Prepared::Completed(events) => (events, false),
            Prepared::NoOp { .. } => (Vec::new(), false),
            Prepared::Search { projection, affected, .. } => {
                discover(tenant_id, projection, affected, registry, dispatcher, config, cancellation)
                    .await
                    .unwrap()
            }
        }
    }

    #[tokio::test]
    async fn two_party_direct_trade_discovers_one_loop() {
        let _ = InMemoryStore::new();
        let mut store = GraphStore::new();
        let cache = TransformationCache::new(CacheConfig::default());
        let registry = LoopRegistry::new();
        let dispatcher = dispatcher();
        let config = TenantConfig::default();
        let cancellation = CancellationToken::new();
        let tenant_id = "t1".to_string();

        store.add_nft(Nft::new("n1").with_owner("a")).unwrap();
        store.add_nft(Nft::new("n2").with_owner("b")).unwrap();

        let (events_a, _) = run_once(
            &tenant_id,
            &mut store,
            &cache,
            &registry,
            &dispatcher,
            &config,
            Mutation::AddWant {
                wallet_id: "b".to_string(),
                nft_id: "n1".to_string(),
            },
            &cancellation,
        )
        .await;
        assert!(events_a.is_empty());

        let (events_b, _) = run_once(
            &tenant_id,
            &mut store,
            &cache,
            &registry,
            &dispatcher,
            &config,
            Mutation::AddWant {
                wallet_id: "a".to_string(),
                nft_id: "n2".to_string(),
            },
            &cancellation,
        )
        .await;

        assert_eq!(registry.len(), 1);
        assert!(matches!(events_b.first(), Some(DiscoveryEvent::LoopDiscovered(_))));
    }

    #[test]
    fn blacklisted_collection_rejects_add_nft() {
        let store = GraphStore::new();
        let mut config = TenantConfig::default();
        config.security.blacklisted_collections = vec!["banned".to_string()];

        let nft = Nft::new("n1").with_owner("a").with_collection("banned");
        let err = enforce_security(&store, &config, &Mutation::AddNft(nft)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn max_nfts_per_wallet_rejects_once_full() {
        let mut store = GraphStore::new();
        store.add_nft(Nft::new("n1").with_owner("a")).unwrap();
        let mut config = TenantConfig::default();
        config.security.max_nfts_per_wallet = 1;

        let err = enforce_security(&store, &config, &Mutation::AddNft(Nft::new("n2").with_owner("a"))).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        // Replacing the wallet's existing NFT (same id) is not a net-new addition.
        enforce_security(&store, &config, &Mutation::AddNft(Nft::new("n1").with_owner("a"))).unwrap();
    }

    #[test]
    fn max_wants_per_wallet_rejects_once_full() {
        let mut store = GraphStore::new();
        store.add_want(&"a".to_string(), &"n1".to_string());
        let mut config = TenantConfig::default();
        config.security.max_wants_per_wallet = 1;

        let err = enforce_security(
            &store,
            &config,
            &Mutation::AddWant {
                wallet_id: "a".to_string(),
                nft_id: "n2".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        // Re-wanting the same NFT doesn't consume another slot.
        enforce_security(
            &store,
            &config,
            &Mutation::AddWant {
                wallet_id: "a".to_string(),
                nft_id: "n1".to_string(),
            },
        )
        .unwrap();
    }

    #[test]
    fn blacklisted_collection_rejects_collection_want() {
        let store = GraphStore::new();
        let mut config = TenantConfig::default();
        config.security.blacklisted_collections = vec!["banned".to_string()];

        let err = enforce_security(
            &store,
            &config,
            &Mutation::AddCollectionWant {
                wallet_id: "a".to_string(),
                collection_id: "banned".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
}
