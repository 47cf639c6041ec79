//! `DeltaEngine`: given a mutation, computes the minimal affected
//! subgraph.

use crate::graph_store::GraphStore;
use crate::types::{AffectedSet, Mutation, NftId, TradeLoop, WalletId};

/// Computes the `AffectedSet` for a mutation that has already been applied
/// to `store`. The store must reflect post-mutation state; for removals
/// the caller passes the pre-removal record so former owners/wants can
/// still be named.
pub fn affected_set(
    store: &GraphStore,
    mutation: &Mutation,
    active_loops: &[TradeLoop],
) -> AffectedSet {
    match mutation {
        Mutation::AddNft(nft) => {
            let mut set = AffectedSet::default();
            if let Some(owner) = &nft.owner_wallet_id {
                set.wallet_ids.insert(owner.clone());
            }
            if let Some(wanters) = store.wanters_of(&nft.nft_id) {
                set.wallet_ids.extend(wanters.iter().cloned());
            }
            if let Some(collection_id) = &nft.collection_id {
                if let Some(wanters) = store.collection_members(collection_id) {
                    // members of the collection index are NFTs, not wallets;
                    // the wallets we want are those whose wanted_collections
                    // contains this collection, which GraphStore doesn't
                    // reverse-index directly, so walk wallet_ids.
                    let _ = wanters;
                }
                for wallet_id in store.wallet_ids() {
                    if let Some(wallet) = store.wallet(wallet_id) {
                        if wallet.wanted_collections.contains(collection_id) {
                            set.wallet_ids.insert(wallet_id.clone());
                        }
                    }
                }
            }
            set.nft_ids.insert(nft.nft_id.clone());
            set
        }

        Mutation::RemoveNft { nft_id } => {
            let mut set = AffectedSet::default();
            set.nft_ids.insert(nft_id.clone());
            for loop_ in active_loops {
                if loop_.nfts().any(|n| n == nft_id) {
                    set.wallet_ids.extend(loop_.wallets().cloned());
                }
            }
            set
        }

        Mutation::AddWant { wallet_id, nft_id } | Mutation::RemoveWant { wallet_id, nft_id } => {
            let mut set = AffectedSet::default();
            set.wallet_ids.insert(wallet_id.clone());
            set.nft_ids.insert(nft_id.clone());
            if let Some(owner) = store.nft(nft_id).and_then(|n| n.owner_wallet_id.clone()) {
                set.wallet_ids.insert(owner.clone());
                // wallets reachable backward from `wallet_id` in 1 hop: anyone
                // whose owned NFTs are wanted by `wallet_id`.
                if let Some(wallet) = store.wallet(wallet_id) {
                    for wanted in &wallet.wanted_nfts {
                        if let Some(o) = store.nft(wanted).and_then(|n| n.owner_wallet_id.clone()) {
                            set.wallet_ids.insert(o);
                        }
                    }
                }
            }
            if matches!(mutation, Mutation::RemoveWant { .. }) {
                for loop_ in active_loops {
                    let touches = loop_
                        .steps
                        .iter()
                        .any(|s| &s.to == wallet_id && s.nfts.contains(nft_id));
                    if touches {
                        set.wallet_ids.extend(loop_.wallets().cloned());
                    }
                }
            }
            set
        }

        Mutation::AddCollectionWant {
            wallet_id,
            collection_id,
        }
        | Mutation::RemoveCollectionWant {
            wallet_id,
            collection_id,
        } => {
            let mut set = AffectedSet::default();
            set.wallet_ids.insert(wallet_id.clone());
            if let Some(members) = store.collection_members(collection_id) {
                set.nft_ids.extend(members.iter().cloned());
                for nft_id in members {
                    if let Some(owner) = store.nft(nft_id).and_then(|n| n.owner_wallet_id.clone()) {
                        set.wallet_ids.insert(owner);
                    }
                }
            }
            set
        }

        Mutation::UpdateRejection { wallet_id, .. } => {
            let mut set = AffectedSet::default();
            set.wallet_ids.insert(wallet_id.clone());
            for loop_ in active_loops {
                if loop_.wallets().any(|w| w == wallet_id) {
                    set.wallet_ids.extend(loop_.wallets().cloned());
                }
            }
            set
        }

        Mutation::MarkCompleted { .. } => AffectedSet::default(),
    }
}

/// Convenience used by tests and the orchestrator to name a want's NFT's
/// owner, when present.
pub fn owner_of(store: &GraphStore, nft_id: &NftId) -> Option<WalletId> {
    store.nft(nft_id).and_then(|n| n.owner_wallet_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Nft;

    fn store_with_trade() -> GraphStore {
        let mut store = GraphStore::new();
        store.add_nft(Nft::new("n1").with_owner("a")).unwrap();
        store.add_nft(Nft::new("n2").with_owner("b")).unwrap();
        store.add_want(&"b".to_string(), &"n1".to_string());
        store.add_want(&"a".to_string(), &"n2".to_string());
        store
    }

    #[test]
    fn add_nft_affects_owner_and_wanters() {
        let mut store = GraphStore::new();
        store.add_want(&"b".to_string(), &"n1".to_string());
        let nft = Nft::new("n1").with_owner("a");
        store.add_nft(nft.clone()).unwrap();
        let set = affected_set(&store, &Mutation::AddNft(nft), &[]);
        assert!(set.wallet_ids.contains(&"a".to_string()));
        assert!(set.wallet_ids.contains(&"b".to_string()));
    }

    #[test]
    fn want_added_includes_owner_and_backward_hop() {
        let store = store_with_trade();
        let mutation = Mutation::AddWant {
            wallet_id: "b".to_string(),
            nft_id: "n1".to_string(),
        };
        let set = affected_set(&store, &mutation, &[]);
        assert!(set.wallet_ids.contains(&"a".to_string()));
        assert!(set.wallet_ids.contains(&"b".to_string()));
    }

    #[test]
    fn mark_completed_has_no_affected_set() {
        let store = store_with_trade();
        let mutation = Mutation::MarkCompleted {
            loop_id: "x".to_string(),
        };
        let set = affected_set(&store, &mutation, &[]);
        assert!(set.is_empty());
    }
}
