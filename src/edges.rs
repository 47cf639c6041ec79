//! Shared logical-edge derivation, used by both
//! [`crate::scc_finder`] and [`crate::cycle_enumerator`] so the two never
//! disagree about what counts as an edge.

use std::collections::BTreeSet;

use crate::graph_store::Projection;
use crate::types::{NftId, WalletId};

/// True iff `from`/`to`'s mutual rejection lists are clear of each other.
fn rejection_clear(projection: &Projection, from: &WalletId, to: &WalletId) -> bool {
    !projection
        .rejected_wallets
        .get(from)
        .is_some_and(|r| r.contains(to))
        && !projection
            .rejected_wallets
            .get(to)
            .is_some_and(|r| r.contains(from))
}

fn nft_wanted_by(projection: &Projection, nft_id: &NftId, wallet: &WalletId, enable_collection_trading: bool) -> bool {
    if projection
        .rejected_nfts
        .get(wallet)
        .is_some_and(|r| r.contains(nft_id))
    {
        return false;
    }
    if projection
        .wanted
        .get(wallet)
        .is_some_and(|w| w.contains(nft_id))
    {
        return true;
    }
    if !enable_collection_trading {
        return false;
    }
    match projection.nft_collection.get(nft_id) {
        Some(collection_id) => projection
            .wanted_collections
            .get(wallet)
            .is_some_and(|c| c.contains(collection_id)),
        None => false,
    }
}

/// All NFTs `from` owns that `to` wants (directly or via collection want),
/// given clear rejection lists. Empty if there's no edge `from -> to`.
pub fn edge_nfts(
    projection: &Projection,
    from: &WalletId,
    to: &WalletId,
    enable_collection_trading: bool,
) -> Vec<NftId> {
    if from == to || !rejection_clear(projection, from, to) {
        return Vec::new();
    }
    let Some(owned) = projection.owned.get(from) else {
        return Vec::new();
    };
    owned
        .iter()
        .filter(|nft_id| nft_wanted_by(projection, nft_id, to, enable_collection_trading))
        .cloned()
        .collect()
}

/// Deterministic edge-label choice: highest `estimatedValue` first, tied
/// broken by lexicographic `nftId`, capped at `max_collection_expansion`.
pub fn capped_edge_label(
    projection: &Projection,
    from: &WalletId,
    to: &WalletId,
    enable_collection_trading: bool,
    max_collection_expansion: usize,
) -> Vec<NftId> {
    let mut nfts = edge_nfts(projection, from, to, enable_collection_trading);
    nfts.sort_by(|a, b| {
        let va = projection.nft_value.get(a).copied().unwrap_or(0.0);
        let vb = projection.nft_value.get(b).copied().unwrap_or(0.0);
        vb.partial_cmp(&va).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.cmp(b))
    });
    nfts.truncate(max_collection_expansion.max(1));
    nfts
}

/// All wallets `from` has a logical edge to, sorted.
pub fn out_neighbors(
    projection: &Projection,
    from: &WalletId,
    enable_collection_trading: bool,
) -> BTreeSet<WalletId> {
    let mut out = BTreeSet::new();
    let Some(owned) = projection.owned.get(from) else {
        return out;
    };
    for nft_id in owned {
        if let Some(wanters) = projection.want_index.get(nft_id) {
            for to in wanters {
                if to != from && rejection_clear(projection, from, to) {
                    out.insert(to.clone());
                }
            }
        }
        if enable_collection_trading {
            if let Some(collection_id) = projection.nft_collection.get(nft_id) {
                if let Some(wanters) = projection.collection_wanters.get(collection_id) {
                    for to in wanters {
                        if to != from && rejection_clear(projection, from, to) {
                            out.insert(to.clone());
                        }
                    }
                }
            }
        }
    }
    out
}

/// All wallets with a logical edge into `to` — used to build the
/// forward+reverse closure from an `AffectedSet`, sorted.
pub fn in_neighbors(
    projection: &Projection,
    to: &WalletId,
    enable_collection_trading: bool,
) -> BTreeSet<WalletId> {
    let mut into = BTreeSet::new();
    if let Some(wanted) = projection.wanted.get(to) {
        for nft_id in wanted {
            if let Some(owner) = projection.nft_owner.get(nft_id) {
                if owner != to && rejection_clear(projection, owner, to) {
                    into.insert(owner.clone());
                }
            }
        }
    }
    if enable_collection_trading {
        if let Some(collections) = projection.wanted_collections.get(to) {
            for collection_id in collections {
                let Some(members) = projection.collection_members.get(collection_id) else {
                    continue;
                };
                for nft_id in members {
                    if let Some(owner) = projection.nft_owner.get(nft_id) {
                        if owner != to && rejection_clear(projection, owner, to) {
                            into.insert(owner.clone());
                        }
                    }
                }
            }
        }
    }
    into
}
