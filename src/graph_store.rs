//! `GraphStore`: per-tenant in-memory graph of NFTs, wallets,
//! ownership, and wants.

use std::collections::{hash_map::DefaultHasher, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::{Collection, CollectionId, Nft, NftId, Wallet, WalletId};

/// Per-tenant in-memory graph: NFTs, wallets, ownership, and wants.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphStore {
    nfts: HashMap<NftId, Nft>,
    wallets: HashMap<WalletId, Wallet>,
    collections: HashMap<CollectionId, Collection>,
    /// `nftId -> set of walletId` who want it. Invariant:
    /// `w ∈ want_index[n] ⇔ n ∈ wallets[w].wanted_nfts`.
    want_index: HashMap<NftId, BTreeSet<WalletId>>,
    collection_index: HashMap<CollectionId, BTreeSet<NftId>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn wallet_mut(&mut self, wallet_id: &WalletId) -> &mut Wallet {
        self.wallets
            .entry(wallet_id.clone())
            .or_insert_with(|| Wallet::new(wallet_id.clone()))
    }

    /// Adds or replaces an NFT. Fails with `Conflict` if the id is already
    /// owned by a *different* wallet.
    pub fn add_nft(&mut self, nft: Nft) -> EngineResult<()> {
        if let Some(existing) = self.nfts.get(&nft.nft_id) {
            if let (Some(existing_owner), Some(new_owner)) =
                (&existing.owner_wallet_id, &nft.owner_wallet_id)
            {
                if existing_owner != new_owner {
                    return Err(EngineError::Conflict(format!(
                        "nft {} already owned by {existing_owner}",
                        nft.nft_id
                    )));
                }
            }
            if let Some(old_owner) = &existing.owner_wallet_id {
                if nft.owner_wallet_id.as_ref() != Some(old_owner) {
                    self.wallet_mut(old_owner).owned_nfts.remove(&existing.nft_id);
                }
            }
            if let Some(old_collection) = &existing.collection_id {
                if nft.collection_id.as_ref() != Some(old_collection) {
                    if let Some(members) = self.collection_index.get_mut(old_collection) {
                        members.remove(&existing.nft_id);
                    }
                }
            }
        }

        if let Some(owner) = &nft.owner_wallet_id {
            self.wallet_mut(owner).owned_nfts.insert(nft.nft_id.clone());
        }
        if let Some(collection_id) = &nft.collection_id {
            self.collections
                .entry(collection_id.clone())
                .or_insert_with(|| Collection {
                    collection_id: collection_id.clone(),
                    name: None,
                    floor_price: None,
                });
            self.collection_index
                .entry(collection_id.clone())
                .or_default()
                .insert(nft.nft_id.clone());
        }

        self.nfts.insert(nft.nft_id.clone(), nft);
        Ok(())
    }

    /// Removes an NFT, detaching it from its owner and collection index.
    /// Returns the removed record, if any.
    pub fn remove_nft(&mut self, nft_id: &NftId) -> Option<Nft> {
        let nft = self.nfts.remove(nft_id)?;
        if let Some(owner) = &nft.owner_wallet_id {
            if let Some(wallet) = self.wallets.get_mut(owner) {
                wallet.owned_nfts.remove(nft_id);
            }
        }
        if let Some(collection_id) = &nft.collection_id {
            if let Some(members) = self.collection_index.get_mut(collection_id) {
                members.remove(nft_id);
            }
        }
        Some(nft)
    }

    /// Adds a want. Silently dropped (no self-trade) if the wallet already
    /// owns the NFT.
    pub fn add_want(&mut self, wallet_id: &WalletId, nft_id: &NftId) {
        if self
            .nfts
            .get(nft_id)
            .and_then(|n| n.owner_wallet_id.as_ref())
            == Some(wallet_id)
        {
            return;
        }
        self.wallet_mut(wallet_id).wanted_nfts.insert(nft_id.clone());
        self.want_index
            .entry(nft_id.clone())
            .or_default()
            .insert(wallet_id.clone());
    }

    pub fn remove_want(&mut self, wallet_id: &WalletId, nft_id: &NftId) {
        if let Some(wallet) = self.wallets.get_mut(wallet_id) {
            wallet.wanted_nfts.remove(nft_id);
        }
        if let Some(wanters) = self.want_index.get_mut(nft_id) {
            wanters.remove(wallet_id);
        }
    }

    pub fn add_collection_want(&mut self, wallet_id: &WalletId, collection_id: &CollectionId) {
        self.wallet_mut(wallet_id)
            .wanted_collections
            .insert(collection_id.clone());
    }

    pub fn remove_collection_want(&mut self, wallet_id: &WalletId, collection_id: &CollectionId) {
        if let Some(wallet) = self.wallets.get_mut(wallet_id) {
            wallet.wanted_collections.remove(collection_id);
        }
    }

    /// Replaces a wallet's rejection lists wholesale.
    pub fn update_rejections(
        &mut self,
        wallet_id: &WalletId,
        rejected_wallets: BTreeSet<WalletId>,
        rejected_nfts: BTreeSet<NftId>,
    ) {
        let wallet = self.wallet_mut(wallet_id);
        wallet.rejected_wallets = rejected_wallets;
        wallet.rejected_nfts = rejected_nfts;
    }

    pub fn wallet(&self, wallet_id: &WalletId) -> Option<&Wallet> {
        self.wallets.get(wallet_id)
    }

    pub fn nft(&self, nft_id: &NftId) -> Option<&Nft> {
        self.nfts.get(nft_id)
    }

    pub fn wanters_of(&self, nft_id: &NftId) -> Option<&BTreeSet<WalletId>> {
        self.want_index.get(nft_id)
    }

    pub fn collection_members(&self, collection_id: &CollectionId) -> Option<&BTreeSet<NftId>> {
        self.collection_index.get(collection_id)
    }

    pub fn wallet_ids(&self) -> impl Iterator<Item = &WalletId> {
        self.wallets.keys()
    }

    pub fn nft_count(&self) -> usize {
        self.nfts.len()
    }

    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    /// An immutable, defensively-copied view handle for the enumerator.
    /// Mutation of the live store afterward never affects an already-taken
    /// projection, since the tenant's mutation pipeline is serialized and
    /// every read here is a full value copy out of that single writer.
    pub fn build_projection(&self) -> Projection {
        let mut wallets = BTreeSet::new();
        let mut owned = HashMap::new();
        let mut wanted = HashMap::new();
        let mut wanted_collections = HashMap::new();
        let mut rejected_wallets = HashMap::new();
        let mut rejected_nfts = HashMap::new();
        let mut collection_wanters: HashMap<CollectionId, BTreeSet<WalletId>> = HashMap::new();

        for (wallet_id, wallet) in &self.wallets {
            wallets.insert(wallet_id.clone());
            owned.insert(wallet_id.clone(), wallet.owned_nfts.clone());
            wanted.insert(wallet_id.clone(), wallet.wanted_nfts.clone());
            wanted_collections.insert(wallet_id.clone(), wallet.wanted_collections.clone());
            rejected_wallets.insert(wallet_id.clone(), wallet.rejected_wallets.clone());
            rejected_nfts.insert(wallet_id.clone(), wallet.rejected_nfts.clone());
            for collection_id in &wallet.wanted_collections {
                collection_wanters
                    .entry(collection_id.clone())
                    .or_default()
                    .insert(wallet_id.clone());
            }
        }

        let mut nft_owner = HashMap::new();
        let mut nft_collection = HashMap::new();
        let mut nft_value = HashMap::new();
        for (nft_id, nft) in &self.nfts {
            if let Some(owner) = &nft.owner_wallet_id {
                nft_owner.insert(nft_id.clone(), owner.clone());
            }
            if let Some(collection_id) = &nft.collection_id {
                nft_collection.insert(nft_id.clone(), collection_id.clone());
            }
            nft_value.insert(nft_id.clone(), nft.value_or_zero());
        }

        Projection {
            wallets,
            owned,
            wanted,
            wanted_collections,
            want_index: self.want_index.clone(),
            collection_wanters,
            collection_members: self.collection_index.clone(),
            nft_owner,
            nft_collection,
            nft_value,
            rejected_wallets,
            rejected_nfts,
        }
    }

    /// 64-bit hash of `{sorted walletIds, counts of owned/wanted per wallet,
    /// global ownership/want counts}`.
    pub fn fingerprint(&self) -> u64 {
        let mut wallet_ids: Vec<&WalletId> = self.wallets.keys().collect();
        wallet_ids.sort();
        let mut hasher = DefaultHasher::new();
        wallet_ids.len().hash(&mut hasher);
        for wallet_id in wallet_ids {
            let wallet = &self.wallets[wallet_id];
            wallet_id.hash(&mut hasher);
            wallet.owned_nfts.len().hash(&mut hasher);
            wallet.wanted_nfts.len().hash(&mut hasher);
            wallet.wanted_collections.len().hash(&mut hasher);
        }
        self.nfts.len().hash(&mut hasher);
        self.want_index.len().hash(&mut hasher);
        hasher.finish()
    }
}

/// The derived `(wallets, ownership, wantIndex)` structure consumed by
/// [`crate::scc_finder::find_sccs`] and
/// [`crate::cycle_enumerator::enumerate_cycles`]. Immutable once built;
/// reverse indices (`want_index`, `collection_wanters`) let edge discovery
/// avoid materializing an O(wallets²) adjacency matrix.
#[derive(Clone, Debug, Default)]
pub struct Projection {
    pub wallets: BTreeSet<WalletId>,
    pub owned: HashMap<WalletId, BTreeSet<NftId>>,
    pub wanted: HashMap<WalletId, BTreeSet<NftId>>,
    pub wanted_collections: HashMap<WalletId, BTreeSet<CollectionId>>,
    pub want_index: HashMap<NftId, BTreeSet<WalletId>>,
    pub collection_wanters: HashMap<CollectionId, BTreeSet<WalletId>>,
    pub collection_members: HashMap<CollectionId, BTreeSet<NftId>>,
    pub nft_owner: HashMap<NftId, WalletId>,
    pub nft_collection: HashMap<NftId, CollectionId>,
    pub nft_value: HashMap<NftId, f64>,
    pub rejected_wallets: HashMap<WalletId, BTreeSet<WalletId>>,
    pub rejected_nfts: HashMap<WalletId, BTreeSet<NftId>>,
}

impl Projection {
    pub fn want_count(&self, nft_id: &NftId) -> usize {
        self.want_index.get(nft_id).map_or(0, |s| s.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_nft_conflict_rejected() {
        let mut store = GraphStore::new();
        store.add_nft(Nft::new("n1").with_owner("a")).unwrap();
        let err = store.add_nft(Nft::new("n1").with_owner("b")).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[test]
    fn self_trade_want_is_dropped() {
        let mut store = GraphStore::new();
        store.add_nft(Nft::new("n1").with_owner("a")).unwrap();
        store.add_want(&"a".to_string(), &"n1".to_string());
        assert!(store.wallet(&"a".to_string()).unwrap().wanted_nfts.is_empty());
        assert!(store.wanters_of(&"n1".to_string()).is_none());
    }

    #[test]
    fn want_index_mirrors_wallet_wants() {
        let mut store = GraphStore::new();
        store.add_nft(Nft::new("n1").with_owner("a")).unwrap();
        store.add_want(&"b".to_string(), &"n1".to_string());
        assert!(store
            .wanters_of(&"n1".to_string())
            .unwrap()
            .contains(&"b".to_string()));
        store.remove_want(&"b".to_string(), &"n1".to_string());
        assert!(store.wanters_of(&"n1".to_string()).unwrap().is_empty());
    }

    #[test]
    fn fingerprint_changes_with_graph() {
        let mut store = GraphStore::new();
        let fp0 = store.fingerprint();
        store.add_nft(Nft::new("n1").with_owner("a")).unwrap();
        let fp1 = store.fingerprint();
        assert_ne!(fp0, fp1);
    }
}
