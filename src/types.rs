//! Core data model: NFTs, wallets, collections, trade loops, and
//! the tagged-union `Mutation`/`GraphChange` types that replace the source
//! service's ad-hoc `Record<string, any>` payloads.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant-scoped identifiers. Kept as plain `String`s (never as back-pointers
/// or shared references) so entities stay cheap value types inside
/// [`crate::graph_store::GraphStore`]; every other component refers to them
/// by id only.
pub type TenantId = String;
pub type WalletId = String;
pub type NftId = String;
pub type CollectionId = String;
/// SHA-256 hex digest, rotation-invariant over a loop's steps.
pub type LoopId = String;

/// An addressable, unique token in a tenant's namespace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Nft {
    pub nft_id: NftId,
    pub owner_wallet_id: Option<WalletId>,
    pub collection_id: Option<CollectionId>,
    /// Non-negative estimated value. Currency is assumed uniform per tenant;
    /// cross-currency conversion is an ingestion-adapter concern.
    pub estimated_value: Option<f64>,
    pub name: Option<String>,
}

impl Nft {
    pub fn new(nft_id: impl Into<NftId>) -> Self {
        Self {
            nft_id: nft_id.into(),
            owner_wallet_id: None,
            collection_id: None,
            estimated_value: None,
            name: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<WalletId>) -> Self {
        self.owner_wallet_id = Some(owner.into());
        self
    }

    pub fn with_collection(mut self, collection: impl Into<CollectionId>) -> Self {
        self.collection_id = Some(collection.into());
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.estimated_value = Some(value);
        self
    }

    pub fn value_or_zero(&self) -> f64 {
        self.estimated_value.unwrap_or(0.0)
    }
}

/// A wallet's holdings, wants, and rejection lists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_id: WalletId,
    pub owned_nfts: BTreeSet<NftId>,
    pub wanted_nfts: BTreeSet<NftId>,
    pub wanted_collections: BTreeSet<CollectionId>,
    pub rejected_wallets: BTreeSet<WalletId>,
    pub rejected_nfts: BTreeSet<NftId>,
}

impl Wallet {
    pub fn new(wallet_id: impl Into<WalletId>) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            ..Default::default()
        }
    }
}

/// A collection, lazily populated as NFTs referencing it arrive.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub collection_id: CollectionId,
    pub name: Option<String>,
    pub floor_price: Option<f64>,
}

/// One leg of a trade loop: `from` gives `nfts` to `to`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub from: WalletId,
    pub to: WalletId,
    pub nfts: Vec<NftId>,
}

/// Component scores backing a loop's `quality_score`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopMetrics {
    pub efficiency: f64,
    pub fairness: f64,
    pub demand: f64,
    pub collection_diversity: f64,
}

/// An elementary directed cycle promoted to a scheduled barter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeLoop {
    pub id: LoopId,
    pub steps: Vec<Step>,
    pub participants: usize,
    pub quality_score: f64,
    pub metrics: LoopMetrics,
}

impl TradeLoop {
    /// All wallets that participate in this loop, in step order.
    pub fn wallets(&self) -> impl Iterator<Item = &WalletId> {
        self.steps.iter().map(|s| &s.from)
    }

    /// All NFTs referenced by any step of this loop.
    pub fn nfts(&self) -> impl Iterator<Item = &NftId> {
        self.steps.iter().flat_map(|s| s.nfts.iter())
    }
}

/// The kind of change recorded in a tenant's append-only change log.
/// Collection-scoped want mutations are logged under
/// `WantAdded`/`WantRemoved` with `payload.scope == "collection"` rather
/// than growing two more variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphChangeKind {
    NftAdded,
    NftRemoved,
    WantAdded,
    WantRemoved,
    WalletRejectionUpdated,
}

/// An append-only audit/delta-detection record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphChange {
    pub kind: GraphChangeKind,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// The set of wallets/NFTs whose cycles could change as a result of a
/// mutation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AffectedSet {
    pub wallet_ids: BTreeSet<WalletId>,
    pub nft_ids: BTreeSet<NftId>,
}

impl AffectedSet {
    pub fn is_empty(&self) -> bool {
        self.wallet_ids.is_empty() && self.nft_ids.is_empty()
    }

    pub fn merge(&mut self, other: AffectedSet) {
        self.wallet_ids.extend(other.wallet_ids);
        self.nft_ids.extend(other.nft_ids);
    }
}

/// The tagged union of mutations the engine accepts, replacing an
/// upstream's dynamically-typed mutation objects with a closed, checked
/// enum.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    AddNft(Nft),
    RemoveNft { nft_id: NftId },
    AddWant { wallet_id: WalletId, nft_id: NftId },
    RemoveWant { wallet_id: WalletId, nft_id: NftId },
    AddCollectionWant {
        wallet_id: WalletId,
        collection_id: CollectionId,
    },
    RemoveCollectionWant {
        wallet_id: WalletId,
        collection_id: CollectionId,
    },
    UpdateRejection {
        wallet_id: WalletId,
        rejected_wallets: BTreeSet<WalletId>,
        rejected_nfts: BTreeSet<NftId>,
    },
    MarkCompleted { loop_id: LoopId },
}

/// Aggregate tenant status returned from `status()`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TenantStatus {
    pub nft_count: usize,
    pub wallet_count: usize,
    pub active_loop_count: usize,
    pub pending_mutations: usize,
    pub last_updated: DateTime<Utc>,
    pub truncated: bool,
    pub degraded: bool,
}
