//! External persistence contract. Opaque to the core: the
//! engine only ever calls through this trait, never touches a backing
//! store directly.

use async_trait::async_trait;

use crate::graph_store::GraphStore;
use crate::types::{GraphChange, TenantId, TradeLoop};

/// A tenant's durable state: graph, active loops, and change log. What a
/// `Store` implementation loads and saves wholesale.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct TenantSnapshot {
    pub tenant_id: TenantId,
    pub graph: GraphStore,
    pub active_loops: Vec<TradeLoop>,
    pub change_log: Vec<GraphChange>,
}

/// Persistence backend contract. Implementations decide the
/// storage medium; the engine treats failures as `StoreFailure` and marks
/// the tenant degraded without losing in-memory loop state.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load_tenant(&self, tenant_id: &TenantId) -> Result<Option<TenantSnapshot>, String>;
    async fn save_tenant(&self, snapshot: &TenantSnapshot) -> Result<(), String>;
    async fn append_change(&self, tenant_id: &TenantId, change: &GraphChange) -> Result<(), String>;
}

/// In-memory `Store` used by the demo binary and tests; doesn't survive a
/// restart, but exercises the same contract a durable backend would.
#[derive(Default)]
pub struct InMemoryStore {
    snapshots: parking_lot::RwLock<std::collections::HashMap<TenantId, TenantSnapshot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn load_tenant(&self, tenant_id: &TenantId) -> Result<Option<TenantSnapshot>, String> {
        Ok(self.snapshots.read().get(tenant_id).cloned())
    }

    async fn save_tenant(&self, snapshot: &TenantSnapshot) -> Result<(), String> {
        self.snapshots
            .write()
            .insert(snapshot.tenant_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn append_change(&self, tenant_id: &TenantId, change: &GraphChange) -> Result<(), String> {
        let mut guard = self.snapshots.write();
        let snapshot = guard.entry(tenant_id.clone()).or_insert_with(|| TenantSnapshot {
            tenant_id: tenant_id.clone(),
            ..Default::default()
        });
        snapshot.change_log.push(change.clone());
        Ok(())
    }
}

/// Filesystem-backed `Store` used in integration tests to exercise the
/// contract against real I/O, backed by a JSON file per
/// tenant under `root`.
pub struct FileStore {
    root: std::path::PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, tenant_id: &TenantId) -> std::path::PathBuf {
        self.root.join(format!("{tenant_id}.json"))
    }
}

#[async_trait]
impl Store for FileStore {
    async fn load_tenant(&self, tenant_id: &TenantId) -> Result<Option<TenantSnapshot>, String> {
        let path = self.path_for(tenant_id);
        match fs_err::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|e| e.to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn save_tenant(&self, snapshot: &TenantSnapshot) -> Result<(), String> {
        fs_err::create_dir_all(&self.root).map_err(|e| e.to_string())?;
        let contents = serde_json::to_string_pretty(snapshot).map_err(|e| e.to_string())?;
        fs_err::write(self.path_for(&snapshot.tenant_id), contents).map_err(|e| e.to_string())
    }

    async fn append_change(&self, tenant_id: &TenantId, change: &GraphChange) -> Result<(), String> {
        let mut snapshot = self
            .load_tenant(tenant_id)
            .await?
            .unwrap_or_else(|| TenantSnapshot {
                tenant_id: tenant_id.clone(),
                ..Default::default()
            });
        snapshot.change_log.push(change.clone());
        self.save_tenant(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GraphChangeKind;

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryStore::new();
        let snapshot = TenantSnapshot {
            tenant_id: "t1".to_string(),
            ..Default::default()
        };
        store.save_tenant(&snapshot).await.unwrap();
        let loaded = store.load_tenant(&"t1".to_string()).await.unwrap();
        assert!(loaded.is_some());
    }

    #[tokio::test]
    async fn file_store_round_trips_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let snapshot = TenantSnapshot {
            tenant_id: "t1".to_string(),
            ..Default::default()
        };
        store.save_tenant(&snapshot).await.unwrap();
        let loaded = store.load_tenant(&"t1".to_string()).await.unwrap().unwrap();
        assert_eq!(loaded.tenant_id, "t1");
    }

    #[tokio::test]
    async fn append_change_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let change = GraphChange {
            kind: GraphChangeKind::NftAdded,
            entity_id: "n1".to_string(),
            timestamp: chrono::Utc::now(),
            payload: serde_json::json!({}),
        };
        store.append_change(&"t1".to_string(), &change).await.unwrap();
        let loaded = store.load_tenant(&"t1".to_string()).await.unwrap().unwrap();
        assert_eq!(loaded.change_log.len(), 1);
    }
}
