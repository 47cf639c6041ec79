//! Error taxonomy shared by every component.
//!
//! `Truncated` and `Cancelled` are carried as ordinary variants here so that
//! `status()` and internal logging can report them uniformly, but
//! [`crate::orchestrator::DiscoveryOrchestrator`] and
//! [`crate::tenant_runtime::TenantRuntime`] never let either one escape
//! through `submit()` as a caller-visible `Err` — they're folded into the
//! pipeline outcome instead.

use thiserror::Error;

/// The full error taxonomy for the engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Caller-supplied data failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No tenant is registered under the given id.
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    /// A mutation conflicts with existing graph state (e.g. an NFT already
    /// owned by a different wallet).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The tenant's mutation queue is full; the caller may retry later.
    #[error("tenant busy: {0}")]
    Busy(String),

    /// A bounded search (SCC discovery or cycle enumeration) ran past its
    /// vertex limit and was skipped rather than attempted.
    #[error("induced subgraph exceeds configured vertex limit: {0}")]
    SccExceedsMaxVertices(String),

    /// Webhook delivery failed after exhausting the retry policy.
    #[error("webhook delivery failed: {0}")]
    TransportFailure(String),

    /// The persistence backend failed; the tenant is marked degraded until
    /// a later save succeeds. No in-memory loop state is lost.
    #[error("store failure: {0}")]
    StoreFailure(String),

    /// An internal invariant was violated. Isolated to the offending
    /// tenant; other tenants keep running.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Marker returned internally when a cooperative cancellation token fired
/// mid-operation. Never surfaced to callers of `submit()`; swallowed at the
/// `TenantRuntime` boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;
