//! `WebhookDispatcher`: signs and delivers `trade_loop_*` events
//! through a transport-agnostic retry loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::registry::DiscoveryEvent;
use crate::types::{LoopId, TenantId, TradeLoop};

type HmacSha256 = Hmac<Sha256>;

const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(15),
];
const MAX_ATTEMPTS: usize = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RING_CAPACITY: usize = 1000;

/// Hands the signed HTTP request to whatever carries it out. Kept
/// transport-agnostic so tests can swap in a scripted double.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        url: &str,
        headers: Vec<(&'static str, String)>,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<u16, String>;
}

/// Production transport: a plain `reqwest` POST carrying the signed
/// payload and its HMAC header.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        url: &str,
        headers: Vec<(&'static str, String)>,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<u16, String> {
        let mut request = self.client.post(url).timeout(timeout).body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        Ok(response.status().as_u16())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TenantRef {
    pub id: TenantId,
    pub name: String,
}

/// Bit-exact webhook payload shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: &'static str,
    pub timestamp: DateTime<Utc>,
    pub tenant: TenantRef,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Success,
    Retrying,
    MaxRetries,
}

#[derive(Clone, Debug)]
pub struct DeliveryAttempt {
    pub loop_id: LoopId,
    pub event: &'static str,
    pub attempt: usize,
    pub status: DeliveryStatus,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

fn event_name(event: &DiscoveryEvent) -> &'static str {
    match event {
        DiscoveryEvent::LoopDiscovered(_) => "trade_loop_discovered",
        DiscoveryEvent::LoopInvalidated { .. } => "trade_loop_invalidated",
        DiscoveryEvent::LoopCompleted(_) => "trade_loop_completed",
    }
}

fn event_loop(event: &DiscoveryEvent) -> &TradeLoop {
    match event {
        DiscoveryEvent::LoopDiscovered(l) => l,
        DiscoveryEvent::LoopInvalidated { loop_, .. } => loop_,
        DiscoveryEvent::LoopCompleted(l) => l,
    }
}

fn event_data(event: &DiscoveryEvent) -> serde_json::Value {
    let loop_ = event_loop(event);
    let loop_json = serde_json::json!({
        "id": loop_.id,
        "steps": loop_.steps.iter().map(|s| serde_json::json!({
            "from": s.from,
            "to": s.to,
            "nfts": s.nfts,
        })).collect::<Vec<_>>(),
        "participants": loop_.participants,
        "qualityScore": loop_.quality_score,
        "metrics": {
            "efficiency": loop_.metrics.efficiency,
            "fairness": loop_.metrics.fairness,
            "demand": loop_.metrics.demand,
            "collectionDiversity": loop_.metrics.collection_diversity,
        },
    });
    match event {
        DiscoveryEvent::LoopInvalidated { reason, .. } => {
            serde_json::json!({ "loop": loop_json, "trigger": reason })
        }
        _ => serde_json::json!({ "loop": loop_json, "trigger": "graph_mutation" }),
    }
}

fn sign(secret: &str, canonical_json: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(canonical_json.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub url: String,
    pub secret: String,
    pub enabled: bool,
}

/// Per-tenant dispatcher: an internal queue plus a worker loop that signs,
/// sends, and retries each event on the fixed [1s, 5s, 15s] schedule.
pub struct WebhookDispatcher {
    sender: Mutex<Option<mpsc::Sender<DiscoveryEvent>>>,
    deliveries: Arc<Mutex<VecDeque<DeliveryAttempt>>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WebhookDispatcher {
    pub fn spawn(
        config: WebhookConfig,
        transport: Arc<dyn Transport>,
        tenant_id: TenantId,
        tenant_name: String,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<DiscoveryEvent>(1024);
        let deliveries = Arc::new(Mutex::new(VecDeque::with_capacity(DEFAULT_RING_CAPACITY)));
        let worker_deliveries = deliveries.clone();

        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if !config.enabled {
                    continue;
                }
                deliver_with_retries(&config, transport.as_ref(), &tenant_id, &tenant_name, event, &worker_deliveries)
                    .await;
            }
        });

        Self {
            sender: Mutex::new(Some(sender)),
            deliveries,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueues an event for delivery. Never blocks the mutation pipeline
    /// on network I/O — delivery happens on the dispatcher's own task.
    pub async fn enqueue(&self, event: DiscoveryEvent) {
        let sender = self.sender.lock().clone();
        match sender {
            Some(sender) if sender.send(event).await.is_ok() => {}
            Some(_) => error!("webhook_dispatcher: worker task gone, dropping event"),
            None => error!("webhook_dispatcher: dispatcher shut down, dropping event"),
        }
    }

    pub fn recent_deliveries(&self) -> Vec<DeliveryAttempt> {
        self.deliveries.lock().iter().cloned().collect()
    }

    /// Closes the queue and waits for the worker to finish delivering
    /// whatever was already enqueued. Idempotent — a second call is a no-op.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn deliver_with_retries(
    config: &WebhookConfig,
    transport: &dyn Transport,
    tenant_id: &TenantId,
    tenant_name: &str,
    event: DiscoveryEvent,
    deliveries: &Mutex<VecDeque<DeliveryAttempt>>,
) {
    let event_kind = event_name(&event);
    let loop_id = event_loop(&event).id.clone();
    let data = event_data(&event);
    let timestamp = Utc::now();
    let tenant = TenantRef {
        id: tenant_id.clone(),
        name: tenant_name.to_string(),
    };

    let unsigned = WebhookPayload {
        event: event_kind,
        timestamp,
        tenant: tenant.clone(),
        data: data.clone(),
        signature: None,
    };
    let canonical = serde_json::to_string(&unsigned).expect("payload is always serializable");
    let signature = sign(&config.secret, &canonical);

    let signed = WebhookPayload {
        event: event_kind,
        timestamp,
        tenant,
        data,
        signature: Some(signature.clone()),
    };
    let body = serde_json::to_vec(&signed).expect("payload is always serializable");

    for attempt in 1..=MAX_ATTEMPTS {
        let headers = vec![
            ("X-Event", event_kind.to_string()),
            ("X-Tenant", tenant_id.clone()),
            ("X-Signature", signature.clone()),
            ("X-Timestamp", timestamp.to_rfc3339()),
            ("Content-Type", "application/json".to_string()),
        ];

        let result = transport
            .send(&config.url, headers, body.clone(), REQUEST_TIMEOUT)
            .await;

        let (status, detail) = match &result {
            Ok(code) => (Some(*code), None),
            Err(e) => (None, Some(e.clone())),
        };
        let success = matches!(status, Some(code) if (200..300).contains(&code));

        if success {
            info!(%loop_id, event = event_kind, attempt, "webhook_dispatcher: delivered");
            record(deliveries, DeliveryAttempt {
                loop_id,
                event: event_kind,
                attempt,
                status: DeliveryStatus::Success,
                detail,
                at: Utc::now(),
            });
            return;
        }

        let is_last = attempt == MAX_ATTEMPTS;
        if is_last {
            error!(%loop_id, event = event_kind, attempt, "webhook_dispatcher: max retries exceeded");
            record(deliveries, DeliveryAttempt {
                loop_id,
                event: event_kind,
                attempt,
                status: DeliveryStatus::MaxRetries,
                detail,
                at: Utc::now(),
            });
            return;
        }

        warn!(%loop_id, event = event_kind, attempt, "webhook_dispatcher: delivery failed, retrying");
        record(deliveries, DeliveryAttempt {
            loop_id: loop_id.clone(),
            event: event_kind,
            attempt,
            status: DeliveryStatus::Retrying,
            detail,
            at: Utc::now(),
        });
        tokio::time::sleep(RETRY_DELAYS[attempt - 1]).await;
    }
}

fn record(deliveries: &Mutex<VecDeque<DeliveryAttempt>>, attempt: DeliveryAttempt) {
    let mut guard = deliveries.lock();
    if guard.len() >= DEFAULT_RING_CAPACITY {
        guard.pop_front();
    }
    guard.push_back(attempt);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LoopMetrics, Step};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedTransport {
        responses: AsyncMutex<Vec<Result<u16, String>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            _url: &str,
            _headers: Vec<(&'static str, String)>,
            _body: Vec<u8>,
            _timeout: Duration,
        ) -> Result<u16, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().await;
            if responses.is_empty() {
                Ok(200)
            } else {
                responses.remove(0)
            }
        }
    }

    fn sample_loop() -> TradeLoop {
        TradeLoop {
            id: "l1".to_string(),
            steps: vec![
                Step {
                    from: "a".to_string(),
                    to: "b".to_string(),
                    nfts: vec!["n1".to_string()],
                },
                Step {
                    from: "b".to_string(),
                    to: "a".to_string(),
                    nfts: vec!["n2".to_string()],
                },
            ],
            participants: 2,
            quality_score: 0.9,
            metrics: LoopMetrics::default(),
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn retries_then_succeeds_with_signature() {
        let transport = Arc::new(ScriptedTransport {
            responses: AsyncMutex::new(vec![Ok(500), Ok(500), Ok(200)]),
            calls: AtomicUsize::new(0),
        });
        let config = WebhookConfig {
            url: "http://example.invalid/hook".to_string(),
            secret: "s3cr3t".to_string(),
            enabled: true,
        };
        let deliveries = Mutex::new(VecDeque::new());
        let handle = tokio::spawn({
            let transport = transport.clone();
            let config = config.clone();
            async move {
                deliver_with_retries(
                    &config,
                    transport.as_ref(),
                    &"tenant-1".to_string(),
                    "Tenant One",
                    DiscoveryEvent::LoopDiscovered(sample_loop()),
                    &deliveries,
                )
                .await;
                deliveries.into_inner().into_iter().collect::<Vec<_>>()
            }
        });

        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        let attempts = handle.await.unwrap();

        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[2].status, DeliveryStatus::Success);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn signature_is_deterministic_hmac() {
        let canonical = r#"{"event":"trade_loop_discovered"}"#;
        let a = sign("secret", canonical);
        let b = sign("secret", canonical);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
