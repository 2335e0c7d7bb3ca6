use crate::domain::order::{LineShortfall, Order};
use crate::domain::payment::{GatewayKind, Payment};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type InventoryStoreRef = Arc<dyn InventoryStore>;
pub type DeliveryLogRef = Arc<dyn DeliveryLog>;
pub type NotificationSinkRef = Arc<dyn NotificationSink>;
pub type ProviderTransportRef = Arc<dyn ProviderTransport>;
pub type ClockRef = Arc<dyn Clock>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: Order) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Order>>;
    async fn store(&self, order: Order) -> Result<()>;
    async fn all(&self) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fails with `DuplicateReference` when the merchant reference is
    /// already in use.
    async fn insert(&self, payment: Payment) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Payment>>;
    /// Resolves either the merchant reference or a provider-assigned one.
    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>>;
    /// Optimistic write: persists `payment` only if the stored version still
    /// equals `expected_version`. Returns false on conflict.
    async fn update_versioned(&self, payment: Payment, expected_version: u64) -> Result<bool>;
    async fn all(&self) -> Result<Vec<Payment>>;
}

/// One stock adjustment for one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdjustment {
    pub line_id: Uuid,
    pub sku: String,
    pub quantity: u32,
}

/// Result of a batch decrement. Lines that could not be fully backed are
/// reported instead of failing the batch; their stock is left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecrementOutcome {
    pub shortfalls: Vec<LineShortfall>,
}

impl DecrementOutcome {
    pub fn is_clean(&self) -> bool {
        self.shortfalls.is_empty()
    }
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn set_stock(&self, sku: &str, quantity: u32) -> Result<()>;
    async fn stock(&self, sku: &str) -> Result<u32>;
    /// Per-line compare-and-adjust. A line is decremented only when enough
    /// stock exists; quantities never go negative.
    async fn decrement(&self, lines: &[LineAdjustment]) -> Result<DecrementOutcome>;
    /// Saturating add back; always succeeds.
    async fn restore(&self, lines: &[LineAdjustment]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    SignatureInvalid,
    Malformed,
}

/// How an inbound delivery was handled. Every disposition is acked to the
/// provider; the distinction only matters internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Queued,
    Duplicate,
    Rejected(RejectReason),
}

/// Durable record of one webhook delivery, written before the ack goes out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub gateway: GatewayKind,
    pub external_reference: String,
    pub payload_hash: String,
    pub disposition: Disposition,
    pub received_at: DateTime<Utc>,
}

#[async_trait]
pub trait DeliveryLog: Send + Sync {
    /// Records the delivery. Returns false when the exact
    /// (gateway, external_reference, payload_hash) triple was seen before,
    /// in which case nothing new is written.
    async fn record(&self, record: DeliveryRecord) -> Result<bool>;
    async fn all(&self) -> Result<Vec<DeliveryRecord>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderPaid,
    OrderFulfilled,
    OrderDelivered,
    OrderCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNotification {
    pub order_id: Uuid,
    pub order_number: String,
    pub kind: NotificationKind,
}

/// Fire-and-forget outbound notification dispatch (email/SMS collaborator).
/// Errors are logged by callers and never affect a transition.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn dispatch(&self, notification: OrderNotification) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAuth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

/// Outbound call to a provider API, already shaped by a gateway adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub method: HttpMethod,
    pub url: String,
    pub auth: RequestAuth,
    pub body: Option<serde_json::Value>,
}

/// Narrow seam to the outside network so adapters stay testable offline.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn send(&self, request: ProviderRequest) -> Result<serde_json::Value>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
