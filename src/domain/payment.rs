use crate::domain::money::{Currency, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The payment providers the platform integrates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Mpesa,
    Paystack,
    Flutterwave,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Mpesa => "mpesa",
            GatewayKind::Paystack => "paystack",
            GatewayKind::Flutterwave => "flutterwave",
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayKind {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mpesa" => Ok(GatewayKind::Mpesa),
            "paystack" => Ok(GatewayKind::Paystack),
            "flutterwave" => Ok(GatewayKind::Flutterwave),
            other => Err(crate::error::EngineError::Validation(format!(
                "unknown gateway: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    /// Monotonic progression: PENDING -> (AUTHORIZED) -> COMPLETED | FAILED,
    /// with refunds reachable only from COMPLETED. Anything else is a
    /// regression and must be ignored.
    pub fn can_progress_to(&self, target: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match (self, target) {
            (Pending, Authorized) | (Pending, Completed) | (Pending, Failed) => true,
            (Authorized, Completed) | (Authorized, Failed) => true,
            (Completed, Refunded) | (Completed, PartiallyRefunded) => true,
            (PartiallyRefunded, Refunded) => true,
            _ => false,
        }
    }

    /// Terminal for webhook reconciliation purposes: a redelivered outcome
    /// against one of these never mutates state.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed
                | PaymentStatus::Failed
                | PaymentStatus::Refunded
                | PaymentStatus::PartiallyRefunded
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Authorized => "AUTHORIZED",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
        };
        f.write_str(s)
    }
}

/// One attempt to collect money for one order.
///
/// `reference` is the merchant-generated idempotency key handed to the
/// provider at initiation. `provider_reference` is the provider-assigned
/// identifier some providers echo in callbacks instead of the merchant
/// reference (e.g. a mobile-money checkout request id); the reconciler
/// resolves events by either key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: Money,
    pub currency: Currency,
    pub gateway: GatewayKind,
    pub reference: String,
    #[serde(default)]
    pub provider_reference: Option<String>,
    pub status: PaymentStatus,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Optimistic-concurrency guard, bumped on every successful update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        order_id: Uuid,
        amount: Money,
        currency: Currency,
        gateway: GatewayKind,
        reference: String,
        now: DateTime<Utc>,
    ) -> Self {
        Payment {
            id: Uuid::new_v4(),
            order_id,
            amount,
            currency,
            gateway,
            reference,
            provider_reference: None,
            status: PaymentStatus::Pending,
            paid_at: None,
            metadata: serde_json::Map::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Folds provider-specific fields (card brand, phone number, fees, ...)
    /// into the metadata bag. Existing keys are overwritten; this is the one
    /// mutation allowed on a settled payment.
    pub fn merge_metadata(&mut self, extra: &serde_json::Map<String, serde_json::Value>) {
        for (k, v) in extra {
            self.metadata.insert(k.clone(), v.clone());
        }
    }
}

/// Outcome a provider reported for a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    Initiated,
    Authorized,
    Completed,
    Failed,
    Refunded,
}

impl EventOutcome {
    pub fn target_status(&self) -> PaymentStatus {
        match self {
            EventOutcome::Initiated => PaymentStatus::Pending,
            EventOutcome::Authorized => PaymentStatus::Authorized,
            EventOutcome::Completed => PaymentStatus::Completed,
            EventOutcome::Failed => PaymentStatus::Failed,
            EventOutcome::Refunded => PaymentStatus::Refunded,
        }
    }
}

/// Normalized shape a gateway adapter produces from a raw webhook body.
/// Used once by the reconciler, then kept only in the delivery log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub gateway: GatewayKind,
    pub external_reference: String,
    #[serde(default)]
    pub reported_amount: Option<Money>,
    #[serde(default)]
    pub reported_currency: Option<Currency>,
    pub outcome: EventOutcome,
    /// Hex SHA-256 of the raw body bytes, part of the dedup key.
    pub payload_hash: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}
