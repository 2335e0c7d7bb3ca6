use crate::domain::money::{Currency, Money};
use crate::domain::payment::PaymentStatus;
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Confirmed,
    Processing,
    Fulfilled,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
    Refunded,
}

impl OrderStatus {
    /// Allowed destinations from this status. Terminal statuses have none.
    pub fn allowed_transitions(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Paid, Cancelled],
            Paid => &[Processing, Cancelled],
            Confirmed => &[Processing, Cancelled],
            Processing => &[Fulfilled, Cancelled],
            Fulfilled => &[Shipped, Delivered, Returned],
            Shipped => &[Delivered, Returned],
            Delivered => &[Returned],
            Cancelled | Returned | Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Fulfilled => "FULFILLED",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Returned => "RETURNED",
            OrderStatus::Refunded => "REFUNDED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentStatus {
    Unfulfilled,
    PartiallyFulfilled,
    Fulfilled,
    Delivered,
    Returned,
}

/// Address snapshot taken at order creation. Later edits to the customer's
/// stored addresses never alter historical orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    pub country: String,
}

/// One line of an order: a denormalized snapshot of product identity and
/// price at the time the order was placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: Uuid,
    pub product_id: Uuid,
    #[serde(default)]
    pub variant_id: Option<Uuid>,
    pub sku: String,
    pub product_name: String,
    #[serde(default)]
    pub variant_name: Option<String>,
    pub unit_price: Money,
    pub quantity: u32,
    pub line_total: Money,
}

/// A line whose stock could not fully back a PAID transition, queued for
/// manual backorder handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineShortfall {
    pub line_id: Uuid,
    pub sku: String,
    pub requested: u32,
    pub available: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingInfo {
    pub tracking_number: String,
    pub carrier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub store_id: Uuid,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,
    pub currency: Currency,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub lines: Vec<OrderLine>,
    #[serde(default)]
    pub backordered: Vec<LineShortfall>,
    #[serde(default)]
    pub tracking: Option<TrackingInfo>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fulfilled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input produced by the checkout collaborator. The engine only validates
/// and snapshots it; it never re-reads live catalog state afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderDraft {
    pub store_id: Uuid,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    pub order_number: String,
    pub subtotal: Money,
    #[serde(default)]
    pub tax: Money,
    #[serde(default)]
    pub shipping: Money,
    #[serde(default)]
    pub discount: Money,
    pub total: Money,
    pub currency: Currency,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Builds a new PENDING order from a checkout draft, enforcing the
    /// totals invariant `total == subtotal + tax + shipping - discount`.
    pub fn from_draft(draft: OrderDraft, now: DateTime<Utc>) -> Result<Self, EngineError> {
        if draft.lines.is_empty() {
            return Err(EngineError::Validation(
                "order must have at least one line".to_string(),
            ));
        }
        for line in &draft.lines {
            if line.quantity == 0 {
                return Err(EngineError::Validation(format!(
                    "line {} has zero quantity",
                    line.sku
                )));
            }
        }
        let expected = draft.subtotal + draft.tax + draft.shipping - draft.discount;
        if expected != draft.total {
            return Err(EngineError::Validation(format!(
                "order total {} does not equal subtotal + tax + shipping - discount ({})",
                draft.total, expected
            )));
        }

        Ok(Order {
            id: Uuid::new_v4(),
            store_id: draft.store_id,
            customer_id: draft.customer_id,
            order_number: draft.order_number,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            fulfillment_status: FulfillmentStatus::Unfulfilled,
            subtotal: draft.subtotal,
            tax: draft.tax,
            shipping: draft.shipping,
            discount: draft.discount,
            total: draft.total,
            currency: draft.currency,
            shipping_address: draft.shipping_address,
            billing_address: draft.billing_address,
            lines: draft.lines,
            backordered: Vec::new(),
            tracking: None,
            cancellation_reason: None,
            paid_at: None,
            cancelled_at: None,
            fulfilled_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        })
    }
}
