use crate::domain::order::{
    FulfillmentStatus, Order, OrderDraft, OrderStatus, TrackingInfo,
};
use crate::domain::payment::PaymentStatus;
use crate::domain::ports::{
    ClockRef, InventoryStoreRef, LineAdjustment, NotificationKind, NotificationSinkRef,
    OrderNotification, OrderStoreRef,
};
use crate::error::{EngineError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Extra data some transitions carry: a cancellation reason, tracking
/// metadata, or a payment-status stamp set by the reconciler callbacks.
#[derive(Debug, Clone, Default)]
struct TransitionContext {
    cancellation_reason: Option<String>,
    tracking: Option<TrackingInfo>,
    payment_status: Option<PaymentStatus>,
}

/// Owns order status. Every mutation, whether operator-driven or triggered
/// by payment reconciliation, goes through the same validated transition
/// path; there is no side door around the table.
///
/// Transitions for the same order are serialized by a per-order lock;
/// different orders proceed independently.
pub struct OrderStateMachine {
    orders: OrderStoreRef,
    inventory: InventoryStoreRef,
    notifications: NotificationSinkRef,
    clock: ClockRef,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OrderStateMachine {
    pub fn new(
        orders: OrderStoreRef,
        inventory: InventoryStoreRef,
        notifications: NotificationSinkRef,
        clock: ClockRef,
    ) -> Self {
        Self {
            orders,
            inventory,
            notifications,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Entry point for the checkout collaborator. Validates the draft's
    /// totals invariant and persists the order as PENDING.
    pub async fn create(&self, draft: OrderDraft) -> Result<Order> {
        let order = Order::from_draft(draft, self.clock.now())?;
        self.orders.insert(order.clone()).await?;
        info!(order = %order.order_number, "order created");
        Ok(order)
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Option<Order>> {
        self.orders.get(order_id).await
    }

    pub async fn transition(&self, order_id: Uuid, target: OrderStatus) -> Result<Order> {
        self.apply(order_id, target, TransitionContext::default())
            .await
    }

    pub async fn cancel(&self, order_id: Uuid, reason: Option<String>) -> Result<Order> {
        self.apply(
            order_id,
            OrderStatus::Cancelled,
            TransitionContext {
                cancellation_reason: reason,
                ..Default::default()
            },
        )
        .await
    }

    pub async fn fulfill(&self, order_id: Uuid, tracking: Option<TrackingInfo>) -> Result<Order> {
        self.apply(
            order_id,
            OrderStatus::Fulfilled,
            TransitionContext {
                tracking,
                ..Default::default()
            },
        )
        .await
    }

    pub async fn ship(&self, order_id: Uuid, tracking: Option<TrackingInfo>) -> Result<Order> {
        self.apply(
            order_id,
            OrderStatus::Shipped,
            TransitionContext {
                tracking,
                ..Default::default()
            },
        )
        .await
    }

    /// Invoked by the reconciler exactly once per payment, on the first
    /// transition into COMPLETED.
    pub async fn on_payment_completed(&self, order_id: Uuid) -> Result<Order> {
        self.apply(order_id, OrderStatus::Paid, TransitionContext::default())
            .await
    }

    /// Invoked by the reconciler exactly once per payment, on the first
    /// transition into FAILED.
    pub async fn on_payment_failed(&self, order_id: Uuid) -> Result<Order> {
        self.apply(
            order_id,
            OrderStatus::Cancelled,
            TransitionContext {
                cancellation_reason: Some("payment failed".to_string()),
                payment_status: Some(PaymentStatus::Failed),
                ..Default::default()
            },
        )
        .await
    }

    async fn order_lock(&self, order_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(order_id).or_default().clone()
    }

    async fn apply(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        ctx: TransitionContext,
    ) -> Result<Order> {
        let lock = self.order_lock(order_id).await;
        let _guard = lock.lock().await;

        let mut order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))?;

        if !order.status.can_transition_to(target) {
            return Err(EngineError::InvalidTransition {
                from: order.status,
                to: target,
            });
        }

        let now = self.clock.now();
        let from = order.status;
        let mut notification = None;

        match target {
            OrderStatus::Paid => {
                order.paid_at = Some(now);
                order.payment_status = PaymentStatus::Completed;
                let outcome = self.inventory.decrement(&line_adjustments(&order)).await?;
                if !outcome.is_clean() {
                    // Money is already captured; the shortfall goes to manual
                    // backorder handling instead of rolling the payment back.
                    warn!(
                        order = %order.order_number,
                        lines = outcome.shortfalls.len(),
                        "inventory shortfall on paid order"
                    );
                    order.backordered = outcome.shortfalls;
                }
                notification = Some(NotificationKind::OrderPaid);
            }
            OrderStatus::Cancelled => {
                order.cancelled_at = Some(now);
                if ctx.cancellation_reason.is_some() {
                    order.cancellation_reason = ctx.cancellation_reason;
                }
                self.restore_taken_stock(&order).await?;
                notification = Some(NotificationKind::OrderCancelled);
            }
            OrderStatus::Returned => {
                order.fulfillment_status = FulfillmentStatus::Returned;
                self.restore_taken_stock(&order).await?;
            }
            OrderStatus::Fulfilled => {
                order.fulfilled_at = Some(now);
                order.fulfillment_status = FulfillmentStatus::Fulfilled;
                if ctx.tracking.is_some() {
                    order.tracking = ctx.tracking;
                }
                notification = Some(NotificationKind::OrderFulfilled);
            }
            OrderStatus::Shipped => {
                if ctx.tracking.is_some() {
                    order.tracking = ctx.tracking;
                }
            }
            OrderStatus::Delivered => {
                order.delivered_at = Some(now);
                order.fulfillment_status = FulfillmentStatus::Delivered;
                notification = Some(NotificationKind::OrderDelivered);
            }
            OrderStatus::Processing => {}
            // No edge in the table leads here; can_transition_to already
            // rejected these targets.
            OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Refunded => {}
        }

        if let Some(ps) = ctx.payment_status {
            order.payment_status = ps;
        }
        order.status = target;
        order.updated_at = now;
        self.orders.store(order.clone()).await?;
        drop(_guard);

        info!(order = %order.order_number, %from, to = %target, "order transitioned");

        // Fire-and-forget, after the order lock is released: a slow or
        // failing sink must never affect the transition.
        if let Some(kind) = notification {
            let sink = self.notifications.clone();
            let note = OrderNotification {
                order_id: order.id,
                order_number: order.order_number.clone(),
                kind,
            };
            tokio::spawn(async move {
                if let Err(e) = sink.dispatch(note).await {
                    warn!(error = %e, "notification dispatch failed");
                }
            });
        }

        Ok(order)
    }

    /// Puts back exactly the stock the PAID transition took: nothing if the
    /// order never reached PAID, and never the backordered lines, which were
    /// left untouched by the decrement.
    async fn restore_taken_stock(&self, order: &Order) -> Result<()> {
        if order.paid_at.is_none() {
            return Ok(());
        }
        let adjustments: Vec<LineAdjustment> = line_adjustments(order)
            .into_iter()
            .filter(|adj| !order.backordered.iter().any(|s| s.line_id == adj.line_id))
            .collect();
        if !adjustments.is_empty() {
            self.inventory.restore(&adjustments).await?;
        }
        Ok(())
    }
}

fn line_adjustments(order: &Order) -> Vec<LineAdjustment> {
    order
        .lines
        .iter()
        .map(|line| LineAdjustment {
            line_id: line.id,
            sku: line.sku.clone(),
            quantity: line.quantity,
        })
        .collect()
}
