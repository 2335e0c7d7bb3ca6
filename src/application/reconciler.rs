use crate::application::state_machine::OrderStateMachine;
use crate::config::AmountTolerance;
use crate::domain::payment::{Payment, PaymentEvent, PaymentStatus};
use crate::domain::ports::{ClockRef, PaymentStoreRef};
use crate::error::{EngineError, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Folds provider notifications into payment records exactly once.
///
/// The monotonic check and the write are a single optimistic compare-and-set
/// against the payment's version, so two concurrent reconciliations of the
/// same reference produce one winner; the loser observes the already-applied
/// state and does nothing. Order side effects run only on the winning path.
pub struct Reconciler {
    payments: PaymentStoreRef,
    orders: Arc<OrderStateMachine>,
    tolerance: AmountTolerance,
    clock: ClockRef,
}

impl Reconciler {
    pub fn new(
        payments: PaymentStoreRef,
        orders: Arc<OrderStateMachine>,
        tolerance: AmountTolerance,
        clock: ClockRef,
    ) -> Self {
        Self {
            payments,
            orders,
            tolerance,
            clock,
        }
    }

    pub async fn reconcile(&self, event: &PaymentEvent) -> Result<Payment> {
        loop {
            let mut payment = self
                .payments
                .find_by_reference(&event.external_reference)
                .await?
                .ok_or_else(|| EngineError::UnknownReference(event.external_reference.clone()))?;

            // A tampered or misrouted callback must never overwrite a
            // payment it does not match.
            if let Some(currency) = event.reported_currency
                && currency != payment.currency
            {
                return Err(EngineError::CurrencyMismatch {
                    recorded: payment.currency,
                    reported: currency,
                });
            }
            if let Some(amount) = event.reported_amount
                && !self
                    .tolerance
                    .within(payment.amount.value(), amount.value())
            {
                return Err(EngineError::AmountMismatch {
                    recorded: payment.amount.value(),
                    reported: amount.value(),
                });
            }

            let target = event.outcome.target_status();
            if !payment.status.can_progress_to(target) {
                // Redelivery or regression: the delivery log already holds
                // the event for audit; the payment stays as it is.
                info!(
                    reference = %payment.reference,
                    status = %payment.status,
                    incoming = %target,
                    "event is a no-op against current payment status"
                );
                return Ok(payment);
            }

            let expected_version = payment.version;
            payment.status = target;
            payment.version += 1;
            payment.updated_at = self.clock.now();
            match target {
                PaymentStatus::Completed => {
                    payment.paid_at = Some(self.clock.now());
                    payment.merge_metadata(&event.metadata);
                }
                PaymentStatus::Failed => {
                    payment.merge_metadata(&event.metadata);
                }
                _ => {}
            }

            if !self
                .payments
                .update_versioned(payment.clone(), expected_version)
                .await?
            {
                // Lost the race; reload and re-evaluate against the winner's
                // state.
                continue;
            }

            match target {
                PaymentStatus::Completed => {
                    info!(reference = %payment.reference, "payment completed");
                    if let Err(e) = self.orders.on_payment_completed(payment.order_id).await {
                        // Money is captured either way; the order-side
                        // mismatch goes to manual triage.
                        warn!(
                            order_id = %payment.order_id,
                            error = %e,
                            "order could not be marked paid"
                        );
                    }
                }
                PaymentStatus::Failed => {
                    info!(reference = %payment.reference, "payment failed");
                    if let Err(e) = self.orders.on_payment_failed(payment.order_id).await {
                        warn!(
                            order_id = %payment.order_id,
                            error = %e,
                            "order could not be cancelled after failed payment"
                        );
                    }
                }
                _ => {}
            }

            return Ok(payment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Currency, Money};
    use crate::domain::order::{Address, OrderDraft, OrderLine, OrderStatus};
    use crate::domain::payment::{EventOutcome, GatewayKind};
    use crate::domain::ports::{InventoryStore, PaymentStore, SystemClock};
    use crate::infrastructure::in_memory::{
        InMemoryInventoryStore, InMemoryOrderStore, InMemoryPaymentStore,
    };
    use crate::infrastructure::sandbox::LoggingNotifier;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Fixture {
        reconciler: Reconciler,
        payments: Arc<InMemoryPaymentStore>,
        machine: Arc<OrderStateMachine>,
        inventory: Arc<InMemoryInventoryStore>,
    }

    async fn fixture() -> (Fixture, Uuid) {
        let payments = Arc::new(InMemoryPaymentStore::new());
        let inventory = Arc::new(InMemoryInventoryStore::new());
        inventory.set_stock("SKU-R", 5).await.unwrap();
        let machine = Arc::new(OrderStateMachine::new(
            Arc::new(InMemoryOrderStore::new()),
            inventory.clone(),
            Arc::new(LoggingNotifier::new()),
            Arc::new(SystemClock),
        ));

        let address = Address {
            line1: "8 Aviation Rd".to_string(),
            line2: None,
            city: "Accra".to_string(),
            state: None,
            postal_code: None,
            country: "GH".to_string(),
        };
        let total = Money::new(dec!(80.00)).unwrap();
        let order = machine
            .create(OrderDraft {
                store_id: Uuid::new_v4(),
                customer_id: None,
                order_number: "ORD-R-1".to_string(),
                subtotal: total,
                tax: Money::ZERO,
                shipping: Money::ZERO,
                discount: Money::ZERO,
                total,
                currency: Currency::GHS,
                shipping_address: address.clone(),
                billing_address: address,
                lines: vec![OrderLine {
                    id: Uuid::new_v4(),
                    product_id: Uuid::new_v4(),
                    variant_id: None,
                    sku: "SKU-R".to_string(),
                    product_name: "Kettle".to_string(),
                    variant_name: None,
                    unit_price: Money::new(dec!(40.00)).unwrap(),
                    quantity: 2,
                    line_total: total,
                }],
            })
            .await
            .unwrap();

        let payment = Payment::new(
            order.id,
            total,
            Currency::GHS,
            GatewayKind::Flutterwave,
            "REF-R-1".to_string(),
            Utc::now(),
        );
        payments.insert(payment).await.unwrap();

        let reconciler = Reconciler::new(
            payments.clone(),
            machine.clone(),
            AmountTolerance::default(),
            Arc::new(SystemClock),
        );
        (
            Fixture {
                reconciler,
                payments,
                machine,
                inventory,
            },
            order.id,
        )
    }

    fn completed_event(reference: &str, amount: rust_decimal::Decimal) -> PaymentEvent {
        PaymentEvent {
            gateway: GatewayKind::Flutterwave,
            external_reference: reference.to_string(),
            reported_amount: Some(Money::new(amount).unwrap()),
            reported_currency: Some(Currency::GHS),
            outcome: EventOutcome::Completed,
            payload_hash: "hash".to_string(),
            received_at: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_completed_event_settles_payment_and_order() {
        let (fx, order_id) = fixture().await;
        let payment = fx
            .reconciler
            .reconcile(&completed_event("REF-R-1", dec!(80.00)))
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Completed);
        assert!(payment.paid_at.is_some());
        let order = fx.machine.get(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(fx.inventory.stock("SKU-R").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_replay_is_a_no_op() {
        let (fx, order_id) = fixture().await;
        let event = completed_event("REF-R-1", dec!(80.00));

        for _ in 0..5 {
            fx.reconciler.reconcile(&event).await.unwrap();
        }

        let payment = fx
            .payments
            .find_by_reference("REF-R-1")
            .await
            .unwrap()
            .unwrap();
        // Exactly one applied transition.
        assert_eq!(payment.version, 1);
        // And stock was decremented exactly once.
        assert_eq!(fx.inventory.stock("SKU-R").await.unwrap(), 3);
        let order = fx.machine.get(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_stale_pending_event_cannot_regress() {
        let (fx, _) = fixture().await;
        fx.reconciler
            .reconcile(&completed_event("REF-R-1", dec!(80.00)))
            .await
            .unwrap();

        let mut stale = completed_event("REF-R-1", dec!(80.00));
        stale.outcome = EventOutcome::Initiated;
        stale.reported_amount = None;
        stale.reported_currency = None;
        let payment = fx.reconciler.reconcile(&stale).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_reference() {
        let (fx, _) = fixture().await;
        assert!(matches!(
            fx.reconciler
                .reconcile(&completed_event("REF-MISSING", dec!(80.00)))
                .await,
            Err(EngineError::UnknownReference(_))
        ));
    }

    #[tokio::test]
    async fn test_amount_mismatch_rejected() {
        let (fx, order_id) = fixture().await;
        let err = fx
            .reconciler
            .reconcile(&completed_event("REF-R-1", dec!(8.00)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AmountMismatch { .. }));

        // Nothing moved.
        let payment = fx
            .payments
            .find_by_reference("REF-R-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        let order = fx.machine.get(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_currency_mismatch_rejected() {
        let (fx, _) = fixture().await;
        let mut event = completed_event("REF-R-1", dec!(80.00));
        event.reported_currency = Some(Currency::NGN);
        assert!(matches!(
            fx.reconciler.reconcile(&event).await,
            Err(EngineError::CurrencyMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_rounding_drift_within_tolerance() {
        let (fx, _) = fixture().await;
        let payment = fx
            .reconciler
            .reconcile(&completed_event("REF-R-1", dec!(80.01)))
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_event_cancels_order() {
        let (fx, order_id) = fixture().await;
        let mut event = completed_event("REF-R-1", dec!(80.00));
        event.outcome = EventOutcome::Failed;
        event.reported_amount = None;
        event.reported_currency = None;

        let payment = fx.reconciler.reconcile(&event).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        let order = fx.machine.get(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        // Stock was never taken for an unpaid order.
        assert_eq!(fx.inventory.stock("SKU-R").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_reconciliations_single_winner() {
        let (fx, order_id) = fixture().await;
        let fx = Arc::new(fx);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let fx = fx.clone();
            handles.push(tokio::spawn(async move {
                fx.reconciler
                    .reconcile(&completed_event("REF-R-1", dec!(80.00)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let payment = fx
            .payments
            .find_by_reference("REF-R-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.version, 1);
        // The PAID side effect ran exactly once.
        assert_eq!(fx.inventory.stock("SKU-R").await.unwrap(), 3);
        let order = fx.machine.get(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_refund_progression_from_completed() {
        let (fx, _) = fixture().await;
        fx.reconciler
            .reconcile(&completed_event("REF-R-1", dec!(80.00)))
            .await
            .unwrap();

        let mut refund = completed_event("REF-R-1", dec!(80.00));
        refund.outcome = EventOutcome::Refunded;
        let payment = fx.reconciler.reconcile(&refund).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Refunded);
        assert_eq!(payment.version, 2);
    }
}
