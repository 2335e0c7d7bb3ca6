use crate::domain::money::Currency;
use crate::domain::payment::{EventOutcome, GatewayKind, Payment};
use crate::domain::ports::{ClockRef, OrderStoreRef, PaymentStoreRef};
use crate::error::{EngineError, Result};
use crate::gateways::{GatewayRegistry, InitiateAction, InitiateRequest};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct InitiatePayment {
    pub order_id: Uuid,
    pub gateway: GatewayKind,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub customer_name: Option<String>,
    /// Caller-supplied idempotency key; generated when absent.
    pub reference: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub payment: Payment,
    pub action: InitiateAction,
}

/// Starts payment attempts and answers the out-of-band status questions.
/// Gateway choice is constrained by a static capability filter: configured
/// credentials plus currency support, nothing reconciliation-related.
pub struct PaymentInitiator {
    orders: OrderStoreRef,
    payments: PaymentStoreRef,
    registry: GatewayRegistry,
    clock: ClockRef,
}

impl PaymentInitiator {
    pub fn new(
        orders: OrderStoreRef,
        payments: PaymentStoreRef,
        registry: GatewayRegistry,
        clock: ClockRef,
    ) -> Self {
        Self {
            orders,
            payments,
            registry,
            clock,
        }
    }

    pub fn available_gateways(&self, currency: Currency) -> Vec<GatewayKind> {
        self.registry.available_for(currency)
    }

    pub async fn initiate(&self, request: InitiatePayment) -> Result<InitiatedPayment> {
        let order = self
            .orders
            .get(request.order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(request.order_id))?;

        let gateway = self
            .registry
            .by_kind(request.gateway)
            .ok_or(EngineError::UnconfiguredGateway(request.gateway))?;
        if !gateway.supports_currency(order.currency) {
            return Err(EngineError::GatewayUnavailable {
                gateway: request.gateway,
                currency: order.currency,
            });
        }

        let now = self.clock.now();
        let reference = request
            .reference
            .unwrap_or_else(|| format!("PAY-{}-{}", now.timestamp_millis(), order.id));

        // Reject reuse before anything reaches the provider.
        if self.payments.find_by_reference(&reference).await?.is_some() {
            return Err(EngineError::DuplicateReference(reference));
        }

        let outcome = gateway
            .initiate(&InitiateRequest {
                order_id: order.id,
                reference: reference.clone(),
                amount: order.total,
                currency: order.currency,
                customer_email: request.customer_email,
                customer_phone: request.customer_phone,
                customer_name: request.customer_name,
            })
            .await?;

        let mut payment = Payment::new(
            order.id,
            order.total,
            order.currency,
            request.gateway,
            reference,
            now,
        );
        payment.provider_reference = outcome.provider_reference;
        // The insert itself guards the reference, so a racing initiation
        // cannot slip in a second pending payment.
        self.payments.insert(payment.clone()).await?;

        info!(
            order = %order.order_number,
            gateway = %request.gateway,
            reference = %payment.reference,
            "payment initiated"
        );

        Ok(InitiatedPayment {
            payment,
            action: outcome.action,
        })
    }

    /// Read-only status check with the provider. Never mutates the payment;
    /// authoritative updates arrive through webhook reconciliation. Settled
    /// payments skip the provider round trip entirely.
    pub async fn verify(&self, reference: &str) -> Result<EventOutcome> {
        let payment = self
            .payments
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| EngineError::UnknownReference(reference.to_string()))?;

        if payment.status.is_settled() {
            return Ok(match payment.status {
                crate::domain::payment::PaymentStatus::Failed => EventOutcome::Failed,
                crate::domain::payment::PaymentStatus::Refunded => EventOutcome::Refunded,
                _ => EventOutcome::Completed,
            });
        }

        let gateway = self
            .registry
            .by_kind(payment.gateway)
            .ok_or(EngineError::UnconfiguredGateway(payment.gateway))?;
        gateway.verify(reference).await
    }
}
