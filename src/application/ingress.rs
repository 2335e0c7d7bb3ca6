use crate::application::reconciler::Reconciler;
use crate::domain::payment::PaymentEvent;
use crate::domain::ports::{ClockRef, DeliveryLogRef, DeliveryRecord, Disposition, RejectReason};
use crate::error::{EngineError, Result};
use crate::gateways::{GatewayKind, GatewayRegistry, WebhookHeaders, sha256_hex};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Acknowledgment returned to the provider. Every durably recorded delivery
/// is acked, including rejected ones: a non-success response would only make
/// the provider retry a payload that will never become valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub delivery_id: Uuid,
    pub disposition: Disposition,
}

/// Front door for provider callbacks: authenticate, deduplicate, record
/// durably, then hand off. Processing happens on an independent consumer so
/// the ack never waits on reconciliation.
pub struct WebhookIngress {
    registry: GatewayRegistry,
    deliveries: DeliveryLogRef,
    queue: mpsc::UnboundedSender<PaymentEvent>,
    clock: ClockRef,
}

impl WebhookIngress {
    /// Returns the ingress and the receiving end of its queue; feed the
    /// receiver to [`run_reconciliation_worker`].
    pub fn new(
        registry: GatewayRegistry,
        deliveries: DeliveryLogRef,
        clock: ClockRef,
    ) -> (Self, mpsc::UnboundedReceiver<PaymentEvent>) {
        let (queue, rx) = mpsc::unbounded_channel();
        (
            Self {
                registry,
                deliveries,
                queue,
                clock,
            },
            rx,
        )
    }

    pub async fn receive(
        &self,
        kind: GatewayKind,
        raw_body: &[u8],
        headers: &WebhookHeaders,
    ) -> Result<Ack> {
        let gateway = self
            .registry
            .by_kind(kind)
            .ok_or(EngineError::UnconfiguredGateway(kind))?;

        let delivery_id = Uuid::new_v4();
        let received_at = self.clock.now();

        match gateway.normalize(raw_body, headers) {
            Ok(event) => {
                let fresh = self
                    .deliveries
                    .record(DeliveryRecord {
                        id: delivery_id,
                        gateway: kind,
                        external_reference: event.external_reference.clone(),
                        payload_hash: event.payload_hash.clone(),
                        disposition: Disposition::Queued,
                        received_at,
                    })
                    .await?;
                if !fresh {
                    info!(
                        gateway = %kind,
                        reference = %event.external_reference,
                        "duplicate delivery ignored"
                    );
                    return Ok(Ack {
                        delivery_id,
                        disposition: Disposition::Duplicate,
                    });
                }

                // Only enqueue once the delivery is durably recorded; a
                // crashed consumer can be replayed from the log.
                if self.queue.send(event).is_err() {
                    warn!("reconciliation worker not running; event kept in delivery log only");
                }
                Ok(Ack {
                    delivery_id,
                    disposition: Disposition::Queued,
                })
            }
            Err(EngineError::SignatureInvalid { gateway }) => {
                warn!(%gateway, "webhook rejected: invalid signature");
                self.record_rejection(
                    delivery_id,
                    kind,
                    raw_body,
                    RejectReason::SignatureInvalid,
                )
                .await
            }
            Err(EngineError::MalformedEvent { gateway, reason }) => {
                error!(%gateway, %reason, "webhook rejected: malformed payload");
                self.record_rejection(delivery_id, kind, raw_body, RejectReason::Malformed)
                    .await
            }
            Err(other) => Err(other),
        }
    }

    /// Rejected payloads are recorded so an identical redelivery is
    /// recognized and never reprocessed. No reference is known for them;
    /// the payload hash alone identifies the delivery.
    async fn record_rejection(
        &self,
        delivery_id: Uuid,
        kind: GatewayKind,
        raw_body: &[u8],
        reason: RejectReason,
    ) -> Result<Ack> {
        let fresh = self
            .deliveries
            .record(DeliveryRecord {
                id: delivery_id,
                gateway: kind,
                external_reference: String::new(),
                payload_hash: sha256_hex(raw_body),
                disposition: Disposition::Rejected(reason),
                received_at: self.clock.now(),
            })
            .await?;
        Ok(Ack {
            delivery_id,
            disposition: if fresh {
                Disposition::Rejected(reason)
            } else {
                Disposition::Duplicate
            },
        })
    }
}

/// Consumes queued events until the ingress side is dropped. Failures are
/// surfaced through logs for ops tooling, never back to the provider.
pub async fn run_reconciliation_worker(
    mut rx: mpsc::UnboundedReceiver<PaymentEvent>,
    reconciler: Arc<Reconciler>,
) {
    while let Some(event) = rx.recv().await {
        match reconciler.reconcile(&event).await {
            Ok(payment) => info!(
                reference = %payment.reference,
                status = %payment.status,
                "event reconciled"
            ),
            Err(e) => warn!(
                gateway = %event.gateway,
                reference = %event.external_reference,
                error = %e,
                "reconciliation failed; left for manual triage"
            ),
        }
    }
}
