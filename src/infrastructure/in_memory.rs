use crate::domain::order::{LineShortfall, Order};
use crate::domain::payment::Payment;
use crate::domain::ports::{
    DecrementOutcome, DeliveryLog, DeliveryRecord, InventoryStore, LineAdjustment, OrderStore,
    PaymentStore,
};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory store for orders.
///
/// Uses `Arc<RwLock<HashMap>>` for shared concurrent access. Ideal for tests
/// and the scenario replay binary; production deployments use the persistent
/// backend.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<Uuid, Order>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id).cloned())
    }

    async fn store(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        orders.insert(order.id, order);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.values().cloned().collect())
    }
}

#[derive(Default)]
struct PaymentIndex {
    by_id: HashMap<Uuid, Payment>,
    by_reference: HashMap<String, Uuid>,
    by_provider_reference: HashMap<String, Uuid>,
}

/// In-memory payment store with an optimistic version check on updates.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    index: Arc<RwLock<PaymentIndex>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let mut index = self.index.write().await;
        if index.by_reference.contains_key(&payment.reference) {
            return Err(EngineError::DuplicateReference(payment.reference));
        }
        index
            .by_reference
            .insert(payment.reference.clone(), payment.id);
        if let Some(provider_ref) = &payment.provider_reference {
            index
                .by_provider_reference
                .insert(provider_ref.clone(), payment.id);
        }
        index.by_id.insert(payment.id, payment);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>> {
        let index = self.index.read().await;
        Ok(index.by_id.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        let index = self.index.read().await;
        let id = index
            .by_reference
            .get(reference)
            .or_else(|| index.by_provider_reference.get(reference));
        Ok(id.and_then(|id| index.by_id.get(id)).cloned())
    }

    async fn update_versioned(&self, payment: Payment, expected_version: u64) -> Result<bool> {
        let mut index = self.index.write().await;
        let Some(stored) = index.by_id.get(&payment.id) else {
            return Err(EngineError::PaymentNotFound(payment.id.to_string()));
        };
        if stored.version != expected_version {
            return Ok(false);
        }
        if let Some(provider_ref) = &payment.provider_reference {
            index
                .by_provider_reference
                .insert(provider_ref.clone(), payment.id);
        }
        index.by_id.insert(payment.id, payment);
        Ok(true)
    }

    async fn all(&self) -> Result<Vec<Payment>> {
        let index = self.index.read().await;
        Ok(index.by_id.values().cloned().collect())
    }
}

/// In-memory stock ledger keyed by SKU. The whole batch runs under one write
/// lock, which makes each line's compare-and-adjust atomic.
#[derive(Default, Clone)]
pub struct InMemoryInventoryStore {
    stock: Arc<RwLock<HashMap<String, u32>>>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn set_stock(&self, sku: &str, quantity: u32) -> Result<()> {
        let mut stock = self.stock.write().await;
        stock.insert(sku.to_string(), quantity);
        Ok(())
    }

    async fn stock(&self, sku: &str) -> Result<u32> {
        let stock = self.stock.read().await;
        Ok(stock.get(sku).copied().unwrap_or(0))
    }

    async fn decrement(&self, lines: &[LineAdjustment]) -> Result<DecrementOutcome> {
        let mut stock = self.stock.write().await;
        let mut outcome = DecrementOutcome::default();
        for line in lines {
            let available = stock.get(&line.sku).copied().unwrap_or(0);
            if available >= line.quantity {
                stock.insert(line.sku.clone(), available - line.quantity);
            } else {
                outcome.shortfalls.push(LineShortfall {
                    line_id: line.line_id,
                    sku: line.sku.clone(),
                    requested: line.quantity,
                    available,
                });
            }
        }
        Ok(outcome)
    }

    async fn restore(&self, lines: &[LineAdjustment]) -> Result<()> {
        let mut stock = self.stock.write().await;
        for line in lines {
            let entry = stock.entry(line.sku.clone()).or_insert(0);
            *entry = entry.saturating_add(line.quantity);
        }
        Ok(())
    }
}

/// Append-only delivery log with an exact-duplicate index over
/// (gateway, external_reference, payload_hash).
#[derive(Default, Clone)]
pub struct InMemoryDeliveryLog {
    inner: Arc<RwLock<DeliveryLogInner>>,
}

#[derive(Default)]
struct DeliveryLogInner {
    seen: HashSet<(String, String, String)>,
    records: Vec<DeliveryRecord>,
}

impl InMemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryLog for InMemoryDeliveryLog {
    async fn record(&self, record: DeliveryRecord) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let key = (
            record.gateway.as_str().to_string(),
            record.external_reference.clone(),
            record.payload_hash.clone(),
        );
        if !inner.seen.insert(key) {
            return Ok(false);
        }
        inner.records.push(record);
        Ok(true)
    }

    async fn all(&self) -> Result<Vec<DeliveryRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.records.clone())
    }
}
