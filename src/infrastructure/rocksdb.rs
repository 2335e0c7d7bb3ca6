use crate::domain::order::{LineShortfall, Order};
use crate::domain::payment::Payment;
use crate::domain::ports::{
    DecrementOutcome, DeliveryLog, DeliveryRecord, InventoryStore, LineAdjustment, OrderStore,
    PaymentStore,
};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Column Family for order rows.
pub const CF_ORDERS: &str = "orders";
/// Column Family for payment rows, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping merchant and provider references to payment ids.
pub const CF_PAYMENT_REFS: &str = "payment_refs";
/// Column Family for per-SKU stock counts.
pub const CF_INVENTORY: &str = "inventory";
/// Column Family for the webhook delivery log.
pub const CF_DELIVERIES: &str = "deliveries";

/// Persistent store backing all engine ports with RocksDB column families.
///
/// Read-modify-write sequences (the payment version check, the per-line
/// stock adjustments, the delivery dedup insert) are serialized by an
/// internal mutex; the lock is never held across an await point.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at the specified path, ensuring
    /// all required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [
            CF_ORDERS,
            CF_PAYMENTS,
            CF_PAYMENT_REFS,
            CF_INVENTORY,
            CF_DELIVERIES,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            EngineError::Storage(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: serde::Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf)?;
        self.db.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn all_json<T: serde::de::DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf)?;
        let mut items = Vec::new();
        for entry in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = entry?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // A poisoned lock can only come from a panic in another write path;
        // the data it protected was never half-written to RocksDB.
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl OrderStore for RocksDbStore {
    async fn insert(&self, order: Order) -> Result<()> {
        self.put_json(CF_ORDERS, order.id.as_bytes(), &order)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>> {
        self.get_json(CF_ORDERS, id.as_bytes())
    }

    async fn store(&self, order: Order) -> Result<()> {
        self.put_json(CF_ORDERS, order.id.as_bytes(), &order)
    }

    async fn all(&self) -> Result<Vec<Order>> {
        self.all_json(CF_ORDERS)
    }
}

#[async_trait]
impl PaymentStore for RocksDbStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let _guard = self.guard();
        let refs_cf = self.cf(CF_PAYMENT_REFS)?;
        if self.db.get_pinned_cf(refs_cf, payment.reference.as_bytes())?.is_some() {
            return Err(EngineError::DuplicateReference(payment.reference));
        }
        self.db.put_cf(
            refs_cf,
            payment.reference.as_bytes(),
            payment.id.as_bytes(),
        )?;
        if let Some(provider_ref) = &payment.provider_reference {
            self.db
                .put_cf(refs_cf, provider_ref.as_bytes(), payment.id.as_bytes())?;
        }
        self.put_json(CF_PAYMENTS, payment.id.as_bytes(), &payment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>> {
        self.get_json(CF_PAYMENTS, id.as_bytes())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        let refs_cf = self.cf(CF_PAYMENT_REFS)?;
        let Some(id_bytes) = self.db.get_cf(refs_cf, reference.as_bytes())? else {
            return Ok(None);
        };
        let id = Uuid::from_slice(&id_bytes).map_err(|e| EngineError::Storage(Box::new(e)))?;
        self.get_json(CF_PAYMENTS, id.as_bytes())
    }

    async fn update_versioned(&self, payment: Payment, expected_version: u64) -> Result<bool> {
        let _guard = self.guard();
        let stored: Option<Payment> = self.get_json(CF_PAYMENTS, payment.id.as_bytes())?;
        let Some(stored) = stored else {
            return Err(EngineError::PaymentNotFound(payment.id.to_string()));
        };
        if stored.version != expected_version {
            return Ok(false);
        }
        if let Some(provider_ref) = &payment.provider_reference {
            let refs_cf = self.cf(CF_PAYMENT_REFS)?;
            self.db
                .put_cf(refs_cf, provider_ref.as_bytes(), payment.id.as_bytes())?;
        }
        self.put_json(CF_PAYMENTS, payment.id.as_bytes(), &payment)?;
        Ok(true)
    }

    async fn all(&self) -> Result<Vec<Payment>> {
        self.all_json(CF_PAYMENTS)
    }
}

#[async_trait]
impl InventoryStore for RocksDbStore {
    async fn set_stock(&self, sku: &str, quantity: u32) -> Result<()> {
        let _guard = self.guard();
        let cf = self.cf(CF_INVENTORY)?;
        self.db.put_cf(cf, sku.as_bytes(), quantity.to_be_bytes())?;
        Ok(())
    }

    async fn stock(&self, sku: &str) -> Result<u32> {
        let cf = self.cf(CF_INVENTORY)?;
        match self.db.get_cf(cf, sku.as_bytes())? {
            Some(bytes) => {
                let bytes: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    EngineError::Storage(Box::new(std::io::Error::other("corrupt stock value")))
                })?;
                Ok(u32::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    async fn decrement(&self, lines: &[LineAdjustment]) -> Result<DecrementOutcome> {
        let _guard = self.guard();
        let cf = self.cf(CF_INVENTORY)?;
        let mut outcome = DecrementOutcome::default();
        for line in lines {
            let available = match self.db.get_cf(cf, line.sku.as_bytes())? {
                Some(bytes) => {
                    let bytes: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                        EngineError::Storage(Box::new(std::io::Error::other(
                            "corrupt stock value",
                        )))
                    })?;
                    u32::from_be_bytes(bytes)
                }
                None => 0,
            };
            if available >= line.quantity {
                self.db.put_cf(
                    cf,
                    line.sku.as_bytes(),
                    (available - line.quantity).to_be_bytes(),
                )?;
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
        let _guard = self.guard();
        let cf = self.cf(CF_INVENTORY)?;
        for line in lines {
            let available = match self.db.get_cf(cf, line.sku.as_bytes())? {
                Some(bytes) => {
                    let bytes: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                        EngineError::Storage(Box::new(std::io::Error::other(
                            "corrupt stock value",
                        )))
                    })?;
                    u32::from_be_bytes(bytes)
                }
                None => 0,
            };
            self.db.put_cf(
                cf,
                line.sku.as_bytes(),
                available.saturating_add(line.quantity).to_be_bytes(),
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryLog for RocksDbStore {
    async fn record(&self, record: DeliveryRecord) -> Result<bool> {
        let _guard = self.guard();
        let cf = self.cf(CF_DELIVERIES)?;
        let key = format!(
            "{}|{}|{}",
            record.gateway.as_str(),
            record.external_reference,
            record.payload_hash
        );
        if self.db.get_pinned_cf(cf, key.as_bytes())?.is_some() {
            return Ok(false);
        }
        self.db
            .put_cf(cf, key.as_bytes(), serde_json::to_vec(&record)?)?;
        Ok(true)
    }

    async fn all(&self) -> Result<Vec<DeliveryRecord>> {
        self.all_json(CF_DELIVERIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Currency, Money};
    use crate::domain::payment::{GatewayKind, PaymentStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn payment(reference: &str) -> Payment {
        Payment::new(
            Uuid::new_v4(),
            Money::new(dec!(50.0)).unwrap(),
            Currency::NGN,
            GatewayKind::Paystack,
            reference.to_string(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_open_creates_column_families() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).expect("open rocksdb");
        for cf in [
            CF_ORDERS,
            CF_PAYMENTS,
            CF_PAYMENT_REFS,
            CF_INVENTORY,
            CF_DELIVERIES,
        ] {
            assert!(store.db.cf_handle(cf).is_some());
        }
    }

    #[tokio::test]
    async fn test_payment_round_trip_and_duplicate_guard() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();

        let mut p = payment("REF-DB-1");
        p.provider_reference = Some("ws_CO_DB1".to_string());
        PaymentStore::insert(&store, p.clone()).await.unwrap();

        let by_ref = store.find_by_reference("REF-DB-1").await.unwrap().unwrap();
        assert_eq!(by_ref.id, p.id);
        let by_provider = store.find_by_reference("ws_CO_DB1").await.unwrap().unwrap();
        assert_eq!(by_provider.id, p.id);

        assert!(matches!(
            PaymentStore::insert(&store, payment("REF-DB-1")).await,
            Err(EngineError::DuplicateReference(_))
        ));
    }

    #[tokio::test]
    async fn test_versioned_update() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();
        let p = payment("REF-DB-2");
        PaymentStore::insert(&store, p.clone()).await.unwrap();

        let mut updated = p.clone();
        updated.status = PaymentStatus::Completed;
        updated.version = 1;
        assert!(store.update_versioned(updated, 0).await.unwrap());
        assert!(!store.update_versioned(p.clone(), 0).await.unwrap());

        let stored = store.find_by_reference("REF-DB-2").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_inventory_persistence() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();
        store.set_stock("SKU-DB", 4).await.unwrap();

        let outcome = store
            .decrement(&[LineAdjustment {
                line_id: Uuid::new_v4(),
                sku: "SKU-DB".to_string(),
                quantity: 6,
            }])
            .await
            .unwrap();
        assert_eq!(outcome.shortfalls.len(), 1);
        assert_eq!(store.stock("SKU-DB").await.unwrap(), 4);

        let outcome = store
            .decrement(&[LineAdjustment {
                line_id: Uuid::new_v4(),
                sku: "SKU-DB".to_string(),
                quantity: 3,
            }])
            .await
            .unwrap();
        assert!(outcome.is_clean());
        assert_eq!(store.stock("SKU-DB").await.unwrap(), 1);
    }
}
