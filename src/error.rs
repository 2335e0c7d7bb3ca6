use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::money::Currency;
use crate::domain::order::OrderStatus;
use crate::domain::payment::GatewayKind;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("webhook signature verification failed for {gateway}")]
    SignatureInvalid { gateway: GatewayKind },
    #[error("malformed {gateway} event: {reason}")]
    MalformedEvent { gateway: GatewayKind, reason: String },
    #[error("no payment found for external reference {0}")]
    UnknownReference(String),
    #[error("payment reference {0} already used")]
    DuplicateReference(String),
    #[error("reported amount {reported} deviates from recorded {recorded} beyond tolerance")]
    AmountMismatch { recorded: Decimal, reported: Decimal },
    #[error("reported currency {reported} does not match recorded {recorded}")]
    CurrencyMismatch { recorded: Currency, reported: Currency },
    #[error("invalid order transition {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("order {0} not found")]
    OrderNotFound(uuid::Uuid),
    #[error("payment {0} not found")]
    PaymentNotFound(String),
    #[error("gateway {gateway} unavailable for {currency}")]
    GatewayUnavailable { gateway: GatewayKind, currency: Currency },
    #[error("gateway {0} has no credentials configured")]
    UnconfiguredGateway(GatewayKind),
    #[error("provider call failed: {0}")]
    Provider(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for EngineError {
    fn from(e: rocksdb::Error) -> Self {
        EngineError::Storage(Box::new(e))
    }
}
