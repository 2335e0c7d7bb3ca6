pub mod flutterwave;
pub mod mpesa;
pub mod paystack;
pub mod token;

use crate::config::EngineConfig;
use crate::domain::money::{Currency, Money};
use crate::domain::payment::{EventOutcome, PaymentEvent};
use crate::domain::ports::{ClockRef, ProviderTransportRef};
use crate::error::Result;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub use crate::domain::payment::GatewayKind;

/// Request to start collecting money for an order. The reference is the
/// merchant-generated idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct InitiateRequest {
    pub order_id: Uuid,
    pub reference: String,
    pub amount: Money,
    pub currency: Currency,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub customer_name: Option<String>,
}

/// What the customer has to do next to complete the payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiateAction {
    /// Send the customer to a provider-hosted page.
    Redirect { url: String },
    /// The provider pushed a prompt to the customer's device.
    PushPrompt { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitiateOutcome {
    pub action: InitiateAction,
    /// Provider-assigned identifier echoed in later callbacks instead of the
    /// merchant reference, where the provider works that way.
    pub provider_reference: Option<String>,
}

/// Case-insensitive webhook header map.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders(HashMap<String, String>);

impl WebhookHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

impl<S: Into<String>, const N: usize> From<[(S, S); N]> for WebhookHeaders {
    fn from(pairs: [(S, S); N]) -> Self {
        let mut headers = WebhookHeaders::new();
        for (name, value) in pairs {
            let name: String = name.into();
            headers.insert(&name, value);
        }
        headers
    }
}

/// One payment provider behind a common capability interface. Adding a
/// provider means adding an implementation; the reconciler never changes.
#[async_trait]
pub trait Gateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    fn supports_currency(&self, currency: Currency) -> bool;

    /// Asks the provider to start a payment attempt. Must be called at most
    /// once per reference; the initiator enforces that before calling.
    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateOutcome>;

    /// Authenticates and normalizes a raw webhook delivery. Verification
    /// runs over the raw, unparsed body bytes.
    fn normalize(&self, raw_body: &[u8], headers: &WebhookHeaders) -> Result<PaymentEvent>;

    /// Out-of-band, read-only status check with the provider. Does not
    /// participate in any transition lock.
    async fn verify(&self, reference: &str) -> Result<EventOutcome>;
}

/// Holds the gateways that have credentials configured. A provider is
/// offered for an order only when it also supports the order's currency.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: Vec<Arc<dyn Gateway>>,
}

impl GatewayRegistry {
    pub fn new(gateways: Vec<Arc<dyn Gateway>>) -> Self {
        Self { gateways }
    }

    /// Builds adapters for every provider whose credentials are present in
    /// the config; the rest are simply not registered.
    pub fn from_config(
        config: &EngineConfig,
        transport: ProviderTransportRef,
        clock: ClockRef,
    ) -> Self {
        let mut gateways: Vec<Arc<dyn Gateway>> = Vec::new();
        if let Some(c) = &config.mpesa {
            gateways.push(Arc::new(mpesa::MpesaGateway::new(
                c.clone(),
                transport.clone(),
                clock.clone(),
            )));
        }
        if let Some(c) = &config.paystack {
            gateways.push(Arc::new(paystack::PaystackGateway::new(
                c.clone(),
                transport.clone(),
                clock.clone(),
            )));
        }
        if let Some(c) = &config.flutterwave {
            gateways.push(Arc::new(flutterwave::FlutterwaveGateway::new(
                c.clone(),
                transport.clone(),
                clock.clone(),
            )));
        }
        Self { gateways }
    }

    pub fn by_kind(&self, kind: GatewayKind) -> Option<Arc<dyn Gateway>> {
        self.gateways.iter().find(|g| g.kind() == kind).cloned()
    }

    pub fn available_for(&self, currency: Currency) -> Vec<GatewayKind> {
        self.gateways
            .iter()
            .filter(|g| g.supports_currency(currency))
            .map(|g| g.kind())
            .collect()
    }
}

/// Providers are inconsistent about whether numeric fields arrive as JSON
/// numbers or strings; accept both without a float round-trip.
pub(crate) fn decimal_from_value(value: &serde_json::Value) -> Option<rust_decimal::Decimal> {
    use std::str::FromStr;
    match value {
        serde_json::Value::Number(n) => rust_decimal::Decimal::from_str(&n.to_string()).ok(),
        serde_json::Value::String(s) => rust_decimal::Decimal::from_str(s).ok(),
        _ => None,
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub(crate) fn hmac_sha256_matches(secret: &str, raw_body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any size");
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

pub(crate) fn hmac_sha512_matches(secret: &str, raw_body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any size");
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}
