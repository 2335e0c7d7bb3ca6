use crate::config::PaystackConfig;
use crate::domain::money::{Currency, Money};
use crate::domain::payment::{EventOutcome, PaymentEvent};
use crate::domain::ports::{
    ClockRef, HttpMethod, ProviderRequest, ProviderTransportRef, RequestAuth,
};
use crate::error::{EngineError, Result};
use crate::gateways::{
    Gateway, GatewayKind, InitiateAction, InitiateOutcome, InitiateRequest, WebhookHeaders,
    hmac_sha512_matches, sha256_hex,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Card/bank redirect gateway. Amounts cross the wire in the currency's
/// smallest sub-unit (kobo and friends); this adapter converts to the
/// ledger's major-unit representation in both directions.
pub struct PaystackGateway {
    config: PaystackConfig,
    transport: ProviderTransportRef,
    clock: ClockRef,
}

#[derive(Debug, Deserialize)]
struct InitializeResponse {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<InitializeData>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    data: ChargeData,
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    reference: String,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    paid_at: Option<String>,
    #[serde(default)]
    fees: Option<i64>,
    #[serde(default)]
    gateway_response: Option<String>,
    #[serde(default)]
    authorization: Option<AuthorizationData>,
}

#[derive(Debug, Deserialize)]
struct AuthorizationData {
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    last4: Option<String>,
    #[serde(default)]
    bank: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    status: bool,
    #[serde(default)]
    data: Option<VerifyData>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig, transport: ProviderTransportRef, clock: ClockRef) -> Self {
        Self {
            config,
            transport,
            clock,
        }
    }

    fn parse_currency(raw: &str) -> Result<Currency> {
        raw.parse::<Currency>()
            .map_err(|_| EngineError::MalformedEvent {
                gateway: GatewayKind::Paystack,
                reason: format!("unknown currency {raw}"),
            })
    }
}

#[async_trait]
impl Gateway for PaystackGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Paystack
    }

    fn supports_currency(&self, currency: Currency) -> bool {
        matches!(
            currency,
            Currency::NGN | Currency::GHS | Currency::ZAR | Currency::USD
        )
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateOutcome> {
        let response = self
            .transport
            .send(ProviderRequest {
                method: HttpMethod::Post,
                url: format!("{}/transaction/initialize", self.config.base_url),
                auth: RequestAuth::Bearer(self.config.secret_key.clone()),
                body: Some(json!({
                    "email": request.customer_email,
                    "amount": request.amount.to_minor_units(request.currency),
                    "currency": request.currency.as_str(),
                    "reference": request.reference,
                    "callback_url": self.config.callback_url,
                    "metadata": { "order_id": request.order_id },
                    "channels": ["card", "bank", "ussd", "qr", "mobile_money", "bank_transfer"],
                })),
            })
            .await?;

        let init: InitializeResponse = serde_json::from_value(response)?;
        if !init.status {
            return Err(EngineError::Provider(
                init.message
                    .unwrap_or_else(|| "transaction initialize rejected".to_string()),
            ));
        }
        let data = init
            .data
            .ok_or_else(|| EngineError::Provider("initialize response missing data".to_string()))?;

        Ok(InitiateOutcome {
            action: InitiateAction::Redirect {
                url: data.authorization_url,
            },
            // Webhooks echo the merchant reference directly.
            provider_reference: None,
        })
    }

    fn normalize(&self, raw_body: &[u8], headers: &WebhookHeaders) -> Result<PaymentEvent> {
        let signature = headers.get(SIGNATURE_HEADER).unwrap_or_default();
        if !hmac_sha512_matches(&self.config.secret_key, raw_body, signature) {
            return Err(EngineError::SignatureInvalid {
                gateway: GatewayKind::Paystack,
            });
        }

        let envelope: WebhookEnvelope =
            serde_json::from_slice(raw_body).map_err(|e| EngineError::MalformedEvent {
                gateway: GatewayKind::Paystack,
                reason: e.to_string(),
            })?;
        let data = envelope.data;

        let mut metadata = serde_json::Map::new();
        let mut reported_amount = None;
        let mut reported_currency = None;

        let outcome = match envelope.event.as_str() {
            "charge.success" => {
                let minor = data.amount.ok_or_else(|| EngineError::MalformedEvent {
                    gateway: GatewayKind::Paystack,
                    reason: "charge.success missing amount".to_string(),
                })?;
                let currency_raw =
                    data.currency
                        .as_deref()
                        .ok_or_else(|| EngineError::MalformedEvent {
                            gateway: GatewayKind::Paystack,
                            reason: "charge.success missing currency".to_string(),
                        })?;
                let currency = Self::parse_currency(currency_raw)?;
                reported_amount = Some(Money::from_minor_units(minor, currency)?);
                reported_currency = Some(currency);

                if let Some(channel) = &data.channel {
                    metadata.insert("channel".to_string(), json!(channel));
                }
                if let Some(paid_at) = &data.paid_at {
                    metadata.insert("provider_paid_at".to_string(), json!(paid_at));
                }
                if let Some(fees) = data.fees {
                    metadata.insert(
                        "fees".to_string(),
                        json!(Money::from_minor_units(fees, currency)?.value()),
                    );
                }
                if let Some(auth) = &data.authorization {
                    if let Some(brand) = &auth.brand {
                        metadata.insert("card_brand".to_string(), json!(brand));
                    }
                    if let Some(last4) = &auth.last4 {
                        metadata.insert("card_last4".to_string(), json!(last4));
                    }
                    if let Some(bank) = &auth.bank {
                        metadata.insert("bank".to_string(), json!(bank));
                    }
                }
                EventOutcome::Completed
            }
            "charge.failed" => {
                if let Some(reason) = &data.gateway_response {
                    metadata.insert("failure_reason".to_string(), json!(reason));
                }
                EventOutcome::Failed
            }
            // Any other event type is acknowledged but carries no outcome
            // the reconciler acts on.
            other => {
                metadata.insert("event".to_string(), json!(other));
                EventOutcome::Initiated
            }
        };

        Ok(PaymentEvent {
            gateway: GatewayKind::Paystack,
            external_reference: data.reference,
            reported_amount,
            reported_currency,
            outcome,
            payload_hash: sha256_hex(raw_body),
            received_at: self.clock.now(),
            metadata,
        })
    }

    async fn verify(&self, reference: &str) -> Result<EventOutcome> {
        let response = self
            .transport
            .send(ProviderRequest {
                method: HttpMethod::Get,
                url: format!("{}/transaction/verify/{reference}", self.config.base_url),
                auth: RequestAuth::Bearer(self.config.secret_key.clone()),
                body: None,
            })
            .await?;

        let verify: VerifyResponse = serde_json::from_value(response)?;
        if !verify.status {
            return Err(EngineError::Provider(
                "transaction verify rejected".to_string(),
            ));
        }
        Ok(match verify.data.map(|d| d.status) {
            Some(status) if status == "success" => EventOutcome::Completed,
            Some(status) if status == "failed" => EventOutcome::Failed,
            _ => EventOutcome::Initiated,
        })
    }
}
