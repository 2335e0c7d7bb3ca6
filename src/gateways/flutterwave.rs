use crate::config::FlutterwaveConfig;
use crate::domain::money::{Currency, Money};
use crate::domain::payment::{EventOutcome, PaymentEvent};
use crate::domain::ports::{
    ClockRef, HttpMethod, ProviderRequest, ProviderTransportRef, RequestAuth,
};
use crate::error::{EngineError, Result};
use crate::gateways::{
    Gateway, GatewayKind, InitiateAction, InitiateOutcome, InitiateRequest, WebhookHeaders,
    decimal_from_value, sha256_hex,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

pub const SIGNATURE_HEADER: &str = "verif-hash";

/// Card/bank redirect gateway whose webhooks are authenticated by comparing
/// the `verif-hash` header against a pre-shared static value. Amounts arrive
/// in major units.
pub struct FlutterwaveGateway {
    config: FlutterwaveConfig,
    transport: ProviderTransportRef,
    clock: ClockRef,
}

#[derive(Debug, Deserialize)]
struct InitializeResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<InitializeData>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    link: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    data: ChargeData,
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    tx_ref: String,
    #[serde(default)]
    flw_ref: Option<String>,
    #[serde(default)]
    amount: Option<serde_json::Value>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    payment_type: Option<String>,
    #[serde(default)]
    app_fee: Option<serde_json::Value>,
    #[serde(default)]
    processor_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    status: String,
    #[serde(default)]
    data: Option<VerifyData>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
}

impl FlutterwaveGateway {
    pub fn new(
        config: FlutterwaveConfig,
        transport: ProviderTransportRef,
        clock: ClockRef,
    ) -> Self {
        Self {
            config,
            transport,
            clock,
        }
    }
}

#[async_trait]
impl Gateway for FlutterwaveGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Flutterwave
    }

    fn supports_currency(&self, _currency: Currency) -> bool {
        // The provider covers the platform's whole currency set.
        true
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateOutcome> {
        let phone = request.customer_phone.as_deref().ok_or_else(|| {
            EngineError::Validation("phone number required for this gateway".to_string())
        })?;
        let name = request.customer_name.as_deref().ok_or_else(|| {
            EngineError::Validation("customer name required for this gateway".to_string())
        })?;

        let response = self
            .transport
            .send(ProviderRequest {
                method: HttpMethod::Post,
                url: format!("{}/payments", self.config.base_url),
                auth: RequestAuth::Bearer(self.config.secret_key.clone()),
                body: Some(json!({
                    "tx_ref": request.reference,
                    "amount": request.amount.value(),
                    "currency": request.currency.as_str(),
                    "redirect_url": self.config.redirect_url,
                    "payment_options": "card,mobilemoney,ussd,banktransfer",
                    "customer": {
                        "email": request.customer_email,
                        "phonenumber": phone,
                        "name": name,
                    },
                    "meta": { "order_id": request.order_id },
                })),
            })
            .await?;

        let init: InitializeResponse = serde_json::from_value(response)?;
        if init.status != "success" {
            return Err(EngineError::Provider(
                init.message
                    .unwrap_or_else(|| "payment initialize rejected".to_string()),
            ));
        }
        let data = init
            .data
            .ok_or_else(|| EngineError::Provider("initialize response missing data".to_string()))?;

        Ok(InitiateOutcome {
            action: InitiateAction::Redirect { url: data.link },
            // Webhooks echo the merchant tx_ref directly.
            provider_reference: None,
        })
    }

    fn normalize(&self, raw_body: &[u8], headers: &WebhookHeaders) -> Result<PaymentEvent> {
        let provided = headers.get(SIGNATURE_HEADER).unwrap_or_default();
        if provided.is_empty() || provided != self.config.webhook_secret_hash {
            return Err(EngineError::SignatureInvalid {
                gateway: GatewayKind::Flutterwave,
            });
        }

        let envelope: WebhookEnvelope =
            serde_json::from_slice(raw_body).map_err(|e| EngineError::MalformedEvent {
                gateway: GatewayKind::Flutterwave,
                reason: e.to_string(),
            })?;
        let data = envelope.data;

        let mut metadata = serde_json::Map::new();
        let mut reported_amount = None;
        let mut reported_currency = None;

        let outcome = match envelope.event.as_str() {
            "charge.completed" => {
                let amount = data
                    .amount
                    .as_ref()
                    .and_then(decimal_from_value)
                    .ok_or_else(|| EngineError::MalformedEvent {
                        gateway: GatewayKind::Flutterwave,
                        reason: "charge.completed missing amount".to_string(),
                    })?;
                let currency_raw =
                    data.currency
                        .as_deref()
                        .ok_or_else(|| EngineError::MalformedEvent {
                            gateway: GatewayKind::Flutterwave,
                            reason: "charge.completed missing currency".to_string(),
                        })?;
                let currency =
                    currency_raw
                        .parse::<Currency>()
                        .map_err(|_| EngineError::MalformedEvent {
                            gateway: GatewayKind::Flutterwave,
                            reason: format!("unknown currency {currency_raw}"),
                        })?;
                reported_amount = Some(Money::new(amount)?);
                reported_currency = Some(currency);

                if let Some(flw_ref) = &data.flw_ref {
                    metadata.insert("provider_ref".to_string(), json!(flw_ref));
                }
                if let Some(payment_type) = &data.payment_type {
                    metadata.insert("payment_type".to_string(), json!(payment_type));
                }
                if let Some(fee) = data.app_fee.as_ref().and_then(decimal_from_value) {
                    metadata.insert("fees".to_string(), json!(fee));
                }
                EventOutcome::Completed
            }
            "charge.failed" => {
                if let Some(reason) = &data.processor_response {
                    metadata.insert("failure_reason".to_string(), json!(reason));
                }
                EventOutcome::Failed
            }
            other => {
                metadata.insert("event".to_string(), json!(other));
                EventOutcome::Initiated
            }
        };

        Ok(PaymentEvent {
            gateway: GatewayKind::Flutterwave,
            external_reference: data.tx_ref,
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
                url: format!("{}/transactions/{reference}/verify", self.config.base_url),
                auth: RequestAuth::Bearer(self.config.secret_key.clone()),
                body: None,
            })
            .await?;

        let verify: VerifyResponse = serde_json::from_value(response)?;
        if verify.status != "success" {
            return Err(EngineError::Provider(
                "transaction verify rejected".to_string(),
            ));
        }
        Ok(match verify.data.map(|d| d.status) {
            Some(status) if status == "successful" => EventOutcome::Completed,
            Some(status) if status == "failed" => EventOutcome::Failed,
            _ => EventOutcome::Initiated,
        })
    }
}
