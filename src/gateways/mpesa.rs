use crate::config::MpesaConfig;
use crate::domain::money::{Currency, Money};
use crate::domain::payment::{EventOutcome, PaymentEvent};
use crate::domain::ports::{
    ClockRef, HttpMethod, ProviderRequest, ProviderTransportRef, RequestAuth,
};
use crate::error::{EngineError, Result};
use crate::gateways::token::AccessTokenCache;
use crate::gateways::{
    Gateway, GatewayKind, InitiateAction, InitiateOutcome, InitiateRequest, WebhookHeaders,
    decimal_from_value, hmac_sha256_matches, sha256_hex,
};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;

pub const SIGNATURE_HEADER: &str = "x-mpesa-signature";

/// Mobile-money push gateway. Initiation sends an STK push to the customer's
/// phone; the outcome arrives later on the callback URL. Callbacks carry the
/// provider-assigned `CheckoutRequestID`, not the merchant reference, so that
/// id is surfaced as the payment's provider reference at initiation time.
pub struct MpesaGateway {
    config: MpesaConfig,
    transport: ProviderTransportRef,
    clock: ClockRef,
    token: AccessTokenCache,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    response_code: String,
    #[serde(rename = "ResponseDescription", default)]
    response_description: Option<String>,
    #[serde(rename = "CustomerMessage", default)]
    customer_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackEnvelope {
    #[serde(rename = "Body")]
    body: CallbackBody,
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    item: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
struct MetadataItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value", default)]
    value: Option<serde_json::Value>,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig, transport: ProviderTransportRef, clock: ClockRef) -> Self {
        let token = AccessTokenCache::new(clock.clone());
        Self {
            config,
            transport,
            clock,
            token,
        }
    }

    async fn bearer_token(&self) -> Result<String> {
        let transport = self.transport.clone();
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );
        let username = self.config.consumer_key.clone();
        let password = self.config.consumer_secret.clone();
        self.token
            .get_or_refresh(move || async move {
                let response = transport
                    .send(ProviderRequest {
                        method: HttpMethod::Get,
                        url,
                        auth: RequestAuth::Basic { username, password },
                        body: None,
                    })
                    .await?;
                let auth: AuthResponse = serde_json::from_value(response)?;
                let expires_in = auth
                    .expires_in
                    .parse::<i64>()
                    .map_err(|_| EngineError::Provider("non-numeric token expiry".to_string()))?;
                Ok((auth.access_token, expires_in))
            })
            .await
    }

    /// Provider timestamp format: YYYYMMDDHHmmss.
    fn timestamp(&self) -> String {
        self.clock.now().format("%Y%m%d%H%M%S").to_string()
    }

    fn password(&self, timestamp: &str) -> String {
        BASE64.encode(format!(
            "{}{}{}",
            self.config.short_code, self.config.passkey, timestamp
        ))
    }

    /// Normalizes a phone number into the 254XXXXXXXXX wire format.
    fn format_phone(phone: &str) -> String {
        let cleaned: String = phone.chars().filter(char::is_ascii_digit).collect();
        if let Some(rest) = cleaned.strip_prefix('0') {
            format!("254{rest}")
        } else if cleaned.starts_with("254") {
            cleaned
        } else if cleaned.len() == 9 {
            format!("254{cleaned}")
        } else {
            cleaned
        }
    }

    fn metadata_value(items: &[MetadataItem], name: &str) -> Option<serde_json::Value> {
        items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.clone())
    }
}

#[async_trait]
impl Gateway for MpesaGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Mpesa
    }

    fn supports_currency(&self, currency: Currency) -> bool {
        matches!(currency, Currency::KES | Currency::TZS | Currency::UGX)
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateOutcome> {
        let phone = request.customer_phone.as_deref().ok_or_else(|| {
            EngineError::Validation("phone number required for mobile money".to_string())
        })?;
        let phone = Self::format_phone(phone);

        let token = self.bearer_token().await?;
        let timestamp = self.timestamp();
        // The provider only accepts whole major units.
        let amount = request.amount.value().round();

        let response = self
            .transport
            .send(ProviderRequest {
                method: HttpMethod::Post,
                url: format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url),
                auth: RequestAuth::Bearer(token),
                body: Some(json!({
                    "BusinessShortCode": self.config.short_code,
                    "Password": self.password(&timestamp),
                    "Timestamp": timestamp,
                    "TransactionType": "CustomerPayBillOnline",
                    "Amount": amount,
                    "PartyA": phone,
                    "PartyB": self.config.short_code,
                    "PhoneNumber": phone,
                    "CallBackURL": self.config.callback_url,
                    "AccountReference": request.reference,
                    "TransactionDesc": format!("Payment for order {}", request.order_id),
                })),
            })
            .await?;

        let push: StkPushResponse = serde_json::from_value(response)?;
        if push.response_code != "0" {
            return Err(EngineError::Provider(
                push.response_description
                    .unwrap_or_else(|| "push request rejected".to_string()),
            ));
        }

        Ok(InitiateOutcome {
            action: InitiateAction::PushPrompt {
                message: push
                    .customer_message
                    .unwrap_or_else(|| "Confirm the payment on your phone".to_string()),
            },
            provider_reference: Some(push.checkout_request_id),
        })
    }

    fn normalize(&self, raw_body: &[u8], headers: &WebhookHeaders) -> Result<PaymentEvent> {
        let signature = headers.get(SIGNATURE_HEADER).unwrap_or_default();
        if !hmac_sha256_matches(&self.config.webhook_secret, raw_body, signature) {
            return Err(EngineError::SignatureInvalid {
                gateway: GatewayKind::Mpesa,
            });
        }

        let envelope: CallbackEnvelope =
            serde_json::from_slice(raw_body).map_err(|e| EngineError::MalformedEvent {
                gateway: GatewayKind::Mpesa,
                reason: e.to_string(),
            })?;
        let callback = envelope.body.stk_callback;

        let mut metadata = serde_json::Map::new();
        let mut reported_amount = None;
        let outcome = if callback.result_code == 0 {
            let items = callback
                .callback_metadata
                .map(|m| m.item)
                .unwrap_or_default();
            if let Some(amount) = Self::metadata_value(&items, "Amount")
                .as_ref()
                .and_then(decimal_from_value)
            {
                reported_amount = Some(Money::new(amount)?);
            }
            if let Some(receipt) = Self::metadata_value(&items, "MpesaReceiptNumber") {
                metadata.insert("receipt_number".to_string(), receipt);
            }
            if let Some(phone) = Self::metadata_value(&items, "PhoneNumber") {
                metadata.insert("phone_number".to_string(), phone);
            }
            EventOutcome::Completed
        } else {
            metadata.insert(
                "failure_reason".to_string(),
                json!(callback.result_desc.unwrap_or_default()),
            );
            metadata.insert("result_code".to_string(), json!(callback.result_code));
            EventOutcome::Failed
        };

        Ok(PaymentEvent {
            gateway: GatewayKind::Mpesa,
            external_reference: callback.checkout_request_id,
            reported_amount,
            // Callbacks carry no currency; the payment record's currency is
            // authoritative.
            reported_currency: None,
            outcome,
            payload_hash: sha256_hex(raw_body),
            received_at: self.clock.now(),
            metadata,
        })
    }

    async fn verify(&self, reference: &str) -> Result<EventOutcome> {
        let token = self.bearer_token().await?;
        let timestamp = self.timestamp();
        let response = self
            .transport
            .send(ProviderRequest {
                method: HttpMethod::Post,
                url: format!("{}/mpesa/stkpushquery/v1/query", self.config.base_url),
                auth: RequestAuth::Bearer(token),
                body: Some(json!({
                    "BusinessShortCode": self.config.short_code,
                    "Password": self.password(&timestamp),
                    "Timestamp": timestamp,
                    "CheckoutRequestID": reference,
                })),
            })
            .await?;

        let result_code = response
            .get("ResultCode")
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .ok_or_else(|| EngineError::Provider("query response missing ResultCode".to_string()))?;

        Ok(if result_code == "0" {
            EventOutcome::Completed
        } else {
            EventOutcome::Failed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::SystemClock;
    use crate::infrastructure::sandbox::SandboxTransport;
    use hmac::{Hmac, Mac};
    use rust_decimal_macros::dec;
    use sha2::Sha256;
    use std::sync::Arc;
    use uuid::Uuid;

    fn config() -> MpesaConfig {
        MpesaConfig {
            base_url: "https://sandbox.invalid".to_string(),
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            short_code: "174379".to_string(),
            passkey: "passkey".to_string(),
            callback_url: "https://merchant.invalid/webhooks/mpesa".to_string(),
            webhook_secret: "cb-secret".to_string(),
        }
    }

    fn gateway() -> MpesaGateway {
        MpesaGateway::new(
            config(),
            Arc::new(SandboxTransport::new()),
            Arc::new(SystemClock),
        )
    }

    fn sign(body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(b"cb-secret").unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn success_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": 1500},
                            {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                            {"Name": "PhoneNumber", "Value": 254708374149u64},
                        ]
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_normalize_success_callback() {
        let body = success_body();
        let headers = WebhookHeaders::from([(SIGNATURE_HEADER, sign(&body).as_str())]);

        let event = gateway().normalize(&body, &headers).unwrap();
        assert_eq!(event.outcome, EventOutcome::Completed);
        assert_eq!(event.external_reference, "ws_CO_191220191020363925");
        assert_eq!(event.reported_amount.unwrap().value(), dec!(1500));
        assert_eq!(event.reported_currency, None);
        assert_eq!(event.metadata["receipt_number"], "NLJ7RT61SV");
    }

    #[test]
    fn test_normalize_failure_callback() {
        let body = serde_json::to_vec(&json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_1912",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        }))
        .unwrap();
        let headers = WebhookHeaders::from([(SIGNATURE_HEADER, sign(&body).as_str())]);

        let event = gateway().normalize(&body, &headers).unwrap();
        assert_eq!(event.outcome, EventOutcome::Failed);
        assert_eq!(event.reported_amount, None);
        assert_eq!(event.metadata["failure_reason"], "Request cancelled by user");
    }

    #[test]
    fn test_normalize_rejects_tampered_body() {
        let body = success_body();
        let signature = sign(&body);
        let mut tampered = body.clone();
        // Flip one byte; the signature header stays the same.
        let idx = tampered.len() - 10;
        tampered[idx] ^= 0x01;

        let headers = WebhookHeaders::from([(SIGNATURE_HEADER, signature.as_str())]);
        let err = gateway().normalize(&tampered, &headers).unwrap_err();
        assert!(matches!(err, EngineError::SignatureInvalid { .. }));
    }

    #[test]
    fn test_normalize_rejects_missing_signature() {
        let body = success_body();
        let err = gateway().normalize(&body, &WebhookHeaders::new()).unwrap_err();
        assert!(matches!(err, EngineError::SignatureInvalid { .. }));
    }

    #[test]
    fn test_normalize_fails_closed_on_missing_fields() {
        let body = serde_json::to_vec(&json!({"Body": {"stkCallback": {"ResultCode": 0}}})).unwrap();
        let headers = WebhookHeaders::from([(SIGNATURE_HEADER, sign(&body).as_str())]);

        let err = gateway().normalize(&body, &headers).unwrap_err();
        assert!(matches!(err, EngineError::MalformedEvent { .. }));
    }

    #[test]
    fn test_phone_formats() {
        assert_eq!(MpesaGateway::format_phone("0708374149"), "254708374149");
        assert_eq!(MpesaGateway::format_phone("+254708374149"), "254708374149");
        assert_eq!(MpesaGateway::format_phone("254708374149"), "254708374149");
        assert_eq!(MpesaGateway::format_phone("708374149"), "254708374149");
    }

    #[tokio::test]
    async fn test_initiate_returns_provider_reference() {
        let request = InitiateRequest {
            order_id: Uuid::new_v4(),
            reference: "PAY-1".to_string(),
            amount: Money::new(dec!(1500)).unwrap(),
            currency: Currency::KES,
            customer_email: "jade@example.com".to_string(),
            customer_phone: Some("0708374149".to_string()),
            customer_name: None,
        };

        let outcome = gateway().initiate(&request).await.unwrap();
        assert!(outcome.provider_reference.is_some());
        assert!(matches!(outcome.action, InitiateAction::PushPrompt { .. }));
    }

    #[tokio::test]
    async fn test_initiate_requires_phone() {
        let request = InitiateRequest {
            order_id: Uuid::new_v4(),
            reference: "PAY-2".to_string(),
            amount: Money::new(dec!(100)).unwrap(),
            currency: Currency::KES,
            customer_email: "jade@example.com".to_string(),
            customer_phone: None,
            customer_name: None,
        };

        assert!(matches!(
            gateway().initiate(&request).await,
            Err(EngineError::Validation(_))
        ));
    }
}
