#![allow(dead_code)]

use chrono::Utc;
use hmac::{Hmac, Mac};
use orderflow::application::ingress::WebhookIngress;
use orderflow::application::initiation::PaymentInitiator;
use orderflow::application::reconciler::Reconciler;
use orderflow::application::state_machine::OrderStateMachine;
use orderflow::config::{
    AmountTolerance, EngineConfig, FlutterwaveConfig, MpesaConfig, PaystackConfig,
};
use orderflow::domain::money::{Currency, Money};
use orderflow::domain::order::{Address, Order, OrderDraft, OrderLine};
use orderflow::domain::payment::{GatewayKind, Payment, PaymentEvent};
use orderflow::domain::ports::{PaymentStore, SystemClock};
use orderflow::gateways::{GatewayRegistry, WebhookHeaders};
use orderflow::infrastructure::in_memory::{
    InMemoryDeliveryLog, InMemoryInventoryStore, InMemoryOrderStore, InMemoryPaymentStore,
};
use orderflow::infrastructure::sandbox::{LoggingNotifier, SandboxTransport};
use rust_decimal::Decimal;
use sha2::{Sha256, Sha512};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

pub const MPESA_WEBHOOK_SECRET: &str = "test-mpesa-webhook-secret";
pub const PAYSTACK_SECRET_KEY: &str = "sk_test_paystack_secret";
pub const FLUTTERWAVE_VERIF_HASH: &str = "test-flutterwave-verif-hash";

pub fn test_config() -> EngineConfig {
    EngineConfig {
        tolerance: AmountTolerance::default(),
        mpesa: Some(MpesaConfig {
            base_url: "https://sandbox.invalid".to_string(),
            consumer_key: "consumer-key".to_string(),
            consumer_secret: "consumer-secret".to_string(),
            short_code: "174379".to_string(),
            passkey: "passkey".to_string(),
            callback_url: "https://merchant.invalid/webhooks/mpesa".to_string(),
            webhook_secret: MPESA_WEBHOOK_SECRET.to_string(),
        }),
        paystack: Some(PaystackConfig {
            base_url: "https://api.invalid".to_string(),
            secret_key: PAYSTACK_SECRET_KEY.to_string(),
            public_key: "pk_test_paystack".to_string(),
            callback_url: None,
        }),
        flutterwave: Some(FlutterwaveConfig {
            base_url: "https://api.invalid/v3".to_string(),
            secret_key: "flw-secret".to_string(),
            public_key: "flw-public".to_string(),
            webhook_secret_hash: FLUTTERWAVE_VERIF_HASH.to_string(),
            redirect_url: None,
        }),
    }
}

pub struct TestEngine {
    pub machine: Arc<OrderStateMachine>,
    pub reconciler: Arc<Reconciler>,
    pub ingress: WebhookIngress,
    pub queue: UnboundedReceiver<PaymentEvent>,
    pub initiator: PaymentInitiator,
    pub orders: Arc<InMemoryOrderStore>,
    pub payments: Arc<InMemoryPaymentStore>,
    pub inventory: Arc<InMemoryInventoryStore>,
    pub deliveries: Arc<InMemoryDeliveryLog>,
}

pub fn engine() -> TestEngine {
    let orders = Arc::new(InMemoryOrderStore::new());
    let payments = Arc::new(InMemoryPaymentStore::new());
    let inventory = Arc::new(InMemoryInventoryStore::new());
    let deliveries = Arc::new(InMemoryDeliveryLog::new());
    let clock = Arc::new(SystemClock);
    let config = test_config();

    let registry = GatewayRegistry::from_config(
        &config,
        Arc::new(SandboxTransport::new()),
        clock.clone(),
    );
    let machine = Arc::new(OrderStateMachine::new(
        orders.clone(),
        inventory.clone(),
        Arc::new(LoggingNotifier::new()),
        clock.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        payments.clone(),
        machine.clone(),
        config.tolerance,
        clock.clone(),
    ));
    let initiator = PaymentInitiator::new(
        orders.clone(),
        payments.clone(),
        registry.clone(),
        clock.clone(),
    );
    let (ingress, queue) = WebhookIngress::new(registry, deliveries.clone(), clock);

    TestEngine {
        machine,
        reconciler,
        ingress,
        queue,
        initiator,
        orders,
        payments,
        inventory,
        deliveries,
    }
}

pub fn address() -> Address {
    Address {
        line1: "21 Freedom Way".to_string(),
        line2: None,
        city: "Lagos".to_string(),
        state: Some("Lagos".to_string()),
        postal_code: None,
        country: "NG".to_string(),
    }
}

pub fn draft(
    order_number: &str,
    sku: &str,
    quantity: u32,
    unit_price: Decimal,
    currency: Currency,
) -> OrderDraft {
    let unit = Money::new(unit_price).unwrap();
    let subtotal = Money::new(unit_price * Decimal::from(quantity)).unwrap();
    OrderDraft {
        store_id: Uuid::new_v4(),
        customer_id: None,
        order_number: order_number.to_string(),
        subtotal,
        tax: Money::ZERO,
        shipping: Money::ZERO,
        discount: Money::ZERO,
        total: subtotal,
        currency,
        shipping_address: address(),
        billing_address: address(),
        lines: vec![OrderLine {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            variant_id: None,
            sku: sku.to_string(),
            product_name: "Test product".to_string(),
            variant_name: None,
            unit_price: unit,
            quantity,
            line_total: subtotal,
        }],
    }
}

/// Inserts a PENDING payment directly, as the initiation path would.
pub async fn seed_payment(
    payments: &InMemoryPaymentStore,
    order: &Order,
    gateway: GatewayKind,
    reference: &str,
) -> Payment {
    let payment = Payment::new(
        order.id,
        order.total,
        order.currency,
        gateway,
        reference.to_string(),
        Utc::now(),
    );
    payments.insert(payment.clone()).await.unwrap();
    payment
}

pub fn hmac_sha512_hex(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub fn hmac_sha256_hex(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Raw body + headers for a paystack `charge.success` delivery, signed the
/// way the provider signs: HMAC-SHA512 of the exact body bytes.
pub fn paystack_success(reference: &str, amount_minor: i64, currency: &str) -> (Vec<u8>, WebhookHeaders) {
    let body = serde_json::to_vec(&serde_json::json!({
        "event": "charge.success",
        "data": {
            "reference": reference,
            "amount": amount_minor,
            "currency": currency,
            "channel": "card",
            "gateway_response": "Successful"
        }
    }))
    .unwrap();
    let signature = hmac_sha512_hex(PAYSTACK_SECRET_KEY, &body);
    let headers = WebhookHeaders::from([("x-paystack-signature", signature.as_str())]);
    (body, headers)
}

pub fn mpesa_callback(checkout_request_id: &str, result_code: i64, amount: i64) -> (Vec<u8>, WebhookHeaders) {
    let callback = if result_code == 0 {
        serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-1",
                    "CheckoutRequestID": checkout_request_id,
                    "ResultCode": result_code,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": amount},
                            {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                            {"Name": "PhoneNumber", "Value": 254708374149u64}
                        ]
                    }
                }
            }
        })
    } else {
        serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-1",
                    "CheckoutRequestID": checkout_request_id,
                    "ResultCode": result_code,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        })
    };
    let body = serde_json::to_vec(&callback).unwrap();
    let signature = hmac_sha256_hex(MPESA_WEBHOOK_SECRET, &body);
    let headers = WebhookHeaders::from([("x-mpesa-signature", signature.as_str())]);
    (body, headers)
}

pub fn flutterwave_completed(tx_ref: &str, amount: Decimal, currency: &str) -> (Vec<u8>, WebhookHeaders) {
    let body = serde_json::to_vec(&serde_json::json!({
        "event": "charge.completed",
        "data": {
            "tx_ref": tx_ref,
            "flw_ref": "FLW-MOCK-1",
            "amount": amount,
            "currency": currency,
            "payment_type": "card",
            "status": "successful"
        }
    }))
    .unwrap();
    let headers = WebhookHeaders::from([("verif-hash", FLUTTERWAVE_VERIF_HASH)]);
    (body, headers)
}
