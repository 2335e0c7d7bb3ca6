use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Policy for how far a provider-reported amount may drift from the recorded
/// payment amount before reconciliation rejects the event. Absolute, in the
/// currency's major unit; currency mismatches are never tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountTolerance {
    pub absolute: Decimal,
}

impl Default for AmountTolerance {
    fn default() -> Self {
        // Covers sub-unit rounding drift (minor-unit division), nothing more.
        Self { absolute: dec!(0.01) }
    }
}

impl AmountTolerance {
    pub fn within(&self, recorded: Decimal, reported: Decimal) -> bool {
        (recorded - reported).abs() <= self.absolute
    }
}

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: String,
    pub passkey: String,
    pub callback_url: String,
    /// Shared secret for the HMAC-SHA256 callback signature.
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub base_url: String,
    pub secret_key: String,
    pub public_key: String,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FlutterwaveConfig {
    pub base_url: String,
    pub secret_key: String,
    pub public_key: String,
    /// Pre-shared static value compared against the `verif-hash` header.
    pub webhook_secret_hash: String,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub tolerance: AmountTolerance,
    pub mpesa: Option<MpesaConfig>,
    pub paystack: Option<PaystackConfig>,
    pub flutterwave: Option<FlutterwaveConfig>,
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl EngineConfig {
    /// Loads gateway credentials and the tolerance policy from the
    /// environment. A gateway with incomplete credentials is simply absent
    /// and will not be offered by the capability filter.
    pub fn from_env() -> Self {
        let tolerance = env("PAYMENT_AMOUNT_TOLERANCE")
            .and_then(|v| v.parse::<Decimal>().ok())
            .map(|absolute| AmountTolerance { absolute })
            .unwrap_or_default();

        let mpesa = match (
            env("MPESA_CONSUMER_KEY"),
            env("MPESA_CONSUMER_SECRET"),
            env("MPESA_PASSKEY"),
            env("MPESA_WEBHOOK_SECRET"),
        ) {
            (Some(consumer_key), Some(consumer_secret), Some(passkey), Some(webhook_secret)) => {
                Some(MpesaConfig {
                    base_url: env("MPESA_BASE_URL")
                        .unwrap_or_else(|| "https://sandbox.safaricom.co.ke".to_string()),
                    consumer_key,
                    consumer_secret,
                    short_code: env("MPESA_SHORT_CODE").unwrap_or_else(|| "174379".to_string()),
                    passkey,
                    callback_url: env("MPESA_CALLBACK_URL")
                        .unwrap_or_else(|| "https://localhost/webhooks/mpesa".to_string()),
                    webhook_secret,
                })
            }
            _ => None,
        };

        let paystack = match (env("PAYSTACK_SECRET_KEY"), env("PAYSTACK_PUBLIC_KEY")) {
            (Some(secret_key), Some(public_key)) => Some(PaystackConfig {
                base_url: env("PAYSTACK_BASE_URL")
                    .unwrap_or_else(|| "https://api.paystack.co".to_string()),
                secret_key,
                public_key,
                callback_url: env("PAYSTACK_CALLBACK_URL"),
            }),
            _ => None,
        };

        let flutterwave = match (
            env("FLUTTERWAVE_SECRET_KEY"),
            env("FLUTTERWAVE_PUBLIC_KEY"),
            env("FLUTTERWAVE_WEBHOOK_SECRET_HASH"),
        ) {
            (Some(secret_key), Some(public_key), Some(webhook_secret_hash)) => {
                Some(FlutterwaveConfig {
                    base_url: env("FLUTTERWAVE_BASE_URL")
                        .unwrap_or_else(|| "https://api.flutterwave.com/v3".to_string()),
                    secret_key,
                    public_key,
                    webhook_secret_hash,
                    redirect_url: env("FLUTTERWAVE_REDIRECT_URL"),
                })
            }
            _ => None,
        };

        EngineConfig {
            tolerance,
            mpesa,
            paystack,
            flutterwave,
        }
    }
}
