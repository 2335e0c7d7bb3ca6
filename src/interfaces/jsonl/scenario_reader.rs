use crate::domain::order::{OrderDraft, OrderStatus};
use crate::domain::payment::GatewayKind;
use crate::error::EngineError;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};

/// One line of a replay scenario. Orders are referred to by their order
/// number, since identifiers are assigned by the engine during the run.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScenarioOp {
    SeedStock {
        sku: String,
        quantity: u32,
    },
    CreateOrder {
        order: OrderDraft,
    },
    InitiatePayment {
        order: String,
        gateway: GatewayKind,
        customer_email: String,
        #[serde(default)]
        customer_phone: Option<String>,
        #[serde(default)]
        customer_name: Option<String>,
        #[serde(default)]
        reference: Option<String>,
    },
    Webhook {
        gateway: GatewayKind,
        /// Raw body exactly as the provider would send it; signatures are
        /// checked over these bytes.
        body: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Transition {
        order: String,
        target: OrderStatus,
    },
}

/// Streams scenario ops from JSONL input, one op per non-empty line.
pub struct ScenarioReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> ScenarioReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
        }
    }

    pub fn ops(self) -> impl Iterator<Item = Result<ScenarioOp, EngineError>> {
        self.reader
            .lines()
            .filter(|line| match line {
                Ok(l) => !l.trim().is_empty(),
                Err(_) => true,
            })
            .map(|line| {
                let line = line?;
                serde_json::from_str(&line).map_err(EngineError::from)
            })
    }
}
