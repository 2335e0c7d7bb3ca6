use clap::Parser;
use miette::{IntoDiagnostic, Result};
use orderflow::application::ingress::{WebhookIngress, run_reconciliation_worker};
use orderflow::application::initiation::{InitiatePayment, PaymentInitiator};
use orderflow::application::reconciler::Reconciler;
use orderflow::application::state_machine::OrderStateMachine;
use orderflow::config::EngineConfig;
use orderflow::domain::ports::{
    DeliveryLogRef, InventoryStoreRef, OrderStoreRef, PaymentStoreRef, SystemClock,
};
use orderflow::error::EngineError;
use orderflow::gateways::{GatewayRegistry, WebhookHeaders};
use orderflow::infrastructure::in_memory::{
    InMemoryDeliveryLog, InMemoryInventoryStore, InMemoryOrderStore, InMemoryPaymentStore,
};
use orderflow::infrastructure::sandbox::{LoggingNotifier, SandboxTransport};
use orderflow::interfaces::jsonl::scenario_reader::{ScenarioOp, ScenarioReader};
use serde_json::json;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Replays a JSONL scenario (stock seeds, orders, payment initiations,
/// signed webhook deliveries, operator transitions) through the engine and
/// prints the final orders, payments and delivery count. Provider calls go
/// through the offline sandbox transport.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input scenario JSONL file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

struct Stores {
    orders: OrderStoreRef,
    payments: PaymentStoreRef,
    inventory: InventoryStoreRef,
    deliveries: DeliveryLogRef,
}

fn build_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(path) = db_path {
        let store = orderflow::infrastructure::rocksdb::RocksDbStore::open(path)
            .into_diagnostic()?;
        return Ok(Stores {
            orders: Arc::new(store.clone()),
            payments: Arc::new(store.clone()),
            inventory: Arc::new(store.clone()),
            deliveries: Arc::new(store),
        });
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
        );
    }

    Ok(Stores {
        orders: Arc::new(InMemoryOrderStore::new()),
        payments: Arc::new(InMemoryPaymentStore::new()),
        inventory: Arc::new(InMemoryInventoryStore::new()),
        deliveries: Arc::new(InMemoryDeliveryLog::new()),
    })
}

async fn order_id_by_number(orders: &OrderStoreRef, number: &str) -> Result<Uuid, EngineError> {
    orders
        .all()
        .await?
        .into_iter()
        .find(|o| o.order_number == number)
        .map(|o| o.id)
        .ok_or_else(|| EngineError::Validation(format!("no order with number {number}")))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    let stores = build_stores(cli.db_path)?;

    let clock = Arc::new(SystemClock);
    let registry = GatewayRegistry::from_config(
        &config,
        Arc::new(SandboxTransport::new()),
        clock.clone(),
    );

    let machine = Arc::new(OrderStateMachine::new(
        stores.orders.clone(),
        stores.inventory.clone(),
        Arc::new(LoggingNotifier::new()),
        clock.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        stores.payments.clone(),
        machine.clone(),
        config.tolerance,
        clock.clone(),
    ));
    let initiator = PaymentInitiator::new(
        stores.orders.clone(),
        stores.payments.clone(),
        registry.clone(),
        clock.clone(),
    );
    let (ingress, mut queue) = WebhookIngress::new(registry, stores.deliveries.clone(), clock);

    let file = File::open(cli.input).into_diagnostic()?;
    for op in ScenarioReader::new(file).ops() {
        let result = match op {
            Ok(op) => apply_op(op, &machine, &initiator, &ingress, &stores).await,
            Err(e) => {
                eprintln!("Error reading scenario op: {e}");
                continue;
            }
        };
        if let Err(e) = result {
            eprintln!("Error applying scenario op: {e}");
        }
        // Settle queued webhook events before the next op so the replay is
        // deterministic; a server deployment runs the worker concurrently.
        while let Ok(event) = queue.try_recv() {
            if let Err(e) = reconciler.reconcile(&event).await {
                eprintln!("Error reconciling event: {e}");
            }
        }
    }

    // Dropping the ingress closes the queue; the worker drains what is left.
    drop(ingress);
    run_reconciliation_worker(queue, reconciler).await;

    let mut orders = stores.orders.all().await.into_diagnostic()?;
    orders.sort_by(|a, b| a.order_number.cmp(&b.order_number));
    let mut payments = stores.payments.all().await.into_diagnostic()?;
    payments.sort_by(|a, b| a.reference.cmp(&b.reference));
    let deliveries = stores.deliveries.all().await.into_diagnostic()?;

    let summary = json!({
        "orders": orders,
        "payments": payments,
        "deliveries": deliveries.len(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).into_diagnostic()?
    );

    Ok(())
}

async fn apply_op(
    op: ScenarioOp,
    machine: &Arc<OrderStateMachine>,
    initiator: &PaymentInitiator,
    ingress: &WebhookIngress,
    stores: &Stores,
) -> Result<(), EngineError> {
    match op {
        ScenarioOp::SeedStock { sku, quantity } => {
            stores.inventory.set_stock(&sku, quantity).await?;
        }
        ScenarioOp::CreateOrder { order } => {
            machine.create(order).await?;
        }
        ScenarioOp::InitiatePayment {
            order,
            gateway,
            customer_email,
            customer_phone,
            customer_name,
            reference,
        } => {
            let order_id = order_id_by_number(&stores.orders, &order).await?;
            initiator
                .initiate(InitiatePayment {
                    order_id,
                    gateway,
                    customer_email,
                    customer_phone,
                    customer_name,
                    reference,
                })
                .await?;
        }
        ScenarioOp::Webhook {
            gateway,
            body,
            headers,
        } => {
            let mut webhook_headers = WebhookHeaders::new();
            for (name, value) in headers {
                webhook_headers.insert(&name, value);
            }
            ingress
                .receive(gateway, body.as_bytes(), &webhook_headers)
                .await?;
        }
        ScenarioOp::Transition { order, target } => {
            let order_id = order_id_by_number(&stores.orders, &order).await?;
            machine.transition(order_id, target).await?;
        }
    }
    Ok(())
}
