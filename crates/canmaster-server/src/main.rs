//! CAN bus master controller binary.
//!
//! # Usage
//!
//! ```bash
//! # Run against a real SocketCAN interface
//! canmaster-server --can-interface can0 --definitions-csv messages.csv
//!
//! # Run against an in-memory loopback bus (nothing to send frames on it yet)
//! canmaster-server
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use canmaster_server::{Args, Engine, GatewayRegistry, LoopbackBusPort, RedbStorage, SocketCanPort};

const GATEWAY_EVENT_CHANNEL_CAPACITY: usize = 256;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let resolved = args.resolve()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&resolved.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("canmaster-server starting");

    if resolved.definitions_csv.is_none() {
        tracing::warn!("no definitions CSV provided; seeding the registry from persisted state, if any");
    }
    let storage = RedbStorage::open(&resolved.persistence_path)?;
    let engine = Engine::restore(storage, resolved.master_id, now_ms(), resolved.definitions_csv.as_deref())?;

    let gateway = Arc::new(GatewayRegistry::new());
    let (events_tx, events_rx) = mpsc::channel(GATEWAY_EVENT_CHANNEL_CAPACITY);
    let gateway_task = tokio::spawn(canmaster_server_gateway_run(resolved.bind, gateway.clone(), events_tx));

    match resolved.can_interface {
        Some(interface) => {
            tracing::info!(interface, "opening SocketCAN bus");
            let bus = SocketCanPort::open(&interface)?;
            canmaster_server::run(engine, bus, gateway, events_rx, now_ms).await;
        }
        None => {
            tracing::warn!("no CAN interface provided; running against an idle loopback bus");
            let (bus, _handle) = LoopbackBusPort::pair(64);
            canmaster_server::run(engine, bus, gateway, events_rx, now_ms).await;
        }
    }

    gateway_task.abort();
    Ok(())
}

async fn canmaster_server_gateway_run(
    bind: std::net::SocketAddr,
    gateway: Arc<GatewayRegistry>,
    events_tx: mpsc::Sender<canmaster_server::GatewayEvent>,
) {
    if let Err(e) = canmaster_server::gateway_run(bind, gateway, events_tx).await {
        tracing::error!(error = %e, "operator gateway stopped");
    }
}
