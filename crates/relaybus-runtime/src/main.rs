//! relaybus demo service.
//!
//! - Loads `relaybus.yaml` when present, then applies env overrides
//! - Connects to `BUS_ADDRESS` (defaults to the in-memory bus)
//! - Exposes `car-service.:brand` and calls it once

use std::path::Path;

use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use relaybus_core::BusRequest;
use relaybus_runtime::{config, Bus, BusConfig, RequestOptions, SubscriptionOptions};

const CONFIG_FILE: &str = "relaybus.yaml";

#[tokio::main]
async fn main() -> relaybus_core::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let mut cfg = if Path::new(CONFIG_FILE).exists() {
        config::load_from_file(CONFIG_FILE)?
    } else {
        BusConfig::default()
    };
    cfg.apply_env()?;

    let address = std::env::var("BUS_ADDRESS").unwrap_or_else(|_| "nats://mock".to_string());
    let bus = Bus::new(cfg)?;
    bus.connect(address.as_str()).await?;

    bus.subscribe(
        SubscriptionOptions::new("car-service.:brand").no_queue_group(),
        |req: BusRequest| {
            let brand = req.params.get("brand").cloned().unwrap_or_default();
            json!({ "brand": brand, "doors": 4 })
        },
    )
    .await?;

    let res = bus
        .request(
            "car-service.volvo",
            BusRequest::default(),
            RequestOptions::default().timeout_ms(1000),
        )
        .await?;
    tracing::info!(status = res.status, data = %res.data, "self-request answered");

    tracing::info!(service = %bus.origin().service, "relaybus demo running, ctrl-c to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    bus.close_all().await;
    Ok(())
}
