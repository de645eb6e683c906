//! Shared helpers for the runtime integration tests.

#![allow(dead_code)]

use std::time::Duration;

use relaybus_runtime::{Bus, BusConfig, Subscription};

pub const MOCK: &str = "nats://mock";

pub fn config(service: &str) -> BusConfig {
    BusConfig {
        service_name: service.to_string(),
        schemas_dir: "does-not-exist".to_string(),
        ..BusConfig::default()
    }
}

/// A bus connected to its own in-memory transport.
pub async fn mock_bus(service: &str) -> Bus {
    connected(config(service)).await
}

pub async fn connected(cfg: BusConfig) -> Bus {
    let bus = Bus::new(cfg).expect("valid config");
    bus.connect(MOCK).await.expect("connect to mock bus");
    bus
}

/// Wait until `sub` holds its own transport subscription again.
pub async fn wait_attached(sub: &Subscription) {
    for _ in 0..100 {
        if sub.is_attached() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never re-attached", sub.subject());
}
