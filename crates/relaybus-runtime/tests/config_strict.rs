#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashMap;

use relaybus_core::protocol::codec::CompressionStrategy;
use relaybus_runtime::config::{self, derive_instance_id, BusConfig, ConnectOptions};

#[test]
fn deny_unknown_fields() {
    let bad = r#"
service_name: "car-service"
chunk_sise: 1024 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert!(err.to_string().contains("chunk_sise"), "{err}");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("service_name: car-service\n").expect("must parse");
    assert_eq!(cfg.service_name, "car-service");
    assert_eq!(cfg.compress_threshold, 921_600);
    assert_eq!(cfg.chunk_size, 921_600);
    assert_eq!(cfg.chunk_timeout_ms, 5000);
    assert_eq!(cfg.max_chunks, 1024);
    assert_eq!(cfg.compression_strategy, CompressionStrategy::Auto);
    assert!(!cfg.disable_schema_cache);
    assert_eq!(cfg.schemas_dir, "lib/schemas");
}

#[test]
fn threshold_above_chunk_size_is_rejected() {
    let bad = r#"
compress_threshold: 2048
chunk_size: 1024
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert!(
        err.to_string()
            .contains("compress_threshold must be less than or equal chunk_size, current values are 2048 and 1024"),
        "{err}"
    );
}

#[test]
fn zero_chunk_timeout_is_rejected() {
    assert!(config::load_from_str("chunk_timeout_ms: 0\n").is_err());
}

#[test]
fn zero_max_chunks_is_rejected() {
    let err = config::load_from_str("max_chunks: 0\n").expect_err("must fail");
    assert!(err.to_string().contains("max_chunks must be greater than 0"), "{err}");
    let cfg = config::load_from_str("max_chunks: 16\n").expect("must parse");
    assert_eq!(cfg.codec_policy().max_chunks, 16);
}

#[test]
fn env_overrides_file_values() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("SERVICE_NAME", "fleet-service"),
        ("CHUNK_SIZE", "4096"),
        ("COMPRESS_THRESHOLD", "1024"),
        ("COMPRESSION_STRATEGY", "manual"),
        ("DISABLE_SCHEMA_CACHE", "true"),
        ("SCHEMAS_PATH", "schemas"),
    ]);
    let mut cfg = BusConfig::default();
    cfg.apply_env_from(|k| vars.get(k).map(|v| v.to_string())).unwrap();

    assert_eq!(cfg.service_name, "fleet-service");
    assert_eq!(cfg.chunk_size, 4096);
    assert_eq!(cfg.compress_threshold, 1024);
    assert_eq!(cfg.compression_strategy, CompressionStrategy::Manual);
    assert!(cfg.disable_schema_cache);
    assert_eq!(cfg.schemas_dir, "schemas");
    cfg.validate().unwrap();
}

#[test]
fn bad_env_values_fail() {
    let mut cfg = BusConfig::default();
    assert!(cfg
        .apply_env_from(|k| (k == "COMPRESSION_STRATEGY").then(|| "sometimes".to_string()))
        .is_err());
    assert!(cfg
        .apply_env_from(|k| (k == "CHUNK_SIZE").then(|| "big".to_string()))
        .is_err());
}

#[test]
fn instance_id_is_derived_from_service_name() {
    let id = derive_instance_id("car-service");
    let (service, suffix) = id.rsplit_once('.').unwrap();
    assert_eq!(service, "car-service");
    assert_eq!(suffix.len(), 8);
    assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));

    let cfg = BusConfig {
        instance_id: "fixed".into(),
        ..BusConfig::default()
    };
    assert_eq!(cfg.resolved_instance_id(), "fixed");
}

#[test]
fn connect_options_from_addresses() {
    let single = ConnectOptions::from("nats://mock");
    assert!(single.is_mock());
    assert!(!single.singleton);

    let many = ConnectOptions::new(vec!["nats://a:4222".to_string(), "nats://b:4222".to_string()])
        .singleton()
        .schemas_dir("schemas");
    assert!(!many.is_mock());
    assert!(many.singleton);
    assert_eq!(many.addresses.len(), 2);
    assert_eq!(many.schemas_dir.as_deref(), Some("schemas"));
}
