//! Schema validation: built-in validator, gateway and the subscription pipeline.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::fs;

use serde_json::{json, Value};

use relaybus_core::{BusRequest, ErrorCode};
use relaybus_runtime::schema::{
    hash_schema, JsonSchemaValidator, SchemaGateway, SchemaValidator, ValidationFailure, ValidationTarget,
};
use relaybus_runtime::{Bus, ConnectOptions, RequestOptions, SubscriptionOptions};

fn car_schema() -> Value {
    json!({
        "$id": "Car",
        "type": "object",
        "properties": {
            "brand": { "type": "string", "minLength": 1 },
            "doors": { "type": "integer", "minimum": 2, "maximum": 5 },
            "tags": { "type": "array", "items": { "type": "string" }, "maxItems": 3 },
            "fuel": { "enum": ["petrol", "diesel", "electric"] }
        },
        "required": ["brand"],
        "additionalProperties": false
    })
}

fn invalid_detail(validator: &JsonSchemaValidator, value: Value) -> String {
    match validator.validate("Car", &value) {
        Err(ValidationFailure::Invalid(detail)) => detail,
        other => panic!("expected invalid, got {other:?}"),
    }
}

#[test]
fn validator_reports_first_error() {
    let validator = JsonSchemaValidator::new();
    validator.add_schema(car_schema()).unwrap();

    validator
        .validate("Car", &json!({ "brand": "volvo", "doors": 4, "fuel": "electric" }))
        .unwrap();

    assert_eq!(invalid_detail(&validator, json!({})), "data must have required property 'brand'");
    assert_eq!(
        invalid_detail(&validator, json!({ "brand": "volvo", "doors": "five" })),
        "data/doors must be integer"
    );
    assert!(invalid_detail(&validator, json!({ "brand": "volvo", "wheels": 4 })).contains("wheels"));
    assert!(invalid_detail(&validator, json!({ "brand": "volvo", "doors": 7 })).contains("<= 5"));
    assert!(invalid_detail(&validator, json!({ "brand": "volvo", "tags": ["a", "b", "c", "d"] })).contains("items"));
    assert!(invalid_detail(&validator, json!({ "brand": "volvo", "fuel": "coal" })).starts_with("data/fuel"));
}

#[test]
fn validator_resolves_refs_by_id() {
    let validator = JsonSchemaValidator::new();
    validator.add_schema(car_schema()).unwrap();
    validator
        .add_schema(json!({
            "$id": "Garage",
            "type": "object",
            "properties": { "cars": { "type": "array", "items": { "$ref": "Car" } } }
        }))
        .unwrap();

    validator.validate("Garage", &json!({ "cars": [{ "brand": "saab" }] })).unwrap();
    match validator.validate("Garage", &json!({ "cars": [{}] })) {
        Err(ValidationFailure::Invalid(detail)) => assert!(detail.contains("brand"), "{detail}"),
        other => panic!("expected invalid, got {other:?}"),
    }
}

#[test]
fn unknown_schema_is_a_schema_failure() {
    let validator = JsonSchemaValidator::new();
    assert_eq!(
        validator.validate("Nope", &json!({})),
        Err(ValidationFailure::Schema("no schema with key or ref \"Nope\"".into()))
    );
}

#[test]
fn gateway_maps_failures_to_error_codes() {
    let gateway = SchemaGateway::new(false);
    gateway.add_schema(car_schema()).unwrap();

    let req = gateway.validate("Car", &json!({}), ValidationTarget::Request).unwrap_err();
    assert_eq!(req.status, 400);
    assert_eq!(req.error_code(), Some(ErrorCode::BadRequest.as_str()));

    let res = gateway.validate("Car", &json!({}), ValidationTarget::Response).unwrap_err();
    assert_eq!(res.status, 500);
    assert_eq!(res.error_code(), Some(ErrorCode::BadResponse.as_str()));

    let missing = gateway.validate("Nope", &json!({}), ValidationTarget::Request).unwrap_err();
    assert_eq!(missing.error_code(), Some(ErrorCode::InternalServerError.as_str()));
}

#[test]
fn gateway_migrates_legacy_id_and_skips_anonymous() {
    let gateway = SchemaGateway::new(false);
    let id = gateway.add_schema(json!({ "id": "Legacy", "type": "string" })).unwrap();
    assert_eq!(id.as_deref(), Some("Legacy"));
    assert_eq!(gateway.get("Legacy").unwrap()["$id"], "Legacy");

    assert_eq!(gateway.add_schema(json!({ "type": "string" })).unwrap(), None);
    gateway.add_schema(json!({ "$id": "Legacy", "type": "number" })).unwrap();
    assert_eq!(gateway.all().len(), 1);
}

#[test]
fn inline_schemas_are_keyed_by_content_hash() {
    let gateway = SchemaGateway::new(false);
    let schema = json!({ "type": "object", "required": ["doors"] });
    let id = gateway.add_inline(schema.clone()).unwrap();
    assert_eq!(id, hash_schema(&schema));
    assert_eq!(id.len(), 64);

    let again = gateway.add_inline(json!({ "$id": "ignored", "type": "object", "required": ["doors"] })).unwrap();
    assert_eq!(again, id);
}

#[test]
fn gateway_loads_schema_files_once() {
    let dir = std::env::temp_dir().join(format!("relaybus-schemas-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("car.json"), car_schema().to_string()).unwrap();
    fs::write(dir.join("notes.txt"), "not a schema").unwrap();

    let gateway = SchemaGateway::new(false);
    gateway.init(&dir).unwrap();
    assert!(gateway.get("Car").is_some());

    fs::write(dir.join("wheel.json"), json!({ "$id": "Wheel", "type": "object" }).to_string()).unwrap();
    gateway.init(&dir).unwrap();
    assert!(gateway.get("Wheel").is_none(), "cache keeps the first load");

    let uncached = SchemaGateway::new(true);
    uncached.init(&dir).unwrap();
    fs::remove_file(dir.join("car.json")).unwrap();
    uncached.init(&dir).unwrap();
    assert!(uncached.get("Car").is_none());
    assert!(uncached.get("Wheel").is_some());

    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn invalid_response_becomes_bad_response() {
    let bus = common::mock_bus("car-service").await;
    bus.subscribe(
        SubscriptionOptions::new("car-service.get-car").response_schema(json!({
            "type": "object",
            "properties": { "doors": { "type": "integer" } },
            "required": ["doors"]
        })),
        |_req: BusRequest| json!({ "doors": "five" }),
    )
    .await
    .unwrap();

    let err = bus
        .request("car-service.get-car", BusRequest::default(), RequestOptions::default().timeout_ms(1000))
        .await
        .expect_err("response must be rejected");
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.code(), Some("BAD_RESPONSE"));
    assert_eq!(
        err.response().unwrap().error.as_ref().unwrap().detail.as_deref(),
        Some("data/doors must be integer")
    );
}

#[tokio::test]
async fn skipped_response_validation_lets_data_through() {
    let bus = common::mock_bus("car-service").await;
    bus.subscribe(
        SubscriptionOptions::new("car-service.get-car")
            .response_schema(json!({ "type": "object", "required": ["doors"] }))
            .skip_response_validation(),
        |_req: BusRequest| json!({}),
    )
    .await
    .unwrap();

    let res = bus
        .request("car-service.get-car", BusRequest::default(), RequestOptions::default().timeout_ms(1000))
        .await
        .unwrap();
    assert_eq!(res.status, 200);
}

#[tokio::test]
async fn invalid_request_never_reaches_handler() {
    let dir = std::env::temp_dir().join(format!("relaybus-schemas-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("car.json"), car_schema().to_string()).unwrap();

    let bus = Bus::new(common::config("car-service")).unwrap();
    bus.connect(ConnectOptions::new(common::MOCK).schemas_dir(dir.to_string_lossy()))
        .await
        .unwrap();
    bus.subscribe(
        SubscriptionOptions::new("car-service.create-car").request_schema("Car"),
        |_req: BusRequest| -> Value { panic!("handler must not run") },
    )
    .await
    .unwrap();

    let res = bus
        .request(
            "car-service.create-car",
            BusRequest::new(json!({ "doors": 4 })),
            RequestOptions::default().timeout_ms(1000).no_throw(),
        )
        .await
        .unwrap();
    assert_eq!(res.status, 400);
    assert_eq!(res.error_code(), Some("BAD_REQUEST"));
    let detail = res.error.unwrap().detail.unwrap();
    assert!(detail.contains("'brand'"), "{detail}");

    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn missing_request_schema_is_internal_error() {
    let bus = common::mock_bus("car-service").await;
    bus.subscribe(
        SubscriptionOptions::new("car-service.create-car").request_schema("NotLoaded"),
        |_req: BusRequest| json!({}),
    )
    .await
    .unwrap();

    let err = bus
        .request("car-service.create-car", BusRequest::default(), RequestOptions::default().timeout_ms(1000))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("INTERNAL_SERVER_ERROR"));
}

fn detail_of(validator: &JsonSchemaValidator, id: &str, value: Value) -> String {
    match validator.validate(id, &value) {
        Err(ValidationFailure::Invalid(detail)) => detail,
        other => panic!("expected invalid, got {other:?}"),
    }
}

#[test]
fn validator_checks_string_and_number_keywords() {
    let validator = JsonSchemaValidator::new();
    validator
        .add_schema(json!({
            "$id": "Driver",
            "type": "object",
            "properties": {
                "email": { "type": "string", "format": "email" },
                "licence": { "type": "string", "pattern": "^[0-9]+$" },
                "age": { "type": "integer", "exclusiveMinimum": 17, "exclusiveMaximum": 100 },
                "stops": { "type": "number", "multipleOf": 5 },
                "born": { "type": "string", "format": "date" },
                "nickname": { "type": "string", "format": "car-plate" }
            }
        }))
        .unwrap();

    validator
        .validate(
            "Driver",
            &json!({ "email": "joel@example.com", "licence": "0042", "age": 18, "stops": 15, "born": "1990-02-28", "nickname": "anything" }),
        )
        .unwrap();

    assert_eq!(
        detail_of(&validator, "Driver", json!({ "email": "not-an-email" })),
        "data/email must match format \"email\""
    );
    assert_eq!(
        detail_of(&validator, "Driver", json!({ "licence": "abc" })),
        "data/licence must match pattern \"^[0-9]+$\""
    );
    assert_eq!(detail_of(&validator, "Driver", json!({ "age": 17 })), "data/age must be > 17");
    assert_eq!(detail_of(&validator, "Driver", json!({ "age": 100 })), "data/age must be < 100");
    assert_eq!(detail_of(&validator, "Driver", json!({ "stops": 7 })), "data/stops must be multiple of 5");
    assert!(detail_of(&validator, "Driver", json!({ "born": "1990-02-30" })).contains("format \"date\""));
}

#[test]
fn validator_checks_object_and_array_keywords() {
    let validator = JsonSchemaValidator::new();
    validator
        .add_schema(json!({
            "$id": "Fleet",
            "type": "object",
            "minProperties": 1,
            "propertyNames": { "pattern": "^[a-z]+$" },
            "dependencies": { "leased": ["lessor"] },
            "properties": {
                "leased": { "type": "boolean" },
                "lessor": { "type": "string" },
                "plates": { "type": "array", "uniqueItems": true, "contains": { "const": "ABC123" } },
                "pair": { "type": "array", "items": [{ "type": "string" }], "additionalItems": false }
            },
            "patternProperties": { "^x": { "type": "integer" } },
            "additionalProperties": false
        }))
        .unwrap();

    validator
        .validate("Fleet", &json!({ "leased": true, "lessor": "bank", "plates": ["ABC123"], "xtra": 1 }))
        .unwrap();

    assert_eq!(detail_of(&validator, "Fleet", json!({})), "data must NOT have fewer than 1 properties");
    assert_eq!(
        detail_of(&validator, "Fleet", json!({ "leased": true })),
        "data must have property lessor when property leased is present"
    );
    assert_eq!(
        detail_of(&validator, "Fleet", json!({ "Leased": true })),
        "data property name 'Leased' is invalid"
    );
    assert_eq!(
        detail_of(&validator, "Fleet", json!({ "plates": ["ABC123", "ABC123"] })),
        "data/plates must NOT have duplicate items (items ## 0 and 1 are identical)"
    );
    assert_eq!(
        detail_of(&validator, "Fleet", json!({ "plates": ["XYZ"] })),
        "data/plates must contain at least 1 valid item(s)"
    );
    assert_eq!(
        detail_of(&validator, "Fleet", json!({ "pair": ["a", "b"] })),
        "data/pair must NOT have more than 1 items"
    );
    assert_eq!(detail_of(&validator, "Fleet", json!({ "xtra": "one" })), "data/xtra must be integer");
}

#[test]
fn validator_checks_conditionals() {
    let validator = JsonSchemaValidator::new();
    validator
        .add_schema(json!({
            "$id": "Trip",
            "type": "object",
            "not": { "required": ["banned"] },
            "if": { "properties": { "kind": { "const": "cargo" } }, "required": ["kind"] },
            "then": { "required": ["weight"] },
            "else": { "required": ["seats"] }
        }))
        .unwrap();

    validator.validate("Trip", &json!({ "kind": "cargo", "weight": 10 })).unwrap();
    validator.validate("Trip", &json!({ "seats": 4 })).unwrap();
    assert_eq!(detail_of(&validator, "Trip", json!({ "kind": "cargo" })), "data must match \"then\" schema");
    assert_eq!(detail_of(&validator, "Trip", json!({})), "data must match \"else\" schema");
    assert_eq!(detail_of(&validator, "Trip", json!({ "seats": 2, "banned": true })), "data must NOT be valid");
}

#[test]
fn broken_pattern_is_a_schema_failure() {
    let validator = JsonSchemaValidator::new();
    validator
        .add_schema(json!({ "$id": "Broken", "type": "string", "pattern": "([a-z" }))
        .unwrap();
    assert!(matches!(
        validator.validate("Broken", &json!("abc")),
        Err(ValidationFailure::Schema(_))
    ));
}

#[test]
fn missing_body_is_validated_as_empty_object() {
    let gateway = SchemaGateway::new(false);
    let id = gateway
        .add_inline(json!({ "type": "object", "properties": { "q": { "type": "string" } } }))
        .unwrap();
    gateway.validate(&id, &Value::Null, ValidationTarget::Request).unwrap();

    let err = gateway.validate("Car", &Value::Null, ValidationTarget::Request);
    assert!(err.is_err(), "Car is not loaded in this gateway");

    gateway.add_schema(car_schema()).unwrap();
    let res = gateway.validate("Car", &Value::Null, ValidationTarget::Request).unwrap_err();
    assert_eq!(res.error.unwrap().detail.as_deref(), Some("data must have required property 'brand'"));
}

#[tokio::test]
async fn bodiless_request_passes_object_schema() {
    let bus = common::mock_bus("car-service").await;
    bus.subscribe(
        SubscriptionOptions::new("car-service.search")
            .request_schema(json!({ "type": "object", "properties": { "q": { "type": "string" } } })),
        |_req: BusRequest| json!({ "hits": [] }),
    )
    .await
    .unwrap();

    let res = bus
        .request("car-service.search", BusRequest::default(), RequestOptions::default().timeout_ms(1000))
        .await
        .unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.data, json!({ "hits": [] }));
}

#[tokio::test]
async fn format_and_pattern_violations_are_bad_requests() {
    let bus = common::mock_bus("car-service").await;
    bus.subscribe(
        SubscriptionOptions::new("car-service.register-driver").request_schema(json!({
            "type": "object",
            "properties": {
                "email": { "type": "string", "format": "email" },
                "code": { "type": "string", "pattern": "^[0-9]+$" }
            }
        })),
        |_req: BusRequest| -> Value { panic!("handler must not run") },
    )
    .await
    .unwrap();

    let opts = || RequestOptions::default().timeout_ms(1000).no_throw();
    let res = bus
        .request(
            "car-service.register-driver",
            BusRequest::new(json!({ "email": "not-an-email", "code": "abc" })),
            opts(),
        )
        .await
        .unwrap();
    assert_eq!(res.status, 400);
    assert_eq!(res.error_code(), Some("BAD_REQUEST"));

    let res = bus
        .request(
            "car-service.register-driver",
            BusRequest::new(json!({ "email": "not-an-email", "code": "123" })),
            opts(),
        )
        .await
        .unwrap();
    assert_eq!(res.error_code(), Some("BAD_REQUEST"));
    assert_eq!(res.error.unwrap().detail.as_deref(), Some("data/email must match format \"email\""));
}
