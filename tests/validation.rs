//! Validation Integration Tests
//!
//! Required-field reporting for submitted dispatch events.

mod common;

use dispatch_relay::core::{validate, INVALID_JSON_PREFIX};
use serde_json::{json, Value};

fn complete() -> Value {
    serde_json::from_str(&common::complete_event(101, "SO123456")).unwrap()
}

/// Remove a field by JSON pointer-like path of object keys / array indices
fn without(mut event: Value, path: &[&str]) -> String {
    let (last, parents) = path.split_last().unwrap();
    let mut cursor = &mut event;
    for segment in parents {
        cursor = match segment.parse::<usize>() {
            Ok(index) => &mut cursor[index],
            Err(_) => &mut cursor[*segment],
        };
    }
    cursor.as_object_mut().unwrap().remove(*last);
    event.to_string()
}

#[test]
fn test_complete_event_has_no_missing_fields() {
    assert!(validate(&complete().to_string()).is_empty());
}

#[test]
fn test_each_missing_field_is_reported() {
    let cases: &[(&[&str], &str)] = &[
        (&["controlNumber"], "controlNumber"),
        (&["salesOrder"], "salesOrder"),
        (&["containers"], "containers"),
        (&["deliveryAddress"], "deliveryAddress"),
        (&["deliveryAddress", "street"], "deliveryAddress.street"),
        (&["deliveryAddress", "city"], "deliveryAddress.city"),
        (&["deliveryAddress", "state"], "deliveryAddress.state"),
        (&["deliveryAddress", "postalCode"], "deliveryAddress.postalCode"),
        (&["deliveryAddress", "country"], "deliveryAddress.country"),
        (&["containers", "0", "loadId"], "containers[].loadId"),
        (&["containers", "0", "containerType"], "containers[].containerType"),
        (&["containers", "0", "items"], "containers[].items"),
        (
            &["containers", "0", "items", "0", "itemCode"],
            "containers[].items[].itemCode",
        ),
        (
            &["containers", "0", "items", "0", "quantity"],
            "containers[].items[].quantity",
        ),
        (
            &["containers", "0", "items", "0", "cartonWeight"],
            "containers[].items[].cartonWeight",
        ),
    ];

    for (path, expected) in cases {
        let missing = validate(&without(complete(), path));
        assert_eq!(missing, vec![expected.to_string()], "removing {:?}", path);
    }
}

#[test]
fn test_repeated_structure_reports_path_once() {
    let mut event = complete();
    event["containers"] = json!([
        {"containerType": "20RF", "items": [{"itemCode": "A"}, {"itemCode": "B"}]},
        {"containerType": "40RF", "items": [{"itemCode": "C"}]},
        {"containerType": "20HC", "items": []}
    ]);

    let missing = validate(&event.to_string());
    assert_eq!(
        missing,
        vec![
            "containers[].loadId",
            "containers[].items[].quantity",
            "containers[].items[].cartonWeight",
        ]
    );
}

#[test]
fn test_unparseable_input_is_single_diagnostic() {
    for raw in ["", "{", "[1, 2]", "\"text\"", "42"] {
        let missing = validate(raw);
        assert_eq!(missing.len(), 1, "input {:?}", raw);
        assert!(missing[0].starts_with(INVALID_JSON_PREFIX), "input {:?}", raw);
    }
}

#[test]
fn test_wrong_types_are_reported_alongside_missing_fields() {
    let mut event = complete();
    event.as_object_mut().unwrap().remove("salesOrder");
    event["controlNumber"] = json!("101");
    event["containers"][0]["items"][0]["quantity"] = json!("10");
    event["deliveryAddress"]["postalCode"] = json!(62701);

    assert_eq!(
        validate(&event.to_string()),
        vec![
            "controlNumber",
            "salesOrder",
            "deliveryAddress.postalCode",
            "containers[].items[].quantity",
        ]
    );
}

#[test]
fn test_non_array_containers_reported_as_missing() {
    let mut event = complete();
    event["containers"] = json!(5);
    assert_eq!(validate(&event.to_string()), vec!["containers"]);
}

#[test]
fn test_null_is_missing() {
    let mut event = complete();
    event["deliveryAddress"]["city"] = Value::Null;
    assert_eq!(validate(&event.to_string()), vec!["deliveryAddress.city"]);
}

#[test]
fn test_validation_never_panics_on_odd_shapes() {
    let odd = [
        r#"{"containers": [{"items": 3}]}"#,
        r#"{"containers": [{"items": [{}]}], "deliveryAddress": {}}"#,
        r#"{"controlNumber": 1, "extra": {"nested": true}}"#,
    ];
    for raw in odd {
        assert!(!validate(raw).is_empty());
    }
}
