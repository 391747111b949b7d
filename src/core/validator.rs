//! Required-field validation for submitted dispatch events.
//!
//! Reports missing fields as paths. Repeated structures use `[]` without an
//! index (`containers[].items[].itemCode`) and each path is reported once,
//! however many elements lack it. A field set to `null`, or to a value of
//! the wrong JSON type, counts as missing. Only input that is not a JSON
//! object at all collapses into the single `Invalid JSON format` entry.

use crate::domain::{Container, DeliveryAddress, DispatchEvent, Item};

/// Prefix of the single diagnostic returned for input that is not a JSON
/// object
pub const INVALID_JSON_PREFIX: &str = "Invalid JSON format: ";

/// Validate raw submission text. An empty result means admissible.
pub fn validate(raw: &str) -> Vec<String> {
    match DispatchEvent::from_json(raw) {
        Ok(event) => validate_event(&event),
        Err(e) => vec![format!("{}{}", INVALID_JSON_PREFIX, e)],
    }
}

/// Validate an already parsed event
pub fn validate_event(event: &DispatchEvent) -> Vec<String> {
    let mut missing = MissingFields::default();

    if event.control_number.is_none() {
        missing.push("controlNumber");
    }
    if event.sales_order.is_none() {
        missing.push("salesOrder");
    }
    if event.containers.is_none() {
        missing.push("containers");
    }
    if event.delivery_address.is_none() {
        missing.push("deliveryAddress");
    }

    if let Some(address) = &event.delivery_address {
        check_address(address, &mut missing);
    }

    for container in event.containers.iter().flatten() {
        check_container(container, &mut missing);
    }

    missing.into_inner()
}

fn check_address(address: &DeliveryAddress, missing: &mut MissingFields) {
    let fields = [
        ("deliveryAddress.street", address.street.is_none()),
        ("deliveryAddress.city", address.city.is_none()),
        ("deliveryAddress.state", address.state.is_none()),
        ("deliveryAddress.postalCode", address.postal_code.is_none()),
        ("deliveryAddress.country", address.country.is_none()),
    ];
    for (path, absent) in fields {
        if absent {
            missing.push(path);
        }
    }
}

fn check_container(container: &Container, missing: &mut MissingFields) {
    if container.load_id.is_none() {
        missing.push("containers[].loadId");
    }
    if container.container_type.is_none() {
        missing.push("containers[].containerType");
    }

    match &container.items {
        Some(items) => items.iter().for_each(|item| check_item(item, missing)),
        None => missing.push("containers[].items"),
    }
}

fn check_item(item: &Item, missing: &mut MissingFields) {
    if item.item_code.is_none() {
        missing.push("containers[].items[].itemCode");
    }
    if item.quantity.is_none() {
        missing.push("containers[].items[].quantity");
    }
    if item.carton_weight.is_none() {
        missing.push("containers[].items[].cartonWeight");
    }
}

/// Ordered set of missing paths
#[derive(Default)]
struct MissingFields(Vec<String>);

impl MissingFields {
    fn push(&mut self, path: &str) {
        if !self.0.iter().any(|p| p == path) {
            self.0.push(path.to_string());
        }
    }

    fn into_inner(self) -> Vec<String> {
        self.0
    }
}
