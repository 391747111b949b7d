//! Dispatch event → CSV conversion.
//!
//! Output is one row per (container, item) pair in input order. Rendering is
//! pure: identical input produces byte-identical output.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::domain::{ConvertedArtifact, DeliveryAddress, DispatchEvent};

use super::error::PipelineError;

/// Column header of every artifact
pub const CSV_HEADER: &str = "CustomerReference,LoadId,ContainerType,ItemCode,ItemQuantity,ItemWeight,Street,City,State,PostalCode,Country";

/// Upstream container code → 3PL container code. Unknown codes pass through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerTypeMap {
    codes: HashMap<String, String>,
}

impl Default for ContainerTypeMap {
    fn default() -> Self {
        let codes = [
            ("20RF", "REF20"),
            ("40RF", "REF40"),
            ("20HC", "HC20"),
            ("40HC", "HC40"),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();

        Self { codes }
    }
}

impl ContainerTypeMap {
    /// Add or replace mappings
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.codes
            .extend(overrides.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn resolve<'a>(&'a self, code: &'a str) -> &'a str {
        self.codes.get(code).map(String::as_str).unwrap_or(code)
    }
}

/// Renders dispatch events as CSV artifacts
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    container_types: ContainerTypeMap,
}

impl Transformer {
    pub fn new(container_types: ContainerTypeMap) -> Self {
        Self { container_types }
    }

    /// Transformer with the default table plus configured overrides
    pub fn from_overrides(overrides: &HashMap<String, String>) -> Self {
        Self::new(ContainerTypeMap::default().with_overrides(overrides.clone()))
    }

    /// Convert raw event text to CSV
    pub fn transform(&self, raw: &str) -> Result<String, PipelineError> {
        let event = DispatchEvent::from_json(raw)
            .map_err(|e| PipelineError::malformed("dispatch event", e))?;
        self.transform_event(&event)
    }

    /// Convert a parsed event to CSV
    pub fn transform_event(&self, event: &DispatchEvent) -> Result<String, PipelineError> {
        self.render(event).map_err(|reason| {
            PipelineError::malformed(
                event
                    .storage_key()
                    .unwrap_or_else(|| "dispatch event".to_string()),
                reason,
            )
        })
    }

    /// Convert a stored raw event into a named artifact
    pub fn convert(&self, event_key: &str, raw: &str) -> Result<ConvertedArtifact, PipelineError> {
        let event =
            DispatchEvent::from_json(raw).map_err(|e| PipelineError::malformed(event_key, e))?;
        let content = self
            .render(&event)
            .map_err(|reason| PipelineError::malformed(event_key, reason))?;

        Ok(ConvertedArtifact::for_event(event_key, content))
    }

    fn render(&self, event: &DispatchEvent) -> Result<String, &'static str> {
        let sales_order = event.sales_order.as_deref().ok_or("missing salesOrder")?;
        let containers = event.containers.as_ref().ok_or("missing containers")?;
        let address = event
            .delivery_address
            .as_ref()
            .ok_or("missing deliveryAddress")?;
        let address = AddressColumns::from_address(address)?;

        let mut out = String::with_capacity(CSV_HEADER.len() + 1);
        out.push_str(CSV_HEADER);
        out.push('\n');

        for container in containers {
            let (Some(load_id), Some(container_type), Some(items)) = (
                container.load_id.as_deref(),
                container.container_type.as_deref(),
                container.items.as_ref(),
            ) else {
                continue;
            };
            let mapped_type = self.container_types.resolve(container_type);

            for item in items {
                let (Some(item_code), Some(quantity), Some(weight)) =
                    (item.item_code.as_deref(), item.quantity, item.carton_weight)
                else {
                    continue;
                };

                let quantity = quantity.to_string();
                let weight = weight.to_string();
                let row = [
                    sales_order,
                    load_id,
                    mapped_type,
                    item_code,
                    &quantity,
                    &weight,
                    address.street,
                    address.city,
                    address.state,
                    address.postal_code,
                    address.country,
                ];
                push_row(&mut out, &row);
            }
        }

        Ok(out)
    }
}

/// Address fields, all required for a row to be written
struct AddressColumns<'a> {
    street: &'a str,
    city: &'a str,
    state: &'a str,
    postal_code: &'a str,
    country: &'a str,
}

impl<'a> AddressColumns<'a> {
    fn from_address(address: &'a DeliveryAddress) -> Result<Self, &'static str> {
        Ok(Self {
            street: address.street.as_deref().ok_or("missing deliveryAddress.street")?,
            city: address.city.as_deref().ok_or("missing deliveryAddress.city")?,
            state: address.state.as_deref().ok_or("missing deliveryAddress.state")?,
            postal_code: address
                .postal_code
                .as_deref()
                .ok_or("missing deliveryAddress.postalCode")?,
            country: address
                .country
                .as_deref()
                .ok_or("missing deliveryAddress.country")?,
        })
    }
}

fn push_row(out: &mut String, fields: &[&str]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_field(field));
    }
    out.push('\n');
}

/// Quote a field only when it would otherwise break the column layout
fn escape_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_json(container_type: &str, street: &str) -> String {
        serde_json::json!({
            "controlNumber": 101,
            "salesOrder": "SO123456",
            "containers": [{
                "loadId": "LOAD001",
                "containerType": container_type,
                "items": [{"itemCode": "ITEM001", "quantity": 10, "cartonWeight": 2.5}]
            }],
            "deliveryAddress": {
                "street": street, "city": "Springfield", "state": "IL",
                "postalCode": "62701", "country": "US"
            }
        })
        .to_string()
    }

    #[test]
    fn test_container_type_map() {
        let map = ContainerTypeMap::default();
        assert_eq!(map.resolve("20RF"), "REF20");
        assert_eq!(map.resolve("40HC"), "HC40");
        assert_eq!(map.resolve("45RF"), "45RF");

        let map = map.with_overrides([("45RF", "REF45"), ("20RF", "R20")]);
        assert_eq!(map.resolve("45RF"), "REF45");
        assert_eq!(map.resolve("20RF"), "R20");
    }

    #[test]
    fn test_single_row() {
        let csv = Transformer::default()
            .transform(&event_json("20RF", "1 Main St"))
            .unwrap();

        assert_eq!(
            csv,
            format!(
                "{}\nSO123456,LOAD001,REF20,ITEM001,10,2.5,1 Main St,Springfield,IL,62701,US\n",
                CSV_HEADER
            )
        );
    }

    #[test]
    fn test_whole_weight_has_no_fraction() {
        let raw = event_json("20RF", "x").replace("2.5", "10.0");
        let csv = Transformer::default().transform(&raw).unwrap();
        assert!(csv.contains(",10,10,x,"));
    }

    #[test]
    fn test_field_with_comma_is_quoted() {
        let csv = Transformer::default()
            .transform(&event_json("20RF", "Unit 4, 1 Main St"))
            .unwrap();
        assert!(csv.contains(",\"Unit 4, 1 Main St\",Springfield,"));

        let csv = Transformer::default()
            .transform(&event_json("20RF", "The \"Dock\""))
            .unwrap();
        assert!(csv.contains(",\"The \"\"Dock\"\"\",Springfield,"));
    }

    #[test]
    fn test_incomplete_containers_and_items_are_skipped() {
        let raw = serde_json::json!({
            "salesOrder": "SO1",
            "containers": [
                {"containerType": "20RF", "items": [{"itemCode": "A", "quantity": 1, "cartonWeight": 1.0}]},
                {"loadId": "L2", "containerType": "40RF", "items": [
                    {"itemCode": "B", "quantity": 2},
                    {"itemCode": "C", "quantity": 3, "cartonWeight": 0.75}
                ]}
            ],
            "deliveryAddress": {"street": "s", "city": "c", "state": "st", "postalCode": "p", "country": "co"}
        })
        .to_string();

        let csv = Transformer::default().transform(&raw).unwrap();
        let rows: Vec<&str> = csv.lines().skip(1).collect();
        assert_eq!(rows, vec!["SO1,L2,REF40,C,3,0.75,s,c,st,p,co"]);
    }

    #[test]
    fn test_empty_containers_yield_header_only() {
        let raw = serde_json::json!({
            "salesOrder": "SO1",
            "containers": [],
            "deliveryAddress": {"street": "s", "city": "c", "state": "st", "postalCode": "p", "country": "co"}
        })
        .to_string();

        let csv = Transformer::default().transform(&raw).unwrap();
        assert_eq!(csv, format!("{}\n", CSV_HEADER));
    }

    #[test]
    fn test_missing_required_parts_are_malformed() {
        let transformer = Transformer::default();

        let err = transformer
            .transform(r#"{"salesOrder": "SO1", "containers": []}"#)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedArtifact { .. }));

        let err = transformer.convert("dispatch_1_X.json", "not json").unwrap_err();
        match err {
            PipelineError::MalformedArtifact { name, .. } => assert_eq!(name, "dispatch_1_X.json"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_convert_names_artifact() {
        let artifact = Transformer::default()
            .convert("dispatch_101_SO123456.json", &event_json("20RF", "x"))
            .unwrap();

        assert_eq!(artifact.name, "dispatch_101_SO123456.csv");
        assert_eq!(artifact.row_count(), 1);
    }
}
