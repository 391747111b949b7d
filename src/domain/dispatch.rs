//! Dispatch event shapes as submitted by the upstream order system.
//!
//! Every field is optional so that presence can be checked over a
//! statically known structure instead of probing raw JSON. A field that is
//! absent, `null` or of the wrong JSON type parses as `None`, so one bad
//! value never hides the rest of the document. An event that passed
//! admission has all of them populated.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};

/// Suffix of a raw event as stored by the admission gate
pub const RAW_EVENT_SUFFIX: &str = ".json";

/// Prefix shared by every stored event key
pub const EVENT_KEY_PREFIX: &str = "dispatch_";

/// A "ready for dispatch" event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchEvent {
    #[serde(default, deserialize_with = "lenient")]
    pub control_number: Option<u64>,

    #[serde(default, deserialize_with = "lenient")]
    pub sales_order: Option<String>,

    #[serde(default, deserialize_with = "lenient_seq")]
    pub containers: Option<Vec<Container>>,

    #[serde(default, deserialize_with = "lenient")]
    pub delivery_address: Option<DeliveryAddress>,
}

/// One shipping container and the items loaded into it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default, deserialize_with = "lenient")]
    pub load_id: Option<String>,

    /// Upstream container code, e.g. `20RF`
    #[serde(default, deserialize_with = "lenient")]
    pub container_type: Option<String>,

    /// `None` when absent or when the value is not a JSON array
    #[serde(default, deserialize_with = "lenient_seq")]
    pub items: Option<Vec<Item>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(default, deserialize_with = "lenient")]
    pub item_code: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub quantity: Option<u64>,

    #[serde(default, deserialize_with = "lenient")]
    pub carton_weight: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAddress {
    #[serde(default, deserialize_with = "lenient")]
    pub street: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub city: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub state: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub postal_code: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub country: Option<String>,
}

impl DispatchEvent {
    /// Parse an event from raw submission text. Fails only on a JSON
    /// syntax error or when the document is not an object.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Storage key for this event: `dispatch_<controlNumber>_<salesOrder>.json`
    ///
    /// Returns `None` until both identifier fields are present.
    pub fn storage_key(&self) -> Option<String> {
        let control_number = self.control_number?;
        let sales_order = self.sales_order.as_deref()?;
        Some(format!(
            "{}{}_{}{}",
            EVENT_KEY_PREFIX, control_number, sales_order, RAW_EVENT_SUFFIX
        ))
    }
}

/// Keep a value of the expected type, treating anything else as absent
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Accept a JSON array, treating any other type as absent. Elements that
/// are not objects become an element with every field missing.
fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Array(elements)) => Ok(Some(
            elements
                .into_iter()
                .map(|element| serde_json::from_value(element).unwrap_or_default())
                .collect(),
        )),
        _ => Ok(None),
    }
}
