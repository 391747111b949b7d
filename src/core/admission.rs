//! Admission gate: validate a submission and store it write-once.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::DispatchEvent;
use crate::storage::blob::validate_key;
use crate::storage::BlobStore;

use super::error::PipelineError;
use super::validator::{validate, INVALID_JSON_PREFIX};

/// Guards entry into the pipeline
#[derive(Clone)]
pub struct AdmissionGate {
    store: Arc<dyn BlobStore>,
    namespace: String,
}

impl AdmissionGate {
    /// Gate storing raw events into `namespace`
    pub fn new(store: Arc<dyn BlobStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Validate and store a raw submission, returning its storage key.
    ///
    /// The raw bytes are stored as submitted. An existing key is reported as
    /// a conflict and the stored event is left unchanged.
    pub async fn submit(&self, raw: &str) -> Result<String, PipelineError> {
        let missing_fields = validate(raw);
        if !missing_fields.is_empty() {
            info!(missing = ?missing_fields, "Submission rejected");
            return Err(PipelineError::Validation { missing_fields });
        }

        let event = DispatchEvent::from_json(raw).map_err(|e| PipelineError::Validation {
            missing_fields: vec![format!("{}{}", INVALID_JSON_PREFIX, e)],
        })?;

        let key = storage_key(&event)?;

        if !self
            .store
            .put_if_absent(&self.namespace, &key, raw.as_bytes())
            .await?
        {
            warn!(%key, "Submission conflicts with a stored event");
            return Err(PipelineError::Conflict { key });
        }

        info!(%key, bytes = raw.len(), "Event admitted");
        Ok(key)
    }
}

/// Derive the storage key, rejecting sales orders that are unusable as keys
fn storage_key(event: &DispatchEvent) -> Result<String, PipelineError> {
    let sales_order = event.sales_order.as_deref().unwrap_or_default();
    let unsafe_key = || PipelineError::Validation {
        missing_fields: vec!["salesOrder".to_string()],
    };

    if sales_order.is_empty() || sales_order.starts_with('.') {
        return Err(unsafe_key());
    }

    let key = event.storage_key().ok_or_else(unsafe_key)?;
    validate_key(&key).map_err(|_| unsafe_key())?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsBlobStore;
    use tempfile::TempDir;

    fn event(sales_order: &str) -> String {
        serde_json::json!({
            "controlNumber": 7,
            "salesOrder": sales_order,
            "containers": [],
            "deliveryAddress": {"street": "s", "city": "c", "state": "st", "postalCode": "p", "country": "co"}
        })
        .to_string()
    }

    fn gate(temp: &TempDir) -> AdmissionGate {
        AdmissionGate::new(Arc::new(FsBlobStore::new(temp.path())), "raw-json")
    }

    #[tokio::test]
    async fn test_submit_stores_raw_bytes() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);
        let raw = event("SO1");

        let key = gate.submit(&raw).await.unwrap();
        assert_eq!(key, "dispatch_7_SO1.json");

        let stored = std::fs::read_to_string(temp.path().join("raw-json").join(&key)).unwrap();
        assert_eq!(stored, raw);
    }

    #[tokio::test]
    async fn test_invalid_submission_is_not_stored() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);

        let err = gate.submit(r#"{"controlNumber": 7}"#).await.unwrap_err();
        match err {
            PipelineError::Validation { missing_fields } => {
                assert!(missing_fields.contains(&"salesOrder".to_string()))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!temp.path().join("raw-json").exists());
    }

    #[tokio::test]
    async fn test_unsafe_sales_order_rejected() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);

        for bad in ["", ".hidden", "../escape", "a/b", "a\\b"] {
            let err = gate.submit(&event(bad)).await.unwrap_err();
            assert!(
                matches!(err, PipelineError::Validation { .. }),
                "{bad:?} was accepted"
            );
        }
    }

    #[tokio::test]
    async fn test_duplicate_is_conflict() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);

        gate.submit(&event("SO1")).await.unwrap();
        let err = gate.submit(&event("SO1")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Conflict { key } if key == "dispatch_7_SO1.json"));
    }
}
