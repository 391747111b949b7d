//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use dispatch_relay::adapters::{DeliveryEndpoint, EndpointError};
use dispatch_relay::storage::{BlobStore, BlobStoreError, DurableQueue, FsBlobStore};
use dispatch_relay::{DeliveryOrchestrator, OrchestratorSettings};

pub const TOPIC: &str = "processed-csv";

/// In-memory endpoint that records uploads and can be told to fail
#[derive(Default)]
pub struct RecordingEndpoint {
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    terminal: Mutex<HashSet<(String, String)>>,
    failing: Mutex<HashSet<String>>,
    fail_all: Mutex<bool>,
    exists_calls: AtomicUsize,
    exists_failing: Mutex<bool>,
    upload_delay: Mutex<Option<Duration>>,
}

impl RecordingEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make uploads of `name` fail
    pub fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_everything(&self, fail: bool) {
        *self.fail_all.lock().unwrap() = fail;
    }

    /// Make existence checks fail
    pub fn fail_exists(&self, fail: bool) {
        *self.exists_failing.lock().unwrap() = fail;
    }

    pub fn delay_uploads(&self, delay: Duration) {
        *self.upload_delay.lock().unwrap() = Some(delay);
    }

    /// Record a terminal outcome as the receiving side would
    pub fn mark_terminal(&self, namespace: &str, name: &str) {
        self.terminal
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()));
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn uploads_of(&self, name: &str) -> usize {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .count()
    }

    pub fn uploaded(&self, name: &str) -> Option<Vec<u8>> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.clone())
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryEndpoint for RecordingEndpoint {
    fn name(&self) -> &str {
        "recording"
    }

    async fn exists(&self, namespace: &str, name: &str) -> Result<bool, EndpointError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if *self.exists_failing.lock().unwrap() {
            return Err(EndpointError::Unavailable(
                "injected existence failure".to_string(),
            ));
        }
        Ok(self
            .terminal
            .lock()
            .unwrap()
            .contains(&(namespace.to_string(), name.to_string())))
    }

    async fn upload(&self, name: &str, data: &[u8]) -> Result<(), EndpointError> {
        let delay = *self.upload_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.fail_all.lock().unwrap() || self.failing.lock().unwrap().contains(name) {
            return Err(EndpointError::Unavailable("injected failure".to_string()));
        }

        self.uploads
            .lock()
            .unwrap()
            .push((name.to_string(), data.to_vec()));
        Ok(())
    }

    async fn health_check(&self) -> Result<(), EndpointError> {
        Ok(())
    }
}

/// Blob store wrapper counting writes per namespace
pub struct CountingBlobStore {
    inner: FsBlobStore,
    puts: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
}

impl CountingBlobStore {
    pub fn new(inner: FsBlobStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            puts: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub fn puts(&self, namespace: &str) -> usize {
        self.puts
            .lock()
            .unwrap()
            .get(namespace)
            .copied()
            .unwrap_or(0)
    }

    /// Make writes to `namespace` fail (or succeed again)
    pub fn fail_puts_to(&self, namespace: &str, fail: bool) {
        let mut failing = self.failing.lock().unwrap();
        if fail {
            failing.insert(namespace.to_string());
        } else {
            failing.remove(namespace);
        }
    }
}

#[async_trait]
impl BlobStore for CountingBlobStore {
    async fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), BlobStoreError> {
        *self
            .puts
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default() += 1;
        if self.failing.lock().unwrap().contains(namespace) {
            return Err(BlobStoreError::Io {
                path: self.inner.namespace_dir(namespace).join(key),
                source: std::io::Error::new(std::io::ErrorKind::Other, "injected write failure"),
            });
        }
        self.inner.put(namespace, key, data).await
    }

    async fn put_if_absent(
        &self,
        namespace: &str,
        key: &str,
        data: &[u8],
    ) -> Result<bool, BlobStoreError> {
        self.inner.put_if_absent(namespace, key, data).await
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError> {
        self.inner.get(namespace, key).await
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, BlobStoreError> {
        self.inner.exists(namespace, key).await
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>, BlobStoreError> {
        self.inner.list(namespace).await
    }
}

/// Orchestrator over a recording endpoint and on-disk stores
pub struct Harness {
    pub temp: TempDir,
    pub queue: DurableQueue,
    pub endpoint: Arc<RecordingEndpoint>,
    pub blobs: Arc<CountingBlobStore>,
    pub orchestrator: DeliveryOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(OrchestratorSettings::default())
    }

    pub fn with_settings(settings: OrchestratorSettings) -> Self {
        let temp = TempDir::new().unwrap();
        let queue = DurableQueue::new(temp.path().join("queue"));
        let endpoint = RecordingEndpoint::new();
        let blobs = CountingBlobStore::new(FsBlobStore::new(temp.path().join("blobs")));
        let orchestrator = DeliveryOrchestrator::new(
            queue.clone(),
            endpoint.clone(),
            blobs.clone(),
            settings,
        );

        Self {
            temp,
            queue,
            endpoint,
            blobs,
            orchestrator,
        }
    }

    /// Second orchestrator sharing this harness's queue, endpoint and stores
    pub fn another_orchestrator(&self) -> DeliveryOrchestrator {
        DeliveryOrchestrator::new(
            self.queue.clone(),
            self.endpoint.clone(),
            self.blobs.clone(),
            self.orchestrator.settings().clone(),
        )
    }

    pub async fn enqueue(&self, name: &str, payload: &str) {
        self.queue.enqueue(TOPIC, name, payload).await.unwrap();
    }

    pub async fn queued(&self) -> Vec<String> {
        self.queue
            .list(TOPIC)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect()
    }
}

/// A complete event with one container holding one item
pub fn complete_event(control_number: u64, sales_order: &str) -> String {
    serde_json::json!({
        "controlNumber": control_number,
        "salesOrder": sales_order,
        "containers": [{
            "loadId": "LOAD001",
            "containerType": "20RF",
            "items": [{"itemCode": "ITEM001", "quantity": 10, "cartonWeight": 2.5}]
        }],
        "deliveryAddress": {
            "street": "1 Main St",
            "city": "Springfield",
            "state": "IL",
            "postalCode": "62701",
            "country": "US"
        }
    })
    .to_string()
}
