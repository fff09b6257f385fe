// Transport seam between the producer and the broker.
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

/// One POST to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRequest {
    pub path: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: Bytes,
}

impl BrokerRequest {
    // Header lookup, case-insensitive like HTTP.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerResponse {
    pub status: u16,
    pub status_text: String,
}

impl BrokerResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
        }
    }
}

/// Delivers broker requests. Implementations read and discard the response
/// body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: BrokerRequest) -> anyhow::Result<BrokerResponse>;
}

/// In-memory transport that records every request and answers with a fixed
/// response.
///
/// ```
/// use bytes::Bytes;
/// use parcel_client::{BrokerRequest, MemoryTransport, Transport};
///
/// let transport = MemoryTransport::new();
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// let response = rt.block_on(transport.post(BrokerRequest {
///     path: "/message",
///     headers: Vec::new(),
///     body: Bytes::from_static(b"payload"),
/// }));
/// assert_eq!(response.expect("post").status, 200);
/// assert_eq!(transport.requests().len(), 1);
/// ```
#[derive(Clone)]
pub struct MemoryTransport {
    requests: Arc<Mutex<Vec<BrokerRequest>>>,
    response: Arc<Mutex<BrokerResponse>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response: Arc::new(Mutex::new(BrokerResponse::ok())),
        }
    }

    pub fn respond_with(&self, status: u16, status_text: impl Into<String>) {
        *self.response.lock() = BrokerResponse {
            status,
            status_text: status_text.into(),
        };
    }

    pub fn requests(&self) -> Vec<BrokerRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<BrokerRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn post(&self, request: BrokerRequest) -> anyhow::Result<BrokerResponse> {
        self.requests.lock().push(request);
        Ok(self.response.lock().clone())
    }
}
