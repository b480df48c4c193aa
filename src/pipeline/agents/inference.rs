use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::models::{BackendKind, DocumentType};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Model backend unavailable: {0}")]
    Unavailable(String),

    #[error("Inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model backend rejected the request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(BackendKind),

    #[error("Inference cancelled")]
    Cancelled,
}

impl InferenceError {
    /// Worth another attempt: connectivity, timeouts, throttling, server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::MalformedResponse(_) | Self::NotConfigured(_) | Self::Cancelled => false,
        }
    }
}

/// One extraction call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub document_type: DocumentType,
    pub system: String,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct InferenceResponse {
    pub text: String,
    pub backend: BackendKind,
    pub model: String,
}

/// A local or cloud model reachable over some transport.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn model(&self) -> &str;

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError>;
}

/// Inference pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct InferenceUsage {
    pub requests: usize,
    pub errors: usize,
}

impl InferenceUsage {
    /// Share of requests that did not fail; 1.0 before any request.
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            (self.requests - self.errors.min(self.requests)) as f64 / self.requests as f64
        }
    }
}

/// Backends shared by every run, behind one semaphore that bounds in-flight calls.
pub struct InferencePool {
    permits: Arc<Semaphore>,
    backends: HashMap<BackendKind, Arc<dyn InferenceBackend>>,
    requests: AtomicUsize,
    errors: AtomicUsize,
}

impl InferencePool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            backends: HashMap::new(),
            requests: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn backend(&self, kind: BackendKind) -> Result<&Arc<dyn InferenceBackend>, InferenceError> {
        self.backends
            .get(&kind)
            .ok_or(InferenceError::NotConfigured(kind))
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Calls that reached a backend, and how many of them failed.
    /// Cancelled calls count as requests but not as errors.
    pub fn usage(&self) -> InferenceUsage {
        InferenceUsage {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Run one request. Waits for a permit first; `timeout` only covers the call itself.
    pub async fn infer(
        &self,
        kind: BackendKind,
        request: &InferenceRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<InferenceResponse, InferenceError> {
        let backend = Arc::clone(self.backend(kind)?);

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => permit
                .map_err(|_| InferenceError::Unavailable("inference pool closed".into()))?,
        };

        tracing::debug!(
            backend = kind.as_str(),
            model = backend.model(),
            document_type = request.document_type.as_str(),
            prompt_chars = request.prompt.len(),
            "Inference call"
        );

        self.requests.fetch_add(1, Ordering::Relaxed);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InferenceError::Cancelled),
            result = tokio::time::timeout(timeout, backend.infer(request)) => {
                result.unwrap_or(Err(InferenceError::Timeout(timeout)))
            }
        };
        if let Err(e) = &result {
            if *e != InferenceError::Cancelled {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }
}

/// Scripted backend for tests and dry runs.
///
/// Responses are keyed by document type; queued failures are returned first,
/// one per call.
pub struct MockInferenceBackend {
    kind: BackendKind,
    responses: HashMap<DocumentType, String>,
    failures: Mutex<VecDeque<InferenceError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockInferenceBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            responses: HashMap::new(),
            failures: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn respond(mut self, document_type: DocumentType, response: &str) -> Self {
        self.responses.insert(document_type, response.to_string());
        self
    }

    /// Fail the next `times` calls with `error`.
    pub fn fail_times(self, times: usize, error: InferenceError) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.extend(std::iter::repeat(error).take(times));
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<InferenceError> {
        self.failures.lock().ok().and_then(|mut f| f.pop_front())
    }
}

/// Holds one in-flight slot; released on drop so timed-out or cancelled
/// calls are not left counted.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
    now: usize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Self { counter, now }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl InferenceBackend for MockInferenceBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn model(&self) -> &str {
        "mock"
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight::enter(&self.in_flight);
        self.max_in_flight.fetch_max(guard.now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        drop(guard);

        if let Some(error) = self.next_failure() {
            return Err(error);
        }
        let text = self
            .responses
            .get(&request.document_type)
            .cloned()
            .unwrap_or_else(|| "{}".to_string());
        Ok(InferenceResponse {
            text,
            backend: self.kind,
            model: "mock".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(document_type: DocumentType) -> InferenceRequest {
        InferenceRequest {
            document_type,
            system: "system".into(),
            prompt: "prompt".into(),
        }
    }

    #[test]
    fn transient_classification() {
        assert!(InferenceError::Unavailable("down".into()).is_transient());
        assert!(InferenceError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(InferenceError::Rejected { status: 429, body: String::new() }.is_transient());
        assert!(InferenceError::Rejected { status: 503, body: String::new() }.is_transient());
        assert!(!InferenceError::Rejected { status: 400, body: String::new() }.is_transient());
        assert!(!InferenceError::MalformedResponse("x".into()).is_transient());
        assert!(!InferenceError::NotConfigured(BackendKind::Cloud).is_transient());
        assert!(!InferenceError::Cancelled.is_transient());
    }

    #[tokio::test]
    async fn routes_to_configured_backend() {
        let pool = InferencePool::new(2).with_backend(Arc::new(
            MockInferenceBackend::new(BackendKind::Local).respond(DocumentType::Invoice, "{\"total\": 1}"),
        ));
        let response = pool
            .infer(
                BackendKind::Local,
                &request(DocumentType::Invoice),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.text, "{\"total\": 1}");
        assert_eq!(response.backend, BackendKind::Local);
    }

    #[tokio::test]
    async fn missing_backend_is_not_configured() {
        let pool = InferencePool::new(1);
        let err = pool
            .infer(
                BackendKind::Cloud,
                &request(DocumentType::Cv),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, InferenceError::NotConfigured(BackendKind::Cloud));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let pool = InferencePool::new(1).with_backend(Arc::new(
            MockInferenceBackend::new(BackendKind::Local).with_delay(Duration::from_millis(200)),
        ));
        let err = pool
            .infer(
                BackendKind::Local,
                &request(DocumentType::Invoice),
                Duration::from_millis(20),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Timeout(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn cancelled_before_permit() {
        let pool = InferencePool::new(1)
            .with_backend(Arc::new(MockInferenceBackend::new(BackendKind::Local)));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pool
            .infer(BackendKind::Local, &request(DocumentType::Invoice), Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, InferenceError::Cancelled);
    }

    #[tokio::test]
    async fn semaphore_bounds_in_flight_calls() {
        let backend = Arc::new(
            MockInferenceBackend::new(BackendKind::Local).with_delay(Duration::from_millis(30)),
        );
        let pool = Arc::new(InferencePool::new(2).with_backend(backend.clone()));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                pool.infer(
                    BackendKind::Local,
                    &request(DocumentType::Invoice),
                    Duration::from_secs(5),
                    &CancellationToken::new(),
                )
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(backend.calls(), 6);
        assert!(backend.max_in_flight() <= 2);
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test]
    async fn timed_out_call_releases_its_slot() {
        let backend = Arc::new(
            MockInferenceBackend::new(BackendKind::Local).with_delay(Duration::from_millis(200)),
        );
        let pool = InferencePool::new(2).with_backend(backend.clone());
        for _ in 0..2 {
            let err = pool
                .infer(
                    BackendKind::Local,
                    &request(DocumentType::Invoice),
                    Duration::from_millis(10),
                    &CancellationToken::new(),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, InferenceError::Timeout(_)));
        }
        assert_eq!(backend.in_flight(), 0);
        assert_eq!(backend.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn usage_counts_requests_and_errors() {
        let pool = InferencePool::new(1).with_backend(Arc::new(
            MockInferenceBackend::new(BackendKind::Local)
                .fail_times(1, InferenceError::Unavailable("down".into())),
        ));
        for _ in 0..2 {
            let _ = pool
                .infer(
                    BackendKind::Local,
                    &request(DocumentType::Invoice),
                    Duration::from_secs(1),
                    &CancellationToken::new(),
                )
                .await;
        }
        let cancel = CancellationToken::new();
        cancel.cancel();
        let _ = pool
            .infer(BackendKind::Local, &request(DocumentType::Invoice), Duration::from_secs(1), &cancel)
            .await;

        let usage = pool.usage();
        assert_eq!(usage, InferenceUsage { requests: 2, errors: 1 });
        assert_eq!(usage.success_rate(), 0.5);
    }

    #[tokio::test]
    async fn mock_fails_then_succeeds() {
        let backend = MockInferenceBackend::new(BackendKind::Local)
            .fail_times(2, InferenceError::Unavailable("down".into()));
        let req = request(DocumentType::Invoice);
        assert!(backend.infer(&req).await.is_err());
        assert!(backend.infer(&req).await.is_err());
        assert_eq!(backend.infer(&req).await.unwrap().text, "{}");
        assert_eq!(backend.calls(), 3);
    }
}
