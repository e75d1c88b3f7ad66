//! Proof-request / proof-delivery protocol
//!
//! The requester opens an external proof-generation surface at a URL that
//! encodes the request, then repeatedly attempts to push a side payload into
//! it: the surface's readiness to receive is not observable, so bounded
//! retry on a fixed interval is the mitigation. A listener validates every
//! inbound candidate payload (shape, origin, nonce, freshness, in that
//! order) and accepts at most one per request.
//!
//! The browsing surface and the inbound transport are pluggable; any
//! cross-process or cross-origin message transport works as long as it
//! preserves the origin/nonce/freshness contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ProofportError, Result};
use crate::types::{ProofPayload, ProofRequest};

/// Millisecond clock, injectable so freshness checks are testable.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }
}

/// An opened proof-generation surface. Typically a second browsing context,
/// but a local socket or IPC pipe works the same way.
#[async_trait]
pub trait ProofSurface: Send + Sync {
    /// Attempt to push the side payload into the surface. Attempts are
    /// independent and idempotent; the listener deduplicates by nonce.
    async fn deliver(&self, payload: &Value) -> Result<()>;

    /// Whether the surface has been closed on the far side.
    fn is_closed(&self) -> bool;
}

/// Opens a surface at a proof-request URL.
pub trait SurfaceOpener: Send + Sync {
    fn open(&self, url: &Url) -> Result<Arc<dyn ProofSurface>>;
}

/// Per-request state. A request that has not been opened yet is implicitly
/// idle; `open` moves it straight to `Requested`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestState {
    Requested,
    Accepted(ProofPayload),
    /// Recoverable: the caller may retry with a fresh request.
    Expired(String),
    /// Cancelled by the caller.
    Rejected,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestState::Requested)
    }
}

/// Why an inbound candidate was dropped. Logged locally for diagnostics,
/// never surfaced to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MalformedProof,
    MalformedCircuitId,
    MalformedPublicInputs,
    OriginMismatch { expected: String, actual: String },
    NonceMismatch,
    Expired { age_ms: u64 },
}

/// A candidate payload from the untrusted inbound transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub origin: String,
    pub body: Value,
}

impl InboundMessage {
    pub fn new(origin: impl Into<String>, body: Value) -> Self {
        Self {
            origin: origin.into(),
            body,
        }
    }
}

/// Protocol knobs for one channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub proof_surface_url: String,
    pub expected_origin: Option<String>,
    pub retry_interval: Duration,
    pub max_delivery_attempts: u32,
    pub max_payload_age_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            proof_surface_url: "http://localhost:3001/proofport".to_string(),
            expected_origin: None,
            retry_interval: Duration::from_millis(200),
            max_delivery_attempts: 15,
            max_payload_age_ms: 300_000,
        }
    }
}

impl ChannelConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            proof_surface_url: config.proof_surface_url.clone(),
            expected_origin: config.expected_origin.clone(),
            retry_interval: config.retry_interval(),
            max_delivery_attempts: config.max_delivery_attempts,
            max_payload_age_ms: config.max_payload_age_ms,
        }
    }
}

/// Build the proof-request URL: circuit, chain and public inputs as query
/// parameters (individually percent-encoded), plus protocol metadata.
pub fn proof_request_url(base: &str, request: &ProofRequest) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| ProofportError::Config(format!("Invalid proof surface URL {}: {}", base, e)))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("circuit_id", &request.circuit_id);
        query.append_pair("chain_id", &request.chain_id);
        for (name, value) in &request.public_inputs {
            query.append_pair(name, value);
        }
        query.append_pair("nonce", &request.nonce);
        query.append_pair("issued_at", &request.issued_at.to_string());
    }

    Ok(url)
}

pub struct ProofChannel {
    config: ChannelConfig,
    opener: Arc<dyn SurfaceOpener>,
    clock: Arc<dyn Clock>,
}

impl ProofChannel {
    pub fn new(config: ChannelConfig, opener: Arc<dyn SurfaceOpener>) -> Self {
        Self {
            config,
            opener,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Open the proof surface and start the delivery and listener tasks.
    ///
    /// `side_payload` carries data that must not go in the URL (e.g. a full
    /// allowlist); the request's nonce and issue time are stamped onto it.
    /// `inbound` is the untrusted message transport the listener consumes.
    pub fn open(
        &self,
        request: &ProofRequest,
        side_payload: Value,
        inbound: mpsc::Receiver<InboundMessage>,
    ) -> Result<ProofHandle> {
        let url = proof_request_url(&self.config.proof_surface_url, request)?;
        let surface = self.opener.open(&url)?;
        debug!(circuit_id = %request.circuit_id, %url, "opened proof surface");

        let mut body = match side_payload {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        body.insert("nonce".to_string(), Value::from(request.nonce.clone()));
        body.insert("issued_at".to_string(), Value::from(request.issued_at));
        let delivery_payload = Value::Object(body);

        let (state_tx, state_rx) = watch::channel(RequestState::Requested);
        let state_tx = Arc::new(state_tx);

        let delivery = tokio::spawn(run_delivery(
            surface,
            delivery_payload,
            self.config.retry_interval,
            self.config.max_delivery_attempts,
            Arc::clone(&state_tx),
        ));

        let listener = tokio::spawn(run_listener(
            inbound,
            request.nonce.clone(),
            self.config.expected_origin.clone(),
            self.config.max_payload_age_ms,
            Arc::clone(&self.clock),
            Arc::clone(&state_tx),
            state_rx.clone(),
        ));

        Ok(ProofHandle {
            state: state_rx,
            state_tx,
            delivery,
            listener,
        })
    }
}

/// Handle to one in-flight proof request.
pub struct ProofHandle {
    state: watch::Receiver<RequestState>,
    state_tx: Arc<watch::Sender<RequestState>>,
    delivery: JoinHandle<()>,
    listener: JoinHandle<()>,
}

impl ProofHandle {
    pub fn state(&self) -> RequestState {
        self.state.borrow().clone()
    }

    /// Wait for the request to resolve. Expiry is recoverable: the caller
    /// may open a fresh request with a new nonce.
    pub async fn proof(&mut self) -> Result<ProofPayload> {
        loop {
            let current = self.state.borrow_and_update().clone();
            match current {
                RequestState::Requested => {}
                RequestState::Accepted(payload) => return Ok(payload),
                RequestState::Expired(why) => return Err(ProofportError::Expired(why)),
                RequestState::Rejected => return Err(ProofportError::Cancelled),
            }

            if self.state.changed().await.is_err() {
                return Err(ProofportError::Cancelled);
            }
        }
    }

    /// Stop the delivery loop and detach the listener. No partial state is
    /// retained after cancellation.
    pub fn close(self) {
        transition(&self.state_tx, RequestState::Rejected);
        self.delivery.abort();
        self.listener.abort();
    }
}

/// Move a pending request to a terminal state. First transition wins;
/// returns whether this call was the winner.
fn transition(state_tx: &watch::Sender<RequestState>, next: RequestState) -> bool {
    let mut next = Some(next);
    state_tx.send_if_modified(|state| match next.take() {
        Some(value) if !state.is_terminal() => {
            *state = value;
            true
        }
        _ => false,
    })
}

/// Bounded delivery-retry loop. Stops on the first of: successful delivery,
/// surface closure, attempt-budget exhaustion, or a terminal request state.
async fn run_delivery(
    surface: Arc<dyn ProofSurface>,
    payload: Value,
    interval: Duration,
    max_attempts: u32,
    state_tx: Arc<watch::Sender<RequestState>>,
) {
    let mut ticker = tokio::time::interval(interval);

    for attempt in 1..=max_attempts {
        ticker.tick().await;

        if state_tx.borrow().is_terminal() {
            return;
        }

        if surface.is_closed() {
            warn!(attempt, "proof surface closed before delivery succeeded");
            transition(
                &state_tx,
                RequestState::Expired("proof surface closed before delivery".to_string()),
            );
            return;
        }

        match surface.deliver(&payload).await {
            Ok(()) => {
                debug!(attempt, "side payload delivered");
                return;
            }
            Err(e) => {
                debug!(attempt, "delivery attempt failed: {}", e);
            }
        }
    }

    transition(
        &state_tx,
        RequestState::Expired(format!(
            "delivery attempt budget ({}) exhausted",
            max_attempts
        )),
    );
}

/// Passive inbound subscription for the life of one request. Detaches
/// deterministically on the first terminal state so no validation work
/// leaks onto unrelated future messages.
async fn run_listener(
    mut inbound: mpsc::Receiver<InboundMessage>,
    expected_nonce: String,
    expected_origin: Option<String>,
    max_age_ms: u64,
    clock: Arc<dyn Clock>,
    state_tx: Arc<watch::Sender<RequestState>>,
    mut state_rx: watch::Receiver<RequestState>,
) {
    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() || state_rx.borrow().is_terminal() {
                    return;
                }
            }
            msg = inbound.recv() => {
                let Some(msg) = msg else { return };

                match validate_candidate(
                    &msg,
                    &expected_nonce,
                    expected_origin.as_deref(),
                    max_age_ms,
                    clock.now_ms(),
                ) {
                    Ok(payload) => {
                        if transition(&state_tx, RequestState::Accepted(payload)) {
                            debug!(nonce = %expected_nonce, "proof payload accepted");
                        }
                        return;
                    }
                    Err(reason) => {
                        warn!(?reason, origin = %msg.origin, "rejected inbound proof candidate");
                    }
                }
            }
        }
    }
}

/// Validate one candidate payload: shape, then origin, then nonce, then
/// freshness, short-circuiting on the first failure.
pub fn validate_candidate(
    msg: &InboundMessage,
    expected_nonce: &str,
    expected_origin: Option<&str>,
    max_age_ms: u64,
    now_ms: u64,
) -> std::result::Result<ProofPayload, RejectReason> {
    let body = &msg.body;

    match body.get("proof").and_then(Value::as_str) {
        Some(proof) if !proof.is_empty() => {}
        _ => return Err(RejectReason::MalformedProof),
    }

    match body.get("circuitId").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => {}
        _ => return Err(RejectReason::MalformedCircuitId),
    }

    if !body.get("publicInputs").map_or(false, Value::is_object) {
        return Err(RejectReason::MalformedPublicInputs);
    }

    if let Some(expected) = expected_origin {
        if msg.origin != expected {
            return Err(RejectReason::OriginMismatch {
                expected: expected.to_string(),
                actual: msg.origin.clone(),
            });
        }
    }

    if body.get("nonce").and_then(Value::as_str) != Some(expected_nonce) {
        return Err(RejectReason::NonceMismatch);
    }

    if let Some(issued_at) = body.get("issued_at").and_then(Value::as_u64) {
        let age_ms = now_ms.saturating_sub(issued_at);
        if age_ms > max_age_ms {
            return Err(RejectReason::Expired { age_ms });
        }
    }

    serde_json::from_value(body.clone()).map_err(|_| RejectReason::MalformedPublicInputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> u64 {
            self.0
        }
    }

    struct MockSurface {
        attempts: AtomicU32,
        succeed_after: u32,
        closed: AtomicBool,
        delivered: std::sync::Mutex<Option<Value>>,
    }

    impl MockSurface {
        fn succeeding_after(n: u32) -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicU32::new(0),
                succeed_after: n,
                closed: AtomicBool::new(false),
                delivered: std::sync::Mutex::new(None),
            })
        }

        fn never_succeeding() -> Arc<Self> {
            Self::succeeding_after(u32::MAX)
        }
    }

    #[async_trait]
    impl ProofSurface for MockSurface {
        async fn deliver(&self, payload: &Value) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt >= self.succeed_after {
                *self.delivered.lock().unwrap() = Some(payload.clone());
                Ok(())
            } else {
                Err(ProofportError::Surface("not ready".to_string()))
            }
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct MockOpener {
        surface: Arc<MockSurface>,
    }

    impl SurfaceOpener for MockOpener {
        fn open(&self, _url: &Url) -> Result<Arc<dyn ProofSurface>> {
            Ok(Arc::clone(&self.surface) as Arc<dyn ProofSurface>)
        }
    }

    fn test_config() -> ChannelConfig {
        ChannelConfig {
            proof_surface_url: "http://localhost:3001/proofport".to_string(),
            expected_origin: Some("https://zkdev.net".to_string()),
            retry_interval: Duration::from_millis(1),
            max_delivery_attempts: 15,
            max_payload_age_ms: 300_000,
        }
    }

    fn test_request() -> ProofRequest {
        ProofRequest {
            circuit_id: "group-membership".to_string(),
            chain_id: "11155111".to_string(),
            public_inputs: vec![("root".to_string(), "0xabc".to_string())],
            nonce: "n1".to_string(),
            issued_at: 1_000_000,
        }
    }

    fn valid_body(nonce: &str, issued_at: u64) -> Value {
        serde_json::json!({
            "proof": "0xdeadbeef",
            "circuitId": "group-membership",
            "publicInputs": { "root": "0xabc" },
            "nonce": nonce,
            "issued_at": issued_at,
        })
    }

    fn channel_with(surface: Arc<MockSurface>, now_ms: u64) -> ProofChannel {
        ProofChannel::new(test_config(), Arc::new(MockOpener { surface }))
            .with_clock(Arc::new(FixedClock(now_ms)))
    }

    #[test]
    fn request_url_encodes_inputs_and_metadata() {
        let url = proof_request_url("http://localhost:3001/proofport", &test_request()).unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("circuit_id=group-membership"));
        assert!(query.contains("chain_id=11155111"));
        assert!(query.contains("root=0xabc"));
        assert!(query.contains("nonce=n1"));
        assert!(query.contains("issued_at=1000000"));
    }

    #[test]
    fn request_url_percent_encodes_values() {
        let mut request = test_request();
        request.public_inputs = vec![("note".to_string(), "a b&c".to_string())];
        let url = proof_request_url("http://localhost:3001/proofport", &request).unwrap();
        assert!(url.query().unwrap().contains("note=a+b%26c"));
    }

    #[test]
    fn validation_accepts_fresh_matching_payload() {
        let msg = InboundMessage::new("https://zkdev.net", valid_body("n1", 1_000_000));
        let payload = validate_candidate(&msg, "n1", Some("https://zkdev.net"), 300_000, 1_001_000)
            .unwrap();
        assert_eq!(payload.nonce.as_deref(), Some("n1"));
        assert_eq!(payload.public_inputs["root"], "0xabc");
    }

    #[test]
    fn validation_checks_shape_before_origin() {
        let msg = InboundMessage::new(
            "https://evil.example",
            serde_json::json!({ "circuitId": "x", "publicInputs": {} }),
        );
        let reason = validate_candidate(&msg, "n1", Some("https://zkdev.net"), 300_000, 0)
            .unwrap_err();
        assert_eq!(reason, RejectReason::MalformedProof);
    }

    #[test]
    fn validation_rejects_origin_mismatch() {
        let msg = InboundMessage::new("https://evil.example", valid_body("n1", 1_000_000));
        let reason = validate_candidate(&msg, "n1", Some("https://zkdev.net"), 300_000, 1_000_100)
            .unwrap_err();
        assert!(matches!(reason, RejectReason::OriginMismatch { .. }));
    }

    #[test]
    fn validation_rejects_nonce_mismatch() {
        let msg = InboundMessage::new("https://zkdev.net", valid_body("other", 1_000_000));
        let reason = validate_candidate(&msg, "n1", Some("https://zkdev.net"), 300_000, 1_000_100)
            .unwrap_err();
        assert_eq!(reason, RejectReason::NonceMismatch);
    }

    #[test]
    fn validation_rejects_stale_payload() {
        let msg = InboundMessage::new("https://zkdev.net", valid_body("n1", 1_000_000));
        let reason = validate_candidate(&msg, "n1", Some("https://zkdev.net"), 300_000, 1_301_001)
            .unwrap_err();
        assert_eq!(reason, RejectReason::Expired { age_ms: 301_001 });
    }

    #[test]
    fn validation_passes_when_issued_at_absent() {
        let mut body = valid_body("n1", 0);
        body.as_object_mut().unwrap().remove("issued_at");
        let msg = InboundMessage::new("https://zkdev.net", body);
        assert!(validate_candidate(&msg, "n1", Some("https://zkdev.net"), 300_000, u64::MAX).is_ok());
    }

    #[test]
    fn first_terminal_transition_wins() {
        let (tx, rx) = watch::channel(RequestState::Requested);

        assert!(transition(&tx, RequestState::Rejected));
        assert!(!transition(&tx, RequestState::Expired("late".to_string())));
        assert!(matches!(*rx.borrow(), RequestState::Rejected));
    }

    #[tokio::test]
    async fn accepts_at_most_one_payload_per_nonce() {
        let surface = MockSurface::succeeding_after(1);
        let channel = channel_with(Arc::clone(&surface), 1_001_000);

        let (tx, rx) = mpsc::channel(8);
        let mut handle = channel.open(&test_request(), Value::Null, rx).unwrap();

        tx.send(InboundMessage::new("https://zkdev.net", valid_body("n1", 1_000_000)))
            .await
            .unwrap();
        tx.send(InboundMessage::new("https://zkdev.net", valid_body("n1", 1_000_500)))
            .await
            .unwrap();

        let payload = handle.proof().await.unwrap();
        assert_eq!(payload.issued_at, Some(1_000_000));

        // Listener detached on acceptance; the transport eventually closes.
        let mut closed = false;
        for _ in 0..100 {
            if tx
                .send(InboundMessage::new("https://zkdev.net", valid_body("n1", 1_000_900)))
                .await
                .is_err()
            {
                closed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(closed);
        assert!(matches!(handle.state(), RequestState::Accepted(_)));
    }

    #[tokio::test]
    async fn invalid_candidates_leave_request_pending() {
        let surface = MockSurface::succeeding_after(1);
        let channel = channel_with(Arc::clone(&surface), 1_001_000);

        let (tx, rx) = mpsc::channel(8);
        let mut handle = channel.open(&test_request(), Value::Null, rx).unwrap();

        // Wrong nonce, wrong origin, stale: all silently dropped.
        tx.send(InboundMessage::new("https://zkdev.net", valid_body("other", 1_000_000)))
            .await
            .unwrap();
        tx.send(InboundMessage::new("https://evil.example", valid_body("n1", 1_000_000)))
            .await
            .unwrap();
        tx.send(InboundMessage::new("https://zkdev.net", valid_body("n1", 1)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), RequestState::Requested);

        // A valid payload still gets through afterwards.
        tx.send(InboundMessage::new("https://zkdev.net", valid_body("n1", 1_000_800)))
            .await
            .unwrap();
        assert!(handle.proof().await.is_ok());
    }

    #[tokio::test]
    async fn delivery_stops_on_first_success() {
        let surface = MockSurface::succeeding_after(3);
        let channel = channel_with(Arc::clone(&surface), 1_001_000);

        let (_tx, rx) = mpsc::channel(1);
        let handle = channel.open(&test_request(), Value::Null, rx).unwrap();

        handle.delivery.await.unwrap();
        assert_eq!(surface.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(handle.state.borrow().clone(), RequestState::Requested);
    }

    #[tokio::test]
    async fn delivery_budget_exhaustion_expires_request() {
        let surface = MockSurface::never_succeeding();
        let channel = channel_with(Arc::clone(&surface), 1_001_000);

        let (_tx, rx) = mpsc::channel(1);
        let mut handle = channel.open(&test_request(), Value::Null, rx).unwrap();

        let err = handle.proof().await.unwrap_err();
        assert!(matches!(err, ProofportError::Expired(_)));
        assert_eq!(surface.attempts.load(Ordering::SeqCst), 15);
    }

    #[tokio::test]
    async fn closed_surface_expires_request() {
        let surface = MockSurface::never_succeeding();
        surface.closed.store(true, Ordering::SeqCst);
        let channel = channel_with(Arc::clone(&surface), 1_001_000);

        let (_tx, rx) = mpsc::channel(1);
        let mut handle = channel.open(&test_request(), Value::Null, rx).unwrap();

        let err = handle.proof().await.unwrap_err();
        assert!(matches!(err, ProofportError::Expired(_)));
        assert_eq!(surface.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_cancels_pending_request() {
        let surface = MockSurface::never_succeeding();
        let channel = channel_with(Arc::clone(&surface), 1_001_000);

        let (tx, rx) = mpsc::channel(1);
        let handle = channel.open(&test_request(), Value::Null, rx).unwrap();
        let state_rx = handle.state.clone();

        handle.close();

        assert_eq!(state_rx.borrow().clone(), RequestState::Rejected);
        drop(tx);
    }

    #[tokio::test]
    async fn side_payload_is_stamped_with_protocol_metadata() {
        let surface = MockSurface::succeeding_after(1);
        let channel = channel_with(Arc::clone(&surface), 1_001_000);

        let (_tx, rx) = mpsc::channel(1);
        let side = serde_json::json!({ "whitelist": ["0x01", "0x02"] });
        let handle = channel.open(&test_request(), side, rx).unwrap();

        handle.delivery.await.unwrap();
        let delivered = surface.delivered.lock().unwrap().clone().unwrap();
        assert_eq!(delivered["whitelist"][0], "0x01");
        assert_eq!(delivered["nonce"], "n1");
        assert_eq!(delivered["issued_at"], 1_000_000);
    }
}
