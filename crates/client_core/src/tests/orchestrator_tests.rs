use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::{Party, SessionParams};
use tokio::{net::TcpListener, sync::Notify};

use super::*;
use crate::session_client::SessionClient;

#[derive(Clone)]
struct MockService {
    fail_create: Arc<AtomicBool>,
    fail_auto: Arc<AtomicBool>,
    hold_auto: Arc<AtomicBool>,
    auto_gate: Arc<Notify>,
    fail_finalize: Arc<AtomicBool>,
    timeline_failures: Arc<AtomicUsize>,
    offers: Arc<std::sync::Mutex<Vec<Value>>>,
}

impl MockService {
    fn new() -> Self {
        Self {
            fail_create: Arc::new(AtomicBool::new(false)),
            fail_auto: Arc::new(AtomicBool::new(false)),
            hold_auto: Arc::new(AtomicBool::new(false)),
            auto_gate: Arc::new(Notify::new()),
            fail_finalize: Arc::new(AtomicBool::new(false)),
            timeline_failures: Arc::new(AtomicUsize::new(0)),
            offers: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    fn set_offers(&self, offers: Vec<Value>) {
        *self.offers.lock().expect("offers lock") = offers;
    }
}

fn offer_json(id: i64, round: u32, made_by: &str, price: f64) -> Value {
    json!({
        "id": id,
        "session_id": 42,
        "round": round,
        "made_by": made_by,
        "price": price,
        "quantity": 2,
        "fairness": 0.48,
        "utility": 0.3,
        "payload": "{}"
    })
}

/// Two rounds of offers, deliberately out of round order.
fn unordered_offers() -> Vec<Value> {
    vec![
        offer_json(3, 2, "buyer", 70.0),
        offer_json(1, 1, "buyer", 60.0),
        offer_json(4, 2, "seller", 85.0),
        offer_json(2, 1, "seller", 95.0),
    ]
}

async fn handle_create(
    State(mock): State<MockService>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if mock.fail_create.load(Ordering::SeqCst) {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": "database unavailable" })),
        ));
    }
    Ok(Json(json!({
        "session_id": 42,
        "session": {
            "id": 42,
            "role": body["role"],
            "buyer_address": body["buyer_address"],
            "target_price": body["target_price"],
            "min_price": body["min_price"],
            "max_price": body["max_price"],
            "quantity": body["quantity"],
            "fairness_weight": body["fairness_weight"],
            "max_rounds": body["max_rounds"],
            "status": "open"
        }
    })))
}

async fn handle_auto(
    State(mock): State<MockService>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if mock.hold_auto.load(Ordering::SeqCst) {
        mock.auto_gate.notified().await;
    }
    if mock.fail_auto.load(Ordering::SeqCst) {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": "engine unavailable" })),
        ));
    }
    mock.set_offers(unordered_offers());
    Ok(Json(json!({
        "agreement": {
            "price": 77.25,
            "quantity": 2,
            "fairness": 0.51,
            "agreement_hash": "abc123"
        }
    })))
}

async fn handle_timeline(
    State(mock): State<MockService>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if mock
        .timeline_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
            remaining.checked_sub(1)
        })
        .is_ok()
    {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": "busy" })),
        ));
    }
    let offers = mock.offers.lock().expect("offers lock").clone();
    Ok(Json(json!({ "offers": offers })))
}

async fn handle_finalize(
    State(mock): State<MockService>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if mock.fail_finalize.load(Ordering::SeqCst) {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": "agreement not found" })),
        ));
    }
    Ok(Json(json!({
        "agreement_hash": "abc123",
        "price": 77.25,
        "quantity": 2,
        "buyer_address": "0xb0b",
        "seller_address": "0x5e11"
    })))
}

async fn spawn_orchestrator(mock: MockService) -> Arc<NegotiationOrchestrator> {
    let app = Router::new()
        .route("/sessions", post(handle_create))
        .route("/sessions/:id/auto", post(handle_auto))
        .route("/sessions/:id/timeline", get(handle_timeline))
        .route("/sessions/:id/finalize", post(handle_finalize))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    NegotiationOrchestrator::new(SessionClient::new(format!("http://{addr}")).expect("client"))
}

fn buyer_params() -> SessionParams {
    SessionParams {
        role: Party::Buyer,
        buyer_address: Some("0xb0b".into()),
        seller_address: None,
        target_price: 75.0,
        min_price: 50.0,
        max_price: 100.0,
        quantity: 2,
        fairness_weight: 0.5,
        max_rounds: 8,
    }
}

#[tokio::test]
async fn create_session_moves_to_negotiating() {
    let orchestrator = spawn_orchestrator(MockService::new()).await;

    let session_id = orchestrator
        .create_session(buyer_params())
        .await
        .expect("create");

    assert_eq!(session_id, SessionId(42));
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.phase, LifecyclePhase::Negotiating);
    assert_eq!(snapshot.session.expect("session").id, SessionId(42));
    assert!(snapshot.last_error.is_none());
}

#[tokio::test]
async fn rejects_invalid_params_without_service_round_trip() {
    let orchestrator = spawn_orchestrator(MockService::new()).await;
    let mut params = buyer_params();
    params.quantity = 0;

    let err = orchestrator
        .create_session(params)
        .await
        .expect_err("must fail");
    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(orchestrator.phase().await, LifecyclePhase::Form);
}

#[tokio::test]
async fn create_failure_returns_to_form_and_records_error() {
    let mock = MockService::new();
    mock.fail_create.store(true, Ordering::SeqCst);
    let orchestrator = spawn_orchestrator(mock).await;

    let err = orchestrator
        .create_session(buyer_params())
        .await
        .expect_err("must fail");
    assert!(matches!(err, OrchestratorError::Service(_)));

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.phase, LifecyclePhase::Form);
    assert!(snapshot
        .last_error
        .expect("error recorded")
        .contains("database unavailable"));
}

#[tokio::test]
async fn run_to_agreement_reaches_ready_with_ordered_timeline() {
    let orchestrator = spawn_orchestrator(MockService::new()).await;
    let mut events = orchestrator.subscribe_events();
    orchestrator
        .create_session(buyer_params())
        .await
        .expect("create");

    let finalized = orchestrator.run_to_agreement().await.expect("run");
    assert_eq!(finalized.quantity, 2);
    assert!((50.0..=100.0).contains(&finalized.price));

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.phase, LifecyclePhase::Ready);
    let rounds: Vec<u32> = snapshot.offers.iter().map(|o| o.round).collect();
    assert_eq!(rounds, vec![1, 1, 2, 2]);
    assert_eq!(snapshot.agreement.expect("agreement").agreement_hash, "abc123");

    let mut saw_agreement_ready = false;
    while let Ok(event) = events.try_recv() {
        if let NegotiationEvent::AgreementReady(ready) = event {
            assert_eq!(ready, finalized);
            saw_agreement_ready = true;
        }
    }
    assert!(saw_agreement_ready, "AgreementReady event must be emitted");
}

#[tokio::test]
async fn auto_negotiate_failure_keeps_negotiating_phase() {
    let mock = MockService::new();
    mock.fail_auto.store(true, Ordering::SeqCst);
    let orchestrator = spawn_orchestrator(mock).await;
    orchestrator
        .create_session(buyer_params())
        .await
        .expect("create");

    let err = orchestrator.run_to_agreement().await.expect_err("must fail");
    match err {
        OrchestratorError::Service(ServiceError::Status { status, .. }) => {
            assert_eq!(status, 500)
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.phase, LifecyclePhase::Negotiating);
    assert_eq!(snapshot.session.expect("session preserved").id, SessionId(42));
    assert!(snapshot.last_error.is_some());
}

#[tokio::test]
async fn finalize_failure_restores_negotiating_and_keeps_timeline() {
    let mock = MockService::new();
    mock.fail_finalize.store(true, Ordering::SeqCst);
    let orchestrator = spawn_orchestrator(mock).await;
    orchestrator
        .create_session(buyer_params())
        .await
        .expect("create");

    let err = orchestrator.run_to_agreement().await.expect_err("must fail");
    assert!(matches!(err, OrchestratorError::Service(_)));

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.phase, LifecyclePhase::Negotiating);
    assert_eq!(snapshot.offers.len(), 4, "partial timeline preserved");
    assert!(snapshot.agreement.is_some(), "settled terms preserved");
    assert!(snapshot.finalized.is_none());
}

#[tokio::test]
async fn second_run_while_outstanding_is_rejected() {
    let mock = MockService::new();
    mock.hold_auto.store(true, Ordering::SeqCst);
    let gate = Arc::clone(&mock.auto_gate);
    let orchestrator = spawn_orchestrator(mock).await;
    orchestrator
        .create_session(buyer_params())
        .await
        .expect("create");

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run_to_agreement().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = orchestrator
        .run_to_agreement()
        .await
        .expect_err("second run must be rejected");
    assert!(matches!(err, OrchestratorError::NegotiationInProgress(42)));

    gate.notify_one();
    first
        .await
        .expect("join")
        .expect("first run completes normally");
    assert_eq!(orchestrator.phase().await, LifecyclePhase::Ready);
}

#[tokio::test]
async fn refresh_is_unavailable_before_session_exists() {
    let orchestrator = spawn_orchestrator(MockService::new()).await;

    let err = orchestrator
        .refresh_timeline()
        .await
        .expect_err("must fail");
    assert!(matches!(
        err,
        OrchestratorError::RefreshUnavailable(LifecyclePhase::Form)
    ));
}

#[tokio::test]
async fn refresh_retries_transient_timeline_failures() {
    let mock = MockService::new();
    mock.set_offers(unordered_offers());
    mock.timeline_failures.store(2, Ordering::SeqCst);
    let orchestrator = spawn_orchestrator(mock).await;
    orchestrator
        .create_session(buyer_params())
        .await
        .expect("create");

    let offers = orchestrator.refresh_timeline().await.expect("refresh");
    assert_eq!(offers.len(), 4);
    let rounds: Vec<u32> = offers.iter().map(|o| o.round).collect();
    assert_eq!(rounds, vec![1, 1, 2, 2]);
}

#[tokio::test]
async fn refresh_ignores_shrunken_timeline_fetch() {
    let mock = MockService::new();
    let orchestrator = spawn_orchestrator(mock.clone()).await;
    orchestrator
        .create_session(buyer_params())
        .await
        .expect("create");
    orchestrator.run_to_agreement().await.expect("run");

    mock.set_offers(vec![offer_json(1, 1, "buyer", 60.0)]);
    let offers = orchestrator.refresh_timeline().await.expect("refresh");
    assert_eq!(offers.len(), 4, "held timeline wins over shorter fetch");
}

#[tokio::test]
async fn reset_discards_all_session_state() {
    let orchestrator = spawn_orchestrator(MockService::new()).await;
    orchestrator
        .create_session(buyer_params())
        .await
        .expect("create");
    orchestrator.run_to_agreement().await.expect("run");

    orchestrator.reset().await.expect("reset");

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.phase, LifecyclePhase::Form);
    assert!(snapshot.session.is_none());
    assert!(snapshot.offers.is_empty());
    assert!(snapshot.agreement.is_none());
    assert!(snapshot.finalized.is_none());
}

#[tokio::test]
async fn reset_is_rejected_while_run_is_outstanding() {
    let mock = MockService::new();
    mock.hold_auto.store(true, Ordering::SeqCst);
    let gate = Arc::clone(&mock.auto_gate);
    let orchestrator = spawn_orchestrator(mock).await;
    orchestrator
        .create_session(buyer_params())
        .await
        .expect("create");

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run_to_agreement().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = orchestrator.reset().await.expect_err("reset must wait");
    assert!(matches!(err, OrchestratorError::NegotiationInProgress(_)));

    gate.notify_one();
    first.await.expect("join").expect("first run completes");
    orchestrator.reset().await.expect("reset after completion");
}
