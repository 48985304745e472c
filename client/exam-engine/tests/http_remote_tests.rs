use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use exam_engine::models::{Answer, AnswerEntry, AttemptId, ExamId, QuestionId, ResultId};
use exam_engine::utils::retry::RetryConfig;
use exam_engine::{HttpRemoteAuthority, RemoteAuthority, RemoteError};

mod common;

#[derive(Default)]
struct Stub {
    flaky_calls: AtomicUsize,
    down_calls: AtomicUsize,
    last_submission: Mutex<Option<Value>>,
}

fn question_json() -> Value {
    json!([
        { "id": "q1", "kind": "single_choice", "points": 1,
          "options": [{ "id": "a", "label": "A" }, { "id": "b", "label": "B" }] },
        { "id": "q2", "kind": "free_text", "points": 2 }
    ])
}

async fn start_attempt(Path(exam_id): Path<String>) -> Response {
    if exam_id == "locked" {
        return (StatusCode::FORBIDDEN, "exam window closed").into_response();
    }
    (
        StatusCode::CREATED,
        Json(json!({
            "attempt_id": format!("{}-attempt", exam_id),
            "questions": question_json(),
            "duration_seconds": 1800
        })),
    )
        .into_response()
}

async fn in_progress(Path(exam_id): Path<String>) -> Response {
    if exam_id == "busy" {
        return Json(json!({
            "has_open_attempt": true,
            "attempt_id": "open",
            "remaining_seconds": 600
        }))
        .into_response();
    }
    Json(json!({ "has_open_attempt": false })).into_response()
}

async fn fetch_attempt(State(stub): State<Arc<Stub>>, Path(attempt_id): Path<String>) -> Response {
    match attempt_id.as_str() {
        "open" => Json(json!({
            "questions": question_json(),
            "remaining_seconds": 600,
            "answers": [{ "question_id": "q1", "answer": { "kind": "single_choice", "option_id": "a" } }]
        }))
        .into_response(),
        "done" => (StatusCode::CONFLICT, Json(json!({ "result_id": "r-1" }))).into_response(),
        "gone" => (StatusCode::GONE, "attempt expired").into_response(),
        "../results/x?draft" => {
            Json(json!({ "questions": [], "remaining_seconds": 42 })).into_response()
        }
        "flaky" => {
            if stub.flaky_calls.fetch_add(1, Ordering::SeqCst) < 2 {
                return (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response();
            }
            Json(json!({ "questions": [], "remaining_seconds": 5 })).into_response()
        }
        _ => (StatusCode::NOT_FOUND, "no such attempt").into_response(),
    }
}

async fn submit_attempt(
    State(stub): State<Arc<Stub>>,
    Path(attempt_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    *stub.last_submission.lock().unwrap() = Some(body);
    match attempt_id.as_str() {
        "open" => Json(json!({ "result_id": "r-2" })).into_response(),
        "done" => (StatusCode::CONFLICT, Json(json!({ "result_id": "r-1" }))).into_response(),
        "closed" => (StatusCode::UNPROCESSABLE_ENTITY, "window closed").into_response(),
        "down" => {
            stub.down_calls.fetch_add(1, Ordering::SeqCst);
            (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
        }
        _ => (StatusCode::NOT_FOUND, "no such attempt").into_response(),
    }
}

async fn fetch_result(Path(result_id): Path<String>) -> Response {
    Json(json!({
        "result_id": result_id,
        "attempt_id": "open",
        "score": 7.5,
        "max_score": 10.0,
        "passed": true,
        "details": { "q1": "correct" }
    }))
    .into_response()
}

async fn spawn_stub() -> (String, Arc<Stub>) {
    common::init_tracing();
    let stub = Arc::new(Stub::default());
    let app = Router::new()
        .route("/api/v1/exams/{exam_id}/attempts", post(start_attempt))
        .route("/api/v1/exams/{exam_id}/attempts/in-progress", get(in_progress))
        .route("/api/v1/attempts/{attempt_id}", get(fetch_attempt))
        .route("/api/v1/attempts/{attempt_id}/submit", post(submit_attempt))
        .route("/api/v1/results/{result_id}", get(fetch_result))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/api/v1", addr), stub)
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
        jitter_max: None,
    }
}

async fn authority() -> (HttpRemoteAuthority, Arc<Stub>) {
    let (base_url, stub) = spawn_stub().await;
    let remote = HttpRemoteAuthority::new(&base_url, Duration::from_secs(5))
        .unwrap()
        .with_read_retry(fast_retry());
    (remote, stub)
}

#[tokio::test]
async fn test_start_attempt_and_closed_window() {
    let (remote, _stub) = authority().await;

    let started = remote.start_attempt(&ExamId::from("exam-1")).await.unwrap();
    assert_eq!(started.attempt_id, AttemptId::from("exam-1-attempt"));
    assert_eq!(started.duration_seconds, 1800);
    assert_eq!(started.questions.len(), 2);
    assert!(started.started_at.is_none());

    let err = remote
        .start_attempt(&ExamId::from("locked"))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::NotAvailable));
}

#[tokio::test]
async fn test_in_progress_lookup_fills_defaults() {
    let (remote, _stub) = authority().await;

    let idle = remote
        .check_in_progress(&ExamId::from("exam-1"))
        .await
        .unwrap();
    assert!(!idle.has_open_attempt);
    assert!(!idle.previous_attempt_expired);
    assert!(idle.attempt_id.is_none());

    let busy = remote
        .check_in_progress(&ExamId::from("busy"))
        .await
        .unwrap();
    assert!(busy.has_open_attempt);
    assert_eq!(busy.attempt_id, Some(AttemptId::from("open")));
    assert_eq!(busy.remaining_seconds, Some(600));
}

#[tokio::test]
async fn test_fetch_attempt_status_mapping() {
    let (remote, _stub) = authority().await;

    let open = remote.fetch_attempt(&AttemptId::from("open")).await.unwrap();
    assert_eq!(open.remaining_seconds, 600);
    assert_eq!(open.answers.len(), 1);
    assert_eq!(open.answers[0].answer, Answer::single("a"));

    match remote.fetch_attempt(&AttemptId::from("done")).await {
        Err(RemoteError::Conflict { result_id }) => assert_eq!(result_id, ResultId::from("r-1")),
        other => panic!("expected Conflict, got {:?}", other),
    }
    assert!(matches!(
        remote.fetch_attempt(&AttemptId::from("gone")).await,
        Err(RemoteError::Invalid(_))
    ));
    assert!(matches!(
        remote.fetch_attempt(&AttemptId::from("missing")).await,
        Err(RemoteError::NotFound)
    ));
}

#[tokio::test]
async fn test_reads_are_retried_on_server_errors() {
    let (remote, stub) = authority().await;

    let fetched = remote
        .fetch_attempt(&AttemptId::from("flaky"))
        .await
        .unwrap();
    assert_eq!(fetched.remaining_seconds, 5);
    assert_eq!(stub.flaky_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_submit_sends_answers_with_an_idempotency_key() {
    let (remote, stub) = authority().await;
    let answers = vec![
        AnswerEntry::from((QuestionId::from("q1"), Answer::single("b"))),
        AnswerEntry::from((QuestionId::from("q2"), Answer::text("because"))),
    ];

    let result_id = remote
        .submit_attempt(&AttemptId::from("open"), answers)
        .await
        .unwrap();
    assert_eq!(result_id, ResultId::from("r-2"));

    let body = stub.last_submission.lock().unwrap().clone().unwrap();
    assert!(!body["idempotency_key"].as_str().unwrap().is_empty());
    assert_eq!(body["answers"][0]["question_id"], "q1");
    assert_eq!(body["answers"][0]["answer"]["kind"], "single_choice");
    assert_eq!(body["answers"][1]["answer"]["text"], "because");
}

#[tokio::test]
async fn test_resubmitting_an_attempt_reuses_its_idempotency_key() {
    let (remote, stub) = authority().await;
    let attempt_id = AttemptId::from("down");

    let mut keys = Vec::new();
    for _ in 0..2 {
        assert!(remote.submit_attempt(&attempt_id, Vec::new()).await.is_err());
        let body = stub.last_submission.lock().unwrap().clone().unwrap();
        keys.push(body["idempotency_key"].as_str().unwrap().to_string());
    }

    assert_eq!(keys[0], keys[1]);
    assert_eq!(stub.down_calls.load(Ordering::SeqCst), 2);

    remote
        .submit_attempt(&AttemptId::from("open"), Vec::new())
        .await
        .unwrap();
    let body = stub.last_submission.lock().unwrap().clone().unwrap();
    assert_ne!(body["idempotency_key"].as_str().unwrap(), keys[0]);
}

#[tokio::test]
async fn test_reserved_characters_in_ids_stay_inside_their_segment() {
    let (remote, _stub) = authority().await;

    let fetched = remote
        .fetch_attempt(&AttemptId::from("../results/x?draft"))
        .await
        .unwrap();
    assert_eq!(fetched.remaining_seconds, 42);

    assert!(matches!(
        remote.fetch_attempt(&AttemptId::from("..")).await,
        Err(RemoteError::Invalid(_))
    ));
}

#[tokio::test]
async fn test_submit_status_mapping_without_retries() {
    let (remote, stub) = authority().await;

    assert!(matches!(
        remote.submit_attempt(&AttemptId::from("done"), Vec::new()).await,
        Err(RemoteError::Conflict { .. })
    ));
    assert!(matches!(
        remote.submit_attempt(&AttemptId::from("closed"), Vec::new()).await,
        Err(RemoteError::Invalid(_))
    ));

    let err = remote
        .submit_attempt(&AttemptId::from("down"), Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Unexpected { status: 500, .. }));
    assert!(err.is_transient());
    assert_eq!(stub.down_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fetch_result() {
    let (remote, _stub) = authority().await;

    let result = remote.fetch_result(&ResultId::from("r-2")).await.unwrap();
    assert_eq!(result.result_id, ResultId::from("r-2"));
    assert_eq!(result.score, 7.5);
    assert_eq!(result.passed, Some(true));
}

#[tokio::test]
async fn test_unreachable_authority() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let remote = HttpRemoteAuthority::new(&format!("http://{}/api/v1", addr), Duration::from_secs(2))
        .unwrap()
        .with_read_retry(RetryConfig::once());

    let err = remote
        .fetch_attempt(&AttemptId::from("open"))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Unreachable(_)));
    assert!(err.is_transient());
}
