//! HTTP client tests against a mock recognition API on a loopback port

mod fixtures;

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};

use eatfit_photo_batch::models::queue::MealType;
use eatfit_photo_batch::models::recognition::{
    QuotaDetails, SubmitOutcome, TaskHandle, TaskState,
};
use eatfit_photo_batch::services::api::ApiClient;
use eatfit_photo_batch::services::backend::{BackendError, PhotoUpload, RecognitionBackend};

/// One captured upload request.
#[derive(Debug, Clone, Default)]
struct Captured {
    headers: HashMap<String, String>,
    fields: HashMap<String, String>,
    image_name: Option<String>,
    image_len: usize,
}

type Recorder = Arc<Mutex<Vec<Captured>>>;

async fn capture(headers: &HeaderMap, mut multipart: Multipart) -> Captured {
    let mut captured = Captured {
        headers: headers
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect(),
        ..Default::default()
    };

    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            captured.image_name = field.file_name().map(str::to_string);
            captured.image_len = field.bytes().await.unwrap().len();
        } else {
            let value = field.text().await.unwrap();
            captured.fields.insert(name, value);
        }
    }
    captured
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/api/v1/")
}

/// Mock whose upload endpoint always answers with `status` and `body`.
async fn upload_server(status: StatusCode, body: Value) -> (String, Recorder) {
    let recorder = Recorder::default();
    let router = Router::new()
        .route(
            "/api/v1/ai/recognize/",
            post(
                move |State(recorder): State<Recorder>, headers: HeaderMap, multipart: Multipart| {
                    let body = body.clone();
                    async move {
                        let captured = capture(&headers, multipart).await;
                        recorder.lock().unwrap().push(captured);
                        (status, Json(body))
                    }
                },
            ),
        )
        .with_state(recorder.clone());
    (serve(router).await, recorder)
}

fn client(base_url: &str) -> ApiClient {
    ApiClient::new(
        base_url,
        Some("query_id=AAH&user=%7B%22id%22%3A42%7D".to_string()),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn upload() -> PhotoUpload {
    let context = fixtures::context();
    PhotoUpload {
        file_name: "borscht.jpg".to_string(),
        content_type: "image/jpeg",
        data: fixtures::jpeg_bytes(),
        meal_type: MealType::Dinner,
        date: context.date,
        comment: Some("no sour cream".to_string()),
        meal_id: Some(7),
    }
}

#[tokio::test]
async fn test_sync_submit_returns_completed_payload() {
    let (base, recorder) = upload_server(
        StatusCode::OK,
        json!({
            "meal_id": 42,
            "items": [
                {"name": "borscht", "amount_grams": 300, "calories": 180, "protein": 6, "fat": 7, "carbs": 22},
                {"name": "rye bread", "grams": 40, "calories": 90, "protein": 3, "fat": 1, "carbohydrates": 17}
            ],
            "totals": {"calories": 270, "protein": 9, "fat": 8, "carbohydrates": 39}
        }),
    )
    .await;

    let outcome = assert_ok!(client(&base).submit_photo(upload()).await);
    match outcome {
        SubmitOutcome::Completed(payload) => {
            assert_eq!(payload.meal_id, Some(42));
            assert_eq!(payload.items.len(), 2);
            assert_eq!(payload.items[0].grams, 300.0);
            assert_eq!(payload.items[0].carbohydrates, 22.0);
            assert_eq!(payload.totals.unwrap().calories, 270.0);
        }
        other => panic!("expected a completed payload, got {other:?}"),
    }

    let requests = recorder.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(
        request.headers.get("x-telegram-init-data").map(String::as_str),
        Some("query_id=AAH&user=%7B%22id%22%3A42%7D")
    );
    assert!(!request.headers.contains_key("x-debug-mode"));
    assert_eq!(request.image_name.as_deref(), Some("borscht.jpg"));
    assert_eq!(request.image_len, fixtures::jpeg_bytes().len());
    assert_eq!(request.fields["meal_type"], "DINNER");
    assert_eq!(request.fields["date"], "2026-10-18");
    assert_eq!(request.fields["user_comment"], "no sour cream");
    assert_eq!(request.fields["meal_id"], "7");
}

#[tokio::test]
async fn test_optional_fields_omitted() {
    let (base, recorder) = upload_server(StatusCode::OK, json!({"meal_id": 1, "items": []})).await;

    let mut photo = upload();
    photo.comment = None;
    photo.meal_id = None;
    assert_ok!(client(&base).submit_photo(photo).await);

    let request = recorder.lock().unwrap()[0].clone();
    assert!(!request.fields.contains_key("user_comment"));
    assert!(!request.fields.contains_key("meal_id"));
    assert_eq!(request.fields.len(), 2);
}

#[tokio::test]
async fn test_async_submit_returns_task() {
    let (base, _) = upload_server(
        StatusCode::ACCEPTED,
        json!({"task_id": "c0ffee-17", "meal_id": 55, "status": "processing"}),
    )
    .await;

    let outcome = assert_ok!(client(&base).submit_photo(upload()).await);
    assert_eq!(
        outcome,
        SubmitOutcome::Accepted {
            task: TaskHandle("c0ffee-17".to_string()),
            meal_id: Some(55),
        }
    );
}

#[tokio::test]
async fn test_accepted_without_task_id_is_decode_error() {
    let (base, _) = upload_server(StatusCode::ACCEPTED, json!({"status": "processing"})).await;

    let err = assert_err!(client(&base).submit_photo(upload()).await);
    assert!(matches!(err, BackendError::Decode(_)));
}

#[tokio::test]
async fn test_quota_errors_carry_details() {
    let (base, _) = upload_server(
        StatusCode::TOO_MANY_REQUESTS,
        json!({"error": "DAILY_LIMIT_REACHED", "daily_limit": 3, "used": 3, "plan": "free"}),
    )
    .await;
    let err = assert_err!(client(&base).submit_photo(upload()).await);
    match err {
        BackendError::QuotaExceeded(details) => assert_eq!(
            details,
            QuotaDetails {
                daily_limit: Some(3),
                used: Some(3),
                plan: Some("free".to_string()),
            }
        ),
        other => panic!("expected quota error, got {other:?}"),
    }

    // The limit code alone identifies a quota error, whatever the status.
    let (base, _) = upload_server(
        StatusCode::FORBIDDEN,
        json!({"code": "DAILY_LIMIT_REACHED", "daily_limit": 10, "used": 10}),
    )
    .await;
    let err = assert_err!(client(&base).submit_photo(upload()).await);
    assert!(matches!(err, BackendError::QuotaExceeded(ref d) if d.daily_limit == Some(10)));
}

#[tokio::test]
async fn test_status_codes_map_to_error_kinds() {
    let cases = [
        (StatusCode::BAD_REQUEST, json!({"detail": "Unsupported image format"})),
        (StatusCode::PAYLOAD_TOO_LARGE, json!({})),
        (StatusCode::UNAUTHORIZED, json!({"error": "Invalid init data"})),
        (StatusCode::NOT_FOUND, json!({})),
        (StatusCode::BAD_GATEWAY, json!({"error": "upstream unavailable"})),
    ];

    let mut errors = Vec::new();
    for (status, body) in cases {
        let (base, _) = upload_server(status, body).await;
        errors.push(assert_err!(client(&base).submit_photo(upload()).await));
    }

    assert!(matches!(&errors[0], BackendError::Validation(m) if m == "Unsupported image format"));
    assert!(matches!(&errors[1], BackendError::Validation(_)));
    assert!(matches!(&errors[2], BackendError::Unauthorized(m) if m == "Invalid init data"));
    assert!(matches!(&errors[3], BackendError::NotFound));
    assert!(matches!(&errors[4], BackendError::Server { status: 502, .. }));
    assert!(errors[4].is_transient());
    assert!(!errors[0].is_transient());
}

#[tokio::test]
async fn test_task_status_parsing() {
    let router = Router::new().route(
        "/api/v1/ai/task/{task_id}/",
        get(|Path(task_id): Path<String>| async move {
            match task_id.as_str() {
                "done" => (
                    StatusCode::OK,
                    Json(json!({
                        "task_id": "done",
                        "state": "SUCCESS",
                        "result": {"meal_id": 9, "items": [{"name": "pelmeni", "grams": 250, "calories": 550}]}
                    })),
                ),
                "queued" => (StatusCode::OK, Json(json!({"task_id": "queued", "status": "PENDING"}))),
                "broken" => (
                    StatusCode::OK,
                    Json(json!({"state": "FAILURE", "error": "Model could not read the photo"})),
                ),
                _ => (StatusCode::NOT_FOUND, Json(json!({"detail": "Unknown task"}))),
            }
        }),
    );
    let base = serve(router).await;
    let api = client(&base);

    let ids = ["done", "queued", "broken", "missing"].map(|id| TaskHandle(id.to_string()));
    let results = futures::future::join_all(ids.iter().map(|id| api.task_status(id))).await;

    let done = results[0].as_ref().unwrap();
    assert_eq!(done.state, TaskState::Success);
    let result = done.result.as_ref().unwrap();
    assert_eq!(result.meal_id, Some(9));
    assert_eq!(result.items[0].name, "pelmeni");

    assert_eq!(results[1].as_ref().unwrap().state, TaskState::Pending);

    let broken = results[2].as_ref().unwrap();
    assert_eq!(broken.state, TaskState::Failure);
    assert_eq!(broken.error.as_deref(), Some("Model could not read the photo"));

    assert!(matches!(results[3], Err(BackendError::NotFound)));
}

#[tokio::test]
async fn test_fetch_meal_backfills_id_and_reports_deleted() {
    let router = Router::new().route(
        "/api/v1/meals/{meal_id}/",
        get(|Path(meal_id): Path<i64>| async move {
            if meal_id == 8 {
                (StatusCode::OK, Json(json!({"meal_type": "LUNCH", "items": []})))
            } else {
                (StatusCode::NOT_FOUND, Json(json!({"detail": "Not found."})))
            }
        }),
    );
    let base = serve(router).await;
    let api = client(&base);

    let meal = assert_ok!(api.fetch_meal(8).await);
    assert_eq!(meal.meal_id, Some(8));
    assert!(meal.items.is_empty());

    assert!(matches!(api.fetch_meal(9).await, Err(BackendError::NotFound)));
}

#[tokio::test]
async fn test_debug_identity_headers() {
    let (base, recorder) = upload_server(StatusCode::OK, json!({"meal_id": 1, "items": []})).await;

    let api = ApiClient::new(&base, None, Duration::from_secs(5))
        .unwrap()
        .with_debug_identity(Some(777));
    assert_ok!(api.submit_photo(upload()).await);

    let request = recorder.lock().unwrap()[0].clone();
    assert_eq!(request.headers.get("x-debug-mode").map(String::as_str), Some("true"));
    assert_eq!(request.headers.get("x-telegram-id").map(String::as_str), Some("777"));
    assert!(!request.headers.contains_key("x-telegram-init-data"));
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = client(&format!("http://{addr}/api/v1"));
    let err = assert_err!(api.task_status(&TaskHandle("t".to_string())).await);
    assert!(matches!(err, BackendError::Network(_)));
    assert!(err.is_transient());
}
