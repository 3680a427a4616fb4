mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use common::{wait_for_terminal, Harness, INITIAL_SEATS};
use reservation_service::queue::JobQueue;
use serde_json::{json, Value};
use shared::ResourceKey;
use tower::ServiceExt;

async fn send(router: &axum::Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get(router: &axum::Router, uri: &str) -> (StatusCode, Value) {
    send(router, Method::GET, uri, None).await
}

async fn seeded() -> Harness {
    let harness = Harness::serialized();
    harness
        .engine
        .reopen(&ResourceKey::seats(), INITIAL_SEATS)
        .await
        .unwrap();
    harness
}

#[tokio::test]
async fn available_seats_reports_the_seeded_count() {
    let harness = seeded().await;
    let router = harness.router();

    let (status, body) = get(&router, "/available_seats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "numberOfAvailableSeats": 50 }));

    let (_, again) = get(&router, "/available_seats").await;
    assert_eq!(again, body);
}

#[tokio::test]
async fn reserve_seat_acknowledges_before_processing() {
    let harness = seeded().await;
    let router = harness.router();
    let mut events = harness.queue.subscribe();

    let (status, body) = get(&router, "/reserve_seat").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "Reservation in process" }));

    let (_, seats) = get(&router, "/available_seats").await;
    assert_eq!(seats["numberOfAvailableSeats"], 50);

    let (_, processing) = get(&router, "/process").await;
    assert_eq!(processing, json!({ "status": "Queue processing" }));
    wait_for_terminal(&mut events, 1).await;

    let (_, seats) = get(&router, "/available_seats").await;
    assert_eq!(seats["numberOfAvailableSeats"], 49);
}

#[tokio::test]
async fn exhausted_seats_are_blocked_without_enqueueing() {
    let harness = Harness::serialized();
    harness.engine.reopen(&ResourceKey::seats(), 1).await.unwrap();
    let router = harness.router();
    let mut events = harness.queue.subscribe();
    get(&router, "/process").await;

    get(&router, "/reserve_seat").await;
    wait_for_terminal(&mut events, 1).await;

    let (_, body) = get(&router, "/reserve_seat").await;
    assert_eq!(body, json!({ "status": "Reservation are blocked" }));
    assert_eq!(harness.queue.created_jobs().await.len(), 1);
}

#[tokio::test]
async fn queue_outage_is_reported_as_failed() {
    let harness = seeded().await;
    harness.queue.close();

    let (status, body) = get(&harness.router(), "/reserve_seat").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "Reservation failed" }));
}

#[tokio::test]
async fn store_outage_on_query_is_a_json_error() {
    let harness = seeded().await;
    harness.store.set_available(false);

    let (status, body) = get(&harness.router(), "/available_seats").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, json!({ "status": "Counter store unavailable" }));
}

#[tokio::test]
async fn list_products_returns_the_catalog() {
    let harness = Harness::serialized();
    let (status, body) = get(&harness.router(), "/list_products").await;

    assert_eq!(status, StatusCode::OK);
    let products = body.as_array().expect("array");
    assert_eq!(products.len(), 4);
    assert_eq!(
        products[0],
        json!({ "itemId": 1, "itemName": "Suitcase 250", "price": 50, "initialAvailableQuantity": 4 })
    );
}

#[tokio::test]
async fn unknown_products_are_not_found() {
    let harness = Harness::serialized();
    let router = harness.router();

    for uri in ["/list_products/99", "/list_products/abc", "/reserve_product/99"] {
        let (status, body) = get(&router, uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(body, json!({ "status": "Product not found" }), "{uri}");
    }
    assert!(harness.queue.created_jobs().await.is_empty());
}

#[tokio::test]
async fn reserving_a_product_lowers_its_current_quantity() {
    let harness = Harness::serialized();
    let router = harness.router();
    let mut events = harness.queue.subscribe();
    get(&router, "/process").await;

    let (_, detail) = get(&router, "/list_products/1").await;
    assert_eq!(
        detail,
        json!({
            "itemId": 1,
            "itemName": "Suitcase 250",
            "price": 50,
            "initialAvailableQuantity": 4,
            "currentQuantity": 4
        })
    );

    let (_, reserved) = get(&router, "/reserve_product/1").await;
    assert_eq!(reserved, json!({ "status": "Reservation in process", "itemId": 1 }));
    wait_for_terminal(&mut events, 1).await;

    let (_, detail) = get(&router, "/list_products/1").await;
    assert_eq!(detail["currentQuantity"], 3);
    let (_, again) = get(&router, "/list_products/1").await;
    assert_eq!(again["currentQuantity"], 3);
}

#[tokio::test]
async fn sold_out_products_are_rejected_at_the_gateway() {
    let harness = Harness::serialized();
    let router = harness.router();
    let mut events = harness.queue.subscribe();
    get(&router, "/process").await;

    for _ in 0..2 {
        get(&router, "/reserve_product/3").await;
        wait_for_terminal(&mut events, 1).await;
    }

    let (_, body) = get(&router, "/reserve_product/3").await;
    assert_eq!(body, json!({ "status": "Not enough stock available", "itemId": 3 }));
    let (_, detail) = get(&router, "/list_products/3").await;
    assert_eq!(detail["currentQuantity"], 0);
}

#[tokio::test]
async fn push_notifications_enqueues_one_job_per_entry() {
    let harness = Harness::serialized();
    let body = json!([
        { "phoneNumber": "4153518743", "message": "This is the code 4321 to verify your account" },
        { "phoneNumber": "4153538781", "message": "This is the code 4562 to verify your account" }
    ]);

    let (status, response) = send(&harness.router(), Method::POST, "/push_notifications", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "Notification jobs created");
    assert_eq!(response["jobIds"].as_array().map(Vec::len), Some(2));
    assert_eq!(harness.queue.created_jobs().await.len(), 2);
}

#[tokio::test]
async fn health_check_is_plain_ok() {
    let harness = Harness::serialized();
    let response = harness
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}
