use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use delivery_lifecycle::api::rest::router;
use delivery_lifecycle::config::Config;
use delivery_lifecycle::state::AppState;
use delivery_lifecycle::store::DeliveryStore;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

struct Caller {
    id: Uuid,
    role: &'static str,
}

impl Caller {
    fn sender() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: "sender",
        }
    }

    fn driver() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: "driver",
        }
    }
}

fn setup() -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(&Config::default()));
    (router(state.clone()), state)
}

fn json_request(method: &str, uri: &str, caller: &Caller, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-actor-id", caller.id.to_string())
        .header("x-actor-role", caller.role)
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str, caller: &Caller) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-actor-id", caller.id.to_string())
        .header("x-actor-role", caller.role)
        .body(Body::empty())
        .unwrap()
}

fn anonymous_get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn nyc_delivery() -> Value {
    json!({
        "pickup_latitude": 40.7128,
        "pickup_longitude": -74.0060,
        "pickup_address": "City Hall, New York",
        "pickup_phone": "+1-212-555-0100",
        "dropoff_latitude": 40.7580,
        "dropoff_longitude": -73.9855,
        "dropoff_address": "Times Square, New York",
        "recipient_name": "Ben",
        "recipient_phone": "+1-212-555-0199",
        "package_size": "small",
        "priority": "standard"
    })
}

async fn create(app: &axum::Router, sender: &Caller) -> Value {
    let response = app
        .clone()
        .oneshot(json_request("POST", "/deliveries", sender, nyc_delivery()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

async fn post(app: &axum::Router, uri: &str, caller: &Caller, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(json_request("POST", uri, caller, body))
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn pin_of(state: &AppState, id: &str) -> String {
    let id: Uuid = id.parse().unwrap();
    state
        .store
        .get_by_id(id)
        .await
        .unwrap()
        .unwrap()
        .proof_pin
        .expose()
        .to_string()
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _state) = setup();
    let response = app.oneshot(anonymous_get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["event_subscribers"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state) = setup();
    let response = app.oneshot(anonymous_get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("events_in_flight"));
}

#[tokio::test]
async fn missing_actor_headers_are_unauthorized() {
    let (app, _state) = setup();
    let response = app.oneshot(anonymous_get("/deliveries")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "missing x-actor-id header");
}

#[tokio::test]
async fn unknown_role_is_unauthorized() {
    let (app, _state) = setup();
    let caller = Caller {
        id: Uuid::new_v4(),
        role: "admin",
    };
    let response = app
        .oneshot(get_request("/deliveries", &caller))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn estimate_quotes_without_persisting() {
    let (app, _state) = setup();
    let sender = Caller::sender();
    let (status, body) = post(
        &app,
        "/deliveries/estimate",
        &sender,
        json!({
            "pickup_latitude": 40.7128,
            "pickup_longitude": -74.0060,
            "dropoff_latitude": 40.7580,
            "dropoff_longitude": -73.9855,
            "package_size": "small",
            "priority": "express"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currency"], "USD");
    assert_eq!(body["priority"], "express");
    assert!(body["total"].as_f64().unwrap() >= 5.0);
    assert!(body["duration_min"].as_u64().unwrap() >= 21);

    let list = app
        .oneshot(get_request("/deliveries", &sender))
        .await
        .unwrap();
    assert_eq!(body_json(list).await["deliveries"], json!([]));
}

#[tokio::test]
async fn create_returns_created_detail_without_pin() {
    let (app, _state) = setup();
    let sender = Caller::sender();
    let body = create(&app, &sender).await;

    assert_eq!(body["status"], "requested");
    assert_eq!(body["sender_id"], sender.id.to_string());
    assert!(body["driver_id"].is_null());
    assert!(body.get("proof_pin").is_none());
    assert!(body["tracking_code"].as_str().unwrap().starts_with("DLV-"));
    assert_eq!(body["tracking_events"][0]["status"], "Delivery requested");

    let distance = body["estimated_distance_km"].as_f64().unwrap();
    assert!((distance - 5.3).abs() < 0.3);
    assert!(body["estimated_duration_min"].as_u64().unwrap() >= 21);
    assert!(body["estimated_fare"].as_f64().unwrap() >= 5.0);
}

#[tokio::test]
async fn create_with_invalid_size_is_bad_request() {
    let (app, _state) = setup();
    let sender = Caller::sender();
    let mut payload = nyc_delivery();
    payload["package_size"] = json!("crate");

    let (status, body) = post(&app, "/deliveries", &sender, payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("invalid package size"));
}

#[tokio::test]
async fn happy_path_over_http() {
    let (app, state) = setup();
    let sender = Caller::sender();
    let driver = Caller::driver();
    let created = create(&app, &sender).await;
    let id = created["id"].as_str().unwrap().to_string();

    let available = app
        .clone()
        .oneshot(get_request(
            "/driver/deliveries/available?latitude=40.7128&longitude=-74.0060",
            &driver,
        ))
        .await
        .unwrap();
    assert_eq!(available.status(), StatusCode::OK);
    assert_eq!(body_json(available).await[0]["id"], id);

    let (status, body) = post(&app, &format!("/driver/deliveries/{id}/accept"), &driver, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["driver_id"], driver.id.to_string());

    let (status, body) = post(
        &app,
        &format!("/driver/deliveries/{id}/status"),
        &driver,
        json!({ "status": "picking_up" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "picking_up");

    let (status, body) = post(
        &app,
        &format!("/driver/deliveries/{id}/pickup"),
        &driver,
        json!({ "notes": "two boxes" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "picked_up");
    assert!(!body["picked_up_at"].is_null());

    let (status, body) = post(
        &app,
        &format!("/driver/deliveries/{id}/status"),
        &driver,
        json!({ "status": "in_transit", "latitude": 40.74, "longitude": -73.99 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "in_transit");

    let pin = pin_of(&state, &id).await;
    let (status, body) = post(
        &app,
        &format!("/driver/deliveries/{id}/deliver"),
        &driver,
        json!({ "proof_type": "pin", "pin": pin }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "delivered");
    assert_eq!(body["final_fare"], body["estimated_fare"]);
    assert!(!body["delivered_at"].is_null());

    let (status, body) = post(
        &app,
        &format!("/deliveries/{id}/rate"),
        &sender,
        json!({ "rating": "five" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "rating must be between 1 and 5");

    let (status, body) = post(
        &app,
        &format!("/deliveries/{id}/rate"),
        &sender,
        json!({ "rating": 5, "feedback": "quick" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sender_rating"], 5);

    let stats = app
        .clone()
        .oneshot(get_request("/deliveries/stats", &sender))
        .await
        .unwrap();
    let stats = body_json(stats).await;
    assert_eq!(stats["delivered"], 1);
    assert_eq!(stats["active_deliveries"], 0);

    let detail = app
        .oneshot(get_request(&format!("/deliveries/{id}"), &sender))
        .await
        .unwrap();
    let detail = body_json(detail).await;
    assert_eq!(detail["tracking_events"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn concurrent_accept_over_http_has_single_winner() {
    let (app, _state) = setup();
    let sender = Caller::sender();
    let created = create(&app, &sender).await;
    let id = created["id"].as_str().unwrap().to_string();

    let first = Caller::driver();
    let second = Caller::driver();
    let uri = format!("/driver/deliveries/{id}/accept");
    let (a, b) = tokio::join!(
        post(&app, &uri, &first, json!({})),
        post(&app, &uri, &second, json!({}))
    );

    let mut statuses = vec![a.0.as_u16(), b.0.as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![200, 409]);
}

#[tokio::test]
async fn wrong_pin_is_rejected() {
    let (app, state) = setup();
    let sender = Caller::sender();
    let driver = Caller::driver();
    let id = create(&app, &sender).await["id"].as_str().unwrap().to_string();

    post(&app, &format!("/driver/deliveries/{id}/accept"), &driver, json!({})).await;
    post(&app, &format!("/driver/deliveries/{id}/pickup"), &driver, json!({})).await;
    post(
        &app,
        &format!("/driver/deliveries/{id}/status"),
        &driver,
        json!({ "status": "in_transit" }),
    )
    .await;

    let pin = pin_of(&state, &id).await;
    let wrong = if pin == "1234" { "4321" } else { "1234" };
    let (status, body) = post(
        &app,
        &format!("/driver/deliveries/{id}/deliver"),
        &driver,
        json!({ "proof_type": "pin", "pin": wrong }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "incorrect delivery PIN");

    let detail = app
        .oneshot(get_request(&format!("/deliveries/{id}"), &sender))
        .await
        .unwrap();
    assert_eq!(body_json(detail).await["status"], "in_transit");
}

#[tokio::test]
async fn illegal_transition_is_bad_request() {
    let (app, _state) = setup();
    let sender = Caller::sender();
    let driver = Caller::driver();
    let id = create(&app, &sender).await["id"].as_str().unwrap().to_string();

    let (status, body) = post(
        &app,
        &format!("/driver/deliveries/{id}/status"),
        &driver,
        json!({ "status": "delivered" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "cannot transition from requested to delivered");
}

#[tokio::test]
async fn driver_cancel_after_pickup_is_refused() {
    let (app, _state) = setup();
    let sender = Caller::sender();
    let driver = Caller::driver();
    let id = create(&app, &sender).await["id"].as_str().unwrap().to_string();

    post(&app, &format!("/driver/deliveries/{id}/accept"), &driver, json!({})).await;
    post(&app, &format!("/driver/deliveries/{id}/pickup"), &driver, json!({})).await;

    let (status, body) = post(
        &app,
        &format!("/deliveries/{id}/cancel"),
        &driver,
        json!({ "reason": "flat tyre" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "cannot cancel after package pickup - use return instead"
    );

    let (status, body) = post(
        &app,
        &format!("/driver/deliveries/{id}/status"),
        &driver,
        json!({ "status": "in_transit" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "in_transit");

    let (status, body) = post(
        &app,
        &format!("/driver/deliveries/{id}/return"),
        &driver,
        json!({ "reason": "flat tyre" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "returned");
}

#[tokio::test]
async fn sender_cancel_without_body_succeeds() {
    let (app, _state) = setup();
    let sender = Caller::sender();
    let id = create(&app, &sender).await["id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/deliveries/{id}/cancel"))
        .header("x-actor-id", sender.id.to_string())
        .header("x-actor-role", sender.role)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "cancelled");
    assert!(!body["cancelled_at"].is_null());
}

#[tokio::test]
async fn public_tracking_is_redacted() {
    let (app, _state) = setup();
    let sender = Caller::sender();
    let created = create(&app, &sender).await;
    let code = created["tracking_code"].as_str().unwrap();

    let response = app
        .oneshot(anonymous_get(&format!("/deliveries/track/{code}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_string(response).await;
    assert!(!body.contains("proof_pin"));
    assert!(!body.contains("pickup_phone"));
    assert!(!body.contains("recipient_phone"));
    assert!(!body.contains("555-01"));

    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["tracking_code"], code);
    assert_eq!(body["status"], "requested");
}

#[tokio::test]
async fn unknown_tracking_code_is_not_found() {
    let (app, _state) = setup();
    let response = app
        .oneshot(anonymous_get("/deliveries/track/DLV-AAAAA-AAAAA"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "delivery not found");
}

#[tokio::test]
async fn unknown_delivery_is_not_found() {
    let (app, _state) = setup();
    let sender = Caller::sender();
    let response = app
        .oneshot(get_request(&format!("/deliveries/{}", Uuid::new_v4()), &sender))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn strangers_are_forbidden() {
    let (app, _state) = setup();
    let sender = Caller::sender();
    let id = create(&app, &sender).await["id"].as_str().unwrap().to_string();

    let other = Caller::sender();
    let response = app
        .clone()
        .oneshot(get_request(&format!("/deliveries/{id}"), &other))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let driver = Caller::driver();
    let response = app
        .oneshot(json_request("POST", "/deliveries", &driver, nyc_delivery()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn active_delivery_is_not_found_for_idle_driver() {
    let (app, _state) = setup();
    let driver = Caller::driver();
    let response = app
        .oneshot(get_request("/driver/deliveries/active", &driver))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "no active delivery");
}

#[tokio::test]
async fn shutdown_cancels_requests() {
    let (app, state) = setup();
    state.shutdown.cancel();

    let sender = Caller::sender();
    let response = app
        .oneshot(json_request("POST", "/deliveries", &sender, nyc_delivery()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    let body = body_json(response).await;
    assert_eq!(body["error"], "request cancelled");
}
