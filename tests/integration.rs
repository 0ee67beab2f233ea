use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use orderflow::api::rest::router;
use orderflow::assign::run_coordinator;
use orderflow::error::CoreError;
use orderflow::models::driver::Driver;
use orderflow::scheduler::activate_due;
use orderflow::state::{AppState, StateOptions};
use orderflow::store::memory::MemoryStore;
use orderflow::store::{ns, StoreBackend};

#[derive(Clone, Debug)]
struct PushRecord {
    token: String,
    title: String,
}

/// Gateway double that records every accepted push.
#[derive(Default)]
struct RecordingGateway {
    pushes: Mutex<Vec<PushRecord>>,
}

impl RecordingGateway {
    fn recorded(&self) -> Vec<PushRecord> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl orderflow::notify::PushGateway for RecordingGateway {
    async fn push(
        &self,
        token: &str,
        title: &str,
        _body: &str,
        _data: &Value,
    ) -> Result<(), CoreError> {
        self.pushes.lock().unwrap().push(PushRecord {
            token: token.to_string(),
            title: title.to_string(),
        });
        Ok(())
    }
}

fn setup() -> (
    axum::Router,
    Arc<AppState>,
    Arc<RecordingGateway>,
    mpsc::Receiver<Uuid>,
) {
    let backend: Arc<dyn StoreBackend> = Arc::new(MemoryStore::new());
    let gateway = Arc::new(RecordingGateway::default());
    let (state, assign_rx) = AppState::new(backend, gateway.clone(), StateOptions::default());
    let state = Arc::new(state);
    (router(state.clone()), state, gateway, assign_rx)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
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

fn delivery_draft(customer_id: &str, restaurant_id: &str) -> Value {
    json!({
        "customer_id": customer_id,
        "restaurant_id": restaurant_id,
        "items": [{
            "product_id": "p-1",
            "name": "Margherita",
            "quantity": 2,
            "unit_price": 950,
            "line_total": 1900,
            "customizations": ["extra basil"],
            "special_instructions": null
        }],
        "subtotal": 1900,
        "tip": 300,
        "delivery_fee": 500,
        "total": 2700,
        "fulfillment": "Delivery",
        "payment_method": "card",
        "address": {
            "street": "Reeperbahn 1",
            "city": "Hamburg",
            "location": { "lat": 53.5499, "lng": 9.9634 }
        }
    })
}

async fn register_user(app: &axum::Router, id: &str, name: &str, role: &str, token: &str) {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/users",
            json!({ "id": id, "name": name, "role": role, "fcm_token": token }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

async fn create_driver(app: &axum::Router, id: &str, name: &str, lat: f64, lng: f64) {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/drivers",
            json!({
                "id": id,
                "name": name,
                "location": { "lat": lat, "lng": lng },
                "rating": 4.7
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

async fn create_order(app: &axum::Router, customer_id: &str, restaurant_id: &str) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "draft": delivery_draft(customer_id, restaurant_id),
                "payment_completed": true
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn transition(app: &axum::Router, order_id: &str, actor_id: &str, target: &str) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/transition"),
            json!({ "actor_id": actor_id, "target": target }),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _state, _gateway, _rx) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "connected");
    assert_eq!(body["orders"], 0);
    assert_eq!(body["drivers"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state, _gateway, _rx) = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_string(response).await;
    assert!(body.contains("orders_awaiting_driver"));
}

#[tokio::test]
async fn create_order_returns_pending() {
    let (app, _state, _gateway, _rx) = setup();
    let order = create_order(&app, "cust-1", "rest-1").await;

    assert_eq!(order["phase"], "Pending");
    assert_eq!(order["status"], "Pending");
    assert_eq!(order["total"], 2700);
    assert!(order["driver_id"].is_null());
}

#[tokio::test]
async fn create_order_with_total_mismatch_returns_400() {
    let (app, _state, _gateway, _rx) = setup();

    let mut draft = delivery_draft("cust-1", "rest-1");
    draft["total"] = json!(9999);

    let response = app
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({ "draft": draft, "payment_completed": true }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_delivery_order_without_address_returns_400() {
    let (app, _state, _gateway, _rx) = setup();

    let mut draft = delivery_draft("cust-1", "rest-1");
    draft["address"] = Value::Null;

    let response = app
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({ "draft": draft, "payment_completed": true }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_order_without_completed_payment_returns_400() {
    let (app, _state, _gateway, _rx) = setup();

    let response = app
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({ "draft": delivery_draft("cust-1", "rest-1"), "payment_completed": false }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_nonexistent_order_returns_404() {
    let (app, _state, _gateway, _rx) = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/orders/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn login_resolves_role_from_index() {
    let (app, _state, _gateway, _rx) = setup();
    register_user(&app, "rest-1", "Pizza Place", "Restaurant", "").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            json!({ "user_id": "rest-1", "secret": "hunter2" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["role"], "Restaurant");
    assert_eq!(body["id"], "rest-1");

    let response = app
        .oneshot(json_request(
            "POST",
            "/auth/login",
            json!({ "user_id": "ghost", "secret": "x" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_accept_is_idempotent_and_notifies_once() {
    let (app, _state, gateway, _rx) = setup();
    register_user(&app, "rest-1", "Pizza Place", "Restaurant", "").await;
    register_user(&app, "cust-1", "Ada", "Customer", "tok-cust").await;

    let order = create_order(&app, "cust-1", "rest-1").await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let response = transition(&app, &order_id, "rest-1", "Accepted").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["phase"], "Accepted");
    assert!(!body["accepted_at"].is_null());

    let response = transition(&app, &order_id, "rest-1", "Accepted").await;
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

    let accepted_pushes: Vec<_> = gateway
        .recorded()
        .into_iter()
        .filter(|p| p.title == "Order Accepted!")
        .collect();
    assert_eq!(accepted_pushes.len(), 1);
    assert_eq!(accepted_pushes[0].token, "tok-cust");
}

#[tokio::test]
async fn off_table_transition_is_rejected_and_state_unchanged() {
    let (app, _state, _gateway, _rx) = setup();
    register_user(&app, "admin-1", "Root", "Admin", "").await;

    let order = create_order(&app, "cust-1", "rest-1").await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let before = body_json(
        app.clone()
            .oneshot(get_request(&format!("/orders/{order_id}")))
            .await
            .unwrap(),
    )
    .await;

    let response = transition(&app, &order_id, "admin-1", "PickedUp").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let after = body_json(
        app.oneshot(get_request(&format!("/orders/{order_id}")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(before, after);
}

#[tokio::test]
async fn unauthorized_actor_returns_403() {
    let (app, _state, _gateway, _rx) = setup();
    register_user(&app, "cust-1", "Ada", "Customer", "").await;

    let order = create_order(&app, "cust-1", "rest-1").await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let response = transition(&app, &order_id, "cust-1", "Accepted").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn driver_availability_and_location_updates() {
    let (app, _state, _gateway, _rx) = setup();
    create_driver(&app, "drv-1", "Dan", 53.55, 9.99).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            "/drivers/drv-1/availability",
            json!({ "is_available": false }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["is_available"], false);

    let response = app
        .oneshot(json_request(
            "PATCH",
            "/drivers/drv-1/location",
            json!({ "location": { "lat": 48.85, "lng": 2.35 } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["location"]["lat"], 48.85);
}

#[tokio::test]
async fn full_assignment_flow() {
    let (app, state, _gateway, assign_rx) = setup();
    tokio::spawn(run_coordinator(state.clone(), assign_rx));

    register_user(&app, "rest-1", "Pizza Place", "Restaurant", "").await;
    register_user(&app, "cust-1", "Ada", "Customer", "tok-cust").await;
    create_driver(&app, "drv-1", "Dan", 53.55, 9.96).await;

    let order = create_order(&app, "cust-1", "rest-1").await;
    let order_id = order["id"].as_str().unwrap().to_string();

    for target in ["Accepted", "Preparing", "ReadyForPickup"] {
        let response = transition(&app, &order_id, "rest-1", target).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

    let updated = body_json(
        app.clone()
            .oneshot(get_request(&format!("/orders/{order_id}")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(updated["phase"], "AssignedDriver");
    assert_eq!(updated["driver_id"], "drv-1");
    assert_eq!(updated["driver_name"], "Dan");

    let drivers = body_json(app.oneshot(get_request("/drivers")).await.unwrap()).await;
    let driver = &drivers.as_array().unwrap()[0];
    assert_eq!(driver["is_available"], false);
    assert_eq!(driver["current_order_id"], order_id);
}

#[tokio::test]
async fn assign_then_reject_restores_order_and_driver() {
    // no coordinator here: the claim and rejection are driven directly
    // so the automatic re-offer cannot race the assertions
    let (app, state, _gateway, _rx) = setup();

    register_user(&app, "rest-1", "Pizza Place", "Restaurant", "").await;
    register_user(&app, "cust-1", "Ada", "Customer", "").await;
    create_driver(&app, "drv-1", "Dan", 53.55, 9.96).await;

    let order = create_order(&app, "cust-1", "rest-1").await;
    let order_id = Uuid::parse_str(order["id"].as_str().unwrap()).unwrap();

    for target in ["Accepted", "Preparing", "ReadyForPickup"] {
        let response = transition(&app, &order_id.to_string(), "rest-1", target).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let driver = state
        .store
        .get::<Driver>(ns::DRIVERS, "drv-1")
        .await
        .unwrap()
        .unwrap()
        .value;
    let assigned = state.lifecycle.assign_driver(order_id, &driver).await.unwrap();
    assert_eq!(
        assigned.phase,
        orderflow::models::order::OrderPhase::AssignedDriver
    );
    state
        .lifecycle
        .update_driver("drv-1", |d| {
            d.is_available = false;
            d.current_order_id = Some(order_id);
        })
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/reject"),
            json!({ "driver_id": "drv-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["phase"], "ReadyForPickup");
    assert!(body["driver_id"].is_null());
    assert!(body["driver_name"].is_null());

    let driver = state
        .store
        .get::<Driver>(ns::DRIVERS, "drv-1")
        .await
        .unwrap()
        .unwrap()
        .value;
    assert!(driver.is_available);
    assert_eq!(driver.current_order_id, None);
    assert_eq!(driver.rejected_orders_count, 1);
}

#[tokio::test]
async fn token_fallback_reaches_customers_path() {
    let (app, state, gateway, _rx) = setup();

    register_user(&app, "rest-1", "Pizza Place", "Restaurant", "").await;
    // users/cust-1 has no token; customers/cust-1 carries T1
    register_user(&app, "cust-1", "Ada", "Customer", "").await;
    state
        .store
        .put(ns::CUSTOMERS, "cust-1", &json!({ "fcm_token": "T1" }))
        .await
        .unwrap();

    let order = create_order(&app, "cust-1", "rest-1").await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let response = transition(&app, &order_id, "rest-1", "Accepted").await;
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

    let pushes = gateway.recorded();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].token, "T1");
    assert_eq!(pushes[0].title, "Order Accepted!");

    // audit copy lands under the order's notification log
    let log = body_json(
        app.oneshot(get_request(&format!("/orders/{order_id}/notifications")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(log.as_array().unwrap().len(), 1);
    assert_eq!(log[0]["token_source"], "customers");
}

#[tokio::test]
async fn concurrent_activator_sweeps_activate_once() {
    let (app, state, _gateway, _rx) = setup();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/scheduled-orders",
            json!({
                "scheduled_for": "2020-01-01T00:00:00Z",
                "draft": delivery_draft("cust-1", "rest-1"),
                "payment_completed": true
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (first, second) = tokio::join!(activate_due(&state), activate_due(&state));
    assert_eq!(first.unwrap() + second.unwrap(), 1);

    let orders = body_json(app.clone().oneshot(get_request("/orders")).await.unwrap()).await;
    assert_eq!(orders.as_array().unwrap().len(), 1);

    let scheduled = body_json(app.oneshot(get_request("/scheduled-orders")).await.unwrap()).await;
    assert!(scheduled.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn racing_claims_have_a_single_winner() {
    let (app, state, _gateway, _rx) = setup();

    register_user(&app, "rest-1", "Pizza Place", "Restaurant", "").await;
    create_driver(&app, "drv-1", "Dan", 53.55, 9.96).await;
    create_driver(&app, "drv-2", "Eve", 53.56, 9.97).await;

    let order = create_order(&app, "cust-1", "rest-1").await;
    let order_id = Uuid::parse_str(order["id"].as_str().unwrap()).unwrap();

    for target in ["Accepted", "Preparing", "ReadyForPickup"] {
        let response = transition(&app, &order_id.to_string(), "rest-1", target).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let d1 = state
        .store
        .get::<Driver>(ns::DRIVERS, "drv-1")
        .await
        .unwrap()
        .unwrap()
        .value;
    let d2 = state
        .store
        .get::<Driver>(ns::DRIVERS, "drv-2")
        .await
        .unwrap()
        .unwrap()
        .value;

    let (first, second) = tokio::join!(
        state.lifecycle.assign_driver(order_id, &d1),
        state.lifecycle.assign_driver(order_id, &d2)
    );
    let winners = [first.is_ok(), second.is_ok()]
        .iter()
        .filter(|ok| **ok)
        .count();
    assert_eq!(winners, 1);

    let stored = state
        .store
        .get::<orderflow::models::order::Order>(ns::ORDERS, &order_id.to_string())
        .await
        .unwrap()
        .unwrap()
        .value;
    let expected = if first.is_ok() { "drv-1" } else { "drv-2" };
    assert_eq!(stored.driver_id.as_deref(), Some(expected));
}
