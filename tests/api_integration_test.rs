mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimals are serialized as strings")
        .parse()
        .expect("valid decimal")
}

fn checkout_body() -> Value {
    json!({
        "name": "Siti Rahma",
        "email": "siti@example.com",
        "phone": "+62 812 0000 0000",
        "shipping_address": "Jl. Merdeka 1, Jakarta"
    })
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");

    let (status, body) = app.request(Method::GET, "/health/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"]["status"], "up");
}

#[tokio::test]
async fn cart_requires_a_valid_token() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "authentication_required");

    let (status, _) = app
        .request(Method::GET, "/api/v1/cart", None, Some("not-a-jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let admin = app.token_for(TestApp::admin());
    let mug = app.seed_product("Mug", dec!(45000), 5).await;
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": mug.id })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden_operation");
}

#[tokio::test]
async fn shopper_flow_from_cart_to_order() {
    let app = TestApp::new().await;
    let token = app.token_for(TestApp::customer());
    let a = app.seed_product("Kettle", dec!(100000), 10).await;
    let b = app.seed_product("Teapot", dec!(50000), 10).await;

    for product in [&a, &a, &b] {
        let (status, _) = app
            .request(
                Method::POST,
                "/api/v1/cart/items",
                Some(json!({ "product_id": product.id })),
                Some(&token),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, cart) = app
        .request(
            Method::POST,
            &format!("/api/v1/cart/items/{}/toggle", b.id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&cart["pricing"]["total"]), dec!(237000));

    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/api/v1/cart/items/{}", a.id),
            Some(json!({ "quantity": 0 })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_quantity");

    let (status, order) = app
        .request(Method::POST, "/api/v1/checkout", Some(checkout_body()), Some(&token))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_status"], "pending");
    assert_eq!(decimal(&order["total"]), dec!(237000));
    assert_eq!(order["items"].as_array().unwrap().len(), 1);
    let order_id = order["id"].as_str().unwrap().to_string();

    let (status, list) = app
        .request(Method::GET, "/api/v1/orders", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);
    assert_eq!(list["items"][0]["id"], order_id.as_str());

    let (status, detail) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["history"].as_array().unwrap().len(), 1);

    let (_, cart) = app.request(Method::GET, "/api/v1/cart", None, Some(&token)).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);
    assert_eq!(cart["items"][0]["product_id"], b.id.to_string());
}

#[tokio::test]
async fn stock_errors_name_the_product() {
    let app = TestApp::new().await;
    let token = app.token_for(TestApp::customer());
    let lamp = app.seed_product("Brass Lamp", dec!(75000), 1).await;

    app.request(
        Method::POST,
        "/api/v1/cart/items",
        Some(json!({ "product_id": lamp.id })),
        Some(&token),
    )
    .await;
    app.request(
        Method::PUT,
        &format!("/api/v1/cart/items/{}", lamp.id),
        Some(json!({ "quantity": 2 })),
        Some(&token),
    )
    .await;

    let (status, body) = app
        .request(Method::POST, "/api/v1/checkout", Some(checkout_body()), Some(&token))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "insufficient_stock");
    assert!(body["message"].as_str().unwrap().contains("Brass Lamp"));

    let (status, body) = app
        .request(Method::POST, "/api/v1/checkout", Some(json!({})), Some(&token))
        .await;
    assert!(status.is_client_error());
    assert_ne!(body["code"], "insufficient_stock");
}

#[tokio::test]
async fn admin_manages_orders_over_http() {
    let app = TestApp::new().await;
    let customer = app.token_for(TestApp::customer());
    let admin = app.token_for(TestApp::admin());
    let lamp = app.seed_product("Lamp", dec!(75000), 10).await;

    let mut order_ids = Vec::new();
    for _ in 0..2 {
        app.request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": lamp.id })),
            Some(&customer),
        )
        .await;
        let (_, order) = app
            .request(Method::POST, "/api/v1/checkout", Some(checkout_body()), Some(&customer))
            .await;
        order_ids.push(order["id"].as_str().unwrap().to_string());
    }

    let status_uri = format!("/api/v1/admin/orders/{}/status", order_ids[0]);
    let (status, body) = app
        .request(
            Method::PUT,
            &status_uri,
            Some(json!({ "status": "processing" })),
            Some(&customer),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden_operation");

    let (status, body) = app
        .request(
            Method::PUT,
            &status_uri,
            Some(json!({ "status": "delivered" })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_state_transition");
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("pending") && message.contains("delivered"));

    let missing = Uuid::new_v4().to_string();
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/admin/orders/bulk-status",
            Some(json!({
                "order_ids": [order_ids[0], missing, order_ids[1]],
                "status": "processing"
            })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["succeeded"], 2);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["results"][1]["success"], false);
    assert_eq!(body["results"][1]["error"]["code"], "not_found");
    assert_eq!(body["results"][0]["order"]["status"], "processing");

    let (status, page) = app
        .request(
            Method::GET,
            "/api/v1/admin/orders?status=processing&sort_by=total&sort_dir=asc&per_page=1",
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    let cursor = page["next_cursor"].as_str().unwrap().to_string();

    let (status, next) = app
        .request(
            Method::GET,
            &format!(
                "/api/v1/admin/orders?status=processing&sort_by=total&sort_dir=asc&per_page=1&cursor={}",
                cursor
            ),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next["items"].as_array().unwrap().len(), 1);
    assert_ne!(next["items"][0]["id"], page["items"][0]["id"]);

    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/api/v1/admin/orders/{}/shipping", order_ids[1]),
            Some(json!({ "contact_phone": "+62 811 1111" })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contact_phone"], "+62 811 1111");

    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/api/v1/admin/orders/{}/payment-status", order_ids[1]),
            Some(json!({ "payment_status": "paid" })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payment_status"], "paid");
}

#[tokio::test]
async fn products_are_registered_by_admins_only() {
    let app = TestApp::new().await;
    let admin = app.token_for(TestApp::admin());
    let customer = app.token_for(TestApp::customer());
    let payload = json!({
        "name": "Cast Iron Pan",
        "unit_price": "320000",
        "stock": 4
    });

    let (status, _) = app
        .request(Method::POST, "/api/v1/products", Some(payload.clone()), Some(&customer))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = app
        .request(Method::POST, "/api/v1/products", Some(payload), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, product) = app
        .request(Method::GET, &format!("/api/v1/products/{}", id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&product["effective_price"]), dec!(320000));
    assert_eq!(product["stock"], 4);

    let (status, _) = app
        .request(Method::DELETE, &format!("/api/v1/products/{}", id), None, Some(&admin))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/products/{}", id), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}
