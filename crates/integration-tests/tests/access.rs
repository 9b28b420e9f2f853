//! Authentication, sessions and ownership checks.

use reqwest::StatusCode;
use serde_json::{Value, json};

use starshop_integration_tests::{
    ADMIN_TELEGRAM_ID, CUSTOMER_TELEGRAM_ID, INTERNAL_SECRET, TestContext, text_update,
};

const OTHER_TELEGRAM_ID: i64 = 987_654_321;

#[tokio::test]
async fn test_health() {
    let ctx = TestContext::new().await;
    for path in ["/health", "/health/ready"] {
        let resp = ctx.client.get(ctx.url(path)).send().await.expect("Request failed");
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("x-request-id"));
    }
}

#[tokio::test]
async fn test_anonymous_and_forged_requests_are_rejected() {
    let ctx = TestContext::new().await;

    let resp = ctx
        .client
        .get(ctx.url("/api/users/me"))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.expect("Invalid error JSON");
    assert!(body["error"].is_string());

    let forged = TestContext::init_data(CUSTOMER_TELEGRAM_ID, "mallory").replace("mallory", "eve");
    let resp = ctx
        .client
        .get(ctx.url("/api/users/me"))
        .header("x-telegram-init-data", forged)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_first_contact_creates_one_user() {
    let ctx = TestContext::new().await;
    let first = ctx.register(CUSTOMER_TELEGRAM_ID).await;
    let second = ctx.register(CUSTOMER_TELEGRAM_ID).await;
    assert_eq!(first["id"], second["id"]);
    assert_eq!(
        ctx.store
            .count_telegram_id(starshop_core::TelegramId::new(CUSTOMER_TELEGRAM_ID))
            .await,
        1
    );

    let admin = ctx.register(ADMIN_TELEGRAM_ID).await;
    assert_eq!(admin["is_admin"], true);
}

#[tokio::test]
async fn test_session_login_and_logout() {
    let ctx = TestContext::new().await;

    let resp = ctx
        .client
        .post(ctx.url("/api/auth/login"))
        .json(&json!({ "init_data": TestContext::init_data(CUSTOMER_TELEGRAM_ID, "alice") }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    // Cookie only, no init data header.
    let resp = ctx
        .client
        .get(ctx.url("/api/users/me"))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let me: Value = resp.json().await.expect("Invalid user JSON");
    assert_eq!(me["username"], "alice");

    let resp = ctx
        .client
        .post(ctx.url("/api/auth/logout"))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = ctx
        .client
        .get(ctx.url("/api/users/me"))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bot_login_requires_internal_secret() {
    let ctx = TestContext::new().await;
    let body = json!({ "telegram_id": CUSTOMER_TELEGRAM_ID, "username": "alice" });

    let resp = ctx
        .client
        .post(ctx.url("/api/auth/login"))
        .json(&body)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = ctx
        .client
        .post(ctx.url("/api/auth/login"))
        .header("x-internal-secret", INTERNAL_SECRET)
        .json(&body)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let user: Value = resp.json().await.expect("Invalid user JSON");
    assert_eq!(user["telegram_id"], CUSTOMER_TELEGRAM_ID);

    let resp = ctx
        .client
        .post(ctx.url("/api/auth/login"))
        .json(&json!({}))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_orders_are_private_to_owner_and_admins() {
    let ctx = TestContext::new().await;
    let product_id = ctx.add_product("Consultation", "100.00").await;
    let invoice = ctx.buy(CUSTOMER_TELEGRAM_ID, product_id, 1).await;
    let order_id = invoice["order_id"].as_i64().unwrap_or_default();
    let order_path = format!("/api/orders/{order_id}");

    let resp = ctx
        .get_as(&order_path, OTHER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = ctx
        .post_as(&format!("/api/payments/{order_id}/invoice"), OTHER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = ctx
        .get_as(&format!("/api/messages/{order_id}"), OTHER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = ctx
        .get_as(&order_path, ADMIN_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    let others: Vec<Value> = ctx
        .get_as("/api/orders", OTHER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid orders JSON");
    assert!(others.is_empty());

    let resp = ctx
        .get_as("/api/orders/424242", CUSTOMER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_routes_require_operator() {
    let ctx = TestContext::new().await;
    let product_id = ctx.add_product("Consultation", "100.00").await;
    ctx.buy(CUSTOMER_TELEGRAM_ID, product_id, 1).await;

    for path in ["/api/admin/orders", "/api/admin/messages", "/api/admin/stats"] {
        let resp = ctx
            .get_as(path, CUSTOMER_TELEGRAM_ID)
            .send()
            .await
            .expect("Request failed");
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{path}");
    }

    let orders: Vec<Value> = ctx
        .get_as("/api/admin/orders?status=pending", ADMIN_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid orders JSON");
    assert_eq!(orders.len(), 1);

    let resp = ctx
        .get_as("/api/admin/orders?status=shipped", ADMIN_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let stats: Value = ctx
        .get_as("/api/admin/stats", ADMIN_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid stats JSON");
    assert_eq!(stats["total_orders"], 1);
    assert_eq!(stats["pending_orders"], 1);
    assert_eq!(stats["total_users"], 2);
}

#[tokio::test]
async fn test_start_command_registers_and_greets() {
    let ctx = TestContext::new().await;
    let resp = ctx.webhook(&text_update(10, OTHER_TELEGRAM_ID, "/start")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    assert_eq!(
        ctx.store
            .count_telegram_id(starshop_core::TelegramId::new(OTHER_TELEGRAM_ID))
            .await,
        1
    );
    let greetings = ctx.telegram.sent_to(OTHER_TELEGRAM_ID);
    assert_eq!(greetings.len(), 1);
    assert!(greetings[0].starts_with("Welcome, "));
}

#[tokio::test]
async fn test_catalog_is_listed() {
    let ctx = TestContext::new().await;
    let product_id = ctx.add_product("Consultation", "100.00").await;

    let products: Vec<Value> = ctx
        .get_as("/api/products", CUSTOMER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid products JSON");
    assert_eq!(products.len(), 1);
    assert_eq!(products[0]["price"], "100.00");

    let resp = ctx
        .get_as(&format!("/api/products/{product_id}"), CUSTOMER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = ctx
        .get_as("/api/products/9999", CUSTOMER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
