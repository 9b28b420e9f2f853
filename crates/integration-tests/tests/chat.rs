//! Order chat between customers and operators.

use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};

use starshop_integration_tests::{ADMIN_TELEGRAM_ID, CUSTOMER_TELEGRAM_ID, TestContext};

async fn setup() -> (TestContext, i64) {
    let ctx = TestContext::new().await;
    ctx.register(ADMIN_TELEGRAM_ID).await;
    let product_id = ctx.add_product("Consultation", "100.00").await;
    let invoice = ctx.buy(CUSTOMER_TELEGRAM_ID, product_id, 1).await;
    let order_id = invoice["order_id"].as_i64().unwrap_or_default();
    (ctx, order_id)
}

async fn post(ctx: &TestContext, order_id: i64, telegram_id: i64, content: &str) -> Value {
    let resp = ctx
        .post_as(&format!("/api/messages/{order_id}"), telegram_id)
        .json(&json!({ "content": content }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.expect("Invalid message JSON")
}

#[tokio::test]
async fn test_customer_and_operator_talk() {
    let (ctx, order_id) = setup().await;

    let message = post(&ctx, order_id, CUSTOMER_TELEGRAM_ID, "  When can we start?  ").await;
    assert_eq!(message["content"], "When can we start?");
    assert_eq!(message["sender_role"], "customer");

    // Operators hear about it in Telegram.
    assert!(
        ctx.eventually(|tg| !tg.sent_to(ADMIN_TELEGRAM_ID).is_empty())
            .await
    );

    let threads: Vec<Value> = ctx
        .get_as("/api/admin/messages", ADMIN_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid threads JSON");
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0]["unread"], 1);

    let message_id = message["id"].as_i64().unwrap_or_default();
    let resp = ctx
        .post_as(
            &format!("/api/admin/messages/{message_id}/reply"),
            ADMIN_TELEGRAM_ID,
        )
        .json(&json!({ "reply": "Tomorrow at 10." }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let replied: Value = resp.json().await.expect("Invalid message JSON");
    assert_eq!(replied["reply"], "Tomorrow at 10.");
    assert!(!replied["replied_at"].is_null());
    // Replying counts as reading.
    assert_eq!(replied["is_read"], true);

    let answer = post(&ctx, order_id, ADMIN_TELEGRAM_ID, "See you then").await;
    assert_eq!(answer["sender_role"], "admin");
    post(&ctx, order_id, CUSTOMER_TELEGRAM_ID, "Thanks!").await;

    let resp = ctx
        .post_as(&format!("/api/messages/{order_id}/read"), ADMIN_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    let body: Value = resp.json().await.expect("Invalid read JSON");
    assert_eq!(body["updated"], 1);

    let history: Vec<Value> = ctx
        .get_as(&format!("/api/messages/{order_id}"), CUSTOMER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid history JSON");
    assert_eq!(history.len(), 3);
    assert_eq!(history[0]["is_read"], true);
    assert_eq!(history[1]["is_read"], false);
    assert_eq!(history[2]["is_read"], true);
}

#[tokio::test]
async fn test_history_accepts_naive_timestamps() {
    let (ctx, order_id) = setup().await;
    post(&ctx, order_id, CUSTOMER_TELEGRAM_ID, "Hello").await;

    let history: Vec<Value> = ctx
        .get_as(&format!("/api/messages/{order_id}"), CUSTOMER_TELEGRAM_ID)
        .query(&[("since", "2000-01-01T00:00:00.000001")])
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid history JSON");
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_operator_clears_thread() {
    let (ctx, order_id) = setup().await;
    post(&ctx, order_id, CUSTOMER_TELEGRAM_ID, "First").await;
    post(&ctx, order_id, ADMIN_TELEGRAM_ID, "Second").await;
    let path = format!("/api/admin/messages/{order_id}");

    let resp = ctx
        .request_as(Method::DELETE, &path, CUSTOMER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = ctx
        .request_as(Method::DELETE, &path, ADMIN_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let history: Vec<Value> = ctx
        .get_as(&format!("/api/messages/{order_id}"), CUSTOMER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid history JSON");
    assert!(history.is_empty());

    // The order itself survives.
    let resp = ctx
        .get_as(&format!("/api/orders/{order_id}"), CUSTOMER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = ctx
        .request_as(Method::DELETE, "/api/admin/messages/424242", ADMIN_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_messages_are_rejected() {
    let (ctx, order_id) = setup().await;
    let path = format!("/api/messages/{order_id}");

    let resp = ctx
        .post_as(&path, CUSTOMER_TELEGRAM_ID)
        .json(&json!({ "content": "   " }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = ctx
        .post_as(&path, CUSTOMER_TELEGRAM_ID)
        .json(&json!({ "content": "x".repeat(4097) }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = ctx
        .get_as(&path, CUSTOMER_TELEGRAM_ID)
        .query(&[("since", "last tuesday")])
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_poll_wakes_on_new_message() {
    let (ctx, order_id) = setup().await;
    let after = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

    let poll = ctx
        .get_as(&format!("/api/messages/{order_id}/poll"), CUSTOMER_TELEGRAM_ID)
        .query(&[("after", after)])
        .send();
    let reply = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        post(&ctx, order_id, ADMIN_TELEGRAM_ID, "Are you there?").await
    };

    let started = Instant::now();
    let (resp, _) = tokio::join!(poll, reply);
    let messages: Vec<Value> = resp
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid poll JSON");

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "Are you there?");
    assert!(started.elapsed() < Duration::from_millis(800));
}

#[tokio::test]
async fn test_poll_times_out_empty() {
    let (ctx, order_id) = setup().await;
    let after = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

    let started = Instant::now();
    let messages: Vec<Value> = ctx
        .get_as(&format!("/api/messages/{order_id}/poll"), CUSTOMER_TELEGRAM_ID)
        .query(&[("after", after)])
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid poll JSON");

    assert!(messages.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(700));
}

#[tokio::test]
async fn test_only_author_or_operator_deletes() {
    let (ctx, order_id) = setup().await;
    let message = post(&ctx, order_id, ADMIN_TELEGRAM_ID, "Operator note").await;
    let message_id = message["id"].as_i64().unwrap_or_default();
    let path = format!("/api/messages/{message_id}");

    let resp = ctx
        .request_as(Method::DELETE, &path, CUSTOMER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = ctx
        .request_as(Method::DELETE, &path, ADMIN_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = ctx
        .request_as(Method::DELETE, &path, ADMIN_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let own = post(&ctx, order_id, CUSTOMER_TELEGRAM_ID, "Oops").await;
    let resp = ctx
        .request_as(
            Method::DELETE,
            &format!("/api/messages/{}", own["id"]),
            CUSTOMER_TELEGRAM_ID,
        )
        .send()
        .await
        .expect("Request failed");
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_customer_threads_count_operator_messages() {
    let (ctx, order_id) = setup().await;
    post(&ctx, order_id, ADMIN_TELEGRAM_ID, "Hello from the shop").await;

    let threads: Vec<Value> = ctx
        .get_as("/api/messages", CUSTOMER_TELEGRAM_ID)
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid threads JSON");
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0]["order_id"], order_id);
    assert_eq!(threads[0]["unread"], 1);
}
