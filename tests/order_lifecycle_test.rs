mod common;

use axum::http::{Method, StatusCode};
use common::{address, item, TestApp};
use serde_json::{json, Value};

fn cod_order(items: Vec<Value>) -> Value {
    json!({
        "items": items,
        "shippingAddress": address(),
        "shippingCost": "5.99",
        "tax": "4.17",
        "paymentMethod": "cod",
    })
}

async fn place_order(app: &TestApp, token: &str, items: Vec<Value>) -> Value {
    let (status, body) = app
        .call(Method::POST, "/api/v1/orders", Some(cod_order(items)), Some(token))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["order"].clone()
}

async fn set_status(app: &TestApp, token: &str, id: &str, status: &str) -> (StatusCode, Value) {
    app.call(
        Method::PUT,
        &format!("/api/v1/orders/{}/status", id),
        Some(json!({ "status": status })),
        Some(token),
    )
    .await
}

#[tokio::test]
async fn cash_on_delivery_order_is_created_pending_with_recomputed_total() {
    let app = TestApp::new().await;
    let buyer = app.buyer("buyer-1");

    let order = place_order(&app, &buyer, vec![item("shop-1", "20.00", 2)]).await;

    assert_eq!(order["status"], "pending");
    assert_eq!(order["paymentStatus"], "pending");
    assert_eq!(order["paymentMethod"], "cod");
    assert_eq!(order["subtotal"], "40.00");
    assert_eq!(order["total"], "50.16");
    assert_eq!(order["userId"], "buyer-1");
    assert_eq!(order["items"][0]["platformFee"], "4.00");
    assert_eq!(order["items"][0]["sellerEarnings"], "36.00");

    let number = order["orderId"].as_str().unwrap();
    assert!(number.starts_with("NM-"), "{number}");
    assert_eq!(number.split('-').count(), 3);
}

#[tokio::test]
async fn supplied_total_that_disagrees_is_rejected() {
    let app = TestApp::new().await;
    let buyer = app.buyer("buyer-1");
    let mut body = cod_order(vec![item("shop-1", "20.00", 2)]);
    body["total"] = json!("45.00");

    let (status, err) = app
        .call(Method::POST, "/api/v1/orders", Some(body), Some(&buyer))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["success"], false);

    let (_, mine) = app
        .call(Method::GET, "/api/v1/orders/my-orders", None, Some(&buyer))
        .await;
    assert_eq!(mine["pagination"]["total"], 0);
}

#[tokio::test]
async fn empty_cart_and_missing_token_are_rejected() {
    let app = TestApp::new().await;

    let (status, _) = app
        .call(Method::POST, "/api/v1/orders", Some(cod_order(vec![])), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/orders",
            Some(cod_order(vec![])),
            Some(&app.buyer("buyer-1")),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn seller_confirms_order_and_payment_status_is_unchanged() {
    let app = TestApp::new().await;
    let order = place_order(&app, &app.buyer("buyer-1"), vec![item("shop-1", "20.00", 2)]).await;
    let id = order["id"].as_str().unwrap();

    let (status, body) = set_status(&app, &app.seller("shop-1"), id, "confirmed").await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["order"]["status"], "confirmed");
    assert_eq!(body["order"]["paymentStatus"], "pending");
}

#[tokio::test]
async fn seller_without_items_in_order_cannot_advance_it() {
    let app = TestApp::new().await;
    let order = place_order(&app, &app.buyer("buyer-1"), vec![item("shop-1", "20.00", 1)]).await;
    let id = order["id"].as_str().unwrap();

    let (status, _) = set_status(&app, &app.seller("shop-2"), id, "confirmed").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = set_status(&app, &app.buyer("buyer-1"), id, "confirmed").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn delivered_cod_order_is_paid_and_cannot_go_back() {
    let app = TestApp::new().await;
    let order = place_order(&app, &app.buyer("buyer-1"), vec![item("shop-1", "12.50", 1)]).await;
    let id = order["id"].as_str().unwrap();
    let admin = app.admin();

    for next in ["confirmed", "packed", "shipped", "out_for_delivery", "delivered"] {
        let (status, body) = set_status(&app, &admin, id, next).await;
        assert_eq!(status, StatusCode::OK, "{next}: {body}");
        assert_eq!(body["order"]["status"], next);
    }

    let (_, body) = app
        .call(Method::GET, &format!("/api/v1/orders/{}", id), None, Some(&admin))
        .await;
    assert_eq!(body["order"]["paymentStatus"], "paid");
    assert!(body["order"]["deliveredAt"].is_string());

    let (status, body) = set_status(&app, &admin, id, "confirmed").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("Cannot transition"));

    let (status, body) = set_status(&app, &admin, id, "returned").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["status"], "returned");
}

#[tokio::test]
async fn skipping_a_stage_is_rejected() {
    let app = TestApp::new().await;
    let order = place_order(&app, &app.buyer("buyer-1"), vec![item("shop-1", "10.00", 1)]).await;
    let id = order["id"].as_str().unwrap();

    let (status, _) = set_status(&app, &app.admin(), id, "shipped").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = set_status(&app, &app.admin(), id, "teleported").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn buyer_cancels_pending_order_with_default_reason() {
    let app = TestApp::new().await;
    let buyer = app.buyer("buyer-1");
    let order = place_order(&app, &buyer, vec![item("shop-1", "10.00", 1)]).await;
    let number = order["orderId"].as_str().unwrap();

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/v1/orders/{}/cancel", number),
            None,
            Some(&buyer),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert!(body["message"].is_string());
    assert_eq!(body["order"]["status"], "cancelled");
    assert_eq!(body["order"]["cancelReason"], "Cancelled by customer");
    assert!(body["order"]["cancelledAt"].is_string());
}

#[tokio::test]
async fn shipped_order_cannot_be_cancelled() {
    let app = TestApp::new().await;
    let buyer = app.buyer("buyer-1");
    let order = place_order(&app, &buyer, vec![item("shop-1", "10.00", 1)]).await;
    let id = order["id"].as_str().unwrap();
    for next in ["confirmed", "packed", "shipped"] {
        let (status, _) = set_status(&app, &app.seller("shop-1"), id, next).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/v1/orders/{}/cancel", id),
            Some(json!({ "reason": "too slow" })),
            Some(&buyer),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .ends_with("Order cannot be cancelled at this stage"));
}

#[tokio::test]
async fn only_owner_or_admin_can_view_an_order() {
    let app = TestApp::new().await;
    let order = place_order(&app, &app.buyer("buyer-1"), vec![item("shop-1", "10.00", 1)]).await;
    let uri = format!("/api/v1/orders/{}", order["id"].as_str().unwrap());

    let (status, _) = app
        .call(Method::GET, &uri, None, Some(&app.buyer("buyer-2")))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.call(Method::GET, &uri, None, Some(&app.admin())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["id"], order["id"]);

    let (status, _) = app
        .call(
            Method::GET,
            "/api/v1/orders/NM-K0ZZ1A2B-00AA11",
            None,
            Some(&app.admin()),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listings_are_scoped_and_paginated() {
    let app = TestApp::new().await;
    let buyer = app.buyer("buyer-1");
    for _ in 0..3 {
        place_order(&app, &buyer, vec![item("shop-1", "10.00", 1)]).await;
    }
    place_order(&app, &app.buyer("buyer-2"), vec![item("shop-2", "10.00", 1)]).await;

    let (status, mine) = app
        .call(
            Method::GET,
            "/api/v1/orders/my-orders?page=1&limit=2",
            None,
            Some(&buyer),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["orders"].as_array().unwrap().len(), 2);
    assert_eq!(
        mine["pagination"],
        json!({ "page": 1, "limit": 2, "total": 3, "pages": 2 })
    );

    let (status, shop) = app
        .call(
            Method::GET,
            "/api/v1/orders/seller-orders",
            None,
            Some(&app.seller("shop-2")),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shop["pagination"]["total"], 1);

    let (status, _) = app
        .call(
            Method::GET,
            "/api/v1/orders/seller-orders?shopId=shop-1",
            None,
            Some(&app.seller("shop-2")),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(Method::GET, "/api/v1/orders/all", None, Some(&buyer))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, all) = app
        .call(
            Method::GET,
            "/api/v1/orders/all?status=pending&paymentStatus=pending",
            None,
            Some(&app.admin()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["pagination"]["total"], 4);
    assert_eq!(all["pagination"]["limit"], 20);
}

#[tokio::test]
async fn stats_are_admin_only() {
    let app = TestApp::new().await;
    let buyer = app.buyer("buyer-1");
    place_order(&app, &buyer, vec![item("shop-1", "20.00", 2)]).await;
    let second = place_order(&app, &buyer, vec![item("shop-1", "10.00", 1)]).await;
    app.call(
        Method::PUT,
        &format!("/api/v1/orders/{}/cancel", second["id"].as_str().unwrap()),
        None,
        Some(&buyer),
    )
    .await;

    let (status, _) = app
        .call(Method::GET, "/api/v1/orders/stats", None, Some(&buyer))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(Method::GET, "/api/v1/orders/stats", None, Some(&app.admin()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["totalOrders"], 2);
    assert_eq!(body["stats"]["byStatus"]["pending"], 1);
    assert_eq!(body["stats"]["byStatus"]["cancelled"], 1);
}

#[tokio::test]
async fn sub_cent_price_is_recorded_as_charged() {
    let app = TestApp::new().await;
    let buyer = app.buyer("buyer-1");

    let order = place_order(&app, &buyer, vec![item("shop-1", "0.005", 1000)]).await;

    assert_eq!(order["items"][0]["price"], "0.01");
    assert_eq!(order["subtotal"], "10.00");
    assert_eq!(order["total"], "20.16");
    assert_eq!(order["items"][0]["platformFee"], "1.00");
    assert_eq!(order["items"][0]["sellerEarnings"], "9.00");
}

#[tokio::test]
async fn unstorable_amounts_are_bad_requests() {
    let app = TestApp::new().await;
    let buyer = app.buyer("buyer-1");

    for items in [
        vec![item("shop-1", "79228162514264337593543950335", 2)],
        vec![item("shop-1", "10000000000.00", 1)],
    ] {
        let (status, body) = app
            .call(Method::POST, "/api/v1/orders", Some(cod_order(items)), Some(&buyer))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(body["success"], false);
    }
}

#[tokio::test]
async fn out_of_range_page_is_a_bad_request() {
    let app = TestApp::new().await;
    let buyer = app.buyer("buyer-1");

    let (status, body) = app
        .call(
            Method::GET,
            "/api/v1/orders/my-orders?page=18446744073709551615",
            None,
            Some(&buyer),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = app
        .call(
            Method::GET,
            "/api/v1/payments/history?page=18446744073709551615",
            None,
            Some(&buyer),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}
