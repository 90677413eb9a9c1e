// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::{customer_info_body, customer_info_path, Purchases};
use futures_util::future::join_all;
use purchases_core::{
    caching::memory::InMemoryCacheStore,
    customer_info_manager::CacheFetchPolicy,
    date_provider::DateProvider,
    identity::is_anonymous_app_user_id,
    networking::{BackendError, HttpMethod, HttpResponse, NetworkError, PostReceiptData},
    Error,
};
use rstest::*;
use serde_json::json;

#[fixture]
fn purchases() -> Purchases<InMemoryCacheStore> {
    Purchases::new(InMemoryCacheStore::new())
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reads_share_one_request(purchases: Purchases<InMemoryCacheStore>) {
    purchases.identity.configure(Some("alice")).unwrap();
    purchases.http_client.respond(
        HttpMethod::Get,
        customer_info_path("alice"),
        HttpResponse::new(200, customer_info_body("alice", &["pro"])),
    );

    let results = join_all((0..8).map(|_| {
        purchases
            .customer_info_manager
            .customer_info("alice", CacheFetchPolicy::FetchCurrent)
    }))
    .await;

    assert!(results.iter().all(|result| result.is_ok()));
    assert_eq!(
        purchases
            .http_client
            .request_count(HttpMethod::Get, &customer_info_path("alice")),
        1
    );
}

#[rstest]
#[tokio::test]
async fn purchase_then_read_uses_the_receipt_response(purchases: Purchases<InMemoryCacheStore>) {
    purchases.identity.configure(Some("alice")).unwrap();
    purchases.http_client.respond(
        HttpMethod::Post,
        "/receipts",
        HttpResponse::new(200, customer_info_body("alice", &["pro"])),
    );

    let (posted, read) = tokio::join!(
        purchases
            .customer_info_manager
            .post_receipt_data(PostReceiptData::new("alice", vec![0x30, 0x00])),
        purchases
            .customer_info_manager
            .customer_info("alice", CacheFetchPolicy::FetchCurrentAndForce),
    );

    let posted = posted.unwrap();
    assert_eq!(posted, read.unwrap());
    assert!(posted.is_entitlement_active("pro", purchases.clock.now()));
    assert_eq!(
        purchases
            .http_client
            .request_count(HttpMethod::Get, &customer_info_path("alice")),
        0
    );
}

#[rstest]
#[tokio::test]
async fn configure_without_user_is_anonymous_and_sticky(purchases: Purchases<InMemoryCacheStore>) {
    let first = purchases.identity.configure(None).unwrap();
    assert!(is_anonymous_app_user_id(&first));
    assert_eq!(purchases.identity.configure(None).unwrap(), first);
}

#[rstest]
#[tokio::test]
async fn log_in_rotates_and_caches(purchases: Purchases<InMemoryCacheStore>) {
    let anonymous = purchases.identity.configure(None).unwrap();
    purchases.http_client.respond(
        HttpMethod::Get,
        customer_info_path(&anonymous),
        HttpResponse::new(200, customer_info_body(&anonymous, &[])),
    );
    purchases
        .customer_info_manager
        .customer_info(&anonymous, CacheFetchPolicy::FetchCurrent)
        .await
        .unwrap();
    purchases.http_client.respond(
        HttpMethod::Post,
        "/subscribers/identify",
        HttpResponse::new(201, customer_info_body("alice", &["pro"])),
    );

    let response = purchases.identity.log_in("alice").await.unwrap();

    assert!(response.created);
    assert_eq!(purchases.identity.current_app_user_id().unwrap(), "alice");
    assert_eq!(
        purchases
            .device_cache
            .cached_customer_info_data(&anonymous)
            .unwrap(),
        None
    );
    let cached = purchases
        .customer_info_manager
        .customer_info("alice", CacheFetchPolicy::CacheOnly)
        .await
        .unwrap();
    assert_eq!(cached, response.customer_info);
}

#[rstest]
#[tokio::test]
async fn log_in_as_current_user_skips_identify(purchases: Purchases<InMemoryCacheStore>) {
    purchases.identity.configure(Some("alice")).unwrap();
    purchases.http_client.respond(
        HttpMethod::Get,
        customer_info_path("alice"),
        HttpResponse::new(200, customer_info_body("alice", &[])),
    );

    let response = purchases.identity.log_in("alice").await.unwrap();

    assert!(!response.created);
    assert_eq!(
        purchases
            .http_client
            .request_count(HttpMethod::Post, "/subscribers/identify"),
        0
    );
}

#[rstest]
#[tokio::test]
async fn failed_log_in_keeps_current_user(purchases: Purchases<InMemoryCacheStore>) {
    purchases.identity.configure(Some("alice")).unwrap();
    purchases.http_client.respond(
        HttpMethod::Post,
        "/subscribers/identify",
        HttpResponse::new(400, json!({"code": 7220, "message": "invalid app user id"})),
    );

    let result = purchases.identity.log_in("bob").await;

    assert!(matches!(
        result,
        Err(Error::Backend(BackendError::ErrorResponse { status: 400, .. }))
    ));
    assert_eq!(purchases.identity.current_app_user_id().unwrap(), "alice");
}

#[rstest]
#[tokio::test]
async fn log_out(purchases: Purchases<InMemoryCacheStore>) {
    let anonymous = purchases.identity.configure(None).unwrap();
    assert!(matches!(
        purchases.identity.log_out().await,
        Err(Error::LogOutAnonymousUser)
    ));
    assert_eq!(purchases.identity.current_app_user_id().unwrap(), anonymous);

    purchases.identity.configure(Some("alice")).unwrap();
    // the new anonymous id is random, so its fetch has nothing scripted
    let result = purchases.identity.log_out().await;

    assert!(matches!(
        result,
        Err(Error::Backend(BackendError::NetworkError(
            NetworkError::Transport { .. }
        )))
    ));
    let current = purchases.identity.current_app_user_id().unwrap();
    assert!(is_anonymous_app_user_id(&current));
    assert_ne!(current, anonymous);
}

#[rstest]
#[tokio::test]
async fn attributes_of_previous_users_are_delivered(purchases: Purchases<InMemoryCacheStore>) {
    purchases.identity.configure(Some("alice")).unwrap();
    purchases
        .identity
        .set_attribute("$email", Some("alice@example.com".to_owned()))
        .unwrap();
    purchases.http_client.respond(
        HttpMethod::Post,
        "/subscribers/identify",
        HttpResponse::new(200, customer_info_body("bob", &[])),
    );
    purchases.identity.log_in("bob").await.unwrap();
    purchases
        .identity
        .set_attribute("$displayName", Some("Bob".to_owned()))
        .unwrap();

    purchases.http_client.respond(
        HttpMethod::Post,
        "/subscribers/alice/attributes",
        HttpResponse::new(200, json!({})),
    );
    purchases.http_client.respond(
        HttpMethod::Post,
        "/subscribers/bob/attributes",
        HttpResponse::new(500, json!({})),
    );

    assert_eq!(purchases.identity.sync_subscriber_attributes().await.unwrap(), 1);

    let pending = purchases
        .device_cache
        .unsynced_attributes_for_all_users()
        .unwrap();
    assert_eq!(pending.keys().collect::<Vec<_>>(), vec!["bob"]);
    assert!(purchases
        .device_cache
        .subscriber_attribute("$email", "alice")
        .unwrap()
        .is_none());
}

#[rstest]
#[tokio::test]
async fn rejected_attributes_are_not_retried(purchases: Purchases<InMemoryCacheStore>) {
    purchases.identity.configure(Some("alice")).unwrap();
    purchases
        .identity
        .set_attribute("$email", Some("not an email".to_owned()))
        .unwrap();
    purchases.http_client.respond(
        HttpMethod::Post,
        "/subscribers/alice/attributes",
        HttpResponse::new(400, json!({"code": 7263, "message": "invalid subscriber attributes"})),
    );

    assert_eq!(purchases.identity.sync_subscriber_attributes().await.unwrap(), 0);
    assert_eq!(
        purchases
            .device_cache
            .number_of_unsynced_attributes("alice")
            .unwrap(),
        0
    );
}
