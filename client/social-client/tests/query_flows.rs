mod common;

use serde_json::{json, Value};

use common::*;
use social_client::models::{FriendRequest, FriendRequestStatus, FriendshipStatus, PostId, UserId};
use social_client::{Operation, PageLoad, QueryData, QueryKey};

fn requests_page(from: i64, count: i64, next: Option<u32>) -> Value {
    let requests: Vec<Value> = (from..from + count)
        .map(|id| {
            json_of(&FriendRequest {
                sender: user(id, &format!("sender-{}", id), FriendshipStatus::Received),
                status: FriendRequestStatus::Pending,
                created_at: ts("2024-05-03T12:00:00Z"),
            })
        })
        .collect();
    json!({ "friendRequests": requests, "nextPage": next })
}

#[tokio::test]
async fn test_friend_request_pages_flatten_in_order() {
    let transport = ScriptedTransport::new();
    let client = logged_in(transport.clone());
    transport.ok("list_friend_requests", requests_page(100, 10, Some(2)));
    transport.ok("list_friend_requests", requests_page(200, 5, None));

    let first = client.fetch_friend_requests_page(None).await.unwrap();
    assert_eq!(
        first,
        PageLoad::Appended {
            total: 10,
            has_next: true
        }
    );

    let second = client.fetch_next_friend_requests_page().await.unwrap();
    assert_eq!(
        second,
        PageLoad::Appended {
            total: 15,
            has_next: false
        }
    );
    assert!(matches!(
        transport.last_call(),
        Some(Operation::ListFriendRequests { page: 2 })
    ));

    let senders: Vec<i64> = client
        .friend_requests()
        .iter()
        .map(|r| r.sender.id.0)
        .collect();
    let expected: Vec<i64> = (100..110).chain(200..205).collect();
    assert_eq!(senders, expected);
}

#[tokio::test]
async fn test_page_with_outdated_cursor_is_discarded() {
    let transport = ScriptedTransport::new();
    let client = logged_in(transport.clone());
    transport.ok("list_friend_requests", requests_page(100, 10, Some(2)));
    transport.ok("list_friend_requests", requests_page(200, 5, Some(3)));
    transport.ok("list_friend_requests", requests_page(100, 10, Some(2)));

    client.fetch_friend_requests_page(None).await.unwrap();
    client.fetch_next_friend_requests_page().await.unwrap();
    assert_eq!(client.friend_requests().len(), 15);

    // A late response for page 1's cursor arrives after page 2 moved it on
    let stale = client.fetch_friend_requests_page(Some(1)).await.unwrap();
    assert_eq!(stale, PageLoad::Discarded);
    assert_eq!(client.friend_requests().len(), 15);
}

#[tokio::test]
async fn test_exhausted_feed_makes_no_request() {
    let transport = ScriptedTransport::new();
    let client = logged_in(transport.clone());
    transport.ok(
        "list_posts",
        json!({ "posts": [json_of(&post(1, 2, 0)), json_of(&post(2, 2, 0))], "nextPage": null }),
    );

    client.refresh_feed().await.unwrap();
    assert_eq!(client.fetch_next_feed_page().await.unwrap(), PageLoad::Exhausted);
    assert_eq!(transport.calls(), vec!["list_posts"]);
    assert_eq!(client.feed().len(), 2);
}

#[tokio::test]
async fn test_newer_fetch_supersedes_older_page() {
    let transport = ScriptedTransport::new();
    let client = logged_in(transport.clone());
    let release_old = transport.gate("list_friends");
    transport.ok(
        "list_friends",
        json!({ "friends": [json_of(&summary(8, FriendshipStatus::Friend))], "nextPage": null }),
    );
    transport.ok(
        "list_friends",
        json!({ "friends": [json_of(&summary(9, FriendshipStatus::Friend))], "nextPage": null }),
    );

    let old = tokio::spawn({
        let client = client.clone();
        async move { client.fetch_friends_page(UserId(3), None).await }
    });
    while transport.calls().is_empty() {
        tokio::task::yield_now().await;
    }

    let fresh = client.fetch_friends_page(UserId(3), None).await.unwrap();
    assert!(matches!(fresh, PageLoad::Appended { total: 1, .. }));

    release_old.send(()).unwrap();
    assert_eq!(old.await.unwrap().unwrap(), PageLoad::Superseded);
}

#[tokio::test]
async fn test_read_fetches_missing_and_stale_views() {
    let transport = ScriptedTransport::new();
    let client = logged_in(transport.clone());
    transport.ok("get_post", json!({ "post": json_of(&post(5, 2, 1)) }));
    transport.ok("get_post", json!({ "post": json_of(&post(5, 2, 7)) }));

    let key = QueryKey::Post(PostId(5));
    let first = client.read(&key).await.unwrap().unwrap();
    assert_eq!(first.as_post().unwrap().likes_count, 1);

    // Fresh views are served from the cache
    client.read(&key).await.unwrap();
    assert_eq!(transport.calls().len(), 1);

    client.store().invalidate(&key);
    let second = client.read(&key).await.unwrap().unwrap();
    assert_eq!(second.as_post().unwrap().likes_count, 7);
    assert_eq!(transport.calls().len(), 2);
}

#[tokio::test]
async fn test_failed_fetch_keeps_cached_data_and_reports_error() {
    let transport = ScriptedTransport::new();
    let client = logged_in(transport.clone());
    let key = QueryKey::Post(PostId(5));
    client.store().set(key.clone(), QueryData::Post(post(5, 2, 1)));
    transport.fail("get_post", 404, json!({ "message": "Post not found" }));

    let err = client.fetch_post(PostId(5)).await.unwrap_err();
    assert_eq!(err.kind(), "not_found");

    let state = client.store().state(&key);
    assert!(state.data.is_some());
    assert!(!state.is_loading);
    assert_eq!(state.error.as_deref(), Some("Post not found"));
}

#[tokio::test]
async fn test_subscription_sees_fetch_lifecycle() {
    let transport = ScriptedTransport::new();
    let client = logged_in(transport.clone());
    let mut sub = client.subscribe(QueryKey::CurrentUser);
    assert!(sub.current().data.is_none());

    let release = transport.gate("get_current_user");
    transport.ok("get_current_user", json!({ "user": json_of(&viewer()) }));
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.fetch_current_user().await }
    });

    let loading = sub.changed().await.unwrap();
    assert!(loading.is_loading);

    release.send(()).unwrap();
    task.await.unwrap().unwrap();
    let loaded = sub.changed().await.unwrap();
    assert!(!loaded.is_loading);
    assert_eq!(loaded.data.unwrap().as_user().unwrap().id, VIEWER);
}

#[tokio::test]
async fn test_blank_search_skips_request() {
    let transport = ScriptedTransport::new();
    let client = logged_in(transport.clone());
    transport.ok(
        "search_profiles",
        json!({ "users": [json_of(&summary(4, FriendshipStatus::None))] }),
    );

    assert!(client.search_profiles("   ").await.unwrap().is_empty());
    assert!(transport.calls().is_empty());

    let found = client.search_profiles(" amina ").await.unwrap();
    assert_eq!(found.len(), 1);
    assert!(client
        .store()
        .contains(&QueryKey::Search("amina".to_string())));
}
