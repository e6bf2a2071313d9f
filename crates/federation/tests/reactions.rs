//! Inbound likes and on-demand reaction sync.

#![allow(clippy::unwrap_used)]

mod common;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{Hits, client, fast_options, local_note, local_user, remote_note, remote_user, serve_with};
use fedigate_common::config::LikesConfig;
use fedigate_federation::store::CustomEmojiStore;
use fedigate_federation::{
    ApLike, HostRateLimiter, MemoryStore, ReactionIngester, Stores,
};
use serde_json::{Value, json};
use url::Url;

const BASE: &str = "https://local.example";

fn ingester(store: &MemoryStore, limiter: HostRateLimiter, likes: LikesConfig) -> ReactionIngester {
    ReactionIngester::new(
        Stores::memory(store),
        client(),
        limiter,
        fast_options().with_max_retries(0),
        likes,
        &Url::parse(BASE).unwrap(),
    )
}

fn parse_like(value: Value) -> ApLike {
    serde_json::from_value(value).unwrap()
}

async fn local_fixture() -> MemoryStore {
    let store = MemoryStore::new();
    store.put_user(local_user("alice")).await;
    store
        .put_user(remote_user("bob", "https://remote.example", None))
        .await;
    store.put_note(local_note("n1", "alice", "hello")).await;
    store
}

#[tokio::test]
async fn test_custom_emoji_like_is_stored_once() {
    let store = local_fixture().await;
    let ingester = ingester(&store, HostRateLimiter::default(), LikesConfig::default());
    let like = parse_like(json!({
        "type": "Like",
        "id": "https://remote.example/likes/1",
        "actor": "https://remote.example/users/bob",
        "object": format!("{BASE}/notes/n1"),
        "content": ":blobcat@.:",
        "_misskey_reaction": ":blobcat@.:",
        "tag": [{
            "type": "Emoji",
            "id": "https://remote.example/emojis/blobcat",
            "name": ":blobcat:",
            "icon": {"type": "Image", "mediaType": "image/png", "url": "https://remote.example/files/blobcat.png"}
        }]
    }));

    let reaction = ingester.ingest_like(&like).await.unwrap().unwrap();
    assert_eq!(reaction.reaction, ":blobcat:");
    assert_eq!(reaction.note_id, "n1");
    assert_eq!(reaction.user_id, "bob");
    assert_eq!(
        reaction.custom_emoji_url.as_deref(),
        Some("https://remote.example/files/blobcat.png")
    );

    let emoji = CustomEmojiStore::find_by_name(&store, "blobcat", Some("remote.example"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(emoji.url, "https://remote.example/files/blobcat.png");

    // Redelivery is a no-op
    assert!(ingester.ingest_like(&like).await.unwrap().is_none());
    assert_eq!(store.reactions().await.len(), 1);
    assert_eq!(store.emojis().await.len(), 1);
}

#[tokio::test]
async fn test_plain_and_emoji_react_likes() {
    let store = local_fixture().await;
    let ingester = ingester(&store, HostRateLimiter::default(), LikesConfig::default());

    let plain = ingester
        .ingest_like(&parse_like(json!({
            "type": "Like",
            "actor": "https://remote.example/users/bob",
            "object": format!("{BASE}/notes/n1")
        })))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(plain.reaction, "❤️");
    assert_eq!(plain.custom_emoji_url, None);

    let pleroma = ingester
        .ingest_like(&parse_like(json!({
            "type": "EmojiReact",
            "actor": {"type": "Person", "id": "https://remote.example/users/bob"},
            "object": format!("{BASE}/notes/n1"),
            "content": "👍"
        })))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pleroma.reaction, "👍");
    assert_eq!(store.reactions().await.len(), 2);
}

#[tokio::test]
async fn test_like_from_unknown_actor_or_for_unknown_note() {
    let store = local_fixture().await;
    let ingester = ingester(&store, HostRateLimiter::default(), LikesConfig::default());

    let stranger = ingester
        .ingest_like(&parse_like(json!({
            "type": "Like",
            "actor": "https://remote.example/users/stranger",
            "object": format!("{BASE}/notes/n1")
        })))
        .await
        .unwrap();
    assert!(stranger.is_none());

    let missing = ingester
        .ingest_like(&parse_like(json!({
            "type": "Like",
            "actor": "https://remote.example/users/bob",
            "object": format!("{BASE}/notes/nope")
        })))
        .await
        .unwrap();
    assert!(missing.is_none());

    assert!(store.reactions().await.is_empty());
    // Reactions never create users
    assert_eq!(store.user_count().await, 2);
}

#[tokio::test]
async fn test_like_by_local_actor_matches_local_user() {
    let store = local_fixture().await;
    let bob = remote_user("bob", "https://remote.example", None);
    store
        .put_note(remote_note("r1", &bob, "https://remote.example/notes/r1"))
        .await;
    let ingester = ingester(&store, HostRateLimiter::default(), LikesConfig::default());

    let reaction = ingester
        .ingest_like(&parse_like(json!({
            "type": "Like",
            "actor": format!("{BASE}/users/alice"),
            "object": "https://remote.example/notes/r1"
        })))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reaction.user_id, "alice");
    assert_eq!(reaction.note_id, "r1");
    assert_eq!(store.user_count().await, 2);
}

#[tokio::test]
async fn test_fetch_remote_likes_ignores_local_and_unknown_notes() {
    let store = local_fixture().await;
    let ingester = ingester(&store, HostRateLimiter::default(), LikesConfig::default());

    assert!(ingester.fetch_remote_likes("n1").await.unwrap().is_none());
    assert!(ingester.fetch_remote_likes("missing").await.unwrap().is_none());
}

/// A remote server exposing a paged `likes` collection.
async fn likes_server(hits: Hits) -> String {
    serve_with(|origin| {
        let note = json!({
            "id": format!("{origin}/notes/1"),
            "type": "Note",
            "attributedTo": format!("{origin}/users/bob"),
            "content": "liked note",
            "likes": format!("{origin}/notes/1/likes")
        });
        let collection = json!({
            "id": format!("{origin}/notes/1/likes"),
            "type": "OrderedCollection",
            "totalItems": 3,
            "first": format!("{origin}/notes/1/likes/page1")
        });
        let page = json!({
            "id": format!("{origin}/notes/1/likes/page1"),
            "type": "OrderedCollectionPage",
            "orderedItems": [
                {
                    "type": "Like",
                    "actor": format!("{origin}/users/carol"),
                    "object": format!("{origin}/notes/1"),
                    "_misskey_reaction": ":neko@.:",
                    "tag": {
                        "type": "Emoji",
                        "name": ":neko:",
                        "icon": {"type": "Image", "url": format!("{origin}/files/neko.png")}
                    }
                },
                format!("{origin}/likes/2"),
                {
                    "type": "Like",
                    "actor": format!("{origin}/users/stranger"),
                    "object": format!("{origin}/notes/1")
                },
                {"type": "Announce", "id": format!("{origin}/announces/1")}
            ]
        });
        let like = json!({
            "type": "Like",
            "id": format!("{origin}/likes/2"),
            "actor": format!("{origin}/users/dave"),
            "object": format!("{origin}/notes/1")
        });

        let counted = move |body: Value| {
            let hits = hits.clone();
            move || async move {
                hits.hit();
                Json(body)
            }
        };
        Router::new()
            .route("/notes/1", get(counted(note)))
            .route("/notes/1/likes", get(counted(collection)))
            .route("/notes/1/likes/page1", get(counted(page)))
            .route("/likes/2", get(counted(like)))
    })
    .await
}

async fn remote_fixture(origin: &str) -> MemoryStore {
    let store = MemoryStore::new();
    let bob = remote_user("bob", origin, None);
    store.put_note(remote_note("r1", &bob, &format!("{origin}/notes/1"))).await;
    store.put_user(bob).await;
    store.put_user(remote_user("carol", origin, None)).await;
    store.put_user(remote_user("dave", origin, None)).await;
    store
}

#[tokio::test]
async fn test_fetch_remote_likes_from_collection() {
    let hits = Hits::default();
    let origin = likes_server(hits.clone()).await;
    let store = remote_fixture(&origin).await;
    let limiter = HostRateLimiter::default();
    let ingester = ingester(&store, limiter.clone(), LikesConfig::default());

    let summary = ingester.fetch_remote_likes("r1").await.unwrap().unwrap();

    assert_eq!(summary.counts.get(":neko:"), Some(&1));
    assert_eq!(summary.counts.get("❤️"), Some(&1));
    assert_eq!(summary.total(), 2);
    assert_eq!(
        summary.emojis.get("neko"),
        Some(&format!("{origin}/files/neko.png"))
    );
    // note, collection, first page, one referenced like
    assert_eq!(hits.count(), 4);

    let emoji = CustomEmojiStore::find_by_name(&store, "neko", Some("127.0.0.1"))
        .await
        .unwrap();
    assert!(emoji.is_some());

    let status = limiter.status("127.0.0.1").await.unwrap();
    assert_eq!(status.consecutive_failures, 0);

    // Within the minimum interval the local aggregate is returned untouched
    let again = ingester.fetch_remote_likes("r1").await.unwrap().unwrap();
    assert_eq!(again, summary);
    assert_eq!(hits.count(), 4);
}

#[tokio::test]
async fn test_likes_page_cap() {
    let hits = Hits::default();
    let origin = likes_server(hits.clone()).await;
    let store = remote_fixture(&origin).await;
    let likes = LikesConfig {
        max_pages: 1,
        ..LikesConfig::default()
    };
    let ingester = ingester(&store, HostRateLimiter::default(), likes);

    let summary = ingester.fetch_remote_likes("r1").await.unwrap().unwrap();

    // The collection document uses the only page; its first page is never read
    assert_eq!(summary.total(), 0);
    assert_eq!(hits.count(), 2);
}

#[tokio::test]
async fn test_likes_item_cap() {
    let hits = Hits::default();
    let origin = likes_server(hits.clone()).await;
    let store = remote_fixture(&origin).await;
    let likes = LikesConfig {
        max_items: 1,
        ..LikesConfig::default()
    };
    let ingester = ingester(&store, HostRateLimiter::default(), likes);

    let summary = ingester.fetch_remote_likes("r1").await.unwrap().unwrap();

    assert_eq!(summary.total(), 1);
    assert_eq!(summary.counts.get(":neko:"), Some(&1));
    assert_eq!(hits.count(), 3);
}

#[tokio::test]
async fn test_rate_limited_host_is_not_contacted() {
    let hits = Hits::default();
    let origin = likes_server(hits.clone()).await;
    let store = remote_fixture(&origin).await;
    let limiter = HostRateLimiter::default();
    for _ in 0..5 {
        limiter.record_failure("127.0.0.1").await;
    }
    let ingester = ingester(&store, limiter, LikesConfig::default());

    let summary = ingester.fetch_remote_likes("r1").await.unwrap().unwrap();
    assert_eq!(summary.total(), 0);
    assert_eq!(hits.count(), 0);
}

#[tokio::test]
async fn test_unreachable_remote_returns_local_state() {
    let origin = serve_with(|_| {
        Router::new().route("/notes/1", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
    })
    .await;
    let store = remote_fixture(&origin).await;
    let limiter = HostRateLimiter::default();
    let ingester = ingester(&store, limiter.clone(), LikesConfig::default());

    let summary = ingester.fetch_remote_likes("r1").await.unwrap().unwrap();
    assert_eq!(summary.total(), 0);

    let status = limiter.status("127.0.0.1").await.unwrap();
    assert_eq!(status.consecutive_failures, 1);
}

/// A Misskey server without a `likes` collection.
async fn misskey_server(hits: Hits) -> String {
    serve_with(|origin| {
        let note = json!({
            "id": format!("{origin}/notes/9abc"),
            "type": "Note",
            "attributedTo": format!("{origin}/users/9bob"),
            "content": "misskey note"
        });
        let emojis = json!({
            "emojis": [
                {"name": "blobcat", "url": format!("{origin}/files/blobcat.png")},
                {"name": "unused", "url": format!("{origin}/files/unused.png")}
            ]
        });

        let note_hits = hits.clone();
        let reaction_hits = hits.clone();
        let emoji_hits = hits;
        Router::new()
            .route(
                "/notes/9abc",
                get(move || async move {
                    note_hits.hit();
                    Json(note)
                }),
            )
            .route(
                "/api/notes/reactions",
                post(move |Json(body): Json<Value>| async move {
                    reaction_hits.hit();
                    assert_eq!(body["noteId"], "9abc");
                    Json(json!([
                        {"id": "r1", "type": ":blobcat@.:", "user": {"id": "9carol", "username": "carol", "host": null}},
                        {"id": "r2", "type": "👍", "user": {"id": "9dave", "username": "dave"}},
                        {"id": "r3", "type": "🎉", "user": {"id": "x", "username": "far", "host": "elsewhere.example"}}
                    ]))
                }),
            )
            .route(
                "/api/emojis",
                post(move || async move {
                    emoji_hits.hit();
                    Json(emojis)
                }),
            )
    })
    .await
}

#[tokio::test]
async fn test_misskey_api_fallback() {
    let hits = Hits::default();
    let origin = misskey_server(hits.clone()).await;

    let store = MemoryStore::new();
    let bob = remote_user("9bob", &origin, None);
    store
        .put_note(remote_note("r1", &bob, &format!("{origin}/notes/9abc")))
        .await;
    store.put_user(bob).await;
    store.put_user(remote_user("9carol", &origin, None)).await;
    store.put_user(remote_user("9dave", &origin, None)).await;
    let ingester = ingester(&store, HostRateLimiter::default(), LikesConfig::default());

    let summary = ingester.fetch_remote_likes("r1").await.unwrap().unwrap();

    assert_eq!(summary.counts.get(":blobcat:"), Some(&1));
    assert_eq!(summary.counts.get("👍"), Some(&1));
    // third-server reactors cannot be mapped to an actor
    assert_eq!(summary.counts.get("🎉"), None);
    assert_eq!(
        summary.emojis.get("blobcat"),
        Some(&format!("{origin}/files/blobcat.png"))
    );
    assert_eq!(hits.count(), 3);

    let stored: Vec<String> = store.emojis().await.into_iter().map(|e| e.name).collect();
    assert_eq!(stored, vec!["blobcat".to_string()]);
}

#[tokio::test]
async fn test_misskey_fallback_disabled() {
    let hits = Hits::default();
    let origin = misskey_server(hits.clone()).await;

    let store = MemoryStore::new();
    let bob = remote_user("9bob", &origin, None);
    store
        .put_note(remote_note("r1", &bob, &format!("{origin}/notes/9abc")))
        .await;
    store.put_user(bob).await;
    let likes = LikesConfig {
        misskey_fallback: false,
        ..LikesConfig::default()
    };
    let ingester = ingester(&store, HostRateLimiter::default(), likes);

    let summary = ingester.fetch_remote_likes("r1").await.unwrap().unwrap();
    assert_eq!(summary.total(), 0);
    assert_eq!(hits.count(), 1);
}
