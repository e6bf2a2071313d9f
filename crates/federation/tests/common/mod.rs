//! Shared fixtures for the federation integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use axum::Router;
use chrono::Utc;
use fedigate_common::RsaSha256Signer;
use fedigate_federation::{FetchOptions, LocalUser, Note, RemoteFetchClient, Visibility};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Serve `router` on an ephemeral port and return its origin.
pub async fn serve(router: Router) -> String {
    serve_with(|_| router).await
}

/// Like [`serve`], for routers whose documents embed their own origin.
pub async fn serve_with(build: impl FnOnce(&str) -> Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}", listener.local_addr().unwrap());
    let router = build(&origin);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    origin
}

/// Request counter shared with route handlers.
#[derive(Clone, Default)]
pub struct Hits(Arc<AtomicUsize>);

impl Hits {
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn client() -> RemoteFetchClient {
    RemoteFetchClient::new("fedigate-test/0.1", Arc::new(RsaSha256Signer::new())).unwrap()
}

/// Fast options so retry tests stay quick.
pub fn fast_options() -> FetchOptions {
    FetchOptions::default()
        .with_timeout(Duration::from_secs(2))
        .with_max_retries(2)
        .with_initial_retry_delay(Duration::from_millis(10))
}

pub fn local_user(id: &str) -> LocalUser {
    LocalUser {
        id: id.to_string(),
        username: id.to_string(),
        host: None,
        name: None,
        description: None,
        uri: None,
        inbox: None,
        shared_inbox: None,
    }
}

pub fn remote_user(id: &str, origin: &str, shared_inbox: Option<&str>) -> LocalUser {
    let host = url::Url::parse(origin)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap();
    LocalUser {
        id: id.to_string(),
        username: id.to_string(),
        host: Some(host),
        name: None,
        description: None,
        uri: Some(format!("{origin}/users/{id}")),
        inbox: Some(format!("{origin}/users/{id}/inbox")),
        shared_inbox: shared_inbox.map(str::to_string),
    }
}

pub fn local_note(id: &str, user_id: &str, text: &str) -> Note {
    Note {
        id: id.to_string(),
        user_id: user_id.to_string(),
        user_host: None,
        text: Some(text.to_string()),
        cw: None,
        visibility: Visibility::Public,
        local_only: false,
        reply_id: None,
        renote_id: None,
        mentions: vec![],
        visible_user_ids: vec![],
        tags: vec![],
        emojis: vec![],
        file_ids: vec![],
        uri: None,
        url: None,
        replies_count: 0,
        created_at: Utc::now(),
    }
}

pub fn remote_note(id: &str, author: &LocalUser, uri: &str) -> Note {
    Note {
        user_host: author.host.clone(),
        uri: Some(uri.to_string()),
        ..local_note(id, &author.id, "remote text")
    }
}
