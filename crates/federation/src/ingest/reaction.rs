//! Remote like / reaction synchronisation.
//!
//! Reactions to remote notes are pulled on demand: first from the `likes`
//! (or Misskey `reactions`) collection the note advertises, otherwise from
//! the Misskey reactions API of the note's origin. Whatever path ran, the
//! result is always the local aggregate, so callers get the best known state
//! even when the remote is unreachable or rate limited.

use chrono::Utc;
use fedigate_common::config::LikesConfig;
use fedigate_common::{AppError, AppResult, IdGenerator};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use url::Url;

use super::{find_note_by_ap_id, find_user_by_ap_id, upsert_remote_emoji};
use crate::client::{FetchOptions, FetchResult, RemoteFetchClient};
use crate::model::{Note, Reaction, ReactionSummary};
use crate::objects::{ApCollection, ApLike, ApObject, CollectionRef, ItemRef};
use crate::rate_limit::HostRateLimiter;
use crate::store::Stores;

/// Reaction recorded for a plain Like.
pub const DEFAULT_REACTION: &str = "❤️";

/// Strip the host part Misskey appends to custom reactions: `:name@host:` and
/// `:name@.:` both become `:name:`.
#[must_use]
pub fn normalize_reaction(reaction: &str) -> String {
    let reaction = reaction.trim();
    if let Some(inner) = reaction.strip_prefix(':').and_then(|r| r.strip_suffix(':'))
        && let Some((name, _host)) = inner.split_once('@')
    {
        return format!(":{name}:");
    }
    reaction.to_string()
}

/// Shortcode of a custom reaction, without colons.
fn custom_shortcode(reaction: &str) -> Option<&str> {
    reaction
        .strip_prefix(':')
        .and_then(|r| r.strip_suffix(':'))
        .filter(|name| !name.is_empty())
}

#[derive(Debug, Deserialize)]
struct MisskeyReaction {
    user: MisskeyUser,
    #[serde(rename = "type")]
    reaction: String,
}

#[derive(Debug, Deserialize)]
struct MisskeyUser {
    id: String,
    #[serde(default)]
    host: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MisskeyEmojis {
    emojis: Vec<MisskeyEmoji>,
}

#[derive(Debug, Deserialize)]
struct MisskeyEmoji {
    name: String,
    url: String,
}

/// A like extracted from any source, before it is matched to a local user.
struct RemoteLike {
    actor_uri: String,
    reaction: String,
    emoji_url: Option<String>,
}

/// Pulls and applies remote reactions.
#[derive(Clone)]
pub struct ReactionIngester {
    stores: Stores,
    client: RemoteFetchClient,
    limiter: HostRateLimiter,
    options: FetchOptions,
    likes: LikesConfig,
    base_url: String,
    id_gen: IdGenerator,
}

impl ReactionIngester {
    #[must_use]
    pub fn new(
        stores: Stores,
        client: RemoteFetchClient,
        limiter: HostRateLimiter,
        options: FetchOptions,
        likes: LikesConfig,
        base_url: &Url,
    ) -> Self {
        Self {
            stores,
            client,
            limiter,
            options,
            likes,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            id_gen: IdGenerator::new(),
        }
    }

    /// Refresh reactions of a remote note and return its local aggregate.
    ///
    /// `None` when the note is unknown or local.
    pub async fn fetch_remote_likes(&self, note_id: &str) -> AppResult<Option<ReactionSummary>> {
        let Some(note) = self.stores.notes.find_by_id(note_id).await? else {
            return Ok(None);
        };
        let Some(uri) = note.uri.clone().filter(|_| note.is_remote()) else {
            return Ok(None);
        };

        if let Err(e) = self.sync(&note, &uri).await {
            warn!(note_id = %note.id, uri = %uri, error = %e, "Failed to sync remote reactions");
        }

        self.stores
            .reactions
            .count_by_note_id_with_emojis(&note.id)
            .await
            .map(Some)
    }

    async fn sync(&self, note: &Note, uri: &str) -> AppResult<()> {
        let url = Url::parse(uri)?;
        let host = url
            .host_str()
            .ok_or_else(|| AppError::BadRequest(format!("{uri}: no host")))?;

        if self.limiter.should_skip(host).await {
            debug!(host = %host, note_id = %note.id, "Host rate limited, using local reactions");
            return Ok(());
        }

        let object: ApObject = self.fetch(uri, &self.options).await?;
        let Some(remote) = object.as_note() else {
            return Err(AppError::BadRequest(format!("{uri} is a {}", object.kind())));
        };

        let likes = match remote.likes_collection() {
            Some(collection) => self.collect_from_collection(collection).await,
            None if self.likes.misskey_fallback => self.collect_from_misskey_api(note, &url).await?,
            None => Vec::new(),
        };

        let mut inserted = 0;
        for like in likes {
            if self.apply_like(note, like).await?.is_some() {
                inserted += 1;
            }
        }
        info!(note_id = %note.id, host = %host, inserted, "Synced remote reactions");
        Ok(())
    }

    /// Fetch through the client and report the result to the rate limiter
    /// under the URL's host.
    async fn fetch<T: DeserializeOwned>(&self, url: &str, options: &FetchOptions) -> FetchResult<T> {
        let result = self.client.fetch(url, options).await;
        let parsed = Url::parse(url).ok();
        if let Some(host) = parsed.as_ref().and_then(Url::host_str) {
            match &result {
                Ok(_) => self.limiter.record_success(host).await,
                Err(_) => self.limiter.record_failure(host).await,
            }
        }
        result
    }

    /// Read a likes collection: at most `max_pages` documents, at most
    /// `max_items` entries.
    async fn collect_from_collection(&self, collection: &CollectionRef) -> Vec<RemoteLike> {
        let mut pages_fetched = 0;
        let mut current = match self.resolve_page(collection, &mut pages_fetched).await {
            Some(page) => page,
            None => return Vec::new(),
        };

        if !current.has_entries()
            && let Some(first) = current.first.clone()
        {
            match self.resolve_page(&first, &mut pages_fetched).await {
                Some(page) => current = page,
                None => return Vec::new(),
            }
        }

        let mut likes = Vec::new();
        for entry in current.entries().take(self.likes.max_items) {
            let object = match entry {
                ItemRef::Object(object) => (**object).clone(),
                ItemRef::Uri(item_url) => match self.fetch::<ApObject>(item_url, &self.options).await {
                    Ok(object) => object,
                    Err(e) => {
                        warn!(url = %item_url, error = %e, "Failed to fetch like, skipping");
                        continue;
                    }
                },
            };
            match object.as_like() {
                Some(like) => likes.push(self.extract_like(like).await),
                None => debug!(kind = object.kind(), "Ignoring non-like collection item"),
            }
        }
        likes
    }

    async fn resolve_page(&self, page: &CollectionRef, pages_fetched: &mut usize) -> Option<ApCollection> {
        match page {
            CollectionRef::Embedded(collection) => Some((**collection).clone()),
            CollectionRef::Uri(page_url) => {
                if *pages_fetched >= self.likes.max_pages {
                    debug!(url = %page_url, "Likes page cap reached");
                    return None;
                }
                *pages_fetched += 1;
                match self.fetch::<ApCollection>(page_url, &self.options).await {
                    Ok(collection) => Some(collection),
                    Err(e) => {
                        warn!(url = %page_url, error = %e, "Failed to fetch likes collection");
                        None
                    }
                }
            }
        }
    }

    /// Reaction and emoji of a Like; the emoji is stored under the actor's host.
    async fn extract_like(&self, like: &ApLike) -> RemoteLike {
        let actor_uri = like.actor.id().to_string();
        let reaction = normalize_reaction(like.reaction().unwrap_or(DEFAULT_REACTION));

        let emoji_url = match (custom_shortcode(&reaction), like.emoji()) {
            (Some(_), Some(emoji)) => {
                if let Some(host) = Url::parse(&actor_uri).ok().and_then(|u| u.host_str().map(str::to_string))
                    && let Err(e) = upsert_remote_emoji(
                        self.stores.emojis.as_ref(),
                        &self.id_gen,
                        &emoji.name,
                        &host,
                        &emoji.icon.url,
                    )
                    .await
                {
                    warn!(emoji = %emoji.name, error = %e, "Failed to store reaction emoji");
                }
                Some(emoji.icon.url.clone())
            }
            _ => None,
        };

        RemoteLike {
            actor_uri,
            reaction,
            emoji_url,
        }
    }

    /// Read reactions from the Misskey API of the note's origin.
    async fn collect_from_misskey_api(&self, note: &Note, note_url: &Url) -> AppResult<Vec<RemoteLike>> {
        let host = note_url
            .host_str()
            .ok_or_else(|| AppError::BadRequest(format!("{note_url}: no host")))?;
        let origin = note_url.origin().ascii_serialization();
        let Some(remote_note_id) = note_url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|id| !id.is_empty())
        else {
            return Ok(Vec::new());
        };

        let options = self
            .options
            .clone()
            .with_json_body(json!({ "noteId": remote_note_id, "limit": self.likes.max_items }));
        let reactions: Vec<MisskeyReaction> = match self
            .fetch(&format!("{origin}/api/notes/reactions"), &options)
            .await
        {
            Ok(reactions) => reactions,
            Err(e) => {
                debug!(note_id = %note.id, error = %e, "Misskey reactions API unavailable");
                return Ok(Vec::new());
            }
        };

        let reactions: Vec<(String, String)> = reactions
            .into_iter()
            .take(self.likes.max_items)
            // Reactors from third servers cannot be mapped to an actor URI here
            .filter(|r| r.user.host.is_none())
            .map(|r| (format!("{origin}/users/{}", r.user.id), normalize_reaction(&r.reaction)))
            .collect();

        let emoji_urls = if reactions.iter().any(|(_, r)| custom_shortcode(r).is_some()) {
            self.fetch_misskey_emojis(host, &origin, &reactions).await
        } else {
            HashMap::new()
        };

        Ok(reactions
            .into_iter()
            .map(|(actor_uri, reaction)| {
                let emoji_url = custom_shortcode(&reaction).and_then(|name| emoji_urls.get(name).cloned());
                RemoteLike {
                    actor_uri,
                    reaction,
                    emoji_url,
                }
            })
            .collect())
    }

    /// One call to `/api/emojis`; stores the emoji used by `reactions`.
    async fn fetch_misskey_emojis(
        &self,
        host: &str,
        origin: &str,
        reactions: &[(String, String)],
    ) -> HashMap<String, String> {
        let options = self.options.clone().with_json_body(json!({}));
        let response: MisskeyEmojis = match self.fetch(&format!("{origin}/api/emojis"), &options).await {
            Ok(response) => response,
            Err(e) => {
                warn!(host = %host, error = %e, "Failed to fetch remote emoji list");
                return HashMap::new();
            }
        };

        let mut urls = HashMap::new();
        for emoji in response.emojis {
            let used = reactions
                .iter()
                .any(|(_, r)| custom_shortcode(r) == Some(emoji.name.as_str()));
            if !used {
                continue;
            }
            if let Err(e) =
                upsert_remote_emoji(self.stores.emojis.as_ref(), &self.id_gen, &emoji.name, host, &emoji.url).await
            {
                warn!(emoji = %emoji.name, host = %host, error = %e, "Failed to store remote emoji");
            }
            urls.insert(emoji.name, emoji.url);
        }
        urls
    }

    /// Apply one inbound Like activity.
    ///
    /// Returns the new reaction, or `None` if the note or actor is unknown
    /// or the reaction already exists.
    pub async fn ingest_like(&self, like: &ApLike) -> AppResult<Option<Reaction>> {
        let object_id = like.object.id();
        let Some(note) = find_note_by_ap_id(self.stores.notes.as_ref(), &self.base_url, object_id).await? else {
            debug!(object = %object_id, "Liked note not found");
            return Ok(None);
        };

        let remote_like = self.extract_like(like).await;
        self.apply_like(&note, remote_like).await
    }

    /// Insert a reaction unless the actor is unknown or it already exists.
    async fn apply_like(&self, note: &Note, like: RemoteLike) -> AppResult<Option<Reaction>> {
        // Never fetch actors for a reaction
        let Some(user) = find_user_by_ap_id(self.stores.users.as_ref(), &self.base_url, &like.actor_uri).await? else {
            debug!(actor = %like.actor_uri, "Unknown reactor, skipping");
            return Ok(None);
        };

        if self
            .stores
            .reactions
            .find_by_user_note_and_reaction(&user.id, &note.id, &like.reaction)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let reaction = Reaction {
            id: self.id_gen.generate(),
            user_id: user.id,
            note_id: note.id.clone(),
            reaction: like.reaction,
            custom_emoji_url: like.emoji_url,
            created_at: Utc::now(),
        };
        match self.stores.reactions.create(reaction).await {
            Ok(reaction) => {
                debug!(note_id = %note.id, reaction = %reaction.reaction, "Stored remote reaction");
                Ok(Some(reaction))
            }
            Err(AppError::AlreadyExists(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
