//! In-memory repositories.
//!
//! Enforces the same uniqueness rules as the relational schema (note `uri`,
//! user `uri`, emoji `(name, host)`, reaction `(user, note, reaction)`), so
//! idempotency can be exercised without a database.

use async_trait::async_trait;
use fedigate_common::{AppError, AppResult, IdGenerator};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use url::Url;

use super::{
    ActorResolver, CustomEmojiStore, DriveFileStore, FollowingStore, KeypairStore, NoteStore,
    ReactionStore, UserStore,
};
use crate::delivery::{DeliveryJob, DeliveryQueue};
use crate::model::{
    CustomEmoji, DriveFile, LocalUser, Note, Reaction, ReactionSummary, UserKeypair,
};

#[derive(Default)]
struct State {
    users: HashMap<String, LocalUser>,
    notes: HashMap<String, Note>,
    emojis: HashMap<String, CustomEmoji>,
    drive_files: HashMap<String, DriveFile>,
    reactions: Vec<Reaction>,
    /// `(follower_id, followee_id)`
    followings: Vec<(String, String)>,
    keypairs: HashMap<String, UserKeypair>,
}

/// Shared in-memory store implementing every repository trait.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    id_gen: IdGenerator,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user.
    pub async fn put_user(&self, user: LocalUser) {
        self.state.write().await.users.insert(user.id.clone(), user);
    }

    /// Insert or replace a note.
    pub async fn put_note(&self, note: Note) {
        self.state.write().await.notes.insert(note.id.clone(), note);
    }

    pub async fn put_keypair(&self, keypair: UserKeypair) {
        self.state
            .write()
            .await
            .keypairs
            .insert(keypair.user_id.clone(), keypair);
    }

    pub async fn follow(&self, follower_id: &str, followee_id: &str) {
        let mut state = self.state.write().await;
        let pair = (follower_id.to_string(), followee_id.to_string());
        if !state.followings.contains(&pair) {
            state.followings.push(pair);
        }
    }

    pub async fn note(&self, id: &str) -> Option<Note> {
        self.state.read().await.notes.get(id).cloned()
    }

    pub async fn note_count(&self) -> usize {
        self.state.read().await.notes.len()
    }

    pub async fn user_count(&self) -> usize {
        self.state.read().await.users.len()
    }

    pub async fn reactions(&self) -> Vec<Reaction> {
        self.state.read().await.reactions.clone()
    }

    pub async fn emojis(&self) -> Vec<CustomEmoji> {
        self.state.read().await.emojis.values().cloned().collect()
    }

    pub async fn drive_files(&self) -> Vec<DriveFile> {
        self.state.read().await.drive_files.values().cloned().collect()
    }
}

#[async_trait]
impl NoteStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<Note>> {
        Ok(self.state.read().await.notes.get(id).cloned())
    }

    async fn find_by_uri(&self, uri: &str) -> AppResult<Option<Note>> {
        let state = self.state.read().await;
        Ok(state
            .notes
            .values()
            .find(|n| n.uri.as_deref() == Some(uri))
            .cloned())
    }

    async fn create(&self, note: Note) -> AppResult<Note> {
        let mut state = self.state.write().await;
        if let Some(uri) = &note.uri
            && state.notes.values().any(|n| n.uri.as_ref() == Some(uri))
        {
            return Err(AppError::AlreadyExists(format!("note {uri}")));
        }
        state.notes.insert(note.id.clone(), note.clone());
        Ok(note)
    }

    async fn increment_replies_count(&self, id: &str) -> AppResult<()> {
        let mut state = self.state.write().await;
        let note = state
            .notes
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("note {id}")))?;
        note.replies_count += 1;
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<LocalUser>> {
        Ok(self.state.read().await.users.get(id).cloned())
    }

    async fn find_by_uri(&self, uri: &str) -> AppResult<Option<LocalUser>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.uri.as_deref() == Some(uri))
            .cloned())
    }

    async fn create(&self, user: LocalUser) -> AppResult<LocalUser> {
        let mut state = self.state.write().await;
        if let Some(uri) = &user.uri
            && state.users.values().any(|u| u.uri.as_ref() == Some(uri))
        {
            return Err(AppError::AlreadyExists(format!("user {uri}")));
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }
}

/// Offline resolution: known URIs map to their user, unknown ones get a
/// shadow user named after the last path segment.
#[async_trait]
impl ActorResolver for MemoryStore {
    async fn resolve_actor(&self, uri: &str) -> AppResult<LocalUser> {
        if let Some(user) = UserStore::find_by_uri(self, uri).await? {
            return Ok(user);
        }

        let url = Url::parse(uri)
            .map_err(|e| AppError::ResolutionFailed(format!("{uri}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| AppError::ResolutionFailed(format!("{uri}: no host")))?;
        let username = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .map(|s| s.trim_start_matches('@').to_string())
            .ok_or_else(|| AppError::ResolutionFailed(format!("{uri}: no username")))?;

        let user = LocalUser {
            id: self.id_gen.generate(),
            username,
            host: Some(host.to_string()),
            name: None,
            description: None,
            uri: Some(uri.to_string()),
            inbox: None,
            shared_inbox: None,
        };
        match UserStore::create(self, user).await {
            Err(AppError::AlreadyExists(_)) => UserStore::find_by_uri(self, uri)
                .await?
                .ok_or_else(|| AppError::ResolutionFailed(uri.to_string())),
            other => other,
        }
    }
}

#[async_trait]
impl CustomEmojiStore for MemoryStore {
    async fn find_by_name(&self, name: &str, host: Option<&str>) -> AppResult<Option<CustomEmoji>> {
        let state = self.state.read().await;
        Ok(state
            .emojis
            .values()
            .find(|e| e.name == name && e.host.as_deref() == host)
            .cloned())
    }

    async fn create(&self, emoji: CustomEmoji) -> AppResult<CustomEmoji> {
        let mut state = self.state.write().await;
        if state
            .emojis
            .values()
            .any(|e| e.name == emoji.name && e.host == emoji.host)
        {
            return Err(AppError::AlreadyExists(format!(
                "emoji {}@{}",
                emoji.name,
                emoji.host.as_deref().unwrap_or(".")
            )));
        }
        state.emojis.insert(emoji.id.clone(), emoji.clone());
        Ok(emoji)
    }

    async fn update_url(&self, id: &str, url: &str) -> AppResult<CustomEmoji> {
        let mut state = self.state.write().await;
        let emoji = state
            .emojis
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("emoji {id}")))?;
        emoji.url = url.to_string();
        emoji.updated_at = chrono::Utc::now();
        Ok(emoji.clone())
    }
}

#[async_trait]
impl DriveFileStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<DriveFile>> {
        Ok(self.state.read().await.drive_files.get(id).cloned())
    }

    async fn create(&self, file: DriveFile) -> AppResult<DriveFile> {
        self.state
            .write()
            .await
            .drive_files
            .insert(file.id.clone(), file.clone());
        Ok(file)
    }
}

#[async_trait]
impl ReactionStore for MemoryStore {
    async fn find_by_user_note_and_reaction(
        &self,
        user_id: &str,
        note_id: &str,
        reaction: &str,
    ) -> AppResult<Option<Reaction>> {
        let state = self.state.read().await;
        Ok(state
            .reactions
            .iter()
            .find(|r| r.user_id == user_id && r.note_id == note_id && r.reaction == reaction)
            .cloned())
    }

    async fn create(&self, reaction: Reaction) -> AppResult<Reaction> {
        let mut state = self.state.write().await;
        if state.reactions.iter().any(|r| {
            r.user_id == reaction.user_id
                && r.note_id == reaction.note_id
                && r.reaction == reaction.reaction
        }) {
            return Err(AppError::AlreadyExists(format!(
                "reaction {} by {} on {}",
                reaction.reaction, reaction.user_id, reaction.note_id
            )));
        }
        state.reactions.push(reaction.clone());
        Ok(reaction)
    }

    async fn count_by_note_id_with_emojis(&self, note_id: &str) -> AppResult<ReactionSummary> {
        let state = self.state.read().await;
        let mut summary = ReactionSummary::default();
        for reaction in state.reactions.iter().filter(|r| r.note_id == note_id) {
            *summary.counts.entry(reaction.reaction.clone()).or_default() += 1;
            if let Some(url) = &reaction.custom_emoji_url {
                summary
                    .emojis
                    .insert(reaction.reaction.trim_matches(':').to_string(), url.clone());
            }
        }
        Ok(summary)
    }
}

#[async_trait]
impl FollowingStore for MemoryStore {
    async fn find_followers(&self, user_id: &str) -> AppResult<Vec<LocalUser>> {
        let state = self.state.read().await;
        Ok(state
            .followings
            .iter()
            .filter(|(_, followee)| followee == user_id)
            .filter_map(|(follower, _)| state.users.get(follower).cloned())
            .collect())
    }
}

#[async_trait]
impl KeypairStore for MemoryStore {
    async fn find_by_user_id(&self, user_id: &str) -> AppResult<Option<UserKeypair>> {
        Ok(self.state.read().await.keypairs.get(user_id).cloned())
    }
}

/// Delivery queue that records jobs instead of sending them.
#[derive(Clone, Default)]
pub struct MemoryDeliveryQueue {
    jobs: Arc<Mutex<Vec<DeliveryJob>>>,
}

impl MemoryDeliveryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn jobs(&self) -> Vec<DeliveryJob> {
        self.jobs.lock().await.clone()
    }
}

#[async_trait]
impl DeliveryQueue for MemoryDeliveryQueue {
    async fn enqueue(&self, job: DeliveryJob) -> AppResult<()> {
        self.jobs.lock().await.push(job);
        Ok(())
    }
}
