//! Repository seams consumed by the federation layer.
//!
//! Implementations live outside this crate (the relational repositories);
//! [`memory::MemoryStore`] backs tests and the CLI.

use async_trait::async_trait;
use fedigate_common::AppResult;
use std::sync::Arc;

use crate::model::{CustomEmoji, DriveFile, LocalUser, Note, Reaction, ReactionSummary, UserKeypair};

pub mod memory;

pub use memory::{MemoryDeliveryQueue, MemoryStore};

/// Note persistence.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<Note>>;

    async fn find_by_uri(&self, uri: &str) -> AppResult<Option<Note>>;

    /// Insert a note. Fails with `AppError::AlreadyExists` when the `uri` is taken.
    async fn create(&self, note: Note) -> AppResult<Note>;

    async fn increment_replies_count(&self, id: &str) -> AppResult<()>;
}

/// User persistence.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<LocalUser>>;

    async fn find_by_uri(&self, uri: &str) -> AppResult<Option<LocalUser>>;

    /// Insert a user. Fails with `AppError::AlreadyExists` when the `uri` is taken.
    async fn create(&self, user: LocalUser) -> AppResult<LocalUser>;
}

/// Maps actor URIs to local users, creating or refreshing shadow users for
/// remote actors as needed.
#[async_trait]
pub trait ActorResolver: Send + Sync {
    async fn resolve_actor(&self, uri: &str) -> AppResult<LocalUser>;
}

/// Custom emoji persistence.
#[async_trait]
pub trait CustomEmojiStore: Send + Sync {
    async fn find_by_name(&self, name: &str, host: Option<&str>) -> AppResult<Option<CustomEmoji>>;

    /// Insert an emoji. Fails with `AppError::AlreadyExists` on a `(name, host)` clash.
    async fn create(&self, emoji: CustomEmoji) -> AppResult<CustomEmoji>;

    async fn update_url(&self, id: &str, url: &str) -> AppResult<CustomEmoji>;
}

/// Drive file metadata persistence.
#[async_trait]
pub trait DriveFileStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<DriveFile>>;

    async fn create(&self, file: DriveFile) -> AppResult<DriveFile>;
}

/// Reaction persistence.
#[async_trait]
pub trait ReactionStore: Send + Sync {
    async fn find_by_user_note_and_reaction(
        &self,
        user_id: &str,
        note_id: &str,
        reaction: &str,
    ) -> AppResult<Option<Reaction>>;

    /// Insert a reaction. Fails with `AppError::AlreadyExists` on a duplicate triple.
    async fn create(&self, reaction: Reaction) -> AppResult<Reaction>;

    async fn count_by_note_id_with_emojis(&self, note_id: &str) -> AppResult<ReactionSummary>;
}

/// Follow relationships.
#[async_trait]
pub trait FollowingStore: Send + Sync {
    /// Users following `user_id`, local and remote.
    async fn find_followers(&self, user_id: &str) -> AppResult<Vec<LocalUser>>;
}

/// Signing keys of local users.
#[async_trait]
pub trait KeypairStore: Send + Sync {
    async fn find_by_user_id(&self, user_id: &str) -> AppResult<Option<UserKeypair>>;
}

/// The set of repositories handed to the federation components.
#[derive(Clone)]
pub struct Stores {
    pub notes: Arc<dyn NoteStore>,
    pub users: Arc<dyn UserStore>,
    pub emojis: Arc<dyn CustomEmojiStore>,
    pub drive_files: Arc<dyn DriveFileStore>,
    pub reactions: Arc<dyn ReactionStore>,
    pub following: Arc<dyn FollowingStore>,
    pub keypairs: Arc<dyn KeypairStore>,
}

impl Stores {
    /// Back every repository with the same in-memory store.
    #[must_use]
    pub fn memory(store: &MemoryStore) -> Self {
        Self {
            notes: Arc::new(store.clone()),
            users: Arc::new(store.clone()),
            emojis: Arc::new(store.clone()),
            drive_files: Arc::new(store.clone()),
            reactions: Arc::new(store.clone()),
            following: Arc::new(store.clone()),
            keypairs: Arc::new(store.clone()),
        }
    }
}
