//! `ActivityPub` federation layer for fedigate.
//!
//! - **Fetch**: [`RemoteFetchClient`] with timeout, retry and backoff
//! - **Rate limiting**: [`HostRateLimiter`] gating proactive fetches per host
//! - **Delivery**: [`DeliveryComposer`] building Create, Announce, Like,
//!   Update, Delete and Undo activities for the [`DeliveryQueue`]
//! - **Ingestion**: [`NoteIngester`] and [`ReactionIngester`] normalizing
//!   remote notes, likes and reactions into local records
//! - **Repositories**: the traits in [`store`] plus in-memory implementations
//!
//! Misskey extensions (`_misskey_content`, `_misskey_quote`,
//! `_misskey_reaction`, the reactions API) are understood on both paths.

pub mod activities;
pub mod client;
pub mod delivery;
pub mod html;
pub mod ingest;
pub mod model;
pub mod objects;
pub mod rate_limit;
pub mod resolver;
pub mod store;

pub use activities::{Activity, ActivityKind, ActivityObject};
pub use client::{FetchError, FetchErrorKind, FetchOptions, FetchResult, RemoteFetchClient, SignatureConfig};
pub use delivery::{
    Composed, DeliveryComposer, DeliveryEvent, DeliveryJob, DeliveryOutcome, DeliveryQueue,
    NoOpDeliveryQueue, SkipReason,
};
pub use ingest::{EmojiUpsert, NoteIngester, ReactionIngester, determine_visibility};
pub use model::{CustomEmoji, DriveFile, LocalUser, Note, Reaction, ReactionSummary, UserKeypair, Visibility};
pub use objects::{ApLike, ApNote, ApObject};
pub use rate_limit::{HostRateLimiter, HostRateLimiterConfig, HostRateStatus};
pub use resolver::ActorFetcher;
pub use store::{ActorResolver, MemoryDeliveryQueue, MemoryStore, Stores};
