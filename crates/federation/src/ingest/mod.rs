//! Inbound normalization of remote objects into local records.
//!
//! - [`NoteIngester`]: remote Notes, with author, mention, emoji, reply,
//!   quote and attachment resolution
//! - [`ReactionIngester`]: remote likes and reactions, from `likes`
//!   collections or the Misskey reactions API
//!
//! Ingestion is idempotent: the note `uri` and the reaction triple
//! `(user, note, reaction)` are unique, so concurrent or repeated ingestion
//! of the same remote object converges on one record. Failures of optional
//! sub-objects are logged and skipped.

mod emoji;
mod note;
mod reaction;

pub use emoji::{EmojiUpsert, upsert_remote_emoji};
pub use note::{NoteIngester, determine_visibility};
pub use reaction::{DEFAULT_REACTION, ReactionIngester, normalize_reaction};

use fedigate_common::AppResult;

use crate::model::{LocalUser, Note};
use crate::store::{NoteStore, UserStore};

/// Trailing id of `{base_url}{prefix}{id}`, for ids minted by this instance.
fn local_id<'a>(base_url: &str, prefix: &str, ap_id: &'a str) -> Option<&'a str> {
    ap_id
        .strip_prefix(base_url)
        .and_then(|path| path.strip_prefix(prefix))
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

/// Primary key of a local user addressed as `{base_url}/users/{id}`.
pub(crate) fn local_user_id<'a>(base_url: &str, ap_id: &'a str) -> Option<&'a str> {
    local_id(base_url, "/users/", ap_id)
}

/// Find a stored note by its `ActivityPub` id.
///
/// Remote notes are matched on `uri`; ids under `{base_url}/notes/` are
/// this instance's own notes and are matched on their primary key.
pub(crate) async fn find_note_by_ap_id(
    notes: &dyn NoteStore,
    base_url: &str,
    ap_id: &str,
) -> AppResult<Option<Note>> {
    if let Some(id) = local_id(base_url, "/notes/", ap_id) {
        return notes.find_by_id(id).await;
    }
    notes.find_by_uri(ap_id).await
}

/// Find a stored user by actor URI. Local users carry no `uri` and are
/// matched on the id under `{base_url}/users/`.
pub(crate) async fn find_user_by_ap_id(
    users: &dyn UserStore,
    base_url: &str,
    ap_id: &str,
) -> AppResult<Option<LocalUser>> {
    if let Some(id) = local_user_id(base_url, ap_id) {
        return users.find_by_id(id).await;
    }
    users.find_by_uri(ap_id).await
}
