//! Local records the federation layer reads and writes.
//!
//! These mirror the rows owned by the repositories; persistence itself lives
//! behind the traits in [`crate::store`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Note visibility.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to everyone and listed on public timelines.
    Public,
    /// Visible to everyone but kept off public timelines (unlisted).
    Home,
    /// Followers only.
    Followers,
    /// Explicit recipients only (direct message).
    Specified,
}

impl Visibility {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Home => "home",
            Self::Followers => "followers",
            Self::Specified => "specified",
        }
    }

    /// Whether outbound delivery federates notes of this visibility.
    #[must_use]
    pub const fn is_federated(self) -> bool {
        matches!(self, Self::Public | Self::Specified)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local user row. Remote actors are stored as shadow users with `host` set.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalUser {
    pub id: String,
    pub username: String,
    /// `None` for users of this instance.
    pub host: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Actor URI; set for remote users only.
    pub uri: Option<String>,
    pub inbox: Option<String>,
    pub shared_inbox: Option<String>,
}

impl LocalUser {
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.host.is_none()
    }

    #[must_use]
    pub const fn is_remote(&self) -> bool {
        self.host.is_some()
    }

    /// `@username` or `@username@host`.
    #[must_use]
    pub fn acct(&self) -> String {
        match &self.host {
            Some(host) => format!("@{}@{host}", self.username),
            None => format!("@{}", self.username),
        }
    }
}

/// A user's signing key pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserKeypair {
    pub user_id: String,
    pub public_key_pem: String,
    pub private_key_pem: String,
}

impl fmt::Debug for UserKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserKeypair")
            .field("user_id", &self.user_id)
            .field("private_key_pem", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// A note. Notes ingested from remote servers carry their AP `uri`, which is
/// unique across the store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Note {
    pub id: String,
    pub user_id: String,
    pub user_host: Option<String>,
    pub text: Option<String>,
    pub cw: Option<String>,
    pub visibility: Visibility,
    pub local_only: bool,
    pub reply_id: Option<String>,
    pub renote_id: Option<String>,
    /// Local user IDs mentioned by the note.
    pub mentions: Vec<String>,
    /// Local user IDs addressed by a `specified` note.
    pub visible_user_ids: Vec<String>,
    pub tags: Vec<String>,
    /// Custom emoji shortcodes, without colons.
    pub emojis: Vec<String>,
    pub file_ids: Vec<String>,
    pub uri: Option<String>,
    pub url: Option<String>,
    pub replies_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Note {
    /// Whether the note was ingested from a remote server.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        self.user_host.is_some() && self.uri.is_some()
    }

    /// A renote with nothing of its own attached: federated as `Announce`.
    #[must_use]
    pub fn is_pure_renote(&self) -> bool {
        self.renote_id.is_some()
            && self.text.as_deref().is_none_or(str::is_empty)
            && self.cw.is_none()
            && self.reply_id.is_none()
            && self.file_ids.is_empty()
    }
}

/// A custom emoji. Remote emoji are keyed by `(name, host)`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomEmoji {
    pub id: String,
    /// Shortcode without colons.
    pub name: String,
    pub host: Option<String>,
    pub url: String,
    pub updated_at: DateTime<Utc>,
}

/// Drive file metadata. Remote attachments are linked, not downloaded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriveFile {
    pub id: String,
    pub user_id: String,
    pub user_host: Option<String>,
    pub name: String,
    pub content_type: String,
    pub url: String,
    pub comment: Option<String>,
    pub is_sensitive: bool,
    pub is_link: bool,
    pub created_at: DateTime<Utc>,
}

/// A reaction, unique by `(user_id, note_id, reaction)`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub id: String,
    pub user_id: String,
    pub note_id: String,
    /// Unicode emoji or `:shortcode:`.
    pub reaction: String,
    pub custom_emoji_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregated reactions of one note.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionSummary {
    pub counts: BTreeMap<String, u64>,
    /// Shortcode (without colons) to image URL.
    pub emojis: BTreeMap<String, String>,
}

impl ReactionSummary {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note() -> Note {
        Note {
            id: "n1".to_string(),
            user_id: "u1".to_string(),
            user_host: None,
            text: None,
            cw: None,
            visibility: Visibility::Public,
            local_only: false,
            reply_id: None,
            renote_id: Some("n0".to_string()),
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

    #[test]
    fn test_pure_renote() {
        assert!(note().is_pure_renote());

        let quote = Note {
            text: Some("look at this".to_string()),
            ..note()
        };
        assert!(!quote.is_pure_renote());

        let with_file = Note {
            file_ids: vec!["f1".to_string()],
            ..note()
        };
        assert!(!with_file.is_pure_renote());

        let empty_text = Note {
            text: Some(String::new()),
            ..note()
        };
        assert!(empty_text.is_pure_renote());
    }

    #[test]
    fn test_visibility_federation() {
        assert!(Visibility::Public.is_federated());
        assert!(Visibility::Specified.is_federated());
        assert!(!Visibility::Home.is_federated());
        assert!(!Visibility::Followers.is_federated());
        assert_eq!(
            serde_json::to_string(&Visibility::Specified).unwrap_or_default(),
            "\"specified\""
        );
    }

    #[test]
    fn test_keypair_debug_redacts_private_key() {
        let keypair = UserKeypair {
            user_id: "u1".to_string(),
            public_key_pem: "pub".to_string(),
            private_key_pem: "secret".to_string(),
        };
        let debug = format!("{keypair:?}");
        assert!(!debug.contains("secret"));
    }
}
