//! Inbound Like / `EmojiReact` objects.

use serde::{Deserialize, Serialize};

use super::{ApEmoji, ApTag, IdRef, LenientList};

/// A Like as received from a remote server.
///
/// Misskey sends custom reactions as `_misskey_reaction` plus an `Emoji` tag;
/// Pleroma sends `EmojiReact` with the reaction in `content`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApLike {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub actor: IdRef,
    pub object: IdRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "_misskey_reaction", default, skip_serializing_if = "Option::is_none")]
    pub misskey_reaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<LenientList<ApTag>>,
}

impl ApLike {
    /// Reaction value: `_misskey_reaction`, then `content`.
    #[must_use]
    pub fn reaction(&self) -> Option<&str> {
        self.misskey_reaction
            .as_deref()
            .or(self.content.as_deref())
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// The first `Emoji` tag, if any.
    #[must_use]
    pub fn emoji(&self) -> Option<&ApEmoji> {
        self.tag.iter().flat_map(LenientList::iter).find_map(|tag| match tag {
            ApTag::Emoji(emoji) => Some(emoji),
            _ => None,
        })
    }
}
