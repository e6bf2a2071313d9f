//! Outbound `ActivityPub` activities.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::objects::{AS_CONTEXT, ApObject, ApTag};

/// Activity types this layer emits.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum ActivityKind {
    Create,
    Announce,
    Like,
    Update,
    Delete,
    Undo,
}

/// The `object` of an activity.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ActivityObject {
    Uri(String),
    Activity(Box<Activity>),
    Object(Box<ApObject>),
}

/// An outbound activity. Built once, then moved into a delivery job.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Activity {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub actor: String,
    pub object: ActivityObject,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "_misskey_reaction", default, skip_serializing_if = "Option::is_none")]
    pub misskey_reaction: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<ApTag>,
}

impl Activity {
    /// A top-level activity carrying the JSON-LD context.
    #[must_use]
    pub fn new(
        kind: ActivityKind,
        id: impl Into<String>,
        actor: impl Into<String>,
        object: ActivityObject,
    ) -> Self {
        Self {
            context: Some(default_context()),
            id: id.into(),
            kind,
            actor: actor.into(),
            object,
            to: Vec::new(),
            cc: Vec::new(),
            published: None,
            content: None,
            misskey_reaction: None,
            tag: Vec::new(),
        }
    }

    /// Same as [`Activity::new`] without `@context`, for embedding in an `Undo`.
    #[must_use]
    pub fn embedded(
        kind: ActivityKind,
        id: impl Into<String>,
        actor: impl Into<String>,
        object: ActivityObject,
    ) -> Self {
        Self {
            context: None,
            ..Self::new(kind, id, actor, object)
        }
    }

    #[must_use]
    pub fn to(mut self, to: Vec<String>) -> Self {
        self.to = to;
        self
    }

    #[must_use]
    pub fn cc(mut self, cc: Vec<String>) -> Self {
        self.cc = cc;
        self
    }

    #[must_use]
    pub const fn published(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }

    /// Set the reaction, mirrored into `content` for non-Misskey servers.
    #[must_use]
    pub fn reaction(mut self, reaction: &str, emoji: Option<ApTag>) -> Self {
        self.content = Some(reaction.to_string());
        self.misskey_reaction = Some(reaction.to_string());
        self.tag = emoji.into_iter().collect();
        self
    }

    /// Serialize for the delivery queue.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// `@context` for outbound activities, including the Misskey extension terms.
#[must_use]
pub fn default_context() -> Value {
    json!([
        AS_CONTEXT,
        "https://w3id.org/security/v1",
        {
            "Hashtag": "as:Hashtag",
            "sensitive": "as:sensitive",
            "quoteUrl": "as:quoteUrl",
            "misskey": "https://misskey-hub.net/ns#",
            "_misskey_content": "misskey:_misskey_content",
            "_misskey_quote": "misskey:_misskey_quote",
            "_misskey_reaction": "misskey:_misskey_reaction",
            "toot": "http://joinmastodon.org/ns#",
            "Emoji": "toot:Emoji"
        }
    ])
}
