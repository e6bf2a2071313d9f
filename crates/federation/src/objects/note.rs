//! `ActivityPub` Note objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{CollectionRef, IdRef, LenientList, OneOrMany};

/// `ActivityPub` Note object (also used for Question, Article and Page).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApNote {
    pub id: Url,
    pub attributed_to: OneOrMany<IdRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<OneOrMany<LinkRef>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<OneOrMany<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<OneOrMany<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<IdRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<LenientList<ApTag>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<LenientList<ApAttachment>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<CollectionRef>,

    /// Misskey exposes its reactions under this non-standard collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<CollectionRef>,

    // FEP-e232 / Misskey quote extensions
    #[serde(rename = "quoteUrl", default, skip_serializing_if = "Option::is_none")]
    pub quote_url: Option<String>,

    #[serde(rename = "quoteUri", default, skip_serializing_if = "Option::is_none")]
    pub quote_uri: Option<String>,

    #[serde(rename = "_misskey_quote", default, skip_serializing_if = "Option::is_none")]
    pub misskey_quote: Option<String>,

    /// Raw MFM source, preferred over `content` when present.
    #[serde(rename = "_misskey_content", default, skip_serializing_if = "Option::is_none")]
    pub misskey_content: Option<String>,
}

impl ApNote {
    /// The first `attributedTo` entry.
    #[must_use]
    pub fn author_uri(&self) -> Option<&str> {
        self.attributed_to.first().map(IdRef::id)
    }

    /// Quote target, checking every field implementations use for it.
    #[must_use]
    pub fn quote_target(&self) -> Option<&str> {
        self.quote_url
            .as_deref()
            .or(self.quote_uri.as_deref())
            .or(self.misskey_quote.as_deref())
    }

    pub fn to_addresses(&self) -> impl Iterator<Item = &str> + Clone {
        self.to.iter().flat_map(OneOrMany::iter).map(String::as_str)
    }

    pub fn cc_addresses(&self) -> impl Iterator<Item = &str> + Clone {
        self.cc.iter().flat_map(OneOrMany::iter).map(String::as_str)
    }

    pub fn tags(&self) -> impl Iterator<Item = &ApTag> {
        self.tag.iter().flat_map(LenientList::iter)
    }

    pub fn attachments(&self) -> impl Iterator<Item = &ApAttachment> {
        self.attachment.iter().flat_map(LenientList::iter)
    }

    /// The advertised likes collection, falling back to Misskey's `reactions`.
    #[must_use]
    pub fn likes_collection(&self) -> Option<&CollectionRef> {
        self.likes.as_ref().or(self.reactions.as_ref())
    }

    /// Human-facing URL, if different from the id.
    #[must_use]
    pub fn html_url(&self) -> Option<&str> {
        self.url.as_ref().and_then(OneOrMany::first).map(LinkRef::href)
    }
}

/// `ActivityPub` tag.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ApTag {
    Mention {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        href: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Hashtag {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        href: Option<String>,
    },
    Emoji(ApEmoji),
    #[serde(other)]
    Other,
}

/// Custom emoji tag.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApEmoji {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `:shortcode:`
    pub name: String,
    pub icon: ApImage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl ApEmoji {
    /// Shortcode without the surrounding colons.
    #[must_use]
    pub fn shortcode(&self) -> &str {
        self.name.trim_matches(':')
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApImage {
    #[serde(rename = "type", default = "image_type")]
    pub kind: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

fn image_type() -> String {
    "Image".to_string()
}

/// Attachment types ingested as drive files.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum AttachmentKind {
    Document,
    Image,
    Audio,
    Video,
    #[default]
    #[serde(other)]
    Other,
}

/// `ActivityPub` attachment (file).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApAttachment {
    #[serde(rename = "type", default)]
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<OneOrMany<LinkRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blurhash: Option<String>,
}

impl ApAttachment {
    #[must_use]
    pub fn href(&self) -> Option<&str> {
        self.url.as_ref().and_then(OneOrMany::first).map(LinkRef::href)
    }
}

/// A URL property: a bare string or a `Link` object.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum LinkRef {
    Uri(String),
    Link {
        href: String,
        #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

impl LinkRef {
    #[must_use]
    pub fn href(&self) -> &str {
        match self {
            Self::Uri(href) | Self::Link { href, .. } => href,
        }
    }
}
