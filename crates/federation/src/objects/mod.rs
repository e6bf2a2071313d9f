//! `ActivityPub` object types.
//!
//! Remote payloads are parsed into [`ApObject`], a union tagged on `type`.
//! Types this layer does not understand land in [`ApObject::Unknown`] and are
//! skipped by callers instead of being parsed structurally.

#![allow(missing_docs)]

mod actor;
mod collection;
mod like;
mod note;

pub use actor::{ApActor, ApEndpoints, ApPublicKey};
pub use collection::{ApCollection, CollectionRef, ItemRef};
pub use like::ApLike;
pub use note::{ApAttachment, ApEmoji, ApImage, ApNote, ApTag, AttachmentKind, LinkRef};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// The public collection.
pub const PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

/// `ActivityStreams` JSON-LD context.
pub const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Whether an address designates the public collection.
///
/// Some implementations send the compacted `as:Public` or a bare `Public`.
#[must_use]
pub fn is_public_address(address: &str) -> bool {
    matches!(address, PUBLIC | "as:Public" | "Public")
}

/// A property that may hold a single value or an array.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            Self::One(value) => std::slice::from_ref(value).iter(),
            Self::Many(values) => values.iter(),
        }
    }

    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.iter().next()
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(values: Vec<T>) -> Self {
        Self::Many(values)
    }
}

impl<'a, T> IntoIterator for &'a OneOrMany<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A one-or-many property parsed entry by entry.
///
/// Entries that do not parse as `T` are logged and dropped, so one malformed
/// tag or attachment never rejects the enclosing object.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct LenientList<T>(pub Vec<T>);

impl<T> LenientList<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> From<Vec<T>> for LenientList<T> {
    fn from(values: Vec<T>) -> Self {
        Self(values)
    }
}

impl<'a, T> IntoIterator for &'a LenientList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for LenientList<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Null => Vec::new(),
            serde_json::Value::Array(entries) => entries,
            entry => vec![entry],
        };

        let parsed = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<T>(entry) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed entry");
                    None
                }
            })
            .collect();
        Ok(Self(parsed))
    }
}

/// A reference to another object: either its URI or an embedded object with an `id`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum IdRef {
    Uri(String),
    Object { id: String },
}

impl IdRef {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Uri(id) | Self::Object { id } => id,
        }
    }
}

impl From<String> for IdRef {
    fn from(uri: String) -> Self {
        Self::Uri(uri)
    }
}

/// A remote object, tagged by its `type`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ApObject {
    Note(ApNote),
    Question(ApNote),
    Article(ApNote),
    Page(ApNote),
    Like(ApLike),
    EmojiReact(ApLike),
    Person(ApActor),
    Service(ApActor),
    Application(ApActor),
    Group(ApActor),
    Organization(ApActor),
    Collection(ApCollection),
    OrderedCollection(ApCollection),
    CollectionPage(ApCollection),
    OrderedCollectionPage(ApCollection),
    Tombstone { id: String },
    #[serde(other)]
    Unknown,
}

impl ApObject {
    /// The object as a note, for every note-like type.
    #[must_use]
    pub const fn as_note(&self) -> Option<&ApNote> {
        match self {
            Self::Note(note) | Self::Question(note) | Self::Article(note) | Self::Page(note) => {
                Some(note)
            }
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_like(&self) -> Option<&ApLike> {
        match self {
            Self::Like(like) | Self::EmojiReact(like) => Some(like),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_actor(&self) -> Option<&ApActor> {
        match self {
            Self::Person(actor)
            | Self::Service(actor)
            | Self::Application(actor)
            | Self::Group(actor)
            | Self::Organization(actor) => Some(actor),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_collection(&self) -> Option<&ApCollection> {
        match self {
            Self::Collection(c)
            | Self::OrderedCollection(c)
            | Self::CollectionPage(c)
            | Self::OrderedCollectionPage(c) => Some(c),
            _ => None,
        }
    }

    /// The `type` name, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Note(_) => "Note",
            Self::Question(_) => "Question",
            Self::Article(_) => "Article",
            Self::Page(_) => "Page",
            Self::Like(_) => "Like",
            Self::EmojiReact(_) => "EmojiReact",
            Self::Person(_) => "Person",
            Self::Service(_) => "Service",
            Self::Application(_) => "Application",
            Self::Group(_) => "Group",
            Self::Organization(_) => "Organization",
            Self::Collection(_) => "Collection",
            Self::OrderedCollection(_) => "OrderedCollection",
            Self::CollectionPage(_) => "CollectionPage",
            Self::OrderedCollectionPage(_) => "OrderedCollectionPage",
            Self::Tombstone { .. } => "Tombstone",
            Self::Unknown => "Unknown",
        }
    }
}
