//! Collections and collection pages.

use serde::{Deserialize, Serialize};

use super::{ApObject, LenientList};

/// `Collection`, `OrderedCollection` or one of their pages.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApCollection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<LenientList<ItemRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordered_items: Option<LenientList<ItemRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<CollectionRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<CollectionRef>,
}

impl ApCollection {
    /// `orderedItems`, or `items` when the former is absent.
    pub fn entries(&self) -> impl Iterator<Item = &ItemRef> {
        self.ordered_items
            .as_ref()
            .or(self.items.as_ref())
            .into_iter()
            .flat_map(LenientList::iter)
    }

    #[must_use]
    pub fn has_entries(&self) -> bool {
        self.entries().next().is_some()
    }
}

/// A collection referenced by URL or embedded inline.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CollectionRef {
    Uri(String),
    Embedded(Box<ApCollection>),
}

/// A collection entry: inline object or a URL that needs a secondary fetch.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ItemRef {
    Uri(String),
    Object(Box<ApObject>),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_with_embedded_first_page() {
        let collection: ApCollection = serde_json::from_value(json!({
            "type": "OrderedCollection",
            "id": "https://remote.example/notes/1/likes",
            "totalItems": 2,
            "first": {
                "type": "OrderedCollectionPage",
                "orderedItems": [
                    "https://remote.example/likes/1",
                    {
                        "type": "Like",
                        "id": "https://remote.example/likes/2",
                        "actor": "https://remote.example/users/carol",
                        "object": "https://remote.example/notes/1"
                    }
                ]
            }
        }))
        .unwrap();

        assert!(!collection.has_entries());
        let Some(CollectionRef::Embedded(page)) = &collection.first else {
            panic!("expected embedded first page");
        };
        let entries: Vec<_> = page.entries().collect();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0], ItemRef::Uri(_)));
        match entries[1] {
            ItemRef::Object(object) => assert!(object.as_like().is_some()),
            ItemRef::Uri(_) => panic!("expected inline like"),
        }
    }

    #[test]
    fn test_items_fallback() {
        let collection: ApCollection = serde_json::from_value(json!({
            "type": "Collection",
            "items": ["https://remote.example/likes/1"]
        }))
        .unwrap();

        assert_eq!(collection.entries().count(), 1);
    }

    #[test]
    fn test_malformed_item_is_dropped() {
        let page: ApCollection = serde_json::from_value(json!({
            "type": "OrderedCollectionPage",
            "orderedItems": [
                {"type": "Like", "id": "https://remote.example/likes/1"},
                "https://remote.example/likes/2"
            ]
        }))
        .unwrap();

        let entries: Vec<_> = page.entries().collect();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0], ItemRef::Uri(_)));
    }
}
