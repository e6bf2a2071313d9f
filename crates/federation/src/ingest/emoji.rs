//! Remote custom emoji upsert.

use chrono::Utc;
use fedigate_common::{AppError, AppResult, IdGenerator};
use tracing::debug;

use crate::model::CustomEmoji;
use crate::store::CustomEmojiStore;

/// What [`upsert_remote_emoji`] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmojiUpsert {
    Created(CustomEmoji),
    /// The stored URL differed and was refreshed.
    Updated(CustomEmoji),
    Unchanged(CustomEmoji),
}

impl EmojiUpsert {
    #[must_use]
    pub const fn emoji(&self) -> &CustomEmoji {
        match self {
            Self::Created(emoji) | Self::Updated(emoji) | Self::Unchanged(emoji) => emoji,
        }
    }
}

/// Store a remote emoji keyed by `(name, host)`, refreshing the URL if it changed.
pub async fn upsert_remote_emoji(
    store: &dyn CustomEmojiStore,
    id_gen: &IdGenerator,
    name: &str,
    host: &str,
    url: &str,
) -> AppResult<EmojiUpsert> {
    let name = name.trim_matches(':');
    if name.is_empty() {
        return Err(AppError::BadRequest("empty emoji name".to_string()));
    }

    if let Some(existing) = store.find_by_name(name, Some(host)).await? {
        return refresh(store, existing, url).await;
    }

    let emoji = CustomEmoji {
        id: id_gen.generate(),
        name: name.to_string(),
        host: Some(host.to_string()),
        url: url.to_string(),
        updated_at: Utc::now(),
    };
    match store.create(emoji).await {
        Ok(emoji) => {
            debug!(emoji = %name, host = %host, "Stored remote emoji");
            Ok(EmojiUpsert::Created(emoji))
        }
        // Lost a race with a concurrent ingestion
        Err(AppError::AlreadyExists(_)) => {
            let existing = store
                .find_by_name(name, Some(host))
                .await?
                .ok_or_else(|| AppError::NotFound(format!("emoji {name}@{host}")))?;
            refresh(store, existing, url).await
        }
        Err(e) => Err(e),
    }
}

async fn refresh(store: &dyn CustomEmojiStore, existing: CustomEmoji, url: &str) -> AppResult<EmojiUpsert> {
    if existing.url == url {
        return Ok(EmojiUpsert::Unchanged(existing));
    }
    let updated = store.update_url(&existing.id, url).await?;
    debug!(emoji = %updated.name, host = ?updated.host, "Refreshed remote emoji URL");
    Ok(EmojiUpsert::Updated(updated))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_upsert_lifecycle() {
        let store = MemoryStore::new();
        let id_gen = IdGenerator::new();

        let created = upsert_remote_emoji(&store, &id_gen, ":blobcat:", "remote.example", "https://remote.example/a.png")
            .await
            .unwrap();
        assert!(matches!(created, EmojiUpsert::Created(_)));
        assert_eq!(created.emoji().name, "blobcat");

        let same = upsert_remote_emoji(&store, &id_gen, "blobcat", "remote.example", "https://remote.example/a.png")
            .await
            .unwrap();
        assert!(matches!(same, EmojiUpsert::Unchanged(_)));

        let moved = upsert_remote_emoji(&store, &id_gen, "blobcat", "remote.example", "https://remote.example/b.png")
            .await
            .unwrap();
        assert!(matches!(moved, EmojiUpsert::Updated(_)));
        assert_eq!(moved.emoji().id, created.emoji().id);

        // Same name on another host is a different emoji
        let other = upsert_remote_emoji(&store, &id_gen, "blobcat", "other.example", "https://other.example/a.png")
            .await
            .unwrap();
        assert!(matches!(other, EmojiUpsert::Created(_)));

        let emojis = store.emojis().await;
        assert_eq!(emojis.len(), 2);
        assert!(emojis.iter().any(|e| e.url == "https://remote.example/b.png"));
    }

    #[tokio::test]
    async fn test_rejects_empty_name() {
        let store = MemoryStore::new();
        let result = upsert_remote_emoji(&store, &IdGenerator::new(), "::", "remote.example", "https://x").await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
