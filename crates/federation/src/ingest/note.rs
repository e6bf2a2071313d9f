//! Remote Note ingestion.

use chrono::Utc;
use fedigate_common::{AppError, AppResult, IdGenerator};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::{find_note_by_ap_id, find_user_by_ap_id, local_user_id, upsert_remote_emoji};
use crate::client::{FetchOptions, RemoteFetchClient};
use crate::html::strip_html;
use crate::model::{DriveFile, Note, Visibility};
use crate::objects::{ApAttachment, ApNote, ApObject, ApTag, AttachmentKind, is_public_address};
use crate::store::{ActorResolver, Stores};

/// Filename for remote attachments with no usable name.
const DEFAULT_FILE_NAME: &str = "remote-file";

/// Visibility from `to`/`cc`, checked in this order: public in `to`, public
/// in `cc`, a followers collection in `to`, otherwise direct.
pub fn determine_visibility<'a>(
    to: impl IntoIterator<Item = &'a str> + Clone,
    cc: impl IntoIterator<Item = &'a str>,
) -> Visibility {
    if to.clone().into_iter().any(is_public_address) {
        Visibility::Public
    } else if cc.into_iter().any(is_public_address) {
        Visibility::Home
    } else if to.into_iter().any(|addr| addr.ends_with("/followers")) {
        Visibility::Followers
    } else {
        Visibility::Specified
    }
}

/// Ingests remote Notes.
#[derive(Clone)]
pub struct NoteIngester {
    stores: Stores,
    resolver: Arc<dyn ActorResolver>,
    client: RemoteFetchClient,
    options: FetchOptions,
    base_url: String,
    id_gen: IdGenerator,
}

impl NoteIngester {
    #[must_use]
    pub fn new(
        stores: Stores,
        resolver: Arc<dyn ActorResolver>,
        client: RemoteFetchClient,
        options: FetchOptions,
        base_url: &Url,
    ) -> Self {
        Self {
            stores,
            resolver,
            client,
            options,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            id_gen: IdGenerator::new(),
        }
    }

    /// Fetch a note by URI and ingest it.
    pub async fn ingest_note_by_uri(&self, uri: &str) -> AppResult<Note> {
        if let Some(existing) = self.stores.notes.find_by_uri(uri).await? {
            return Ok(existing);
        }

        let requested = Url::parse(uri)?;
        let object: ApObject = self.client.fetch(uri, &self.options).await?;
        let note = object.as_note().ok_or_else(|| {
            AppError::BadRequest(format!("{uri} is a {}, not a note", object.kind()))
        })?;

        // Refuse objects claiming an id on another host
        if note.id.host_str() != requested.host_str() {
            return Err(AppError::BadRequest(format!(
                "{uri} returned a note with foreign id {}",
                note.id
            )));
        }

        self.ingest_note(note).await
    }

    /// Ingest an already-parsed object; only note types are accepted.
    pub async fn ingest_object(&self, object: &ApObject) -> AppResult<Note> {
        match object.as_note() {
            Some(note) => self.ingest_note(note).await,
            None => Err(AppError::BadRequest(format!(
                "cannot ingest {} as a note",
                object.kind()
            ))),
        }
    }

    /// Normalize and store a remote note. Returns the existing record when
    /// the note was ingested before.
    pub async fn ingest_note(&self, ap_note: &ApNote) -> AppResult<Note> {
        let uri = ap_note.id.to_string();
        if let Some(existing) = self.stores.notes.find_by_uri(&uri).await? {
            debug!(uri = %uri, note_id = %existing.id, "Note already ingested");
            return Ok(existing);
        }

        let author_uri = ap_note
            .author_uri()
            .ok_or_else(|| AppError::BadRequest(format!("{uri}: missing attributedTo")))?;
        let author = self.resolver.resolve_actor(author_uri).await.map_err(|e| match e {
            AppError::ResolutionFailed(_) => e,
            other => AppError::ResolutionFailed(format!("{author_uri}: {other}")),
        })?;

        let text = ap_note
            .misskey_content
            .clone()
            .or_else(|| ap_note.content.as_deref().map(strip_html))
            .filter(|t| !t.is_empty());
        let cw = ap_note.summary.clone().filter(|s| !s.is_empty());
        let visibility = determine_visibility(ap_note.to_addresses(), ap_note.cc_addresses());

        let mentions = self.resolve_mentions(ap_note, visibility).await;
        let visible_user_ids = if visibility == Visibility::Specified {
            mentions.clone()
        } else {
            Vec::new()
        };

        let mut tags: Vec<String> = Vec::new();
        let mut emojis: Vec<String> = Vec::new();
        for tag in ap_note.tags() {
            match tag {
                ApTag::Hashtag { name, .. } => {
                    let name = name.trim_start_matches('#').to_lowercase();
                    if !name.is_empty() && !tags.contains(&name) {
                        tags.push(name);
                    }
                }
                ApTag::Emoji(emoji) => {
                    let name = emoji.shortcode().to_string();
                    if !name.is_empty() && !emojis.contains(&name) {
                        emojis.push(name);
                    }
                }
                ApTag::Mention { .. } | ApTag::Other => {}
            }
        }
        self.store_emojis(ap_note).await;

        let reply = match &ap_note.in_reply_to {
            Some(target) => find_note_by_ap_id(self.stores.notes.as_ref(), &self.base_url, target.id()).await?,
            None => None,
        };
        if reply.is_none() && ap_note.in_reply_to.is_some() {
            debug!(uri = %uri, "Reply target not stored locally");
        }
        let quote = match ap_note.quote_target() {
            Some(target) => find_note_by_ap_id(self.stores.notes.as_ref(), &self.base_url, target).await?,
            None => None,
        };

        let sensitive = ap_note.sensitive.unwrap_or(false);
        let mut file_ids = Vec::new();
        for attachment in ap_note.attachments() {
            match self.store_attachment(attachment, &author.id, author.host.as_deref(), sensitive).await {
                Ok(Some(file)) => file_ids.push(file.id),
                Ok(None) => {}
                Err(e) => warn!(uri = %uri, error = %e, "Failed to store attachment, skipping"),
            }
        }

        let note = Note {
            id: self.id_gen.generate(),
            user_id: author.id.clone(),
            user_host: author.host.clone(),
            text,
            cw,
            visibility,
            local_only: false,
            reply_id: reply.as_ref().map(|r| r.id.clone()),
            renote_id: quote.map(|q| q.id),
            mentions,
            visible_user_ids,
            tags,
            emojis,
            file_ids,
            uri: Some(uri.clone()),
            url: ap_note.html_url().filter(|u| *u != uri).map(str::to_string),
            replies_count: 0,
            created_at: ap_note.published.unwrap_or_else(Utc::now),
        };

        let note = match self.stores.notes.create(note).await {
            Ok(note) => note,
            Err(AppError::AlreadyExists(_)) => {
                debug!(uri = %uri, "Note stored concurrently, using existing record");
                return self
                    .stores
                    .notes
                    .find_by_uri(&uri)
                    .await?
                    .ok_or_else(|| AppError::NotFound(uri.clone()));
            }
            Err(e) => return Err(e),
        };

        if let Some(reply) = &reply
            && let Err(e) = self.stores.notes.increment_replies_count(&reply.id).await
        {
            warn!(note_id = %reply.id, error = %e, "Failed to increment reply count");
        }

        info!(
            note_id = %note.id,
            uri = %uri,
            user_id = %note.user_id,
            visibility = %note.visibility,
            "Ingested remote note"
        );
        Ok(note)
    }

    /// Local ids of mentioned users; for direct notes also every addressee.
    async fn resolve_mentions(&self, ap_note: &ApNote, visibility: Visibility) -> Vec<String> {
        let mut targets: Vec<&str> = ap_note
            .tags()
            .filter_map(|tag| match tag {
                ApTag::Mention { href: Some(href), .. } => Some(href.as_str()),
                _ => None,
            })
            .collect();
        if visibility == Visibility::Specified {
            targets.extend(
                ap_note
                    .to_addresses()
                    .filter(|addr| !is_public_address(addr) && !addr.ends_with("/followers")),
            );
        }

        let mut ids: Vec<String> = Vec::new();
        let mut seen: Vec<&str> = Vec::new();
        for target in targets {
            if seen.contains(&target) {
                continue;
            }
            seen.push(target);
            // Local addressees are looked up, never fetched from ourselves
            let resolved = if local_user_id(&self.base_url, target).is_some() {
                find_user_by_ap_id(self.stores.users.as_ref(), &self.base_url, target)
                    .await
                    .and_then(|user| user.ok_or_else(|| AppError::NotFound(format!("local user {target}"))))
            } else {
                self.resolver.resolve_actor(target).await
            };
            match resolved {
                Ok(user) if !ids.contains(&user.id) => ids.push(user.id),
                Ok(_) => {}
                Err(e) => warn!(actor = %target, error = %e, "Could not resolve mention, skipping"),
            }
        }
        ids
    }

    /// Best-effort upsert of every `Emoji` tag under the note's host.
    async fn store_emojis(&self, ap_note: &ApNote) {
        let Some(host) = ap_note.id.host_str() else {
            return;
        };
        let upserts = ap_note.tags().filter_map(|tag| match tag {
            ApTag::Emoji(emoji) => Some(async move {
                let result = upsert_remote_emoji(
                    self.stores.emojis.as_ref(),
                    &self.id_gen,
                    &emoji.name,
                    host,
                    &emoji.icon.url,
                )
                .await;
                (emoji.name.as_str(), result)
            }),
            _ => None,
        });

        for (name, result) in join_all(upserts).await {
            if let Err(e) = result {
                warn!(emoji = %name, host = %host, error = %e, "Failed to store remote emoji");
            }
        }
    }

    /// Link a remote file. Attachments without a URL or media type are ignored.
    async fn store_attachment(
        &self,
        attachment: &ApAttachment,
        user_id: &str,
        user_host: Option<&str>,
        note_sensitive: bool,
    ) -> AppResult<Option<DriveFile>> {
        if attachment.kind == AttachmentKind::Other {
            return Ok(None);
        }
        let (Some(url), Some(media_type)) = (attachment.href(), attachment.media_type.as_deref()) else {
            return Ok(None);
        };

        let file = DriveFile {
            id: self.id_gen.generate(),
            user_id: user_id.to_string(),
            user_host: user_host.map(str::to_string),
            name: file_name(url, attachment.name.as_deref()),
            content_type: media_type.to_string(),
            url: url.to_string(),
            comment: attachment.name.clone(),
            is_sensitive: note_sensitive || attachment.sensitive.unwrap_or(false),
            is_link: true,
            created_at: Utc::now(),
        };
        self.stores.drive_files.create(file).await.map(Some)
    }
}

/// Last URL path segment, else the attachment name, else a generic default.
fn file_name(url: &str, name: Option<&str>) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|segment| !segment.is_empty())
        .or_else(|| name.map(str::to_string).filter(|n| !n.is_empty()))
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string())
}
