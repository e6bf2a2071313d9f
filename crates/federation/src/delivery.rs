//! Outbound delivery composition.
//!
//! [`DeliveryComposer`] turns local events into activities, resolves the
//! inboxes that should receive them and hands one [`DeliveryJob`] per inbox
//! to the [`DeliveryQueue`]. Sending, signing and retrying belong to the queue.
//!
//! Composition never fails the caller's action: problems are logged and
//! reported through [`DeliveryOutcome`], which callers are free to ignore.

#![allow(missing_docs)]

use async_trait::async_trait;
use fedigate_common::{AppError, AppResult, IdGenerator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, warn};
use url::Url;

use crate::activities::{Activity, ActivityKind, ActivityObject};
use crate::html;
use crate::model::{LocalUser, Note, Visibility};
use crate::objects::{
    ApActor, ApAttachment, ApEmoji, ApEndpoints, ApImage, ApNote, ApObject, ApPublicKey, ApTag,
    AttachmentKind, IdRef, LinkRef, OneOrMany, PUBLIC,
};
use crate::store::Stores;

/// A job for the delivery queue.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub activity: Value,
    pub inbox_url: String,
    /// `{actorUri}#main-key`
    pub key_id: String,
    /// PKCS#8 PEM, used by the queue to sign at send time.
    pub private_key: String,
}

impl fmt::Debug for DeliveryJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryJob")
            .field("activity_id", &self.activity.get("id"))
            .field("inbox_url", &self.inbox_url)
            .field("key_id", &self.key_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Accepts delivery jobs. Implemented by the job queue.
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    async fn enqueue(&self, job: DeliveryJob) -> AppResult<()>;
}

/// Queue that drops every job, for instances with federation disabled.
#[derive(Clone, Default)]
pub struct NoOpDeliveryQueue;

#[async_trait]
impl DeliveryQueue for NoOpDeliveryQueue {
    async fn enqueue(&self, job: DeliveryJob) -> AppResult<()> {
        debug!(inbox = %job.inbox_url, "Federation disabled, dropping delivery job");
        Ok(())
    }
}

/// A local event that may need federating.
#[derive(Clone, Debug)]
pub enum DeliveryEvent {
    /// A note was posted. Renotes are notes with `renote_id` set.
    NoteCreated(Note),
    NoteDeleted(Note),
    /// The actor reacted to `note`.
    ReactionAdded {
        note: Note,
        reaction: String,
        /// Image of a custom emoji reaction.
        emoji_url: Option<String>,
    },
    ReactionRemoved {
        note: Note,
        reaction: String,
        emoji_url: Option<String>,
    },
    ProfileUpdated,
    AccountDeleted,
}

impl DeliveryEvent {
    const fn name(&self) -> &'static str {
        match self {
            Self::NoteCreated(_) => "note_created",
            Self::NoteDeleted(_) => "note_deleted",
            Self::ReactionAdded { .. } => "reaction_added",
            Self::ReactionRemoved { .. } => "reaction_removed",
            Self::ProfileUpdated => "profile_updated",
            Self::AccountDeleted => "account_deleted",
        }
    }
}

/// Why nothing was delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    RemoteActor,
    LocalOnly,
    NotFederated(Visibility),
    /// The reacted-to note belongs to this instance.
    LocalTarget,
    NoRecipients,
    MissingKeypair,
    MissingTarget(String),
    Failed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteActor => f.write_str("actor is remote"),
            Self::LocalOnly => f.write_str("note is local-only"),
            Self::NotFederated(visibility) => write!(f, "visibility {visibility} is not federated"),
            Self::LocalTarget => f.write_str("target note is local"),
            Self::NoRecipients => f.write_str("no remote recipients"),
            Self::MissingKeypair => f.write_str("actor has no keypair"),
            Self::MissingTarget(what) => write!(f, "missing {what}"),
            Self::Failed(message) => write!(f, "composition failed: {message}"),
        }
    }
}

impl From<AppError> for SkipReason {
    fn from(err: AppError) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Result of [`DeliveryComposer::deliver`]. Informational only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Skipped(SkipReason),
    Queued { queued: usize, failed: usize },
}

/// An activity and the inboxes it goes to.
#[derive(Clone, Debug)]
pub struct Composed {
    pub activity: Activity,
    pub inboxes: BTreeSet<String>,
}

/// Builds activities for local events and enqueues them.
#[derive(Clone)]
pub struct DeliveryComposer<Q> {
    stores: Stores,
    queue: Q,
    base_url: String,
    id_gen: IdGenerator,
}

impl<Q: DeliveryQueue> DeliveryComposer<Q> {
    #[must_use]
    pub fn new(stores: Stores, queue: Q, base_url: &Url) -> Self {
        Self {
            stores,
            queue,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            id_gen: IdGenerator::new(),
        }
    }

    /// Compose and enqueue. Never fails; the outcome may be discarded.
    pub async fn deliver(&self, actor: &LocalUser, event: DeliveryEvent) -> DeliveryOutcome {
        let event_name = event.name();
        let composed = match self.compose(actor, &event).await {
            Ok(composed) => composed,
            Err(reason) => {
                match &reason {
                    SkipReason::Failed(_) | SkipReason::MissingTarget(_) => {
                        warn!(user_id = %actor.id, event = event_name, reason = %reason, "Delivery skipped");
                    }
                    _ => debug!(user_id = %actor.id, event = event_name, reason = %reason, "Delivery skipped"),
                }
                return DeliveryOutcome::Skipped(reason);
            }
        };

        let keypair = match self.stores.keypairs.find_by_user_id(&actor.id).await {
            Ok(Some(keypair)) => keypair,
            Ok(None) => {
                warn!(user_id = %actor.id, "No keypair for local user, not delivering");
                return DeliveryOutcome::Skipped(SkipReason::MissingKeypair);
            }
            Err(e) => {
                warn!(user_id = %actor.id, error = %e, "Keypair lookup failed");
                return DeliveryOutcome::Skipped(e.into());
            }
        };

        let activity = match composed.activity.to_value() {
            Ok(value) => value,
            Err(e) => {
                warn!(user_id = %actor.id, error = %e, "Failed to serialize activity");
                return DeliveryOutcome::Skipped(SkipReason::Failed(e.to_string()));
            }
        };
        let key_id = format!("{}#main-key", self.actor_url(actor));

        let mut queued = 0;
        let mut failed = 0;
        for inbox in composed.inboxes {
            let job = DeliveryJob {
                activity: activity.clone(),
                inbox_url: inbox,
                key_id: key_id.clone(),
                private_key: keypair.private_key_pem.clone(),
            };
            let inbox_url = job.inbox_url.clone();
            match self.queue.enqueue(job).await {
                Ok(()) => queued += 1,
                Err(e) => {
                    failed += 1;
                    warn!(inbox = %inbox_url, error = %e, "Failed to enqueue delivery");
                }
            }
        }

        info!(
            user_id = %actor.id,
            event = event_name,
            activity_type = ?composed.activity.kind,
            queued,
            failed,
            "Queued activity delivery"
        );
        DeliveryOutcome::Queued { queued, failed }
    }

    /// Build the activity for `event` and resolve its inboxes.
    pub async fn compose(&self, actor: &LocalUser, event: &DeliveryEvent) -> Result<Composed, SkipReason> {
        if actor.is_remote() {
            return Err(SkipReason::RemoteActor);
        }

        let composed = match event {
            DeliveryEvent::NoteCreated(note) => {
                check_federated(note)?;
                if note.is_pure_renote() {
                    self.compose_announce(actor, note).await?
                } else {
                    self.compose_create(actor, note).await?
                }
            }
            DeliveryEvent::NoteDeleted(note) => {
                check_federated(note)?;
                if note.is_pure_renote() {
                    self.compose_undo_announce(actor, note).await?
                } else {
                    self.compose_delete_note(actor, note).await?
                }
            }
            DeliveryEvent::ReactionAdded { note, reaction, emoji_url } => {
                let like = self.like_activity(actor, note, reaction, emoji_url.as_deref(), true)?;
                Composed {
                    activity: like,
                    inboxes: self.author_inbox(note).await?,
                }
            }
            DeliveryEvent::ReactionRemoved { note, reaction, emoji_url } => {
                let like = self.like_activity(actor, note, reaction, emoji_url.as_deref(), false)?;
                let actor_url = self.actor_url(actor);
                let undo = Activity::new(
                    ActivityKind::Undo,
                    format!("{actor_url}/undo/{}", self.id_gen.generate()),
                    actor_url,
                    ActivityObject::Activity(Box::new(like)),
                );
                Composed {
                    activity: undo,
                    inboxes: self.author_inbox(note).await?,
                }
            }
            DeliveryEvent::ProfileUpdated => self.compose_update_profile(actor).await?,
            DeliveryEvent::AccountDeleted => {
                let actor_url = self.actor_url(actor);
                let delete = Activity::new(
                    ActivityKind::Delete,
                    format!("{actor_url}/delete/{}", self.id_gen.generate()),
                    actor_url.clone(),
                    ActivityObject::Uri(actor_url.clone()),
                )
                .to(vec![PUBLIC.to_string()])
                .cc(vec![format!("{actor_url}/followers")]);
                Composed {
                    activity: delete,
                    inboxes: self.follower_inboxes(actor).await?,
                }
            }
        };

        if composed.inboxes.is_empty() {
            return Err(SkipReason::NoRecipients);
        }
        Ok(composed)
    }

    async fn compose_create(&self, actor: &LocalUser, note: &Note) -> Result<Composed, SkipReason> {
        let recipients = self.direct_recipients(note).await?;
        let ap_note = self.build_note(actor, note, &recipients).await?;
        let (to, cc) = (
            ap_note.to.iter().flat_map(OneOrMany::iter).cloned().collect(),
            ap_note.cc.iter().flat_map(OneOrMany::iter).cloned().collect(),
        );
        let note_url = self.note_url(note);

        let activity = Activity::new(
            ActivityKind::Create,
            format!("{note_url}/activity"),
            self.actor_url(actor),
            ActivityObject::Object(Box::new(ApObject::Note(ap_note))),
        )
        .to(to)
        .cc(cc)
        .published(note.created_at);

        let inboxes = self.recipient_inboxes(actor, note, &recipients).await?;
        Ok(Composed { activity, inboxes })
    }

    async fn compose_announce(&self, actor: &LocalUser, note: &Note) -> Result<Composed, SkipReason> {
        let (activity, recipients) = self.announce_activity(actor, note, true).await?;
        let inboxes = self.recipient_inboxes(actor, note, &recipients).await?;
        Ok(Composed { activity, inboxes })
    }

    async fn compose_undo_announce(&self, actor: &LocalUser, note: &Note) -> Result<Composed, SkipReason> {
        let (announce, recipients) = self.announce_activity(actor, note, false).await?;
        let actor_url = self.actor_url(actor);
        let undo = Activity::new(
            ActivityKind::Undo,
            format!("{actor_url}/undo/{}", self.id_gen.generate()),
            actor_url,
            ActivityObject::Activity(Box::new(announce.clone())),
        )
        .to(announce.to)
        .cc(announce.cc);

        let inboxes = self.recipient_inboxes(actor, note, &recipients).await?;
        Ok(Composed { activity: undo, inboxes })
    }

    async fn compose_delete_note(&self, actor: &LocalUser, note: &Note) -> Result<Composed, SkipReason> {
        let actor_url = self.actor_url(actor);
        let recipients = self.direct_recipients(note).await?;
        let (to, cc) = self.addressing(actor, note, &recipients);

        let activity = Activity::new(
            ActivityKind::Delete,
            format!("{actor_url}/delete/{}", self.id_gen.generate()),
            actor_url,
            ActivityObject::Object(Box::new(ApObject::Tombstone {
                id: self.note_url(note),
            })),
        )
        .to(to)
        .cc(cc);

        let inboxes = self.recipient_inboxes(actor, note, &recipients).await?;
        Ok(Composed { activity, inboxes })
    }

    async fn compose_update_profile(&self, actor: &LocalUser) -> Result<Composed, SkipReason> {
        let actor_url = self.actor_url(actor);
        let public_key = self
            .stores
            .keypairs
            .find_by_user_id(&actor.id)
            .await?
            .map(|keypair| ApPublicKey {
                id: format!("{actor_url}#main-key"),
                owner: actor_url.clone(),
                public_key_pem: keypair.public_key_pem,
            });

        let person = ApActor {
            id: actor_url.clone(),
            preferred_username: Some(actor.username.clone()),
            name: actor.name.clone(),
            summary: actor.description.as_deref().map(html::to_html),
            inbox: Some(format!("{actor_url}/inbox")),
            outbox: Some(format!("{actor_url}/outbox")),
            followers: Some(format!("{actor_url}/followers")),
            endpoints: Some(ApEndpoints {
                shared_inbox: Some(format!("{}/inbox", self.base_url)),
            }),
            public_key,
        };

        let activity = Activity::new(
            ActivityKind::Update,
            format!("{actor_url}/update/{}", self.id_gen.generate()),
            actor_url.clone(),
            ActivityObject::Object(Box::new(ApObject::Person(person))),
        )
        .to(vec![PUBLIC.to_string()])
        .cc(vec![format!("{actor_url}/followers")]);

        Ok(Composed {
            activity,
            inboxes: self.follower_inboxes(actor).await?,
        })
    }

    /// The Announce of `note`'s renote target and its recipients, which
    /// include the target's remote author.
    async fn announce_activity(
        &self,
        actor: &LocalUser,
        note: &Note,
        top_level: bool,
    ) -> Result<(Activity, Vec<LocalUser>), SkipReason> {
        let renote_id = note
            .renote_id
            .as_deref()
            .ok_or_else(|| SkipReason::MissingTarget("renote target".to_string()))?;
        let target = self
            .stores
            .notes
            .find_by_id(renote_id)
            .await?
            .ok_or_else(|| SkipReason::MissingTarget(format!("renoted note {renote_id}")))?;

        let mut recipients = self.direct_recipients(note).await?;
        let (to, mut cc) = self.addressing(actor, note, &recipients);
        if let Some(author) = self.renote_author(&target).await? {
            if note.visibility == Visibility::Public
                && let Some(author_uri) = &author.uri
            {
                cc.push(author_uri.clone());
            }
            recipients.push(author);
        }

        let id = format!("{}/activity", self.note_url(note));
        let object = ActivityObject::Uri(self.note_url(&target));
        let activity = if top_level {
            Activity::new(ActivityKind::Announce, id, self.actor_url(actor), object)
        } else {
            Activity::embedded(ActivityKind::Announce, id, self.actor_url(actor), object)
        };
        Ok((activity.to(to).cc(cc).published(note.created_at), recipients))
    }

    fn like_activity(
        &self,
        actor: &LocalUser,
        note: &Note,
        reaction: &str,
        emoji_url: Option<&str>,
        top_level: bool,
    ) -> Result<Activity, SkipReason> {
        // Likes on local notes are handled without federation
        let Some(note_uri) = note.uri.clone().filter(|_| note.is_remote()) else {
            return Err(SkipReason::LocalTarget);
        };

        let actor_url = self.actor_url(actor);
        let emoji = match (reaction.strip_prefix(':').and_then(|r| r.strip_suffix(':')), emoji_url) {
            (Some(name), Some(url)) if !name.is_empty() => Some(self.emoji_tag(name, url)),
            _ => None,
        };

        let id = format!("{actor_url}/likes/{}", note.id);
        let like = if top_level {
            Activity::new(ActivityKind::Like, id, actor_url, ActivityObject::Uri(note_uri))
        } else {
            Activity::embedded(ActivityKind::Like, id, actor_url, ActivityObject::Uri(note_uri))
        };
        Ok(like.reaction(reaction, emoji))
    }

    async fn build_note(&self, actor: &LocalUser, note: &Note, recipients: &[LocalUser]) -> Result<ApNote, SkipReason> {
        let actor_url = self.actor_url(actor);
        let note_url = self.note_url(note);
        let id = Url::parse(&note_url).map_err(|e| SkipReason::Failed(format!("{note_url}: {e}")))?;
        let (to, cc) = self.addressing(actor, note, recipients);

        let in_reply_to = match &note.reply_id {
            Some(reply_id) => self
                .stores
                .notes
                .find_by_id(reply_id)
                .await?
                .map(|reply| IdRef::Uri(self.note_url(&reply))),
            None => None,
        };
        let quote = match &note.renote_id {
            Some(renote_id) => self
                .stores
                .notes
                .find_by_id(renote_id)
                .await?
                .map(|quoted| self.note_url(&quoted)),
            None => None,
        };

        let mut tags = Vec::new();
        for user_id in &note.mentions {
            if let Some(user) = self.stores.users.find_by_id(user_id).await? {
                tags.push(ApTag::Mention {
                    href: Some(self.user_url(&user)),
                    name: Some(user.acct()),
                });
            }
        }
        for tag in &note.tags {
            tags.push(ApTag::Hashtag {
                name: format!("#{tag}"),
                href: Some(format!("{}/tags/{tag}", self.base_url)),
            });
        }
        for name in &note.emojis {
            match self.stores.emojis.find_by_name(name, None).await? {
                Some(emoji) => tags.push(self.emoji_tag(&emoji.name, &emoji.url)),
                None => debug!(emoji = %name, "Unknown local emoji, not tagged"),
            }
        }

        let mut attachments = Vec::new();
        let mut sensitive = note.cw.is_some();
        for file_id in &note.file_ids {
            let Some(file) = self.stores.drive_files.find_by_id(file_id).await? else {
                warn!(file_id = %file_id, note_id = %note.id, "Attached file not found");
                continue;
            };
            sensitive |= file.is_sensitive;
            attachments.push(ApAttachment {
                kind: AttachmentKind::Document,
                url: Some(OneOrMany::One(LinkRef::Uri(file.url))),
                media_type: Some(file.content_type),
                name: file.comment,
                sensitive: Some(file.is_sensitive),
                blurhash: None,
            });
        }

        Ok(ApNote {
            id,
            attributed_to: OneOrMany::One(IdRef::Uri(actor_url)),
            content: Some(html::to_html(note.text.as_deref().unwrap_or_default())),
            summary: note.cw.clone(),
            sensitive: Some(sensitive),
            published: Some(note.created_at),
            url: None,
            to: Some(to.into()),
            cc: Some(cc.into()),
            in_reply_to,
            tag: (!tags.is_empty()).then(|| tags.into()),
            attachment: (!attachments.is_empty()).then(|| attachments.into()),
            likes: None,
            reactions: None,
            quote_url: quote.clone(),
            quote_uri: None,
            misskey_quote: quote,
            misskey_content: note.text.clone(),
        })
    }

    /// `(to, cc)` for a federated note.
    fn addressing(&self, actor: &LocalUser, note: &Note, recipients: &[LocalUser]) -> (Vec<String>, Vec<String>) {
        let recipient_urls = recipients.iter().map(|u| self.user_url(u));
        match note.visibility {
            Visibility::Specified => (recipient_urls.collect(), Vec::new()),
            _ => {
                let mut cc = vec![format!("{}/followers", self.actor_url(actor))];
                cc.extend(recipient_urls);
                (vec![PUBLIC.to_string()], cc)
            }
        }
    }

    /// Mentioned users, plus the addressees of a `specified` note.
    async fn direct_recipients(&self, note: &Note) -> Result<Vec<LocalUser>, SkipReason> {
        let ids: BTreeSet<&String> = match note.visibility {
            Visibility::Specified => note.mentions.iter().chain(&note.visible_user_ids).collect(),
            _ => note.mentions.iter().collect(),
        };

        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            match self.stores.users.find_by_id(id).await? {
                Some(user) => users.push(user),
                None => debug!(user_id = %id, note_id = %note.id, "Recipient not found"),
            }
        }
        Ok(users)
    }

    async fn renote_author(&self, target: &Note) -> Result<Option<LocalUser>, SkipReason> {
        Ok(self
            .stores
            .users
            .find_by_id(&target.user_id)
            .await?
            .filter(LocalUser::is_remote))
    }

    /// Followers for public notes plus the personal inboxes of remote recipients.
    async fn recipient_inboxes(
        &self,
        actor: &LocalUser,
        note: &Note,
        recipients: &[LocalUser],
    ) -> Result<BTreeSet<String>, SkipReason> {
        let mut inboxes = if note.visibility == Visibility::Specified {
            BTreeSet::new()
        } else {
            self.follower_inboxes(actor).await?
        };
        inboxes.extend(
            recipients
                .iter()
                .filter(|u| u.is_remote())
                .filter_map(|u| u.inbox.clone().or_else(|| u.shared_inbox.clone())),
        );
        Ok(inboxes)
    }

    /// Deduplicated inboxes of remote followers, preferring shared inboxes.
    async fn follower_inboxes(&self, actor: &LocalUser) -> Result<BTreeSet<String>, SkipReason> {
        let followers = self.stores.following.find_followers(&actor.id).await?;
        let inboxes: BTreeSet<String> = followers
            .into_iter()
            .filter(LocalUser::is_remote)
            .filter_map(|f| f.shared_inbox.or(f.inbox))
            .collect();

        debug!(user_id = %actor.id, inbox_count = inboxes.len(), "Collected follower inboxes");
        Ok(inboxes)
    }

    async fn author_inbox(&self, note: &Note) -> Result<BTreeSet<String>, SkipReason> {
        let author = self
            .stores
            .users
            .find_by_id(&note.user_id)
            .await?
            .ok_or_else(|| SkipReason::MissingTarget(format!("author of note {}", note.id)))?;
        Ok(author
            .inbox
            .or(author.shared_inbox)
            .into_iter()
            .collect())
    }

    fn emoji_tag(&self, name: &str, url: &str) -> ApTag {
        let name = name.trim_matches(':');
        ApTag::Emoji(ApEmoji {
            id: Some(format!("{}/emojis/{name}", self.base_url)),
            name: format!(":{name}:"),
            icon: ApImage {
                kind: "Image".to_string(),
                url: url.to_string(),
                media_type: None,
            },
            updated: None,
        })
    }

    fn actor_url(&self, user: &LocalUser) -> String {
        format!("{}/users/{}", self.base_url, user.id)
    }

    /// Actor URI of any user, local or remote.
    fn user_url(&self, user: &LocalUser) -> String {
        match (&user.uri, user.is_remote()) {
            (Some(uri), true) => uri.clone(),
            _ => self.actor_url(user),
        }
    }

    /// AP id of any note, local or remote.
    fn note_url(&self, note: &Note) -> String {
        match &note.uri {
            Some(uri) if note.is_remote() => uri.clone(),
            _ => format!("{}/notes/{}", self.base_url, note.id),
        }
    }
}

fn check_federated(note: &Note) -> Result<(), SkipReason> {
    if note.local_only {
        return Err(SkipReason::LocalOnly);
    }
    if !note.visibility.is_federated() {
        return Err(SkipReason::NotFederated(note.visibility));
    }
    Ok(())
}
