//! Remote actor resolution over HTTP.

use async_trait::async_trait;
use fedigate_common::{AppError, AppResult, IdGenerator};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::client::{FetchOptions, RemoteFetchClient};
use crate::html::strip_html;
use crate::model::LocalUser;
use crate::objects::{ApActor, ApObject};
use crate::store::{ActorResolver, UserStore};

/// Resolves actor URIs to local users, fetching and storing unknown actors.
#[derive(Clone)]
pub struct ActorFetcher {
    users: Arc<dyn UserStore>,
    client: RemoteFetchClient,
    options: FetchOptions,
    id_gen: IdGenerator,
}

impl ActorFetcher {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, client: RemoteFetchClient, options: FetchOptions) -> Self {
        Self {
            users,
            client,
            options,
            id_gen: IdGenerator::new(),
        }
    }

    fn shadow_user(&self, actor: &ApActor, actor_url: &Url) -> AppResult<LocalUser> {
        let host = actor_url
            .host_str()
            .ok_or_else(|| AppError::ResolutionFailed(format!("{actor_url}: no host")))?;
        let username = actor
            .preferred_username
            .clone()
            .ok_or_else(|| AppError::ResolutionFailed(format!("{actor_url}: missing preferredUsername")))?;

        Ok(LocalUser {
            id: self.id_gen.generate(),
            username,
            host: Some(host.to_string()),
            name: actor.name.clone(),
            description: actor.summary.as_deref().map(strip_html),
            uri: Some(actor_url.to_string()),
            inbox: actor.inbox.clone(),
            shared_inbox: actor.shared_inbox().map(str::to_string),
        })
    }
}

#[async_trait]
impl ActorResolver for ActorFetcher {
    async fn resolve_actor(&self, uri: &str) -> AppResult<LocalUser> {
        if let Some(user) = self.users.find_by_uri(uri).await? {
            debug!(actor_url = %uri, "Found existing remote actor");
            return Ok(user);
        }

        let actor_url =
            Url::parse(uri).map_err(|e| AppError::ResolutionFailed(format!("{uri}: {e}")))?;

        info!(actor_url = %uri, "Fetching remote actor");
        let object: ApObject = self
            .client
            .fetch(uri, &self.options)
            .await
            .map_err(|e| AppError::ResolutionFailed(format!("{uri}: {e}")))?;
        let actor = object.as_actor().ok_or_else(|| {
            AppError::ResolutionFailed(format!("{uri}: expected an actor, got {}", object.kind()))
        })?;

        let user = self.shadow_user(actor, &actor_url)?;
        match self.users.create(user).await {
            Ok(user) => {
                info!(user_id = %user.id, acct = %user.acct(), "Created remote user");
                Ok(user)
            }
            // Another task stored the same actor first
            Err(AppError::AlreadyExists(_)) => self
                .users
                .find_by_uri(uri)
                .await?
                .ok_or_else(|| AppError::ResolutionFailed(uri.to_string())),
            Err(e) => Err(e),
        }
    }
}
