//! fedigate command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use fedigate_common::{Config, RsaSha256Signer};
use fedigate_federation::{
    ActorFetcher, FetchOptions, HostRateLimiter, MemoryStore, NoteIngester, ReactionIngester,
    RemoteFetchClient, Stores,
};
use fedigate_federation::store::UserStore;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

#[derive(Parser)]
#[command(name = "fedigate", version)]
#[command(about = "ActivityPub federation tools", long_about = None)]
struct Cli {
    /// Configuration file, used instead of `config/` (FEDIGATE__* variables still apply)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a remote note, ingest it and pull its reactions
    Inspect {
        /// Note URI, e.g. https://misskey.example/notes/9abc
        url: String,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fedigate=debug".into());
    let json = std::env::var("FEDIGATE_LOG_FORMAT").is_ok_and(|format| format == "json");

    // stdout carries the command output
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };

    match cli.command {
        Command::Inspect { url } => inspect(&config, &url).await,
    }
}

/// Ingest `url` into in-memory stores and print the note, its author and its
/// reactions as JSON.
async fn inspect(config: &Config, url: &str) -> anyhow::Result<()> {
    if !config.federation.enabled {
        bail!("federation is disabled");
    }
    let base_url = Url::parse(&config.server.url).context("Invalid server.url")?;

    let store = MemoryStore::new();
    let stores = Stores::memory(&store);
    let client = RemoteFetchClient::from_config(config, Arc::new(RsaSha256Signer::new()))?;
    let options = FetchOptions::from_config(config);
    let limiter = HostRateLimiter::new((&config.federation.rate_limit).into());
    info!(user_agent = %client.user_agent(), url = %url, "Inspecting remote note");

    let resolver = ActorFetcher::new(stores.users.clone(), client.clone(), options.clone());
    let notes = NoteIngester::new(
        stores.clone(),
        Arc::new(resolver),
        client.clone(),
        options.clone(),
        &base_url,
    );
    let note = notes.ingest_note_by_uri(url).await?;

    let reactions = ReactionIngester::new(
        stores.clone(),
        client,
        limiter,
        options,
        config.federation.likes.clone(),
        &base_url,
    );
    let summary = reactions.fetch_remote_likes(&note.id).await?.unwrap_or_default();
    let author = stores.users.find_by_id(&note.user_id).await?;

    let output = json!({
        "note": note,
        "author": author,
        "reactions": summary,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
