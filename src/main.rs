//! Pushem CLI - manage topic subscriptions and publish web push notifications.
//!
//! This is the main binary entry point. See the `pushem` library for the
//! delivery engine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use pushem::notifications::{KeyStore, TokenSigner, WebPushTransport};
use pushem::store::KeyMaterial;
use pushem::{Config, Dispatcher, NotificationPayload, SqliteStore, SubscriberStore};

#[derive(Parser)]
#[command(name = "pushem")]
#[command(version, about = "Topic-based Web Push notifications", long_about = None)]
struct Cli {
    /// Path to a JSON config file (default: ./pushem.json if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the VAPID public key browsers subscribe with (creates keys on first run).
    Keys,
    /// Register a browser push subscription for a topic.
    Subscribe {
        /// Topic name.
        topic: String,
        /// Push endpoint URL from the browser's PushSubscription.
        #[arg(long)]
        endpoint: String,
        /// Browser P-256 ECDH public key (base64url).
        #[arg(long)]
        p256dh: String,
        /// Browser auth secret (base64url).
        #[arg(long)]
        auth: String,
    },
    /// Remove a subscription from a topic.
    Unsubscribe {
        /// Topic name.
        topic: String,
        /// Push endpoint URL to remove.
        #[arg(long)]
        endpoint: String,
    },
    /// Send a notification to every subscriber of a topic.
    Publish {
        /// Topic name.
        topic: String,
        /// Notification body.
        message: String,
        /// Notification title.
        #[arg(long, default_value = "")]
        title: String,
        /// URL opened when the notification is clicked.
        #[arg(long)]
        click_url: Option<String>,
    },
    /// List topics with their subscriber counts.
    Topics,
    /// Delete a topic and all of its subscriptions.
    DeleteTopic {
        /// Topic name.
        topic: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Commands::Keys = cli.command {
        let keys = KeyStore::new(&config.key_file)
            .load_or_create()
            .context("Failed to initialize VAPID keys")?;
        println!("{}", keys.public_key_base64url());
        return Ok(());
    }

    let store = Arc::new(
        SqliteStore::open(&config.database_path)
            .await
            .context("Failed to open subscriber database")?,
    );
    let result = run_store_command(cli.command, &config, &store).await;
    store.close().await;
    result
}

/// Commands that need the subscriber database.
async fn run_store_command(
    command: Commands,
    config: &Config,
    store: &Arc<SqliteStore>,
) -> Result<()> {
    match command {
        Commands::Keys => {}
        Commands::Subscribe {
            topic,
            endpoint,
            p256dh,
            auth,
        } => {
            store
                .upsert(&topic, &endpoint, KeyMaterial { p256dh, auth })
                .await
                .context("Failed to save subscription")?;
            log::info!("Subscribed to topic '{}': {}", topic, endpoint);
            println!("{}", serde_json::json!({ "status": "subscribed" }));
        }
        Commands::Unsubscribe { topic, endpoint } => {
            let removed = store
                .unsubscribe(&topic, &endpoint)
                .await
                .context("Failed to remove subscription")?;
            println!("{}", serde_json::json!({ "removed": removed }));
        }
        Commands::Publish {
            topic,
            message,
            title,
            click_url,
        } => {
            let store: Arc<dyn SubscriberStore> = store.clone();
            let dispatcher = build_dispatcher(config, store)?;
            let payload = NotificationPayload::new(title, message, click_url);
            let tally = dispatcher
                .publish(&topic, &payload)
                .await
                .context("Failed to publish")?;
            println!("{}", serde_json::to_string(&tally)?);
        }
        Commands::Topics => {
            let topics = store.list_topics().await.context("Failed to list topics")?;
            println!("{}", serde_json::to_string_pretty(&topics)?);
        }
        Commands::DeleteTopic { topic } => {
            let removed = store
                .delete_topic(&topic)
                .await
                .context("Failed to delete topic")?;
            println!("{}", serde_json::json!({ "deleted": topic, "subscriptions": removed }));
        }
    }
    Ok(())
}

/// Wire keys, signer and transport into a dispatcher.
fn build_dispatcher(config: &Config, store: Arc<dyn SubscriberStore>) -> Result<Dispatcher> {
    let keys = KeyStore::new(&config.key_file)
        .load_or_create()
        .context("Failed to initialize VAPID keys")?;
    let signer = TokenSigner::new(Arc::new(keys), &config.vapid_subject, config.token_lifetimes());
    let transport = WebPushTransport::new(config.request_timeout(), config.message_ttl_secs)
        .context("Failed to build push transport")?;

    Ok(Dispatcher::new(store, Arc::new(transport), Arc::new(signer))
        .with_max_concurrent(config.max_concurrent_pushes))
}
