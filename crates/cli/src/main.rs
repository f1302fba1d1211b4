mod command;
mod event;
mod render;
mod repl;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use quill_channel::api::{ApiClient, Backend, Credentials, StaticCredentials};
use quill_channel::http::RestClient;
use quill_channel::session::{ChannelSession, WsConnector};
use quill_core::config::QuillCfg;
use quill_core::conversation::ConversationController;
use quill_core::prompts;
use quill_core::router::FrameRouter;
use quill_core::table::{ASSOCIATE_TABLE, MANAGER_TABLE_PREFIX, TableController};
use quill_core::ui::UiStore;

const CATEGORIES: [&str; 2] = ["achievement", "challenge"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Arc::new(QuillCfg::from_env());

    // Tracing: write to file when RUST_LOG is set so it stays out of the REPL
    if std::env::var("RUST_LOG").is_ok() {
        let file = std::fs::File::create(&cfg.log_file)
            .with_context(|| format!("cannot create log file {}", cfg.log_file))?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(fmt::layer().json().with_target(true).with_writer(file))
            .init();
    }

    let category = std::env::args().nth(1).unwrap_or_else(|| CATEGORIES[0].to_owned()).to_lowercase();
    if prompts::start_message(&category).is_empty() {
        anyhow::bail!("unknown category {category:?}, expected one of {CATEGORIES:?}");
    }

    let endpoint = Url::parse(&cfg.channel_url)
        .with_context(|| format!("QUILL_CHANNEL_URL is not a valid url: {:?}", cfg.channel_url))?;
    if cfg.api_base_url.is_empty() {
        tracing::warn!("QUILL_API_BASE_URL not set; every request will fail");
    }

    let credentials: Arc<dyn Credentials> = Arc::new(StaticCredentials::from_env());
    let router = Arc::new(FrameRouter::new());
    let session = Arc::new(ChannelSession::new(
        endpoint,
        Arc::new(WsConnector),
        credentials.clone(),
        router.clone(),
    ));
    let backend: Arc<dyn Backend> = Arc::new(ApiClient::new(
        RestClient::new(cfg.api_base_url.clone(), cfg.http_timeout()),
        session.clone(),
        credentials,
    ));
    let ui = UiStore::new();

    let (conversation, nav_rx) =
        ConversationController::new(category.as_str(), cfg.clone(), backend.clone(), ui.clone());
    router.register_conversation(conversation.clone());
    let tables = std::iter::once(ASSOCIATE_TABLE.to_owned())
        .chain(CATEGORIES.iter().map(|c| format!("{MANAGER_TABLE_PREFIX}{c}")));
    for table in tables {
        router.register_table(TableController::new(table, cfg.clone(), backend.clone(), ui.clone()));
    }
    tracing::info!(%category, session_id = %session.session_id(), "quill started");

    let token = CancellationToken::new();
    spawn_sigint_canceler(token.clone());

    let app = repl::App { cfg, ui, session, router, conversation };
    repl::run(app, nav_rx, token).await
}

fn spawn_sigint_canceler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            if let Ok(mut sigint) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            {
                let _ = sigint.recv().await;
                token.cancel();
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        }
    });
}
