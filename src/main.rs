use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use store_changes_bot::access::{AccessGate, JsonFileUserStore};
use store_changes_bot::bot::{self, PollingOptions};
use store_changes_bot::chart::ReportRenderer;
use store_changes_bot::config::{Config, LogBackend};
use store_changes_bot::health::{app, AppState};
use store_changes_bot::log_store::{LogStore, SqliteLogStore};
use store_changes_bot::projections::LogScanner;
use store_changes_bot::router::CommandRouter;
use store_changes_bot::sheets::{GoogleSheetsLogStore, ServiceAccountKey};
use store_changes_bot::telegram::TelegramClient;

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        error!("{e:#}");
        // exit instead of being restarted silently by the host
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn run() -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("store-changes-bot/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build http client")?;
    let telegram = Arc::new(TelegramClient::new(
        http.clone(),
        &config.telegram_api_base,
        config.telegram_token.clone(),
    ));

    let users = Arc::new(JsonFileUserStore::new(&config.users_file));
    info!(path = %users.path().display(), "user registry");
    let gate = Arc::new(
        AccessGate::load(config.admin_id.to_string(), users)
            .await
            .context("failed to load users")?,
    );

    let log_store: Arc<dyn LogStore> = match &config.log_backend {
        LogBackend::Sheets {
            credentials,
            spreadsheet_id,
            worksheet,
        } => {
            let key = ServiceAccountKey::from_json(credentials).context("GOOGLE_CREDENTIALS")?;
            info!(spreadsheet_id = %spreadsheet_id, worksheet = %worksheet, "using google sheets changes log");
            Arc::new(GoogleSheetsLogStore::new(http.clone(), key, spreadsheet_id, worksheet))
        }
        LogBackend::Sqlite { path } => {
            info!(path = %path.display(), "using sqlite changes log");
            Arc::new(SqliteLogStore::open(path).context("failed to open changes log database")?)
        }
    };

    let renderer = ReportRenderer::with_font_search(config.chart_font.as_deref())
        .context("failed to load chart font")?;
    let router = Arc::new(CommandRouter::new(gate.clone(), LogScanner::new(log_store), renderer));

    let listener = tokio::net::TcpListener::bind(config.health_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.health_addr))?;
    info!("health endpoint on http://{}", config.health_addr);
    let server = axum::serve(
        listener,
        app(AppState {
            gate,
            started_at: Utc::now(),
        }),
    );

    let options = PollingOptions {
        timeout: config.poll_timeout,
        max_consecutive_failures: config.poll_max_failures,
    };
    let failure = tokio::select! {
        e = bot::run(telegram.clone(), router, options) => format!("polling stopped: {e}"),
        result = server.into_future() => match result {
            Ok(()) => "health server exited".to_string(),
            Err(e) => format!("health server failed: {e}"),
        },
    };

    bot::notify_admin(telegram.as_ref(), config.admin_id, &failure).await;
    Err(anyhow!(failure))
}
