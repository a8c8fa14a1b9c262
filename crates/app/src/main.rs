use std::sync::Arc;

use bot::extract::{Extractor, GeminiExtractor};
use bot::telegram::{ChatTransport, TelegramApi};
use migration::{Migrator, MigratorTrait};
use settings::Database;

mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;
    let mut tasks = tokio::task::JoinSet::new();

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "fiado={level},bot={level},server={level},ledger={level}",
            level = settings.app.level
        ))
        .init();

    let database = parse_database(&settings.database).await?;
    let ledger = ledger::Ledger::new(database);

    let transport: Arc<dyn ChatTransport> = Arc::new(TelegramApi::new(&settings.telegram.token)?);

    let mut extractor = GeminiExtractor::new(&settings.gemini.api_key, &settings.gemini.model)?;
    if let Some(base_url) = &settings.gemini.base_url {
        extractor = extractor.with_base_url(base_url);
    }
    if let Some(currency) = &settings.gemini.default_currency {
        extractor = extractor.with_default_currency(currency);
    }
    let extractor: Arc<dyn Extractor> = Arc::new(extractor);

    let context = Arc::new(bot::BotContext::new(ledger, transport, extractor));

    let bind = settings
        .server
        .bind
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let listener = tokio::net::TcpListener::bind((bind.as_str(), settings.server.port)).await?;

    tasks.spawn(async move {
        if let Err(err) = server::run_with_listener(context, listener).await {
            tracing::error!(%err, "webhook server stopped");
        }
    });

    while tasks.join_next().await.is_some() {
        tasks.shutdown().await;
    }

    Ok(())
}

async fn parse_database(
    config: &Database,
) -> Result<sea_orm::DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    let url = match config {
        Database::Memory => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{path}?mode=rwc"),
    };

    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;

    Ok(database)
}
