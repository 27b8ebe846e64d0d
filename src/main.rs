use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trailer_quote::catalog::{CatalogStore, MemoryCatalogStore, PgCatalogStore, SheetsCatalogSource};
use trailer_quote::config::Config;
use trailer_quote::location::GoogleMapsClient;
use trailer_quote::reporting::{EventSink, HttpEventSink, TracingSink};
use trailer_quote::{app, build_engine, AppState, Collaborators};

const REPORTING_QUEUE: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trailer_quote=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    let store: Arc<dyn CatalogStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await
                .context("Failed to connect to database")?;
            let store = PgCatalogStore::new(pool);
            store
                .ensure_schema()
                .await
                .context("Failed to create catalog table")?;
            info!("Catalog snapshots stored in Postgres");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; catalog snapshots kept in memory only");
            Arc::new(MemoryCatalogStore::default())
        }
    };

    let sink: Arc<dyn EventSink> = match &config.reporting_url {
        Some(url) => Arc::new(HttpEventSink::spawn(
            url.clone(),
            REPORTING_QUEUE,
            config.distance_timeout,
        )),
        None => Arc::new(TracingSink),
    };

    let source = SheetsCatalogSource::new(
        config.sheets_spreadsheet_id.clone(),
        config.sheets_api_key.clone(),
        Duration::from_secs(30),
    );
    let distance = GoogleMapsClient::new(config.maps_api_key.clone(), config.distance_timeout);

    let (engine, sync) = build_engine(
        &config,
        Collaborators {
            source: Arc::new(source),
            store: store.clone(),
            distance: Arc::new(distance),
            sink,
        },
    );

    match engine.catalog().restore(store.as_ref()).await {
        Ok(true) => info!("Restored catalog v{}", engine.catalog().version()),
        Ok(false) => {}
        Err(e) => warn!("Could not restore stored catalog: {}", e),
    }
    sync.run();

    let router = app(AppState { engine });
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);
    axum::serve(listener, router).await.context("Server error")?;

    Ok(())
}
