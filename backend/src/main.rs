use anyhow::Context;
use axum::{extract::State, response::Json, routing::get, Router};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use basket_backend::auth::{self, AuthConfig};
use basket_backend::config::Config;
use basket_backend::db::{self, DbBackend, DbPool};
use basket_backend::importer::Importer;
use basket_backend::routes;
use basket_backend::startup::StartupManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Environment
    dotenv::dotenv().ok();

    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    tracing::info!("🚀 Starting price comparison backend...");

    let config = Config::from_env();
    let backend = DbBackend::from_url(&config.database_url)
        .context("DATABASE_URL must be a sqlite:// or postgres:// URL")?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to the database")?;

    tracing::info!("✅ Connected to the database ({:?})", backend);

    // Schema probe, conditional DDL, conditional bulk import
    StartupManager::new(pool.clone(), backend, config.clone())
        .run()
        .await
        .context("Database startup failed")?;

    // Recurring ingestion, independent of boot
    if let Some(hours) = config.import_interval_hours {
        let import_pool = pool.clone();
        let import_config = config.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(hours * 3600));
            interval.tick().await; // the boot-time pass already ran
            loop {
                interval.tick().await;
                tracing::info!("⏰ Scheduled ingestion pass starting");
                Importer::new(import_pool.clone(), &import_config).run().await;
            }
        });
        tracing::info!("⏰ Recurring ingestion every {} hours", hours);
    }

    let auth_config = Arc::new(AuthConfig::new(config.secret_key.clone()));

    // CORS: the API serves a public mobile client
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/health/db", get(health_check_db))
        .with_state(pool.clone());

    let app = Router::new()
        .nest("/api/auth", auth::auth_routes(pool.clone(), auth_config))
        .nest("/api/products", routes::products::routes(pool.clone()))
        .merge(routes::products::catalog_routes(pool.clone()))
        .nest("/api/cart", routes::cart::routes(pool.clone()))
        .nest("/api/savedcarts", routes::saved_carts::routes(pool.clone()))
        .nest("/api/system", routes::system::routes(pool.clone()))
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(cors),
        );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("HOST or PORT invalid")?;

    tracing::info!("🌐 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// HEALTH CHECKS
// ============================================================================

async fn health_check() -> &'static str {
    "OK"
}

async fn health_check_db(
    State(pool): State<DbPool>,
) -> Result<Json<serde_json::Value>, basket_backend::AppError> {
    db::health_check(&pool).await?;
    let stats = db::pool_stats(&pool);

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "database": {
            "connected": true,
            "pool": stats,
        }
    })))
}
