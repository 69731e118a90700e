use crate::config::Config;
use crate::db::{DbBackend, DbPool};
use crate::error::Result;
use crate::importer::Importer;
use crate::schema::{self, TableCounts};

/// What the startup probe found.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreHealth {
    pub tables_exist: bool,
    pub has_data: bool,
    pub needs_import: bool,
    pub counts: Option<TableCounts>,
}

/// Runs once per process start: probe the store, create the schema when
/// missing, optionally drive a full ingestion pass, and always end with a
/// per-table summary.
pub struct StartupManager {
    pool: DbPool,
    backend: DbBackend,
    config: Config,
}

impl StartupManager {
    pub fn new(pool: DbPool, backend: DbBackend, config: Config) -> Self {
        Self {
            pool,
            backend,
            config,
        }
    }

    pub async fn check_health(&self) -> Result<StoreHealth> {
        let tables_exist = schema::tables_exist(&self.pool, self.backend).await?;
        if !tables_exist {
            return Ok(StoreHealth {
                tables_exist: false,
                has_data: false,
                needs_import: true,
                counts: None,
            });
        }

        // Tables are present; failing to count them is schema drift and
        // propagates as fatal.
        let counts = schema::row_counts(&self.pool).await?;
        let has_data = counts.chains >= 2 && counts.branches > 0 && counts.products > 0;

        Ok(StoreHealth {
            tables_exist: true,
            has_data,
            needs_import: !has_data,
            counts: Some(counts),
        })
    }

    /// The complete startup sequence. Errors here mean the process must not
    /// serve.
    pub async fn run(&self) -> Result<StoreHealth> {
        tracing::info!("============================================================");
        tracing::info!("DATABASE STARTUP CHECK");
        tracing::info!("============================================================");

        let health = self.check_health().await?;

        if !health.tables_exist {
            if self.config.testing {
                tracing::info!("TESTING set; skipping schema creation");
                return Ok(health);
            }
            tracing::info!("Database tables not found. Initializing...");
            schema::create_schema(&self.pool, self.backend).await?;
            schema::seed_chains(&self.pool).await?;
        } else {
            tracing::info!("✅ Database tables already exist");
        }

        let health = self.check_health().await?;

        if health.needs_import {
            if self.config.auto_import {
                tracing::info!("🔄 AUTO_IMPORT is enabled. Starting data import...");
                let stats = Importer::new(self.pool.clone(), &self.config).run().await;
                if stats.errors > 0 {
                    tracing::warn!("Import finished with {} errors", stats.errors);
                }
            } else {
                tracing::warn!(
                    "⚠️  Database needs data. Set AUTO_IMPORT=true to import at startup"
                );
            }
        }

        let final_health = self.check_health().await?;

        tracing::info!("------------------------------------------------------------");
        tracing::info!("STARTUP COMPLETE");
        tracing::info!("  Tables exist: {}", final_health.tables_exist);
        tracing::info!("  Has data:     {}", final_health.has_data);
        if let Some(counts) = &final_health.counts {
            tracing::info!("  chains:       {}", counts.chains);
            tracing::info!("  branches:     {}", counts.branches);
            tracing::info!("  products:     {}", counts.products);
            tracing::info!("  prices:       {}", counts.prices);
            tracing::info!("  users:        {}", counts.users);
            tracing::info!("  saved_carts:  {}", counts.saved_carts);
        }
        tracing::info!("============================================================");

        Ok(final_health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::any::AnyPoolOptions;

    fn config(testing: bool) -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            auto_import: false,
            import_limit: None,
            import_interval_hours: None,
            secret_key: "test".to_string(),
            testing,
            prefer_longer_names: true,
            db_max_connections: 1,
        }
    }

    async fn bare_pool() -> DbPool {
        crate::db::test_pool().await // schema already created
    }

    async fn empty_pool() -> DbPool {
        // A pool with no schema at all
        crate::db::install_drivers_once();
        AnyPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn creates_schema_when_missing() {
        let pool = empty_pool().await;
        let manager = StartupManager::new(pool.clone(), DbBackend::Sqlite, config(false));

        let health = manager.run().await.unwrap();
        assert!(health.tables_exist);
        assert!(!health.has_data); // chains seeded, but no branches/products
        assert!(health.needs_import);
        assert_eq!(health.counts.unwrap().chains, 2);
    }

    #[tokio::test]
    async fn testing_flag_suppresses_schema_creation() {
        let pool = empty_pool().await;
        let manager = StartupManager::new(pool.clone(), DbBackend::Sqlite, config(true));

        let health = manager.run().await.unwrap();
        assert!(!health.tables_exist);
    }

    #[tokio::test]
    async fn seeded_store_with_data_needs_no_import() {
        let pool = bare_pool().await;
        let shufersal = crate::store::fixtures::chain_id(&pool, "shufersal").await;
        let branch =
            crate::store::fixtures::add_branch(&pool, shufersal, "1", "A", "חולון").await;
        crate::store::fixtures::add_price(&pool, shufersal, branch, "1", "חלב", 5.0).await;

        let manager = StartupManager::new(pool.clone(), DbBackend::Sqlite, config(false));
        let health = manager.run().await.unwrap();
        assert!(health.has_data);
        assert!(!health.needs_import);
    }
}
