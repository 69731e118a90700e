use sqlx::any::AnyPoolOptions;
use sqlx::{Any, Pool};
use std::sync::Once;
use std::time::Duration;

pub type DbPool = Pool<Any>;

static INSTALL_DRIVERS: Once = Once::new();

/// Register the Any-driver backends exactly once per process.
pub(crate) fn install_drivers_once() {
    INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
}

/// Which SQL engine backs the store. Selected by the `DATABASE_URL` scheme;
/// the two differ only in primary-key generation (see schema.rs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbBackend {
    /// Embedded single-file engine. Native AUTOINCREMENT keys, single
    /// connection.
    Sqlite,
    /// Networked engine. Explicit named sequences for keys.
    Postgres,
}

impl DbBackend {
    pub fn from_url(database_url: &str) -> Result<Self, sqlx::Error> {
        if database_url.starts_with("sqlite:") {
            Ok(DbBackend::Sqlite)
        } else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
            Ok(DbBackend::Postgres)
        } else {
            Err(sqlx::Error::Configuration(
                format!("unsupported DATABASE_URL scheme: {}", database_url).into(),
            ))
        }
    }
}

/// Create the shared connection pool.
///
/// The embedded backend degrades to a single connection; the networked
/// backend gets a real pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    install_drivers_once();

    let backend = DbBackend::from_url(database_url)?;
    tracing::info!("Creating database connection pool ({:?})...", backend);

    let options = match backend {
        DbBackend::Sqlite => AnyPoolOptions::new().max_connections(1),
        DbBackend::Postgres => AnyPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800)),
    };

    options
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
}

/// Database health check
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").fetch_one(pool).await?;
    Ok(())
}

/// Connection pool statistics
pub fn pool_stats(pool: &DbPool) -> PoolStats {
    PoolStats {
        size: pool.size(),
        idle: pool.num_idle(),
        active: pool.size() as usize - pool.num_idle(),
    }
}

#[derive(Debug, serde::Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
    pub active: usize,
}

#[cfg(test)]
pub(crate) async fn test_pool() -> DbPool {
    install_drivers_once();

    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");

    crate::schema::create_schema(&pool, DbBackend::Sqlite)
        .await
        .expect("schema");
    crate::schema::seed_chains(&pool).await.expect("seed");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_from_url() {
        assert_eq!(
            DbBackend::from_url("sqlite://basket.db?mode=rwc").unwrap(),
            DbBackend::Sqlite
        );
        assert_eq!(
            DbBackend::from_url("postgres://u:p@localhost/basket").unwrap(),
            DbBackend::Postgres
        );
        assert!(DbBackend::from_url("mysql://nope").is_err());
    }

    #[tokio::test]
    async fn health_check_on_fresh_pool() {
        let pool = test_pool().await;
        health_check(&pool).await.unwrap();
        let stats = pool_stats(&pool);
        assert_eq!(stats.size, 1);
    }
}
