use crate::db::{DbBackend, DbPool};

/// The six tables the serving layer requires, probe order = dependency order.
pub const REQUIRED_TABLES: [&str; 6] = [
    "chains",
    "branches",
    "chain_products",
    "branch_prices",
    "users",
    "saved_carts",
];

/// Named sequences backing primary keys on the networked engine.
const SEQUENCES: [&str; 6] = [
    "chain_id_seq",
    "branch_id_seq",
    "chain_product_id_seq",
    "price_id_seq",
    "user_id_seq",
    "cart_id_seq",
];

/// Render the primary-key column for the given backend. This is the only
/// point where the embedded/networked switch touches SQL: the embedded
/// engine uses native AUTOINCREMENT, the networked engine draws from a named
/// sequence. Every INSERT simply omits the key column and reads it back via
/// RETURNING.
fn pk_column(backend: DbBackend, column: &str, sequence: &str) -> String {
    match backend {
        DbBackend::Sqlite => format!("{column} INTEGER PRIMARY KEY AUTOINCREMENT"),
        DbBackend::Postgres => {
            format!("{column} BIGINT PRIMARY KEY DEFAULT nextval('{sequence}')")
        }
    }
}

fn int_type(backend: DbBackend) -> &'static str {
    match backend {
        DbBackend::Sqlite => "INTEGER",
        DbBackend::Postgres => "BIGINT",
    }
}

fn table_ddl(backend: DbBackend) -> Vec<String> {
    let int = int_type(backend);

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS chains (
                {pk},
                name VARCHAR(50) NOT NULL UNIQUE,
                display_name VARCHAR(100)
            )",
            pk = pk_column(backend, "chain_id", "chain_id_seq"),
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS branches (
                {pk},
                chain_id {int} NOT NULL REFERENCES chains(chain_id) ON DELETE CASCADE,
                store_id VARCHAR(50) NOT NULL,
                name VARCHAR(255),
                address VARCHAR(500),
                city VARCHAR(100) NOT NULL,
                CONSTRAINT uq_chain_store UNIQUE (chain_id, store_id)
            )",
            pk = pk_column(backend, "branch_id", "branch_id_seq"),
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS chain_products (
                {pk},
                chain_id {int} NOT NULL REFERENCES chains(chain_id) ON DELETE CASCADE,
                barcode VARCHAR(50) NOT NULL,
                name VARCHAR(255) NOT NULL,
                CONSTRAINT uq_chain_barcode UNIQUE (chain_id, barcode)
            )",
            pk = pk_column(backend, "chain_product_id", "chain_product_id_seq"),
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS branch_prices (
                {pk},
                chain_product_id {int} NOT NULL
                    REFERENCES chain_products(chain_product_id) ON DELETE CASCADE,
                branch_id {int} NOT NULL REFERENCES branches(branch_id) ON DELETE CASCADE,
                price DOUBLE PRECISION NOT NULL CHECK (price > 0),
                last_updated TEXT NOT NULL,
                CONSTRAINT uq_product_branch UNIQUE (chain_product_id, branch_id)
            )",
            pk = pk_column(backend, "price_id", "price_id_seq"),
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS users (
                {pk},
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                created_at TEXT NOT NULL
            )",
            pk = pk_column(backend, "user_id", "user_id_seq"),
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS saved_carts (
                {pk},
                user_id {int} NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                cart_name VARCHAR(100) NOT NULL,
                city VARCHAR(100),
                items TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CONSTRAINT uq_user_cart_name UNIQUE (user_id, cart_name)
            )",
            pk = pk_column(backend, "cart_id", "cart_id_seq"),
        ),
    ]
}

const INDEX_DDL: [&str; 5] = [
    "CREATE INDEX IF NOT EXISTS idx_chain_city ON branches (chain_id, city)",
    "CREATE INDEX IF NOT EXISTS idx_name ON chain_products (name)",
    "CREATE INDEX IF NOT EXISTS idx_branch ON branch_prices (branch_id)",
    "CREATE INDEX IF NOT EXISTS idx_updated ON branch_prices (last_updated)",
    "CREATE INDEX IF NOT EXISTS idx_saved_cart_user ON saved_carts (user_id)",
];

/// Create sequences (networked backend only), tables, and indexes.
pub async fn create_schema(pool: &DbPool, backend: DbBackend) -> Result<(), sqlx::Error> {
    if backend == DbBackend::Postgres {
        for seq in SEQUENCES {
            sqlx::query(&format!("CREATE SEQUENCE IF NOT EXISTS {seq}"))
                .execute(pool)
                .await?;
            tracing::debug!("Ensured sequence {}", seq);
        }
    }

    for ddl in table_ddl(backend) {
        sqlx::query(&ddl).execute(pool).await?;
    }
    for ddl in INDEX_DDL {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::info!("✅ Schema created ({:?})", backend);
    Ok(())
}

/// Insert the supported chains, skipping ones already present.
pub async fn seed_chains(pool: &DbPool) -> Result<(), sqlx::Error> {
    for adapter in crate::chains::registry() {
        sqlx::query(
            "INSERT INTO chains (name, display_name) VALUES ($1, $2)
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(adapter.name())
        .bind(adapter.display_name())
        .execute(pool)
        .await?;
    }
    tracing::info!("✅ Chain seed data in place");
    Ok(())
}

/// True when all six required tables exist.
pub async fn tables_exist(pool: &DbPool, backend: DbBackend) -> Result<bool, sqlx::Error> {
    let names = REQUIRED_TABLES
        .iter()
        .map(|t| format!("'{t}'"))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = match backend {
        DbBackend::Sqlite => format!(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ({names})"
        ),
        DbBackend::Postgres => format!(
            "SELECT COUNT(*) FROM information_schema.tables
             WHERE table_schema = 'public' AND table_name IN ({names})"
        ),
    };

    let count: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
    Ok(count >= REQUIRED_TABLES.len() as i64)
}

/// Per-table row counts, used by the startup summary and the statistics
/// endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TableCounts {
    pub chains: i64,
    pub branches: i64,
    pub products: i64,
    pub prices: i64,
    pub users: i64,
    pub saved_carts: i64,
}

pub async fn row_counts(pool: &DbPool) -> Result<TableCounts, sqlx::Error> {
    async fn count(pool: &DbPool, table: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
    }

    Ok(TableCounts {
        chains: count(pool, "chains").await?,
        branches: count(pool, "branches").await?,
        products: count(pool, "chain_products").await?,
        prices: count(pool, "branch_prices").await?,
        users: count(pool, "users").await?,
        saved_carts: count(pool, "saved_carts").await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn schema_probe_and_counts() {
        let pool = db::test_pool().await;

        assert!(tables_exist(&pool, DbBackend::Sqlite).await.unwrap());

        let counts = row_counts(&pool).await.unwrap();
        assert_eq!(counts.chains, 2);
        assert_eq!(counts.branches, 0);
        assert_eq!(counts.products, 0);
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let pool = db::test_pool().await;
        seed_chains(&pool).await.unwrap();
        seed_chains(&pool).await.unwrap();

        let counts = row_counts(&pool).await.unwrap();
        assert_eq!(counts.chains, 2);
    }

    #[test]
    fn pk_strategy_differs_only_in_key_generation() {
        let sqlite = pk_column(DbBackend::Sqlite, "chain_id", "chain_id_seq");
        let pg = pk_column(DbBackend::Postgres, "chain_id", "chain_id_seq");
        assert!(sqlite.contains("AUTOINCREMENT"));
        assert!(pg.contains("nextval('chain_id_seq')"));
    }
}
