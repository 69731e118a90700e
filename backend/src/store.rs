use chrono::{SecondsFormat, Utc};
use sqlx::{Any, Executor, FromRow};

use crate::chains::StoreRecord;
use crate::db::DbPool;
use crate::error::{is_unique_violation, AppError, Result};
use crate::models::{Branch, BranchWithChain, Chain, SavedCart, User};

/// Current UTC instant in the RFC 3339 shape every timestamp column uses.
pub fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ============================================================================
// CHAINS & BRANCHES
// ============================================================================

pub async fn chain_by_name(pool: &DbPool, name: &str) -> Result<Option<Chain>> {
    let chain = sqlx::query_as::<Any, Chain>(
        "SELECT chain_id, name, display_name FROM chains WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;
    Ok(chain)
}

pub async fn list_chains(pool: &DbPool) -> Result<Vec<Chain>> {
    let chains = sqlx::query_as::<Any, Chain>(
        "SELECT chain_id, name, display_name FROM chains ORDER BY chain_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(chains)
}

/// Distinct branch cities, sorted. Branch.city is the source of truth for
/// city names; no canonical city table exists.
pub async fn list_cities(pool: &DbPool) -> Result<Vec<String>> {
    let cities = sqlx::query_scalar::<Any, String>(
        "SELECT DISTINCT city FROM branches ORDER BY city",
    )
    .fetch_all(pool)
    .await?;
    Ok(cities)
}

const BRANCH_WITH_CHAIN: &str = "SELECT b.branch_id, b.chain_id, b.store_id, b.name, b.address,
            b.city, c.name AS chain_name, c.display_name AS chain_display_name
     FROM branches b
     JOIN chains c ON c.chain_id = b.chain_id";

/// Branches in a city, joined with their chain. Exact match on the stored
/// city string first; when nothing matches, a case-insensitive contains
/// match in both directions ("תל אביב" finds "תל אביב - יפו" and vice
/// versa).
pub async fn branches_in_city(pool: &DbPool, city: &str) -> Result<Vec<BranchWithChain>> {
    let city = city.split_whitespace().collect::<Vec<_>>().join(" ");

    let exact = sqlx::query_as::<Any, BranchWithChain>(&format!(
        "{BRANCH_WITH_CHAIN} WHERE b.city = $1"
    ))
    .bind(&city)
    .fetch_all(pool)
    .await?;

    if !exact.is_empty() {
        return Ok(exact);
    }

    let fuzzy = sqlx::query_as::<Any, BranchWithChain>(&format!(
        "{BRANCH_WITH_CHAIN}
         WHERE lower(b.city) LIKE '%' || lower($1) || '%'
            OR lower($1) LIKE '%' || lower(b.city) || '%'"
    ))
    .bind(&city)
    .fetch_all(pool)
    .await?;

    Ok(fuzzy)
}

/// Upsert a branch keyed by (chain_id, store_id); name/address/city are
/// overwritten in place on re-import. Returns the branch id either way.
pub async fn upsert_branch<'e, E>(executor: E, chain_id: i64, record: &StoreRecord) -> Result<i64>
where
    E: Executor<'e, Database = Any>,
{
    let branch_id: i64 = sqlx::query_scalar(
        "INSERT INTO branches (chain_id, store_id, name, address, city)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (chain_id, store_id)
         DO UPDATE SET name = excluded.name, address = excluded.address, city = excluded.city
         RETURNING branch_id",
    )
    .bind(chain_id)
    .bind(&record.store_id)
    .bind(&record.name)
    .bind(&record.address)
    .bind(&record.city)
    .fetch_one(executor)
    .await?;
    Ok(branch_id)
}

pub async fn branches_for_chain(pool: &DbPool, chain_id: i64) -> Result<Vec<Branch>> {
    let branches = sqlx::query_as::<Any, Branch>(
        "SELECT branch_id, chain_id, store_id, name, address, city
         FROM branches WHERE chain_id = $1",
    )
    .bind(chain_id)
    .fetch_all(pool)
    .await?;
    Ok(branches)
}

// ============================================================================
// PRODUCTS & PRICES
// ============================================================================

/// `(price, product name)` for a barcode at one branch, scoped to the
/// branch's chain. Lowest price wins should duplicates ever exist.
pub async fn price_for(
    pool: &DbPool,
    chain_id: i64,
    barcode: &str,
    branch_id: i64,
) -> Result<Option<(f64, String)>> {
    let row = sqlx::query_as::<Any, (f64, String)>(
        "SELECT bp.price, cp.name
         FROM branch_prices bp
         JOIN chain_products cp ON cp.chain_product_id = bp.chain_product_id
         WHERE cp.chain_id = $1 AND cp.barcode = $2 AND bp.branch_id = $3
         ORDER BY bp.price ASC
         LIMIT 1",
    )
    .bind(chain_id)
    .bind(barcode)
    .bind(branch_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Case-insensitive substring match on product names. Returns up to `limit`
/// (barcode, name) rows; callers group by barcode across chains.
pub async fn products_matching(
    pool: &DbPool,
    query: &str,
    limit: i64,
) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query_as::<Any, (String, String)>(
        "SELECT cp.barcode, cp.name
         FROM chain_products cp
         WHERE lower(cp.name) LIKE '%' || lower($1) || '%'
         ORDER BY cp.chain_product_id
         LIMIT $2",
    )
    .bind(query)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn product_name_for_barcode(pool: &DbPool, barcode: &str) -> Result<Option<String>> {
    let name = sqlx::query_scalar::<Any, String>(
        "SELECT name FROM chain_products WHERE barcode = $1 ORDER BY chain_product_id LIMIT 1",
    )
    .bind(barcode)
    .fetch_optional(pool)
    .await?;
    Ok(name)
}

/// Internal row for per-branch price listings.
#[derive(Debug, Clone, FromRow)]
pub struct PricePointRow {
    pub price: f64,
    pub branch_id: i64,
    pub branch_name: Option<String>,
    pub branch_address: Option<String>,
    pub chain_id: i64,
    pub chain_name: String,
    pub chain_display_name: Option<String>,
}

/// Every price for a barcode across the given branches, cheapest first.
pub async fn price_points_in_branches(
    pool: &DbPool,
    barcode: &str,
    branch_ids: &[i64],
) -> Result<Vec<PricePointRow>> {
    if branch_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = (0..branch_ids.len())
        .map(|i| format!("${}", i + 2))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "SELECT bp.price, b.branch_id, b.name AS branch_name, b.address AS branch_address,
                c.chain_id, c.name AS chain_name, c.display_name AS chain_display_name
         FROM branch_prices bp
         JOIN chain_products cp ON cp.chain_product_id = bp.chain_product_id
         JOIN branches b ON b.branch_id = bp.branch_id
         JOIN chains c ON c.chain_id = b.chain_id
         WHERE cp.barcode = $1 AND bp.branch_id IN ({placeholders})
         ORDER BY bp.price ASC"
    );

    let mut query = sqlx::query_as::<Any, PricePointRow>(&sql).bind(barcode);
    for id in branch_ids {
        query = query.bind(*id);
    }

    Ok(query.fetch_all(pool).await?)
}

#[derive(Debug, Clone, Copy, FromRow)]
pub struct PriceAggregates {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub avg_price: Option<f64>,
    pub store_count: i64,
}

/// min/max/avg/count for a barcode across a branch set.
pub async fn price_aggregates(
    pool: &DbPool,
    barcode: &str,
    branch_ids: &[i64],
) -> Result<PriceAggregates> {
    if branch_ids.is_empty() {
        return Ok(PriceAggregates {
            min_price: None,
            max_price: None,
            avg_price: None,
            store_count: 0,
        });
    }

    let placeholders = (0..branch_ids.len())
        .map(|i| format!("${}", i + 2))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "SELECT MIN(bp.price) AS min_price, MAX(bp.price) AS max_price,
                AVG(bp.price) AS avg_price, COUNT(*) AS store_count
         FROM branch_prices bp
         JOIN chain_products cp ON cp.chain_product_id = bp.chain_product_id
         WHERE cp.barcode = $1 AND bp.branch_id IN ({placeholders})"
    );

    let mut query = sqlx::query_as::<Any, PriceAggregates>(&sql).bind(barcode);
    for id in branch_ids {
        query = query.bind(*id);
    }

    Ok(query.fetch_one(pool).await?)
}

// ============================================================================
// USERS
// ============================================================================

pub async fn create_user(pool: &DbPool, email: &str, password_hash: &str) -> Result<User> {
    let created_at = now_utc();
    let result = sqlx::query_scalar::<Any, i64>(
        "INSERT INTO users (email, password_hash, created_at)
         VALUES ($1, $2, $3)
         RETURNING user_id",
    )
    .bind(email)
    .bind(password_hash)
    .bind(&created_at)
    .fetch_one(pool)
    .await;

    match result {
        Ok(user_id) => Ok(User {
            user_id,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at,
        }),
        Err(ref e) if is_unique_violation(e) => {
            Err(AppError::Conflict("Email already registered".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn user_by_id(pool: &DbPool, user_id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<Any, User>(
        "SELECT user_id, email, password_hash, created_at FROM users WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Case-normalized email lookup.
pub async fn user_by_email(pool: &DbPool, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<Any, User>(
        "SELECT user_id, email, password_hash, created_at
         FROM users WHERE lower(email) = lower($1)",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

// ============================================================================
// SAVED CARTS
// ============================================================================

const SAVED_CART_COLUMNS: &str =
    "cart_id, user_id, cart_name, city, items, created_at, updated_at";

/// Insert-or-replace under the unique (user_id, cart_name) key. A resave
/// updates the existing row in place.
pub async fn upsert_saved_cart(
    pool: &DbPool,
    user_id: i64,
    cart_name: &str,
    city: &str,
    items_json: &str,
) -> Result<SavedCart> {
    let now = now_utc();
    let cart = sqlx::query_as::<Any, SavedCart>(&format!(
        "INSERT INTO saved_carts (user_id, cart_name, city, items, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $5)
         ON CONFLICT (user_id, cart_name)
         DO UPDATE SET city = excluded.city, items = excluded.items,
                       updated_at = excluded.updated_at
         RETURNING {SAVED_CART_COLUMNS}"
    ))
    .bind(user_id)
    .bind(cart_name)
    .bind(city)
    .bind(items_json)
    .bind(&now)
    .fetch_one(pool)
    .await?;
    Ok(cart)
}

pub async fn list_saved_carts(pool: &DbPool, user_id: i64) -> Result<Vec<SavedCart>> {
    let carts = sqlx::query_as::<Any, SavedCart>(&format!(
        "SELECT {SAVED_CART_COLUMNS} FROM saved_carts
         WHERE user_id = $1 ORDER BY updated_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(carts)
}

pub async fn saved_cart_by_id(
    pool: &DbPool,
    user_id: i64,
    cart_id: i64,
) -> Result<Option<SavedCart>> {
    let cart = sqlx::query_as::<Any, SavedCart>(&format!(
        "SELECT {SAVED_CART_COLUMNS} FROM saved_carts
         WHERE cart_id = $1 AND user_id = $2"
    ))
    .bind(cart_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(cart)
}

pub async fn delete_saved_cart(pool: &DbPool, user_id: i64, cart_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM saved_carts WHERE cart_id = $1 AND user_id = $2")
        .bind(cart_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub async fn chain_id(pool: &DbPool, name: &str) -> i64 {
        chain_by_name(pool, name).await.unwrap().unwrap().chain_id
    }

    pub async fn add_branch(
        pool: &DbPool,
        chain_id: i64,
        store_id: &str,
        name: &str,
        city: &str,
    ) -> i64 {
        upsert_branch(
            pool,
            chain_id,
            &StoreRecord {
                store_id: store_id.to_string(),
                name: name.to_string(),
                address: format!("{name} address"),
                city: city.to_string(),
            },
        )
        .await
        .unwrap()
    }

    pub async fn add_price(
        pool: &DbPool,
        chain_id: i64,
        branch_id: i64,
        barcode: &str,
        name: &str,
        price: f64,
    ) {
        let product_id: i64 = sqlx::query_scalar(
            "INSERT INTO chain_products (chain_id, barcode, name)
             VALUES ($1, $2, $3)
             ON CONFLICT (chain_id, barcode) DO UPDATE SET name = excluded.name
             RETURNING chain_product_id",
        )
        .bind(chain_id)
        .bind(barcode)
        .bind(name)
        .fetch_one(pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO branch_prices (chain_product_id, branch_id, price, last_updated)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (chain_product_id, branch_id)
             DO UPDATE SET price = excluded.price, last_updated = excluded.last_updated",
        )
        .bind(product_id)
        .bind(branch_id)
        .bind(price)
        .bind(now_utc())
        .execute(pool)
        .await
        .unwrap();
    }
}
