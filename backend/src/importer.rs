use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use sqlx::Any;
use tokio_util::sync::CancellationToken;

use crate::chains::{self, ChainAdapter, PriceRecord};
use crate::config::Config;
use crate::db::DbPool;
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::models::same_price;
use crate::store::{self, now_utc};

/// Records per transaction during price import. Each batch commits
/// independently; a failed batch is rolled back and skipped whole.
pub const BATCH_SIZE: usize = 1000;

/// Price files in flight at once within a chain's Phase 2.
const FILE_CONCURRENCY: usize = 4;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct ImportStats {
    pub products_created: u64,
    pub products_updated: u64,
    pub prices_created: u64,
    pub prices_updated: u64,
    pub branches_skipped: u64,
    pub errors: u64,
}

impl ImportStats {
    fn merge(&mut self, other: &ImportStats) {
        self.products_created += other.products_created;
        self.products_updated += other.products_updated;
        self.prices_created += other.prices_created;
        self.prices_updated += other.prices_updated;
        self.branches_skipped += other.branches_skipped;
        self.errors += other.errors;
    }
}

/// Drives the two-phase ingestion protocol: stores first, then prices, per
/// chain. The store_id → branch_id map built in Phase 1 is the only channel
/// through which Phase 2 resolves foreign keys.
pub struct Importer {
    pool: DbPool,
    fetcher: Fetcher,
    limit_files: Option<usize>,
    prefer_longer_names: bool,
    cancel: CancellationToken,
}

impl Importer {
    pub fn new(pool: DbPool, config: &Config) -> Self {
        Self {
            pool,
            fetcher: Fetcher::new(),
            limit_files: config.import_limit,
            prefer_longer_names: config.prefer_longer_names,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token; a cancelled run stops at the next
    /// file/batch boundary, keeping committed batches committed.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// One full ingestion pass across all configured chains.
    pub async fn run(&self) -> ImportStats {
        let mut stats = ImportStats::default();

        for adapter in chains::registry() {
            if self.cancel.is_cancelled() {
                tracing::warn!("Import cancelled before chain {}", adapter.name());
                break;
            }

            tracing::info!("==== Importing {} ====", adapter.name());
            match self.import_chain(adapter.as_ref()).await {
                Ok(chain_stats) => stats.merge(&chain_stats),
                Err(e) => {
                    tracing::error!("Import for {} failed: {}", adapter.name(), e);
                    stats.errors += 1;
                }
            }
        }

        tracing::info!(
            "Import complete: products +{} ~{}, prices +{} ~{}, branches skipped {}, errors {}",
            stats.products_created,
            stats.products_updated,
            stats.prices_created,
            stats.prices_updated,
            stats.branches_skipped,
            stats.errors,
        );
        stats
    }

    /// Phase 1 then Phase 2 for one chain. Phase 1 must complete before
    /// Phase 2 starts.
    pub async fn import_chain(&self, adapter: &dyn ChainAdapter) -> Result<ImportStats> {
        let mut stats = ImportStats::default();

        let chain = store::chain_by_name(&self.pool, adapter.name())
            .await?
            .ok_or_else(|| {
                crate::error::AppError::InternalError(format!(
                    "Chain '{}' is not seeded",
                    adapter.name()
                ))
            })?;

        let branch_map = self
            .import_stores(adapter, chain.chain_id, &mut stats)
            .await?;

        if branch_map.is_empty() {
            tracing::warn!(
                "No branches imported for {}; skipping price files",
                adapter.name()
            );
            return Ok(stats);
        }
        tracing::info!("Mapped {} branches for {}", branch_map.len(), adapter.name());

        self.import_prices(adapter, chain.chain_id, &branch_map, &mut stats)
            .await?;
        Ok(stats)
    }

    // ========================================================================
    // PHASE 1: STORES
    // ========================================================================

    async fn import_stores(
        &self,
        adapter: &dyn ChainAdapter,
        chain_id: i64,
        stats: &mut ImportStats,
    ) -> Result<HashMap<String, i64>> {
        let urls = adapter.list_store_file_urls(&self.fetcher).await?;
        tracing::info!("Found {} store files for {}", urls.len(), adapter.name());

        let mut branch_map = HashMap::new();
        for url in urls {
            if self.cancel.is_cancelled() {
                break;
            }

            let content = match self.fetcher.get_bytes(&url).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::error!("Failed to download {}: {}", url, e);
                    stats.errors += 1;
                    continue;
                }
            };

            let records = adapter.parse_stores(&content);
            if records.is_empty() {
                continue;
            }

            // One transaction per file; a failed file logs and continues.
            match self.apply_store_file(chain_id, &records).await {
                Ok(file_map) => branch_map.extend(file_map),
                Err(e) => {
                    tracing::error!("Failed to import store file {}: {}", url, e);
                    stats.errors += 1;
                }
            }
        }

        Ok(branch_map)
    }

    async fn apply_store_file(
        &self,
        chain_id: i64,
        records: &[chains::StoreRecord],
    ) -> Result<HashMap<String, i64>> {
        let mut tx = self.pool.begin().await?;
        let mut map = HashMap::new();

        for record in records {
            let branch_id = store::upsert_branch(&mut *tx, chain_id, record).await?;
            map.insert(record.store_id.clone(), branch_id);
        }

        tx.commit().await?;
        Ok(map)
    }

    // ========================================================================
    // PHASE 2: PRICES
    // ========================================================================

    async fn import_prices(
        &self,
        adapter: &dyn ChainAdapter,
        chain_id: i64,
        branch_map: &HashMap<String, i64>,
        stats: &mut ImportStats,
    ) -> Result<()> {
        let mut urls = adapter.list_price_file_urls(&self.fetcher).await?;

        if let Some(limit) = self.limit_files {
            if urls.len() > limit {
                tracing::info!("Limiting to {} price files for {}", limit, adapter.name());
                urls.truncate(limit);
            }
        }
        tracing::info!("Processing {} price files for {}", urls.len(), adapter.name());

        // File-level work is embarrassingly parallel; batches within a file
        // stay ordered.
        let file_stats = stream::iter(urls)
            .map(|url| self.process_price_file(adapter, chain_id, branch_map, url))
            .buffer_unordered(FILE_CONCURRENCY)
            .collect::<Vec<ImportStats>>()
            .await;

        for fs in &file_stats {
            stats.merge(fs);
        }
        Ok(())
    }

    async fn process_price_file(
        &self,
        adapter: &dyn ChainAdapter,
        chain_id: i64,
        branch_map: &HashMap<String, i64>,
        url: String,
    ) -> ImportStats {
        let mut stats = ImportStats::default();
        if self.cancel.is_cancelled() {
            return stats;
        }

        let content = match self.fetcher.get_bytes(&url).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!("Failed to download {}: {}", url, e);
                stats.errors += 1;
                return stats;
            }
        };

        let records = adapter.parse_prices(&content);
        tracing::debug!("Parsed {} prices from {}", records.len(), url);

        for batch in records.chunks(BATCH_SIZE) {
            // Cancellation is honored at the batch boundary only; committed
            // batches stay committed.
            if self.cancel.is_cancelled() {
                break;
            }

            match self.apply_price_batch(chain_id, batch, branch_map).await {
                Ok(delta) => stats.merge(&delta),
                Err(e) => {
                    // Rolled back whole; records are not retried individually
                    tracing::error!("Price batch rolled back: {}", e);
                    stats.errors += 1;
                }
            }
        }

        stats
    }

    /// Apply one batch in one transaction. The returned deltas count only
    /// work that actually committed; on error the transaction drops and the
    /// deltas with it.
    async fn apply_price_batch(
        &self,
        chain_id: i64,
        batch: &[PriceRecord],
        branch_map: &HashMap<String, i64>,
    ) -> Result<ImportStats> {
        let mut delta = ImportStats::default();
        let mut tx = self.pool.begin().await?;

        for record in batch {
            // Referential gap: priced store absent from the stores feed
            let Some(&branch_id) = branch_map.get(&record.store_id) else {
                delta.branches_skipped += 1;
                continue;
            };

            let existing: Option<(i64, String)> = sqlx::query_as::<Any, (i64, String)>(
                "SELECT chain_product_id, name FROM chain_products
                 WHERE chain_id = $1 AND barcode = $2",
            )
            .bind(chain_id)
            .bind(&record.barcode)
            .fetch_optional(&mut *tx)
            .await?;

            let chain_product_id = match existing {
                None => {
                    let id: i64 = sqlx::query_scalar(
                        "INSERT INTO chain_products (chain_id, barcode, name)
                         VALUES ($1, $2, $3)
                         RETURNING chain_product_id",
                    )
                    .bind(chain_id)
                    .bind(&record.barcode)
                    .bind(&record.name)
                    .fetch_one(&mut *tx)
                    .await?;
                    delta.products_created += 1;
                    id
                }
                Some((id, current_name)) => {
                    // A strictly longer label is taken as more informative
                    if self.prefer_longer_names
                        && record.name.chars().count() > current_name.chars().count()
                    {
                        sqlx::query("UPDATE chain_products SET name = $1 WHERE chain_product_id = $2")
                            .bind(&record.name)
                            .bind(id)
                            .execute(&mut *tx)
                            .await?;
                        delta.products_updated += 1;
                    }
                    id
                }
            };

            let existing_price: Option<(i64, f64)> = sqlx::query_as::<Any, (i64, f64)>(
                "SELECT price_id, price FROM branch_prices
                 WHERE chain_product_id = $1 AND branch_id = $2",
            )
            .bind(chain_product_id)
            .bind(branch_id)
            .fetch_optional(&mut *tx)
            .await?;

            match existing_price {
                None => {
                    sqlx::query(
                        "INSERT INTO branch_prices (chain_product_id, branch_id, price, last_updated)
                         VALUES ($1, $2, $3, $4)",
                    )
                    .bind(chain_product_id)
                    .bind(branch_id)
                    .bind(record.price)
                    .bind(now_utc())
                    .execute(&mut *tx)
                    .await?;
                    delta.prices_created += 1;
                }
                Some((price_id, stored)) => {
                    // An unchanged price must not refresh the timestamp
                    if !same_price(stored, record.price) {
                        sqlx::query(
                            "UPDATE branch_prices SET price = $1, last_updated = $2
                             WHERE price_id = $3",
                        )
                        .bind(record.price)
                        .bind(now_utc())
                        .bind(price_id)
                        .execute(&mut *tx)
                        .await?;
                        delta.prices_updated += 1;
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(delta)
    }
}
