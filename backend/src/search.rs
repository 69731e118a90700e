use std::collections::HashMap;

use crate::db::DbPool;
use crate::error::Result;
use crate::models::{
    round2, ChainDeal, CrossChainComparison, PricePoint, PriceStats, ProductResult,
};
use crate::store::{self, PricePointRow};
use crate::units;

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

/// Substring product search scoped to a city.
///
/// Matching products are grouped by barcode across chains; for each barcode
/// every branch in the city that stocks it is listed with its price, plus
/// summary statistics. Products stocked in more stores sort first, ties
/// break on the cheaper minimum price.
pub async fn search_products(
    pool: &DbPool,
    query: &str,
    city: &str,
    limit: i64,
) -> Result<Vec<ProductResult>> {
    let limit = limit.clamp(1, MAX_LIMIT);
    tracing::info!("Searching for '{}' in {}", query, city);

    // Over-fetch to absorb cross-chain duplicates of the same barcode
    let matches = store::products_matching(pool, query, limit * 2).await?;
    if matches.is_empty() {
        return Ok(Vec::new());
    }

    // First name seen for a barcode wins
    let mut products: Vec<(String, String)> = Vec::new();
    for (barcode, name) in matches {
        if !products.iter().any(|(b, _)| *b == barcode) {
            products.push((barcode, name));
        }
    }
    products.truncate(limit as usize);

    let branches = store::branches_in_city(pool, city).await?;
    if branches.is_empty() {
        tracing::warn!("No branches found in city: {}", city);
        return Ok(Vec::new());
    }
    let branch_ids: Vec<i64> = branches.iter().map(|b| b.branch_id).collect();

    let mut results = Vec::with_capacity(products.len());
    for (barcode, name) in products {
        let points = store::price_points_in_branches(pool, &barcode, &branch_ids).await?;
        results.push(build_product(barcode, name, points));
    }

    results.sort_by(|a, b| {
        b.price_stats
            .store_count
            .cmp(&a.price_stats.store_count)
            .then(
                a.price_stats
                    .min_price
                    .partial_cmp(&b.price_stats.min_price)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    Ok(results)
}

/// Price distribution for one barcode in a city. None when the barcode is
/// unknown or stocked by no branch there.
pub async fn product_by_barcode(
    pool: &DbPool,
    barcode: &str,
    city: &str,
) -> Result<Option<ProductResult>> {
    let Some(name) = store::product_name_for_barcode(pool, barcode).await? else {
        return Ok(None);
    };

    let branches = store::branches_in_city(pool, city).await?;
    if branches.is_empty() {
        return Ok(None);
    }
    let branch_ids: Vec<i64> = branches.iter().map(|b| b.branch_id).collect();

    let points = store::price_points_in_branches(pool, barcode, &branch_ids).await?;
    if points.is_empty() {
        return Ok(None);
    }

    let cross_chain = cross_chain_comparison(&points);

    // The aggregate primitive and the listed points answer over the same
    // branch set; use the aggregates for the stats block.
    let agg = store::price_aggregates(pool, barcode, &branch_ids).await?;
    let mut product = build_product(barcode.to_string(), name, points);
    product.cross_chain = cross_chain;
    product.price_stats = PriceStats {
        min_price: round2(agg.min_price.unwrap_or(0.0)),
        max_price: round2(agg.max_price.unwrap_or(0.0)),
        avg_price: round2(agg.avg_price.unwrap_or(0.0)),
        price_range: round2(agg.max_price.unwrap_or(0.0) - agg.min_price.unwrap_or(0.0)),
        store_count: agg.store_count,
    };

    Ok(Some(product))
}

fn build_product(barcode: String, name: String, points: Vec<PricePointRow>) -> ProductResult {
    let stats = if points.is_empty() {
        PriceStats {
            min_price: 0.0,
            max_price: 0.0,
            avg_price: 0.0,
            price_range: 0.0,
            store_count: 0,
        }
    } else {
        let min = points.iter().map(|p| p.price).fold(f64::INFINITY, f64::min);
        let max = points.iter().map(|p| p.price).fold(f64::NEG_INFINITY, f64::max);
        let sum: f64 = points.iter().map(|p| p.price).sum();
        PriceStats {
            min_price: round2(min),
            max_price: round2(max),
            avg_price: round2(sum / points.len() as f64),
            price_range: round2(max - min),
            store_count: points.len() as i64,
        }
    };

    let min_price = stats.min_price;
    let prices_by_store = points
        .into_iter()
        .map(|p| PricePoint {
            branch_id: p.branch_id,
            branch_name: p.branch_name,
            branch_address: p.branch_address,
            chain_id: p.chain_id,
            chain_name: p.chain_name,
            chain_display_name: p.chain_display_name,
            price: round2(p.price),
            is_cheapest: crate::models::same_price(p.price, min_price),
        })
        .collect();

    let price_per_unit = if stats.store_count > 0 {
        units::price_per_unit(&name, stats.min_price)
    } else {
        None
    };

    ProductResult {
        barcode,
        name,
        prices_by_store,
        price_stats: stats,
        price_per_unit,
        cross_chain: None,
    }
}

/// When at least two chains carry the barcode in the city, the spread
/// between the cheapest and the dearest chain (each taken at its lowest
/// local price).
fn cross_chain_comparison(points: &[PricePointRow]) -> Option<CrossChainComparison> {
    let mut lowest_per_chain: HashMap<&str, &PricePointRow> = HashMap::new();
    for point in points {
        lowest_per_chain
            .entry(point.chain_name.as_str())
            .and_modify(|current| {
                if point.price < current.price {
                    *current = point;
                }
            })
            .or_insert(point);
    }

    if lowest_per_chain.len() < 2 {
        return None;
    }

    let best = lowest_per_chain
        .values()
        .min_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal))?;
    let worst = lowest_per_chain
        .values()
        .max_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal))?;

    let savings = round2(worst.price - best.price);
    let savings_percent = if worst.price > 0.0 {
        round2(savings / worst.price * 100.0)
    } else {
        0.0
    };

    Some(CrossChainComparison {
        best_deal: ChainDeal {
            chain_name: best.chain_name.clone(),
            price: round2(best.price),
            branch_id: best.branch_id,
        },
        worst_deal: ChainDeal {
            chain_name: worst.chain_name.clone(),
            price: round2(worst.price),
            branch_id: worst.branch_id,
        },
        savings,
        savings_percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::fixtures;

    async fn seeded_pool() -> DbPool {
        let pool = db::test_pool().await;
        let shufersal = fixtures::chain_id(&pool, "shufersal").await;
        let victory = fixtures::chain_id(&pool, "victory").await;

        let s1 = fixtures::add_branch(&pool, shufersal, "1", "שופרסל מרכז", "תל אביב").await;
        let s2 = fixtures::add_branch(&pool, shufersal, "2", "שופרסל צפון", "תל אביב").await;
        let v1 = fixtures::add_branch(&pool, victory, "10", "ויקטורי", "תל אביב").await;
        let far = fixtures::add_branch(&pool, shufersal, "3", "שופרסל חיפה", "חיפה").await;

        // Milk is everywhere, cottage only at Victory, beer only out of town
        fixtures::add_price(&pool, shufersal, s1, "7290111", "חלב 3%", 5.90).await;
        fixtures::add_price(&pool, shufersal, s2, "7290111", "חלב 3%", 6.10).await;
        fixtures::add_price(&pool, victory, v1, "7290111", "חלב טרי 3%", 5.50).await;
        fixtures::add_price(&pool, victory, v1, "7290222", "קוטג' 5% 250 גרם", 4.80).await;
        fixtures::add_price(&pool, shufersal, far, "7290333", "בירה חלב שחור", 9.90).await;

        pool
    }

    #[tokio::test]
    async fn groups_by_barcode_and_marks_cheapest() {
        let pool = seeded_pool().await;

        let results = search_products(&pool, "חלב", "תל אביב", 20).await.unwrap();

        // "חלב" matches milk (stocked in town) and the out-of-town beer label
        assert_eq!(results.len(), 2);

        let milk = &results[0];
        assert_eq!(milk.barcode, "7290111");
        assert_eq!(milk.price_stats.store_count, 3);
        assert_eq!(milk.price_stats.min_price, 5.50);
        assert_eq!(milk.price_stats.max_price, 6.10);
        assert_eq!(milk.price_stats.price_range, 0.60);

        // Cheapest-first ordering of points, flag on the Victory branch
        assert_eq!(milk.prices_by_store[0].price, 5.50);
        assert!(milk.prices_by_store[0].is_cheapest);
        assert!(!milk.prices_by_store[1].is_cheapest);

        // The beer is matched but unstocked in the city: zero stores, last
        let beer = &results[1];
        assert_eq!(beer.barcode, "7290333");
        assert_eq!(beer.price_stats.store_count, 0);
        assert!(beer.prices_by_store.is_empty());
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        let pool = seeded_pool().await;
        let results = search_products(&pool, "חלב", "תל אביב", 0).await.unwrap();
        assert_eq!(results.len(), 1); // clamped to 1
    }

    #[tokio::test]
    async fn unknown_city_returns_nothing() {
        let pool = seeded_pool().await;
        let results = search_products(&pool, "חלב", "אילת", 20).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn barcode_lookup_requires_local_stock() {
        let pool = seeded_pool().await;

        let product = product_by_barcode(&pool, "7290222", "תל אביב")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.name, "קוטג' 5% 250 גרם");
        assert_eq!(product.price_stats.store_count, 1);
        assert_eq!(product.price_stats.avg_price, 4.80);

        // One chain carries it → no cross-chain block; the label names a
        // package size → unit price present
        assert!(product.cross_chain.is_none());
        let unit = product.price_per_unit.unwrap();
        assert_eq!(unit.unit, "g");
        assert_eq!(unit.value, 250.0);

        // Known barcode, but nothing in this city
        assert!(product_by_barcode(&pool, "7290333", "תל אביב")
            .await
            .unwrap()
            .is_none());
        // Unknown barcode
        assert!(product_by_barcode(&pool, "0000000", "תל אביב")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn cross_chain_spread_on_a_shared_barcode() {
        let pool = seeded_pool().await;

        let milk = product_by_barcode(&pool, "7290111", "תל אביב")
            .await
            .unwrap()
            .unwrap();

        // Each chain is taken at its lowest local price: Victory 5.50,
        // Shufersal 5.90 (not the 6.10 branch)
        let cross = milk.cross_chain.unwrap();
        assert_eq!(cross.best_deal.chain_name, "victory");
        assert_eq!(cross.best_deal.price, 5.50);
        assert_eq!(cross.worst_deal.chain_name, "shufersal");
        assert_eq!(cross.worst_deal.price, 5.90);
        assert_eq!(cross.savings, 0.40);
        assert!((cross.savings_percent - 6.78).abs() < 0.01);
    }
}
