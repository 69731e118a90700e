use std::cmp::Ordering;

use crate::db::DbPool;
use crate::error::Result;
use crate::models::{
    round2, BranchWithChain, CartComparison, CartItem, ItemDetail, Savings, StorePrice,
};
use crate::store::{self, now_utc};

/// Candidate branches emitted in a comparison response.
const MAX_STORES_IN_RESPONSE: usize = 20;

/// Select the branch that minimizes the cart's total cost in a city,
/// favoring branches that stock the entire basket.
///
/// A cheaper store that is missing items never beats a complete store that
/// is modestly more expensive: candidates sort by available item count
/// first, total price second.
pub async fn compare_cart(pool: &DbPool, items: &[CartItem], city: &str) -> Result<CartComparison> {
    tracing::info!("Comparing cart with {} items in {}", items.len(), city);

    // Zero-quantity lines contribute nothing and count toward neither
    // availability nor missing; they are echoed back but not scored.
    let effective: Vec<&CartItem> = items.iter().filter(|i| i.quantity > 0).collect();

    let branches = store::branches_in_city(pool, city).await?;
    if branches.is_empty() {
        tracing::warn!("No stores found in city: {}", city);
        return Ok(empty_comparison(items, &effective, city));
    }
    tracing::info!("Found {} stores in {}", branches.len(), city);

    let mut store_prices = Vec::new();
    for branch in &branches {
        let store_price = price_cart_at_branch(pool, branch, &effective).await?;
        // A branch with nothing from the basket is not a candidate
        if store_price.available_items > 0 {
            store_prices.push(store_price);
        }
    }

    store_prices.sort_by(|a, b| {
        b.available_items.cmp(&a.available_items).then(
            a.total_price
                .partial_cmp(&b.total_price)
                .unwrap_or(Ordering::Equal),
        )
    });

    let savings = complete_basket_savings(&store_prices, effective.len() as i64);
    let cheapest_store = store_prices.first().cloned();
    store_prices.truncate(MAX_STORES_IN_RESPONSE);

    Ok(CartComparison {
        success: true,
        city: city.to_string(),
        total_items: effective.len(),
        cart_items: items.to_vec(),
        cheapest_store,
        all_stores: store_prices,
        savings,
        comparison_time: now_utc(),
    })
}

fn empty_comparison(items: &[CartItem], effective: &[&CartItem], city: &str) -> CartComparison {
    CartComparison {
        success: true,
        city: city.to_string(),
        total_items: effective.len(),
        cart_items: items.to_vec(),
        cheapest_store: None,
        all_stores: Vec::new(),
        savings: None,
        comparison_time: now_utc(),
    }
}

/// Price the whole cart at one branch. Each item resolves through the
/// branch's own chain; a barcode the chain does not carry is a missing item.
async fn price_cart_at_branch(
    pool: &DbPool,
    branch: &BranchWithChain,
    items: &[&CartItem],
) -> Result<StorePrice> {
    let mut total_price = 0.0;
    let mut available_items = 0;
    let mut missing_items = 0;
    let mut items_detail = Vec::with_capacity(items.len());

    for item in items {
        match store::price_for(pool, branch.chain_id, &item.barcode, branch.branch_id).await? {
            Some((price, product_name)) => {
                let item_total = price * item.quantity as f64;
                total_price += item_total;
                available_items += 1;
                items_detail.push(ItemDetail {
                    barcode: item.barcode.clone(),
                    name: product_name,
                    quantity: item.quantity,
                    unit_price: round2(price),
                    total_price: round2(item_total),
                    available: true,
                });
            }
            None => {
                missing_items += 1;
                items_detail.push(ItemDetail {
                    barcode: item.barcode.clone(),
                    name: item
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("Product {}", item.barcode)),
                    quantity: item.quantity,
                    unit_price: 0.0,
                    total_price: 0.0,
                    available: false,
                });
            }
        }
    }

    Ok(StorePrice {
        branch_id: branch.branch_id,
        branch_name: branch.name.clone(),
        branch_address: branch.address.clone(),
        city: branch.city.clone(),
        chain_name: branch.chain_name.clone(),
        chain_display_name: branch.chain_display_name.clone(),
        available_items,
        missing_items,
        total_price: round2(total_price),
        items_detail,
    })
}

/// Savings messaging: when more than one branch stocks the complete basket,
/// the delta between the worst and best complete-basket totals.
fn complete_basket_savings(sorted_stores: &[StorePrice], cart_len: i64) -> Option<Savings> {
    let complete: Vec<&StorePrice> = sorted_stores
        .iter()
        .filter(|s| s.available_items == cart_len && s.missing_items == 0)
        .collect();

    if complete.len() < 2 {
        return None;
    }

    let best = complete
        .iter()
        .map(|s| s.total_price)
        .fold(f64::INFINITY, f64::min);
    let worst = complete
        .iter()
        .map(|s| s.total_price)
        .fold(f64::NEG_INFINITY, f64::max);

    let amount = round2(worst - best);
    let percent = if worst > 0.0 {
        round2(amount / worst * 100.0)
    } else {
        0.0
    };

    Some(Savings { amount, percent })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::fixtures;

    fn item(barcode: &str, quantity: i64) -> CartItem {
        CartItem {
            barcode: barcode.to_string(),
            quantity,
            name: None,
        }
    }

    #[tokio::test]
    async fn cheapest_complete_store_wins() {
        let pool = db::test_pool().await;
        let shufersal = fixtures::chain_id(&pool, "shufersal").await;
        let victory = fixtures::chain_id(&pool, "victory").await;

        let a = fixtures::add_branch(&pool, shufersal, "1", "Shufersal-A", "חולון").await;
        let b = fixtures::add_branch(&pool, victory, "2", "Victory-B", "חולון").await;

        fixtures::add_price(&pool, shufersal, a, "milk", "חלב", 5.90).await;
        fixtures::add_price(&pool, shufersal, a, "bread", "לחם", 7.50).await;
        fixtures::add_price(&pool, victory, b, "milk", "חלב", 5.50).await;
        fixtures::add_price(&pool, victory, b, "bread", "לחם", 6.90).await;

        let cart = vec![item("milk", 2), item("bread", 1)];
        let result = compare_cart(&pool, &cart, "חולון").await.unwrap();

        let cheapest = result.cheapest_store.unwrap();
        assert_eq!(cheapest.chain_name, "victory");
        assert_eq!(cheapest.total_price, 17.90);
        assert_eq!(cheapest.available_items, 2);
        assert_eq!(cheapest.missing_items, 0);

        assert_eq!(result.all_stores.len(), 2);
        assert_eq!(result.all_stores[1].chain_name, "shufersal");
        assert_eq!(result.all_stores[1].total_price, 19.30);

        // Two complete-basket branches → savings delta is emitted
        let savings = result.savings.unwrap();
        assert_eq!(savings.amount, 1.40);
        assert!((savings.percent - 7.25).abs() < 0.01);
    }

    #[tokio::test]
    async fn complete_basket_beats_cheaper_partial() {
        let pool = db::test_pool().await;
        let shufersal = fixtures::chain_id(&pool, "shufersal").await;
        let victory = fixtures::chain_id(&pool, "victory").await;

        let cheap = fixtures::add_branch(&pool, shufersal, "1", "Cheap-A", "חולון").await;
        let complete = fixtures::add_branch(&pool, victory, "2", "Complete-B", "חולון").await;

        fixtures::add_price(&pool, shufersal, cheap, "milk", "חלב", 1.00).await;
        fixtures::add_price(&pool, victory, complete, "milk", "חלב", 5.00).await;
        fixtures::add_price(&pool, victory, complete, "bread", "לחם", 5.00).await;

        let cart = vec![item("milk", 1), item("bread", 1)];
        let result = compare_cart(&pool, &cart, "חולון").await.unwrap();

        let cheapest = result.cheapest_store.unwrap();
        assert_eq!(cheapest.branch_name.as_deref(), Some("Complete-B"));
        assert_eq!(cheapest.total_price, 10.00);
        assert_eq!(cheapest.available_items, 2);

        assert_eq!(result.all_stores[1].branch_name.as_deref(), Some("Cheap-A"));
        assert_eq!(result.all_stores[1].available_items, 1);
        assert_eq!(result.all_stores[1].missing_items, 1);

        // Only one complete-basket branch → no savings block
        assert!(result.savings.is_none());

        // Candidate ordering invariant: availability desc, then total asc
        for pair in result.all_stores.windows(2) {
            assert!(
                pair[0].available_items > pair[1].available_items
                    || (pair[0].available_items == pair[1].available_items
                        && pair[0].total_price <= pair[1].total_price)
            );
        }
    }

    #[tokio::test]
    async fn item_stocked_nowhere_yields_success_with_no_stores() {
        let pool = db::test_pool().await;
        let shufersal = fixtures::chain_id(&pool, "shufersal").await;
        let branch = fixtures::add_branch(&pool, shufersal, "1", "A", "חולון").await;
        fixtures::add_price(&pool, shufersal, branch, "milk", "חלב", 5.0).await;

        let cart = vec![item("no-such-barcode", 1)];
        let result = compare_cart(&pool, &cart, "חולון").await.unwrap();

        assert!(result.success);
        assert!(result.cheapest_store.is_none());
        assert!(result.all_stores.is_empty());
        assert!(result.savings.is_none());
    }

    #[tokio::test]
    async fn availability_identity_holds_per_branch() {
        let pool = db::test_pool().await;
        let shufersal = fixtures::chain_id(&pool, "shufersal").await;
        let branch = fixtures::add_branch(&pool, shufersal, "1", "A", "חולון").await;
        fixtures::add_price(&pool, shufersal, branch, "milk", "חלב", 5.0).await;
        fixtures::add_price(&pool, shufersal, branch, "bread", "לחם", 7.0).await;

        let cart = vec![item("milk", 3), item("bread", 1), item("eggs", 2)];
        let result = compare_cart(&pool, &cart, "חולון").await.unwrap();

        let store = result.cheapest_store.unwrap();
        assert_eq!(
            store.available_items + store.missing_items,
            result.total_items as i64
        );
        // total equals the sum of price × quantity over available items
        assert_eq!(store.total_price, 22.0);
        let detail_total: f64 = store
            .items_detail
            .iter()
            .filter(|d| d.available)
            .map(|d| d.total_price)
            .sum();
        assert_eq!(store.total_price, round2(detail_total));
    }

    #[tokio::test]
    async fn zero_quantity_items_are_echoed_but_not_scored() {
        let pool = db::test_pool().await;
        let shufersal = fixtures::chain_id(&pool, "shufersal").await;
        let branch = fixtures::add_branch(&pool, shufersal, "1", "A", "חולון").await;
        fixtures::add_price(&pool, shufersal, branch, "milk", "חלב", 5.0).await;
        fixtures::add_price(&pool, shufersal, branch, "bread", "לחם", 7.0).await;

        let cart = vec![item("milk", 1), item("bread", 0)];
        let result = compare_cart(&pool, &cart, "חולון").await.unwrap();

        assert_eq!(result.cart_items.len(), 2);
        assert_eq!(result.total_items, 1);

        let store = result.cheapest_store.unwrap();
        assert_eq!(store.total_price, 5.0);
        assert_eq!(store.available_items, 1);
        assert_eq!(store.missing_items, 0);
        assert_eq!(store.items_detail.len(), 1);
    }

    #[tokio::test]
    async fn unknown_city_is_a_successful_empty_result() {
        let pool = db::test_pool().await;
        let result = compare_cart(&pool, &[item("milk", 1)], "עיר לא קיימת")
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.cheapest_store.is_none());
        assert!(result.all_stores.is_empty());
    }
}
