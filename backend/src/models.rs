use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

// ============================================================================
// CATALOG ROWS
// ============================================================================

/// A supermarket chain. Seeded at schema creation, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Chain {
    pub chain_id: i64,
    /// Lowercase short tag, e.g. "shufersal".
    pub name: String,
    pub display_name: Option<String>,
}

/// A physical store, identified by its chain-native store_id plus the chain.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Branch {
    pub branch_id: i64,
    pub chain_id: i64,
    pub store_id: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: String,
}

/// Branch joined with its chain; what the search and comparison paths read.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BranchWithChain {
    pub branch_id: i64,
    pub chain_id: i64,
    pub store_id: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: String,
    pub chain_name: String,
    pub chain_display_name: Option<String>,
}

/// A (barcode, chain) pair. The same barcode in two chains is two rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChainProduct {
    pub chain_product_id: i64,
    pub chain_id: i64,
    pub barcode: String,
    pub name: String,
}

/// Current observed price for a chain product at one branch.
/// `last_updated` is an RFC 3339 UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BranchPrice {
    pub price_id: i64,
    pub chain_product_id: i64,
    pub branch_id: i64,
    pub price: f64,
    pub last_updated: String,
}

// ============================================================================
// USERS & SAVED CARTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: String,
}

/// Saved cart row. `items` holds the ordered item list as JSON text.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SavedCart {
    pub cart_id: i64,
    pub user_id: i64,
    pub cart_name: String,
    pub city: Option<String>,
    pub items: String,
    pub created_at: String,
    pub updated_at: String,
}

// ============================================================================
// AUTH DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 6, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub email: String,
}

// ============================================================================
// SEARCH DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub city: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CityQuery {
    pub city: String,
}

/// One branch's price for a product.
#[derive(Debug, Clone, Serialize)]
pub struct PricePoint {
    pub branch_id: i64,
    pub branch_name: Option<String>,
    pub branch_address: Option<String>,
    pub chain_id: i64,
    pub chain_name: String,
    pub chain_display_name: Option<String>,
    pub price: f64,
    pub is_cheapest: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceStats {
    pub min_price: f64,
    pub max_price: f64,
    pub avg_price: f64,
    pub price_range: f64,
    pub store_count: i64,
}

/// A product grouped by barcode across chains, with every stocking branch
/// in the target city.
#[derive(Debug, Clone, Serialize)]
pub struct ProductResult {
    pub barcode: String,
    pub name: String,
    pub prices_by_store: Vec<PricePoint>,
    pub price_stats: PriceStats,
    /// Price normalized by the package size named in the label, when one is
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_unit: Option<crate::units::UnitPrice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_chain: Option<CrossChainComparison>,
}

/// One chain's best offer for a barcode.
#[derive(Debug, Clone, Serialize)]
pub struct ChainDeal {
    pub chain_name: String,
    pub price: f64,
    pub branch_id: i64,
}

/// Same barcode carried by more than one chain: where it is cheapest and
/// what switching saves.
#[derive(Debug, Clone, Serialize)]
pub struct CrossChainComparison {
    pub best_deal: ChainDeal,
    pub worst_deal: ChainDeal,
    pub savings: f64,
    pub savings_percent: f64,
}

// ============================================================================
// CART COMPARISON DTOs
// ============================================================================

/// One line of a shopping cart. Used both on the wire and for the JSON
/// persisted into saved_carts.items.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CartItem {
    #[validate(length(min = 1, max = 50))]
    pub barcode: String,

    #[validate(range(min = 0))]
    pub quantity: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CompareCartRequest {
    #[validate(length(min = 1, max = 100))]
    pub city: String,

    #[validate(length(min = 1), nested)]
    pub items: Vec<CartItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemDetail {
    pub barcode: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub total_price: f64,
    pub available: bool,
}

/// One branch's result for a cart: what it stocks and what it would cost.
#[derive(Debug, Clone, Serialize)]
pub struct StorePrice {
    pub branch_id: i64,
    pub branch_name: Option<String>,
    pub branch_address: Option<String>,
    pub city: String,
    pub chain_name: String,
    pub chain_display_name: Option<String>,
    pub available_items: i64,
    pub missing_items: i64,
    pub total_price: f64,
    pub items_detail: Vec<ItemDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Savings {
    pub amount: f64,
    pub percent: f64,
}

#[derive(Debug, Serialize)]
pub struct CartComparison {
    pub success: bool,
    pub city: String,
    pub total_items: usize,
    pub cart_items: Vec<CartItem>,
    pub cheapest_store: Option<StorePrice>,
    pub all_stores: Vec<StorePrice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub savings: Option<Savings>,
    pub comparison_time: String,
}

// ============================================================================
// SAVED CART DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct SaveCartRequest {
    #[validate(length(min = 1, max = 100))]
    pub cart_name: String,

    #[validate(length(min = 1, max = 100))]
    pub city: String,

    #[validate(length(min = 1), nested)]
    pub items: Vec<CartItem>,
}

#[derive(Debug, Serialize)]
pub struct SavedCartSummary {
    pub cart_id: i64,
    pub cart_name: String,
    pub city: Option<String>,
    pub item_count: usize,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct SavedCartDetail {
    pub cart_id: i64,
    pub cart_name: String,
    pub city: Option<String>,
    pub items: Vec<CartItem>,
    pub created_at: String,
    pub updated_at: String,
}

/// Round to two decimal places; all money leaves the system in this shape.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Two prices are the same when they agree at two-decimal resolution.
pub fn same_price(a: f64, b: f64) -> bool {
    (a * 100.0).round() as i64 == (b * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_truncates_noise() {
        assert_eq!(round2(17.899999999), 17.9);
        assert_eq!(round2(3.14159), 3.14);
    }

    #[test]
    fn same_price_at_two_decimals() {
        assert!(same_price(5.90, 5.9000001));
        assert!(!same_price(5.90, 5.91));
    }

    #[test]
    fn cart_item_rejects_negative_quantity() {
        let item = CartItem {
            barcode: "7290000000001".to_string(),
            quantity: -1,
            name: None,
        };
        assert!(item.validate().is_err());

        let ok = CartItem {
            barcode: "7290000000001".to_string(),
            quantity: 0,
            name: None,
        };
        assert!(ok.validate().is_ok());
    }
}
