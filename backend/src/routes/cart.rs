// routes/cart.rs - whole-cart comparison

use axum::{extract::State, response::Json, routing::post, Router};
use std::sync::Arc;
use validator::Validate;

use crate::compare;
use crate::db::DbPool;
use crate::error::{AppError, Result};
use crate::models::{CartComparison, CompareCartRequest};

pub fn routes(pool: DbPool) -> Router {
    Router::new()
        .route("/compare", post(compare_cart))
        .with_state(Arc::new(pool))
}

async fn compare_cart(
    State(pool): State<Arc<DbPool>>,
    Json(payload): Json<CompareCartRequest>,
) -> Result<Json<CartComparison>> {
    // Empty carts and negative quantities stop here; the engine itself
    // assumes validated input.
    payload
        .validate()
        .map_err(|e| AppError::validation_error(e.to_string()))?;
    if payload.city.trim().is_empty() {
        return Err(AppError::validation_error("city must not be empty"));
    }

    let comparison = compare::compare_cart(&pool, &payload.items, payload.city.trim()).await?;
    Ok(Json(comparison))
}
