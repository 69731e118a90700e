// routes/saved_carts.rs - per-user saved carts, bearer token required

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use validator::Validate;

use crate::auth::Claims;
use crate::compare;
use crate::db::DbPool;
use crate::error::{AppError, Result};
use crate::models::{CartItem, SaveCartRequest, SavedCart, SavedCartDetail, SavedCartSummary};
use crate::store;

pub fn routes(pool: DbPool) -> Router {
    Router::new()
        .route("/save", post(save_cart))
        .route("/list", get(list_carts))
        .route("/:cart_id", get(get_cart).delete(delete_cart))
        .route("/:cart_id/compare", get(compare_saved_cart))
        .with_state(Arc::new(pool))
}

fn parse_items(cart: &SavedCart) -> Vec<CartItem> {
    serde_json::from_str(&cart.items).unwrap_or_default()
}

async fn save_cart(
    claims: Claims,
    State(pool): State<Arc<DbPool>>,
    Json(payload): Json<SaveCartRequest>,
) -> Result<(StatusCode, Json<SavedCartDetail>)> {
    payload
        .validate()
        .map_err(|e| AppError::validation_error(e.to_string()))?;

    let user_id = claims.user_id()?;
    store::user_by_id(&pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    let items_json = serde_json::to_string(&payload.items)
        .map_err(|e| AppError::InternalError(format!("Failed to serialize items: {}", e)))?;

    let cart = store::upsert_saved_cart(
        &pool,
        user_id,
        payload.cart_name.trim(),
        payload.city.trim(),
        &items_json,
    )
    .await?;

    tracing::info!("Saved cart '{}' for user {}", cart.cart_name, user_id);

    let items = parse_items(&cart);
    Ok((
        StatusCode::CREATED,
        Json(SavedCartDetail {
            cart_id: cart.cart_id,
            cart_name: cart.cart_name,
            city: cart.city,
            items,
            created_at: cart.created_at,
            updated_at: cart.updated_at,
        }),
    ))
}

async fn list_carts(
    claims: Claims,
    State(pool): State<Arc<DbPool>>,
) -> Result<Json<Vec<SavedCartSummary>>> {
    let user_id = claims.user_id()?;
    let carts = store::list_saved_carts(&pool, user_id).await?;

    let summaries = carts
        .iter()
        .map(|cart| SavedCartSummary {
            cart_id: cart.cart_id,
            cart_name: cart.cart_name.clone(),
            city: cart.city.clone(),
            item_count: parse_items(cart).len(),
            created_at: cart.created_at.clone(),
            updated_at: cart.updated_at.clone(),
        })
        .collect();

    Ok(Json(summaries))
}

async fn get_cart(
    claims: Claims,
    State(pool): State<Arc<DbPool>>,
    Path(cart_id): Path<i64>,
) -> Result<Json<SavedCartDetail>> {
    let user_id = claims.user_id()?;
    let cart = store::saved_cart_by_id(&pool, user_id, cart_id)
        .await?
        .ok_or_else(|| AppError::not_found("Cart"))?;

    let items = parse_items(&cart);
    Ok(Json(SavedCartDetail {
        cart_id: cart.cart_id,
        cart_name: cart.cart_name,
        city: cart.city,
        items,
        created_at: cart.created_at,
        updated_at: cart.updated_at,
    }))
}

/// Re-run the cart comparator on the stored items in the stored city.
async fn compare_saved_cart(
    claims: Claims,
    State(pool): State<Arc<DbPool>>,
    Path(cart_id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let user_id = claims.user_id()?;
    let cart = store::saved_cart_by_id(&pool, user_id, cart_id)
        .await?
        .ok_or_else(|| AppError::not_found("Cart"))?;

    let city = cart
        .city
        .clone()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Saved cart has no city".to_string()))?;

    let items = parse_items(&cart);
    if items.is_empty() {
        return Err(AppError::BadRequest("Saved cart has no items".to_string()));
    }

    let comparison = compare::compare_cart(&pool, &items, &city).await?;

    Ok(Json(serde_json::json!({
        "cart_info": {
            "cart_id": cart.cart_id,
            "cart_name": cart.cart_name,
            "city": cart.city,
            "created_at": cart.created_at,
            "updated_at": cart.updated_at,
        },
        "comparison": comparison,
    })))
}

async fn delete_cart(
    claims: Claims,
    State(pool): State<Arc<DbPool>>,
    Path(cart_id): Path<i64>,
) -> Result<StatusCode> {
    let user_id = claims.user_id()?;
    let deleted = store::delete_saved_cart(&pool, user_id, cart_id).await?;
    if !deleted {
        return Err(AppError::not_found("Cart"));
    }

    tracing::info!("Deleted cart {} for user {}", cart_id, user_id);
    Ok(StatusCode::NO_CONTENT)
}
