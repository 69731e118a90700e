// routes/products.rs - product search and catalog listings

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use std::sync::Arc;

use crate::db::DbPool;
use crate::error::{AppError, Result};
use crate::models::{Chain, CityQuery, ProductResult, SearchQuery};
use crate::search;
use crate::store;

pub fn routes(pool: DbPool) -> Router {
    Router::new()
        .route("/search", get(search_products))
        .route("/:barcode", get(product_by_barcode))
        .with_state(Arc::new(pool))
}

/// Cities and chains live directly under /api.
pub fn catalog_routes(pool: DbPool) -> Router {
    Router::new()
        .route("/api/cities", get(list_cities))
        .route("/api/chains", get(list_chains))
        .with_state(Arc::new(pool))
}

async fn search_products(
    State(pool): State<Arc<DbPool>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<ProductResult>>> {
    if query.query.trim().is_empty() {
        return Err(AppError::validation_error("query must not be empty"));
    }
    if query.city.trim().is_empty() {
        return Err(AppError::validation_error("city must not be empty"));
    }

    let limit = query.limit.unwrap_or(search::DEFAULT_LIMIT);
    let results = search::search_products(&pool, query.query.trim(), &query.city, limit).await?;
    Ok(Json(results))
}

async fn product_by_barcode(
    State(pool): State<Arc<DbPool>>,
    Path(barcode): Path<String>,
    Query(query): Query<CityQuery>,
) -> Result<Json<ProductResult>> {
    if query.city.trim().is_empty() {
        return Err(AppError::validation_error("city must not be empty"));
    }

    let product = search::product_by_barcode(&pool, &barcode, &query.city)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Product {} not available in {}", barcode, query.city))
        })?;
    Ok(Json(product))
}

async fn list_cities(State(pool): State<Arc<DbPool>>) -> Result<Json<Vec<String>>> {
    Ok(Json(store::list_cities(&pool).await?))
}

async fn list_chains(State(pool): State<Arc<DbPool>>) -> Result<Json<Vec<Chain>>> {
    Ok(Json(store::list_chains(&pool).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn get(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn search_requires_query_and_city() {
        let pool = crate::db::test_pool().await;
        let app = routes(pool);

        assert_eq!(
            get(app.clone(), "/search?query=milk").await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get(app.clone(), "/search?query=%20&city=Holon").await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get(app, "/search?query=milk&city=Holon").await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn unknown_barcode_is_not_found() {
        let pool = crate::db::test_pool().await;
        let app = routes(pool.clone());

        assert_eq!(get(app, "/0000000?city=Holon").await, StatusCode::NOT_FOUND);

        let catalog = catalog_routes(pool);
        assert_eq!(get(catalog.clone(), "/api/cities").await, StatusCode::OK);
        assert_eq!(get(catalog, "/api/chains").await, StatusCode::OK);
    }
}
