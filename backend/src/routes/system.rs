// routes/system.rs - operational statistics

use axum::{extract::State, response::Json, routing::get, Router};
use sqlx::Any;
use std::sync::Arc;

use crate::db::DbPool;
use crate::error::Result;
use crate::schema;

pub fn routes(pool: DbPool) -> Router {
    Router::new()
        .route("/statistics", get(statistics))
        .with_state(Arc::new(pool))
}

async fn statistics(State(pool): State<Arc<DbPool>>) -> Result<Json<serde_json::Value>> {
    let counts = schema::row_counts(&pool).await?;

    let (total, avg, min, max): (i64, Option<f64>, Option<f64>, Option<f64>) =
        sqlx::query_as::<Any, (i64, Option<f64>, Option<f64>, Option<f64>)>(
            "SELECT COUNT(*), AVG(price), MIN(price), MAX(price) FROM branch_prices",
        )
        .fetch_one(pool.as_ref())
        .await?;

    Ok(Json(serde_json::json!({
        "tables": counts,
        "prices": {
            "total": total,
            "average": avg.unwrap_or(0.0),
            "min": min.unwrap_or(0.0),
            "max": max.unwrap_or(0.0),
        },
    })))
}
