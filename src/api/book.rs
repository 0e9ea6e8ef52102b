//! Read-only market-data endpoints: depth and best prices.

use crate::api::error::Error;
use crate::api::{lock_engine, EngineHandle};
use crate::order;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

const DEFAULT_DEPTH_LEVELS: usize = 10;

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    /// Maximum price levels per side.
    pub levels: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LevelView {
    pub price: f64,
    pub quantity: order::Quantity,
    pub orders: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DepthResponse {
    /// Best bids first.
    pub bids: Vec<LevelView>,
    /// Best asks first.
    pub asks: Vec<LevelView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BestPricesResponse {
    pub bid: Option<f64>,
    pub bid_size: order::Quantity,
    pub ask: Option<f64>,
    pub ask_size: order::Quantity,
}

#[derive(OpenApi)]
#[openapi(
    paths(depth, best),
    components(schemas(LevelView, DepthResponse, BestPricesResponse))
)]
pub struct BookApi;

pub fn router() -> Router<EngineHandle> {
    Router::new()
        .route("/book/depth", get(depth))
        .route("/book/best", get(best))
}

/// Aggregated book depth
#[utoipa::path(
    get,
    path = "/book/depth",
    params(
        ("levels" = Option<usize>, Query, description = "Maximum price levels per side (default 10)"),
    ),
    responses(
        (status = 200, description = "Depth snapshot", body = DepthResponse),
    )
)]
async fn depth(
    State(engine): State<EngineHandle>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<DepthResponse>, Error> {
    let engine = lock_engine(&engine);
    let depth = engine.depth(query.levels.unwrap_or(DEFAULT_DEPTH_LEVELS));
    let view = |level: &order::book::DepthLevel| LevelView {
        price: order::price_to_decimal(level.price),
        quantity: level.quantity,
        orders: level.orders,
    };
    Ok(Json(DepthResponse {
        bids: depth.bids.iter().map(view).collect(),
        asks: depth.asks.iter().map(view).collect(),
    }))
}

/// Best bid and ask with sizes
#[utoipa::path(
    get,
    path = "/book/best",
    responses(
        (status = 200, description = "Top of book", body = BestPricesResponse),
    )
)]
async fn best(State(engine): State<EngineHandle>) -> Result<Json<BestPricesResponse>, Error> {
    let engine = lock_engine(&engine);
    let (bid, ask) = engine.best_levels();
    Ok(Json(BestPricesResponse {
        bid: bid.map(|(price, _)| order::price_to_decimal(price)),
        bid_size: bid.map_or(0, |(_, size)| size),
        ask: ask.map(|(price, _)| order::price_to_decimal(price)),
        ask_size: ask.map_or(0, |(_, size)| size),
    }))
}
