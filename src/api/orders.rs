//! Order-entry endpoints: place, look up, replace, and cancel orders.

use crate::api::error::Error;
use crate::api::{lock_engine, EngineHandle};
use crate::order::{self, Order, OrderType, Side, TimeInForce};
use axum::extract::{Path, State};
use axum::routing::{delete, post};
use axum::{Json, Router};
use axum_extra::extract::WithRejection;
use axum_valid::Validified;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use validify::{Payload, Validify};

/// Validated JSON body: deserialization and rule failures short-circuit into
/// [`Error`] through its `ValidationRejection` conversion.
type Body<T> = WithRejection<Validified<Json<T>>, Error>;

#[derive(Debug, Deserialize, Validify, Payload, ToSchema)]
pub struct PlaceOrderRequest {
    /// Client-assigned order id; must not collide with a resident order.
    #[validate(range(min = 1.0))]
    pub id: order::Id,
    pub side: Side,
    pub order_type: OrderType,
    pub tif: TimeInForce,
    /// Decimal limit price. Ignored for market orders.
    #[validate(range(min = 0.0))]
    pub price: f64,
    #[validate(range(min = 1.0))]
    pub quantity: order::Quantity,
    /// Account the order trades for; empty means the default account.
    pub account: String,
}

#[derive(Debug, Deserialize, Validify, Payload, ToSchema)]
pub struct ModifyOrderRequest {
    /// New decimal price. Keeping the current price preserves time priority.
    #[validate(range(min = 0.01))]
    pub price: f64,
    #[validate(range(min = 1.0))]
    pub quantity: order::Quantity,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PlaceOrderResponse {
    pub id: order::Id,
    /// Whether any part of the order rested in the book.
    pub resting: bool,
    /// Unfilled quantity still resting (zero when fully filled or discarded).
    pub remaining: order::Quantity,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderStatusResponse {
    pub id: order::Id,
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderView {
    pub id: order::Id,
    pub side: Side,
    pub order_type: OrderType,
    pub tif: TimeInForce,
    pub price: f64,
    pub quantity: order::Quantity,
    pub filled: order::Quantity,
    pub remaining: order::Quantity,
    pub account: String,
}

impl From<&Order> for OrderView {
    fn from(value: &Order) -> Self {
        OrderView {
            id: value.id,
            side: value.side,
            order_type: value.kind,
            tif: value.tif,
            price: order::price_to_decimal(value.price),
            quantity: value.quantity,
            filled: value.filled,
            remaining: value.remaining(),
            account: value.account.clone(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(place_order, order_by_id, modify_order, cancel_order),
    components(schemas(
        PlaceOrderRequest,
        ModifyOrderRequest,
        PlaceOrderResponse,
        OrderStatusResponse,
        OrderView
    ))
)]
pub struct OrdersApi;

pub fn router() -> Router<EngineHandle> {
    Router::new()
        .route("/orders", post(place_order))
        .route(
            "/orders/{id}",
            delete(cancel_order).get(order_by_id).patch(modify_order),
        )
}

fn parse_price(decimal: f64) -> Result<order::Price, Error> {
    order::price_from_decimal(decimal).ok_or_else(|| {
        Error::BadRequest(
            "INVALID_PRICE".into(),
            format!("price {decimal} cannot be represented on the tick grid"),
        )
    })
}

/// Place a new order
#[utoipa::path(
    post,
    path = "/orders",
    request_body = PlaceOrderRequest,
    responses(
        (status = 200, description = "Order accepted", body = PlaceOrderResponse),
        (status = 400, description = "Invalid, duplicate, or risk-rejected order"),
        (status = 500, description = "Internal error"),
    )
)]
async fn place_order(
    State(engine): State<EngineHandle>,
    WithRejection(Validified(Json(req)), _): Body<PlaceOrderRequest>,
) -> Result<Json<PlaceOrderResponse>, Error> {
    let price = parse_price(req.price)?;
    let mut engine = lock_engine(&engine);
    let order = Order::new(
        req.id,
        req.side,
        req.order_type,
        req.tif,
        price,
        req.quantity,
        engine.symbol().to_string(),
        req.account,
    );

    let id = match engine.add_order(order) {
        Ok(id) => {
            metrics::counter!("matchbook_orders_accepted_total").increment(1);
            id
        }
        Err(err) => {
            metrics::counter!("matchbook_orders_rejected_total").increment(1);
            return Err(err.into());
        }
    };
    let (resting, remaining) = engine
        .get(id)
        .map_or((false, 0), |order| (true, order.remaining()));
    Ok(Json(PlaceOrderResponse {
        id,
        resting,
        remaining,
    }))
}

/// Get a resting order by id
#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(
        ("id" = u64, Path, description = "Client-assigned order id"),
    ),
    responses(
        (status = 200, description = "Order returned", body = OrderView),
        (status = 404, description = "No resting order with this id"),
    )
)]
async fn order_by_id(
    State(engine): State<EngineHandle>,
    Path(id): Path<order::Id>,
) -> Result<Json<OrderView>, Error> {
    let engine = lock_engine(&engine);
    engine
        .get(id)
        .map(|order| Json(OrderView::from(order)))
        .ok_or_else(|| Error::NotFound("ORDER_NOT_FOUND".into(), format!("order {id} not found")))
}

/// Replace a resting order's price and/or quantity
#[utoipa::path(
    patch,
    path = "/orders/{id}",
    params(
        ("id" = u64, Path, description = "Client-assigned order id"),
    ),
    request_body = ModifyOrderRequest,
    responses(
        (status = 200, description = "Order replaced", body = OrderStatusResponse),
        (status = 400, description = "Invalid or risk-rejected modify"),
        (status = 404, description = "No resting order with this id"),
    )
)]
async fn modify_order(
    State(engine): State<EngineHandle>,
    Path(id): Path<order::Id>,
    WithRejection(Validified(Json(req)), _): Body<ModifyOrderRequest>,
) -> Result<Json<OrderStatusResponse>, Error> {
    let price = parse_price(req.price)?;
    let mut engine = lock_engine(&engine);
    engine.modify_order(id, price, req.quantity)?;
    Ok(Json(OrderStatusResponse {
        id,
        status: "REPLACED".to_string(),
    }))
}

/// Cancel a resting order
#[utoipa::path(
    delete,
    path = "/orders/{id}",
    params(
        ("id" = u64, Path, description = "Client-assigned order id"),
    ),
    responses(
        (status = 200, description = "Order cancelled", body = OrderStatusResponse),
        (status = 404, description = "No resting order with this id"),
    )
)]
async fn cancel_order(
    State(engine): State<EngineHandle>,
    Path(id): Path<order::Id>,
) -> Result<Json<OrderStatusResponse>, Error> {
    let mut engine = lock_engine(&engine);
    engine.cancel_order(id)?;
    Ok(Json(OrderStatusResponse {
        id,
        status: "CANCELLED".to_string(),
    }))
}
