//! Order submission and lookup endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, ProductId, TenantId, UnitId};
use orders::{OrderAggregate, SubmitOrder};
use rust_decimal::Decimal;
use serde::Serialize;

use super::parse_uuid;
use crate::AppState;
use crate::error::ApiError;

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOrderResponse {
    pub order_id: OrderId,
    pub order_code: String,
    pub total_amount: Decimal,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: OrderId,
    pub order_code: String,
    pub customer_id: CustomerId,
    pub tenant_id: TenantId,
    pub status: String,
    pub payment_method: String,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLineResponse>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineResponse {
    pub product_id: ProductId,
    pub unit_id: UnitId,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl From<&OrderAggregate> for OrderResponse {
    fn from(order: &OrderAggregate) -> Self {
        Self {
            id: order.id(),
            order_code: order.order_code().to_string(),
            customer_id: order.customer_id(),
            tenant_id: order.tenant_id(),
            status: order.status().to_string(),
            payment_method: order.payment_method().to_string(),
            total_amount: order.total_amount(),
            created_at: order.created_at(),
            lines: order
                .lines()
                .iter()
                .map(|line| OrderLineResponse {
                    product_id: line.product_id,
                    unit_id: line.unit_id,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    line_total: line.line_total(),
                })
                .collect(),
        }
    }
}

// -- Handlers --

/// POST /orders — prices, validates and persists a new order.
#[tracing::instrument(skip(state, cmd))]
pub async fn submit(
    State(state): State<AppState>,
    Json(cmd): Json<SubmitOrder>,
) -> Result<(StatusCode, Json<SubmitOrderResponse>), ApiError> {
    let outcome = state.orders.submit_order(cmd).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitOrderResponse {
            order_id: outcome.order_id,
            order_code: outcome.order_code,
            total_amount: outcome.total_amount,
        }),
    ))
}

/// GET /orders/:id — load an order by ID.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = OrderId::from_uuid(parse_uuid(&id)?);
    let order = state.orders.get_order(order_id).await?;

    Ok(Json(OrderResponse::from(&order)))
}
