//! Customer debt endpoints.

use axum::Json;
use axum::extract::{Path, State};
use common::{CustomerId, TenantId};
use orders::{DebtLedgerEntry, RecordRepayment};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::parse_uuid;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct RepaymentRequest {
    pub amount: Decimal,
    pub reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDebtResponse {
    pub customer_id: CustomerId,
    pub tenant_id: TenantId,
    pub current_debt: Decimal,
    pub entries: Vec<DebtLedgerEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentResponse {
    pub customer_id: CustomerId,
    pub current_debt: Decimal,
}

/// GET /customers/:id/debt — current debt and the ledger behind it.
#[tracing::instrument(skip(state))]
pub async fn debt(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CustomerDebtResponse>, ApiError> {
    let customer_id = CustomerId::from_uuid(parse_uuid(&id)?);
    let debt = state.orders.get_customer_debt(customer_id).await?;

    Ok(Json(CustomerDebtResponse {
        customer_id: debt.account.id,
        tenant_id: debt.account.tenant_id,
        current_debt: debt.account.current_debt,
        entries: debt.entries,
    }))
}

/// POST /customers/:id/repayments — record a repayment.
#[tracing::instrument(skip(state, req))]
pub async fn repay(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RepaymentRequest>,
) -> Result<Json<RepaymentResponse>, ApiError> {
    let customer_id = CustomerId::from_uuid(parse_uuid(&id)?);
    let account = state
        .orders
        .record_repayment(RecordRepayment::new(customer_id, req.amount, req.reason))
        .await?;

    Ok(Json(RepaymentResponse {
        customer_id: account.id,
        current_debt: account.current_debt,
    }))
}
