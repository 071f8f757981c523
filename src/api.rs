// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! HTTP transport for the ledger.
//!
//! Thin JSON adapter: each handler translates a request into one [`Ledger`]
//! call and maps [`LedgerError`] kinds onto status codes. No business rules
//! live here.
//!
//! ## Endpoints
//!
//! - `GET  /api/v1/customers/{id}/points` - Current balance (unknown customers report 0)
//! - `POST /api/v1/customers/{id}/points/add` - Accrue points
//! - `POST /api/v1/customers/{id}/points/redeem` - Redeem points
//! - `GET  /api/v1/customers/{id}/points/history?limit=&offset=` - Transaction history
//! - `GET  /api/v1/health` - Liveness
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:8081/api/v1/customers/cust-001/points/add \
//!   -H "Content-Type: application/json" \
//!   -d '{"points": 100, "reason": "signup"}'
//!
//! curl http://localhost:8081/api/v1/customers/cust-001/points
//! ```

use crate::base::{CustomerId, Points};
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::transaction::Transaction;
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::sync::Arc;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 500;

/// Request body for accruals and redemptions.
///
/// `points` is taken as any JSON number so fractions and out-of-range values
/// are rejected as invalid amounts rather than as unparseable bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsRequest {
    pub points: Number,
    #[serde(default)]
    pub reason: Option<String>,
}

impl PointsRequest {
    /// The requested amount as a whole number.
    pub fn amount(&self) -> Result<i64, AppError> {
        self.points
            .as_i64()
            .ok_or_else(|| AppError::MalformedAmount(self.points.clone()))
    }
}

/// Response body for balance queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsResponse {
    pub id: CustomerId,
    pub points: Points,
}

/// Response body for committed accruals and redemptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResponse {
    pub message: String,
    pub points: Points,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Response body for errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Shared application state containing the ledger.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
}

/// Errors returned to HTTP clients as `{error, code}` bodies.
#[derive(Debug)]
pub enum AppError {
    Ledger(LedgerError),
    /// `points` was a JSON number but not a whole `i64`.
    MalformedAmount(Number),
    /// The body was not a valid `PointsRequest`.
    MalformedBody(String),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError::Ledger(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::MalformedBody(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, code) = match self {
            AppError::Ledger(err) => {
                let status = match &err {
                    LedgerError::InvalidAmount { .. } => StatusCode::BAD_REQUEST,
                    LedgerError::InsufficientBalance { .. } => StatusCode::CONFLICT,
                    LedgerError::UnknownCustomer(_) => StatusCode::NOT_FOUND,
                    LedgerError::BalanceOverflow => StatusCode::UNPROCESSABLE_ENTITY,
                    LedgerError::LogCorrupted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if err.is_fatal() {
                    tracing::error!(error = %err, "ledger failure surfaced to client");
                }
                (status, err.to_string(), err.kind())
            }
            AppError::MalformedAmount(points) => (
                StatusCode::BAD_REQUEST,
                format!("amount must be a positive whole number, got {points}"),
                "INVALID_AMOUNT",
            ),
            AppError::MalformedBody(detail) => (StatusCode::BAD_REQUEST, detail, "INVALID_REQUEST"),
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// GET /customers/{id}/points
async fn get_points(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<PointsResponse> {
    let customer_id = CustomerId::from(id);
    let balance = state.ledger.get_balance(&customer_id);
    Json(PointsResponse {
        id: customer_id,
        points: balance.points,
    })
}

/// POST /customers/{id}/points/add
async fn add_points(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<PointsRequest>, JsonRejection>,
) -> Result<Json<MutationResponse>, AppError> {
    let Json(request) = payload?;
    let reason = non_empty(request.reason.as_deref());
    let receipt = state
        .ledger
        .accrue(&CustomerId::from(id), request.amount()?, reason)?;
    Ok(Json(MutationResponse {
        message: "Points added successfully".to_string(),
        points: receipt.balance,
    }))
}

/// POST /customers/{id}/points/redeem
async fn redeem_points(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<PointsRequest>, JsonRejection>,
) -> Result<Json<MutationResponse>, AppError> {
    let Json(request) = payload?;
    let reason = non_empty(request.reason.as_deref());
    let receipt = state
        .ledger
        .redeem(&CustomerId::from(id), request.amount()?, reason)?;
    Ok(Json(MutationResponse {
        message: "Points redeemed successfully".to_string(),
        points: receipt.balance,
    }))
}

/// GET /customers/{id}/points/history
async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<Transaction>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    let offset = query.offset.unwrap_or(0);
    let page = state
        .ledger
        .history(&CustomerId::from(id), limit, offset)
        .map(Arc::unwrap_or_clone)
        .collect();
    Json(page)
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "loyalty-points".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn non_empty(reason: Option<&str>) -> Option<&str> {
    reason.map(str::trim).filter(|r| !r.is_empty())
}

/// Builds the `/api/v1` router over a shared ledger.
pub fn router(ledger: Arc<Ledger>) -> Router {
    let api = Router::new()
        .route("/customers/{id}/points", get(get_points))
        .route("/customers/{id}/points/add", post(add_points))
        .route("/customers/{id}/points/redeem", post(redeem_points))
        .route("/customers/{id}/points/history", get(get_history))
        .route("/health", get(health));

    Router::new()
        .nest("/api/v1", api)
        .with_state(AppState { ledger })
}
