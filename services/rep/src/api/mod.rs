//! HTTP API for the scheduler and operators.
//!
//! - `GET /ping`: executor health
//! - `GET /state`: cell state for placement decisions
//! - `POST /work`: place work, answering with the items that failed
//! - `POST /evacuate`: start draining the cell

pub mod error;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use cell_models::{CellState, Work};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use self::error::ApiError;
use crate::auction_cell::AuctionCellClient;
use crate::evacuation::Evacuatable;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub auction: Arc<AuctionCellClient>,
    pub evacuatable: Evacuatable,
}

/// Create the rep router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/state", get(cell_state))
        .route("/work", post(perform))
        .route("/evacuate", post(evacuate))
}

async fn ping(State(state): State<AppState>) -> StatusCode {
    if state.auction.healthy().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn cell_state(State(state): State<AppState>) -> Result<Json<CellState>, ApiError> {
    let (cell_state, healthy) = state.auction.state().await.map_err(|e| {
        error!(error = %e, "Failed to fetch cell state");
        ApiError::from(e)
    })?;

    if !healthy {
        return Err(ApiError::service_unavailable(
            "cell_unhealthy",
            "executor failed its health check",
        ));
    }

    Ok(Json(cell_state))
}

async fn perform(
    State(state): State<AppState>,
    Json(work): Json<Work>,
) -> Result<Json<Work>, ApiError> {
    let failed = state.auction.perform(work).await.map_err(|e| {
        error!(error = %e, "Failed to perform work");
        ApiError::from(e)
    })?;
    Ok(Json(failed))
}

async fn evacuate(State(state): State<AppState>) -> StatusCode {
    info!("Evacuation requested");
    state.evacuatable.evacuate();
    StatusCode::ACCEPTED
}
