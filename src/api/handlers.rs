//! Request Handlers
//!
//! Thin adapters from HTTP onto the round engines of the platform.

use super::{errors::ApiError, middleware::RequestId};
use crate::engine::{HistoryPage, PeriodView, RoomInfo, SimulateReport, StateSnapshot};
use crate::errors::EngineError;
use crate::factory::Platform;
use crate::games::types::{Amount, BetRequest, BetType, GameKind, Order, Selection};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub platform: Arc<Platform>,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub games: Vec<GameKind>,
}

fn parse_game(request_id: &RequestId, game: &str) -> Result<GameKind, ApiError> {
    game.parse::<GameKind>()
        .map_err(|e| ApiError::engine(request_id.0.clone(), e.into()))
}

fn parse_room(request_id: &RequestId, bet_type: &str) -> Result<BetType, ApiError> {
    bet_type
        .parse::<BetType>()
        .map_err(|e| ApiError::engine(request_id.0.clone(), e.into()))
}

fn engine_err(request_id: &RequestId) -> impl Fn(EngineError) -> ApiError + '_ {
    move |e| ApiError::engine(request_id.0.clone(), e)
}

/// Health check handler
/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
        games: state.platform.engines().map(|e| e.kind()).collect(),
    })
}

/// Prometheus text exposition
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.platform.metrics.render(),
    )
}

#[derive(Debug, Deserialize)]
pub struct PlaceBetBody {
    pub uid: u64,
    pub bet_type: BetType,
    pub selection: Selection,
    pub stake: Amount,
    pub request_id: String,
}

/// POST /api/:game/bet
pub async fn place_bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    Json(body): Json<PlaceBetBody>,
) -> Result<Json<Order>, ApiError> {
    let kind = parse_game(&request_id, &game)?;
    let engine = state.platform.engine(kind).map_err(engine_err(&request_id))?;
    let order = engine
        .place_bet(BetRequest {
            uid: body.uid,
            bet_type: body.bet_type,
            selection: body.selection,
            stake: body.stake,
            request_id: body.request_id,
        })
        .await
        .map_err(engine_err(&request_id))?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub uid: u64,
    pub order_id: String,
}

/// POST /api/:game/cancel
pub async fn cancel_order_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    Json(body): Json<CancelBody>,
) -> Result<Json<Order>, ApiError> {
    let kind = parse_game(&request_id, &game)?;
    let engine = state.platform.engine(kind).map_err(engine_err(&request_id))?;
    let order = engine
        .cancel_order(body.uid, &body.order_id)
        .await
        .map_err(engine_err(&request_id))?;
    Ok(Json(order))
}

/// GET /api/:game/rooms
pub async fn room_info_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
) -> Result<Json<RoomInfo>, ApiError> {
    let kind = parse_game(&request_id, &game)?;
    let engine = state.platform.engine(kind).map_err(engine_err(&request_id))?;
    Ok(Json(engine.room_info()))
}

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    #[serde(default)]
    pub uid: Option<u64>,
}

/// GET /api/:game/state/:bet_type?uid={uid}
pub async fn state_sync_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path((game, bet_type)): Path<(String, String)>,
    Query(query): Query<StateQuery>,
) -> Result<Json<StateSnapshot>, ApiError> {
    let kind = parse_game(&request_id, &game)?;
    let bet_type = parse_room(&request_id, &bet_type)?;
    let engine = state.platform.engine(kind).map_err(engine_err(&request_id))?;
    let snapshot = engine
        .state_sync(bet_type, query.uid)
        .map_err(engine_err(&request_id))?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// GET /api/:game/history/:bet_type?cursor={period_id}&limit={n}
pub async fn period_history_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path((game, bet_type)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, ApiError> {
    let kind = parse_game(&request_id, &game)?;
    let bet_type = parse_room(&request_id, &bet_type)?;
    let engine = state.platform.engine(kind).map_err(engine_err(&request_id))?;
    let page = engine
        .period_history(bet_type, query.cursor.as_deref(), query.limit)
        .map_err(engine_err(&request_id))?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct SettleBody {
    pub bet_type: BetType,
    #[serde(default)]
    pub number: Option<u8>,
}

/// POST /api/admin/:game/settle
pub async fn simulate_settle_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    Json(body): Json<SettleBody>,
) -> Result<Json<SimulateReport>, ApiError> {
    let kind = parse_game(&request_id, &game)?;
    let engine = state.platform.engine(kind).map_err(engine_err(&request_id))?;
    let report = engine
        .simulate_settle_orders(body.bet_type, body.number)
        .await
        .map_err(engine_err(&request_id))?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct OverrideBody {
    pub bet_type: BetType,
    pub period_id: String,
    pub number: u8,
}

/// POST /api/admin/:game/override
pub async fn override_number_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    Json(body): Json<OverrideBody>,
) -> Result<Json<PeriodView>, ApiError> {
    let kind = parse_game(&request_id, &game)?;
    let engine = state.platform.engine(kind).map_err(engine_err(&request_id))?;
    let period = engine
        .override_number(body.bet_type, &body.period_id, body.number)
        .await
        .map_err(engine_err(&request_id))?;
    Ok(Json(period))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomLimitBody {
    pub enabled: bool,
}

/// POST /api/admin/room-limit
pub async fn room_limit_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RoomLimitBody>,
) -> Json<RoomLimitBody> {
    state.platform.area_limit.update_room_limit(body.enabled);
    Json(body)
}

#[derive(Debug, Deserialize)]
pub struct DepositBody {
    pub uid: u64,
    pub amount: Amount,
    #[serde(default)]
    pub promoter_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DepositResponse {
    pub uid: u64,
    pub balance: Amount,
}

/// POST /api/admin/deposit
pub async fn deposit_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<DepositBody>,
) -> Result<Json<DepositResponse>, ApiError> {
    if body.amount <= 0 {
        return Err(ApiError::bad_request(
            request_id.0.clone(),
            "amount must be positive".to_string(),
        ));
    }
    let wallet = &state.platform.wallet;
    wallet
        .ensure_wallet(body.uid, body.promoter_code)
        .await
        .map_err(engine_err(&request_id))?;
    let balance = wallet
        .deposit(body.uid, body.amount, "admin deposit")
        .await
        .map_err(engine_err(&request_id))?;
    Ok(Json(DepositResponse { uid: body.uid, balance }))
}
