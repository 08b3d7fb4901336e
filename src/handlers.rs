// HTTP request handlers for the intent API
//
// `/markets` and `/positions` run against the local simulation store.
// `/ledger/*` drives the remote ledger through the orchestrator and answers
// as soon as an action has a handle; confirmation continues in the
// background.

use crate::app_state::{LedgerSession, SessionSnapshot, SharedState};
use crate::error::{CoreError, ErrorKind, TaggedError};
use crate::models::*;
use crate::orchestrator::{Authorization, PendingAction, Submission};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

// ===== ROUTES =====

pub fn router(state: SharedState) -> Router {
    Router::new()
        // ===== LOCAL SIMULATION =====
        .route("/markets", get(list_markets))
        .route("/markets", post(create_market))
        .route("/markets/:id", get(get_market))
        .route("/markets/:id/quote", get(quote))
        .route("/markets/:id/buy", post(buy))
        .route("/markets/:id/resolve", post(resolve))
        .route("/markets/:id/cancel", post(cancel))
        .route("/markets/:id/claim", post(claim))
        .route("/positions/:user", get(get_positions))

        // ===== REMOTE LEDGER =====
        .route("/ledger", get(ledger_status))
        .route("/ledger/actions", get(ledger_actions))
        .route("/ledger/authorize", post(ledger_authorize))
        .route("/ledger/markets", post(ledger_create_market))
        .route("/ledger/markets/:id/buy", post(ledger_buy))
        .route("/ledger/markets/:id/resolve", post(ledger_resolve))
        .route("/ledger/markets/:id/cancel", post(ledger_cancel))
        .route("/ledger/markets/:id/claim", post(ledger_claim))

        // ===== HEALTH CHECK =====
        .route("/", get(health_check))
        .route("/health", get(health_check))

        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

// ===== ERROR MAPPING =====

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match (&self.0, self.0.kind()) {
            (CoreError::MarketNotFound(_), _) => StatusCode::NOT_FOUND,
            (CoreError::Unauthorized { .. }, _) => StatusCode::FORBIDDEN,
            (CoreError::ActionAlreadyInFlight(_), _) => StatusCode::CONFLICT,
            (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::ConcurrencyRace) => StatusCode::CONFLICT,
            (_, ErrorKind::Transient) => StatusCode::SERVICE_UNAVAILABLE,
            (_, ErrorKind::LedgerRejection) => StatusCode::UNPROCESSABLE_ENTITY,
            (_, ErrorKind::Storage) | (_, ErrorKind::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body: TaggedError = self.0.to_tagged();
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

// ===== HEALTH =====

pub async fn health_check(State(state): State<SharedState>) -> Json<Value> {
    let markets = state.sim.lock().await.markets().len();
    Json(json!({
        "status": "ok",
        "local_markets": markets,
        "remote_ledger": state.ledger.is_some(),
        "token_decimals": state.codec.decimals(),
    }))
}

// ===== LOCAL SIMULATION =====

pub async fn list_markets(State(state): State<SharedState>) -> ApiResult<Vec<MarketView>> {
    let now = state.now();
    let sim = state.sim.lock().await;
    Ok(Json(
        sim.markets()
            .into_iter()
            .map(|m| MarketView::from_market(m, &state.codec, now))
            .collect(),
    ))
}

pub async fn get_market(
    State(state): State<SharedState>,
    Path(market_id): Path<u64>,
) -> ApiResult<MarketView> {
    let sim = state.sim.lock().await;
    let market = sim.market(market_id)?;
    Ok(Json(MarketView::from_market(market, &state.codec, state.now())))
}

pub async fn create_market(
    State(state): State<SharedState>,
    Json(request): Json<CreateMarketRequest>,
) -> ApiResult<ActionResponse<MarketView>> {
    let mut sim = state.sim.lock().await;
    let receipt = sim.create_market(
        &request.question,
        &request.option_a,
        &request.option_b,
        request.duration_secs,
        &request.creator,
        request.metadata,
    )?;
    Ok(Json(ActionResponse {
        success: true,
        handle: receipt.handle,
        result: MarketView::from_market(&receipt.value, &state.codec, state.now()),
    }))
}

pub async fn quote(
    State(state): State<SharedState>,
    Path(market_id): Path<u64>,
    Query(query): Query<QuoteQuery>,
) -> ApiResult<QuoteView> {
    let amount = state.codec.to_minor_units(&query.amount)?;
    let sim = state.sim.lock().await;
    let quote = sim.quote(market_id, query.side, amount)?;
    Ok(Json(QuoteView::from_quote(&quote, &state.codec)))
}

pub async fn buy(
    State(state): State<SharedState>,
    Path(market_id): Path<u64>,
    Json(request): Json<BuyRequest>,
) -> ApiResult<ActionResponse<TradeView>> {
    let amount = state.codec.to_minor_units(&request.amount)?;
    let mut sim = state.sim.lock().await;
    let receipt = sim.buy(market_id, &request.user, request.side, amount)?;
    Ok(Json(ActionResponse {
        success: true,
        handle: receipt.handle,
        result: TradeView::from_receipt(&receipt.value, &state.codec, state.now()),
    }))
}

pub async fn resolve(
    State(state): State<SharedState>,
    Path(market_id): Path<u64>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<ActionResponse<MarketView>> {
    let mut sim = state.sim.lock().await;
    let receipt = sim.resolve(market_id, request.outcome, &request.actor)?;
    Ok(Json(ActionResponse {
        success: true,
        handle: receipt.handle,
        result: MarketView::from_market(&receipt.value, &state.codec, state.now()),
    }))
}

pub async fn cancel(
    State(state): State<SharedState>,
    Path(market_id): Path<u64>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<ActionResponse<MarketView>> {
    let mut sim = state.sim.lock().await;
    let receipt = sim.cancel(market_id, &request.actor)?;
    Ok(Json(ActionResponse {
        success: true,
        handle: receipt.handle,
        result: MarketView::from_market(&receipt.value, &state.codec, state.now()),
    }))
}

pub async fn claim(
    State(state): State<SharedState>,
    Path(market_id): Path<u64>,
    Json(request): Json<ClaimRequest>,
) -> ApiResult<ActionResponse<ClaimView>> {
    let mut sim = state.sim.lock().await;
    let receipt = sim.claim(market_id, &request.user)?;
    Ok(Json(ActionResponse {
        success: true,
        handle: receipt.handle,
        result: ClaimView::from_receipt(&receipt.value, &state.codec),
    }))
}

pub async fn get_positions(
    State(state): State<SharedState>,
    Path(user): Path<String>,
) -> ApiResult<Vec<PositionView>> {
    let sim = state.sim.lock().await;
    Ok(Json(
        sim.positions_for(&user)
            .into_iter()
            .map(|p| PositionView::from_position(p, &state.codec))
            .collect(),
    ))
}

// ===== REMOTE LEDGER =====

fn ledger(state: &SharedState) -> Result<&LedgerSession, ApiError> {
    state
        .ledger
        .as_ref()
        .ok_or_else(|| ApiError(CoreError::InvalidInput("no remote ledger configured".to_string())))
}

fn submitted(submission: Submission) -> Json<PendingAction> {
    Json(submission.action)
}

pub async fn ledger_status(State(state): State<SharedState>) -> ApiResult<SessionSnapshot> {
    Ok(Json(ledger(&state)?.session.snapshot().await))
}

pub async fn ledger_actions(State(state): State<SharedState>) -> ApiResult<Vec<PendingAction>> {
    let session = ledger(&state)?;
    let wallet = session.orchestrator.wallet_address();
    Ok(Json(session.orchestrator.tracker().for_wallet(wallet).await))
}

pub async fn ledger_authorize(
    State(state): State<SharedState>,
    Json(request): Json<AuthorizeRequest>,
) -> ApiResult<PendingAction> {
    let session = ledger(&state)?;
    let authorization = match request.amount {
        Some(amount) => Authorization::Exact(state.codec.to_minor_units(&amount)?),
        None => Authorization::Unlimited,
    };
    Ok(submitted(session.orchestrator.authorize(authorization).await?))
}

pub async fn ledger_create_market(
    State(state): State<SharedState>,
    Json(request): Json<LedgerCreateMarketRequest>,
) -> ApiResult<PendingAction> {
    let session = ledger(&state)?;
    let submission = session
        .orchestrator
        .create_market(
            &request.question,
            &request.option_a,
            &request.option_b,
            request.duration_secs,
            request.metadata,
        )
        .await?;
    Ok(submitted(submission))
}

pub async fn ledger_buy(
    State(state): State<SharedState>,
    Path(market_id): Path<u64>,
    Json(request): Json<LedgerBuyRequest>,
) -> ApiResult<PendingAction> {
    let session = ledger(&state)?;
    let amount = state.codec.to_minor_units(&request.amount)?;
    Ok(submitted(session.orchestrator.buy(market_id, request.side, amount).await?))
}

pub async fn ledger_resolve(
    State(state): State<SharedState>,
    Path(market_id): Path<u64>,
    Json(request): Json<LedgerResolveRequest>,
) -> ApiResult<PendingAction> {
    let session = ledger(&state)?;
    Ok(submitted(session.orchestrator.resolve(market_id, request.outcome).await?))
}

pub async fn ledger_cancel(
    State(state): State<SharedState>,
    Path(market_id): Path<u64>,
) -> ApiResult<PendingAction> {
    let session = ledger(&state)?;
    Ok(submitted(session.orchestrator.cancel(market_id).await?))
}

pub async fn ledger_claim(
    State(state): State<SharedState>,
    Path(market_id): Path<u64>,
) -> ApiResult<PendingAction> {
    let session = ledger(&state)?;
    Ok(submitted(session.orchestrator.claim(market_id).await?))
}
