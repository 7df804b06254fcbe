//! HTTP routes for the presentation layer.
//!
//! Handlers translate requests into engine calls and render the engine's
//! authoritative result; they hold no business logic.
use crate::api_types::{
    AcceptTradeRequest, BookView, CreateTradeRequest, ErrorBody, HealthResponse, TradeQuery,
    UserProfile,
};
use crate::error::TradeError;
use crate::state::AppState;
use crate::trade::Trade;
use crate::types::{BookId, TradeId, UserId};
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State, rejection::JsonRejection, rejection::QueryRejection},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use tracing::{error, warn};

/// Header carrying the authenticated caller, set by the auth layer in front
pub const USER_HEADER: &str = "x-user-id";

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/trades", post(create_trade).get(list_trades))
        .route("/trades/{id}", get(get_trade))
        .route("/trades/{id}/accept", post(accept_trade))
        .route("/trades/{id}/reject", post(reject_trade))
        .route("/trades/{id}/cancel", post(cancel_trade))
        .route("/trades/{id}/confirm", post(confirm_trade))
        .route("/books/{id}", get(get_book))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/books", get(list_user_books))
        .with_state(state)
}

pub struct ApiError(pub TradeError);

impl From<TradeError> for ApiError {
    fn from(e: TradeError) -> Self {
        ApiError(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(TradeError::InvalidRequest(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(TradeError::InvalidRequest(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(code = self.0.code(), "{}", self.0);
        } else {
            warn!(code = self.0.code(), "{}", self.0);
        }
        let body = ErrorBody {
            code: self.0.code(),
            msg: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// The authenticated caller
pub struct Actor(pub UserId);

impl FromRequestParts<Arc<AppState>> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|h| h.to_str().ok())
            .filter(|h| !h.is_empty())
            .map(UserId::from)
            .ok_or(TradeError::Unauthenticated)?;

        if !state.service.users().contains(&user)? {
            return Err(TradeError::Unauthenticated.into());
        }
        Ok(Actor(user))
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        service: "book-exchange",
    })
}

async fn create_trade(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    payload: Result<Json<CreateTradeRequest>, JsonRejection>,
) -> Result<Json<Trade>, ApiError> {
    let Json(req) = payload?;
    let trade = state.service.create_trade(
        &actor,
        &req.requested_book,
        req.offered_book.as_ref(),
        req.message,
    )?;
    Ok(Json(trade))
}

async fn list_trades(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    query: Result<Query<TradeQuery>, QueryRejection>,
) -> Result<Json<Vec<Trade>>, ApiError> {
    let Query(query) = query?;
    Ok(Json(state.service.list_trades(&actor, query.role)?))
}

async fn get_trade(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<Trade>, ApiError> {
    Ok(Json(state.service.get_trade(&TradeId::from(id), &actor)?))
}

async fn accept_trade(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    payload: Result<Json<AcceptTradeRequest>, JsonRejection>,
) -> Result<Json<Trade>, ApiError> {
    let Json(req) = payload?;
    let decision = req.into_decision()?;
    let trade = state
        .service
        .accept_trade(&TradeId::from(id), &actor, decision)?;
    Ok(Json(trade))
}

async fn reject_trade(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<Trade>, ApiError> {
    Ok(Json(state.service.reject_trade(&TradeId::from(id), &actor)?))
}

async fn cancel_trade(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<Trade>, ApiError> {
    Ok(Json(state.service.cancel_trade(&TradeId::from(id), &actor)?))
}

async fn confirm_trade(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Json<Trade>, ApiError> {
    Ok(Json(
        state.service.confirm_receipt(&TradeId::from(id), &actor)?,
    ))
}

async fn get_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BookView>, ApiError> {
    let id = BookId::from(id);
    let book = state.service.books().get_book(&id)?;
    let listed = state.service.is_listed(&id)?;
    Ok(Json(BookView { book, listed }))
}

async fn list_user_books(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<BookView>>, ApiError> {
    let owner = UserId::from(id);
    // unknown owners are NotFound rather than an empty shelf
    state.service.users().get_user(&owner)?;

    let mut views = Vec::new();
    for book in state.service.books().books_of(&owner)? {
        let listed = state.service.is_listed(&book.id)?;
        views.push(BookView { book, listed });
    }
    Ok(Json(views))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UserProfile>, ApiError> {
    let user = state.service.users().get_user(&UserId::from(id))?;
    Ok(Json(UserProfile::from(user)))
}
