//! HTTP server exposing the message log.

use std::{future::Future, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::{net::TcpListener, sync::watch, time::timeout};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    api::{ApiError, AppendRequest, AppendResponse, QueryParams, QueryResponse, ValidationError},
    backend::LogBackend,
    store::{LogStore, StoreError},
    types::{Message, ServerOptions},
};

/// Application state shared across handlers.
pub struct AppState<B> {
    pub store: Arc<LogStore<B>>,
    pub options: ServerOptions,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            options: self.options.clone(),
        }
    }
}

/// Create the router with the message and health endpoints.
pub fn create_router<B: LogBackend>(state: AppState<B>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route(
            "/message",
            post(handle_append::<B>).get(handle_query::<B>),
        )
        .route("/livez", get(handle_health::<B>))
        .route("/readyz", get(handle_health::<B>))
        .layer(cors)
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Run a store call under the per-request deadline.
///
/// When the deadline passes the store future is dropped, which abandons the
/// in-flight backend command.
async fn with_deadline<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, ApiError> {
    match timeout(deadline, call).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => Err(ApiError::Timeout),
    }
}

/// POST /message - Log a message
async fn handle_append<B: LogBackend>(
    State(state): State<AppState<B>>,
    body: Result<Json<AppendRequest>, JsonRejection>,
) -> Result<Json<AppendResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ValidationError::InvalidBody(e.body_text()))?;
    let request = request.validate()?;

    let message = Message::now(request.user_id, request.session_id, request.text);
    let id = with_deadline(state.options.request_timeout, state.store.append(&message))
        .await
        .inspect_err(|e| {
            error!(
                user_id = %message.user_id,
                session_id = %message.session_id,
                timestamp = message.timestamp,
                error = %e,
                "Failed to add message to stream"
            )
        })?;

    info!(
        user_id = %message.user_id,
        session_id = %message.session_id,
        timestamp = id.millis(),
        "Message logged"
    );

    Ok(Json(AppendResponse {
        timestamp: id.millis(),
    }))
}

/// GET /message - Query messages
async fn handle_query<B: LogBackend>(
    State(state): State<AppState<B>>,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ValidationError::InvalidQuery(e.body_text()))?;
    let query = params.validate()?;

    let messages = with_deadline(
        state.options.request_timeout,
        state
            .store
            .query_since(&query.user_id, &query.session_id, query.timestamp),
    )
    .await
    .inspect_err(|e| {
        error!(
            user_id = %query.user_id,
            session_id = %query.session_id,
            timestamp = query.timestamp,
            error = %e,
            "Failed to query messages"
        )
    })?;

    info!(
        user_id = %query.user_id,
        session_id = %query.session_id,
        timestamp = query.timestamp,
        count = messages.len(),
        "Messages queried"
    );

    Ok(Json(QueryResponse { messages }))
}

/// GET /livez, /readyz - Backend reachability
async fn handle_health<B: LogBackend>(State(state): State<AppState<B>>) -> Response {
    let error = match timeout(state.options.request_timeout, state.store.ping()).await {
        Ok(Ok(())) => {
            return Json(json!({
                "status": "healthy",
                "service": "msglog"
            }))
            .into_response();
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => "timed out waiting for the store".to_string(),
    };

    error!(error = %error, "Health check failed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "status": "unhealthy",
            "error": error
        })),
    )
        .into_response()
}

/// Serve on `listener` until `shutdown` resolves.
///
/// After the signal, in-flight requests get `shutdown_timeout` to finish
/// before the server stops waiting for them.
pub async fn serve<B, F>(listener: TcpListener, state: AppState<B>, shutdown: F) -> std::io::Result<()>
where
    B: LogBackend,
    F: Future<Output = ()> + Send + 'static,
{
    let shutdown_timeout = state.options.shutdown_timeout;
    let router = create_router(state);

    let (draining_tx, mut draining_rx) = watch::channel(false);
    let server = async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Shutting down server...");
                let _ = draining_tx.send(true);
            })
            .await
    };
    let drain_deadline = async move {
        if draining_rx.wait_for(|draining| *draining).await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = server => result,
        _ = drain_deadline => {
            warn!(timeout = ?shutdown_timeout, "Graceful shutdown timed out, dropping open connections");
            Ok(())
        }
    }
}

/// Bind to the configured address and serve until `shutdown` resolves.
pub async fn start_server<B, F>(
    store: Arc<LogStore<B>>,
    options: ServerOptions,
    shutdown: F,
) -> std::io::Result<()>
where
    B: LogBackend,
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", options.host, options.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Starting message log server on {}", listener.local_addr()?);

    serve(listener, AppState { store, options }, shutdown).await
}
