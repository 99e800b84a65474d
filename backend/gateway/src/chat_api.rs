//! Chat endpoints: turns, follow-up pickup and execution polling.

use std::convert::Infallible;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, info};

use flowchat_agent::{PollOutcome, TurnContext, TurnRequest};
use flowchat_core::ChatError;

use crate::api_error::ApiError;
use crate::client::ClientInfo;
use crate::server::GatewayState;

/// Handler for `POST /api/chat/:workflow_id`.
///
/// Answers with a JSON reply, or with `text/event-stream` when the request asks to stream.
pub async fn chat_turn(
    State(state): State<GatewayState>,
    Path(workflow_id): Path<String>,
    client: ClientInfo,
    payload: Result<Json<TurnRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|rejection| ChatError::Validation(rejection.body_text()))?;
    let ctx = TurnContext {
        workflow_id,
        origin: client.origin,
        client_addr: client.addr,
    };

    if request.stream {
        debug!(workflow_id = %ctx.workflow_id, "Starting SSE chat turn");
        let frames = state.orchestrator.handle_stream(&ctx, request).await?;
        let events = frames.map(|frame| Ok::<_, Infallible>(Event::default().data(frame.data())));
        return Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response());
    }

    let reply = state.orchestrator.handle_turn(&ctx, request).await?;
    Ok(Json(reply).into_response())
}

/// Handler for `GET /api/chat/sessions/:session_id/follow-ups`.
pub async fn follow_ups(State(state): State<GatewayState>, Path(session_id): Path<String>) -> Json<Value> {
    let messages = state.orchestrator.take_follow_ups(&session_id);
    Json(json!({
        "session_id": session_id,
        "messages": messages,
    }))
}

/// Handler for `POST /api/chat/executions/:execution_id/poll`.
pub async fn poll_execution(
    State(state): State<GatewayState>,
    Path(execution_id): Path<String>,
) -> Json<PollOutcome> {
    let outcome = state.orchestrator.poll(&execution_id).await;
    info!(execution_id = %execution_id, final_outcome = outcome.is_final(), "External poll");
    Json(outcome)
}
