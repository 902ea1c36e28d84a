//! HTTP ingest endpoints for agent data channels.
//!
//! Two routes, both authenticated by a signed one-shot token:
//!
//! - `POST /agents/shares/{token}`: the agent uploads its share catalog as
//!   JSON.
//! - `POST /agents/files/{token}`: the agent streams file bytes; the body
//!   becomes the byte source of a pending upload ticket, and the response
//!   is held until the transfer engine finishes consuming the stream.

use crate::fabric::{AgentFabric, AgentShareEntry};
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use drift_core::{CoreError, UploadCompletion};
use futures::TryStreamExt;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use uuid::Uuid;

/// Header carrying the hex-encoded token signature.
pub const SIGNATURE_HEADER: &str = "x-drift-signature";

/// Build the agent ingest router.
#[must_use]
pub fn router(fabric: Arc<AgentFabric>) -> Router {
    Router::new()
        .route("/agents/shares/:token", post(upload_shares))
        .route("/agents/files/:token", post(upload_file))
        .with_state(fabric)
}

fn signature_from(headers: &HeaderMap) -> Result<Vec<u8>, Response> {
    let value = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "missing signature").into_response())?;
    hex::decode(value)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "malformed signature").into_response())
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn upload_shares(
    State(fabric): State<Arc<AgentFabric>>,
    Path(token): Path<Uuid>,
    headers: HeaderMap,
    axum::Json(entries): axum::Json<Vec<AgentShareEntry>>,
) -> Response {
    let signature = match signature_from(&headers) {
        Ok(signature) => signature,
        Err(response) => return response,
    };
    match fabric.validate_upload_credential(token, &signature) {
        Ok(agent) => {
            fabric.store_share_catalog(&agent, entries);
            StatusCode::OK.into_response()
        }
        Err(err) => {
            tracing::warn!(%token, error = %err, "share upload rejected");
            status_for(&err).into_response()
        }
    }
}

async fn upload_file(
    State(fabric): State<Arc<AgentFabric>>,
    Path(token): Path<Uuid>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let signature = match signature_from(&headers) {
        Ok(signature) => signature,
        Err(response) => return response,
    };
    if let Err(err) = fabric.validate_upload_credential(token, &signature) {
        tracing::warn!(%token, error = %err, "file upload rejected");
        return status_for(&err).into_response();
    }

    let stream = body
        .into_data_stream()
        .map_err(|err| std::io::Error::other(err.to_string()));
    let source = Box::new(StreamReader::new(stream));

    let (completion, done) = UploadCompletion::channel();
    if !fabric.deliver_stream(token, source, completion) {
        // Authenticated but no pending ticket: the fetch timed out or was
        // never issued for this token.
        return (StatusCode::UNAUTHORIZED, "no pending upload").into_response();
    }

    // Hold the response until the engine finishes with the stream.
    match done.await {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(err)) => {
            tracing::warn!(%token, error = %err, "upload ended abnormally");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
