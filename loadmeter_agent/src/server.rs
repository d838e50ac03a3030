//! HTTP boundary: serves the dashboard and runs measurements on `POST /start`.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::error::RequestError;
use crate::orchestrator::Orchestrator;
use crate::state::AppState;
use crate::types::LoadRequest;

pub const WORKERS_REQUESTED: &str = "x-loadmeter-workers-requested";
pub const WORKERS_STARTED: &str = "x-loadmeter-workers-started";

const DASHBOARD: &str = include_str!("../assets/dashboard.html");

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/start", post(start))
        .with_state(state)
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD)
}

// the dashboard form posts strings, API clients post numbers
#[derive(Deserialize)]
struct StartParams {
    utilization: Value,
    duration: Value,
}

fn integer(name: &str, v: &Value) -> Result<i64, RequestError> {
    let parsed = match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| RequestError::InvalidArgument(format!("{name} must be an integer, got {v}")))
}

/// Validate a `/start` body into a [`LoadRequest`].
pub fn parse_start(body: &[u8], max_duration_secs: u64) -> Result<LoadRequest, RequestError> {
    let params: StartParams = serde_json::from_slice(body)
        .map_err(|e| RequestError::InvalidArgument(format!("malformed request body: {e}")))?;
    let request = LoadRequest::new(
        integer("utilization", &params.utilization)?,
        integer("duration", &params.duration)?,
    )?;
    if request.duration_secs() > max_duration_secs {
        return Err(RequestError::InvalidArgument(format!(
            "duration must be at most {max_duration_secs} seconds, got {}",
            request.duration_secs()
        )));
    }
    Ok(request)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn start(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match parse_start(&body, state.config.max_duration_secs) {
        Ok(r) => r,
        Err(e) => {
            warn!("rejected /start: {e}");
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let Ok(_permit) = Arc::clone(&state.runs).try_acquire_owned() else {
        info!("rejected /start: run limit reached");
        return error_response(
            StatusCode::CONFLICT,
            "a measurement run is already in progress",
        );
    };

    let source = (state.source_factory)();
    match Orchestrator::new(source, state.settings).run(request).await {
        Ok(report) => {
            let mut resp = Json(report.samples).into_response();
            let headers = resp.headers_mut();
            headers.insert(
                HeaderName::from_static(WORKERS_REQUESTED),
                HeaderValue::from(report.load.workers_requested),
            );
            headers.insert(
                HeaderName::from_static(WORKERS_STARTED),
                HeaderValue::from(report.load.workers_started),
            );
            resp
        }
        Err(e) => {
            error!("run failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
