//! REST control surface.
//!
//! Thin `axum` layer mapping the §control endpoints 1:1 onto manager
//! commands. Every response uses the `{state: "ok"|"error", ...}` envelope;
//! an error carries a human-readable `status` message. No processing logic
//! lives here.

use anyhow::Context;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::manager::ManagerHandle;
use crate::parameters::{Background, ParameterUpdate, Parameters};
use crate::statistics::Statistics;

/// URL prefix of the control API.
pub const API_PREFIX: &str = "/api/v1";

/// Response envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    /// `"ok"` or `"error"`.
    pub state: &'static str,
    /// Status message; on `"error"` this is the failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Statistics payload for `/statistics`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Statistics>,
    /// Parameters payload for `/parameters`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self {
            state: "ok",
            status: None,
            statistics: None,
            parameters: None,
        }
    }

    fn ok_status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::ok()
        }
    }

    fn ok_statistics(statistics: Statistics) -> Self {
        Self {
            statistics: Some(statistics),
            ..Self::ok()
        }
    }

    fn ok_parameters(parameters: Parameters) -> Self {
        Self {
            parameters: Some(parameters),
            ..Self::ok()
        }
    }

    fn error(error: impl std::fmt::Display) -> Self {
        Self {
            state: "error",
            status: Some(error.to_string()),
            statistics: None,
            parameters: None,
        }
    }
}

/// `POST /background` body; absent or null `data` clears the background.
#[derive(Debug, Default, Deserialize)]
pub struct BackgroundBody {
    /// Advisory label for the background image.
    #[serde(default)]
    pub filename: String,
    /// Background image as nested rows.
    #[serde(default)]
    pub data: Option<Vec<Vec<u16>>>,
}

/// Build the control router for a manager handle.
pub fn router(handle: ManagerHandle) -> Router {
    let api = Router::new()
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/status", get(status))
        .route("/statistics", get(statistics))
        .route("/parameters", get(get_parameters).post(set_parameters))
        .route("/background", post(set_background))
        .with_state(handle);

    Router::new()
        .nest(API_PREFIX, api)
        .layer(CorsLayer::permissive())
}

/// Bind `address` and serve the control API until the task is cancelled.
pub async fn serve(address: &str, handle: ManagerHandle) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind REST interface on {}", address))?;
    log::info!("REST interface listening on {}", address);

    axum::serve(listener, router(handle)).await?;
    Ok(())
}

async fn start(State(handle): State<ManagerHandle>) -> Json<ApiResponse> {
    Json(match handle.start().await {
        Ok(state) => ApiResponse::ok_status(state.to_string()),
        Err(e) => ApiResponse::error(e),
    })
}

async fn stop(State(handle): State<ManagerHandle>) -> Json<ApiResponse> {
    Json(match handle.stop().await {
        Ok(state) => ApiResponse::ok_status(state.to_string()),
        Err(e) => ApiResponse::error(e),
    })
}

async fn status(State(handle): State<ManagerHandle>) -> Json<ApiResponse> {
    Json(match handle.status().await {
        Ok(state) => ApiResponse::ok_status(state.to_string()),
        Err(e) => ApiResponse::error(e),
    })
}

async fn statistics(State(handle): State<ManagerHandle>) -> Json<ApiResponse> {
    Json(match handle.statistics().await {
        Ok(statistics) => ApiResponse::ok_statistics(statistics),
        Err(e) => ApiResponse::error(e),
    })
}

async fn get_parameters(State(handle): State<ManagerHandle>) -> Json<ApiResponse> {
    Json(match handle.parameters().await {
        Ok(parameters) => ApiResponse::ok_parameters(parameters),
        Err(e) => ApiResponse::error(e),
    })
}

async fn set_parameters(
    State(handle): State<ManagerHandle>,
    Json(update): Json<ParameterUpdate>,
) -> Json<ApiResponse> {
    Json(match handle.set_parameters(update).await {
        Ok(parameters) => ApiResponse::ok_parameters(parameters),
        Err(e) => ApiResponse::error(e),
    })
}

async fn set_background(
    State(handle): State<ManagerHandle>,
    Json(body): Json<BackgroundBody>,
) -> Json<ApiResponse> {
    let background = match Background::from_rows(body.filename, body.data.unwrap_or_default()) {
        Ok(background) => background,
        Err(e) => return Json(ApiResponse::error(e)),
    };

    Json(match handle.set_background(background).await {
        Ok(status) => ApiResponse::ok_status(status),
        Err(e) => ApiResponse::error(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_omits_absent_payloads() {
        let json = serde_json::to_value(ApiResponse::ok_status("running")).expect("serialize");
        assert_eq!(json["state"], "ok");
        assert_eq!(json["status"], "running");
        assert!(json.get("statistics").is_none());
        assert!(json.get("parameters").is_none());
    }

    #[test]
    fn error_envelope_carries_the_message() {
        let json = serde_json::to_value(ApiResponse::error("invalid ROI")).expect("serialize");
        assert_eq!(json["state"], "error");
        assert_eq!(json["status"], "invalid ROI");
    }

    #[test]
    fn background_body_defaults_to_clear() {
        let body: BackgroundBody = serde_json::from_str("{}").expect("deserialize");
        assert!(body.data.is_none());
        assert!(body.filename.is_empty());

        let body: BackgroundBody =
            serde_json::from_str(r#"{"filename": "bg.npy", "data": null}"#).expect("deserialize");
        assert!(body.data.is_none());
        assert_eq!(body.filename, "bg.npy");
    }

    #[test]
    fn background_body_accepts_nested_rows() {
        let body: BackgroundBody =
            serde_json::from_str(r#"{"filename": "bg", "data": [[1, 2], [3, 4]]}"#)
                .expect("deserialize");
        let rows = body.data.expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec![3, 4]);
    }
}
