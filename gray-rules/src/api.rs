use crate::config::Listener as ListenerConfig;
use crate::notification::ReleaseMessage;
use crate::service::GrayReleaseRules;
use crate::types::{Client, ReleaseId};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ApiError {
    #[error("gray release rules are not loaded yet")]
    NotReady,
    #[error("notifications are not being processed")]
    NotificationsClosed,
}

pub fn router(rules: GrayReleaseRules) -> Router {
    Router::new()
        .route("/release", get(release_handler))
        .route("/gray-rule", get(gray_rule_handler))
        .route("/notifications", post(notification_handler))
        .with_state(rules)
}

pub async fn serve(listener: &ListenerConfig, rules: GrayReleaseRules) -> std::io::Result<()> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = ?listener.local_addr()?, "Serving gray release queries");
    axum::serve(listener, router(rules)).await
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ReleaseParams {
    client_app_id: String,
    client_ip: String,
    client_label: Option<String>,
    app_id: String,
    cluster_name: String,
    namespace_name: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GrayRuleParams {
    client_app_id: String,
    client_ip: String,
    client_label: Option<String>,
    namespace_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseResponse {
    release_id: Option<ReleaseId>,
}

#[derive(Serialize)]
struct GrayRuleResponse {
    exists: bool,
}

impl IntoResponse for ReleaseResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

impl IntoResponse for GrayRuleResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorResponse {
            error_message: self.to_string(),
        });
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}

async fn release_handler(
    State(rules): State<GrayReleaseRules>,
    Query(params): Query<ReleaseParams>,
) -> Result<ReleaseResponse, ApiError> {
    if !rules.is_ready() {
        return Err(ApiError::NotReady);
    }

    let client = Client::new(
        &params.client_app_id,
        &params.client_ip,
        params.client_label.as_deref(),
    );
    let release_id = rules.find_release_id(
        &client,
        &params.app_id,
        &params.cluster_name,
        &params.namespace_name,
    );
    Ok(ReleaseResponse { release_id })
}

async fn gray_rule_handler(
    State(rules): State<GrayReleaseRules>,
    Query(params): Query<GrayRuleParams>,
) -> Result<GrayRuleResponse, ApiError> {
    if !rules.is_ready() {
        return Err(ApiError::NotReady);
    }

    let client = Client::new(
        &params.client_app_id,
        &params.client_ip,
        params.client_label.as_deref(),
    );
    Ok(GrayRuleResponse {
        exists: rules.has_gray_rule(&client, &params.namespace_name),
    })
}

// Entry point for the external notification transport.
async fn notification_handler(
    State(rules): State<GrayReleaseRules>,
    Json(message): Json<ReleaseMessage>,
) -> Result<StatusCode, ApiError> {
    rules
        .notify(message)
        .await
        .map_err(|_| ApiError::NotificationsClosed)?;
    Ok(StatusCode::ACCEPTED)
}
