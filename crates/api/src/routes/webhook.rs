//! Alertmanager Webhook

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use correlation::{AlertGroup, Outcome};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::AppState;

/// Body of every webhook answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub error: bool,
    pub message: String,
}

impl WebhookResponse {
    fn ok() -> Self {
        Self {
            error: false,
            message: "ok".to_string(),
        }
    }

    fn failure(message: String) -> Self {
        Self {
            error: true,
            message,
        }
    }
}

fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::EventSent { incident: true, .. } => "incident",
        Outcome::EventSent { incident: false, .. } => "info",
        Outcome::ProblemClosed { .. } => "closed",
        Outcome::Ignored { .. } => "ignored",
    }
}

/// Receive one alert group notification
pub async fn receive(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    counter!("receiver_webhook_requests_total").increment(1);

    let group: AlertGroup = match serde_json::from_slice(&body) {
        Ok(group) => group,
        Err(e) => {
            error!("Could not parse the alert group: {}", e);
            counter!("receiver_webhook_rejected_total").increment(1);
            return (
                StatusCode::BAD_REQUEST,
                Json(WebhookResponse::failure(format!(
                    "Could not parse the request body: {}",
                    e
                ))),
            );
        }
    };

    // Runs detached so a request timeout only drops the reply
    let controller = state.controller.clone();
    let group_key = group.group_key.clone();
    let delivery = tokio::spawn(async move { controller.handle(&group).await });

    match delivery.await {
        Ok(Ok(outcome)) => {
            info!("Delivered alert group {}: {:?}", group_key, outcome);
            counter!("receiver_webhook_delivered_total", "outcome" => outcome_label(&outcome))
                .increment(1);
            (StatusCode::OK, Json(WebhookResponse::ok()))
        }
        Ok(Err(e)) => {
            error!("Could not send the alert to Dynatrace: {}", e);
            counter!("receiver_webhook_failed_total").increment(1);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse::failure(format!(
                    "Could not send the alert to Dynatrace: {}",
                    e
                ))),
            )
        }
        Err(e) => {
            error!("Alert delivery task failed: {}", e);
            counter!("receiver_webhook_failed_total").increment(1);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse::failure(format!(
                    "Alert delivery task failed: {}",
                    e
                ))),
            )
        }
    }
}
