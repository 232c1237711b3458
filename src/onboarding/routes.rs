//! REST endpoint for onboarding status.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use super::manager::OnboardingEngine;

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub engine: Arc<OnboardingEngine>,
}

/// GET /api/onboarding/{phone}
///
/// Returns phase, last question and merged preferences, or 404 if nothing
/// is known about the phone.
async fn get_profile(
    State(state): State<OnboardingRouteState>,
    Path(phone): Path<String>,
) -> impl IntoResponse {
    match state.engine.profile(&phone).await {
        Ok(Some(profile)) => Json(serde_json::to_value(profile).unwrap_or_default()).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "No onboarding record for this phone"})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(phone = %phone, error = %e, "Failed to load onboarding profile");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to load profile"})),
            )
                .into_response()
        }
    }
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/api/onboarding/{phone}", get(get_profile))
        .with_state(state)
}
