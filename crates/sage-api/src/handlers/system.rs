//! Health and registry maintenance.

use axum::{extract::State, response::IntoResponse, Json};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "redis": state.cache.is_redis_connected().await,
    }))
}

/// `POST /api/v1/skills/reload`: re-read the skill registry from its source.
pub async fn reload_skills(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let generation = state.skills.reload().await?;
    let skills = state.skills.snapshot().await.skills.len();
    info!(generation, skills, "Skill registry reloaded");
    Ok(Json(serde_json::json!({
        "generation": generation,
        "skills": skills,
    })))
}
