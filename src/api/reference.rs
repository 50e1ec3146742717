//! Reference data endpoints: help topics, departments and statuses.

use axum::extract::State;

use super::{success, ApiResult};
use crate::models::{Department, HelpTopic, TicketStatus};
use crate::AppState;

/// GET /topics - List active help topics.
pub async fn list_topics(State(state): State<AppState>) -> ApiResult<Vec<HelpTopic>> {
    success(state.repo.list_help_topics().await?)
}

/// GET /departments - List all departments.
pub async fn list_departments(State(state): State<AppState>) -> ApiResult<Vec<Department>> {
    success(state.repo.list_departments().await?)
}

/// GET /statuses - List ticket statuses.
pub async fn list_statuses(State(state): State<AppState>) -> ApiResult<Vec<TicketStatus>> {
    success(state.repo.list_statuses().await?)
}
