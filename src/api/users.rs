//! User API endpoints.

use axum::{
    extract::{rejection::PathRejection, OriginalUri, Path, RawQuery, State},
    http::HeaderMap,
};

use super::params::{base_url, QueryPairs};
use super::{path_id, success, ApiResult};
use crate::errors::AppError;
use crate::models::{Page, User};
use crate::AppState;

/// GET /users - List users, newest first, optionally by exact email.
pub async fn list_users(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> ApiResult<Page<User>> {
    let pairs = QueryPairs::parse(query.as_deref());
    let page = pairs.pagination()?;
    let filter = pairs.user_filter();

    let (total, items) = state.repo.list_users(&filter, page).await?;
    let (next, previous) = pairs.page_links(&base_url(&headers, &uri), total, page);

    success(Page {
        total,
        limit: page.limit,
        offset: page.offset,
        next,
        previous,
        items,
    })
}

/// GET /users/{id} - Get a single user.
pub async fn get_user(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<User> {
    let id = path_id(path)?;

    match state.repo.get_user(id).await? {
        Some(user) => success(user),
        None => Err(AppError::NotFound(format!("User {} not found", id))),
    }
}
