//! Ticket API endpoints.

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection},
        Multipart, OriginalUri, Path, RawQuery, State,
    },
    http::{HeaderMap, Uri},
    Extension, Json,
};

use super::params::{base_url, QueryPairs};
use super::{path_id, success, ApiResult};
use crate::auth::ClientAddr;
use crate::errors::AppError;
use crate::models::{
    AttachmentCreated, CloseTicketResponse, CreateTicketRequest, Page, Ticket, Upload,
};
use crate::AppState;

/// Multipart field carrying the attachment.
const FILE_FIELD: &str = "file";
const DEFAULT_FILE_NAME: &str = "attachment";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// GET /tickets - List tickets, newest first.
pub async fn list_tickets(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> ApiResult<Page<Ticket>> {
    ticket_page(&state, &uri, &headers, query.as_deref()).await
}

/// GET /tickets/search - Same filters as the listing, kept as its own route
/// for existing clients.
pub async fn search_tickets(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> ApiResult<Page<Ticket>> {
    ticket_page(&state, &uri, &headers, query.as_deref()).await
}

async fn ticket_page(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
    query: Option<&str>,
) -> ApiResult<Page<Ticket>> {
    let pairs = QueryPairs::parse(query);
    let page = pairs.pagination()?;
    let filter = pairs.ticket_filter()?;

    let (total, items) = state.repo.list_tickets(&filter, page).await?;
    let (next, previous) = pairs.page_links(&base_url(headers, uri), total, page);

    success(Page {
        total,
        limit: page.limit,
        offset: page.offset,
        next,
        previous,
        items,
    })
}

/// GET /tickets/{id} - Get a single ticket with its opening message.
pub async fn get_ticket(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Ticket> {
    let id = path_id(path)?;

    match state.repo.get_ticket(id).await? {
        Some(ticket) => success(ticket),
        None => Err(AppError::NotFound(format!("Ticket {} not found", id))),
    }
}

/// POST /tickets - Create a ticket, and its user when needed.
pub async fn create_ticket(
    State(state): State<AppState>,
    Extension(client): Extension<ClientAddr>,
    body: Result<Json<CreateTicketRequest>, JsonRejection>,
) -> ApiResult<Ticket> {
    let Json(request) = body?;
    let new_ticket = request.validate()?;

    let ticket_id = state
        .repo
        .create_ticket(&new_ticket, &client.to_column())
        .await?;

    match state.repo.get_ticket(ticket_id).await? {
        Some(ticket) => success(ticket),
        None => Err(AppError::Internal(format!(
            "Ticket {} was created but could not be read back",
            ticket_id
        ))),
    }
}

/// POST /tickets/{id}/attach - Attach the multipart `file` field.
pub async fn attach_file(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<AttachmentCreated> {
    let ticket_id = path_id(path)?;
    let upload = read_upload(multipart?).await?;

    success(
        state
            .repo
            .attach_file(ticket_id, &upload, &state.storage)
            .await?,
    )
}

/// PUT /tickets/{id}/close - Close a ticket. Closing twice is not an error.
pub async fn close_ticket(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<CloseTicketResponse> {
    let id = path_id(path)?;
    success(state.repo.close_ticket(id).await?)
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let name = field
            .file_name()
            .map(base_name)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_FILE_NAME)
            .to_string();
        let content_type = field
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let data = field.bytes().await?;

        if data.is_empty() {
            return Err(AppError::validation(FILE_FIELD, "Uploaded file is empty"));
        }

        return Ok(Upload {
            name,
            content_type,
            data: data.to_vec(),
        });
    }

    Err(AppError::validation(FILE_FIELD, "A file field is required"))
}

/// Final path component of a client-supplied file name.
fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name_strips_directories() {
        assert_eq!(base_name("report.pdf"), "report.pdf");
        assert_eq!(base_name("../../etc/passwd"), "passwd");
        assert_eq!(base_name("C:\\Users\\me\\scan.png"), "scan.png");
        assert_eq!(base_name("dir/"), "");
    }
}
