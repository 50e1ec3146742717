//! Attachment upload and result models.

use serde::Serialize;

/// An uploaded file read from a multipart request.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Result of attaching a file to a ticket.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentCreated {
    pub file_id: i64,
    pub attachment_id: i64,
    pub ticket_id: i64,
    pub name: String,
    pub content_type: String,
    pub size: u64,
    /// `database` or `filesystem`
    pub storage: &'static str,
}
