//! Paginated list envelope.

use serde::Serialize;

/// One page of a filtered listing.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T: Serialize> {
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
    /// URL of the following page, absent on the last page
    pub next: Option<String>,
    /// URL of the preceding page, absent on the first page
    pub previous: Option<String>,
    pub items: Vec<T>,
}
