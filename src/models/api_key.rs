//! API key row from `ost_api_key`.

/// A key as configured in the osTicket admin panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub id: i64,
    pub active: bool,
    /// Comma-separated caller addresses; empty allows any caller
    pub ipaddr: String,
}
