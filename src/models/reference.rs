//! Lookup tables: help topics, departments and ticket statuses.

use serde::{Deserialize, Serialize};

/// An active help topic from `ost_help_topic`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelpTopic {
    pub topic_id: i64,
    pub topic: String,
    pub ispublic: bool,
}

/// A department from `ost_department`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Department {
    pub id: i64,
    pub name: String,
}

/// A ticket status from `ost_ticket_status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketStatus {
    pub id: i64,
    pub name: String,
    /// osTicket state such as `open`, `closed`, `archived`
    pub state: String,
}
