//! End-user model.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A user joined with their default email address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created: NaiveDateTime,
    pub updated: NaiveDateTime,
}
