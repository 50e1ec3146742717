//! Data models for the osTicket API.
//!
//! Row shapes mirror the osTicket schema; JSON field names follow the column names.

mod api_key;
mod attachment;
mod page;
mod reference;
mod ticket;
mod user;

pub use api_key::*;
pub use attachment::*;
pub use page::*;
pub use reference::*;
pub use ticket::*;
pub use user::*;
