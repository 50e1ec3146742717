//! Ticket model and the create/close request and response shapes.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Topic used when a create request does not name one.
pub const DEFAULT_TOPIC_ID: i64 = 1;

/// A ticket joined with its status, topic, department and owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub ticket_id: i64,
    pub number: String,
    pub created: NaiveDateTime,
    pub subject: Option<String>,
    /// Body of the opening thread entry; only loaded for single-ticket reads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub status_id: i64,
    pub status_name: String,
    pub topic_id: Option<i64>,
    pub topic_name: Option<String>,
    pub dept_id: Option<i64>,
    pub dept_name: Option<String>,
    pub user_id: i64,
    pub user_name: String,
    pub user_email: String,
    #[serde(default)]
    pub custom_fields: serde_json::Map<String, serde_json::Value>,
}

/// Request body for `POST /tickets`.
///
/// Every field is optional at the serde level so that a missing field is
/// reported as a validation error naming it rather than a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTicketRequest {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub topic_id: Option<i64>,
    #[serde(default)]
    pub dept_id: Option<i64>,
}

/// Who the new ticket belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    /// An `ost_user` row that must already exist
    Existing(i64),
    /// Looked up by email, created when no user owns the address
    Contact { name: String, email: String },
}

/// A create request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub requester: Requester,
    pub subject: String,
    pub message: String,
    pub topic_id: i64,
    pub dept_id: Option<i64>,
}

impl CreateTicketRequest {
    /// Check required fields, in the order a client would fill them in.
    pub fn validate(self) -> Result<NewTicket, AppError> {
        let subject = required_text(self.subject, "subject")?;
        let message = required_text(self.message, "message")?;

        let requester = match self.user_id {
            Some(id) if id <= 0 => {
                return Err(AppError::validation(
                    "user_id",
                    "user_id must be a positive integer",
                ))
            }
            Some(id) => Requester::Existing(id),
            None => {
                let name = required_text(self.name, "name")?;
                let email = required_text(self.email, "email")?;
                if !looks_like_email(&email) {
                    return Err(AppError::validation(
                        "email",
                        format!("'{}' is not a valid email address", email),
                    ));
                }
                Requester::Contact { name, email }
            }
        };

        let topic_id = self.topic_id.unwrap_or(DEFAULT_TOPIC_ID);
        if topic_id <= 0 {
            return Err(AppError::validation(
                "topic_id",
                "topic_id must be a positive integer",
            ));
        }
        if matches!(self.dept_id, Some(id) if id <= 0) {
            return Err(AppError::validation(
                "dept_id",
                "dept_id must be a positive integer",
            ));
        }

        Ok(NewTicket {
            requester,
            subject,
            message,
            topic_id,
            dept_id: self.dept_id,
        })
    }
}

fn required_text(value: Option<String>, field: &str) -> Result<String, AppError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::validation(field, format!("{} is required", field))),
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@') && !email.contains(' ')
        }
        None => false,
    }
}

/// Result of `PUT /tickets/{id}/close`.
#[derive(Debug, Clone, Serialize)]
pub struct CloseTicketResponse {
    pub ticket_id: i64,
    pub status_id: i64,
    pub status: &'static str,
    /// False when the ticket was already in a closed state
    pub changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CreateTicketRequest {
        CreateTicketRequest {
            name: Some("John Doe".into()),
            email: Some("john.doe@example.com".into()),
            subject: Some("Test Ticket".into()),
            message: Some("This is a test ticket.".into()),
            topic_id: Some(1),
            ..Default::default()
        }
    }

    fn field_of(err: AppError) -> String {
        match err {
            AppError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_valid_contact_request() {
        let ticket = sample().validate().unwrap();
        assert_eq!(
            ticket.requester,
            Requester::Contact {
                name: "John Doe".into(),
                email: "john.doe@example.com".into()
            }
        );
        assert_eq!(ticket.subject, "Test Ticket");
        assert_eq!(ticket.topic_id, 1);
        assert_eq!(ticket.dept_id, None);
    }

    #[test]
    fn test_missing_subject_is_named() {
        let req = CreateTicketRequest {
            subject: None,
            ..sample()
        };
        assert_eq!(field_of(req.validate().unwrap_err()), "subject");
    }

    #[test]
    fn test_blank_message_is_named() {
        let req = CreateTicketRequest {
            message: Some("   ".into()),
            ..sample()
        };
        assert_eq!(field_of(req.validate().unwrap_err()), "message");
    }

    #[test]
    fn test_user_id_replaces_contact_fields() {
        let req = CreateTicketRequest {
            user_id: Some(42),
            name: None,
            email: None,
            ..sample()
        };
        assert_eq!(req.validate().unwrap().requester, Requester::Existing(42));
    }

    #[test]
    fn test_missing_email_without_user_id() {
        let req = CreateTicketRequest {
            email: None,
            ..sample()
        };
        assert_eq!(field_of(req.validate().unwrap_err()), "email");
    }

    #[test]
    fn test_malformed_email() {
        let req = CreateTicketRequest {
            email: Some("not-an-address".into()),
            ..sample()
        };
        assert_eq!(field_of(req.validate().unwrap_err()), "email");
    }

    #[test]
    fn test_topic_defaults_and_bounds() {
        let req = CreateTicketRequest {
            topic_id: None,
            ..sample()
        };
        assert_eq!(req.validate().unwrap().topic_id, DEFAULT_TOPIC_ID);

        let req = CreateTicketRequest {
            topic_id: Some(0),
            ..sample()
        };
        assert_eq!(field_of(req.validate().unwrap_err()), "topic_id");
    }

    #[test]
    fn test_deserialize_partial_body() {
        let req: CreateTicketRequest =
            serde_json::from_str(r#"{"name":"A","email":"a@b.c","message":"hi"}"#).unwrap();
        assert!(req.subject.is_none());
        assert_eq!(field_of(req.validate().unwrap_err()), "subject");
    }
}
