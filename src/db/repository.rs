//! Database repository for the osTicket tables.
//!
//! Uses prepared statements throughout and a transaction for every write
//! that touches more than one row.

use std::collections::HashMap;

use chrono::Local;
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::{Connection, MySql, MySqlPool, Row, Transaction};

use super::numbering::{format_number, DEFAULT_NUMBER_FORMAT};
use super::query::{self, Pagination, TicketFilter, UserFilter};
use crate::errors::AppError;
use crate::models::{
    ApiKey, AttachmentCreated, CloseTicketResponse, Department, HelpTopic, NewTicket, Requester,
    Ticket, TicketStatus, Upload, User,
};
use crate::storage::{self, AttachmentStore, CHUNK_SIZE};

/// osTicket's stock "Closed" status. Close prefers it among closed-state
/// statuses and falls back to it when none exist.
const PREFERRED_CLOSED_STATUS_ID: i64 = 3;
/// Status of new tickets when `ost_config` names none.
const FALLBACK_OPEN_STATUS_ID: i64 = 1;
/// Department of new tickets when neither the request nor the topic names one.
const FALLBACK_DEPT_ID: i64 = 1;

/// Resolved owner of a new ticket.
struct Owner {
    user_id: i64,
    email_id: i64,
    name: String,
}

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: MySqlPool,
}

impl Repository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Look up an API key by its secret.
    pub async fn find_api_key(&self, key: &str) -> Result<Option<ApiKey>, AppError> {
        let row = sqlx::query(
            "SELECT CAST(id AS SIGNED) AS id, CAST(isactive AS SIGNED) AS isactive, ipaddr FROM ost_api_key WHERE apikey = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ApiKey {
            id: row.try_get("id")?,
            active: row.try_get::<i64, _>("isactive")? != 0,
            ipaddr: row
                .try_get::<Option<String>, _>("ipaddr")?
                .unwrap_or_default(),
        }))
    }

    // ==================== REFERENCE DATA ====================

    /// List active help topics.
    pub async fn list_help_topics(&self) -> Result<Vec<HelpTopic>, AppError> {
        let rows = sqlx::query(
            "SELECT CAST(topic_id AS SIGNED) AS topic_id, topic, CAST(ispublic AS SIGNED) AS ispublic FROM ost_help_topic WHERE isactive = 1 ORDER BY topic ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(topic_from_row).collect::<Result<_, _>>()?)
    }

    /// List all departments.
    pub async fn list_departments(&self) -> Result<Vec<Department>, AppError> {
        let rows = sqlx::query("SELECT CAST(id AS SIGNED) AS id, name FROM ost_department ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(department_from_row).collect::<Result<_, _>>()?)
    }

    /// List all ticket statuses in display order.
    pub async fn list_statuses(&self) -> Result<Vec<TicketStatus>, AppError> {
        let rows = sqlx::query("SELECT CAST(id AS SIGNED) AS id, name, COALESCE(state, '') AS state FROM ost_ticket_status ORDER BY sort ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(status_from_row).collect::<Result<_, _>>()?)
    }

    // ==================== USERS ====================

    /// Count and fetch one page of users.
    pub async fn list_users(
        &self,
        filter: &UserFilter,
        page: Pagination,
    ) -> Result<(i64, Vec<User>), AppError> {
        let mut count = query::user_count_query(filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = query::user_page_query(filter, page);
        let rows = select.build().fetch_all(&self.pool).await?;
        let users: Vec<User> = rows.iter().map(user_from_row).collect::<Result<_, _>>()?;

        Ok((total, users))
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: i64) -> Result<Option<User>, AppError> {
        let row = sqlx::query(query::USER_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    // ==================== TICKETS ====================

    /// Count and fetch one page of tickets, with their custom fields.
    pub async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: Pagination,
    ) -> Result<(i64, Vec<Ticket>), AppError> {
        let mut count = query::ticket_count_query(filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = query::ticket_page_query(filter, page);
        let rows = select.build().fetch_all(&self.pool).await?;
        let mut tickets = rows
            .iter()
            .map(|row| ticket_from_row(row, false))
            .collect::<Result<Vec<_>, _>>()?;

        self.load_custom_fields(&mut tickets).await?;
        Ok((total, tickets))
    }

    /// Get a ticket by ID, including its opening message.
    pub async fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, AppError> {
        let row = sqlx::query(query::TICKET_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut ticket = ticket_from_row(&row, true)?;
        self.load_custom_fields(std::slice::from_mut(&mut ticket))
            .await?;
        Ok(Some(ticket))
    }

    async fn load_custom_fields(&self, tickets: &mut [Ticket]) -> Result<(), AppError> {
        if tickets.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = tickets.iter().map(|t| t.ticket_id).collect();
        let mut select = query::custom_fields_query(&ids);
        let rows = select.build().fetch_all(&self.pool).await?;

        let mut by_ticket: HashMap<i64, Map<String, Value>> = HashMap::new();
        for row in &rows {
            let name: String = row.try_get("name")?;
            if name.is_empty() {
                continue;
            }
            let value: Option<String> = row.try_get("value")?;
            by_ticket
                .entry(row.try_get("ticket_id")?)
                .or_default()
                .insert(name, decode_field_value(value.as_deref()));
        }

        for ticket in tickets.iter_mut() {
            if let Some(fields) = by_ticket.remove(&ticket.ticket_id) {
                ticket.custom_fields = fields;
            }
        }
        Ok(())
    }

    /// Create a ticket, its thread and opening message, and the user if needed.
    ///
    /// Returns the new ticket id. Everything is rolled back on any failure.
    pub async fn create_ticket(&self, ticket: &NewTicket, ip_address: &str) -> Result<i64, AppError> {
        let mut tx = self.pool.begin().await?;

        let owner = match &ticket.requester {
            Requester::Existing(user_id) => existing_owner(&mut tx, *user_id).await?,
            Requester::Contact { name, email } => contact_owner(&mut tx, name, email).await?,
        };

        let topic = sqlx::query("SELECT CAST(dept_id AS SIGNED) AS dept_id FROM ost_help_topic WHERE topic_id = ?")
            .bind(ticket.topic_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                AppError::validation(
                    "topic_id",
                    format!("Help topic {} does not exist", ticket.topic_id),
                )
            })?;
        let topic_dept: Option<i64> = topic.try_get("dept_id")?;
        let dept_id = ticket
            .dept_id
            .or(topic_dept.filter(|id| *id > 0))
            .unwrap_or(FALLBACK_DEPT_ID);

        let settings = core_settings(&mut tx).await?;
        let status_id = settings
            .get("default_ticket_status_id")
            .and_then(|v| v.parse().ok())
            .unwrap_or(FALLBACK_OPEN_STATUS_ID);
        let sequence_id = settings
            .get("ticket_sequence_id")
            .and_then(|v| v.parse().ok());
        let mask = settings
            .get("ticket_number_format")
            .map(String::as_str)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(DEFAULT_NUMBER_FORMAT);

        let sequence = next_sequence(&mut tx, sequence_id).await?;
        let number = format_number(mask, sequence, Local::now().date_naive());

        let ticket_id = sqlx::query(
            "INSERT INTO ost_ticket (number, user_id, user_email_id, status_id, dept_id, topic_id, source, ip_address, created, updated) VALUES (?, ?, ?, ?, ?, ?, 'API', ?, NOW(), NOW())",
        )
        .bind(&number)
        .bind(owner.user_id)
        .bind(owner.email_id)
        .bind(status_id)
        .bind(dept_id)
        .bind(ticket.topic_id)
        .bind(ip_address)
        .execute(&mut *tx)
        .await?
        .last_insert_id() as i64;

        sqlx::query("INSERT INTO ost_ticket__cdata (ticket_id, subject) VALUES (?, ?)")
            .bind(ticket_id)
            .bind(&ticket.subject)
            .execute(&mut *tx)
            .await?;

        let thread_id = sqlx::query(
            "INSERT INTO ost_thread (object_id, object_type, created) VALUES (?, 'T', NOW())",
        )
        .bind(ticket_id)
        .execute(&mut *tx)
        .await?
        .last_insert_id() as i64;

        sqlx::query(
            "INSERT INTO ost_thread_entry (thread_id, user_id, `type`, poster, source, title, body, format, ip_address, created, updated) VALUES (?, ?, 'M', ?, 'API', ?, ?, 'text', ?, NOW(), NOW())",
        )
        .bind(thread_id)
        .bind(owner.user_id)
        .bind(&owner.name)
        .bind(&ticket.subject)
        .bind(&ticket.message)
        .bind(ip_address)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Created ticket {} (#{}) for user {}",
            ticket_id,
            number,
            owner.user_id
        );
        Ok(ticket_id)
    }

    /// Store an uploaded file and link it to the ticket's latest thread entry.
    pub async fn attach_file(
        &self,
        ticket_id: i64,
        upload: &Upload,
        store: &AttachmentStore,
    ) -> Result<AttachmentCreated, AppError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT CAST(ticket_id AS SIGNED) FROM ost_ticket WHERE ticket_id = ? FOR UPDATE")
                .bind(ticket_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(AppError::NotFound(format!("Ticket {} not found", ticket_id)));
        }

        let entry_id: i64 = sqlx::query_scalar(
            "SELECT CAST(e.id AS SIGNED) FROM ost_thread_entry e JOIN ost_thread th ON th.id = e.thread_id WHERE th.object_id = ? AND th.object_type = 'T' ORDER BY e.id DESC LIMIT 1",
        )
        .bind(ticket_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Ticket {} has no thread entry to attach to",
                ticket_id
            ))
        })?;

        let digest = storage::digest(&upload.data);
        let size = upload.data.len() as u64;

        let file_id = sqlx::query(
            "INSERT INTO ost_file (ft, bk, `type`, size, `key`, signature, name, created) VALUES ('T', ?, ?, ?, ?, ?, ?, NOW())",
        )
        .bind(store.backend_code())
        .bind(&upload.content_type)
        .bind(size)
        .bind(&digest.key)
        .bind(&digest.signature)
        .bind(&upload.name)
        .execute(&mut *tx)
        .await?
        .last_insert_id() as i64;

        let stored = store.write_file(&digest.key, &upload.data).await?;
        if stored.is_none() {
            for (chunk_id, chunk) in upload.data.chunks(CHUNK_SIZE).enumerate() {
                sqlx::query(
                    "INSERT INTO ost_file_chunk (file_id, chunk_id, filedata) VALUES (?, ?, ?)",
                )
                .bind(file_id)
                .bind(chunk_id as i64)
                .bind(chunk)
                .execute(&mut *tx)
                .await?;
            }
        }

        let attachment_id = match link_attachment(tx, entry_id, file_id, &upload.name).await {
            Ok(id) => id,
            Err(e) => {
                if let Some(file) = stored {
                    file.discard().await;
                }
                return Err(e);
            }
        };

        tracing::info!(
            "Attached file {} ({} bytes) to ticket {}",
            file_id,
            size,
            ticket_id
        );

        Ok(AttachmentCreated {
            file_id,
            attachment_id,
            ticket_id,
            name: upload.name.clone(),
            content_type: upload.content_type.clone(),
            size,
            storage: store.backend_name(),
        })
    }

    /// Move a ticket to the closed state. Already-closed tickets are left untouched.
    pub async fn close_ticket(&self, ticket_id: i64) -> Result<CloseTicketResponse, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT CAST(t.status_id AS SIGNED) AS status_id, s.state FROM ost_ticket t LEFT JOIN ost_ticket_status s ON s.id = t.status_id WHERE t.ticket_id = ? FOR UPDATE",
        )
        .bind(ticket_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", ticket_id)))?;

        let current_status: i64 = row.try_get("status_id")?;
        let state: Option<String> = row.try_get("state")?;

        if state.as_deref() == Some("closed") {
            tx.commit().await?;
            return Ok(CloseTicketResponse {
                ticket_id,
                status_id: current_status,
                status: "closed",
                changed: false,
            });
        }

        let closed_status: i64 = sqlx::query_scalar(
            "SELECT CAST(id AS SIGNED) FROM ost_ticket_status WHERE state = 'closed' ORDER BY id = ? DESC, sort ASC, id ASC LIMIT 1",
        )
        .bind(PREFERRED_CLOSED_STATUS_ID)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(PREFERRED_CLOSED_STATUS_ID);

        sqlx::query(
            "UPDATE ost_ticket SET status_id = ?, closed = NOW(), updated = NOW() WHERE ticket_id = ?",
        )
        .bind(closed_status)
        .bind(ticket_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Closed ticket {} (status {} -> {})",
            ticket_id,
            current_status,
            closed_status
        );

        Ok(CloseTicketResponse {
            ticket_id,
            status_id: closed_status,
            status: "closed",
            changed: true,
        })
    }
}

/// Insert the `ost_attachment` row and commit.
async fn link_attachment(
    mut tx: Transaction<'_, MySql>,
    entry_id: i64,
    file_id: i64,
    name: &str,
) -> Result<i64, AppError> {
    let attachment_id = sqlx::query(
        "INSERT INTO ost_attachment (object_id, `type`, file_id, name, inline) VALUES (?, 'H', ?, ?, 0)",
    )
    .bind(entry_id)
    .bind(file_id)
    .bind(name)
    .execute(&mut *tx)
    .await?
    .last_insert_id() as i64;

    tx.commit().await?;
    Ok(attachment_id)
}

async fn existing_owner(conn: &mut MySqlConnection, user_id: i64) -> Result<Owner, AppError> {
    let row = sqlx::query("SELECT CAST(id AS SIGNED) AS id, name, default_email_id FROM ost_user WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

    Ok(Owner {
        user_id: row.try_get("id")?,
        email_id: row.try_get("default_email_id")?,
        name: row.try_get("name")?,
    })
}

const OWNER_BY_EMAIL: &str = "SELECT CAST(u.id AS SIGNED) AS user_id, CAST(ue.id AS SIGNED) AS email_id, u.name FROM ost_user_email ue JOIN ost_user u ON u.id = ue.user_id WHERE ue.address = ? ORDER BY ue.id ASC LIMIT 1";

/// Reuse the user owning `email`, or create one.
///
/// When a concurrent request registers the same address first, the unique
/// key on `ost_user_email.address` rejects our insert and their user is used.
async fn contact_owner(
    conn: &mut MySqlConnection,
    name: &str,
    email: &str,
) -> Result<Owner, AppError> {
    if let Some(owner) = owner_by_email(conn, OWNER_BY_EMAIL, email).await? {
        return Ok(owner);
    }

    let mut savepoint = conn.begin().await?;
    match insert_user(&mut savepoint, name, email).await {
        Ok(owner) => {
            savepoint.commit().await?;
            tracing::info!("Created user {} for {}", owner.user_id, email);
            Ok(owner)
        }
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            savepoint.rollback().await?;
            tracing::debug!("User for {} created concurrently, reusing it", email);
            // Locking read: the plain snapshot predates the other insert.
            let locking = format!("{} FOR UPDATE", OWNER_BY_EMAIL);
            owner_by_email(conn, &locking, email).await?.ok_or_else(|| {
                AppError::Internal(format!("User for {} vanished after insert conflict", email))
            })
        }
        Err(e) => Err(e.into()),
    }
}

async fn owner_by_email(
    conn: &mut MySqlConnection,
    sql: &str,
    email: &str,
) -> Result<Option<Owner>, AppError> {
    let row = sqlx::query(sql)
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(Owner {
        user_id: row.try_get("user_id")?,
        email_id: row.try_get("email_id")?,
        name: row.try_get("name")?,
    }))
}

async fn insert_user(conn: &mut MySqlConnection, name: &str, email: &str) -> Result<Owner, sqlx::Error> {
    let user_id = sqlx::query(
        "INSERT INTO ost_user (org_id, default_email_id, status, name, created, updated) VALUES (0, 0, 0, ?, NOW(), NOW())",
    )
    .bind(name)
    .execute(&mut *conn)
    .await?
    .last_insert_id() as i64;

    let email_id = sqlx::query("INSERT INTO ost_user_email (user_id, flags, address) VALUES (?, 0, ?)")
        .bind(user_id)
        .bind(email)
        .execute(&mut *conn)
        .await?
        .last_insert_id() as i64;

    sqlx::query("UPDATE ost_user SET default_email_id = ? WHERE id = ?")
        .bind(email_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    Ok(Owner {
        user_id,
        email_id,
        name: name.to_string(),
    })
}

/// Ticket-related settings from the `core` namespace of `ost_config`.
async fn core_settings(conn: &mut MySqlConnection) -> Result<HashMap<String, String>, AppError> {
    let rows = sqlx::query(
        "SELECT `key`, `value` FROM ost_config WHERE namespace = 'core' AND `key` IN ('ticket_number_format', 'ticket_sequence_id', 'default_ticket_status_id')",
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut settings = HashMap::with_capacity(rows.len());
    for row in &rows {
        let key: String = row.try_get("key")?;
        let value: String = row.try_get("value")?;
        settings.insert(key, value);
    }
    Ok(settings)
}

/// Reserve the next ticket sequence value.
///
/// The sequence row is locked for the rest of the transaction, so concurrent
/// creates serialize on it.
async fn next_sequence(conn: &mut MySqlConnection, sequence_id: Option<i64>) -> Result<u64, AppError> {
    if let Some(id) = sequence_id {
        let row = sqlx::query(
            "SELECT `next`, `increment` FROM ost_sequence WHERE id = ? FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = row {
            let next: u64 = row.try_get("next")?;
            let increment: Option<i64> = row.try_get("increment")?;

            sqlx::query("UPDATE ost_sequence SET `next` = `next` + ?, updated = NOW() WHERE id = ?")
                .bind(increment.unwrap_or(1).max(1))
                .bind(id)
                .execute(&mut *conn)
                .await?;

            return Ok(next);
        }
    }

    let next: u64 =
        sqlx::query_scalar("SELECT CAST(COALESCE(MAX(ticket_id), 0) + 1 AS UNSIGNED) FROM ost_ticket")
            .fetch_one(&mut *conn)
            .await?;
    Ok(next)
}

fn topic_from_row(row: &MySqlRow) -> Result<HelpTopic, sqlx::Error> {
    Ok(HelpTopic {
        topic_id: row.try_get("topic_id")?,
        topic: row.try_get("topic")?,
        ispublic: row.try_get::<i64, _>("ispublic")? != 0,
    })
}

fn department_from_row(row: &MySqlRow) -> Result<Department, sqlx::Error> {
    Ok(Department {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
    })
}

fn status_from_row(row: &MySqlRow) -> Result<TicketStatus, sqlx::Error> {
    Ok(TicketStatus {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        state: row.try_get("state")?,
    })
}

fn user_from_row(row: &MySqlRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        created: row.try_get("created")?,
        updated: row.try_get("updated")?,
    })
}

fn ticket_from_row(row: &MySqlRow, with_message: bool) -> Result<Ticket, sqlx::Error> {
    Ok(Ticket {
        ticket_id: row.try_get("ticket_id")?,
        number: row.try_get("number")?,
        created: row.try_get("created")?,
        subject: row.try_get("subject")?,
        message: if with_message {
            row.try_get("message")?
        } else {
            None
        },
        status_id: row.try_get("status_id")?,
        status_name: row.try_get("status_name")?,
        topic_id: row.try_get("topic_id")?,
        topic_name: row.try_get("topic_name")?,
        dept_id: row.try_get("dept_id")?,
        dept_name: row.try_get("dept_name")?,
        user_id: row.try_get("user_id")?,
        user_name: row.try_get("user_name")?,
        user_email: row.try_get("user_email")?,
        custom_fields: Map::new(),
    })
}

/// Turn a stored form value into JSON.
///
/// Choice fields are stored as `{"<id>": "<label>"}` and surface as the label;
/// other JSON is passed through and anything else is a plain string.
pub fn decode_field_value(raw: Option<&str>) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) if !map.is_empty() => {
            map.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null)
        }
        Ok(value) => value,
        Err(_) => Value::String(raw.to_string()),
    }
}
