//! Parameterized SELECT construction for ticket and user listings.
//!
//! Every user-supplied value goes through `push_bind`; only fixed column and
//! table names are pushed as SQL text.

use sqlx::{MySql, QueryBuilder};

/// Page size when the caller gives none.
pub const DEFAULT_LIMIT: u32 = 50;
/// Largest page a caller may request.
pub const MAX_LIMIT: u32 = 500;

/// `limit`/`offset` window over an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// Match tickets whose form field `name` contains any of `terms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldFilter {
    pub name: String,
    pub terms: Vec<String>,
}

/// Optional equality filters for ticket listings. Empty lists mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketFilter {
    pub status_ids: Vec<i64>,
    pub topic_ids: Vec<i64>,
    pub dept_ids: Vec<i64>,
    pub email: Option<String>,
    pub custom_fields: Vec<CustomFieldFilter>,
}

/// Optional filters for user listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub email: Option<String>,
}

/// osTicket declares its id columns `UNSIGNED`; they are read back as signed
/// `BIGINT` so they decode into `i64`.
const TICKET_COLUMNS: &str = "CAST(t.ticket_id AS SIGNED) AS ticket_id, COALESCE(t.number, '') AS number, \
     t.created, cd.subject, CAST(t.status_id AS SIGNED) AS status_id, s.name AS status_name, \
     CAST(t.topic_id AS SIGNED) AS topic_id, ht.topic AS topic_name, \
     CAST(t.dept_id AS SIGNED) AS dept_id, d.name AS dept_name, \
     CAST(t.user_id AS SIGNED) AS user_id, u.name AS user_name, ue.address AS user_email";

const TICKET_FROM: &str = " FROM ost_ticket t \
     JOIN ost_ticket_status s ON s.id = t.status_id \
     JOIN ost_user u ON u.id = t.user_id \
     JOIN ost_user_email ue ON ue.id = u.default_email_id \
     LEFT JOIN ost_help_topic ht ON ht.topic_id = t.topic_id \
     LEFT JOIN ost_department d ON d.id = t.dept_id \
     LEFT JOIN ost_ticket__cdata cd ON cd.ticket_id = t.ticket_id";

const TICKET_ORDER: &str = " ORDER BY t.created DESC, t.ticket_id DESC";

/// Plain-text field values compare as-is; JSON choice values such as
/// `{"14":"Médis"}` compare by their first member.
const FIELD_VALUE_EXPR: &str = "COALESCE(IF(JSON_VALID(fev.value), \
     JSON_UNQUOTE(JSON_EXTRACT(JSON_EXTRACT(fev.value, '$.*'), '$[0]')) COLLATE utf8mb4_unicode_ci, NULL), \
     fev.value)";

const USER_COLUMNS: &str = "CAST(u.id AS SIGNED) AS id, u.name, ue.address AS email, u.created, u.updated";

const USER_FROM: &str = " FROM ost_user u JOIN ost_user_email ue ON ue.id = u.default_email_id";

const USER_ORDER: &str = " ORDER BY u.created DESC, u.id DESC";

/// Single-ticket read, including the opening message.
pub const TICKET_BY_ID: &str = "SELECT CAST(t.ticket_id AS SIGNED) AS ticket_id, COALESCE(t.number, '') AS number, \
     t.created, cd.subject, CAST(t.status_id AS SIGNED) AS status_id, s.name AS status_name, \
     CAST(t.topic_id AS SIGNED) AS topic_id, ht.topic AS topic_name, \
     CAST(t.dept_id AS SIGNED) AS dept_id, d.name AS dept_name, \
     CAST(t.user_id AS SIGNED) AS user_id, u.name AS user_name, ue.address AS user_email, \
     (SELECT e.body FROM ost_thread th JOIN ost_thread_entry e ON e.thread_id = th.id \
      WHERE th.object_id = t.ticket_id AND th.object_type = 'T' ORDER BY e.id ASC LIMIT 1) AS message \
     FROM ost_ticket t \
     JOIN ost_ticket_status s ON s.id = t.status_id \
     JOIN ost_user u ON u.id = t.user_id \
     JOIN ost_user_email ue ON ue.id = u.default_email_id \
     LEFT JOIN ost_help_topic ht ON ht.topic_id = t.topic_id \
     LEFT JOIN ost_department d ON d.id = t.dept_id \
     LEFT JOIN ost_ticket__cdata cd ON cd.ticket_id = t.ticket_id \
     WHERE t.ticket_id = ?";

/// Single-user read.
pub const USER_BY_ID: &str = "SELECT CAST(u.id AS SIGNED) AS id, u.name, ue.address AS email, u.created, u.updated \
     FROM ost_user u JOIN ost_user_email ue ON ue.id = u.default_email_id WHERE u.id = ?";

/// Tracks whether the next condition opens the WHERE clause or extends it.
struct Conditions {
    any: bool,
}

impl Conditions {
    fn new() -> Self {
        Self { any: false }
    }

    fn next(&mut self, qb: &mut QueryBuilder<'static, MySql>) {
        qb.push(if self.any { " AND " } else { " WHERE " });
        self.any = true;
    }
}

fn push_in_list(qb: &mut QueryBuilder<'static, MySql>, column: &str, ids: &[i64]) {
    qb.push(column).push(" IN (");
    let mut list = qb.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    list.push_unseparated(")");
}

/// Escape `LIKE` metacharacters so a term only matches literally.
pub fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_ticket_filters(qb: &mut QueryBuilder<'static, MySql>, filter: &TicketFilter) {
    let mut conditions = Conditions::new();

    if !filter.status_ids.is_empty() {
        conditions.next(qb);
        push_in_list(qb, "t.status_id", &filter.status_ids);
    }
    if !filter.topic_ids.is_empty() {
        conditions.next(qb);
        push_in_list(qb, "t.topic_id", &filter.topic_ids);
    }
    if !filter.dept_ids.is_empty() {
        conditions.next(qb);
        push_in_list(qb, "t.dept_id", &filter.dept_ids);
    }
    if let Some(email) = &filter.email {
        conditions.next(qb);
        qb.push("ue.address = ").push_bind(email.clone());
    }

    for field in filter.custom_fields.iter().filter(|f| !f.terms.is_empty()) {
        conditions.next(qb);
        qb.push(
            "EXISTS (SELECT 1 FROM ost_form_entry fe \
             JOIN ost_form_entry_values fev ON fev.entry_id = fe.id \
             JOIN ost_form_field ff ON ff.id = fev.field_id \
             WHERE fe.object_type = 'T' AND fe.object_id = t.ticket_id AND ff.name = ",
        );
        qb.push_bind(field.name.clone());
        qb.push(" AND (");
        let mut terms = qb.separated(" OR ");
        for term in &field.terms {
            terms.push(FIELD_VALUE_EXPR);
            terms.push_unseparated(" LIKE ");
            terms.push_bind_unseparated(format!("%{}%", escape_like(term)));
        }
        qb.push("))");
    }
}

/// `SELECT COUNT(*)` over the filtered ticket set.
pub fn ticket_count_query(filter: &TicketFilter) -> QueryBuilder<'static, MySql> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*)");
    qb.push(TICKET_FROM);
    push_ticket_filters(&mut qb, filter);
    qb
}

/// One page of the filtered ticket set, newest first.
pub fn ticket_page_query(filter: &TicketFilter, page: Pagination) -> QueryBuilder<'static, MySql> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(TICKET_COLUMNS).push(TICKET_FROM);
    push_ticket_filters(&mut qb, filter);
    qb.push(TICKET_ORDER);
    push_window(&mut qb, page);
    qb
}

/// Custom field values for a set of tickets.
pub fn custom_fields_query(ticket_ids: &[i64]) -> QueryBuilder<'static, MySql> {
    let mut qb = QueryBuilder::new(
        "SELECT CAST(fe.object_id AS SIGNED) AS ticket_id, ff.name, fev.value \
         FROM ost_form_entry fe \
         JOIN ost_form_entry_values fev ON fev.entry_id = fe.id \
         JOIN ost_form_field ff ON ff.id = fev.field_id \
         WHERE fe.object_type = 'T' AND ",
    );
    push_in_list(&mut qb, "fe.object_id", ticket_ids);
    qb.push(" ORDER BY fe.object_id, ff.sort, ff.id");
    qb
}

fn push_user_filters(qb: &mut QueryBuilder<'static, MySql>, filter: &UserFilter) {
    let mut conditions = Conditions::new();
    if let Some(email) = &filter.email {
        conditions.next(qb);
        qb.push("ue.address = ").push_bind(email.clone());
    }
}

/// `SELECT COUNT(*)` over the filtered user set.
pub fn user_count_query(filter: &UserFilter) -> QueryBuilder<'static, MySql> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*)");
    qb.push(USER_FROM);
    push_user_filters(&mut qb, filter);
    qb
}

/// One page of the filtered user set, newest first.
pub fn user_page_query(filter: &UserFilter, page: Pagination) -> QueryBuilder<'static, MySql> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(USER_COLUMNS).push(USER_FROM);
    push_user_filters(&mut qb, filter);
    qb.push(USER_ORDER);
    push_window(&mut qb, page);
    qb
}

fn push_window(qb: &mut QueryBuilder<'static, MySql>, page: Pagination) {
    qb.push(" LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholders(sql: &str) -> usize {
        sql.matches('?').count()
    }

    #[test]
    fn test_unfiltered_ticket_page() {
        let qb = ticket_page_query(&TicketFilter::default(), Pagination::default());
        let sql = qb.sql();

        assert!(sql.starts_with("SELECT CAST(t.ticket_id AS SIGNED) AS ticket_id"));
        assert!(!sql.contains("WHERE"));
        assert!(sql.ends_with("ORDER BY t.created DESC, t.ticket_id DESC LIMIT ? OFFSET ?"));
        assert_eq!(placeholders(sql), 2);
    }

    #[test]
    fn test_id_lists_become_in_clauses() {
        let filter = TicketFilter {
            status_ids: vec![1, 2],
            dept_ids: vec![5],
            ..Default::default()
        };
        let qb = ticket_count_query(&filter);
        let sql = qb.sql();

        assert!(sql.contains(" WHERE t.status_id IN (?, ?) AND t.dept_id IN (?)"));
        assert!(!sql.contains("t.topic_id IN"));
        assert_eq!(placeholders(sql), 3);
    }

    #[test]
    fn test_email_filter_is_bound() {
        let filter = TicketFilter {
            email: Some("o'brien@example.com".into()),
            ..Default::default()
        };
        let qb = ticket_count_query(&filter);
        let sql = qb.sql();

        assert!(sql.contains("WHERE ue.address = ?"));
        assert!(!sql.contains("o'brien"));
    }

    #[test]
    fn test_custom_field_filter_uses_exists() {
        let filter = TicketFilter {
            topic_ids: vec![3],
            custom_fields: vec![CustomFieldFilter {
                name: "order_id".into(),
                terms: vec!["A1".into(), "B2".into()],
            }],
            ..Default::default()
        };
        let qb = ticket_page_query(&filter, Pagination { limit: 10, offset: 20 });
        let sql = qb.sql();

        assert!(sql.contains("t.topic_id IN (?) AND EXISTS (SELECT 1 FROM ost_form_entry fe"));
        assert!(sql.contains("ff.name = ? AND ("));
        assert_eq!(sql.matches(" LIKE ?").count(), 2);
        assert!(sql.contains(" OR "));
        assert!(!sql.contains("order_id"));
        // topic + field name + two terms + limit + offset
        assert_eq!(placeholders(sql), 6);
    }

    #[test]
    fn test_custom_field_without_terms_is_ignored() {
        let filter = TicketFilter {
            custom_fields: vec![CustomFieldFilter {
                name: "order_id".into(),
                terms: vec![],
            }],
            ..Default::default()
        };
        let qb = ticket_count_query(&filter);
        assert!(!qb.sql().contains("EXISTS"));
    }

    #[test]
    fn test_user_queries() {
        let qb = user_page_query(&UserFilter::default(), Pagination::default());
        assert!(!qb.sql().contains("WHERE"));
        assert!(qb.sql().ends_with("LIMIT ? OFFSET ?"));

        let filter = UserFilter {
            email: Some("a@b.c".into()),
        };
        let qb = user_count_query(&filter);
        assert!(qb.sql().ends_with("WHERE ue.address = ?"));
    }

    #[test]
    fn test_custom_fields_query_lists_ids() {
        let qb = custom_fields_query(&[7, 8, 9]);
        assert!(qb.sql().contains("fe.object_id IN (?, ?, ?)"));
    }

    #[test]
    fn test_unsigned_ids_are_read_as_signed() {
        for column in ["ticket_id", "status_id", "topic_id", "dept_id", "user_id"] {
            let cast = format!("CAST(t.{} AS SIGNED) AS {}", column, column);
            assert!(TICKET_COLUMNS.contains(&cast), "{}", column);
            assert!(TICKET_BY_ID.contains(&cast), "{}", column);
        }
        assert!(USER_COLUMNS.starts_with("CAST(u.id AS SIGNED) AS id"));
        assert!(USER_BY_ID.starts_with("SELECT CAST(u.id AS SIGNED) AS id"));
        assert!(custom_fields_query(&[1])
            .sql()
            .starts_with("SELECT CAST(fe.object_id AS SIGNED) AS ticket_id"));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("Médis"), "Médis");
    }
}
