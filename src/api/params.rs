//! Query-string handling shared by the listing endpoints.

use axum::http::{header, HeaderMap, Uri};
use url::form_urlencoded;

use crate::db::query::{CustomFieldFilter, Pagination, TicketFilter, UserFilter, MAX_LIMIT};
use crate::errors::AppError;

/// Parameters with a fixed meaning on ticket listings. Anything else is a
/// custom-field filter.
const TICKET_PARAMS: [&str; 6] = ["status_id", "topic_id", "dept_id", "email", "limit", "offset"];

const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";

/// Decoded `key=value` pairs in request order. Keys may repeat.
#[derive(Debug, Clone, Default)]
pub struct QueryPairs(Vec<(String, String)>);

impl QueryPairs {
    pub fn parse(raw: Option<&str>) -> Self {
        Self(
            raw.map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
                .unwrap_or_default(),
        )
    }

    fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `limit` and `offset`; the last occurrence of each wins.
    pub fn pagination(&self) -> Result<Pagination, AppError> {
        let mut page = Pagination::default();

        if let Some(raw) = self.values("limit").last() {
            page.limit = raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|limit| (1..=MAX_LIMIT).contains(limit))
                .ok_or_else(|| {
                    AppError::validation(
                        "limit",
                        format!("limit must be an integer between 1 and {}", MAX_LIMIT),
                    )
                })?;
        }

        if let Some(raw) = self.values("offset").last() {
            page.offset = raw.trim().parse().map_err(|_| {
                AppError::validation("offset", "offset must be a non-negative integer")
            })?;
        }

        Ok(page)
    }

    pub fn user_filter(&self) -> UserFilter {
        UserFilter {
            email: self.email(),
        }
    }

    pub fn ticket_filter(&self) -> Result<TicketFilter, AppError> {
        let mut custom_fields: Vec<CustomFieldFilter> = Vec::new();
        for (key, value) in &self.0 {
            if key.is_empty() || TICKET_PARAMS.contains(&key.as_str()) {
                continue;
            }
            let terms = split_list(value).map(str::to_string);
            match custom_fields.iter_mut().find(|f| &f.name == key) {
                Some(existing) => existing.terms.extend(terms),
                None => custom_fields.push(CustomFieldFilter {
                    name: key.clone(),
                    terms: terms.collect(),
                }),
            }
        }
        custom_fields.retain(|f| !f.terms.is_empty());

        Ok(TicketFilter {
            status_ids: self.ids("status_id")?,
            topic_ids: self.ids("topic_id")?,
            dept_ids: self.ids("dept_id")?,
            email: self.email(),
            custom_fields,
        })
    }

    fn email(&self) -> Option<String> {
        self.values("email")
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .last()
            .map(str::to_string)
    }

    /// Every id given for `key`, across repeats and comma lists.
    fn ids(&self, key: &str) -> Result<Vec<i64>, AppError> {
        let mut ids = Vec::new();
        for raw in self.values(key) {
            for part in split_list(raw) {
                let id = part.parse::<i64>().ok().filter(|id| *id > 0).ok_or_else(|| {
                    AppError::validation(
                        key,
                        format!("{} must be a positive integer or a comma-separated list of them", key),
                    )
                })?;
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// `next` and `previous` links for a page of `total` records.
    pub fn page_links(&self, base: &str, total: i64, page: Pagination) -> (Option<String>, Option<String>) {
        let offset = u64::from(page.offset);
        let limit = u64::from(page.limit);

        let next = ((offset + limit) < total.max(0) as u64)
            .then(|| self.page_url(base, page.limit, offset + limit));
        let previous = (offset > 0).then(|| self.page_url(base, page.limit, offset.saturating_sub(limit)));

        (next, previous)
    }

    /// The request URL with every filter kept and the window replaced.
    fn page_url(&self, base: &str, limit: u32, offset: u64) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.0 {
            if key != "limit" && key != "offset" {
                query.append_pair(key, value);
            }
        }
        query.append_pair("limit", &limit.to_string());
        query.append_pair("offset", &offset.to_string());

        format!("{}?{}", base, query.finish())
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|part| !part.is_empty())
}

/// Absolute URL of the current path when the request names its host,
/// otherwise the bare path.
pub fn base_url(headers: &HeaderMap, uri: &Uri) -> String {
    let path = uri.path();
    let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return path.to_string();
    };

    let scheme = headers
        .get(FORWARDED_PROTO_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|p| *p == "http" || *p == "https")
        .unwrap_or("http");

    format!("{}://{}{}", scheme, host, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn pairs(q: &str) -> QueryPairs {
        QueryPairs::parse(Some(q))
    }

    fn field_of(err: AppError) -> String {
        match err {
            AppError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_pagination_defaults() {
        let page = QueryPairs::parse(None).pagination().unwrap();
        assert_eq!(page, Pagination { limit: 50, offset: 0 });
    }

    #[test]
    fn test_pagination_bounds() {
        assert_eq!(pairs("limit=500").pagination().unwrap().limit, 500);
        assert_eq!(field_of(pairs("limit=501").pagination().unwrap_err()), "limit");
        assert_eq!(field_of(pairs("limit=0").pagination().unwrap_err()), "limit");
        assert_eq!(field_of(pairs("limit=ten").pagination().unwrap_err()), "limit");
        assert_eq!(field_of(pairs("offset=-1").pagination().unwrap_err()), "offset");
    }

    #[test]
    fn test_ids_repeated_and_comma_separated() {
        let filter = pairs("status_id=1,2&status_id=3&dept_id=4").ticket_filter().unwrap();
        assert_eq!(filter.status_ids, vec![1, 2, 3]);
        assert_eq!(filter.dept_ids, vec![4]);
        assert!(filter.topic_ids.is_empty());
    }

    #[test]
    fn test_bad_id_names_parameter() {
        let err = pairs("topic_id=1,abc").ticket_filter().unwrap_err();
        assert_eq!(field_of(err), "topic_id");
        let err = pairs("dept_id=0").ticket_filter().unwrap_err();
        assert_eq!(field_of(err), "dept_id");
    }

    #[test]
    fn test_unknown_params_become_custom_fields() {
        let filter = pairs("clinic=M%C3%A9dis,North&priority=high&clinic=South&limit=5&empty=")
            .ticket_filter()
            .unwrap();
        assert_eq!(
            filter.custom_fields,
            vec![
                CustomFieldFilter {
                    name: "clinic".into(),
                    terms: vec!["Médis".into(), "North".into(), "South".into()],
                },
                CustomFieldFilter {
                    name: "priority".into(),
                    terms: vec!["high".into()],
                },
            ]
        );
    }

    #[test]
    fn test_email_filter_ignores_blank() {
        assert_eq!(
            pairs("email=a%40example.com").user_filter().email.as_deref(),
            Some("a@example.com")
        );
        assert_eq!(pairs("email=").user_filter().email, None);
    }

    #[test]
    fn test_page_links_middle_page() {
        let q = pairs("email=test%40example.com&limit=10&offset=10");
        let page = q.pagination().unwrap();
        let (next, previous) = q.page_links("http://api.local/tickets", 35, page);

        assert_eq!(
            next.as_deref(),
            Some("http://api.local/tickets?email=test%40example.com&limit=10&offset=20")
        );
        assert_eq!(
            previous.as_deref(),
            Some("http://api.local/tickets?email=test%40example.com&limit=10&offset=0")
        );
    }

    #[test]
    fn test_page_links_at_the_ends() {
        let q = pairs("limit=10");
        let (next, previous) = q.page_links("/tickets", 10, q.pagination().unwrap());
        assert_eq!(next, None);
        assert_eq!(previous, None);

        let q = pairs("limit=10&offset=5");
        let (_, previous) = q.page_links("/tickets", 10, q.pagination().unwrap());
        assert_eq!(previous.as_deref(), Some("/tickets?limit=10&offset=0"));
    }

    #[test]
    fn test_base_url() {
        let uri: Uri = "/users?limit=2".parse().unwrap();
        assert_eq!(base_url(&HeaderMap::new(), &uri), "/users");

        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("api.local:8080"));
        assert_eq!(base_url(&headers, &uri), "http://api.local:8080/users");

        headers.insert(FORWARDED_PROTO_HEADER, HeaderValue::from_static("https"));
        assert_eq!(base_url(&headers, &uri), "https://api.local:8080/users");
    }
}
