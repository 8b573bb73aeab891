//! Read-only PostgREST client for the Supabase tables the dashboard feeds on.
//!
//! Upstream rows are loosely typed: numeric columns arrive as strings, numbers
//! or null depending on which tool wrote them. Everything is coerced into the
//! crate's model types here, so nothing downstream sees a raw row.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use super::retry::{with_retry, RetryPolicy};
use crate::error::{Error, Result};
use crate::model::{ClientConfig, ClientStatus, ProjectType, Task, TeamMember};
use crate::query::filter::TaskFilter;
use crate::store::TaskStore;

pub const TASKS_TABLE: &str = "clickup_supabase";
pub const CLIENTS_TABLE: &str = "client_mappings";
pub const TEAM_TABLE: &str = "team_members";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: usize = 1000;
/// Capacity assumed for a team member row without `weekly_hours`.
const DEFAULT_WEEKLY_HOURS: f64 = 40.0;

#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    rest_url: Url,
    api_key: String,
    retry: RetryPolicy,
}

impl SupabaseClient {
    /// `base_url` is the project URL (`https://<ref>.supabase.co`).
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let mut base = Url::parse(base_url.trim())
            .map_err(|e| Error::Config(format!("invalid Supabase URL {base_url}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Config(format!("Supabase URL must be http(s): {base_url}")));
        }
        if api_key.trim().is_empty() {
            return Err(Error::Config("Supabase API key is empty".into()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let rest_url = base
            .join("rest/v1/")
            .map_err(|e| Error::Config(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            http,
            rest_url,
            api_key: api_key.trim().to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn table_url(&self, table: &str) -> Result<Url> {
        self.rest_url
            .join(table)
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Cheap reachability probe: one row from the task table.
    pub async fn check_connection(&self) -> Result<()> {
        let query = vec![("select".to_string(), "task_id".to_string())];
        self.fetch_page::<Value>(TASKS_TABLE, &query, 0, 1).await?;
        Ok(())
    }

    /// Every row of `table` matching `query`, fetched page by page.
    ///
    /// `query` must order on a unique key or offsets can skip or repeat rows.
    /// Paging stops at the first empty page, since the server may cap a
    /// page below `PAGE_SIZE`.
    async fn get_rows<R: DeserializeOwned>(&self, table: &str, query: &[(String, String)]) -> Result<Vec<R>> {
        let mut rows = Vec::new();
        loop {
            let offset = rows.len();
            let page: Vec<R> = with_retry(&self.retry, table, || {
                self.fetch_page(table, query, offset, PAGE_SIZE)
            })
            .await?;
            if page.is_empty() {
                break;
            }
            rows.extend(page);
        }
        log::debug!("Fetched {} rows from {table}", rows.len());
        Ok(rows)
    }

    async fn fetch_page<R: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(String, String)],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<R>> {
        let url = self.table_url(table)?;
        let resp = self
            .http
            .get(url)
            .query(query)
            .query(&[("limit", limit), ("offset", offset)])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(table, status, &body));
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Only server-side and throttling failures are worth retrying; any other
/// 4xx means the request itself is wrong.
fn status_error(table: &str, status: StatusCode, body: &str) -> Error {
    let message = format!("{table}: HTTP {status}: {body}");
    match status {
        s if s.is_server_error() => Error::Upstream(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => Error::Upstream(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Config(message),
        _ => Error::Decode(message),
    }
}

#[async_trait]
impl TaskStore for SupabaseClient {
    async fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = self.get_rows(TASKS_TABLE, &filter.to_postgrest()).await?;
        Ok(rows.into_iter().map(TaskRow::into_task).collect())
    }

    async fn query_client_configs(&self) -> Result<Vec<ClientConfig>> {
        let query = vec![
            ("select".to_string(), "*".to_string()),
            ("order".to_string(), "client_name.asc,id.asc".to_string()),
        ];
        let rows: Vec<ClientRow> = self.get_rows(CLIENTS_TABLE, &query).await?;
        Ok(rows.into_iter().map(ClientRow::into_config).collect())
    }

    async fn query_team_members(&self) -> Result<Vec<TeamMember>> {
        let query = vec![
            ("select".to_string(), "*".to_string()),
            ("order".to_string(), "clickup_name.asc".to_string()),
        ];
        let rows: Vec<TeamMemberRow> = self.get_rows(TEAM_TABLE, &query).await?;
        Ok(rows.into_iter().filter_map(TeamMemberRow::into_member).collect())
    }
}

// ── Upstream rows ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TaskRow {
    task_id: String,
    #[serde(default)]
    task_name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    time_spent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    time_estimate: Option<f64>,
    #[serde(default)]
    assignees: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    date_updated: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    due_date: Option<f64>,
    #[serde(default)]
    folder_name: Option<String>,
    #[serde(default)]
    list_name: Option<String>,
    #[serde(default)]
    space_name: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

impl TaskRow {
    fn into_task(self) -> Task {
        Task {
            task_id: self.task_id,
            task_name: self.task_name.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            time_spent_ms: non_negative_ms(self.time_spent),
            time_estimate_ms: non_negative_ms(self.time_estimate),
            assignees: Task::parse_assignees(self.assignees.as_deref().unwrap_or("")),
            updated_at_ms: self.date_updated.map(|v| v as i64).unwrap_or(0),
            due_at_ms: self.due_date.map(|v| v as i64),
            folder_name: self.folder_name.unwrap_or_default(),
            list_name: self.list_name.unwrap_or_default(),
            space_name: self.space_name,
            priority: self.priority,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClientRow {
    id: i64,
    client_name: String,
    #[serde(default)]
    clickup_project_name: Option<String>,
    #[serde(default)]
    clickup_folder_name: Option<String>,
    #[serde(default)]
    clickup_list_name: Option<String>,
    #[serde(default)]
    project_type: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    available_hours: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    revenue: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    average_delivery_hourly: Option<f64>,
}

impl ClientRow {
    fn into_config(self) -> ClientConfig {
        let project_type = self.project_type.as_deref().and_then(ProjectType::normalize);
        if project_type.is_none() {
            if let Some(raw) = self.project_type.as_deref() {
                log::warn!("Unknown project type {raw:?} for client {}", self.client_name);
            }
        }
        ClientConfig {
            id: self.id,
            // The folder defaults to the client's own name when unmapped.
            folder_name: self
                .clickup_folder_name
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| self.client_name.clone()),
            client_name: self.client_name,
            company: self.clickup_project_name,
            list_name: self.clickup_list_name,
            project_type,
            status: self.status.as_deref().and_then(ClientStatus::normalize),
            available_hours: self.available_hours,
            revenue: self.revenue,
            average_delivery_hourly: self.average_delivery_hourly,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TeamMemberRow {
    #[serde(default)]
    clickup_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    weekly_hours: Option<f64>,
    #[serde(default)]
    status: Option<String>,
}

impl TeamMemberRow {
    /// Rows without a ClickUp name can never match an assignee and are dropped.
    fn into_member(self) -> Option<TeamMember> {
        let clickup_name = self.clickup_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())?;
        Some(TeamMember {
            display_name: self
                .display_name
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| clickup_name.clone()),
            clickup_name,
            team: self.team.unwrap_or_default(),
            role: self.role,
            weekly_hours: self.weekly_hours.filter(|h| *h > 0.0).unwrap_or(DEFAULT_WEEKLY_HOURS),
            status: self.status,
        })
    }
}

/// Accept a number, a numeric string, or null. Anything unparseable is `None`.
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(parsed.filter(|f| f.is_finite()))
}

fn non_negative_ms(v: Option<f64>) -> u64 {
    v.filter(|ms| *ms > 0.0).map(|ms| ms as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_task_row_coercion() {
        let row: TaskRow = serde_json::from_value(json!({
            "task_id": "abc",
            "task_name": "Homepage",
            "status": "in progress",
            "time_spent": "7200000",
            "time_estimate": null,
            "assignees": "Alice, Bob",
            "date_updated": "1741597200000",
            "due_date": 1741683600000_i64,
            "folder_name": "Acme",
            "list_name": "Delivery"
        }))
        .unwrap();
        let task = row.into_task();
        assert_eq!(task.time_spent_ms, 7_200_000);
        assert_eq!(task.time_estimate_ms, 0);
        assert_eq!(task.assignees, vec!["Alice", "Bob"]);
        assert_eq!(task.updated_at_ms, 1_741_597_200_000);
        assert_eq!(task.due_at_ms, Some(1_741_683_600_000));
    }

    #[test]
    fn test_garbage_numbers_become_zero() {
        let row: TaskRow = serde_json::from_value(json!({
            "task_id": "abc",
            "time_spent": "n/a",
            "time_estimate": -5
        }))
        .unwrap();
        let task = row.into_task();
        assert_eq!(task.time_spent_ms, 0);
        assert_eq!(task.time_estimate_ms, 0);
        assert!(task.assignees.is_empty());
    }

    #[test]
    fn test_client_row_normalizes_project_type() {
        for spelling in ["On-going", "On-Going", "ongoing"] {
            let row: ClientRow = serde_json::from_value(json!({
                "id": 1,
                "client_name": "Acme",
                "clickup_project_name": "Veza",
                "clickup_folder_name": "Acme Folder",
                "project_type": spelling,
                "status": "Not Active",
                "revenue": "12000.50"
            }))
            .unwrap();
            let c = row.into_config();
            assert_eq!(c.project_type, Some(ProjectType::Recurring));
            assert_eq!(c.status, Some(ClientStatus::NotActive));
            assert_eq!(c.revenue, Some(12000.5));
            assert_eq!(c.available_hours, None);
            assert_eq!(c.folder_name, "Acme Folder");
        }
    }

    #[test]
    fn test_team_row_defaults() {
        let row: TeamMemberRow = serde_json::from_value(json!({
            "clickup_name": " alice ",
            "team": "Design"
        }))
        .unwrap();
        let m = row.into_member().unwrap();
        assert_eq!(m.clickup_name, "alice");
        assert_eq!(m.display_name, "alice");
        assert_eq!(m.weekly_hours, DEFAULT_WEEKLY_HOURS);

        let nameless: TeamMemberRow = serde_json::from_value(json!({ "team": "QA" })).unwrap();
        assert!(nameless.into_member().is_none());
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(SupabaseClient::new("not a url", "key").is_err());
        assert!(SupabaseClient::new("ftp://example.com", "key").is_err());
        assert!(SupabaseClient::new("https://example.supabase.co", " ").is_err());
        let c = SupabaseClient::new("https://example.supabase.co", "key").unwrap();
        assert_eq!(
            c.table_url(TASKS_TABLE).unwrap().as_str(),
            "https://example.supabase.co/rest/v1/clickup_supabase"
        );
    }

    #[derive(Default)]
    struct Upstream {
        hits: AtomicUsize,
        fail_first: usize,
        /// Server-side page cap, like PostgREST `max-rows`. Zero means none.
        max_rows: usize,
        extra_members: usize,
        orders: Mutex<Vec<String>>,
    }

    fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
        params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    async fn serve_table(
        State(state): State<Arc<Upstream>>,
        Path(table): Path<String>,
        Query(params): Query<Vec<(String, String)>>,
        headers: HeaderMap,
    ) -> (StatusCode, Json<Value>) {
        let n = state.hits.fetch_add(1, Ordering::SeqCst);
        if n < state.fail_first {
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"message": "busy"})));
        }
        if headers.get("apikey").and_then(|v| v.to_str().ok()) != Some("secret-key") {
            return (StatusCode::UNAUTHORIZED, Json(json!({"message": "no key"})));
        }
        if let Some(order) = param(&params, "order") {
            state.orders.lock().unwrap().push(format!("{table}:{order}"));
        }
        let rows: Vec<Value> = match table.as_str() {
            TASKS_TABLE => {
                if let Some(folder) = param(&params, "folder_name") {
                    assert_eq!(folder, "eq.Acme");
                }
                vec![json!({ "task_id": "t1", "time_spent": "3600000", "assignees": "alice",
                             "date_updated": "1741597200000", "folder_name": "Acme" })]
            }
            CLIENTS_TABLE => vec![json!({ "id": 7, "client_name": "Acme", "project_type": "One-Time" })],
            _ => {
                let mut rows = vec![json!({ "clickup_name": "alice", "team": "Design", "weekly_hours": 30 })];
                rows.extend(
                    (0..state.extra_members).map(|i| json!({ "clickup_name": format!("m{i:02}"), "team": "QA" })),
                );
                rows
            }
        };
        let offset = param(&params, "offset").and_then(|v| v.parse().ok()).unwrap_or(0);
        let mut limit = param(&params, "limit").and_then(|v| v.parse().ok()).unwrap_or(usize::MAX);
        if state.max_rows > 0 {
            limit = limit.min(state.max_rows);
        }
        let page: Vec<Value> = rows.into_iter().skip(offset).take(limit).collect();
        (StatusCode::OK, Json(Value::Array(page)))
    }

    async fn spawn_upstream(state: Arc<Upstream>) -> String {
        let app = Router::new()
            .route("/rest/v1/{table}", get(serve_table))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_task_store_over_http() {
        let state = Arc::new(Upstream::default());
        let url = spawn_upstream(state.clone()).await;
        let client = SupabaseClient::new(&url, "secret-key").unwrap().with_retry_policy(fast_retry());

        let tasks = client.query_tasks(&TaskFilter::all().folder("Acme")).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].time_spent_ms, 3_600_000);

        let clients = client.query_client_configs().await.unwrap();
        assert_eq!(clients[0].project_type, Some(ProjectType::FixedScope));
        assert_eq!(clients[0].folder_name, "Acme");

        let members = client.query_team_members().await.unwrap();
        assert_eq!(members[0].weekly_hours, 30.0);

        let orders = state.orders.lock().unwrap().clone();
        assert!(orders.contains(&"clickup_supabase:date_updated.desc,task_id.asc".to_string()));
        assert!(orders.contains(&"client_mappings:client_name.asc,id.asc".to_string()));
        assert!(orders.contains(&"team_members:clickup_name.asc".to_string()));
    }

    #[tokio::test]
    async fn test_pages_past_server_row_cap() {
        let state = Arc::new(Upstream {
            max_rows: 2,
            extra_members: 4,
            ..Default::default()
        });
        let url = spawn_upstream(state.clone()).await;
        let client = SupabaseClient::new(&url, "secret-key").unwrap().with_retry_policy(fast_retry());

        let members = client.query_team_members().await.unwrap();
        let names: Vec<&str> = members.iter().map(|m| m.clickup_name.as_str()).collect();
        assert_eq!(names, vec!["alice", "m00", "m01", "m02", "m03"]);
        // Pages of 2, 2 and 1, then the empty page that ends the scan.
        assert_eq!(state.hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_rejected_key_is_not_retried() {
        let state = Arc::new(Upstream::default());
        let url = spawn_upstream(state.clone()).await;
        let client = SupabaseClient::new(&url, "wrong-key").unwrap().with_retry_policy(fast_retry());

        let err = client.query_client_configs().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_error_classes() {
        assert!(matches!(
            status_error("t", StatusCode::BAD_GATEWAY, ""),
            Error::Upstream(_)
        ));
        assert!(matches!(
            status_error("t", StatusCode::TOO_MANY_REQUESTS, ""),
            Error::Upstream(_)
        ));
        assert!(matches!(status_error("t", StatusCode::FORBIDDEN, ""), Error::Config(_)));
        assert!(matches!(status_error("t", StatusCode::BAD_REQUEST, ""), Error::Decode(_)));
    }

    #[tokio::test]
    async fn test_check_connection() {
        let state = Arc::new(Upstream::default());
        let url = spawn_upstream(state.clone()).await;

        let ok = SupabaseClient::new(&url, "secret-key").unwrap();
        ok.check_connection().await.unwrap();

        let bad = SupabaseClient::new(&url, "wrong-key").unwrap();
        assert!(matches!(bad.check_connection().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_retries_transient_http_failures() {
        let state = Arc::new(Upstream {
            fail_first: 2,
            ..Default::default()
        });
        let url = spawn_upstream(state.clone()).await;
        let client = SupabaseClient::new(&url, "secret-key").unwrap().with_retry_policy(fast_retry());

        let members = client.query_team_members().await.unwrap();
        assert_eq!(members.len(), 1);
        // Two failures, the page, then the empty page.
        assert_eq!(state.hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_upstream_error() {
        let state = Arc::new(Upstream {
            fail_first: usize::MAX,
            ..Default::default()
        });
        let url = spawn_upstream(state).await;
        let client = SupabaseClient::new(&url, "secret-key").unwrap().with_retry_policy(fast_retry());

        let err = client.query_client_configs().await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
        assert!(err.is_upstream());
    }
}
