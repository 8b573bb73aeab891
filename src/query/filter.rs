use serde::Serialize;

use crate::date_util::TimeRange;
use crate::error::{Error, Result};
use crate::model::{ClientConfig, ClientStatus, ProjectType};

/// Which engagement types a listing view includes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum ProjectTypeFilter {
    #[default]
    All,
    Only(ProjectType),
}

impl ProjectTypeFilter {
    /// Accepts `all` plus any spelling [`ProjectType::normalize`] understands.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(ProjectTypeFilter::All);
        }
        ProjectType::normalize(s)
            .map(ProjectTypeFilter::Only)
            .ok_or_else(|| Error::InvalidFilter(format!("unknown project type: {s}")))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectTypeFilter::All => "all",
            ProjectTypeFilter::Only(t) => t.as_str(),
        }
    }

    pub fn matches(&self, client: &ClientConfig) -> bool {
        match self {
            ProjectTypeFilter::All => true,
            ProjectTypeFilter::Only(t) => client.project_type == Some(*t),
        }
    }
}

/// Which engagement statuses a listing view includes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum StatusFilter {
    #[default]
    All,
    Only(ClientStatus),
}

impl StatusFilter {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(StatusFilter::All);
        }
        ClientStatus::normalize(s)
            .map(StatusFilter::Only)
            .ok_or_else(|| Error::InvalidFilter(format!("unknown status: {s}")))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::All => "all",
            StatusFilter::Only(s) => s.as_str(),
        }
    }

    pub fn matches(&self, client: &ClientConfig) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(s) => client.status == Some(*s),
        }
    }
}

/// Filter for task queries against a [`TaskStore`](crate::store::TaskStore).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub folder_name: Option<String>,
    pub list_name: Option<String>,
    pub updated_after_ms: Option<i64>,
    pub updated_before_ms: Option<i64>,
}

impl TaskFilter {
    /// Every task in the store.
    pub fn all() -> Self {
        Self::default()
    }

    /// Tasks in the client's folder (and list, when the mapping names one).
    pub fn for_client(client: &ClientConfig) -> Self {
        let mut filter = Self::default().folder(&client.folder_name);
        if let Some(list) = client.list_name.as_deref().filter(|l| !l.trim().is_empty()) {
            filter = filter.list(list);
        }
        filter
    }

    pub fn folder(mut self, name: &str) -> Self {
        self.folder_name = Some(name.to_string());
        self
    }

    pub fn list(mut self, name: &str) -> Self {
        self.list_name = Some(name.to_string());
        self
    }

    /// Inclusive lower bound on the update timestamp.
    pub fn updated_after(mut self, ms: i64) -> Self {
        self.updated_after_ms = Some(ms);
        self
    }

    /// Exclusive upper bound on the update timestamp.
    pub fn updated_before(mut self, ms: i64) -> Self {
        self.updated_before_ms = Some(ms);
        self
    }

    /// Restrict to a half-open range; `None` leaves the filter unbounded.
    pub fn within(self, range: Option<TimeRange>) -> Self {
        match range {
            Some(r) => self.updated_after(r.start_ms).updated_before(r.end_ms),
            None => self,
        }
    }

    /// Whether a task with these labels and timestamp passes the filter.
    pub fn matches(&self, folder: &str, list: &str, updated_at_ms: i64) -> bool {
        self.folder_name.as_deref().is_none_or(|f| f == folder)
            && self.list_name.as_deref().is_none_or(|l| l == list)
            && self.updated_after_ms.is_none_or(|a| updated_at_ms >= a)
            && self.updated_before_ms.is_none_or(|b| updated_at_ms < b)
    }

    /// Render as a SQL statement over the `tasks` table plus its positional parameters.
    pub(crate) fn build_sql(&self) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut wheres = Vec::new();
        let mut param_idx = 1;

        let select = "SELECT task_id, task_name, status, time_spent_ms, time_estimate_ms,
                assignees, updated_at_ms, due_at_ms, folder_name, list_name,
                space_name, priority
            FROM tasks";

        if let Some(ref folder) = self.folder_name {
            wheres.push(format!("folder_name = ?{param_idx}"));
            params.push(Box::new(folder.clone()));
            param_idx += 1;
        }
        if let Some(ref list) = self.list_name {
            wheres.push(format!("list_name = ?{param_idx}"));
            params.push(Box::new(list.clone()));
            param_idx += 1;
        }
        if let Some(after) = self.updated_after_ms {
            wheres.push(format!("updated_at_ms >= ?{param_idx}"));
            params.push(Box::new(after));
            param_idx += 1;
        }
        if let Some(before) = self.updated_before_ms {
            wheres.push(format!("updated_at_ms < ?{param_idx}"));
            params.push(Box::new(before));
        }

        let mut sql = select.to_string();
        if !wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&wheres.join(" AND "));
        }
        sql.push_str(" ORDER BY updated_at_ms DESC");
        (sql, params)
    }

    /// Render as PostgREST query parameters for the upstream task table.
    pub(crate) fn to_postgrest(&self) -> Vec<(String, String)> {
        let mut query = vec![("select".to_string(), "*".to_string())];
        if let Some(ref folder) = self.folder_name {
            query.push(("folder_name".into(), format!("eq.{folder}")));
        }
        if let Some(ref list) = self.list_name {
            query.push(("list_name".into(), format!("eq.{list}")));
        }
        if let Some(after) = self.updated_after_ms {
            query.push(("date_updated".into(), format!("gte.{after}")));
        }
        if let Some(before) = self.updated_before_ms {
            query.push(("date_updated".into(), format!("lt.{before}")));
        }
        query.push(("order".into(), "date_updated.desc,task_id.asc".into()));
        query
    }
}
