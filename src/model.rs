//! Domain records read from the task store.
//!
//! Upstream data is known to be incomplete and inconsistently spelled, so
//! everything in here is normalized once, at the point it is read, and the
//! rest of the crate only ever sees these types.

use std::collections::HashSet;

use serde::Serialize;

/// The bucket a task's free-text status falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBucket {
    Todo,
    InProgress,
    Completed,
}

impl StatusBucket {
    /// Classify a raw status string. Unknown statuses land in `Todo`.
    pub fn classify(status: &str) -> Self {
        match normalize_label(status).as_str() {
            "complete" | "completed" | "approved" | "closed" | "done" => StatusBucket::Completed,
            "in progress" | "review" | "in review" | "client review" => StatusBucket::InProgress,
            _ => StatusBucket::Todo,
        }
    }
}

/// A unit of work tracked in ClickUp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub task_id: String,
    pub task_name: String,
    pub status: String,
    pub time_spent_ms: u64,
    pub time_estimate_ms: u64,
    pub assignees: Vec<String>,
    pub updated_at_ms: i64,
    pub due_at_ms: Option<i64>,
    pub folder_name: String,
    pub list_name: String,
    pub space_name: Option<String>,
    pub priority: Option<String>,
}

impl Task {
    /// Split a comma-separated assignee list, dropping blanks.
    pub fn parse_assignees(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn bucket(&self) -> StatusBucket {
        StatusBucket::classify(&self.status)
    }

    pub fn is_complete(&self) -> bool {
        self.bucket() == StatusBucket::Completed
    }

    pub fn is_assigned_to(&self, name: &str) -> bool {
        let name = name.trim();
        self.assignees.iter().any(|a| a == name)
    }

    /// Fraction of this task attributed to `name` (work split evenly across assignees).
    pub fn share_of(&self, name: &str) -> f64 {
        if self.is_assigned_to(name) {
            1.0 / self.assignees.len() as f64
        } else {
            0.0
        }
    }

    /// Fraction of this task's assignees who are on the roster.
    pub fn billable_fraction(&self, roster: &Roster) -> f64 {
        if self.assignees.is_empty() {
            return 0.0;
        }
        let billable = self.assignees.iter().filter(|a| roster.contains(a)).count();
        billable as f64 / self.assignees.len() as f64
    }
}

/// How an engagement is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectType {
    /// Billed monthly against a monthly hour/revenue allocation.
    Recurring,
    /// One allocation for the whole engagement.
    FixedScope,
}

impl ProjectType {
    /// Map the upstream spellings ("On-going", "On-Going", "One-Time", ...) onto the two values.
    pub fn normalize(raw: &str) -> Option<Self> {
        let squashed: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        match squashed.as_str() {
            "ongoing" | "recurring" | "retainer" => Some(ProjectType::Recurring),
            "onetime" | "fixedscope" | "fixed" => Some(ProjectType::FixedScope),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Recurring => "recurring",
            ProjectType::FixedScope => "fixed-scope",
        }
    }
}

/// Lifecycle state of an engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientStatus {
    Active,
    NotActive,
    Paused,
    Completed,
}

impl ClientStatus {
    pub fn normalize(raw: &str) -> Option<Self> {
        match normalize_label(raw).as_str() {
            "active" => Some(ClientStatus::Active),
            "not active" | "notactive" | "inactive" => Some(ClientStatus::NotActive),
            "paused" => Some(ClientStatus::Paused),
            "completed" | "complete" => Some(ClientStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Active => "active",
            ClientStatus::NotActive => "not-active",
            ClientStatus::Paused => "paused",
            ClientStatus::Completed => "completed",
        }
    }
}

/// One billable engagement and its mapping onto ClickUp folders/lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientConfig {
    pub id: i64,
    pub client_name: String,
    /// ClickUp space/project the folder lives under; used for company grouping.
    pub company: Option<String>,
    pub folder_name: String,
    pub list_name: Option<String>,
    pub project_type: Option<ProjectType>,
    pub status: Option<ClientStatus>,
    /// Total hours for fixed-scope, monthly hours for recurring.
    pub available_hours: Option<f64>,
    /// Total revenue for fixed-scope, monthly revenue for recurring.
    pub revenue: Option<f64>,
    pub average_delivery_hourly: Option<f64>,
}

impl ClientConfig {
    pub fn belongs_to_company(&self, company: &str) -> bool {
        self.company
            .as_deref()
            .is_some_and(|c| same_name(c, company))
    }
}

/// A staffed individual.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamMember {
    /// Name as it appears in task assignee lists.
    pub clickup_name: String,
    pub display_name: String,
    pub team: String,
    pub role: Option<String>,
    pub weekly_hours: f64,
    pub status: Option<String>,
}

impl TeamMember {
    pub fn is_active(&self) -> bool {
        !matches!(
            self.status.as_deref().map(normalize_label).as_deref(),
            Some("inactive" | "not active" | "former")
        )
    }

    pub fn in_team(&self, team: &str) -> bool {
        same_name(&self.team, team)
    }
}

/// Set of assignee names that count as billable staff.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    names: HashSet<String>,
}

impl Roster {
    pub fn from_members(members: &[TeamMember]) -> Self {
        Self {
            names: members
                .iter()
                .map(|m| m.clickup_name.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name.trim())
    }
}

/// Case-insensitive name match, folded the same way cache keys are.
fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Lowercase, trim, and treat `-`/`_` as spaces.
fn normalize_label(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
