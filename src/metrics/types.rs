use serde::Serialize;

use crate::date_util::round2;
use crate::model::{ProjectType, StatusBucket};

/// Task counts by status bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskCounts {
    pub total: u64,
    pub todo: u64,
    pub in_progress: u64,
    pub completed: u64,
}

impl TaskCounts {
    pub fn record(&mut self, bucket: StatusBucket) {
        self.total += 1;
        match bucket {
            StatusBucket::Todo => self.todo += 1,
            StatusBucket::InProgress => self.in_progress += 1,
            StatusBucket::Completed => self.completed += 1,
        }
    }
}

/// Coarse profitability rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectHealth {
    Excellent,
    Good,
    AtRisk,
    /// No revenue configured or no matching tasks; margin is meaningless.
    NoData,
}

impl ProjectHealth {
    pub fn from_margin(profit_margin: f64) -> Self {
        if profit_margin >= 50.0 {
            ProjectHealth::Excellent
        } else if profit_margin >= 25.0 {
            ProjectHealth::Good
        } else {
            ProjectHealth::AtRisk
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProjectHealth::Excellent => "Excellent",
            ProjectHealth::Good => "Good",
            ProjectHealth::AtRisk => "At Risk",
            ProjectHealth::NoData => "No Data",
        }
    }
}

/// Financial and delivery metrics for one client engagement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectMetrics {
    pub client_name: String,
    pub project_type: Option<ProjectType>,
    pub total_hours: f64,
    pub hours_spent: f64,
    pub hours_spent_this_month: f64,
    pub hours_remaining: f64,
    pub utilization_percentage: f64,
    pub total_revenue: f64,
    pub delivery_cost: f64,
    pub profit: f64,
    /// Zero when revenue is zero; check `has_revenue` to tell "no data" from break-even.
    pub profit_margin: f64,
    pub has_revenue: bool,
    pub average_hourly_rate: f64,
    pub tasks: TaskCounts,
    pub tasks_this_month: TaskCounts,
    pub health: ProjectHealth,
}

/// Spend pacing derived from project metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurnRate {
    pub total_spent: f64,
    pub estimated_months: u32,
    pub average_monthly_burn: f64,
    pub remaining_budget: f64,
    /// Months until the remaining budget is exhausted at the current burn.
    pub months_to_exhaustion: Option<u32>,
    pub budget_utilization: f64,
    pub status: BudgetStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Healthy,
    Warning,
    Critical,
}

/// Deadline pressure on the open tasks of a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskHealth {
    pub overdue: u64,
    pub due_soon: u64,
    pub open: u64,
}

/// One assignee's share of the work on a project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectContributor {
    pub name: String,
    pub hours_spent: f64,
    pub task_count: u64,
    pub hours_spent_this_month: f64,
    pub task_count_this_month: u64,
    pub utilization_percentage: f64,
}

/// Where a team member's time went this month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectAllocation {
    pub project: String,
    pub hours_this_month: f64,
    pub open_tasks: u64,
    pub percentage: f64,
}

/// Capacity figures for one staffed individual.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamMemberAnalytics {
    pub clickup_name: String,
    pub display_name: String,
    pub team: String,
    pub role: Option<String>,
    pub weekly_hours: f64,

    pub hours_this_week: f64,
    pub hours_last_week: f64,
    pub hours_this_month: f64,
    pub hours_last_3_months: f64,
    pub utilization_this_week: f64,
    pub utilization_last_week: f64,
    pub utilization_this_month: f64,
    pub utilization_last_3_months: f64,

    pub estimated_hours_next_week: f64,
    pub estimated_hours_next_2_weeks: f64,
    pub estimated_hours_next_month: f64,
    pub planned_utilization_next_week: f64,
    pub planned_utilization_next_2_weeks: f64,
    pub planned_utilization_next_month: f64,

    /// Actual ÷ estimated × 100 over tasks that have both.
    pub efficiency: f64,
    pub task_count: u64,
    pub open_task_count: u64,
    pub allocations: Vec<ProjectAllocation>,
}

/// Team-level capacity, averaged across members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamAnalytics {
    pub team_name: String,
    pub member_count: u64,
    pub total_weekly_capacity: f64,
    pub total_hours_this_week: f64,
    pub total_hours_this_month: f64,
    pub average_utilization_this_week: f64,
    pub average_utilization_last_week: f64,
    pub average_utilization_this_month: f64,
    pub average_utilization_last_3_months: f64,
    pub average_planned_utilization_next_week: f64,
    pub average_planned_utilization_next_2_weeks: f64,
    pub average_planned_utilization_next_month: f64,
    pub average_efficiency: f64,
    pub members: Vec<TeamMemberAnalytics>,
}

/// Unweighted mean, rounded to two places; 0 for an empty input.
pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        round2(sum / n as f64)
    }
}

/// `part / whole × 100`, rounded; 0 when `whole` is not positive.
pub(crate) fn percentage(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        round2(part / whole * 100.0)
    } else {
        0.0
    }
}
