use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset};

use super::types::*;
use crate::date_util::{ms_to_hours, round2, start_of_month};
use crate::model::{ClientConfig, Roster, Task};

/// Hours in a nominal working month (40 h/week × 4 weeks).
pub const MONTHLY_CAPACITY_HOURS: f64 = 160.0;

const DUE_SOON_DAYS: i64 = 7;

/// Compute delivery and financial metrics for one client.
///
/// `period_tasks` must already be restricted to the client's folder/list and
/// the requested window. The "this month" figures are re-filtered from
/// `all_time_tasks` when given, otherwise from `period_tasks`.
///
/// Only time logged by roster members is billable: a task's `time_spent` is
/// scaled by the fraction of its assignees who are on the roster.
pub fn compute_project_metrics(
    client: &ClientConfig,
    period_tasks: &[Task],
    all_time_tasks: Option<&[Task]>,
    roster: &Roster,
    now: DateTime<FixedOffset>,
) -> ProjectMetrics {
    let month_start = start_of_month(now).timestamp_millis();
    let this_month: Vec<&Task> = all_time_tasks
        .unwrap_or(period_tasks)
        .iter()
        .filter(|t| t.updated_at_ms >= month_start)
        .collect();

    let hours_spent = billable_hours(period_tasks.iter(), roster);
    let hours_spent_this_month = billable_hours(this_month.iter().copied(), roster);

    let total_hours = non_negative(client.available_hours);
    let total_revenue = non_negative(client.revenue);
    let average_hourly_rate = non_negative(client.average_delivery_hourly);

    let delivery_cost = round2(hours_spent * average_hourly_rate);
    let profit = round2(total_revenue - delivery_cost);
    let has_revenue = total_revenue > 0.0;

    let mut tasks = TaskCounts::default();
    for t in period_tasks {
        tasks.record(t.bucket());
    }
    let mut tasks_this_month = TaskCounts::default();
    for t in &this_month {
        tasks_this_month.record(t.bucket());
    }

    let profit_margin = percentage(profit, total_revenue);
    let health = if !has_revenue || tasks.total == 0 {
        ProjectHealth::NoData
    } else {
        ProjectHealth::from_margin(profit_margin)
    };

    ProjectMetrics {
        client_name: client.client_name.clone(),
        project_type: client.project_type,
        total_hours,
        hours_spent,
        hours_spent_this_month,
        hours_remaining: round2((total_hours - hours_spent).max(0.0)),
        utilization_percentage: percentage(hours_spent, total_hours),
        total_revenue,
        delivery_cost,
        profit,
        profit_margin,
        has_revenue,
        average_hourly_rate,
        tasks,
        tasks_this_month,
        health,
    }
}

/// Summed billable hours, rounded to two places.
pub fn billable_hours<'a>(tasks: impl Iterator<Item = &'a Task>, roster: &Roster) -> f64 {
    let ms: f64 = tasks
        .map(|t| t.time_spent_ms as f64 * t.billable_fraction(roster))
        .sum();
    round2(ms_to_hours(ms))
}

/// Per-assignee breakdown of the hours on a project, largest first.
///
/// Every named assignee appears here, on the roster or not.
pub fn extract_contributors(tasks: &[Task], now: DateTime<FixedOffset>) -> Vec<ProjectContributor> {
    #[derive(Default)]
    struct Acc {
        hours: f64,
        tasks: u64,
        hours_this_month: f64,
        tasks_this_month: u64,
    }

    let month_start = start_of_month(now).timestamp_millis();
    let mut by_name: HashMap<&str, Acc> = HashMap::new();

    for task in tasks {
        if task.assignees.is_empty() {
            continue;
        }
        let split = ms_to_hours(task.time_spent_ms as f64) / task.assignees.len() as f64;
        let this_month = task.updated_at_ms >= month_start;
        for name in &task.assignees {
            let acc = by_name.entry(name.as_str()).or_default();
            acc.hours += split;
            acc.tasks += 1;
            if this_month {
                acc.hours_this_month += split;
                acc.tasks_this_month += 1;
            }
        }
    }

    let mut out: Vec<ProjectContributor> = by_name
        .into_iter()
        .map(|(name, acc)| ProjectContributor {
            name: name.to_string(),
            hours_spent: round2(acc.hours),
            task_count: acc.tasks,
            hours_spent_this_month: round2(acc.hours_this_month),
            task_count_this_month: acc.tasks_this_month,
            utilization_percentage: percentage(acc.hours_this_month, MONTHLY_CAPACITY_HOURS),
        })
        .collect();
    out.sort_by(|a, b| {
        b.hours_spent
            .total_cmp(&a.hours_spent)
            .then_with(|| a.name.cmp(&b.name))
    });
    out
}

impl BurnRate {
    pub fn from_metrics(metrics: &ProjectMetrics) -> Self {
        let total_spent = metrics.delivery_cost;
        let estimated_months = ((metrics.hours_spent / MONTHLY_CAPACITY_HOURS).ceil() as u32).max(1);
        let average_monthly_burn = round2(total_spent / estimated_months as f64);
        let remaining_budget = round2(metrics.total_revenue - total_spent);
        let months_to_exhaustion = if average_monthly_burn > 0.0 {
            Some((remaining_budget.max(0.0) / average_monthly_burn).ceil() as u32)
        } else {
            None
        };
        let budget_utilization = percentage(total_spent, metrics.total_revenue);
        let status = if budget_utilization > 90.0 {
            BudgetStatus::Critical
        } else if budget_utilization > 75.0 {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Healthy
        };
        Self {
            total_spent,
            estimated_months,
            average_monthly_burn,
            remaining_budget,
            months_to_exhaustion,
            budget_utilization,
            status,
        }
    }
}

impl TaskHealth {
    /// Count open tasks that are past due or due within a week.
    pub fn assess(tasks: &[Task], now: DateTime<FixedOffset>) -> Self {
        let now_ms = now.timestamp_millis();
        let soon_ms = (now + Duration::days(DUE_SOON_DAYS)).timestamp_millis();
        let mut health = TaskHealth::default();
        for task in tasks.iter().filter(|t| !t.is_complete()) {
            health.open += 1;
            match task.due_at_ms {
                Some(due) if due < now_ms => health.overdue += 1,
                Some(due) if due <= soon_ms => health.due_soon += 1,
                _ => {}
            }
        }
        health
    }
}

fn non_negative(v: Option<f64>) -> f64 {
    v.filter(|v| v.is_finite()).unwrap_or(0.0).max(0.0)
}
