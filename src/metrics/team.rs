use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, Weekday};

use super::types::*;
use crate::date_util::{add_months, midnight, ms_to_hours, round2, start_of_month, start_of_week, TimeRange};
use crate::model::{Task, TeamMember};

/// Weeks of capacity credited to a calendar month.
pub const WEEKS_PER_MONTH: f64 = 4.0;
/// Weeks of capacity credited to the trailing three months.
pub const WEEKS_PER_QUARTER: f64 = 13.0;

/// A window plus the number of capacity-weeks it represents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityWindow {
    pub range: TimeRange,
    pub weeks: f64,
}

/// The fixed trailing and upcoming windows team capacity is measured over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityWindows {
    pub this_week: CapacityWindow,
    pub last_week: CapacityWindow,
    pub this_month: CapacityWindow,
    pub last_3_months: CapacityWindow,
    pub next_week: CapacityWindow,
    pub next_2_weeks: CapacityWindow,
    pub next_month: CapacityWindow,
}

impl CapacityWindows {
    /// Trailing windows key off update timestamps and calendar boundaries;
    /// upcoming windows start at `now` and key off due dates.
    pub fn at(now: DateTime<FixedOffset>, week_start: Weekday) -> Self {
        let tz = *now.offset();
        let week = start_of_week(now, week_start);
        let month = start_of_month(now);
        let next_month_start = midnight(&tz, add_months(month.date_naive(), 1));
        let tomorrow = midnight(&tz, now.date_naive() + Duration::days(1));
        let three_months_ago = midnight(&tz, add_months(now.date_naive(), -3));
        let month_ahead = midnight(&tz, add_months(now.date_naive(), 1)) + (now - midnight(&tz, now.date_naive()));

        let window = |start, end, weeks| CapacityWindow {
            range: TimeRange::new(start, end),
            weeks,
        };

        Self {
            this_week: window(week, week + Duration::days(7), 1.0),
            last_week: window(week - Duration::days(7), week, 1.0),
            this_month: window(month, next_month_start, WEEKS_PER_MONTH),
            last_3_months: window(three_months_ago, tomorrow, WEEKS_PER_QUARTER),
            next_week: window(now, now + Duration::days(7), 1.0),
            next_2_weeks: window(now, now + Duration::days(14), 2.0),
            next_month: window(now, month_ahead, WEEKS_PER_MONTH),
        }
    }
}

/// Hours logged vs. capacity, and planned load, for one team member.
///
/// Time on shared tasks is split evenly across co-assignees. Forward-looking
/// figures only consider open tasks with a due date; undated work carries no
/// planning signal.
pub fn compute_member_analytics(
    member: &TeamMember,
    tasks: &[Task],
    windows: &CapacityWindows,
) -> TeamMemberAnalytics {
    let name = member.clickup_name.trim();
    let mine: Vec<(&Task, f64)> = tasks
        .iter()
        .filter(|t| t.is_assigned_to(name))
        .map(|t| (t, t.share_of(name)))
        .collect();

    let spent_in = |w: &CapacityWindow| {
        let ms: f64 = mine
            .iter()
            .filter(|(t, _)| w.range.contains(t.updated_at_ms))
            .map(|(t, share)| t.time_spent_ms as f64 * share)
            .sum();
        round2(ms_to_hours(ms))
    };
    let planned_in = |w: &CapacityWindow| {
        let ms: f64 = mine
            .iter()
            .filter(|(t, _)| !t.is_complete() && w.range.contains_opt(t.due_at_ms))
            .map(|(t, share)| t.time_estimate_ms as f64 * share)
            .sum();
        round2(ms_to_hours(ms))
    };
    let capacity = |w: &CapacityWindow| member.weekly_hours.max(0.0) * w.weeks;

    let hours_this_week = spent_in(&windows.this_week);
    let hours_last_week = spent_in(&windows.last_week);
    let hours_this_month = spent_in(&windows.this_month);
    let hours_last_3_months = spent_in(&windows.last_3_months);
    let estimated_hours_next_week = planned_in(&windows.next_week);
    let estimated_hours_next_2_weeks = planned_in(&windows.next_2_weeks);
    let estimated_hours_next_month = planned_in(&windows.next_month);

    let (actual, estimated) = mine
        .iter()
        .filter(|(t, _)| t.time_spent_ms > 0 && t.time_estimate_ms > 0)
        .fold((0.0, 0.0), |(a, e), (t, share)| {
            (
                a + t.time_spent_ms as f64 * share,
                e + t.time_estimate_ms as f64 * share,
            )
        });

    TeamMemberAnalytics {
        clickup_name: member.clickup_name.clone(),
        display_name: member.display_name.clone(),
        team: member.team.clone(),
        role: member.role.clone(),
        weekly_hours: member.weekly_hours,
        hours_this_week,
        hours_last_week,
        hours_this_month,
        hours_last_3_months,
        utilization_this_week: percentage(hours_this_week, capacity(&windows.this_week)),
        utilization_last_week: percentage(hours_last_week, capacity(&windows.last_week)),
        utilization_this_month: percentage(hours_this_month, capacity(&windows.this_month)),
        utilization_last_3_months: percentage(hours_last_3_months, capacity(&windows.last_3_months)),
        estimated_hours_next_week,
        estimated_hours_next_2_weeks,
        estimated_hours_next_month,
        planned_utilization_next_week: percentage(estimated_hours_next_week, capacity(&windows.next_week)),
        planned_utilization_next_2_weeks: percentage(
            estimated_hours_next_2_weeks,
            capacity(&windows.next_2_weeks),
        ),
        planned_utilization_next_month: percentage(estimated_hours_next_month, capacity(&windows.next_month)),
        efficiency: percentage(actual, estimated),
        task_count: mine.len() as u64,
        open_task_count: mine.iter().filter(|(t, _)| !t.is_complete()).count() as u64,
        allocations: allocations(&mine, &windows.this_month, hours_this_month),
    }
}

/// Per-project split of a member's month, largest first.
fn allocations(mine: &[(&Task, f64)], month: &CapacityWindow, month_hours: f64) -> Vec<ProjectAllocation> {
    let mut by_project: HashMap<&str, (f64, u64)> = HashMap::new();
    for (task, share) in mine {
        let in_month = month.range.contains(task.updated_at_ms);
        let open = !task.is_complete();
        if !in_month && !open {
            continue;
        }
        let entry = by_project.entry(task.folder_name.as_str()).or_default();
        if in_month {
            entry.0 += task.time_spent_ms as f64 * share;
        }
        if open {
            entry.1 += 1;
        }
    }

    let mut out: Vec<ProjectAllocation> = by_project
        .into_iter()
        .map(|(project, (ms, open_tasks))| {
            let hours = round2(ms_to_hours(ms));
            ProjectAllocation {
                project: project.to_string(),
                hours_this_month: hours,
                open_tasks,
                percentage: percentage(hours, month_hours),
            }
        })
        .collect();
    out.sort_by(|a, b| {
        b.hours_this_month
            .total_cmp(&a.hours_this_month)
            .then_with(|| a.project.cmp(&b.project))
    });
    out
}

/// Roll member analytics up to a team. Averages are unweighted: every
/// member counts once regardless of capacity.
pub fn compute_team_analytics(
    team_name: &str,
    members: &[TeamMember],
    tasks: &[Task],
    now: DateTime<FixedOffset>,
    week_start: Weekday,
) -> TeamAnalytics {
    let windows = CapacityWindows::at(now, week_start);
    let mut analytics: Vec<TeamMemberAnalytics> = members
        .iter()
        .map(|m| compute_member_analytics(m, tasks, &windows))
        .collect();
    analytics.sort_by(|a, b| a.display_name.cmp(&b.display_name));

    let avg = |f: fn(&TeamMemberAnalytics) -> f64| mean(analytics.iter().map(f));

    TeamAnalytics {
        team_name: team_name.to_string(),
        member_count: analytics.len() as u64,
        total_weekly_capacity: round2(analytics.iter().map(|m| m.weekly_hours).sum()),
        total_hours_this_week: round2(analytics.iter().map(|m| m.hours_this_week).sum()),
        total_hours_this_month: round2(analytics.iter().map(|m| m.hours_this_month).sum()),
        average_utilization_this_week: avg(|m| m.utilization_this_week),
        average_utilization_last_week: avg(|m| m.utilization_last_week),
        average_utilization_this_month: avg(|m| m.utilization_this_month),
        average_utilization_last_3_months: avg(|m| m.utilization_last_3_months),
        average_planned_utilization_next_week: avg(|m| m.planned_utilization_next_week),
        average_planned_utilization_next_2_weeks: avg(|m| m.planned_utilization_next_2_weeks),
        average_planned_utilization_next_month: avg(|m| m.planned_utilization_next_month),
        average_efficiency: avg(|m| m.efficiency),
        members: analytics,
    }
}
