//! Pure aggregation from task snapshots to dashboard metrics.
//!
//! Nothing in here touches a store or a clock; callers pass `now` in.

pub mod project;
pub mod team;
pub mod types;

pub use project::{billable_hours, compute_project_metrics, extract_contributors};
pub use team::{compute_member_analytics, compute_team_analytics, CapacityWindows};
pub use types::*;
