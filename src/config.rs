use chrono::Weekday;

use crate::cache::TtlPolicy;
use crate::error::{Error, Result};

/// Company groupings warmed by `refresh_cache`.
pub const DEFAULT_PREWARM_COMPANIES: &[&str] = &["veza", "shadow"];

/// Teams warmed by `refresh_cache`.
pub const DEFAULT_PREWARM_TEAMS: &[&str] = &["Design", "Development", "SEO", "QA"];

/// Runtime settings for a [`Dashboard`](crate::Dashboard).
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub ttl: TtlPolicy,
    /// First day of the calendar week used for "this week" windows.
    pub week_start: Weekday,
    pub prewarm_companies: Vec<String>,
    pub prewarm_teams: Vec<String>,
    /// Shared secret for the scheduler-triggered refresh. `None` rejects every call.
    pub refresh_secret: Option<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            ttl: TtlPolicy::default(),
            week_start: Weekday::Mon,
            prewarm_companies: DEFAULT_PREWARM_COMPANIES.iter().map(|s| s.to_string()).collect(),
            prewarm_teams: DEFAULT_PREWARM_TEAMS.iter().map(|s| s.to_string()).collect(),
            refresh_secret: None,
        }
    }
}

impl DashboardConfig {
    /// Exact string comparison against the configured secret.
    pub fn secret_matches(&self, presented: Option<&str>) -> bool {
        match (self.refresh_secret.as_deref(), presented) {
            (Some(expected), Some(given)) => !expected.is_empty() && expected == given,
            _ => false,
        }
    }
}

/// Parse a weekday name such as `monday`, `Sun` or `sat`.
pub fn parse_week_start(s: &str) -> Result<Weekday> {
    s.trim()
        .parse::<Weekday>()
        .map_err(|_| Error::Config(format!("invalid week start: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = DashboardConfig::default();
        assert_eq!(c.week_start, Weekday::Mon);
        assert_eq!(c.prewarm_companies, vec!["veza", "shadow"]);
        assert_eq!(c.prewarm_teams.len(), 4);
        assert!(c.refresh_secret.is_none());
    }

    #[test]
    fn test_secret_matches_exactly() {
        let mut c = DashboardConfig::default();
        assert!(!c.secret_matches(Some("anything")));
        c.refresh_secret = Some("s3cret".into());
        assert!(c.secret_matches(Some("s3cret")));
        assert!(!c.secret_matches(Some("S3CRET")));
        assert!(!c.secret_matches(Some("s3cret ")));
        assert!(!c.secret_matches(None));
        c.refresh_secret = Some(String::new());
        assert!(!c.secret_matches(Some("")));
    }

    #[test]
    fn test_parse_week_start() {
        assert_eq!(parse_week_start("sunday").unwrap(), Weekday::Sun);
        assert_eq!(parse_week_start("Mon").unwrap(), Weekday::Mon);
        assert!(parse_week_start("someday").is_err());
    }
}
