//! Process-wide request cache fronting the metrics views.
//!
//! Entries expire `ttl` after insertion and are evicted lazily when a read
//! finds them stale. There is no size bound and no single-flight: two
//! concurrent misses on the same key both compute and the last write wins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::clock::Clock;
use crate::error::Result;
use crate::model::ProjectType;
use crate::query::filter::{ProjectTypeFilter, StatusFilter};
use crate::query::period::TimePeriod;

/// Single-project views.
pub const PROJECT_ANALYTICS_TTL: Duration = Duration::from_secs(5 * 60);
/// Aggregate and listing views.
pub const LISTING_TTL: Duration = Duration::from_secs(3 * 60);
/// Team views.
pub const TEAM_ANALYTICS_TTL: Duration = Duration::from_secs(2 * 60);

/// TTL per request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub project: Duration,
    pub listing: Duration,
    pub team: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            project: PROJECT_ANALYTICS_TTL,
            listing: LISTING_TTL,
            team: TEAM_ANALYTICS_TTL,
        }
    }
}

impl TtlPolicy {
    pub fn ttl_for(&self, key: &CacheKey) -> Duration {
        match key {
            CacheKey::ProjectAnalytics { .. } => self.project,
            CacheKey::AllProjects { .. } | CacheKey::CompanyProjects { .. } => self.listing,
            CacheKey::TeamAnalytics { .. } | CacheKey::AllTeams => self.team,
        }
    }
}

/// One cacheable request, with its parameters in a fixed order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    ProjectAnalytics {
        project: String,
        period: TimePeriod,
    },
    AllProjects {
        type_filter: ProjectTypeFilter,
        status_filter: StatusFilter,
        period: TimePeriod,
    },
    CompanyProjects {
        company: String,
        project_type: ProjectType,
        status_filter: StatusFilter,
        period: TimePeriod,
    },
    TeamAnalytics {
        team: String,
    },
    AllTeams,
}

impl CacheKey {
    pub fn kind(&self) -> &'static str {
        match self {
            CacheKey::ProjectAnalytics { .. } => "project-analytics",
            CacheKey::AllProjects { .. } => "all-projects",
            CacheKey::CompanyProjects { .. } => "company-projects",
            CacheKey::TeamAnalytics { .. } => "team-analytics",
            CacheKey::AllTeams => "all-teams",
        }
    }

    /// Canonical string form: `kind?field=value&...` with fields in declaration order.
    ///
    /// Company and team names are matched case-insensitively, so they are
    /// lowercased here too.
    pub fn to_key_string(&self) -> String {
        let mut params = url::form_urlencoded::Serializer::new(String::new());
        match self {
            CacheKey::ProjectAnalytics { project, period } => {
                params
                    .append_pair("project", project)
                    .append_pair("period", &period.to_key());
            }
            CacheKey::AllProjects {
                type_filter,
                status_filter,
                period,
            } => {
                params
                    .append_pair("type", type_filter.as_str())
                    .append_pair("status", status_filter.as_str())
                    .append_pair("period", &period.to_key());
            }
            CacheKey::CompanyProjects {
                company,
                project_type,
                status_filter,
                period,
            } => {
                params
                    .append_pair("company", &company.trim().to_lowercase())
                    .append_pair("type", project_type.as_str())
                    .append_pair("status", status_filter.as_str())
                    .append_pair("period", &period.to_key());
            }
            CacheKey::TeamAnalytics { team } => {
                params.append_pair("team", &team.trim().to_lowercase());
            }
            CacheKey::AllTeams => {}
        }
        format!("{}?{}", self.kind(), params.finish())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_key_string())
    }
}

struct Entry<V> {
    value: V,
    created_at: DateTime<FixedOffset>,
    ttl: Duration,
}

impl<V> Entry<V> {
    /// Valid iff `now <= created_at + ttl`.
    fn is_fresh(&self, now: DateTime<FixedOffset>) -> bool {
        match (now - self.created_at).to_std() {
            Ok(elapsed) => elapsed <= self.ttl,
            // Clock went backwards; still within the window.
            Err(_) => true,
        }
    }
}

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Outcome of a prewarm batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrewarmReport {
    pub warmed: Vec<String>,
    /// Computed fine but produced nothing worth caching (e.g. unknown team).
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// String-keyed map of values with per-entry TTL.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry<V>>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fresh value for `key`, evicting it if it has gone stale.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let fresh = match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        drop(entries);
        match fresh {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        fresh
    }

    /// Insert or overwrite unconditionally.
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = Entry {
            value,
            created_at: self.clock.now(),
            ttl,
        };
        self.lock().insert(key.into(), entry);
    }

    /// Drop every entry. Returns how many were removed.
    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.lock();
        let n = entries.len();
        entries.clear();
        n
    }

    /// Compute and insert each target in turn.
    ///
    /// A failing target is logged and recorded in the report; it never stops
    /// the rest of the batch.
    pub async fn prewarm<K, F, Fut>(
        &self,
        targets: impl IntoIterator<Item = (String, Duration, K)>,
        mut compute: F,
    ) -> PrewarmReport
    where
        F: FnMut(K) -> Fut,
        Fut: Future<Output = Result<Option<V>>>,
    {
        let mut report = PrewarmReport::default();
        for (key, ttl, target) in targets {
            match compute(target).await {
                Ok(Some(value)) => {
                    self.put(key.clone(), value, ttl);
                    report.warmed.push(key);
                }
                Ok(None) => {
                    log::debug!("Prewarm produced no data for {key}");
                    report.skipped.push(key);
                }
                Err(e) => {
                    log::error!("Failed to prewarm {key}: {e}");
                    report.failed.push(key);
                }
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::error::Error;
    use crate::model::ClientStatus;

    fn cache() -> (Arc<ManualClock>, TtlCache<String>) {
        let clock = Arc::new(ManualClock::at(2025, 3, 19, 12));
        let cache = TtlCache::new(clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_put_then_get() {
        let (_, cache) = cache();
        cache.put("k", "v".to_string(), Duration::from_secs(60));
        assert_eq!(cache.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_entry_valid_through_ttl_boundary() {
        let (clock, cache) = cache();
        cache.put("k", "v".to_string(), Duration::from_secs(60));
        clock.advance(chrono::Duration::seconds(60));
        assert!(cache.get("k").is_some());
        clock.advance(chrono::Duration::milliseconds(1));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_stale_entry_is_evicted_on_read() {
        let (clock, cache) = cache();
        cache.put("k", "v".to_string(), Duration::from_secs(1));
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_put_overwrites_and_resets_age() {
        let (clock, cache) = cache();
        cache.put("k", "old".to_string(), Duration::from_secs(10));
        clock.advance(chrono::Duration::seconds(8));
        cache.put("k", "new".to_string(), Duration::from_secs(10));
        clock.advance(chrono::Duration::seconds(8));
        assert_eq!(cache.get("k").as_deref(), Some("new"));
    }

    #[test]
    fn test_invalidate_all() {
        let (_, cache) = cache();
        cache.put("a", "1".to_string(), Duration::from_secs(60));
        cache.put("b", "2".to_string(), Duration::from_secs(60));
        assert_eq!(cache.invalidate_all(), 2);
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_stats() {
        let (_, cache) = cache();
        cache.put("a", "1".to_string(), Duration::from_secs(60));
        cache.get("a");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_prewarm_tolerates_failures() {
        let (_, cache) = cache();
        let targets = (1..=4).map(|i| (format!("k{i}"), Duration::from_secs(60), i));
        let report = cache
            .prewarm(targets, |i: i32| async move {
                match i {
                    2 => Err(Error::Upstream("boom".into())),
                    3 => Ok(None),
                    _ => Ok(Some(format!("v{i}"))),
                }
            })
            .await;
        assert_eq!(report.warmed, vec!["k1".to_string(), "k4".to_string()]);
        assert_eq!(report.failed, vec!["k2".to_string()]);
        assert_eq!(report.skipped, vec!["k3".to_string()]);
        assert_eq!(cache.get("k4").as_deref(), Some("v4"));
        assert!(cache.get("k2").is_none());
    }

    #[test]
    fn test_key_is_canonical() {
        let a = CacheKey::AllProjects {
            type_filter: ProjectTypeFilter::parse("On-going").unwrap(),
            status_filter: StatusFilter::All,
            period: TimePeriod::ThisMonth,
        };
        let b = CacheKey::AllProjects {
            period: TimePeriod::parse("this-month").unwrap(),
            status_filter: StatusFilter::parse("all").unwrap(),
            type_filter: ProjectTypeFilter::parse("on-going").unwrap(),
        };
        assert_eq!(a.to_key_string(), b.to_key_string());
        assert_eq!(
            a.to_key_string(),
            "all-projects?type=recurring&status=all&period=this-month"
        );
    }

    #[test]
    fn test_key_escapes_and_normalizes() {
        let k = CacheKey::ProjectAnalytics {
            project: "Acme & Co".into(),
            period: TimePeriod::AllTime,
        };
        assert_eq!(k.to_key_string(), "project-analytics?project=Acme+%26+Co&period=all-time");

        let upper = CacheKey::TeamAnalytics { team: "Design".into() };
        let lower = CacheKey::TeamAnalytics { team: " design".into() };
        assert_eq!(upper.to_key_string(), lower.to_key_string());

        let company = CacheKey::CompanyProjects {
            company: "Veza".into(),
            project_type: ProjectType::FixedScope,
            status_filter: StatusFilter::Only(ClientStatus::Active),
            period: TimePeriod::AllTime,
        };
        assert_eq!(
            company.to_key_string(),
            "company-projects?company=veza&type=fixed-scope&status=active&period=all-time"
        );
        assert_eq!(CacheKey::AllTeams.to_key_string(), "all-teams?");
    }

    #[test]
    fn test_ttl_tiers() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl_for(&CacheKey::AllTeams), TEAM_ANALYTICS_TTL);
        assert_eq!(
            policy.ttl_for(&CacheKey::ProjectAnalytics {
                project: "x".into(),
                period: TimePeriod::AllTime
            }),
            PROJECT_ANALYTICS_TTL
        );
    }
}
