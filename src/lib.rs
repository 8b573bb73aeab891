pub mod cache;
pub mod clock;
pub mod config;
pub mod date_util;
pub mod error;
pub mod metrics;
pub mod model;
pub mod query;
pub mod server;
pub mod storage;
pub mod store;
pub mod sync;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use futures::future::try_join_all;
use serde::Serialize;

pub use cache::{CacheKey, CacheStats, PrewarmReport, TtlCache, TtlPolicy};
pub use clock::{Clock, SystemClock};
pub use config::DashboardConfig;
pub use error::{Error, Result};
pub use metrics::{
    BurnRate, ProjectContributor, ProjectHealth, ProjectMetrics, TaskHealth, TeamAnalytics,
    TeamMemberAnalytics,
};
pub use model::{ClientConfig, ClientStatus, ProjectType, Task, TeamMember};
pub use query::filter::{ProjectTypeFilter, StatusFilter, TaskFilter};
pub use query::period::TimePeriod;
pub use storage::Database;
pub use store::TaskStore;
pub use sync::{SupabaseClient, SyncReport};

use date_util::start_of_month;
use model::Roster;

/// Everything the dashboard shows for one client engagement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectAnalytics {
    pub client: ClientConfig,
    pub tasks: Vec<Task>,
    pub metrics: ProjectMetrics,
    pub burn_rate: BurnRate,
    pub task_health: TaskHealth,
    pub team_members: Vec<ProjectContributor>,
}

/// Result of [`Dashboard::refresh_cache`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshReport {
    pub success: bool,
    pub message: String,
    pub invalidated: usize,
    pub warmed: Vec<String>,
    pub failed: Vec<String>,
}

/// A cached view. Values are shared so cache hits never deep-copy task lists.
#[derive(Debug, Clone)]
pub enum View {
    Project(Arc<ProjectAnalytics>),
    ProjectList(Arc<Vec<ProjectAnalytics>>),
    Team(Arc<TeamAnalytics>),
    TeamList(Arc<Vec<TeamAnalytics>>),
}

/// Main entry point: metrics views over a [`TaskStore`], fronted by a TTL cache.
pub struct Dashboard {
    store: Arc<dyn TaskStore>,
    cache: TtlCache<View>,
    clock: Arc<dyn Clock>,
    config: DashboardConfig,
}

impl Dashboard {
    pub fn new(store: Arc<dyn TaskStore>, config: DashboardConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn TaskStore>, config: DashboardConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache: TtlCache::new(clock.clone()),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ── Project views ──────────────────────────────────────────────

    /// Analytics for the client named exactly `client_name`, or `None` if no
    /// mapping exists.
    pub async fn get_project_analytics(
        &self,
        client_name: &str,
        period: TimePeriod,
    ) -> Result<Option<Arc<ProjectAnalytics>>> {
        let key = CacheKey::ProjectAnalytics {
            project: client_name.trim().to_string(),
            period,
        };
        match self.view(key).await? {
            Some(View::Project(p)) => Ok(Some(p)),
            _ => Ok(None),
        }
    }

    /// Analytics for every client passing both filters, ordered by client name.
    pub async fn get_aggregated_analytics(
        &self,
        type_filter: ProjectTypeFilter,
        status_filter: StatusFilter,
        period: TimePeriod,
    ) -> Result<Arc<Vec<ProjectAnalytics>>> {
        let key = CacheKey::AllProjects {
            type_filter,
            status_filter,
            period,
        };
        match self.view(key).await? {
            Some(View::ProjectList(list)) => Ok(list),
            _ => Ok(Arc::default()),
        }
    }

    /// Like [`get_aggregated_analytics`](Self::get_aggregated_analytics), restricted
    /// to clients under one company grouping (case-insensitive).
    pub async fn get_company_analytics(
        &self,
        company: &str,
        project_type: ProjectType,
        status_filter: StatusFilter,
        period: TimePeriod,
    ) -> Result<Arc<Vec<ProjectAnalytics>>> {
        let key = CacheKey::CompanyProjects {
            company: company.trim().to_lowercase(),
            project_type,
            status_filter,
            period,
        };
        match self.view(key).await? {
            Some(View::ProjectList(list)) => Ok(list),
            _ => Ok(Arc::default()),
        }
    }

    // ── Team views ─────────────────────────────────────────────────

    /// Capacity analytics for one team, or `None` if it has no active members.
    pub async fn get_team_analytics(&self, team_name: &str) -> Result<Option<Arc<TeamAnalytics>>> {
        let key = CacheKey::TeamAnalytics {
            team: team_name.trim().to_string(),
        };
        match self.view(key).await? {
            Some(View::Team(t)) => Ok(Some(t)),
            _ => Ok(None),
        }
    }

    /// One entry per team with active members, ordered by team name.
    pub async fn get_all_teams_analytics(&self) -> Result<Arc<Vec<TeamAnalytics>>> {
        match self.view(CacheKey::AllTeams).await? {
            Some(View::TeamList(list)) => Ok(list),
            _ => Ok(Arc::default()),
        }
    }

    // ── Cache management ───────────────────────────────────────────

    /// Drop every cached view, then recompute the commonly requested ones.
    ///
    /// Individual prewarm failures are logged and reported but never fail
    /// the refresh as a whole.
    pub async fn refresh_cache(&self) -> RefreshReport {
        let invalidated = self.cache.invalidate_all();
        log::info!("Cache invalidated ({invalidated} entries)");

        let targets: Vec<(String, std::time::Duration, CacheKey)> = self
            .prewarm_keys()
            .into_iter()
            .map(|key| (key.to_key_string(), self.config.ttl.ttl_for(&key), key))
            .collect();
        let report = self
            .cache
            .prewarm(targets, |key| self.compute_view(key))
            .await;

        let message = if report.failed.is_empty() {
            format!("Cache refreshed: {} views warmed", report.warmed.len())
        } else {
            format!(
                "Cache refreshed: {} views warmed, {} failed",
                report.warmed.len(),
                report.failed.len()
            )
        };
        log::info!("{message}");

        RefreshReport {
            success: true,
            message,
            invalidated,
            warmed: report.warmed,
            failed: report.failed,
        }
    }

    /// The views warmed by [`refresh_cache`](Self::refresh_cache), in order.
    pub fn prewarm_keys(&self) -> Vec<CacheKey> {
        let mut keys = vec![
            CacheKey::AllProjects {
                type_filter: ProjectTypeFilter::Only(ProjectType::Recurring),
                status_filter: StatusFilter::All,
                period: TimePeriod::ThisMonth,
            },
            CacheKey::AllProjects {
                type_filter: ProjectTypeFilter::Only(ProjectType::FixedScope),
                status_filter: StatusFilter::All,
                period: TimePeriod::AllTime,
            },
        ];
        for company in &self.config.prewarm_companies {
            for (project_type, period) in [
                (ProjectType::Recurring, TimePeriod::ThisMonth),
                (ProjectType::FixedScope, TimePeriod::AllTime),
            ] {
                keys.push(CacheKey::CompanyProjects {
                    company: company.trim().to_lowercase(),
                    project_type,
                    status_filter: StatusFilter::All,
                    period,
                });
            }
        }
        for team in &self.config.prewarm_teams {
            keys.push(CacheKey::TeamAnalytics {
                team: team.trim().to_string(),
            });
        }
        keys
    }

    /// Cached view for `key`, computing and caching it on a miss.
    /// `None` results are not cached.
    async fn view(&self, key: CacheKey) -> Result<Option<View>> {
        let key_str = key.to_key_string();
        if let Some(view) = self.cache.get(&key_str) {
            log::debug!("Cache hit: {key_str}");
            return Ok(Some(view));
        }
        log::debug!("Cache miss: {key_str}");

        let ttl = self.config.ttl.ttl_for(&key);
        let view = self.compute_view(key).await?;
        if let Some(ref v) = view {
            self.cache.put(key_str, v.clone(), ttl);
        }
        Ok(view)
    }

    async fn compute_view(&self, key: CacheKey) -> Result<Option<View>> {
        let view = match key {
            CacheKey::ProjectAnalytics { project, period } => self
                .compute_project(&project, period)
                .await?
                .map(|p| View::Project(Arc::new(p))),
            CacheKey::AllProjects {
                type_filter,
                status_filter,
                period,
            } => {
                let list = self
                    .compute_projects(period, |c| type_filter.matches(c) && status_filter.matches(c))
                    .await?;
                Some(View::ProjectList(Arc::new(list)))
            }
            CacheKey::CompanyProjects {
                company,
                project_type,
                status_filter,
                period,
            } => {
                let type_filter = ProjectTypeFilter::Only(project_type);
                let list = self
                    .compute_projects(period, |c| {
                        c.belongs_to_company(&company)
                            && type_filter.matches(c)
                            && status_filter.matches(c)
                    })
                    .await?;
                Some(View::ProjectList(Arc::new(list)))
            }
            CacheKey::TeamAnalytics { team } => self
                .compute_team(&team)
                .await?
                .map(|t| View::Team(Arc::new(t))),
            CacheKey::AllTeams => Some(View::TeamList(Arc::new(self.compute_all_teams().await?))),
        };
        Ok(view)
    }

    // ── Computation ────────────────────────────────────────────────

    async fn active_members(&self) -> Result<Vec<TeamMember>> {
        let mut members = self.store.query_team_members().await?;
        members.retain(|m| m.is_active());
        Ok(members)
    }

    /// Everyone on the team roster, former members included, so their past
    /// hours stay billable.
    async fn roster(&self) -> Result<Roster> {
        let members = self.store.query_team_members().await?;
        Ok(Roster::from_members(&members))
    }

    async fn compute_project(&self, client_name: &str, period: TimePeriod) -> Result<Option<ProjectAnalytics>> {
        let clients = self.store.query_client_configs().await?;
        let Some(client) = clients.into_iter().find(|c| c.client_name.trim() == client_name) else {
            log::debug!("No client mapping for {client_name}");
            return Ok(None);
        };
        let roster = self.roster().await?;
        let now = self.clock.now();
        self.analyze_client(client, period, &roster, now).await.map(Some)
    }

    async fn compute_projects(
        &self,
        period: TimePeriod,
        include: impl Fn(&ClientConfig) -> bool,
    ) -> Result<Vec<ProjectAnalytics>> {
        let mut clients = self.store.query_client_configs().await?;
        clients.retain(|c| include(c));
        clients.sort_by(|a, b| a.client_name.cmp(&b.client_name));

        let roster = self.roster().await?;
        let now = self.clock.now();
        try_join_all(
            clients
                .into_iter()
                .map(|client| self.analyze_client(client, period, &roster, now)),
        )
        .await
    }

    async fn analyze_client(
        &self,
        client: ClientConfig,
        period: TimePeriod,
        roster: &Roster,
        now: DateTime<FixedOffset>,
    ) -> Result<ProjectAnalytics> {
        let base = TaskFilter::for_client(&client);
        let range = period.range(now);
        let period_tasks = self.store.query_tasks(&base.clone().within(range)).await?;
        // Month-to-date figures need the unbounded set unless the period
        // already spans the whole month so far.
        let month_start = start_of_month(now).timestamp_millis();
        let needs_superset =
            range.is_some_and(|r| r.start_ms > month_start || r.end_ms <= now.timestamp_millis());
        let all_time = if needs_superset {
            Some(self.store.query_tasks(&base).await?)
        } else {
            None
        };

        let metrics =
            metrics::compute_project_metrics(&client, &period_tasks, all_time.as_deref(), roster, now);
        let burn_rate = BurnRate::from_metrics(&metrics);
        let task_health = TaskHealth::assess(&period_tasks, now);
        let team_members = metrics::extract_contributors(&period_tasks, now);

        Ok(ProjectAnalytics {
            client,
            tasks: period_tasks,
            metrics,
            burn_rate,
            task_health,
            team_members,
        })
    }

    async fn compute_team(&self, team_name: &str) -> Result<Option<TeamAnalytics>> {
        let members: Vec<TeamMember> = self
            .active_members()
            .await?
            .into_iter()
            .filter(|m| m.in_team(team_name))
            .collect();
        let Some(first) = members.first() else {
            log::debug!("No active members in team {team_name}");
            return Ok(None);
        };
        let display_name = first.team.trim().to_string();
        let tasks = self.store.query_tasks(&TaskFilter::all()).await?;
        Ok(Some(metrics::compute_team_analytics(
            &display_name,
            &members,
            &tasks,
            self.clock.now(),
            self.config.week_start,
        )))
    }

    async fn compute_all_teams(&self) -> Result<Vec<TeamAnalytics>> {
        let members = self.active_members().await?;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        // Keyed case-insensitively; the first spelling seen names the team.
        let mut teams: BTreeMap<String, (String, Vec<TeamMember>)> = BTreeMap::new();
        for m in members {
            let name = m.team.trim().to_string();
            if name.is_empty() {
                continue;
            }
            teams
                .entry(name.to_lowercase())
                .or_insert_with(|| (name, Vec::new()))
                .1
                .push(m);
        }

        let tasks = self.store.query_tasks(&TaskFilter::all()).await?;
        let now = self.clock.now();
        Ok(teams
            .into_values()
            .map(|(name, members)| {
                metrics::compute_team_analytics(&name, &members, &tasks, now, self.config.week_start)
            })
            .collect())
    }
}
