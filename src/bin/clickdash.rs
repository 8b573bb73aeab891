use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use clickdash::{
    Dashboard, DashboardConfig, Database, ProjectAnalytics, ProjectType, ProjectTypeFilter, StatusFilter,
    SupabaseClient, TaskStore, TeamAnalytics, TimePeriod,
};

#[derive(Parser)]
#[command(name = "clickdash", about = "ClickUp delivery and capacity dashboard")]
struct Cli {
    /// Database path (default: ~/.clickdash/clickdash.db)
    #[arg(long, env = "CLICKDASH_DB")]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Where metrics read task data from
    #[arg(long, value_enum, env = "CLICKDASH_SOURCE", default_value = "sqlite")]
    source: Source,

    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: Option<String>,

    #[arg(long, env = "SUPABASE_KEY", hide_env_values = true)]
    supabase_key: Option<String>,

    /// First day of the week for "this week" windows
    #[arg(long, default_value = "monday", value_parser = parse_weekday)]
    week_start: chrono::Weekday,

    /// Company groupings warmed on cache refresh
    #[arg(long = "prewarm-company", default_values = ["veza", "shadow"])]
    prewarm_companies: Vec<String>,

    /// Teams warmed on cache refresh
    #[arg(long = "prewarm-team", default_values = ["Design", "Development", "SEO", "QA"])]
    prewarm_teams: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Source {
    /// Local mirror populated by `clickdash sync`
    Sqlite,
    /// Query Supabase directly
    Supabase,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        #[arg(long, env = "CLICKDASH_BIND", default_value = "127.0.0.1:3000")]
        bind: SocketAddr,
        /// Shared secret for /api/background-refresh
        #[arg(long, env = "BACKGROUND_REFRESH_SECRET", hide_env_values = true)]
        refresh_secret: Option<String>,
    },
    /// Compute metrics once and print them
    Metrics {
        #[command(subcommand)]
        target: MetricsTarget,
    },
    /// Run a cache refresh and print which views warmed
    Refresh {
        #[arg(long)]
        json: bool,
    },
    /// Mirror the Supabase tables into the local database
    Sync,
    /// Show local mirror row counts, the last sync and upstream reachability
    Status,
}

#[derive(Subcommand)]
enum MetricsTarget {
    /// Metrics for one client
    Project {
        client: String,
        /// Period (e.g. all-time, this-month, last-quarter, 2025-03)
        #[arg(long, default_value = "all-time")]
        period: String,
        #[arg(long)]
        json: bool,
    },
    /// Metrics for every client matching the filters
    All {
        /// recurring, fixed-scope or all
        #[arg(long = "type", default_value = "all")]
        project_type: String,
        #[arg(long, default_value = "all")]
        status: String,
        #[arg(long, default_value = "all-time")]
        period: String,
        #[arg(long)]
        json: bool,
    },
    /// Metrics for one company grouping
    Company {
        company: String,
        #[arg(long = "type")]
        project_type: String,
        #[arg(long, default_value = "all")]
        status: String,
        #[arg(long, default_value = "all-time")]
        period: String,
        #[arg(long)]
        json: bool,
    },
    /// Capacity for one team
    Team {
        team: String,
        #[arg(long)]
        json: bool,
    },
    /// Capacity for every team
    Teams {
        #[arg(long)]
        json: bool,
    },
}

fn parse_weekday(s: &str) -> Result<chrono::Weekday, String> {
    clickdash::config::parse_week_start(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match &cli.command {
        Commands::Serve { bind, refresh_secret } => {
            if refresh_secret.is_none() {
                log::warn!("BACKGROUND_REFRESH_SECRET is not set; /api/background-refresh will reject all calls");
            }
            let dashboard = build_dashboard(&cli, refresh_secret.clone()).await?;
            clickdash::server::serve(*bind, Arc::new(dashboard)).await?;
        }
        Commands::Metrics { target } => {
            let dashboard = build_dashboard(&cli, None).await?;
            handle_metrics(&dashboard, target).await?;
        }
        Commands::Refresh { json } => {
            let dashboard = build_dashboard(&cli, None).await?;
            let report = dashboard.refresh_cache().await;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.message);
                for key in &report.warmed {
                    println!("  warmed  {key}");
                }
                for key in &report.failed {
                    println!("  FAILED  {key}");
                }
            }
        }
        Commands::Sync => {
            let db = open_db(&cli).await?;
            let upstream = supabase_client(&cli)?;
            let report = clickdash::sync::sync_mirror(&db, &upstream).await?;
            print_sync_report(&report);
            if let Some(err) = report.error {
                anyhow::bail!("sync failed: {err}");
            }
        }
        Commands::Status => {
            let db = open_db(&cli).await?;
            print_status(&db).await?;
            if cli.supabase_url.is_some() && cli.supabase_key.is_some() {
                let upstream = supabase_client(&cli)?;
                match upstream.check_connection().await {
                    Ok(()) => println!("  Supabase:     reachable"),
                    Err(e) => println!("  Supabase:     unreachable ({e})"),
                }
            }
        }
    }
    Ok(())
}

async fn open_db(cli: &Cli) -> anyhow::Result<Database> {
    Ok(match &cli.db {
        Some(path) => Database::open_at(path).await?,
        None => Database::open().await?,
    })
}

fn supabase_client(cli: &Cli) -> anyhow::Result<SupabaseClient> {
    let url = cli
        .supabase_url
        .as_deref()
        .context("SUPABASE_URL is not set")?;
    let key = cli
        .supabase_key
        .as_deref()
        .context("SUPABASE_KEY is not set")?;
    Ok(SupabaseClient::new(url, key)?)
}

async fn build_dashboard(cli: &Cli, refresh_secret: Option<String>) -> anyhow::Result<Dashboard> {
    let store: Arc<dyn TaskStore> = match cli.source {
        Source::Sqlite => Arc::new(open_db(cli).await?),
        Source::Supabase => Arc::new(supabase_client(cli)?),
    };
    let config = DashboardConfig {
        week_start: cli.week_start,
        prewarm_companies: cli.prewarm_companies.clone(),
        prewarm_teams: cli.prewarm_teams.clone(),
        refresh_secret,
        ..Default::default()
    };
    Ok(Dashboard::new(store, config))
}

async fn print_status(db: &Database) -> anyhow::Result<()> {
    let counts = db.counts().await?;
    let last = db.last_sync_run().await?;

    println!("Mirror Status");
    println!("  Tasks:        {}", counts.tasks);
    println!("  Clients:      {}", counts.clients);
    println!("  Team members: {}", counts.members);
    match last {
        Some(run) => {
            println!(
                "  Last sync:    {} ({})",
                run.completed_at.as_deref().unwrap_or(&run.started_at),
                run.status
            );
            if let Some(err) = run.error_message {
                println!("  Last error:   {err}");
            }
        }
        None => println!("  Last sync:    never"),
    }
    Ok(())
}

async fn handle_metrics(dashboard: &Dashboard, target: &MetricsTarget) -> anyhow::Result<()> {
    match target {
        MetricsTarget::Project { client, period, json } => {
            let p = TimePeriod::parse(period)?;
            let analytics = dashboard
                .get_project_analytics(client, p)
                .await?
                .ok_or_else(|| clickdash::Error::NotFound(format!("client {client:?}")))?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&*analytics)?);
            } else {
                print_project(&analytics, p);
            }
        }
        MetricsTarget::All {
            project_type,
            status,
            period,
            json,
        } => {
            let p = TimePeriod::parse(period)?;
            let list = dashboard
                .get_aggregated_analytics(ProjectTypeFilter::parse(project_type)?, StatusFilter::parse(status)?, p)
                .await?;
            print_project_list(&list, p, *json)?;
        }
        MetricsTarget::Company {
            company,
            project_type,
            status,
            period,
            json,
        } => {
            let p = TimePeriod::parse(period)?;
            let t = ProjectType::normalize(project_type)
                .with_context(|| format!("unknown project type {project_type:?}"))?;
            let list = dashboard
                .get_company_analytics(company, t, StatusFilter::parse(status)?, p)
                .await?;
            print_project_list(&list, p, *json)?;
        }
        MetricsTarget::Team { team, json } => {
            let analytics = dashboard
                .get_team_analytics(team)
                .await?
                .ok_or_else(|| clickdash::Error::NotFound(format!("team {team:?}")))?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&*analytics)?);
            } else {
                print_team(&analytics);
            }
        }
        MetricsTarget::Teams { json } => {
            let teams = dashboard.get_all_teams_analytics().await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&*teams)?);
            } else {
                for t in teams.iter() {
                    print_team(t);
                }
            }
        }
    }
    Ok(())
}

fn print_project_list(list: &[ProjectAnalytics], period: TimePeriod, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(list)?);
    } else if list.is_empty() {
        println!("No matching clients");
    } else {
        for p in list {
            print_project(p, period);
        }
    }
    Ok(())
}

fn print_project(p: &ProjectAnalytics, period: TimePeriod) {
    let m = &p.metrics;
    println!("Project: {} ({period})", m.client_name);
    println!("  Health:      {}", m.health.label());
    println!(
        "  Hours:       {:.2} / {:.2} ({:.1}%), {:.2} this month",
        m.hours_spent, m.total_hours, m.utilization_percentage, m.hours_spent_this_month
    );
    if m.has_revenue {
        println!(
            "  Financials:  revenue {:.2}, cost {:.2}, profit {:.2} ({:.1}%)",
            m.total_revenue, m.delivery_cost, m.profit, m.profit_margin
        );
    } else {
        println!("  Financials:  no revenue configured");
    }
    println!(
        "  Tasks:       {} total, {} todo, {} in progress, {} completed",
        m.tasks.total, m.tasks.todo, m.tasks.in_progress, m.tasks.completed
    );
    println!(
        "  Deadlines:   {} overdue, {} due soon",
        p.task_health.overdue, p.task_health.due_soon
    );
}

fn print_team(t: &TeamAnalytics) {
    println!("Team: {} ({} members, {:.0}h/week)", t.team_name, t.member_count, t.total_weekly_capacity);
    println!(
        "  Utilization: {:.1}% this week, {:.1}% last week, {:.1}% this month",
        t.average_utilization_this_week, t.average_utilization_last_week, t.average_utilization_this_month
    );
    println!(
        "  Planned:     {:.1}% next week, {:.1}% next month",
        t.average_planned_utilization_next_week, t.average_planned_utilization_next_month
    );
    for m in &t.members {
        println!(
            "    {:<24} {:>6.1}h this week ({:.1}%)",
            m.display_name, m.hours_this_week, m.utilization_this_week
        );
    }
}

fn print_sync_report(report: &clickdash::SyncReport) {
    println!("Sync run #{}", report.run_id);
    println!("  Status:       {:?}", report.status);
    println!("  Tasks:        {}", report.counts.tasks);
    println!("  Clients:      {}", report.counts.clients);
    println!("  Team members: {}", report.counts.members);
    if let Some(ref err) = report.error {
        println!("  Error:        {err}");
    }
}
