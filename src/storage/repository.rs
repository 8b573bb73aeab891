use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::model::{ClientConfig, ClientStatus, ProjectType, Task, TeamMember};
use crate::query::filter::TaskFilter;

// ── Tasks ──────────────────────────────────────────────────────────

pub fn upsert_task(conn: &Connection, task: &Task) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO tasks (
            task_id, task_name, status, time_spent_ms, time_estimate_ms,
            assignees, updated_at_ms, due_at_ms, folder_name, list_name,
            space_name, priority, cached_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, datetime('now'))
        ON CONFLICT(task_id) DO UPDATE SET
            task_name=excluded.task_name, status=excluded.status,
            time_spent_ms=excluded.time_spent_ms, time_estimate_ms=excluded.time_estimate_ms,
            assignees=excluded.assignees, updated_at_ms=excluded.updated_at_ms,
            due_at_ms=excluded.due_at_ms, folder_name=excluded.folder_name,
            list_name=excluded.list_name, space_name=excluded.space_name,
            priority=excluded.priority, cached_at=excluded.cached_at",
        params![
            task.task_id,
            task.task_name,
            task.status,
            task.time_spent_ms as i64,
            task.time_estimate_ms as i64,
            task.assignees.join(","),
            task.updated_at_ms,
            task.due_at_ms,
            task.folder_name,
            task.list_name,
            task.space_name,
            task.priority,
        ],
    )?;
    Ok(())
}

pub fn query_tasks(conn: &Connection, filter: &TaskFilter) -> Result<Vec<Task>, rusqlite::Error> {
    let (sql, params) = filter.build_sql();
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), task_from_row)?;
    rows.collect()
}

fn task_from_row(row: &Row<'_>) -> Result<Task, rusqlite::Error> {
    let assignees: String = row.get(5)?;
    Ok(Task {
        task_id: row.get(0)?,
        task_name: row.get(1)?,
        status: row.get(2)?,
        time_spent_ms: row.get::<_, i64>(3)?.max(0) as u64,
        time_estimate_ms: row.get::<_, i64>(4)?.max(0) as u64,
        assignees: Task::parse_assignees(&assignees),
        updated_at_ms: row.get(6)?,
        due_at_ms: row.get(7)?,
        folder_name: row.get(8)?,
        list_name: row.get(9)?,
        space_name: row.get(10)?,
        priority: row.get(11)?,
    })
}

// ── Client configs ─────────────────────────────────────────────────

pub fn upsert_client_config(conn: &Connection, client: &ClientConfig) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO client_configs (
            id, client_name, company, folder_name, list_name, project_type,
            status, available_hours, revenue, average_delivery_hourly, cached_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, datetime('now'))
        ON CONFLICT(id) DO UPDATE SET
            client_name=excluded.client_name, company=excluded.company,
            folder_name=excluded.folder_name, list_name=excluded.list_name,
            project_type=excluded.project_type, status=excluded.status,
            available_hours=excluded.available_hours, revenue=excluded.revenue,
            average_delivery_hourly=excluded.average_delivery_hourly,
            cached_at=excluded.cached_at",
        params![
            client.id,
            client.client_name,
            client.company,
            client.folder_name,
            client.list_name,
            client.project_type.map(|t| t.as_str()),
            client.status.map(|s| s.as_str()),
            client.available_hours,
            client.revenue,
            client.average_delivery_hourly,
        ],
    )?;
    Ok(())
}

pub fn list_client_configs(conn: &Connection) -> Result<Vec<ClientConfig>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, client_name, company, folder_name, list_name, project_type,
                status, available_hours, revenue, average_delivery_hourly
         FROM client_configs ORDER BY client_name",
    )?;
    let rows = stmt.query_map([], |row| {
        let project_type: Option<String> = row.get(5)?;
        let status: Option<String> = row.get(6)?;
        Ok(ClientConfig {
            id: row.get(0)?,
            client_name: row.get(1)?,
            company: row.get(2)?,
            folder_name: row.get(3)?,
            list_name: row.get(4)?,
            project_type: project_type.as_deref().and_then(ProjectType::normalize),
            status: status.as_deref().and_then(ClientStatus::normalize),
            available_hours: row.get(7)?,
            revenue: row.get(8)?,
            average_delivery_hourly: row.get(9)?,
        })
    })?;
    rows.collect()
}

// ── Team members ───────────────────────────────────────────────────

pub fn upsert_team_member(conn: &Connection, member: &TeamMember) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO team_members (
            clickup_name, display_name, team, role, weekly_hours, status, cached_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
        ON CONFLICT(clickup_name) DO UPDATE SET
            display_name=excluded.display_name, team=excluded.team, role=excluded.role,
            weekly_hours=excluded.weekly_hours, status=excluded.status,
            cached_at=excluded.cached_at",
        params![
            member.clickup_name,
            member.display_name,
            member.team,
            member.role,
            member.weekly_hours,
            member.status,
        ],
    )?;
    Ok(())
}

pub fn list_team_members(conn: &Connection) -> Result<Vec<TeamMember>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT clickup_name, display_name, team, role, weekly_hours, status
         FROM team_members ORDER BY team, display_name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(TeamMember {
            clickup_name: row.get(0)?,
            display_name: row.get(1)?,
            team: row.get(2)?,
            role: row.get(3)?,
            weekly_hours: row.get(4)?,
            status: row.get(5)?,
        })
    })?;
    rows.collect()
}

// ── Mirror replacement ─────────────────────────────────────────────

/// Row counts written by [`replace_mirror`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MirrorCounts {
    pub tasks: u64,
    pub clients: u64,
    pub members: u64,
}

/// Swap the mirrored tables for a fresh upstream snapshot in one transaction,
/// so rows deleted upstream disappear locally too.
pub fn replace_mirror(
    conn: &mut Connection,
    tasks: &[Task],
    clients: &[ClientConfig],
    members: &[TeamMember],
) -> Result<MirrorCounts, rusqlite::Error> {
    let tx = conn.transaction()?;
    tx.execute_batch("DELETE FROM tasks; DELETE FROM client_configs; DELETE FROM team_members;")?;
    for task in tasks {
        upsert_task(&tx, task)?;
    }
    for client in clients {
        upsert_client_config(&tx, client)?;
    }
    for member in members {
        upsert_team_member(&tx, member)?;
    }
    tx.commit()?;
    Ok(MirrorCounts {
        tasks: tasks.len() as u64,
        clients: clients.len() as u64,
        members: members.len() as u64,
    })
}

pub fn mirror_counts(conn: &Connection) -> Result<MirrorCounts, rusqlite::Error> {
    let count = |table: &str| -> Result<u64, rusqlite::Error> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(n as u64)
    };
    Ok(MirrorCounts {
        tasks: count("tasks")?,
        clients: count("client_configs")?,
        members: count("team_members")?,
    })
}

// ── Sync runs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRun {
    pub id: i64,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub tasks_synced: u64,
    pub clients_synced: u64,
    pub members_synced: u64,
    pub error_message: Option<String>,
}

pub fn insert_sync_run(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_runs (status, started_at) VALUES ('running', datetime('now'))",
        [],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_sync_run(
    conn: &Connection,
    run_id: i64,
    status: &str,
    counts: MirrorCounts,
    error_message: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE sync_runs SET
            status = ?2, completed_at = datetime('now'),
            tasks_synced = ?3, clients_synced = ?4, members_synced = ?5,
            error_message = ?6
         WHERE id = ?1",
        params![
            run_id,
            status,
            counts.tasks as i64,
            counts.clients as i64,
            counts.members as i64,
            error_message,
        ],
    )?;
    Ok(())
}

pub fn last_sync_run(conn: &Connection) -> Result<Option<SyncRun>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, status, started_at, completed_at, tasks_synced, clients_synced,
                members_synced, error_message
         FROM sync_runs ORDER BY id DESC LIMIT 1",
        [],
        |row| {
            Ok(SyncRun {
                id: row.get(0)?,
                status: row.get(1)?,
                started_at: row.get(2)?,
                completed_at: row.get(3)?,
                tasks_synced: row.get::<_, i64>(4)? as u64,
                clients_synced: row.get::<_, i64>(5)? as u64,
                members_synced: row.get::<_, i64>(6)? as u64,
                error_message: row.get(7)?,
            })
        },
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{client, member, task};
    use crate::storage::Database;

    #[tokio::test]
    async fn test_task_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let mut t = task("t1", "in progress", 2.5, "alice, bob", 1_000);
                t.due_at_ms = Some(5_000);
                upsert_task(conn, &t)?;

                let rows = query_tasks(conn, &TaskFilter::all())?;
                assert_eq!(rows, vec![t]);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_query_tasks_filters() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                upsert_task(conn, &task("t1", "complete", 1.0, "alice", 100))?;
                upsert_task(conn, &task("t2", "complete", 1.0, "alice", 200))?;
                let mut other = task("t3", "complete", 1.0, "alice", 150);
                other.folder_name = "Beta".into();
                upsert_task(conn, &other)?;

                let acme = query_tasks(conn, &TaskFilter::all().folder("Acme"))?;
                let ids: Vec<&str> = acme.iter().map(|t| t.task_id.as_str()).collect();
                assert_eq!(ids, vec!["t2", "t1"]);

                let window = query_tasks(conn, &TaskFilter::all().updated_after(100).updated_before(200))?;
                assert_eq!(window.len(), 2);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_client_config_normalized_on_read() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let mut c = client("Acme");
                c.project_type = Some(ProjectType::FixedScope);
                c.status = Some(ClientStatus::NotActive);
                c.revenue = None;
                upsert_client_config(conn, &c)?;

                let rows = list_client_configs(conn)?;
                assert_eq!(rows, vec![c]);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_replace_mirror_drops_stale_rows() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                upsert_task(conn, &task("gone", "complete", 1.0, "alice", 100))?;
                let counts = replace_mirror(
                    conn,
                    &[task("t1", "complete", 1.0, "alice", 100)],
                    &[client("Acme")],
                    &[member("alice", "Design", 40.0), member("bob", "QA", 20.0)],
                )?;
                assert_eq!(counts, MirrorCounts { tasks: 1, clients: 1, members: 2 });
                assert_eq!(mirror_counts(conn)?, counts);

                let members = list_team_members(conn)?;
                assert_eq!(members[0].clickup_name, "alice");
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sync_run_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                assert!(last_sync_run(conn)?.is_none());
                let run_id = insert_sync_run(conn)?;
                let counts = MirrorCounts { tasks: 3, clients: 1, members: 2 };
                update_sync_run(conn, run_id, "completed", counts, None)?;

                let run = last_sync_run(conn)?.unwrap();
                assert_eq!(run.id, run_id);
                assert_eq!(run.status, "completed");
                assert_eq!(run.tasks_synced, 3);
                assert!(run.completed_at.is_some());
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }
}
