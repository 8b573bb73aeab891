use crate::error::Result;
use crate::model::{ClientConfig, Task, TeamMember};
use crate::query::filter::TaskFilter;
use crate::storage::repository::{self, MirrorCounts};
use crate::storage::Database;
use crate::store::TaskStore;
use crate::sync::{SyncReport, SyncStatus};

/// Copy the three upstream tables into the local mirror.
///
/// The snapshot is fetched completely before anything is written, so a
/// failed fetch leaves the previous mirror intact. Every run is recorded in
/// `sync_runs`, failed ones included.
pub async fn sync_mirror(db: &Database, upstream: &dyn TaskStore) -> Result<SyncReport> {
    let run_id = db
        .writer()
        .call(|conn| repository::insert_sync_run(conn))
        .await?;

    match fetch_snapshot(upstream).await {
        Ok((tasks, clients, members)) => {
            log::info!(
                "Fetched {} tasks, {} clients, {} team members",
                tasks.len(),
                clients.len(),
                members.len()
            );
            let counts = db
                .writer()
                .call(move |conn| {
                    let counts = repository::replace_mirror(conn, &tasks, &clients, &members)?;
                    repository::update_sync_run(conn, run_id, "completed", counts, None)?;
                    Ok::<MirrorCounts, rusqlite::Error>(counts)
                })
                .await?;
            Ok(SyncReport {
                run_id,
                status: SyncStatus::Success,
                counts,
                error: None,
            })
        }
        Err(e) => {
            log::error!("Mirror sync failed: {e}");
            let message = e.to_string();
            db.writer()
                .call({
                    let message = message.clone();
                    move |conn| {
                        repository::update_sync_run(
                            conn,
                            run_id,
                            "failed",
                            MirrorCounts::default(),
                            Some(&message),
                        )
                    }
                })
                .await?;
            Ok(SyncReport {
                run_id,
                status: SyncStatus::Failed,
                counts: MirrorCounts::default(),
                error: Some(message),
            })
        }
    }
}

async fn fetch_snapshot(
    upstream: &dyn TaskStore,
) -> Result<(Vec<Task>, Vec<ClientConfig>, Vec<TeamMember>)> {
    let tasks = upstream.query_tasks(&TaskFilter::all()).await?;
    let clients = upstream.query_client_configs().await?;
    let members = upstream.query_team_members().await?;
    Ok((tasks, clients, members))
}
