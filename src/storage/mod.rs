pub mod repository;

use async_trait::async_trait;
use rusqlite_migration::{Migrations, M};

use crate::error::{Error, Result};
use crate::model::{ClientConfig, Task, TeamMember};
use crate::query::filter::TaskFilter;
use crate::store::TaskStore;

pub use repository::{MirrorCounts, SyncRun};

/// Database wraps two `tokio_rusqlite::Connection` instances (writer + reader)
/// using WAL mode for concurrent access. The writer serializes writes via
/// `tokio_rusqlite`'s internal channel; the reader can proceed without blocking.
#[derive(Clone)]
pub struct Database {
    writer: tokio_rusqlite::Connection,
    reader: tokio_rusqlite::Connection,
}

impl Database {
    /// Open the database at the default path (`~/.clickdash/clickdash.db`).
    pub async fn open() -> Result<Self> {
        Self::open_at(Self::default_path()?).await
    }

    pub fn default_path() -> Result<std::path::PathBuf> {
        let dir = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
            .join(".clickdash");
        std::fs::create_dir_all(&dir).map_err(|e| Error::Config(e.to_string()))?;
        Ok(dir.join("clickdash.db"))
    }

    /// Open the database at the given path.
    pub async fn open_at(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let writer = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_writer(&writer).await?;

        let reader = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_reader(&reader).await?;

        Ok(Self { writer, reader })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let writer = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init_writer(&writer).await?;

        // In-memory databases are per-connection, so reader and writer share one.
        Ok(Self {
            reader: writer.clone(),
            writer,
        })
    }

    async fn init_writer(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA foreign_keys=ON;\
                 PRAGMA busy_timeout=5000;",
            )
            .map_err(|e| e.to_string())?;
            let migrations = Migrations::new(vec![M::up(include_str!("migrations/001_initial.sql"))]);
            migrations.to_latest(conn).map_err(|e| e.to_string())?;
            Ok::<(), String>(())
        })
        .await
        .map_err(|e| Error::Migration(e.to_string()))
    }

    async fn init_reader(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA busy_timeout=5000;",
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
        Ok(())
    }

    pub fn writer(&self) -> &tokio_rusqlite::Connection {
        &self.writer
    }

    pub fn reader(&self) -> &tokio_rusqlite::Connection {
        &self.reader
    }

    /// Row counts of the mirrored tables.
    pub async fn counts(&self) -> Result<MirrorCounts> {
        Ok(self.reader.call(|conn| repository::mirror_counts(conn)).await?)
    }

    pub async fn last_sync_run(&self) -> Result<Option<SyncRun>> {
        Ok(self.reader.call(|conn| repository::last_sync_run(conn)).await?)
    }
}

#[async_trait]
impl TaskStore for Database {
    async fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let filter = filter.clone();
        Ok(self
            .reader
            .call(move |conn| repository::query_tasks(conn, &filter))
            .await?)
    }

    async fn query_client_configs(&self) -> Result<Vec<ClientConfig>> {
        Ok(self.reader.call(|conn| repository::list_client_configs(conn)).await?)
    }

    async fn query_team_members(&self) -> Result<Vec<TeamMember>> {
        Ok(self.reader.call(|conn| repository::list_team_members(conn)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{client, member, task};

    #[tokio::test]
    async fn test_open_memory() {
        let db = Database::open_memory().await.unwrap();

        let tables: Vec<String> = db
            .reader()
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                Ok::<Vec<String>, rusqlite::Error>(rows.filter_map(|r| r.ok()).collect())
            })
            .await
            .unwrap();

        for table in ["tasks", "client_configs", "team_members", "sync_runs"] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[tokio::test]
    async fn test_open_at_reopens_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.db");
        {
            let db = Database::open_at(&path).await.unwrap();
            db.writer()
                .call(|conn| repository::upsert_team_member(conn, &member("alice", "Design", 40.0)))
                .await
                .unwrap();
        }
        let db = Database::open_at(&path).await.unwrap();
        assert_eq!(db.counts().await.unwrap().members, 1);
    }

    #[tokio::test]
    async fn test_task_store_impl() {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                repository::replace_mirror(
                    conn,
                    &[task("t1", "complete", 3.0, "alice", 10), task("t2", "to do", 1.0, "bob", 20)],
                    &[client("Acme")],
                    &[member("alice", "Design", 40.0)],
                )
            })
            .await
            .unwrap();

        let store: &dyn TaskStore = &db;
        let tasks = store
            .query_tasks(&TaskFilter::all().folder("Acme").updated_after(15))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, "t2");
        assert_eq!(store.query_client_configs().await.unwrap().len(), 1);
        assert_eq!(store.query_team_members().await.unwrap().len(), 1);
    }
}
