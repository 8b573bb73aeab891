use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ClientConfig, Task, TeamMember};
use crate::query::filter::TaskFilter;

/// Read access to the task and configuration tables.
///
/// Implemented by the local SQLite mirror ([`crate::storage::Database`]) and
/// the remote Supabase client ([`crate::sync::supabase::SupabaseClient`]).
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    async fn query_client_configs(&self) -> Result<Vec<ClientConfig>>;

    async fn query_team_members(&self) -> Result<Vec<TeamMember>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;

    /// In-memory store with call counting and injectable failures.
    #[derive(Default)]
    pub struct MemoryStore {
        pub tasks: Vec<Task>,
        pub clients: Vec<ClientConfig>,
        pub members: Vec<TeamMember>,
        /// 1-based index of the `query_client_configs` call that should fail.
        pub fail_client_call: Option<usize>,
        pub fail_tasks: bool,
        pub client_calls: AtomicUsize,
        pub task_calls: AtomicUsize,
        pub last_filter: Mutex<Option<TaskFilter>>,
    }

    #[async_trait]
    impl TaskStore for MemoryStore {
        async fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
            self.task_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_filter.lock().unwrap() = Some(filter.clone());
            if self.fail_tasks {
                return Err(Error::Upstream("connection refused".into()));
            }
            Ok(self
                .tasks
                .iter()
                .filter(|t| filter.matches(&t.folder_name, &t.list_name, t.updated_at_ms))
                .cloned()
                .collect())
        }

        async fn query_client_configs(&self) -> Result<Vec<ClientConfig>> {
            let call = self.client_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_client_call == Some(call) {
                return Err(Error::Upstream(format!("timeout on call {call}")));
            }
            Ok(self.clients.clone())
        }

        async fn query_team_members(&self) -> Result<Vec<TeamMember>> {
            Ok(self.members.clone())
        }
    }
}
