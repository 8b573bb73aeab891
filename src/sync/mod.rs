pub mod retry;
pub mod supabase;
pub mod syncer;

use serde::Serialize;

use crate::storage::MirrorCounts;

pub use supabase::SupabaseClient;
pub use syncer::sync_mirror;

/// Report returned after a mirror sync completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub run_id: i64,
    pub status: SyncStatus,
    pub counts: MirrorCounts,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Success,
    Failed,
}
