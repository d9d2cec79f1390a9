//! Best-effort asynchronous persistence.
//!
//! In-memory state is authoritative for live sessions; the backing store is
//! eventually consistent with it. Mutating components enqueue one-way ops
//! onto a bounded channel, and a dedicated writer task drains them against
//! SQLite. A write failure is logged with context and never retried, never
//! surfaced to clients, and never rolls back the in-memory mutation.

use crate::db::Database;
use crate::journal::{ProjectActivity, ProjectComment};
use crate::locks::SectionLock;
use crate::versions::ProjectVersion;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Queue depth for outstanding writes. A burst beyond this is dropped with a
/// warning rather than blocking the mutation path.
const PERSIST_QUEUE_SIZE: usize = 1024;

/// A single outbound durability write.
#[derive(Debug)]
pub enum PersistOp {
    UpsertLock(SectionLock),
    DeleteLock { project_id: String, lock_id: String },
    UpsertVersion(ProjectVersion),
    DeleteVersion { project_id: String, version_id: String },
    UpsertComment(ProjectComment),
    AppendActivity(ProjectActivity),
}

impl PersistOp {
    /// Short op name for logging.
    fn name(&self) -> &'static str {
        match self {
            Self::UpsertLock(_) => "upsert_lock",
            Self::DeleteLock { .. } => "delete_lock",
            Self::UpsertVersion(_) => "upsert_version",
            Self::DeleteVersion { .. } => "delete_version",
            Self::UpsertComment(_) => "upsert_comment",
            Self::AppendActivity(_) => "append_activity",
        }
    }
}

/// Cloneable producer half of the persistence queue.
///
/// A disabled handle (no backing store, unit tests) swallows ops.
#[derive(Clone)]
pub struct PersistHandle {
    tx: Option<mpsc::Sender<PersistOp>>,
}

impl PersistHandle {
    /// Create the queue, returning the producer handle and the receiver to
    /// hand to [`spawn_writer`].
    pub fn channel() -> (Self, mpsc::Receiver<PersistOp>) {
        let (tx, rx) = mpsc::channel(PERSIST_QUEUE_SIZE);
        (Self { tx: Some(tx) }, rx)
    }

    /// A handle that drops every op. Used when no database is configured and
    /// by unit tests.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Fire-and-forget enqueue. Never blocks the caller.
    pub fn enqueue(&self, op: PersistOp) {
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.try_send(op) {
            let op_name = match &e {
                mpsc::error::TrySendError::Full(op) => op.name(),
                mpsc::error::TrySendError::Closed(op) => op.name(),
            };
            warn!(op = op_name, error = %e, "Persistence queue rejected write; dropping");
        }
    }
}

/// Spawn the writer task that drains the persistence queue against the
/// database. Runs until every producer handle is dropped.
pub fn spawn_writer(db: Database, mut rx: mpsc::Receiver<PersistOp>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            let op_name = op.name();
            let result = match op {
                PersistOp::UpsertLock(lock) => db.locks().save(&lock).await,
                PersistOp::DeleteLock { lock_id, .. } => {
                    db.locks().delete(&lock_id).await.map(|_| ())
                }
                PersistOp::UpsertVersion(version) => db.versions().save(&version).await,
                PersistOp::DeleteVersion { version_id, .. } => {
                    db.versions().delete(&version_id).await.map(|_| ())
                }
                PersistOp::UpsertComment(comment) => db.comments().save(&comment).await,
                PersistOp::AppendActivity(entry) => db.activity().append(&entry).await,
            };
            match result {
                Ok(()) => debug!(op = op_name, "Persistence write applied"),
                Err(e) => warn!(op = op_name, error = %e, "Persistence write failed"),
            }
        }
        debug!("Persistence writer stopped");
    })
}
