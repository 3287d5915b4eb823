use std::{
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "stride::db";

use crate::{log_error, log_info, log_warn};

/// Persistence writes from the aggregator and history reads from the UI can
/// overlap with an external reader of the WAL file; wait instead of failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum WorkerMessage {
    Run(Job),
    Stop,
}

struct Worker {
    jobs: mpsc::Sender<WorkerMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let Some(handle) = handle else {
            return;
        };
        if self.jobs.send(WorkerMessage::Stop).is_err() {
            log_warn!("step store worker already stopped");
        }
        if let Err(err) = handle.join() {
            log_error!("step store worker panicked: {err:?}");
        }
    }
}

fn configure(conn: &mut Connection) -> Result<()> {
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        log_warn!("WAL unavailable, keeping default journal: {err}");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous pragma")?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    run_migrations(conn).context("failed to run database migrations")
}

/// Handle to the step store. One thread owns the SQLite connection and runs
/// queued closures in order; every clone feeds the same queue.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (jobs, queue) = mpsc::channel::<WorkerMessage>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let path = db_path.clone();

        let thread = thread::Builder::new()
            .name("stride-db".into())
            .spawn(move || {
                let opened = Connection::open(&path)
                    .with_context(|| format!("failed to open {}", path.display()));
                let mut conn = match opened {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                let ready = configure(&mut conn);
                let failed = ready.is_err();
                if ready_tx.send(ready).is_err() || failed {
                    return;
                }

                while let Ok(WorkerMessage::Run(job)) = queue.recv() {
                    job(&mut conn);
                }
                log_info!("step store worker stopped");
            })
            .context("failed to spawn step store worker")?;

        ready_rx
            .recv()
            .context("step store worker exited before it was ready")??;

        log_info!("step store opened at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs,
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Runs `task` on the worker thread and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, response) = oneshot::channel();

        let job: Job = Box::new(move |conn| {
            // The caller may have been cancelled; the result is dropped then.
            let _ = reply.send(task(conn));
        });

        self.worker
            .jobs
            .send(WorkerMessage::Run(job))
            .map_err(|_| anyhow!("step store worker is not running"))?;

        response
            .await
            .map_err(|_| anyhow!("step store worker dropped the request"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("nested").join("stride.sqlite3")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn creates_parent_directory_and_schema() {
        let (dir, db) = open();
        assert!(dir.path().join("nested").join("stride.sqlite3").exists());

        let tables: i64 = db
            .execute(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                     AND name IN ('activity_data', 'user_settings')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[tokio::test]
    async fn task_errors_reach_the_caller() {
        let (_dir, db) = open();
        let err = db
            .execute(|conn| Ok(conn.execute("INSERT INTO missing_table VALUES (1)", [])?))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing_table"));

        let still_running: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(still_running, 1);
    }

    #[tokio::test]
    async fn clones_share_one_connection() {
        let (_dir, db) = open();
        let other = db.clone();

        db.execute(|conn| Ok(conn.execute_batch("CREATE TEMP TABLE scratch (n INTEGER)")?))
            .await
            .unwrap();
        // Temp tables are private to a connection.
        other
            .execute(|conn| Ok(conn.execute("INSERT INTO scratch VALUES (7)", [])?))
            .await
            .unwrap();
    }
}
