use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

mod bookings;
mod helpers;
mod migrations;
pub mod store;

use migrations::run_migrations;

pub use store::{BookingStore, SqliteBookingStore};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Owns the worker; the thread exits once every sender is gone.
struct Worker {
    tasks: Option<mpsc::Sender<DbTask>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        drop(self.tasks.take());
        if let Some(thread) = self.thread.take() {
            if let Err(err) = thread.join() {
                error!("booking-db thread panicked: {err:?}");
            }
        }
    }
}

/// SQLite connection owned by a dedicated thread; async callers submit closures.
#[derive(Clone)]
pub struct Database {
    tasks: mpsc::Sender<DbTask>,
    _worker: Arc<Worker>,
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path).context("failed to open SQLite database")?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("Failed to enable WAL mode: {err}");
    }
    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (task_tx, task_rx) = mpsc::channel::<DbTask>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let path = db_path.clone();

        let thread = thread::Builder::new()
            .name("booking-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&path) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                for task in task_rx {
                    task(&mut conn);
                }
                info!("booking-db thread finished");
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;
        info!("Bookings database ready at {}", db_path.display());

        Ok(Self {
            tasks: task_tx.clone(),
            _worker: Arc::new(Worker {
                tasks: Some(task_tx),
                thread: Some(thread),
            }),
        })
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.tasks
            .send(Box::new(move |conn| {
                let _ = reply_tx.send(task(conn));
            }))
            .map_err(|_| anyhow!("booking-db thread is gone"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("booking-db thread dropped the request"))?
    }
}
