//! Single writer for the local database.
//!
//! All mutations are queued to one dedicated thread that owns one pooled
//! connection, so SQLite never sees two concurrent writers. Each job runs in
//! its own transaction; an `Err` from the job rolls it back.

use diesel::prelude::*;
use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use solarsync_core::{Error, Result};

use super::DbPool;
use crate::errors::StorageError;

const QUEUE_DEPTH: usize = 256;

type Job = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

/// Handle used to submit write jobs. Cheap to clone.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::Sender<Job>,
}

/// Wraps job errors so diesel's transaction can carry them out unchanged.
enum TxError {
    Job(Error),
    Diesel(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Diesel(err)
    }
}

fn run_in_transaction<T, F>(conn: &mut SqliteConnection, job: F) -> Result<T>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T>,
{
    conn.transaction::<T, TxError, _>(|tx_conn| job(tx_conn).map_err(TxError::Job))
        .map_err(|err| match err {
            TxError::Job(e) => e,
            TxError::Diesel(e) => StorageError::from(e).into(),
        })
}

/// Starts the writer thread over a connection taken from `pool`.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, mut rx) = mpsc::channel::<Job>(QUEUE_DEPTH);

    let spawned = std::thread::Builder::new()
        .name("solarsync-db-writer".to_string())
        .spawn(move || {
            let mut conn = match pool.get() {
                Ok(conn) => conn,
                Err(e) => {
                    error!("[Storage] Writer could not acquire a connection: {}", e);
                    return;
                }
            };
            while let Some(job) = rx.blocking_recv() {
                job(&mut *conn);
            }
            debug!("[Storage] Writer queue closed, stopping");
        });
    if let Err(e) = spawned {
        error!("[Storage] Failed to start writer thread: {}", e);
    }

    WriteHandle { tx }
}

impl WriteHandle {
    /// Runs `job` on the writer connection inside a transaction.
    pub async fn exec<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let boxed: Job = Box::new(move |conn: &mut SqliteConnection| {
            let result = run_in_transaction(conn, job);
            // The caller may have gone away; nothing to do then.
            let _ = reply_tx.send(result);
        });

        self.tx
            .send(boxed)
            .await
            .map_err(|_| StorageError::WriterUnavailable("writer has stopped".to_string()))?;

        reply_rx.await.map_err(|_| {
            StorageError::WriterUnavailable("writer dropped the reply".to_string())
        })?
    }
}
