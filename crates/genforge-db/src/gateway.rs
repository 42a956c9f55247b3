//! The persistence gateway: one `SQLite` connection shared by the whole
//! process.
//!
//! Every statement goes through the single connection held behind an async
//! mutex, so statements never overlap. The gateway offers four ways to run
//! a statement:
//!
//! | Mode | Method | Result |
//! |------|--------|--------|
//! | Sync | [`Gateway::execute`], [`Gateway::insert`], `fetch_*` | awaited by the caller |
//! | Detached | [`Gateway::execute_detached`] | logged on failure, otherwise dropped |
//! | Callback | [`Gateway::execute_with_callback`] | delivered on the [`Foreground`] queue |
//! | Deferred | [`Gateway::execute_deferred`] | a [`JoinHandle`] the caller may await |
//!
//! Production timestamps use the callback mode so their outcome is logged
//! on the foreground. Nothing inside this workspace awaits a deferred
//! write; the mode is there for collaborators that need the result later
//! without blocking on it now.
//!
//! Low-value writes go through [`Gateway::add_batch_operation`] and are
//! flushed by a single flusher task, so batches of one actor are written in
//! the order they were queued.
//!
//! A statement that fails because the connection is gone triggers exactly
//! one reconnect and one retry before the error reaches the caller.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{ConnectOptions, Connection, FromRow, QueryBuilder, Sqlite, SqliteConnection};
use tokio::sync::{Mutex, MutexGuard, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::batch::{BatchOperation, BatchQueue, group_by_statement};
use crate::config::DatabaseConfig;
use crate::error::{DbError, is_connection_error};
use crate::foreground::Foreground;
use crate::value::{SqlValue, bind_params};

/// Run `$body` against the live connection, reconnecting and retrying once
/// if the first attempt failed because the connection was lost.
macro_rules! with_retry {
    ($gateway:expr, $conn:ident => $body:expr) => {{
        let mut slot = $gateway.acquire().await?;
        let first = match slot.as_mut() {
            #[cfg(test)]
            Some(_) if $gateway.sever_next.swap(false, Ordering::AcqRel) => {
                Err(sqlx::Error::WorkerCrashed)
            }
            Some($conn) => $body.await,
            None => Err(sqlx::Error::PoolClosed),
        };
        match first {
            Err(error) if is_connection_error(&error) => {
                tracing::warn!(error = %error, "Connection lost, reconnecting once");
                $gateway.reconnect(&mut slot).await?;
                match slot.as_mut() {
                    Some($conn) => $body.await.map_err(DbError::from),
                    None => Err(DbError::Closed),
                }
            }
            other => other.map_err(DbError::from),
        }
    }};
}

/// Counts one in-flight operation for as long as it lives.
#[derive(Debug)]
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A batch group handed to the flusher task.
#[derive(Debug)]
struct FlushJob {
    actor: String,
    operations: Vec<BatchOperation>,
    done: Option<oneshot::Sender<usize>>,
    _pending: PendingGuard,
}

/// Handle to the process-wide database connection.
#[derive(Debug)]
pub struct Gateway {
    config: DatabaseConfig,
    options: SqliteConnectOptions,
    conn: Mutex<Option<SqliteConnection>>,
    closed: AtomicBool,
    pending: Arc<AtomicUsize>,
    reconnects: AtomicU64,
    foreground: Foreground,
    batches: BatchQueue,
    flush_tx: mpsc::UnboundedSender<FlushJob>,
    flusher: StdMutex<Option<JoinHandle<()>>>,
    /// Makes the next statement fail as if the connection had died.
    #[cfg(test)]
    sever_next: AtomicBool,
}

impl Gateway {
    /// Open the connection and start the batch flusher.
    ///
    /// Results of [`Gateway::execute_with_callback`] are delivered through
    /// `foreground`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Sqlite`] if the connection cannot be opened.
    pub async fn connect(config: DatabaseConfig, foreground: Foreground) -> Result<Arc<Self>, DbError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| DbError::Config(format!("Invalid database URL: {e}")))?
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout);
        let conn = options.connect().await?;

        tracing::info!(url = %config.url, "Connected to SQLite");

        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let batches = BatchQueue::new(config.batch);
        let gateway = Arc::new_cyclic(|weak: &Weak<Self>| {
            let flusher = tokio::spawn(run_flusher(weak.clone(), flush_rx));
            Self {
                config,
                options,
                conn: Mutex::new(Some(conn)),
                closed: AtomicBool::new(false),
                pending: Arc::new(AtomicUsize::new(0)),
                reconnects: AtomicU64::new(0),
                foreground,
                batches,
                flush_tx,
                flusher: StdMutex::new(Some(flusher)),
                #[cfg(test)]
                sever_next: AtomicBool::new(false),
            }
        });
        Ok(gateway)
    }

    /// The configuration the gateway was opened with.
    pub const fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The foreground handle callbacks are delivered through.
    pub const fn foreground(&self) -> &Foreground {
        &self.foreground
    }

    /// Operations started but not yet finished, including queued batch
    /// flushes.
    pub fn pending_operations(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Operations waiting in batch queues.
    pub fn queued_batch_operations(&self) -> usize {
        self.batches.total_pending()
    }

    /// How many times the connection has been reopened.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Acquire)
    }

    /// Whether [`Gateway::shutdown`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    fn track(&self) -> PendingGuard {
        PendingGuard::new(&self.pending)
    }

    /// Lock the connection slot, opening a connection if the slot is empty.
    async fn acquire(&self) -> Result<MutexGuard<'_, Option<SqliteConnection>>, DbError> {
        if self.is_closed() {
            return Err(DbError::Closed);
        }
        let mut slot = self.conn.lock().await;
        if slot.is_none() {
            *slot = Some(self.options.connect().await?);
            self.reconnects.fetch_add(1, Ordering::AcqRel);
            tracing::info!("Reopened SQLite connection");
        }
        Ok(slot)
    }

    /// Lock the connection slot and make sure the connection answers a ping.
    async fn acquire_live(&self) -> Result<MutexGuard<'_, Option<SqliteConnection>>, DbError> {
        let mut slot = self.acquire().await?;
        let alive = match slot.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        };
        if !alive {
            tracing::warn!("Connection failed validation, reconnecting once");
            self.reconnect(&mut slot).await?;
        }
        Ok(slot)
    }

    /// Replace the connection in `slot` with a fresh one.
    async fn reconnect(&self, slot: &mut Option<SqliteConnection>) -> Result<(), DbError> {
        if let Some(old) = slot.take() {
            if let Err(error) = old.close().await {
                tracing::debug!(error = %error, "Closing dead connection failed");
            }
        }
        let conn = self.options.connect().await?;
        *slot = Some(conn);
        self.reconnects.fetch_add(1, Ordering::AcqRel);
        tracing::info!(reconnects = self.reconnect_count(), "Reconnected to SQLite");
        Ok(())
    }

    /// Discard the current connection as if it had died.
    #[cfg(test)]
    async fn drop_connection(&self) {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.take() {
            let _ = conn.close().await;
        }
    }

    // -----------------------------------------------------------------------
    // Sync primitives
    // -----------------------------------------------------------------------

    /// Execute a statement and return the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the statement fails after at most one
    /// reconnect.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let _pending = self.track();
        let result = with_retry!(self, conn => bind_params!(sqlx::query(sql), params).execute(&mut *conn))?;
        Ok(result.rows_affected())
    }

    /// Execute an `INSERT` and return the generated row id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the statement fails after at most one
    /// reconnect.
    pub async fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<i64, DbError> {
        let _pending = self.track();
        let result = with_retry!(self, conn => bind_params!(sqlx::query(sql), params).execute(&mut *conn))?;
        Ok(result.last_insert_rowid())
    }

    /// Run a query and map every row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails after at most one reconnect.
    pub async fn fetch_all<T>(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<T>, DbError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let _pending = self.track();
        with_retry!(self, conn => bind_params!(sqlx::query_as::<_, T>(sql), params).fetch_all(&mut *conn))
    }

    /// Run a query and map the first row, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails after at most one reconnect.
    pub async fn fetch_optional<T>(&self, sql: &str, params: &[SqlValue]) -> Result<Option<T>, DbError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let _pending = self.track();
        with_retry!(self, conn => bind_params!(sqlx::query_as::<_, T>(sql), params).fetch_optional(&mut *conn))
    }

    /// Run a query returning exactly one single-column row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails after at most one reconnect
    /// or returns no row.
    pub async fn fetch_scalar<O>(&self, sql: &str, params: &[SqlValue]) -> Result<O, DbError>
    where
        O: Send + Unpin,
        (O,): for<'r> FromRow<'r, SqliteRow>,
    {
        let _pending = self.track();
        with_retry!(self, conn => bind_params!(sqlx::query_scalar::<_, O>(sql), params).fetch_one(&mut *conn))
    }

    /// Run `work` inside one transaction.
    ///
    /// Commits when `work` returns `Ok`. Rolls back when it returns `Err`,
    /// and also when the future is dropped before finishing. The connection
    /// is validated (and reopened once if dead) before the transaction
    /// begins.
    ///
    /// # Errors
    ///
    /// Returns the error from `work`, or [`DbError`] if beginning or
    /// committing fails.
    pub async fn transaction<T, F>(&self, work: F) -> Result<T, DbError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut SqliteConnection) -> BoxFuture<'t, Result<T, DbError>> + Send,
    {
        let _pending = self.track();
        let mut slot = self.acquire_live().await?;
        let conn = slot.as_mut().ok_or(DbError::Closed)?;
        let mut tx = conn.begin().await?;
        match work(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(error = %rollback, "Rollback failed");
                }
                Err(error)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Async primitives
    // -----------------------------------------------------------------------

    /// Execute a statement in the background; failures are logged.
    pub fn execute_detached(self: &Arc<Self>, sql: impl Into<String>, params: Vec<SqlValue>) {
        let gateway = Arc::clone(self);
        let sql = sql.into();
        let pending = self.track();
        tokio::spawn(async move {
            let _pending = pending;
            if let Err(error) = gateway.execute(&sql, &params).await {
                tracing::error!(error = %error, sql = %sql, "Detached write failed");
            }
        });
    }

    /// Execute a statement in the background and deliver the result to
    /// `callback` on the foreground queue.
    pub fn execute_with_callback<F>(self: &Arc<Self>, sql: impl Into<String>, params: Vec<SqlValue>, callback: F)
    where
        F: FnOnce(Result<u64, DbError>) + Send + 'static,
    {
        let gateway = Arc::clone(self);
        let sql = sql.into();
        let pending = self.track();
        tokio::spawn(async move {
            let _pending = pending;
            let result = gateway.execute(&sql, &params).await;
            if gateway.foreground.schedule_fn(move || callback(result)).is_err() {
                tracing::warn!(sql = %sql, "Foreground closed; dropping write callback");
            }
        });
    }

    /// Execute a statement in the background and hand back its join handle.
    pub fn execute_deferred(
        self: &Arc<Self>,
        sql: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> JoinHandle<Result<u64, DbError>> {
        let gateway = Arc::clone(self);
        let sql = sql.into();
        let pending = self.track();
        tokio::spawn(async move {
            let _pending = pending;
            gateway.execute(&sql, &params).await
        })
    }

    // -----------------------------------------------------------------------
    // Batching
    // -----------------------------------------------------------------------

    /// Queue a low-value write for `actor`.
    ///
    /// The actor's group is flushed immediately once it reaches the size
    /// threshold; otherwise the age sweep picks it up.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] after shutdown.
    pub fn add_batch_operation(
        &self,
        actor: &str,
        sql: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> Result<(), DbError> {
        if self.is_closed() {
            return Err(DbError::Closed);
        }
        if let Some(group) = self.batches.push(actor, BatchOperation::new(sql, params)) {
            tracing::debug!(actor, count = group.len(), "Batch size reached, flushing");
            self.enqueue_flush(actor.to_owned(), group, None);
        }
        Ok(())
    }

    /// Hand every group older than the age threshold at `now` to the
    /// flusher. Returns how many operations were handed over.
    pub fn flush_expired(&self, now: Instant) -> usize {
        let mut handed_over: usize = 0;
        for (actor, operations) in self.batches.take_expired(now) {
            handed_over = handed_over.saturating_add(operations.len());
            self.enqueue_flush(actor, operations, None);
        }
        handed_over
    }

    /// Flush every queued group and wait for the writes. Returns how many
    /// operations were written.
    pub async fn flush_all(&self) -> usize {
        let mut acks = Vec::new();
        for (actor, operations) in self.batches.take_all() {
            let (done_tx, done_rx) = oneshot::channel();
            self.enqueue_flush(actor, operations, Some(done_tx));
            acks.push(done_rx);
        }
        let mut written: usize = 0;
        for ack in acks {
            written = written.saturating_add(ack.await.unwrap_or(0));
        }
        written
    }

    fn enqueue_flush(&self, actor: String, operations: Vec<BatchOperation>, done: Option<oneshot::Sender<usize>>) {
        let count = operations.len();
        let job = FlushJob {
            actor,
            operations,
            done,
            _pending: self.track(),
        };
        if let Err(rejected) = self.flush_tx.send(job) {
            tracing::error!(actor = %rejected.0.actor, count, "Batch flusher stopped; operations dropped");
        }
    }

    /// Write one group in one transaction.
    ///
    /// A plain `INSERT ... VALUES (...)` queued more than once is written as
    /// multi-row `VALUES` statements; any other statement runs once per
    /// parameter set.
    async fn write_batch(&self, operations: Vec<BatchOperation>) -> Result<usize, DbError> {
        let statements = group_by_statement(operations);
        let mut slot = self.acquire_live().await?;
        let conn = slot.as_mut().ok_or(DbError::Closed)?;
        let mut tx = conn.begin().await?;
        let mut written: usize = 0;
        for statement in &statements {
            if let Some(prefix) = statement.multi_row_prefix().filter(|_| statement.rows.len() > 1) {
                for chunk in statement.rows.chunks(statement.rows_per_statement()) {
                    let mut builder = QueryBuilder::<Sqlite>::new(prefix);
                    builder.push(" ");
                    builder.push_values(chunk, |mut row_builder, row| {
                        for value in row {
                            match value {
                                SqlValue::Null => row_builder.push_bind(None::<i64>),
                                SqlValue::Integer(v) => row_builder.push_bind(*v),
                                SqlValue::Real(v) => row_builder.push_bind(*v),
                                SqlValue::Text(v) => row_builder.push_bind(v.clone()),
                            };
                        }
                    });
                    builder.build().execute(&mut *tx).await?;
                    written = written.saturating_add(chunk.len());
                }
                continue;
            }
            // Persistent queries hit the connection's statement cache, so
            // each distinct text is prepared once per flush.
            for row in &statement.rows {
                bind_params!(sqlx::query(&statement.sql), row)
                    .execute(&mut *tx)
                    .await?;
                written = written.saturating_add(1);
            }
        }
        tx.commit().await?;
        Ok(written)
    }

    /// Start the periodic age sweep. Stops when `shutdown` turns `true` or
    /// its sender is dropped.
    pub fn spawn_batch_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let period = self.config.batch.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let handed_over = gateway.flush_expired(Instant::now());
                        if handed_over > 0 {
                            tracing::debug!(handed_over, "Batch sweep");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Batch sweeper stopped");
        })
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Poll until no operation is pending, sleeping between checks.
    /// Returns `false` if operations were still pending after the last
    /// check.
    pub async fn wait_idle(&self) -> bool {
        for _ in 0..self.config.shutdown_max_polls {
            if self.pending_operations() == 0 {
                return true;
            }
            tokio::time::sleep(self.config.shutdown_poll_interval).await;
        }
        self.pending_operations() == 0
    }

    /// Flush batches, wait for pending operations, and close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if closing the connection fails.
    pub async fn shutdown(&self) -> Result<(), DbError> {
        let flushed = self.flush_all().await;
        if !self.wait_idle().await {
            tracing::warn!(
                pending = self.pending_operations(),
                "Closing with operations still pending"
            );
        }
        self.closed.store(true, Ordering::Release);

        let flusher = self
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(flusher) = flusher {
            flusher.abort();
        }

        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.close().await?;
        }
        tracing::info!(flushed, "Database gateway closed");
        Ok(())
    }
}

/// Drain flush jobs one at a time until the gateway is dropped.
async fn run_flusher(gateway: Weak<Gateway>, mut jobs: mpsc::UnboundedReceiver<FlushJob>) {
    while let Some(job) = jobs.recv().await {
        let Some(gateway) = gateway.upgrade() else {
            break;
        };
        let count = job.operations.len();
        let written = match gateway.write_batch(job.operations).await {
            Ok(written) => {
                tracing::debug!(actor = %job.actor, written, "Flushed batch");
                written
            }
            Err(error) => {
                tracing::error!(actor = %job.actor, count, error = %error, "Batch flush failed; operations dropped");
                0
            }
        };
        if let Some(done) = job.done {
            let _ = done.send(written);
        }
    }
}
