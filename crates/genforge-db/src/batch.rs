//! Per-actor write batching.
//!
//! Low-value writes (earnings increments, transaction log rows) are queued
//! per originating actor and flushed together. A group flushes when it
//! reaches [`BatchConfig::max_size`] operations, or when its oldest entry is
//! older than [`BatchConfig::max_age`] at the time of a sweep.
//!
//! On flush, operations are grouped by identical SQL text. A plain insert
//! becomes one multi-row `VALUES` statement per group; other statements are
//! prepared once and executed over every parameter set.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::value::SqlValue;

/// Default operations per actor before an immediate flush.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 20;

/// Default age of the oldest queued operation before a sweep flushes it.
pub const DEFAULT_MAX_BATCH_AGE: Duration = Duration::from_secs(2);

/// Default interval between age sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Batching thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Queue length that triggers an immediate flush.
    pub max_size: usize,
    /// Age of the oldest entry that makes a group eligible for the sweep.
    pub max_age: Duration,
    /// How often the sweep runs.
    pub sweep_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_BATCH_SIZE,
            max_age: DEFAULT_MAX_BATCH_AGE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// A deferred write.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOperation {
    /// Statement text.
    pub sql: String,
    /// Bound parameters.
    pub params: Vec<SqlValue>,
    /// When the operation was queued.
    pub enqueued_at: Instant,
}

impl BatchOperation {
    /// Create an operation stamped with the current instant.
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
            enqueued_at: Instant::now(),
        }
    }
}

/// One distinct statement of a flush with every parameter set queued for
/// it, in enqueue order.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementBatch {
    /// Statement text shared by every row.
    pub sql: String,
    /// Parameter sets in enqueue order.
    pub rows: Vec<Vec<SqlValue>>,
}

/// Bound parameters allowed in one multi-row statement.
pub const MAX_BOUND_PARAMETERS: usize = 999;

impl StatementBatch {
    /// The `INSERT INTO table (columns)` part of a statement whose only
    /// tail is one `VALUES` tuple of in-order placeholders, when every
    /// queued row binds exactly that many parameters.
    ///
    /// Statements with conflict clauses, sub-selects or reordered
    /// placeholders return `None` and are executed row by row.
    pub fn multi_row_prefix(&self) -> Option<&str> {
        let (prefix, tail) = self.sql.split_once(" VALUES ")?;
        if !prefix.trim_start().starts_with("INSERT INTO ") {
            return None;
        }
        let tuple = tail.trim().strip_prefix('(')?.strip_suffix(')')?;
        let placeholders: Vec<&str> = tuple.split(',').map(str::trim).collect();
        let in_order = placeholders.iter().enumerate().all(|(position, placeholder)| {
            *placeholder == "?"
                || placeholder.strip_prefix('?') == Some(position.saturating_add(1).to_string().as_str())
        });
        let width = placeholders.len();
        (in_order && self.rows.iter().all(|row| row.len() == width)).then_some(prefix.trim_end())
    }

    /// Rows that fit in one multi-row statement.
    pub fn rows_per_statement(&self) -> usize {
        let width = self.rows.first().map_or(1, Vec::len).max(1);
        MAX_BOUND_PARAMETERS.checked_div(width).unwrap_or(1).max(1)
    }
}

/// Group a flushed queue by SQL text.
///
/// Statements appear in order of first occurrence; parameter sets of a
/// statement keep their enqueue order.
pub fn group_by_statement(operations: Vec<BatchOperation>) -> Vec<StatementBatch> {
    let mut batches: Vec<StatementBatch> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for operation in operations {
        if let Some(batch) = index
            .get(&operation.sql)
            .and_then(|&position| batches.get_mut(position))
        {
            batch.rows.push(operation.params);
            continue;
        }
        index.insert(operation.sql.clone(), batches.len());
        batches.push(StatementBatch {
            sql: operation.sql,
            rows: vec![operation.params],
        });
    }
    batches
}

/// Queued operations keyed by actor.
#[derive(Debug, Default)]
pub struct BatchQueue {
    config: BatchConfig,
    groups: Mutex<HashMap<String, Vec<BatchOperation>>>,
}

impl BatchQueue {
    /// Create an empty queue with the given thresholds.
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// The queue's thresholds.
    pub const fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Queue an operation for `actor`.
    ///
    /// Returns the actor's whole group when this push reached the size
    /// threshold; the caller must flush it.
    pub fn push(&self, actor: &str, operation: BatchOperation) -> Option<Vec<BatchOperation>> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        let group = groups.entry(actor.to_owned()).or_default();
        group.push(operation);
        if group.len() >= self.config.max_size {
            return groups.remove(actor);
        }
        None
    }

    /// Remove and return every group whose oldest entry is at least
    /// `max_age` old at `now`.
    pub fn take_expired(&self, now: Instant) -> Vec<(String, Vec<BatchOperation>)> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = groups
            .iter()
            .filter(|(_, ops)| {
                ops.first().is_some_and(|oldest| {
                    now.saturating_duration_since(oldest.enqueued_at) >= self.config.max_age
                })
            })
            .map(|(actor, _)| actor.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|actor| groups.remove(&actor).map(|ops| (actor, ops)))
            .collect()
    }

    /// Remove and return every group regardless of age.
    pub fn take_all(&self) -> Vec<(String, Vec<BatchOperation>)> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        groups.drain().collect()
    }

    /// Operations queued for `actor`.
    pub fn pending_for(&self, actor: &str) -> usize {
        let groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        groups.get(actor).map_or(0, Vec::len)
    }

    /// Operations queued across all actors.
    pub fn total_pending(&self) -> usize {
        let groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        groups.values().map(Vec::len).sum()
    }
}
