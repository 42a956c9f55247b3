//! Durable schema and additive migrations.
//!
//! Startup runs three phases, each idempotent:
//!
//! 1. `CREATE TABLE IF NOT EXISTS` for every table in its current shape.
//! 2. Column inspection (`pragma_table_info`) and the [`MIGRATIONS`] that
//!    bring tables created by older releases up to date. A migration whose
//!    target column already exists is skipped. Nothing is ever dropped.
//! 3. `CREATE INDEX IF NOT EXISTS` for every index.
//!
//! Timestamps are Unix milliseconds; money is integer cents.

use crate::error::DbError;
use crate::gateway::Gateway;
use crate::params;

/// Table definitions in creation order.
pub const TABLES: &[(&str, &str)] = &[
    (
        "generators",
        r"CREATE TABLE IF NOT EXISTS generators (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            world TEXT NOT NULL,
            x INTEGER NOT NULL,
            y INTEGER NOT NULL,
            z INTEGER NOT NULL,
            type TEXT NOT NULL,
            level INTEGER NOT NULL DEFAULT 1,
            last_generation INTEGER NOT NULL,
            UNIQUE (world, x, y, z)
        )",
    ),
    (
        "player_stats",
        r"CREATE TABLE IF NOT EXISTS player_stats (
            uuid TEXT PRIMARY KEY,
            player_name TEXT NOT NULL DEFAULT '',
            generators_owned INTEGER NOT NULL DEFAULT 0,
            total_earnings INTEGER NOT NULL DEFAULT 0,
            network_notifications INTEGER NOT NULL DEFAULT 1
        )",
    ),
    (
        "networks",
        r"CREATE TABLE IF NOT EXISTS networks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            tier TEXT NOT NULL DEFAULT 'BASIC',
            creation_time INTEGER NOT NULL
        )",
    ),
    (
        "network_generators",
        r"CREATE TABLE IF NOT EXISTS network_generators (
            network_id INTEGER NOT NULL,
            generator_id INTEGER NOT NULL,
            PRIMARY KEY (network_id, generator_id)
        )",
    ),
    (
        "network_permissions",
        r"CREATE TABLE IF NOT EXISTS network_permissions (
            network_id INTEGER NOT NULL,
            player_uuid TEXT NOT NULL,
            player_name TEXT NOT NULL DEFAULT '',
            permission_level TEXT NOT NULL,
            joined_time INTEGER NOT NULL,
            last_access INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (network_id, player_uuid)
        )",
    ),
    (
        "economic_transactions",
        r"CREATE TABLE IF NOT EXISTS economic_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            player_uuid TEXT NOT NULL,
            amount INTEGER NOT NULL,
            source TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        )",
    ),
];

/// Index definitions, created after migrations.
pub const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_generators_owner ON generators (owner)",
    "CREATE INDEX IF NOT EXISTS idx_network_generators_generator ON network_generators (generator_id)",
    "CREATE INDEX IF NOT EXISTS idx_network_permissions_player ON network_permissions (player_uuid)",
    "CREATE INDEX IF NOT EXISTS idx_economic_transactions_timestamp ON economic_transactions (timestamp)",
];

/// One additive schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// Add a column when it is missing.
    AddColumn {
        /// Table to alter.
        table: &'static str,
        /// Column to add.
        column: &'static str,
        /// Column type and constraints.
        definition: &'static str,
    },
    /// Rename a column when the old name exists and the new one does not.
    RenameColumn {
        /// Table to alter.
        table: &'static str,
        /// Old column name.
        from: &'static str,
        /// New column name.
        to: &'static str,
    },
}

impl Migration {
    /// Table the migration alters.
    pub const fn table(&self) -> &'static str {
        match self {
            Self::AddColumn { table, .. } | Self::RenameColumn { table, .. } => *table,
        }
    }

    /// Whether the migration still has work to do given the table's
    /// current columns.
    pub fn is_needed(&self, columns: &[String]) -> bool {
        let has = |name: &str| columns.iter().any(|c| c.eq_ignore_ascii_case(name));
        match self {
            Self::AddColumn { column, .. } => !has(*column),
            Self::RenameColumn { from, to, .. } => has(*from) && !has(*to),
        }
    }

    /// The `ALTER TABLE` statement applying the migration.
    pub fn statement(&self) -> String {
        match self {
            Self::AddColumn {
                table,
                column,
                definition,
            } => format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"),
            Self::RenameColumn { table, from, to } => {
                format!("ALTER TABLE {table} RENAME COLUMN {from} TO {to}")
            }
        }
    }
}

/// Migrations in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration::RenameColumn {
        table: "generators",
        from: "last_generated",
        to: "last_generation",
    },
    Migration::AddColumn {
        table: "player_stats",
        column: "network_notifications",
        definition: "INTEGER NOT NULL DEFAULT 1",
    },
    Migration::AddColumn {
        table: "network_permissions",
        column: "player_name",
        definition: "TEXT NOT NULL DEFAULT ''",
    },
    Migration::AddColumn {
        table: "network_permissions",
        column: "last_access",
        definition: "INTEGER NOT NULL DEFAULT 0",
    },
];

/// What [`migrate`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Statements of the migrations that ran.
    pub applied: Vec<String>,
    /// Migrations skipped because their target was already present.
    pub skipped: usize,
}

/// Column names of `table`, in declaration order.
///
/// # Errors
///
/// Returns [`DbError`] if the inspection query fails.
pub async fn table_columns(gateway: &Gateway, table: &str) -> Result<Vec<String>, DbError> {
    let rows: Vec<(String,)> = gateway
        .fetch_all("SELECT name FROM pragma_table_info(?1)", &params![table])
        .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Bring the schema up to date.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails. Phases that already ran
/// stay applied; rerunning is safe.
pub async fn migrate(gateway: &Gateway) -> Result<MigrationReport, DbError> {
    for (_, ddl) in TABLES {
        gateway.execute(ddl, &[]).await?;
    }

    let mut report = MigrationReport::default();
    for migration in MIGRATIONS {
        let columns = table_columns(gateway, migration.table()).await?;
        if !migration.is_needed(&columns) {
            report.skipped = report.skipped.saturating_add(1);
            continue;
        }
        let statement = migration.statement();
        gateway.execute(&statement, &[]).await?;
        tracing::info!(statement = %statement, "Applied schema migration");
        report.applied.push(statement);
    }

    for ddl in INDEXES {
        gateway.execute(ddl, &[]).await?;
    }

    tracing::info!(
        tables = TABLES.len(),
        applied = report.applied.len(),
        skipped = report.skipped,
        "Database schema ready"
    );
    Ok(report)
}
