//! Versioned SQL migrations.
//!
//! A migration source is a set of `<version>_<name>.sql` files, either
//! compiled into the binary with `include_str!` or read from a directory at
//! startup. Pending migrations run in ascending version order, tracked by the
//! `_easylite_migrations` table, so each version is applied exactly once per
//! database.
//!
//! Files written for goose are understood: when a file has a
//! `-- +goose Up` marker only the text up to `-- +goose Down` is applied, and
//! `-- +goose NO TRANSACTION` runs the migration outside a transaction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use thiserror::Error;

const UP_MARKER: &str = "-- +goose Up";
const DOWN_MARKER: &str = "-- +goose Down";
const NO_TRANSACTION_MARKER: &str = "-- +goose NO TRANSACTION";

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    version: i64,
    name: String,
    sql: String,
    transactional: bool,
}

impl Migration {
    /// The ordering key of this migration.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// The descriptive part of the file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the migration runs inside its own transaction.
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }
}

/// An ordered collection of migrations, keyed by version.
#[derive(Debug, Clone, Default)]
pub struct Migrations {
    by_version: BTreeMap<i64, Migration>,
}

impl Migrations {
    /// An empty source. Opening a database with it only creates the
    /// tracking table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a migration from its parts.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidVersion` for a version below 1 and
    /// `MigrationError::DuplicateVersion` if the version is already present.
    pub fn with(
        mut self,
        version: i64,
        name: impl Into<String>,
        sql: impl AsRef<str>,
    ) -> Result<Self, MigrationError> {
        self.insert(version, name.into(), sql.as_ref())?;
        Ok(self)
    }

    /// Builds a source from `(path, contents)` pairs, typically produced with
    /// `include_str!`. Only `.sql` files directly inside `dir` are used;
    /// everything else in the set is ignored. An empty `dir` (or `.`) selects
    /// files given without a directory.
    ///
    /// ```rust
    /// use easylite_db::Migrations;
    ///
    /// let migrations = Migrations::embedded(
    ///     "migrations",
    ///     &[
    ///         (
    ///             "migrations/00001_create_users.sql",
    ///             "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
    ///         ),
    ///         ("seeds/00001_users.sql", "INSERT INTO users (name) VALUES ('Sam');"),
    ///     ],
    /// )
    /// .expect("valid migration names");
    /// assert_eq!(migrations.len(), 1);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidFileName` or
    /// `MigrationError::DuplicateVersion`.
    pub fn embedded(dir: &str, files: &[(&str, &str)]) -> Result<Self, MigrationError> {
        let dir = match dir.trim_end_matches('/') {
            "." => "",
            dir => dir.strip_prefix("./").unwrap_or(dir),
        };

        let mut migrations = Self::new();
        for (path, contents) in files {
            let path = path.strip_prefix("./").unwrap_or(path);
            let (parent, base) = path.rsplit_once('/').unwrap_or(("", path));
            if parent != dir || !base.ends_with(".sql") {
                continue;
            }
            let (version, name) = parse_file_name(base)?;
            migrations.insert(version, name, contents)?;
        }
        Ok(migrations)
    }

    /// Reads every `.sql` file in `dir`. Subdirectories are not descended
    /// into.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Read` if the directory or a file cannot be
    /// read, plus the errors of [`Migrations::embedded`].
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, MigrationError> {
        let dir = dir.as_ref();
        let read_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| MigrationError::Read { path, source }
        };

        let mut migrations = Self::new();
        for entry in std::fs::read_dir(dir).map_err(read_err(dir))? {
            let path = entry.map_err(read_err(dir))?.path();
            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !file_name.ends_with(".sql") || !path.is_file() {
                continue;
            }
            let (version, name) = parse_file_name(file_name)?;
            let contents = std::fs::read_to_string(&path).map_err(read_err(&path))?;
            migrations.insert(version, name, &contents)?;
        }

        tracing::debug!(
            dir = %dir.display(),
            count = migrations.len(),
            "loaded migrations from directory"
        );
        Ok(migrations)
    }

    /// Number of migrations in the source.
    pub fn len(&self) -> usize {
        self.by_version.len()
    }

    /// Whether the source holds no migrations.
    pub fn is_empty(&self) -> bool {
        self.by_version.is_empty()
    }

    /// Migrations in ascending version order.
    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.by_version.values()
    }

    fn insert(&mut self, version: i64, name: String, contents: &str) -> Result<(), MigrationError> {
        if version < 1 {
            return Err(MigrationError::InvalidVersion { version, name });
        }
        if let Some(existing) = self.by_version.get(&version) {
            return Err(MigrationError::DuplicateVersion {
                version,
                first: existing.name.clone(),
                second: name,
            });
        }
        let (sql, transactional) = parse_contents(contents);
        self.by_version.insert(
            version,
            Migration {
                version,
                name,
                sql,
                transactional,
            },
        );
        Ok(())
    }
}

/// Errors that can occur while building a migration source or applying it.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration {version} '{name}' failed: {source}")]
    ExecutionFailed {
        /// The version of the migration that failed.
        version: i64,
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to create the tracking table.
    #[error("failed to create migration tracking table: {0}")]
    Bootstrap(rusqlite::Error),

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),

    /// A file name does not follow `<version>_<name>.sql`.
    #[error("invalid migration file name '{0}': expected <version>_<name>.sql")]
    InvalidFileName(String),

    /// Versions start at 1.
    #[error("invalid migration version {version} for '{name}'")]
    InvalidVersion {
        /// The rejected version.
        version: i64,
        /// The migration carrying it.
        name: String,
    },

    /// Two migrations share a version.
    #[error("duplicate migration version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        /// The shared version.
        version: i64,
        /// The migration registered first.
        first: String,
        /// The migration that collided with it.
        second: String,
    },

    /// A migration directory or file could not be read.
    #[error("failed to read migrations at {}: {source}", path.display())]
    Read {
        /// The directory or file that failed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Runs all pending migrations against the given connection.
///
/// Versions already recorded in `_easylite_migrations` are skipped. The rest
/// are applied in ascending order; each transactional migration commits
/// together with its tracking row, so a failure leaves no trace of it.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or if the
/// tracking table cannot be created or queried. Migrations applied before the
/// failing one stay applied.
pub fn run_migrations(conn: &Connection, migrations: &Migrations) -> Result<usize, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _easylite_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(MigrationError::Bootstrap)?;

    let mut applied = 0;

    for migration in migrations.iter() {
        if apply(conn, migration)? {
            applied += 1;
        } else {
            tracing::debug!(
                version = migration.version,
                migration = %migration.name,
                "migration already applied, skipping"
            );
        }
    }

    Ok(applied)
}

/// Applies `migration` unless it is already recorded. Returns whether it ran.
///
/// Transactional migrations check and record under `BEGIN IMMEDIATE`, so a
/// second process migrating the same file waits for the first and then sees
/// its tracking row instead of applying the version again.
fn apply(conn: &Connection, migration: &Migration) -> Result<bool, MigrationError> {
    let failed = |source| MigrationError::ExecutionFailed {
        version: migration.version,
        name: migration.name.clone(),
        source,
    };

    if !migration.transactional {
        if is_applied(conn, migration.version)? {
            return Ok(false);
        }
        log_applying(migration);
        conn.execute_batch(&migration.sql).map_err(failed)?;
        record(conn, migration).map_err(failed)?;
        return Ok(true);
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate).map_err(failed)?;
    if is_applied(&tx, migration.version)? {
        return Ok(false);
    }
    log_applying(migration);
    tx.execute_batch(&migration.sql).map_err(failed)?;
    record(&tx, migration).map_err(failed)?;
    tx.commit().map_err(failed)?;
    Ok(true)
}

fn is_applied(conn: &Connection, version: i64) -> Result<bool, MigrationError> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM _easylite_migrations WHERE version = ?1",
        [version],
        |row| row.get(0),
    )
    .map_err(MigrationError::StateQuery)
}

fn record(conn: &Connection, migration: &Migration) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO _easylite_migrations (version, name) VALUES (?1, ?2)",
        params![migration.version, migration.name],
    )
}

fn log_applying(migration: &Migration) {
    tracing::info!(
        version = migration.version,
        migration = %migration.name,
        "applying migration"
    );
}

fn parse_file_name(file_name: &str) -> Result<(i64, String), MigrationError> {
    let invalid = || MigrationError::InvalidFileName(file_name.to_string());

    let stem = file_name.strip_suffix(".sql").ok_or_else(invalid)?;
    let (version, name) = stem.split_once('_').ok_or_else(invalid)?;
    if name.is_empty() || version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let version = version.parse().map_err(|_| invalid())?;
    Ok((version, name.to_string()))
}

fn parse_contents(contents: &str) -> (String, bool) {
    let mut transactional = true;
    let mut has_up = false;
    for line in contents.lines().map(str::trim) {
        if line == NO_TRANSACTION_MARKER {
            transactional = false;
        }
        if line == UP_MARKER {
            has_up = true;
        }
    }
    if !has_up {
        return (contents.to_string(), transactional);
    }

    let up: Vec<&str> = contents
        .lines()
        .skip_while(|line| line.trim() != UP_MARKER)
        .skip(1)
        .take_while(|line| line.trim() != DOWN_MARKER)
        .filter(|line| !line.trim_start().starts_with("-- +goose"))
        .collect();
    (up.join("\n"), transactional)
}
