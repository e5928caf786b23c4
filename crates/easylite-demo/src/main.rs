//! easylite demo binary: moves money between two accounts atomically.
//!
//! Opens (and migrates) the configured database, seeds two users, runs the
//! transfer inside a transaction bounded by a deadline, and logs the
//! resulting balances.

mod config;

use std::time::Duration;

use easylite_context::Context;
use easylite_db::{params, Db, Error, FromRow, MigrationError, Migrations};
use tracing_subscriber::EnvFilter;

const SAM: i64 = 100;
const THOMAS: i64 = 101;
const TRANSFER_AMOUNT: i64 = 200;
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);

const EMBEDDED_MIGRATIONS: &[(&str, &str)] = &[(
    "migrations/00001_create_users.sql",
    include_str!("../migrations/00001_create_users.sql"),
)];

/// One row of the `users` table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct User {
    id: i64,
    name: String,
    balance: i64,
}

impl FromRow for User {
    fn from_row(row: &easylite_db::rusqlite::Row<'_>) -> easylite_db::rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            balance: row.get("balance")?,
        })
    }
}

/// Why a transfer did not happen.
#[derive(Debug, thiserror::Error)]
enum TransferError {
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: i64, requested: i64 },

    #[error(transparent)]
    Db(#[from] Error),
}

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("EASYLITE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn load_migrations(dir: Option<&str>) -> Result<Migrations, MigrationError> {
    match dir {
        Some(dir) => Migrations::from_dir(dir),
        None => Migrations::embedded("migrations", EMBEDDED_MIGRATIONS),
    }
}

/// Resets Sam and Thomas to their starting balances.
fn seed(db: &Db, ctx: &Context) {
    db.must_exec(ctx, "DELETE FROM users WHERE id IN (?1, ?2)", [SAM, THOMAS]);
    db.must_exec(
        ctx,
        "INSERT INTO users (id, name, balance) VALUES (?1, ?2, ?3)",
        params![SAM, "Sam", 400],
    );
    db.must_exec(
        ctx,
        "INSERT INTO users (id, name, balance) VALUES (?1, ?2, ?3)",
        params![THOMAS, "Thomas", 100],
    );
}

fn transfer(db: &Db, ctx: &Context, from: i64, to: i64, amount: i64) -> Result<(), TransferError> {
    db.run_in_transaction(ctx, |ctx| {
        let balance: i64 = db.get(ctx, "SELECT balance FROM users WHERE id = ?1", [from])?;
        if balance < amount {
            return Err(TransferError::InsufficientFunds {
                balance,
                requested: amount,
            });
        }

        db.exec(
            ctx,
            "UPDATE users SET balance = balance - ?1 WHERE id = ?2",
            [amount, from],
        )?;
        db.exec(
            ctx,
            "UPDATE users SET balance = balance + ?1 WHERE id = ?2",
            [amount, to],
        )?;
        Ok(())
    })
}

fn users(db: &Db, ctx: &Context) -> Result<Vec<User>, Error> {
    db.select(ctx, "SELECT id, name, balance FROM users ORDER BY id", [])
}

fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the demo cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let migrations = load_migrations(config.database.migrations_dir.as_deref())
        .expect("failed to load migrations; check database.migrations_dir in config");
    let db = Db::open_with(&config.database.path, &migrations, config.database.pool)
        .expect("failed to open database; check database.path in config");

    let ctx = Context::background();
    seed(&db, &ctx);

    let (tx_ctx, _cancel) = ctx.with_timeout(TRANSFER_TIMEOUT);
    match transfer(&db, &tx_ctx, SAM, THOMAS, TRANSFER_AMOUNT) {
        Ok(()) => tracing::info!(from = SAM, to = THOMAS, amount = TRANSFER_AMOUNT, "transfer committed"),
        Err(err) => {
            tracing::error!(error = %err, "transfer failed");
            std::process::exit(1);
        }
    }

    match users(&db, &ctx) {
        Ok(users) => {
            for user in users {
                tracing::info!(id = user.id, name = %user.name, balance = user.balance, "balance");
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to read balances");
            std::process::exit(1);
        }
    }
}
