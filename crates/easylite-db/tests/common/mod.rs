#![allow(dead_code)]

use easylite_db::{params, Context, Db, Error, FromRow, Migrations};
use tempfile::TempDir;

pub const SAM: i64 = 100;
pub const THOMAS: i64 = 101;

pub const USERS_SQL: &str = "CREATE TABLE users (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    balance INTEGER NOT NULL
);";

pub const PARENTS_AND_CHILDREN_SQL: &str = "
CREATE TABLE parents (id INTEGER PRIMARY KEY);
CREATE TABLE children (
    id INTEGER PRIMARY KEY,
    parent_id INTEGER NOT NULL REFERENCES parents(id) DEFERRABLE INITIALLY DEFERRED
);";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub balance: i64,
}

impl FromRow for User {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            balance: row.get("balance")?,
        })
    }
}

/// Business-logic failures of a transfer, plus database failures.
#[derive(Debug)]
pub enum TransferError {
    InsufficientFunds { balance: i64 },
    Injected,
    Db(Error),
}

impl From<Error> for TransferError {
    fn from(err: Error) -> Self {
        Self::Db(err)
    }
}

/// Embedded files as a build would bundle them: two migrations plus a seed
/// script that lives outside the migrations directory.
pub const EMBEDDED_FILES: &[(&str, &str)] = &[
    ("migrations/00001_create_users.sql", USERS_SQL),
    ("migrations/00002_parents_and_children.sql", PARENTS_AND_CHILDREN_SQL),
    (
        "seeds/00003_demo_users.sql",
        "INSERT INTO users (name, balance) VALUES ('Seed', 1);",
    ),
];

pub fn migrations() -> Migrations {
    Migrations::embedded("migrations", EMBEDDED_FILES).expect("test migrations should be valid")
}

/// Opens a fresh on-disk database. Keep the `TempDir` alive for the test.
pub fn open_db() -> (Db, TempDir) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let db = Db::open(dir.path().join("test.sqlite"), &migrations()).expect("failed to open db");
    (db, dir)
}

/// Opens a fresh database holding Sam (400) and Thomas (100).
pub fn open_seeded_db() -> (Db, TempDir) {
    let (db, dir) = open_db();
    let ctx = Context::background();
    db.must_exec(
        &ctx,
        "INSERT INTO users (id, name, balance) VALUES (?1, ?2, ?3)",
        params![SAM, "Sam", 400],
    );
    db.must_exec(
        &ctx,
        "INSERT INTO users (id, name, balance) VALUES (?1, ?2, ?3)",
        params![THOMAS, "Thomas", 100],
    );
    (db, dir)
}

pub fn balance(db: &Db, ctx: &Context, id: i64) -> i64 {
    db.get(ctx, "SELECT balance FROM users WHERE id = ?1", [id])
        .expect("failed to read balance")
}

/// Moves `amount` from one user to another inside a transaction. With
/// `fail_midway` the debit happens and then the unit of work fails before
/// the credit.
pub fn transfer(
    db: &Db,
    ctx: &Context,
    from: i64,
    to: i64,
    amount: i64,
    fail_midway: bool,
) -> Result<(), TransferError> {
    db.run_in_transaction(ctx, |ctx| {
        let current: i64 = db.get(ctx, "SELECT balance FROM users WHERE id = ?1", [from])?;
        if current < amount {
            return Err(TransferError::InsufficientFunds { balance: current });
        }

        db.exec(
            ctx,
            "UPDATE users SET balance = balance - ?1 WHERE id = ?2",
            [amount, from],
        )?;

        if fail_midway {
            return Err(TransferError::Injected);
        }

        db.exec(
            ctx,
            "UPDATE users SET balance = balance + ?1 WHERE id = ?2",
            [amount, to],
        )?;
        Ok(())
    })
}
