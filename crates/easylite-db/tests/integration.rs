mod common;

use easylite_db::{Context, Db, MigrationError, Migrations, OpenError, Settings};

#[test]
fn open_applies_migrations_before_returning() {
    let (db, _dir) = common::open_db();
    let ctx = Context::background();

    let mut tables: Vec<String> = db
        .select(
            &ctx,
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            [],
        )
        .expect("failed to list tables");
    tables.sort();

    assert_eq!(
        tables,
        vec!["_easylite_migrations", "children", "parents", "users"]
    );

    let versions: Vec<i64> = db
        .select(&ctx, "SELECT version FROM _easylite_migrations ORDER BY version", [])
        .expect("failed to read applied versions");
    assert_eq!(versions, vec![1, 2]);
}

#[test]
fn open_ignores_embedded_files_outside_the_migrations_dir() {
    let (db, _dir) = common::open_db();
    let ctx = Context::background();

    let users: i64 = db
        .get(&ctx, "SELECT COUNT(*) FROM users", [])
        .expect("failed to count users");
    assert_eq!(users, 0, "seed script must not run as a migration");

    let seeds = Migrations::embedded("seeds", common::EMBEDDED_FILES).expect("seeds should parse");
    assert_eq!(seeds.len(), 1);
}

#[test]
fn reopening_keeps_data_and_skips_applied_migrations() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("reopen.sqlite");
    let ctx = Context::background();

    {
        let db = Db::open(&path, &common::migrations()).expect("first open should succeed");
        db.must_exec(
            &ctx,
            "INSERT INTO users (name, balance) VALUES ('Ann', 5)",
            [],
        );
    }

    let extended = common::migrations()
        .with(3, "add_email", "ALTER TABLE users ADD COLUMN email TEXT;")
        .expect("version 3 is free");
    let db = Db::open(&path, &extended).expect("second open should succeed");

    let count: i64 = db
        .get(&ctx, "SELECT COUNT(*) FROM _easylite_migrations", [])
        .expect("failed to count migrations");
    assert_eq!(count, 3);

    let (name, email): (String, Option<String>) = db
        .get(&ctx, "SELECT name, email FROM users", [])
        .expect("existing row should survive");
    assert_eq!(name, "Ann");
    assert_eq!(email, None);
}

#[test]
fn failing_migration_aborts_open() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let migrations = Migrations::new()
        .with(1, "users", common::USERS_SQL)
        .and_then(|m| m.with(2, "broken", "CREATE TABLE oops (;"))
        .expect("source should build");

    let err = Db::open(dir.path().join("broken.sqlite"), &migrations)
        .expect_err("open must fail when a migration fails");

    assert!(
        err.to_string().starts_with("applying migrations: "),
        "stage label missing: {err}"
    );
    match err {
        OpenError::Migrate(MigrationError::ExecutionFailed { version, name, .. }) => {
            assert_eq!(version, 2);
            assert_eq!(name, "broken");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn unopenable_path_aborts_open() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let settings = Settings {
        connection_timeout_ms: 300,
        ..Settings::default()
    };

    let err = Db::open_with(
        dir.path().join("missing").join("nested").join("db.sqlite"),
        &common::migrations(),
        settings,
    )
    .expect_err("open must fail for a path in a missing directory");

    assert!(matches!(err, OpenError::Pool(_)), "unexpected error: {err:?}");
}

#[test]
fn open_reads_migrations_from_a_directory() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let migrations_dir = dir.path().join("migrations");
    std::fs::create_dir(&migrations_dir).expect("failed to create migrations dir");
    std::fs::write(
        migrations_dir.join("00001_create_users.sql"),
        format!("-- +goose Up\n{}\n-- +goose Down\nDROP TABLE users;\n", common::USERS_SQL),
    )
    .expect("failed to write migration");

    let migrations = Migrations::from_dir(&migrations_dir).expect("directory should load");
    let db = Db::open(dir.path().join("dir.sqlite"), &migrations).expect("open should succeed");

    let ctx = Context::background();
    let count: i64 = db
        .get(&ctx, "SELECT COUNT(*) FROM users", [])
        .expect("users table should exist");
    assert_eq!(count, 0);
}

#[test]
fn in_memory_database_is_usable() {
    let db = Db::open(":memory:", &common::migrations()).expect("open should succeed");
    let ctx = Context::background();

    db.must_exec(&ctx, "INSERT INTO users (name, balance) VALUES ('Mem', 1)", []);
    let name: String = db
        .get(&ctx, "SELECT name FROM users", [])
        .expect("row should be visible on the shared connection");
    assert_eq!(name, "Mem");
}
