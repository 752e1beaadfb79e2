// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! SQLite fixture databases.

use std::path::Path;

use rusqlite::{Connection, params};

/// Create a small database with an `items` table and a `ledger` row that
/// always equals the number of items.
///
/// With `wal` set the database is switched to WAL mode, like a typical
/// long-running writer would.
pub fn create_fixture_db(path: &Path, rows: i64, wal: bool) -> rusqlite::Result<()> {
    let mut conn = Connection::open(path)?;
    if wal {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }
    conn.execute_batch(
        r#"
        CREATE TABLE items (id INTEGER PRIMARY KEY, payload BLOB NOT NULL);
        CREATE TABLE ledger (id INTEGER PRIMARY KEY, total INTEGER NOT NULL);
        INSERT INTO ledger (id, total) VALUES (1, 0);
        "#,
    )?;
    let tx = conn.transaction()?;
    // Negative ids stay clear of the ones ConcurrentWriter inserts.
    for id in 1..=rows {
        tx.execute(
            "INSERT INTO items (id, payload) VALUES (?1, randomblob(256))",
            params![-id],
        )?;
    }
    tx.execute("UPDATE ledger SET total = ?1 WHERE id = 1", params![rows])?;
    tx.commit()
}

/// Create a database of roughly `mib` MiB of incompressible blobs.
pub fn create_blob_db(path: &Path, mib: i64) -> rusqlite::Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch("CREATE TABLE blobs (id INTEGER PRIMARY KEY, data BLOB NOT NULL);")?;
    conn.execute(
        r#"
        WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < ?1)
        INSERT INTO blobs (id, data) SELECT x, randomblob(1048576) FROM c
        "#,
        params![mib],
    )?;
    Ok(())
}

/// Run `PRAGMA integrity_check` and return whether SQLite reported `ok`.
pub fn integrity_check(path: &Path) -> rusqlite::Result<bool> {
    let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let verdict: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    Ok(verdict == "ok")
}

/// Number of rows in `items` together with the `ledger` total.
pub fn row_count(path: &Path) -> rusqlite::Result<(i64, i64)> {
    let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let items: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
    let total: i64 = conn.query_row("SELECT total FROM ledger WHERE id = 1", [], |row| {
        row.get(0)
    })?;
    Ok((items, total))
}
