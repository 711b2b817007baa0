use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::Connection;

use crate::error::Result;
use crate::schema;

/// Default data directory, overridable via the `DATA_DIR` environment
/// variable (§6).
pub fn data_dir() -> PathBuf {
    std::env::var("DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

/// Default database path, overridable via `DB_PATH`; otherwise
/// `<data_dir>/wslcb.db`.
pub fn db_path() -> PathBuf {
    std::env::var("DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir().join("wslcb.db"))
}

/// Open a connection to the on-disk database at [`db_path`], applying the
/// pragmas every connection needs (WAL for concurrent readers during a
/// write-heavy ingest, foreign keys on since SQLite defaults them off).
pub fn open() -> Result<Connection> {
    let conn = Connection::open(db_path())?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

/// Open a connection at an explicit path — used by the rebuild and test
/// paths that don't want the `DB_PATH` default.
pub fn open_at(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

/// Open an in-memory connection, schema already migrated — the
/// recommended pattern for tests (mirrors passing an explicit connection
/// to the upstream `init_db`).
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    apply_pragmas(&conn)?;
    schema::init_db(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn nbsp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\xa0+").unwrap())
}

/// Collapse runs of non-breaking spaces in a raw address string into a
/// single ordinary space, matching the upstream normalization applied
/// before an address is looked up or inserted (§4.2).
pub fn normalize_raw_address(raw: &str) -> String {
    nbsp_re().replace_all(raw, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_nbsp_runs_to_single_space() {
        assert_eq!(
            normalize_raw_address("123 MAIN\u{a0}ST,\u{a0}\u{a0}SEATTLE"),
            "123 MAIN ST, SEATTLE"
        );
    }
}
