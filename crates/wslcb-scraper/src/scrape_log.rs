//! `scrape_log` bookkeeping: one row per live-scrape attempt, carrying
//! status, per-section counts, and the content hash used for the
//! unchanged-page short-circuit (§4.9 steps 1, 3, 8, 10).

use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;

/// Per-section insert counts recorded on a finished scrape_log row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionCounts {
    pub new_application: i64,
    pub approved: i64,
    pub discontinued: i64,
    pub skipped: i64,
}

/// Open a new `running` scrape_log row, returning its id.
pub fn begin(conn: &Connection) -> Result<i64> {
    conn.execute(
        "INSERT INTO scrape_log (started_at, status) VALUES (datetime('now'), 'running')",
        [],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Content hash of the most recent `success` or `unchanged` scrape, if any.
pub fn most_recent_hash(conn: &Connection) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT content_hash FROM scrape_log
             WHERE status IN ('success', 'unchanged') AND content_hash IS NOT NULL
             ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .flatten())
}

pub fn mark_unchanged(conn: &Connection, id: i64, content_hash: &str) -> Result<()> {
    conn.execute(
        "UPDATE scrape_log SET finished_at = datetime('now'), status = 'unchanged', content_hash = ?1
         WHERE id = ?2",
        (content_hash, id),
    )?;
    Ok(())
}

pub fn mark_success(
    conn: &Connection,
    id: i64,
    counts: &SectionCounts,
    snapshot_path: Option<&str>,
    content_hash: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE scrape_log SET
            finished_at = datetime('now'), status = 'success',
            records_new = ?1, records_approved = ?2, records_discontinued = ?3,
            records_skipped = ?4, snapshot_path = ?5, content_hash = ?6
         WHERE id = ?7",
        (
            counts.new_application,
            counts.approved,
            counts.discontinued,
            counts.skipped,
            snapshot_path,
            content_hash,
            id,
        ),
    )?;
    Ok(())
}

pub fn mark_error(conn: &Connection, id: i64, message: &str) -> Result<()> {
    conn.execute(
        "UPDATE scrape_log SET finished_at = datetime('now'), status = 'error', error_message = ?1
         WHERE id = ?2",
        (message, id),
    )?;
    Ok(())
}

/// `scrape_log` rows that finished `success` with zero total inserted
/// records across all three sections (§4.9's cleanup utility target).
pub fn zero_record_successes(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM scrape_log
         WHERE status = 'success'
           AND records_new + records_approved + records_discontinued = 0",
    )?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wslcb_store::connection::open_in_memory;

    #[test]
    fn begin_then_mark_success_round_trips() {
        let conn = open_in_memory().unwrap();
        let id = begin(&conn).unwrap();
        mark_success(
            &conn,
            id,
            &SectionCounts { new_application: 3, approved: 1, discontinued: 0, skipped: 2 },
            Some("wslcb/licensinginfo/2025/2025_06_10/2025_06_10-12_00_00-v1.html"),
            "abc123",
        )
        .unwrap();
        assert_eq!(most_recent_hash(&conn).unwrap(), Some("abc123".to_string()));
    }

    #[test]
    fn zero_record_success_is_found_for_cleanup() {
        let conn = open_in_memory().unwrap();
        let id = begin(&conn).unwrap();
        mark_success(&conn, id, &SectionCounts::default(), None, "zzz").unwrap();
        assert_eq!(zero_record_successes(&conn).unwrap(), vec![id]);
    }
}
