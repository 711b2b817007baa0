//! Source provenance tracking (§4.9): which capture (live scrape, CO
//! archive, Internet Archive, manual entry) a record was first seen in,
//! confirmed by, or repaired from.

use rusqlite::{Connection, OptionalExtension};
use wslcb_model::{ProvenanceRole, SourceType};

use crate::error::Result;

/// Obtain a `sources` row id for a capture, creating it if this exact
/// `(source_type, snapshot_path)` pair hasn't been registered yet.
#[allow(clippy::too_many_arguments)]
pub fn get_or_create_source(
    conn: &Connection,
    source_type: SourceType,
    snapshot_path: Option<&str>,
    url: Option<&str>,
    captured_at: Option<&str>,
    scrape_log_id: Option<i64>,
) -> Result<i64> {
    let source_type_id = source_type_id(conn, source_type)?;

    if let Some(id) = conn
        .query_row(
            "SELECT id FROM sources WHERE source_type_id = ?1 AND snapshot_path IS ?2",
            (source_type_id, snapshot_path),
            |row| row.get(0),
        )
        .optional()?
    {
        return Ok(id);
    }

    conn.execute(
        "INSERT INTO sources (source_type_id, snapshot_path, url, captured_at, scrape_log_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        (source_type_id, snapshot_path, url, captured_at, scrape_log_id),
    )?;
    Ok(conn.last_insert_rowid())
}

fn source_type_id(conn: &Connection, source_type: SourceType) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT id FROM source_types WHERE slug = ?1",
        [source_type.to_string()],
        |row| row.get(0),
    )?)
}

/// Link a record to a source under the given role. Idempotent — the
/// same `(record_id, source_id, role)` tuple links only once.
pub fn link_record_source(
    conn: &Connection,
    record_id: i64,
    source_id: i64,
    role: ProvenanceRole,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO record_sources (record_id, source_id, role) VALUES (?1, ?2, ?3)",
        (record_id, source_id, role.to_string()),
    )?;
    Ok(())
}

/// A single source attribution for a record, as used by
/// [`crate::display::summarize_provenance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSource {
    pub source_type: SourceType,
    pub role: ProvenanceRole,
    pub captured_at: Option<String>,
}

/// All sources attributed to a record, most recently captured first.
pub fn get_record_sources(conn: &Connection, record_id: i64) -> Result<Vec<RecordSource>> {
    let mut stmt = conn.prepare(
        "SELECT st.slug, rs.role, s.captured_at
         FROM record_sources rs
         JOIN sources s ON s.id = rs.source_id
         JOIN source_types st ON st.id = s.source_type_id
         WHERE rs.record_id = ?1
         ORDER BY s.captured_at DESC",
    )?;
    let rows = stmt.query_map([record_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (source_type, role, captured_at) = row?;
        out.push(RecordSource {
            source_type: wslcb_model::parse_enum("source_type", &source_type)?,
            role: wslcb_model::parse_enum("provenance_role", &role)?,
            captured_at,
        });
    }
    Ok(out)
}

/// Record ids with no `record_sources` row at all (§4.12).
pub fn unattributed_record_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT lr.id FROM license_records lr
         WHERE NOT EXISTS (SELECT 1 FROM record_sources rs WHERE rs.record_id = lr.id)",
    )?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;

    #[test]
    fn get_or_create_source_is_idempotent() {
        let conn = open_in_memory().unwrap();
        let id1 = get_or_create_source(
            &conn,
            SourceType::LiveScrape,
            Some("snapshots/a.html"),
            None,
            None,
            None,
        )
        .unwrap();
        let id2 = get_or_create_source(
            &conn,
            SourceType::LiveScrape,
            Some("snapshots/a.html"),
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn link_record_source_round_trips() {
        let conn = open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO license_records (id, section_type, record_date, license_number, application_type, scraped_at)
             VALUES (1, 'new_application', '2025-06-10', '100', 'RENEWAL', '2025-06-10T00:00:00Z')",
            [],
        )
        .unwrap();
        let source_id =
            get_or_create_source(&conn, SourceType::CoArchive, Some("x.html"), None, Some("2025-06-10"), None)
                .unwrap();
        link_record_source(&conn, 1, source_id, ProvenanceRole::FirstSeen).unwrap();
        let sources = get_record_sources(&conn, 1).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_type, SourceType::CoArchive);
        assert_eq!(sources[0].role, ProvenanceRole::FirstSeen);
    }

    #[test]
    fn unattributed_records_are_found() {
        let conn = open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO license_records (id, section_type, record_date, license_number, application_type, scraped_at)
             VALUES (1, 'new_application', '2025-06-10', '100', 'RENEWAL', '2025-06-10T00:00:00Z')",
            [],
        )
        .unwrap();
        assert_eq!(unattributed_record_ids(&conn).unwrap(), vec![1]);
    }
}
