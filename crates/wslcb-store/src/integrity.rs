//! Database integrity checks (§4.12). Detect data-quality issues and,
//! for the safe cases, auto-remediate.

use rusqlite::Connection;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedLocation {
    pub id: i64,
    pub raw_address: String,
}

pub fn check_orphaned_locations(conn: &Connection) -> Result<Vec<OrphanedLocation>> {
    let ids = crate::locations::orphaned_location_ids(conn)?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(loc) = crate::locations::get_location(conn, id)? {
            out.push(OrphanedLocation {
                id: loc.id,
                raw_address: loc.raw_address,
            });
        }
    }
    Ok(out)
}

/// Delete orphaned locations. Returns the number removed.
pub fn fix_orphaned_locations(conn: &Connection) -> Result<usize> {
    let orphans = check_orphaned_locations(conn)?;
    if orphans.is_empty() {
        return Ok(0);
    }
    let ids: Vec<i64> = orphans.iter().map(|o| o.id).collect();
    let placeholders = vec!["?"; ids.len()].join(",");
    conn.execute(
        &format!("DELETE FROM locations WHERE id IN ({placeholders})"),
        rusqlite::params_from_iter(ids.iter()),
    )?;
    tracing::info!(count = ids.len(), "removed orphaned location(s)");
    Ok(ids.len())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenForeignKey {
    pub record_id: i64,
    pub column: &'static str,
    pub bad_id: i64,
}

pub fn check_broken_fks(conn: &Connection) -> Result<Vec<BrokenForeignKey>> {
    let mut results = Vec::new();
    for column in ["location_id", "previous_location_id"] {
        let sql = format!(
            "SELECT lr.id, lr.{column}
             FROM license_records lr
             WHERE lr.{column} IS NOT NULL
               AND lr.{column} NOT IN (SELECT id FROM locations)"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        for row in rows {
            let (record_id, bad_id): (i64, i64) = row?;
            results.push(BrokenForeignKey {
                record_id,
                column: if column == "location_id" {
                    "location_id"
                } else {
                    "previous_location_id"
                },
                bad_id,
            });
        }
    }
    Ok(results)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnenrichedCounts {
    pub no_endorsements: i64,
    pub no_entities: i64,
    pub no_provenance: i64,
    pub no_enrichment_tracking: i64,
}

pub fn check_unenriched_records(conn: &Connection) -> Result<UnenrichedCounts> {
    let no_endorsements: i64 = conn.query_row(
        "SELECT COUNT(*) FROM license_records lr
         WHERE lr.license_type IS NOT NULL AND lr.license_type != ''
           AND NOT EXISTS (SELECT 1 FROM record_endorsements re WHERE re.record_id = lr.id)",
        [],
        |row| row.get(0),
    )?;

    let no_entities: i64 = conn.query_row(
        "SELECT COUNT(*) FROM license_records lr
         WHERE lr.applicants LIKE '%;%'
           AND NOT EXISTS (SELECT 1 FROM record_entities re WHERE re.record_id = lr.id)",
        [],
        |row| row.get(0),
    )?;

    let no_provenance: i64 = conn.query_row(
        "SELECT COUNT(*) FROM license_records lr
         WHERE NOT EXISTS (SELECT 1 FROM record_sources rs WHERE rs.record_id = lr.id)",
        [],
        |row| row.get(0),
    )?;

    let no_enrichment_tracking: i64 = conn.query_row(
        "SELECT COUNT(*) FROM license_records lr
         WHERE NOT EXISTS (
             SELECT 1 FROM record_enrichments re
             WHERE re.record_id = lr.id AND re.step = 'endorsements'
         )",
        [],
        |row| row.get(0),
    )?;

    Ok(UnenrichedCounts {
        no_endorsements,
        no_entities,
        no_provenance,
        no_enrichment_tracking,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndorsementAnomalies {
    pub unresolved_codes: i64,
    pub placeholder_endorsements: i64,
}

pub fn check_endorsement_anomalies(conn: &Connection) -> Result<EndorsementAnomalies> {
    let unresolved_codes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM license_records lr
         WHERE lr.license_type GLOB '[0-9]*'
           AND lr.id NOT IN (SELECT record_id FROM record_endorsements)",
        [],
        |row| row.get(0),
    )?;

    let placeholder_endorsements: i64 = conn.query_row(
        "SELECT COUNT(*) FROM license_endorsements
         WHERE name GLOB '[0-9]*' AND name NOT GLOB '*[a-zA-Z]*'",
        [],
        |row| row.get(0),
    )?;

    Ok(EndorsementAnomalies {
        unresolved_codes,
        placeholder_endorsements,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDuplicateGroup {
    pub upper_name: String,
    pub count: i64,
    pub names: String,
}

/// Entities that would merge under the current name-cleaning rule —
/// names differing only by case (§4.4's canonical-form invariant).
pub fn check_entity_duplicates(conn: &Connection) -> Result<Vec<EntityDuplicateGroup>> {
    let mut stmt = conn.prepare(
        "SELECT UPPER(name) AS upper_name, COUNT(*) AS cnt, GROUP_CONCAT(name, ' | ') AS names
         FROM entities
         GROUP BY UPPER(name)
         HAVING cnt > 1",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(EntityDuplicateGroup {
                upper_name: row.get(0)?,
                count: row.get(1)?,
                names: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<_, _>>()?;
    Ok(rows)
}

/// Full integrity report, as produced by [`run_all_checks`].
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub orphaned_locations: Vec<OrphanedLocation>,
    pub orphaned_locations_fixed: usize,
    pub broken_fks: Vec<BrokenForeignKey>,
    pub unenriched: UnenrichedCounts,
    pub endorsement_anomalies: EndorsementAnomalies,
    pub entity_duplicates: Vec<EntityDuplicateGroup>,
}

impl IntegrityReport {
    /// Total count of distinct issues found, across every check.
    pub fn total_issues(&self) -> i64 {
        self.orphaned_locations.len() as i64
            + self.broken_fks.len() as i64
            + self.unenriched.no_endorsements
            + self.unenriched.no_entities
            + self.unenriched.no_provenance
            + self.unenriched.no_enrichment_tracking
            + self.endorsement_anomalies.unresolved_codes
            + self.endorsement_anomalies.placeholder_endorsements
            + self.entity_duplicates.len() as i64
    }
}

/// Run every integrity check. When `fix` is set, safe auto-remediation
/// (currently: deleting orphaned locations) is applied.
pub fn run_all_checks(conn: &Connection, fix: bool) -> Result<IntegrityReport> {
    let orphaned_locations = check_orphaned_locations(conn)?;
    let orphaned_locations_fixed = if fix && !orphaned_locations.is_empty() {
        fix_orphaned_locations(conn)?
    } else {
        0
    };

    Ok(IntegrityReport {
        broken_fks: check_broken_fks(conn)?,
        unenriched: check_unenriched_records(conn)?,
        endorsement_anomalies: check_endorsement_anomalies(conn)?,
        entity_duplicates: check_entity_duplicates(conn)?,
        orphaned_locations,
        orphaned_locations_fixed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;

    #[test]
    fn clean_database_reports_zero_issues() {
        let conn = open_in_memory().unwrap();
        let report = run_all_checks(&conn, false).unwrap();
        assert_eq!(report.total_issues(), 0);
    }

    #[test]
    fn orphaned_location_is_detected_and_fixable() {
        let conn = open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO locations (raw_address) VALUES ('123 MAIN ST')",
            [],
        )
        .unwrap();
        let report = run_all_checks(&conn, false).unwrap();
        assert_eq!(report.orphaned_locations.len(), 1);
        assert_eq!(report.orphaned_locations_fixed, 0);

        let report = run_all_checks(&conn, true).unwrap();
        assert_eq!(report.orphaned_locations_fixed, 1);
        let report = run_all_checks(&conn, false).unwrap();
        assert_eq!(report.orphaned_locations.len(), 0);
    }

    #[test]
    fn case_only_entity_duplicates_are_detected() {
        let conn = open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO entities (name, entity_type) VALUES ('JANE DOE', 'person')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO entities (name, entity_type) VALUES ('jane doe', 'person')",
            [],
        )
        .unwrap();
        let dupes = check_entity_duplicates(&conn).unwrap();
        assert_eq!(dupes.len(), 1);
        assert_eq!(dupes[0].count, 2);
    }
}
