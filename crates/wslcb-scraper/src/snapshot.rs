//! Archived HTML snapshot backfill (§4.10): ingest every recorded
//! snapshot, then repair records written by earlier, less careful
//! scrapes — empty-name ASSUMPTION rows and location-less CHANGE OF
//! LOCATION rows.

use rusqlite::Connection;
use wslcb_model::{EntityRole, ProvenanceRole, RawRecord, SourceType};
use wslcb_store::pipeline::{self, IngestOptions};
use wslcb_store::{entities, locations, provenance};

use crate::error::Result;

/// Total effect of one call to [`backfill_snapshots`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotBackfillResult {
    pub snapshots_processed: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub assumptions_repaired: usize,
    pub change_of_location_repaired: usize,
}

/// Ingest every archived snapshot under `data_dir`, then run the two
/// repair passes over the records each snapshot contributed.
pub fn backfill_snapshots(conn: &mut Connection, data_dir: &std::path::Path) -> Result<SnapshotBackfillResult> {
    let mut result = SnapshotBackfillResult::default();
    let paths = wslcb_parser::snapshot_paths(data_dir);

    for path in &paths {
        let records = wslcb_parser::parse_snapshot(path, &chrono::Utc::now().to_rfc3339())?;
        let rel_path = path
            .strip_prefix(data_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        let source_id = provenance::get_or_create_source(
            conn,
            SourceType::CoArchive,
            Some(&rel_path),
            None,
            None,
            None,
        )?;

        let options = IngestOptions {
            validate_addresses: false,
            link_outcomes: false,
            source_id: Some(source_id),
            source_role: ProvenanceRole::FirstSeen,
            ..IngestOptions::default()
        };
        let batch = pipeline::ingest_batch(conn, &records, &options)?;
        result.inserted += batch.inserted;
        result.skipped += batch.skipped;

        result.assumptions_repaired += repair_assumptions(conn, &records)?;
        result.change_of_location_repaired += repair_change_of_location(conn, &records)?;
        result.snapshots_processed += 1;
    }

    if let Err(e) = wslcb_store::endorsements::discover_code_mappings(conn) {
        tracing::error!(error = %e, "error discovering endorsement code mappings");
    }
    if let Err(e) = wslcb_store::endorsements::merge_mixed_case_endorsements(conn) {
        tracing::error!(error = %e, "error merging mixed-case endorsements");
    }
    if let Err(e) = wslcb_store::endorsements::repair_code_name_endorsements(conn) {
        tracing::error!(error = %e, "error repairing code-name endorsements");
    }

    Ok(result)
}

/// Fix ASSUMPTION records with an empty business name, re-linking
/// entities afterward so `record_entities` reflects the corrected data.
fn repair_assumptions(conn: &Connection, records: &[RawRecord]) -> Result<usize> {
    let mut updated = 0;

    for rec in records {
        if rec.application_type != "ASSUMPTION" {
            continue;
        }
        let business_name = rec.business_name.trim();
        let previous_business_name =
            rec.previous_business_name.as_deref().unwrap_or("").trim();
        if business_name.is_empty() && previous_business_name.is_empty() {
            continue;
        }

        let cleaned_biz = wslcb_store::clean_name(business_name);
        let cleaned_prev_biz = wslcb_store::clean_name(previous_business_name);
        let cleaned_applicants = wslcb_store::clean_applicants(&rec.applicants);
        let cleaned_prev_applicants =
            wslcb_store::clean_applicants(rec.previous_applicants.as_deref().unwrap_or(""));

        let changed = conn.execute(
            "UPDATE license_records
             SET business_name = ?1, applicants = ?2,
                 previous_business_name = ?3, previous_applicants = ?4
             WHERE section_type = ?5 AND record_date = ?6 AND license_number = ?7
               AND application_type = 'ASSUMPTION'
               AND (business_name = '' OR business_name IS NULL)",
            (
                &cleaned_biz,
                &cleaned_applicants,
                &cleaned_prev_biz,
                &cleaned_prev_applicants,
                rec.section.map(|s| s.to_string()),
                &rec.record_date,
                &rec.license_number,
            ),
        )?;

        if changed > 0 {
            let record_id: i64 = conn.query_row(
                "SELECT id FROM license_records
                 WHERE section_type = ?1 AND record_date = ?2 AND license_number = ?3
                   AND application_type = 'ASSUMPTION'",
                (rec.section.map(|s| s.to_string()), &rec.record_date, &rec.license_number),
                |row| row.get(0),
            )?;
            conn.execute("DELETE FROM record_entities WHERE record_id = ?1", [record_id])?;
            entities::parse_and_link_entities(conn, record_id, &cleaned_applicants, EntityRole::Applicant)?;
            if !cleaned_prev_applicants.is_empty() {
                entities::parse_and_link_entities(
                    conn,
                    record_id,
                    &cleaned_prev_applicants,
                    EntityRole::PreviousApplicant,
                )?;
            }
            updated += changed;
        }
    }

    Ok(updated)
}

/// Fix CHANGE OF LOCATION records whose snapshot-time parse left
/// `location_id`/`application_type` unset. When a correctly filled row
/// for the same natural key already exists, delete the broken one
/// instead of updating it, to avoid a UNIQUE constraint violation.
fn repair_change_of_location(conn: &Connection, records: &[RawRecord]) -> Result<usize> {
    let mut updated = 0;

    for rec in records {
        if rec.application_type != "CHANGE OF LOCATION" {
            continue;
        }
        if rec.business_location.is_empty() {
            continue;
        }

        let section_str = rec.section.map(|s| s.to_string());
        let loc_id = locations::get_or_create_location(
            conn,
            &rec.business_location,
            &rec.city,
            &rec.state,
            &rec.zip_code,
        )?;
        let prev_loc_id = locations::get_or_create_location(
            conn,
            rec.previous_business_location.as_deref().unwrap_or(""),
            rec.previous_city.as_deref().unwrap_or(""),
            rec.previous_state.as_deref().unwrap_or(""),
            rec.previous_zip_code.as_deref().unwrap_or(""),
        )?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM license_records
                 WHERE section_type = ?1 AND record_date = ?2 AND license_number = ?3
                   AND application_type = 'CHANGE OF LOCATION'",
                (&section_str, &rec.record_date, &rec.license_number),
                |row| row.get(0),
            )
            .ok();

        if existing.is_some() {
            conn.execute(
                "DELETE FROM license_records
                 WHERE section_type = ?1 AND record_date = ?2 AND license_number = ?3
                   AND (application_type = '' OR application_type IS NULL)",
                (&section_str, &rec.record_date, &rec.license_number),
            )?;
            continue;
        }

        let changed = conn.execute(
            "UPDATE license_records
             SET location_id = ?1, previous_location_id = ?2, application_type = 'CHANGE OF LOCATION'
             WHERE section_type = ?3 AND record_date = ?4 AND license_number = ?5
               AND location_id IS NULL
               AND (application_type = '' OR application_type IS NULL)",
            (loc_id, prev_loc_id, &section_str, &rec.record_date, &rec.license_number),
        )?;
        if changed > 0 {
            updated += changed;
            continue;
        }

        if let Some(prev_id) = prev_loc_id {
            updated += conn.execute(
                "UPDATE license_records
                 SET previous_location_id = ?1
                 WHERE section_type = ?2 AND record_date = ?3 AND license_number = ?4
                   AND application_type = 'CHANGE OF LOCATION' AND previous_location_id IS NULL",
                (prev_id, &section_str, &rec.record_date, &rec.license_number),
            )?;
        }
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wslcb_store::connection::open_in_memory;

    #[test]
    fn backfill_snapshots_handles_empty_data_dir() {
        let mut conn = open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = backfill_snapshots(&mut conn, dir.path()).unwrap();
        assert_eq!(result.snapshots_processed, 0);
    }
}
