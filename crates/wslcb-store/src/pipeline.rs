//! Unified ingestion pipeline (§4.7): the single entry point every
//! ingestion path (live scrape, snapshot backfill, diff backfill) calls.
//! Each enrichment step after the initial insert is individually
//! toggleable and independently fails-soft — a broken endorsement code or
//! an unreachable address validator doesn't abort the record.

use rusqlite::Connection;
use wslcb_model::{ProvenanceRole, RawRecord, StandardizedAddress};

use crate::error::Result;
use crate::{endorsements, links, provenance, records};

/// A pluggable collaborator for turning a raw address into a standardized
/// one (§9, "Address validator collaborator"). `None` means the call
/// failed — timeout, non-200, transport error — and the caller proceeds
/// without `std_*` fields, not an error.
pub trait AddressValidator {
    fn standardize(&self, address: &str) -> Option<StandardizedAddress>;
}

/// Configuration for [`ingest_record`]/[`ingest_batch`].
pub struct IngestOptions<'a> {
    pub validate_addresses: bool,
    pub link_outcomes: bool,
    pub source_id: Option<i64>,
    pub source_role: ProvenanceRole,
    pub batch_size: usize,
    pub address_validator: Option<&'a dyn AddressValidator>,
}

impl Default for IngestOptions<'_> {
    fn default() -> Self {
        Self {
            validate_addresses: true,
            link_outcomes: true,
            source_id: None,
            source_role: ProvenanceRole::FirstSeen,
            batch_size: 200,
            address_validator: None,
        }
    }
}

/// Outcome of ingesting one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestResult {
    pub record_id: i64,
    pub is_new: bool,
}

/// Aggregate result of [`ingest_batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub inserted: usize,
    pub skipped: usize,
    pub errors: usize,
    pub record_ids: Vec<i64>,
}

/// Insert a raw record and run every enrichment step (§4.7). Steps after
/// the initial insert only run for newly inserted records; a duplicate
/// still gets its provenance linked, under role `confirmed` rather than
/// the caller's configured role, and skips everything else.
pub fn ingest_record(
    conn: &Connection,
    record: &RawRecord,
    options: &IngestOptions,
) -> Result<IngestResult> {
    let (record_id, is_new) = records::insert_record(conn, record)?;

    if is_new {
        let section_label = record.section.map(|s| s.to_string()).unwrap_or_default();
        if let Err(e) =
            endorsements::process_record(conn, record_id, &record.license_type, &section_label)
        {
            tracing::error!(record_id, error = %e, "error processing endorsements");
        }
        mark_enrichment_complete(conn, record_id, "endorsements")?;

        if let Some(source_id) = options.source_id {
            if let Err(e) =
                provenance::link_record_source(conn, record_id, source_id, options.source_role)
            {
                tracing::error!(record_id, error = %e, "error linking provenance");
            }
            mark_enrichment_complete(conn, record_id, "provenance")?;
        }

        if options.validate_addresses {
            if let Some(validator) = options.address_validator {
                if let Err(e) = validate_record_addresses(conn, record_id, validator) {
                    tracing::error!(record_id, error = %e, "error validating address");
                }
                mark_enrichment_complete(conn, record_id, "address_validation")?;
            }
        }

        if options.link_outcomes {
            if let Err(e) = links::link_new_record(conn, record_id) {
                tracing::error!(record_id, error = %e, "error linking outcomes");
            }
            mark_enrichment_complete(conn, record_id, "outcome_linking")?;
        }
    } else if let Some(source_id) = options.source_id {
        if let Err(e) =
            provenance::link_record_source(conn, record_id, source_id, ProvenanceRole::Confirmed)
        {
            tracing::error!(record_id, error = %e, "error linking confirmed provenance");
        }
    }

    Ok(IngestResult { record_id, is_new })
}

/// Record that `step` ran for `record_id` (§4.7's enrichment-completion
/// bookkeeping). Recorded whether or not the step itself succeeded —
/// each step fails soft internally, and this tracks that the pipeline
/// reached it, not that every side effect landed.
fn mark_enrichment_complete(conn: &Connection, record_id: i64, step: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO record_enrichments (record_id, step, completed_at, version)
         VALUES (?1, ?2, datetime('now'), '1')",
        (record_id, step),
    )?;
    Ok(())
}

/// Standardize a record's primary location, and its previous location if
/// one is recorded, writing `std_*`/`address_validated_at` onto the
/// shared `locations` row. A `None` from the validator is a no-op, not
/// an error — the raw fields remain the display fallback.
fn validate_record_addresses(
    conn: &Connection,
    record_id: i64,
    validator: &dyn AddressValidator,
) -> Result<()> {
    let (location_id, previous_location_id): (Option<i64>, Option<i64>) = conn.query_row(
        "SELECT location_id, previous_location_id FROM license_records WHERE id = ?1",
        [record_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    if let Some(id) = location_id {
        standardize_location(conn, id, validator)?;
    }
    if let Some(id) = previous_location_id {
        standardize_location(conn, id, validator)?;
    }
    Ok(())
}

fn standardize_location(
    conn: &Connection,
    location_id: i64,
    validator: &dyn AddressValidator,
) -> Result<()> {
    let already_validated: Option<String> = conn.query_row(
        "SELECT address_validated_at FROM locations WHERE id = ?1",
        [location_id],
        |row| row.get(0),
    )?;
    if already_validated.is_some() {
        return Ok(());
    }

    let raw_address: String = conn.query_row(
        "SELECT raw_address FROM locations WHERE id = ?1",
        [location_id],
        |row| row.get(0),
    )?;
    let Some(std) = validator.standardize(&raw_address) else {
        return Ok(());
    };

    conn.execute(
        "UPDATE locations
         SET address_line_1 = ?1, address_line_2 = ?2,
             std_city = ?3, std_state = ?4, std_zip = ?5,
             address_validated_at = datetime('now')
         WHERE id = ?6",
        (
            &std.address_line_1,
            &std.address_line_2,
            &std.city,
            &std.state,
            &std.zip_code,
            location_id,
        ),
    )?;
    Ok(())
}

/// Ingest multiple records, committing every `batch_size` records so an
/// interrupted run can resume from the last commit.
pub fn ingest_batch(
    conn: &mut Connection,
    recs: &[RawRecord],
    options: &IngestOptions,
) -> Result<BatchResult> {
    let mut result = BatchResult::default();

    for (i, rec) in recs.iter().enumerate() {
        let tx = conn.transaction()?;
        match ingest_record(&tx, rec, options) {
            Ok(ir) if ir.is_new => {
                result.inserted += 1;
                result.record_ids.push(ir.record_id);
            }
            Ok(_) => result.skipped += 1,
            Err(e) => {
                tracing::error!(
                    section = ?rec.section,
                    record_date = %rec.record_date,
                    license_number = ?rec.license_number,
                    error = %e,
                    "error inserting record"
                );
                result.errors += 1;
            }
        }
        tx.commit()?;

        if (i + 1) % options.batch_size.max(1) == 0 {
            tracing::debug!(
                progress = i + 1,
                total = recs.len(),
                inserted = result.inserted,
                skipped = result.skipped,
                errors = result.errors,
                "ingest progress"
            );
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;
    use wslcb_model::Section;

    struct AlwaysStandardizes;
    impl AddressValidator for AlwaysStandardizes {
        fn standardize(&self, _address: &str) -> Option<StandardizedAddress> {
            Some(StandardizedAddress {
                address_line_1: "123 MAIN ST".to_string(),
                address_line_2: String::new(),
                city: "SEATTLE".to_string(),
                state: "WA".to_string(),
                zip_code: "98101".to_string(),
            })
        }
    }

    fn sample() -> RawRecord {
        RawRecord {
            section: Some(Section::NewApplication),
            record_date: "2025-06-10".to_string(),
            business_name: "NEW LEAF DISPENSARY".to_string(),
            applicants: "NEW LEAF DISPENSARY".to_string(),
            license_type: "CANNABIS RETAILER".to_string(),
            application_type: "RENEWAL".to_string(),
            license_number: "415678".to_string(),
            business_location: "123 MAIN ST, SEATTLE, WA 98101".to_string(),
            city: "SEATTLE".to_string(),
            state: "WA".to_string(),
            zip_code: "98101".to_string(),
            scraped_at: "2025-06-11T00:00:00Z".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn new_record_runs_every_step() {
        let conn = open_in_memory().unwrap();
        let validator = AlwaysStandardizes;
        let source_id = provenance::get_or_create_source(
            &conn,
            wslcb_model::SourceType::LiveScrape,
            Some("snap.html"),
            None,
            None,
            None,
        )
        .unwrap();
        let options = IngestOptions {
            source_id: Some(source_id),
            address_validator: Some(&validator),
            ..IngestOptions::default()
        };

        let result = ingest_record(&conn, &sample(), &options).unwrap();
        assert!(result.is_new);

        let endorsement_count: i64 = conn
            .query_row("SELECT count(*) FROM record_endorsements", [], |r| r.get(0))
            .unwrap();
        assert_eq!(endorsement_count, 1);

        let sources = provenance::get_record_sources(&conn, result.record_id).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].role, ProvenanceRole::FirstSeen);

        let mut steps: Vec<String> = conn
            .prepare("SELECT step FROM record_enrichments WHERE record_id = ?1 ORDER BY step")
            .unwrap()
            .query_map([result.record_id], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        steps.sort();
        assert_eq!(
            steps,
            vec!["address_validation", "endorsements", "outcome_linking", "provenance"]
        );

        let validated_at: Option<String> = conn
            .query_row(
                "SELECT address_validated_at FROM locations WHERE id = 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(validated_at.is_some());
    }

    #[test]
    fn duplicate_record_links_provenance_as_confirmed() {
        let conn = open_in_memory().unwrap();
        let source_id = provenance::get_or_create_source(
            &conn,
            wslcb_model::SourceType::CoArchive,
            Some("snap.html"),
            None,
            None,
            None,
        )
        .unwrap();
        let options = IngestOptions {
            source_id: Some(source_id),
            validate_addresses: false,
            link_outcomes: false,
            ..IngestOptions::default()
        };

        let first = ingest_record(&conn, &sample(), &options).unwrap();
        assert!(first.is_new);
        let second = ingest_record(&conn, &sample(), &options).unwrap();
        assert!(!second.is_new);
        assert_eq!(first.record_id, second.record_id);

        let sources = provenance::get_record_sources(&conn, second.record_id).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].role, ProvenanceRole::Confirmed);
    }

    #[test]
    fn batch_ingest_tracks_inserted_and_skipped() {
        let mut conn = open_in_memory().unwrap();
        let options = IngestOptions {
            validate_addresses: false,
            link_outcomes: false,
            batch_size: 1,
            ..IngestOptions::default()
        };
        let recs = vec![sample(), sample()];
        let result = ingest_batch(&mut conn, &recs, &options).unwrap();
        assert_eq!(result.inserted, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.errors, 0);
    }
}
