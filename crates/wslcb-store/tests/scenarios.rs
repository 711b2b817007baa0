//! End-to-end scenarios and cross-module invariants that don't belong to
//! any single module's unit tests: a full `ingest_record` call followed
//! by checking entities/endorsements/locations together, and the
//! application/outcome linker's confidence rules.

use wslcb_model::{EntityRole, EntityType, LinkConfidence, RawRecord, Section, SourceType};
use wslcb_store::connection::open_in_memory;
use wslcb_store::entities::get_record_entities;
use wslcb_store::links::{build_all_links, get_link_for_new_app};
use wslcb_store::pipeline::{ingest_record, AddressValidator, IngestOptions};
use wslcb_store::provenance::{get_or_create_source, get_record_sources};

struct NoValidation;
impl AddressValidator for NoValidation {
    fn standardize(&self, _address: &str) -> Option<wslcb_model::StandardizedAddress> {
        None
    }
}

fn record(
    section: Section,
    record_date: &str,
    license_number: &str,
    application_type: &str,
) -> RawRecord {
    RawRecord {
        section: Some(section),
        record_date: record_date.to_string(),
        business_name: "NEW LEAF DISPENSARY".to_string(),
        applicants: "NEW LEAF DISPENSARY; CAROL NEWBY".to_string(),
        previous_business_name: Some("OLD SMOKE SHOP".to_string()),
        previous_applicants: Some("OLD SMOKE SHOP; ALICE OLDEN".to_string()),
        license_type: "CANNABIS RETAILER".to_string(),
        application_type: application_type.to_string(),
        license_number: license_number.to_string(),
        business_location: "123 MAIN ST, SEATTLE, WA 98101".to_string(),
        city: "SEATTLE".to_string(),
        state: "WA".to_string(),
        zip_code: "98101".to_string(),
        scraped_at: "2025-06-11T00:00:00Z".to_string(),
        ..Default::default()
    }
}

/// S1 — an ASSUMPTION record links both the incoming and outgoing
/// applicant onto the same record, under the roles their column implies.
#[test]
fn assumption_insert_links_both_applicant_sides() {
    let conn = open_in_memory().unwrap();
    let options = IngestOptions { validate_addresses: false, link_outcomes: false, ..IngestOptions::default() };

    let rec = record(Section::NewApplication, "2025-06-10", "415678", "ASSUMPTION");
    let result = ingest_record(&conn, &rec, &options).unwrap();
    assert!(result.is_new);

    let entities = get_record_entities(&conn, &[result.record_id]).unwrap();
    let for_record = &entities[&result.record_id];

    let applicants = &for_record[&EntityRole::Applicant];
    assert_eq!(applicants.len(), 1);
    assert_eq!(applicants[0].name, "CAROL NEWBY");
    assert_eq!(applicants[0].entity_type, EntityType::Person);

    let previous = &for_record[&EntityRole::PreviousApplicant];
    assert_eq!(previous.len(), 1);
    assert_eq!(previous[0].name, "ALICE OLDEN");

    let endorsements: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM record_endorsements WHERE record_id = ?1",
            [result.record_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(endorsements, 1);

    let location_id: Option<i64> = conn
        .query_row("SELECT location_id FROM license_records WHERE id = ?1", [result.record_id], |row| row.get(0))
        .unwrap();
    assert!(location_id.is_some());
}

/// S4 — a new_application and its approved counterpart two days later
/// link with high confidence.
#[test]
fn bidirectional_high_confidence_link() {
    let conn = open_in_memory().unwrap();

    let app = record(Section::NewApplication, "2025-06-10", "L010", "RENEWAL");
    let approved = record(Section::Approved, "2025-06-12", "L010", "RENEWAL");

    let options = IngestOptions { validate_addresses: false, link_outcomes: false, ..IngestOptions::default() };
    let app_result = ingest_record(&conn, &app, &options).unwrap();
    ingest_record(&conn, &approved, &options).unwrap();

    let summary = build_all_links(&conn).unwrap();
    assert_eq!(summary.total(), 1);
    assert_eq!(summary.high, 1);

    let link = get_link_for_new_app(&conn, app_result.record_id).unwrap().unwrap();
    assert_eq!(link.confidence, LinkConfidence::High);
    assert_eq!(link.days_gap, Some(2));
}

/// S5 — with two competing applications for the same outcome, the later
/// filing wins high confidence and the earlier gets medium, both pointing
/// at the same outcome record.
#[test]
fn competing_applications_split_high_and_medium_confidence() {
    let conn = open_in_memory().unwrap();
    let options = IngestOptions { validate_addresses: false, link_outcomes: false, ..IngestOptions::default() };

    let earlier = record(Section::NewApplication, "2025-06-08", "L003", "RENEWAL");
    let later = record(Section::NewApplication, "2025-06-10", "L003", "RENEWAL");
    let approved = record(Section::Approved, "2025-06-12", "L003", "RENEWAL");

    let earlier_result = ingest_record(&conn, &earlier, &options).unwrap();
    let later_result = ingest_record(&conn, &later, &options).unwrap();
    ingest_record(&conn, &approved, &options).unwrap();

    build_all_links(&conn).unwrap();

    let earlier_link = get_link_for_new_app(&conn, earlier_result.record_id).unwrap().unwrap();
    let later_link = get_link_for_new_app(&conn, later_result.record_id).unwrap().unwrap();

    assert_eq!(later_link.confidence, LinkConfidence::High);
    assert_eq!(earlier_link.confidence, LinkConfidence::Medium);
    assert_eq!(earlier_link.outcome_id, later_link.outcome_id);
}

/// Invariant 1 — re-ingesting the same record is a no-op on the record
/// row itself, and only adds a `confirmed` provenance row for a distinct
/// source; it never creates a second location row.
#[test]
fn duplicate_insert_is_idempotent_except_for_provenance() {
    let conn = open_in_memory().unwrap();
    let source_a = get_or_create_source(&conn, SourceType::LiveScrape, Some("a.html"), None, None, None).unwrap();
    let source_b = get_or_create_source(&conn, SourceType::CoArchive, Some("b.html"), None, None, None).unwrap();

    let rec = record(Section::NewApplication, "2025-06-10", "415678", "RENEWAL");
    let options_a = IngestOptions {
        validate_addresses: false,
        link_outcomes: false,
        source_id: Some(source_a),
        ..IngestOptions::default()
    };
    let first = ingest_record(&conn, &rec, &options_a).unwrap();
    assert!(first.is_new);

    let options_b = IngestOptions { source_id: Some(source_b), ..options_a };
    let second = ingest_record(&conn, &rec, &options_b).unwrap();
    assert!(!second.is_new);
    assert_eq!(second.record_id, first.record_id);

    let record_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM license_records", [], |row| row.get(0)).unwrap();
    assert_eq!(record_count, 1);

    let location_count: i64 = conn.query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0)).unwrap();
    assert_eq!(location_count, 1);

    let sources = get_record_sources(&conn, first.record_id).unwrap();
    assert_eq!(sources.len(), 2);
    assert!(sources.iter().any(|s| s.role == wslcb_model::ProvenanceRole::Confirmed));
}

/// Invariant 2 — natural-key uniqueness: a record sharing (section,
/// record_date, license_number, application_type) can never produce a
/// second `license_records` row, even from a different batch.
#[test]
fn natural_key_uniqueness_holds_across_batches() {
    let mut conn = open_in_memory().unwrap();
    let rec = record(Section::NewApplication, "2025-06-10", "415678", "RENEWAL");
    let options =
        IngestOptions { validate_addresses: false, link_outcomes: false, batch_size: 10, ..IngestOptions::default() };

    let first = wslcb_store::pipeline::ingest_batch(&mut conn, &[rec.clone(), rec.clone()], &options).unwrap();
    assert_eq!(first.inserted, 1);
    assert_eq!(first.skipped, 1);

    let second = wslcb_store::pipeline::ingest_batch(&mut conn, &[rec], &options).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 1);

    let count: i64 = conn.query_row("SELECT COUNT(*) FROM license_records", [], |row| row.get(0)).unwrap();
    assert_eq!(count, 1);
}

/// Invariant 8 — every record ingested through the pipeline with a
/// source attached has at least one `record_sources` row.
#[test]
fn every_ingested_record_has_provenance() {
    let conn = open_in_memory().unwrap();
    let source = get_or_create_source(&conn, SourceType::LiveScrape, Some("a.html"), None, None, None).unwrap();
    let options = IngestOptions {
        validate_addresses: false,
        link_outcomes: false,
        source_id: Some(source),
        ..IngestOptions::default()
    };

    let rec = record(Section::NewApplication, "2025-06-10", "415678", "RENEWAL");
    let result = ingest_record(&conn, &rec, &options).unwrap();

    let sources = get_record_sources(&conn, result.record_id).unwrap();
    assert!(!sources.is_empty());
}
