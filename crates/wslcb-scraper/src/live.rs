//! Live scrape orchestration (§4.9): fetch the upstream page, short-circuit
//! on an unchanged body, write a dated snapshot, parse, and ingest.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use wslcb_model::{ProvenanceRole, Section, SourceType};
use wslcb_store::pipeline::{self, AddressValidator, IngestOptions};
use wslcb_store::provenance;

use crate::error::Result;
use crate::scrape_log::{self, SectionCounts};
use crate::snapshot_writer;

const UPSTREAM_URL: &str = "https://lcb.wa.gov/records/frequently-requested-lists";
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// What happened on one call to [`scrape`].
#[derive(Debug, Clone)]
pub enum ScrapeOutcome {
    /// The page body matched the last successful/unchanged scrape's hash;
    /// nothing was parsed or ingested.
    Unchanged { scrape_log_id: i64 },
    /// New or changed content was fetched, parsed, and ingested.
    Success { scrape_log_id: i64, counts: SectionCounts, snapshot_path: Option<String> },
}

fn sha256_hex(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Run one live scrape against the upstream page (§4.9 steps 1-2, then
/// the rest of the sequence runs in the fetch-independent core below).
pub fn scrape(
    conn: &mut Connection,
    data_dir: &Path,
    validator: &dyn AddressValidator,
) -> Result<ScrapeOutcome> {
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()?;
    let scrape_log_id = scrape_log::begin(conn)?;

    match scrape_body_inner(conn, data_dir, validator, scrape_log_id, Utc::now(), || {
        client.get(UPSTREAM_URL).send()?.error_for_status()?.text().map_err(Into::into)
    }) {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            scrape_log::mark_error(conn, scrape_log_id, &e.to_string())?;
            Err(e)
        }
    }
}

/// The fetch-independent core of a scrape: everything from step 3 onward,
/// taking the already-fetched body as a closure so tests can supply
/// synthetic HTML without a network call.
fn scrape_body_inner(
    conn: &mut Connection,
    data_dir: &Path,
    validator: &dyn AddressValidator,
    scrape_log_id: i64,
    now: DateTime<Utc>,
    fetch: impl FnOnce() -> Result<String>,
) -> Result<ScrapeOutcome> {
    let body = fetch()?;
    let hash = sha256_hex(&body);

    if let Some(previous) = scrape_log::most_recent_hash(conn)? {
        if previous == hash {
            scrape_log::mark_unchanged(conn, scrape_log_id, &hash)?;
            return Ok(ScrapeOutcome::Unchanged { scrape_log_id });
        }
    }

    let snapshot_path = match snapshot_writer::write_snapshot(data_dir, now, &body) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::warn!(error = %e, "failed to write snapshot, continuing without one");
            None
        }
    };

    let source_id = provenance::get_or_create_source(
        conn,
        SourceType::LiveScrape,
        snapshot_path.as_deref(),
        Some(UPSTREAM_URL),
        Some(&now.to_rfc3339()),
        Some(scrape_log_id),
    )?;

    let records = wslcb_parser::parse_document(&body, &now.to_rfc3339())?;
    let mut counts = SectionCounts::default();

    for section in [Section::NewApplication, Section::Approved, Section::Discontinued] {
        let section_records: Vec<_> =
            records.iter().filter(|r| r.section == Some(section)).cloned().collect();
        if section_records.is_empty() {
            continue;
        }
        let options = IngestOptions {
            validate_addresses: true,
            link_outcomes: true,
            source_id: Some(source_id),
            source_role: ProvenanceRole::FirstSeen,
            address_validator: Some(validator),
            ..IngestOptions::default()
        };
        let result = pipeline::ingest_batch(conn, &section_records, &options)?;
        match section {
            Section::NewApplication => counts.new_application += result.inserted as i64,
            Section::Approved => counts.approved += result.inserted as i64,
            Section::Discontinued => counts.discontinued += result.inserted as i64,
        }
        counts.skipped += (result.skipped + result.errors) as i64;
    }

    scrape_log::mark_success(conn, scrape_log_id, &counts, snapshot_path.as_deref(), &hash)?;

    if let Err(e) = wslcb_store::endorsements::discover_code_mappings(conn) {
        tracing::error!(error = %e, "error discovering endorsement code mappings");
    }

    Ok(ScrapeOutcome::Success { scrape_log_id, counts, snapshot_path })
}

/// Remove `scrape_log`/`sources` bookkeeping for successful scrapes that
/// produced zero new records, re-stamping them `unchanged`. Their
/// snapshot files are left on disk unless `remove_snapshots` is set, in
/// which case they're deleted too (§4.9 cleanup utility).
pub fn cleanup_redundant_scrapes(
    conn: &Connection,
    data_dir: &Path,
    remove_snapshots: bool,
) -> Result<usize> {
    let ids = scrape_log::zero_record_successes(conn)?;
    let mut cleaned = 0;

    for id in ids {
        let snapshot_path: Option<String> = conn.query_row(
            "SELECT snapshot_path FROM scrape_log WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;

        conn.execute(
            "DELETE FROM record_sources WHERE source_id IN (
                SELECT id FROM sources WHERE scrape_log_id = ?1
            )",
            [id],
        )?;
        conn.execute("DELETE FROM sources WHERE scrape_log_id = ?1", [id])?;
        conn.execute(
            "UPDATE scrape_log SET status = 'unchanged' WHERE id = ?1",
            [id],
        )?;

        if remove_snapshots {
            if let Some(path) = snapshot_path {
                let full = data_dir.join(&path);
                if let Err(e) = std::fs::remove_file(&full) {
                    tracing::warn!(path = %full.display(), error = %e, "failed to remove snapshot file");
                }
            }
        }

        cleaned += 1;
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wslcb_store::connection::open_in_memory;

    struct NeverValidates;
    impl AddressValidator for NeverValidates {
        fn standardize(&self, _address: &str) -> Option<wslcb_model::StandardizedAddress> {
            None
        }
    }

    fn sample_html() -> String {
        r#"<table>
<tr><th>STATEWIDE NEW LICENSE APPLICATIONS</th></tr>
<tr><td>Notification Date:</td><td>06/10/2025</td></tr>
<tr><td>License Number:</td><td>415678</td></tr>
<tr><td>Business Name:</td><td>NEW LEAF DISPENSARY</td></tr>
<tr><td>Applicants:</td><td>NEW LEAF DISPENSARY</td></tr>
<tr><td>License Type:</td><td>CANNABIS RETAILER</td></tr>
<tr><td>Application Type:</td><td>RENEWAL</td></tr>
<tr><td>Location:</td><td>123 MAIN ST, SEATTLE, WA 98101</td></tr>
</table>"#
            .to_string()
    }

    #[test]
    fn first_scrape_ingests_and_marks_success() {
        let mut conn = open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let validator = NeverValidates;
        let now = DateTime::parse_from_rfc3339("2025-06-11T00:00:00Z").unwrap().with_timezone(&Utc);
        let log_id = scrape_log::begin(&conn).unwrap();

        let outcome = scrape_body_inner(&mut conn, dir.path(), &validator, log_id, now, || {
            Ok(sample_html())
        })
        .unwrap();

        match outcome {
            ScrapeOutcome::Success { counts, snapshot_path, .. } => {
                assert_eq!(counts.new_application, 1);
                assert!(snapshot_path.is_some());
            }
            ScrapeOutcome::Unchanged { .. } => panic!("expected a Success outcome"),
        }
    }

    #[test]
    fn unchanged_body_short_circuits_without_reingesting() {
        let mut conn = open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let validator = NeverValidates;
        let now = DateTime::parse_from_rfc3339("2025-06-11T00:00:00Z").unwrap().with_timezone(&Utc);

        let first_id = scrape_log::begin(&conn).unwrap();
        scrape_body_inner(&mut conn, dir.path(), &validator, first_id, now, || Ok(sample_html()))
            .unwrap();

        let second_id = scrape_log::begin(&conn).unwrap();
        let outcome =
            scrape_body_inner(&mut conn, dir.path(), &validator, second_id, now, || {
                Ok(sample_html())
            })
            .unwrap();

        assert!(matches!(outcome, ScrapeOutcome::Unchanged { .. }));
        let count: i64 =
            conn.query_row("SELECT count(*) FROM license_records", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }
}
