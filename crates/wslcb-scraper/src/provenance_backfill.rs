//! One-time provenance backfill (§4.10): populate `sources`/`record_sources`
//! for records ingested before provenance tracking existed. Idempotent —
//! `get_or_create_source`/`link_record_source` are both safe to re-run.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::Path;

use rusqlite::Connection;
use wslcb_model::{ProvenanceRole, SourceType};
use wslcb_store::provenance;

use crate::error::Result;

const UPSTREAM_URL: &str = "https://lcb.wa.gov/records/frequently-requested-lists";

#[derive(Debug, Clone, Copy, Default)]
pub struct ProvenanceBackfillResult {
    pub scrape_log_sources: usize,
    pub co_archive_sources: usize,
    pub diff_sources: usize,
    pub linked: usize,
    pub missed: usize,
}

fn find_record_id(
    conn: &Connection,
    section_type: &str,
    record_date: &str,
    license_number: &str,
    application_type: &str,
) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM license_records
             WHERE section_type = ?1 AND record_date = ?2
               AND license_number = ?3 AND application_type = ?4",
            (section_type, record_date, license_number, application_type),
            |row| row.get(0),
        )
        .ok())
}

/// Parse a snapshot and link every record it contains to `source_id`
/// under role `confirmed` (we're retroactively attributing, not
/// establishing first-seen). Returns `(linked, missed)`.
fn link_snapshot_records(conn: &Connection, path: &Path, source_id: i64) -> Result<(usize, usize)> {
    let records = match wslcb_parser::parse_snapshot(path, &chrono::Utc::now().to_rfc3339()) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse snapshot during provenance backfill");
            return Ok((0, 0));
        }
    };

    let mut linked = 0;
    let mut missed = 0;
    for rec in &records {
        let Some(section) = rec.section else { continue };
        let record_id = find_record_id(
            conn,
            &section.to_string(),
            &rec.record_date,
            &rec.license_number,
            &rec.application_type,
        )?;
        match record_id {
            Some(id) => {
                provenance::link_record_source(conn, id, source_id, ProvenanceRole::Confirmed)?;
                linked += 1;
            }
            None => missed += 1,
        }
    }
    Ok((linked, missed))
}

/// Phase 1: every `scrape_log` row becomes a `live_scrape` source; its
/// snapshot (if any and still on disk) is parsed and linked.
fn backfill_from_scrape_log(conn: &Connection, data_dir: &Path) -> Result<(usize, usize, usize, HashSet<String>)> {
    let mut rows: Vec<(i64, String, Option<String>)> = {
        let mut stmt = conn.prepare("SELECT id, started_at, snapshot_path FROM scrape_log ORDER BY id")?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<_, _>>()?
    };
    rows.sort_by_key(|(id, _, _)| *id);

    let mut sources = 0;
    let mut linked = 0;
    let mut missed = 0;
    let mut live_paths = HashSet::new();

    for (scrape_log_id, started_at, snapshot_path) in &rows {
        let source_id = provenance::get_or_create_source(
            conn,
            SourceType::LiveScrape,
            snapshot_path.as_deref(),
            Some(UPSTREAM_URL),
            Some(started_at),
            Some(*scrape_log_id),
        )?;
        sources += 1;

        if let Some(rel) = snapshot_path {
            live_paths.insert(rel.clone());
            let abs = data_dir.join(rel);
            if abs.is_file() {
                let (l, m) = link_snapshot_records(conn, &abs, source_id)?;
                linked += l;
                missed += m;
            } else {
                tracing::warn!(path = %abs.display(), "scrape_log snapshot not found on disk");
            }
        }
    }

    Ok((sources, linked, missed, live_paths))
}

/// Phase 2: CO archive HTML snapshots not already covered by a
/// `scrape_log` row's `snapshot_path`.
fn backfill_from_co_archive(
    conn: &Connection,
    data_dir: &Path,
    live_paths: &HashSet<String>,
) -> Result<(usize, usize, usize)> {
    let snapshots = wslcb_parser::snapshot_paths(data_dir);
    let mut sources = 0;
    let mut linked = 0;
    let mut missed = 0;

    for path in &snapshots {
        let rel = path.strip_prefix(data_dir).unwrap_or(path).to_string_lossy().replace('\\', "/");
        if live_paths.contains(&rel) {
            continue;
        }

        let captured_at = wslcb_parser::extract_snapshot_date(path).map(|d| format!("{d}T00:00:00+00:00"));
        let source_id = provenance::get_or_create_source(
            conn,
            SourceType::CoArchive,
            Some(&rel),
            Some(UPSTREAM_URL),
            captured_at.as_deref(),
            None,
        )?;
        sources += 1;

        let (l, m) = link_snapshot_records(conn, path, source_id)?;
        linked += l;
        missed += m;
    }

    Ok((sources, linked, missed))
}

fn read_diff_header_timestamps(path: &Path) -> Option<(String, String)> {
    let file = std::fs::File::open(path).ok()?;
    let reader = std::io::BufReader::new(file);
    let mut old_ts = None;
    let mut new_ts = None;

    for line in reader.lines() {
        let Ok(line) = line else { break };
        if let Some(rest) = line.strip_prefix("--- ") {
            old_ts = rest.split_once('\t').map(|(_, r)| wslcb_parser::parse_diff_timestamp(r).to_rfc3339());
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            new_ts = rest.split_once('\t').map(|(_, r)| wslcb_parser::parse_diff_timestamp(r).to_rfc3339());
            break;
        }
    }

    match (old_ts, new_ts) {
        (Some(o), Some(n)) => Some((o, n)),
        _ => None,
    }
}

/// Phase 3: diff archives are matched to orphan records by `scraped_at`
/// equality instead of being re-parsed — some diffs run tens of
/// megabytes, and the header timestamps alone are enough to attribute a
/// record that predates provenance tracking.
fn backfill_from_diffs(conn: &Connection, data_dir: &Path) -> Result<(usize, usize, usize)> {
    let diff_files = wslcb_parser::discover_diff_files(data_dir, None, None)?;
    let mut ts_to_source: HashMap<String, i64> = HashMap::new();
    let mut sources = 0;

    for (path, _section) in &diff_files {
        let Some((old_ts, new_ts)) = read_diff_header_timestamps(path) else {
            tracing::warn!(path = %path.display(), "failed to read diff header timestamps");
            continue;
        };
        let rel = path.strip_prefix(data_dir).unwrap_or(path).to_string_lossy().replace('\\', "/");
        let source_id = provenance::get_or_create_source(
            conn,
            SourceType::CoDiffArchive,
            Some(&rel),
            Some(UPSTREAM_URL),
            Some(&new_ts),
            None,
        )?;
        sources += 1;
        ts_to_source.entry(old_ts).or_insert(source_id);
        ts_to_source.entry(new_ts).or_insert(source_id);
    }

    let orphans: Vec<(i64, String)> = {
        let mut stmt = conn.prepare(
            "SELECT id, scraped_at FROM license_records
             WHERE id NOT IN (SELECT record_id FROM record_sources)",
        )?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?
    };

    let mut linked = 0;
    let mut missed = 0;
    for (record_id, scraped_at) in &orphans {
        match ts_to_source.get(scraped_at) {
            Some(source_id) => {
                provenance::link_record_source(conn, *record_id, *source_id, ProvenanceRole::Confirmed)?;
                linked += 1;
            }
            None => missed += 1,
        }
    }

    Ok((sources, linked, missed))
}

/// Run all three phases of the one-time provenance backfill.
pub fn backfill_provenance(conn: &mut Connection, data_dir: &Path) -> Result<ProvenanceBackfillResult> {
    let mut result = ProvenanceBackfillResult::default();

    let (scrape_log_sources, linked1, missed1, live_paths) = backfill_from_scrape_log(conn, data_dir)?;
    result.scrape_log_sources = scrape_log_sources;

    let (co_archive_sources, linked2, missed2) = backfill_from_co_archive(conn, data_dir, &live_paths)?;
    result.co_archive_sources = co_archive_sources;

    let (diff_sources, linked3, missed3) = backfill_from_diffs(conn, data_dir)?;
    result.diff_sources = diff_sources;

    result.linked = linked1 + linked2 + linked3;
    result.missed = missed1 + missed2 + missed3;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wslcb_store::connection::open_in_memory;

    #[test]
    fn empty_data_dir_backfills_nothing() {
        let mut conn = open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = backfill_provenance(&mut conn, dir.path()).unwrap();
        assert_eq!(result.scrape_log_sources, 0);
        assert_eq!(result.co_archive_sources, 0);
        assert_eq!(result.diff_sources, 0);
    }
}
