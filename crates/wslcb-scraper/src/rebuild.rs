//! Deterministic rebuild (§4.11): replay every archived diff and
//! snapshot into a fresh database, in the same order a from-scratch
//! operator run would, and compare the result against production.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use rusqlite::Connection;
use wslcb_model::{ProvenanceRole, Section, SourceType};
use wslcb_store::pipeline::{self, IngestOptions};
use wslcb_store::{endorsements, links, provenance, schema};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct RebuildResult {
    pub records: i64,
    pub from_diffs: usize,
    pub from_snapshots: usize,
    pub locations: i64,
    pub entities: i64,
    pub endorsement_mappings_discovered: usize,
    pub outcome_links: i64,
    pub elapsed_seconds: f64,
}

type NaturalKey = (Section, String, String, String);

/// Build a fresh database at `output_path` from every archived source
/// under `data_dir`. Errors if `output_path` already exists unless
/// `force` is set, in which case the existing file is removed first.
pub fn rebuild_from_sources(output_path: &Path, data_dir: &Path, force: bool) -> Result<RebuildResult> {
    if output_path.exists() {
        if force {
            std::fs::remove_file(output_path)?;
        } else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("output file already exists: {} (use force to overwrite)", output_path.display()),
            )));
        }
    }

    let start = Instant::now();
    let mut result = RebuildResult::default();

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut conn = wslcb_store::connection::open_at(output_path)?;
    schema::init_db(&conn)?;
    endorsements::seed_endorsements(&conn)?;

    tracing::info!("Phase 1: replaying diff archives");
    result.from_diffs = ingest_diffs(&mut conn, data_dir)?;

    tracing::info!("Phase 2: replaying HTML snapshots");
    result.from_snapshots = ingest_snapshots(&mut conn, data_dir)?;

    tracing::info!("Phase 3: endorsement discovery and repair");
    let learned = endorsements::discover_code_mappings(&conn)?;
    result.endorsement_mappings_discovered = learned.len();
    endorsements::merge_mixed_case_endorsements(&conn)?;
    endorsements::repair_code_name_endorsements(&conn)?;

    tracing::info!("Phase 4: building outcome links");
    links::build_all_links(&conn)?;
    result.outcome_links = conn.query_row("SELECT COUNT(*) FROM record_links", [], |r| r.get(0))?;

    result.records = conn.query_row("SELECT COUNT(*) FROM license_records", [], |r| r.get(0))?;
    result.locations = conn.query_row("SELECT COUNT(*) FROM locations", [], |r| r.get(0))?;
    result.entities = conn.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?;
    result.elapsed_seconds = start.elapsed().as_secs_f64();

    tracing::info!(
        records = result.records,
        from_diffs = result.from_diffs,
        from_snapshots = result.from_snapshots,
        elapsed_seconds = result.elapsed_seconds,
        "rebuild complete"
    );
    Ok(result)
}

fn ingest_diffs(conn: &mut Connection, data_dir: &Path) -> Result<usize> {
    let diff_files = wslcb_parser::discover_diff_files(data_dir, None, None)?;
    if diff_files.is_empty() {
        return Ok(0);
    }

    let mut all_records: HashMap<NaturalKey, wslcb_model::RawRecord> = HashMap::new();
    let mut ts_to_path: HashMap<String, String> = HashMap::new();

    for (path, section) in &diff_files {
        let recs = match wslcb_parser::extract_records_from_diff(path, *section) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to parse diff during rebuild");
                continue;
            }
        };
        let rel = path.strip_prefix(data_dir).unwrap_or(path).to_string_lossy().replace('\\', "/");
        for rec in recs {
            if let Some(key) = rec.natural_key() {
                if !rec.scraped_at.is_empty() {
                    ts_to_path.entry(rec.scraped_at.clone()).or_insert_with(|| rel.clone());
                }
                all_records.entry(key).or_insert(rec);
            }
        }
    }

    let mut ordered: Vec<wslcb_model::RawRecord> = all_records.into_values().collect();
    ordered.sort_by(|a, b| {
        a.record_date
            .cmp(&b.record_date)
            .then_with(|| a.section.map(|s| s.to_string()).cmp(&b.section.map(|s| s.to_string())))
    });

    let mut source_cache: HashMap<String, i64> = HashMap::new();
    let mut inserted = 0;

    for (i, rec) in ordered.iter().enumerate() {
        let source_id = match ts_to_path.get(&rec.scraped_at) {
            Some(path) => {
                let id = match source_cache.get(path) {
                    Some(id) => *id,
                    None => {
                        let id = provenance::get_or_create_source(
                            conn,
                            SourceType::CoDiffArchive,
                            Some(path),
                            None,
                            Some(&rec.scraped_at),
                            None,
                        )?;
                        source_cache.insert(path.clone(), id);
                        id
                    }
                };
                Some(id)
            }
            None => None,
        };

        let options = IngestOptions {
            validate_addresses: false,
            link_outcomes: false,
            source_id,
            source_role: ProvenanceRole::FirstSeen,
            ..IngestOptions::default()
        };

        let tx = conn.transaction()?;
        if let Ok(ir) = pipeline::ingest_record(&tx, rec, &options) {
            if ir.is_new {
                inserted += 1;
            }
        }
        tx.commit()?;

        if (i + 1) % 500 == 0 {
            tracing::debug!(progress = i + 1, total = ordered.len(), inserted, "diff rebuild progress");
        }
    }

    Ok(inserted)
}

fn ingest_snapshots(conn: &mut Connection, data_dir: &Path) -> Result<usize> {
    let snapshots: Vec<PathBuf> = wslcb_parser::snapshot_paths(data_dir);
    let mut total_inserted = 0;

    for path in &snapshots {
        let records = match wslcb_parser::parse_snapshot(path, &chrono::Utc::now().to_rfc3339()) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to parse snapshot during rebuild");
                continue;
            }
        };

        let rel = path.strip_prefix(data_dir).unwrap_or(path).to_string_lossy().replace('\\', "/");
        let captured_at = wslcb_parser::extract_snapshot_date(path).map(|d| format!("{d}T00:00:00+00:00"));
        let source_id = provenance::get_or_create_source(
            conn,
            SourceType::CoArchive,
            Some(&rel),
            None,
            captured_at.as_deref(),
            None,
        )?;

        let options = IngestOptions {
            validate_addresses: false,
            link_outcomes: false,
            source_id: Some(source_id),
            ..IngestOptions::default()
        };
        let batch = pipeline::ingest_batch(conn, &records, &options)?;
        total_inserted += batch.inserted;
    }

    Ok(total_inserted)
}

/// Per-section record counts for one database, for [`ComparisonResult`].
#[derive(Debug, Clone, Default)]
pub struct SectionComparison {
    pub prod: i64,
    pub rebuilt: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ComparisonResult {
    pub prod_count: i64,
    pub rebuilt_count: i64,
    pub missing_from_rebuilt: usize,
    pub extra_in_rebuilt: usize,
    pub section_counts: HashMap<String, SectionComparison>,
    pub sample_missing: Vec<NaturalKey>,
    pub sample_extra: Vec<NaturalKey>,
}

fn natural_keys(conn: &Connection) -> Result<HashSet<NaturalKey>> {
    let mut stmt = conn.prepare(
        "SELECT section_type, record_date, license_number, application_type FROM license_records",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?, row.get::<_, String>(3)?))
    })?;
    let mut out = HashSet::new();
    for row in rows {
        let (section, date, license, app_type) = row?;
        let section: Section = wslcb_model::parse_enum("section", &section)?;
        out.insert((section, date, license, app_type));
    }
    Ok(out)
}

fn section_counts(conn: &Connection) -> Result<HashMap<String, i64>> {
    let mut stmt =
        conn.prepare("SELECT section_type, COUNT(*) FROM license_records GROUP BY section_type")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    let mut out = HashMap::new();
    for row in rows {
        let (section, count) = row?;
        out.insert(section, count);
    }
    Ok(out)
}

/// Compare two independently opened databases by natural key, for
/// validating a rebuild against the production database.
pub fn compare_databases(prod_path: &Path, rebuilt_path: &Path) -> Result<ComparisonResult> {
    let prod_conn = wslcb_store::connection::open_at(prod_path)?;
    let rebuilt_conn = wslcb_store::connection::open_at(rebuilt_path)?;

    let mut result = ComparisonResult::default();
    result.prod_count = prod_conn.query_row("SELECT COUNT(*) FROM license_records", [], |r| r.get(0))?;
    result.rebuilt_count =
        rebuilt_conn.query_row("SELECT COUNT(*) FROM license_records", [], |r| r.get(0))?;

    let prod_sections = section_counts(&prod_conn)?;
    let rebuilt_sections = section_counts(&rebuilt_conn)?;
    let all_sections: HashSet<&String> = prod_sections.keys().chain(rebuilt_sections.keys()).collect();
    for section in all_sections {
        result.section_counts.insert(
            section.clone(),
            SectionComparison {
                prod: *prod_sections.get(section).unwrap_or(&0),
                rebuilt: *rebuilt_sections.get(section).unwrap_or(&0),
            },
        );
    }

    let prod_keys = natural_keys(&prod_conn)?;
    let rebuilt_keys = natural_keys(&rebuilt_conn)?;

    let mut missing: Vec<NaturalKey> = prod_keys.difference(&rebuilt_keys).cloned().collect();
    let mut extra: Vec<NaturalKey> = rebuilt_keys.difference(&prod_keys).cloned().collect();
    result.missing_from_rebuilt = missing.len();
    result.extra_in_rebuilt = extra.len();

    fn sort_key(k: &NaturalKey) -> (String, String, String, String) {
        (k.0.to_string(), k.1.clone(), k.2.clone(), k.3.clone())
    }
    missing.sort_by_key(sort_key);
    extra.sort_by_key(sort_key);
    const SAMPLE: usize = 10;
    result.sample_missing = missing.into_iter().take(SAMPLE).collect();
    result.sample_extra = extra.into_iter().take(SAMPLE).collect();

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebuild_with_no_archives_produces_an_empty_but_valid_db() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        let output = dir.path().join("rebuilt.db");

        let result = rebuild_from_sources(&output, &data_dir, false).unwrap();
        assert_eq!(result.records, 0);
        assert_eq!(result.from_diffs, 0);
        assert_eq!(result.from_snapshots, 0);
    }

    #[test]
    fn rebuild_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        let output = dir.path().join("rebuilt.db");
        std::fs::write(&output, b"existing").unwrap();

        assert!(rebuild_from_sources(&output, &data_dir, false).is_err());
        assert!(rebuild_from_sources(&output, &data_dir, true).is_ok());
    }
}
