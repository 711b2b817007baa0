//! Diff archive backfill (§4.10): replay captured unified-diff fragments
//! of the upstream page, deduplicating across files before ingest so a
//! record seen in more than one diff is only ever inserted once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use wslcb_model::{ProvenanceRole, RawRecord, Section, SourceType};
use wslcb_store::pipeline::{self, IngestOptions};
use wslcb_store::provenance;

use crate::error::Result;

/// Scoping for one backfill run, mirroring the archive replay tool's
/// `--section`/`--file`/`--limit`/`--dry-run` flags.
#[derive(Debug, Clone, Default)]
pub struct DiffBackfillOptions {
    pub section: Option<Section>,
    pub single_file: Option<PathBuf>,
    pub limit: Option<usize>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DiffBackfillResult {
    pub files_processed: usize,
    pub records_considered: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Populated only when `dry_run` is set — records that would have
    /// been ingested, in replay order, without writing anything.
    pub dry_run_preview: Vec<RawRecord>,
}

type NaturalKey = (Section, String, String, String);

/// Discover, dedupe, and replay diff files under `data_dir`.
pub fn backfill_diffs(
    conn: &mut Connection,
    data_dir: &Path,
    options: &DiffBackfillOptions,
) -> Result<DiffBackfillResult> {
    let mut files =
        wslcb_parser::discover_diff_files(data_dir, options.section, options.single_file.as_deref())?;
    if let Some(limit) = options.limit {
        files.truncate(limit);
    }

    let mut by_key: HashMap<NaturalKey, (RawRecord, PathBuf)> = HashMap::new();
    for (path, section) in &files {
        for rec in wslcb_parser::extract_records_from_diff(path, *section)? {
            if let Some(key) = rec.natural_key() {
                by_key.entry(key).or_insert_with(|| (rec, path.clone()));
            }
        }
    }

    let mut ordered: Vec<(RawRecord, PathBuf)> = by_key.into_values().collect();
    ordered.sort_by(|(a, _), (b, _)| {
        a.record_date
            .cmp(&b.record_date)
            .then_with(|| a.section.map(|s| s.to_string()).cmp(&b.section.map(|s| s.to_string())))
    });

    let mut result = DiffBackfillResult {
        files_processed: files.len(),
        records_considered: ordered.len(),
        ..DiffBackfillResult::default()
    };

    if options.dry_run {
        result.dry_run_preview = ordered.into_iter().map(|(rec, _)| rec).collect();
        return Ok(result);
    }

    let mut source_ids: HashMap<PathBuf, i64> = HashMap::new();
    for (i, (rec, path)) in ordered.iter().enumerate() {
        let source_id = match source_ids.get(path) {
            Some(id) => *id,
            None => {
                let rel = path.strip_prefix(data_dir).unwrap_or(path).to_string_lossy().replace('\\', "/");
                let id = provenance::get_or_create_source(conn, SourceType::CoArchive, Some(&rel), None, None, None)?;
                source_ids.insert(path.clone(), id);
                id
            }
        };

        let options = IngestOptions {
            validate_addresses: false,
            link_outcomes: false,
            source_id: Some(source_id),
            source_role: ProvenanceRole::FirstSeen,
            ..IngestOptions::default()
        };

        let tx = conn.transaction()?;
        match pipeline::ingest_record(&tx, rec, &options) {
            Ok(ir) if ir.is_new => result.inserted += 1,
            Ok(_) => result.skipped += 1,
            Err(e) => {
                tracing::error!(error = %e, license_number = %rec.license_number, "error ingesting diff record");
                result.errors += 1;
            }
        }
        tx.commit()?;

        if (i + 1) % 500 == 0 {
            tracing::debug!(progress = i + 1, total = ordered.len(), "diff backfill progress");
        }
    }

    if let Err(e) = wslcb_store::endorsements::discover_code_mappings(conn) {
        tracing::error!(error = %e, "error discovering endorsement code mappings");
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wslcb_store::connection::open_in_memory;

    #[test]
    fn backfill_with_no_diff_directories_is_a_noop() {
        let mut conn = open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = backfill_diffs(&mut conn, dir.path(), &DiffBackfillOptions::default()).unwrap();
        assert_eq!(result.files_processed, 0);
        assert_eq!(result.inserted, 0);
    }

    #[test]
    fn dry_run_does_not_touch_the_database() {
        let mut conn = open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let notif = dir.path().join("wslcb/licensinginfo-diffs/notifications");
        std::fs::create_dir_all(&notif).unwrap();
        let mut content = String::new();
        content.push_str("--- @\tWed, 07 Sep 2022 06:15:05 -0700\n");
        content.push_str("+++ @\tThu, 08 Sep 2022 06:15:05 -0700\n");
        content.push_str("@@ -1,0 +1,6 @@\n");
        content.push_str("+<tr><td>Notification Date:</td><td>6/10/2025</td></tr>\n");
        content.push_str("+<tr><td>License Number:</td><td>415678</td></tr>\n");
        content.push_str("+<tr><td>Application Type:</td><td>RENEWAL</td></tr>\n");
        std::fs::write(notif.join("2025_06_10.txt"), content).unwrap();

        let options = DiffBackfillOptions { dry_run: true, ..Default::default() };
        let result = backfill_diffs(&mut conn, dir.path(), &options).unwrap();
        assert_eq!(result.dry_run_preview.len(), 1);

        let count: i64 = conn.query_row("SELECT count(*) FROM license_records", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }
}
