use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use wslcb_model::{RawRecord, Section};

use crate::dates::parse_diff_timestamp;
use crate::error::{Error, Result};

/// The four split line-lists produced by [`split_diff_lines`], plus the
/// timestamps recovered from the `---`/`+++` headers.
pub struct DiffLines {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub new_with_ctx: Vec<String>,
    pub old_with_ctx: Vec<String>,
    pub old_ts: DateTime<Utc>,
    pub new_ts: DateTime<Utc>,
}

/// Split a unified diff into added/removed/context-inclusive line lists,
/// recovering the `---`/`+++` header timestamps (§4.1).
pub fn split_diff_lines(content: &str) -> DiffLines {
    let fallback = Utc::now();
    let mut old_ts = fallback;
    let mut new_ts = fallback;
    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut new_ctx = Vec::new();
    let mut old_ctx = Vec::new();

    for line in content.split('\n') {
        if let Some(rest) = line.strip_prefix("--- ") {
            old_ts = header_timestamp(rest).unwrap_or(fallback);
            continue;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            new_ts = header_timestamp(rest).unwrap_or(fallback);
            continue;
        }
        if line.starts_with("@@") {
            continue;
        }
        if let Some(stripped) = line.strip_prefix('+') {
            added.push(stripped.to_string());
            new_ctx.push(stripped.to_string());
        } else if let Some(stripped) = line.strip_prefix('-') {
            removed.push(stripped.to_string());
            old_ctx.push(stripped.to_string());
        } else {
            new_ctx.push(line.to_string());
            old_ctx.push(line.to_string());
        }
    }

    DiffLines {
        added,
        removed,
        new_with_ctx: new_ctx,
        old_with_ctx: old_ctx,
        old_ts,
        new_ts,
    }
}

fn header_timestamp(header_rest: &str) -> Option<DateTime<Utc>> {
    let raw = header_rest.split_once('\t').map(|(_, r)| r)?;
    Some(parse_diff_timestamp(raw))
}

/// Parse a set of raw diff content lines (each one fragment of a table
/// row's markup) by wrapping them in a synthetic `<table>` and reusing
/// the ordinary row-extraction state machine — mirrors the upstream
/// "wrap and parse" idiom used for both `+`/`-` lines and context lines.
fn parse_fragment_lines(lines: &[String], section: Section, scraped_at: &str) -> Vec<RawRecord> {
    if lines.is_empty() {
        return Vec::new();
    }
    let html = format!("<table>{}</table>", lines.join("\n"));
    match crate::html::parse_section(&format_as_document(&html, section), section, scraped_at) {
        Ok(recs) => recs,
        Err(_) => Vec::new(),
    }
}

/// Diff fragments have no `<th>` header to key off of, so we synthesize
/// one matching the target section before handing the fragment to the
/// normal table parser.
fn format_as_document(table_html: &str, section: Section) -> String {
    let header = match section {
        Section::NewApplication => "STATEWIDE NEW LICENSE APPLICATIONS",
        Section::Approved => "STATEWIDE RECENTLY APPROVED LICENSES",
        Section::Discontinued => "STATEWIDE DISCONTINUED LICENSES",
    };
    // Inject the header row into the same table so `parse_section`'s
    // `<th>`-based table discovery still finds it.
    let with_header = table_html.replacen("<table>", &format!("<table><tr><th>{header}</th></tr>"), 1);
    format!("<html><body>{with_header}</body></html>")
}

/// Extract deduplicated, validated records from a single diff file using
/// the two-pass strategy in §4.1: a cheap `+`/`-`-only primary pass, and
/// — only when that pass saw boundary-incomplete records — a
/// context-inclusive supplemental pass that fills in gaps without
/// overwriting anything the primary pass already found.
pub fn extract_records_from_diff(path: &Path, section: Section) -> Result<Vec<RawRecord>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(extract_records_from_diff_content(&content, section))
}

fn natural_key(rec: &RawRecord) -> (Section, String, String, String) {
    (
        rec.section.expect("validated record always has a section"),
        rec.record_date.clone(),
        rec.license_number.clone(),
        rec.application_type.clone(),
    )
}

/// Same as [`extract_records_from_diff`] but operating on already-read
/// diff text, split out for testability without touching the filesystem.
pub fn extract_records_from_diff_content(content: &str, section: Section) -> Vec<RawRecord> {
    let lines = split_diff_lines(content);

    let mut primary: HashMap<(Section, String, String, String), RawRecord> = HashMap::new();
    let mut has_incomplete = false;

    for (raw_lines, ts) in [
        (&lines.added, lines.new_ts),
        (&lines.removed, lines.old_ts),
    ] {
        let scraped_at = ts.to_rfc3339();
        for mut rec in parse_fragment_lines(raw_lines, section, &scraped_at) {
            if rec.is_valid() {
                rec.scraped_at = scraped_at.clone();
                let key = natural_key(&rec);
                primary.entry(key).or_insert(rec);
            } else if !rec.license_number.is_empty() {
                has_incomplete = true;
            }
        }
    }

    if !has_incomplete {
        return primary.into_values().collect();
    }

    for (raw_lines, ts) in [
        (&lines.new_with_ctx, lines.new_ts),
        (&lines.old_with_ctx, lines.old_ts),
    ] {
        let scraped_at = ts.to_rfc3339();
        for mut rec in parse_fragment_lines(raw_lines, section, &scraped_at) {
            if rec.is_valid() {
                let key = natural_key(&rec);
                if !primary.contains_key(&key) {
                    rec.scraped_at = scraped_at.clone();
                    primary.insert(key, rec);
                }
            }
        }
    }

    primary.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(label: &str, value: &str) -> String {
        format!("<tr><td>{label}</td><td>{value}</td></tr>")
    }

    #[test]
    fn primary_pass_recovers_a_clean_added_record() {
        let mut content = String::new();
        content.push_str("--- @\tWed, 07 Sep 2022 06:15:05 -0700\n");
        content.push_str("+++ @\tThu, 08 Sep 2022 06:15:05 -0700\n");
        content.push_str("@@ -1,0 +1,6 @@\n");
        content.push_str(&format!("+{}\n", row("Notification Date:", "6/10/2025")));
        content.push_str(&format!("+{}\n", row("License Number:", "415678")));
        content.push_str(&format!("+{}\n", row("Application Type:", "RENEWAL")));

        let records = extract_records_from_diff_content(&content, Section::NewApplication);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].license_number, "415678");
        assert_eq!(records[0].record_date, "2025-06-10");
    }

    #[test]
    fn supplemental_pass_recovers_boundary_split_record() {
        // The primary (+/- only) pass sees a License Number row with no
        // Application Type — invalid, and thus a boundary artifact — so
        // the context-inclusive pass must recover the full record.
        let mut content = String::new();
        content.push_str("--- @\tWed, 07 Sep 2022 06:15:05 -0700\n");
        content.push_str("+++ @\tThu, 08 Sep 2022 06:15:05 -0700\n");
        content.push_str("@@ -1,0 +1,6 @@\n");
        content.push_str(&format!(" {}\n", row("Notification Date:", "6/10/2025")));
        content.push_str(&format!("+{}\n", row("License Number:", "415678")));
        content.push_str(&format!(" {}\n", row("Application Type:", "RENEWAL")));

        let records = extract_records_from_diff_content(&content, Section::NewApplication);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].license_number, "415678");
        assert_eq!(records[0].application_type, "RENEWAL");
    }
}
