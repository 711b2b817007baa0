use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use wslcb_model::{RawRecord, Section};

use crate::error::{Error, Result};
use crate::html::parse_document;

/// The three diff-directory names under `wslcb/licensinginfo-diffs/`, in
/// the fixed discovery order used by [`discover_diff_files`].
const DIFF_DIRS: &[(&str, Section)] = &[
    ("notifications", Section::NewApplication),
    ("approvals", Section::Approved),
    ("discontinued", Section::Discontinued),
];

fn section_for_diff_dir(name: &str) -> Option<Section> {
    DIFF_DIRS
        .iter()
        .find(|(dir, _)| *dir == name)
        .map(|(_, s)| *s)
}

/// The diff-directory name a given section's files live under. Used by
/// the scraper crate when routing newly-captured diffs to disk.
pub fn diff_dir_for_section(section: Section) -> &'static str {
    DIFF_DIRS
        .iter()
        .find(|(_, s)| *s == section)
        .map(|(dir, _)| *dir)
        .expect("every Section has a diff directory")
}

fn snapshot_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4}_\d{2}_\d{2})").unwrap())
}

/// Recursively collect every `*.html` snapshot under `wslcb/licensinginfo/`,
/// sorted for deterministic replay order (§4.10).
pub fn snapshot_paths(data_dir: &Path) -> Vec<PathBuf> {
    let root = data_dir.join("wslcb").join("licensinginfo");
    let mut out = Vec::new();
    walk_html(&root, &mut out);
    out.sort();
    out
}

fn walk_html(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_html(&path, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some("html") {
            out.push(path);
        }
    }
}

/// Pull the `YYYY_MM_DD` date embedded in a snapshot's filename.
pub fn extract_snapshot_date(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    snapshot_date_re()
        .captures(name)
        .map(|c| c[1].replace('_', "-"))
}

/// Parse every recognized section's records out of one snapshot file.
/// `scraped_at` is supplied by the caller (the replay driver's current
/// time), not derived from the snapshot's embedded date — matching the
/// upstream behavior of stamping capture time at parse time and letting
/// the archive source record carry the historical `captured_at` instead.
pub fn parse_snapshot(path: &Path, scraped_at: &str) -> Result<Vec<RawRecord>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_document(&content, scraped_at)
}

/// One diff file paired with the section it belongs to.
pub type DiffFile = (PathBuf, Section);

/// Discover diff files to replay, per §4.10. If `single_file` is given,
/// everything else is ignored: the section is inferred from the file's
/// parent directory name and a single-element list is returned (or an
/// error if the path is missing or its directory isn't recognized).
/// Otherwise walks the three diff directories in a fixed order
/// (`notifications`, `approvals`, `discontinued`), optionally restricted
/// to a single `section`, collecting `*.txt` files sorted within each
/// directory.
pub fn discover_diff_files(
    data_dir: &Path,
    section: Option<Section>,
    single_file: Option<&Path>,
) -> Result<Vec<DiffFile>> {
    if let Some(file) = single_file {
        let resolved = if file.is_absolute() {
            file.to_path_buf()
        } else {
            data_dir.join(file)
        };
        if !resolved.is_file() {
            return Err(Error::Io {
                path: resolved,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "diff file not found"),
            });
        }
        let dir_name = resolved
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("");
        let Some(sec) = section_for_diff_dir(dir_name) else {
            return Err(Error::SectionNotFound);
        };
        return Ok(vec![(resolved, sec)]);
    }

    let mut out = Vec::new();
    for (dir_name, sec) in DIFF_DIRS {
        if let Some(wanted) = section {
            if wanted != *sec {
                continue;
            }
        }
        let dir = data_dir
            .join("wslcb")
            .join("licensinginfo-diffs")
            .join(dir_name);
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "diff directory not found, skipping");
            continue;
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.path())
                    .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("txt"))
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        out.extend(files.into_iter().map(|p| (p, *sec)));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_date_from_snapshot_filename() {
        let path = Path::new("/data/wslcb/licensinginfo/2025_06_10_page.html");
        assert_eq!(extract_snapshot_date(path), Some("2025-06-10".to_string()));
    }

    #[test]
    fn returns_none_when_no_date_in_filename() {
        let path = Path::new("/data/wslcb/licensinginfo/page.html");
        assert_eq!(extract_snapshot_date(path), None);
    }

    #[test]
    fn single_file_short_circuits_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("approvals");
        std::fs::create_dir_all(&sub).unwrap();
        let file = sub.join("2025_06_10.txt");
        std::fs::write(&file, "content").unwrap();

        let found = discover_diff_files(dir.path(), None, Some(&file)).unwrap();
        assert_eq!(found, vec![(file, Section::Approved)]);
    }

    #[test]
    fn single_file_in_unrecognized_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("mystery");
        std::fs::create_dir_all(&sub).unwrap();
        let file = sub.join("x.txt");
        std::fs::write(&file, "content").unwrap();

        assert!(discover_diff_files(dir.path(), None, Some(&file)).is_err());
    }

    #[test]
    fn discovers_per_directory_sorted_files() {
        let dir = tempfile::tempdir().unwrap();
        let notif = dir.path().join("wslcb/licensinginfo-diffs/notifications");
        std::fs::create_dir_all(&notif).unwrap();
        std::fs::write(notif.join("b.txt"), "").unwrap();
        std::fs::write(notif.join("a.txt"), "").unwrap();

        let found = discover_diff_files(dir.path(), Some(Section::NewApplication), None).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].0.ends_with("a.txt"));
        assert!(found[1].0.ends_with("b.txt"));
    }
}
