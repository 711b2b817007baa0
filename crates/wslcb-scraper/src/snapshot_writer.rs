//! Writing a freshly fetched page to a dated, versioned snapshot path
//! under `wslcb/licensinginfo/` (§4.9 step 4). Read-side discovery of
//! already-written snapshots lives in `wslcb_parser::paths` instead.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-v(\d+)\.html$").unwrap())
}

fn next_version(dir: &Path, day: &str) -> u32 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 1;
    };
    let mut max_seen = 0u32;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(day) {
            continue;
        }
        if let Some(caps) = version_re().captures(name) {
            if let Ok(v) = caps[1].parse::<u32>() {
                max_seen = max_seen.max(v);
            }
        }
    }
    max_seen + 1
}

/// Pick the next unused versioned path for a snapshot captured at `now`,
/// creating parent directories as needed.
pub fn next_snapshot_path(data_dir: &Path, now: DateTime<Utc>) -> std::io::Result<PathBuf> {
    let year = now.format("%Y").to_string();
    let day = now.format("%Y_%m_%d").to_string();
    let hms = now.format("%H_%M_%S").to_string();
    let dir = data_dir.join("wslcb").join("licensinginfo").join(&year).join(&day);
    std::fs::create_dir_all(&dir)?;
    let version = next_version(&dir, &day);
    Ok(dir.join(format!("{day}-{hms}-v{version}.html")))
}

/// Write `body` to the next versioned snapshot path, returning the
/// written path relative to `data_dir` for storage in `sources.snapshot_path`.
pub fn write_snapshot(data_dir: &Path, now: DateTime<Utc>, body: &str) -> std::io::Result<String> {
    let path = next_snapshot_path(data_dir, now)?;
    std::fs::write(&path, body)?;
    let rel = path
        .strip_prefix(data_dir)
        .unwrap_or(&path)
        .to_string_lossy()
        .replace('\\', "/");
    Ok(rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_snapshot_of_the_day_is_v1() {
        let dir = tempfile::tempdir().unwrap();
        let now = DateTime::parse_from_rfc3339("2025-06-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let path = next_snapshot_path(dir.path(), now).unwrap();
        assert!(path.to_string_lossy().ends_with("-v1.html"));
    }

    #[test]
    fn repeated_capture_same_day_increments_version() {
        let dir = tempfile::tempdir().unwrap();
        let now = DateTime::parse_from_rfc3339("2025-06-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        write_snapshot(dir.path(), now, "<html>one</html>").unwrap();
        let rel = write_snapshot(dir.path(), now, "<html>two</html>").unwrap();
        assert!(rel.ends_with("-v2.html"));
    }
}
