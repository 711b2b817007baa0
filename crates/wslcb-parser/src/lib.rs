//! Parsing of the upstream registry's HTML tables, unified diffs of those
//! tables, and the on-disk snapshot/diff archive layout.

mod dates;
mod diff;
mod error;
mod html;
mod paths;

pub use dates::{normalize_date, parse_diff_timestamp};
pub use diff::{
    extract_records_from_diff, extract_records_from_diff_content, split_diff_lines, DiffLines,
};
pub use error::{Error, Result};
pub use html::{parse_document, parse_location, parse_records_from_rows, parse_section};
pub use paths::{
    discover_diff_files, diff_dir_for_section, extract_snapshot_date, parse_snapshot,
    snapshot_paths, DiffFile,
};
