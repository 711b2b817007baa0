//! Everything that turns the upstream registry page and its archives
//! into ingestion calls against `wslcb_store`: the live scrape loop,
//! snapshot/diff archive replay, a one-time provenance backfill, and a
//! from-scratch deterministic rebuild (§4.9-§4.11).

pub mod diffs;
pub mod error;
pub mod live;
pub mod provenance_backfill;
pub mod rebuild;
pub mod scrape_log;
pub mod snapshot;
mod snapshot_writer;

pub use error::{Error, Result};
pub use snapshot_writer::{next_snapshot_path, write_snapshot};
