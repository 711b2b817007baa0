//! `wslcbctl` — the operator CLI over the ingestion pipeline (§6): run a
//! live scrape, replay archives, backfill provenance, rebuild and compare
//! a database from scratch, check integrity, and drive address
//! validation.

mod config;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use config::Config;
use logging::LogFormat;
use wslcb_address_validator::HttpAddressValidator;
use wslcb_model::Section;
use wslcb_store::connection;

fn parse_section(s: &str) -> anyhow::Result<Section> {
    s.parse::<Section>()
        .map_err(|_| anyhow::anyhow!("unrecognized section {s:?}"))
}

/// Open the database at `path`, creating its parent directory and
/// applying the schema migrations if this is a fresh file.
fn open_db(path: &std::path::Path) -> anyhow::Result<rusqlite::Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = connection::open_at(path)?;
    wslcb_store::schema::init_db(&conn)?;
    wslcb_store::endorsements::seed_endorsements(&conn)?;
    wslcb_store::endorsements::merge_mixed_case_endorsements(&conn)?;
    wslcb_store::endorsements::repair_code_name_endorsements(&conn)?;
    wslcb_store::entities::merge_duplicate_entities(&conn)?;
    Ok(conn)
}

#[derive(Parser)]
#[command(name = "wslcbctl", about = "WSLCB licensing registry ingestion CLI")]
struct Cli {
    /// Directory holding the database and snapshot/diff archives.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// `KEY=value` file checked before the process environment.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "human")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Command {
    /// Fetch the upstream page once, ingesting anything new.
    Scrape,
    /// Remove `scrape_log`/`sources` bookkeeping for zero-record successes.
    CleanupScrapes {
        /// Also delete the associated snapshot files.
        #[arg(long)]
        remove_snapshots: bool,
    },
    /// Replay archived full-page snapshots into the database.
    BackfillSnapshots,
    /// Replay archived diff fragments into the database.
    BackfillDiffs {
        /// Restrict replay to one section.
        #[arg(long, value_parser = parse_section)]
        section: Option<Section>,
        /// Replay a single diff file instead of discovering all of them.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Stop after this many files.
        #[arg(long)]
        limit: Option<usize>,
        /// Report what would be ingested without writing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Populate `sources`/`record_sources` for records ingested before
    /// provenance tracking existed.
    BackfillProvenance,
    /// Build a fresh database from every archived source and compare it
    /// against production.
    Rebuild {
        /// Path for the new database file.
        #[arg(long)]
        output: PathBuf,
        /// Overwrite `output` if it already exists.
        #[arg(long)]
        force: bool,
    },
    /// Compare record natural keys between two databases.
    Compare {
        #[arg(long)]
        prod: PathBuf,
        #[arg(long)]
        rebuilt: PathBuf,
    },
    /// Run integrity checks (orphaned locations, broken foreign keys,
    /// unenriched records, endorsement anomalies, duplicate entities).
    Check {
        /// Apply the fixes this tool knows how to make automatically.
        #[arg(long)]
        fix: bool,
    },
    /// Validate every location that has never been validated.
    BackfillAddresses {
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
    },
    /// Re-validate every location regardless of current status.
    RefreshAddresses {
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
    },
    /// Print summary statistics for the current database.
    Stats,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let config = Config::load(cli.data_dir, cli.env_file);

    if let Err(err) = run(&cli.command, &config) {
        tracing::error!(error = ?err, "wslcbctl command failed");
        return Err(err);
    }
    Ok(())
}

fn run(command: &Command, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Scrape => {
            let mut conn = open_db(&config.db_path())?;
            let validator = HttpAddressValidator::new(config.env_file.clone());
            let outcome = wslcb_scraper::live::scrape(&mut conn, &config.data_dir, &validator)?;
            match outcome {
                wslcb_scraper::live::ScrapeOutcome::Unchanged { scrape_log_id } => {
                    println!("scrape {scrape_log_id}: unchanged, nothing ingested");
                }
                wslcb_scraper::live::ScrapeOutcome::Success { scrape_log_id, counts, snapshot_path } => {
                    println!(
                        "scrape {scrape_log_id}: {} new, {} approved, {} discontinued, {} skipped (snapshot: {})",
                        counts.new_application,
                        counts.approved,
                        counts.discontinued,
                        counts.skipped,
                        snapshot_path.as_deref().unwrap_or("none"),
                    );
                }
            }
        }
        Command::CleanupScrapes { remove_snapshots } => {
            let conn = open_db(&config.db_path())?;
            let cleaned =
                wslcb_scraper::live::cleanup_redundant_scrapes(&conn, &config.data_dir, *remove_snapshots)?;
            println!("cleaned up {cleaned} zero-record scrape(s)");
        }
        Command::BackfillSnapshots => {
            let mut conn = open_db(&config.db_path())?;
            let result = wslcb_scraper::snapshot::backfill_snapshots(&mut conn, &config.data_dir)?;
            println!(
                "processed {} snapshot(s): {} inserted, {} skipped, {} assumptions repaired, {} change-of-location repaired",
                result.snapshots_processed,
                result.inserted,
                result.skipped,
                result.assumptions_repaired,
                result.change_of_location_repaired,
            );
        }
        Command::BackfillDiffs { section, file, limit, dry_run } => {
            let mut conn = open_db(&config.db_path())?;
            let options = wslcb_scraper::diffs::DiffBackfillOptions {
                section: *section,
                single_file: file.clone(),
                limit: *limit,
                dry_run: *dry_run,
            };
            let result = wslcb_scraper::diffs::backfill_diffs(&mut conn, &config.data_dir, &options)?;
            if *dry_run {
                println!("would ingest {} of {} considered record(s):", result.inserted, result.records_considered);
                for record in &result.dry_run_preview {
                    println!(
                        "  {:?} {} {} {}",
                        record.section, record.record_date, record.license_number, record.business_name
                    );
                }
            } else {
                println!(
                    "processed {} file(s): {} inserted, {} skipped, {} errors (of {} considered)",
                    result.files_processed, result.inserted, result.skipped, result.errors, result.records_considered,
                );
            }
        }
        Command::BackfillProvenance => {
            let mut conn = open_db(&config.db_path())?;
            let result = wslcb_scraper::provenance_backfill::backfill_provenance(&mut conn, &config.data_dir)?;
            println!(
                "sources: {} from scrape_log, {} from archives, {} from diffs; linked {}, missed {}",
                result.scrape_log_sources, result.co_archive_sources, result.diff_sources, result.linked, result.missed,
            );
        }
        Command::Rebuild { output, force } => {
            let result = wslcb_scraper::rebuild::rebuild_from_sources(output, &config.data_dir, *force)?;
            println!(
                "rebuilt {} record(s) ({} from diffs, {} from snapshots) in {:.1}s — {} locations, {} entities, {} endorsement mappings, {} outcome links",
                result.records,
                result.from_diffs,
                result.from_snapshots,
                result.elapsed_seconds,
                result.locations,
                result.entities,
                result.endorsement_mappings_discovered,
                result.outcome_links,
            );
        }
        Command::Compare { prod, rebuilt } => {
            let result = wslcb_scraper::rebuild::compare_databases(prod, rebuilt)?;
            println!(
                "prod: {} record(s), rebuilt: {} record(s) — {} missing from rebuilt, {} extra in rebuilt",
                result.prod_count, result.rebuilt_count, result.missing_from_rebuilt, result.extra_in_rebuilt,
            );
            for (section, counts) in &result.section_counts {
                println!("  {section}: prod {}, rebuilt {}", counts.prod, counts.rebuilt);
            }
            if !result.sample_missing.is_empty() {
                println!("sample missing: {:?}", result.sample_missing);
            }
            if !result.sample_extra.is_empty() {
                println!("sample extra: {:?}", result.sample_extra);
            }
        }
        Command::Check { fix } => {
            let conn = open_db(&config.db_path())?;
            let report = wslcb_store::integrity::run_all_checks(&conn, *fix)?;
            let unenriched = &report.unenriched;
            let unenriched_total = unenriched.no_endorsements
                + unenriched.no_entities
                + unenriched.no_provenance
                + unenriched.no_enrichment_tracking;
            let anomalies = &report.endorsement_anomalies;
            let anomalies_total = anomalies.unresolved_codes + anomalies.placeholder_endorsements;
            println!(
                "{} issue(s): {} orphaned location(s) ({} fixed), {} broken FK(s), {} unenriched, {} endorsement anomalies, {} duplicate entity group(s)",
                report.total_issues(),
                report.orphaned_locations.len(),
                report.orphaned_locations_fixed,
                report.broken_fks.len(),
                unenriched_total,
                anomalies_total,
                report.entity_duplicates.len(),
            );
        }
        Command::BackfillAddresses { batch_size } => {
            let mut conn = open_db(&config.db_path())?;
            let validator = HttpAddressValidator::new(config.env_file.clone());
            let validated = wslcb_address_validator::backfill_addresses(&mut conn, &validator, *batch_size)?;
            println!("validated {validated} previously-unvalidated location(s)");
        }
        Command::RefreshAddresses { batch_size } => {
            let mut conn = open_db(&config.db_path())?;
            let validator = HttpAddressValidator::new(config.env_file.clone());
            let validated = wslcb_address_validator::refresh_addresses(&mut conn, &validator, *batch_size)?;
            println!("re-validated {validated} location(s)");
        }
        Command::Stats => {
            let conn = open_db(&config.db_path())?;
            let stats = wslcb_store::records::get_stats(&conn)?;
            println!(
                "{} total record(s) ({} new, {} approved, {} discontinued) — {} unique businesses, {} unique licenses, {} unique entities",
                stats.total_records,
                stats.new_application_count,
                stats.approved_count,
                stats.discontinued_count,
                stats.unique_businesses,
                stats.unique_licenses,
                stats.unique_entities,
            );
            if let (Some(min), Some(max)) = &stats.date_range {
                println!("date range: {min} to {max}");
            }
        }
    }
    Ok(())
}
