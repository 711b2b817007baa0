//! Shared domain vocabulary for the WSLCB licensing tracker.
//!
//! The upstream registry speaks in bare strings (`"new_application"`,
//! `"high"`, ...). Every place that string touches SQLite or the parser
//! goes through one of the enums below instead of a loose `String`.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use strum_macros::{Display as StrumDisplay, EnumString};

/// One of the three upstream registry tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Section {
    NewApplication,
    Approved,
    Discontinued,
}

/// How a capture of the upstream content was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SourceType {
    LiveScrape,
    CoArchive,
    InternetArchive,
    CoDiffArchive,
    Manual,
}

/// The role a source plays in having produced a given record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ProvenanceRole {
    FirstSeen,
    Confirmed,
    Repaired,
}

/// Confidence of a bidirectional application→outcome match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LinkConfidence {
    High,
    Medium,
    Low,
}

/// Which slot of a record an entity was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum EntityRole {
    Applicant,
    PreviousApplicant,
}

/// Heuristic classification of an extracted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
}

/// Status of a new-application record from the outcome linker's point of
/// view. `None` at the call site means the record's `application_type`
/// isn't in a linkable family at all (see [`crate::APPROVAL_LINK_TYPES`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum OutcomeStatus {
    Approved,
    Discontinued,
    DataGap,
    Pending,
    Unknown,
}

/// One attempt at a live scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ScrapeStatus {
    Running,
    Success,
    Error,
    Unchanged,
}

/// The application-type values that participate in the approval-family
/// outcome link, and the single application type that participates in the
/// discontinuance family. See component design §4.8.
pub const APPROVAL_LINK_TYPES: &[&str] = &[
    "RENEWAL",
    "NEW APPLICATION",
    "ASSUMPTION",
    "ADDED/CHANGE OF CLASS",
    "CHANGE OF CORPORATE OFFICER",
    "CHANGE OF LOCATION",
    "RESUME BUSINESS",
    "IN LIEU",
];

pub const DISCONTINUANCE_APPLICATION_TYPE: &str = "DISC. LIQUOR SALES";
pub const DISCONTINUED_OUTCOME_APPLICATION_TYPE: &str = "DISCONTINUED";

/// Maximum number of days an outcome date may precede or follow the
/// notification date and still be considered a candidate match.
pub const DATE_TOLERANCE_DAYS: i64 = 7;

/// Linkable records older than this with no match are `unknown` rather
/// than `pending`.
pub const PENDING_CUTOFF_DAYS: i64 = 180;

/// After this date the upstream stopped publishing `NEW APPLICATION`
/// approvals; see the "data gap" design note in §9.
pub fn data_gap_cutoff() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, 12).expect("valid constant date")
}

/// A single raw record as emitted by the parser: consistent keys across
/// every record variant (ASSUMPTION, CHANGE OF LOCATION, ordinary), with
/// absent fields represented as `None` rather than omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub section: Option<Section>,
    pub record_date: String,
    pub business_name: String,
    pub previous_business_name: Option<String>,
    pub applicants: String,
    pub previous_applicants: Option<String>,
    pub license_type: String,
    pub application_type: String,
    pub license_number: String,
    pub contact_phone: Option<String>,
    pub business_location: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub previous_business_location: Option<String>,
    pub previous_city: Option<String>,
    pub previous_state: Option<String>,
    pub previous_zip_code: Option<String>,
    pub scraped_at: String,
}

impl Default for RawRecord {
    fn default() -> Self {
        RawRecord {
            section: None,
            record_date: String::new(),
            business_name: String::new(),
            previous_business_name: None,
            applicants: String::new(),
            previous_applicants: None,
            license_type: String::new(),
            application_type: String::new(),
            license_number: String::new(),
            contact_phone: None,
            business_location: String::new(),
            city: String::new(),
            state: "WA".to_string(),
            zip_code: String::new(),
            previous_business_location: None,
            previous_city: None,
            previous_state: None,
            previous_zip_code: None,
            scraped_at: String::new(),
        }
    }
}

impl RawRecord {
    /// A record is valid iff section, a well-formed record_date,
    /// license_number, and application_type are all present (§4.1).
    pub fn is_valid(&self) -> bool {
        self.section.is_some()
            && NaiveDate::parse_from_str(&self.record_date, "%Y-%m-%d").is_ok()
            && !self.license_number.trim().is_empty()
            && !self.application_type.trim().is_empty()
    }

    /// The natural key tuple used for deduplication everywhere in the
    /// system: `(section, record_date, license_number, application_type)`.
    pub fn natural_key(&self) -> Option<(Section, String, String, String)> {
        self.section.map(|s| {
            (
                s,
                self.record_date.clone(),
                self.license_number.clone(),
                self.application_type.clone(),
            )
        })
    }
}

/// Result of the external address-validation collaborator (§6).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StandardizedAddress {
    pub address_line_1: String,
    pub address_line_2: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

/// Errors that can arise converting between a stored string and one of
/// the domain enums above — the single boundary conversion the design
/// notes call for (§9, "Sum types over string enums").
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("unrecognized {kind} value: {value:?}")]
    UnrecognizedVariant { kind: &'static str, value: String },
}

/// Parse a stored snake_case string into a domain enum, wrapping the
/// underlying `strum::ParseError` in a [`DomainError`] that names which
/// domain the bad value came from.
pub fn parse_enum<T: FromStr>(kind: &'static str, value: &str) -> Result<T, DomainError> {
    T::from_str(value).map_err(|_| DomainError::UnrecognizedVariant {
        kind,
        value: value.to_string(),
    })
}

impl fmt::Display for RawRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{}/#{}",
            self.section, self.record_date, self.license_number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_round_trips_through_snake_case() {
        assert_eq!(Section::NewApplication.to_string(), "new_application");
        assert_eq!(
            parse_enum::<Section>("section", "new_application").unwrap(),
            Section::NewApplication
        );
    }

    #[test]
    fn unrecognized_section_is_an_error() {
        assert!(parse_enum::<Section>("section", "bogus").is_err());
    }

    #[test]
    fn raw_record_requires_date_license_and_application_type() {
        let mut r = RawRecord {
            section: Some(Section::NewApplication),
            record_date: "2025-06-10".into(),
            license_number: "415678".into(),
            application_type: "ASSUMPTION".into(),
            ..Default::default()
        };
        assert!(r.is_valid());
        r.license_number.clear();
        assert!(!r.is_valid());
    }
}
