//! Presentation formatting (§4.11). Domain modules ([`crate::links`],
//! [`crate::provenance`]) return semantic data; this module adds the
//! visual layer (icons, CSS classes) on top, so a different frontend
//! could reuse the domain layer without this formatting.

use std::collections::HashMap;

use wslcb_model::{ProvenanceRole, SourceType};

use crate::links::OutcomeStatus;
use crate::provenance::RecordSource;

/// Visual styling for one outcome-status variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeStyle {
    pub icon: &'static str,
    pub label: &'static str,
    pub css_bg: &'static str,
    pub css_border: &'static str,
    pub css_text: &'static str,
    pub css_accent: &'static str,
}

/// Outcome status paired with its display styling and a human-readable
/// detail line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedOutcome {
    pub style: OutcomeStyle,
    pub detail: String,
}

pub fn format_outcome(status: &OutcomeStatus) -> FormattedOutcome {
    match status {
        OutcomeStatus::Approved { outcome_date, days_gap, .. } => FormattedOutcome {
            style: OutcomeStyle {
                icon: "\u{2705}",
                label: "Approved",
                css_bg: "bg-green-50",
                css_border: "border-green-200",
                css_text: "text-green-800",
                css_accent: "text-green-600",
            },
            detail: format!(
                "Approved on {outcome_date}{}",
                days_gap_suffix(*days_gap, "after application")
            ),
        },
        OutcomeStatus::Discontinued { outcome_date, days_gap, .. } => FormattedOutcome {
            style: OutcomeStyle {
                icon: "\u{1F6AB}",
                label: "Discontinued",
                css_bg: "bg-red-50",
                css_border: "border-red-200",
                css_text: "text-red-800",
                css_accent: "text-red-600",
            },
            detail: format!(
                "Discontinued on {outcome_date}{}",
                days_gap_suffix(*days_gap, "after filing")
            ),
        },
        OutcomeStatus::DataGap => FormattedOutcome {
            style: OutcomeStyle {
                icon: "\u{1F4C1}",
                label: "Data Unavailable",
                css_bg: "bg-slate-50",
                css_border: "border-slate-200",
                css_text: "text-slate-700",
                css_accent: "text-slate-500",
            },
            detail: "The WSLCB stopped publishing NEW APPLICATION approvals after May 2025 due to a data transfer issue.".to_string(),
        },
        OutcomeStatus::Pending { age_days } => FormattedOutcome {
            style: OutcomeStyle {
                icon: "\u{23F3}",
                label: "Pending",
                css_bg: "bg-amber-50",
                css_border: "border-amber-200",
                css_text: "text-amber-800",
                css_accent: "text-amber-600",
            },
            detail: format!(
                "Filed {age_days} day{} ago. Typical time to approval: 50\u{2013}90 days.",
                if *age_days == 1 { "" } else { "s" }
            ),
        },
        OutcomeStatus::Unknown => FormattedOutcome {
            style: OutcomeStyle {
                icon: "\u{2753}",
                label: "No Outcome Recorded",
                css_bg: "bg-gray-50",
                css_border: "border-gray-200",
                css_text: "text-gray-600",
                css_accent: "text-gray-400",
            },
            detail: "No matching approved or discontinued record was found.".to_string(),
        },
    }
}

fn days_gap_suffix(days_gap: Option<i64>, qualifier: &str) -> String {
    match days_gap {
        Some(d) => {
            let n = d.abs();
            format!(" ({n} day{} {qualifier})", if n == 1 { "" } else { "s" })
        }
        None => String::new(),
    }
}

fn source_type_style(source_type: SourceType) -> (&'static str, &'static str, &'static str, &'static str, &'static str) {
    match source_type {
        SourceType::LiveScrape => ("\u{26A1}", "Live Scrape", "bg-green-50", "text-green-700", "border-green-200"),
        SourceType::CoArchive => ("\u{1F4C1}", "CO Archive", "bg-co-purple-50", "text-co-purple", "border-co-purple-100"),
        SourceType::CoDiffArchive => ("\u{1F4C4}", "CO Diff Archive", "bg-co-purple-50", "text-co-purple", "border-co-purple-100"),
        SourceType::InternetArchive => ("\u{1F3DB}", "Internet Archive", "bg-amber-50", "text-amber-700", "border-amber-200"),
        SourceType::Manual => ("\u{270F}", "Manual", "bg-gray-50", "text-gray-600", "border-gray-200"),
    }
}

/// Per-source-type aggregate within a [`ProvenanceSummary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceGroup {
    pub count: usize,
    pub icon: &'static str,
    pub label: &'static str,
    pub css_bg: &'static str,
    pub css_text: &'static str,
    pub css_border: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProvenanceSummary {
    pub groups: HashMap<SourceType, ProvenanceGroup>,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
    pub repaired: bool,
    pub total: usize,
}

/// Aggregate a record's sources into a display-ready summary (§4.9).
pub fn summarize_provenance(sources: &[RecordSource]) -> ProvenanceSummary {
    let mut summary = ProvenanceSummary {
        total: sources.len(),
        ..Default::default()
    };

    for s in sources {
        let group = summary.groups.entry(s.source_type).or_insert_with(|| {
            let (icon, label, css_bg, css_text, css_border) = source_type_style(s.source_type);
            ProvenanceGroup {
                count: 0,
                icon,
                label,
                css_bg,
                css_text,
                css_border,
            }
        });
        group.count += 1;

        if s.role == ProvenanceRole::Repaired {
            summary.repaired = true;
        }

        if let Some(captured) = &s.captured_at {
            let date = &captured[..captured.len().min(10)];
            let is_later = match summary.last_date.as_deref() {
                Some(d) => date > d,
                None => true,
            };
            if is_later {
                summary.last_date = Some(date.to_string());
            }
            let is_earlier = match summary.first_date.as_deref() {
                Some(d) => date < d,
                None => true,
            };
            if is_earlier {
                summary.first_date = Some(date.to_string());
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_outcome_pending_pluralizes_single_day() {
        let f = format_outcome(&OutcomeStatus::Pending { age_days: 1 });
        assert_eq!(f.detail, "Filed 1 day ago. Typical time to approval: 50\u{2013}90 days.");
    }

    #[test]
    fn summarize_provenance_groups_by_source_type_and_tracks_repair() {
        let sources = vec![
            RecordSource {
                source_type: SourceType::LiveScrape,
                role: ProvenanceRole::FirstSeen,
                captured_at: Some("2025-06-10T00:00:00Z".to_string()),
            },
            RecordSource {
                source_type: SourceType::Manual,
                role: ProvenanceRole::Repaired,
                captured_at: Some("2025-06-12T00:00:00Z".to_string()),
            },
        ];
        let summary = summarize_provenance(&sources);
        assert_eq!(summary.total, 2);
        assert!(summary.repaired);
        assert_eq!(summary.first_date.as_deref(), Some("2025-06-10"));
        assert_eq!(summary.last_date.as_deref(), Some("2025-06-12"));
        assert_eq!(summary.groups.len(), 2);
    }
}
