//! The completeness report: one read-only pass over the state store.

use models::{FailureReason, MapRecord, Stage, StageStatus};
use serde::Serialize;
use std::fmt;

/// Counts over every entry in the map file. Serializes as the JSON summary;
/// `Display` renders the plain-text report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Report {
    /// Distinct entries after deduplication.
    pub total_entries: usize,
    pub with_oa_url: usize,
    pub with_pdf: usize,
    pub with_jats: usize,
    pub with_tei_from_pdf: usize,
    pub with_tei_from_jats: usize,
    pub with_any_tei: usize,
    /// Entries with at least one stage in a failed state that was not a
    /// benign "this article has no such artifact" outcome.
    pub with_failed_stages: usize,
}

impl Report {
    /// Whether the run should exit non-zero.
    pub fn has_failures(&self) -> bool {
        self.with_failed_stages > 0
    }
}

/// A stage failure counts against the run unless it only says the artifact
/// does not exist for this article (not in the OA subset, no OA URL).
fn counts_as_failure(status: &StageStatus) -> bool {
    match status {
        StageStatus::Failed { reason } => !matches!(
            reason,
            FailureReason::NoUrl | FailureReason::NoOaUrl
        ),
        _ => false,
    }
}

pub fn build_report(records: &[MapRecord]) -> Report {
    let mut report = Report::default();
    for record in records {
        report.total_entries += 1;
        if record.has_oa_url {
            report.with_oa_url += 1;
        }
        if record.artifacts.pdf {
            report.with_pdf += 1;
        }
        if record.artifacts.jats {
            report.with_jats += 1;
        }
        if record.artifacts.tei_from_pdf {
            report.with_tei_from_pdf += 1;
        }
        if record.artifacts.tei_from_jats {
            report.with_tei_from_jats += 1;
        }
        if record.artifacts.has_any_tei() {
            report.with_any_tei += 1;
        }
        if Stage::ALL
            .iter()
            .any(|stage| counts_as_failure(record.status.get(*stage)))
        {
            report.with_failed_stages += 1;
        }
    }
    report
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "harvest diagnostic")?;
        writeln!(f, "entries (distinct after dedup): {}", self.total_entries)?;
        writeln!(f, "with open-access url:           {}", self.with_oa_url)?;
        writeln!(f, "with pdf:                       {}", self.with_pdf)?;
        writeln!(f, "with jats:                      {}", self.with_jats)?;
        writeln!(f, "with tei from pdf:              {}", self.with_tei_from_pdf)?;
        writeln!(f, "with tei from jats:             {}", self.with_tei_from_jats)?;
        writeln!(f, "with at least one tei:          {}", self.with_any_tei)?;
        writeln!(f, "with failed stages:             {}", self.with_failed_stages)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{Entry, Identifiers};

    fn records() -> Vec<MapRecord> {
        let mut complete = Entry::new("aaaa0001".to_string(), Identifiers::default());
        complete.has_oa_url = true;
        complete.artifacts.pdf = true;
        complete.artifacts.jats = true;
        complete.artifacts.tei_from_pdf = true;
        complete.artifacts.tei_from_jats = true;
        complete.status.metadata = StageStatus::success();
        complete.status.pdf = StageStatus::success();

        let mut pdf_failed = Entry::new("bbbb0002".to_string(), Identifiers::default());
        pdf_failed.has_oa_url = true;
        pdf_failed.status.metadata = StageStatus::success();
        pdf_failed.status.pdf = StageStatus::failed(FailureReason::AllUrlsFailed);

        let mut not_in_oa = Entry::new("cccc0003".to_string(), Identifiers::default());
        not_in_oa.status.metadata = StageStatus::success();
        not_in_oa.status.pdf = StageStatus::failed(FailureReason::NoOaUrl);
        not_in_oa.status.jats = StageStatus::failed(FailureReason::NoUrl);

        vec![
            complete.to_map_record(),
            pdf_failed.to_map_record(),
            not_in_oa.to_map_record(),
        ]
    }

    #[test]
    fn test_counts() {
        let report = build_report(&records());
        assert_eq!(report.total_entries, 3);
        assert_eq!(report.with_oa_url, 2);
        assert_eq!(report.with_pdf, 1);
        assert_eq!(report.with_any_tei, 1);
        // Missing OA artifacts are not failures; the lost PDF fetch is.
        assert_eq!(report.with_failed_stages, 1);
        assert!(report.has_failures());
    }

    #[test]
    fn test_empty_store() {
        let report = build_report(&[]);
        assert_eq!(report.total_entries, 0);
        assert!(!report.has_failures());
    }

    #[test]
    fn test_text_rendering() {
        insta::assert_snapshot!(build_report(&records()).to_string(), @r"
harvest diagnostic
entries (distinct after dedup): 3
with open-access url:           2
with pdf:                       1
with jats:                      1
with tei from pdf:              1
with tei from jats:             1
with at least one tei:          1
with failed stages:             1
");
    }

    #[test]
    fn test_json_summary_shape() {
        let json = serde_json::to_value(build_report(&records())).unwrap();
        assert_eq!(json["total_entries"], 3);
        assert_eq!(json["with_failed_stages"], 1);
    }
}
