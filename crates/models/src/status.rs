use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of the per-Entry pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Metadata,
    Pdf,
    Jats,
    TeiPdf,
    TeiJats,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Metadata,
        Stage::Pdf,
        Stage::Jats,
        Stage::TeiPdf,
        Stage::TeiJats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Metadata => "metadata",
            Stage::Pdf => "pdf",
            Stage::Jats => "jats",
            Stage::TeiPdf => "tei_pdf",
            Stage::TeiJats => "tei_jats",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage failed. Stored verbatim in the map file, so renames are
/// breaking changes for existing repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No identifier yielded a metadata record.
    Unresolved,
    /// Enrichment succeeded but produced no candidate URL.
    NoOaUrl,
    /// No URL or index entry for this artifact.
    NoUrl,
    /// Every candidate URL was tried and none produced a valid artifact.
    AllUrlsFailed,
    HttpError,
    Timeout,
    /// The response was not the artifact it claimed to be.
    InvalidContent,
    TooLarge,
    StructuringFailed,
}

impl FailureReason {
    /// Retryable failures are re-attempted up to the per-stage retry cap;
    /// everything else is terminal for the stage.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureReason::HttpError | FailureReason::Timeout)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::Unresolved => "unresolved",
            FailureReason::NoOaUrl => "no_oa_url",
            FailureReason::NoUrl => "no_url",
            FailureReason::AllUrlsFailed => "all_urls_failed",
            FailureReason::HttpError => "http_error",
            FailureReason::Timeout => "timeout",
            FailureReason::InvalidContent => "invalid_content",
            FailureReason::TooLarge => "too_large",
            FailureReason::StructuringFailed => "structuring_failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum StageStatus {
    #[default]
    Pending,
    InProgress,
    Success {
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        has_warnings: bool,
    },
    Failed {
        reason: FailureReason,
    },
}

impl StageStatus {
    pub fn success() -> Self {
        StageStatus::Success {
            has_warnings: false,
        }
    }

    pub fn failed(reason: FailureReason) -> Self {
        StageStatus::Failed { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Success { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageStatus::Failed { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, StageStatus::Pending)
    }
}

/// Status of every stage of one Entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StageStatuses {
    #[serde(default)]
    pub metadata: StageStatus,
    #[serde(default)]
    pub pdf: StageStatus,
    #[serde(default)]
    pub jats: StageStatus,
    #[serde(default)]
    pub tei_pdf: StageStatus,
    #[serde(default)]
    pub tei_jats: StageStatus,
}

impl StageStatuses {
    pub fn get(&self, stage: Stage) -> &StageStatus {
        match stage {
            Stage::Metadata => &self.metadata,
            Stage::Pdf => &self.pdf,
            Stage::Jats => &self.jats,
            Stage::TeiPdf => &self.tei_pdf,
            Stage::TeiJats => &self.tei_jats,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> &mut StageStatus {
        match stage {
            Stage::Metadata => &mut self.metadata,
            Stage::Pdf => &mut self.pdf,
            Stage::Jats => &mut self.jats,
            Stage::TeiPdf => &mut self.tei_pdf,
            Stage::TeiJats => &mut self.tei_jats,
        }
    }

    pub fn set(&mut self, stage: Stage, status: StageStatus) {
        *self.get_mut(stage) = status;
    }

    /// True when any stage failed.
    pub fn any_failed(&self) -> bool {
        Stage::ALL.iter().any(|s| self.get(*s).is_failed())
    }

    /// Demote InProgress stages to Pending. Applied when loading the map
    /// file: a stage that was in flight when the process died must be
    /// re-executed from scratch.
    pub fn demote_in_progress(&mut self) -> bool {
        let mut changed = false;
        for stage in Stage::ALL {
            let status = self.get_mut(stage);
            if matches!(status, StageStatus::InProgress) {
                *status = StageStatus::Pending;
                changed = true;
            }
        }
        changed
    }
}

/// Per-stage retry counters, preserved across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttemptCounts {
    #[serde(default)]
    pub metadata: u32,
    #[serde(default)]
    pub pdf: u32,
    #[serde(default)]
    pub jats: u32,
    #[serde(default)]
    pub tei_pdf: u32,
    #[serde(default)]
    pub tei_jats: u32,
}

impl AttemptCounts {
    pub fn get(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Metadata => self.metadata,
            Stage::Pdf => self.pdf,
            Stage::Jats => self.jats,
            Stage::TeiPdf => self.tei_pdf,
            Stage::TeiJats => self.tei_jats,
        }
    }

    pub fn bump(&mut self, stage: Stage) {
        self.add(stage, 1);
    }

    pub fn add(&mut self, stage: Stage, count: u32) {
        let slot = match stage {
            Stage::Metadata => &mut self.metadata,
            Stage::Pdf => &mut self.pdf,
            Stage::Jats => &mut self.jats,
            Stage::TeiPdf => &mut self.tei_pdf,
            Stage::TeiJats => &mut self.tei_jats,
        };
        *slot += count;
    }

    pub fn reset(&mut self, stage: Stage) {
        let slot = match stage {
            Stage::Metadata => &mut self.metadata,
            Stage::Pdf => &mut self.pdf,
            Stage::Jats => &mut self.jats,
            Stage::TeiPdf => &mut self.tei_pdf,
            Stage::TeiJats => &mut self.tei_jats,
        };
        *slot = 0;
    }
}
