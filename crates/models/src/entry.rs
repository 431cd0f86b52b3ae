use crate::{AttemptCounts, BiblioMetadata, StageStatuses};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The external identifiers of one logical article. Any subset may be known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Identifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmcid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cord_id: Option<String>,
}

impl Identifiers {
    pub fn is_empty(&self) -> bool {
        self.doi.is_none()
            && self.pmid.is_none()
            && self.pmcid.is_none()
            && self.pii.is_none()
            && self.cord_id.is_none()
    }

    /// DOIs are case-insensitive; compare and key them lowercased.
    pub fn normalized_doi(&self) -> Option<String> {
        self.doi
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    /// PMC identifiers appear both as "PMC1234567" and as the bare digits.
    /// The canonical form carries the prefix.
    pub fn normalized_pmcid(&self) -> Option<String> {
        let raw = self.pmcid.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        if raw.starts_with("PMC") {
            Some(raw.to_string())
        } else {
            Some(format!("PMC{raw}"))
        }
    }

    /// Rank used when merging duplicate rows: a richer identifier set wins.
    /// PMC outranks DOI outranks PMID outranks title-only.
    pub fn richness(&self) -> u8 {
        if self.pmcid.is_some() {
            3
        } else if self.doi.is_some() {
            2
        } else if self.pmid.is_some() {
            1
        } else {
            0
        }
    }

    /// Union the fields of `other` into self, keeping existing values.
    pub fn merge_from(&mut self, other: &Identifiers) {
        fn fill(slot: &mut Option<String>, other: &Option<String>) {
            if slot.is_none() {
                *slot = other.clone();
            }
        }
        fill(&mut self.doi, &other.doi);
        fill(&mut self.pmid, &other.pmid);
        fill(&mut self.pmcid, &other.pmcid);
        fill(&mut self.pii, &other.pii);
        fill(&mut self.cord_id, &other.cord_id);
    }
}

/// Where a candidate download URL came from. Ordering of candidates is
/// decided at assembly time; the source tag is kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlSource {
    PmcOa,
    OaLocator,
    Aggregator,
    DoiRegistry,
    PublisherMirror,
    LegacyMirror,
}

impl fmt::Display for UrlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UrlSource::PmcOa => "pmc_oa",
            UrlSource::OaLocator => "oa_locator",
            UrlSource::Aggregator => "aggregator",
            UrlSource::DoiRegistry => "doi_registry",
            UrlSource::PublisherMirror => "publisher_mirror",
            UrlSource::LegacyMirror => "legacy_mirror",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateUrl {
    pub url: String,
    pub source: UrlSource,
}

/// Presence flags for the artifacts of one Entry. Each flag is set only
/// after the corresponding file is durably stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ArtifactSet {
    #[serde(default)]
    pub pdf: bool,
    #[serde(default)]
    pub jats: bool,
    #[serde(default)]
    pub tei_from_pdf: bool,
    #[serde(default)]
    pub tei_from_jats: bool,
    #[serde(default)]
    pub ref_annotations: bool,
    #[serde(default)]
    pub thumbnails: bool,
}

impl ArtifactSet {
    pub fn has_any_tei(&self) -> bool {
        self.tei_from_pdf || self.tei_from_jats
    }
}

/// One logical article: the unit of orchestration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub identifiers: Identifiers,
    /// Populated by enrichment; persisted in the per-entry `<id>.json`
    /// rather than the map file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BiblioMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidate_urls: Vec<CandidateUrl>,
    /// Whether enrichment found an Open-Access URL; surfaced in the
    /// completeness report.
    #[serde(default)]
    pub has_oa_url: bool,
    #[serde(default)]
    pub artifacts: ArtifactSet,
    #[serde(default)]
    pub status: StageStatuses,
    #[serde(default)]
    pub attempts: AttemptCounts,
}

impl Entry {
    pub fn new(id: String, identifiers: Identifiers) -> Self {
        Self {
            id,
            identifiers,
            metadata: None,
            candidate_urls: Vec::new(),
            has_oa_url: false,
            artifacts: ArtifactSet::default(),
            status: StageStatuses::default(),
            attempts: AttemptCounts::default(),
        }
    }

    /// The map-file projection of this Entry.
    pub fn to_map_record(&self) -> MapRecord {
        MapRecord {
            id: self.id.clone(),
            identifiers: self.identifiers.clone(),
            has_oa_url: self.has_oa_url,
            status: self.status.clone(),
            artifacts: self.artifacts,
            attempts: self.attempts,
        }
    }
}

/// One line of `map.jsonl`. The metadata body and candidate URLs live in the
/// per-entry `<id>.json` artifact; the map carries only what resumption and
/// reporting need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRecord {
    pub id: String,
    pub identifiers: Identifiers,
    #[serde(default)]
    pub has_oa_url: bool,
    #[serde(default)]
    pub status: StageStatuses,
    #[serde(default)]
    pub artifacts: ArtifactSet,
    #[serde(default)]
    pub attempts: AttemptCounts,
}

impl MapRecord {
    pub fn into_entry(self) -> Entry {
        Entry {
            id: self.id,
            identifiers: self.identifiers,
            metadata: None,
            candidate_urls: Vec::new(),
            has_oa_url: self.has_oa_url,
            artifacts: self.artifacts,
            status: self.status,
            attempts: self.attempts,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_doi_normalization() {
        for (raw, expect) in [
            ("10.1097/TXD.0000000000001010", "10.1097/txd.0000000000001010"),
            (" 10.1/A ", "10.1/a"),
        ] {
            let ids = Identifiers {
                doi: Some(raw.to_string()),
                ..Default::default()
            };
            assert_eq!(ids.normalized_doi().unwrap(), expect);
        }
        assert_eq!(Identifiers::default().normalized_doi(), None);
    }

    #[test]
    fn test_pmcid_normalization() {
        for (raw, expect) in [("PMC7266364", "PMC7266364"), ("7266364", "PMC7266364")] {
            let ids = Identifiers {
                pmcid: Some(raw.to_string()),
                ..Default::default()
            };
            assert_eq!(ids.normalized_pmcid().unwrap(), expect);
        }
    }

    #[test]
    fn test_merge_keeps_existing() {
        let mut a = Identifiers {
            doi: Some("10.1/a".to_string()),
            ..Default::default()
        };
        let b = Identifiers {
            doi: Some("10.1/b".to_string()),
            pmid: Some("123".to_string()),
            ..Default::default()
        };
        a.merge_from(&b);
        assert_eq!(a.doi.as_deref(), Some("10.1/a"));
        assert_eq!(a.pmid.as_deref(), Some("123"));
    }

    #[test]
    fn test_richness_order() {
        let pmc = Identifiers {
            pmcid: Some("PMC1".to_string()),
            ..Default::default()
        };
        let doi = Identifiers {
            doi: Some("10.1/x".to_string()),
            ..Default::default()
        };
        let pmid = Identifiers {
            pmid: Some("1".to_string()),
            ..Default::default()
        };
        let none = Identifiers::default();
        assert!(pmc.richness() > doi.richness());
        assert!(doi.richness() > pmid.richness());
        assert!(pmid.richness() > none.richness());
    }

    #[test]
    fn test_map_record_round_trip() {
        let mut entry = Entry::new("abc123".to_string(), Identifiers::default());
        entry.attempts.bump(crate::Stage::Metadata);
        let record = entry.to_map_record();
        let json = serde_json::to_string(&record).unwrap();
        let back: MapRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.into_entry().attempts.metadata, 1);
    }
}
