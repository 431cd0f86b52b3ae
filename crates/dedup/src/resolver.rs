use crate::{generate_id, normalize_title, InputRow};
use models::{BiblioMetadata, Entry, MapRecord};
use std::collections::HashMap;

/// One distinct logical article produced by the cascade.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub entry: Entry,
    /// False when the entry was already present in the state store.
    pub is_new: bool,
    /// Bibliographic fields carried by the input row itself (CORD-19),
    /// used to fill enrichment gaps.
    pub seed_metadata: Option<BiblioMetadata>,
}

#[derive(Debug)]
struct Draft {
    entry: Entry,
    is_new: bool,
    seed: Option<BiblioMetadata>,
}

/// (normalized title, first author surname, year) — the article-level key.
type ArticleKey = (String, String, Option<i32>);

/// Collapses the raw input stream into distinct Entries.
///
/// The cascade: an explicit cord_id match wins first, then DOI
/// (case-insensitive), then PMID, then PMCID, and last the article-level
/// (title, author, year) key. When two rows both carry DOIs that disagree,
/// the article-level key never merges them.
#[derive(Default)]
pub struct Deduplicator {
    drafts: Vec<Draft>,
    by_cord: HashMap<String, usize>,
    by_doi: HashMap<String, usize>,
    by_pmid: HashMap<String, usize>,
    by_pmcid: HashMap<String, usize>,
    by_article: HashMap<ArticleKey, usize>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the key maps with entries from a previous run, so that re-fed
    /// input rows resolve to their existing Entry instead of a new one.
    pub fn preload(&mut self, records: Vec<MapRecord>) {
        for record in records {
            let index = self.drafts.len();
            let entry = record.into_entry();
            self.register_identifier_keys(&entry, index);
            self.drafts.push(Draft {
                entry,
                is_new: false,
                seed: None,
            });
        }
    }

    pub fn push(&mut self, row: InputRow) {
        let article_key = self.article_key_of(&row);

        if let Some(index) = self.find_match(&row, article_key.as_ref()) {
            self.merge_into(index, row);
            let merged = self.drafts[index].entry.clone();
            self.register_identifier_keys(&merged, index);
            if let Some(key) = article_key {
                self.by_article.entry(key).or_insert(index);
            }
            return;
        }

        let id = match (&row.identifiers.cord_id, row.from_cord19) {
            (Some(cord_id), true) => cord_id.clone(),
            _ => generate_id(),
        };
        let index = self.drafts.len();
        let entry = Entry::new(id, row.identifiers);
        self.register_identifier_keys(&entry, index);
        if let Some(key) = article_key {
            self.by_article.entry(key).or_insert(index);
        }
        self.drafts.push(Draft {
            entry,
            is_new: true,
            seed: row.seed_metadata,
        });
    }

    pub fn finish(self) -> Vec<ResolvedEntry> {
        self.drafts
            .into_iter()
            .map(|draft| ResolvedEntry {
                entry: draft.entry,
                is_new: draft.is_new,
                seed_metadata: draft.seed,
            })
            .collect()
    }

    fn article_key_of(&self, row: &InputRow) -> Option<ArticleKey> {
        let seed = row.seed_metadata.as_ref()?;
        let title = normalize_title(seed.title.as_deref()?)?;
        let author = seed.first_author_surname()?;
        Some((title, author, seed.year))
    }

    fn find_match(&self, row: &InputRow, article_key: Option<&ArticleKey>) -> Option<usize> {
        if row.from_cord19 {
            if let Some(index) = row
                .identifiers
                .cord_id
                .as_ref()
                .and_then(|id| self.by_cord.get(id))
            {
                return Some(*index);
            }
        }
        if let Some(index) = row
            .identifiers
            .normalized_doi()
            .and_then(|doi| self.by_doi.get(&doi))
        {
            return Some(*index);
        }
        if let Some(index) = row
            .identifiers
            .pmid
            .as_ref()
            .and_then(|pmid| self.by_pmid.get(pmid.trim()))
        {
            return Some(*index);
        }
        if let Some(index) = row
            .identifiers
            .normalized_pmcid()
            .and_then(|pmcid| self.by_pmcid.get(&pmcid))
        {
            return Some(*index);
        }

        let index = *self.by_article.get(article_key?)?;
        // Conflicting explicit identifiers veto an article-level merge.
        let existing = &self.drafts[index].entry.identifiers;
        let row_doi = row.identifiers.normalized_doi();
        if let (Some(a), Some(b)) = (row_doi, existing.normalized_doi()) {
            if a != b {
                return None;
            }
        }
        Some(index)
    }

    fn merge_into(&mut self, index: usize, row: InputRow) {
        let draft = &mut self.drafts[index];

        // The row with the richest identifier set provides the base record;
        // the other fills in whatever it is missing. Existing entries keep
        // their identifiers as the base unconditionally: their id and keys
        // are already durable.
        if draft.is_new && row.identifiers.richness() > draft.entry.identifiers.richness() {
            let previous = std::mem::replace(&mut draft.entry.identifiers, row.identifiers);
            draft.entry.identifiers.merge_from(&previous);
        } else {
            draft.entry.identifiers.merge_from(&row.identifiers);
        }

        match (&mut draft.seed, row.seed_metadata) {
            (Some(existing), Some(incoming)) => existing.fill_from(incoming),
            (slot @ None, Some(incoming)) => *slot = Some(incoming),
            _ => {}
        }
    }

    fn register_identifier_keys(&mut self, entry: &Entry, index: usize) {
        if let Some(cord_id) = &entry.identifiers.cord_id {
            self.by_cord.entry(cord_id.clone()).or_insert(index);
        }
        if let Some(doi) = entry.identifiers.normalized_doi() {
            self.by_doi.entry(doi).or_insert(index);
        }
        if let Some(pmid) = &entry.identifiers.pmid {
            self.by_pmid.entry(pmid.trim().to_string()).or_insert(index);
        }
        if let Some(pmcid) = entry.identifiers.normalized_pmcid() {
            self.by_pmcid.entry(pmcid).or_insert(index);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{Author, Identifiers};
    use pretty_assertions::assert_eq;

    fn doi_row(doi: &str) -> InputRow {
        InputRow {
            identifiers: Identifiers {
                doi: Some(doi.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn cord_row(cord_id: &str, doi: Option<&str>, title: Option<&str>) -> InputRow {
        InputRow {
            identifiers: Identifiers {
                cord_id: Some(cord_id.to_string()),
                doi: doi.map(str::to_string),
                ..Default::default()
            },
            from_cord19: true,
            seed_metadata: title.map(|t| BiblioMetadata {
                title: Some(t.to_string()),
                authors: vec![Author {
                    last_name: Some("Ho".to_string()),
                    full_name: "Ho, Quan".to_string(),
                    ..Default::default()
                }],
                year: Some(2020),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_doi_case_insensitive_collapse() {
        let mut dedup = Deduplicator::new();
        dedup.push(doi_row("10.1097/TXD.0000000000001010"));
        dedup.push(doi_row("10.1097/txd.0000000000001010"));
        let resolved = dedup.finish();
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn test_distinct_dois_stay_distinct() {
        let mut dedup = Deduplicator::new();
        dedup.push(doi_row("10.1/a"));
        dedup.push(doi_row("10.1/b"));
        assert_eq!(dedup.finish().len(), 2);
    }

    #[test]
    fn test_cord_explicit_duplicate() {
        let mut dedup = Deduplicator::new();
        dedup.push(cord_row("fq4xq00d", Some("10.1/a"), Some("A title")));
        dedup.push(cord_row("fq4xq00d", Some("10.1/a"), Some("A title")));
        let resolved = dedup.finish();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].entry.id, "fq4xq00d");
        assert!(resolved[0].is_new);
    }

    #[test]
    fn test_cord_doi_collision_across_cord_ids() {
        // Two distinct cord ids sharing a DOI are one logical article.
        let mut dedup = Deduplicator::new();
        dedup.push(cord_row("aaaa0001", Some("10.1/same"), Some("A title")));
        dedup.push(cord_row("bbbb0002", Some("10.1/same"), Some("Another title")));
        let resolved = dedup.finish();
        assert_eq!(resolved.len(), 1);
        // First occurrence provided the id.
        assert_eq!(resolved[0].entry.id, "aaaa0001");
    }

    #[test]
    fn test_article_level_merge_prefers_richer_identifiers() {
        let mut dedup = Deduplicator::new();
        dedup.push(cord_row("aaaa0001", None, Some("Same: Title!")));
        let mut richer = cord_row("bbbb0002", None, Some("same title"));
        richer.identifiers.pmcid = Some("PMC7266364".to_string());
        dedup.push(richer);

        let resolved = dedup.finish();
        assert_eq!(resolved.len(), 1);
        let ids = &resolved[0].entry.identifiers;
        assert_eq!(ids.pmcid.as_deref(), Some("PMC7266364"));
        // The richer row's fields form the base of the union.
        assert_eq!(ids.cord_id.as_deref(), Some("bbbb0002"));
        // The assigned id never changes once created.
        assert_eq!(resolved[0].entry.id, "aaaa0001");
    }

    #[test]
    fn test_conflicting_dois_veto_title_merge() {
        let mut dedup = Deduplicator::new();
        dedup.push(cord_row("aaaa0001", Some("10.1/a"), Some("Shared title")));
        dedup.push(cord_row("bbbb0002", Some("10.1/b"), Some("Shared title")));
        assert_eq!(dedup.finish().len(), 2);
    }

    #[test]
    fn test_preload_resolves_to_existing() {
        let mut dedup = Deduplicator::new();
        let existing = Entry::new(
            "fq4xq00d".to_string(),
            Identifiers {
                cord_id: Some("fq4xq00d".to_string()),
                ..Default::default()
            },
        );
        dedup.preload(vec![existing.to_map_record()]);
        dedup.push(cord_row("fq4xq00d", None, None));
        dedup.push(cord_row("new00001", None, None));

        let resolved = dedup.finish();
        assert_eq!(resolved.len(), 2);
        let existing = resolved.iter().find(|r| r.entry.id == "fq4xq00d").unwrap();
        assert!(!existing.is_new);
        let added = resolved.iter().find(|r| r.entry.id == "new00001").unwrap();
        assert!(added.is_new);
    }

    #[test]
    fn test_pmid_and_pmcid_cascade() {
        let mut dedup = Deduplicator::new();
        let mut row = InputRow::default();
        row.identifiers.pmid = Some("123".to_string());
        dedup.push(row);

        let mut row = InputRow::default();
        row.identifiers.pmid = Some("123".to_string());
        row.identifiers.pmcid = Some("PMC9".to_string());
        dedup.push(row);

        // Bare-digit and prefixed PMC ids are the same key.
        let mut row = InputRow::default();
        row.identifiers.pmcid = Some("9".to_string());
        dedup.push(row);

        assert_eq!(dedup.finish().len(), 1);
    }
}
