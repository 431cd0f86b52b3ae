use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Author {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub full_name: String,
}

/// Consolidated bibliographic record for one Entry, assembled from whichever
/// upstream services answered. The raw payload of the canonical source is
/// retained for `--dump`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BiblioMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(
        default,
        rename = "abstract",
        skip_serializing_if = "Option::is_none"
    )]
    pub abstract_text: Option<String>,
    /// Best Open-Access URL for the article PDF, when one is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oa_url: Option<String>,
    /// Raw record from the canonical source, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl BiblioMetadata {
    /// Surname of the first listed author, lowercased; part of the
    /// article-level dedup key.
    pub fn first_author_surname(&self) -> Option<String> {
        let author = self.authors.first()?;
        if let Some(last) = author.last_name.as_deref() {
            return Some(last.to_lowercase());
        }
        // Fall back to the last whitespace-separated token of the full name.
        author
            .full_name
            .split_whitespace()
            .last()
            .map(str::to_lowercase)
    }

    /// Fill holes in self from `other` without displacing existing values.
    pub fn fill_from(&mut self, other: BiblioMetadata) {
        if self.title.is_none() {
            self.title = other.title;
        }
        if self.authors.is_empty() {
            self.authors = other.authors;
        }
        if self.journal.is_none() {
            self.journal = other.journal;
        }
        if self.publisher.is_none() {
            self.publisher = other.publisher;
        }
        if self.year.is_none() {
            self.year = other.year;
        }
        if self.license.is_none() {
            self.license = other.license;
        }
        if self.abstract_text.is_none() {
            self.abstract_text = other.abstract_text;
        }
        if self.oa_url.is_none() {
            self.oa_url = other.oa_url;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_first_author_surname() {
        for (first, last, full, expect) in [
            (None, Some("Ho"), "", Some("ho")),
            (Some("Quan"), Some("Ho"), "Quan Ho", Some("ho")),
            (None, None, "Jane van Dyk", Some("dyk")),
            (None, None, "", None),
        ] {
            let meta = BiblioMetadata {
                authors: vec![Author {
                    first_name: first.map(String::from),
                    last_name: last.map(String::from),
                    full_name: full.to_string(),
                }],
                ..Default::default()
            };
            assert_eq!(meta.first_author_surname().as_deref(), expect);
        }
        assert_eq!(BiblioMetadata::default().first_author_surname(), None);
    }

    #[test]
    fn test_fill_from_keeps_canonical() {
        let mut canonical = BiblioMetadata {
            title: Some("A title".to_string()),
            ..Default::default()
        };
        canonical.fill_from(BiblioMetadata {
            title: Some("Other title".to_string()),
            oa_url: Some("https://example.org/a.pdf".to_string()),
            year: Some(2020),
            ..Default::default()
        });
        assert_eq!(canonical.title.as_deref(), Some("A title"));
        assert_eq!(canonical.oa_url.as_deref(), Some("https://example.org/a.pdf"));
        assert_eq!(canonical.year, Some(2020));
    }
}
