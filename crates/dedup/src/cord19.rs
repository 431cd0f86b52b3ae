use crate::{Error, InputRow};
use models::{Author, BiblioMetadata, Identifiers};
use std::collections::HashMap;
use std::path::Path;

/// Header-driven view over a CORD-19 metadata CSV. The releases vary in
/// which columns they carry and in what order; the map is built from the
/// header once and accessors return None for anything missing.
struct ColumnMap(HashMap<String, usize>);

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        Self(
            headers
                .iter()
                .enumerate()
                .map(|(index, name)| (name.trim().to_string(), index))
                .collect(),
        )
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, column: &str) -> Option<&'r str> {
        let value = record.get(*self.0.get(column)?)?.trim();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

/// Read a CORD-19 metadata CSV into raw input rows. Rows carrying neither
/// an identifier nor a title are malformed input: skipped with a warning,
/// not failed.
pub fn read_cord19_csv(path: &Path) -> Result<Vec<InputRow>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|source| Error::Csv {
            path: path.to_owned(),
            source,
        })?;

    let columns = ColumnMap::from_headers(reader.headers().map_err(|source| Error::Csv {
        path: path.to_owned(),
        source,
    })?);

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record.map_err(|source| Error::Csv {
            path: path.to_owned(),
            source,
        })?;

        let doi = columns.get(&record, "doi");
        let identifiers = Identifiers {
            doi: doi.map(str::to_string),
            pmid: columns.get(&record, "pubmed_id").map(str::to_string),
            pmcid: columns.get(&record, "pmcid").map(str::to_string),
            // Elsevier S-style DOIs embed the PII keying the publisher
            // PDF mirror.
            pii: doi.and_then(crate::pii_from_doi),
            cord_id: columns.get(&record, "cord_uid").map(str::to_string),
        };
        let title = columns.get(&record, "title");

        if identifiers.is_empty() && title.is_none() {
            skipped += 1;
            tracing::warn!(line = rows.len() + skipped + 1, "skipping row with no identifier or title");
            continue;
        }

        let seed_metadata = Some(BiblioMetadata {
            title: title.map(str::to_string),
            authors: columns
                .get(&record, "authors")
                .map(parse_authors)
                .unwrap_or_default(),
            journal: columns.get(&record, "journal").map(str::to_string),
            publisher: None,
            year: columns
                .get(&record, "publish_time")
                .and_then(crate::year_from_publish_time),
            license: columns.get(&record, "license").map(str::to_string),
            abstract_text: columns.get(&record, "abstract").map(str::to_string),
            oa_url: None,
            raw: None,
        });

        rows.push(InputRow {
            identifiers,
            from_cord19: true,
            seed_metadata,
        });
    }

    if rows.is_empty() {
        return Err(Error::Empty {
            path: path.to_owned(),
        });
    }
    Ok(rows)
}

fn parse_authors(cell: &str) -> Vec<Author> {
    cell.split(';')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| match name.split_once(',') {
            Some((last, first)) => Author {
                first_name: Some(first.trim().to_string()).filter(|s| !s.is_empty()),
                last_name: Some(last.trim().to_string()).filter(|s| !s.is_empty()),
                full_name: name.to_string(),
            },
            None => Author {
                first_name: None,
                last_name: None,
                full_name: name.to_string(),
            },
        })
        .collect()
}
