use crate::Error;
use models::{BiblioMetadata, Identifiers};
use std::path::Path;

/// Which identifier a plain list file carries, one per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Doi,
    Pmid,
    Pmcid,
}

/// One raw input row, before deduplication. CORD-19 rows also carry the
/// bibliographic fields of the CSV as seed metadata.
#[derive(Debug, Clone, Default)]
pub struct InputRow {
    pub identifiers: Identifiers,
    /// True when the row came from a CORD-19 metadata table, which enables
    /// the explicit cord_id dedup pass.
    pub from_cord19: bool,
    pub seed_metadata: Option<BiblioMetadata>,
}

/// Read a one-identifier-per-line input file. Blank lines and `#` comments
/// are tolerated.
pub fn read_identifier_list(path: &Path, kind: InputKind) -> Result<Vec<InputRow>, Error> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_owned(),
        source,
    })?;

    let mut rows = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut identifiers = Identifiers::default();
        match kind {
            InputKind::Doi => identifiers.doi = Some(line.to_string()),
            InputKind::Pmid => identifiers.pmid = Some(line.to_string()),
            InputKind::Pmcid => identifiers.pmcid = Some(line.to_string()),
        }
        rows.push(InputRow {
            identifiers,
            from_cord19: false,
            seed_metadata: None,
        });
    }

    if rows.is_empty() {
        return Err(Error::Empty {
            path: path.to_owned(),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_doi_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write as _;
        writeln!(file, "10.1097/TXD.0000000000001010").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "# a comment").unwrap();
        writeln!(file, "  10.1/b  ").unwrap();

        let rows = read_identifier_list(file.path(), InputKind::Doi).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].identifiers.doi.as_deref(),
            Some("10.1097/TXD.0000000000001010")
        );
        assert_eq!(rows[1].identifiers.doi.as_deref(), Some("10.1/b"));
    }

    #[test]
    fn test_empty_list_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = read_identifier_list(file.path(), InputKind::Pmid);
        assert!(matches!(err, Err(Error::Empty { .. })));
    }
}
