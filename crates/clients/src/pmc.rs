use crate::Failure;
use models::FailureReason;
use std::collections::HashMap;
use std::path::Path;

/// Base of the PMC Open Access file server; archive paths from the file
/// list are relative to it.
pub const PMC_FILE_SERVER: &str = "https://ftp.ncbi.nlm.nih.gov/pub/pmc";

/// In-memory index of the PMC OA file list: PMCID -> archive path
/// (`oa_package/aa/bb/PMCnnnnn.tar.gz`). Loaded once at startup from a
/// local copy of `oa_file_list.csv`.
pub struct PmcIndex {
    by_pmcid: HashMap<String, String>,
}

impl PmcIndex {
    /// Load the file list. Columns are located by header name (`File`,
    /// `Accession ID`); the list's remaining columns are ignored.
    pub fn load(path: &Path) -> Result<Self, Failure> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|err| {
                Failure::terminal(
                    FailureReason::InvalidContent,
                    format!("pmc oa file list {path:?}: {err}"),
                )
            })?;

        let headers = reader.headers().map_err(|err| {
            Failure::terminal(
                FailureReason::InvalidContent,
                format!("pmc oa file list {path:?}: {err}"),
            )
        })?;
        let file_column = headers.iter().position(|h| h.trim() == "File");
        let id_column = headers.iter().position(|h| h.trim() == "Accession ID");
        let (file_column, id_column) = match (file_column, id_column) {
            (Some(f), Some(i)) => (f, i),
            _ => {
                return Err(Failure::terminal(
                    FailureReason::InvalidContent,
                    format!("pmc oa file list {path:?} lacks File/Accession ID columns"),
                ))
            }
        };

        let mut by_pmcid = HashMap::new();
        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(?err, "skipping malformed pmc oa file list row");
                    continue;
                }
            };
            let (Some(file), Some(pmcid)) = (record.get(file_column), record.get(id_column))
            else {
                continue;
            };
            let (file, pmcid) = (file.trim(), pmcid.trim());
            if file.is_empty() || pmcid.is_empty() {
                continue;
            }
            by_pmcid.insert(pmcid.to_string(), file.to_string());
        }

        tracing::info!(entries = by_pmcid.len(), "loaded pmc oa index");
        Ok(Self { by_pmcid })
    }

    pub fn len(&self) -> usize {
        self.by_pmcid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pmcid.is_empty()
    }

    /// Archive URL for a PMCID, when the OA list has it.
    pub fn archive_url(&self, pmcid: &str) -> Option<String> {
        let file = self.by_pmcid.get(pmcid)?;
        Some(format!("{PMC_FILE_SERVER}/{file}"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_load_and_lookup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "File,Article Citation,Accession ID,Last Updated (YYYY-MM-DD HH:MM:SS),PMID,License\n\
             oa_package/08/e0/PMC13900.tar.gz,Some citation,PMC13900,2020-01-01 00:00:00,11056678,NO-CC CODE\n\
             oa_package/b0/ac/PMC7266364.tar.gz,Other citation,PMC7266364,2020-06-01 00:00:00,,CC BY\n"
        )
        .unwrap();

        let index = PmcIndex::load(file.path()).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.archive_url("PMC7266364").unwrap(),
            "https://ftp.ncbi.nlm.nih.gov/pub/pmc/oa_package/b0/ac/PMC7266364.tar.gz"
        );
        assert_eq!(index.archive_url("PMC1"), None);
    }

    #[test]
    fn test_missing_columns_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "a,b\n1,2\n").unwrap();
        assert!(PmcIndex::load(file.path()).is_err());
    }
}
