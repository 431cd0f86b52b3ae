use crate::Failure;
use models::FailureReason;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Publisher-provided local PDF mirror (the CORD-19 Elsevier drop): a root
/// directory plus a `map.json` of PII -> relative file path.
pub struct PublisherMirror {
    root: PathBuf,
    by_pii: HashMap<String, String>,
}

impl PublisherMirror {
    pub fn load(root: &Path) -> Result<Self, Failure> {
        let map_path = root.join("map.json");
        let text = std::fs::read_to_string(&map_path).map_err(|err| {
            Failure::terminal(
                FailureReason::InvalidContent,
                format!("publisher mirror map {map_path:?}: {err}"),
            )
        })?;
        let by_pii: HashMap<String, String> = serde_json::from_str(&text).map_err(|err| {
            Failure::terminal(
                FailureReason::InvalidContent,
                format!("publisher mirror map {map_path:?}: {err}"),
            )
        })?;
        tracing::info!(entries = by_pii.len(), "loaded publisher pdf mirror");
        Ok(Self {
            root: root.to_owned(),
            by_pii,
        })
    }

    /// Path of the mirrored PDF for a PII, if present on disk.
    pub fn lookup(&self, pii: &str) -> Option<PathBuf> {
        let relative = self.by_pii.get(pii)?;
        let path = self.root.join(relative);
        path.is_file().then_some(path)
    }
}

/// A previous harvest tree. Entries keep their ids across harvests, so a
/// PDF downloaded by an earlier run can be reused without a network fetch.
pub struct LegacyMirror {
    root: PathBuf,
}

impl LegacyMirror {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_owned(),
        }
    }

    pub fn lookup_pdf(&self, id: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for part in repository::entry_prefix(id).split('/') {
            path.push(part);
        }
        path.push(format!("{id}.pdf"));
        path.is_file().then_some(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_publisher_mirror() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("pdfs")).unwrap();
        std::fs::write(tmp.path().join("pdfs/x.pdf"), b"%PDF-").unwrap();
        std::fs::write(
            tmp.path().join("map.json"),
            r#"{"S0140673620303602": "pdfs/x.pdf", "S0000000000000000": "pdfs/missing.pdf"}"#,
        )
        .unwrap();

        let mirror = PublisherMirror::load(tmp.path()).unwrap();
        assert!(mirror.lookup("S0140673620303602").is_some());
        // Mapped but absent on disk.
        assert_eq!(mirror.lookup("S0000000000000000"), None);
        assert_eq!(mirror.lookup("S1111111111111111"), None);
    }

    #[test]
    fn test_legacy_mirror_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("fq/4x/q0/0d/fq4xq00d");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("fq4xq00d.pdf"), b"%PDF-").unwrap();

        let mirror = LegacyMirror::new(tmp.path());
        assert!(mirror.lookup_pdf("fq4xq00d").is_some());
        assert_eq!(mirror.lookup_pdf("aaaa0001"), None);
    }
}
