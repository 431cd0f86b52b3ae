//! Storage layout of one Entry's artifacts.
//!
//! For an id `aabbccddeeff...` everything lives under `aa/bb/cc/dd/<id>/`.
//! The four-level prefix bounds directory fan-out on large corpora and maps
//! one-to-one onto object-store key space.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbSize {
    Small,
    Medium,
    Large,
}

impl ThumbSize {
    pub const ALL: [ThumbSize; 3] = [ThumbSize::Small, ThumbSize::Medium, ThumbSize::Large];

    /// Pixel height of the rendered thumbnail.
    pub fn height(&self) -> u32 {
        match self {
            ThumbSize::Small => 150,
            ThumbSize::Medium => 300,
            ThumbSize::Large => 500,
        }
    }
}

impl fmt::Display for ThumbSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThumbSize::Small => "small",
            ThumbSize::Medium => "medium",
            ThumbSize::Large => "large",
        };
        f.write_str(s)
    }
}

/// `/`-separated repository paths for the artifacts of one Entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPaths {
    id: String,
    prefix: String,
}

impl EntryPaths {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            prefix: entry_prefix(id),
        }
    }

    /// `aa/bb/cc/dd/<id>`, the Entry's directory.
    pub fn dir(&self) -> &str {
        &self.prefix
    }

    pub fn pdf(&self) -> String {
        format!("{}/{}.pdf", self.prefix, self.id)
    }

    pub fn nxml(&self) -> String {
        format!("{}/{}.nxml", self.prefix, self.id)
    }

    pub fn grobid_tei(&self) -> String {
        format!("{}/{}.grobid.tei.xml", self.prefix, self.id)
    }

    pub fn pub2tei_tei(&self) -> String {
        format!("{}/{}.pub2tei.tei.xml", self.prefix, self.id)
    }

    pub fn ref_annotations(&self) -> String {
        format!("{}/{}-ref-annotations.json", self.prefix, self.id)
    }

    pub fn thumbnail(&self, size: ThumbSize) -> String {
        format!("{}/{}-thumb-{}.png", self.prefix, self.id, size)
    }

    /// The per-entry consolidated metadata record.
    pub fn metadata_json(&self) -> String {
        format!("{}/{}.json", self.prefix, self.id)
    }
}

/// The 4-level prefix directory for `id`. Ids shorter than eight characters
/// do not occur in practice (CORD ids are eight, generated ids twenty-two),
/// but a short id degrades to a flat path rather than panicking.
pub fn entry_prefix(id: &str) -> String {
    let bytes = id.as_bytes();
    if bytes.len() < 8 || !bytes[..8].is_ascii() {
        return id.to_string();
    }
    format!(
        "{}/{}/{}/{}/{}",
        &id[0..2],
        &id[2..4],
        &id[4..6],
        &id[6..8],
        id
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_entry_prefix() {
        assert_eq!(
            entry_prefix("0123456789abcdefghijkl"),
            "01/23/45/67/0123456789abcdefghijkl"
        );
        assert_eq!(entry_prefix("fq4xq00d"), "fq/4x/q0/0d/fq4xq00d");
        assert_eq!(entry_prefix("short"), "short");
    }

    #[test]
    fn test_artifact_paths() {
        let paths = EntryPaths::new("fq4xq00d");
        assert_eq!(paths.pdf(), "fq/4x/q0/0d/fq4xq00d/fq4xq00d.pdf");
        assert_eq!(paths.nxml(), "fq/4x/q0/0d/fq4xq00d/fq4xq00d.nxml");
        assert_eq!(
            paths.grobid_tei(),
            "fq/4x/q0/0d/fq4xq00d/fq4xq00d.grobid.tei.xml"
        );
        assert_eq!(
            paths.pub2tei_tei(),
            "fq/4x/q0/0d/fq4xq00d/fq4xq00d.pub2tei.tei.xml"
        );
        assert_eq!(
            paths.ref_annotations(),
            "fq/4x/q0/0d/fq4xq00d/fq4xq00d-ref-annotations.json"
        );
        assert_eq!(
            paths.thumbnail(ThumbSize::Medium),
            "fq/4x/q0/0d/fq4xq00d/fq4xq00d-thumb-medium.png"
        );
        assert_eq!(paths.metadata_json(), "fq/4x/q0/0d/fq4xq00d/fq4xq00d.json");
    }

    #[test]
    fn test_thumb_heights() {
        for (size, expect) in [
            (ThumbSize::Small, 150),
            (ThumbSize::Medium, 300),
            (ThumbSize::Large, 500),
        ] {
            assert_eq!(size.height(), expect);
        }
    }
}
