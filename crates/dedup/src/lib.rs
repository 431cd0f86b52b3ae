//! Input handling and deduplication: turns the raw input stream (identifier
//! lists or a CORD-19 metadata CSV) into distinct logical articles, each
//! with a stable assigned id.

mod cord19;
mod id;
mod input;
mod normalize;
mod resolver;

pub use cord19::read_cord19_csv;
pub use id::generate_id;
pub use input::{read_identifier_list, InputKind, InputRow};
pub use normalize::{
    first_author_surname_from_csv, normalize_title, pii_from_doi, year_from_publish_time,
};
pub use resolver::{Deduplicator, ResolvedEntry};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read input file {path:?}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse input file {path:?}")]
    Csv {
        path: std::path::PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("input file {path:?} has no usable rows")]
    Empty { path: std::path::PathBuf },
}
