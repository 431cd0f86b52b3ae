// This crate is the shared vocabulary of the harvester: the Entry record and
// its component types, the per-stage status machine, and the run Config.
// It deliberately has no I/O so that every other crate can depend on it.

mod config;
mod entry;
mod metadata;
mod status;

pub use config::{Config, ConfigError, StorageBackend};
pub use entry::{ArtifactSet, CandidateUrl, Entry, Identifiers, MapRecord, UrlSource};
pub use metadata::{Author, BiblioMetadata};
pub use status::{AttemptCounts, FailureReason, Stage, StageStatus, StageStatuses};
