//! The orchestration engine: a bounded worker pool that drives each Entry
//! through its stage machine, plus the separable reverse (JATS to TEI)
//! pass, the diagnostic reporter, and the metadata dump.

mod dump;
mod orchestrator;
mod report;
mod reverse;
mod stages;
mod subprocess;
mod thumbnail;

pub use dump::dump_metadata;
pub use orchestrator::{run_pipeline, RunSummary};
pub use report::{build_report, Report};
pub use reverse::{run_reverse_pass, ReverseSummary};

use clients::{Fetcher, MetadataClient, StructuringClient};
use models::Config;
use repository::Repository;
use state_store::StateStore;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Repository(#[from] repository::Error),
    #[error(transparent)]
    State(#[from] state_store::Error),
    #[error("client setup failed")]
    Client(#[from] clients::Failure),
    #[error("i/o failure")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Setup(String),
}

/// Per-run toggles from the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Run PDF-to-TEI structuring after a successful PDF fetch.
    pub grobid: bool,
    pub thumbnail: bool,
    pub annotation: bool,
    /// Requeue failed entries, resetting only their failed stages.
    pub reprocess: bool,
}

/// Everything a worker needs, threaded explicitly instead of living in
/// process globals.
pub struct Context {
    pub config: Config,
    pub repository: Repository,
    pub store: Arc<StateStore>,
    pub metadata: MetadataClient,
    pub fetcher: Fetcher,
    pub structuring: Option<StructuringClient>,
    pub options: RunOptions,
}

impl Context {
    pub fn new(
        config: Config,
        repository: Repository,
        store: Arc<StateStore>,
        options: RunOptions,
    ) -> Result<Self, Error> {
        let metadata = MetadataClient::new(&config)?;
        let fetcher = Fetcher::new(&config)?;
        // Scheduling assumes that --grobid implies a usable structuring
        // client; a missing URL must fail the run up front, not leave
        // every entry permanently pending on its tei_pdf stage.
        let structuring = match (&config.pdf_structuring_url, options.grobid) {
            (Some(url), true) => Some(StructuringClient::new(
                url,
                config.pdf_structure_timeout(),
            )?),
            (None, true) => {
                return Err(Error::Setup(
                    "--grobid requires pdf_structuring_url in the config".to_string(),
                ))
            }
            _ => None,
        };
        Ok(Self {
            config,
            repository,
            store,
            metadata,
            fetcher,
            structuring,
            options,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn open_stores(dir: &std::path::Path) -> (Repository, Arc<StateStore>) {
        let config = Config::default();
        let repository = Repository::open(&config.storage_backend(), dir)
            .await
            .unwrap();
        let (store, _) = StateStore::open(&dir.join("map.jsonl")).unwrap();
        (repository, Arc::new(store))
    }

    #[tokio::test]
    async fn test_grobid_without_structuring_url_fails_setup() {
        let tmp = tempfile::tempdir().unwrap();
        let (repository, store) = open_stores(tmp.path()).await;

        let options = RunOptions {
            grobid: true,
            ..Default::default()
        };
        let err = match Context::new(Config::default(), repository, store, options) {
            Ok(_) => panic!("expected Context::new to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::Setup(_)), "{err}");
    }

    #[tokio::test]
    async fn test_structuring_client_follows_grobid_flag() {
        let tmp = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.pdf_structuring_url = Some("http://localhost:8070".to_string());

        let (repository, store) = open_stores(tmp.path()).await;
        let options = RunOptions {
            grobid: true,
            ..Default::default()
        };
        let ctx = Context::new(config.clone(), repository, store, options).unwrap();
        assert!(ctx.structuring.is_some());

        // Without --grobid the URL alone does not enable structuring.
        let (repository, store) = open_stores(tmp.path()).await;
        let ctx = Context::new(config, repository, store, RunOptions::default()).unwrap();
        assert!(ctx.structuring.is_none());
    }
}
