//! harvestctl drives the article harvesting pipeline: resolve and dedup the
//! input, enrich each entry with bibliographic metadata, download OA PDF
//! and JATS artifacts, and structure them into TEI.

mod logging;

use clap::Parser;
use dedup::{read_cord19_csv, read_identifier_list, Deduplicator, InputKind, ResolvedEntry};
use logging::{init_logging, LogArgs};
use models::Config;
use repository::Repository;
use runtime::{build_report, dump_metadata, run_pipeline, run_reverse_pass, Context, RunOptions};
use state_store::StateStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG: u8 = 2;
const EXIT_INPUT: u8 = 3;
const EXIT_PARTIAL: u8 = 4;
const EXIT_CANCELLED: u8 = 130;

const DEFAULT_CONFIG_PATH: &str = "./config.json";

/// Harvest scholarly articles into a content-addressed repository.
#[derive(Debug, Parser)]
#[clap(author, name = "harvestctl", version)]
struct HarvestCtl {
    #[clap(flatten)]
    log: LogArgs,

    #[clap(flatten)]
    input: InputArgs,

    /// Configuration file path.
    #[clap(long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Clear the repository and state store before starting.
    #[clap(long)]
    reset: bool,

    /// Re-run only entries currently in a failed state.
    #[clap(long)]
    reprocess: bool,

    /// Enable PDF-to-TEI structuring.
    #[clap(long)]
    grobid: bool,

    /// Generate page thumbnails after a successful PDF fetch.
    #[clap(long)]
    thumbnail: bool,

    /// Request reference annotations from the structuring service.
    #[clap(long)]
    annotation: bool,

    /// Print the completeness report and exit.
    #[clap(long)]
    diagnostic: bool,

    /// Emit the consolidated metadata of every entry as one JSON file.
    #[clap(long)]
    dump: bool,

    /// Run only the batch JATS-to-TEI pass over harvested JATS artifacts.
    #[clap(long)]
    transform_jats: bool,
}

/// Mutually exclusive input selectors.
#[derive(Debug, clap::Args)]
struct InputArgs {
    /// Input is a list of DOIs, one per line.
    #[clap(long, value_name = "FILE", group = "input")]
    dois: Option<PathBuf>,

    /// Input is a list of PMIDs, one per line.
    #[clap(long, value_name = "FILE", group = "input")]
    pmids: Option<PathBuf>,

    /// Input is a list of PMC identifiers, one per line.
    #[clap(long, value_name = "FILE", group = "input")]
    pmcids: Option<PathBuf>,

    /// Input is a CORD-19 metadata CSV.
    #[clap(long, value_name = "FILE", group = "input")]
    cord19: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = HarvestCtl::parse();
    init_logging(&args.log);
    ExitCode::from(run(args).await)
}

async fn run(args: HarvestCtl) -> u8 {
    let is_default_config = args.config == PathBuf::from(DEFAULT_CONFIG_PATH);
    let config = match Config::load(&args.config, is_default_config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "configuration error");
            return EXIT_CONFIG;
        }
    };
    let data_path = config.data_path.clone();

    let repository = match Repository::open(&config.storage_backend(), &data_path).await {
        Ok(repository) => repository,
        Err(err) => {
            tracing::error!(%err, "failed to open artifact repository");
            return EXIT_CONFIG;
        }
    };

    // The map file is always local, even when artifacts go to the object
    // store: it is the truth source for resumption.
    if let Err(err) = std::fs::create_dir_all(&data_path) {
        tracing::error!(%err, "failed to create data directory");
        return EXIT_CONFIG;
    }
    let (store, recovery) = match StateStore::open(&data_path.join("map.jsonl")) {
        Ok(opened) => opened,
        Err(err) => {
            tracing::error!(%err, "failed to open state store");
            return EXIT_CONFIG;
        }
    };
    let store = Arc::new(store);
    if recovery.demoted > 0 || recovery.skipped_lines > 0 {
        tracing::info!(
            entries = recovery.entries,
            demoted = recovery.demoted,
            skipped_lines = recovery.skipped_lines,
            "state store recovered"
        );
    }

    if args.reset {
        tracing::warn!("clearing repository and state store");
        if let Err(err) = repository.delete_prefix("").await {
            tracing::error!(%err, "failed to clear repository");
            return EXIT_CONFIG;
        }
        if let Err(err) = std::fs::create_dir_all(&data_path) {
            tracing::error!(%err, "failed to re-create data directory");
            return EXIT_CONFIG;
        }
        if let Err(err) = store.reset() {
            tracing::error!(%err, "failed to reset state store");
            return EXIT_CONFIG;
        }
    }

    if args.diagnostic {
        let report = build_report(&store.snapshot());
        print!("{report}");
        write_report_json(&data_path, &report);
        return EXIT_OK;
    }

    let options = RunOptions {
        grobid: args.grobid,
        thumbnail: args.thumbnail,
        annotation: args.annotation,
        reprocess: args.reprocess,
    };
    let ctx = match Context::new(config, repository, store.clone(), options) {
        Ok(ctx) => Arc::new(ctx),
        Err(err) => {
            tracing::error!(%err, "failed to set up clients");
            return EXIT_CONFIG;
        }
    };

    if args.dump {
        let output = data_path.join("consolidated_metadata.json");
        return match dump_metadata(&ctx, &output).await {
            Ok(count) => {
                println!("wrote {count} metadata records to {}", output.display());
                EXIT_OK
            }
            Err(err) => {
                tracing::error!(%err, "metadata dump failed");
                EXIT_PARTIAL
            }
        };
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; letting in-flight stages finish");
                cancel.cancel();
            }
        }
    });

    if args.transform_jats {
        return match run_reverse_pass(&ctx, &cancel).await {
            Ok(summary) => {
                println!(
                    "jats transform: {} candidates, {} transformed, {} failed",
                    summary.candidates, summary.transformed, summary.failed
                );
                if cancel.is_cancelled() {
                    EXIT_CANCELLED
                } else if summary.failed > 0 {
                    EXIT_PARTIAL
                } else {
                    EXIT_OK
                }
            }
            Err(err) => {
                tracing::error!(%err, "reverse transform pass failed");
                EXIT_PARTIAL
            }
        };
    }

    let resolved = match resolve_input(&args, &store) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };

    match run_pipeline(ctx, resolved, cancel).await {
        Ok(summary) => {
            let report = build_report(&store.snapshot());
            print!("{report}");
            write_report_json(&data_path, &report);
            if summary.cancelled {
                EXIT_CANCELLED
            } else if report.has_failures() {
                EXIT_PARTIAL
            } else {
                EXIT_OK
            }
        }
        Err(err) => {
            tracing::error!(%err, "pipeline failed");
            EXIT_PARTIAL
        }
    }
}

/// Read the selected input, preload the dedup cascade with known entries,
/// and resolve. With no input selector, `--reprocess` revisits the store
/// contents; anything else is an input error.
fn resolve_input(args: &HarvestCtl, store: &StateStore) -> Result<Vec<ResolvedEntry>, u8> {
    let input = &args.input;
    let rows = if let Some(path) = &input.dois {
        Some(read_identifier_list(path, InputKind::Doi))
    } else if let Some(path) = &input.pmids {
        Some(read_identifier_list(path, InputKind::Pmid))
    } else if let Some(path) = &input.pmcids {
        Some(read_identifier_list(path, InputKind::Pmcid))
    } else if let Some(path) = &input.cord19 {
        Some(read_cord19_csv(path))
    } else {
        None
    };

    match rows {
        Some(Ok(rows)) => {
            let mut dedup = Deduplicator::new();
            dedup.preload(store.snapshot());
            let raw_rows = rows.len();
            for row in rows {
                dedup.push(row);
            }
            let resolved = dedup.finish();
            tracing::info!(raw_rows, resolved = resolved.len(), "input resolved");
            Ok(resolved)
        }
        Some(Err(err)) => {
            tracing::error!(%err, "input error");
            Err(EXIT_INPUT)
        }
        None if args.reprocess => Ok(store
            .snapshot()
            .into_iter()
            .map(|record| ResolvedEntry {
                entry: record.into_entry(),
                is_new: false,
                seed_metadata: None,
            })
            .collect()),
        None => {
            tracing::error!("no input selected; pass --dois, --pmids, --pmcids or --cord19");
            Err(EXIT_INPUT)
        }
    }
}

fn write_report_json(data_path: &std::path::Path, report: &runtime::Report) {
    let path = data_path.join("diagnostic.json");
    let json = serde_json::to_string_pretty(report).expect("report serializes");
    if let Err(err) = std::fs::write(&path, json) {
        tracing::warn!(%err, ?path, "failed to write report summary");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_shape() {
        HarvestCtl::command().debug_assert();
    }

    #[test]
    fn test_input_selectors_are_exclusive() {
        let err = HarvestCtl::try_parse_from([
            "harvestctl",
            "--dois",
            "dois.txt",
            "--cord19",
            "metadata.csv",
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn test_flags_parse() {
        let args = HarvestCtl::try_parse_from([
            "harvestctl",
            "--cord19",
            "metadata.csv",
            "--grobid",
            "--thumbnail",
            "--annotation",
            "--log.level",
            "debug",
        ])
        .unwrap();
        assert!(args.grobid && args.thumbnail && args.annotation);
        assert_eq!(args.input.cord19.as_deref(), Some(std::path::Path::new("metadata.csv")));
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }
}
