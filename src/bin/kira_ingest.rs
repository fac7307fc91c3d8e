use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_expression_ingest::config::{ConfigLoader, resolve_store_root};
use kira_expression_ingest::dense::DenseIngestor;
use kira_expression_ingest::domain::{DocumentId, GeneOrdering};
use kira_expression_ingest::error::IngestError;
use kira_expression_ingest::ingest::{ExpressionIngestor, IngestContext, IngestOptions};
use kira_expression_ingest::mtx::{MtxBundle, MtxIngestor};
use kira_expression_ingest::output::JsonOutput;
use kira_expression_ingest::store::JsonStore;

#[derive(Parser)]
#[command(name = "kira-ingest")]
#[command(about = "Validate and load gene expression matrices into a document store")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true, help = "Store root directory")]
    store: Option<String>,

    #[arg(long)]
    study_id: String,

    #[arg(long)]
    study_file_id: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Ingest a dense matrix (.csv, .tsv, .txt, optionally .gz)")]
    Dense(DenseArgs),
    #[command(about = "Ingest a Matrix Market coordinate bundle")]
    Mtx(MtxArgs),
}

#[derive(Args)]
struct DenseArgs {
    path: String,
}

#[derive(Args)]
struct MtxArgs {
    path: String,

    #[arg(long)]
    gene_file: String,

    #[arg(long)]
    barcode_file: String,

    #[arg(long, value_enum)]
    gene_order: Option<GeneOrdering>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<IngestError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IngestError) -> u8 {
    match error {
        IngestError::Format(_)
        | IngestError::Validation(_)
        | IngestError::DuplicateGene(_)
        | IngestError::DimensionMismatch(_)
        | IngestError::OrderingViolation { .. }
        | IngestError::UniquenessConflict(_)
        | IngestError::InvalidScore { .. }
        | IngestError::InvalidGeneIndex { .. }
        | IngestError::InvalidBarcodeIndex { .. }
        | IngestError::InvalidId(_)
        | IngestError::UnsupportedFileType(_) => 2,
        IngestError::Persistence { .. }
        | IngestError::Download(_)
        | IngestError::DownloadStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let study_id: DocumentId = cli.study_id.parse()?;
    let study_file_id: DocumentId = cli.study_file_id.parse()?;

    let store = JsonStore::new_with_root(resolve_store_root(cli.store.as_deref(), &config)?);
    store.ensure_root()?;
    let ctx = IngestContext::new(&store, config.retry.clone());
    let mut options = IngestOptions::from_config(study_id, study_file_id, &config);

    let summary = match cli.command {
        Commands::Dense(args) => DenseIngestor::open(&args.path, options)?.execute_ingest(&ctx)?,
        Commands::Mtx(args) => {
            if let Some(order) = args.gene_order {
                options.gene_ordering = order;
            }
            let bundle = MtxBundle {
                matrix: &args.path,
                genes: &args.gene_file,
                barcodes: &args.barcode_file,
            };
            MtxIngestor::open(bundle, options)?.execute_ingest(&ctx)?
        }
    };

    JsonOutput::print_summary(&summary).into_diagnostic()?;
    Ok(())
}
