use std::fs::File;
use std::io::BufReader;
use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use fragment_annotator::blast::NcbiBlastClient;
use fragment_annotator::config::{ConfigLoader, Credentials, ResolvedConfig, TaxonomySourceKind};
use fragment_annotator::dispatcher::{DispatchOptions, FragmentDispatcher};
use fragment_annotator::error::AnnotateError;
use fragment_annotator::output::JsonOutput;
use fragment_annotator::scoring::score_fragments;
use fragment_annotator::store::{SqliteConnector, SqliteStore};
use fragment_annotator::taxonomy::{EntrezTaxonomyClient, TaxdumpSource, TaxonomySource};
use fragment_annotator::worker::AnnotationWorker;

#[derive(Parser)]
#[command(name = "frag-annotate")]
#[command(about = "Annotate read fragments with BLAST hits and NCBI taxonomy")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    database: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search and annotate every fragment of an input file")]
    Annotate(AnnotateArgs),
    #[command(about = "Store the median quality of every fragment")]
    Score,
    #[command(about = "Print row counts of the record store")]
    Stats,
}

#[derive(Args)]
struct AnnotateArgs {
    #[arg(long)]
    input: Utf8PathBuf,

    #[arg(long)]
    allow_duplicates: bool,

    #[arg(long)]
    credentials: Option<Utf8PathBuf>,

    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    launch_interval_ms: Option<u64>,

    #[arg(long)]
    taxonomy: Option<TaxonomySourceKind>,

    #[arg(long)]
    taxdump_dir: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<AnnotateError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AnnotateError) -> u8 {
    match error {
        AnnotateError::ConfigRead(_)
        | AnnotateError::ConfigParse(_)
        | AnnotateError::MissingCredentials(_)
        | AnnotateError::InvalidConfig(_) => 2,
        AnnotateError::SearchHttp(_)
        | AnnotateError::SearchStatus { .. }
        | AnnotateError::SearchFailed(_)
        | AnnotateError::SearchParse(_)
        | AnnotateError::TaxonomyHttp(_)
        | AnnotateError::TaxonomyStatus { .. } => 3,
        AnnotateError::StoreUnavailable(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database = database;
    }

    match cli.command {
        Commands::Annotate(args) => run_annotate(args, config),
        Commands::Score => {
            let mut store = SqliteStore::open(&config.database)?;
            let result = score_fragments(&mut store)?;
            JsonOutput::print_score(&result).into_diagnostic()
        }
        Commands::Stats => {
            let store = SqliteStore::open(&config.database)?;
            JsonOutput::print_stats(&store.stats()?).into_diagnostic()
        }
    }
}

fn run_annotate(args: AnnotateArgs, mut config: ResolvedConfig) -> miette::Result<()> {
    if let Some(credentials) = args.credentials {
        config.credentials = credentials;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(interval) = args.launch_interval_ms {
        config.launch_interval = std::time::Duration::from_millis(interval);
    }
    if let Some(kind) = args.taxonomy {
        config.taxonomy.source = kind;
    }
    if let Some(dir) = args.taxdump_dir {
        config.taxonomy.taxdump_dir = dir;
    }

    let credentials = Credentials::load(&config.credentials)?;
    let connector = Arc::new(SqliteConnector::new(config.database.clone()).with_credentials(credentials));
    tracing::info!(database = %connector.path(), "using record store");
    let search = Arc::new(NcbiBlastClient::new(
        &config.search.base_url,
        config.search.poll_interval,
        config.search.email.clone(),
    )?);
    let taxonomy: Arc<dyn TaxonomySource> = match config.taxonomy.source {
        TaxonomySourceKind::Entrez => Arc::new(EntrezTaxonomyClient::new(
            config.taxonomy.email.clone(),
            config.taxonomy.api_key.clone(),
        )?),
        TaxonomySourceKind::Taxdump => {
            let source = TaxdumpSource::load(&config.taxonomy.taxdump_dir)?;
            if source.is_empty() {
                return Err(AnnotateError::InvalidConfig(format!(
                    "taxdump at {} holds no taxa",
                    config.taxonomy.taxdump_dir
                ))
                .into());
            }
            tracing::info!(taxa = source.len(), dir = %config.taxonomy.taxdump_dir, "loaded taxdump");
            Arc::new(source)
        }
    };

    let worker = AnnotationWorker::new(search, taxonomy, connector);
    let dispatcher = FragmentDispatcher::new(
        worker,
        DispatchOptions {
            allow_duplicates: args.allow_duplicates,
            concurrency: config.concurrency,
            queue_capacity: config.queue_capacity,
            launch_interval: config.launch_interval,
        },
    )?;

    let input = File::open(args.input.as_std_path())
        .map_err(|err| AnnotateError::Filesystem(format!("open {}: {err}", args.input)))?;
    let summary = dispatcher.run(BufReader::new(input))?;
    JsonOutput::print_summary(&summary).into_diagnostic()
}
