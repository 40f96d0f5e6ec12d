use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_culture_enrich::app::{App, EnrichOptions};
use kira_culture_enrich::config::{ApiKeys, ConfigLoader, ResolvedConfig};
use kira_culture_enrich::domain::{EntityKind, EntitySeed};
use kira_culture_enrich::error::KiraError;
use kira_culture_enrich::orchestrator::CancellationToken;
use kira_culture_enrich::output::JsonOutput;
use kira_culture_enrich::store::Store;

#[derive(Parser)]
#[command(name = "kira-ce")]
#[command(about = "Resolve and enrich growth-media ingredients and microbial strains across public sources")]
#[command(version, author)]
struct Cli {
    /// Manifest path (defaults to ./kira-ce.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Enrich one seed, or every seed in the manifest")]
    Enrich(EnrichArgs),
    #[command(about = "Show a stored entity with its records and conflicts")]
    Show(TargetArgs),
    #[command(about = "List stored entities")]
    List,
    #[command(about = "Print the conflict log")]
    Conflicts(ConflictsArgs),
    #[command(about = "Export stored entities as KGX TSV")]
    Export(ExportArgs),
    #[command(about = "Replace placeholder key segments with discovered identifiers")]
    Rekey(TargetArgs),
}

#[derive(Args)]
struct EnrichArgs {
    /// e.g. `cas:7487-88-9`, `ingredient:glucose`, `taxon:562`, `bacdive:4907`
    specifier: Option<String>,

    #[arg(long)]
    max_depth: Option<usize>,

    #[arg(long)]
    jobs: Option<usize>,

    #[arg(long)]
    no_cache: bool,
}

#[derive(Args)]
struct TargetArgs {
    /// Composite key or `type:value` identifier.
    target: String,
}

#[derive(Args)]
struct ConflictsArgs {
    #[arg(long)]
    key: Option<String>,
}

#[derive(Args)]
struct ExportArgs {
    #[arg(long)]
    out: Utf8PathBuf,

    #[arg(long, value_enum)]
    kind: Option<EntityKind>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            match report.downcast_ref::<KiraError>() {
                Some(kira) => ExitCode::from(map_exit_code(kira)),
                None => ExitCode::from(1),
            }
        }
    }
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::InvalidSpecifier(_)
        | KiraError::InvalidCasRn(_)
        | KiraError::InvalidInchiKey(_)
        | KiraError::InvalidChebiId(_)
        | KiraError::InvalidNumericId { .. }
        | KiraError::InvalidName(_)
        | KiraError::UnknownIdentifierType(_)
        | KiraError::UnknownSource(_)
        | KiraError::MissingConfig
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidSetting(_)
        | KiraError::InvalidCuriePattern(_)
        | KiraError::EntityNotFound(_)
        | KiraError::NothingToRekey(_)
        | KiraError::RekeyCollision(_) => 2,
        KiraError::Store(_) | KiraError::Filesystem(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = Store::new()?;

    match cli.command {
        Commands::Enrich(args) => run_enrich(args, cli.config.as_deref(), store),
        Commands::Show(args) => {
            let app = offline_app(store, cli.config.as_deref())?;
            let result = app.show(&args.target, &JsonOutput)?;
            JsonOutput::print_show(&result).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            let app = offline_app(store, cli.config.as_deref())?;
            let result = app.list(&JsonOutput)?;
            JsonOutput::print_list(&result).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Conflicts(args) => {
            let app = offline_app(store, cli.config.as_deref())?;
            let result = app.conflicts(args.key.as_deref())?;
            JsonOutput::print_conflicts(&result).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Export(args) => {
            let app = offline_app(store, cli.config.as_deref())?;
            let result = app.export(&args.out, args.kind, &JsonOutput)?;
            JsonOutput::print_export(&result).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Rekey(args) => {
            let app = offline_app(store, cli.config.as_deref())?;
            let result = app.rekey(&args.target, &JsonOutput)?;
            JsonOutput::print_rekey(&result).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_enrich(args: EnrichArgs, config: Option<&str>, store: Store) -> miette::Result<ExitCode> {
    let specifier = args
        .specifier
        .map(|value| value.parse::<EntitySeed>())
        .transpose()?;

    // A bare specifier needs no manifest; a batch run does.
    let resolved = match specifier {
        Some(_) => ConfigLoader::resolve_or_default(config)?,
        None => ConfigLoader::resolve(config)?,
    };
    if args.jobs == Some(0) {
        return Err(KiraError::InvalidSetting("--jobs must be at least 1".to_string()).into());
    }

    let options = EnrichOptions {
        no_cache: args.no_cache,
        max_depth: args.max_depth,
        jobs: args.jobs,
    };
    let app = App::from_config(store, &resolved, &ApiKeys::from_env(), &options)?;
    // Never cancelled here: Ctrl-C ends the process, and every merge already
    // on disk was written atomically. Embedders pass their own token.
    let result = app.enrich(specifier, &resolved, &CancellationToken::new(), &JsonOutput)?;
    JsonOutput::print_enrich(&result).into_diagnostic()?;

    if result.failures.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

fn offline_app(store: Store, config: Option<&str>) -> Result<App, KiraError> {
    let resolved: ResolvedConfig = ConfigLoader::resolve_or_default(config)?;
    Ok(App::offline(store, &resolved))
}
