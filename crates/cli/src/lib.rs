use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use sessionq_engine::{
    default_projects_root, grouping_hash, CancellationToken, DeliveryOptions, EngineConfig,
    EngineError, ProjectsDirLocator, QueryExecutor, QueryRequest, QueryService, StopReason,
};
use sessionq_protocol::{ErrorCategory, ErrorEnvelope, OutputMode, Scope};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

fn print_stdout(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "sessionq")]
#[command(about = "Query agent session histories with jq expressions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    /// Directory for file_ref result files
    #[arg(long, global = true, env = "SESSIONQ_TEMP_DIR")]
    temp_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a jq filter over session records and print the response JSON
    Query(QueryArgs),
    /// Remove old result files
    Cleanup(CleanupArgs),
}

#[derive(Args)]
struct QueryArgs {
    /// 'project' (every session of the project) or 'session' (newest only)
    #[arg(long, default_value = "project")]
    scope: Scope,

    /// Selection filter (jq syntax)
    #[arg(long, default_value = ".")]
    filter: String,

    /// Expression piped after the filter
    #[arg(long)]
    transform: Option<String>,

    /// Maximum number of results (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    limit: usize,

    /// Force 'inline' or 'file_ref' delivery; anything else selects by size
    #[arg(long)]
    output_mode: Option<String>,

    /// Results up to this many bytes are printed inline
    #[arg(long, env = "SESSIONQ_INLINE_THRESHOLD")]
    inline_threshold: Option<u64>,

    /// Project directory whose sessions are queried (default: current directory)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Root holding one session directory per project
    #[arg(long, env = "SESSIONQ_PROJECTS_ROOT")]
    projects_root: Option<PathBuf>,

    /// Read sessions from this directory instead of the project's
    #[arg(long, env = "SESSIONQ_SESSION_DIR")]
    session_dir: Option<PathBuf>,

    /// Identifier used to group result files
    #[arg(long, env = "SESSIONQ_SESSION_ID")]
    session_id: Option<String>,

    /// Pretty-print the response
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct CleanupArgs {
    /// Remove result files older than this many days
    #[arg(long, default_value_t = 7)]
    max_age_days: u64,
}

pub async fn main_entry() -> ExitCode {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let envelope = envelope_for(&err);
            let text = serde_json::to_string(&envelope)
                .unwrap_or_else(|_| format!("{{\"code\":\"{}\"}}", envelope.code));
            eprintln!("{text}");
            ExitCode::FAILURE
        }
    }
}

fn envelope_for(err: &anyhow::Error) -> ErrorEnvelope {
    match err.downcast_ref::<EngineError>() {
        Some(engine) => engine.to_envelope(),
        None => ErrorEnvelope::new(ErrorCategory::Internal, format!("{err:#}")),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = EngineConfig::default();
    if let Some(dir) = cli.temp_dir {
        config.temp_dir = dir;
    }
    match cli.command {
        Commands::Query(args) => run_query(args, config).await,
        Commands::Cleanup(args) => run_cleanup(args, config).await,
    }
}

async fn run_query(args: QueryArgs, mut config: EngineConfig) -> Result<()> {
    if let Some(threshold) = args.inline_threshold {
        config.inline_threshold_bytes = threshold;
    }
    let cwd = match args.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    let mut locator =
        ProjectsDirLocator::new(args.projects_root.unwrap_or_else(default_projects_root));
    if let Some(dir) = args.session_dir {
        locator = locator.with_session_dir(dir);
    }
    let service = QueryService::new(&config, Arc::new(locator));

    let request = QueryRequest {
        scope: args.scope,
        expression: QueryExecutor::build_expression(&args.filter, args.transform.as_deref()),
        limit: args.limit,
        cwd,
    };
    let delivery = DeliveryOptions {
        mode_override: args.output_mode.as_deref().and_then(OutputMode::parse_override),
        inline_threshold: None,
        grouping_hash: grouping_hash(args.session_id.as_deref(), &request.cwd),
        purpose: "cli_query".to_string(),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, finishing with partial results");
            on_signal.cancel();
        }
    });

    let reply = service.query(&request, &delivery, &cancel).await?;
    log::info!(
        "{} record(s) from {} file(s) ({} skipped line(s), {} evaluation error(s))",
        reply.stats.record_count,
        reply.stats.files_scanned,
        reply.stats.lines_skipped,
        reply.stats.eval_errors
    );
    if reply.stop == StopReason::Cancelled {
        log::warn!("query was cancelled; output is partial");
    }

    let text = if args.pretty {
        serde_json::to_string_pretty(&reply.response)?
    } else {
        serde_json::to_string(&reply.response)?
    };
    print_stdout(&text)
}

async fn run_cleanup(args: CleanupArgs, config: EngineConfig) -> Result<()> {
    let locator = ProjectsDirLocator::default();
    let service = QueryService::new(&config, Arc::new(locator));
    let age = Duration::from_secs(args.max_age_days.saturating_mul(SECONDS_PER_DAY));
    let report = service.cleanup(age).await?;
    print_stdout(&serde_json::to_string(&report)?)
}
