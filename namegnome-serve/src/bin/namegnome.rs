//! namegnome - CLI front end for the scan/plan/apply pipeline
//!
//! Exit codes: 0 success, 2 validation, 3 partial apply, 4 locked,
//! 5 provider unavailable.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use namegnome_common::config::AppConfig;
use namegnome_common::db::{self, blobs};
use namegnome_common::types::{ApplyMode, CollisionStrategy, MediaType, PlanReview};
use namegnome_common::Error;
use namegnome_serve::anthology::llm::OllamaAssist;
use namegnome_serve::apply::{apply_plan, rollback_report, ApplyOptions};
use namegnome_serve::plan::engine::{PlanEngine, PlanOutcome};
use namegnome_serve::plan::to_canonical_json;
use namegnome_serve::providers::gateway::ProviderGateway;
use namegnome_serve::providers::ProviderRegistry;
use namegnome_serve::scanner::{MediaScanner, ScanOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const EXIT_VALIDATION: u8 = 2;
const EXIT_PARTIAL: u8 = 3;
const EXIT_LOCKED: u8 = 4;
const EXIT_PROVIDER: u8 = 5;

#[derive(Parser)]
#[command(name = "namegnome", about = "Rename media libraries against provider metadata")]
struct Cli {
    /// Cache database path (overrides NAMEGNOME_CACHE_PATH)
    #[arg(long, global = true)]
    cache_path: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a media root and print the snapshot
    Scan(ScanArgs),
    /// Plan operations
    #[command(subcommand)]
    Plan(PlanCommand),
    /// Execute an approved plan
    Apply(ApplyArgs),
    /// Undo a previous apply from its rollback token
    Rollback(RollbackArgs),
    /// Inspect or prune the provider cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
enum PlanCommand {
    /// Generate a plan for a media root
    Generate(PlanArgs),
}

#[derive(Args)]
struct ScanArgs {
    #[arg(long)]
    root: PathBuf,
    #[arg(long, value_name = "tv|movie|music")]
    media_type: String,
    #[arg(long)]
    with_hash: bool,
    #[arg(long)]
    anthology: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct PlanArgs {
    #[arg(long)]
    root: PathBuf,
    #[arg(long, value_name = "tv|movie|music")]
    media_type: String,
    /// Emit the full PlanReview JSON
    #[arg(long)]
    json: bool,
    /// Per-item detail on stdout
    #[arg(long)]
    verbose: bool,
    /// Serve exclusively from the cache
    #[arg(long)]
    offline: bool,
    /// Treat TV files as anthology candidates
    #[arg(long)]
    anthology: bool,
    /// Prefer this provider for the media type
    #[arg(long)]
    provider: Option<String>,
}

#[derive(Args)]
struct ApplyArgs {
    #[arg(long)]
    root: PathBuf,
    /// PlanReview JSON produced by `plan generate --json`
    #[arg(long)]
    plan: PathBuf,
    #[arg(long, value_enum, default_value = "transactional")]
    mode: CliApplyMode,
    #[arg(long, value_enum, default_value = "backup")]
    collision: CliCollision,
}

#[derive(Args)]
struct RollbackArgs {
    #[arg(long)]
    root: PathBuf,
    #[arg(long)]
    token: String,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Entry counts and expiry state
    Stats,
    /// Remove expired entries
    Cleanup,
    /// Drop all cached provider responses
    Clear,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliApplyMode {
    DryRun,
    Transactional,
    ContinueOnError,
}

impl From<CliApplyMode> for ApplyMode {
    fn from(mode: CliApplyMode) -> Self {
        match mode {
            CliApplyMode::DryRun => ApplyMode::DryRun,
            CliApplyMode::Transactional => ApplyMode::Transactional,
            CliApplyMode::ContinueOnError => ApplyMode::ContinueOnError,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliCollision {
    Skip,
    Overwrite,
    Backup,
}

impl From<CliCollision> for CollisionStrategy {
    fn from(strategy: CliCollision) -> Self {
        match strategy {
            CliCollision::Skip => CollisionStrategy::Skip,
            CliCollision::Overwrite => CollisionStrategy::Overwrite,
            CliCollision::Backup => CollisionStrategy::Backup,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::Validation(_)) | Some(Error::Config(_)) => EXIT_VALIDATION,
        Some(Error::Locked { .. }) => EXIT_LOCKED,
        Some(Error::ProviderUnavailable { .. }) => EXIT_PROVIDER,
        _ => 1,
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Scan(args) => run_scan(cli.cache_path.as_deref(), args).await,
        Command::Plan(PlanCommand::Generate(args)) => {
            run_plan(cli.cache_path.as_deref(), args).await
        }
        Command::Apply(args) => run_apply(cli.cache_path.as_deref(), args).await,
        Command::Rollback(args) => run_rollback(cli.cache_path.as_deref(), args).await,
        Command::Cache(command) => run_cache(cli.cache_path.as_deref(), command).await,
    }
}

fn parse_media_type(raw: &str) -> Result<MediaType> {
    MediaType::parse(raw)
        .ok_or_else(|| Error::Validation(format!("unknown media type '{}'", raw)).into())
}

async fn run_scan(cache_path: Option<&str>, args: ScanArgs) -> Result<ExitCode> {
    let media_type = parse_media_type(&args.media_type)?;
    let scanner = MediaScanner::new(
        media_type,
        ScanOptions {
            with_hash: args.with_hash,
            anthology: args.anthology,
        },
    );
    let result = scanner
        .scan(&args.root)
        .map_err(|e| Error::Validation(e.to_string()))?;

    // The scan itself needs no cache, but resolving the path surfaces
    // configuration errors early for the commands that follow.
    let _ = AppConfig::resolve(cache_path, false)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "{} files ({} bytes) under {}",
            result.file_count,
            result.total_size,
            result.root_path.display()
        );
        println!("fingerprint: {}", result.source_fingerprint);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_plan(cache_path: Option<&str>, args: PlanArgs) -> Result<ExitCode> {
    let media_type = parse_media_type(&args.media_type)?;
    let config = AppConfig::resolve(cache_path, args.offline)?;
    let pool = db::init_cache_pool(&config.cache_path).await?;

    let mut registry = ProviderRegistry::from_env()?;
    if let Some(provider) = &args.provider {
        registry.prefer(media_type, provider);
    }
    let gateway = ProviderGateway::new(
        pool.clone(),
        registry,
        config.providers.clone(),
        config.offline,
    );

    let scanner = MediaScanner::new(
        media_type,
        ScanOptions {
            with_hash: false,
            anthology: args.anthology,
        },
    );
    let scan = scanner
        .scan(&args.root)
        .map_err(|e| Error::Validation(e.to_string()))?;

    let assist = OllamaAssist::new(
        config.ollama_url.clone(),
        config.ollama_model.clone(),
        config.llm_timeout,
    )?;
    let engine = PlanEngine::new(&pool, &gateway, Some(&assist));

    match engine.generate(&scan, None).await? {
        PlanOutcome::Review(review) => {
            if args.json {
                println!("{}", to_canonical_json(&review)?);
            } else {
                print_review_summary(&review, args.verbose);
            }
            Ok(ExitCode::SUCCESS)
        }
        PlanOutcome::Disambiguation(pending) => {
            eprintln!(
                "disambiguation required for '{}' ({} candidates):",
                pending.title_norm,
                pending.candidates.len()
            );
            for candidate in &pending.candidates {
                eprintln!(
                    "  {} {} - {} ({})",
                    candidate.provider,
                    candidate.id,
                    candidate.title,
                    candidate
                        .year
                        .map(|y| y.to_string())
                        .unwrap_or_else(|| "year unknown".into())
                );
            }
            eprintln!(
                "resolve via POST /disambiguate with token {} and the chosen id, then re-run",
                pending.token
            );
            Ok(ExitCode::from(EXIT_VALIDATION))
        }
    }
}

fn print_review_summary(review: &PlanReview, verbose: bool) {
    println!(
        "plan {}: {} items, {} groups",
        review.plan_id,
        review.summary.total_items,
        review.groups.len()
    );
    println!(
        "confidence: {} high / {} medium / {} low; {} warnings",
        review.summary.by_confidence["high"],
        review.summary.by_confidence["medium"],
        review.summary.by_confidence["low"],
        review.summary.warnings
    );
    if verbose {
        for item in &review.items {
            println!(
                "  [{}] {:.2} {} -> {}",
                item.confidence_bucket.as_str(),
                item.confidence,
                item.src.path.display(),
                item.dst.path.display()
            );
            for warning in &item.warnings {
                println!("      warning: {}", warning);
            }
        }
    }
}

async fn run_apply(cache_path: Option<&str>, args: ApplyArgs) -> Result<ExitCode> {
    let config = AppConfig::resolve(cache_path, false)?;
    let pool = db::init_cache_pool(&config.cache_path).await?;

    let raw = std::fs::read_to_string(&args.plan)
        .map_err(|e| Error::Validation(format!("cannot read plan file: {}", e)))?;
    let review: PlanReview = serde_json::from_str(&raw)
        .map_err(|e| Error::Validation(format!("plan file is not a PlanReview: {}", e)))?;

    let report = apply_plan(
        &pool,
        &review,
        &args.root,
        ApplyOptions {
            mode: args.mode.into(),
            collision: args.collision.into(),
        },
        None,
    )
    .await?;

    println!(
        "report {}: {} applied, {} skipped, {} failed",
        report.report_id, report.applied_count, report.skipped_count, report.failed_count
    );
    for outcome in &report.outcomes {
        if let Some(reason) = &outcome.reason {
            println!("  {:?} {}: {}", outcome.status, outcome.src.display(), reason);
        }
    }
    if let Some(token) = &report.rollback_token {
        println!("rollback token: {}", token);
    }

    if report.failed_count > 0 || report.skipped_count > 0 {
        Ok(ExitCode::from(EXIT_PARTIAL))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn run_rollback(cache_path: Option<&str>, args: RollbackArgs) -> Result<ExitCode> {
    let config = AppConfig::resolve(cache_path, false)?;
    let pool = db::init_cache_pool(&config.cache_path).await?;

    let report = rollback_report(&pool, &args.root, &args.token).await?;
    println!(
        "rollback {}: {} restored, {} skipped",
        report.report_id, report.applied_count, report.failed_count
    );
    if report.failed_count > 0 {
        Ok(ExitCode::from(EXIT_PARTIAL))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn run_cache(cache_path: Option<&str>, command: CacheCommand) -> Result<ExitCode> {
    let config = AppConfig::resolve(cache_path, false)?;
    let pool = db::init_cache_pool(&config.cache_path).await?;

    match command {
        CacheCommand::Stats => {
            let stats = blobs::stats(&pool).await?;
            println!("{} entries ({} expired)", stats.total, stats.expired);
        }
        CacheCommand::Cleanup => {
            let removed = blobs::cleanup_expired(&pool).await?;
            println!("removed {} expired entries", removed);
        }
        CacheCommand::Clear => {
            let removed = blobs::clear(&pool).await?;
            println!("cleared {} entries", removed);
        }
    }
    Ok(ExitCode::SUCCESS)
}
