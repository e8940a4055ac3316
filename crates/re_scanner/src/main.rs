use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Datelike;
use clap::{Args, Parser, Subcommand};
use re_scanner_core::claims::factories::all_factories;
use re_scanner_core::config::{DEFAULT_CONFIG_PATH, ScannerConfig, load_config};
use re_scanner_core::document::{Document, LEMMA_PREFIX};
use re_scanner_core::ledger::Ledger;
use re_scanner_core::mediawiki::{DocumentStore, MediaWikiStore};
use re_scanner_core::petscan::{PetScanClient, SearchFilters};
use re_scanner_core::scanner::{ScanOptions, ScanReport, Scanner, discover_lemmas};
use re_scanner_core::tables::{ReferenceTables, load_tables};
use re_scanner_core::tasks::{AuthTask, DataTask, Task, select_tasks};
use re_scanner_core::wikidata::WikidataClient;
use serde_json::{Map, Value};
use similar::TextDiff;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Debug, Parser)]
#[command(
    name = "re-scanner",
    version,
    about = "Maintenance bot for Paulys Realencyclopädie pages"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Discover pages, run the tasks and save the results
    Scan(ScanArgs),
    /// Parse .wiki files and report structure errors
    Check(CheckArgs),
    /// Show how a page looks after canonicalization
    Normalize(NormalizeArgs),
    /// Print the claims every factory derives from a page
    Claims(ClaimsArgs),
}

#[derive(Debug, Args)]
struct ScanArgs {
    #[arg(long, value_name = "N", help = "Stop after N pages")]
    max_pages: Option<usize>,
    #[arg(long, value_name = "M", help = "Stop starting new pages after M minutes")]
    deadline_minutes: Option<u64>,
    #[arg(long, help = "Run the tasks without writing anything")]
    dry_run: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct CheckArgs {
    path: PathBuf,
}

#[derive(Debug, Args)]
struct NormalizeArgs {
    file: PathBuf,
    #[arg(long, help = "Rewrite the file with the canonical text")]
    write: bool,
}

#[derive(Debug, Args)]
struct ClaimsArgs {
    file: PathBuf,
    #[arg(long, value_name = "RE:...")]
    lemma: Option<String>,
    #[arg(long, help = "Print the wire JSON")]
    json: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scan(args) => run_scan(&cli.config, args),
        Commands::Check(args) => run_check(&args.path),
        Commands::Normalize(args) => run_normalize(&args.file, args.write),
        Commands::Claims(args) => run_claims(&cli.config, args),
    }
}

fn project_root() -> Result<PathBuf> {
    std::env::current_dir().context("failed to resolve current directory")
}

fn load_reference_tables(config: &ScannerConfig, root: &Path) -> Result<Arc<ReferenceTables>> {
    let tables = load_tables(&config.table_paths(root))?;
    tracing::debug!(
        volumes = tables.volumes.len(),
        authors = tables.authors.len(),
        "loaded reference tables"
    );
    Ok(Arc::new(tables))
}

fn current_year() -> i32 {
    chrono::Utc::now().year()
}

fn run_scan(config_path: &Path, args: ScanArgs) -> Result<()> {
    let root = project_root()?;
    let config = load_config(config_path)?;
    let tables = load_reference_tables(&config, &root)?;
    let ledger = Ledger::open(&config.ledger_path(&root))?;

    let mut wiki = MediaWikiStore::from_config(&config)?;
    let mut wikidata = WikidataClient::from_config(&config)?;
    let mut petscan = PetScanClient::from_config(&config)?;
    match config.credentials() {
        Some(credentials) if !args.dry_run => {
            wiki.login(&credentials.username, &credentials.password)?;
            wikidata.login(&credentials.username, &credentials.password)?;
        }
        Some(_) => {}
        None if args.dry_run => {}
        None => bail!("RE_BOT_USER and RE_BOT_PASS are required unless --dry-run is set"),
    }

    let lemmas = discover_lemmas(&mut petscan, &SearchFilters::from_config(&config), &ledger)?;
    tracing::info!(candidates = lemmas.len(), "discovered pages");

    let tasks: Vec<Box<dyn Task + '_>> = vec![
        Box::new(AuthTask::new(Arc::clone(&tables))),
        Box::new(DataTask::new(
            &mut wikidata,
            all_factories(
                Arc::clone(&tables),
                current_year(),
                config.directs_readers_to().as_deref(),
            ),
            config.site(),
            args.dry_run,
        )),
    ];
    let tasks = select_tasks(tasks, &config.scanner.tasks)?;

    let options = ScanOptions {
        max_pages: args.max_pages.or(config.scanner.max_pages),
        deadline: args
            .deadline_minutes
            .or(config.scanner.deadline_minutes)
            .map(|minutes| Duration::from_secs(minutes * 60)),
        dry_run: args.dry_run,
        error_category: Some(config.error_category().to_string()),
    };
    let report = Scanner::new(&mut wiki, tasks, &ledger, options).run(&lemmas)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
        println!("requests: {}", wiki.request_count());
    }
    Ok(())
}

fn print_report(report: &ScanReport) {
    println!("processed: {}", report.processed);
    println!("saved: {}", report.saved);
    println!("skipped: {}", report.skipped);
    println!("errors: {}", report.errors.len());
    println!("deadline_reached: {}", report.deadline_reached);
    for error in report.errors.iter() {
        println!("  {}: {}", error.lemma, error.reason);
    }
}

/// Lemma for a page stored as `<title>.wiki`, with `_` for spaces.
fn lemma_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().replace('_', " "))
        .unwrap_or_default();
    if stem.starts_with(LEMMA_PREFIX) {
        stem
    } else {
        format!("{LEMMA_PREFIX}{stem}")
    }
}

fn load_document(path: &Path, lemma: Option<&str>) -> Result<(String, Document)> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let lemma = lemma.map_or_else(|| lemma_from_path(path), ToString::to_string);
    let document = Document::from_text(lemma, &text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok((text, document))
}

#[derive(Debug, Default)]
struct CheckReport {
    checked: usize,
    failures: Vec<(PathBuf, String)>,
}

fn check_path(path: &Path) -> Result<CheckReport> {
    let mut report = CheckReport::default();
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|ext| ext.to_str()) != Some("wiki") {
            continue;
        }
        let text = fs::read_to_string(entry.path())
            .with_context(|| format!("failed to read {}", entry.path().display()))?;
        report.checked += 1;
        if let Err(error) = Document::from_text(lemma_from_path(entry.path()), &text) {
            report
                .failures
                .push((entry.path().to_path_buf(), error.to_string()));
        }
    }
    Ok(report)
}

fn run_check(path: &Path) -> Result<()> {
    let report = check_path(path)?;
    println!("checked: {}", report.checked);
    println!("failed: {}", report.failures.len());
    for (file, reason) in &report.failures {
        println!("  {}: {reason}", normalize_path(file));
    }
    if !report.failures.is_empty() {
        bail!("{} page(s) failed to parse", report.failures.len());
    }
    Ok(())
}

/// Unified diff from `original` to `canonical`, or `None` when they match.
fn normalized_diff(original: &str, canonical: &str, name: &str) -> Option<String> {
    if original == canonical {
        return None;
    }
    Some(
        TextDiff::from_lines(original, canonical)
            .unified_diff()
            .context_radius(2)
            .header(name, &format!("{name} (normalized)"))
            .to_string(),
    )
}

fn run_normalize(file: &Path, write: bool) -> Result<()> {
    let (original, document) = load_document(file, None)?;
    let canonical = document.to_text();
    let name = normalize_path(file);
    let Some(diff) = normalized_diff(&original, &canonical, &name) else {
        println!("{name}: already normalized");
        return Ok(());
    };
    print!("{diff}");
    if write {
        fs::write(file, &canonical)
            .with_context(|| format!("failed to write {}", file.display()))?;
        println!("wrote: {name}");
    }
    Ok(())
}

fn desired_claims_json(
    document: &Document,
    tables: Arc<ReferenceTables>,
    directs_readers_to: Option<&str>,
) -> Result<Value> {
    let mut out = Map::new();
    for factory in all_factories(tables, current_year(), directs_readers_to) {
        let claims = factory
            .desired_claims(document)
            .with_context(|| format!("{} failed", factory.property_id()))?;
        out.insert(
            factory.property_id().to_string(),
            Value::Array(claims.iter().map(|claim| claim.to_json()).collect()),
        );
    }
    Ok(Value::Object(out))
}

fn run_claims(config_path: &Path, args: ClaimsArgs) -> Result<()> {
    let root = project_root()?;
    let config = load_config(config_path)?;
    let tables = load_reference_tables(&config, &root)?;
    let (_, document) = load_document(&args.file, args.lemma.as_deref())?;
    let directs_readers_to = config.directs_readers_to();

    if args.json {
        let claims = desired_claims_json(&document, tables, directs_readers_to.as_deref())?;
        println!("{}", serde_json::to_string_pretty(&claims)?);
        return Ok(());
    }
    println!("lemma: {}", document.lemma());
    for factory in all_factories(tables, current_year(), directs_readers_to.as_deref()) {
        let claims = factory
            .desired_claims(&document)
            .with_context(|| format!("{} failed", factory.property_id()))?;
        for claim in &claims {
            println!(
                "{}: {} (qualifiers: {})",
                factory.property_id(),
                claim.target(),
                claim.qualifiers.len()
            );
        }
    }
    Ok(())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
