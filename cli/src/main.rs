use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use memtriage_core::{AnalysisBundle, BranchOutcome, CombinedResult, ExecutionStatus};
use memtriage_engine::{
    BatchScheduler, EngineConfig, MetadataExtractor, OutputFormat, PluginExecutor,
    PostProcessingCoordinator, ProfileDetector, SignatureScanner, ToolClass, ToolKind,
    ToolSettings, VerifiedTool, format_batch, format_bundle, format_combined, format_profile,
    path_items, qualified_plugin_name,
};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit status when the command ran but some item did not succeed.
const EXIT_ITEM_FAILURES: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "memtriage", version)]
#[command(about = "Run memory-forensics tools and normalize their results")]
struct Cli {
    /// YAML configuration file (defaults apply when omitted).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log level: trace, debug, info, warn or error.
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Shorthand for --log-level debug.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Verify the configured tool binaries.
    Check,
    /// Detect the operating system of a memory image.
    Detect(DetectArgs),
    /// Run a batch of analysis plugins against a memory image.
    Run(RunArgs),
    /// Scan artifacts for embedded signatures.
    Scan(ScanArgs),
    /// Extract metadata from artifacts.
    Metadata(MetadataArgs),
    /// Scan and extract metadata from artifacts in one pass.
    Process(ProcessArgs),
}

#[derive(Debug, Args)]
struct DetectArgs {
    /// Memory image to inspect.
    #[arg(long)]
    image: PathBuf,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Memory image to analyze.
    #[arg(long)]
    image: PathBuf,
    /// Directory for raw plugin output and the report.
    #[arg(long)]
    output: PathBuf,
    /// Comma-separated plugins (default: the configured default list).
    #[arg(long, conflicts_with = "critical")]
    plugins: Option<String>,
    /// Run the configured critical plugins.
    #[arg(long)]
    critical: bool,
    /// Maximum concurrent plugins (default: configured ceiling).
    #[arg(long)]
    jobs: Option<usize>,
    /// Per-plugin timeout in seconds (default: configured timeout).
    #[arg(long)]
    timeout: Option<u64>,
    /// Detect the image OS first and qualify bare plugin names with it.
    #[arg(long)]
    detect_profile: bool,
    /// Report format.
    #[arg(long, default_value = "json")]
    format: OutputFormat,
    /// Exit with status 2 when any plugin did not succeed.
    #[arg(long)]
    fail_on_error: bool,
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Artifacts to scan.
    #[arg(long = "input", required = true)]
    inputs: Vec<PathBuf>,
    /// List signatures only; do not carve embedded files.
    #[arg(long)]
    no_extract: bool,
    /// Maximum concurrent scans (default: configured ceiling).
    #[arg(long)]
    jobs: Option<usize>,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: OutputFormat,
    /// Exit with status 2 when any scan did not succeed.
    #[arg(long)]
    fail_on_error: bool,
}

#[derive(Debug, Args)]
struct MetadataArgs {
    /// Artifacts to inspect.
    #[arg(long = "input", required = true)]
    inputs: Vec<PathBuf>,
    /// Maximum concurrent extractions (default: configured ceiling).
    #[arg(long)]
    jobs: Option<usize>,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: OutputFormat,
    /// Exit with status 2 when any extraction did not succeed.
    #[arg(long)]
    fail_on_error: bool,
}

#[derive(Debug, Args)]
struct ProcessArgs {
    /// Artifacts to process.
    #[arg(long = "input", required = true)]
    inputs: Vec<PathBuf>,
    /// Skip the signature scan.
    #[arg(long)]
    no_scan: bool,
    /// Skip metadata extraction.
    #[arg(long)]
    no_metadata: bool,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: OutputFormat,
    /// Exit with status 2 when any requested analysis did not succeed.
    #[arg(long)]
    fail_on_error: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    debug!(version = PACKAGE_VERSION, "memtriage starting");

    let result = match load_config(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Command::Check => run_check(&config),
            Command::Detect(args) => run_detect(&config, args).await,
            Command::Run(args) => run_plugins(&config, args).await,
            Command::Scan(args) => run_scan(&config, args).await,
            Command::Metadata(args) => run_metadata(&config, args).await,
            Command::Process(args) => run_process(&config, args).await,
        },
        Err(err) => Err(err),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if let Some(level) = &cli.log_level {
        parse_level(level)
    } else if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        let level = env::var("MEMTRIAGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        parse_level(&level)
    };

    let filter = if env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level.as_str().to_ascii_lowercase())
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(err) = installed {
        eprintln!("warning: logging not initialized: {err}");
    }
}

fn parse_level(raw: &str) -> Level {
    match raw.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{raw}', defaulting to info. Valid levels: trace, debug, info, warn, error"
            );
            Level::INFO
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    let config = match path {
        Some(path) => EngineConfig::load(path)
            .map_err(|err| format!("Failed to load config '{}': {err}", path.display()))?,
        None => EngineConfig::default(),
    };
    let config = config.with_env_overrides().map_err(|e| e.to_string())?;
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn run_check(config: &EngineConfig) -> Result<i32, String> {
    let mut unavailable = 0usize;
    for kind in [ToolKind::Volatility, ToolKind::Binwalk, ToolKind::ExifTool] {
        let settings = tool_settings(config, kind);
        if kind != ToolKind::Volatility && !settings.enabled {
            println!("{:<12} disabled", kind.label());
            continue;
        }
        match VerifiedTool::verify(kind, &settings.path) {
            Ok(tool) => println!(
                "{:<12} ok       {} ({})",
                kind.label(),
                tool.path().display(),
                tool.version().unwrap_or("unknown version")
            ),
            Err(err) => {
                unavailable += 1;
                println!("{:<12} missing  {err}", kind.label());
            }
        }
    }

    if unavailable > 0 {
        return Err(format!("{unavailable} enabled tool(s) unavailable"));
    }
    Ok(0)
}

async fn run_detect(config: &EngineConfig, args: DetectArgs) -> Result<i32, String> {
    let tool = verify_framework(config)?;
    let profile = ProfileDetector::new(tool).detect(&args.image).await;
    println!("{}", format_profile(&profile, args.format)?);
    Ok(0)
}

async fn run_plugins(config: &EngineConfig, args: RunArgs) -> Result<i32, String> {
    let tool = verify_framework(config)?;
    let timeout = args
        .timeout
        .map_or_else(|| config.timeouts.plugin(), Duration::from_secs);

    let mut plugins = if args.critical {
        config.plugins.critical.clone()
    } else {
        let requested = parse_csv_list(args.plugins);
        if requested.is_empty() {
            config.plugins.default.clone()
        } else {
            requested
        }
    };
    if plugins.is_empty() {
        return Err("No plugins to run".to_string());
    }

    let profile = if args.detect_profile {
        let profile = ProfileDetector::new(tool.clone()).detect(&args.image).await;
        plugins = plugins
            .iter()
            .map(|plugin| qualified_plugin_name(profile.os_category, plugin))
            .collect();
        Some(profile)
    } else {
        None
    };

    let executor = PluginExecutor::new(tool, &args.image, &args.output, timeout)
        .map_err(|e| e.to_string())?;
    let scheduler = batch_scheduler(args.jobs, ToolClass::MemoryAnalysis, config);
    info!(
        plugins = plugins.len(),
        max_concurrent = scheduler.max_concurrent(),
        "Starting plugin batch"
    );
    let results = scheduler.run_batch(plugins, Arc::new(executor)).await;

    let mut bundle = AnalysisBundle::new(&args.image);
    bundle.profile = profile;
    for result in results.into_values() {
        bundle.insert_plugin(result);
    }

    let report_path = args
        .output
        .join(format!("report.{}", args.format.extension()));
    let rendered = format_bundle(&bundle, args.format)?;
    fs::write(&report_path, rendered)
        .map_err(|err| format!("Failed to write '{}': {err}", report_path.display()))?;

    let counts = bundle.status_counts();
    let count = |status: ExecutionStatus| counts.get(&status).copied().unwrap_or(0);
    println!(
        "Ran {} plugin(s): {} succeeded, {} failed, {} timed out. Report: '{}'.",
        bundle.plugin_count(),
        count(ExecutionStatus::Success),
        count(ExecutionStatus::Failed),
        count(ExecutionStatus::Timeout),
        report_path.display()
    );

    Ok(exit_code(bundle.all_succeeded(), args.fail_on_error))
}

async fn run_scan(config: &EngineConfig, args: ScanArgs) -> Result<i32, String> {
    config.storage.ensure_extraction_dir().map_err(|e| e.to_string())?;
    let scanner = SignatureScanner::from_config(config)
        .map_err(|e| e.to_string())?
        .with_extract(!args.no_extract);
    if !scanner.is_enabled() {
        warn!("Signature scanner is disabled by configuration");
    }

    let scheduler = batch_scheduler(args.jobs, ToolClass::SignatureScan, config);
    let results = scheduler
        .run_batch(path_items(&args.inputs), Arc::new(scanner))
        .await;
    println!("{}", format_batch(&results, args.format)?);

    let all_succeeded = results.values().all(|r| r.is_success());
    Ok(exit_code(all_succeeded, args.fail_on_error))
}

async fn run_metadata(config: &EngineConfig, args: MetadataArgs) -> Result<i32, String> {
    let extractor = MetadataExtractor::from_config(config).map_err(|e| e.to_string())?;
    if !extractor.is_enabled() {
        warn!("Metadata extractor is disabled by configuration");
    }

    let scheduler = batch_scheduler(args.jobs, ToolClass::Metadata, config);
    let results = scheduler
        .run_batch(path_items(&args.inputs), Arc::new(extractor))
        .await;
    println!("{}", format_batch(&results, args.format)?);

    let all_succeeded = results.values().all(|r| r.is_success());
    Ok(exit_code(all_succeeded, args.fail_on_error))
}

async fn run_process(config: &EngineConfig, args: ProcessArgs) -> Result<i32, String> {
    if args.no_scan && args.no_metadata {
        return Err("Nothing to do: both --no-scan and --no-metadata given".to_string());
    }
    if !args.no_scan {
        config.storage.ensure_extraction_dir().map_err(|e| e.to_string())?;
    }
    let coordinator = PostProcessingCoordinator::from_config(config).map_err(|e| e.to_string())?;

    let mut combined = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        combined.push(
            coordinator
                .process(input, !args.no_scan, !args.no_metadata)
                .await,
        );
    }
    println!("{}", format_combined_list(&combined, args.format)?);

    let all_succeeded = combined.iter().all(|c| {
        [&c.signature_scan, &c.metadata]
            .into_iter()
            .flatten()
            .all(branch_succeeded)
    });
    Ok(exit_code(all_succeeded, args.fail_on_error))
}

// ---------------------------------------------------------------------------

fn tool_settings(config: &EngineConfig, kind: ToolKind) -> &ToolSettings {
    match kind {
        ToolKind::Volatility => &config.tools.volatility,
        ToolKind::Binwalk => &config.tools.binwalk,
        ToolKind::ExifTool => &config.tools.exiftool,
    }
}

fn verify_framework(config: &EngineConfig) -> Result<VerifiedTool, String> {
    VerifiedTool::verify(ToolKind::Volatility, &config.tools.volatility.path)
        .map_err(|e| e.to_string())
}

fn batch_scheduler(jobs: Option<usize>, class: ToolClass, config: &EngineConfig) -> BatchScheduler {
    match jobs {
        Some(jobs) => BatchScheduler::new(jobs),
        None => BatchScheduler::for_class(class, &config.concurrency),
    }
}

fn branch_succeeded(branch: &BranchOutcome) -> bool {
    branch.result().is_some_and(|r| r.is_success())
}

fn exit_code(all_succeeded: bool, fail_on_error: bool) -> i32 {
    if fail_on_error && !all_succeeded {
        EXIT_ITEM_FAILURES
    } else {
        0
    }
}

/// Formats several combined results; JSON and YAML render one array.
fn format_combined_list(results: &[CombinedResult], format: OutputFormat) -> Result<String, String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(results)
            .map_err(|e| format!("JSON serialization failed: {e}")),
        OutputFormat::Yaml => {
            serde_yaml::to_string(results).map_err(|e| format!("YAML serialization failed: {e}"))
        }
        OutputFormat::Markdown | OutputFormat::Table => {
            let mut out = String::new();
            for combined in results {
                out.push_str(&format_combined(combined, format)?);
            }
            Ok(out)
        }
    }
}

fn parse_csv_list(raw: Option<String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{EXIT_ITEM_FAILURES, exit_code, parse_csv_list, parse_level};
    use tracing::Level;

    #[test]
    fn test_parse_csv_list_trims_and_drops_empty() {
        let parsed = parse_csv_list(Some(" pslist, netscan, ,malfind ".to_string()));
        assert_eq!(parsed, vec!["pslist", "netscan", "malfind"]);
    }

    #[test]
    fn test_parse_csv_list_none_is_empty() {
        assert!(parse_csv_list(None).is_empty());
    }

    #[test]
    fn test_parse_level_is_case_insensitive() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn test_exit_code_only_fails_when_asked() {
        assert_eq!(exit_code(false, false), 0);
        assert_eq!(exit_code(true, true), 0);
        assert_eq!(exit_code(false, true), EXIT_ITEM_FAILURES);
    }
}
