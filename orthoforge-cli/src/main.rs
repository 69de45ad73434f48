//! OrthoForge CLI - scenery tile builder front end.

mod progress;

use clap::{Args, Parser, Subcommand};
use orthoforge::build::{BuildError, BuildOrchestrator, BuildReport};
use orthoforge::config::{BuildConfig, DEFAULT_PROVIDER, DEFAULT_ZOOM};
use orthoforge::coord::TileKey;
use orthoforge::fetch::HttpTextureFetcher;
use orthoforge::logging;
use orthoforge::producer::GridProducer;
use orthoforge::provider::{ProviderRegistry, ReqwestClient};
use orthoforge::texture::DdsTextureConverter;
use progress::ConsoleProgress;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Exit code when a build is interrupted by the user.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "orthoforge", version = orthoforge::VERSION)]
#[command(about = "Build photo-scenery tiles for X-Plane from satellite imagery")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build one or more scenery tiles
    Build(BuildArgs),
    /// List the available imagery providers
    Providers,
}

#[derive(Args)]
struct BuildArgs {
    /// Tiles to build, as `+47+007` or `47,7` (south-west corner)
    #[arg(required = true, value_parser = parse_tile)]
    tiles: Vec<TileKey>,

    /// Zoom level textures are fetched at
    #[arg(long, default_value_t = DEFAULT_ZOOM)]
    zoom: u8,

    /// Imagery provider code
    #[arg(long, default_value = DEFAULT_PROVIDER)]
    provider: String,

    /// Directory scenery directories are created under
    #[arg(long)]
    tiles_root: Option<PathBuf>,

    /// Root of the raw imagery cache
    #[arg(long)]
    imagery_root: Option<PathBuf>,

    /// Configuration file to load before applying flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of concurrent download workers
    #[arg(long)]
    download_workers: Option<usize>,

    /// Number of concurrent convert workers
    #[arg(long)]
    convert_workers: Option<usize>,

    /// Attempts per texture before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Pause before retrying a failed download, in milliseconds
    #[arg(long)]
    retry_backoff_ms: Option<u64>,

    /// Generate tile content without downloading imagery
    #[arg(long)]
    skip_downloads: bool,

    /// Download imagery without packaging textures
    #[arg(long)]
    skip_converts: bool,
}

fn parse_tile(value: &str) -> Result<TileKey, String> {
    let invalid = || format!("invalid tile '{}' (expected +47+007 or 47,7)", value);

    if let Some((lat, lon)) = value.split_once(',') {
        let lat = lat.trim().parse().map_err(|_| invalid())?;
        let lon = lon.trim().parse().map_err(|_| invalid())?;
        return Ok(TileKey::new(lat, lon));
    }
    if value.len() == 7 {
        let (lat, lon) = value.split_at(3);
        let lat = lat.parse().map_err(|_| invalid())?;
        let lon = lon.parse().map_err(|_| invalid())?;
        return Ok(TileKey::new(lat, lon));
    }
    Err(invalid())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _logging_guard =
        match logging::init_logging(logging::DEFAULT_LOG_DIR, logging::DEFAULT_LOG_FILE) {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("error: failed to initialize logging: {}", e);
                return ExitCode::FAILURE;
            }
        };

    match cli.command {
        Command::Providers => list_providers(),
        Command::Build(args) => run_build(args),
    }
}

fn list_providers() -> ExitCode {
    let registry = ProviderRegistry::builtin();
    for code in registry.codes() {
        if let Ok(provider) = registry.get(code) {
            println!(
                "{:>6}  {} (up to zoom {})",
                console::style(code).bold(),
                provider.name(),
                provider.max_zoom()
            );
        }
    }
    ExitCode::SUCCESS
}

fn run_build(args: BuildArgs) -> ExitCode {
    let mut config = match &args.config {
        Some(path) => match BuildConfig::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => BuildConfig::default(),
    };
    apply_overrides(&mut config, &args);

    let registry = ProviderRegistry::builtin();
    let provider = match registry.get(&config.provider_code) {
        Ok(provider) => provider.clone(),
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("available providers: {}", registry.codes().join(", "));
            return ExitCode::FAILURE;
        }
    };
    if config.zoom > provider.max_zoom() {
        eprintln!(
            "error: {} serves up to zoom {}, requested {}",
            provider.name(),
            provider.max_zoom(),
            config.zoom
        );
        return ExitCode::FAILURE;
    }

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\ninterrupt received, shutting down");
        handler_token.cancel();
    }) {
        eprintln!("error: failed to install signal handler: {}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let client = match ReqwestClient::new() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let progress = Arc::new(ConsoleProgress::new());
    let orchestrator = BuildOrchestrator::new(
        Arc::new(HttpTextureFetcher::new(Arc::new(client), provider)),
        Arc::new(DdsTextureConverter::new()),
        Arc::new(GridProducer::new()),
        config,
        Arc::clone(&progress) as _,
    );

    info!(tiles = args.tiles.len(), "starting build run");
    let result = runtime.block_on(orchestrator.build_tile_list(&args.tiles, &cancel));
    progress.clear();

    let reports = match result {
        Ok(reports) => reports,
        Err(BuildError::BuildInProgress) => {
            eprintln!("error: a build is already in progress");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    print_summary(&reports);
    exit_code(&reports, cancel.is_cancelled())
}

fn apply_overrides(config: &mut BuildConfig, args: &BuildArgs) {
    config.zoom = args.zoom;
    config.provider_code = args.provider.clone();
    if let Some(root) = &args.tiles_root {
        config.tiles_root = root.clone();
    }
    if let Some(root) = &args.imagery_root {
        config.imagery_root = root.clone();
    }
    if let Some(workers) = args.download_workers {
        config.download.workers = workers.max(1);
    }
    if let Some(workers) = args.convert_workers {
        config.convert.workers = workers.max(1);
    }
    if let Some(attempts) = args.max_attempts {
        config.download.max_attempts = attempts.max(1);
    }
    if let Some(ms) = args.retry_backoff_ms {
        config.download.retry_backoff = Duration::from_millis(ms);
    }
    config.skip_downloads = config.skip_downloads || args.skip_downloads;
    config.skip_converts = config.skip_converts || args.skip_converts;
}

fn print_summary(reports: &[BuildReport]) {
    for report in reports {
        let status = match &report.outcome {
            outcome if report.is_committed() => console::style(outcome.to_string()).green(),
            outcome if report.is_interrupted() => console::style(outcome.to_string()).yellow(),
            outcome => console::style(outcome.to_string()).red(),
        };
        println!("{} {}", console::style(report.tile).bold(), status);
        if report.is_committed() {
            println!(
                "  {} textures fetched, {} abandoned, {} packaged in {:.1}s",
                report.downloads.completed,
                report.failed_downloads(),
                report.converts.completed,
                report.elapsed.as_secs_f64()
            );
        }
    }
}

fn exit_code(reports: &[BuildReport], cancelled: bool) -> ExitCode {
    if cancelled || reports.iter().any(|r| r.is_interrupted()) {
        return ExitCode::from(EXIT_INTERRUPTED);
    }
    if reports.iter().all(|r| r.is_committed()) && !reports.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
