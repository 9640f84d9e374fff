use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duodither::models::{PageContext, RunMode, SiteConfig};
use duodither::server;
use duodither::services::{BuildCache, DitherTransform, FileWatcher, SiteBuilder};

#[derive(Parser)]
#[command(name = "duodither")]
#[command(about = "Two-tone ordered dithering for static site images")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform every generated page in the output directory in place
    Build,
    /// Transform a single page and print the result
    Transform {
        /// Rendered page to read
        file: PathBuf,

        /// Output path the page will be written to (defaults to FILE)
        #[arg(short, long)]
        output_path: Option<PathBuf>,

        /// Source file carrying front matter
        #[arg(short, long)]
        input_path: Option<PathBuf>,

        /// Page data entry, e.g. --set noDither=true
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// Start the HTTP server
    Serve,
    /// Start the HTTP server and rebuild when sources change
    Dev,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Build) => run_build_command().await,
        Some(Commands::Transform {
            file,
            output_path,
            input_path,
            set,
        }) => run_transform_command(&file, output_path, input_path, &set).await,
        Some(Commands::Serve) => run_server().await,
        Some(Commands::Dev) => run_dev_server().await,
        None => {
            run_status_command();
            Ok(())
        }
    }
}

fn init_cli_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duodither=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time().with_writer(std::io::stderr))
        .init();
}

fn init_server_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duodither=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn config_path() -> PathBuf {
    std::env::var("CONFIG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.yaml"))
}

fn load_config() -> anyhow::Result<SiteConfig> {
    Ok(SiteConfig::load(&config_path())?)
}

/// Transform the whole output tree once
async fn run_build_command() -> anyhow::Result<()> {
    init_cli_tracing();

    let config = load_config()?;
    let transform = Arc::new(DitherTransform::new(config, RunMode::from_env()));
    let cache = BuildCache::new();

    let report = SiteBuilder::new(transform).build(&cache).await?;
    println!(
        "Transformed {} pages ({} rewritten, {} failed, {} images rendered)",
        report.pages,
        report.rewritten,
        report.failed,
        cache.render_count()
    );

    if report.failed > 0 {
        anyhow::bail!("{} pages failed to transform", report.failed);
    }
    Ok(())
}

/// Transform one page and write it to stdout
async fn run_transform_command(
    file: &Path,
    output_path: Option<PathBuf>,
    input_path: Option<PathBuf>,
    set: &[String],
) -> anyhow::Result<()> {
    init_cli_tracing();

    let config = load_config()?;
    let html = tokio::fs::read_to_string(file).await?;
    let data = parse_page_data(set)?;

    let page = PageContext {
        ctx: None,
        data: (!data.is_empty()).then_some(data),
        input_path,
    };
    let output_path = output_path.unwrap_or_else(|| file.to_path_buf());

    let transform = DitherTransform::new(config, RunMode::from_env());
    let cache = BuildCache::new();
    let out = transform.transform(&cache, &html, &output_path, &page).await;
    print!("{out}");

    Ok(())
}

/// Parse `key=value` pairs; values that are valid JSON keep their type
fn parse_page_data(pairs: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut data = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected KEY=VALUE, got {pair:?}"))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.into()));
        data.insert(key.trim().to_string(), value);
    }
    Ok(data)
}

/// Display status and configuration information
fn run_status_command() {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let bind_addr = std::env::var("BIND_ADDR").ok();
    let config_file = std::env::var("CONFIG_FILE").ok();
    let run_mode = RunMode::from_env();

    println!("duodither v{VERSION}");
    println!("Two-tone ordered dithering for static site images\n");

    println!("Environment Variables:");
    println!(
        "  BIND_ADDR                  = {}",
        bind_addr.as_deref().unwrap_or("0.0.0.0:3000 (default)")
    );
    println!(
        "  CONFIG_FILE                = {}",
        config_file.as_deref().unwrap_or("config.yaml (default)")
    );
    println!(
        "  DUODITHER_RUN_MODE         = {}",
        if run_mode.serve { "serve" } else { "(not set)" }
    );
    println!(
        "  DUODITHER_DISABLE_IN_SERVE = {}",
        if run_mode.disable_in_serve { "1" } else { "(not set)" }
    );

    println!("\nConfiguration:");
    let path = config_path();
    if !path.exists() {
        println!("  {} not found, using defaults", path.display());
    }
    match SiteConfig::load(&path) {
        Ok(config) => {
            println!("  Images:     {}", config.image_dir().display());
            println!("  Output:     {}", config.output_dir().display());
            println!("  Stylesheet: {}", config.stylesheet_path().display());
            println!("  Bayer size: {}", config.bayer_size);
            println!("  Origin:     {}", config.site_origin);
        }
        Err(e) => println!("  Invalid: {e}"),
    }
    if run_mode.dither_globally_disabled() {
        println!("\nDithering is disabled in serve mode.");
    }

    println!("\nCommands:");
    println!("  duodither build      Transform every page in the output directory");
    println!("  duodither transform  Transform one page to stdout");
    println!("  duodither serve      Start the HTTP server");
    println!("  duodither dev        Start server and rebuild on changes");
    println!("\nRun 'duodither --help' for more details.");
}

/// Run the HTTP server
async fn run_server() -> anyhow::Result<()> {
    init_server_tracing();

    let config = load_config()?;
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    tracing::info!(
        output = %config.output_dir().display(),
        bayer_size = config.bayer_size,
        "Serving site"
    );

    let state = server::create_app_state(config, RunMode::from_env())?;
    let app = server::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "duodither server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Run the HTTP server and rebuild the site whenever a source changes
async fn run_dev_server() -> anyhow::Result<()> {
    init_server_tracing();

    let config = load_config()?;
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let run_mode = RunMode::from_env();

    let transform = Arc::new(DitherTransform::new(config.clone(), run_mode));
    let builder = Arc::new(SiteBuilder::new(transform));
    rebuild(&builder).await;

    let file_watcher = FileWatcher::new(&[
        config.image_dir(),
        config.stylesheet_path(),
        config.output_dir(),
    ]);
    if file_watcher.is_active() {
        tracing::info!("File watcher active, rebuilding on change");
        let mut changes = file_watcher.subscribe();
        let builder = builder.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => {
                        tracing::info!(paths = event.paths.len(), "Sources changed, rebuilding");
                        rebuild(&builder).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Change events lagged, rebuilding");
                        rebuild(&builder).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    } else {
        tracing::warn!("File watcher not active, sources will not be rebuilt");
    }

    let state = server::create_app_state(config, run_mode)?;
    let app = server::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "duodither dev server listening");

    axum::serve(listener, app).await?;

    drop(file_watcher);
    Ok(())
}

/// One build pass with a fresh cache
async fn rebuild(builder: &SiteBuilder) {
    let cache = BuildCache::new();
    match builder.build(&cache).await {
        Ok(report) => tracing::info!(
            pages = report.pages,
            rewritten = report.rewritten,
            failed = report.failed,
            "Rebuild finished"
        ),
        Err(e) => tracing::error!(error = %e, "Rebuild failed"),
    }
}
