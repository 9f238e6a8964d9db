//! vgr-bench - NullAway warning reduction benchmark for VGRTool
//!
//! A CLI tool that runs javac with Error Prone and NullAway over the NJR-1
//! dataset before and after refactoring it with VGRTool, and reports how
//! many null-safety errors the refactoring removed.
//!
//! Exit codes:
//!   0 - Success (individual dataset failures are reported, not fatal)
//!   1 - Setup error (config, download, missing cache or jar, etc.)

mod analysis;
mod cli;
mod config;
mod models;
mod report;
mod runner;
mod scanner;
mod toolchain;
mod workspace;

use anyhow::{Context, Result};
use cli::{Args, Command};
use config::{Config, CONFIG_FILE_NAME};
use runner::Pipeline;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;
use workspace::{Layout, RestoreMethod, Workspace};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("vgr-bench v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args).await {
        error!("Benchmark failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .vgrbench.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize paths, toolchain, timeouts, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Dispatch the selected command.
async fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;

    let layout = Layout::resolve(&config.paths)?;
    let show_progress = !args.quiet;
    let command = args.command();

    match command {
        Command::Test => {
            print_layout(&config, &layout);
            return Ok(());
        }
        Command::Clean | Command::FullClean => {
            let full = command == Command::FullClean;
            let removed = Workspace::new(&config, &layout, show_progress).clean(full)?;
            if removed.is_empty() {
                println!("✅ Nothing to clean.");
            } else {
                for dir in &removed {
                    println!("🗑️  Removed {}", dir.display());
                }
                println!("✅ Clean complete.");
            }
            return Ok(());
        }
        Command::Reset { skip_build } => {
            let method = Workspace::new(&config, &layout, show_progress)
                .reset(skip_build)
                .await?;
            match method {
                RestoreMethod::Git => println!("✅ Working copy restored from git."),
                RestoreMethod::Cache => println!("✅ Working copy recreated from the dataset cache."),
            }
            return Ok(());
        }
        _ => {}
    }

    let config = Arc::new(config);
    let layout = Arc::new(layout);
    let pipeline = Pipeline::new(config.clone(), layout.clone())?
        .with_limit(args.limit)
        .with_progress(show_progress);

    let outcome = match command {
        Command::Dataset { ref name } => Some(pipeline.run_single(name).await?),
        ref other => pipeline.run(&other.stages()).await?,
    };

    match outcome {
        Some(summary_report) => {
            println!();
            print!("{}", report::console_summary(&summary_report.summary));
            println!("   Duration: {:.1}s", summary_report.metadata.duration_seconds);
            println!(
                "\n✅ Benchmark complete! Results saved to: {}",
                layout.summary_csv().display()
            );
        }
        None => println!("\n✅ Done. Results in {}", layout.results_dir.display()),
    }

    Ok(())
}

/// Print the resolved layout for the `test` command.
fn print_layout(config: &Config, layout: &Layout) {
    println!("🧪 Resolved layout:");
    println!("   Root:        {}", layout.root.display());
    println!("   Cache:       {}", layout.cache_dir.display());
    println!("   Working:     {}", layout.working_dir.display());
    println!("   Archive:     {}", layout.archive_dir.display());
    println!("   Results:     {}", layout.results_dir.display());
    println!("   Jars:        {}", layout.jars_dir.display());
    println!("   Refactorer:  {}", config.refactor.jar.display());
    println!("   Jobs:        {}", config.jobs());
    println!("   Timeout:     {}s", config.pipeline.timeout_seconds);
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default()? {
        Some(config) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}
