//! Ghfixture CLI

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context};
use ghfixture::{format_json_files, FixtureConfig, FixtureController, ModeFlags};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Ghfixture v{}", env!("CARGO_PKG_VERSION"));
        eprintln!();
        eprintln!("Usage: ghfixture <command> [options]");
        eprintln!();
        eprintln!("Commands:");
        eprintln!("  serve [config.toml]   Serve fixtures until Ctrl-C");
        eprintln!("  format <dir>          Pretty-print every JSON file under <dir>");
        eprintln!();
        eprintln!("Environment:");
        eprintln!("  TEST_GITHUB_USE_PROXY       proxy unmatched requests to the upstream");
        eprintln!("  TEST_GITHUB_TAKE_SNAPSHOT   record proxied requests on exit (implies proxy)");
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "serve" => serve(args.get(2).map(PathBuf::from)),
        "format" => match args.get(2) {
            Some(dir) => format(&PathBuf::from(dir)),
            None => {
                eprintln!("Usage: ghfixture format <dir>");
                process::exit(1);
            }
        },
        command => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'ghfixture' for usage information.");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn serve(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => FixtureConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FixtureConfig::default(),
    };
    config.mode = config.mode.union(ModeFlags::from_env());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;

    runtime.block_on(async move {
        let mut controller = FixtureController::new(config)?;
        controller.start().await?;

        if let Some(url) = controller.base_url() {
            info!("Serving fixtures at {}", url);
        }

        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;
        info!("Received SIGINT, shutting down");

        if let Some(summary) = controller.stop().await? {
            info!(
                "Snapshot: {} mapping(s), {} body file(s)",
                summary.mappings_written, summary.bodies_extracted
            );
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn format(dir: &Path) -> anyhow::Result<()> {
    if !dir.is_dir() {
        bail!("Directory not found: {}", dir.display());
    }

    let count = format_json_files(dir)?;
    println!("Reformatted {count} file(s) under {}", dir.display());
    Ok(())
}
