mod config;
mod driver_cmd;
mod invoke_cmd;
mod launch_cmd;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use mj_harness::platform;
use mj_harness::probe;

use config::{Overrides, ResolvedConfig};

#[derive(Parser)]
#[command(name = "mj-e2e", about = "End-to-end harness for the mighty-jujutsu desktop app")]
struct Cli {
    /// Desktop project root (the directory containing src-tauri)
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default mj-e2e.toml into the project
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run the debug build of the app
    Build,
    /// Print where the app binary is expected
    Resolve {
        /// OS identifier (macos, darwin, linux, windows, win32); defaults to the host
        #[arg(long)]
        platform: Option<String>,
    },
    /// Wait for a debug endpoint to come up
    Probe {
        /// Debug port (overrides MJ_DEBUG_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// How long to wait, in milliseconds (overrides MJ_STARTUP_TIMEOUT_MS)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Launch the app, attach to its first page, then close it
    Launch {
        /// Debug port (overrides MJ_DEBUG_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Startup budget in milliseconds (overrides MJ_STARTUP_TIMEOUT_MS)
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Build the app first
        #[arg(long)]
        build: bool,
        /// Keep the app running until Ctrl+C
        #[arg(long)]
        hold: bool,
    },
    /// Launch the app and call one backend command through its page
    Invoke {
        /// Command to call
        #[arg(value_enum)]
        command: InvokeTarget,
        /// Repository the command runs against
        #[arg(long)]
        repo: Option<String>,
        /// Maximum number of log entries
        #[arg(long)]
        limit: Option<usize>,
        /// Debug port (overrides MJ_DEBUG_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Startup budget in milliseconds (overrides MJ_STARTUP_TIMEOUT_MS)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Run tauri-driver until Ctrl+C
    Driver {
        /// WebDriver port
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InvokeTarget {
    /// Working-copy status
    Status,
    /// Change history
    Log,
    /// Local and remote bookmarks
    Bookmarks,
}

/// Execute the `mj-e2e init` command: write the config file.
fn cmd_init(project: &Path, force: bool) -> anyhow::Result<()> {
    let path = config::config_path(project);
    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::default();
    let path = config::save_config(project, &cfg)?;

    println!("Config written to {}", path.display());
    println!("  app.name = {}", cfg.app.name);
    println!("  debug.port = {}", cfg.debug.port);
    println!("  build = {} {}", cfg.build.program, cfg.build.args.join(" "));
    Ok(())
}

/// Execute the `mj-e2e resolve` command.
fn cmd_resolve(project: &Path, os: Option<&str>) -> anyhow::Result<()> {
    let location = match os {
        Some(os) => {
            let file = config::load_config(project)?.unwrap_or_default();
            let target_dir = match &file.app.target_dir {
                Some(dir) => project.join(dir),
                None => platform::debug_target_dir(project),
            };
            platform::resolve_for_os(os, &target_dir, &file.app.name)?
        }
        None => ResolvedConfig::resolve(project, &Overrides::default())?.harness.binary,
    };

    let exists = |p: &Path| if p.exists() { "" } else { " (missing)" };
    println!("{}{}", location.primary.display(), exists(&location.primary));
    if let Some(fallback) = &location.fallback {
        println!("fallback: {}{}", fallback.display(), exists(fallback));
    }
    Ok(())
}

/// Execute the `mj-e2e probe` command.
async fn cmd_probe(resolved: &ResolvedConfig) -> anyhow::Result<()> {
    let harness = &resolved.harness;
    let url = harness.version_url();
    let client = probe::local_client()?;

    println!("Waiting for {url} ...");
    match probe::wait_until_ready(&client, &url, harness.startup_timeout, harness.poll_interval).await {
        Some(elapsed) => {
            println!("Debug endpoint ready after {}ms", elapsed.as_millis());
            Ok(())
        }
        None => anyhow::bail!(
            "debug endpoint not ready within {}ms",
            harness.startup_timeout.as_millis()
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let project = cli.project;

    match cli.command {
        Commands::Init { force } => cmd_init(&project, force),
        Commands::Build => {
            let resolved = ResolvedConfig::resolve(&project, &Overrides::default())?;
            println!("Building in {} ...", resolved.project_root.display());
            resolved
                .build
                .run()
                .await
                .map(|elapsed| println!("Build finished in {:.1}s", elapsed.as_secs_f64()))
                .context("build step failed")
        }
        Commands::Resolve { platform } => cmd_resolve(&project, platform.as_deref()),
        Commands::Probe { port, timeout_ms } => {
            let overrides = Overrides {
                debug_port: port,
                startup_timeout_ms: timeout_ms,
                ..Overrides::default()
            };
            let resolved = ResolvedConfig::resolve(&project, &overrides)?;
            cmd_probe(&resolved).await
        }
        Commands::Launch {
            port,
            timeout_ms,
            build,
            hold,
        } => {
            let overrides = Overrides {
                debug_port: port,
                startup_timeout_ms: timeout_ms,
                ..Overrides::default()
            };
            let resolved = ResolvedConfig::resolve(&project, &overrides)?;
            launch_cmd::run_launch(&resolved, build, hold).await
        }
        Commands::Invoke {
            command,
            repo,
            limit,
            port,
            timeout_ms,
        } => {
            let overrides = Overrides {
                debug_port: port,
                startup_timeout_ms: timeout_ms,
                ..Overrides::default()
            };
            let resolved = ResolvedConfig::resolve(&project, &overrides)?;
            invoke_cmd::run_invoke(&resolved, command, repo, limit).await
        }
        Commands::Driver { port } => {
            let overrides = Overrides {
                driver_port: port,
                ..Overrides::default()
            };
            let resolved = ResolvedConfig::resolve(&project, &overrides)?;
            driver_cmd::run_driver(&resolved).await
        }
    }
}
