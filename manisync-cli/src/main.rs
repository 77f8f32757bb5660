use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use manisync_core::verify::verify;
use manisync_core::{EngineConfig, Manifest, ManifestService, SyncEngine};

#[derive(Parser)]
#[command(name = "manisync", version, about = "Publish a hashed manifest of a content directory")]
struct Cli {
    /// TOML config file; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Content root to catalog
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Directory holding the persisted manifest
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Base URL prefixed to every file URL
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Load or create the manifest
    Build,
    /// Rescan the content root and republish
    Refresh,
    /// Print the full manifest as JSON
    Show,
    /// Print only version and generation time
    Info,
    /// Re-hash local files and compare them with the manifest
    Verify {
        /// Tree to check; defaults to the content root
        dir: Option<PathBuf>,
    },
    /// Republish the current manifest under a new version label
    SetVersion { version: String },
    /// Keep the manifest current until interrupted
    Watch {
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut cfg = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(root) = &cli.root {
        cfg.content_root = root.clone();
    }
    if let Some(dir) = &cli.data_dir {
        cfg.data_dir = dir.clone();
    }
    if let Some(url) = &cli.base_url {
        cfg.base_url = url.clone();
    }
    cfg.validate().context("check configuration")?;
    Ok(cfg)
}

fn summary(m: &Manifest) {
    println!(
        "version {} | {} files | {} bytes | generated {}",
        m.version,
        m.files.len(),
        m.total_bytes(),
        m.generated_at.to_rfc3339()
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let cfg = load_config(&cli)?;
    let engine = SyncEngine::new(cfg).context("start engine")?;

    match cli.cmd {
        Cmd::Build => summary(&*engine.ensure_exists()?),
        Cmd::Refresh => summary(&*engine.refresh()?),
        Cmd::Show => {
            let m = ManifestService::new(engine).manifest()?;
            println!("{}", m.to_json_pretty()?);
        }
        Cmd::Info => {
            let info = ManifestService::new(engine).info()?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Cmd::Verify { dir } => {
            let m = engine.ensure_exists()?;
            let dir = dir.unwrap_or_else(|| engine.config().content_root.clone());
            let report = verify(&m, &dir, engine.hasher());
            for p in &report.mismatched {
                println!("MISMATCH {}", p);
            }
            for p in &report.missing {
                println!("MISSING {}", p);
            }
            for p in &report.rejected {
                println!("REJECTED {}", p);
            }
            if !report.is_clean() {
                bail!(
                    "{} mismatched, {} missing, {} rejected",
                    report.mismatched.len(),
                    report.missing.len(),
                    report.rejected.len()
                );
            }
            println!("OK {} files", report.files_ok);
        }
        Cmd::SetVersion { version } => summary(&*engine.set_version(version)?),
        Cmd::Watch { timeout_ms } => {
            let svc = ManifestService::new(engine.clone())
                .with_timeout(Duration::from_millis(timeout_ms));
            match svc.manifest() {
                Ok(m) => summary(&m),
                Err(e) if e.is_cancelled() => {
                    tracing::warn!(timeout_ms, "initial build still running, watching anyway")
                }
                Err(e) => return Err(e.into()),
            }
            let watcher = engine.watch();
            if !watcher.is_active() {
                bail!("cannot watch {:?}", engine.config().content_root);
            }
            loop {
                std::thread::park();
            }
        }
    }
    Ok(())
}
