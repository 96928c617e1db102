use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use printmatch::gallery::save_snapshot;
use printmatch::{
    config, decode, CaptureEnvelope, CorrelationEngine, FileGallery, GalleryProvider, Identifier,
    MatchDecision, Matcher,
};
use serde_json::json;

#[derive(Parser)]
#[command(name = "printmatch")]
#[command(
    version,
    about = "Fingerprint identification against an enrolled gallery"
)]
struct Cli {
    /// Config file (defaults to the system, then the per-user config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify captures against the enrolled gallery
    Identify {
        /// Capture envelope files, or "-" for stdin
        #[arg(required = true)]
        probes: Vec<PathBuf>,
        /// Gallery snapshot (defaults to the configured one)
        #[arg(short, long)]
        gallery: Option<PathBuf>,
    },
    /// Compare a capture against one stored capture
    Verify {
        /// Stored capture envelope file
        stored: PathBuf,
        /// Probe capture envelope file, or "-" for stdin
        probe: PathBuf,
    },
    /// Check that a capture decodes and yields a template
    Validate {
        /// Capture envelope file, or "-" for stdin
        probe: PathBuf,
    },
    /// List enrolled identities
    Gallery {
        /// Gallery snapshot (defaults to the configured one)
        #[arg(short, long)]
        gallery: Option<PathBuf>,
        /// Write the snapshot to this path; `.json` or postcard by extension
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Open config file in editor
    Config {
        /// Write the default config first if none exists
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<ExitCode> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Identify { probes, gallery } => identify(&cfg, &probes, gallery),
        Commands::Verify { stored, probe } => verify(&cfg, &stored, &probe),
        Commands::Validate { probe } => validate(&probe),
        Commands::Gallery { gallery, export } => list_gallery(&cfg, gallery, export),
        Commands::Config { init } => open_config(&cfg, cli.config.as_deref(), init),
    }
}

fn read_envelope(path: &Path) -> Result<CaptureEnvelope> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading envelope from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading envelope {}", path.display()))?
    };
    Ok(CaptureEnvelope::new(raw.trim()))
}

fn exit_code(decision: &MatchDecision) -> u8 {
    match decision {
        MatchDecision::Matched { .. } => 0,
        MatchDecision::NoMatch => 1,
        MatchDecision::ProbeRejected(_) => 2,
        MatchDecision::TimedOut => 3,
        MatchDecision::Unavailable(_) => 4,
    }
}

fn identify(
    cfg: &config::Config,
    probes: &[PathBuf],
    gallery: Option<PathBuf>,
) -> Result<ExitCode> {
    let settings = cfg.match_settings()?;
    let gallery = FileGallery::new(gallery.unwrap_or_else(|| cfg.gallery.clone()));
    info!("Using gallery: {}", gallery.path().display());

    let engine = CorrelationEngine::default();
    let mut identifier = Identifier::new(gallery, engine, engine, settings);
    if cfg.template_cache {
        identifier = identifier.with_template_cache();
    }

    let mut worst = 0;
    for path in probes {
        let probe = read_envelope(path)?;
        let decision = identifier.identify(&probe);

        let reason = match &decision {
            MatchDecision::ProbeRejected(err) => Some(err.to_string()),
            MatchDecision::Unavailable(err) => Some(err.to_string()),
            _ => None,
        };
        let report = json!({
            "probe": path.display().to_string(),
            "decision": decision.label(),
            "matched": decision.matched(),
            "identity": decision.identity(),
            "score": decision.score(),
            "reason": reason,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);

        worst = worst.max(exit_code(&decision));
    }

    Ok(ExitCode::from(worst))
}

fn verify(cfg: &config::Config, stored: &Path, probe: &Path) -> Result<ExitCode> {
    let settings = cfg.match_settings()?;
    let stored = read_envelope(stored)?;
    let probe = read_envelope(probe)?;

    let engine = CorrelationEngine::default();
    let matcher = Matcher::new(engine, engine, settings.threshold);
    match matcher.try_verify(&stored, &probe) {
        Ok(verification) => {
            println!("{}", serde_json::to_string_pretty(&verification)?);
            Ok(ExitCode::from(if verification.accepted { 0 } else { 1 }))
        }
        Err(err) => {
            warn!("Verification failed: {}", err);
            println!("{}", json!({ "accepted": false, "reason": err.to_string() }));
            Ok(ExitCode::from(1))
        }
    }
}

fn validate(probe: &Path) -> Result<ExitCode> {
    let envelope = read_envelope(probe)?;
    let input = match decode(&envelope) {
        Ok(input) => input,
        Err(err) => {
            println!("✗ {}", err);
            return Ok(ExitCode::from(1));
        }
    };
    info!(
        "Sample: {}x{} at {} dpi, {} bytes",
        input.width,
        input.height,
        input.dpi,
        input.image_bytes.len()
    );

    let engine = CorrelationEngine::default();
    let matcher = Matcher::new(engine, engine, Default::default());
    if matcher.validate(&envelope) {
        println!("✓ Capture is usable");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("✗ Capture decodes but yields no template");
        Ok(ExitCode::from(1))
    }
}

fn list_gallery(
    cfg: &config::Config,
    gallery: Option<PathBuf>,
    export: Option<PathBuf>,
) -> Result<ExitCode> {
    let gallery = FileGallery::new(gallery.unwrap_or_else(|| cfg.gallery.clone()));
    let identities = gallery
        .fetch_all()
        .with_context(|| format!("loading gallery {}", gallery.path().display()))?;

    for identity in &identities {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            identity.identity_id,
            identity.display_name,
            identity.external_username,
            identity.external_role,
            if identity.enrolled_envelope().is_some() {
                "enrolled"
            } else {
                "not enrolled"
            }
        );
    }
    info!("{} identities in {}", identities.len(), gallery.path().display());

    if let Some(export) = export {
        save_snapshot(&export, &identities)
            .with_context(|| format!("exporting gallery to {}", export.display()))?;
    }
    Ok(ExitCode::SUCCESS)
}

fn open_config(cfg: &config::Config, path: Option<&Path>, init: bool) -> Result<ExitCode> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    if init && !config_path.exists() {
        config::save_config(cfg, Some(config_path)).context("Failed to write default config")?;
        info!("Wrote default config to {}", config_path.display());
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(ExitCode::SUCCESS)
}
