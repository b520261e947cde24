#![warn(clippy::all, rust_2018_idioms)]

use activity_viewer::{
    cache::VolumeCache,
    downloader::AllenApi,
    error::Error,
    model::SliceAxis,
    penetration::PenetrationData,
    settings::Settings,
    state::{AppState, SliceImages},
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

#[derive(Parser)]
#[command(name = "activity-viewer")]
#[command(about = "Penetration recordings against the Allen reference atlas", long_about = None)]
struct Cli {
    /// Settings file (defaults to ./settings.json, then the platform config directory)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Timeout for a single download, in seconds
    #[arg(long, default_value_t = 600, global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the atlas files for the configured version and resolution into the cache
    Download {
        /// Download again even if a file is already cached
        #[arg(long)]
        force: bool,
    },
    /// Check penetration files against the file format rules
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Render an annotation slice (and its template next to it) as PNG
    Slice {
        #[arg(long)]
        axis: SliceAxis,
        /// Position along the axis in CCF micrometers
        #[arg(long)]
        coordinate: f64,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Render the section along the plane fitted through a penetration
    Pseudocoronal {
        file: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Print the effective settings, or write them to the settings file
    Settings {
        #[arg(long)]
        write: bool,
    },
}

fn settings_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        let local = PathBuf::from("settings.json");
        if local.is_file() {
            local
        } else {
            Settings::default_path()
        }
    })
}

fn load_settings(path: &Path) -> Result<Settings> {
    if path.is_file() {
        Settings::from_file(path).with_context(|| format!("Could not load settings from {}", path.display()))
    } else {
        log::info!("No settings at {}, using defaults", path.display());
        Ok(Settings::default())
    }
}

/// A state without any penetrations from the settings' data files.
fn atlas_state(mut settings: Settings, timeout: Duration) -> Result<AppState> {
    settings.system.data_files.clear();
    let state = AppState::new(Arc::new(AllenApi::new(timeout)?));
    state.reconfigure(settings)?;
    Ok(state)
}

fn write_images(images: &SliceImages, out: &Path) -> Result<()> {
    let stem = out.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let template_out = out.with_file_name(format!("{stem}_template.png"));
    std::fs::write(out, &images.annotation.data).with_context(|| format!("Could not write {}", out.display()))?;
    std::fs::write(&template_out, &images.template.data)
        .with_context(|| format!("Could not write {}", template_out.display()))?;
    println!("Wrote {} and {}", out.display(), template_out.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init(); // Log to stderr (if you run with `RUST_LOG=debug`).

    let cli = Cli::parse();
    let path = settings_path(cli.settings);
    let settings = load_settings(&path)?;
    let timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Command::Download { force } => {
            let cache = VolumeCache::new(settings, Arc::new(AllenApi::new(timeout)?));
            let style = ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?;
            let bar = ProgressBar::new(5).with_style(style);
            let written = cache.download_all(force, |file| {
                bar.set_message(file.display().to_string());
                bar.inc(1);
            })?;
            bar.finish_with_message(format!("{} file(s) downloaded to {}", written.len(), cache.directory().display()));
        }
        Command::Validate { files } => {
            let mut failed = 0;
            for file in &files {
                match PenetrationData::load(file) {
                    Ok(data) => println!(
                        "{}: penetration {:?} with {} units, {} timeseries, {} unit stats",
                        file.display(),
                        data.probe_id,
                        data.unit_count(),
                        data.timeseries.len(),
                        data.unit_stats.len()
                    ),
                    Err(Error::Validation(e)) => {
                        failed += 1;
                        println!("{}: invalid", file.display());
                        for violation in &e.violations {
                            println!("  - {violation}");
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if failed > 0 {
                bail!("{} of {} file(s) failed validation", failed, files.len());
            }
        }
        Command::Slice { axis, coordinate, out } => {
            let state = atlas_state(settings, timeout)?;
            let images = state.axis_slice(axis, coordinate)?;
            write_images(&images, &out)?;
        }
        Command::Pseudocoronal { file, out } => {
            let state = atlas_state(settings, timeout)?;
            let outcome = state
                .add_penetrations(&[file])?
                .into_iter()
                .next()
                .context("No penetration was added")?;
            let id = outcome.result?;
            let images = state.pseudocoronal_slice(&id)?;
            write_images(&images, &out)?;
        }
        Command::Settings { write } => {
            if write {
                settings.to_file(&path)?;
                println!("Wrote settings to {}", path.display());
            } else {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
        }
    }
    Ok(())
}
