use anyhow::{Context, Result};
use camman::{CamManager, Config, DeviceKey, Effect, Mode};
use camman_hw::V4lBackend;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "camman", about = "Camera manager CLI", version)]
struct Cli {
    /// TOML config file, overridden by CAMMAN_* environment variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List camera indices that open
    Devices {
        /// Also print V4L2 device names and capabilities
        #[arg(short, long)]
        verbose: bool,
    },
    /// List window titles usable as virtual cameras
    Windows,
    /// Capture one frame to an image file
    Capture {
        /// Camera index or window title (default: 0)
        #[arg(short, long, default_value = "0")]
        device: DeviceKey,
        /// Output path; the format follows the extension
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Effect to apply: gray, blur[:k], canny[:lo:hi], sepia, emboss, negative
        #[arg(short, long)]
        effect: Option<Effect>,
        /// Run an inference overlay: detection, segmentation, classify or pose
        #[arg(long)]
        ai: Option<Mode>,
    },
    /// Save, restore or adjust device settings
    Settings {
        /// Camera index (default: 0)
        #[arg(short, long, default_value = "0")]
        device: DeviceKey,
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Write the device's current properties to the settings file
    Save,
    /// Apply the settings file to the device
    Load,
    /// Disable autofocus and set a manual focus value
    Focus { value: f64 },
}

/// Commands that never annotate skip model loading.
fn without_ai(config: Config) -> Config {
    Config {
        ai_mode: None,
        ..config
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Devices { verbose } => {
            let cm = CamManager::from_config(&without_ai(config))?;
            let found = cm.available_devices();
            if found.is_empty() {
                println!("No cameras available");
            }
            for index in found {
                println!("{index}");
            }
            if verbose {
                for info in V4lBackend::list_devices() {
                    println!(
                        "{}  {}  {} ({}, {})",
                        info.index, info.path, info.name, info.driver, info.bus
                    );
                }
            }
        }
        Commands::Windows => {
            let cm = CamManager::from_config(&without_ai(config))?;
            for title in cm.window_titles()? {
                println!("{title}");
            }
        }
        Commands::Capture {
            device,
            output,
            effect,
            ai,
        } => {
            if ai.is_some() {
                config.ai_mode = ai;
            }
            let mut cm = CamManager::from_config(&config)?;
            cm.add(device.clone())
                .with_context(|| format!("failed to open {device}"))?;

            let (frame, records) = cm.process_frame(Some(&device), effect)?;
            tracing::debug!(%device, records = records.len(), "frame processed");

            let path = output.unwrap_or_else(|| {
                PathBuf::from(format!(
                    "capture_{}.jpg",
                    chrono::Local::now().format("%Y%m%d_%H%M%S")
                ))
            });
            frame
                .save(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Saved {}", path.display());

            if cm.has_overlay() {
                println!("{}", serde_json::to_string_pretty(&records)?);
            }
        }
        Commands::Settings { device, action } => {
            let mut cm = CamManager::from_config(&without_ai(config))?;
            cm.add(device.clone())
                .with_context(|| format!("failed to open {device}"))?;
            let settings = cm.settings().path().display().to_string();

            match action {
                SettingsAction::Save => {
                    let saved = cm.save_settings(Some(&device))?;
                    println!("Saved {} settings to {settings}", saved.len());
                }
                SettingsAction::Load => {
                    let loaded = cm.load_settings(Some(&device))?;
                    if loaded.is_empty() {
                        println!("No settings file found, saved current values to {settings}");
                    } else {
                        println!("Loaded {} settings from {settings}", loaded.len());
                    }
                }
                SettingsAction::Focus { value } => {
                    cm.focus(Some(&device), value)?;
                    println!("Focus set to {value}");
                }
            }
        }
    }

    Ok(())
}
