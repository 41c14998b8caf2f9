use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use smartdoor::config::{self, Config};
use smartdoor::permission::{AssumeYes, CapabilityGate, DeviceGate, TerminalPrompt};
use smartdoor::window::{DoorWindow, TITLE};
use smartdoor::{watch, AnalysisExecutor, ExecutorHandle, Grant, LensFacing, ViewBinder, Waker};
use smartdoor_vision::{V4lProvider, YuNetFactory};

#[derive(Parser)]
#[command(name = "smartdoor")]
#[command(version, about = "Opens a (virtual) door whenever a face is in front of the camera")]
struct Cli {
    /// Camera to start with (overrides the config)
    #[arg(long, global = true)]
    camera: Option<CameraArg>,

    /// Grant camera access without asking
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum CameraArg {
    Front,
    Back,
}

impl From<CameraArg> for LensFacing {
    fn from(c: CameraArg) -> Self {
        match c {
            CameraArg::Front => LensFacing::Front,
            CameraArg::Back => LensFacing::Back,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the camera preview and door status in a window (default)
    Window,
    /// Print door status changes in the terminal
    Watch {
        /// Stop after this many detections
        #[arg(long)]
        frames: Option<u64>,
    },
    /// Open config file in editor
    Config,
    /// Print the effective configuration
    ShowConfig,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(None)?;

    match cli.command.unwrap_or(Commands::Window) {
        Commands::Config => open_config(),
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&cfg)?);
            Ok(())
        }
        command => {
            let facing = cli.camera.map(LensFacing::from).unwrap_or(cfg.camera.initial.into());
            let grant = check_capability(&cfg, facing, cli.yes);
            let mut executor = AnalysisExecutor::start()?;
            let result = match command {
                Commands::Watch { frames } => run_watch(&cfg, facing, grant, executor.handle(), frames),
                _ => run_window(&cfg, facing, grant, executor.handle()),
            };
            executor.shutdown();
            result
        }
    }
}

fn check_capability(cfg: &Config, facing: LensFacing, yes: bool) -> Grant {
    let device = match facing {
        LensFacing::Front => &cfg.camera.front,
        LensFacing::Back => &cfg.camera.back,
    };
    if yes {
        DeviceGate::new(device, AssumeYes).resolve()
    } else {
        DeviceGate::new(device, TerminalPrompt).resolve()
    }
}

fn parts(cfg: &Config) -> Result<(V4lProvider, YuNetFactory)> {
    let provider = cfg.provider()?;
    let factory = YuNetFactory {
        model: cfg.detector.model.clone(),
    };
    Ok((provider, factory))
}

fn run_watch(
    cfg: &Config,
    facing: LensFacing,
    grant: Grant,
    executor: ExecutorHandle,
    frames: Option<u64>,
) -> Result<()> {
    let (provider, factory) = parts(cfg)?;
    let waker: Waker = Arc::new(|| {});
    let mut binder = ViewBinder::new(
        provider,
        factory,
        cfg.detector_options(),
        executor,
        facing,
        waker,
    );
    info!("type s + enter to switch cameras, q to quit");
    watch::run(&mut binder, grant, watch::spawn_stdin_commands(), frames)
}

fn run_window(cfg: &Config, facing: LensFacing, grant: Grant, executor: ExecutorHandle) -> Result<()> {
    let (provider, factory) = parts(cfg)?;
    let options = cfg.detector_options();
    let mut native = eframe::NativeOptions::default();
    native.viewport = native
        .viewport
        .with_title(TITLE)
        .with_inner_size([720.0, 960.0]);

    eframe::run_native(
        TITLE,
        native,
        Box::new(move |cc| {
            let ctx = cc.egui_ctx.clone();
            let waker: Waker = Arc::new(move || ctx.request_repaint());
            let binder = ViewBinder::new(provider, factory, options, executor, facing, waker);
            Ok(Box::new(DoorWindow::new(binder, grant)))
        }),
    )
    .map_err(|e| anyhow::anyhow!("window failed: {}", e))
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_path();
    if !config_path.exists() {
        config::save_config(&Config::default(), Some(config_path))
            .context("Failed to write default config")?;
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

    Ok(())
}
