//! QR-cam-scanner binary: scan codes from a camera and keep a history.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, error, info, warn};

use qr_cam_scanner::history::HistoryError;
use qr_cam_scanner::store::StoreError;
use qr_cam_scanner::{
    AppState, Config, DecodeResult, EndReason, Facing, JsonFileStore, RefreshScheduler,
    Resolution, RqrrDecoder, ScanController, ScanError, ScanObserver, ScanState, Settings,
    V4L2Source,
};

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error("failed to access {}: {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),
}

#[derive(Debug, Parser)]
#[command(version, about = "Scan QR codes from a V4L2 camera")]
struct Cli {
    /// Configuration file (TOML). Defaults apply when it does not exist.
    #[arg(short, long, default_value = "qr-cam-scanner.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan codes from the camera (default).
    Scan(ScanArgs),
    /// Inspect or edit the scan history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Show or change stored settings.
    Settings(SettingsArgs),
}

#[derive(Debug, Default, Args)]
struct ScanArgs {
    /// Camera to use.
    #[arg(long, value_enum)]
    facing: Option<FacingArg>,
    /// Requested frame width.
    #[arg(long)]
    width: Option<u32>,
    /// Requested frame height.
    #[arg(long)]
    height: Option<u32>,
    /// Keep scanning after a code is decoded. A code identical to the
    /// previous one is not reported again.
    #[arg(long)]
    continuous: bool,
}

#[derive(Debug, Subcommand)]
enum HistoryAction {
    /// Print entries, newest first.
    List,
    /// Write entries to a JSON file.
    Export { file: PathBuf },
    /// Merge entries from a JSON file.
    Import { file: PathBuf },
    /// Delete all entries.
    Clear,
}

#[derive(Debug, Args)]
struct SettingsArgs {
    /// Preferred camera.
    #[arg(long, value_enum)]
    facing: Option<FacingArg>,
    /// Preferred frame width.
    #[arg(long)]
    width: Option<u32>,
    /// Preferred frame height.
    #[arg(long)]
    height: Option<u32>,
    /// Record decoded codes in history.
    #[arg(long)]
    save_history: Option<bool>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FacingArg {
    User,
    Environment,
}

impl From<FacingArg> for Facing {
    fn from(arg: FacingArg) -> Self {
        match arg {
            FacingArg::User => Self::User,
            FacingArg::Environment => Self::Environment,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load config from {}: {err}", cli.config.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    if let Err(err) = run(cli.command, &config).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(command: Option<Command>, config: &Config) -> Result<(), AppError> {
    let mut store = JsonFileStore::open(&config.storage.dir)?;
    let defaults = Settings {
        facing: config.camera.facing,
        width: config.camera.width,
        height: config.camera.height,
        save_history: true,
    };
    let mut state = AppState::load(&store, config.storage.history_limit, defaults)?;

    match command.unwrap_or_else(|| Command::Scan(ScanArgs::default())) {
        Command::Scan(args) => scan(&args, config, &mut state, &mut store).await,
        Command::History { action } => history(action, &mut state, &mut store),
        Command::Settings(args) => settings(&args, &mut state, &mut store),
    }
}

/// Prints decoded codes and remembers how the last session ended.
#[derive(Default)]
struct Console {
    decoded: Vec<String>,
    last: Option<String>,
    ended: Option<EndReason>,
}

impl Console {
    /// Remember `payload`. Returns `false` when it repeats the previous code.
    fn accept(&mut self, payload: &str) -> bool {
        if self.last.as_deref() == Some(payload) {
            return false;
        }
        self.last = Some(payload.to_owned());
        true
    }
}

impl ScanObserver for Console {
    fn on_success(&mut self, result: &DecodeResult) {
        if !self.accept(&result.payload) {
            debug!("repeated code ignored");
            return;
        }
        println!("{}", result.payload);
        self.decoded.push(result.payload.clone());
    }

    fn on_warning(&mut self, message: &str) {
        warn!("{message}");
    }

    fn on_fatal(&mut self, error: &ScanError) {
        error!(error = %error, "scan failure");
    }

    fn on_session_ended(&mut self, reason: EndReason) {
        self.ended = Some(reason);
    }
}

async fn scan(
    args: &ScanArgs,
    config: &Config,
    state: &mut AppState,
    store: &mut JsonFileStore,
) -> Result<(), AppError> {
    let settings = *state.settings();
    let facing = args.facing.map_or(settings.facing, Facing::from);
    let resolution = Resolution::new(
        args.width.unwrap_or(settings.width),
        args.height.unwrap_or(settings.height),
    );

    let mut controller = ScanController::new(
        V4L2Source::new(&config.camera),
        RqrrDecoder::new(),
        RefreshScheduler::new(),
        Console::default(),
        config.scan.loop_config(),
    );
    controller.start(facing, resolution).await?;

    let mut refresh = tokio::time::interval(Duration::from_secs_f64(1.0 / config.scan.fps));
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = refresh.tick() => controller.on_refresh(),
            _ = &mut interrupted => {
                if controller.state() != ScanState::Idle {
                    controller.stop()?;
                }
                break;
            }
        }

        for payload in std::mem::take(&mut controller.observer_mut().decoded) {
            if state.record_scan(&payload, unix_now()) {
                state.persist(store)?;
            }
        }

        if controller.state() == ScanState::Idle {
            let reason = controller.observer_mut().ended.take();
            if reason == Some(EndReason::DecodeFailures) {
                error!("camera stopped after repeated decode failures");
            }
            if !restart_after(reason, args.continuous) {
                break;
            }
            info!("ready for the next code");
            controller.start(facing, resolution).await?;
        }
    }

    Ok(())
}

/// Whether a scan that ended for `reason` should open the camera again.
fn restart_after(reason: Option<EndReason>, continuous: bool) -> bool {
    continuous && reason == Some(EndReason::Decoded)
}

fn history(
    action: HistoryAction,
    state: &mut AppState,
    store: &mut JsonFileStore,
) -> Result<(), AppError> {
    match action {
        HistoryAction::List => {
            for entry in state.history() {
                println!("{}\t{:?}\t{}", entry.scanned_at, entry.kind, entry.payload);
            }
        }
        HistoryAction::Export { file } => {
            write_file(&file, &state.export_history()?)?;
            info!(path = %file.display(), entries = state.history().len(), "history exported");
        }
        HistoryAction::Import { file } => {
            let content =
                std::fs::read_to_string(&file).map_err(|err| AppError::Io(file.clone(), err))?;
            let added = state.import_history(&content)?;
            state.persist(store)?;
            info!(path = %file.display(), added, "history imported");
        }
        HistoryAction::Clear => {
            state.clear_history();
            state.persist(store)?;
            info!("history cleared");
        }
    }
    Ok(())
}

fn settings(
    args: &SettingsArgs,
    state: &mut AppState,
    store: &mut JsonFileStore,
) -> Result<(), AppError> {
    let mut settings = *state.settings();
    if let Some(facing) = args.facing {
        settings.facing = facing.into();
    }
    if let Some(width) = args.width {
        settings.width = width;
    }
    if let Some(height) = args.height {
        settings.height = height;
    }
    if let Some(save_history) = args.save_history {
        settings.save_history = save_history;
    }

    if settings != *state.settings() {
        state.set_settings(settings);
        state.persist(store)?;
    }

    println!(
        "facing={} resolution={}x{} save_history={}",
        settings.facing, settings.width, settings.height, settings.save_history
    );
    Ok(())
}

fn write_file(path: &Path, content: &str) -> Result<(), AppError> {
    std::fs::write(path, content).map_err(|err| AppError::Io(path.to_path_buf(), err))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qr_cam_scanner::ScanEvent;

    #[test]
    fn test_scan_stops_after_first_code_by_default() {
        let cli = Cli::try_parse_from(["qr-cam-scanner", "scan"]).expect("args should parse");
        assert!(matches!(
            cli.command,
            Some(Command::Scan(ScanArgs {
                continuous: false,
                ..
            }))
        ));
        assert!(!restart_after(Some(EndReason::Decoded), false));
    }

    #[test]
    fn test_continuous_restarts_only_after_decode() {
        let cli = Cli::try_parse_from(["qr-cam-scanner", "scan", "--continuous"])
            .expect("args should parse");
        assert!(matches!(
            cli.command,
            Some(Command::Scan(ScanArgs {
                continuous: true,
                ..
            }))
        ));

        assert!(restart_after(Some(EndReason::Decoded), true));
        assert!(!restart_after(Some(EndReason::DecodeFailures), true));
        assert!(!restart_after(Some(EndReason::Stopped), true));
        assert!(!restart_after(None, true));
    }

    #[test]
    fn test_console_drops_repeated_code() {
        let mut console = Console::default();
        let payloads = [
            "https://example.com",
            "https://example.com",
            "other",
            "https://example.com",
        ];
        for payload in payloads {
            console.on_event(ScanEvent::Success(DecodeResult::from_payload(payload)));
        }

        assert_eq!(
            console.decoded,
            vec!["https://example.com", "other", "https://example.com"]
        );
    }
}
