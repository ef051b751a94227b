//! Pendant CLI - drive and watch a CNC machine through a pendant server.
//!
//! This is the main binary entry point. See the `pendant_link` library for
//! the synchronization core.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mimalloc::MiMalloc;
use pendant_link::api::{Axis, ConnectionParam, FileCommand};
use pendant_link::model::Coordinate;
use pendant_link::sync::polling::Feed;
use pendant_link::{
    Actions, ApiClient, Config, ConnectionState, FileStatus, MachineStatus, Snapshot, SyncMode,
    Synchronizer, Units, WsDialer,
};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "pendant")]
#[command(version)]
#[command(about = "Remote pendant for a CNC machine controller")]
struct Cli {
    /// Pendant server URL (overrides config and PENDANT_SERVER_URL)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow live machine state until Ctrl-C
    Watch {
        /// Update mechanism
        #[arg(long)]
        mode: Option<SyncMode>,
        /// Print full JSON snapshots instead of status lines
        #[arg(long)]
        json: bool,
    },
    /// Print the current machine and file status
    Status,
    /// Connect the server to the controller
    Connect,
    /// Disconnect the server from the controller
    Disconnect,
    /// Jog one step (directions -1, 0 or 1)
    Jog {
        /// X direction
        #[arg(allow_negative_numbers = true)]
        x: i32,
        /// Y direction
        #[arg(allow_negative_numbers = true)]
        y: i32,
        /// Z direction
        #[arg(allow_negative_numbers = true)]
        z: i32,
    },
    /// Run the homing cycle
    Home,
    /// Clear an alarm lock
    Unlock,
    /// Controller soft reset
    SoftReset,
    /// Zero work coordinates
    Zero {
        /// Single axis to zero (default: all)
        #[arg(long)]
        axis: Option<Axis>,
    },
    /// Move back to work zero
    ReturnToZero,
    /// Send raw G-code
    Gcode {
        /// G-code lines
        commands: String,
    },
    /// Control the loaded program file
    File {
        #[command(subcommand)]
        action: FileAction,
    },
    /// Show or edit jog settings
    Settings {
        /// Jog feed rate
        #[arg(long)]
        jog_feed_rate: Option<f64>,
        /// XY jog step
        #[arg(long)]
        step_xy: Option<f64>,
        /// Z jog step
        #[arg(long)]
        step_z: Option<f64>,
        /// Preferred units (mm or inch)
        #[arg(long)]
        units: Option<Units>,
        /// Use the Z step for Z jogs
        #[arg(long)]
        use_z_step: Option<bool>,
    },
    /// Show, list or select a controller connection parameter
    Param {
        /// Parameter
        param: ParamArg,
        /// List the available values
        #[arg(long)]
        list: bool,
        /// Select a value
        #[arg(long, conflicts_with = "list")]
        set: Option<String>,
    },
    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Subcommand)]
enum FileAction {
    /// Start sending the loaded file
    Send,
    /// Pause or resume sending
    Pause,
    /// Abort sending
    Cancel,
    /// Upload and load a local file
    Open {
        /// Path of the G-code file
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ParamArg {
    Port,
    Baud,
    Firmware,
}

impl From<ParamArg> for ConnectionParam {
    fn from(param: ParamArg) -> Self {
        match param {
            ParamArg::Port => Self::Port,
            ParamArg::Baud => Self::BaudRate,
            ParamArg::Firmware => Self::Firmware,
        }
    }
}

fn init_logging() -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    // PENDANT_LOG_FILE keeps logs out of the watch output
    if let Ok(path) = std::env::var("PENDANT_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

fn axis(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"))
}

fn coordinate_line(coordinate: &Coordinate) -> String {
    format!(
        "X:{} Y:{} Z:{}",
        axis(coordinate.x),
        axis(coordinate.y),
        axis(coordinate.z)
    )
}

fn status_line(status: &MachineStatus) -> String {
    format!(
        "{:<12} WPos {}  MPos {}  F:{} S:{}",
        status.state.to_string(),
        coordinate_line(&status.work_coord),
        coordinate_line(&status.machine_coord),
        axis(status.feed_speed),
        axis(status.spindle_speed),
    )
}

fn file_line(file: &FileStatus) -> Option<String> {
    if file.file_name.is_empty() {
        return None;
    }
    let progress = file
        .progress_percent()
        .map_or_else(String::new, |p| format!(" {p:.0}%"));
    Some(format!("file {}{}", file.file_name, progress))
}

fn connection_label(connection: ConnectionState) -> &'static str {
    if connection.is_connected {
        "connected"
    } else if connection.is_establishing_connection {
        "connecting"
    } else {
        "offline"
    }
}

fn snapshot_line(snapshot: &Snapshot) -> String {
    let mut line = format!(
        "[{}] {}",
        connection_label(snapshot.connection),
        status_line(&snapshot.status)
    );
    if let Some(file) = file_line(&snapshot.file_status) {
        line.push_str("  ");
        line.push_str(&file);
    }
    line
}

async fn watch(config: &Config, mode: Option<SyncMode>, json: bool) -> Result<()> {
    let mut sync_config = config.sync_config();
    if let Some(mode) = mode {
        sync_config.mode = mode;
    }

    let backend = Arc::new(ApiClient::new(&config.server_url)?);
    let (synchronizer, handle) = Synchronizer::new(sync_config, backend, Arc::new(WsDialer));
    let task = tokio::spawn(synchronizer.run());

    let store = handle.store().clone();
    let mut connection_rx = store.subscribe_connection();
    let mut status_rx = store.subscribe_status();
    let mut file_rx = store.subscribe_file_status();
    let mut settings_rx = store.subscribe_settings();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last_line = String::new();
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            Ok(()) = connection_rx.changed() => {}
            Ok(()) = status_rx.changed() => {}
            Ok(()) = file_rx.changed() => {}
            Ok(()) = settings_rx.changed() => {}
        }

        let snapshot = store.snapshot();
        if json {
            println!("{}", serde_json::to_string(&snapshot)?);
        } else {
            let line = snapshot_line(&snapshot);
            if line != last_line {
                println!("{line}");
                last_line = line;
            }
        }
    }

    log::info!("Shutting down...");
    handle.shutdown();
    task.await.context("Synchronizer task failed")?;
    Ok(())
}

async fn settings(
    actions: &Actions,
    jog_feed_rate: Option<f64>,
    step_xy: Option<f64>,
    step_z: Option<f64>,
    units: Option<Units>,
    use_z_step: Option<bool>,
) -> Result<()> {
    actions.refresh(Feed::Settings).await?;
    let mut settings = actions.store().settings();

    let edited = jog_feed_rate.is_some()
        || step_xy.is_some()
        || step_z.is_some()
        || units.is_some()
        || use_z_step.is_some();
    if edited {
        if let Some(rate) = jog_feed_rate {
            settings.jog_feed_rate = rate;
        }
        if let Some(step) = step_xy {
            settings.jog_step_size_xy = step;
        }
        if let Some(step) = step_z {
            settings.jog_step_size_z = step;
        }
        if let Some(units) = units {
            settings.preferred_units = units;
        }
        if let Some(use_z_step) = use_z_step {
            settings.use_z_step_size = use_z_step;
        }
        actions.submit_settings(settings).await?;
    }

    println!("{}", serde_json::to_string_pretty(&actions.store().settings())?);
    Ok(())
}

async fn param(actions: &Actions, param: ConnectionParam, list: bool, set: Option<String>) -> Result<()> {
    if list {
        for option in actions.connection_options(param).await? {
            println!("{option}");
        }
    } else if let Some(value) = set {
        actions.select_connection_param(param, &value).await?;
        println!("{value}");
    } else {
        println!("{}", actions.selected_connection_param(param).await?);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }

    if let Commands::Config { save } = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        if save {
            config.save()?;
            println!("Saved to {}", Config::config_path()?.display());
        }
        return Ok(());
    }
    if let Commands::Watch { mode, json } = cli.command {
        return watch(&config, mode, json).await;
    }

    let backend = Arc::new(ApiClient::new(&config.server_url)?);
    let actions = Actions::new(backend, pendant_link::StateStore::new());

    match cli.command {
        Commands::Status => {
            actions.refresh(Feed::Status).await?;
            println!("{}", status_line(&actions.store().status()));
            // File status is informational here
            if actions.refresh(Feed::FileStatus).await.is_ok() {
                if let Some(file) = file_line(&actions.store().file_status()) {
                    println!("{file}");
                }
            }
        }
        Commands::Connect => actions.connect_machine().await?,
        Commands::Disconnect => actions.disconnect_machine().await?,
        Commands::Jog { x, y, z } => {
            actions.refresh(Feed::Status).await?;
            actions.jog(x, y, z).await?;
        }
        Commands::Home => actions.home().await?,
        Commands::Unlock => actions.kill_alarm().await?,
        Commands::SoftReset => actions.soft_reset().await?,
        Commands::Zero { axis } => actions.reset_to_zero(axis).await?,
        Commands::ReturnToZero => actions.return_to_zero().await?,
        Commands::Gcode { commands } => actions.send_gcode(&commands).await?,
        Commands::File { action } => match action {
            FileAction::Send => actions.file(FileCommand::Send).await?,
            FileAction::Pause => actions.file(FileCommand::Pause).await?,
            FileAction::Cancel => actions.file(FileCommand::Cancel).await?,
            FileAction::Open { path } => {
                actions.open_file(&path).await?;
                if let Some(file) = file_line(&actions.store().file_status()) {
                    println!("{file}");
                }
            }
        },
        Commands::Settings {
            jog_feed_rate,
            step_xy,
            step_z,
            units,
            use_z_step,
        } => settings(&actions, jog_feed_rate, step_xy, step_z, units, use_z_step).await?,
        Commands::Param { param: which, list, set } => param(&actions, which.into(), list, set).await?,
        Commands::Watch { .. } | Commands::Config { .. } => {}
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging()?;
    run(Cli::parse()).await
}
