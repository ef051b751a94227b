//! Backend control service accessors.
//!
//! [`Backend`] is the request/response seam between the synchronization
//! layer and the pendant server. [`client::ApiClient`] implements it over
//! HTTP; tests plug in in-memory backends.

pub mod client;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{FileStatus, MachineStatus, Settings};

pub use client::ApiClient;

/// Machine axis, as used by the zeroing command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// X axis.
    X,
    /// Y axis.
    Y,
    /// Z axis.
    Z,
    /// A axis.
    A,
    /// B axis.
    B,
    /// C axis.
    C,
}

impl Axis {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X => "X",
            Self::Y => "Y",
            Self::Z => "Z",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

impl std::str::FromStr for Axis {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "X" => Ok(Self::X),
            "Y" => Ok(Self::Y),
            "Z" => Ok(Self::Z),
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            other => anyhow::bail!("unknown axis: {other}"),
        }
    }
}

/// One-shot command addressed to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineCommand {
    /// Open the controller connection with the selected port/baud/firmware.
    Connect,
    /// Close the controller connection.
    Disconnect,
    /// Clear an alarm lock.
    KillAlarm,
    /// Zero one work axis, or all of them.
    ResetToZero(Option<Axis>),
    /// Move back to work zero.
    ReturnToZero,
    /// Run the homing cycle.
    Home,
    /// Controller soft reset.
    SoftReset,
    /// Jog one step in the given directions (-1, 0 or 1 per axis).
    Jog {
        /// X direction.
        x: i32,
        /// Y direction.
        y: i32,
        /// Z direction.
        z: i32,
    },
    /// Send raw G-code lines.
    SendGcode(String),
}

/// File streaming control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCommand {
    /// Start sending the loaded file.
    Send,
    /// Pause or resume sending.
    Pause,
    /// Abort sending.
    Cancel,
}

/// Controller connection parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionParam {
    /// Serial port.
    Port,
    /// Baud rate.
    BaudRate,
    /// Firmware flavor.
    Firmware,
}

impl ConnectionParam {
    /// Endpoint suffix, e.g. `Port` for `getSelectedPort`.
    pub(crate) fn endpoint_name(self) -> &'static str {
        match self {
            Self::Port => "Port",
            Self::BaudRate => "BaudRate",
            Self::Firmware => "Firmware",
        }
    }

    /// Query parameter name for the setter.
    pub(crate) fn query_key(self) -> &'static str {
        match self {
            Self::Port => "port",
            Self::BaudRate => "baudRate",
            Self::Firmware => "firmware",
        }
    }
}

/// Request/response accessors of the backend control service.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Current machine status.
    async fn machine_status(&self) -> Result<MachineStatus>;

    /// Current file send progress.
    async fn file_status(&self) -> Result<FileStatus>;

    /// Current settings.
    async fn settings(&self) -> Result<Settings>;

    /// Replaces the backend settings.
    async fn update_settings(&self, settings: &Settings) -> Result<()>;

    /// Executes a machine command.
    async fn machine_command(&self, command: &MachineCommand) -> Result<()>;

    /// Executes a file streaming command.
    async fn file_command(&self, command: FileCommand) -> Result<()>;

    /// Uploads a G-code file and makes it the loaded file.
    async fn open_file(&self, file_name: &str, contents: Vec<u8>) -> Result<()>;

    /// Values available for a connection parameter.
    async fn connection_options(&self, param: ConnectionParam) -> Result<Vec<String>>;

    /// Currently selected value of a connection parameter.
    async fn selected_connection_param(&self, param: ConnectionParam) -> Result<String>;

    /// Selects a connection parameter value.
    async fn select_connection_param(&self, param: ConnectionParam, value: &str) -> Result<()>;
}
