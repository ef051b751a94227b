//! Domain snapshots held by the state store.
//!
//! Every type here mirrors the JSON the pendant server produces (camelCase
//! keys) and deserializes leniently: missing fields take their defaults so a
//! partial payload still yields a complete snapshot, and numeric fields accept
//! the server's `"NaN"` placeholder as an absent value.

use serde::{Deserialize, Serialize};

/// Event channel connection flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    /// The event channel is open.
    pub is_connected: bool,
    /// A connection attempt is in flight.
    pub is_establishing_connection: bool,
}

impl ConnectionState {
    /// Not connected, not trying.
    pub const DISCONNECTED: Self = Self {
        is_connected: false,
        is_establishing_connection: false,
    };

    /// Dial in progress.
    pub const ESTABLISHING: Self = Self {
        is_connected: false,
        is_establishing_connection: true,
    };

    /// Channel open.
    pub const CONNECTED: Self = Self {
        is_connected: true,
        is_establishing_connection: false,
    };
}

/// Controller state as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerState {
    /// Controller asleep.
    Sleep,
    /// Running a program.
    Run,
    /// Feed hold.
    Hold,
    /// Jogging.
    Jog,
    /// Alarm lock.
    Alarm,
    /// Homing cycle.
    Home,
    /// Check (dry-run) mode.
    Check,
    /// Ready for commands.
    Idle,
    /// Backend has no controller connection.
    Disconnected,
    /// No current view of the backend.
    #[default]
    Unavailable,
    /// Reported but not recognized.
    #[serde(other)]
    Unknown,
}

impl ControllerState {
    /// Whether jog commands make sense in this state.
    pub fn accepts_jog(self) -> bool {
        matches!(self, Self::Idle | Self::Jog)
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Sleep => "SLEEP",
            Self::Run => "RUN",
            Self::Hold => "HOLD",
            Self::Jog => "JOG",
            Self::Alarm => "ALARM",
            Self::Home => "HOME",
            Self::Check => "CHECK",
            Self::Idle => "IDLE",
            Self::Unknown => "UNKNOWN",
            Self::Disconnected => "DISCONNECTED",
            Self::Unavailable => "UNAVAILABLE",
        };
        f.write_str(name)
    }
}

/// Length units.
///
/// Anything the server reports other than `INCH` reads as millimeters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    /// Inches.
    #[serde(rename = "INCH")]
    Inch,
    /// Millimeters.
    #[default]
    #[serde(rename = "MM")]
    #[serde(other)]
    Mm,
}

impl std::str::FromStr for Units {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mm" => Ok(Self::Mm),
            "inch" | "in" => Ok(Self::Inch),
            other => anyhow::bail!("unknown units: {other}"),
        }
    }
}

/// Position on all six axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Coordinate {
    /// X axis.
    #[serde(deserialize_with = "lenient::number")]
    pub x: Option<f64>,
    /// Y axis.
    #[serde(deserialize_with = "lenient::number")]
    pub y: Option<f64>,
    /// Z axis.
    #[serde(deserialize_with = "lenient::number")]
    pub z: Option<f64>,
    /// A axis.
    #[serde(deserialize_with = "lenient::number")]
    pub a: Option<f64>,
    /// B axis.
    #[serde(deserialize_with = "lenient::number")]
    pub b: Option<f64>,
    /// C axis.
    #[serde(deserialize_with = "lenient::number")]
    pub c: Option<f64>,
    /// Units of the values above.
    pub units: Units,
}

/// Controller input pins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PinSet {
    /// X limit.
    pub x: bool,
    /// Y limit.
    pub y: bool,
    /// Z limit.
    pub z: bool,
    /// A limit.
    pub a: bool,
    /// B limit.
    pub b: bool,
    /// C limit.
    pub c: bool,
    /// Probe contact.
    pub probe: bool,
    /// Safety door.
    pub door: bool,
    /// Feed hold button.
    pub hold: bool,
    /// Soft reset button.
    pub soft_reset: bool,
    /// Cycle start button.
    pub cycle_start: bool,
}

/// Full machine status snapshot.
///
/// `Default` is the unavailable snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MachineStatus {
    /// Controller state.
    pub state: ControllerState,
    /// Machine coordinates.
    pub machine_coord: Coordinate,
    /// Work coordinates.
    pub work_coord: Coordinate,
    /// Current feed rate.
    #[serde(deserialize_with = "lenient::number")]
    pub feed_speed: Option<f64>,
    /// Current spindle speed.
    #[serde(deserialize_with = "lenient::number")]
    pub spindle_speed: Option<f64>,
    /// Input pins.
    pub pins: PinSet,
}

impl MachineStatus {
    /// Synthetic snapshot pushed when the backend cannot be reached.
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// File send progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileStatus {
    /// Loaded file name, empty when none.
    pub file_name: String,
    /// Total rows in the file.
    #[serde(deserialize_with = "lenient::number")]
    pub row_count: Option<i64>,
    /// Rows already sent and acknowledged.
    #[serde(deserialize_with = "lenient::number")]
    pub completed_row_count: Option<i64>,
    /// Rows left to send.
    #[serde(deserialize_with = "lenient::number")]
    pub remaining_row_count: Option<i64>,
    /// Elapsed send time in milliseconds.
    #[serde(deserialize_with = "lenient::number")]
    pub send_duration: Option<i64>,
    /// Estimated remaining send time in milliseconds, negative before
    /// the first row is sent.
    #[serde(deserialize_with = "lenient::number")]
    pub send_remaining_duration: Option<i64>,
}

impl FileStatus {
    /// Completion in percent, when both counts are known.
    pub fn progress_percent(&self) -> Option<f64> {
        match (self.completed_row_count, self.row_count) {
            (Some(done), Some(total)) if total > 0 => Some(done as f64 * 100.0 / total as f64),
            _ => None,
        }
    }
}

/// Jog and connection settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Jog feed rate.
    pub jog_feed_rate: f64,
    /// XY jog step.
    #[serde(rename = "jogStepSizeXY")]
    pub jog_step_size_xy: f64,
    /// Z jog step.
    #[serde(rename = "jogStepSizeZ")]
    pub jog_step_size_z: f64,
    /// Units shown to the operator.
    pub preferred_units: Units,
    /// Serial port address.
    pub port: String,
    /// Serial baud rate.
    pub port_rate: String,
    /// Controller firmware name.
    pub firmware_version: String,
    /// Use the dedicated Z step instead of the XY step for Z jogs.
    pub use_z_step_size: bool,
}

/// Deserializers tolerant of the server's numeric quirks.
mod lenient {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Value(T),
        Text(String),
    }

    /// Accepts a number, `null`, a numeric string, or `"NaN"` (as `None`).
    pub fn number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + std::str::FromStr,
    {
        match Option::<Raw<T>>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Value(value)) => Ok(Some(value)),
            Some(Raw::Text(text)) if text.trim().eq_ignore_ascii_case("nan") => Ok(None),
            Some(Raw::Text(text)) => text
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("not a number: {text:?}"))),
        }
    }
}
