//! State store: the single source of truth renderers read from.
//!
//! Each domain lives in its own `tokio::sync::watch` channel, so a reader
//! always sees one complete value and can await changes without polling.
//! Writes replace the whole value; there is no field-level merge anywhere.
//!
//! The store is an owned context: cloning shares the same domains, and
//! separate [`StateStore::new`] calls give fully independent instances.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::model::{ConnectionState, FileStatus, MachineStatus, Settings};

/// Named slice of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Event channel connection flags.
    Connection,
    /// Machine status.
    Status,
    /// File send progress.
    FileStatus,
    /// Jog and connection settings.
    Settings,
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connection => "connection",
            Self::Status => "status",
            Self::FileStatus => "fileStatus",
            Self::Settings => "settings",
        })
    }
}

/// Point-in-time copy of every domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Connection flags.
    pub connection: ConnectionState,
    /// Machine status.
    pub status: MachineStatus,
    /// File send progress.
    pub file_status: FileStatus,
    /// Settings.
    pub settings: Settings,
}

#[derive(Debug)]
struct Domains {
    connection: watch::Sender<ConnectionState>,
    status: watch::Sender<MachineStatus>,
    file_status: watch::Sender<FileStatus>,
    settings: watch::Sender<Settings>,
}

/// Shared handle to the domain values.
#[derive(Debug, Clone)]
pub struct StateStore {
    domains: Arc<Domains>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Creates a store holding the initial value of every domain.
    pub fn new() -> Self {
        Self {
            domains: Arc::new(Domains {
                connection: watch::Sender::new(ConnectionState::DISCONNECTED),
                status: watch::Sender::new(MachineStatus::unavailable()),
                file_status: watch::Sender::new(FileStatus::default()),
                settings: watch::Sender::new(Settings::default()),
            }),
        }
    }

    // =========================================================================
    // Readers
    // =========================================================================

    /// Current connection flags.
    pub fn connection(&self) -> ConnectionState {
        *self.domains.connection.borrow()
    }

    /// Current machine status.
    pub fn status(&self) -> MachineStatus {
        self.domains.status.borrow().clone()
    }

    /// Current file send progress.
    pub fn file_status(&self) -> FileStatus {
        self.domains.file_status.borrow().clone()
    }

    /// Current settings.
    pub fn settings(&self) -> Settings {
        self.domains.settings.borrow().clone()
    }

    /// Copies every domain.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            connection: self.connection(),
            status: self.status(),
            file_status: self.file_status(),
            settings: self.settings(),
        }
    }

    /// Subscribes to connection changes.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.domains.connection.subscribe()
    }

    /// Subscribes to machine status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<MachineStatus> {
        self.domains.status.subscribe()
    }

    /// Subscribes to file status changes.
    pub fn subscribe_file_status(&self) -> watch::Receiver<FileStatus> {
        self.domains.file_status.subscribe()
    }

    /// Subscribes to settings changes.
    pub fn subscribe_settings(&self) -> watch::Receiver<Settings> {
        self.domains.settings.subscribe()
    }

    // =========================================================================
    // Writers (whole-value replacement only)
    // =========================================================================

    pub(crate) fn set_connection(&self, connection: ConnectionState) {
        self.domains.connection.send_if_modified(|current| {
            let changed = *current != connection;
            *current = connection;
            changed
        });
    }

    /// Runs `write` while holding the connection domain, if `admit` accepts
    /// the current connection flags. Returns whether it ran.
    ///
    /// Connection writers on other tasks wait until `write` returns, so an
    /// admitted write always lands before a later disconnect. `write` may
    /// replace the flags through its argument but must not read or set the
    /// connection domain through the store.
    pub(crate) fn write_gated(
        &self,
        admit: impl FnOnce(&ConnectionState) -> bool,
        write: impl FnOnce(&Self, &mut ConnectionState),
    ) -> bool {
        let mut admitted = false;
        self.domains.connection.send_if_modified(|connection| {
            if !admit(connection) {
                return false;
            }
            admitted = true;
            let before = *connection;
            write(self, connection);
            *connection != before
        });
        admitted
    }

    pub(crate) fn replace_status(&self, status: MachineStatus) {
        self.domains.status.send_replace(status);
    }

    pub(crate) fn mark_status_unavailable(&self) {
        log::debug!("[Store] status -> UNAVAILABLE");
        self.replace_status(MachineStatus::unavailable());
    }

    pub(crate) fn replace_file_status(&self, file_status: FileStatus) {
        self.domains.file_status.send_replace(file_status);
    }

    pub(crate) fn replace_settings(&self, settings: Settings) {
        self.domains.settings.send_replace(settings);
    }
}
