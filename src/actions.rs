//! Operator actions.
//!
//! One-shot requests a renderer issues on the operator's behalf: machine
//! commands, jogging, file streaming control, settings edits and
//! connection parameters. Actions report only acceptance or rejection;
//! the resulting machine state arrives through the synchronizer like any
//! other update.
//!
//! Settings edits are the one place a renderer's intent touches the store
//! directly: [`Actions::submit_settings`] writes the edit optimistically,
//! pushes it upstream, then re-fetches so the store ends up holding what
//! the backend actually accepted.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::{Axis, Backend, ConnectionParam, FileCommand, MachineCommand};
use crate::model::Settings;
use crate::store::StateStore;
use crate::sync::polling::{self, Feed};

/// Logs a failed action before handing the error back.
fn reported<T>(action: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        log::warn!("[Action] {} failed: {:#}", action, e);
    }
    result
}

/// Operator-facing command surface over a [`Backend`].
#[derive(Debug, Clone)]
pub struct Actions {
    backend: Arc<dyn Backend>,
    store: StateStore,
}

impl Actions {
    /// Actions against `backend`, writing optimistic edits into `store`.
    pub fn new(backend: Arc<dyn Backend>, store: StateStore) -> Self {
        Self { backend, store }
    }

    /// The store optimistic edits go to.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    async fn machine(&self, command: MachineCommand) -> Result<()> {
        log::debug!("[Action] {:?}", command);
        let result = self.backend.machine_command(&command).await;
        reported(&format!("{command:?}"), result)
    }

    /// Open the controller connection.
    pub async fn connect_machine(&self) -> Result<()> {
        self.machine(MachineCommand::Connect).await
    }

    /// Close the controller connection.
    pub async fn disconnect_machine(&self) -> Result<()> {
        self.machine(MachineCommand::Disconnect).await
    }

    /// Clear an alarm lock.
    pub async fn kill_alarm(&self) -> Result<()> {
        self.machine(MachineCommand::KillAlarm).await
    }

    /// Run the homing cycle.
    pub async fn home(&self) -> Result<()> {
        self.machine(MachineCommand::Home).await
    }

    /// Controller soft reset.
    pub async fn soft_reset(&self) -> Result<()> {
        self.machine(MachineCommand::SoftReset).await
    }

    /// Zero `axis`, or every axis when `None`.
    pub async fn reset_to_zero(&self, axis: Option<Axis>) -> Result<()> {
        self.machine(MachineCommand::ResetToZero(axis)).await
    }

    /// Move back to work zero.
    pub async fn return_to_zero(&self) -> Result<()> {
        self.machine(MachineCommand::ReturnToZero).await
    }

    /// Jog one step. Each direction must be -1, 0 or 1.
    ///
    /// Rejected locally when the last known state does not accept jogs.
    pub async fn jog(&self, x: i32, y: i32, z: i32) -> Result<()> {
        reported("Jog", self.check_jog(x, y, z))?;
        self.machine(MachineCommand::Jog { x, y, z }).await
    }

    fn check_jog(&self, x: i32, y: i32, z: i32) -> Result<()> {
        if [x, y, z].iter().any(|d| !(-1..=1).contains(d)) {
            anyhow::bail!("jog directions must be -1, 0 or 1 (got {x}, {y}, {z})");
        }
        if (x, y, z) == (0, 0, 0) {
            anyhow::bail!("jog needs at least one axis direction");
        }
        let state = self.store.status().state;
        if !state.accepts_jog() {
            anyhow::bail!("machine is {state}, jog not accepted");
        }
        Ok(())
    }

    /// Send raw G-code, one or more lines.
    pub async fn send_gcode(&self, commands: &str) -> Result<()> {
        if commands.trim().is_empty() {
            return reported("SendGcode", Err(anyhow::anyhow!("no G-code to send")));
        }
        self.machine(MachineCommand::SendGcode(commands.to_string())).await
    }

    /// Start, pause or cancel the loaded file.
    pub async fn file(&self, command: FileCommand) -> Result<()> {
        log::debug!("[Action] File {:?}", command);
        let result = self.backend.file_command(command).await;
        reported(&format!("File {command:?}"), result)
    }

    /// Upload a local file and load it on the backend.
    pub async fn open_file(&self, path: &Path) -> Result<()> {
        let result = async {
            let file_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("Not a file path: {}", path.display()))?;
            let contents = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            log::info!("[Action] Opening {} ({} bytes)", file_name, contents.len());
            self.backend.open_file(file_name, contents).await?;
            polling::refresh(Feed::FileStatus, &*self.backend, &self.store).await
        }
        .await;
        reported("Open file", result)
    }

    /// Values the backend offers for `param`.
    pub async fn connection_options(&self, param: ConnectionParam) -> Result<Vec<String>> {
        let result = self.backend.connection_options(param).await;
        reported(&format!("List {param:?}"), result)
    }

    /// Currently selected value of `param`.
    pub async fn selected_connection_param(&self, param: ConnectionParam) -> Result<String> {
        let result = self.backend.selected_connection_param(param).await;
        reported(&format!("Get {param:?}"), result)
    }

    /// Select `value` for `param`.
    pub async fn select_connection_param(&self, param: ConnectionParam, value: &str) -> Result<()> {
        log::debug!("[Action] Select {:?} = {}", param, value);
        let result = self.backend.select_connection_param(param, value).await;
        reported(&format!("Select {param:?}"), result)
    }

    /// Submit edited settings.
    ///
    /// The store shows the edit immediately. A follow-up fetch confirms or
    /// corrects it; if both the push and the fetch fail, the previous value
    /// is restored. Returns the push outcome.
    pub async fn submit_settings(&self, settings: Settings) -> Result<()> {
        let previous = self.store.settings();
        self.store.replace_settings(settings.clone());

        let pushed = self
            .backend
            .update_settings(&settings)
            .await
            .context("Failed to update settings");

        if let Err(e) = polling::refresh(Feed::Settings, &*self.backend, &self.store).await {
            log::warn!("[Action] Settings confirm fetch failed: {:#}", e);
            if pushed.is_err() {
                self.store.replace_settings(previous);
            }
        }

        reported("Submit settings", pushed)
    }

    /// Re-fetch one domain into the store.
    pub async fn refresh(&self, feed: Feed) -> Result<()> {
        let result = polling::refresh(feed, &*self.backend, &self.store).await;
        reported(&format!("Refresh {}", feed.domain()), result)
    }
}
