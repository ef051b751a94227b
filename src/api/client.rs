//! HTTP client for the pendant server REST API.
//!
//! This module provides the [`ApiClient`] struct which implements
//! [`Backend`](super::Backend) over `reqwest`. Every endpoint lives under
//! `{server_url}/api/v1`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};

use super::{Backend, ConnectionParam, FileCommand, MachineCommand};
use crate::constants;
use crate::model::{FileStatus, MachineStatus, Settings};

/// API client for the pendant server.
///
/// Encapsulates HTTP client configuration and the endpoint layout.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    server_url: String,
}

impl ApiClient {
    /// Creates a new API client for `server_url` (e.g. `http://host:8080`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(server_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self::with_client(client, server_url))
    }

    /// Creates an API client with a pre-configured HTTP client.
    ///
    /// Useful for testing or when custom client configuration is needed.
    pub fn with_client(client: Client, server_url: &str) -> Self {
        Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}/{}", self.server_url, constants::API_PREFIX, path)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let url = self.endpoint(path);
        log::trace!("[Api] GET {}", url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;
        ensure_success(response, path).await
    }

    async fn post(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let url = self.endpoint(path);
        log::trace!("[Api] POST {}", url);
        let response = self
            .client
            .post(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;
        ensure_success(response, path).await
    }

    async fn post_json<T: serde::Serialize + Sync>(&self, path: &str, body: &T) -> Result<Response> {
        let url = self.endpoint(path);
        log::trace!("[Api] POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;
        ensure_success(response, path).await
    }
}

/// Turns a non-2xx response into an error carrying status and body.
async fn ensure_success(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    anyhow::bail!("{} returned {}: {}", path, status, excerpt)
}

fn machine_command_request(command: &MachineCommand) -> (&'static str, Vec<(&'static str, String)>) {
    match command {
        MachineCommand::Connect => ("machine/connect", Vec::new()),
        MachineCommand::Disconnect => ("machine/disconnect", Vec::new()),
        MachineCommand::KillAlarm => ("machine/killAlarm", Vec::new()),
        MachineCommand::ResetToZero(axis) => (
            "machine/resetToZero",
            axis.map(|a| vec![("axis", a.as_str().to_string())])
                .unwrap_or_default(),
        ),
        MachineCommand::ReturnToZero => ("machine/returnToZero", Vec::new()),
        MachineCommand::Home => ("machine/homeMachine", Vec::new()),
        MachineCommand::SoftReset => ("machine/softReset", Vec::new()),
        MachineCommand::Jog { x, y, z } => (
            "machine/jog",
            vec![("x", x.to_string()), ("y", y.to_string()), ("z", z.to_string())],
        ),
        // Sent as a JSON body, see `machine_command`.
        MachineCommand::SendGcode(_) => ("machine/sendGcode", Vec::new()),
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn machine_status(&self) -> Result<MachineStatus> {
        self.get("status/getStatus", &[])
            .await?
            .json()
            .await
            .context("Failed to parse machine status")
    }

    async fn file_status(&self) -> Result<FileStatus> {
        self.get("files/getFileStatus", &[])
            .await?
            .json()
            .await
            .context("Failed to parse file status")
    }

    async fn settings(&self) -> Result<Settings> {
        self.get("settings/getSettings", &[])
            .await?
            .json()
            .await
            .context("Failed to parse settings")
    }

    async fn update_settings(&self, settings: &Settings) -> Result<()> {
        self.post_json("settings/setSettings", settings).await?;
        log::debug!("[Api] Settings pushed");
        Ok(())
    }

    async fn machine_command(&self, command: &MachineCommand) -> Result<()> {
        let (path, query) = machine_command_request(command);
        if let MachineCommand::SendGcode(commands) = command {
            let body = serde_json::json!({ "commands": commands });
            self.post_json(path, &body).await?;
        } else {
            self.get(path, &query).await?;
        }
        log::debug!("[Api] Machine command {:?} accepted", command);
        Ok(())
    }

    async fn file_command(&self, command: FileCommand) -> Result<()> {
        let path = match command {
            FileCommand::Send => "files/send",
            FileCommand::Pause => "files/pause",
            FileCommand::Cancel => "files/cancel",
        };
        self.post(path, &[]).await?;
        Ok(())
    }

    async fn open_file(&self, file_name: &str, contents: Vec<u8>) -> Result<()> {
        let part = reqwest::multipart::Part::bytes(contents).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let path = "files/uploadAndOpen";
        let response = self
            .client
            .post(self.endpoint(path))
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;
        ensure_success(response, path).await?;
        log::info!("[Api] Uploaded {}", file_name);
        Ok(())
    }

    async fn connection_options(&self, param: ConnectionParam) -> Result<Vec<String>> {
        let path = match param {
            ConnectionParam::Port => "machine/getPortList",
            ConnectionParam::BaudRate => "machine/getBaudRateList",
            ConnectionParam::Firmware => "machine/getFirmwareList",
        };
        self.get(path, &[])
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse {path} response"))
    }

    async fn selected_connection_param(&self, param: ConnectionParam) -> Result<String> {
        let path = format!("machine/getSelected{}", param.endpoint_name());
        let value: serde_json::Value = self
            .get(&path, &[])
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse {path} response"))?;

        let key = format!("selected{}", param.endpoint_name());
        match value.get(&key) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(serde_json::Value::Null) | None => Ok(String::new()),
            Some(other) => Ok(other.to_string()),
        }
    }

    async fn select_connection_param(&self, param: ConnectionParam, value: &str) -> Result<()> {
        let path = format!("machine/setSelected{}", param.endpoint_name());
        self.post(&path, &[(param.query_key(), value.to_string())])
            .await?;
        Ok(())
    }
}
