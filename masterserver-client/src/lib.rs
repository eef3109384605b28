//! Game-server side of the registry: keep a server announced and fetch the
//! list of live servers.

use std::time::Duration;
use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use shared::protocol::{Announcement, ListedServer, CONNECT_FAILED_PREFIX, LIST_PATH, REGISTER_PATH};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of the most recent announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    Disabled,
    Registering,
    Success,
    FailedToReachMasterServer,
    /// The registry could not connect back to the announced port
    FailedPortForwarding,
    /// Any other rejection, with the registry's message
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct MasterServerClient {
    base_url: String,
    http: reqwest::Client,
}

impl MasterServerClient {
    /// `base_url` is the registry root, e.g. `http://master.example.com:8080`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Register or refresh this server once.
    pub async fn announce(&self, announcement: &Announcement) -> RegistrationState {
        let url = format!("{}{}", self.base_url, REGISTER_PATH);

        let response = match self.http.post(&url).form(announcement).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Failed to reach master server {}: {}", url, e);
                return RegistrationState::FailedToReachMasterServer;
            }
        };

        if response.status().is_success() {
            return RegistrationState::Success;
        }

        let status = response.status();
        let message = response.text().await.unwrap_or_default();
        tracing::warn!("Master server rejected announce ({}): {}", status, message);

        if status.is_server_error() {
            RegistrationState::FailedToReachMasterServer
        } else if message.starts_with(CONNECT_FAILED_PREFIX) {
            RegistrationState::FailedPortForwarding
        } else {
            RegistrationState::Rejected(message)
        }
    }

    /// Fetch every live server. Lines that don't parse are skipped.
    pub async fn list(&self) -> Result<Vec<ListedServer>> {
        let url = format!("{}{}", self.base_url, LIST_PATH);

        let body = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to query master server {}", url))?
            .error_for_status()
            .with_context(|| format!("Master server {} returned an error", url))?
            .text()
            .await
            .context("Failed to read server list")?;

        Ok(parse_list(&body))
    }
}

/// Parse the plain-text list body
pub fn parse_list(body: &str) -> Vec<ListedServer> {
    body.lines()
        .filter_map(|line| match line.parse::<ListedServer>() {
            Ok(server) => Some(server),
            Err(_) => {
                if !line.is_empty() {
                    tracing::debug!("Skipping malformed server line {:?}", line);
                }
                None
            }
        })
        .collect()
}

/// Servers a client running `version` can join
pub fn compatible(servers: Vec<ListedServer>, version: i32) -> Vec<ListedServer> {
    servers
        .into_iter()
        .filter(|server| server.is_compatible_with(version))
        .collect()
}

/// Re-announce every `interval` until cancelled, publishing each outcome.
/// `interval` must stay well below the registry's expiry window.
pub async fn run_registration(
    client: MasterServerClient,
    announcement: Announcement,
    interval: Duration,
    state_tx: watch::Sender<RegistrationState>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                state_tx.send_replace(RegistrationState::Registering);
                let state = client.announce(&announcement).await;
                state_tx.send_replace(state);
            }
            _ = cancel.cancelled() => {
                tracing::info!("Stopping master server registration");
                state_tx.send_replace(RegistrationState::Disabled);
                break;
            }
        }
    }
}
