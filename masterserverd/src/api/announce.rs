use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use shared::protocol::{FIELD_ADDRESS, FIELD_NAME, FIELD_PORT, FIELD_VERSION};
use crate::probe::Prober;
use crate::registry_manager::RegistryHandle;

const MAX_ADDRESS_LEN: usize = 253;
const MAX_NAME_LEN: usize = 255;

/// Raw register form. Everything is optional here so that a missing field
/// gets its own message instead of a generic deserialization rejection.
#[derive(Debug, Default)]
pub struct AnnounceForm {
    pub port: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub address: Option<String>,
}

/// A validated announce, ready for the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub address: String,
    pub port: u16,
    pub version: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("'{0}' not set")]
    Missing(&'static str),
    #[error("Invalid '{0}'")]
    Invalid(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum AnnounceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("CONNECT FAILED: {address}:{port}")]
    Reachability { address: String, port: u16 },
    #[error("storage error")]
    Storage(anyhow::Error),
}

impl IntoResponse for AnnounceError {
    fn into_response(self) -> Response {
        let status = match &self {
            AnnounceError::Storage(e) => {
                tracing::error!("Failed to register server: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AnnounceError::Validation(_) | AnnounceError::Reachability { .. } => {
                StatusCode::BAD_REQUEST
            }
        };
        (status, self.to_string()).into_response()
    }
}

fn is_valid_address(address: &str) -> bool {
    (1..=MAX_ADDRESS_LEN).contains(&address.len())
        && address
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b':' || b == b'.' || b == b'-')
}

fn is_valid_name(name: &str) -> bool {
    name.chars().count() <= MAX_NAME_LEN && !name.contains(['\n', '\r'])
}

impl AnnounceForm {
    /// Build from decoded form pairs. A repeated field keeps its last value;
    /// unknown fields are ignored.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut form = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                FIELD_PORT => &mut form.port,
                FIELD_NAME => &mut form.name,
                FIELD_VERSION => &mut form.version,
                FIELD_ADDRESS => &mut form.address,
                _ => continue,
            };
            *slot = Some(value);
        }
        form
    }

    /// Check required fields and resolve the address, falling back to the
    /// peer the request came from.
    pub fn validate(self, peer: IpAddr) -> Result<Registration, ValidationError> {
        let port = self.port.ok_or(ValidationError::Missing(FIELD_PORT))?;
        let name = self.name.ok_or(ValidationError::Missing(FIELD_NAME))?;
        let version = self.version.ok_or(ValidationError::Missing(FIELD_VERSION))?;

        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| ValidationError::Invalid(FIELD_PORT))?;
        let version = version
            .trim()
            .parse::<i32>()
            .map_err(|_| ValidationError::Invalid(FIELD_VERSION))?;
        if !is_valid_name(&name) {
            return Err(ValidationError::Invalid(FIELD_NAME));
        }

        let address = match self.address {
            Some(address) if is_valid_address(&address) => address,
            Some(_) => return Err(ValidationError::Invalid(FIELD_ADDRESS)),
            None => peer.to_canonical().to_string(),
        };

        Ok(Registration { address, port, version, name })
    }
}

/// Register or refresh a server.
///
/// The first announce of an (address, port, version) triple must pass a
/// reachability probe; nothing is written if it fails.
pub async fn register(
    registry: &RegistryHandle,
    prober: Arc<dyn Prober>,
    probe_timeout: Duration,
    registration: Registration,
) -> Result<(), AnnounceError> {
    let Registration { address, port, version, name } = registration;

    let known = registry
        .exists(address.clone(), port, version)
        .await
        .map_err(AnnounceError::Storage)?;

    if !known {
        let probe_address = address.clone();
        // Runs to completion even if the caller goes away
        let reachable = tokio::spawn(async move {
            prober.probe(&probe_address, port, probe_timeout).await
        })
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Reachability probe task failed: {}", e);
            false
        });

        if !reachable {
            tracing::info!("Rejected {}:{} (version {}): not reachable", address, port, version);
            return Err(AnnounceError::Reachability { address, port });
        }
    }

    registry
        .upsert(address.clone(), port, version, name.clone())
        .await
        .map_err(AnnounceError::Storage)?;

    if !known {
        tracing::info!("Registered {}:{} (version {}) as {:?}", address, port, version, name);
    }

    Ok(())
}
