use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// A game server currently known to the registry.
/// One entry exists per (address, port); this is the canonical data model
/// used by the daemon's store, its JSON API, and the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Address the server is reachable under (IPv4, IPv6 or hostname)
    pub address: String,

    /// Advertised game port
    pub port: u16,

    /// Protocol/build version of the announcing server
    pub version: i32,

    /// Free-form display name
    pub name: String,

    /// Last successful announce, set by the registry
    pub last_update: DateTime<Utc>,
}
