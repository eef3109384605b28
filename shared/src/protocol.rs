use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use crate::types::ServerEntry;

/// Route for game servers announcing themselves (form-encoded POST)
pub const REGISTER_PATH: &str = "/register";

/// Route for the plain-text server list
pub const LIST_PATH: &str = "/list";

/// JSON API routes
pub const SERVERS_PATH: &str = "/v1/servers";
pub const SERVERS_HASH_PATH: &str = "/v1/servers/hash";

/// Form field names accepted by the register route
pub const FIELD_PORT: &str = "port";
pub const FIELD_NAME: &str = "name";
pub const FIELD_VERSION: &str = "version";
pub const FIELD_ADDRESS: &str = "address";

/// Records not refreshed within this window drop out of the list
pub const DEFAULT_EXPIRE_AFTER_SECS: u64 = 300;

/// Prefix of the rejection message sent when the reachability probe fails
pub const CONNECT_FAILED_PREFIX: &str = "CONNECT FAILED";

/// Body of a register request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub port: u16,
    pub name: String,
    pub version: i32,
    /// Externally visible address, for servers behind a proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// One line of the plain-text list: `address:port:version:name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedServer {
    pub address: String,
    pub port: u16,
    pub version: i32,
    pub name: String,
}

impl ListedServer {
    /// Version 0 on either side means "any version".
    pub fn is_compatible_with(&self, version: i32) -> bool {
        self.version == version || self.version == 0 || version == 0
    }
}

impl From<&ServerEntry> for ListedServer {
    fn from(entry: &ServerEntry) -> Self {
        Self {
            address: entry.address.clone(),
            port: entry.port,
            version: entry.version,
            name: entry.name.clone(),
        }
    }
}

impl fmt::Display for ListedServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.address, self.port, self.version, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseListLineError;

impl fmt::Display for ParseListLineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("malformed server list line")
    }
}

impl std::error::Error for ParseListLineError {}

impl FromStr for ListedServer {
    type Err = ParseListLineError;

    /// Splits into at most four parts, so the name may itself contain ':'.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.splitn(4, ':');
        let address = parts.next().filter(|s| !s.is_empty()).ok_or(ParseListLineError)?;
        let port = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or(ParseListLineError)?;
        let version = parts
            .next()
            .and_then(|s| s.parse::<i32>().ok())
            .ok_or(ParseListLineError)?;
        let name = parts.next().ok_or(ParseListLineError)?;

        Ok(Self {
            address: address.to_string(),
            port,
            version,
            name: name.to_string(),
        })
    }
}

/// Render entries in the list format, one newline-terminated line each.
pub fn render_list(entries: &[ServerEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&ListedServer::from(entry).to_string());
        out.push('\n');
    }
    out
}
