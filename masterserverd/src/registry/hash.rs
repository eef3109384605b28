use sha2::{Sha256, Digest};
use shared::types::ServerEntry;

/// Computes a SHA-256 fingerprint of the server list.
/// Only address, port, version and name are hashed: last_update moves on every
/// re-announce without changing what a client would display.
/// Servers are sorted by (address, port) for deterministic output.
pub fn compute_hash(servers: &[ServerEntry]) -> String {
    let mut indices: Vec<usize> = (0..servers.len()).collect();
    indices.sort_by(|&a, &b| {
        let (a, b) = (&servers[a], &servers[b]);
        (&a.address, a.port).cmp(&(&b.address, b.port))
    });

    let mut hasher = Sha256::new();
    for i in indices {
        let s = &servers[i];
        hasher.update(s.address.as_bytes());
        hasher.update([0u8]);
        hasher.update(s.port.to_be_bytes());
        hasher.update(s.version.to_be_bytes());
        hasher.update(s.name.as_bytes());
        hasher.update([0u8]);
    }

    hex::encode(hasher.finalize())
}
