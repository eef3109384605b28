use anyhow::Result;
use shared::protocol::render_list;
use shared::types::ServerEntry;
use crate::registry_manager::RegistryHandle;

/// Servers announced within the last `expire_after_secs` seconds.
/// Stale records are deleted before the scan.
pub async fn live_servers(registry: &RegistryHandle, expire_after_secs: u64) -> Result<Vec<ServerEntry>> {
    registry.list_live(expire_after_secs).await
}

/// Plain-text list, one `address:port:version:name` line per live server
pub async fn live_list(registry: &RegistryHandle, expire_after_secs: u64) -> Result<String> {
    let servers = live_servers(registry, expire_after_secs).await?;
    Ok(render_list(&servers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::watch;
    use crate::registry::{db::RegistryDb, hash};

    #[tokio::test]
    async fn test_listing_drops_expired_servers() {
        let db = RegistryDb::open(":memory:").unwrap();
        db.upsert_at("198.51.100.1", 27015, 1, "Gone", Utc::now() - chrono::Duration::minutes(6))
            .unwrap();
        db.upsert_at("198.51.100.2", 27015, 1, "Alive", Utc::now() - chrono::Duration::minutes(4))
            .unwrap();

        let (hash_tx, _hash_rx) = watch::channel(hash::compute_hash(&[]));
        let registry = RegistryHandle::spawn(db, hash_tx, 300);

        let list = live_list(&registry, 300).await.unwrap();
        assert_eq!(list, "198.51.100.2:27015:1:Alive\n");

        // The sweep is a real delete, not a filter
        assert_eq!(registry.scan_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_listing() {
        let db = RegistryDb::open(":memory:").unwrap();
        let (hash_tx, _hash_rx) = watch::channel(hash::compute_hash(&[]));
        let registry = RegistryHandle::spawn(db, hash_tx, 300);

        assert_eq!(live_list(&registry, 300).await.unwrap(), "");
    }
}
