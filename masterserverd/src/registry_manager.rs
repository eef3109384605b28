use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use shared::types::ServerEntry;
use crate::registry::{db::RegistryDb, hash};
use crate::config::RegistryConfig;

/// Commands sent to the registry thread
pub enum RegistryCommand {
    Upsert {
        address: String,
        port: u16,
        version: i32,
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Exists {
        address: String,
        port: u16,
        version: i32,
        reply: oneshot::Sender<Result<bool>>,
    },
    Expire {
        expire_after_secs: u64,
        reply: oneshot::Sender<Result<u64>>,
    },
    ScanAll(oneshot::Sender<Result<Vec<ServerEntry>>>),
    /// Expire then scan, with no other command in between
    ListLive {
        expire_after_secs: u64,
        reply: oneshot::Sender<Result<Vec<ServerEntry>>>,
    },
    Shutdown,
}

/// Handle to the registry database.
/// All commands run on one thread, so mutations are totally ordered.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

/// Publish a new fingerprint only when the live list actually changed.
/// A row that ages out without any write is reflected at the next sweep.
fn recompute_hash(db: &RegistryDb, hash_tx: &watch::Sender<String>, expire_after_secs: u64) {
    match db.scan_live(expire_after_secs) {
        Ok(servers) => {
            let new_hash = hash::compute_hash(&servers);
            hash_tx.send_if_modified(|current| {
                if *current == new_hash {
                    false
                } else {
                    *current = new_hash;
                    true
                }
            });
        }
        Err(e) => tracing::warn!("Failed to recompute list hash: {:#}", e),
    }
}

fn expire(db: &RegistryDb, hash_tx: &watch::Sender<String>, expire_after_secs: u64) -> Result<u64> {
    let removed = db.expire_older_than(expire_after_secs)?;
    if removed > 0 {
        tracing::debug!("Expired {} server(s)", removed);
        recompute_hash(db, hash_tx, expire_after_secs);
    }
    Ok(removed)
}

impl RegistryHandle {
    /// Spawn a new registry thread owning the given database.
    /// `expire_after_secs` decides which rows the published hash covers.
    pub fn spawn(db: RegistryDb, hash_tx: watch::Sender<String>, expire_after_secs: u64) -> Self {
        let (tx, mut rx) = mpsc::channel::<RegistryCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    RegistryCommand::Upsert { address, port, version, name, reply } => {
                        let result = db.upsert(&address, port, version, &name);
                        if result.is_ok() {
                            recompute_hash(&db, &hash_tx, expire_after_secs);
                        }
                        let _ = reply.send(result);
                    }
                    RegistryCommand::Exists { address, port, version, reply } => {
                        let _ = reply.send(db.exists(&address, port, version));
                    }
                    RegistryCommand::Expire { expire_after_secs, reply } => {
                        let _ = reply.send(expire(&db, &hash_tx, expire_after_secs));
                    }
                    RegistryCommand::ScanAll(reply) => {
                        let _ = reply.send(db.scan_all());
                    }
                    RegistryCommand::ListLive { expire_after_secs, reply } => {
                        let result = expire(&db, &hash_tx, expire_after_secs)
                            .and_then(|_| db.scan_all());
                        let _ = reply.send(result);
                    }
                    RegistryCommand::Shutdown => {
                        tracing::info!("Registry thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Insert or refresh a server
    pub async fn upsert(&self, address: String, port: u16, version: i32, name: String) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Upsert { address, port, version, name, reply }).await?;
        rx.await?
    }

    /// Whether this exact (address, port, version) has been registered
    pub async fn exists(&self, address: String, port: u16, version: i32) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Exists { address, port, version, reply }).await?;
        rx.await?
    }

    /// Delete servers older than the TTL. Returns how many were removed.
    pub async fn expire(&self, expire_after_secs: u64) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Expire { expire_after_secs, reply }).await?;
        rx.await?
    }

    /// Every stored server, live or not
    pub async fn scan_all(&self) -> Result<Vec<ServerEntry>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::ScanAll(reply)).await?;
        rx.await?
    }

    /// Sweep expired servers, then return the rest
    pub async fn list_live(&self, expire_after_secs: u64) -> Result<Vec<ServerEntry>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::ListLive { expire_after_secs, reply }).await?;
        rx.await?
    }

    /// Shutdown the registry thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(RegistryCommand::Shutdown).await?;
        Ok(())
    }
}

/// Periodic expiry sweep, keeps the published hash current between listings
pub async fn run(
    registry: RegistryHandle,
    config: RegistryConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let mut sweep_interval = tokio::time::interval(
        Duration::from_secs(config.sweep_interval_secs.max(1))
    );

    loop {
        tokio::select! {
            _ = sweep_interval.tick() => {
                if let Err(e) = registry.expire(config.expire_after_secs).await {
                    tracing::error!("Failed to expire servers: {:#}", e);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Registry sweeper shutting down");
                break;
            }
        }
    }

    Ok(())
}
