//! Encryption-key rotation coordinator.

use std::sync::Arc;

use crate::llmgate::cluster::ClusterPort;
use crate::llmgate::error::GatewayError;
use crate::llmgate::store::Store;

const ROTATION_LOCK: &str = "encryption-key-rotation";

/// Coordinates a `POST /api/v1/admin/rotate-key` request across the local
/// store and every cluster peer.
pub struct RotationCoordinator {
    store: Arc<dyn Store>,
    cluster: Arc<dyn ClusterPort>,
}

impl RotationCoordinator {
    /// Build a coordinator over `store`, serialized through `cluster`.
    pub fn new(store: Arc<dyn Store>, cluster: Arc<dyn ClusterPort>) -> Self {
        Self { store, cluster }
    }

    /// Rotate to `new_passphrase`. An empty passphrase disables encryption
    /// (`new_key = None`). Acquires the cluster-wide rotation lock, rotates
    /// the store's persisted ciphertext, broadcasts the new key to peers,
    /// then releases the lock. Store failure aborts before any broadcast;
    /// broadcast failure is logged but does not roll back the local store.
    pub async fn rotate(&self, new_passphrase: &str) -> Result<(), GatewayError> {
        let new_key = if new_passphrase.is_empty() {
            None
        } else {
            Some(new_passphrase.to_string())
        };

        self.cluster.acquire_lock(ROTATION_LOCK).await?;

        let result = self.store.rotate_encryption_key(new_key.clone()).await;
        if let Err(e) = result {
            self.cluster.release_lock(ROTATION_LOCK).await.ok();
            return Err(e);
        }

        if let Err(e) = self.cluster.broadcast(new_key).await {
            log::error!("key rotation broadcast failed, peers will run with a stale key until restart: {e}");
        }

        self.cluster.release_lock(ROTATION_LOCK).await?;
        Ok(())
    }
}
