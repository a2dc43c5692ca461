//! Cluster coordination port, injected so the rotation coordinator stays
//! agnostic to the peer-discovery transport.

use async_trait::async_trait;

use crate::llmgate::error::GatewayError;

/// Three-operation cluster port a [`crate::llmgate::rotation::RotationCoordinator`]
/// uses to serialize key rotation across peers.
#[async_trait]
pub trait ClusterPort: Send + Sync {
    /// Acquire the named cluster-wide lock, blocking until held.
    async fn acquire_lock(&self, name: &str) -> Result<(), GatewayError>;
    /// Release a lock previously acquired with `acquire_lock`.
    async fn release_lock(&self, name: &str) -> Result<(), GatewayError>;
    /// Broadcast `new_key` to every peer over the cluster's own
    /// authenticated channel. Peers apply it with
    /// [`crate::llmgate::store::Store::set_encryption_key`].
    async fn broadcast(&self, new_key: Option<String>) -> Result<(), GatewayError>;
}

/// Single-node default: locks and broadcasts are no-ops, since there are no
/// peers to coordinate with.
pub struct LocalCluster;

#[async_trait]
impl ClusterPort for LocalCluster {
    async fn acquire_lock(&self, _name: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn release_lock(&self, _name: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn broadcast(&self, _new_key: Option<String>) -> Result<(), GatewayError> {
        Ok(())
    }
}
