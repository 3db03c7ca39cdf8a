//! Tier dispatch over one Ice and one Water store.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::store::{IceStore, WaterStore};
use crate::types::{Node, NodeState, SweepReport};

/// Routes node operations to the store matching the node's tier.
///
/// Gas nodes are derived on demand and never persisted, so they are
/// rejected on write and can never be read back.
#[derive(Clone)]
pub struct TierRouter {
    ice: Arc<dyn IceStore>,
    water: Arc<dyn WaterStore>,
}

impl TierRouter {
    /// Route between `ice` and `water`.
    pub fn new(ice: Arc<dyn IceStore>, water: Arc<dyn WaterStore>) -> Self {
        Self { ice, water }
    }

    /// The Ice store.
    pub fn ice(&self) -> &Arc<dyn IceStore> {
        &self.ice
    }

    /// The Water store.
    pub fn water(&self) -> &Arc<dyn WaterStore> {
        &self.water
    }

    /// Initialize both stores.
    pub async fn initialize(&self) -> StoreResult<()> {
        self.ice.initialize().await?;
        self.water.initialize().await
    }

    /// Store `node` in its tier. `ttl` only applies to Water.
    pub async fn store_node(&self, node: &Node, ttl: Option<Duration>) -> StoreResult<()> {
        match node.state {
            NodeState::Ice => self.ice.store_node(node).await,
            NodeState::Water => self.water.store_node(node, ttl).await,
            NodeState::Gas => Err(StoreError::validation(format!(
                "node {} is gas; gas nodes are never stored",
                node.id
            ))),
        }
    }

    /// Look up `id` in Water first, then Ice.
    pub async fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        if let Some(node) = self.water.get_node(id).await? {
            return Ok(Some(node));
        }
        self.ice.get_node(id).await
    }

    /// Delete `id` from both tiers. Returns whether either held it.
    pub async fn delete_node(&self, id: &str) -> StoreResult<bool> {
        let from_water = self.water.delete_node(id).await?;
        let from_ice = self.ice.delete_node(id).await?;
        Ok(from_water || from_ice)
    }

    /// Sweep expired Water entries.
    pub async fn sweep(&self) -> StoreResult<SweepReport> {
        self.water.sweep().await
    }
}

impl std::fmt::Debug for TierRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierRouter")
            .field("ice", &self.ice.backend())
            .field("water", &self.water.backend())
            .finish()
    }
}
