use serde::{Deserialize, Serialize};

use crate::message::Delivery;

/// Replication configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Delivery class of position messages.
    pub position_delivery: Delivery,
    /// Upper bound on entities carried by one create message.
    pub max_entities_per_create: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            position_delivery: Delivery::Unreliable,
            max_entities_per_create: 64,
        }
    }
}
