//! Node configuration.

use crate::error::ConfigError;

/// Default capacity of each link's outbound send queue, in bytes.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 1_024_000;

/// Configuration for a single Gossamer node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Server name, unique across the network (e.g. `hub.example.net`).
    pub server_name: String,

    /// Human-readable server description.
    pub server_desc: String,

    /// Network name.
    pub net_name: String,

    /// Name of the default subnet. Must match between two nodes for
    /// their networks to link.
    pub default_subnet: String,

    /// Capacity of each link's outbound send queue, in bytes. A link
    /// whose queue overflows is split off.
    pub send_queue_capacity: usize,
}

impl NodeConfig {
    pub fn new(
        server_name: impl Into<String>,
        server_desc: impl Into<String>,
        net_name: impl Into<String>,
        default_subnet: impl Into<String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            server_desc: server_desc.into(),
            net_name: net_name.into(),
            default_subnet: default_subnet.into(),
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
        }
    }

    /// Reject configurations that cannot identify the node on the wire.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_name.is_empty() {
            return Err(ConfigError::MissingServerName);
        }
        if self.server_desc.is_empty() {
            return Err(ConfigError::MissingServerDesc);
        }
        if self.net_name.is_empty() {
            return Err(ConfigError::MissingNetName);
        }
        if self.default_subnet.is_empty() {
            return Err(ConfigError::MissingDefaultSubnet);
        }
        if self.send_queue_capacity == 0 {
            return Err(ConfigError::ZeroSendQueueCapacity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> NodeConfig {
        NodeConfig::new("hub.a", "Test Server", "TestNet", "test")
    }

    #[test]
    fn accepts_complete_config() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rejects_empty_fields() {
        let mut c = base();
        c.server_name.clear();
        assert!(matches!(c.validate(), Err(ConfigError::MissingServerName)));

        let mut c = base();
        c.server_desc.clear();
        assert!(matches!(c.validate(), Err(ConfigError::MissingServerDesc)));

        let mut c = base();
        c.net_name.clear();
        assert!(matches!(c.validate(), Err(ConfigError::MissingNetName)));

        let mut c = base();
        c.default_subnet.clear();
        assert!(matches!(
            c.validate(),
            Err(ConfigError::MissingDefaultSubnet)
        ));
    }

    #[test]
    fn rejects_zero_send_queue() {
        let mut c = base();
        c.send_queue_capacity = 0;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::ZeroSendQueueCapacity)
        ));
    }
}
