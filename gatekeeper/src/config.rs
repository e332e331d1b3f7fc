//! Configuration for the gatekeeper.

use serde::{Deserialize, Serialize};

/// Top-level gatekeeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Node ID
    pub node_id: String,
    /// Classifier configuration
    pub classifier: ClassifierConfig,
    /// Device registry configuration
    pub registry: RegistryConfig,
    /// Gate configuration
    pub gate: GateConfig,
    /// Audit log configuration
    pub audit: AuditConfig,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            classifier: ClassifierConfig::default(),
            registry: RegistryConfig::default(),
            gate: GateConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl GatekeeperConfig {
    /// Create a new config with a node ID.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Classifier configuration.
///
/// Matching is naive substring containment, so a benign descriptor
/// containing a listed token (e.g. `echo "mount your bike"`) is
/// classified critical. Known false-positive behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Command patterns that mark a descriptor critical
    pub command_patterns: Vec<String>,
    /// Filesystem paths that mark a descriptor critical
    pub sensitive_paths: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            command_patterns: [
                "sudo",
                "apt",
                "apt-get",
                "dpkg",
                "mount",
                "umount",
                "rm -rf",
                "dd if=",
                "mkfs",
                "fdisk",
                "parted",
                "userdel",
                "passwd root",
                "chmod 777",
                "chown root",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            sensitive_paths: [
                "/etc/", "/boot/", "/usr/", "/bin/", "/sbin/", "/lib/", "/root/", "/sys/",
                "/proc/", "/.ssh/",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Device registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Staleness window (seconds) after which a device is excluded
    /// from quorum calculations
    pub stale_window_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_window_secs: 30,
        }
    }
}

/// Gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Approve votes required for a critical operation to proceed
    pub approval_threshold: usize,
    /// Vote collection timeout (milliseconds)
    pub vote_timeout_ms: u64,
    /// Maximum retained terminal decisions for late-vote detection
    pub decision_history: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            approval_threshold: 3,
            vote_timeout_ms: 10_000,
            decision_history: 1_000,
        }
    }
}

/// Audit log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Maximum entries retained before pruning
    pub max_entries: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatekeeperConfig::default();
        assert_eq!(config.gate.approval_threshold, 3);
        assert_eq!(config.gate.vote_timeout_ms, 10_000);
        assert_eq!(config.registry.stale_window_secs, 30);
        assert!(config
            .classifier
            .command_patterns
            .contains(&"sudo".to_string()));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = GatekeeperConfig::new("test-node");
        let yaml = config.to_yaml().unwrap();
        let parsed = GatekeeperConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.node_id, "test-node");
        assert_eq!(parsed.audit.max_entries, 10_000);
    }
}
