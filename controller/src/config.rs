//! Controller configuration.

use serde::{Deserialize, Serialize};

/// Tunables for the wanted-state transition checker.
///
/// Handed to the checker at construction; the checker never reads ambient
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Minimum replica count every bucket must keep when a node is suspended.
    pub required_redundancy: u32,
    /// Refuse all safe-mode changes while the controller is bootstrapping.
    #[serde(default)]
    pub in_moratorium: bool,
    /// Accepted for configuration compatibility. At most one group (or node,
    /// in a flat cluster) may be suspended at a time regardless of this value.
    #[serde(default = "default_max_groups_down")]
    pub max_number_of_groups_allowed_to_be_down: u32,
}

fn default_max_groups_down() -> u32 {
    1
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            required_redundancy: 2,
            in_moratorium: false,
            max_number_of_groups_allowed_to_be_down: default_max_groups_down(),
        }
    }
}

impl CheckerConfig {
    pub fn new(required_redundancy: u32) -> Self {
        Self {
            required_redundancy,
            ..Self::default()
        }
    }

    pub fn in_moratorium(mut self, in_moratorium: bool) -> Self {
        self.in_moratorium = in_moratorium;
        self
    }
}

/// Main controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Name of the content cluster.
    pub cluster_name: String,
    /// Minimum replica count required before suspending a storage node.
    pub required_redundancy: u32,
    /// Maximum number of groups allowed to be down concurrently.
    pub max_number_of_groups_allowed_to_be_down: u32,
    /// Start in moratorium until bootstrap is explicitly finished.
    pub start_in_moratorium: bool,
    /// Enable metrics collection.
    pub metrics_enabled: bool,
    /// Log level.
    pub log_level: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cluster_name: "content".to_string(),
            required_redundancy: 2,
            max_number_of_groups_allowed_to_be_down: 1,
            start_in_moratorium: true,
            metrics_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("FLEETGATE_CLUSTER_NAME") {
            config.cluster_name = name;
        }

        if let Ok(redundancy) = std::env::var("FLEETGATE_REQUIRED_REDUNDANCY") {
            if let Ok(redundancy) = redundancy.parse() {
                config.required_redundancy = redundancy;
            }
        }

        if let Ok(groups) = std::env::var("FLEETGATE_MAX_GROUPS_DOWN") {
            if let Ok(groups) = groups.parse() {
                config.max_number_of_groups_allowed_to_be_down = groups;
            }
        }

        if let Ok(moratorium) = std::env::var("FLEETGATE_START_IN_MORATORIUM") {
            if let Ok(moratorium) = moratorium.parse() {
                config.start_in_moratorium = moratorium;
            }
        }

        if let Ok(enabled) = std::env::var("FLEETGATE_METRICS_ENABLED") {
            if let Ok(enabled) = enabled.parse() {
                config.metrics_enabled = enabled;
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.cluster_name.is_empty() {
            return Err("Cluster name cannot be empty".to_string());
        }

        if self.max_number_of_groups_allowed_to_be_down == 0 {
            return Err("Max number of groups allowed to be down must be at least 1".to_string());
        }

        Ok(())
    }

    /// Checker configuration for the given moratorium status.
    pub fn checker_config(&self, in_moratorium: bool) -> CheckerConfig {
        CheckerConfig {
            required_redundancy: self.required_redundancy,
            in_moratorium,
            max_number_of_groups_allowed_to_be_down: self.max_number_of_groups_allowed_to_be_down,
        }
    }
}
