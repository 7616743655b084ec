//! Arm registry snapshot
//!
//! Readers take an `Arc` of the current arm list and route against it
//! without holding a lock. Refreshers swap in a whole new list.

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::{select_arm, ArmCapability, HealthStatus};
use crate::client::ArmClient;
use crate::config::loader::load_yaml_config;
use crate::{OrchestratorError, Result};

/// YAML layout of a registry file
///
/// ```yaml
/// arms:
///   - arm_id: coder
///     capability_tags: [code, python]
///     cost_tier: 2
///     endpoint: ${CODER_URL:http://localhost:9001}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub arms: Vec<ArmCapability>,
}

#[derive(Debug, Default)]
pub struct ArmRegistry {
    arms: RwLock<Arc<Vec<ArmCapability>>>,
}

impl ArmRegistry {
    pub fn new(arms: Vec<ArmCapability>) -> Result<Self> {
        let registry = Self::default();
        registry.replace(arms)?;
        Ok(registry)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let file: RegistryFile = load_yaml_config(path.as_ref())?;
        info!(path = %path.as_ref().display(), arms = file.arms.len(), "Loaded arm registry");
        Self::new(file.arms)
    }

    /// Current arms, sorted by `arm_id`
    pub fn snapshot(&self) -> Arc<Vec<ArmCapability>> {
        Arc::clone(&self.arms.read())
    }

    pub fn len(&self) -> usize {
        self.arms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.read().is_empty()
    }

    /// Swap in a new arm list after validating every entry
    pub fn replace(&self, mut arms: Vec<ArmCapability>) -> Result<()> {
        let mut seen = HashSet::new();
        for arm in &arms {
            arm.validate()?;
            if !seen.insert(arm.arm_id.as_str()) {
                return Err(OrchestratorError::Config(format!("duplicate arm_id: {}", arm.arm_id)));
            }
        }
        arms.sort_by(|a, b| a.arm_id.cmp(&b.arm_id));
        *self.arms.write() = Arc::new(arms);
        Ok(())
    }

    pub fn get(&self, arm_id: &str) -> Option<ArmCapability> {
        self.arms.read().iter().find(|a| a.arm_id == arm_id).cloned()
    }

    /// Returns `false` for an unknown arm
    pub fn set_health(&self, arm_id: &str, status: HealthStatus) -> bool {
        let mut guard = self.arms.write();
        let Some(index) = guard.iter().position(|a| a.arm_id == arm_id) else {
            return false;
        };
        if guard[index].health_status != status {
            let mut arms = (**guard).clone();
            arms[index].health_status = status;
            *guard = Arc::new(arms);
            info!(arm_id, health = ?status, "Arm health changed");
        }
        true
    }

    pub fn route(&self, required: &BTreeSet<String>) -> Result<ArmCapability> {
        let snapshot = self.snapshot();
        select_arm(&snapshot, required).cloned()
    }

    /// Probe every arm's `/capabilities` and publish the outcome
    ///
    /// Arms that answer become healthy with their advertised tags; arms that
    /// fail become unavailable. Returns the number of healthy arms.
    pub async fn refresh(&self, client: &dyn ArmClient) -> usize {
        let current = self.snapshot();
        let probes = current.iter().map(|arm| async move {
            let mut arm = arm.clone();
            match client.capabilities(&arm.endpoint).await {
                Ok(descriptor) => {
                    arm.capability_tags = descriptor.capability_tags;
                    if let Some(tier) = descriptor.cost_tier.filter(|t| (1..=5).contains(t)) {
                        arm.cost_tier = tier;
                    }
                    arm.health_status = HealthStatus::Healthy;
                }
                Err(e) => {
                    warn!(arm_id = %arm.arm_id, "Capability probe failed: {}", e);
                    arm.health_status = HealthStatus::Unavailable;
                }
            }
            arm
        });
        let refreshed: Vec<ArmCapability> = join_all(probes).await;

        let healthy = refreshed
            .iter()
            .filter(|a| a.health_status == HealthStatus::Healthy)
            .count();
        *self.arms.write() = Arc::new(refreshed);
        healthy
    }
}
