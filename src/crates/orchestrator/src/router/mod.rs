//! Capability routing
//!
//! Arms advertise capability tags and a cost tier. A plan step goes to the
//! cheapest healthy arm whose tags cover everything the step requires, ties
//! broken by `arm_id` in lexical order.

pub mod registry;

pub use registry::{ArmRegistry, RegistryFile};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unavailable,
}

/// One downstream arm as seen by the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmCapability {
    pub arm_id: String,
    #[serde(default)]
    pub capability_tags: BTreeSet<String>,
    /// 1 (cheap) to 5 (expensive)
    pub cost_tier: u8,
    pub endpoint: String,
    #[serde(default)]
    pub health_status: HealthStatus,
}

impl ArmCapability {
    pub fn new(arm_id: impl Into<String>, tags: &[&str], cost_tier: u8, endpoint: impl Into<String>) -> Self {
        Self {
            arm_id: arm_id.into(),
            capability_tags: tags.iter().map(|t| t.to_string()).collect(),
            cost_tier,
            endpoint: endpoint.into(),
            health_status: HealthStatus::Healthy,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.arm_id.trim().is_empty() {
            return Err(OrchestratorError::Config("arm_id must not be empty".into()));
        }
        if !(1..=5).contains(&self.cost_tier) {
            return Err(OrchestratorError::Config(format!(
                "arm {}: cost_tier must be between 1 and 5",
                self.arm_id
            )));
        }
        if self.endpoint.trim().is_empty() {
            return Err(OrchestratorError::Config(format!(
                "arm {}: endpoint must not be empty",
                self.arm_id
            )));
        }
        Ok(())
    }

    pub fn offers(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capability_tags)
    }
}

/// Pick the arm for a set of required tags from a registry snapshot
pub fn select_arm<'a>(arms: &'a [ArmCapability], required: &BTreeSet<String>) -> Result<&'a ArmCapability> {
    arms.iter()
        .filter(|arm| arm.health_status == HealthStatus::Healthy && arm.offers(required))
        .min_by(|a, b| {
            a.cost_tier
                .cmp(&b.cost_tier)
                .then_with(|| a.arm_id.cmp(&b.arm_id))
        })
        .ok_or_else(|| {
            let tags: Vec<&str> = required.iter().map(String::as_str).collect();
            OrchestratorError::NoCapableArm(format!(
                "no healthy arm offers [{}] among {} registered",
                tags.join(", "),
                arms.len()
            ))
        })
}
