//! Calls to downstream arms
//!
//! An arm exposes `POST {endpoint}/execute` and `GET {endpoint}/capabilities`.
//! Every execute call carries an `Idempotency-Key` of `{task_id}:{step_index}`
//! so a step re-dispatched after a crash is not performed twice by arms that
//! honour it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use uuid::Uuid;

use super::error::UpstreamError;
use crate::router::ArmCapability;
use crate::task::ResourceBudget;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Work for one plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmRequest {
    pub task_id: Uuid,
    pub step_index: usize,
    pub goal: String,
    /// Description of this step
    pub instruction: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub capability_tags: BTreeSet<String>,
    /// What is left of the task budget
    pub budget: ResourceBudget,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmResponse {
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost_units: f64,
    /// Acceptance criteria the arm reports as satisfied
    #[serde(default)]
    pub criteria_met: Vec<String>,
}

/// Self-description served at `/capabilities`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmDescriptor {
    #[serde(default)]
    pub arm_id: Option<String>,
    pub capability_tags: BTreeSet<String>,
    #[serde(default)]
    pub cost_tier: Option<u8>,
}

#[async_trait]
pub trait ArmClient: Send + Sync {
    async fn execute(
        &self,
        arm: &ArmCapability,
        request: &ArmRequest,
        idempotency_key: &str,
    ) -> Result<ArmResponse, UpstreamError>;

    async fn capabilities(&self, endpoint: &str) -> Result<ArmDescriptor, UpstreamError>;
}

/// JSON-over-HTTP arm client
#[derive(Debug, Clone)]
pub struct HttpArmClient {
    http: reqwest::Client,
}

impl HttpArmClient {
    pub fn new(timeout: Duration) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(UpstreamError::from)?;
        Ok(Self { http })
    }

    fn url(endpoint: &str, path: &str) -> String {
        format!("{}/{}", endpoint.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ArmClient for HttpArmClient {
    async fn execute(
        &self,
        arm: &ArmCapability,
        request: &ArmRequest,
        idempotency_key: &str,
    ) -> Result<ArmResponse, UpstreamError> {
        let response = self
            .http
            .post(Self::url(&arm.endpoint, "execute"))
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpstreamError::from_response(response).await);
        }
        response
            .json::<ArmResponse>()
            .await
            .map_err(|e| UpstreamError::Decode(format!("arm {}: {}", arm.arm_id, e)))
    }

    async fn capabilities(&self, endpoint: &str) -> Result<ArmDescriptor, UpstreamError> {
        let response = self.http.get(Self::url(endpoint, "capabilities")).send().await?;
        if !response.status().is_success() {
            return Err(UpstreamError::from_response(response).await);
        }
        response
            .json::<ArmDescriptor>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_fields_default() {
        let response: ArmResponse = serde_json::from_str(r#"{"output": "patched"}"#).unwrap();
        assert_eq!(response.output, Value::String("patched".into()));
        assert_eq!(response.tokens_used, 0);
        assert!(response.criteria_met.is_empty());
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        assert_eq!(HttpArmClient::url("http://coder:8080/", "execute"), "http://coder:8080/execute");
    }
}
