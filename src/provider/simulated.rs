//! Deterministic local adapter
//!
//! Backs the CLI so declaration sets can be exercised end to end
//! without touching real infrastructure: attribute values are derived
//! from the configuration itself and resource ids from the stack and
//! resource identity, so repeated runs converge. Real adapters are
//! registered by embedding the library.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{ApplyRequest, ApplyResponse, DestroyRequest, ResourceProviderAdapter};

#[derive(Debug, Default)]
pub struct SimulatedProvider;

impl SimulatedProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResourceProviderAdapter for SimulatedProvider {
    async fn apply(&self, request: ApplyRequest) -> Result<ApplyResponse> {
        debug!(
            stack = %request.stack,
            resource = %request.resource,
            kind = %request.kind,
            "simulated apply"
        );

        let canonical = serde_json::to_vec(&request.config)?;
        let mut hasher = Sha256::new();
        hasher.update(request.kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(&canonical);
        let fingerprint = format!("{:x}", hasher.finalize());

        let mut attributes: BTreeMap<String, Value> = match &request.config {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => BTreeMap::new(),
        };

        let mut id_hasher = Sha256::new();
        id_hasher.update(request.stack.as_bytes());
        id_hasher.update([0u8]);
        id_hasher.update(request.resource.as_bytes());
        let digest = format!("{:x}", id_hasher.finalize());
        attributes.insert(
            "id".to_string(),
            Value::String(format!(
                "{}-{}",
                request.kind.replace('/', "-"),
                &digest[..12]
            )),
        );

        Ok(ApplyResponse {
            fingerprint,
            attributes,
        })
    }

    async fn destroy(&self, request: DestroyRequest) -> Result<()> {
        debug!(
            stack = %request.stack,
            resource = %request.resource,
            kind = %request.kind,
            "simulated destroy"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(config: Value) -> ApplyRequest {
        ApplyRequest {
            stack: "network".to_string(),
            resource: "vpc".to_string(),
            kind: "network/vpc".to_string(),
            config,
            previous_fingerprint: None,
        }
    }

    #[tokio::test]
    async fn test_attributes_echo_config_and_carry_id() {
        let provider = SimulatedProvider::new();
        let response = provider
            .apply(request(json!({"cidr": "10.0.0.0/16"})))
            .await
            .unwrap();

        assert_eq!(response.attributes["cidr"], json!("10.0.0.0/16"));
        let id = response.attributes["id"].as_str().unwrap();
        assert!(id.starts_with("network-vpc-"));
    }

    #[tokio::test]
    async fn test_identical_config_yields_identical_fingerprint() {
        let provider = SimulatedProvider::new();
        let a = provider.apply(request(json!({"cidr": "10.0.0.0/16"}))).await.unwrap();
        let b = provider.apply(request(json!({"cidr": "10.0.0.0/16"}))).await.unwrap();
        let c = provider.apply(request(json!({"cidr": "172.16.0.0/12"}))).await.unwrap();

        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_eq!(a.attributes["id"], b.attributes["id"]);
    }

    #[tokio::test]
    async fn test_destroy_always_succeeds() {
        let provider = SimulatedProvider::new();
        let result = provider
            .destroy(DestroyRequest {
                stack: "network".to_string(),
                resource: "vpc".to_string(),
                kind: "network/vpc".to_string(),
                fingerprint: "fp".to_string(),
            })
            .await;
        assert!(result.is_ok());
    }
}
