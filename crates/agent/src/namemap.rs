//! Pod UID → display name resolution.
//!
//! The collector only sees the cgroup directory name, which embeds the pod
//! UID. Display names come from the Kubernetes API: the mapper keeps a
//! uid→name cache refreshed periodically, and lookups hit only the cache so
//! a collection cycle never blocks on the API server.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Deserialize;
use tracing::{info, warn};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

pub trait NameMapper: Send + Sync {
    /// Resolves a pod UID to its display name, or `None` if unknown yet.
    fn lookup(&self, uid: &str) -> Option<String>;
}

/// Mapper used when no Kubernetes API is reachable; names stay unresolved.
pub struct NullNameMapper;

impl NameMapper for NullNameMapper {
    fn lookup(&self, _uid: &str) -> Option<String> {
        None
    }
}

#[derive(Deserialize)]
struct PodList {
    items: Vec<PodItem>,
}

#[derive(Deserialize)]
struct PodItem {
    metadata: PodMetadata,
}

#[derive(Deserialize)]
struct PodMetadata {
    uid: String,
    name: String,
}

/// Name mapper backed by the in-cluster Kubernetes API.
pub struct KubeNameMapper {
    client: reqwest::Client,
    pods_url: String,
    token: String,
    pods: RwLock<HashMap<String, String>>,
}

impl KubeNameMapper {
    /// Builds a mapper from the in-cluster service-account environment:
    /// `KUBERNETES_SERVICE_HOST`/`_PORT` plus the mounted token and CA cert.
    pub fn from_cluster_env() -> Result<Self, Box<dyn std::error::Error>> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT")?;
        let token = std::fs::read_to_string(format!("{SERVICE_ACCOUNT_DIR}/token"))?;

        let ca_pem = std::fs::read(format!("{SERVICE_ACCOUNT_DIR}/ca.crt"))?;
        let ca = reqwest::Certificate::from_pem(&ca_pem)?;
        let client = reqwest::Client::builder()
            .add_root_certificate(ca)
            .timeout(std::time::Duration::from_secs(5))
            .build()?;

        Ok(KubeNameMapper {
            client,
            pods_url: format!("https://{host}:{port}/api/v1/pods"),
            token: token.trim().to_string(),
            pods: RwLock::new(HashMap::new()),
        })
    }

    /// Re-fetches the full pod list and swaps the cache. On failure the
    /// previous cache stays in place and the error is only logged.
    pub async fn refresh(&self) {
        let response = self
            .client
            .get(&self.pods_url)
            .bearer_auth(&self.token)
            .send()
            .await;

        let list: PodList = match response {
            Ok(res) => match res.error_for_status() {
                Ok(res) => match res.json().await {
                    Ok(list) => list,
                    Err(e) => {
                        warn!(error = %e, "failed to decode pod list");
                        return;
                    }
                },
                Err(e) => {
                    warn!(error = %e, "pod list request rejected");
                    return;
                }
            },
            Err(e) => {
                warn!(error = %e, "pod list request failed");
                return;
            }
        };

        let mut pods = HashMap::with_capacity(list.items.len());
        for item in list.items {
            pods.insert(item.metadata.uid, item.metadata.name);
        }
        info!(pods = pods.len(), "refreshed pod name map");
        *self.pods.write().unwrap() = pods;
    }
}

impl NameMapper for KubeNameMapper {
    fn lookup(&self, uid: &str) -> Option<String> {
        self.pods.read().unwrap().get(uid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pod_list_json() {
        let body = r#"{
            "items": [
                {"metadata": {"uid": "AAA-0001", "name": "web-0", "namespace": "default"}},
                {"metadata": {"uid": "BBB-0002", "name": "db-1"}}
            ]
        }"#;
        let list: PodList = serde_json::from_str(body).unwrap();
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].metadata.uid, "AAA-0001");
        assert_eq!(list.items[1].metadata.name, "db-1");
    }
}
