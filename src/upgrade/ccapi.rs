//! Client for the platform's v3 service-instance API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::UpgradeError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The calls a bulk upgrade needs.
#[async_trait]
pub trait UpgradeApi: Send + Sync {
    /// Version of the platform's v3 API, as advertised at its root.
    async fn api_version(&self) -> Result<String, UpgradeError>;

    async fn get_service_plans(&self, broker: &str) -> Result<Vec<Plan>, UpgradeError>;

    async fn get_service_instances(
        &self,
        plan_guids: &[String],
    ) -> Result<Vec<ServiceInstance>, UpgradeError>;

    /// Start the upgrade and wait for the platform to finish it.
    async fn upgrade_service_instance(&self, guid: &str, version: &str) -> Result<(), UpgradeError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    pub guid: String,
    #[serde(default)]
    maintenance_info: MaintenanceInfo,
}

impl Plan {
    pub fn maintenance_version(&self) -> &str {
        &self.maintenance_info.version
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MaintenanceInfo {
    #[serde(default)]
    version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceInstance {
    pub guid: String,
    #[serde(default)]
    pub upgrade_available: bool,
    #[serde(default)]
    relationships: Relationships,
    #[serde(default)]
    pub last_operation: Option<LastOperation>,
}

impl ServiceInstance {
    pub fn plan_guid(&self) -> &str {
        &self.relationships.service_plan.data.guid
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Relationships {
    #[serde(default)]
    service_plan: ToOne,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ToOne {
    #[serde(default)]
    data: GuidRef,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GuidRef {
    #[serde(default)]
    guid: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastOperation {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// `GET /`: `{"links":{"cloud_controller_v3":{"meta":{"version":"3.181.0"}}}}`
#[derive(Deserialize)]
struct RootInfo {
    links: RootLinks,
}

#[derive(Deserialize)]
struct RootLinks {
    cloud_controller_v3: V3Link,
}

#[derive(Deserialize)]
struct V3Link {
    meta: V3Meta,
}

#[derive(Deserialize)]
struct V3Meta {
    version: String,
}

#[derive(Deserialize)]
struct Resources<T> {
    resources: Vec<T>,
}

/// How often and for how long an upgrade is polled.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// `UpgradeApi` over HTTP. The token is sent verbatim as the
/// `Authorization` header.
#[derive(Clone)]
pub struct CcApi {
    base_url: String,
    token: String,
    client: Client,
    poll: PollSettings,
}

impl CcApi {
    pub fn new(
        base_url: &str,
        token: &str,
        skip_ssl_validation: bool,
    ) -> Result<Self, UpgradeError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(skip_ssl_validation)
            .build()
            .map_err(|e| UpgradeError::Request(format!("error creating HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
            poll: PollSettings::default(),
        })
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, String> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .header("Authorization", &self.token)
            .send()
            .await
            .map_err(|e| format!("http request error: {e}"))?;

        if response.status() != StatusCode::OK {
            return Err(format!("http response: {}", response.status().as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| format!("failed to unmarshal response into receiver error: {e}"))
    }

    async fn patch(&self, path: &str, body: &serde_json::Value) -> Result<(), String> {
        let response = self
            .client
            .patch(format!("{}/{}", self.base_url, path))
            .header("Authorization", &self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("http request error: {e}"))?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(format!("http response: {}", response.status().as_u16()));
        }
        Ok(())
    }

    async fn poll_until_updated(&self, guid: &str) -> Result<(), UpgradeError> {
        let path = format!("v3/service_instances/{guid}");
        loop {
            let instance: ServiceInstance = self.get(&path).await.map_err(UpgradeError::Request)?;

            if let Some(op) = instance.last_operation.filter(|op| op.kind == "update") {
                match op.state.as_str() {
                    "failed" => {
                        return Err(UpgradeError::Failed {
                            description: op.description.unwrap_or_default(),
                        });
                    }
                    "in progress" => {}
                    _ => return Ok(()),
                }
            }

            tracing::debug!(guid, "upgrade still in progress");
            tokio::time::sleep(self.poll.interval).await;
        }
    }
}

#[async_trait]
impl UpgradeApi for CcApi {
    async fn api_version(&self) -> Result<String, UpgradeError> {
        let root: RootInfo = self.get("").await.map_err(|e| {
            UpgradeError::InvalidInput(format!("error retrieving api version: {e}"))
        })?;
        Ok(root.links.cloud_controller_v3.meta.version)
    }

    async fn get_service_plans(&self, broker: &str) -> Result<Vec<Plan>, UpgradeError> {
        let plans: Resources<Plan> = self
            .get(&format!(
                "v3/service_plans?per_page=5000&service_broker_names={broker}"
            ))
            .await
            .map_err(|e| UpgradeError::Discovery(format!("error getting service plans: {e}")))?;
        Ok(plans.resources)
    }

    async fn get_service_instances(
        &self,
        plan_guids: &[String],
    ) -> Result<Vec<ServiceInstance>, UpgradeError> {
        if plan_guids.is_empty() {
            return Err(UpgradeError::Discovery(
                "no service_plan_guids specified".to_string(),
            ));
        }

        let instances: Resources<ServiceInstance> = self
            .get(&format!(
                "v3/service_instances?per_page=5000&service_plan_guids={}",
                plan_guids.join(",")
            ))
            .await
            .map_err(|e| {
                UpgradeError::Discovery(format!("error getting service instances: {e}"))
            })?;
        Ok(instances.resources)
    }

    async fn upgrade_service_instance(
        &self,
        guid: &str,
        version: &str,
    ) -> Result<(), UpgradeError> {
        let body = json!({"maintenance_info": {"version": version}});
        self.patch(&format!("v3/service_instances/{guid}"), &body)
            .await
            .map_err(UpgradeError::Request)?;

        tokio::time::timeout(self.poll.timeout, self.poll_until_updated(guid))
            .await
            .map_err(|_| UpgradeError::Timeout)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_reads_nested_version() {
        let plan: Plan =
            serde_json::from_value(json!({"guid": "p1", "maintenance_info": {"version": "1.0.1"}}))
                .unwrap();
        assert_eq!(plan.maintenance_version(), "1.0.1");

        let bare: Plan = serde_json::from_value(json!({"guid": "p2"})).unwrap();
        assert_eq!(bare.maintenance_version(), "");
    }

    #[test]
    fn instance_reads_plan_relationship() {
        let si: ServiceInstance = serde_json::from_value(json!({
            "guid": "i1",
            "upgrade_available": true,
            "relationships": {"service_plan": {"data": {"guid": "p1"}}},
            "last_operation": {"type": "update", "state": "failed", "description": "boom"}
        }))
        .unwrap();

        assert_eq!(si.plan_guid(), "p1");
        assert!(si.upgrade_available);
        let op = si.last_operation.unwrap();
        assert_eq!(op.kind, "update");
        assert_eq!(op.description.as_deref(), Some("boom"));
    }

    #[test]
    fn instance_tolerates_null_last_operation() {
        let si: ServiceInstance =
            serde_json::from_value(json!({"guid": "i1", "last_operation": null})).unwrap();
        assert!(si.last_operation.is_none());
        assert!(!si.upgrade_available);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let api = CcApi::new("https://api.example.com/", "bearer t", false).unwrap();
        assert_eq!(api.base_url, "https://api.example.com");
    }
}
