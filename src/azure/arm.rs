//! Azure Resource Manager implementation of [`ControlPlane`].
//!
//! Talks to the ARM REST API with reqwest. Bearer tokens come from the
//! `azure_identity` credential chain (environment, managed identity, az cli).
//! Long-running operations are polled until the provider reports a terminal state.

use super::{ControlPlane, NetworkSpec, ProviderSubnet, ResourceGroup, VirtualNetwork};
use crate::config::{self, Settings};
use crate::error::ProvisionError;
use async_trait::async_trait;
use azure_core::auth::TokenCredential;
use colored::Colorize;
use reqwest::header::HeaderMap;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

/// Where bearer tokens come from.
#[derive(Clone)]
enum TokenSource {
    Credential(Arc<dyn TokenCredential>),
    /// Fixed token, e.g. from `az account get-access-token` or a test.
    Static(String),
}

pub struct ArmControlPlane {
    http: reqwest::Client,
    token: TokenSource,
    endpoint: String,
    subscription_id: String,
    poll_interval: Duration,
}

impl ArmControlPlane {
    /// Build a client for the subscription in `settings` using the default credential chain.
    pub fn new(settings: &Settings) -> Result<ArmControlPlane, Box<dyn Error>> {
        let subscription_id = settings
            .subscription_id
            .clone()
            .ok_or("AZURE_SUBSCRIPTION_ID is not set")?;
        let token = match &settings.arm_token {
            Some(token) => {
                log::warn!("Using fixed ARM_TOKEN, requests fail once it expires");
                TokenSource::Static(token.clone())
            }
            None => TokenSource::Credential(Arc::new(
                azure_identity::DefaultAzureCredentialBuilder::new().build(),
            )),
        };
        Ok(ArmControlPlane {
            http: reqwest::Client::new(),
            token,
            endpoint: settings.arm_endpoint.clone(),
            subscription_id,
            poll_interval: Duration::from_millis(config::POLL_MSEC),
        })
    }

    /// Build a client that sends a fixed bearer token.
    pub fn with_static_token(endpoint: &str, subscription_id: &str, token: &str) -> ArmControlPlane {
        ArmControlPlane {
            http: reqwest::Client::new(),
            token: TokenSource::Static(token.to_string()),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            subscription_id: subscription_id.to_string(),
            poll_interval: Duration::from_millis(config::POLL_MSEC),
        }
    }

    /// Override the default poll interval used when the provider sends no `Retry-After`.
    pub fn poll_interval(mut self, interval: Duration) -> ArmControlPlane {
        self.poll_interval = interval;
        self
    }

    async fn bearer(&self) -> Result<String, ProvisionError> {
        match &self.token {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Credential(credential) => {
                let token = credential.get_token(&[config::ARM_SCOPE]).await?;
                Ok(token.token.secret().to_string())
            }
        }
    }

    fn subscription_url(&self) -> String {
        format!("{}/subscriptions/{}", self.endpoint, self.subscription_id)
    }

    fn group_url(&self, resource_group: &str) -> String {
        format!("{}/resourcegroups/{resource_group}", self.subscription_url())
    }

    fn vnet_url(&self, resource_group: &str, vnet_name: &str) -> String {
        format!(
            "{}/providers/Microsoft.Network/virtualNetworks/{vnet_name}",
            self.group_url(resource_group)
        )
    }

    /// Send one request; non-2xx answers become [`ProvisionError`]s.
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ProvisionError> {
        log::debug!("{method} {url}", url = url.on_blue());
        let token = self.bearer().await?;
        let mut request = self.http.request(method.clone(), url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        log::warn!(
            "{failed} {method} {url} status={status}",
            failed = "failed".on_red()
        );
        Err(provider_error(status, &text))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T, ProvisionError> {
        let response = self.send(Method::GET, url, None).await?;
        let text = response.text().await?;
        decode(&text, what)
    }

    /// GET a paged ARM list, following `nextLink`.
    async fn get_paged<T: DeserializeOwned>(&self, url: String, what: &str) -> Result<Vec<T>, ProvisionError> {
        let mut items = Vec::new();
        let mut next = Some(url);
        let mut pages = 0;
        while let Some(url) = next {
            let page: Page<T> = self.get_json(&url, what).await?;
            items.extend(page.value);
            if page.next_link.as_deref() == Some(url.as_str()) {
                return Err(ProvisionError::Unexpected(format!(
                    "{what}: nextLink not unique - possible infinite loop"
                )));
            }
            next = page.next_link;
            pages += 1;
        }
        log::debug!("{what}: {} items in {pages} page(s)", items.len());
        Ok(items)
    }

    /// Wait until a long-running operation ends.
    ///
    /// # Arguments
    /// * `status` / `headers` - status and headers of the answer that started the operation
    async fn wait_for_completion(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        what: &str,
    ) -> Result<(), ProvisionError> {
        let mut delay = retry_after(headers).unwrap_or(self.poll_interval);

        if let Some(url) = header_str(headers, "azure-asyncoperation") {
            for poll in 0..config::MAX_POLLS {
                tokio::time::sleep(delay).await;
                let response = self.send(Method::GET, &url, None).await?;
                delay = retry_after(response.headers()).unwrap_or(self.poll_interval);
                let text = response.text().await?;
                let op: OperationStatus = decode(&text, "operation status")?;
                match op.status.as_str() {
                    "Succeeded" => {
                        log::debug!("{what} succeeded after {} poll(s)", poll + 1);
                        return Ok(());
                    }
                    "Failed" | "Canceled" => {
                        let msg = op
                            .error
                            .map(|e| e.message)
                            .unwrap_or_else(|| format!("{what} ended with status {}", op.status));
                        return Err(ProvisionError::ControlPlaneCallFailed(msg));
                    }
                    other => log::debug!("{what} status={other} poll#{poll}"),
                }
            }
            return Err(ProvisionError::Unexpected(format!(
                "{what} did not finish after {} polls",
                config::MAX_POLLS
            )));
        }

        if status == StatusCode::ACCEPTED {
            if let Some(url) = header_str(headers, "location") {
                for poll in 0..config::MAX_POLLS {
                    tokio::time::sleep(delay).await;
                    let response = self.send(Method::GET, &url, None).await?;
                    if response.status() != StatusCode::ACCEPTED {
                        log::debug!("{what} finished after {} poll(s)", poll + 1);
                        return Ok(());
                    }
                    delay = retry_after(response.headers()).unwrap_or(self.poll_interval);
                }
                return Err(ProvisionError::Unexpected(format!(
                    "{what} did not finish after {} polls",
                    config::MAX_POLLS
                )));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ControlPlane for ArmControlPlane {
    async fn list_resource_groups(&self) -> Result<Vec<ResourceGroup>, ProvisionError> {
        let url = format!(
            "{}/resourcegroups?api-version={}",
            self.subscription_url(),
            config::RESOURCES_API_VERSION
        );
        let groups: Vec<WireResourceGroup> = self.get_paged(url, "resource groups").await?;
        Ok(groups.into_iter().map(ResourceGroup::from).collect())
    }

    async fn create_resource_group(
        &self,
        name: &str,
        location: &str,
    ) -> Result<ResourceGroup, ProvisionError> {
        let url = format!(
            "{}?api-version={}",
            self.group_url(name),
            config::RESOURCES_API_VERSION
        );
        let body = serde_json::json!({ "location": location });
        let response = self.send(Method::PUT, &url, Some(&body)).await?;
        let text = response.text().await?;
        let group: WireResourceGroup = decode(&text, "resource group")?;
        Ok(group.into())
    }

    async fn list_networks(&self, resource_group: &str) -> Result<Vec<VirtualNetwork>, ProvisionError> {
        let url = format!(
            "{}/providers/Microsoft.Network/virtualNetworks?api-version={}",
            self.group_url(resource_group),
            config::NETWORK_API_VERSION
        );
        let vnets: Vec<WireVnet> = self.get_paged(url, "virtual networks").await?;
        Ok(vnets.into_iter().map(VirtualNetwork::from).collect())
    }

    async fn get_network(
        &self,
        resource_group: &str,
        vnet_name: &str,
    ) -> Result<VirtualNetwork, ProvisionError> {
        let url = format!(
            "{}?api-version={}",
            self.vnet_url(resource_group, vnet_name),
            config::NETWORK_API_VERSION
        );
        let vnet: WireVnet = self.get_json(&url, "virtual network").await?;
        Ok(vnet.into())
    }

    async fn create_network(
        &self,
        resource_group: &str,
        vnet_name: &str,
        spec: &NetworkSpec,
    ) -> Result<VirtualNetwork, ProvisionError> {
        let url = format!(
            "{}?api-version={}",
            self.vnet_url(resource_group, vnet_name),
            config::NETWORK_API_VERSION
        );
        let body = serde_json::to_value(WireVnet::from(spec))
            .map_err(|e| ProvisionError::Unexpected(e.to_string()))?;
        let response = self.send(Method::PUT, &url, Some(&body)).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;
        self.wait_for_completion(status, &headers, "create virtual network")
            .await?;

        // The PUT answer describes the accepted network; callers re-read for the final state.
        let accepted: WireVnet = if text.trim().is_empty() {
            WireVnet::default()
        } else {
            decode(&text, "virtual network")?
        };
        let mut created = VirtualNetwork::from(accepted);
        if created.name.is_empty() {
            created.name = vnet_name.to_string();
        }
        Ok(created)
    }

    async fn put_subnet(
        &self,
        resource_group: &str,
        vnet_name: &str,
        subnet_name: &str,
        address_prefix: &str,
    ) -> Result<(), ProvisionError> {
        let url = format!(
            "{}/subnets/{subnet_name}?api-version={}",
            self.vnet_url(resource_group, vnet_name),
            config::NETWORK_API_VERSION
        );
        let body = serde_json::json!({ "properties": { "addressPrefix": address_prefix } });
        let response = self.send(Method::PUT, &url, Some(&body)).await?;
        self.wait_for_completion(response.status(), response.headers(), "create or update subnet")
            .await
    }

    async fn delete_subnet(
        &self,
        resource_group: &str,
        vnet_name: &str,
        subnet_name: &str,
    ) -> Result<(), ProvisionError> {
        let url = format!(
            "{}/subnets/{subnet_name}?api-version={}",
            self.vnet_url(resource_group, vnet_name),
            config::NETWORK_API_VERSION
        );
        let response = self.send(Method::DELETE, &url, None).await?;
        self.wait_for_completion(response.status(), response.headers(), "delete subnet")
            .await
    }

    async fn delete_network(&self, resource_group: &str, vnet_name: &str) -> Result<(), ProvisionError> {
        let url = format!(
            "{}?api-version={}",
            self.vnet_url(resource_group, vnet_name),
            config::NETWORK_API_VERSION
        );
        let response = self.send(Method::DELETE, &url, None).await?;
        self.wait_for_completion(response.status(), response.headers(), "delete virtual network")
            .await
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, "retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Decode a JSON body, naming the failing path on error.
fn decode<T: DeserializeOwned>(text: &str, what: &str) -> Result<T, ProvisionError> {
    let mut deserializer = serde_json::Deserializer::from_str(text);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|e| {
        log::error!("OUTPUT START:\n\n{text}\n\nOUTPUT END\n");
        ProvisionError::Unexpected(format!(
            "Error parsing {what}: path={} error={}",
            e.path(),
            e
        ))
    })
}

/// Map a failed ARM answer to an error kind.
fn provider_error(status: StatusCode, body: &str) -> ProvisionError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP {status}")
            } else {
                body.trim().to_string()
            }
        });
    if status == StatusCode::NOT_FOUND {
        ProvisionError::ResourceNotFound(message)
    } else {
        ProvisionError::ControlPlaneCallFailed(message)
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: DeserializeOwned"))]
struct Page<T> {
    #[serde(default)]
    value: Vec<T>,
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct OperationStatus {
    status: String,
    error: Option<ErrorDetail>,
}

#[derive(Deserialize, Debug)]
struct WireResourceGroup {
    name: String,
    location: String,
}

impl From<WireResourceGroup> for ResourceGroup {
    fn from(g: WireResourceGroup) -> Self {
        ResourceGroup {
            name: g.name,
            location: g.location,
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireVnet {
    #[serde(default, skip_serializing)]
    name: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    properties: WireVnetProperties,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireVnetProperties {
    #[serde(default)]
    address_space: WireAddressSpace,
    #[serde(default)]
    subnets: Vec<WireSubnet>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireAddressSpace {
    #[serde(default)]
    address_prefixes: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSubnet {
    name: String,
    #[serde(default)]
    properties: WireSubnetProperties,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireSubnetProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    address_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    address_prefixes: Vec<String>,
}

impl From<WireVnet> for VirtualNetwork {
    fn from(v: WireVnet) -> Self {
        VirtualNetwork {
            name: v.name,
            location: v.location,
            address_prefixes: v.properties.address_space.address_prefixes,
            subnets: v
                .properties
                .subnets
                .into_iter()
                .map(|s| ProviderSubnet {
                    name: s.name,
                    address_prefix: s
                        .properties
                        .address_prefix
                        .or_else(|| s.properties.address_prefixes.into_iter().next()),
                })
                .collect(),
        }
    }
}

impl From<&NetworkSpec> for WireVnet {
    fn from(spec: &NetworkSpec) -> Self {
        WireVnet {
            name: String::new(),
            location: spec.location.clone(),
            properties: WireVnetProperties {
                address_space: WireAddressSpace {
                    address_prefixes: spec.address_prefixes.clone(),
                },
                subnets: spec
                    .subnets
                    .iter()
                    .map(|s| WireSubnet {
                        name: s.name.clone(),
                        properties: WireSubnetProperties {
                            address_prefix: Some(s.address_prefix.clone()),
                            address_prefixes: Vec::new(),
                        },
                    })
                    .collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubnetRequest;

    fn settings(arm_token: Option<&str>) -> Settings {
        Settings {
            subscription_id: Some("sub".into()),
            arm_endpoint: "https://management.azure.com".into(),
            arm_token: arm_token.map(|t| t.to_string()),
            database_url: "sqlite::memory:".into(),
            bind_addr: "127.0.0.1:0".into(),
            control_plane: config::ControlPlaneKind::Arm,
        }
    }

    #[test]
    fn test_new_uses_credential_chain() {
        let cp = ArmControlPlane::new(&settings(None)).unwrap();
        assert!(matches!(cp.token, TokenSource::Credential(_)));
        assert_eq!(cp.subscription_url(), "https://management.azure.com/subscriptions/sub");
    }

    #[test]
    fn test_new_with_fixed_token() {
        let cp = ArmControlPlane::new(&settings(Some("abc"))).unwrap();
        assert!(matches!(cp.token, TokenSource::Static(ref t) if t == "abc"));
    }

    #[test]
    fn test_new_requires_subscription() {
        let mut s = settings(None);
        s.subscription_id = None;
        assert!(ArmControlPlane::new(&s).is_err());
    }

    #[test]
    fn test_decode_vnet() {
        let json = r#"{
            "name": "myVNet",
            "id": "/subscriptions/s/resourceGroups/demo-rg/providers/Microsoft.Network/virtualNetworks/myVNet",
            "location": "eastus",
            "properties": {
                "provisioningState": "Succeeded",
                "addressSpace": {"addressPrefixes": ["10.0.0.0/16"]},
                "subnets": [
                    {"name": "subnet1", "properties": {"addressPrefix": "10.0.1.0/24"}},
                    {"name": "dual", "properties": {"addressPrefixes": ["10.0.2.0/24", "fd00::/64"]}}
                ]
            }
        }"#;
        let vnet: VirtualNetwork = decode::<WireVnet>(json, "virtual network").unwrap().into();
        assert_eq!(vnet.name, "myVNet");
        assert_eq!(vnet.address_prefixes, vec!["10.0.0.0/16"]);
        assert_eq!(vnet.subnets[0].address_prefix.as_deref(), Some("10.0.1.0/24"));
        assert_eq!(vnet.subnets[1].address_prefix.as_deref(), Some("10.0.2.0/24"));
    }

    #[test]
    fn test_decode_error_names_path() {
        let json = r#"{"value": [{"name": 5, "location": "eastus"}]}"#;
        let err = decode::<Page<WireResourceGroup>>(json, "resource groups").unwrap_err();
        match err {
            ProvisionError::Unexpected(msg) => assert!(msg.contains("value[0].name"), "{msg}"),
            other => panic!("unexpected error kind {other:?}"),
        }
    }

    #[test]
    fn test_create_body() {
        let spec = NetworkSpec {
            location: "eastus".into(),
            address_prefixes: vec!["10.0.0.0/16".into()],
            subnets: vec![SubnetRequest {
                name: "subnet1".into(),
                address_prefix: "10.0.1.0/24".into(),
            }],
        };
        let body = serde_json::to_value(WireVnet::from(&spec)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "location": "eastus",
                "properties": {
                    "addressSpace": {"addressPrefixes": ["10.0.0.0/16"]},
                    "subnets": [{"name": "subnet1", "properties": {"addressPrefix": "10.0.1.0/24"}}]
                }
            })
        );
    }

    #[test]
    fn test_provider_error_kinds() {
        let body = r#"{"error":{"code":"ResourceGroupNotFound","message":"Resource group 'x' could not be found."}}"#;
        assert_eq!(
            provider_error(StatusCode::NOT_FOUND, body),
            ProvisionError::ResourceNotFound("Resource group 'x' could not be found.".into())
        );
        assert_eq!(
            provider_error(StatusCode::CONFLICT, r#"{"error":{"code":"InUse","message":"in use"}}"#),
            ProvisionError::ControlPlaneCallFailed("in use".into())
        );
        assert_eq!(
            provider_error(StatusCode::BAD_GATEWAY, ""),
            ProvisionError::ControlPlaneCallFailed("HTTP 502 Bad Gateway".into())
        );
    }

    #[test]
    fn test_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert("retry-after", "7".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
    }
}
