//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use azure_vnet_provisioner::azure::InMemoryControlPlane;
use azure_vnet_provisioner::mirror::Mirror;
use azure_vnet_provisioner::models::{SubnetRequest, VnetRequest};
use azure_vnet_provisioner::reconciler::Reconciler;
use std::sync::Arc;

/// Reconciler over an in-memory provider holding the empty group `demo-rg`.
pub async fn reconciler() -> (Arc<InMemoryControlPlane>, Reconciler) {
    let cp = Arc::new(InMemoryControlPlane::with_resource_groups(&[("demo-rg", "eastus")]));
    let mirror = Mirror::in_memory().await.expect("in-memory mirror");
    (cp.clone(), Reconciler::new(cp, mirror))
}

pub fn vnet_request(subnets: &[(&str, &str)]) -> VnetRequest {
    VnetRequest {
        resource_group: "demo-rg".to_string(),
        vnet_name: "myVNet".to_string(),
        location: "eastus".to_string(),
        address_prefix: "10.0.0.0/16".to_string(),
        subnets: subnets
            .iter()
            .map(|(name, prefix)| SubnetRequest {
                name: name.to_string(),
                address_prefix: prefix.to_string(),
            })
            .collect(),
    }
}
