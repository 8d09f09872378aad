//! Client-facing network request and response types.
//!
//! These carry the caller's desired topology. They are never written to the mirror,
//! which only accepts provider reads (see [`crate::azure::VirtualNetwork`]).

use serde::{Deserialize, Serialize};

/// Desired state of one subnet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetRequest {
    pub name: String,
    pub address_prefix: String,
}

/// Desired state of a virtual network and the subnets it must contain.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VnetRequest {
    pub resource_group: String,
    pub vnet_name: String,
    pub location: String,
    /// Address space of the network, a single CIDR block.
    pub address_prefix: String,
    #[serde(default)]
    pub subnets: Vec<SubnetRequest>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetDeleteRequest {
    pub resource_group: String,
    pub vnet_name: String,
    pub subnet_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VnetDeleteRequest {
    pub resource_group: String,
    pub vnet_name: String,
}

/// Request to overwrite the mirror row of a network with a fresh provider read.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VnetResyncRequest {
    pub resource_group: String,
    pub vnet_name: String,
}

/// Result of a create-or-update: the network as the provider reports it afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VnetSummary {
    pub vnet_name: String,
    pub location: String,
    /// Subnet names, in provider order.
    pub subnets: Vec<String>,
}

/// Outcome message of a delete, also used for "does not exist" no-ops.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Message {
        Message {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vnet_request_camel_case() {
        let json = r#"{
            "resourceGroup": "demo-rg",
            "vnetName": "myVNet",
            "location": "eastus",
            "addressPrefix": "10.0.0.0/16",
            "subnets": [{"name": "subnet1", "addressPrefix": "10.0.1.0/24"}]
        }"#;
        let req: VnetRequest = serde_json::from_str(json).expect("parse request");
        assert_eq!(req.resource_group, "demo-rg");
        assert_eq!(req.vnet_name, "myVNet");
        assert_eq!(req.address_prefix, "10.0.0.0/16");
        assert_eq!(req.subnets.len(), 1);
        assert_eq!(req.subnets[0].address_prefix, "10.0.1.0/24");
    }

    #[test]
    fn test_vnet_request_without_subnets() {
        let json = r#"{"resourceGroup":"rg","vnetName":"v","location":"eastus","addressPrefix":"10.0.0.0/16"}"#;
        let req: VnetRequest = serde_json::from_str(json).expect("parse request");
        assert!(req.subnets.is_empty());
    }

    #[test]
    fn test_summary_is_snake_case() {
        let summary = VnetSummary {
            vnet_name: "myVNet".into(),
            location: "eastus".into(),
            subnets: vec!["subnet1".into()],
        };
        let value = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({"vnet_name": "myVNet", "location": "eastus", "subnets": ["subnet1"]})
        );
    }
}
