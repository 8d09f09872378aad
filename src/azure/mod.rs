//! Network Control Plane access.
//!
//! The [`ControlPlane`] trait is the seam between the reconciler and the cloud:
//! - [`arm`] - Azure Resource Manager REST implementation
//! - [`memory`] - in-process implementation for tests and dry runs
//!
//! All mutating calls return only after the provider reports the operation finished.

mod arm;
mod memory;

use crate::error::ProvisionError;
use crate::models::{SubnetEntry, SubnetRequest, VnetSummary};
use async_trait::async_trait;
use std::collections::HashMap;

pub use arm::ArmControlPlane;
pub use memory::{ControlPlaneCall, InMemoryControlPlane};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroup {
    pub name: String,
    pub location: String,
}

/// A subnet as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubnet {
    pub name: String,
    /// None when the provider returns a subnet without a prefix (e.g. still provisioning).
    pub address_prefix: Option<String>,
}

/// A virtual network as reported by the provider. This is the only type the mirror
/// accepts for writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNetwork {
    pub name: String,
    pub location: String,
    pub address_prefixes: Vec<String>,
    pub subnets: Vec<ProviderSubnet>,
}

impl VirtualNetwork {
    /// Current subnets as name -> addressPrefix.
    pub fn subnet_map(&self) -> HashMap<&str, Option<&str>> {
        self.subnets
            .iter()
            .map(|s| (s.name.as_str(), s.address_prefix.as_deref()))
            .collect()
    }

    pub fn has_subnet(&self, name: &str) -> bool {
        self.subnets.iter().any(|s| s.name == name)
    }

    /// Subnets in the form stored by the mirror.
    pub fn subnet_entries(&self) -> Vec<SubnetEntry> {
        self.subnets
            .iter()
            .map(|s| SubnetEntry {
                name: s.name.clone(),
                address_prefix: s.address_prefix.clone().unwrap_or_default(),
            })
            .collect()
    }

    /// Address space as a single column value; multiple blocks are comma separated.
    pub fn address_space(&self) -> String {
        self.address_prefixes.join(",")
    }

    pub fn summary(&self) -> VnetSummary {
        VnetSummary {
            vnet_name: self.name.clone(),
            location: self.location.clone(),
            subnets: self.subnets.iter().map(|s| s.name.clone()).collect(),
        }
    }
}

/// Parameters of a network creation, subnets embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub location: String,
    pub address_prefixes: Vec<String>,
    pub subnets: Vec<SubnetRequest>,
}

/// Operations the reconciler needs from the Network Control Plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn list_resource_groups(&self) -> Result<Vec<ResourceGroup>, ProvisionError>;

    async fn create_resource_group(
        &self,
        name: &str,
        location: &str,
    ) -> Result<ResourceGroup, ProvisionError>;

    async fn list_networks(&self, resource_group: &str)
        -> Result<Vec<VirtualNetwork>, ProvisionError>;

    async fn get_network(
        &self,
        resource_group: &str,
        vnet_name: &str,
    ) -> Result<VirtualNetwork, ProvisionError>;

    /// Create or replace a network, waiting for the provider to finish.
    /// Returns the network as the provider accepted it; callers re-read for the final state.
    async fn create_network(
        &self,
        resource_group: &str,
        vnet_name: &str,
        spec: &NetworkSpec,
    ) -> Result<VirtualNetwork, ProvisionError>;

    /// Create or update one subnet, waiting for the provider to finish.
    async fn put_subnet(
        &self,
        resource_group: &str,
        vnet_name: &str,
        subnet_name: &str,
        address_prefix: &str,
    ) -> Result<(), ProvisionError>;

    async fn delete_subnet(
        &self,
        resource_group: &str,
        vnet_name: &str,
        subnet_name: &str,
    ) -> Result<(), ProvisionError>;

    async fn delete_network(&self, resource_group: &str, vnet_name: &str)
        -> Result<(), ProvisionError>;
}
