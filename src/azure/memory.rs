//! In-process [`ControlPlane`].
//!
//! Keeps resource groups and networks in memory, applies the address rules the real
//! provider applies, and records every mutating call so tests can assert exactly
//! which provider operations the reconciler issued.

use super::{ControlPlane, NetworkSpec, ProviderSubnet, ResourceGroup, VirtualNetwork};
use crate::error::ProvisionError;
use crate::models::Ipv4;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// A mutating call received by [`InMemoryControlPlane`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneCall {
    CreateResourceGroup {
        name: String,
        location: String,
    },
    CreateNetwork {
        resource_group: String,
        vnet_name: String,
    },
    PutSubnet {
        resource_group: String,
        vnet_name: String,
        subnet_name: String,
        address_prefix: String,
    },
    DeleteSubnet {
        resource_group: String,
        vnet_name: String,
        subnet_name: String,
    },
    DeleteNetwork {
        resource_group: String,
        vnet_name: String,
    },
}

type NetworkHook = Arc<dyn Fn(&mut VirtualNetwork) + Send + Sync>;

#[derive(Default)]
struct State {
    groups: Vec<ResourceGroup>,
    /// Keyed by (resource group, vnet name).
    networks: BTreeMap<(String, String), VirtualNetwork>,
    calls: Vec<ControlPlaneCall>,
    fail_next: Option<ProvisionError>,
    after_create: Option<NetworkHook>,
}

#[derive(Default)]
pub struct InMemoryControlPlane {
    state: Mutex<State>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with some resource groups already present.
    pub fn with_resource_groups(groups: &[(&str, &str)]) -> Self {
        let cp = Self::new();
        {
            let mut state = cp.lock();
            for (name, location) in groups {
                state.groups.push(ResourceGroup {
                    name: name.to_string(),
                    location: location.to_string(),
                });
            }
        }
        cp
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind, keep using it.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Put a network in place without recording a call, as if created outside this service.
    pub fn seed_network(&self, resource_group: &str, vnet: VirtualNetwork) {
        let mut state = self.lock();
        if !state.groups.iter().any(|g| g.name == resource_group) {
            state.groups.push(ResourceGroup {
                name: resource_group.to_string(),
                location: vnet.location.clone(),
            });
        }
        state
            .networks
            .insert((resource_group.to_string(), vnet.name.clone()), vnet);
    }

    /// Add or change a subnet without recording a call, as if changed outside this service.
    pub fn seed_subnet(&self, resource_group: &str, vnet_name: &str, name: &str, prefix: &str) {
        let mut state = self.lock();
        if let Some(vnet) = state
            .networks
            .get_mut(&(resource_group.to_string(), vnet_name.to_string()))
        {
            vnet.subnets.retain(|s| s.name != name);
            vnet.subnets.push(ProviderSubnet {
                name: name.to_string(),
                address_prefix: Some(prefix.to_string()),
            });
        }
    }

    /// Run `hook` on every network right after it is created, e.g. to mimic
    /// subnets the provider adds on its own.
    pub fn after_create<F>(&self, hook: F)
    where
        F: Fn(&mut VirtualNetwork) + Send + Sync + 'static,
    {
        self.lock().after_create = Some(Arc::new(hook));
    }

    /// Make the next mutating call fail with `error` (the call is still recorded).
    pub fn fail_next(&self, error: ProvisionError) {
        self.lock().fail_next = Some(error);
    }

    /// All mutating calls received so far, in order.
    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        self.lock().calls.clone()
    }

    /// Number of subnet create/update calls received so far.
    pub fn subnet_put_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, ControlPlaneCall::PutSubnet { .. }))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn network(&self, resource_group: &str, vnet_name: &str) -> Option<VirtualNetwork> {
        self.lock()
            .networks
            .get(&(resource_group.to_string(), vnet_name.to_string()))
            .cloned()
    }
}

/// Record `call` and return the injected failure, if any.
fn record(state: &mut State, call: ControlPlaneCall) -> Result<(), ProvisionError> {
    state.calls.push(call);
    match state.fail_next.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn parse_prefix(prefix: &str) -> Result<Ipv4, ProvisionError> {
    Ipv4::new(prefix).map_err(|e| {
        ProvisionError::ControlPlaneCallFailed(format!(
            "Address prefix '{prefix}' is invalid: {e}"
        ))
    })
}

/// Check a subnet prefix against the network address space and its sibling subnets.
fn check_subnet(
    vnet: &VirtualNetwork,
    subnet_name: &str,
    address_prefix: &str,
) -> Result<(), ProvisionError> {
    let block = parse_prefix(address_prefix)?;

    let mut inside = false;
    for space in &vnet.address_prefixes {
        if parse_prefix(space)?.contains(&block) {
            inside = true;
        }
    }
    if !inside {
        return Err(ProvisionError::ControlPlaneCallFailed(format!(
            "Subnet '{subnet_name}' is not valid in virtual network '{}': {address_prefix} is outside the address space.",
            vnet.name
        )));
    }

    for sibling in vnet.subnets.iter().filter(|s| s.name != subnet_name) {
        let Some(prefix) = &sibling.address_prefix else {
            continue;
        };
        if parse_prefix(prefix)?.overlaps(&block) {
            return Err(ProvisionError::ControlPlaneCallFailed(format!(
                "Subnet '{subnet_name}' with address prefix {address_prefix} overlaps subnet '{}' ({prefix}).",
                sibling.name
            )));
        }
    }
    Ok(())
}

fn group_missing(resource_group: &str) -> ProvisionError {
    ProvisionError::ResourceNotFound(format!(
        "Resource group '{resource_group}' could not be found."
    ))
}

fn vnet_missing(resource_group: &str, vnet_name: &str) -> ProvisionError {
    ProvisionError::ResourceNotFound(format!(
        "The Resource 'Microsoft.Network/virtualNetworks/{vnet_name}' under resource group '{resource_group}' was not found."
    ))
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn list_resource_groups(&self) -> Result<Vec<ResourceGroup>, ProvisionError> {
        Ok(self.lock().groups.clone())
    }

    async fn create_resource_group(
        &self,
        name: &str,
        location: &str,
    ) -> Result<ResourceGroup, ProvisionError> {
        let mut state = self.lock();
        record(
            &mut state,
            ControlPlaneCall::CreateResourceGroup {
                name: name.to_string(),
                location: location.to_string(),
            },
        )?;
        let group = ResourceGroup {
            name: name.to_string(),
            location: location.to_string(),
        };
        state.groups.retain(|g| g.name != name);
        state.groups.push(group.clone());
        Ok(group)
    }

    async fn list_networks(&self, resource_group: &str) -> Result<Vec<VirtualNetwork>, ProvisionError> {
        let state = self.lock();
        if !state.groups.iter().any(|g| g.name == resource_group) {
            return Err(group_missing(resource_group));
        }
        Ok(state
            .networks
            .iter()
            .filter(|((rg, _), _)| rg == resource_group)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn get_network(
        &self,
        resource_group: &str,
        vnet_name: &str,
    ) -> Result<VirtualNetwork, ProvisionError> {
        self.network(resource_group, vnet_name)
            .ok_or_else(|| vnet_missing(resource_group, vnet_name))
    }

    async fn create_network(
        &self,
        resource_group: &str,
        vnet_name: &str,
        spec: &NetworkSpec,
    ) -> Result<VirtualNetwork, ProvisionError> {
        let mut state = self.lock();
        record(
            &mut state,
            ControlPlaneCall::CreateNetwork {
                resource_group: resource_group.to_string(),
                vnet_name: vnet_name.to_string(),
            },
        )?;
        if !state.groups.iter().any(|g| g.name == resource_group) {
            return Err(group_missing(resource_group));
        }

        let mut vnet = VirtualNetwork {
            name: vnet_name.to_string(),
            location: spec.location.clone(),
            address_prefixes: spec.address_prefixes.clone(),
            subnets: Vec::new(),
        };
        for space in &vnet.address_prefixes {
            parse_prefix(space)?;
        }
        for subnet in &spec.subnets {
            if vnet.has_subnet(&subnet.name) {
                return Err(ProvisionError::ControlPlaneCallFailed(format!(
                    "Subnet '{}' is specified more than once.",
                    subnet.name
                )));
            }
            check_subnet(&vnet, &subnet.name, &subnet.address_prefix)?;
            vnet.subnets.push(ProviderSubnet {
                name: subnet.name.clone(),
                address_prefix: Some(subnet.address_prefix.clone()),
            });
        }
        if let Some(hook) = state.after_create.clone() {
            hook(&mut vnet);
        }

        state
            .networks
            .insert((resource_group.to_string(), vnet_name.to_string()), vnet.clone());
        Ok(vnet)
    }

    async fn put_subnet(
        &self,
        resource_group: &str,
        vnet_name: &str,
        subnet_name: &str,
        address_prefix: &str,
    ) -> Result<(), ProvisionError> {
        let mut state = self.lock();
        record(
            &mut state,
            ControlPlaneCall::PutSubnet {
                resource_group: resource_group.to_string(),
                vnet_name: vnet_name.to_string(),
                subnet_name: subnet_name.to_string(),
                address_prefix: address_prefix.to_string(),
            },
        )?;
        let vnet = state
            .networks
            .get_mut(&(resource_group.to_string(), vnet_name.to_string()))
            .ok_or_else(|| vnet_missing(resource_group, vnet_name))?;
        check_subnet(vnet, subnet_name, address_prefix)?;

        match vnet.subnets.iter_mut().find(|s| s.name == subnet_name) {
            Some(existing) => existing.address_prefix = Some(address_prefix.to_string()),
            None => vnet.subnets.push(ProviderSubnet {
                name: subnet_name.to_string(),
                address_prefix: Some(address_prefix.to_string()),
            }),
        }
        Ok(())
    }

    async fn delete_subnet(
        &self,
        resource_group: &str,
        vnet_name: &str,
        subnet_name: &str,
    ) -> Result<(), ProvisionError> {
        let mut state = self.lock();
        record(
            &mut state,
            ControlPlaneCall::DeleteSubnet {
                resource_group: resource_group.to_string(),
                vnet_name: vnet_name.to_string(),
                subnet_name: subnet_name.to_string(),
            },
        )?;
        let vnet = state
            .networks
            .get_mut(&(resource_group.to_string(), vnet_name.to_string()))
            .ok_or_else(|| vnet_missing(resource_group, vnet_name))?;
        vnet.subnets.retain(|s| s.name != subnet_name);
        Ok(())
    }

    async fn delete_network(&self, resource_group: &str, vnet_name: &str) -> Result<(), ProvisionError> {
        let mut state = self.lock();
        record(
            &mut state,
            ControlPlaneCall::DeleteNetwork {
                resource_group: resource_group.to_string(),
                vnet_name: vnet_name.to_string(),
            },
        )?;
        state
            .networks
            .remove(&(resource_group.to_string(), vnet_name.to_string()));
        Ok(())
    }
}
