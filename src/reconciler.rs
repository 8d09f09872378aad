//! Reconciler: drives the Network Control Plane towards a requested topology and
//! keeps the Local Mirror in step with what the provider reports afterwards.
//!
//! Every mutating operation holds a per-network-name lock for its whole duration,
//! so two requests for the same network in this process never interleave their
//! list-then-create steps. Mirror writes happen after the provider change and are
//! always built from a fresh provider read. A failed mirror write is logged and
//! left for the next operation (or an explicit resync) to repair.

use crate::azure::{ControlPlane, NetworkSpec, VirtualNetwork};
use crate::error::ProvisionError;
use crate::mirror::Mirror;
use crate::models::{Message, SubnetRequest, VnetRequest, VnetSummary};
use colored::Colorize;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// What has to happen to one requested subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubnetChange {
    Create {
        name: String,
        address_prefix: String,
    },
    Update {
        name: String,
        from: Option<String>,
        to: String,
    },
    Unchanged {
        name: String,
    },
}

impl SubnetChange {
    /// True when the change needs a provider call.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, SubnetChange::Unchanged { .. })
    }
}

/// Compare the requested subnets with the provider's current ones.
///
/// Subnets the provider has but the request omits are not touched, they never
/// appear in the result.
pub fn plan_subnet_changes(current: &VirtualNetwork, desired: &[SubnetRequest]) -> Vec<SubnetChange> {
    let existing = current.subnet_map();
    desired
        .iter()
        .map(|sn| match existing.get(sn.name.as_str()) {
            None => SubnetChange::Create {
                name: sn.name.clone(),
                address_prefix: sn.address_prefix.clone(),
            },
            Some(prefix) if *prefix != Some(sn.address_prefix.as_str()) => SubnetChange::Update {
                name: sn.name.clone(),
                from: prefix.map(|p| p.to_string()),
                to: sn.address_prefix.clone(),
            },
            Some(_) => SubnetChange::Unchanged {
                name: sn.name.clone(),
            },
        })
        .collect()
}

/// In-process advisory locks keyed by network name.
#[derive(Default)]
struct NameLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl NameLocks {
    async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct Reconciler {
    control_plane: Arc<dyn ControlPlane>,
    mirror: Mirror,
    locks: NameLocks,
}

impl Reconciler {
    pub fn new(control_plane: Arc<dyn ControlPlane>, mirror: Mirror) -> Reconciler {
        Reconciler {
            control_plane,
            mirror,
            locks: NameLocks::default(),
        }
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    /// Create the network, or bring its subnets in line with the request.
    ///
    /// # Arguments
    /// * `req` - desired network; the resource group is created when missing
    ///
    /// # Returns
    /// * `Ok(VnetSummary)` - the network as the provider reports it afterwards
    /// * `Err(ProvisionError)` - provider failure; mirror failures are only logged
    pub async fn create_or_update_network(&self, req: &VnetRequest) -> Result<VnetSummary, ProvisionError> {
        let _guard = self.locks.acquire(&req.vnet_name).await;
        self.reconcile(req).await.map_err(|e| {
            let e = describe_provider_error(e);
            log::error!("create_or_update_network {} failed: {e}", req.vnet_name);
            e
        })
    }

    async fn reconcile(&self, req: &VnetRequest) -> Result<VnetSummary, ProvisionError> {
        let cp = &self.control_plane;
        let rg = req.resource_group.as_str();
        let vnet_name = req.vnet_name.as_str();

        let groups = cp.list_resource_groups().await?;
        if !groups.iter().any(|g| g.name == rg) {
            log::info!("Creating resource group: {} in {}", rg.on_blue(), req.location);
            cp.create_resource_group(rg, &req.location).await?;
        }

        let networks = cp.list_networks(rg).await?;
        if networks.iter().any(|v| v.name == vnet_name) {
            log::info!("VNet '{}' already exists. Checking subnets...", vnet_name.on_blue());
            let current = cp.get_network(rg, vnet_name).await?;

            let mut applied = 0;
            for change in plan_subnet_changes(&current, &req.subnets) {
                let step = match change {
                    SubnetChange::Create {
                        name,
                        address_prefix,
                    } => {
                        log::info!("Creating new subnet '{name}' {address_prefix}...");
                        cp.put_subnet(rg, vnet_name, &name, &address_prefix).await
                    }
                    SubnetChange::Update { name, from, to } => {
                        log::info!(
                            "Updating subnet '{name}' address prefix {} -> {to}...",
                            from.as_deref().unwrap_or("none")
                        );
                        cp.put_subnet(rg, vnet_name, &name, &to).await
                    }
                    SubnetChange::Unchanged { name } => {
                        log::info!("Subnet '{name}' already exists with correct address prefix. Skipping.");
                        continue;
                    }
                };
                if let Err(e) = step {
                    // Earlier subnet changes are already live at the provider.
                    if applied > 0 {
                        self.refresh_after_partial_update(rg, vnet_name, applied).await;
                    }
                    return Err(e);
                }
                applied += 1;
            }

            let fresh = cp.get_network(rg, vnet_name).await?;
            if let Err(e) = self.mirror.update(rg, &fresh).await {
                log::error!("Mirror update failed for {vnet_name}, mirror is stale: {e}");
            }
            Ok(fresh.summary())
        } else {
            log::info!(
                "Creating new VNet '{}' with subnets [{}]...",
                vnet_name.on_blue(),
                req.subnets.iter().map(|s| &s.name).join(", ")
            );
            let spec = NetworkSpec {
                location: req.location.clone(),
                address_prefixes: vec![req.address_prefix.clone()],
                subnets: req.subnets.clone(),
            };
            let created = cp.create_network(rg, vnet_name, &spec).await?;

            let fresh = match cp.get_network(rg, vnet_name).await {
                Ok(fresh) => {
                    if let Err(e) = self.mirror.insert(rg, &fresh).await {
                        log::error!("Mirror insert failed for {vnet_name}, mirror is stale: {e}");
                    }
                    fresh
                }
                Err(e) => {
                    log::error!("Re-read of new VNet {vnet_name} failed, mirror not written: {e}");
                    created
                }
            };
            Ok(fresh.summary())
        }
    }

    /// Best-effort mirror update after a subnet loop that failed part way.
    async fn refresh_after_partial_update(&self, resource_group: &str, vnet_name: &str, applied: usize) {
        log::warn!("Subnet changes for {vnet_name} stopped after {applied} applied change(s), refreshing mirror");
        match self.control_plane.get_network(resource_group, vnet_name).await {
            Ok(fresh) => {
                if let Err(e) = self.mirror.update(resource_group, &fresh).await {
                    log::error!("Mirror update failed for {vnet_name}, mirror is stale: {e}");
                }
            }
            Err(e) => log::error!("Re-read of {vnet_name} after partial update failed, mirror is stale: {e}"),
        }
    }

    /// Delete one subnet. A subnet that is already gone is a successful no-op.
    pub async fn delete_subnet(
        &self,
        resource_group: &str,
        vnet_name: &str,
        subnet_name: &str,
    ) -> Result<Message, ProvisionError> {
        let _guard = self.locks.acquire(vnet_name).await;
        log::info!(
            "Attempting to delete subnet '{subnet_name}' in VNet '{}'...",
            vnet_name.on_blue()
        );
        let describe = |e: ProvisionError| describe_delete_error(e, "subnet", resource_group, vnet_name);
        let cp = &self.control_plane;

        let current = cp
            .get_network(resource_group, vnet_name)
            .await
            .map_err(describe)?;
        if !current.has_subnet(subnet_name) {
            return Ok(Message::new(format!(
                "Subnet '{subnet_name}' does not exist in VNet '{vnet_name}'."
            )));
        }

        cp.delete_subnet(resource_group, vnet_name, subnet_name)
            .await
            .map_err(describe)?;

        match cp.get_network(resource_group, vnet_name).await {
            Ok(fresh) => {
                if let Err(e) = self.mirror.refresh_subnets(&fresh).await {
                    log::error!("Mirror subnet refresh failed for {vnet_name}, mirror is stale: {e}");
                }
            }
            Err(e) => log::error!("Re-read of {vnet_name} after subnet delete failed, mirror is stale: {e}"),
        }

        Ok(Message::new(format!(
            "Subnet '{subnet_name}' has been successfully deleted from VNet '{vnet_name}'."
        )))
    }

    /// Delete a network and soft-delete its mirror row. A network that is already
    /// gone is a successful no-op.
    pub async fn delete_network(&self, resource_group: &str, vnet_name: &str) -> Result<Message, ProvisionError> {
        let _guard = self.locks.acquire(vnet_name).await;
        log::info!("Attempting to delete VNet '{}'...", vnet_name.on_blue());
        let describe = |e: ProvisionError| describe_delete_error(e, "VNet", resource_group, vnet_name);
        let cp = &self.control_plane;

        let networks = cp.list_networks(resource_group).await.map_err(describe)?;
        if !networks.iter().any(|v| v.name == vnet_name) {
            return Ok(Message::new(format!(
                "VNet '{vnet_name}' does not exist in resource group '{resource_group}'."
            )));
        }

        cp.delete_network(resource_group, vnet_name)
            .await
            .map_err(describe)?;

        if let Err(e) = self.mirror.mark_deleted(vnet_name).await {
            log::error!("Mirror soft delete failed for {vnet_name}, mirror is stale: {e}");
        }

        Ok(Message::new(format!(
            "VNet '{vnet_name}' successfully deleted from resource group '{resource_group}'."
        )))
    }

    /// Overwrite the mirror row of a network with a fresh provider read.
    ///
    /// Unlike the other operations the mirror write is the whole point here, so a
    /// storage failure is returned.
    pub async fn resync_network(&self, resource_group: &str, vnet_name: &str) -> Result<VnetSummary, ProvisionError> {
        let _guard = self.locks.acquire(vnet_name).await;
        log::info!("Resyncing mirror for VNet '{}'...", vnet_name.on_blue());

        let fresh = self
            .control_plane
            .get_network(resource_group, vnet_name)
            .await
            .map_err(describe_provider_error)?;
        self.mirror.update(resource_group, &fresh).await?;
        Ok(fresh.summary())
    }
}

fn describe_provider_error(e: ProvisionError) -> ProvisionError {
    match e {
        ProvisionError::ResourceNotFound(_) => e.context("Resource not found"),
        other => other.context("Azure API call failed"),
    }
}

fn describe_delete_error(
    e: ProvisionError,
    what: &str,
    resource_group: &str,
    vnet_name: &str,
) -> ProvisionError {
    let e = match e {
        ProvisionError::ResourceNotFound(_) => ProvisionError::ResourceNotFound(format!(
            "Resource group '{resource_group}' or VNet '{vnet_name}' not found."
        )),
        other => other.context(&format!("Failed to delete {what}")),
    };
    log::error!("{e}");
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::ProviderSubnet;

    fn current() -> VirtualNetwork {
        VirtualNetwork {
            name: "v".into(),
            location: "eastus".into(),
            address_prefixes: vec!["10.0.0.0/16".into()],
            subnets: vec![
                ProviderSubnet {
                    name: "same".into(),
                    address_prefix: Some("10.0.1.0/24".into()),
                },
                ProviderSubnet {
                    name: "moved".into(),
                    address_prefix: Some("10.0.2.0/24".into()),
                },
                ProviderSubnet {
                    name: "unlisted".into(),
                    address_prefix: Some("10.0.3.0/24".into()),
                },
                ProviderSubnet {
                    name: "blank".into(),
                    address_prefix: None,
                },
            ],
        }
    }

    fn req(name: &str, prefix: &str) -> SubnetRequest {
        SubnetRequest {
            name: name.into(),
            address_prefix: prefix.into(),
        }
    }

    #[test]
    fn test_plan_subnet_changes() {
        let plan = plan_subnet_changes(
            &current(),
            &[
                req("same", "10.0.1.0/24"),
                req("moved", "10.0.9.0/24"),
                req("new", "10.0.4.0/24"),
                req("blank", "10.0.5.0/24"),
            ],
        );
        assert_eq!(
            plan,
            vec![
                SubnetChange::Unchanged { name: "same".into() },
                SubnetChange::Update {
                    name: "moved".into(),
                    from: Some("10.0.2.0/24".into()),
                    to: "10.0.9.0/24".into()
                },
                SubnetChange::Create {
                    name: "new".into(),
                    address_prefix: "10.0.4.0/24".into()
                },
                SubnetChange::Update {
                    name: "blank".into(),
                    from: None,
                    to: "10.0.5.0/24".into()
                },
            ]
        );
        assert_eq!(plan.iter().filter(|c| c.is_mutation()).count(), 3);
    }

    #[test]
    fn test_plan_never_deletes_unlisted() {
        let plan = plan_subnet_changes(&current(), &[]);
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_name_locks_serialize_same_name() {
        let locks = NameLocks::default();
        let guard = locks.acquire("v").await;
        let waiting = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire("v")).await;
        assert!(waiting.is_err(), "second acquire of the same name must wait");
        // Other names are independent.
        let _other = locks.acquire("w").await;
        drop(guard);
        let _again = locks.acquire("v").await;
    }
}
