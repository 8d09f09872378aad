// cargo watch -x 'fmt' -x 'run'

pub mod api;
pub mod azure;
pub mod config;
pub mod error;
pub mod mirror;
pub mod models;
pub mod reconciler;

use azure::{ArmControlPlane, ControlPlane, InMemoryControlPlane};
use config::{ControlPlaneKind, Settings};
use mirror::Mirror;
use reconciler::Reconciler;
use std::error::Error;
use std::sync::Arc;

pub use api::{build_router, AppState};
pub use error::ProvisionError;

/// Construct the Network Control Plane client selected by `settings`.
pub fn control_plane(settings: &Settings) -> Result<Arc<dyn ControlPlane>, Box<dyn Error>> {
    match settings.control_plane {
        ControlPlaneKind::Arm => {
            log::info!(
                "Using ARM control plane at {} subscription={}",
                settings.arm_endpoint,
                settings.subscription_id.as_deref().unwrap_or("?")
            );
            Ok(Arc::new(ArmControlPlane::new(settings)?))
        }
        ControlPlaneKind::Memory => {
            log::warn!("Using in-memory control plane, nothing is provisioned in Azure");
            Ok(Arc::new(InMemoryControlPlane::new()))
        }
    }
}

/// Wire control plane, mirror and reconciler together for the HTTP layer.
pub async fn build_state(settings: &Settings) -> Result<AppState, Box<dyn Error>> {
    let control_plane = control_plane(settings)?;
    let mirror = Mirror::connect(&settings.database_url).await?;
    Ok(AppState::new(Reconciler::new(control_plane, mirror)))
}
