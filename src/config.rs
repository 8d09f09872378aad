//! Process settings.
//!
//! Values come from the environment (a `.env` file is loaded by `main` via `dotenv`).
//! The settings are read once and handed to the components that need them.

use std::env;
use std::error::Error;

/// Default pause between long-running-operation polls when the provider sends no `Retry-After`.
pub const POLL_MSEC: u64 = 2_000;
/// Upper bound on polls for one long-running operation.
pub const MAX_POLLS: u32 = 900;

/// ARM api-version for Microsoft.Network resources.
pub const NETWORK_API_VERSION: &str = "2023-09-01";
/// ARM api-version for resource groups.
pub const RESOURCES_API_VERSION: &str = "2021-04-01";
/// Scope requested for ARM bearer tokens.
pub const ARM_SCOPE: &str = "https://management.azure.com/.default";

const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";
const DEFAULT_DATABASE_URL: &str = "sqlite://network_config.db?mode=rwc";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Which Network Control Plane implementation the process talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPlaneKind {
    /// Azure Resource Manager REST API.
    Arm,
    /// In-process fake, nothing leaves the machine.
    Memory,
}

impl std::str::FromStr for ControlPlaneKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arm" | "azure" => Ok(ControlPlaneKind::Arm),
            "memory" | "mem" => Ok(ControlPlaneKind::Memory),
            other => Err(format!("Unknown CONTROL_PLANE '{other}', expected 'arm' or 'memory'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub subscription_id: Option<String>,
    pub arm_endpoint: String,
    /// Fixed bearer token; when unset the azure_identity credential chain is used.
    pub arm_token: Option<String>,
    pub database_url: String,
    pub bind_addr: String,
    pub control_plane: ControlPlaneKind,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Settings, Box<dyn Error>> {
        Settings::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup, so tests need not touch the real environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Settings, Box<dyn Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Older deployments used the misspelled key.
        let subscription_id =
            non_empty("AZURE_SUBSCRIPTION_ID").or_else(|| non_empty("AZURE_SUBSCRITION_ID"));

        let control_plane = match non_empty("CONTROL_PLANE") {
            Some(v) => v.parse::<ControlPlaneKind>()?,
            None => ControlPlaneKind::Arm,
        };

        if control_plane == ControlPlaneKind::Arm && subscription_id.is_none() {
            return Err("AZURE_SUBSCRIPTION_ID must be set when CONTROL_PLANE=arm".into());
        }

        Ok(Settings {
            subscription_id,
            arm_endpoint: non_empty("ARM_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_ARM_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            arm_token: non_empty("ARM_TOKEN"),
            database_url: non_empty("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            control_plane,
        })
    }
}
