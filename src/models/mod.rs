//! Domain models for the VNet provisioner.
//!
//! - [`network`] - request and response types of the HTTP surface
//! - [`record`] - Local Mirror rows
//! - [`ipv4`] - CIDR arithmetic

mod ipv4;
mod network;
mod record;

// Re-export public types
pub use ipv4::Ipv4;
pub use network::{
    Message, SubnetDeleteRequest, SubnetRequest, VnetDeleteRequest, VnetRequest,
    VnetResyncRequest, VnetSummary,
};
pub use record::{decode_subnets, encode_subnets, MirrorRecord, MirrorStatus, SubnetEntry};
