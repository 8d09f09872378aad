//! IPv4 CIDR blocks.
//!
//! Used by the in-memory control plane to enforce the address rules the real
//! provider enforces (subnets inside the address space, no overlapping subnets).

use std::error::Error;
use std::fmt;
use std::net::Ipv4Addr;

/// Maximum length for an IPv4 subnet mask (32 bits).
const MAX_LENGTH: u8 = 32;

/// Convert a CIDR prefix length to a subnet mask as u32, e.g. 24 -> 0xFFFFFF00.
fn get_cidr_mask(len: u8) -> Result<u32, Box<dyn Error>> {
    if len > MAX_LENGTH {
        Err("Network length is too long".into())
    } else {
        let right_len = MAX_LENGTH - len;
        let mask = (u32::MAX as u64 >> right_len) << right_len;
        Ok(mask as u32)
    }
}

/// IPv4 block in CIDR notation, e.g. `10.0.1.0/24`.
#[derive(Eq, PartialEq, Debug, Copy, Clone, Hash)]
pub struct Ipv4 {
    pub addr: Ipv4Addr,
    pub mask: u8,
}

impl Ipv4 {
    /// Parse a CIDR string (e.g. "10.0.0.0/24").
    pub fn new(addr_cidr: &str) -> Result<Ipv4, Box<dyn Error>> {
        let (addr, mask) = addr_cidr
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("Invalid address/mask '{addr_cidr}'"))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| format!("Invalid address {addr}"))?;
        let mask: u8 = mask.parse().map_err(|_| format!("Invalid mask {mask}"))?;
        if mask > MAX_LENGTH {
            return Err("Network length is too long".into());
        }
        Ok(Ipv4 { addr, mask })
    }

    /// Lowest (network) address of the block.
    pub fn lo(&self) -> u32 {
        // mask <= 32 is guaranteed by the constructor
        u32::from(self.addr) & get_cidr_mask(self.mask).unwrap_or(u32::MAX)
    }

    /// Highest (broadcast) address of the block.
    pub fn hi(&self) -> u32 {
        self.lo() | !get_cidr_mask(self.mask).unwrap_or(u32::MAX)
    }

    /// True when `other` lies completely inside this block.
    pub fn contains(&self, other: &Ipv4) -> bool {
        self.lo() <= other.lo() && other.hi() <= self.hi()
    }

    /// True when the two blocks share at least one address.
    pub fn overlaps(&self, other: &Ipv4) -> bool {
        self.lo() <= other.hi() && other.lo() <= self.hi()
    }
}

impl fmt::Display for Ipv4 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.mask)
    }
}
