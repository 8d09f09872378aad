//! Local Mirror row model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle marker of a mirror row. Rows are never removed, only marked [`MirrorStatus::Deleted`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum MirrorStatus {
    Available,
    Updated,
    Deleted,
}

impl MirrorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorStatus::Available => "AVAILABLE",
            MirrorStatus::Updated => "UPDATED",
            MirrorStatus::Deleted => "DELETED",
        }
    }

    /// Statuses visible to name-scoped lookups.
    pub fn live() -> [MirrorStatus; 2] {
        [MirrorStatus::Available, MirrorStatus::Updated]
    }
}

impl fmt::Display for MirrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MirrorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(MirrorStatus::Available),
            "UPDATED" => Ok(MirrorStatus::Updated),
            "DELETED" => Ok(MirrorStatus::Deleted),
            other => Err(format!("unknown mirror status '{other}'")),
        }
    }
}

/// A subnet as stored in the mirror's serialized `subnets` column.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubnetEntry {
    pub name: String,
    #[serde(alias = "addressPrefix")]
    pub address_prefix: String,
}

/// One row of the mirror table, with `subnets` already decoded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MirrorRecord {
    pub id: i64,
    pub resource_group: String,
    pub vnet_name: String,
    pub location: String,
    pub address_space: String,
    pub subnets: Vec<SubnetEntry>,
    pub status: MirrorStatus,
}

/// Serialize subnets for the `subnets` column.
pub fn encode_subnets(subnets: &[SubnetEntry]) -> String {
    // Vec of plain string structs cannot fail to serialize.
    serde_json::to_string(subnets).unwrap_or_else(|_| "[]".to_string())
}

/// Decode the `subnets` column.
///
/// Older rows hold single-quoted structures, and some values were stored as a JSON
/// string wrapping the list. Both are normalized here. Anything still unreadable
/// decodes to an empty list so one bad row cannot fail a whole query.
pub fn decode_subnets(raw: &str) -> Vec<SubnetEntry> {
    let normalized = raw.trim().replace('\'', "\"");
    if normalized.is_empty() {
        return Vec::new();
    }

    let value: serde_json::Value = match serde_json::from_str(&normalized) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("Unreadable subnets column, using empty list: {e}");
            return Vec::new();
        }
    };

    let value = match value {
        serde_json::Value::String(inner) => match serde_json::from_str(&inner) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Unreadable nested subnets column, using empty list: {e}");
                return Vec::new();
            }
        },
        v => v,
    };

    serde_json::from_value(value).unwrap_or_else(|e| {
        log::warn!("Subnets column has unexpected shape, using empty list: {e}");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, prefix: &str) -> SubnetEntry {
        SubnetEntry {
            name: name.to_string(),
            address_prefix: prefix.to_string(),
        }
    }

    #[test]
    fn test_status_strings() {
        for status in [MirrorStatus::Available, MirrorStatus::Updated, MirrorStatus::Deleted] {
            assert_eq!(status.as_str().parse::<MirrorStatus>().unwrap(), status);
        }
        assert!("GONE".parse::<MirrorStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&MirrorStatus::Deleted).unwrap(),
            "\"DELETED\""
        );
    }

    #[test]
    fn test_decode_json() {
        let raw = encode_subnets(&[entry("subnet1", "10.0.1.0/24")]);
        assert_eq!(raw, r#"[{"name":"subnet1","address_prefix":"10.0.1.0/24"}]"#);
        assert_eq!(decode_subnets(&raw), vec![entry("subnet1", "10.0.1.0/24")]);
    }

    #[test]
    fn test_decode_single_quoted() {
        let raw = "[{'name': 'subnet1', 'address_prefix': '10.0.1.0/24'}, {'name': 'subnet2', 'address_prefix': '10.0.2.0/24'}]";
        assert_eq!(
            decode_subnets(raw),
            vec![entry("subnet1", "10.0.1.0/24"), entry("subnet2", "10.0.2.0/24")]
        );
    }

    #[test]
    fn test_decode_double_encoded() {
        let raw = r#""[{\"name\":\"a\",\"addressPrefix\":\"10.1.0.0/24\"}]""#;
        assert_eq!(decode_subnets(raw), vec![entry("a", "10.1.0.0/24")]);
    }

    #[test]
    fn test_decode_garbage_is_empty() {
        assert!(decode_subnets("not json at all").is_empty());
        assert!(decode_subnets("").is_empty());
        assert!(decode_subnets(r#"{"name":"x"}"#).is_empty());
    }
}
