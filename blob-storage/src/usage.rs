use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::StorageError;

/// Kind of traffic a storage tier serves, from least to most durable.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StorageUsage {
    Cache,
    Config,
    Asset,
    Backup,
    External,
}

impl StorageUsage {
    pub const ALL: [StorageUsage; 5] = [
        StorageUsage::Cache,
        StorageUsage::Config,
        StorageUsage::Asset,
        StorageUsage::Backup,
        StorageUsage::External,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageUsage::Cache => "cache",
            StorageUsage::Config => "config",
            StorageUsage::Asset => "asset",
            StorageUsage::Backup => "backup",
            StorageUsage::External => "external",
        }
    }
}

impl Display for StorageUsage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageUsage {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorageUsage::ALL
            .into_iter()
            .find(|usage| usage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| StorageError::Configuration(format!("unknown storage usage {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_rank() {
        assert!(StorageUsage::Cache < StorageUsage::Config);
        assert!(StorageUsage::Asset < StorageUsage::Backup);
        assert_eq!(StorageUsage::ALL.iter().max(), Some(&StorageUsage::External));
    }

    #[test]
    fn test_parse_usage() {
        assert_eq!("Backup".parse::<StorageUsage>().unwrap(), StorageUsage::Backup);
        assert!(matches!("archive".parse::<StorageUsage>(), Err(StorageError::Configuration(_))));
    }
}
