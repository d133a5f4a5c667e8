//! Static migration input data: the legacy credit lines to replay and the
//! allow-list of addresses to add to the protocol's access list.
//!
//! This is externally supplied data, not something the orchestrator discovers:
//! legacy credit lines are enumerated from a curated registry, and the payer
//! addresses per credit line are known out of band.

use std::{fs::File, path::Path};

use anyhow::Context as _;
use serde::Deserialize;
use web3::types::Address;

/// One legacy credit line known to the migration.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyCreditLine {
    /// Human-readable label used in diagnostics only.
    pub label: String,
    /// Address of the V1 credit line contract.
    pub address: Address,
    /// The borrower that will own the migrated line.
    pub owner: Address,
    /// Addresses whose historical payments count towards this line. Usually
    /// just the owner, but some borrowers paid from several wallets.
    #[serde(default)]
    pub payers: Vec<Address>,
}

impl LegacyCreditLine {
    /// The payer set used when replaying payment events; falls back to the
    /// owner when no extra payers are registered.
    pub fn payers(&self) -> Vec<Address> {
        if self.payers.is_empty() {
            vec![self.owner]
        } else {
            self.payers.clone()
        }
    }
}

/// The externally supplied borrower registry and go-list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BorrowerRegistry {
    pub credit_lines: Vec<LegacyCreditLine>,
    #[serde(default)]
    pub go_list: Vec<Address>,
}

impl BorrowerRegistry {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open borrower registry {path:?}"))?;
        serde_json::from_reader(file)
            .with_context(|| format!("Failed to parse borrower registry {path:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_parses_and_defaults_payers_to_owner() {
        let registry: BorrowerRegistry = serde_json::from_str(
            r#"{
                "credit_lines": [
                    {
                        "label": "Payjoy",
                        "address": "0x1111111111111111111111111111111111111111",
                        "owner": "0x2222222222222222222222222222222222222222"
                    },
                    {
                        "label": "QuickCheck",
                        "address": "0x3333333333333333333333333333333333333333",
                        "owner": "0x4444444444444444444444444444444444444444",
                        "payers": [
                            "0x4444444444444444444444444444444444444444",
                            "0x5555555555555555555555555555555555555555"
                        ]
                    }
                ],
                "go_list": ["0x6666666666666666666666666666666666666666"]
            }"#,
        )
        .unwrap();

        assert_eq!(registry.credit_lines.len(), 2);
        assert_eq!(
            registry.credit_lines[0].payers(),
            vec![registry.credit_lines[0].owner]
        );
        assert_eq!(registry.credit_lines[1].payers().len(), 2);
        assert_eq!(registry.go_list.len(), 1);
    }
}
