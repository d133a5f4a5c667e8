//! Environment-driven configuration of a migration run.
//!
//! The step selector lives in the bare `STEP` variable; everything else is
//! read from `MIGRATION_`-prefixed variables.

use std::path::PathBuf;

use anyhow::Context as _;
use serde::Deserialize;
use web3::types::Address;

use goldfinch_contracts::Network;

use crate::orchestrator::MigrationStep;

fn default_priority_fee_per_gas() -> u64 {
    1_500_000_000 // 1.5 gwei
}

#[derive(Debug, Deserialize)]
pub struct MigrationEnv {
    /// Active chain id; `1` is production.
    pub chain_id: u64,
    pub eth_rpc_url: String,
    pub deployer_private_key: String,
    /// Path to the per-network deployment manifest (read-only input).
    pub deployments_path: PathBuf,
    /// Directory with implementation artifacts (`{Name}.json`).
    pub artifacts_path: PathBuf,
    /// Path to the borrower registry / go-list input file.
    pub borrowers_path: PathBuf,
    /// The long-term governance address that roles are restored to.
    #[serde(default)]
    pub governance_address: Option<Address>,
    /// The governance multisig; required on networks that route the
    /// implementation flip through it.
    #[serde(default)]
    pub safe_address: Option<Address>,
    /// Comma-separated private keys of the approving multisig owners.
    #[serde(default)]
    pub governance_private_keys: Option<String>,
    #[serde(default = "default_priority_fee_per_gas")]
    pub priority_fee_per_gas: u64,
}

impl MigrationEnv {
    /// Reads the step selector; any value outside the known set is a fatal
    /// configuration error.
    pub fn step_from_env() -> anyhow::Result<MigrationStep> {
        let step = std::env::var("STEP").context("STEP env variable must be set")?;
        Ok(step.parse()?)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        envy::prefixed("MIGRATION_")
            .from_env()
            .context("Failed to read MIGRATION_* environment")
    }

    pub fn network(&self) -> anyhow::Result<Network> {
        Network::from_chain_id(self.chain_id)
            .with_context(|| format!("Unsupported chain id {}", self.chain_id))
    }

    /// The long-term governance address; defaults to the safe itself.
    pub fn governance(&self) -> anyhow::Result<Address> {
        self.governance_address
            .or(self.safe_address)
            .context("Either MIGRATION_GOVERNANCE_ADDRESS or MIGRATION_SAFE_ADDRESS must be set")
    }

    pub fn governance_keys(&self) -> Vec<String> {
        self.governance_private_keys
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn governance_keys_split_and_trim() {
        let env = MigrationEnv {
            chain_id: 1,
            eth_rpc_url: "http://localhost:8545".into(),
            deployer_private_key: "0x01".into(),
            deployments_path: "deployments.json".into(),
            artifacts_path: "artifacts".into(),
            borrowers_path: "borrowers.json".into(),
            governance_address: None,
            safe_address: Some(Address::repeat_byte(1)),
            governance_private_keys: Some("0xaa, 0xbb,".into()),
            priority_fee_per_gas: default_priority_fee_per_gas(),
        };
        assert_eq!(env.governance_keys(), vec!["0xaa", "0xbb"]);
        assert_eq!(env.governance().unwrap(), Address::repeat_byte(1));
        assert_eq!(env.network().unwrap(), Network::Mainnet);
    }
}
