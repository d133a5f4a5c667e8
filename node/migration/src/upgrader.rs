//! Deployment of new implementation contracts behind the existing proxies.
//!
//! This component only *deploys*: switching a proxy's active implementation is
//! the migration agent's job (routed through the multisig on production), so a
//! crashed run can never leave a proxy pointing at a half-prepared world.

use std::collections::HashMap;

use web3::types::Address;

use goldfinch_contracts::{deployed_name, ContractArtifact, Network};

use crate::{
    error::MigrationError,
    registry::{ContractHandle, ResolutionError},
    sender::TxSender,
};

/// The shared math library linked into the implementations that need it.
/// Deployed first, once per upgrade run.
pub const ACCOUNTANT_LIBRARY: &str = "Accountant";

/// Contracts whose implementation artifact is swapped for a `Test`-prefixed
/// variant on test networks, to get hook points for test-only behavior.
/// Production runs never substitute.
const TEST_SUBSTITUTED_IMPLEMENTATIONS: &[&str] = &["Pool", "CreditDesk"];

/// The artifact deployed for a logical contract name: the historical
/// deployment name (same alias table as the registry), with the test-only
/// substitution applied off mainnet.
pub fn implementation_artifact_name(network: Network, logical_name: &str) -> String {
    let deployed = deployed_name(logical_name);
    if network.is_test() && TEST_SUBSTITUTED_IMPLEMENTATIONS.contains(&deployed) {
        format!("Test{deployed}")
    } else {
        deployed.to_owned()
    }
}

/// Everything known about one prepared (but not yet activated) upgrade.
/// Never mutated after creation; re-running the step produces a fresh set.
#[derive(Debug, Clone)]
pub struct UpgradeManifestEntry {
    pub contract_name: String,
    pub implementation_name: String,
    pub proxy_address: Address,
    pub existing_implementation: Address,
    pub new_implementation: Address,
    pub upgraded_contract: ContractHandle,
}

#[derive(Debug)]
pub struct DeploymentUpgrader<'a> {
    sender: &'a TxSender,
    artifacts: &'a HashMap<String, ContractArtifact>,
    network: Network,
}

impl<'a> DeploymentUpgrader<'a> {
    pub fn new(
        sender: &'a TxSender,
        artifacts: &'a HashMap<String, ContractArtifact>,
        network: Network,
    ) -> Self {
        Self {
            sender,
            artifacts,
            network,
        }
    }

    fn implementation_name(&self, logical_name: &str) -> String {
        implementation_artifact_name(self.network, logical_name)
    }

    fn artifact(&self, name: &str) -> Result<ContractArtifact, MigrationError> {
        self.artifacts.get(name).cloned().ok_or_else(|| {
            MigrationError::Resolution(ResolutionError::ContractNotFound {
                name: name.to_owned(),
                network: self.network,
            })
        })
    }

    /// Deploys a fresh implementation for every named contract and records
    /// the old/new implementation pair per proxy. Does **not** touch the
    /// proxies themselves.
    pub async fn upgrade_implementations(
        &self,
        contract_names: &[&str],
        existing_contracts: &HashMap<String, ContractHandle>,
    ) -> Result<Vec<UpgradeManifestEntry>, MigrationError> {
        // The Accountant library goes first so dependents can link against it.
        let accountant = self.artifact(ACCOUNTANT_LIBRARY)?;
        let (accountant_address, _) = self
            .sender
            .deploy(ACCOUNTANT_LIBRARY, accountant.bytecode_bytes()?)
            .await?;

        let mut entries = Vec::with_capacity(contract_names.len());
        for &name in contract_names {
            let handle = existing_contracts.get(name).ok_or_else(|| {
                MigrationError::Resolution(ResolutionError::ContractNotFound {
                    name: name.to_owned(),
                    network: self.network,
                })
            })?;
            let proxy_address = handle
                .proxy_address
                .ok_or_else(|| MigrationError::NotAProxy {
                    name: name.to_owned(),
                })?;
            let existing_implementation =
                handle
                    .implementation_address
                    .ok_or_else(|| MigrationError::NotAProxy {
                        name: name.to_owned(),
                    })?;

            let implementation_name = self.implementation_name(name);
            let mut artifact = self.artifact(&implementation_name)?;
            if artifact.needs_linking() {
                artifact.link(accountant_address);
            }
            let (new_implementation, _) = self
                .sender
                .deploy(&implementation_name, artifact.bytecode_bytes()?)
                .await?;

            tracing::info!(
                "Prepared upgrade of `{name}`: proxy {proxy_address:?} implementation \
                 {existing_implementation:?} -> {new_implementation:?}"
            );

            let upgraded_contract = ContractHandle {
                implementation_address: Some(new_implementation),
                ..handle.clone()
            };
            entries.push(UpgradeManifestEntry {
                contract_name: name.to_owned(),
                implementation_name,
                proxy_address,
                existing_implementation,
                new_implementation,
                upgraded_contract,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use goldfinch_contracts::{link_bytecode, pausable_contract};
    use goldfinch_eth_client::clients::MockEthereum;

    use super::*;

    fn artifact(bytecode: &str) -> ContractArtifact {
        ContractArtifact {
            abi: pausable_contract(),
            bytecode: bytecode.to_owned(),
        }
    }

    fn proxied_handle(name: &str, proxy: Address, implementation: Address) -> ContractHandle {
        ContractHandle {
            logical_name: name.to_owned(),
            address: proxy,
            abi: pausable_contract(),
            proxy_address: Some(proxy),
            implementation_address: Some(implementation),
        }
    }

    fn artifacts_for(names: &[&str]) -> HashMap<String, ContractArtifact> {
        let mut artifacts: HashMap<_, _> = names
            .iter()
            .map(|&name| (name.to_owned(), artifact("0x6080")))
            .collect();
        artifacts.insert(ACCOUNTANT_LIBRARY.to_owned(), artifact("0x60a0"));
        artifacts
    }

    #[tokio::test]
    async fn produces_manifest_entries_without_touching_proxies() {
        let client = MockEthereum::default().with_auto_mine();
        let sender = TxSender::new(Arc::new(client.clone())).await.unwrap();
        let artifacts = artifacts_for(&["Pool", "CreditDesk"]);
        let upgrader = DeploymentUpgrader::new(&sender, &artifacts, Network::Mainnet);

        let pool_proxy = Address::repeat_byte(1);
        let old_impl = Address::repeat_byte(2);
        let existing = HashMap::from([
            (
                "Pool".to_owned(),
                proxied_handle("Pool", pool_proxy, old_impl),
            ),
            (
                "CreditDesk".to_owned(),
                proxied_handle("CreditDesk", Address::repeat_byte(3), Address::repeat_byte(4)),
            ),
        ]);

        let entries = upgrader
            .upgrade_implementations(&["Pool", "CreditDesk"], &existing)
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        let pool_entry = &entries[0];
        assert_eq!(pool_entry.contract_name, "Pool");
        assert_eq!(pool_entry.proxy_address, pool_proxy);
        assert_eq!(pool_entry.existing_implementation, old_impl);
        assert_ne!(pool_entry.new_implementation, old_impl);
        assert_eq!(
            pool_entry.upgraded_contract.implementation_address,
            Some(pool_entry.new_implementation)
        );
        // One Accountant deploy plus one implementation deploy per contract,
        // and nothing else: the proxies were not written to.
        assert_eq!(client.sent_tx_count(), 3);
    }

    #[tokio::test]
    async fn links_accountant_into_dependent_bytecode() {
        let client = MockEthereum::default().with_auto_mine();
        let sender = TxSender::new(Arc::new(client)).await.unwrap();
        let placeholder = format!("__${}$__", "0".repeat(34));
        let mut artifacts = artifacts_for(&[]);
        artifacts.insert(
            "CreditDesk".to_owned(),
            artifact(&format!("0x6080{placeholder}00")),
        );
        let upgrader = DeploymentUpgrader::new(&sender, &artifacts, Network::Mainnet);

        let existing = HashMap::from([(
            "CreditDesk".to_owned(),
            proxied_handle("CreditDesk", Address::repeat_byte(3), Address::repeat_byte(4)),
        )]);
        let entries = upgrader
            .upgrade_implementations(&["CreditDesk"], &existing)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_networks_deploy_test_implementations() {
        let client = MockEthereum::default().with_auto_mine();
        let sender = TxSender::new(Arc::new(client)).await.unwrap();
        let mut artifacts = artifacts_for(&[]);
        artifacts.insert("TestPool".to_owned(), artifact("0x6080"));
        let upgrader = DeploymentUpgrader::new(&sender, &artifacts, Network::Localhost);

        let existing = HashMap::from([(
            "Pool".to_owned(),
            proxied_handle("Pool", Address::repeat_byte(1), Address::repeat_byte(2)),
        )]);
        let entries = upgrader
            .upgrade_implementations(&["Pool"], &existing)
            .await
            .unwrap();
        assert_eq!(entries[0].implementation_name, "TestPool");

        // Mainnet must insist on the production artifact.
        let client = MockEthereum::default().with_auto_mine();
        let sender = TxSender::new(Arc::new(client)).await.unwrap();
        let upgrader = DeploymentUpgrader::new(&sender, &artifacts, Network::Mainnet);
        let err = upgrader
            .upgrade_implementations(&["Pool"], &existing)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            MigrationError::Resolution(ResolutionError::ContractNotFound { name, .. })
                if name == "Pool"
        );
    }

    #[tokio::test]
    async fn factory_upgrade_uses_legacy_artifact_name() {
        let client = MockEthereum::default().with_auto_mine();
        let sender = TxSender::new(Arc::new(client)).await.unwrap();
        let mut artifacts = artifacts_for(&[]);
        artifacts.insert("CreditLineFactory".to_owned(), artifact("0x6080"));
        let upgrader = DeploymentUpgrader::new(&sender, &artifacts, Network::Mainnet);

        let existing = HashMap::from([(
            "GoldfinchFactory".to_owned(),
            proxied_handle(
                "GoldfinchFactory",
                Address::repeat_byte(1),
                Address::repeat_byte(2),
            ),
        )]);
        let entries = upgrader
            .upgrade_implementations(&["GoldfinchFactory"], &existing)
            .await
            .unwrap();
        assert_eq!(entries[0].implementation_name, "CreditLineFactory");
    }

    #[test]
    fn linking_is_exercised_by_the_upgrader_path() {
        let placeholder = format!("__${}$__", "1".repeat(34));
        let linked = link_bytecode(&placeholder, Address::repeat_byte(0xcc));
        assert_eq!(linked, hex::encode(Address::repeat_byte(0xcc).as_bytes()));
    }
}
