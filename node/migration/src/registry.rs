//! Resolution of logical contract names to live on-chain handles.

use std::collections::HashMap;

use futures::future::try_join_all;
use web3::types::{Address, H256};

use goldfinch_contracts::{deployed_name, DeploymentManifest, Network, NetworkDeployments};
use goldfinch_eth_client::EthInterface;

/// The EIP-1967 implementation storage slot,
/// `keccak256("eip1967.proxy.implementation") - 1`.
///
/// Read via raw storage access rather than an ABI call: mid-upgrade, the
/// proxy's ABI may not expose an implementation accessor, but the slot is
/// always there.
pub const IMPLEMENTATION_STORAGE_SLOT: H256 = H256([
    0x36, 0x08, 0x94, 0xa1, 0x3b, 0xa1, 0xa3, 0x21, 0x06, 0x67, 0xc8, 0x28, 0x49, 0x2d, 0xb9,
    0x8d, 0xca, 0x3e, 0x20, 0x76, 0xcc, 0x37, 0x35, 0xa9, 0x20, 0xa3, 0xca, 0x50, 0x5d, 0x38,
    0x2b, 0xbc,
]);

/// One resolved deployment. Immutable once resolved; a fresh handle is
/// resolved on every orchestrator invocation since on-chain state may have
/// changed between runs.
#[derive(Debug, Clone)]
pub struct ContractHandle {
    pub logical_name: String,
    pub address: Address,
    pub abi: ethabi::Contract,
    /// `Some` if the deployment is an upgradeable proxy; equals `address`.
    pub proxy_address: Option<Address>,
    /// The implementation the proxy currently points at.
    pub implementation_address: Option<Address>,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("contract `{name}` has no deployment record on {network}")]
    ContractNotFound { name: String, network: Network },

    #[error("deployment record for `{name}` on {network} carries no ABI")]
    MissingAbi { name: String, network: Network },

    #[error("deployment manifest has no section for {0}")]
    UnknownNetwork(Network),

    #[error("chain client error: {0}")]
    Client(#[from] goldfinch_eth_client::Error),
}

/// Resolves logical contract names against the deployment manifest of the
/// active network, de-referencing upgradeable proxies along the way.
#[derive(Debug)]
pub struct ContractRegistry<'a> {
    deployments: &'a NetworkDeployments,
    network: Network,
    client: &'a dyn EthInterface,
}

impl<'a> ContractRegistry<'a> {
    pub fn new(
        manifest: &'a DeploymentManifest,
        network: Network,
        client: &'a dyn EthInterface,
    ) -> Result<Self, ResolutionError> {
        let deployments = manifest
            .for_network(network)
            .ok_or(ResolutionError::UnknownNetwork(network))?;
        Ok(Self {
            deployments,
            network,
            client,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Looks up the deployment record for a logical name, translating renamed
    /// contracts and, on test networks only, retrying once with a
    /// `Test`-prefixed variant.
    fn lookup(
        &self,
        name: &str,
    ) -> Result<(String, &'a goldfinch_contracts::DeployedContract), ResolutionError> {
        let deployed = deployed_name(name);
        if let Some(record) = self.deployments.contracts.get(deployed) {
            return Ok((deployed.to_owned(), record));
        }
        if self.network.is_test() {
            let test_name = format!("Test{deployed}");
            if let Some(record) = self.deployments.contracts.get(&test_name) {
                return Ok((test_name, record));
            }
        }
        Err(ResolutionError::ContractNotFound {
            name: name.to_owned(),
            network: self.network,
        })
    }

    /// Resolves only the deployed address, for contracts whose ABI is known
    /// statically (the manifest record may not carry one).
    pub fn resolve_address(&self, name: &str) -> Result<Address, ResolutionError> {
        self.lookup(name).map(|(_, record)| record.address)
    }

    pub async fn resolve(&self, name: &str) -> Result<ContractHandle, ResolutionError> {
        let (deployed, record) = self.lookup(name)?;
        let abi = record
            .abi
            .clone()
            .ok_or_else(|| ResolutionError::MissingAbi {
                name: deployed.clone(),
                network: self.network,
            })?;

        let implementation = self
            .client
            .get_storage_at(record.address, IMPLEMENTATION_STORAGE_SLOT)
            .await?;
        let (proxy_address, implementation_address) = if implementation.is_zero() {
            (None, None)
        } else {
            // The slot stores an address left-padded to 32 bytes.
            let implementation = Address::from_slice(&implementation.as_bytes()[12..]);
            (Some(record.address), Some(implementation))
        };

        Ok(ContractHandle {
            logical_name: name.to_owned(),
            address: record.address,
            abi,
            proxy_address,
            implementation_address,
        })
    }

    /// Resolves several names with fan-out/fan-in: all storage reads are
    /// issued at once and awaited together.
    pub async fn resolve_all(
        &self,
        names: &[&str],
    ) -> Result<HashMap<String, ContractHandle>, ResolutionError> {
        let handles = try_join_all(names.iter().map(|name| self.resolve(name))).await?;
        Ok(names
            .iter()
            .map(|name| name.to_string())
            .zip(handles)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use goldfinch_eth_client::clients::MockEthereum;
    use serde_json::json;

    use super::*;

    fn manifest_with(network: Network, contracts: serde_json::Value) -> DeploymentManifest {
        let manifest = json!({
            network.chain_id().to_string(): {
                network.name(): { "contracts": contracts }
            }
        });
        serde_json::from_value(manifest).unwrap()
    }

    fn pool_record(address: Address) -> serde_json::Value {
        json!({ "address": address, "abi": [] })
    }

    #[tokio::test]
    async fn resolves_plain_contract() {
        let address = Address::repeat_byte(0x42);
        let manifest = manifest_with(Network::Mainnet, json!({ "Pool": pool_record(address) }));
        let client = MockEthereum::default();

        let registry = ContractRegistry::new(&manifest, Network::Mainnet, &client).unwrap();
        let handle = registry.resolve("Pool").await.unwrap();
        assert_eq!(handle.address, address);
        assert_eq!(handle.proxy_address, None);
        assert_eq!(handle.implementation_address, None);
    }

    #[tokio::test]
    async fn dereferences_proxy_implementation_slot() {
        let proxy = Address::repeat_byte(0x42);
        let implementation = Address::repeat_byte(0x77);
        let manifest = manifest_with(Network::Mainnet, json!({ "Pool": pool_record(proxy) }));
        let client = MockEthereum::default().with_storage(
            proxy,
            IMPLEMENTATION_STORAGE_SLOT,
            implementation.into(),
        );

        let registry = ContractRegistry::new(&manifest, Network::Mainnet, &client).unwrap();
        let handle = registry.resolve("Pool").await.unwrap();
        assert_eq!(handle.proxy_address, Some(proxy));
        assert_eq!(handle.implementation_address, Some(implementation));
    }

    #[tokio::test]
    async fn factory_lookup_uses_legacy_name() {
        let address = Address::repeat_byte(0x13);
        let manifest = manifest_with(
            Network::Mainnet,
            json!({ "CreditLineFactory": pool_record(address) }),
        );
        let client = MockEthereum::default();

        let registry = ContractRegistry::new(&manifest, Network::Mainnet, &client).unwrap();
        let handle = registry.resolve("GoldfinchFactory").await.unwrap();
        assert_eq!(handle.logical_name, "GoldfinchFactory");
        assert_eq!(handle.address, address);
    }

    #[tokio::test]
    async fn test_networks_fall_back_to_test_prefixed_records() {
        let address = Address::repeat_byte(0x21);
        let manifest = manifest_with(
            Network::Localhost,
            json!({ "TestPool": pool_record(address) }),
        );
        let client = MockEthereum::default();

        let registry = ContractRegistry::new(&manifest, Network::Localhost, &client).unwrap();
        let handle = registry.resolve("Pool").await.unwrap();
        assert_eq!(handle.address, address);
    }

    #[tokio::test]
    async fn production_never_falls_back_to_test_records() {
        let address = Address::repeat_byte(0x21);
        let manifest = manifest_with(
            Network::Mainnet,
            json!({ "TestPool": pool_record(address) }),
        );
        let client = MockEthereum::default();

        let registry = ContractRegistry::new(&manifest, Network::Mainnet, &client).unwrap();
        let err = registry.resolve("Pool").await.unwrap_err();
        assert_matches!(err, ResolutionError::ContractNotFound { name, .. } if name == "Pool");
    }

    #[tokio::test]
    async fn fans_out_multi_resolution() {
        let pool = Address::repeat_byte(1);
        let desk = Address::repeat_byte(2);
        let manifest = manifest_with(
            Network::Mainnet,
            json!({ "Pool": pool_record(pool), "CreditDesk": pool_record(desk) }),
        );
        let client = MockEthereum::default();

        let registry = ContractRegistry::new(&manifest, Network::Mainnet, &client).unwrap();
        let handles = registry.resolve_all(&["Pool", "CreditDesk"]).await.unwrap();
        assert_eq!(handles["Pool"].address, pool);
        assert_eq!(handles["CreditDesk"].address, desk);
    }
}
