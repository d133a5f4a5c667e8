//! Deployment manifests, contract ABIs and network metadata shared by the
//! migration components.
//!
//! ABIs are embedded at compile time: the migration tooling runs against
//! contracts that are already deployed, so there is no Solidity build tree to
//! read them from at runtime. Implementation *bytecode* for the upgrade step is
//! read from an artifacts directory supplied via configuration.

use std::{collections::HashMap, fmt, fs::File, path::Path};

use anyhow::Context as _;
use ethabi::Contract;
use once_cell::sync::Lazy;
use serde::Deserialize;
use web3::types::Address;

fn load_embedded_contract(name: &str, json: &str) -> Contract {
    Contract::load(json.as_bytes())
        .unwrap_or_else(|err| panic!("Embedded ABI `{name}` is malformed: {err}"))
}

pub fn access_control_contract() -> Contract {
    load_embedded_contract("access_control", include_str!("../abi/access_control.json"))
}

pub fn pausable_contract() -> Contract {
    load_embedded_contract("pausable", include_str!("../abi/pausable.json"))
}

pub fn credit_line_contract() -> Contract {
    load_embedded_contract("credit_line", include_str!("../abi/credit_line.json"))
}

/// ABI of the legacy (V1) pool: the `paused()` migration predicate plus the
/// payment-collection events replayed by the historical-state reconstructor.
pub fn legacy_pool_contract() -> Contract {
    load_embedded_contract("legacy_pool", include_str!("../abi/legacy_pool.json"))
}

pub fn migrator_contract() -> Contract {
    load_embedded_contract("v2_migrator", include_str!("../abi/v2_migrator.json"))
}

pub fn gnosis_safe_contract() -> Contract {
    load_embedded_contract("gnosis_safe", include_str!("../abi/gnosis_safe.json"))
}

pub fn goldfinch_config_contract() -> Contract {
    load_embedded_contract(
        "goldfinch_config",
        include_str!("../abi/goldfinch_config.json"),
    )
}

/// Networks the migration can run against. `Mainnet` is the only production
/// network; everything else is fair game for test-only behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Rinkeby,
    Localhost,
}

impl Network {
    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        match chain_id {
            1 => Some(Self::Mainnet),
            4 => Some(Self::Rinkeby),
            31337 => Some(Self::Localhost),
            _ => None,
        }
    }

    pub fn chain_id(self) -> u64 {
        match self {
            Self::Mainnet => 1,
            Self::Rinkeby => 4,
            Self::Localhost => 31337,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Rinkeby => "rinkeby",
            Self::Localhost => "localhost",
        }
    }

    /// Test environments get `Test`-prefixed contract substitutions and may
    /// skip the multisig pathway; production never does.
    pub fn is_test(self) -> bool {
        !matches!(self, Self::Mainnet)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Contracts that were renamed after the original deployment. Manifests predate
/// the rename, so lookups translate the current name to the historical one.
///
/// This table is the single source of the aliasing rule: both the registry and
/// the deployment upgrader consult it, nothing else duplicates it.
pub static CONTRACT_RENAMES: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| HashMap::from([("GoldfinchFactory", "CreditLineFactory")]));

/// Translates a logical contract name to the name under which it was
/// historically deployed.
pub fn deployed_name(logical_name: &str) -> &str {
    CONTRACT_RENAMES
        .get(logical_name)
        .copied()
        .unwrap_or(logical_name)
}

/// A single deployment record from the manifest file.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployedContract {
    pub address: Address,
    #[serde(default)]
    pub abi: Option<Contract>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkDeployments {
    pub contracts: HashMap<String, DeployedContract>,
}

/// The per-network deployment manifest: chain id → network name → contracts.
///
/// Read-only input; this tooling never writes it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct DeploymentManifest(pub HashMap<String, HashMap<String, NetworkDeployments>>);

impl DeploymentManifest {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open deployment manifest {path:?}"))?;
        serde_json::from_reader(file)
            .with_context(|| format!("Failed to parse deployment manifest {path:?}"))
    }

    /// Returns the deployment records for the given network, if the manifest
    /// has a section for it.
    pub fn for_network(&self, network: Network) -> Option<&NetworkDeployments> {
        self.0
            .get(&network.chain_id().to_string())?
            .get(network.name())
    }
}

/// A compiled contract artifact: ABI plus (possibly unlinked) creation bytecode.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractArtifact {
    pub abi: Contract,
    pub bytecode: String,
}

impl ContractArtifact {
    /// Whether the creation bytecode still contains `__$…$__` library
    /// placeholders that must be linked before deployment.
    pub fn needs_linking(&self) -> bool {
        self.bytecode.contains("__$")
    }

    /// Substitutes every library placeholder with the given library address.
    pub fn link(&mut self, library_address: Address) {
        self.bytecode = link_bytecode(&self.bytecode, library_address);
    }

    /// Decodes the creation bytecode, failing if unresolved link references
    /// remain.
    pub fn bytecode_bytes(&self) -> anyhow::Result<Vec<u8>> {
        anyhow::ensure!(
            !self.needs_linking(),
            "bytecode contains unresolved library references"
        );
        let raw = self.bytecode.strip_prefix("0x").unwrap_or(&self.bytecode);
        hex::decode(raw).context("bytecode is not valid hex")
    }
}

/// Reads a contract artifact (`{name}.json` with `abi` and `bytecode` fields)
/// from the artifacts directory.
pub fn load_artifact(dir: impl AsRef<Path>, name: &str) -> anyhow::Result<ContractArtifact> {
    let path = dir.as_ref().join(format!("{name}.json"));
    let file =
        File::open(&path).with_context(|| format!("Failed to open artifact {path:?}"))?;
    serde_json::from_reader(file).with_context(|| format!("Failed to parse artifact {path:?}"))
}

/// Replaces solc link placeholders (`__$<34 hex chars>$__`, 40 characters
/// total, so linking never changes the bytecode length) with the library
/// address.
pub fn link_bytecode(bytecode: &str, library_address: Address) -> String {
    let address_hex = hex::encode(library_address.as_bytes());
    let mut linked = bytecode.to_owned();
    while let Some(start) = linked.find("__$") {
        let end = start + 40;
        assert!(
            linked.len() >= end && linked[start..end].ends_with("$__"),
            "malformed link placeholder in bytecode"
        );
        linked.replace_range(start..end, &address_hex);
    }
    linked
}
