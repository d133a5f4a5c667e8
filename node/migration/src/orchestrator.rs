//! The top-level migration state machine.
//!
//! Steps are selected externally (`STEP` env variable) and never chain into
//! each other automatically: a human triggers each one, and re-running any of
//! them must be safe. Safety comes from live on-chain predicates (paused
//! state, role membership, zeroed limits), never from a persisted "already
//! ran" flag.

use std::{collections::HashMap, str::FromStr, sync::Arc};

use futures::future::try_join_all;
use web3::types::Address;

use goldfinch_contracts::{
    pausable_contract, ContractArtifact, DeploymentManifest, Network,
};
use goldfinch_eth_client::{encode_function_data, BoundEthInterface};

use crate::{
    borrowers::BorrowerRegistry,
    error::MigrationError,
    migrator::MigrationAgent,
    multisig::{requires_multisig, MultisigRouter, SafeTransaction},
    reconstructor::StateReconstructor,
    registry::{ContractHandle, ContractRegistry, ResolutionError},
    roles::RoleManager,
    sender::TxSender,
    upgrader::DeploymentUpgrader,
};

/// The proxied contracts that receive new implementations in step 1.
pub const UPGRADED_CONTRACTS: &[&str] = &["Pool", "CreditDesk", "Fidu", "GoldfinchFactory"];

const MIGRATOR_CONTRACT: &str = "V2Migrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    /// Step "1": deploy the migrator and the new implementations, flip the
    /// proxies, elevate the migrator.
    Prepare,
    /// Step "2": pause legacy contracts, replay credit lines, populate the
    /// go-list, close out, demote the migrator.
    Migrate,
    /// Step "defender": diagnostic routing of one transaction through the
    /// privileged-proposal pathway. Not part of the happy path.
    Defender,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown migration step `{0}`; expected \"1\", \"2\" or \"defender\"")]
pub struct UnknownStep(String);

impl FromStr for MigrationStep {
    type Err = UnknownStep;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "1" => Ok(Self::Prepare),
            "2" => Ok(Self::Migrate),
            "defender" => Ok(Self::Defender),
            other => Err(UnknownStep(other.to_owned())),
        }
    }
}

/// The resolved core contract set for one step invocation. Never cached
/// across runs: on-chain state may have changed in between.
#[derive(Debug, Clone)]
pub struct CoreContracts {
    pub config: ContractHandle,
    pub pool: ContractHandle,
    pub credit_desk: ContractHandle,
    pub fidu: ContractHandle,
    pub factory: ContractHandle,
}

impl CoreContracts {
    async fn resolve(registry: &ContractRegistry<'_>) -> Result<Self, ResolutionError> {
        // Fan-out: all manifest lookups and proxy-slot reads go out at once.
        let (config, pool, credit_desk, fidu, factory) = futures::try_join!(
            registry.resolve("GoldfinchConfig"),
            registry.resolve("Pool"),
            registry.resolve("CreditDesk"),
            registry.resolve("Fidu"),
            registry.resolve("GoldfinchFactory"),
        )?;
        Ok(Self {
            config,
            pool,
            credit_desk,
            fidu,
            factory,
        })
    }

    fn as_map(&self) -> HashMap<String, ContractHandle> {
        [
            &self.config,
            &self.pool,
            &self.credit_desk,
            &self.fidu,
            &self.factory,
        ]
        .into_iter()
        .map(|handle| (handle.logical_name.clone(), handle.clone()))
        .collect()
    }
}

pub struct MigrationOrchestrator {
    network: Network,
    client: Arc<dyn BoundEthInterface>,
    manifest: DeploymentManifest,
    artifacts: HashMap<String, ContractArtifact>,
    borrowers: BorrowerRegistry,
    governance_address: Address,
    safe_address: Option<Address>,
    governance_clients: Vec<Arc<dyn BoundEthInterface>>,
}

impl MigrationOrchestrator {
    pub fn new(
        network: Network,
        client: Arc<dyn BoundEthInterface>,
        manifest: DeploymentManifest,
        artifacts: HashMap<String, ContractArtifact>,
        borrowers: BorrowerRegistry,
        governance_address: Address,
    ) -> Self {
        Self {
            network,
            client,
            manifest,
            artifacts,
            borrowers,
            governance_address,
            safe_address: None,
            governance_clients: Vec::new(),
        }
    }

    /// Enables the multisig pathway for the implementation flip.
    pub fn with_multisig(
        mut self,
        safe_address: Address,
        governance_clients: Vec<Arc<dyn BoundEthInterface>>,
    ) -> Self {
        self.safe_address = Some(safe_address);
        self.governance_clients = governance_clients;
        self
    }

    fn client_ref(&self) -> &dyn BoundEthInterface {
        self.client.as_ref()
    }

    /// Runs one step. A fresh transaction sender (and thus a fresh nonce
    /// counter) is built per invocation, so a crashed process is recovered
    /// simply by re-invoking the same step.
    pub async fn run(&self, step: MigrationStep) -> Result<(), MigrationError> {
        self.preflight().await?;
        let sender = TxSender::new(Arc::clone(&self.client)).await?;
        match step {
            MigrationStep::Prepare => self.step_prepare(&sender).await,
            MigrationStep::Migrate => self.step_migrate(&sender).await,
            MigrationStep::Defender => self.step_defender(&sender).await,
        }
    }

    async fn preflight(&self) -> Result<(), MigrationError> {
        let chain_id = self.client.fetch_chain_id().await?;
        if chain_id != self.network.chain_id() {
            return Err(anyhow::anyhow!(
                "node reports chain id {chain_id}, configuration says {} ({})",
                self.network.chain_id(),
                self.network
            )
            .into());
        }
        let deployer = self.client.sender_account();
        let balance = self.client.sender_eth_balance().await?;
        tracing::info!(
            "Running against {} (chain id {chain_id}) as deployer {deployer:?} \
             (balance {balance} wei)",
            self.network
        );
        Ok(())
    }

    async fn step_prepare(&self, sender: &TxSender) -> Result<(), MigrationError> {
        tracing::info!("== Step 1: prepare the V2 world ==");
        let registry = ContractRegistry::new(&self.manifest, self.network, self.client_ref())?;
        let core = CoreContracts::resolve(&registry).await?;

        let existing_migrator = match registry.resolve_address(MIGRATOR_CONTRACT) {
            Ok(address) => Some(address),
            Err(ResolutionError::ContractNotFound { .. }) => None,
            Err(err) => return Err(err.into()),
        };
        let admin = self.safe_address.unwrap_or_else(|| sender.address());
        let migrator_artifact = self.artifact(MIGRATOR_CONTRACT)?;
        let agent = MigrationAgent::ensure_deployed(
            sender,
            existing_migrator,
            &migrator_artifact,
            core.config.address,
            admin,
        )
        .await?;

        if agent.is_phase1_complete(&core.pool).await? {
            tracing::info!(
                "Legacy pool is already paused: implementations were flipped by a \
                 previous run, skipping deployment and flip"
            );
        } else {
            let upgrader = DeploymentUpgrader::new(sender, &self.artifacts, self.network);
            let entries = upgrader
                .upgrade_implementations(UPGRADED_CONTRACTS, &core.as_map())
                .await?;
            for entry in &entries {
                tracing::info!(
                    "`{}`: implementation {:?} -> {:?} behind proxy {:?}",
                    entry.contract_name,
                    entry.existing_implementation,
                    entry.new_implementation,
                    entry.proxy_address
                );
            }
            self.flip_implementations(sender, &agent, &entries).await?;
        }

        RoleManager::new(sender)
            .grant_migration_roles(&core, agent.address)
            .await?;
        tracing::info!("Step 1 complete: migration agent {:?} is ready", agent.address);
        Ok(())
    }

    async fn flip_implementations(
        &self,
        sender: &TxSender,
        agent: &MigrationAgent<'_>,
        entries: &[crate::upgrader::UpgradeManifestEntry],
    ) -> Result<(), MigrationError> {
        if requires_multisig(self.network) {
            let safe_address = self.safe_address.ok_or_else(|| {
                anyhow::anyhow!("{} requires a multisig safe address", self.network)
            })?;
            if self.governance_clients.is_empty() {
                return Err(anyhow::anyhow!(
                    "multisig execution needs at least one approving governance signer"
                )
                .into());
            }
            let owners =
                try_join_all(self.governance_clients.iter().cloned().map(TxSender::new)).await?;
            let owner_refs: Vec<&TxSender> = owners.iter().collect();
            let router = MultisigRouter::new(safe_address, owner_refs, sender);
            let calldata = agent.upgrade_implementations_calldata(entries)?;
            router
                .execute(SafeTransaction::delegate_call(agent.address, calldata))
                .await?;
        } else {
            agent.upgrade_implementations_direct(entries).await?;
        }
        Ok(())
    }

    async fn step_migrate(&self, sender: &TxSender) -> Result<(), MigrationError> {
        tracing::info!("== Step 2: migrate legacy state ==");
        let registry = ContractRegistry::new(&self.manifest, self.network, self.client_ref())?;
        let core = CoreContracts::resolve(&registry).await?;
        let migrator_address = registry.resolve_address(MIGRATOR_CONTRACT)?;
        let agent = MigrationAgent::new(sender, migrator_address, core.config.address);

        if agent.is_phase1_complete(&core.pool).await? {
            tracing::info!("Legacy pool already paused, phase 1 already ran; skipping");
        } else {
            agent.migrate_phase1().await?;
        }

        let reconstructor = StateReconstructor::new(self.client_ref(), &core.pool);
        let results = reconstructor
            .reconstruct_all(&self.borrowers.credit_lines)
            .await;
        let mut records = Vec::new();
        for (line, result) in results {
            match result {
                Ok(record) => records.push(record),
                // Per-entity failure: log it, keep going with the rest.
                Err(err) => tracing::warn!(
                    "Failed to reconstruct credit line `{}` ({:?}): {err}",
                    line.label,
                    line.address
                ),
            }
        }
        tracing::info!(
            "Reconstructed {} of {} credit lines",
            records.len(),
            self.borrowers.credit_lines.len()
        );

        let outcome = agent.migrate_credit_lines(&records).await?;
        for event in &outcome.migrated {
            tracing::info!(
                "Migrated {:?} -> new credit line {:?} (tranched pool {:?}) in {:?}",
                event.legacy_credit_line,
                event.new_credit_line,
                event.tranched_pool,
                event.tx_hash
            );
        }

        agent
            .bulk_add_to_go_list(&core.config, &self.borrowers.go_list)
            .await?;
        agent.close_out_migration().await?;

        RoleManager::new(sender)
            .revoke_migration_roles(&core, agent.address, self.governance_address)
            .await?;
        tracing::info!(
            "Step 2 complete: {} migrated, {} already done, {} failed",
            outcome.migrated.len(),
            outcome.already_migrated.len(),
            outcome.failed.len()
        );
        Ok(())
    }

    /// Routes a single representative transaction through the multisig
    /// pathway, proving out the proposal plumbing without running the
    /// migration itself.
    async fn step_defender(&self, sender: &TxSender) -> Result<(), MigrationError> {
        tracing::info!("== Defender step: exercising the privileged-proposal pathway ==");
        let registry = ContractRegistry::new(&self.manifest, self.network, self.client_ref())?;
        let core = CoreContracts::resolve(&registry).await?;

        let safe_address = self
            .safe_address
            .ok_or_else(|| anyhow::anyhow!("the defender step needs a multisig safe address"))?;
        let owners =
            try_join_all(self.governance_clients.iter().cloned().map(TxSender::new)).await?;
        let owner_refs: Vec<&TxSender> = owners.iter().collect();
        let router = MultisigRouter::new(safe_address, owner_refs, sender);

        let data = encode_function_data(&pausable_contract(), "pause", ())?;
        let tx_hash = router
            .execute(SafeTransaction::call(core.config.address, data))
            .await?;
        tracing::info!("Privileged pathway verified; executed {tx_hash:?}");
        Ok(())
    }

    fn artifact(&self, name: &str) -> Result<ContractArtifact, MigrationError> {
        self.artifacts.get(name).cloned().ok_or_else(|| {
            MigrationError::Resolution(ResolutionError::ContractNotFound {
                name: name.to_owned(),
                network: self.network,
            })
        })
    }
}
