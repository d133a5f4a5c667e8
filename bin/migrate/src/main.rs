//! Operator entry point for the V1 -> V2 migration.
//!
//! Each invocation runs exactly one externally selected step (`STEP=1`,
//! `STEP=2` or `STEP=defender`) and exits; resuming after a crash means
//! re-running the same step.

use std::{collections::HashMap, sync::Arc};

use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

use goldfinch_contracts::{load_artifact, DeploymentManifest};
use goldfinch_eth_client::{
    clients::{PKSigningClient, QueryClient},
    BoundEthInterface,
};
use goldfinch_migration::{
    borrowers::BorrowerRegistry,
    orchestrator::UPGRADED_CONTRACTS,
    upgrader::{implementation_artifact_name, ACCOUNTANT_LIBRARY},
    MigrationEnv, MigrationOrchestrator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let step = MigrationEnv::step_from_env()?;
    let env = MigrationEnv::from_env()?;
    let network = env.network()?;
    tracing::info!("Selected step {step:?} on network {network}");

    let query_client = QueryClient::new(&env.eth_rpc_url)?;
    let deployer: Arc<dyn BoundEthInterface> = Arc::new(PKSigningClient::from_hex_key(
        &env.deployer_private_key,
        env.priority_fee_per_gas,
        env.chain_id,
        query_client.clone(),
    )?);

    let manifest = DeploymentManifest::from_file(&env.deployments_path)?;
    let borrowers = BorrowerRegistry::from_file(&env.borrowers_path)?;

    let mut artifact_names = vec![ACCOUNTANT_LIBRARY.to_owned(), "V2Migrator".to_owned()];
    artifact_names.extend(
        UPGRADED_CONTRACTS
            .iter()
            .map(|name| implementation_artifact_name(network, name)),
    );
    let mut artifacts = HashMap::new();
    for name in artifact_names {
        let artifact = load_artifact(&env.artifacts_path, &name)
            .with_context(|| format!("artifact `{name}` is required for the migration"))?;
        artifacts.insert(name, artifact);
    }

    let mut orchestrator = MigrationOrchestrator::new(
        network,
        deployer,
        manifest,
        artifacts,
        borrowers,
        env.governance()?,
    );
    if let Some(safe_address) = env.safe_address {
        let mut owners: Vec<Arc<dyn BoundEthInterface>> = Vec::new();
        for key in env.governance_keys() {
            owners.push(Arc::new(PKSigningClient::from_hex_key(
                &key,
                env.priority_fee_per_gas,
                env.chain_id,
                query_client.clone(),
            )?));
        }
        orchestrator = orchestrator.with_multisig(safe_address, owners);
    }

    orchestrator.run(step).await?;
    tracing::info!("Step {step:?} finished");
    Ok(())
}
