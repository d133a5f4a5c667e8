//! Granting and revoking administrative roles for the migration campaign.
//!
//! Role membership is always read through to the chain: governance (or a
//! concurrent process) can change roles between steps, so a local cache of
//! "who has what role" would be a lie waiting to happen.

use std::fmt;

use web3::{
    signing::keccak256,
    types::{Address, H256},
};

use goldfinch_contracts::access_control_contract;
use goldfinch_eth_client::CallFunctionArgs;

use crate::{error::MigrationError, orchestrator::CoreContracts, registry::ContractHandle, sender::TxSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Owner,
    Pauser,
    Minter,
    GoLister,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "OWNER_ROLE",
            Self::Pauser => "PAUSER_ROLE",
            Self::Minter => "MINTER_ROLE",
            Self::GoLister => "GO_LISTER_ROLE",
        }
    }

    /// The on-chain role identifier, `keccak256` of the role name.
    pub fn id(self) -> H256 {
        H256(keccak256(self.as_str().as_bytes()))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a guarded role change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChange {
    /// A transaction was sent and confirmed.
    Applied,
    /// The chain already held the target state; no transaction was sent.
    AlreadyInTargetState,
}

/// Sends guarded, idempotent role changes through the migration sender.
#[derive(Debug)]
pub struct RoleManager<'a> {
    sender: &'a TxSender,
    abi: ethabi::Contract,
}

impl<'a> RoleManager<'a> {
    pub fn new(sender: &'a TxSender) -> Self {
        Self {
            sender,
            abi: access_control_contract(),
        }
    }

    /// Live role-membership query; the single source of truth.
    pub async fn has_role(
        &self,
        contract: Address,
        role: Role,
        grantee: Address,
    ) -> Result<bool, MigrationError> {
        Ok(CallFunctionArgs::new("hasRole", (role.id(), grantee))
            .for_contract(contract, &self.abi)
            .call(self.sender.client())
            .await?)
    }

    pub async fn grant(
        &self,
        contract: &ContractHandle,
        role: Role,
        grantee: Address,
    ) -> Result<RoleChange, MigrationError> {
        self.change(contract, role, grantee, true).await
    }

    pub async fn revoke(
        &self,
        contract: &ContractHandle,
        role: Role,
        grantee: Address,
    ) -> Result<RoleChange, MigrationError> {
        self.change(contract, role, grantee, false).await
    }

    async fn change(
        &self,
        contract: &ContractHandle,
        role: Role,
        grantee: Address,
        target: bool,
    ) -> Result<RoleChange, MigrationError> {
        let name = &contract.logical_name;
        if self.has_role(contract.address, role, grantee).await? == target {
            tracing::info!(
                "Role {role} on `{name}` for {grantee:?} already matches target `{target}`, \
                 nothing to do"
            );
            return Ok(RoleChange::AlreadyInTargetState);
        }

        let func = if target { "grantRole" } else { "revokeRole" };
        self.sender
            .send_contract_call(&self.abi, contract.address, func, (role.id(), grantee))
            .await?;

        // The transaction confirmed; now prove it actually took effect. A
        // mismatch here means an access-control bug or a swallowed revert and
        // must halt the orchestrator.
        if self.has_role(contract.address, role, grantee).await? != target {
            return Err(MigrationError::RoleAssertion {
                contract: name.clone(),
                role,
                grantee,
                expected: target,
            });
        }
        tracing::info!("{func} of {role} on `{name}` for {grantee:?} confirmed");
        Ok(RoleChange::Applied)
    }

    /// The roles the migration agent needs on each core contract.
    fn campaign_roles<'c>(contracts: &'c CoreContracts) -> Vec<(&'c ContractHandle, Role)> {
        vec![
            (&contracts.fidu, Role::Minter),
            (&contracts.fidu, Role::Owner),
            (&contracts.fidu, Role::Pauser),
            (&contracts.credit_desk, Role::Owner),
            (&contracts.credit_desk, Role::Pauser),
            (&contracts.factory, Role::Owner),
            (&contracts.factory, Role::Pauser),
            (&contracts.config, Role::Owner),
            (&contracts.config, Role::Pauser),
            (&contracts.config, Role::GoLister),
            (&contracts.pool, Role::Owner),
            (&contracts.pool, Role::Pauser),
        ]
    }

    /// Elevates the migration agent on every contract the campaign touches.
    pub async fn grant_migration_roles(
        &self,
        contracts: &CoreContracts,
        agent: Address,
    ) -> Result<(), MigrationError> {
        for (contract, role) in Self::campaign_roles(contracts) {
            self.grant(contract, role, agent).await?;
        }
        tracing::info!("Migration agent {agent:?} holds all campaign roles");
        Ok(())
    }

    /// Hands control back after the campaign: governance is (re-)granted the
    /// long-term administrative roles, then the agent is stripped of them.
    /// Only run after every migration-dependent transaction has confirmed.
    pub async fn revoke_migration_roles(
        &self,
        contracts: &CoreContracts,
        agent: Address,
        governance: Address,
    ) -> Result<(), MigrationError> {
        for (contract, role) in Self::campaign_roles(contracts) {
            self.grant(contract, role, governance).await?;
            self.revoke(contract, role, agent).await?;
        }
        tracing::info!(
            "Migration agent {agent:?} fully demoted, governance {governance:?} restored"
        );
        Ok(())
    }
}
