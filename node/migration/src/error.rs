use web3::types::{Address, H256};

use crate::{
    reconstructor::ReconstructionError, registry::ResolutionError, roles::Role,
};

/// Errors that abort a migration step.
///
/// Per-credit-line replay failures are deliberately *not* represented here:
/// they are logged and the batch continues, see
/// [`crate::migrator::ReplayOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),

    #[error("chain client error: {0}")]
    Client(#[from] goldfinch_eth_client::Error),

    #[error("ABI error: {0}")]
    Abi(#[from] ethabi::Error),

    /// A grant/revoke transaction confirmed, but the re-read role membership
    /// still disagrees with the intended state. This points at an
    /// access-control bug or a silently reverted transaction; it must halt the
    /// orchestrator rather than be retried.
    #[error(
        "role {role} on `{contract}` for {grantee:?} disagrees with target membership \
         `{expected}` after a confirmed transaction"
    )]
    RoleAssertion {
        contract: String,
        role: Role,
        grantee: Address,
        expected: bool,
    },

    /// The multisig executed the outer transaction but its own
    /// `ExecutionFailure` event reports that the inner call reverted.
    #[error("multisig transaction {tx_hash:?} executed with ExecutionFailure")]
    MultisigExecution { tx_hash: H256 },

    /// The multisig receipt carries neither `ExecutionSuccess` nor
    /// `ExecutionFailure`; a bare receipt is not proof of success.
    #[error("multisig receipt for {tx_hash:?} carries no execution event")]
    MissingExecutionEvent { tx_hash: H256 },

    #[error("transaction {tx_hash:?} reverted on-chain (reason: {reason:?})")]
    TransactionFailed {
        tx_hash: H256,
        reason: Option<String>,
    },

    #[error("deployment of `{name}` produced no contract address")]
    MissingContractAddress { name: String },

    #[error("`{name}` is not behind a proxy, nothing to upgrade")]
    NotAProxy { name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
