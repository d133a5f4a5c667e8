//! Thin abstraction over a JSON-RPC Ethereum connection, as seen by the
//! migration orchestrator. The traits here make the chain a swappable
//! collaborator: production code talks to an HTTP node, tests talk to
//! [`clients::MockEthereum`].

use std::{fmt, time::Duration};

use async_trait::async_trait;
use web3::{
    contract::tokens::Tokenize,
    types::{
        Address, Block, BlockId, BlockNumber, Bytes, CallRequest, Filter, Log,
        TransactionReceipt, H256, U256, U64,
    },
};

pub use web3::contract::Options;

pub mod clients;
pub mod types;

pub use crate::types::{
    CallFunctionArgs, ContractCall, Error, ExecutedTxStatus, FailureInfo, RawTransactionBytes,
    SignedCallResult,
};

/// Common Web3 interface as used by the migration components.
///
/// The methods here are "abstract" queries: nothing is assumed about the
/// contract or account being queried. Account-bound operations live on
/// [`BoundEthInterface`].
#[async_trait]
pub trait EthInterface: 'static + Sync + Send + fmt::Debug {
    /// Fetches the chain id from the connected node.
    async fn fetch_chain_id(&self) -> Result<u64, Error>;

    /// Returns the current block number.
    async fn block_number(&self) -> Result<U64, Error>;

    /// Returns the block header for the specified block number or hash.
    async fn block(&self, block_id: BlockId) -> Result<Option<Block<H256>>, Error>;

    /// Reads a raw storage slot of the given account.
    ///
    /// This is deliberately not an ABI call: during an in-flight upgrade the
    /// proxy ABI may not expose an implementation accessor, while the
    /// EIP-1967 slot is always readable.
    async fn get_storage_at(&self, address: Address, slot: H256) -> Result<H256, Error>;

    /// Returns the nonce of the provided account at the specified block.
    async fn nonce_at_for_account(
        &self,
        account: Address,
        block: BlockNumber,
    ) -> Result<U256, Error>;

    /// Sends a raw signed transaction to the network.
    async fn send_raw_tx(&self, tx: RawTransactionBytes) -> Result<H256, Error>;

    /// Fetches the execution status for a transaction hash.
    ///
    /// Returns `Ok(None)` if the transaction is either not found or not mined yet.
    async fn get_tx_status(&self, hash: H256) -> Result<Option<ExecutedTxStatus>, Error>;

    /// Returns the receipt for the specified transaction hash.
    async fn tx_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>, Error>;

    /// For a reverted transaction, attempts to recover information on the revert reason.
    async fn failure_reason(&self, tx_hash: H256) -> Result<Option<FailureInfo>, Error>;

    /// Returns the logs matching the specified filter.
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, Error>;

    /// Performs an `eth_call` with the given request.
    async fn call_contract_function(
        &self,
        request: CallRequest,
        block: Option<BlockId>,
    ) -> Result<Bytes, Error>;

    /// Returns the current gas price.
    async fn get_gas_price(&self) -> Result<U256, Error>;

    /// Returns the `base_fee_per_gas` of the currently pending block.
    async fn get_pending_block_base_fee_per_gas(&self) -> Result<U256, Error>;

    /// Returns the ETH balance of the specified address.
    async fn eth_balance(&self, address: Address) -> Result<U256, Error>;
}

/// An extension of [`EthInterface`] bound to a sender account, capable of
/// signing transactions on its behalf.
#[async_trait]
pub trait BoundEthInterface: EthInterface {
    /// Address of the account associated with this client.
    fn sender_account(&self) -> Address;

    /// Chain ID of the network the client is *configured* to connect to.
    ///
    /// Externally provided rather than fetched, to catch accidental network
    /// mismatches early.
    fn chain_id(&self) -> u64;

    /// Signs a contract-call transaction addressed to `contract_addr`.
    async fn sign_prepared_tx_for_addr(
        &self,
        data: Vec<u8>,
        contract_addr: Address,
        options: Options,
    ) -> Result<SignedCallResult, Error>;

    /// Signs a contract-creation transaction carrying `data` as init code.
    async fn sign_prepared_deploy_tx(
        &self,
        data: Vec<u8>,
        options: Options,
    ) -> Result<SignedCallResult, Error>;

    /// Returns the nonce of `Self::sender_account()` at the specified block.
    async fn nonce_at(&self, block: BlockNumber) -> Result<U256, Error> {
        self.nonce_at_for_account(self.sender_account(), block).await
    }

    /// Returns the latest nonce of `Self::sender_account()`.
    async fn current_nonce(&self) -> Result<U256, Error> {
        self.nonce_at(BlockNumber::Latest).await
    }

    /// Returns the pending nonce of `Self::sender_account()`.
    async fn pending_nonce(&self) -> Result<U256, Error> {
        self.nonce_at(BlockNumber::Pending).await
    }

    /// Returns the ETH balance of `Self::sender_account()`.
    async fn sender_eth_balance(&self) -> Result<U256, Error> {
        self.eth_balance(self.sender_account()).await
    }
}

/// Encodes a call to `func` of `contract` with the given parameters.
pub fn encode_function_data(
    contract: &ethabi::Contract,
    func: &str,
    params: impl Tokenize,
) -> Result<Vec<u8>, Error> {
    let f = contract.function(func)?;
    Ok(f.encode_input(&params.into_tokens())?)
}

/// Polls the node until the transaction is mined, up to `max_polls` attempts.
///
/// Every state-mutating migration step waits for its transaction this way
/// before anything depending on it is allowed to run.
pub async fn wait_for_tx_status(
    client: &dyn EthInterface,
    hash: H256,
    poll_interval: Duration,
    max_polls: usize,
) -> Result<ExecutedTxStatus, Error> {
    for _ in 0..max_polls {
        if let Some(status) = client.get_tx_status(hash).await? {
            return Ok(status);
        }
        tokio::time::sleep(poll_interval).await;
    }
    Err(Error::ConfirmationTimeout(hash))
}
