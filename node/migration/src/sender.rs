//! Transaction submission with explicit nonce management.
//!
//! The deployer's transaction nonce is the one truly shared mutable resource of
//! the whole migration: credit-line replay batches are submitted concurrently
//! from a single account, so nonce allocation must be an explicit atomic
//! hand-out rather than a per-transaction `eth_getTransactionCount` snapshot,
//! which would hand the same nonce to two in-flight transactions.

use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use web3::types::{Address, H256, U256};

use goldfinch_eth_client::{
    encode_function_data, wait_for_tx_status, BoundEthInterface, Error as ClientError,
    ExecutedTxStatus, Options,
};

use crate::error::MigrationError;

/// Monotonic nonce counter owned by a single sender account.
///
/// Seeded once from the account's pending nonce; afterwards every concurrent
/// submission receives a distinct, strictly increasing nonce.
#[derive(Debug)]
pub struct NonceManager {
    next: Mutex<u64>,
}

impl NonceManager {
    pub fn new(first_free: u64) -> Self {
        Self {
            next: Mutex::new(first_free),
        }
    }

    /// Hands out the next free nonce.
    pub async fn next(&self) -> u64 {
        let mut next = self.next.lock().await;
        let nonce = *next;
        *next += 1;
        nonce
    }
}

/// Default gas limit for migration transactions. Generous on purpose: the
/// batching constants, not the gas limit, are what keeps individual
/// transactions under the block limit.
const DEFAULT_GAS_LIMIT: u64 = 6_000_000;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_MAX_POLLS: usize = 1200;

/// A sender account bound to one signing client, submitting transactions with
/// nonces allocated through [`NonceManager`] and waiting for each transaction
/// to confirm.
#[derive(Debug)]
pub struct TxSender {
    client: Arc<dyn BoundEthInterface>,
    nonces: NonceManager,
    gas_limit: U256,
    poll_interval: Duration,
    max_polls: usize,
}

impl TxSender {
    /// Creates a sender, seeding the nonce counter from the account's pending
    /// nonce. A fresh sender is built per orchestrator run so a restarted
    /// process always re-reads the chain's view of the nonce.
    pub async fn new(client: Arc<dyn BoundEthInterface>) -> Result<Self, ClientError> {
        let first_free = client.pending_nonce().await?.as_u64();
        Ok(Self {
            client,
            nonces: NonceManager::new(first_free),
            gas_limit: DEFAULT_GAS_LIMIT.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        })
    }

    pub fn address(&self) -> Address {
        self.client.sender_account()
    }

    pub fn client(&self) -> &dyn BoundEthInterface {
        self.client.as_ref()
    }

    /// Sends raw calldata to `to` and waits for the transaction to be mined.
    /// The returned status may still describe a reverted transaction; callers
    /// decide whether that is fatal.
    pub async fn send_calldata(
        &self,
        to: Address,
        data: Vec<u8>,
    ) -> Result<ExecutedTxStatus, ClientError> {
        let nonce = self.nonces.next().await;
        let signed = self
            .client
            .sign_prepared_tx_for_addr(
                data,
                to,
                Options {
                    nonce: Some(nonce.into()),
                    gas: Some(self.gas_limit),
                    ..Options::default()
                },
            )
            .await?;
        let hash = self.client.send_raw_tx(signed.raw_tx).await?;
        wait_for_tx_status(self.client(), hash, self.poll_interval, self.max_polls).await
    }

    /// Encodes and sends a contract call, requiring on-chain success.
    pub async fn send_contract_call(
        &self,
        abi: &ethabi::Contract,
        to: Address,
        func: &str,
        params: impl web3::contract::tokens::Tokenize,
    ) -> Result<ExecutedTxStatus, MigrationError> {
        let data = encode_function_data(abi, func, params)?;
        let status = self.send_calldata(to, data).await?;
        if !status.success {
            let reason = self.revert_reason(status.tx_hash).await;
            return Err(MigrationError::TransactionFailed {
                tx_hash: status.tx_hash,
                reason,
            });
        }
        Ok(status)
    }

    /// Deploys a contract from creation bytecode and returns its address.
    pub async fn deploy(
        &self,
        name: &str,
        bytecode: Vec<u8>,
    ) -> Result<(Address, ExecutedTxStatus), MigrationError> {
        let nonce = self.nonces.next().await;
        let signed = self
            .client
            .sign_prepared_deploy_tx(
                bytecode,
                Options {
                    nonce: Some(nonce.into()),
                    gas: Some(self.gas_limit),
                    ..Options::default()
                },
            )
            .await?;
        let hash = self.client.send_raw_tx(signed.raw_tx).await?;
        let status =
            wait_for_tx_status(self.client(), hash, self.poll_interval, self.max_polls).await?;
        if !status.success {
            let reason = self.revert_reason(status.tx_hash).await;
            return Err(MigrationError::TransactionFailed {
                tx_hash: status.tx_hash,
                reason,
            });
        }
        let address = status
            .receipt
            .contract_address
            .ok_or_else(|| MigrationError::MissingContractAddress { name: name.into() })?;
        tracing::info!("Deployed `{name}` at {address:?}");
        Ok((address, status))
    }

    /// Attempts to recover the revert reason of a failed transaction; best
    /// effort, diagnostics only.
    pub async fn revert_reason(&self, tx_hash: H256) -> Option<String> {
        match self.client.failure_reason(tx_hash).await {
            Ok(info) => info.map(|info| info.revert_reason),
            Err(err) => {
                tracing::warn!("Failed to recover revert reason for {tx_hash:?}: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::future;
    use goldfinch_eth_client::clients::MockEthereum;

    use super::*;

    #[tokio::test]
    async fn nonce_manager_hands_out_distinct_nonces_concurrently() {
        let nonces = Arc::new(NonceManager::new(7));
        let tasks = (0..32).map(|_| {
            let nonces = Arc::clone(&nonces);
            tokio::spawn(async move { nonces.next().await })
        });
        let mut allocated: Vec<u64> = future::try_join_all(tasks).await.unwrap();
        allocated.sort_unstable();
        assert_eq!(allocated, (7..39).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrent_sends_use_distinct_increasing_nonces() {
        let client = MockEthereum::default().with_auto_mine();
        let sender = Arc::new(TxSender::new(Arc::new(client.clone())).await.unwrap());

        let sends = (0..10).map(|i| {
            let sender = Arc::clone(&sender);
            async move {
                sender
                    .send_calldata(Address::repeat_byte(0x22), vec![i as u8])
                    .await
            }
        });
        let statuses = future::join_all(sends).await;
        assert!(statuses.into_iter().all(|status| status.unwrap().success));

        let mut nonces = client.sent_tx_nonces();
        nonces.sort_unstable();
        assert_eq!(nonces, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn deploy_returns_contract_address() {
        let client = MockEthereum::default().with_auto_mine();
        let sender = TxSender::new(Arc::new(client)).await.unwrap();
        let (address, status) = sender.deploy("Accountant", vec![0x60, 0x80]).await.unwrap();
        assert_ne!(address, Address::zero());
        assert!(status.success);
    }
}
