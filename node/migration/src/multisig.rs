//! Routing privileged transactions through the governance multisig.
//!
//! The multisig is an opaque collaborator speaking the Gnosis Safe protocol:
//! compute the safe transaction hash, have each owner approve it on-chain,
//! execute with pre-validated signatures, then read the Safe's own
//! `ExecutionSuccess` / `ExecutionFailure` event. The last part matters: the
//! outer transaction succeeds even when the delegated inner call reverts, so a
//! bare receipt proves nothing.

use web3::types::{Address, H256, U256};

use goldfinch_contracts::gnosis_safe_contract;
use goldfinch_eth_client::{CallFunctionArgs, EthInterface, ExecutedTxStatus};

use crate::{error::MigrationError, sender::TxSender};

/// Safe operation types.
pub const CALL_OPERATION: u8 = 0;
pub const DELEGATE_CALL_OPERATION: u8 = 1;

/// A transaction to be executed by the Safe.
#[derive(Debug, Clone)]
pub struct SafeTransaction {
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
    pub operation: u8,
}

impl SafeTransaction {
    pub fn call(to: Address, data: Vec<u8>) -> Self {
        Self {
            to,
            value: U256::zero(),
            data,
            operation: CALL_OPERATION,
        }
    }

    /// A delegate-call transaction: the target's code runs *as* the Safe,
    /// which is how the implementation flip borrows the Safe's proxy-admin
    /// authority.
    pub fn delegate_call(to: Address, data: Vec<u8>) -> Self {
        Self {
            to,
            value: U256::zero(),
            data,
            operation: DELEGATE_CALL_OPERATION,
        }
    }
}

/// Routes transactions through a Safe with independently approving owners.
#[derive(Debug)]
pub struct MultisigRouter<'a> {
    safe_address: Address,
    abi: ethabi::Contract,
    /// Governance owners that approve the transaction hash. In a live setting
    /// these wrap hardware-wallet keys; the router only ever asks them to
    /// approve a hash, never hands them raw key material.
    owners: Vec<&'a TxSender>,
    /// The account that submits the final `execTransaction`.
    executor: &'a TxSender,
}

impl<'a> MultisigRouter<'a> {
    pub fn new(safe_address: Address, owners: Vec<&'a TxSender>, executor: &'a TxSender) -> Self {
        Self {
            safe_address,
            abi: gnosis_safe_contract(),
            owners,
            executor,
        }
    }

    async fn safe_view<R: web3::contract::tokens::Detokenize>(
        &self,
        args: CallFunctionArgs,
    ) -> Result<R, MigrationError> {
        Ok(args
            .for_contract(self.safe_address, &self.abi)
            .call(self.executor.client())
            .await?)
    }

    /// The hash every owner must approve, as computed by the Safe itself.
    pub async fn transaction_hash(
        &self,
        tx: &SafeTransaction,
        safe_nonce: U256,
    ) -> Result<H256, MigrationError> {
        self.safe_view(CallFunctionArgs::raw(
            "getTransactionHash",
            vec![
                ethabi::Token::Address(tx.to),
                ethabi::Token::Uint(tx.value),
                ethabi::Token::Bytes(tx.data.clone()),
                ethabi::Token::Uint(tx.operation.into()),
                ethabi::Token::Uint(U256::zero()), // safeTxGas
                ethabi::Token::Uint(U256::zero()), // baseGas
                ethabi::Token::Uint(U256::zero()), // gasPrice
                ethabi::Token::Address(Address::zero()), // gasToken
                ethabi::Token::Address(Address::zero()), // refundReceiver
                ethabi::Token::Uint(safe_nonce),
            ],
        ))
        .await
    }

    /// Runs the full approve-then-execute protocol and verifies the Safe's
    /// emitted execution result. Returns the executing transaction's hash.
    pub async fn execute(&self, tx: SafeTransaction) -> Result<H256, MigrationError> {
        let safe_nonce: U256 = self.safe_view(CallFunctionArgs::new("nonce", ())).await?;
        let tx_hash = self.transaction_hash(&tx, safe_nonce).await?;
        tracing::info!(
            "Routing transaction to {to:?} (operation {operation}) through safe \
             {safe:?}, hash {tx_hash:?}",
            to = tx.to,
            operation = tx.operation,
            safe = self.safe_address,
        );

        // Each owner approves independently; the threshold must be met before
        // execution, so these are awaited in turn.
        for owner in &self.owners {
            owner
                .send_contract_call(&self.abi, self.safe_address, "approveHash", tx_hash)
                .await?;
            tracing::info!("Owner {:?} approved {tx_hash:?}", owner.address());
        }

        let signatures = prevalidated_signatures(self.owners.iter().map(|owner| owner.address()));
        let status = self
            .executor
            .send_contract_call(
                &self.abi,
                self.safe_address,
                "execTransaction",
                (
                    ethabi::Token::Address(tx.to),
                    ethabi::Token::Uint(tx.value),
                    ethabi::Token::Bytes(tx.data),
                    ethabi::Token::Uint(tx.operation.into()),
                    ethabi::Token::Uint(U256::zero()),
                    ethabi::Token::Uint(U256::zero()),
                    ethabi::Token::Uint(U256::zero()),
                    ethabi::Token::Address(Address::zero()),
                    ethabi::Token::Address(Address::zero()),
                    ethabi::Token::Bytes(signatures),
                ),
            )
            .await?;

        self.check_execution_event(&status)?;
        tracing::info!("Safe reported ExecutionSuccess for {tx_hash:?}");
        Ok(status.tx_hash)
    }

    /// Inspects the Safe's own emitted result. The *last* execution event in
    /// the receipt decides; a receipt with none is treated as failure.
    fn check_execution_event(&self, status: &ExecutedTxStatus) -> Result<(), MigrationError> {
        let success_signature = self.abi.event("ExecutionSuccess")?.signature();
        let failure_signature = self.abi.event("ExecutionFailure")?.signature();

        let last_execution_event = status.receipt.logs.iter().rev().find(|log| {
            log.address == self.safe_address
                && log
                    .topics
                    .first()
                    .map_or(false, |topic| {
                        *topic == success_signature || *topic == failure_signature
                    })
        });

        match last_execution_event {
            Some(log) if log.topics[0] == success_signature => Ok(()),
            Some(_) => Err(MigrationError::MultisigExecution {
                tx_hash: status.tx_hash,
            }),
            None => Err(MigrationError::MissingExecutionEvent {
                tx_hash: status.tx_hash,
            }),
        }
    }
}

/// Pre-validated signature encoding for owners that approved on-chain:
/// `r` = owner address, `s` = 0, `v` = 1, owners sorted ascending as the Safe
/// requires.
fn prevalidated_signatures(owners: impl Iterator<Item = Address>) -> Vec<u8> {
    let mut owners: Vec<_> = owners.collect();
    owners.sort_unstable();

    let mut signatures = Vec::with_capacity(owners.len() * 65);
    for owner in owners {
        let mut r = [0_u8; 32];
        r[12..].copy_from_slice(owner.as_bytes());
        signatures.extend_from_slice(&r);
        signatures.extend_from_slice(&[0_u8; 32]); // s
        signatures.push(1); // v
    }
    signatures
}

/// Convenience predicate for test/staging chains: whether the network needs
/// the multisig pathway at all.
pub fn requires_multisig(network: goldfinch_contracts::Network) -> bool {
    !network.is_test()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use goldfinch_eth_client::clients::{MockEthereum, MockTx, MockTxOutcome};
    use web3::types::Log;

    use super::*;

    const SAFE: Address = Address::repeat_byte(0x5a);
    const TARGET: Address = Address::repeat_byte(0xe0);
    const SAFE_TX_HASH: H256 = H256::repeat_byte(0x99);

    fn safe_client(execution_events: Vec<&'static str>) -> MockEthereum {
        let abi = gnosis_safe_contract();
        let nonce_selector = abi.function("nonce").unwrap().short_signature();
        let hash_selector = abi.function("getTransactionHash").unwrap().short_signature();
        let exec_selector = abi.function("execTransaction").unwrap().short_signature();

        MockEthereum::default()
            .with_call_handler(move |req, _| {
                let selector = &req.data.as_ref().unwrap().0[..4];
                if selector == nonce_selector {
                    ethabi::Token::Uint(7.into())
                } else if selector == hash_selector {
                    ethabi::Token::FixedBytes(SAFE_TX_HASH.as_bytes().to_vec())
                } else {
                    panic!("unexpected safe call");
                }
            })
            .with_tx_outcome_handler(move |tx: &MockTx| {
                if tx.input[..4] != exec_selector {
                    // approveHash and friends.
                    return MockTxOutcome::success();
                }
                let abi = gnosis_safe_contract();
                let logs = execution_events
                    .iter()
                    .map(|event_name| Log {
                        address: SAFE,
                        topics: vec![abi.event(event_name).unwrap().signature()],
                        data: ethabi::encode(&[
                            ethabi::Token::FixedBytes(SAFE_TX_HASH.as_bytes().to_vec()),
                            ethabi::Token::Uint(U256::zero()),
                        ])
                        .into(),
                        block_hash: None,
                        block_number: None,
                        transaction_hash: None,
                        transaction_index: None,
                        log_index: None,
                        transaction_log_index: None,
                        log_type: None,
                        removed: None,
                    })
                    .collect();
                MockTxOutcome::success_with_logs(logs)
            })
    }

    async fn run_execute(client: MockEthereum) -> Result<H256, MigrationError> {
        // The mock exposes a single sender account, so one `TxSender` plays
        // both owners and the executor; the protocol flow is identical.
        let sender = TxSender::new(Arc::new(client)).await.unwrap();
        let router = MultisigRouter::new(SAFE, vec![&sender, &sender], &sender);
        router
            .execute(SafeTransaction::delegate_call(TARGET, vec![0xab, 0xcd]))
            .await
    }

    #[tokio::test]
    async fn success_event_confirms_execution() {
        let client = safe_client(vec!["ExecutionSuccess"]);
        run_execute(client.clone()).await.unwrap();
        // Two approvals plus the execution itself.
        assert_eq!(client.sent_tx_count(), 3);
    }

    #[tokio::test]
    async fn failure_event_fails_even_though_the_outer_tx_succeeded() {
        let client = safe_client(vec!["ExecutionFailure"]);
        let err = run_execute(client).await.unwrap_err();
        assert_matches!(err, MigrationError::MultisigExecution { .. });
    }

    #[tokio::test]
    async fn the_last_execution_event_decides() {
        // A nested call may emit a success event before the Safe records the
        // overall failure; only the last one counts.
        let client = safe_client(vec!["ExecutionSuccess", "ExecutionFailure"]);
        let err = run_execute(client).await.unwrap_err();
        assert_matches!(err, MigrationError::MultisigExecution { .. });
    }

    #[tokio::test]
    async fn receipts_without_execution_events_are_not_success() {
        let client = safe_client(vec![]);
        let err = run_execute(client).await.unwrap_err();
        assert_matches!(err, MigrationError::MissingExecutionEvent { .. });
    }

    #[test]
    fn prevalidated_signatures_sort_owners_ascending() {
        let high = Address::repeat_byte(0xbb);
        let low = Address::repeat_byte(0x0a);
        let signatures = prevalidated_signatures([high, low].into_iter());

        assert_eq!(signatures.len(), 130);
        // First signature's `r` carries the numerically lower owner.
        assert_eq!(&signatures[12..32], low.as_bytes());
        assert_eq!(&signatures[77..97], high.as_bytes());
        assert_eq!(signatures[64], 1);
        assert_eq!(signatures[129], 1);
    }
}
