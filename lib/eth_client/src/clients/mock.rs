use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, RwLock, RwLockWriteGuard},
};

use async_trait::async_trait;
use web3::{
    contract::tokens::Tokenize,
    signing::keccak256,
    types::{
        Address, Block, BlockId, BlockNumber, Bytes, CallRequest, Filter, Log,
        TransactionReceipt, H160, H256, U256, U64,
    },
};

use crate::{
    types::{Error, ExecutedTxStatus, FailureInfo, SignedCallResult},
    BoundEthInterface, EthInterface, Options, RawTransactionBytes,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockTxKind {
    Call,
    Deploy,
}

/// Decoded form of a transaction sent through [`MockEthereum`], as seen by
/// outcome handlers in tests.
#[derive(Debug, Clone)]
pub struct MockTx {
    pub recipient: Address,
    pub input: Vec<u8>,
    pub hash: H256,
    pub nonce: u64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub kind: MockTxKind,
}

impl From<Vec<u8>> for MockTx {
    fn from(tx: Vec<u8>) -> Self {
        let len = tx.len();
        let kind = if tx[len - 1] == 1 {
            MockTxKind::Deploy
        } else {
            MockTxKind::Call
        };
        let nonce = U256::from_big_endian(&tx[len - 33..len - 1]).as_u64();
        let max_priority_fee_per_gas = U256::from_big_endian(&tx[len - 65..len - 33]);
        let max_fee_per_gas = U256::from_big_endian(&tx[len - 97..len - 65]);
        let recipient = Address::from_slice(&tx[len - 117..len - 97]);
        let hash = {
            let mut buffer = [0_u8; 32];
            buffer.copy_from_slice(&tx[..32]);
            buffer.into()
        };

        Self {
            recipient,
            input: tx[32..len - 117].to_vec(),
            nonce,
            hash,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            kind,
        }
    }
}

/// Outcome assigned to a mined mock transaction.
#[derive(Debug, Clone, Default)]
pub struct MockTxOutcome {
    pub success: bool,
    pub logs: Vec<Log>,
}

impl MockTxOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            logs: vec![],
        }
    }

    pub fn success_with_logs(logs: Vec<Log>) -> Self {
        Self {
            success: true,
            logs,
        }
    }

    pub fn failure() -> Self {
        Self {
            success: false,
            logs: vec![],
        }
    }
}

/// Mutable part of [`MockEthereum`] that needs to be synchronized via an `RwLock`.
#[derive(Debug, Default)]
struct MockEthereumInner {
    block_number: u64,
    tx_statuses: HashMap<H256, ExecutedTxStatus>,
    sent_txs: HashMap<H256, MockTx>,
    sent_tx_order: Vec<H256>,
    current_nonce: u64,
    pending_nonce: u64,
    nonces: BTreeMap<u64, u64>,
    storage: HashMap<(Address, H256), H256>,
    block_timestamps: BTreeMap<u64, u64>,
    historical_logs: Vec<Log>,
}

impl MockEthereumInner {
    fn execute_tx(
        &mut self,
        tx_hash: H256,
        outcome: &MockTxOutcome,
        confirmations: u64,
        non_ordering_confirmations: bool,
    ) {
        let block_number = self.block_number;
        self.block_number += confirmations;
        let nonce = self.current_nonce;
        let tx = self.sent_txs[&tx_hash].clone();

        if non_ordering_confirmations {
            if tx.nonce >= nonce {
                self.current_nonce = tx.nonce + 1;
            }
        } else {
            assert_eq!(tx.nonce, nonce, "nonce mismatch");
            self.current_nonce += 1;
        }
        self.nonces.insert(block_number, self.current_nonce);

        let contract_address = (tx.kind == MockTxKind::Deploy).then(|| {
            let mut preimage = MockEthereum::SENDER_ACCOUNT.as_bytes().to_vec();
            preimage.extend_from_slice(&tx.nonce.to_be_bytes());
            H160::from_slice(&keccak256(&preimage)[12..])
        });

        let mut logs = outcome.logs.clone();
        for log in &mut logs {
            log.transaction_hash = Some(tx_hash);
            log.block_number = Some(block_number.into());
        }

        let status = ExecutedTxStatus {
            tx_hash,
            success: outcome.success,
            receipt: TransactionReceipt {
                gas_used: Some(21000u32.into()),
                block_number: Some(block_number.into()),
                transaction_hash: tx_hash,
                status: Some(u64::from(outcome.success).into()),
                contract_address,
                logs,
                ..TransactionReceipt::default()
            },
        };
        self.tx_statuses.insert(tx_hash, status);
    }
}

#[derive(Debug)]
pub struct MockExecutedTxHandle<'a> {
    inner: RwLockWriteGuard<'a, MockEthereumInner>,
    tx_hash: H256,
}

impl MockExecutedTxHandle<'_> {
    pub fn with_logs(&mut self, logs: Vec<Log>) -> &mut Self {
        let status = self.inner.tx_statuses.get_mut(&self.tx_hash).unwrap();
        status.receipt.logs = logs;
        self
    }
}

type CallHandler = dyn Fn(&CallRequest, BlockId) -> Result<ethabi::Token, Error> + Send + Sync;
type TxOutcomeHandler = dyn Fn(&MockTx) -> MockTxOutcome + Send + Sync;

/// Mock Ethereum client recording all the incoming requests for further analysis.
///
/// With `auto_mine` enabled, every sent transaction is mined immediately with
/// the outcome produced by the configured outcome handler, which lets
/// orchestration code that waits for confirmations run to completion in tests.
#[derive(Clone)]
pub struct MockEthereum {
    max_fee_per_gas: U256,
    max_priority_fee_per_gas: U256,
    chain_id: u64,
    /// If true, the mock will not check the ordering of transaction nonces.
    /// This is useful for testing the cases when transactions are confirmed
    /// out of order.
    non_ordering_confirmations: bool,
    auto_mine: bool,
    inner: Arc<RwLock<MockEthereumInner>>,
    call_handler: Arc<CallHandler>,
    tx_outcome_handler: Arc<TxOutcomeHandler>,
}

impl fmt::Debug for MockEthereum {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MockEthereum")
            .field("max_fee_per_gas", &self.max_fee_per_gas)
            .field("max_priority_fee_per_gas", &self.max_priority_fee_per_gas)
            .field("chain_id", &self.chain_id)
            .field(
                "non_ordering_confirmations",
                &self.non_ordering_confirmations,
            )
            .field("auto_mine", &self.auto_mine)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl Default for MockEthereum {
    fn default() -> Self {
        Self {
            max_fee_per_gas: 100.into(),
            max_priority_fee_per_gas: 10.into(),
            chain_id: 31337,
            non_ordering_confirmations: false,
            auto_mine: false,
            inner: Arc::default(),
            call_handler: Arc::new(|call, block_id| {
                panic!("Unexpected eth_call: {call:?}, {block_id:?}");
            }),
            tx_outcome_handler: Arc::new(|_| MockTxOutcome::success()),
        }
    }
}

impl MockEthereum {
    pub const SENDER_ACCOUNT: Address = Address::repeat_byte(0x11);

    /// A fake `sha256` hasher, which calculates an `std::hash` instead.
    /// This is done for simplicity, and it's also much faster.
    fn fake_sha256(data: &[u8]) -> H256 {
        use std::{collections::hash_map::DefaultHasher, hash::Hasher};

        let mut hasher = DefaultHasher::new();
        hasher.write(data);
        let result = hasher.finish();
        H256::from_low_u64_ne(result)
    }

    /// Returns the number of transactions sent via this client.
    pub fn sent_tx_count(&self) -> usize {
        self.inner.read().unwrap().sent_txs.len()
    }

    /// Returns the nonces of all sent transactions, in the order they were sent.
    pub fn sent_tx_nonces(&self) -> Vec<u64> {
        let inner = self.inner.read().unwrap();
        inner
            .sent_tx_order
            .iter()
            .map(|hash| inner.sent_txs[hash].nonce)
            .collect()
    }

    /// Increments the block count by the provided `confirmations` and marks the
    /// sent transaction as executed with the given outcome.
    pub fn execute_tx(
        &self,
        tx_hash: H256,
        success: bool,
        confirmations: u64,
    ) -> MockExecutedTxHandle<'_> {
        let outcome = MockTxOutcome {
            success,
            logs: vec![],
        };
        let mut inner = self.inner.write().unwrap();
        inner.execute_tx(
            tx_hash,
            &outcome,
            confirmations,
            self.non_ordering_confirmations,
        );
        MockExecutedTxHandle { inner, tx_hash }
    }

    pub fn sign_prepared_tx(
        &self,
        mut raw_tx: Vec<u8>,
        contract_addr: Address,
        options: Options,
        kind: MockTxKind,
    ) -> Result<SignedCallResult, Error> {
        let max_fee_per_gas = options.max_fee_per_gas.unwrap_or(self.max_fee_per_gas);
        let max_priority_fee_per_gas = options
            .max_priority_fee_per_gas
            .unwrap_or(self.max_priority_fee_per_gas);
        let nonce = options.nonce.expect("Nonce must be set for every tx");

        // Nonce and fees are appended to distinguish the same transactions
        // with different gas by their hash in tests.
        raw_tx.extend_from_slice(contract_addr.as_bytes());
        raw_tx.extend_from_slice(&ethabi::encode(&max_fee_per_gas.into_tokens()));
        raw_tx.extend_from_slice(&ethabi::encode(&max_priority_fee_per_gas.into_tokens()));
        raw_tx.extend_from_slice(&ethabi::encode(&nonce.into_tokens()));
        raw_tx.push(match kind {
            MockTxKind::Call => 0,
            MockTxKind::Deploy => 1,
        });
        let hash = Self::fake_sha256(&raw_tx); // Okay for test purposes.

        // Concatenate `raw_tx` plus hash for test purposes.
        let mut new_raw_tx = hash.as_bytes().to_vec();
        new_raw_tx.extend(raw_tx);
        Ok(SignedCallResult::new(
            RawTransactionBytes(new_raw_tx),
            max_priority_fee_per_gas,
            max_fee_per_gas,
            nonce,
            hash,
        ))
    }

    pub fn advance_block_number(&self, val: u64) -> u64 {
        let mut inner = self.inner.write().unwrap();
        inner.block_number += val;
        inner.block_number
    }

    pub fn with_chain_id(self, chain_id: u64) -> Self {
        Self { chain_id, ..self }
    }

    pub fn with_non_ordering_confirmation(self, non_ordering_confirmations: bool) -> Self {
        Self {
            non_ordering_confirmations,
            ..self
        }
    }

    /// Mines every sent transaction immediately and successfully.
    pub fn with_auto_mine(self) -> Self {
        Self {
            auto_mine: true,
            non_ordering_confirmations: true,
            ..self
        }
    }

    /// Mines every sent transaction immediately, with the outcome decided by
    /// `handler`.
    pub fn with_tx_outcome_handler<F>(self, handler: F) -> Self
    where
        F: 'static + Send + Sync + Fn(&MockTx) -> MockTxOutcome,
    {
        Self {
            auto_mine: true,
            non_ordering_confirmations: true,
            tx_outcome_handler: Arc::new(handler),
            ..self
        }
    }

    pub fn with_call_handler<F>(self, call_handler: F) -> Self
    where
        F: 'static + Send + Sync + Fn(&CallRequest, BlockId) -> ethabi::Token,
    {
        Self {
            call_handler: Arc::new(move |call, block_id| Ok(call_handler(call, block_id))),
            ..self
        }
    }

    pub fn with_fallible_call_handler<F>(self, call_handler: F) -> Self
    where
        F: 'static + Send + Sync + Fn(&CallRequest, BlockId) -> Result<ethabi::Token, Error>,
    {
        Self {
            call_handler: Arc::new(call_handler),
            ..self
        }
    }

    /// Seeds a raw storage slot, e.g. an EIP-1967 implementation pointer.
    pub fn with_storage(self, address: Address, slot: H256, value: H256) -> Self {
        self.inner
            .write()
            .unwrap()
            .storage
            .insert((address, slot), value);
        self
    }

    /// Seeds wall-clock timestamps for historical blocks. Blocks without a
    /// seeded timestamp are reported as unknown.
    pub fn with_block_timestamps(self, timestamps: impl IntoIterator<Item = (u64, u64)>) -> Self {
        self.inner
            .write()
            .unwrap()
            .block_timestamps
            .extend(timestamps);
        self
    }

    /// Seeds historical logs returned by `logs()` queries.
    pub fn with_historical_logs(self, logs: Vec<Log>) -> Self {
        self.inner.write().unwrap().historical_logs.extend(logs);
        self
    }
}

fn parse_filter_block(value: &serde_json::Value) -> Option<u64> {
    let raw = value.as_str()?;
    let raw = raw.strip_prefix("0x")?;
    u64::from_str_radix(raw, 16).ok()
}

fn topic_matches(filter_topic: &serde_json::Value, log_topic: Option<&H256>) -> bool {
    let Some(log_topic) = log_topic else {
        return filter_topic.is_null();
    };
    let matches_value = |value: &serde_json::Value| {
        serde_json::from_value::<H256>(value.clone()).map_or(false, |topic| topic == *log_topic)
    };
    match filter_topic {
        serde_json::Value::Null => true,
        serde_json::Value::String(_) => matches_value(filter_topic),
        serde_json::Value::Array(options) => options.iter().any(matches_value),
        _ => false,
    }
}

fn log_matches_filter(filter: &serde_json::Value, log: &Log) -> bool {
    let matches_address = |value: &serde_json::Value| {
        serde_json::from_value::<Address>(value.clone()).map_or(false, |addr| addr == log.address)
    };
    match &filter["address"] {
        serde_json::Value::Null => {}
        serde_json::Value::Array(addresses) => {
            if !addresses.iter().any(matches_address) {
                return false;
            }
        }
        other => {
            if !matches_address(other) {
                return false;
            }
        }
    }

    if let serde_json::Value::Array(topics) = &filter["topics"] {
        for (i, filter_topic) in topics.iter().enumerate() {
            if !topic_matches(filter_topic, log.topics.get(i)) {
                return false;
            }
        }
    }

    let log_block = log.block_number.map(|number| number.as_u64());
    if let Some(from_block) = parse_filter_block(&filter["fromBlock"]) {
        if log_block.map_or(true, |block| block < from_block) {
            return false;
        }
    }
    if let Some(to_block) = parse_filter_block(&filter["toBlock"]) {
        if log_block.map_or(true, |block| block > to_block) {
            return false;
        }
    }
    true
}

#[async_trait]
impl EthInterface for MockEthereum {
    async fn fetch_chain_id(&self) -> Result<u64, Error> {
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> Result<U64, Error> {
        Ok(self.inner.read().unwrap().block_number.into())
    }

    async fn block(&self, block_id: BlockId) -> Result<Option<Block<H256>>, Error> {
        match block_id {
            BlockId::Number(BlockNumber::Number(number)) => {
                let inner = self.inner.read().unwrap();
                let timestamp = inner.block_timestamps.get(&number.as_u64());
                Ok(timestamp.map(|&timestamp| Block {
                    number: Some(number),
                    timestamp: timestamp.into(),
                    base_fee_per_gas: Some(self.max_fee_per_gas),
                    ..Block::default()
                }))
            }
            BlockId::Number(BlockNumber::Pending | BlockNumber::Latest) => {
                let inner = self.inner.read().unwrap();
                Ok(Some(Block {
                    number: Some(inner.block_number.into()),
                    base_fee_per_gas: Some(self.max_fee_per_gas),
                    ..Block::default()
                }))
            }
            _ => unimplemented!("`block()` called with unsupported block id: {block_id:?}"),
        }
    }

    async fn get_storage_at(&self, address: Address, slot: H256) -> Result<H256, Error> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or_default())
    }

    async fn nonce_at_for_account(
        &self,
        account: Address,
        block: BlockNumber,
    ) -> Result<U256, Error> {
        if account != Self::SENDER_ACCOUNT {
            unimplemented!("Getting nonce for custom account is not supported");
        }

        let inner = self.inner.read().unwrap();
        Ok(match block {
            BlockNumber::Number(block_number) => {
                let mut nonce_range = inner.nonces.range(..=block_number.as_u64());
                let (_, &nonce) = nonce_range.next_back().unwrap_or((&0, &0));
                nonce.into()
            }
            BlockNumber::Pending => inner.pending_nonce.into(),
            BlockNumber::Latest => inner.current_nonce.into(),
            _ => unimplemented!(
                "`nonce_at_for_account()` called with unsupported block number: {block:?}"
            ),
        })
    }

    async fn send_raw_tx(&self, tx: RawTransactionBytes) -> Result<H256, Error> {
        let mock_tx = MockTx::from(tx.0);
        let mock_tx_hash = mock_tx.hash;
        let mut inner = self.inner.write().unwrap();

        if mock_tx.nonce < inner.current_nonce {
            return Err(Error::EthereumGateway(web3::Error::Transport(
                web3::error::TransportError::Message(
                    "transaction with the same nonce already processed".into(),
                ),
            )));
        }

        if mock_tx.nonce == inner.pending_nonce {
            inner.pending_nonce += 1;
        }
        let outcome = self
            .auto_mine
            .then(|| (self.tx_outcome_handler)(&mock_tx));
        inner.sent_txs.insert(mock_tx_hash, mock_tx);
        inner.sent_tx_order.push(mock_tx_hash);

        if let Some(outcome) = outcome {
            inner.execute_tx(mock_tx_hash, &outcome, 1, self.non_ordering_confirmations);
        }
        Ok(mock_tx_hash)
    }

    async fn get_tx_status(&self, hash: H256) -> Result<Option<ExecutedTxStatus>, Error> {
        Ok(self.inner.read().unwrap().tx_statuses.get(&hash).cloned())
    }

    async fn tx_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>, Error> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .tx_statuses
            .get(&tx_hash)
            .map(|status| status.receipt.clone()))
    }

    async fn failure_reason(&self, tx_hash: H256) -> Result<Option<FailureInfo>, Error> {
        let tx_status = self.get_tx_status(tx_hash).await?;

        Ok(tx_status.and_then(|status| {
            (!status.success).then(|| FailureInfo {
                revert_code: 3,
                revert_reason: "reverted".into(),
                gas_used: status.receipt.gas_used,
                gas_limit: U256::zero(),
            })
        }))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, Error> {
        let filter = serde_json::to_value(filter).expect("filter serialization cannot fail");
        let inner = self.inner.read().unwrap();
        Ok(inner
            .historical_logs
            .iter()
            .filter(|log| log_matches_filter(&filter, log))
            .cloned()
            .collect())
    }

    async fn call_contract_function(
        &self,
        request: CallRequest,
        block: Option<BlockId>,
    ) -> Result<Bytes, Error> {
        let block = block.unwrap_or_else(|| BlockNumber::Pending.into());
        (self.call_handler)(&request, block).map(|token| Bytes(ethabi::encode(&[token])))
    }

    async fn get_gas_price(&self) -> Result<U256, Error> {
        Ok(self.max_fee_per_gas)
    }

    async fn get_pending_block_base_fee_per_gas(&self) -> Result<U256, Error> {
        Ok(self.max_fee_per_gas)
    }

    async fn eth_balance(&self, _address: Address) -> Result<U256, Error> {
        Ok(U256::exp10(18))
    }
}

#[async_trait]
impl BoundEthInterface for MockEthereum {
    fn sender_account(&self) -> Address {
        Self::SENDER_ACCOUNT
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn sign_prepared_tx_for_addr(
        &self,
        data: Vec<u8>,
        contract_addr: Address,
        options: Options,
    ) -> Result<SignedCallResult, Error> {
        self.sign_prepared_tx(data, contract_addr, options, MockTxKind::Call)
    }

    async fn sign_prepared_deploy_tx(
        &self,
        data: Vec<u8>,
        options: Options,
    ) -> Result<SignedCallResult, Error> {
        self.sign_prepared_tx(data, Address::zero(), options, MockTxKind::Deploy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn managing_block_number() {
        let client = MockEthereum::default();
        let block_number = client.block_number().await.unwrap();
        assert_eq!(block_number, 0.into());

        client.advance_block_number(5);
        let block_number = client.block_number().await.unwrap();
        assert_eq!(block_number, 5.into());
    }

    #[tokio::test]
    async fn managing_transactions() {
        let client = MockEthereum::default().with_non_ordering_confirmation(true);
        client.advance_block_number(2);

        let signed_tx = client
            .sign_prepared_tx(
                b"test".to_vec(),
                Address::repeat_byte(1),
                Options {
                    nonce: Some(1.into()),
                    ..Options::default()
                },
                MockTxKind::Call,
            )
            .unwrap();
        assert_eq!(signed_tx.nonce, 1.into());
        assert!(signed_tx.max_priority_fee_per_gas > 0.into());
        assert!(signed_tx.max_fee_per_gas > 0.into());

        let tx_hash = client.send_raw_tx(signed_tx.raw_tx.clone()).await.unwrap();
        assert_eq!(tx_hash, signed_tx.hash);

        client.execute_tx(tx_hash, true, 3);
        let tx_status = client
            .get_tx_status(tx_hash)
            .await
            .unwrap()
            .expect("no transaction status");
        assert!(tx_status.success);
        assert_eq!(tx_status.tx_hash, tx_hash);
        assert_eq!(tx_status.receipt.block_number, Some(2.into()));
    }

    #[tokio::test]
    async fn deployments_are_assigned_an_address() {
        let client = MockEthereum::default().with_auto_mine();
        let signed_tx = client
            .sign_prepared_deploy_tx(
                vec![0x60, 0x80],
                Options {
                    nonce: Some(0.into()),
                    ..Options::default()
                },
            )
            .await
            .unwrap();
        let tx_hash = client.send_raw_tx(signed_tx.raw_tx).await.unwrap();

        let status = client.get_tx_status(tx_hash).await.unwrap().unwrap();
        assert!(status.success);
        let deployed = status.receipt.contract_address.unwrap();
        assert_ne!(deployed, Address::zero());
    }

    #[tokio::test]
    async fn reading_seeded_storage_and_timestamps() {
        let proxy = Address::repeat_byte(0x42);
        let slot = H256::repeat_byte(3);
        let value = H256::repeat_byte(7);
        let client = MockEthereum::default()
            .with_storage(proxy, slot, value)
            .with_block_timestamps([(100, 1_600_000_000)]);

        assert_eq!(client.get_storage_at(proxy, slot).await.unwrap(), value);
        assert_eq!(
            client.get_storage_at(proxy, H256::zero()).await.unwrap(),
            H256::zero()
        );

        let block = client
            .block(BlockId::Number(100.into()))
            .await
            .unwrap()
            .expect("block must be known");
        assert_eq!(block.timestamp, 1_600_000_000.into());
        assert!(client
            .block(BlockId::Number(101.into()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn filtering_historical_logs() {
        let emitter = Address::repeat_byte(0xaa);
        let topic = H256::repeat_byte(1);
        let other_topic = H256::repeat_byte(2);
        let log = |topic0, block: u64| Log {
            address: emitter,
            topics: vec![topic0],
            block_number: Some(block.into()),
            data: Default::default(),
            block_hash: None,
            transaction_hash: None,
            transaction_index: None,
            log_index: None,
            transaction_log_index: None,
            log_type: None,
            removed: None,
        };
        let client = MockEthereum::default().with_historical_logs(vec![
            log(topic, 10),
            log(other_topic, 11),
            log(topic, 30),
        ]);

        let filter = web3::types::FilterBuilder::default()
            .address(vec![emitter])
            .topics(Some(vec![topic]), None, None, None)
            .from_block(BlockNumber::Number(0.into()))
            .to_block(BlockNumber::Number(20.into()))
            .build();
        let logs = client.logs(&filter).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number, Some(10.into()));
    }
}
