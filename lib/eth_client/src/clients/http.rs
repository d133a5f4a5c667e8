use std::{fmt, sync::Arc};

use async_trait::async_trait;
use goldfinch_eth_signer::{EthereumSigner, PrivateKeySigner, TransactionParameters};
use web3::{
    signing::keccak256,
    transports::Http,
    types::{
        Address, Block, BlockId, BlockNumber, Bytes, CallRequest, Filter, Log, TransactionId,
        TransactionReceipt, H256, U256, U64,
    },
    Web3,
};

use crate::{
    types::{Error, ExecutedTxStatus, FailureInfo, SignedCallResult},
    BoundEthInterface, EthInterface, Options, RawTransactionBytes,
};

/// EIP-1559 transaction type id.
const EIP1559_TX_TYPE: u64 = 2;

/// Gas limit value to be used in a transaction if for some reason
/// gas limit was not set for it. This is an emergency value, which
/// will not be used normally.
const FALLBACK_GAS_LIMIT: u64 = 3_000_000;

/// HTTP-based Ethereum client for "unbound" queries.
#[derive(Debug, Clone)]
pub struct QueryClient {
    web3: Arc<Web3<Http>>,
}

impl QueryClient {
    pub fn new(node_url: &str) -> Result<Self, Error> {
        let transport = Http::new(node_url)?;
        Ok(Self {
            web3: Arc::new(Web3::new(transport)),
        })
    }
}

#[async_trait]
impl EthInterface for QueryClient {
    async fn fetch_chain_id(&self) -> Result<u64, Error> {
        let chain_id = self.web3.eth().chain_id().await?;
        Ok(chain_id.as_u64())
    }

    async fn block_number(&self) -> Result<U64, Error> {
        Ok(self.web3.eth().block_number().await?)
    }

    async fn block(&self, block_id: BlockId) -> Result<Option<Block<H256>>, Error> {
        Ok(self.web3.eth().block(block_id).await?)
    }

    async fn get_storage_at(&self, address: Address, slot: H256) -> Result<H256, Error> {
        let idx = U256::from_big_endian(slot.as_bytes());
        Ok(self.web3.eth().storage(address, idx, None).await?)
    }

    async fn nonce_at_for_account(
        &self,
        account: Address,
        block: BlockNumber,
    ) -> Result<U256, Error> {
        Ok(self
            .web3
            .eth()
            .transaction_count(account, Some(block))
            .await?)
    }

    async fn send_raw_tx(&self, tx: RawTransactionBytes) -> Result<H256, Error> {
        Ok(self.web3.eth().send_raw_transaction(tx.0.into()).await?)
    }

    async fn get_tx_status(&self, hash: H256) -> Result<Option<ExecutedTxStatus>, Error> {
        let receipt = self.tx_receipt(hash).await?;
        Ok(receipt.and_then(|receipt| match receipt.status {
            Some(status) if receipt.block_number.is_some() => Some(ExecutedTxStatus {
                tx_hash: receipt.transaction_hash,
                success: status.as_u64() == 1,
                receipt,
            }),
            _ => None,
        }))
    }

    async fn tx_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>, Error> {
        Ok(self.web3.eth().transaction_receipt(tx_hash).await?)
    }

    async fn failure_reason(&self, tx_hash: H256) -> Result<Option<FailureInfo>, Error> {
        let transaction = self
            .web3
            .eth()
            .transaction(TransactionId::Hash(tx_hash))
            .await?;
        let receipt = self.tx_receipt(tx_hash).await?;

        match (transaction, receipt) {
            (Some(transaction), Some(receipt)) => {
                let gas_limit = transaction.gas;
                let gas_used = receipt.gas_used;

                let call_request = CallRequest {
                    from: transaction.from,
                    to: transaction.to,
                    gas: Some(transaction.gas),
                    gas_price: transaction.gas_price,
                    value: Some(transaction.value),
                    data: Some(transaction.input),
                    ..CallRequest::default()
                };

                let block_number = receipt
                    .block_number
                    .map_or_else(|| BlockNumber::Latest.into(), Into::into);
                let result = self.web3.eth().call(call_request, Some(block_number)).await;

                match result {
                    Err(web3::Error::Rpc(rpc_error)) => {
                        let revert_code = rpc_error.code.code();
                        let message_len =
                            "execution reverted: ".len().min(rpc_error.message.len());
                        let revert_reason = rpc_error.message[message_len..].to_string();

                        Ok(Some(FailureInfo {
                            revert_code,
                            revert_reason,
                            gas_used,
                            gas_limit,
                        }))
                    }
                    Err(err) => Err(err.into()),
                    Ok(_) => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, Error> {
        Ok(self.web3.eth().logs(filter.clone()).await?)
    }

    async fn call_contract_function(
        &self,
        request: CallRequest,
        block: Option<BlockId>,
    ) -> Result<Bytes, Error> {
        Ok(self.web3.eth().call(request, block).await?)
    }

    async fn get_gas_price(&self) -> Result<U256, Error> {
        Ok(self.web3.eth().gas_price().await?)
    }

    async fn get_pending_block_base_fee_per_gas(&self) -> Result<U256, Error> {
        let block = match self.block(BlockNumber::Pending.into()).await? {
            Some(block) => block,
            // Fallback for node setups that do not expose a pending block.
            None => self
                .block(BlockNumber::Latest.into())
                .await?
                .expect("Latest block always exists"),
        };
        // `base_fee_per_gas` always exists after the London fork.
        Ok(block.base_fee_per_gas.unwrap())
    }

    async fn eth_balance(&self, address: Address) -> Result<U256, Error> {
        Ok(self.web3.eth().balance(address, None).await?)
    }
}

/// HTTP-based Ethereum client backed by a private key to sign transactions.
pub type PKSigningClient = SigningClient<PrivateKeySigner>;

impl PKSigningClient {
    pub fn from_hex_key(
        operator_private_key: &str,
        default_priority_fee_per_gas: u64,
        chain_id: u64,
        query_client: QueryClient,
    ) -> Result<Self, Error> {
        let signer = PrivateKeySigner::from_hex(operator_private_key)?;
        let operator_address = signer.address();
        tracing::info!("Operator address: {operator_address:?}");
        Ok(SigningClient::new(
            query_client,
            operator_address,
            signer,
            default_priority_fee_per_gas.into(),
            chain_id,
        ))
    }
}

/// HTTP-based client instantiated for a certain account, capable of signing
/// transactions (including contract-creation ones).
#[derive(Clone)]
pub struct SigningClient<S: EthereumSigner> {
    inner: Arc<SigningClientInner<S>>,
    query_client: QueryClient,
}

struct SigningClientInner<S: EthereumSigner> {
    eth_signer: S,
    sender_account: Address,
    chain_id: u64,
    default_priority_fee_per_gas: U256,
}

impl<S: EthereumSigner> fmt::Debug for SigningClient<S> {
    // We do not want to have a private key in the debug representation.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningClient")
            .field("sender_account", &self.inner.sender_account)
            .field("chain_id", &self.inner.chain_id)
            .finish()
    }
}

impl<S: EthereumSigner> SigningClient<S> {
    pub fn new(
        query_client: QueryClient,
        operator_eth_addr: Address,
        eth_signer: S,
        default_priority_fee_per_gas: U256,
        chain_id: u64,
    ) -> Self {
        Self {
            inner: Arc::new(SigningClientInner {
                sender_account: operator_eth_addr,
                eth_signer,
                chain_id,
                default_priority_fee_per_gas,
            }),
            query_client,
        }
    }

    async fn sign_tx(
        &self,
        data: Vec<u8>,
        to: Option<Address>,
        options: Options,
    ) -> Result<SignedCallResult, Error> {
        // Fetch current max priority fee per gas
        let max_priority_fee_per_gas = options
            .max_priority_fee_per_gas
            .unwrap_or(self.inner.default_priority_fee_per_gas);

        // Fetch current base fee and add `max_priority_fee_per_gas`
        let max_fee_per_gas = match options.max_fee_per_gas {
            Some(max_fee_per_gas) => max_fee_per_gas,
            None => {
                self.query_client.get_pending_block_base_fee_per_gas().await?
                    + max_priority_fee_per_gas
            }
        };

        if max_fee_per_gas < max_priority_fee_per_gas {
            return Err(Error::WrongFeeProvided(
                max_fee_per_gas,
                max_priority_fee_per_gas,
            ));
        }

        let nonce = match options.nonce {
            Some(nonce) => nonce,
            None => self.pending_nonce().await?,
        };

        let gas = options.gas.unwrap_or_else(|| {
            // Verbosity level is set to `error`, since we expect all the transactions to have
            // a set limit, but don't want to crash the application if for some reason in some
            // place limit was not set.
            tracing::error!(
                "No gas limit was set for transaction, using the default limit: {FALLBACK_GAS_LIMIT}"
            );
            U256::from(FALLBACK_GAS_LIMIT)
        });

        let tx = TransactionParameters {
            nonce,
            to,
            gas,
            value: options.value.unwrap_or_default(),
            data,
            chain_id: self.inner.chain_id,
            max_priority_fee_per_gas,
            gas_price: None,
            transaction_type: Some(EIP1559_TX_TYPE.into()),
            access_list: None,
            max_fee_per_gas,
        };

        let signed_tx = self.inner.eth_signer.sign_transaction(tx).await?;
        let hash = H256(keccak256(&signed_tx));

        Ok(SignedCallResult::new(
            RawTransactionBytes(signed_tx),
            max_priority_fee_per_gas,
            max_fee_per_gas,
            nonce,
            hash,
        ))
    }
}

#[async_trait]
impl<S: EthereumSigner> EthInterface for SigningClient<S> {
    async fn fetch_chain_id(&self) -> Result<u64, Error> {
        self.query_client.fetch_chain_id().await
    }

    async fn block_number(&self) -> Result<U64, Error> {
        self.query_client.block_number().await
    }

    async fn block(&self, block_id: BlockId) -> Result<Option<Block<H256>>, Error> {
        self.query_client.block(block_id).await
    }

    async fn get_storage_at(&self, address: Address, slot: H256) -> Result<H256, Error> {
        self.query_client.get_storage_at(address, slot).await
    }

    async fn nonce_at_for_account(
        &self,
        account: Address,
        block: BlockNumber,
    ) -> Result<U256, Error> {
        self.query_client.nonce_at_for_account(account, block).await
    }

    async fn send_raw_tx(&self, tx: RawTransactionBytes) -> Result<H256, Error> {
        self.query_client.send_raw_tx(tx).await
    }

    async fn get_tx_status(&self, hash: H256) -> Result<Option<ExecutedTxStatus>, Error> {
        self.query_client.get_tx_status(hash).await
    }

    async fn tx_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>, Error> {
        self.query_client.tx_receipt(tx_hash).await
    }

    async fn failure_reason(&self, tx_hash: H256) -> Result<Option<FailureInfo>, Error> {
        self.query_client.failure_reason(tx_hash).await
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, Error> {
        self.query_client.logs(filter).await
    }

    async fn call_contract_function(
        &self,
        request: CallRequest,
        block: Option<BlockId>,
    ) -> Result<Bytes, Error> {
        self.query_client.call_contract_function(request, block).await
    }

    async fn get_gas_price(&self) -> Result<U256, Error> {
        self.query_client.get_gas_price().await
    }

    async fn get_pending_block_base_fee_per_gas(&self) -> Result<U256, Error> {
        self.query_client.get_pending_block_base_fee_per_gas().await
    }

    async fn eth_balance(&self, address: Address) -> Result<U256, Error> {
        self.query_client.eth_balance(address).await
    }
}

#[async_trait]
impl<S: EthereumSigner> BoundEthInterface for SigningClient<S> {
    fn sender_account(&self) -> Address {
        self.inner.sender_account
    }

    fn chain_id(&self) -> u64 {
        self.inner.chain_id
    }

    async fn sign_prepared_tx_for_addr(
        &self,
        data: Vec<u8>,
        contract_addr: Address,
        options: Options,
    ) -> Result<SignedCallResult, Error> {
        self.sign_tx(data, Some(contract_addr), options).await
    }

    async fn sign_prepared_deploy_tx(
        &self,
        data: Vec<u8>,
        options: Options,
    ) -> Result<SignedCallResult, Error> {
        self.sign_tx(data, None, options).await
    }
}
