use web3::{
    contract::tokens::{Detokenize, Tokenize},
    types::{Address, BlockId, CallRequest, TransactionReceipt, H256, U256},
};

use crate::EthInterface;

/// Wrapper for `Vec<ethabi::Token>` that doesn't wrap them in an additional
/// array in its `Tokenize` implementation.
#[derive(Debug)]
pub(crate) struct RawTokens(pub Vec<ethabi::Token>);

impl Tokenize for RawTokens {
    fn into_tokens(self) -> Vec<ethabi::Token> {
        self.0
    }
}

/// Arguments for calling a function in an unspecified Ethereum smart contract.
#[derive(Debug)]
pub struct CallFunctionArgs {
    pub(crate) name: String,
    pub(crate) from: Option<Address>,
    pub(crate) block: Option<BlockId>,
    pub(crate) params: RawTokens,
}

impl CallFunctionArgs {
    pub fn new(name: &str, params: impl Tokenize) -> Self {
        Self {
            name: name.to_owned(),
            from: None,
            block: None,
            params: RawTokens(params.into_tokens()),
        }
    }

    /// Builds the arguments from already-assembled ABI tokens, for calls whose
    /// parameter types have no convenient `Tokenize` representation.
    pub fn raw(name: &str, params: Vec<ethabi::Token>) -> Self {
        Self {
            name: name.to_owned(),
            from: None,
            block: None,
            params: RawTokens(params),
        }
    }

    pub fn with_sender(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_block(mut self, block: BlockId) -> Self {
        self.block = Some(block);
        self
    }

    pub fn for_contract(
        self,
        contract_address: Address,
        contract_abi: &ethabi::Contract,
    ) -> ContractCall {
        ContractCall {
            contract_address,
            contract_abi: contract_abi.clone(),
            inner: self,
        }
    }
}

/// Information sufficient for calling a function in a specific Ethereum smart
/// contract. Instantiated using [`CallFunctionArgs::for_contract()`].
#[derive(Debug)]
pub struct ContractCall {
    pub(crate) contract_address: Address,
    pub(crate) contract_abi: ethabi::Contract,
    pub(crate) inner: CallFunctionArgs,
}

impl ContractCall {
    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    pub async fn call<R: Detokenize>(self, client: &dyn EthInterface) -> Result<R, Error> {
        let func = self.contract_abi.function(&self.inner.name)?;
        let data = func.encode_input(&self.inner.params.0)?;
        let request = CallRequest {
            from: self.inner.from,
            to: Some(self.contract_address),
            data: Some(data.into()),
            ..CallRequest::default()
        };
        let output = client.call_contract_function(request, self.inner.block).await?;
        let tokens = func.decode_output(&output.0)?;
        Ok(R::from_tokens(tokens)?)
    }
}

/// Common error type exposed by the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Problem on the Ethereum client side (e.g. bad RPC call, network issues).
    #[error("Request to ethereum gateway failed: {0}")]
    EthereumGateway(#[from] web3::Error),
    /// Problem with a contract call.
    #[error("Call to contract failed: {0}")]
    Contract(#[from] web3::contract::Error),
    /// Problem with transaction signer.
    #[error("Transaction signing failed: {0}")]
    Signer(#[from] goldfinch_eth_signer::SignerError),
    /// Problem with ABI encoding or decoding.
    #[error("ABI handling failed: {0}")]
    Abi(#[from] ethabi::Error),
    /// Incorrect fee provided for a transaction.
    #[error("Max fee {0} less than priority fee {1}")]
    WrongFeeProvided(U256, U256),
    /// Transaction was not mined within the polling budget.
    #[error("Transaction {0:?} was not confirmed in time")]
    ConfirmationTimeout(H256),
}

/// Raw transaction bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransactionBytes(pub(crate) Vec<u8>);

impl RawTransactionBytes {
    /// Converts raw transaction bytes. It is the caller's responsibility to
    /// ensure that these bytes were actually obtained by signing a transaction.
    pub fn new_unchecked(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for RawTransactionBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Representation of a signed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedCallResult {
    /// Raw transaction bytes.
    pub raw_tx: RawTransactionBytes,
    /// `max_priority_fee_per_gas` field of transaction (EIP-1559).
    pub max_priority_fee_per_gas: U256,
    /// `max_fee_per_gas` field of transaction (EIP-1559).
    pub max_fee_per_gas: U256,
    /// `nonce` field of transaction.
    pub nonce: U256,
    /// Transaction hash.
    pub hash: H256,
}

impl SignedCallResult {
    pub fn new(
        raw_tx: RawTransactionBytes,
        max_priority_fee_per_gas: U256,
        max_fee_per_gas: U256,
        nonce: U256,
        hash: H256,
    ) -> Self {
        Self {
            raw_tx,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            nonce,
            hash,
        }
    }
}

/// State of an executed Ethereum transaction.
#[derive(Debug, Clone)]
pub struct ExecutedTxStatus {
    /// The hash of the executed transaction.
    pub tx_hash: H256,
    /// Whether the transaction was executed successfully or failed.
    pub success: bool,
    /// Receipt for the transaction.
    pub receipt: TransactionReceipt,
}

/// Information about transaction failure.
///
/// Two common reasons for transaction failure are revert and running out of
/// gas; this structure tries to provide information about both.
#[derive(Debug, Clone)]
pub struct FailureInfo {
    /// RPC error code.
    pub revert_code: i64,
    /// RPC error message (normally, for a reverted transaction it would
    /// include the revert reason).
    pub revert_reason: String,
    /// Amount of gas used by the transaction.
    pub gas_used: Option<U256>,
    /// Gas limit of the transaction.
    pub gas_limit: U256,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_tokens_are_not_rewrapped() {
        let tokens = vec![
            ethabi::Token::Address(Address::repeat_byte(1)),
            ethabi::Token::Uint(U256::from(42)),
        ];
        let raw = RawTokens(tokens.clone());
        assert_eq!(raw.into_tokens(), tokens);
    }
}
