use async_trait::async_trait;
use web3::types::Address;

pub use crate::{pk_signer::PrivateKeySigner, raw_ethereum_tx::TransactionParameters};

mod pk_signer;
mod raw_ethereum_tx;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SignerError {
    #[error("Signing failed: {0}")]
    SigningFailed(String),
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
}

/// Signs raw Ethereum transactions on behalf of a single account.
///
/// Deliberately independent of the transaction *sender*: the same signer can back
/// a query client, a deployer, or a multisig owner account.
#[async_trait]
pub trait EthereumSigner: 'static + Send + Sync + Clone {
    async fn sign_transaction(&self, raw_tx: TransactionParameters)
        -> Result<Vec<u8>, SignerError>;

    async fn get_address(&self) -> Result<Address, SignerError>;
}
