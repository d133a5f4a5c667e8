use std::{fmt, str::FromStr};

use async_trait::async_trait;
use secp256k1::SecretKey;
use web3::{
    signing::{Key, SecretKeyRef},
    types::{Address, U64},
};

use crate::{
    raw_ethereum_tx::{Transaction, TransactionParameters},
    EthereumSigner, SignerError,
};

const EIP1559_TX_ID: u64 = 2;

#[derive(Clone)]
pub struct PrivateKeySigner {
    private_key: SecretKey,
}

impl fmt::Debug for PrivateKeySigner {
    // We do not want to print the private key in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeySigner")
            .field("address", &self.address())
            .finish()
    }
}

impl PrivateKeySigner {
    pub fn new(private_key: SecretKey) -> Self {
        Self { private_key }
    }

    /// Parses a signer from a hex-encoded private key, with or without the `0x` prefix.
    pub fn from_hex(raw: &str) -> Result<Self, SignerError> {
        let raw = raw.strip_prefix("0x").unwrap_or(raw);
        let private_key = SecretKey::from_str(raw)
            .map_err(|err| SignerError::InvalidPrivateKey(err.to_string()))?;
        Ok(Self { private_key })
    }

    pub fn address(&self) -> Address {
        SecretKeyRef::new(&self.private_key).address()
    }
}

#[async_trait]
impl EthereumSigner for PrivateKeySigner {
    async fn get_address(&self) -> Result<Address, SignerError> {
        Ok(self.address())
    }

    async fn sign_transaction(
        &self,
        raw_tx: TransactionParameters,
    ) -> Result<Vec<u8>, SignerError> {
        let key = SecretKeyRef::new(&self.private_key);
        // For EIP-1559 transactions `gas_price` carries `max_fee_per_gas` in the
        // RLP layout; legacy transactions use it verbatim.
        let gas_price = match raw_tx.transaction_type {
            Some(tx_type) if tx_type == U64::from(EIP1559_TX_ID) => raw_tx.max_fee_per_gas,
            _ => raw_tx.gas_price.unwrap_or(raw_tx.max_fee_per_gas),
        };
        let tx = Transaction {
            to: raw_tx.to,
            nonce: raw_tx.nonce,
            gas: raw_tx.gas,
            gas_price,
            value: raw_tx.value,
            data: raw_tx.data,
            transaction_type: raw_tx.transaction_type,
            access_list: raw_tx.access_list.unwrap_or_default(),
            max_priority_fee_per_gas: raw_tx.max_priority_fee_per_gas,
        };

        let signed = tx.sign(key, raw_tx.chain_id)?;
        Ok(signed.raw_transaction.0)
    }
}

#[cfg(test)]
mod tests {
    use web3::types::U256;

    use super::*;

    const TEST_KEY: &str = "0x27593fea79697e947890ecbecce7901b0008345e5d7259710d0dd5e500d040be";

    #[test]
    fn address_derivation_is_deterministic() {
        let signer = PrivateKeySigner::from_hex(TEST_KEY).unwrap();
        let with_prefix = signer.address();
        let without_prefix = PrivateKeySigner::from_hex(&TEST_KEY[2..]).unwrap().address();
        assert_eq!(with_prefix, without_prefix);
        assert_ne!(with_prefix, Address::zero());
    }

    #[tokio::test]
    async fn signs_eip1559_transaction() {
        let signer = PrivateKeySigner::from_hex(TEST_KEY).unwrap();
        let raw = signer
            .sign_transaction(TransactionParameters {
                nonce: 0.into(),
                to: Some(Address::repeat_byte(0x42)),
                gas: 100_000.into(),
                gas_price: None,
                value: U256::zero(),
                data: vec![0xde, 0xad],
                chain_id: 1,
                transaction_type: Some(EIP1559_TX_ID.into()),
                access_list: None,
                max_fee_per_gas: 100.into(),
                max_priority_fee_per_gas: 10.into(),
            })
            .await
            .unwrap();
        // Typed transaction envelope starts with the transaction type byte.
        assert_eq!(raw[0], EIP1559_TX_ID as u8);
    }

    #[tokio::test]
    async fn signs_contract_creation() {
        let signer = PrivateKeySigner::from_hex(TEST_KEY).unwrap();
        let raw = signer
            .sign_transaction(TransactionParameters {
                nonce: 1.into(),
                to: None,
                gas: 3_000_000.into(),
                gas_price: None,
                value: U256::zero(),
                data: vec![0x60, 0x80, 0x60, 0x40],
                chain_id: 31337,
                transaction_type: Some(EIP1559_TX_ID.into()),
                access_list: None,
                max_fee_per_gas: 100.into(),
                max_priority_fee_per_gas: 10.into(),
            })
            .await
            .unwrap();
        assert!(!raw.is_empty());
    }
}
