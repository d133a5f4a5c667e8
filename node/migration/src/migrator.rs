//! The off-chain face of the on-chain `V2Migrator` contract.
//!
//! The migrator is a privileged contract deployed once per campaign and
//! granted temporary roles on everything it must touch. It exists because the
//! implementation flip and the credit-line replay must originate from a single
//! privileged caller, and routing every micro-step through the multisig would
//! be operationally hopeless.

use futures::future::{join_all, try_join_all};
use web3::types::{Address, H256};

use goldfinch_contracts::{migrator_contract, pausable_contract, ContractArtifact};
use goldfinch_eth_client::{encode_function_data, CallFunctionArgs, ExecutedTxStatus};

use crate::{
    error::MigrationError,
    reconstructor::CreditLineMigrationRecord,
    registry::ContractHandle,
    roles::Role,
    sender::TxSender,
    upgrader::UpgradeManifestEntry,
};

/// Credit-line replays per transaction. Five keeps the replay comfortably
/// under the block gas limit; anything that changes this must re-check gas.
pub const CREDIT_LINE_BATCH_SIZE: usize = 5;

/// Go-list additions per transaction, for the same gas-limit reason.
pub const GO_LIST_CHUNK_SIZE: usize = 375;

/// One `CreditLineMigrated` event observed in a replay receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditLineMigrated {
    pub owner: Address,
    pub legacy_credit_line: Address,
    pub new_credit_line: Address,
    pub tranched_pool: Address,
    pub tx_hash: H256,
}

/// Aggregated result of a credit-line replay run. Failures never abort
/// sibling records: batches are independent and each failure is recorded
/// here for the operator instead.
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    pub migrated: Vec<CreditLineMigrated>,
    /// Lines whose on-chain limit was already zero: a prior run migrated
    /// them, which counts as success.
    pub already_migrated: Vec<Address>,
    pub failed: Vec<(Address, String)>,
}

/// Handle on a deployed migration agent.
#[derive(Debug)]
pub struct MigrationAgent<'a> {
    sender: &'a TxSender,
    abi: ethabi::Contract,
    pub address: Address,
    config_address: Address,
    batch_size: usize,
    go_list_chunk_size: usize,
}

impl<'a> MigrationAgent<'a> {
    pub fn new(sender: &'a TxSender, address: Address, config_address: Address) -> Self {
        Self {
            sender,
            abi: migrator_contract(),
            address,
            config_address,
            batch_size: CREDIT_LINE_BATCH_SIZE,
            go_list_chunk_size: GO_LIST_CHUNK_SIZE,
        }
    }

    /// Overrides the gas-driven batch sizes. The defaults are upper bounds
    /// validated against mainnet gas limits; raise them at your own risk.
    pub fn with_batch_sizes(mut self, batch_size: usize, go_list_chunk_size: usize) -> Self {
        self.batch_size = batch_size;
        self.go_list_chunk_size = go_list_chunk_size;
        self
    }

    /// Deploys the migrator unless a deployment record already exists, and
    /// initializes it unless its admin already holds the owner role. Both
    /// guards are live chain reads, so re-running is a no-op.
    pub async fn ensure_deployed(
        sender: &'a TxSender,
        existing: Option<Address>,
        artifact: &ContractArtifact,
        config_address: Address,
        admin: Address,
    ) -> Result<MigrationAgent<'a>, MigrationError> {
        let address = match existing {
            Some(address) => {
                tracing::info!("Reusing existing migration agent at {address:?}");
                address
            }
            None => {
                let (address, _) = sender
                    .deploy("V2Migrator", artifact.bytecode_bytes()?)
                    .await?;
                address
            }
        };
        let agent = Self::new(sender, address, config_address);

        let initialized: bool = CallFunctionArgs::new("hasRole", (Role::Owner.id(), admin))
            .for_contract(address, &agent.abi)
            .call(sender.client())
            .await?;
        if initialized {
            tracing::info!("Migration agent already initialized for admin {admin:?}");
        } else {
            sender
                .send_contract_call(&agent.abi, address, "initialize", admin)
                .await?;
            tracing::info!("Initialized migration agent with admin {admin:?}");
        }
        Ok(agent)
    }

    /// Phase-1 idempotence predicate: once the legacy pool is paused, the
    /// implementation flip has happened and must not be repeated.
    pub async fn is_phase1_complete(
        &self,
        legacy_pool: &ContractHandle,
    ) -> Result<bool, MigrationError> {
        let paused: bool = CallFunctionArgs::new("paused", ())
            .for_contract(legacy_pool.address, &pausable_contract())
            .call(self.sender.client())
            .await?;
        Ok(paused)
    }

    pub async fn migrate_phase1(&self) -> Result<(), MigrationError> {
        self.sender
            .send_contract_call(
                &self.abi,
                self.address,
                "migratePhase1",
                self.config_address,
            )
            .await?;
        tracing::info!("migratePhase1 confirmed: legacy contracts paused and deprecated");
        Ok(())
    }

    /// Calldata for the atomic implementation flip, for routing through the
    /// multisig on networks that require it.
    pub fn upgrade_implementations_calldata(
        &self,
        entries: &[UpgradeManifestEntry],
    ) -> Result<Vec<u8>, MigrationError> {
        let implementations: Vec<_> = entries
            .iter()
            .map(|entry| ethabi::Token::Address(entry.new_implementation))
            .collect();
        Ok(encode_function_data(
            &self.abi,
            "upgradeImplementations",
            (
                ethabi::Token::Address(self.config_address),
                ethabi::Token::Array(implementations),
            ),
        )?)
    }

    /// Flips every proxy directly, for test networks where a single admin key
    /// suffices and the multisig detour would add nothing.
    pub async fn upgrade_implementations_direct(
        &self,
        entries: &[UpgradeManifestEntry],
    ) -> Result<(), MigrationError> {
        let data = self.upgrade_implementations_calldata(entries)?;
        let status = self.sender.send_calldata(self.address, data).await?;
        if !status.success {
            let reason = self.sender.revert_reason(status.tx_hash).await;
            return Err(MigrationError::TransactionFailed {
                tx_hash: status.tx_hash,
                reason,
            });
        }
        tracing::info!(
            "Flipped {} proxy implementations in {:?}",
            entries.len(),
            status.tx_hash
        );
        Ok(())
    }

    /// Replays the credit-line records in fixed-size batches, submitted
    /// concurrently (each batch is independent). Returns every
    /// `CreditLineMigrated` event found in the batch receipts.
    pub async fn migrate_credit_lines(
        &self,
        records: &[CreditLineMigrationRecord],
    ) -> Result<ReplayOutcome, MigrationError> {
        let mut outcome = ReplayOutcome::default();
        let mut to_migrate = Vec::new();
        for record in records {
            if !record.has_anything_to_migrate() {
                tracing::info!(
                    "Credit line {:?} already zeroed on-chain, treating as migrated",
                    record.legacy_address
                );
                outcome.already_migrated.push(record.legacy_address);
            } else if let Err(err) = record.validate() {
                tracing::warn!(
                    "Skipping malformed migration record for {:?}: {err}",
                    record.legacy_address
                );
                outcome.failed.push((record.legacy_address, err.to_string()));
            } else {
                to_migrate.push(record.clone());
            }
        }

        let batches: Vec<&[CreditLineMigrationRecord]> =
            to_migrate.chunks(self.batch_size).collect();
        let results = join_all(batches.iter().map(|batch| self.submit_batch(batch))).await;

        for (batch, result) in batches.iter().zip(results) {
            match result {
                Ok(events) => outcome.migrated.extend(events),
                Err(err) => {
                    tracing::warn!("Replay batch failed, continuing with the rest: {err}");
                    for record in *batch {
                        outcome
                            .failed
                            .push((record.legacy_address, err.to_string()));
                    }
                }
            }
        }

        tracing::info!(
            "Credit-line replay finished: {} migrated, {} already done, {} failed",
            outcome.migrated.len(),
            outcome.already_migrated.len(),
            outcome.failed.len()
        );
        Ok(outcome)
    }

    async fn submit_batch(
        &self,
        batch: &[CreditLineMigrationRecord],
    ) -> Result<Vec<CreditLineMigrated>, MigrationError> {
        let owners: Vec<_> = batch
            .iter()
            .map(|record| ethabi::Token::Address(record.owner_address))
            .collect();
        let migration_data: Vec<_> = batch
            .iter()
            .map(|record| {
                ethabi::Token::Array(
                    record
                        .migration_data()
                        .into_iter()
                        .map(ethabi::Token::Uint)
                        .collect(),
                )
            })
            .collect();

        let status = self
            .sender
            .send_contract_call(
                &self.abi,
                self.address,
                "migrateCreditLines",
                (
                    ethabi::Token::Address(self.config_address),
                    ethabi::Token::Array(owners),
                    ethabi::Token::Array(migration_data),
                ),
            )
            .await?;
        self.migrated_events(&status)
    }

    /// Extracts the `CreditLineMigrated` events emitted by the agent from a
    /// replay receipt.
    fn migrated_events(
        &self,
        status: &ExecutedTxStatus,
    ) -> Result<Vec<CreditLineMigrated>, MigrationError> {
        let event = self.abi.event("CreditLineMigrated")?;
        let signature = event.signature();
        let mut migrated = Vec::new();
        for log in &status.receipt.logs {
            if log.address != self.address || log.topics.first() != Some(&signature) {
                continue;
            }
            let parsed = event.parse_log((log.topics.clone(), log.data.0.clone()).into())?;
            let address_param = |name: &str| -> Result<Address, MigrationError> {
                parsed
                    .params
                    .iter()
                    .find(|param| param.name == name)
                    .and_then(|param| param.value.clone().into_address())
                    .ok_or_else(|| {
                        MigrationError::Abi(ethabi::Error::InvalidName(name.to_owned()))
                    })
            };
            migrated.push(CreditLineMigrated {
                owner: address_param("owner")?,
                legacy_credit_line: address_param("legacyCreditLine")?,
                new_credit_line: address_param("newCreditLine")?,
                tranched_pool: address_param("tranchedPool")?,
                tx_hash: status.tx_hash,
            });
        }
        Ok(migrated)
    }

    /// Adds the static allow-list to the protocol's access list, chunked to
    /// respect the block gas limit. Chunks are independent and submitted
    /// concurrently.
    pub async fn bulk_add_to_go_list(
        &self,
        config: &ContractHandle,
        accounts: &[Address],
    ) -> Result<usize, MigrationError> {
        let abi = goldfinch_contracts::goldfinch_config_contract();
        let chunks: Vec<_> = accounts.chunks(self.go_list_chunk_size).collect();
        let sends = chunks.iter().map(|chunk| {
            self.sender.send_contract_call(
                &abi,
                config.address,
                "bulkAddToGoList",
                chunk.to_vec(),
            )
        });
        try_join_all(sends).await?;
        tracing::info!(
            "Added {} addresses to the go-list in {} transactions",
            accounts.len(),
            chunks.len()
        );
        Ok(chunks.len())
    }

    /// Terminal call signaling that the replay phase is complete.
    pub async fn close_out_migration(&self) -> Result<(), MigrationError> {
        self.sender
            .send_contract_call(
                &self.abi,
                self.address,
                "closeOutMigration",
                self.config_address,
            )
            .await?;
        tracing::info!("Migration closed out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use goldfinch_eth_client::clients::{MockEthereum, MockTx, MockTxOutcome};
    use web3::types::{Log, U256};

    use super::*;

    const MIGRATOR: Address = Address::repeat_byte(0xe0);
    const CONFIG: Address = Address::repeat_byte(0xc0);

    fn record(owner_byte: u8) -> CreditLineMigrationRecord {
        CreditLineMigrationRecord {
            legacy_address: Address::repeat_byte(owner_byte ^ 0xff),
            owner_address: Address::repeat_byte(owner_byte),
            term_start_time: 1_000,
            term_end_time: 100_000,
            next_due_time: 50_000,
            interest_accrued_as_of: 60_000,
            last_full_payment_time: 40_000,
            total_interest_paid: U256::from(123),
            total_principal_paid: U256::from(456),
            limit: U256::from(1_000_000),
        }
    }

    /// Mines `migrateCreditLines` transactions, emitting one
    /// `CreditLineMigrated` event per replayed record the way the on-chain
    /// migrator does.
    fn replaying_client(failing_owner: Option<Address>) -> MockEthereum {
        let abi = migrator_contract();
        let selector = abi
            .function("migrateCreditLines")
            .unwrap()
            .short_signature();
        let event_signature = abi.event("CreditLineMigrated").unwrap().signature();

        MockEthereum::default().with_tx_outcome_handler(move |tx: &MockTx| {
            if tx.input[..4] != selector {
                return MockTxOutcome::success();
            }
            let tokens = ethabi::decode(
                &[
                    ethabi::ParamType::Address,
                    ethabi::ParamType::Array(Box::new(ethabi::ParamType::Address)),
                    ethabi::ParamType::Array(Box::new(ethabi::ParamType::Array(Box::new(
                        ethabi::ParamType::Uint(256),
                    )))),
                ],
                &tx.input[4..],
            )
            .unwrap();
            let owners = tokens[1].clone().into_array().unwrap();

            let mut logs = Vec::new();
            for owner in &owners {
                let owner = owner.clone().into_address().unwrap();
                if Some(owner) == failing_owner {
                    return MockTxOutcome::failure();
                }
                logs.push(Log {
                    address: MIGRATOR,
                    topics: vec![
                        event_signature,
                        owner.into(),
                        Address::repeat_byte(owner.as_bytes()[0] ^ 0xff).into(),
                    ],
                    data: ethabi::encode(&[
                        ethabi::Token::Address(Address::repeat_byte(0x77)),
                        ethabi::Token::Address(Address::repeat_byte(0x88)),
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
                });
            }
            MockTxOutcome::success_with_logs(logs)
        })
    }

    #[tokio::test]
    async fn replay_batches_records_and_collects_events() {
        let client = replaying_client(None);
        let sender = TxSender::new(Arc::new(client.clone())).await.unwrap();
        let agent = MigrationAgent::new(&sender, MIGRATOR, CONFIG);

        let records: Vec<_> = (1..=7).map(record).collect();
        let outcome = agent.migrate_credit_lines(&records).await.unwrap();

        assert_eq!(outcome.migrated.len(), 7);
        assert!(outcome.failed.is_empty());
        // Seven records at a batch size of five means exactly two transactions.
        assert_eq!(client.sent_tx_count(), 2);
        let owners: Vec<_> = outcome.migrated.iter().map(|event| event.owner).collect();
        for byte in 1..=7u8 {
            assert!(owners.contains(&Address::repeat_byte(byte)));
        }
    }

    #[tokio::test]
    async fn malformed_records_do_not_poison_their_batch() {
        let client = replaying_client(None);
        let sender = TxSender::new(Arc::new(client)).await.unwrap();
        let agent = MigrationAgent::new(&sender, MIGRATOR, CONFIG);

        let mut bad = record(3);
        // Due date after the term's end violates the reconstruction invariant.
        bad.next_due_time = bad.term_end_time + 1;
        let records = vec![record(1), record(2), bad.clone(), record(4)];

        let outcome = agent.migrate_credit_lines(&records).await.unwrap();
        assert_eq!(outcome.migrated.len(), 3);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, bad.legacy_address);
    }

    #[tokio::test]
    async fn failed_batches_leave_other_batches_untouched() {
        // Batch two (owner 6 onwards) reverts; batch one must still land.
        let client = replaying_client(Some(Address::repeat_byte(6)));
        let sender = TxSender::new(Arc::new(client)).await.unwrap();
        let agent = MigrationAgent::new(&sender, MIGRATOR, CONFIG);

        let records: Vec<_> = (1..=7).map(record).collect();
        let outcome = agent.migrate_credit_lines(&records).await.unwrap();

        assert_eq!(outcome.migrated.len(), 5);
        assert_eq!(outcome.failed.len(), 2);
    }

    #[tokio::test]
    async fn zeroed_lines_count_as_already_migrated() {
        let client = replaying_client(None);
        let sender = TxSender::new(Arc::new(client.clone())).await.unwrap();
        let agent = MigrationAgent::new(&sender, MIGRATOR, CONFIG);

        let mut done = record(9);
        done.limit = U256::zero();
        let outcome = agent.migrate_credit_lines(&[done]).await.unwrap();

        assert_eq!(outcome.already_migrated, vec![record(9).legacy_address]);
        assert!(outcome.migrated.is_empty());
        assert_eq!(client.sent_tx_count(), 0);
    }

    #[tokio::test]
    async fn paused_pool_marks_phase1_complete() {
        let paused_selector = pausable_contract()
            .function("paused")
            .unwrap()
            .short_signature();
        let client = MockEthereum::default().with_call_handler(move |req, _| {
            assert_eq!(req.data.as_ref().unwrap().0[..4], paused_selector);
            ethabi::Token::Bool(true)
        });
        let sender = TxSender::new(Arc::new(client)).await.unwrap();
        let agent = MigrationAgent::new(&sender, MIGRATOR, CONFIG);
        let pool = ContractHandle {
            logical_name: "Pool".to_owned(),
            address: Address::repeat_byte(0x42),
            abi: pausable_contract(),
            proxy_address: None,
            implementation_address: None,
        };

        assert!(agent.is_phase1_complete(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn ensure_deployed_reuses_initialized_agent_without_transactions() {
        let owner_role = Role::Owner.id();
        let admin = Address::repeat_byte(0x60);
        let client = MockEthereum::default().with_call_handler(move |req, _| {
            // `hasRole(OWNER_ROLE, admin)` reports the agent as initialized.
            let data = &req.data.as_ref().unwrap().0;
            assert_eq!(H256::from_slice(&data[4..36]), owner_role);
            ethabi::Token::Bool(true)
        });
        let sender = TxSender::new(Arc::new(client.clone())).await.unwrap();

        let artifact = ContractArtifact {
            abi: migrator_contract(),
            bytecode: "0x6080".to_owned(),
        };
        let agent =
            MigrationAgent::ensure_deployed(&sender, Some(MIGRATOR), &artifact, CONFIG, admin)
                .await
                .unwrap();
        assert_eq!(agent.address, MIGRATOR);
        assert_eq!(client.sent_tx_count(), 0);
    }

    #[tokio::test]
    async fn go_list_additions_are_chunked() {
        let client = MockEthereum::default().with_auto_mine();
        let sender = TxSender::new(Arc::new(client.clone())).await.unwrap();
        let agent = MigrationAgent::new(&sender, MIGRATOR, CONFIG).with_batch_sizes(5, 375);

        let config = ContractHandle {
            logical_name: "GoldfinchConfig".to_owned(),
            address: CONFIG,
            abi: goldfinch_contracts::goldfinch_config_contract(),
            proxy_address: None,
            implementation_address: None,
        };
        let accounts: Vec<_> = (0..800u16)
            .map(|i| Address::from_low_u64_be(u64::from(i) + 1))
            .collect();

        let tx_count = agent.bulk_add_to_go_list(&config, &accounts).await.unwrap();
        // 800 addresses at 375 per transaction: three chunks.
        assert_eq!(tx_count, 3);
        assert_eq!(client.sent_tx_count(), 3);
    }
}
