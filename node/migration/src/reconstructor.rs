//! Reconstruction of wall-clock credit-line state from block-denominated
//! legacy fields and historical event logs.
//!
//! The V1 credit line records time as block numbers (`termEndBlock`,
//! `nextDueBlock`, ...) and only tracks *owed* amounts. The V2 contracts want
//! Unix timestamps and cumulative *paid* amounts, so this module rebuilds both
//! from the chain: block-timestamp lookups plus linear projection for the
//! in-term markers, and a replay of the legacy pool's payment events for the
//! paid totals.

use std::collections::HashMap;

use futures::future::join_all;
use once_cell::sync::Lazy;
use web3::types::{Address, BlockId, BlockNumber, FilterBuilder, Log, H256, U256};

use goldfinch_contracts::{credit_line_contract, legacy_pool_contract};
use goldfinch_eth_client::{CallFunctionArgs, EthInterface};

use crate::{borrowers::LegacyCreditLine, registry::ContractHandle};

/// Average block cadence of the target chain.
pub const BLOCKS_PER_DAY: u64 = 5760;

const SECONDS_PER_DAY: u64 = 86_400;

/// Payment events are replayed from this height, comfortably before the first
/// legacy credit line existed. Scanning from genesis would only slow the RPC
/// down.
pub const EVENT_SCAN_START_BLOCK: u64 = 10_000_000;

/// Two block heights for which the block-lookup of this data source is known
/// to fail. Their timestamps are pinned here and must never be fetched.
static HARDCODED_BLOCK_TIMESTAMPS: Lazy<HashMap<u64, u64>> = Lazy::new(|| {
    HashMap::from([(12_430_756, 1_620_971_896), (12_332_752, 1_619_664_127)])
});

#[derive(Debug, thiserror::Error)]
pub enum ReconstructionError {
    #[error("chain client error: {0}")]
    Client(#[from] goldfinch_eth_client::Error),

    #[error("block {0} not found on chain")]
    MissingBlock(u64),

    #[error("credit line {credit_line:?}: {what}")]
    InvariantViolation { credit_line: Address, what: String },

    #[error("failed to decode payment event: {0}")]
    EventDecode(#[from] ethabi::Error),
}

/// The migration payload for one legacy credit line.
///
/// Terminal once its replay transaction confirms: the legacy line's `limit`
/// and `balance` are zeroed on-chain, and downstream treats "already zeroed"
/// as success rather than migrating twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditLineMigrationRecord {
    pub legacy_address: Address,
    pub owner_address: Address,
    pub term_start_time: u64,
    pub term_end_time: u64,
    pub next_due_time: u64,
    pub interest_accrued_as_of: u64,
    pub last_full_payment_time: u64,
    pub total_interest_paid: U256,
    pub total_principal_paid: U256,
    /// The legacy line's current limit; zero means the line was already
    /// migrated (or never drawn) and there is nothing to replay.
    pub limit: U256,
}

impl CreditLineMigrationRecord {
    pub fn has_anything_to_migrate(&self) -> bool {
        !self.limit.is_zero()
    }

    /// Checks the timestamp invariants the V2 contracts rely on.
    pub fn validate(&self) -> Result<(), ReconstructionError> {
        let violation = |what: &str| ReconstructionError::InvariantViolation {
            credit_line: self.legacy_address,
            what: what.to_owned(),
        };
        if self.term_end_time <= self.term_start_time {
            return Err(violation("termEndTime must be after termStartTime"));
        }
        if self.next_due_time <= self.term_start_time || self.next_due_time > self.term_end_time {
            return Err(violation(
                "nextDueTime must fall within (termStartTime, termEndTime]",
            ));
        }
        if self.interest_accrued_as_of < self.term_start_time
            || self.interest_accrued_as_of > self.term_end_time
        {
            return Err(violation(
                "interestAccruedAsOf must fall within [termStartTime, termEndTime]",
            ));
        }
        Ok(())
    }

    /// The numeric payload handed to the migration agent, in the order its
    /// `migrateCreditLines` entry point expects.
    pub fn migration_data(&self) -> Vec<U256> {
        vec![
            self.term_end_time.into(),
            self.next_due_time.into(),
            self.interest_accrued_as_of.into(),
            self.last_full_payment_time.into(),
            self.total_interest_paid,
            self.total_principal_paid,
        ]
    }
}

/// Reconstructs [`CreditLineMigrationRecord`]s from live chain state.
#[derive(Debug)]
pub struct StateReconstructor<'a> {
    client: &'a dyn EthInterface,
    legacy_pool: &'a ContractHandle,
    credit_line_abi: ethabi::Contract,
    pool_events_abi: ethabi::Contract,
}

impl<'a> StateReconstructor<'a> {
    pub fn new(client: &'a dyn EthInterface, legacy_pool: &'a ContractHandle) -> Self {
        Self {
            client,
            legacy_pool,
            credit_line_abi: credit_line_contract(),
            pool_events_abi: legacy_pool_contract(),
        }
    }

    /// Looks up a block's wall-clock timestamp, honoring the pinned
    /// exceptions before touching the RPC.
    pub async fn get_block_timestamp(&self, block_number: u64) -> Result<u64, ReconstructionError> {
        if let Some(&timestamp) = HARDCODED_BLOCK_TIMESTAMPS.get(&block_number) {
            return Ok(timestamp);
        }
        let block = self
            .client
            .block(BlockId::Number(block_number.into()))
            .await?
            .ok_or(ReconstructionError::MissingBlock(block_number))?;
        Ok(block.timestamp.as_u64())
    }

    async fn credit_line_field(
        &self,
        credit_line: Address,
        field: &str,
    ) -> Result<U256, ReconstructionError> {
        Ok(CallFunctionArgs::new(field, ())
            .for_contract(credit_line, &self.credit_line_abi)
            .call(self.client)
            .await?)
    }

    pub async fn reconstruct(
        &self,
        line: &LegacyCreditLine,
    ) -> Result<CreditLineMigrationRecord, ReconstructionError> {
        let limit = self.credit_line_field(line.address, "limit").await?;
        if limit.is_zero() {
            // Already migrated (limit is zeroed on replay) or never drawn.
            // Still reconstructible so re-runs don't error; downstream skips it.
            return Ok(CreditLineMigrationRecord {
                legacy_address: line.address,
                owner_address: line.owner,
                term_start_time: 0,
                term_end_time: 0,
                next_due_time: 0,
                interest_accrued_as_of: 0,
                last_full_payment_time: 0,
                total_interest_paid: U256::zero(),
                total_principal_paid: U256::zero(),
                limit,
            });
        }

        let (term_end_block, term_in_days, next_due_block, accrued_block, last_payment_block) =
            futures::try_join!(
                self.credit_line_field(line.address, "termEndBlock"),
                self.credit_line_field(line.address, "termInDays"),
                self.credit_line_field(line.address, "nextDueBlock"),
                self.credit_line_field(line.address, "interestAccruedAsOfBlock"),
                self.credit_line_field(line.address, "lastFullPaymentBlock"),
            )?;
        let term_end_block = term_end_block.as_u64();
        let term_in_days = term_in_days.as_u64();

        let term_start_block = term_end_block
            .checked_sub(term_in_days * BLOCKS_PER_DAY)
            .ok_or_else(|| ReconstructionError::InvariantViolation {
                credit_line: line.address,
                what: "termEndBlock precedes the start of its own term".to_owned(),
            })?;
        let term_start_time = self.get_block_timestamp(term_start_block).await?;
        let term_end_time = term_start_time + term_in_days * SECONDS_PER_DAY;

        let next_due_time = project_block_onto_term(
            next_due_block.as_u64(),
            term_start_block,
            term_end_block,
            term_start_time,
            term_in_days,
        );
        let interest_accrued_as_of = project_block_onto_term(
            accrued_block.as_u64(),
            term_start_block,
            term_end_block,
            term_start_time,
            term_in_days,
        );
        let last_full_payment_time = self
            .get_block_timestamp(last_payment_block.as_u64())
            .await?;

        let (total_interest_paid, total_principal_paid) =
            self.total_collected(&line.payers()).await?;

        let record = CreditLineMigrationRecord {
            legacy_address: line.address,
            owner_address: line.owner,
            term_start_time,
            term_end_time,
            next_due_time,
            interest_accrued_as_of,
            last_full_payment_time,
            total_interest_paid,
            total_principal_paid,
            limit,
        };
        record.validate()?;
        Ok(record)
    }

    /// Reconstructs every known legacy credit line concurrently. Each line is
    /// an independent read-only computation, so failures are reported
    /// per-line rather than aborting the whole sweep.
    pub async fn reconstruct_all(
        &self,
        lines: &[LegacyCreditLine],
    ) -> Vec<(
        LegacyCreditLine,
        Result<CreditLineMigrationRecord, ReconstructionError>,
    )> {
        let results = join_all(lines.iter().map(|line| self.reconstruct(line))).await;
        lines.iter().cloned().zip(results).collect()
    }

    /// Sums the legacy pool's `InterestCollected` and `PrincipalCollected`
    /// events for the given payers. Interest counts both the pool-retained and
    /// the reserve-retained portion.
    async fn total_collected(
        &self,
        payers: &[Address],
    ) -> Result<(U256, U256), ReconstructionError> {
        let interest_event = self.pool_events_abi.event("InterestCollected")?;
        let principal_event = self.pool_events_abi.event("PrincipalCollected")?;

        let mut total_interest = U256::zero();
        let mut total_principal = U256::zero();
        for payer in payers {
            for log in self.payer_logs(interest_event.signature(), *payer).await? {
                let parsed = interest_event.parse_log((log.topics, log.data.0).into())?;
                total_interest = total_interest
                    + event_amount(&parsed, "poolAmount")?
                    + event_amount(&parsed, "reserveAmount")?;
            }
            for log in self.payer_logs(principal_event.signature(), *payer).await? {
                let parsed = principal_event.parse_log((log.topics, log.data.0).into())?;
                total_principal = total_principal + event_amount(&parsed, "amount")?;
            }
        }
        Ok((total_interest, total_principal))
    }

    async fn payer_logs(
        &self,
        event_signature: H256,
        payer: Address,
    ) -> Result<Vec<Log>, ReconstructionError> {
        let filter = FilterBuilder::default()
            .address(vec![self.legacy_pool.address])
            .topics(
                Some(vec![event_signature]),
                Some(vec![payer.into()]),
                None,
                None,
            )
            .from_block(BlockNumber::Number(EVENT_SCAN_START_BLOCK.into()))
            .to_block(BlockNumber::Latest)
            .build();
        Ok(self.client.logs(&filter).await?)
    }
}

/// Projects a block's fractional position within the block-denominated term
/// onto the day-denominated term, yielding a wall-clock timestamp.
fn project_block_onto_term(
    block: u64,
    term_start_block: u64,
    term_end_block: u64,
    term_start_time: u64,
    term_in_days: u64,
) -> u64 {
    let elapsed_blocks = block.saturating_sub(term_start_block) as u128;
    let total_blocks = (term_end_block - term_start_block) as u128;
    if total_blocks == 0 {
        return term_start_time;
    }
    let offset_seconds =
        elapsed_blocks * term_in_days as u128 * SECONDS_PER_DAY as u128 / total_blocks;
    term_start_time + offset_seconds as u64
}

fn event_amount(parsed: &ethabi::Log, name: &str) -> Result<U256, ReconstructionError> {
    let param = parsed
        .params
        .iter()
        .find(|param| param.name == name)
        .ok_or_else(|| {
            ReconstructionError::EventDecode(ethabi::Error::InvalidName(name.to_owned()))
        })?;
    param.value.clone().into_uint().ok_or_else(|| {
        ReconstructionError::EventDecode(ethabi::Error::InvalidName(name.to_owned()))
    })
}
