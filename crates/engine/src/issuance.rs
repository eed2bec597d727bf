//! Issuance engine: throughput-limited vesting of new supply.
//!
//! Each account owns an append-only queue of issuance records. A record's
//! availability height is derived from a per-height throughput that is fixed
//! by the first issuance seen at that height:
//!
//! ```text
//! throughput   = max(min_issuance_rate, issuance_rate * total_supply)
//! available_at = max(last_available_at, height - 1) + amount / throughput
//! ```
//!
//! A record settles only while its basket nonce matches the current basket,
//! and only once its availability height has been reached. Records that cannot
//! settle are skipped, never treated as errors.

use std::collections::HashMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use basket_assets::{AssetRegistry, CollateralVault, SupplyLedger, Transfer};
use basket_common::config::EngineConfig;
use basket_common::fixed::{FIX_SCALE, mul_div};
use basket_common::types::{BACKING_CUSTODY, CollateralStatus, ExecutionContext, ISSUANCE_ESCROW, RoundingMode};
use basket_common::{Fix, MathError, ProtocolError, ProtocolResult};

use crate::basket_handler::BasketHandler;
use crate::events::{EventSink, ProtocolEvent};

/// Everything an issuance operation reads or moves besides its own queues.
pub struct IssuanceEnv<'a> {
    pub ctx: ExecutionContext,
    pub basket: &'a BasketHandler,
    pub registry: &'a AssetRegistry,
    pub ledger: &'a mut SupplyLedger,
    pub vault: &'a mut CollateralVault,
    pub events: &'a mut dyn EventSink,
}

/// A pending mint request bound to the basket it was quoted against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceRecord {
    pub issuer: Address,
    /// Issued-token amount to mint on settlement.
    pub amount: Fix,
    /// Basket units this record adds to `baskets_needed`.
    pub baskets: Fix,
    pub erc20s: Vec<Address>,
    /// Raw collateral held in escrow, position-aligned with `erc20s`.
    pub deposits: Vec<u128>,
    pub basket_nonce: u64,
    /// Fractional height at which the record may settle.
    pub available_at: Fix,
    pub processed: bool,
}

impl IssuanceRecord {
    fn is_vestable(&self, nonce: u64, now: Fix) -> bool {
        !self.processed && self.basket_nonce == nonce && self.available_at <= now
    }

    fn transfers_to(&self, to: Address) -> impl Iterator<Item = Transfer> + '_ {
        self.erc20s
            .iter()
            .zip(&self.deposits)
            .filter(|(_, amount)| **amount > 0)
            .map(move |(token, amount)| Transfer {
                token: *token,
                from: ISSUANCE_ESCROW,
                to,
                amount: *amount,
            })
    }
}

/// Outcome of [`IssuanceEngine::issue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueReceipt {
    /// Queue index of the first record appended.
    pub first_index: usize,
    /// Number of records appended (two when the request was split).
    pub records: usize,
    /// Amount settled immediately.
    pub vested: Fix,
}

#[derive(Debug, Clone)]
pub struct IssuanceEngine {
    issuance_rate: Fix,
    min_issuance_rate: Fix,
    queues: HashMap<Address, Vec<IssuanceRecord>>,
    /// Availability height of the most recent record across all accounts.
    all_vest_at: Fix,
    /// Height the current throughput was fixed at, and that throughput.
    rate: Option<(u64, Fix)>,
}

impl IssuanceEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            issuance_rate: config.issuance_rate,
            min_issuance_rate: config.min_issuance_rate,
            queues: HashMap::new(),
            all_vest_at: Fix::ZERO,
            rate: None,
        }
    }

    /// Queue a mint whose collateral is already in escrow.
    ///
    /// If the current height still has throughput headroom smaller than
    /// `amount`, the request is split: the part that fits is available now,
    /// the rest is queued behind it. Due records settle immediately while the
    /// basket is SOUND.
    pub fn issue(
        &mut self,
        env: &mut IssuanceEnv<'_>,
        issuer: Address,
        amount: Fix,
        baskets: Fix,
        erc20s: &[Address],
        deposits: &[u128],
    ) -> ProtocolResult<IssueReceipt> {
        if erc20s.len() != deposits.len() {
            return Err(ProtocolError::Validation(format!(
                "must be same length: {} tokens, {} deposits",
                erc20s.len(),
                deposits.len()
            )));
        }
        if amount.is_zero() {
            return Err(ProtocolError::Validation("Cannot issue zero".into()));
        }

        let height = env.ctx.height;
        let rate = self.rate_at(height, env.ledger.total_supply())?;
        let now = height_to_fix(height);
        let start = self.all_vest_at.max(height_to_fix(height.saturating_sub(1)));
        let nonce = env.basket.nonce();

        let headroom = now.saturating_sub(start).mul(rate, RoundingMode::Floor)?;
        let parts = if !headroom.is_zero() && headroom < amount {
            split(amount, baskets, deposits, headroom)?
        } else {
            vec![(amount, baskets, deposits.to_vec())]
        };

        let mut records = Vec::with_capacity(parts.len());
        let mut available_at = start;
        for (part_amount, part_baskets, part_deposits) in parts {
            available_at = available_at.checked_add(part_amount.div(rate, RoundingMode::Ceil)?)?;
            records.push(IssuanceRecord {
                issuer,
                amount: part_amount,
                baskets: part_baskets,
                erc20s: erc20s.to_vec(),
                deposits: part_deposits,
                basket_nonce: nonce,
                available_at,
                processed: false,
            });
        }

        // Settle what is due before committing anything else.
        let mut due = Vec::new();
        if env.basket.status(env.registry) == CollateralStatus::Sound {
            due = (0..records.len())
                .filter(|&i| records[i].is_vestable(nonce, now))
                .collect();
        }
        let vested = if due.is_empty() {
            Fix::ZERO
        } else {
            settle(env, issuer, due.iter().map(|&i| &records[i]))?
        };
        for &i in &due {
            records[i].processed = true;
        }

        self.rate = Some((height, rate));
        self.all_vest_at = available_at;

        let queue = self.queues.entry(issuer).or_default();
        let first_index = queue.len();
        let count = records.len();
        for (offset, record) in records.into_iter().enumerate() {
            tracing::info!(
                issuer = %issuer,
                index = first_index + offset,
                amount = %record.amount,
                available_at = %record.available_at,
                "Issuance started"
            );
            env.events.emit(ProtocolEvent::IssuanceStarted {
                issuer,
                index: first_index + offset,
                amount: record.amount,
                baskets: record.baskets,
                erc20s: record.erc20s.clone(),
                deposits: record.deposits.clone(),
                available_at: record.available_at,
            });
            queue.push(record);
        }

        for (start, end) in contiguous_runs(&due) {
            env.events.emit(ProtocolEvent::IssuancesCompleted {
                account: issuer,
                start: first_index + start,
                end: first_index + end,
            });
        }

        Ok(IssueReceipt {
            first_index,
            records: count,
            vested,
        })
    }

    /// Settle every vestable record below `end_id` in `account`'s queue.
    ///
    /// Requires a SOUND basket. Returns the total amount settled.
    pub fn vest(&mut self, env: &mut IssuanceEnv<'_>, account: Address, end_id: usize) -> ProtocolResult<Fix> {
        let status = env.basket.status(env.registry);
        if status != CollateralStatus::Sound {
            return Err(ProtocolError::BasketUnsound(status));
        }
        self.check_bound(&account, end_id)?;

        let Some(queue) = self.queues.get_mut(&account) else {
            return Ok(Fix::ZERO);
        };

        let nonce = env.basket.nonce();
        let now = height_to_fix(env.ctx.height);
        let due: Vec<usize> = (0..end_id)
            .filter(|&i| queue[i].is_vestable(nonce, now))
            .collect();
        if due.is_empty() {
            tracing::debug!(account = %account, end_id, "Nothing to vest");
            return Ok(Fix::ZERO);
        }

        let vested = settle(env, account, due.iter().map(|&i| &queue[i]))?;
        for &i in &due {
            queue[i].processed = true;
        }

        tracing::info!(account = %account, records = due.len(), amount = %vested, "Issuances vested");
        for (start, end) in contiguous_runs(&due) {
            env.events.emit(ProtocolEvent::IssuancesCompleted { account, start, end });
        }
        Ok(vested)
    }

    /// Number of leading records whose availability height has been reached.
    ///
    /// Advisory only: it does not check the processed flag or the basket
    /// nonce, so [`vest`](Self::vest) up to this index may settle fewer records.
    pub fn end_id_for_vest(&self, account: &Address, height: u64) -> usize {
        let now = height_to_fix(height);
        self.queue(account)
            .iter()
            .take_while(|record| record.available_at <= now)
            .count()
    }

    /// Refund and close unprocessed records in `[0, end_id)` if `earliest`,
    /// otherwise in `[end_id, len)`.
    ///
    /// Returns refunded amounts summed by deposit position. Already processed
    /// records are left alone, so repeating a call refunds nothing.
    pub fn cancel(
        &mut self,
        env: &mut IssuanceEnv<'_>,
        account: Address,
        end_id: usize,
        earliest: bool,
    ) -> ProtocolResult<Vec<u128>> {
        self.check_bound(&account, end_id)?;
        let Some(queue) = self.queues.get_mut(&account) else {
            return Ok(Vec::new());
        };

        let (first, last) = if earliest {
            (0, end_id)
        } else {
            (end_id, queue.len())
        };
        let open: Vec<usize> = (first..last).filter(|&i| !queue[i].processed).collect();
        if open.is_empty() {
            return Ok(Vec::new());
        }

        let refunded = refund(env, queue, &open)?;

        tracing::info!(account = %account, first, last, records = open.len(), "Issuances canceled");
        for (start, end) in contiguous_runs(&open) {
            env.events.emit(ProtocolEvent::IssuancesCanceled { account, start, end });
        }
        Ok(refunded)
    }

    /// Refund every unprocessed record quoted against an older basket.
    ///
    /// Returns the number of records refunded.
    pub fn refund_stale(&mut self, env: &mut IssuanceEnv<'_>, account: Address) -> ProtocolResult<usize> {
        let stale = self.stale_records(&account, env.basket.nonce());
        if stale.is_empty() {
            return Ok(0);
        }

        env.vault
            .transfer_batch(&self.refund_transfers(&account, &stale))?;
        self.close_refunded(env.events, account, &stale);
        Ok(stale.len())
    }

    /// Indices of `account`'s unprocessed records quoted against a basket
    /// other than `nonce`.
    pub(crate) fn stale_records(&self, account: &Address, nonce: u64) -> Vec<usize> {
        let queue = self.queue(account);
        (0..queue.len())
            .filter(|&i| !queue[i].processed && queue[i].basket_nonce != nonce)
            .collect()
    }

    /// Escrow-to-issuer transfers returning the listed records' deposits.
    pub(crate) fn refund_transfers(&self, account: &Address, indices: &[usize]) -> Vec<Transfer> {
        let queue = self.queue(account);
        indices
            .iter()
            .flat_map(|&i| queue[i].transfers_to(queue[i].issuer))
            .collect()
    }

    /// Close records whose deposits have already been returned.
    pub(crate) fn close_refunded(&mut self, events: &mut dyn EventSink, account: Address, indices: &[usize]) {
        let Some(queue) = self.queues.get_mut(&account) else {
            return;
        };
        for &i in indices {
            queue[i].processed = true;
        }
        for (start, end) in contiguous_runs(indices) {
            events.emit(ProtocolEvent::IssuancesCanceled { account, start, end });
        }
        tracing::info!(account = %account, records = indices.len(), "Stale issuances refunded");
    }

    /// Undo [`close_refunded`](Self::close_refunded) after the refund
    /// transfers were reverted.
    pub(crate) fn reopen(&mut self, account: &Address, indices: &[usize]) {
        if let Some(queue) = self.queues.get_mut(account) {
            for &i in indices {
                queue[i].processed = false;
            }
        }
    }

    pub fn queue(&self, account: &Address) -> &[IssuanceRecord] {
        self.queues.get(account).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn queue_len(&self, account: &Address) -> usize {
        self.queue(account).len()
    }

    pub fn issuance(&self, account: &Address, index: usize) -> Option<&IssuanceRecord> {
        self.queue(account).get(index)
    }

    /// Availability height of the latest record across all accounts.
    pub fn last_availability(&self) -> Fix {
        self.all_vest_at
    }

    /// The height the throughput was last fixed at, and its value.
    pub fn current_rate(&self) -> Option<(u64, Fix)> {
        self.rate
    }

    fn rate_at(&self, height: u64, supply: Fix) -> ProtocolResult<Fix> {
        if let Some((fixed_at, rate)) = self.rate
            && fixed_at == height
        {
            return Ok(rate);
        }
        let proportional = self.issuance_rate.mul(supply, RoundingMode::Floor)?;
        Ok(proportional.max(self.min_issuance_rate))
    }

    fn check_bound(&self, account: &Address, end_id: usize) -> ProtocolResult<()> {
        let len = self.queue_len(account);
        if end_id > len {
            return Err(ProtocolError::IndexOutOfRange { index: end_id, len });
        }
        Ok(())
    }
}

/// Heights are at most `u64::MAX`, so scaling by 10^18 always fits in a `u128`.
fn height_to_fix(height: u64) -> Fix {
    Fix::from_bits(height as u128 * FIX_SCALE)
}

type Part = (Fix, Fix, Vec<u128>);

/// Split a request into a head of `head_amount` and the remaining tail.
///
/// Baskets and deposits are split pro rata, head rounded down, so the two
/// parts always sum to the original.
fn split(amount: Fix, baskets: Fix, deposits: &[u128], head_amount: Fix) -> ProtocolResult<Vec<Part>> {
    let head_baskets = baskets.mul_div(head_amount, amount, RoundingMode::Floor)?;
    let head_deposits = deposits
        .iter()
        .map(|d| mul_div(*d, head_amount.bits(), amount.bits(), RoundingMode::Floor))
        .collect::<Result<Vec<_>, MathError>>()?;
    let tail_deposits = deposits
        .iter()
        .zip(&head_deposits)
        .map(|(d, head)| d - head)
        .collect();

    Ok(vec![
        (head_amount, head_baskets, head_deposits),
        (
            amount.checked_sub(head_amount)?,
            baskets.checked_sub(head_baskets)?,
            tail_deposits,
        ),
    ])
}

/// Move the records' deposits from escrow to backing custody and mint.
///
/// Either both the collateral and the supply move, or neither does.
fn settle<'r>(
    env: &mut IssuanceEnv<'_>,
    account: Address,
    records: impl Iterator<Item = &'r IssuanceRecord>,
) -> ProtocolResult<Fix> {
    let mut amount = Fix::ZERO;
    let mut baskets = Fix::ZERO;
    let mut transfers = Vec::new();
    for record in records {
        amount = amount.checked_add(record.amount)?;
        baskets = baskets.checked_add(record.baskets)?;
        transfers.extend(record.transfers_to(BACKING_CUSTODY));
    }

    env.vault.transfer_batch(&transfers)?;
    if let Err(e) = env.ledger.issue(account, amount, baskets) {
        env.vault.revert_batch(&transfers)?;
        return Err(e);
    }
    Ok(amount)
}

/// Return the listed records' deposits to their issuers and close them.
///
/// Refunds are summed by deposit position, assuming the records share one
/// token ordering.
fn refund(env: &mut IssuanceEnv<'_>, queue: &mut [IssuanceRecord], indices: &[usize]) -> ProtocolResult<Vec<u128>> {
    let mut refunded: Vec<u128> = Vec::new();
    let mut transfers = Vec::new();
    for &i in indices {
        let record = &queue[i];
        if refunded.len() < record.deposits.len() {
            refunded.resize(record.deposits.len(), 0);
        }
        for (pos, amount) in record.deposits.iter().enumerate() {
            refunded[pos] = refunded[pos]
                .checked_add(*amount)
                .ok_or(MathError::Overflow)?;
        }
        transfers.extend(record.transfers_to(record.issuer));
    }

    env.vault.transfer_batch(&transfers)?;
    for &i in indices {
        queue[i].processed = true;
    }
    Ok(refunded)
}

/// Group sorted indices into half-open `[start, end)` runs.
fn contiguous_runs(indices: &[usize]) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &i in indices {
        match runs.last_mut() {
            Some((_, end)) if *end == i => *end = i + 1,
            _ => runs.push((i, i + 1)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use basket_assets::Collateral;
    use chrono::{DateTime, Utc};

    fn fix(s: &str) -> Fix {
        s.parse().unwrap()
    }

    fn token(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    const ALICE: u8 = 0xA1;
    const USDC: u8 = 0x01;

    /// A sound one-token basket, a 10 units/height floor and an empty supply.
    struct Fixture {
        registry: AssetRegistry,
        basket: BasketHandler,
        ledger: SupplyLedger,
        vault: CollateralVault,
        events: Vec<ProtocolEvent>,
        engine: IssuanceEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let config = EngineConfig {
                issuance_rate: fix("0.1"),
                min_issuance_rate: fix("10"),
                ..EngineConfig::default()
            };
            let mut registry = AssetRegistry::new();
            registry
                .register(Collateral::fiat(token(USDC), 18, "USD", Fix::ONE))
                .unwrap();
            let mut basket = BasketHandler::new(&config);
            let mut events = Vec::new();
            basket
                .set_prime_basket(&registry, &[token(USDC)], &[Fix::ONE], &mut events)
                .unwrap();
            let ctx = ExecutionContext::new(1, DateTime::<Utc>::UNIX_EPOCH);
            basket.switch_basket(&mut registry, &ctx, &mut events).unwrap();
            events.clear();

            Self {
                registry,
                basket,
                ledger: SupplyLedger::new(),
                vault: CollateralVault::new(),
                events,
                engine: IssuanceEngine::new(&config),
            }
        }

        fn env(&mut self, height: u64) -> (&mut IssuanceEngine, IssuanceEnv<'_>) {
            let env = IssuanceEnv {
                ctx: ExecutionContext::new(height, DateTime::<Utc>::UNIX_EPOCH),
                basket: &self.basket,
                registry: &self.registry,
                ledger: &mut self.ledger,
                vault: &mut self.vault,
                events: &mut self.events,
            };
            (&mut self.engine, env)
        }

        /// Escrow `raw` collateral and queue `amount` at `height`.
        fn issue(&mut self, height: u64, amount: &str, raw: u128) -> IssueReceipt {
            self.vault.deposit(token(USDC), ISSUANCE_ESCROW, raw).unwrap();
            let amount = fix(amount);
            let (engine, mut env) = self.env(height);
            engine
                .issue(&mut env, token(ALICE), amount, amount, &[token(USDC)], &[raw])
                .unwrap()
        }
    }

    #[test]
    fn test_small_issue_vests_immediately() {
        let mut f = Fixture::new();
        let receipt = f.issue(100, "5", 5);

        assert_eq!(receipt.records, 1);
        assert_eq!(receipt.vested, fix("5"));
        assert_eq!(f.ledger.balance_of(&token(ALICE)), fix("5"));
        assert_eq!(f.vault.balance_of(&token(USDC), &BACKING_CUSTODY), 5);
        assert!(f.engine.issuance(&token(ALICE), 0).unwrap().processed);
    }

    #[test]
    fn test_throughput_is_fixed_for_the_height() {
        let mut f = Fixture::new();
        f.issue(100, "5", 5);
        assert_eq!(f.engine.current_rate(), Some((100, fix("10"))));

        // Supply is now 5, but 0.1 * 5 < 10 anyway; the rate stays fixed at this height.
        f.issue(100, "20", 20);
        assert_eq!(f.engine.current_rate(), Some((100, fix("10"))));
    }

    #[test]
    fn test_large_issue_is_split_at_headroom() {
        let mut f = Fixture::new();
        let receipt = f.issue(100, "100", 1000);

        assert_eq!(receipt.records, 2);
        assert_eq!(receipt.vested, fix("10"));

        let head = f.engine.issuance(&token(ALICE), 0).unwrap();
        let tail = f.engine.issuance(&token(ALICE), 1).unwrap();
        assert_eq!(head.deposits, vec![100]);
        assert_eq!(tail.deposits, vec![900]);
        assert_eq!(head.available_at, fix("100"));
        assert_eq!(tail.available_at, fix("109"));
        assert!(!tail.processed);
    }

    #[test]
    fn test_availability_is_non_decreasing_across_requests() {
        let mut f = Fixture::new();
        f.issue(100, "30", 30);
        f.issue(100, "25", 25);
        f.issue(101, "7", 7);

        let heights: Vec<Fix> = f
            .engine
            .queue(&token(ALICE))
            .iter()
            .map(|r| r.available_at)
            .collect();
        assert!(heights.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(f.engine.last_availability(), *heights.last().unwrap());
    }

    #[test]
    fn test_vest_skips_records_not_yet_due() {
        let mut f = Fixture::new();
        f.issue(100, "100", 100);

        let (engine, mut env) = f.env(105);
        assert_eq!(engine.vest(&mut env, token(ALICE), 2).unwrap(), Fix::ZERO);

        let (engine, mut env) = f.env(109);
        assert_eq!(engine.vest(&mut env, token(ALICE), 2).unwrap(), fix("90"));
        assert_eq!(f.ledger.total_supply(), fix("100"));
        assert_eq!(f.ledger.baskets_needed(), fix("100"));
    }

    #[test]
    fn test_vest_rejects_out_of_range_end() {
        let mut f = Fixture::new();
        f.issue(100, "5", 5);
        let (engine, mut env) = f.env(100);
        assert_eq!(
            engine.vest(&mut env, token(ALICE), 3).unwrap_err(),
            ProtocolError::IndexOutOfRange { index: 3, len: 1 }
        );
    }

    #[test]
    fn test_end_id_for_vest_ignores_processed_flag() {
        let mut f = Fixture::new();
        f.issue(100, "100", 100);

        // Head is processed already, tail not yet due.
        assert_eq!(f.engine.end_id_for_vest(&token(ALICE), 100), 1);
        assert_eq!(f.engine.end_id_for_vest(&token(ALICE), 109), 2);
        assert_eq!(f.engine.end_id_for_vest(&token(0xEE), 109), 0);
    }

    #[test]
    fn test_cancel_latest_refunds_pending_tail() {
        let mut f = Fixture::new();
        f.issue(100, "100", 1000);

        let (engine, mut env) = f.env(101);
        let refunded = engine.cancel(&mut env, token(ALICE), 1, false).unwrap();
        assert_eq!(refunded, vec![900]);
        assert_eq!(f.vault.balance_of(&token(USDC), &token(ALICE)), 900);

        // Processed head is untouched; repeat is a no-op.
        let (engine, mut env) = f.env(101);
        assert!(engine.cancel(&mut env, token(ALICE), 0, false).unwrap().is_empty());
        assert_eq!(f.vault.balance_of(&token(USDC), &token(ALICE)), 900);
    }

    #[test]
    fn test_issue_rejects_mismatched_deposits() {
        let mut f = Fixture::new();
        let (engine, mut env) = f.env(100);
        let err = engine
            .issue(&mut env, token(ALICE), fix("1"), fix("1"), &[token(USDC)], &[])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Validation(_)));
        assert_eq!(engine.queue_len(&token(ALICE)), 0);
        assert_eq!(engine.current_rate(), None);
    }

    #[test]
    fn test_failed_settlement_leaves_no_trace() {
        let mut f = Fixture::new();
        // Nothing escrowed: the immediate settlement cannot move collateral.
        let (engine, mut env) = f.env(100);
        let err = engine
            .issue(&mut env, token(ALICE), fix("5"), fix("5"), &[token(USDC)], &[5])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InsufficientBalance { .. }));
        assert_eq!(engine.queue_len(&token(ALICE)), 0);
        assert_eq!(engine.last_availability(), Fix::ZERO);
        assert!(f.events.is_empty());
    }

    /// Queue `[processed, pending, processed, processed, pending]` for Alice.
    fn interleaved() -> Fixture {
        let mut f = Fixture::new();
        f.issue(100, "10", 10);
        f.issue(100, "10", 10);
        f.issue(103, "5", 5);
        // Headroom at 103 is 5: the head settles now, the tail at 104.5.
        assert_eq!(f.issue(103, "20", 20).records, 2);

        let open: Vec<bool> = f
            .engine
            .queue(&token(ALICE))
            .iter()
            .map(|r| !r.processed)
            .collect();
        assert_eq!(open, vec![false, true, false, false, true]);
        f.events.clear();
        f
    }

    fn ranges(events: &[ProtocolEvent]) -> Vec<(usize, usize)> {
        events
            .iter()
            .filter_map(|e| match e {
                ProtocolEvent::IssuancesCompleted { start, end, .. }
                | ProtocolEvent::IssuancesCanceled { start, end, .. } => Some((*start, *end)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_vest_reports_only_settled_runs() {
        let mut f = interleaved();
        let (engine, mut env) = f.env(110);
        assert_eq!(engine.vest(&mut env, token(ALICE), 5).unwrap(), fix("25"));
        assert_eq!(ranges(&f.events), vec![(1, 2), (4, 5)]);
    }

    #[test]
    fn test_cancel_reports_only_refunded_runs() {
        let mut f = interleaved();
        let (engine, mut env) = f.env(104);
        assert_eq!(engine.cancel(&mut env, token(ALICE), 0, false).unwrap(), vec![25]);
        assert_eq!(ranges(&f.events), vec![(1, 2), (4, 5)]);
        assert_eq!(f.vault.balance_of(&token(USDC), &token(ALICE)), 25);
    }

    #[test]
    fn test_contiguous_runs() {
        assert_eq!(contiguous_runs(&[0, 1, 2, 5, 7, 8]), vec![(0, 3), (5, 6), (7, 9)]);
        assert!(contiguous_runs(&[]).is_empty());
    }
}
