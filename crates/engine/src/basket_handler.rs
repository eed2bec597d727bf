//! Basket engine. Owns the governance-set prime/backup configuration and the
//! realized basket, and re-derives the basket from configuration plus live
//! collateral health.
//!
//! A switch is a single deterministic pass:
//! 1. refresh every prime collateral
//! 2. group prime weights by target name, in first-seen order
//! 3. keep every registered prime token that is not DISABLED
//! 4. for each target with lost weight, pick backups in configured order,
//!    skipping unregistered and DISABLED candidates, up to the configured max
//! 5. spread the lost weight evenly over the picked backups
//!
//! If some target has lost weight but no eligible backup, the switch fails and
//! the realized basket is left as it was.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use basket_assets::{AssetRegistry, CollateralVault, StatusChange, SupplyLedger};
use basket_common::config::EngineConfig;
use basket_common::types::{CollateralStatus, ExecutionContext, RoundingMode, TargetName};
use basket_common::{Fix, ProtocolError, ProtocolResult};

use crate::basket::{Basket, BasketBuilder};
use crate::events::{EventSink, ProtocolEvent};

/// One prime basket entry: target units per basket unit, and the target it tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrimeEntry {
    pub target_amt: Fix,
    pub target_name: TargetName,
}

/// Backup candidates for one target name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupConfig {
    /// Maximum number of backups used at once.
    pub max: usize,
    /// Candidates in priority order.
    pub erc20s: Vec<Address>,
}

/// Deposit (or payout) sizes for a number of basket units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub erc20s: Vec<Address>,
    pub quantities: Vec<u128>,
}

/// Per-target weight bookkeeping during a switch.
#[derive(Debug, Clone, Copy, Default)]
struct TargetWeights {
    total: Fix,
    good: Fix,
}

#[derive(Debug, Clone)]
pub struct BasketHandler {
    max_basket_size: usize,
    max_backup_erc20s: usize,
    prime: IndexMap<Address, PrimeEntry>,
    backups: IndexMap<TargetName, BackupConfig>,
    basket: Basket,
}

impl BasketHandler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_basket_size: config.max_basket_size,
            max_backup_erc20s: config.max_backup_erc20s,
            prime: IndexMap::new(),
            backups: IndexMap::new(),
            basket: Basket::default(),
        }
    }

    // ───────────────────────────── governance ──────────────────────────────

    /// Replace the prime basket configuration.
    ///
    /// Fails without changing anything if the lists differ in length, are
    /// empty or too long, repeat a token, or name a token that is not
    /// registered collateral.
    pub fn set_prime_basket(
        &mut self,
        registry: &AssetRegistry,
        erc20s: &[Address],
        target_amts: &[Fix],
        events: &mut dyn EventSink,
    ) -> ProtocolResult<()> {
        if erc20s.len() != target_amts.len() {
            return Err(ProtocolError::Validation(format!(
                "must be same length: {} tokens, {} weights",
                erc20s.len(),
                target_amts.len()
            )));
        }
        if erc20s.is_empty() {
            return Err(ProtocolError::Validation("prime basket cannot be empty".into()));
        }
        if erc20s.len() > self.max_basket_size {
            return Err(ProtocolError::Validation(format!(
                "prime basket too large: {} > {}",
                erc20s.len(),
                self.max_basket_size
            )));
        }

        let mut prime = IndexMap::with_capacity(erc20s.len());
        for (erc20, target_amt) in erc20s.iter().zip(target_amts) {
            let coll = registry.to_collateral(erc20)?;
            let entry = PrimeEntry {
                target_amt: *target_amt,
                target_name: coll.target_name().clone(),
            };
            if prime.insert(*erc20, entry).is_some() {
                return Err(ProtocolError::Validation(format!(
                    "duplicate token in prime basket: {}",
                    erc20
                )));
            }
        }

        let target_names = prime.values().map(|e| e.target_name.clone()).collect();
        self.prime = prime;

        tracing::info!(size = erc20s.len(), "Prime basket set");
        events.emit(ProtocolEvent::PrimeBasketSet {
            erc20s: erc20s.to_vec(),
            target_amts: target_amts.to_vec(),
            target_names,
        });
        Ok(())
    }

    /// Replace the backup candidates and cap for one target name.
    pub fn set_backup_config(
        &mut self,
        target_name: TargetName,
        max: usize,
        erc20s: &[Address],
        events: &mut dyn EventSink,
    ) -> ProtocolResult<()> {
        if erc20s.len() > self.max_backup_erc20s {
            return Err(ProtocolError::Validation(format!(
                "too many backup candidates: {} > {}",
                erc20s.len(),
                self.max_backup_erc20s
            )));
        }
        for (i, erc20) in erc20s.iter().enumerate() {
            if erc20s[..i].contains(erc20) {
                return Err(ProtocolError::Validation(format!(
                    "duplicate backup candidate: {}",
                    erc20
                )));
            }
        }

        self.backups.insert(
            target_name.clone(),
            BackupConfig {
                max,
                erc20s: erc20s.to_vec(),
            },
        );

        tracing::info!(target = %target_name, max, candidates = erc20s.len(), "Backup config set");
        events.emit(ProtocolEvent::BackupConfigSet {
            target_name,
            max,
            erc20s: erc20s.to_vec(),
        });
        Ok(())
    }

    // ───────────────────────────── switching ──────────────────────────────

    /// Refresh every registered collateral; switch the basket if it is DISABLED.
    ///
    /// Returns whether a new basket was committed.
    pub fn ensure_basket(
        &mut self,
        registry: &mut AssetRegistry,
        ctx: &ExecutionContext,
        events: &mut dyn EventSink,
    ) -> ProtocolResult<bool> {
        let snapshot = registry.clone();
        let mut pending = Vec::new();

        let result = self.ensure_inner(registry, ctx.timestamp, &mut pending);
        finish(result, registry, snapshot, pending, events)
    }

    fn ensure_inner(
        &mut self,
        registry: &mut AssetRegistry,
        now: DateTime<Utc>,
        pending: &mut Vec<ProtocolEvent>,
    ) -> ProtocolResult<bool> {
        let changes = registry.force_updates(now)?;
        record_status_changes(&changes, pending);

        if self.status(registry) == CollateralStatus::Disabled {
            self.switch_inner(registry, now, pending)
        } else {
            Ok(false)
        }
    }

    /// Rebuild the basket from configuration and current collateral health.
    ///
    /// Returns whether a new basket was committed. `Ok(false)` means some
    /// target has lost weight but no eligible backup; the previous basket
    /// stays in place.
    pub fn switch_basket(
        &mut self,
        registry: &mut AssetRegistry,
        ctx: &ExecutionContext,
        events: &mut dyn EventSink,
    ) -> ProtocolResult<bool> {
        let snapshot = registry.clone();
        let mut pending = Vec::new();
        let result = self.switch_inner(registry, ctx.timestamp, &mut pending);
        finish(result, registry, snapshot, pending, events)
    }

    fn switch_inner(
        &mut self,
        registry: &mut AssetRegistry,
        now: DateTime<Utc>,
        pending: &mut Vec<ProtocolEvent>,
    ) -> ProtocolResult<bool> {
        let prime_erc20s: Vec<Address> = self.prime.keys().copied().collect();
        let changes = registry.refresh_many(&prime_erc20s, now)?;
        record_status_changes(&changes, pending);
        let registry: &AssetRegistry = registry;

        let mut targets: IndexMap<TargetName, TargetWeights> = IndexMap::new();
        for entry in self.prime.values() {
            targets.entry(entry.target_name.clone()).or_default();
        }

        let mut candidate = BasketBuilder::default();
        for (erc20, entry) in &self.prime {
            if !registry.is_registered(erc20) {
                continue;
            }
            let weights = targets.entry(entry.target_name.clone()).or_default();
            weights.total = weights.total.checked_add(entry.target_amt)?;

            if is_good_collateral(registry, erc20) {
                weights.good = weights.good.checked_add(entry.target_amt)?;
                let coll = registry.to_collateral(erc20)?;
                let ref_amt = entry.target_amt.div(coll.target_per_ref(), RoundingMode::Ceil)?;
                candidate.add(*erc20, ref_amt)?;
            }
        }

        for (target_name, weights) in &targets {
            if weights.total <= weights.good {
                continue;
            }
            let deficit = weights.total.checked_sub(weights.good)?;

            let selected: Vec<Address> = match self.backups.get(target_name) {
                Some(backup) => backup
                    .erc20s
                    .iter()
                    .filter(|erc20| is_good_collateral(registry, erc20))
                    .take(backup.max)
                    .copied()
                    .collect(),
                None => Vec::new(),
            };

            if selected.is_empty() {
                tracing::warn!(
                    target = %target_name,
                    deficit = %deficit,
                    "No eligible backup collateral; basket unchanged"
                );
                return Ok(false);
            }

            let share = deficit.div_int(selected.len() as u128, RoundingMode::Floor)?;
            for erc20 in &selected {
                let coll = registry.to_collateral(erc20)?;
                let ref_amt = share.div(coll.target_per_ref(), RoundingMode::Ceil)?;
                candidate.add(*erc20, ref_amt)?;
            }
        }

        if candidate.is_empty() {
            tracing::warn!("Candidate basket is empty; basket unchanged");
            return Ok(false);
        }

        candidate.commit(&mut self.basket, now);

        tracing::info!(
            nonce = self.basket.nonce(),
            erc20s = self.basket.len(),
            "Basket switched"
        );
        pending.push(ProtocolEvent::BasketSet {
            erc20s: self.basket.erc20s(),
            ref_amts: self.basket.ref_amts(),
            nonce: self.basket.nonce(),
        });
        Ok(true)
    }

    // ───────────────────────────── views ──────────────────────────────

    /// Worst status among basket tokens. DISABLED if a basket token is no
    /// longer registered collateral, or if no basket has been committed yet.
    pub fn status(&self, registry: &AssetRegistry) -> CollateralStatus {
        if self.basket.is_empty() {
            return CollateralStatus::Disabled;
        }

        let mut status = CollateralStatus::Sound;
        for (erc20, _) in self.basket.iter() {
            let Ok(coll) = registry.to_collateral(erc20) else {
                return CollateralStatus::Disabled;
            };
            status = status.worse_of(coll.status());
            if status == CollateralStatus::Disabled {
                return status;
            }
        }
        status
    }

    /// Whole tokens of `erc20` per basket unit; zero if the token is not in
    /// the basket, not registered, or not collateral.
    pub fn quantity(&self, registry: &AssetRegistry, erc20: &Address) -> ProtocolResult<Fix> {
        let Some(ref_amt) = self.basket.ref_amt(erc20) else {
            return Ok(Fix::ZERO);
        };
        let Ok(coll) = registry.to_collateral(erc20) else {
            return Ok(Fix::ZERO);
        };
        Ok(ref_amt.div(coll.ref_per_tok(), RoundingMode::Ceil)?)
    }

    /// Unit-of-account value of one basket unit, ignoring DISABLED tokens.
    pub fn price(&self, registry: &AssetRegistry) -> ProtocolResult<Fix> {
        let mut total = Fix::ZERO;
        for (erc20, _) in self.basket.iter() {
            let Ok(coll) = registry.to_collateral(erc20) else {
                continue;
            };
            if coll.status() == CollateralStatus::Disabled {
                continue;
            }
            let qty = self.quantity(registry, erc20)?;
            total = total.checked_add(coll.price()?.mul(qty, RoundingMode::Floor)?)?;
        }
        Ok(total)
    }

    /// Raw token amounts making up `baskets` basket units.
    pub fn quote(
        &self,
        registry: &AssetRegistry,
        baskets: Fix,
        rounding: RoundingMode,
    ) -> ProtocolResult<Quote> {
        let mut quote = Quote::default();
        for (erc20, _) in self.basket.iter() {
            let raw = match registry.to_collateral(erc20) {
                Ok(coll) => {
                    let amount = baskets.mul(self.quantity(registry, erc20)?, rounding)?;
                    coll.to_raw(amount, rounding)?
                }
                Err(_) => 0,
            };
            quote.erc20s.push(*erc20);
            quote.quantities.push(raw);
        }
        Ok(quote)
    }

    /// How many whole basket units `account`'s balances cover.
    ///
    /// Returns [`Fix::MAX`] when no basket token has a nonzero quantity.
    pub fn baskets_held_by(
        &self,
        registry: &AssetRegistry,
        vault: &CollateralVault,
        account: &Address,
    ) -> ProtocolResult<Fix> {
        let mut baskets = Fix::MAX;
        for (erc20, _) in self.basket.iter() {
            let qty = self.quantity(registry, erc20)?;
            if qty.is_zero() {
                continue;
            }
            let coll = registry.to_collateral(erc20)?;
            let balance = coll.to_fix(vault.balance_of(erc20, account))?;
            baskets = baskets.min(balance.div(qty, RoundingMode::Floor)?);
        }
        Ok(baskets)
    }

    /// Whether `custody` holds enough collateral for every basket unit owed.
    pub fn fully_capitalized(
        &self,
        registry: &AssetRegistry,
        vault: &CollateralVault,
        ledger: &SupplyLedger,
        custody: &Address,
    ) -> ProtocolResult<bool> {
        Ok(self.baskets_held_by(registry, vault, custody)? >= ledger.baskets_needed())
    }

    pub fn nonce(&self) -> u64 {
        self.basket.nonce()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.basket.timestamp()
    }

    pub fn basket(&self) -> &Basket {
        &self.basket
    }

    pub fn prime_config(&self) -> &IndexMap<Address, PrimeEntry> {
        &self.prime
    }

    pub fn backup_config(&self, target_name: &TargetName) -> Option<&BackupConfig> {
        self.backups.get(target_name)
    }
}

fn is_good_collateral(registry: &AssetRegistry, erc20: &Address) -> bool {
    registry
        .to_collateral(erc20)
        .is_ok_and(|coll| coll.status() != CollateralStatus::Disabled)
}

fn record_status_changes(changes: &[StatusChange], pending: &mut Vec<ProtocolEvent>) {
    pending.extend(changes.iter().copied().map(ProtocolEvent::from));
}

/// Commit buffered events on success; restore the registry on failure.
fn finish(
    result: ProtocolResult<bool>,
    registry: &mut AssetRegistry,
    snapshot: AssetRegistry,
    pending: Vec<ProtocolEvent>,
    events: &mut dyn EventSink,
) -> ProtocolResult<bool> {
    match result {
        Ok(switched) => {
            for event in pending {
                events.emit(event);
            }
            Ok(switched)
        }
        Err(e) => {
            *registry = snapshot;
            Err(e)
        }
    }
}
