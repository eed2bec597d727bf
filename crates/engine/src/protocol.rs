//! One protocol instance: the registry, both engines, the supply ledger, the
//! collateral vault and the event log, driven through a single entry point.
//!
//! Every public mutating operation is all-or-nothing. The engines, ledger and
//! vault validate before they commit; a failing operation undoes its own
//! earlier steps, and [`Protocol::transact`] restores the registry and the
//! event log.

use alloy_primitives::Address;

use basket_assets::{Asset, AssetRegistry, Collateral, CollateralVault, SupplyLedger, Transfer};
use basket_common::config::EngineConfig;
use basket_common::types::{BACKING_CUSTODY, CollateralStatus, ExecutionContext, ISSUANCE_ESCROW, RoundingMode, TargetName};
use basket_common::{Fix, ProtocolError, ProtocolResult};

use crate::basket_handler::{BasketHandler, Quote};
use crate::events::{EventLog, EventSink, ProtocolEvent};
use crate::issuance::{IssuanceEngine, IssuanceEnv, IssueReceipt};

#[derive(Debug, Clone)]
pub struct Protocol {
    config: EngineConfig,
    registry: AssetRegistry,
    basket: BasketHandler,
    issuance: IssuanceEngine,
    ledger: SupplyLedger,
    vault: CollateralVault,
    events: EventLog,
}

/// State captured before a mutating call. Sized by the registered assets,
/// never by issuance history.
struct Checkpoint {
    registry: AssetRegistry,
    events: usize,
}

impl Protocol {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: AssetRegistry::new(),
            basket: BasketHandler::new(&config),
            issuance: IssuanceEngine::new(&config),
            ledger: SupplyLedger::new(),
            vault: CollateralVault::new(),
            events: EventLog::new(),
            config,
        }
    }

    // ───────────────────────────── assets ──────────────────────────────

    /// Register an asset. Returns `false` if it was already registered.
    pub fn register_asset(&mut self, asset: impl Into<Asset>) -> ProtocolResult<bool> {
        let asset = asset.into();
        let (erc20, collateral) = (asset.erc20(), asset.is_collateral());
        let added = self.registry.register(asset)?;
        if added {
            tracing::info!(erc20 = %erc20, collateral, "Asset registered");
            self.events.emit(ProtocolEvent::AssetRegistered { erc20, collateral });
        }
        Ok(added)
    }

    /// Replace a registered asset, returning the previous one.
    pub fn swap_registered_asset(&mut self, asset: impl Into<Asset>) -> ProtocolResult<Asset> {
        let asset = asset.into();
        let (erc20, collateral) = (asset.erc20(), asset.is_collateral());
        let previous = self.registry.swap_registered(asset)?;
        tracing::info!(erc20 = %erc20, collateral, "Asset swapped");
        self.events.emit(ProtocolEvent::AssetRegistered { erc20, collateral });
        Ok(previous)
    }

    pub fn unregister_asset(&mut self, erc20: Address) -> ProtocolResult<Asset> {
        let previous = self.registry.unregister(erc20)?;
        tracing::info!(erc20 = %erc20, "Asset unregistered");
        self.events.emit(ProtocolEvent::AssetUnregistered { erc20 });
        Ok(previous)
    }

    /// Mutable access to a collateral's feed and accrual state.
    pub fn collateral_mut(&mut self, erc20: &Address) -> ProtocolResult<&mut Collateral> {
        self.registry.to_collateral_mut(erc20)
    }

    /// Credit `amount` raw units of `token` to `account` from outside the protocol.
    pub fn fund(&mut self, token: Address, account: Address, amount: u128) -> ProtocolResult<()> {
        self.vault.deposit(token, account, amount)
    }

    // ───────────────────────────── basket ──────────────────────────────

    pub fn set_prime_basket(&mut self, erc20s: &[Address], target_amts: &[Fix]) -> ProtocolResult<()> {
        self.basket
            .set_prime_basket(&self.registry, erc20s, target_amts, &mut self.events)
    }

    pub fn set_backup_config(
        &mut self,
        target_name: impl Into<TargetName>,
        max: usize,
        erc20s: &[Address],
    ) -> ProtocolResult<()> {
        self.basket
            .set_backup_config(target_name.into(), max, erc20s, &mut self.events)
    }

    pub fn ensure_basket(&mut self, ctx: &ExecutionContext) -> ProtocolResult<bool> {
        self.basket
            .ensure_basket(&mut self.registry, ctx, &mut self.events)
    }

    pub fn switch_basket(&mut self, ctx: &ExecutionContext) -> ProtocolResult<bool> {
        self.basket
            .switch_basket(&mut self.registry, ctx, &mut self.events)
    }

    pub fn status(&self) -> CollateralStatus {
        self.basket.status(&self.registry)
    }

    pub fn quantity(&self, erc20: &Address) -> ProtocolResult<Fix> {
        self.basket.quantity(&self.registry, erc20)
    }

    pub fn price(&self) -> ProtocolResult<Fix> {
        self.basket.price(&self.registry)
    }

    pub fn quote(&self, baskets: Fix, rounding: RoundingMode) -> ProtocolResult<Quote> {
        self.basket.quote(&self.registry, baskets, rounding)
    }

    pub fn baskets_held_by(&self, account: &Address) -> ProtocolResult<Fix> {
        self.basket
            .baskets_held_by(&self.registry, &self.vault, account)
    }

    /// Whether backing custody covers every basket unit owed to holders.
    pub fn fully_capitalized(&self) -> ProtocolResult<bool> {
        self.basket
            .fully_capitalized(&self.registry, &self.vault, &self.ledger, &BACKING_CUSTODY)
    }

    // ───────────────────────────── issuance ──────────────────────────────

    /// Mint `amount` issued tokens against the current basket.
    ///
    /// Refreshes collateral, requires a SOUND basket, refunds the issuer's
    /// records from older baskets, then escrows the quoted deposits and
    /// queues the request. The refunds and the deposits move as one batch.
    pub fn issue(&mut self, issuer: Address, amount: Fix, ctx: &ExecutionContext) -> ProtocolResult<IssueReceipt> {
        self.transact(|p| {
            p.refresh_all(ctx)?;
            p.require_status(|status| status == CollateralStatus::Sound)?;

            let supply = p.ledger.total_supply();
            let baskets = if supply.is_zero() {
                amount
            } else {
                amount.mul_div(p.ledger.baskets_needed(), supply, RoundingMode::Ceil)?
            };
            let quote = p.basket.quote(&p.registry, baskets, RoundingMode::Ceil)?;

            let stale = p.issuance.stale_records(&issuer, p.basket.nonce());
            let mut moves = p.issuance.refund_transfers(&issuer, &stale);
            moves.extend(transfers(&quote, issuer, ISSUANCE_ESCROW));
            p.vault.transfer_batch(&moves)?;
            if !stale.is_empty() {
                p.issuance.close_refunded(&mut p.events, issuer, &stale);
            }

            tracing::info!(issuer = %issuer, amount = %amount, baskets = %baskets, "Issuance requested");
            let (engine, mut env) = p.issuance_env(*ctx);
            let result = engine.issue(&mut env, issuer, amount, baskets, &quote.erc20s, &quote.quantities);
            if result.is_err() {
                p.issuance.reopen(&issuer, &stale);
                p.vault.revert_batch(&moves)?;
            }
            result
        })
    }

    /// Settle `account`'s due records below `end_id`.
    pub fn vest(&mut self, account: Address, end_id: usize, ctx: &ExecutionContext) -> ProtocolResult<Fix> {
        self.transact(|p| {
            p.refresh_all(ctx)?;
            let (engine, mut env) = p.issuance_env(*ctx);
            engine.vest(&mut env, account, end_id)
        })
    }

    /// Advisory end index for [`vest`](Self::vest) at `height`.
    pub fn end_id_for_vest(&self, account: &Address, height: u64) -> usize {
        self.issuance.end_id_for_vest(account, height)
    }

    pub fn cancel(
        &mut self,
        account: Address,
        end_id: usize,
        earliest: bool,
        ctx: &ExecutionContext,
    ) -> ProtocolResult<Vec<u128>> {
        self.transact(|p| {
            let (engine, mut env) = p.issuance_env(*ctx);
            engine.cancel(&mut env, account, end_id, earliest)
        })
    }

    /// Refund `account`'s records quoted against an older basket.
    pub fn refund_stale(&mut self, account: Address, ctx: &ExecutionContext) -> ProtocolResult<usize> {
        self.transact(|p| {
            let (engine, mut env) = p.issuance_env(*ctx);
            engine.refund_stale(&mut env, account)
        })
    }

    /// Burn `amount` issued tokens and pay out the matching basket share
    /// from backing custody.
    pub fn redeem(&mut self, redeemer: Address, amount: Fix, ctx: &ExecutionContext) -> ProtocolResult<Quote> {
        if amount.is_zero() {
            return Err(ProtocolError::Validation("Cannot redeem zero".into()));
        }
        self.transact(|p| {
            p.refresh_all(ctx)?;
            p.require_status(|status| status != CollateralStatus::Disabled)?;

            let have = p.ledger.balance_of(&redeemer);
            if have < amount {
                return Err(ProtocolError::InsufficientSupply {
                    account: redeemer,
                    have,
                    need: amount,
                });
            }

            let baskets = amount.mul_div(p.ledger.baskets_needed(), p.ledger.total_supply(), RoundingMode::Floor)?;
            let quote = p.basket.quote(&p.registry, baskets, RoundingMode::Floor)?;
            let payout = transfers(&quote, BACKING_CUSTODY, redeemer);
            p.vault.transfer_batch(&payout)?;
            if let Err(e) = p.ledger.redeem(redeemer, amount, baskets) {
                p.vault.revert_batch(&payout)?;
                return Err(e);
            }

            tracing::info!(redeemer = %redeemer, amount = %amount, baskets = %baskets, "Redemption");
            p.events.emit(ProtocolEvent::Redemption {
                redeemer,
                amount,
                baskets,
                erc20s: quote.erc20s.clone(),
                quantities: quote.quantities.clone(),
            });
            Ok(quote)
        })
    }

    // ───────────────────────────── accessors ──────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    pub fn basket_handler(&self) -> &BasketHandler {
        &self.basket
    }

    pub fn issuance(&self) -> &IssuanceEngine {
        &self.issuance
    }

    pub fn ledger(&self) -> &SupplyLedger {
        &self.ledger
    }

    pub fn vault(&self) -> &CollateralVault {
        &self.vault
    }

    pub fn events(&self) -> &[ProtocolEvent] {
        self.events.events()
    }

    pub fn drain_events(&mut self) -> Vec<ProtocolEvent> {
        self.events.drain()
    }

    // ───────────────────────────── internals ──────────────────────────────

    fn issuance_env(&mut self, ctx: ExecutionContext) -> (&mut IssuanceEngine, IssuanceEnv<'_>) {
        let env = IssuanceEnv {
            ctx,
            basket: &self.basket,
            registry: &self.registry,
            ledger: &mut self.ledger,
            vault: &mut self.vault,
            events: &mut self.events,
        };
        (&mut self.issuance, env)
    }

    fn refresh_all(&mut self, ctx: &ExecutionContext) -> ProtocolResult<()> {
        for change in self.registry.force_updates(ctx.timestamp)? {
            if change.new == CollateralStatus::Disabled {
                tracing::warn!(erc20 = %change.erc20, old = %change.old, "Collateral defaulted");
            }
            self.events.emit(change.into());
        }
        Ok(())
    }

    fn require_status(&self, allowed: impl Fn(CollateralStatus) -> bool) -> ProtocolResult<()> {
        let status = self.status();
        if !allowed(status) {
            return Err(ProtocolError::BasketUnsound(status));
        }
        Ok(())
    }

    /// Run `op`, restoring refreshed collateral state and the event log if
    /// it fails. `op` must leave the engines, ledger and vault untouched on
    /// error.
    fn transact<T>(&mut self, op: impl FnOnce(&mut Self) -> ProtocolResult<T>) -> ProtocolResult<T> {
        let checkpoint = Checkpoint {
            registry: self.registry.clone(),
            events: self.events.len(),
        };

        let result = op(self);
        if let Err(e) = &result {
            tracing::debug!(error = %e, "Operation rolled back");
            self.registry = checkpoint.registry;
            self.events.truncate(checkpoint.events);
        }
        result
    }
}

fn transfers(quote: &Quote, from: Address, to: Address) -> Vec<Transfer> {
    quote
        .erc20s
        .iter()
        .zip(&quote.quantities)
        .filter(|(_, amount)| **amount > 0)
        .map(|(token, amount)| Transfer {
            token: *token,
            from,
            to,
            amount: *amount,
        })
        .collect()
}
