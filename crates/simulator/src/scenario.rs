//! JSON scenario format and the step interpreter.

use alloy_primitives::Address;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use basket_assets::{Collateral, PlainAsset, PriceFeed};
use basket_common::Fix;
use basket_common::types::{ExecutionContext, RoundingMode, TargetName};
use basket_engine::{Protocol, ProtocolEvent};

/// A scripted run: a starting context and the steps to apply in order.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_start_height")]
    pub start_height: u64,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default = "default_seconds_per_height")]
    pub seconds_per_height: i64,
    pub steps: Vec<Step>,
}

fn default_start_height() -> u64 {
    1
}

fn default_seconds_per_height() -> i64 {
    12
}

/// Asset to register.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetSpec {
    Fiat {
        erc20: Address,
        decimals: u8,
        target: TargetName,
        price: Fix,
        #[serde(default)]
        default_delay_secs: Option<u64>,
    },
    NonFiat {
        erc20: Address,
        decimals: u8,
        target: TargetName,
        uoa_per_target: Fix,
        target_per_ref: Fix,
        #[serde(default)]
        default_delay_secs: Option<u64>,
    },
    YieldWrapped {
        erc20: Address,
        decimals: u8,
        target: TargetName,
        uoa_per_ref: Fix,
        ref_per_tok: Fix,
        #[serde(default)]
        default_delay_secs: Option<u64>,
    },
    Plain {
        erc20: Address,
        decimals: u8,
        price: Fix,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Register(AssetSpec),
    /// Set a collateral's feed reading; `null` marks the feed stale.
    SetPrice { erc20: Address, price: Option<Fix> },
    SetRefPerTok { erc20: Address, ref_per_tok: Fix },
    /// Credit whole-token `amount` of `token` to `account`.
    Fund { token: Address, account: Address, amount: Fix },
    SetPrimeBasket { erc20s: Vec<Address>, target_amts: Vec<Fix> },
    SetBackupConfig { target_name: TargetName, max: usize, erc20s: Vec<Address> },
    EnsureBasket,
    SwitchBasket,
    Issue { issuer: Address, amount: Fix },
    /// Vest up to `end_id`, or up to the advisory end index when omitted.
    Vest { account: Address, end_id: Option<usize> },
    Cancel { account: Address, end_id: usize, earliest: bool },
    Redeem { redeemer: Address, amount: Fix },
    Advance { heights: u64 },
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Register(_) => "register",
            Step::SetPrice { .. } => "set_price",
            Step::SetRefPerTok { .. } => "set_ref_per_tok",
            Step::Fund { .. } => "fund",
            Step::SetPrimeBasket { .. } => "set_prime_basket",
            Step::SetBackupConfig { .. } => "set_backup_config",
            Step::EnsureBasket => "ensure_basket",
            Step::SwitchBasket => "switch_basket",
            Step::Issue { .. } => "issue",
            Step::Vest { .. } => "vest",
            Step::Cancel { .. } => "cancel",
            Step::Redeem { .. } => "redeem",
            Step::Advance { .. } => "advance",
        }
    }
}

impl Scenario {
    /// Apply every step and return the full event log.
    pub fn run(self, protocol: &mut Protocol) -> anyhow::Result<Vec<ProtocolEvent>> {
        let start = self.start_time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let mut ctx = ExecutionContext::new(self.start_height, start);

        for (i, step) in self.steps.into_iter().enumerate() {
            let name = step.name();
            tracing::info!(step = i, op = name, height = ctx.height, "Applying step");
            apply(protocol, &mut ctx, self.seconds_per_height, step)
                .with_context(|| format!("step {i} ({name}) failed at height {}", ctx.height))?;
        }

        Ok(protocol.drain_events())
    }
}

fn apply(protocol: &mut Protocol, ctx: &mut ExecutionContext, seconds_per_height: i64, step: Step) -> anyhow::Result<()> {
    match step {
        Step::Register(spec) => {
            match spec {
                AssetSpec::Fiat {
                    erc20,
                    decimals,
                    target,
                    price,
                    default_delay_secs,
                } => protocol.register_asset(with_delay(
                    Collateral::fiat(erc20, decimals, target, price),
                    default_delay_secs,
                ))?,
                AssetSpec::NonFiat {
                    erc20,
                    decimals,
                    target,
                    uoa_per_target,
                    target_per_ref,
                    default_delay_secs,
                } => protocol.register_asset(with_delay(
                    Collateral::non_fiat(erc20, decimals, target, uoa_per_target, target_per_ref),
                    default_delay_secs,
                ))?,
                AssetSpec::YieldWrapped {
                    erc20,
                    decimals,
                    target,
                    uoa_per_ref,
                    ref_per_tok,
                    default_delay_secs,
                } => protocol.register_asset(with_delay(
                    Collateral::yield_wrapped(erc20, decimals, target, uoa_per_ref, ref_per_tok),
                    default_delay_secs,
                ))?,
                AssetSpec::Plain { erc20, decimals, price } => protocol.register_asset(PlainAsset {
                    erc20,
                    decimals,
                    uoa_per_tok: PriceFeed::new(price),
                })?,
            };
        }
        Step::SetPrice { erc20, price } => {
            let feed = protocol.collateral_mut(&erc20)?.feed_mut();
            match price {
                Some(price) => feed.set_price(price),
                None => feed.mark_stale(),
            }
        }
        Step::SetRefPerTok { erc20, ref_per_tok } => {
            protocol.collateral_mut(&erc20)?.set_ref_per_tok(ref_per_tok)?;
        }
        Step::Fund { token, account, amount } => {
            let decimals = protocol.registry().to_asset(&token)?.decimals();
            protocol.fund(token, account, amount.to_raw(decimals, RoundingMode::Floor)?)?;
        }
        Step::SetPrimeBasket { erc20s, target_amts } => protocol.set_prime_basket(&erc20s, &target_amts)?,
        Step::SetBackupConfig {
            target_name,
            max,
            erc20s,
        } => protocol.set_backup_config(target_name, max, &erc20s)?,
        Step::EnsureBasket => {
            let switched = protocol.ensure_basket(ctx)?;
            tracing::info!(switched, status = %protocol.status(), "Basket ensured");
        }
        Step::SwitchBasket => {
            let switched = protocol.switch_basket(ctx)?;
            if !switched {
                tracing::warn!(status = %protocol.status(), "Basket switch found no eligible collateral");
            }
        }
        Step::Issue { issuer, amount } => {
            let receipt = protocol.issue(issuer, amount, ctx)?;
            tracing::info!(issuer = %issuer, records = receipt.records, vested = %receipt.vested, "Issued");
        }
        Step::Vest { account, end_id } => {
            let end_id = end_id.unwrap_or_else(|| protocol.end_id_for_vest(&account, ctx.height));
            let vested = protocol.vest(account, end_id, ctx)?;
            tracing::info!(account = %account, end_id, vested = %vested, "Vested");
        }
        Step::Cancel {
            account,
            end_id,
            earliest,
        } => {
            let refunded = protocol.cancel(account, end_id, earliest, ctx)?;
            tracing::info!(account = %account, positions = refunded.len(), "Canceled");
        }
        Step::Redeem { redeemer, amount } => {
            let quote = protocol.redeem(redeemer, amount, ctx)?;
            tracing::info!(redeemer = %redeemer, tokens = quote.erc20s.len(), "Redeemed");
        }
        Step::Advance { heights } => {
            *ctx = ctx.advance(heights, seconds_per_height);
        }
    }
    Ok(())
}

fn with_delay(collateral: Collateral, delay: Option<u64>) -> Collateral {
    match delay {
        Some(secs) => collateral.with_default_delay(secs),
        None => collateral,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basket_common::config::EngineConfig;

    const SCENARIO: &str = r#"{
        "start_height": 100,
        "steps": [
            { "op": "register", "kind": "fiat", "erc20": "0x0101010101010101010101010101010101010101",
              "decimals": 18, "target": "USD", "price": "1" },
            { "op": "register", "kind": "fiat", "erc20": "0x0202020202020202020202020202020202020202",
              "decimals": 6, "target": "USD", "price": "1" },
            { "op": "set_prime_basket", "erc20s": ["0x0101010101010101010101010101010101010101"],
              "target_amts": ["1"] },
            { "op": "set_backup_config", "target_name": "USD", "max": 1,
              "erc20s": ["0x0202020202020202020202020202020202020202"] },
            { "op": "switch_basket" },
            { "op": "fund", "token": "0x0101010101010101010101010101010101010101",
              "account": "0xa1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1", "amount": "5" },
            { "op": "issue", "issuer": "0xa1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1", "amount": "5" },
            { "op": "advance", "heights": 3 },
            { "op": "set_price", "erc20": "0x0101010101010101010101010101010101010101", "price": null },
            { "op": "ensure_basket" }
        ]
    }"#;

    #[test]
    fn test_scenario_runs_and_logs_events() {
        let scenario: Scenario = serde_json::from_str(SCENARIO).unwrap();
        let mut protocol = Protocol::new(EngineConfig::default());
        let events = scenario.run(&mut protocol).unwrap();

        let names: Vec<&str> = events.iter().map(ProtocolEvent::name).collect();
        assert_eq!(
            names,
            vec![
                "asset_registered",
                "asset_registered",
                "prime_basket_set",
                "backup_config_set",
                "basket_set",
                "issuance_started",
                "issuances_completed",
                "collateral_status_changed",
            ]
        );
        assert_eq!(protocol.ledger().total_supply(), "5".parse().unwrap());
    }

    #[test]
    fn test_failing_step_reports_its_index() {
        let scenario: Scenario = serde_json::from_str(
            r#"{ "steps": [ { "op": "set_prime_basket", "erc20s": ["0x0101010101010101010101010101010101010101"],
                 "target_amts": ["1"] } ] }"#,
        )
        .unwrap();
        let err = scenario
            .run(&mut Protocol::new(EngineConfig::default()))
            .unwrap_err();
        assert!(format!("{err:#}").contains("step 0 (set_prime_basket)"));
    }
}
