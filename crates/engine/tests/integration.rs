//! End-to-end tests driving a full `Protocol`: basket switching against
//! collateral health, throughput-limited issuance, vesting, cancellation
//! and redemption.
//!
//! ```bash
//! cargo test -p basket-engine --test integration
//! ```

use alloy_primitives::Address;
use chrono::{DateTime, Utc};

use basket_assets::Collateral;
use basket_common::config::EngineConfig;
use basket_common::types::{BACKING_CUSTODY, CollateralStatus, ExecutionContext, ISSUANCE_ESCROW, RoundingMode};
use basket_common::{Fix, ProtocolError};
use basket_engine::{Protocol, ProtocolEvent};

// ============================================================
// Shared helpers
// ============================================================

const USDC: u8 = 0x01;
const DAI: u8 = 0x02;
const CUSDC: u8 = 0x03;
const USDT: u8 = 0x04;
const TUSD: u8 = 0x05;
const WBTC: u8 = 0x06;

const ALICE: u8 = 0xA1;
const BOB: u8 = 0xB0;

/// One whole unit of an 18-decimal token, in raw units.
const UNIT: u128 = 1_000_000_000_000_000_000;

fn fix(s: &str) -> Fix {
    s.parse().unwrap()
}

fn token(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

/// Context at `height`, with 12 seconds per height.
fn at(height: u64) -> ExecutionContext {
    ExecutionContext::new(0, DateTime::<Utc>::UNIX_EPOCH).advance(height, 12)
}

/// Throughput floor of 10 units per height, so the proportional term never wins
/// for the supplies used here.
fn config() -> EngineConfig {
    EngineConfig {
        issuance_rate: fix("0.00025"),
        min_issuance_rate: fix("10"),
        ..EngineConfig::default()
    }
}

/// USD collateral: USDC and DAI (fiat), cUSDC (yield-wrapped), USDT and TUSD
/// as backups. No basket yet.
fn protocol() -> Protocol {
    let mut p = Protocol::new(config());
    p.register_asset(Collateral::fiat(token(USDC), 18, "USD", Fix::ONE)).unwrap();
    p.register_asset(Collateral::fiat(token(DAI), 18, "USD", Fix::ONE)).unwrap();
    p.register_asset(Collateral::yield_wrapped(token(CUSDC), 18, "USD", Fix::ONE, fix("0.02")))
        .unwrap();
    p.register_asset(Collateral::fiat(token(USDT), 18, "USD", Fix::ONE)).unwrap();
    p.register_asset(Collateral::fiat(token(TUSD), 18, "USD", Fix::ONE)).unwrap();
    p
}

/// A protocol whose basket is one USDC per basket unit.
fn usdc_protocol() -> Protocol {
    let mut p = protocol();
    p.set_prime_basket(&[token(USDC)], &[Fix::ONE]).unwrap();
    assert!(p.switch_basket(&at(1)).unwrap());
    p
}

/// Permanently default cUSDC by lowering its refPerTok.
fn default_cusdc(p: &mut Protocol) {
    p.collateral_mut(&token(CUSDC))
        .unwrap()
        .set_ref_per_tok(fix("0.019"))
        .unwrap();
}

// ============================================================
// Basket switching
// ============================================================

#[test]
fn test_two_sound_tokens_quantity_and_price() {
    let mut p = protocol();
    p.set_prime_basket(&[token(USDC), token(CUSDC)], &[fix("0.5"), fix("0.5")])
        .unwrap();
    assert!(p.switch_basket(&at(1)).unwrap());

    assert_eq!(p.quantity(&token(USDC)).unwrap(), fix("0.5"));
    assert_eq!(p.quantity(&token(CUSDC)).unwrap(), fix("25"));
    // 1 * 0.5 + 0.02 * 25
    assert_eq!(p.price().unwrap(), Fix::ONE);
    assert_eq!(p.status(), CollateralStatus::Sound);
}

#[test]
fn test_disabled_token_replaced_by_single_backup() {
    let mut p = protocol();
    p.set_prime_basket(&[token(USDC), token(CUSDC)], &[fix("0.5"), fix("0.5")])
        .unwrap();
    p.set_backup_config("USD", 1, &[token(USDT)]).unwrap();
    p.switch_basket(&at(1)).unwrap();
    p.drain_events();

    default_cusdc(&mut p);
    assert!(p.switch_basket(&at(2)).unwrap());

    let basket = p.basket_handler().basket();
    assert_eq!(basket.erc20s(), vec![token(USDC), token(USDT)]);
    assert_eq!(basket.ref_amt(&token(USDT)), Some(fix("0.5")));
    assert_eq!(basket.nonce(), 2);
    assert_eq!(p.status(), CollateralStatus::Sound);

    let events = p.drain_events();
    assert!(matches!(
        events[0],
        ProtocolEvent::CollateralStatusChanged {
            new: CollateralStatus::Disabled,
            ..
        }
    ));
    assert!(matches!(events[1], ProtocolEvent::BasketSet { nonce: 2, .. }));
}

#[test]
fn test_switch_without_eligible_backup_keeps_basket() {
    let mut p = protocol();
    p.set_prime_basket(&[token(USDC), token(CUSDC)], &[fix("0.5"), fix("0.5")])
        .unwrap();
    p.switch_basket(&at(1)).unwrap();
    let before = p.basket_handler().basket().clone();

    default_cusdc(&mut p);
    assert!(!p.switch_basket(&at(2)).unwrap());

    assert_eq!(p.basket_handler().basket(), &before);
    assert_eq!(p.basket_handler().nonce(), 1);
    assert_eq!(p.status(), CollateralStatus::Disabled);
}

#[test]
fn test_price_skips_disabled_tokens() {
    let mut p = protocol();
    p.set_prime_basket(&[token(USDC), token(CUSDC)], &[fix("0.5"), fix("0.5")])
        .unwrap();
    p.switch_basket(&at(1)).unwrap();

    default_cusdc(&mut p);
    assert!(!p.switch_basket(&at(2)).unwrap());
    assert_eq!(
        p.registry().to_collateral(&token(CUSDC)).unwrap().status(),
        CollateralStatus::Disabled
    );

    // Only the USDC half is still valued.
    assert_eq!(p.price().unwrap(), fix("0.5"));
}

#[test]
fn test_ensure_basket_switches_only_when_disabled() {
    let mut p = protocol();
    p.set_prime_basket(&[token(CUSDC)], &[Fix::ONE]).unwrap();
    p.set_backup_config("USD", 1, &[token(DAI)]).unwrap();
    p.switch_basket(&at(1)).unwrap();

    assert!(!p.ensure_basket(&at(2)).unwrap());
    assert_eq!(p.basket_handler().nonce(), 1);

    default_cusdc(&mut p);
    assert!(p.ensure_basket(&at(3)).unwrap());
    assert_eq!(p.basket_handler().basket().erc20s(), vec![token(DAI)]);
}

#[test]
fn test_backup_weights_never_exceed_target_weight() {
    let mut p = protocol();
    p.set_prime_basket(&[token(USDC), token(CUSDC)], &[fix("0.3"), fix("0.7")])
        .unwrap();
    p.set_backup_config("USD", 3, &[token(DAI), token(USDT), token(TUSD)])
        .unwrap();
    default_cusdc(&mut p);
    assert!(p.switch_basket(&at(1)).unwrap());

    // Every USD token here has targetPerRef = 1, so ref amounts are target weights.
    let assigned = p
        .basket_handler()
        .basket()
        .ref_amts()
        .into_iter()
        .try_fold(Fix::ZERO, |acc, amt| acc.checked_add(amt))
        .unwrap();
    assert!(assigned <= Fix::ONE);
    assert!(Fix::ONE.checked_sub(assigned).unwrap().bits() <= 3);
}

#[test]
fn test_switch_reproduces_prime_reference_amounts() {
    let mut p = protocol();
    p.register_asset(Collateral::non_fiat(token(WBTC), 8, "BTC", fix("30000"), fix("0.998")))
        .unwrap();
    p.set_prime_basket(&[token(USDC), token(WBTC)], &[fix("0.5"), fix("0.00001")])
        .unwrap();
    p.switch_basket(&at(1)).unwrap();

    let basket = p.basket_handler().basket();
    assert_eq!(basket.ref_amt(&token(USDC)), Some(fix("0.5")));
    assert_eq!(
        basket.ref_amt(&token(WBTC)),
        Some(fix("0.00001").div(fix("0.998"), RoundingMode::Ceil).unwrap())
    );
}

#[test]
fn test_quantity_zero_outside_registry() {
    let mut p = usdc_protocol();
    p.set_prime_basket(&[token(USDC), token(DAI)], &[fix("0.5"), fix("0.5")])
        .unwrap();
    p.switch_basket(&at(2)).unwrap();

    p.unregister_asset(token(DAI)).unwrap();
    assert_eq!(p.quantity(&token(DAI)).unwrap(), Fix::ZERO);
    assert_eq!(p.quantity(&token(0x77)).unwrap(), Fix::ZERO);
    assert_eq!(p.status(), CollateralStatus::Disabled);
}

#[test]
fn test_baskets_held_by_grows_with_balance() {
    let mut p = protocol();
    p.set_prime_basket(&[token(USDC), token(DAI)], &[fix("0.5"), fix("0.5")])
        .unwrap();
    p.switch_basket(&at(1)).unwrap();
    let alice = token(ALICE);

    let mut previous = p.baskets_held_by(&alice).unwrap();
    assert_eq!(previous, Fix::ZERO);
    for (erc20, amount) in [(USDC, UNIT), (DAI, UNIT / 2), (USDC, UNIT), (DAI, 3 * UNIT)] {
        p.fund(token(erc20), alice, amount).unwrap();
        let held = p.baskets_held_by(&alice).unwrap();
        assert!(held >= previous);
        previous = held;
    }
    assert_eq!(previous, fix("4"));
}

// ============================================================
// Issuance
// ============================================================

#[test]
fn test_large_issue_vests_head_now_and_tail_later() {
    let mut p = usdc_protocol();
    let alice = token(ALICE);
    p.fund(token(USDC), alice, 100 * UNIT).unwrap();

    let receipt = p.issue(alice, fix("100"), &at(100)).unwrap();
    assert_eq!(receipt.records, 2);
    assert_eq!(receipt.vested, fix("10"));
    assert_eq!(p.ledger().balance_of(&alice), fix("10"));

    let tail = p.issuance().issuance(&alice, 1).unwrap();
    assert_eq!(tail.available_at, fix("109"));

    assert_eq!(p.vest(alice, 2, &at(108)).unwrap(), Fix::ZERO);
    assert_eq!(p.vest(alice, 2, &at(109)).unwrap(), fix("90"));
    assert_eq!(p.ledger().total_supply(), fix("100"));
    assert_eq!(p.vault().balance_of(&token(USDC), &BACKING_CUSTODY), 100 * UNIT);
    assert_eq!(p.vault().balance_of(&token(USDC), &ISSUANCE_ESCROW), 0);
    assert!(p.fully_capitalized().unwrap());
}

#[test]
fn test_availability_non_decreasing_within_queue() {
    let mut p = usdc_protocol();
    let alice = token(ALICE);
    p.fund(token(USDC), alice, 1_000 * UNIT).unwrap();

    for (height, amount) in [(50, "25"), (50, "3"), (52, "40"), (53, "1"), (90, "12")] {
        p.issue(alice, fix(amount), &at(height)).unwrap();
    }

    let heights: Vec<Fix> = p
        .issuance()
        .queue(&alice)
        .iter()
        .map(|r| r.available_at)
        .collect();
    assert!(heights.windows(2).all(|w| w[0] <= w[1]));
}

/// Alice uses up the headroom at height 100, then Bob queues five 10-unit
/// records that cannot vest yet.
fn bob_with_five_pending() -> Protocol {
    let mut p = usdc_protocol();
    p.fund(token(USDC), token(ALICE), 10 * UNIT).unwrap();
    p.issue(token(ALICE), fix("10"), &at(100)).unwrap();

    p.fund(token(USDC), token(BOB), 50 * UNIT).unwrap();
    for _ in 0..5 {
        let receipt = p.issue(token(BOB), fix("10"), &at(100)).unwrap();
        assert_eq!(receipt.vested, Fix::ZERO);
    }
    assert_eq!(p.issuance().queue_len(&token(BOB)), 5);
    p
}

#[test]
fn test_cancel_earliest_refunds_once() {
    let mut p = bob_with_five_pending();
    let bob = token(BOB);

    let refunded = p.cancel(bob, 3, true, &at(101)).unwrap();
    assert_eq!(refunded, vec![30 * UNIT]);
    assert_eq!(p.vault().balance_of(&token(USDC), &bob), 30 * UNIT);

    let queue = p.issuance().queue(&bob);
    assert!(queue[..3].iter().all(|r| r.processed));
    assert!(queue[3..].iter().all(|r| !r.processed));

    let events_before = p.events().len();
    assert!(p.cancel(bob, 3, true, &at(101)).unwrap().is_empty());
    assert_eq!(p.vault().balance_of(&token(USDC), &bob), 30 * UNIT);
    assert_eq!(p.events().len(), events_before);
}

#[test]
fn test_cancel_rejects_end_past_queue() {
    let mut p = bob_with_five_pending();
    assert_eq!(
        p.cancel(token(BOB), 6, false, &at(101)).unwrap_err(),
        ProtocolError::IndexOutOfRange { index: 6, len: 5 }
    );
}

#[test]
fn test_end_id_for_vest_overstates_after_basket_change() {
    let mut p = bob_with_five_pending();
    let bob = token(BOB);

    p.set_prime_basket(&[token(DAI)], &[Fix::ONE]).unwrap();
    assert!(p.switch_basket(&at(101)).unwrap());

    // All five are due by height, none can settle against the new basket.
    assert_eq!(p.end_id_for_vest(&bob, 200), 5);
    assert_eq!(p.vest(bob, 5, &at(200)).unwrap(), Fix::ZERO);
    assert_eq!(p.ledger().balance_of(&bob), Fix::ZERO);

    assert_eq!(p.refund_stale(bob, &at(200)).unwrap(), 5);
    assert_eq!(p.vault().balance_of(&token(USDC), &bob), 50 * UNIT);
}

#[test]
fn test_failed_issue_keeps_stale_records_and_escrow() {
    let mut p = bob_with_five_pending();
    let bob = token(BOB);
    p.set_prime_basket(&[token(DAI)], &[Fix::ONE]).unwrap();
    assert!(p.switch_basket(&at(101)).unwrap());
    let events_before = p.events().len();

    // Bob holds no DAI: the refunds and the deposit fail together.
    assert!(matches!(
        p.issue(bob, fix("10"), &at(200)),
        Err(ProtocolError::InsufficientBalance { .. })
    ));
    // Refunds and deposits both go through, then the queueing step rejects.
    assert!(matches!(p.issue(bob, Fix::ZERO, &at(200)), Err(ProtocolError::Validation(_))));

    assert_eq!(p.issuance().queue_len(&bob), 5);
    assert!(p.issuance().queue(&bob).iter().all(|r| !r.processed));
    assert_eq!(p.vault().balance_of(&token(USDC), &bob), 0);
    assert_eq!(p.vault().balance_of(&token(USDC), &ISSUANCE_ESCROW), 50 * UNIT);
    assert_eq!(p.ledger().total_supply(), fix("10"));
    assert_eq!(p.events().len(), events_before);

    p.fund(token(DAI), bob, 10 * UNIT).unwrap();
    p.issue(bob, fix("10"), &at(200)).unwrap();
    assert_eq!(p.vault().balance_of(&token(USDC), &bob), 50 * UNIT);
    assert!(p.issuance().queue(&bob)[..5].iter().all(|r| r.processed));
    assert!(p.events()[events_before..].iter().any(|e| matches!(
        e,
        ProtocolEvent::IssuancesCanceled { start: 0, end: 5, .. }
    )));
}

#[test]
fn test_vest_requires_sound_basket() {
    let mut p = bob_with_five_pending();
    p.collateral_mut(&token(USDC)).unwrap().feed_mut().mark_stale();

    assert_eq!(
        p.vest(token(BOB), 5, &at(200)).unwrap_err(),
        ProtocolError::BasketUnsound(CollateralStatus::Iffy)
    );
}

#[test]
fn test_issue_then_redeem_round_trip() {
    let mut p = usdc_protocol();
    let alice = token(ALICE);
    p.fund(token(USDC), alice, 5 * UNIT).unwrap();

    p.issue(alice, fix("5"), &at(10)).unwrap();
    assert_eq!(p.vault().balance_of(&token(USDC), &alice), 0);

    let quote = p.redeem(alice, fix("5"), &at(11)).unwrap();
    assert_eq!(quote.quantities, vec![5 * UNIT]);
    assert_eq!(p.vault().balance_of(&token(USDC), &alice), 5 * UNIT);
    assert_eq!(p.ledger().total_supply(), Fix::ZERO);
    assert_eq!(p.ledger().baskets_needed(), Fix::ZERO);
}
