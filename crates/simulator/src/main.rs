mod scenario;

use anyhow::Context;

use basket_common::config::EngineConfig;
use basket_engine::Protocol;

use crate::scenario::Scenario;

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only the event log
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "basket_sim=info,basket_engine=info,basket_assets=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: basket-sim <scenario.json>")?;

    let config = EngineConfig::from_env()?;
    tracing::info!(
        issuance_rate = %config.issuance_rate,
        min_issuance_rate = %config.min_issuance_rate,
        "Basket simulator starting..."
    );

    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading scenario {path}"))?;
    let scenario: Scenario =
        serde_json::from_str(&raw).with_context(|| format!("parsing scenario {path}"))?;
    let steps = scenario.steps.len();

    let mut protocol = Protocol::new(config);
    let events = scenario.run(&mut protocol)?;

    tracing::info!(
        steps,
        events = events.len(),
        supply = %protocol.ledger().total_supply(),
        status = %protocol.status(),
        "Scenario complete"
    );
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}
