use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use txfault_core::HarnessConfig;
use txfault_testing::{print_scenario_summary, run_scenarios_on_simulator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = HarnessConfig::from_env().context("reading TXFAULT_* configuration")?;
    info!(
        "Bounded policy: {}, watchdog {:?}",
        config.bounded_policy, config.watchdog
    );

    println!("🚀 Running transaction fault scenarios against a simulated 3-member replica set");
    let reports = run_scenarios_on_simulator(&config).await;

    if config.report_json {
        for report in &reports {
            println!("{}", report.to_json()?);
        }
    } else {
        print_scenario_summary(&reports);
    }

    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| r.verdict.is_failure())
        .map(|r| r.scenario.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("scenarios failed: {}", failed.join(", "));
    }

    println!("✅ All selected scenarios behaved as expected");
    Ok(())
}
