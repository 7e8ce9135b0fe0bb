//! Standalone mock accrual provider
//!
//! Usage:
//!   cargo run --bin accrual_mock -- --port 8081 --fail-rate 0.1 --throttle-rate 0.05
//!
//! Register orders with `POST /api/orders` and a body such as
//! `{"order":"79927398713","status":"PROCESSED","accrual":500}`.

use accrual_ledger::accrual::{FaultInjection, MockAccrualProvider};
use accrual_ledger::config::cli_value;
use anyhow::Context;
use tokio::net::TcpListener;

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> anyhow::Result<T> {
    match cli_value(args, &[flag]) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid value for {flag}: {raw}")),
        None => Ok(default),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = parse_arg(&args, "--port", 8081)?;
    let faults = FaultInjection {
        fail_rate: parse_arg(&args, "--fail-rate", 0.0)?,
        throttle_rate: parse_arg(&args, "--throttle-rate", 0.0)?,
        retry_after_secs: parse_arg(&args, "--retry-after", 1)?,
    };

    let provider = MockAccrualProvider::with_faults(faults);
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    tracing::info!(%addr, ?faults, "Mock accrual provider listening");
    axum::serve(listener, provider.router())
        .await
        .context("Server error")?;
    Ok(())
}
