//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use accrual_ledger::config::SyncConfig;
use accrual_ledger::ledger::luhn_check_digit;

/// Luhn-valid order number built from `seed`
pub fn order_number(seed: u64) -> String {
    let payload = format!("{}", 4_000_000_000u64 + seed);
    let check = luhn_check_digit(&payload).expect("payload is all digits");
    format!("{payload}{check}")
}

/// Sync settings with short intervals so tests stay fast
pub fn fast_sync(workers: usize) -> SyncConfig {
    SyncConfig {
        workers,
        queue_capacity: 1,
        poll_interval_ms: 50,
        job_timeout_ms: 2_000,
        retry_attempts: 5,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 20,
    }
}

/// Poll `check` until it returns true or `within` elapses
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
