//! Mock accrual provider
//!
//! [SECURITY] Only compiled with the `mock-accrual` feature. Production builds
//! use `--no-default-features`.
//!
//! Two pieces:
//! - [`ScriptedAccrualClient`]: in-process [`AccrualClient`] returning a
//!   per-number script of responses
//! - [`MockAccrualProvider`]: axum router speaking the provider's HTTP
//!   contract, with random 500 / 429 injection

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use super::client::AccrualClient;
use super::error::RemoteError;
use super::types::AccrualOrder;
use crate::ledger::OrderStatus;

pub type ScriptedResponse = Result<Option<AccrualOrder>, RemoteError>;

#[derive(Default)]
struct Script {
    responses: VecDeque<ScriptedResponse>,
    calls: usize,
}

/// [`AccrualClient`] answering from a script.
///
/// Each number has a queue of responses. Calls pop from the front; the last
/// response repeats forever. Unscripted numbers answer "not known yet".
#[derive(Clone, Default)]
pub struct ScriptedAccrualClient {
    scripts: Arc<DashMap<String, Script>>,
    total_calls: Arc<AtomicUsize>,
    latency: Option<Duration>,
}

impl ScriptedAccrualClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replace the script for `number`
    pub fn script(&self, number: &str, responses: impl IntoIterator<Item = ScriptedResponse>) {
        let mut script = self.scripts.entry(number.to_string()).or_default();
        script.responses = responses.into_iter().collect();
    }

    /// Always answer PROCESSED with `accrual`
    pub fn processed(&self, number: &str, accrual: Decimal) {
        self.script(number, [Ok(Some(AccrualOrder::processed(number, accrual)))]);
    }

    /// Always answer `status` without accrual
    pub fn status(&self, number: &str, status: OrderStatus) {
        self.script(number, [Ok(Some(AccrualOrder::new(number, status, None)))]);
    }

    /// Fail `failures` times with a 500, then answer PROCESSED
    pub fn flaky_processed(&self, number: &str, failures: usize, accrual: Decimal) {
        let errors = (0..failures).map(|_| {
            Err(RemoteError::Status {
                status: 500,
                body: "internal error".to_string(),
                retry_after: None,
            })
        });
        let success = std::iter::once(Ok(Some(AccrualOrder::processed(number, accrual))));
        self.script(number, errors.chain(success));
    }

    pub fn calls(&self, number: &str) -> usize {
        self.scripts.get(number).map(|s| s.calls).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    fn next_response(&self, number: &str) -> ScriptedResponse {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let Some(mut script) = self.scripts.get_mut(number) else {
            return Ok(None);
        };
        script.calls += 1;
        if script.responses.len() > 1 {
            script.responses.pop_front().unwrap_or(Ok(None))
        } else {
            script.responses.front().cloned().unwrap_or(Ok(None))
        }
    }
}

#[async_trait]
impl AccrualClient for ScriptedAccrualClient {
    async fn get_order(&self, number: &str) -> Result<Option<AccrualOrder>, RemoteError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.next_response(number)
    }
}

// ============================================================================
// HTTP Provider
// ============================================================================

/// Fault injection knobs for [`MockAccrualProvider`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultInjection {
    /// Probability of answering 500
    pub fail_rate: f64,
    /// Probability of answering 429
    pub throttle_rate: f64,
    /// `Retry-After` seconds sent with a 429
    pub retry_after_secs: u64,
}

/// HTTP stand-in for the accrual provider
#[derive(Clone, Default)]
pub struct MockAccrualProvider {
    orders: Arc<DashMap<String, AccrualOrder>>,
    faults: FaultInjection,
    requests: Arc<AtomicUsize>,
}

impl MockAccrualProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: FaultInjection) -> Self {
        Self {
            faults,
            ..Self::default()
        }
    }

    /// Register or replace the provider's view of an order
    pub fn register(&self, order: AccrualOrder) {
        self.orders.insert(order.order.clone(), order);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/orders", post(register_order))
            .route("/api/orders/{number}", get(get_order))
            .with_state(self.clone())
    }
}

async fn register_order(
    State(provider): State<MockAccrualProvider>,
    Json(order): Json<AccrualOrder>,
) -> StatusCode {
    debug!(order = %order.order, status = %order.status, "Mock order registered");
    provider.register(order);
    StatusCode::ACCEPTED
}

async fn get_order(
    State(provider): State<MockAccrualProvider>,
    Path(number): Path<String>,
) -> Response {
    provider.requests.fetch_add(1, Ordering::SeqCst);

    let roll: f64 = rand::random();
    let faults = provider.faults;
    if roll < faults.fail_rate {
        return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
    }
    if roll < faults.fail_rate + faults.throttle_rate {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, faults.retry_after_secs.to_string())],
            "No more than N requests per minute allowed",
        )
            .into_response();
    }

    match provider.orders.get(&number) {
        Some(order) => Json(order.clone()).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
