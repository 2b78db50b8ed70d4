//! ============================================================================
//! Observability - Per-operation metrics for the AI pipeline
//! ============================================================================
//! Tracks every provider call with a request id, latency, status and token
//! count; keeps the most recent records in a bounded ring buffer and computes
//! latency percentiles, error rates and a system-health rollup on demand.
//! ============================================================================

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::CoreError;

/// Ring buffer capacity for retained metric records.
pub const DEFAULT_METRICS_CAPACITY: usize = 10_000;

/// Trailing window used by the health rollup and default error rate.
pub const HEALTH_WINDOW: Duration = Duration::from_secs(300);

/// Outcome classification of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Error,
    Timeout,
    CircuitOpen,
}

impl OperationStatus {
    /// Map an error to its metric status. Timeout and circuit-open failures
    /// surface like any provider failure to callers, but are recorded under
    /// distinct codes for diagnosis.
    pub fn from_error(err: &CoreError) -> Self {
        match err {
            CoreError::Timeout { .. } => OperationStatus::Timeout,
            CoreError::CircuitOpen { .. } => OperationStatus::CircuitOpen,
            _ => OperationStatus::Error,
        }
    }

    fn is_failure(self) -> bool {
        !matches!(self, OperationStatus::Success)
    }
}

/// One tracked operation. Returned by value from `start_operation` and
/// consumed by `end_operation`, so a record is finalized exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct RequestMetrics {
    pub request_id: Uuid,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Unix milliseconds.
    pub start_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Latency percentiles over successful operations.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    pub p50: i64,
    pub p95: i64,
    pub p99: i64,
    pub mean: f64,
    pub total: usize,
}

/// Per-agent slice of the health rollup.
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub requests: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub tokens_used: u64,
}

/// System health over the trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub total_requests: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub total_tokens_used: u64,
    pub agents: HashMap<String, AgentHealth>,
}

/// Metrics service. One instance is shared process-wide and injected into
/// every component that makes provider calls.
pub struct Observability {
    metrics: RwLock<VecDeque<RequestMetrics>>,
    capacity: usize,
}

impl Default for Observability {
    fn default() -> Self {
        Self::new(DEFAULT_METRICS_CAPACITY)
    }
}

impl Observability {
    pub fn new(capacity: usize) -> Self {
        Self {
            metrics: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    /// Begin tracking an operation. The returned record must be handed back
    /// to `end_operation` to enter the buffer.
    pub fn start_operation(&self, operation: &str, agent: Option<&str>) -> RequestMetrics {
        RequestMetrics {
            request_id: Uuid::new_v4(),
            operation: operation.to_string(),
            agent: agent.map(str::to_string),
            start_ms: chrono::Utc::now().timestamp_millis(),
            end_ms: None,
            latency_ms: None,
            status: OperationStatus::Success,
            tokens_used: None,
            error_message: None,
        }
    }

    /// Finalize a record: compute latency, attach outcome details, log one
    /// structured line and append to the ring buffer.
    pub fn end_operation(
        &self,
        mut metric: RequestMetrics,
        status: OperationStatus,
        tokens_used: Option<u32>,
        error_message: Option<String>,
    ) {
        let end_ms = chrono::Utc::now().timestamp_millis();
        metric.end_ms = Some(end_ms);
        metric.latency_ms = Some(end_ms - metric.start_ms);
        metric.status = status;
        metric.tokens_used = tokens_used;
        metric.error_message = error_message;

        info!(
            request_id = %metric.request_id,
            operation = %metric.operation,
            agent = metric.agent.as_deref().unwrap_or("-"),
            latency_ms = metric.latency_ms.unwrap_or(0),
            status = ?metric.status,
            "operation completed"
        );

        self.record(metric);
    }

    /// Bracket a future with start/end tracking. The status is derived from
    /// the typed error; `estimate_tokens` runs only on success.
    pub async fn track_operation<F, T, E>(
        &self,
        operation: &str,
        agent: Option<&str>,
        fut: F,
        estimate_tokens: E,
    ) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
        E: FnOnce(&T) -> Option<u32>,
    {
        let metric = self.start_operation(operation, agent);

        match fut.await {
            Ok(value) => {
                let tokens = estimate_tokens(&value);
                self.end_operation(metric, OperationStatus::Success, tokens, None);
                Ok(value)
            }
            Err(err) => {
                let status = OperationStatus::from_error(&err);
                self.end_operation(metric, status, None, Some(err.to_string()));
                Err(err)
            }
        }
    }

    fn record(&self, metric: RequestMetrics) {
        let mut metrics = self.metrics.write();
        if metrics.len() >= self.capacity {
            metrics.pop_front();
        }
        metrics.push_back(metric);
    }

    /// p50/p95/p99/mean over successful samples, optionally filtered by
    /// operation and agent. `None` when the filtered set is empty.
    pub fn latency_stats(&self, operation: Option<&str>, agent: Option<&str>) -> Option<LatencyStats> {
        let metrics = self.metrics.read();

        let mut latencies: Vec<i64> = metrics
            .iter()
            .filter(|m| m.status == OperationStatus::Success)
            .filter(|m| matches_filter(m, operation, agent))
            .filter_map(|m| m.latency_ms)
            .collect();

        if latencies.is_empty() {
            return None;
        }
        latencies.sort_unstable();

        let n = latencies.len();
        let idx = |p: f64| ((n as f64 * p).floor() as usize).min(n - 1);
        let mean = latencies.iter().sum::<i64>() as f64 / n as f64;

        Some(LatencyStats {
            p50: latencies[idx(0.5)],
            p95: latencies[idx(0.95)],
            p99: latencies[idx(0.99)],
            mean,
            total: n,
        })
    }

    /// Percentage of failed operations (error / timeout / circuit_open)
    /// within the trailing window.
    pub fn error_rate(&self, operation: Option<&str>, agent: Option<&str>, window: Duration) -> f64 {
        let cutoff = chrono::Utc::now().timestamp_millis() - window.as_millis() as i64;
        let metrics = self.metrics.read();

        let relevant: Vec<&RequestMetrics> = metrics
            .iter()
            .filter(|m| m.start_ms >= cutoff)
            .filter(|m| matches_filter(m, operation, agent))
            .collect();

        if relevant.is_empty() {
            return 0.0;
        }

        let failures = relevant.iter().filter(|m| m.status.is_failure()).count();
        failures as f64 / relevant.len() as f64 * 100.0
    }

    /// Sum of recorded token counts.
    pub fn total_tokens(&self, operation: Option<&str>, agent: Option<&str>) -> u64 {
        self.metrics
            .read()
            .iter()
            .filter(|m| matches_filter(m, operation, agent))
            .filter_map(|m| m.tokens_used)
            .map(u64::from)
            .sum()
    }

    /// Rollup over the trailing five minutes with a per-agent breakdown.
    pub fn system_health(&self) -> SystemHealth {
        let cutoff = chrono::Utc::now().timestamp_millis() - HEALTH_WINDOW.as_millis() as i64;
        let metrics = self.metrics.read();

        let recent: Vec<&RequestMetrics> =
            metrics.iter().filter(|m| m.start_ms >= cutoff).collect();

        let mut agents: HashMap<String, AgentHealth> = HashMap::new();
        for agent in recent.iter().filter_map(|m| m.agent.clone()) {
            if agents.contains_key(&agent) {
                continue;
            }
            let slice: Vec<&RequestMetrics> = recent
                .iter()
                .copied()
                .filter(|m| m.agent.as_deref() == Some(agent.as_str()))
                .collect();
            agents.insert(
                agent,
                AgentHealth {
                    requests: slice.len(),
                    success_rate: success_rate(slice.iter().copied()),
                    avg_latency_ms: avg_latency(slice.iter().copied()),
                    tokens_used: slice
                        .iter()
                        .filter_map(|m| m.tokens_used)
                        .map(u64::from)
                        .sum(),
                },
            );
        }

        SystemHealth {
            total_requests: recent.len(),
            success_rate: success_rate(recent.iter().copied()),
            avg_latency_ms: avg_latency(recent.iter().copied()),
            total_tokens_used: self.total_tokens(None, None),
            agents,
        }
    }

    /// The most recent `limit` records, newest first.
    pub fn recent_metrics(&self, limit: usize) -> Vec<RequestMetrics> {
        self.metrics
            .read()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

fn matches_filter(m: &RequestMetrics, operation: Option<&str>, agent: Option<&str>) -> bool {
    if let Some(op) = operation {
        if m.operation != op {
            return false;
        }
    }
    if let Some(a) = agent {
        if m.agent.as_deref() != Some(a) {
            return false;
        }
    }
    true
}

fn success_rate<'a>(metrics: impl Iterator<Item = &'a RequestMetrics>) -> f64 {
    let mut total = 0usize;
    let mut ok = 0usize;
    for m in metrics {
        total += 1;
        if m.status == OperationStatus::Success {
            ok += 1;
        }
    }
    if total == 0 {
        100.0
    } else {
        ok as f64 / total as f64 * 100.0
    }
}

fn avg_latency<'a>(metrics: impl Iterator<Item = &'a RequestMetrics>) -> f64 {
    let latencies: Vec<i64> = metrics.filter_map(|m| m.latency_ms).collect();
    if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<i64>() as f64 / latencies.len() as f64
    }
}
