//! Prometheus metrics for bet intake, settlement and ledger delivery

use crate::errors::{ConfigurationError, EngineResult};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct EngineMetrics {
    registry: Registry,
    pub bets_placed: IntCounterVec,
    pub bets_rejected: IntCounterVec,
    pub orders_settled: IntCounterVec,
    pub rewards_credited: IntCounterVec,
    pub settlement_batches: IntCounter,
    pub batch_panics: IntCounter,
    pub periods_finalized: IntCounterVec,
    pub recovery_redrives: IntCounterVec,
    pub ledger_delivered: IntCounter,
    pub ledger_failed: IntCounter,
    pub accumulator_backlog: IntGauge,
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> prometheus::Result<IntCounterVec> {
    let metric = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let metric = IntCounter::new(name, help)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl EngineMetrics {
    pub fn new() -> EngineResult<Self> {
        Self::build().map_err(|e| ConfigurationError::ValidationFailed(format!("metrics: {}", e)).into())
    }

    fn build() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("roundbet".to_string()), None)?;

        let accumulator_backlog = IntGauge::new(
            "accumulator_backlog",
            "Orders waiting in the settlement accumulator",
        )?;
        registry.register(Box::new(accumulator_backlog.clone()))?;

        Ok(Self {
            bets_placed: counter_vec(&registry, "bets_placed_total", "Accepted bets", &["bet_type"])?,
            bets_rejected: counter_vec(&registry, "bets_rejected_total", "Rejected bets", &["reason"])?,
            orders_settled: counter_vec(&registry, "orders_settled_total", "Orders settled", &["bet_type"])?,
            rewards_credited: counter_vec(
                &registry,
                "rewards_credited_total",
                "Reward amount credited in minor units",
                &["bet_type"],
            )?,
            settlement_batches: counter(&registry, "settlement_batches_total", "Settlement batches dispatched")?,
            batch_panics: counter(&registry, "settlement_batch_panics_total", "Settlement batches that panicked")?,
            periods_finalized: counter_vec(&registry, "periods_finalized_total", "Periods settled", &["bet_type"])?,
            recovery_redrives: counter_vec(
                &registry,
                "recovery_redrives_total",
                "Periods or orders re-driven by the recovery scanner",
                &["kind"],
            )?,
            ledger_delivered: counter(&registry, "ledger_delivered_total", "Ledger records delivered")?,
            ledger_failed: counter(&registry, "ledger_failed_total", "Ledger records dropped after retries")?,
            accumulator_backlog,
            registry,
        })
    }

    /// Text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
